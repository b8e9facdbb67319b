//! Codec for the command channel.
//!
//! Commands and their ACKs travel in frames shaped
//! `FD FC FB FA | len(u16 LE) | word(u16 BE) | payload | 04 03 02 01`.
//! The ACK word is the command word with its lowest bit set, and every ACK
//! payload opens with a little-endian status word (`0x0000` on success).

use bytes::{BufMut, Bytes, BytesMut};

use crate::constants::{COMMAND_FOOTER, COMMAND_HEADER, REPORT_HEADER};
use crate::error::{Error, ProtocolError};

/// What kind of frame a notification carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// A command ACK.
    Ack,
    /// A periodic radar report.
    Report,
    /// Anything without a known header.
    Unknown,
}

/// Classifies a notification by its leading marker.
pub fn classify(data: &[u8]) -> FrameKind {
    if data.starts_with(&COMMAND_HEADER) {
        FrameKind::Ack
    } else if data.starts_with(&REPORT_HEADER) {
        FrameKind::Report
    } else {
        FrameKind::Unknown
    }
}

/// Wraps a command word plus payload into a full downlink frame.
pub fn wrap_command(body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(body.len() + 10);
    buf.put_slice(&COMMAND_HEADER);
    buf.put_u16_le(body.len() as u16);
    buf.put_slice(body);
    buf.put_slice(&COMMAND_FOOTER);
    buf.freeze()
}

/// Extracts the inner body of a command frame.
///
/// Lenient on purpose: some firmware revisions notify ACKs with stray bytes
/// around the frame, so the header is searched for anywhere in the input and
/// a declared length running past the end is clamped. Input without a header
/// is returned unchanged.
pub fn unwrap_frame(data: &Bytes) -> Bytes {
    let Some(start) = find_header(data, &COMMAND_HEADER) else {
        return data.clone();
    };
    let len_at = start + COMMAND_HEADER.len();
    if data.len() < len_at + 2 {
        return data.clone();
    }
    let declared = u16::from_le_bytes([data[len_at], data[len_at + 1]]) as usize;
    let body_at = len_at + 2;
    let end = usize::min(body_at + declared, data.len());
    data.slice(body_at..end)
}

/// Validates an ACK against the command word it answers and returns the
/// payload after the ACK word.
pub fn parse_ack(sent: u16, frame: &Bytes) -> Result<Bytes, ProtocolError> {
    let body = unwrap_frame(frame);
    if body.len() < 2 {
        return Err(ProtocolError::ShortResponse {
            expected: 2,
            actual: body.len(),
        });
    }
    let expected = sent ^ 0x0001;
    let actual = u16::from_be_bytes([body[0], body[1]]);
    if actual != expected {
        return Err(ProtocolError::UnexpectedAck { expected, actual });
    }
    Ok(body.slice(2..))
}

/// Checks the leading status word of an ACK payload and returns the rest.
pub fn ack_status(payload: &Bytes) -> Result<Bytes, Error> {
    if payload.len() < 2 {
        return Err(ProtocolError::ShortResponse {
            expected: 2,
            actual: payload.len(),
        }
        .into());
    }
    let status = u16::from_le_bytes([payload[0], payload[1]]);
    if status != 0 {
        return Err(Error::Operation(format!(
            "command rejected with status {status:#06x}"
        )));
    }
    Ok(payload.slice(2..))
}

fn find_header(data: &[u8], header: &[u8]) -> Option<usize> {
    if data.len() < header.len() {
        return None;
    }
    data.windows(header.len()).position(|w| w == header)
}
