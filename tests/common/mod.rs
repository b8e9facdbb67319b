//! Shared helpers for integration tests: hex fixtures and a scripted
//! in-memory transport.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use ld2410_ble::{DeviceConfig, Error, LD2410, ProtocolProfile, Transport, TransportSession};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Converts a hex string to Bytes.
pub fn hex_to_bytes(hex_str: &str) -> Bytes {
    Bytes::from(hex::decode(hex_str).expect("valid hex string"))
}

/// Routes device tracing into the test output, honoring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// Wire fixtures, byte for byte off a real radar.

/// Enable-config command frame.
pub const ENABLE_CONFIG_FRAME: &str = "fdfcfbfa0400ff00010004030201";
/// Password command frame for the default password "HiLink".
pub const PASSWORD_FRAME: &str = "fdfcfbfa0800a80048694c696e6b04030201";
/// ACK to the password command, success status.
pub const PASSWORD_ACK_FRAME: &str = "fdfcfbfa0400a801000004030201";
/// Frame like the password ACK but with the wrong ACK word.
pub const MISMATCHED_ACK_FRAME: &str = "fdfcfbfa0400a802000004030201";
/// Basic report: moving target at 1 cm energy 20, stationary at 2 cm
/// energy 40, detection at 3 cm.
pub const BASIC_REPORT_FRAME: &str = "f4f3f2f10d0002aa0101001402002803005500f8f7f6f5";
/// Engineering report: both targets present, nine gates of energies, photo
/// sensor 1, OUT pin high.
pub const ENGINEERING_REPORT_FRAME: &str =
    "f4f3f2f1230001aa034e00334e00643e000808123318050403050306000064202627190f1501015500f8f7f6f5";

/// Device config with short timeouts so link failures surface quickly.
pub fn test_config(address: &str) -> DeviceConfig {
    let mut config = DeviceConfig::new(address);
    config.retry_count = 2;
    config.idle_disconnect_delay = Duration::from_millis(500);
    config.response_timeout = Duration::from_millis(80);
    config.reconnect_backoff = Duration::from_millis(20);
    config.reconnect_after_idle = false;
    config
}

/// Builds a device handle wired to a fresh scripted link.
pub fn mock_device(config: DeviceConfig) -> (LD2410, Arc<MockLink>) {
    let link = MockLink::new();
    let transport = MockTransport {
        link: Arc::clone(&link),
    };
    (LD2410::new(config, Arc::new(transport)), link)
}

/// Same as [`mock_device`] but with a custom protocol profile.
pub fn mock_device_with_profile(
    config: DeviceConfig,
    profile: impl ProtocolProfile,
) -> (LD2410, Arc<MockLink>) {
    let link = MockLink::new();
    let transport = MockTransport {
        link: Arc::clone(&link),
    };
    (
        LD2410::with_profile(config, Arc::new(transport), Arc::new(profile)),
        link,
    )
}

/// Scripted radio link shared by a [`MockTransport`] and its sessions.
///
/// Unscripted commands are answered with plausible success ACKs, so tests
/// only script the frames they care about.
pub struct MockLink {
    scripted: Mutex<HashMap<u16, VecDeque<Bytes>>>,
    dropped: Mutex<HashSet<u16>>,
    writes: Mutex<Vec<Bytes>>,
    attempts: AtomicUsize,
    sessions_opened: AtomicUsize,
    cache_clears: AtomicUsize,
    fail_connects: AtomicUsize,
    not_found: AtomicUsize,
    fail_resolves: AtomicUsize,
    fail_writes: AtomicUsize,
    session: Mutex<Option<Arc<MockSession>>>,
}

impl MockLink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            scripted: Mutex::new(HashMap::new()),
            dropped: Mutex::new(HashSet::new()),
            writes: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            sessions_opened: AtomicUsize::new(0),
            cache_clears: AtomicUsize::new(0),
            fail_connects: AtomicUsize::new(0),
            not_found: AtomicUsize::new(0),
            fail_resolves: AtomicUsize::new(0),
            fail_writes: AtomicUsize::new(0),
            session: Mutex::new(None),
        })
    }

    /// Queues a success ACK for `code` carrying `payload` after the status
    /// word.
    pub fn script_ack(&self, code: u16, payload: &[u8]) {
        let mut body = BytesMut::new();
        body.put_u16(code ^ 0x0001);
        body.put_u16_le(0x0000);
        body.put_slice(payload);
        self.script_frame(code, wrap(&body.freeze()));
    }

    /// Queues an ACK for `code` with the given status word and nothing
    /// else.
    pub fn script_status(&self, code: u16, status: u16) {
        let mut body = BytesMut::new();
        body.put_u16(code ^ 0x0001);
        body.put_u16_le(status);
        self.script_frame(code, wrap(&body.freeze()));
    }

    /// Queues a raw notification sent verbatim in response to `code`.
    pub fn script_frame(&self, code: u16, frame: Bytes) {
        self.scripted
            .lock()
            .unwrap()
            .entry(code)
            .or_default()
            .push_back(frame);
    }

    /// Swallows writes of `code` without answering, so the command times
    /// out.
    pub fn drop_ack(&self, code: u16) {
        self.dropped.lock().unwrap().insert(code);
    }

    /// Makes the next `n` connection attempts fail with a transport error.
    pub fn fail_next_connects(&self, n: usize) {
        self.fail_connects.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` connection attempts fail with device-not-found.
    pub fn not_found_next_connects(&self, n: usize) {
        self.not_found.store(n, Ordering::SeqCst);
    }

    /// Makes characteristic resolution fail on the next `n` sessions.
    pub fn fail_next_resolves(&self, n: usize) {
        self.fail_resolves.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` writes fail with a transport error.
    pub fn fail_next_writes(&self, n: usize) {
        self.fail_writes.store(n, Ordering::SeqCst);
    }

    /// Pushes a notification to the device, as if the radar had sent it.
    pub async fn push_notification(&self, frame: Bytes) {
        let sender = {
            let session = self.session.lock().unwrap();
            session.as_ref().and_then(|s| s.sender())
        };
        if let Some(sender) = sender {
            sender.send(frame).await.expect("device receiver alive");
        }
    }

    /// Simulates the link dropping out from under the device.
    pub fn kill_session(&self) {
        let session = self.session.lock().unwrap().clone();
        if let Some(session) = session {
            session.kill();
        }
    }

    /// Whether the most recent session still looks connected.
    pub fn session_alive(&self) -> bool {
        self.session
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.is_connected())
            .unwrap_or(false)
    }

    /// Connection attempts so far, including failed ones.
    pub fn connect_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Sessions opened successfully so far.
    pub fn connects(&self) -> usize {
        self.sessions_opened.load(Ordering::SeqCst)
    }

    pub fn clear_cache_calls(&self) -> usize {
        self.cache_clears.load(Ordering::SeqCst)
    }

    /// Command words written so far, in order.
    pub fn write_codes(&self) -> Vec<u16> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|frame| frame.len() >= 8)
            .map(|frame| u16::from_be_bytes([frame[6], frame[7]]))
            .collect()
    }

    fn take_one(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn response_for(&self, code: u16) -> Option<Bytes> {
        if self.dropped.lock().unwrap().contains(&code) {
            return None;
        }
        if let Some(frame) = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(&code)
            .and_then(|queue| queue.pop_front())
        {
            return Some(frame);
        }
        Some(default_response(code))
    }
}

/// Success ACKs with plausible payloads for every command.
fn default_response(code: u16) -> Bytes {
    let mut body = BytesMut::new();
    body.put_u16(code ^ 0x0001);
    body.put_u16_le(0x0000);
    match code {
        // protocol version 1, buffer size 0x4000
        0xFF00 => body.put_slice(&hex::decode("01000040").unwrap()),
        // factory default gate sensitivities, no-one duration 5 s
        0x6100 => {
            body.put_slice(&[0xAA, 0x08, 0x08, 0x08]);
            body.put_slice(&[50, 50, 40, 30, 20, 15, 15, 15, 15]);
            body.put_slice(&[0, 0, 40, 40, 30, 30, 20, 20, 20]);
            body.put_u16_le(5);
        }
        // firmware V1.02.22062416
        0xA000 => body.put_slice(&hex::decode("0001020116240622").unwrap()),
        // fixed type byte, then the address
        0xA500 => body.put_slice(&hex::decode("008f272eb80f65").unwrap()),
        // coarse resolution
        0xAB00 => body.put_u16_le(0x0000),
        // aux control off, threshold 128, OUT low
        0xAE00 => body.put_slice(&[0x00, 0x80, 0x00, 0x00]),
        // calibration idle
        0x1B00 => body.put_u16_le(0x0000),
        _ => {}
    }
    wrap(&body.freeze())
}

fn wrap(body: &Bytes) -> Bytes {
    let mut frame = BytesMut::new();
    frame.put_slice(&[0xFD, 0xFC, 0xFB, 0xFA]);
    frame.put_u16_le(body.len() as u16);
    frame.put_slice(body);
    frame.put_slice(&[0x04, 0x03, 0x02, 0x01]);
    frame.freeze()
}

pub struct MockTransport {
    pub link: Arc<MockLink>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, address: &str) -> Result<Arc<dyn TransportSession>, Error> {
        self.link.attempts.fetch_add(1, Ordering::SeqCst);
        if MockLink::take_one(&self.link.not_found) {
            return Err(Error::DeviceNotFound(address.to_owned()));
        }
        if MockLink::take_one(&self.link.fail_connects) {
            return Err(Error::Transport("connect refused".into()));
        }
        let session = Arc::new(MockSession {
            link: Arc::clone(&self.link),
            sender: Mutex::new(None),
            connected: AtomicUsize::new(1),
        });
        *self.link.session.lock().unwrap() = Some(Arc::clone(&session));
        self.link.sessions_opened.fetch_add(1, Ordering::SeqCst);
        Ok(session)
    }

    async fn clear_cache(&self, _address: &str) {
        self.link.cache_clears.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MockSession {
    link: Arc<MockLink>,
    sender: Mutex<Option<mpsc::Sender<Bytes>>>,
    connected: AtomicUsize,
}

impl MockSession {
    fn sender(&self) -> Option<mpsc::Sender<Bytes>> {
        self.sender.lock().unwrap().clone()
    }

    fn kill(&self) {
        self.connected.store(0, Ordering::SeqCst);
        self.sender.lock().unwrap().take();
    }
}

#[async_trait]
impl TransportSession for MockSession {
    async fn resolve_characteristics(&self, write: Uuid, _notify: Uuid) -> Result<(), Error> {
        if MockLink::take_one(&self.link.fail_resolves) {
            return Err(Error::CharacteristicMissing(write));
        }
        Ok(())
    }

    async fn start_notifications(&self) -> Result<mpsc::Receiver<Bytes>, Error> {
        let (tx, rx) = mpsc::channel(8);
        *self.sender.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn stop_notifications(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn write(&self, frame: &[u8]) -> Result<(), Error> {
        self.link
            .writes
            .lock()
            .unwrap()
            .push(Bytes::copy_from_slice(frame));
        if MockLink::take_one(&self.link.fail_writes) {
            return Err(Error::Transport("write failed".into()));
        }
        if frame.len() < 8 {
            return Ok(());
        }
        let code = u16::from_be_bytes([frame[6], frame[7]]);
        let response = self.link.response_for(code);
        let sender = self.sender();
        if let (Some(response), Some(sender)) = (response, sender) {
            let _ = sender.send(response).await;
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), Error> {
        self.kill();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) == 1
    }
}
