use std::time::Duration;
use uuid::Uuid;

// Frame markers
//
// Command traffic and periodic radar reports use distinct four byte
// header/footer pairs on the same notification characteristic.

/// Header opening a command or ACK frame.
pub const COMMAND_HEADER: [u8; 4] = [0xFD, 0xFC, 0xFB, 0xFA];
/// Footer closing a command or ACK frame.
pub const COMMAND_FOOTER: [u8; 4] = [0x04, 0x03, 0x02, 0x01];
/// Header opening a periodic report frame.
pub const REPORT_HEADER: [u8; 4] = [0xF4, 0xF3, 0xF2, 0xF1];
/// Footer closing a periodic report frame.
pub const REPORT_FOOTER: [u8; 4] = [0xF8, 0xF7, 0xF6, 0xF5];

// GATT characteristics

/// Characteristic commands are written to.
pub const WRITE_CHARACTERISTIC: Uuid = uuid::uuid!("0000fff2-0000-1000-8000-00805f9b34fb");
/// Characteristic ACKs and periodic reports are notified on.
pub const NOTIFY_CHARACTERISTIC: Uuid = uuid::uuid!("0000fff1-0000-1000-8000-00805f9b34fb");

// Detection gates

/// Highest gate index. Each gate covers 0.75 m or 0.2 m depending on the
/// configured distance resolution.
pub const MAX_GATE: u8 = 8;
/// Number of gates reported in engineering frames.
pub const NUM_GATES: u8 = 9;
/// Sentinel gate value addressing every gate at once.
pub const ALL_GATES: u32 = 0x0000_FFFF;
/// Upper bound for gate sensitivities.
pub const MAX_SENSITIVITY: u8 = 100;

// Bluetooth

/// Manufacturer IDs the radar advertises under, in preference order.
pub const MANUFACTURER_IDS: [u16; 2] = [256, 1494];
/// Minimum manufacturer data length carrying a firmware record.
pub const MIN_FIRMWARE_DATA_LEN: usize = 13;
/// Advertised name prefix shared by the LD2410 family.
pub const LOCAL_NAME_PREFIX: &str = "HLK-LD2410";
/// Bluetooth passwords are always six ASCII characters.
pub const PASSWORD_LEN: usize = 6;

// Connection behavior defaults

/// Idle time after the last frame before the link is dropped.
pub const DEFAULT_IDLE_DISCONNECT_DELAY: Duration = Duration::from_millis(8500);
/// How long a command waits for its ACK.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);
/// Pause between reconnect attempts.
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(1);
/// How long a discovery scan runs.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(5);
/// Extra attempts for commands that fail on a flaky link.
pub const DEFAULT_RETRY_COUNT: u32 = 3;
