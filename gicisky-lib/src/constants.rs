// Protocol constants for Gicisky display tags

use std::time::Duration;
use uuid::Uuid;

/// GATT service exposing the command, image and (unused) third characteristic
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x0000fef0_0000_1000_8000_00805f9b34fb);

/// Number of characteristics the display service must expose
pub const SERVICE_CHARACTERISTIC_COUNT: usize = 3;

/// Bluetooth SIG company identifier carried in the manufacturer-data advertisement
pub const MANUFACTURER_ID: u16 = 0x5053;

/// Size of the manufacturer-data advertisement payload (5 bytes)
pub const ADVERTISEMENT_SIZE: usize = 5;

/// Size of the announce-size command packet (8 bytes)
pub const SIZE_PACKET_SIZE: usize = 8;

/// Size of the little-endian chunk index prefixed to every image packet (4 bytes)
pub const CHUNK_INDEX_SIZE: usize = 4;

/// Minimum length of a chunk-request notification: opcode, status, 4-byte index
pub const CHUNK_REQUEST_SIZE: usize = 6;

/// Image bytes per chunk on a response-bearing image channel
pub const DEFAULT_CHUNK_SIZE: usize = 240;

/// Image bytes per chunk when the write path cannot exceed the default ATT MTU
pub const SMALL_CHUNK_SIZE: usize = 20;

/// Largest single GATT write issued by the transport
pub const DEFAULT_FRAGMENT_SIZE: usize = 20;

/// Pause between consecutive GATT write fragments
pub const DEFAULT_FRAGMENT_DELAY: Duration = Duration::from_millis(50);

/// How long to wait for the device to answer one request
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Settle time after subscribing to notifications before the first write
pub const NOTIFY_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Luminance/red threshold used when none is configured
pub const DEFAULT_THRESHOLD: u8 = 195;

/// Full transfer attempts made by the retry shell
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Fixed pause between transfer attempts
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Connection attempts made against one peripheral inside a single transfer attempt
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 3;

/// How long to scan for the target peripheral before giving up
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);
