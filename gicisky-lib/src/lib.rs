pub mod advertisement;
pub mod ble;
pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod packet;
pub mod registry;
pub mod retry;
pub mod transfer;
pub mod transport;

pub use advertisement::Advertisement;
pub use ble::{BleConnector, BleTransport, DiscoveredTag};
pub use codec::{EncodedImage, PixelPlane, Thresholds};
pub use config::{ChunkOrdering, TransferConfig, WriteMode};
pub use error::GiciskyError;
pub use registry::{DeviceDescriptor, Rotation};
pub use retry::{RetryPolicy, send_with_retries, update_image};
pub use transfer::{Phase, Transfer, TransferOptions, TransferReport};
pub use transport::{Channel, Connector, NotificationSlot, Transport};
