use std::io;
use thiserror::Error;

use crate::transfer::Phase;

/// The primary error type for the `gicisky-lib` library.
#[derive(Error, Debug)]
pub enum GiciskyError {
    #[error("Unknown device type code 0x{0:02X}")]
    UnknownDeviceKind(u8),

    #[error("No Bluetooth adapter found")]
    NoAdapter,

    #[error("Display tag {0} not found. Is it awake and in range?")]
    DeviceNotFound(String),

    #[error("Display service missing: expected 3 characteristics, found {found}")]
    MissingService { found: usize },

    #[error("Characteristic missing: {0}")]
    MissingCharacteristic(String),

    #[error("Bluetooth error: {0}")]
    Ble(#[from] btleplug::Error),

    #[error("Timeout waiting for device notification: {0}")]
    Timeout(#[from] tokio::time::error::Elapsed),

    #[error("Unexpected response in phase {phase}: {response}")]
    UnexpectedResponse { phase: Phase, response: String },

    #[error("Out-of-order chunk: expected index {expected}, device requested {actual}")]
    OutOfOrderChunk { expected: u32, actual: u32 },

    #[error("Transfer failed after {attempts} attempts: {source}")]
    ExhaustedRetries {
        attempts: u32,
        #[source]
        source: Box<GiciskyError>,
    },

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Plane {plane} has {actual} bytes, expected {expected}")]
    InvalidPlaneLength {
        plane: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    #[error("Invalid advertisement: expected 5 bytes, got {0}")]
    InvalidAdvertisement(usize),

    #[error("Unsupported device feature: {0}")]
    UnsupportedFeature(&'static str),
}

impl GiciskyError {
    /// Whether repeating the whole transfer (reconnect included) can succeed.
    ///
    /// Registry misses, bad input images and codec failures are deterministic and
    /// are never retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            GiciskyError::UnknownDeviceKind(_)
                | GiciskyError::NoAdapter
                | GiciskyError::Image(_)
                | GiciskyError::Config(_)
                | GiciskyError::InvalidConfig(_)
                | GiciskyError::InvalidPlaneLength { .. }
                | GiciskyError::UnsupportedFeature(_)
                | GiciskyError::ExhaustedRetries { .. }
        )
    }
}
