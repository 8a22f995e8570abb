//! Transfer tuning knobs.
//!
//! Every field has a default matching observed firmware behaviour, so an empty JSON
//! object (or no file at all) is a valid configuration.

use crate::codec::Thresholds;
use crate::constants::*;
use crate::error::GiciskyError;
use crate::retry::RetryPolicy;
use crate::transport::FragmentPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use strum_macros::Display;

/// How strictly the device's requested chunk index is checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkOrdering {
    /// Follow whatever index the device asks for next
    #[default]
    #[strum(to_string = "lenient")]
    Lenient,
    /// Require the device to ask for exactly the previous index + 1
    #[strum(to_string = "strict")]
    Strict,
}

/// GATT write flavour used for the image characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// With response if the characteristic supports it, otherwise without
    #[default]
    #[strum(to_string = "auto")]
    Auto,
    #[strum(to_string = "with-response")]
    WithResponse,
    #[strum(to_string = "without-response")]
    WithoutResponse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub thresholds: Thresholds,
    /// Image bytes per indexed chunk
    pub chunk_size: usize,
    pub chunk_ordering: ChunkOrdering,
    /// Largest single GATT write
    pub fragment_size: usize,
    pub fragment_delay_ms: u64,
    pub response_timeout_ms: u64,
    pub notify_settle_ms: u64,
    pub write_mode: WriteMode,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
    pub connect_attempts: u32,
    pub scan_timeout_ms: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_ordering: ChunkOrdering::default(),
            fragment_size: DEFAULT_FRAGMENT_SIZE,
            fragment_delay_ms: DEFAULT_FRAGMENT_DELAY.as_millis() as u64,
            response_timeout_ms: DEFAULT_RESPONSE_TIMEOUT.as_millis() as u64,
            notify_settle_ms: NOTIFY_SETTLE_DELAY.as_millis() as u64,
            write_mode: WriteMode::default(),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF.as_millis() as u64,
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            scan_timeout_ms: DEFAULT_SCAN_TIMEOUT.as_millis() as u64,
        }
    }
}

impl TransferConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json(json: &str) -> Result<Self, GiciskyError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GiciskyError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), GiciskyError> {
        if self.chunk_size == 0 {
            return Err(GiciskyError::InvalidConfig("chunk_size must be non-zero".to_string()));
        }
        if self.fragment_size == 0 {
            return Err(GiciskyError::InvalidConfig("fragment_size must be non-zero".to_string()));
        }
        if self.retry_attempts == 0 {
            return Err(GiciskyError::InvalidConfig("retry_attempts must be at least 1".to_string()));
        }
        if self.connect_attempts == 0 {
            return Err(GiciskyError::InvalidConfig("connect_attempts must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn fragment_policy(&self) -> FragmentPolicy {
        FragmentPolicy {
            size: self.fragment_size,
            delay: Duration::from_millis(self.fragment_delay_ms),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry_attempts,
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn notify_settle(&self) -> Duration {
        Duration::from_millis(self.notify_settle_ms)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }
}
