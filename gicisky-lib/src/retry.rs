use crate::codec::{self, EncodedImage};
use crate::config::TransferConfig;
use crate::constants::{DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_BACKOFF};
use crate::error::GiciskyError;
use crate::registry::DeviceDescriptor;
use crate::transfer::{Transfer, TransferOptions, TransferReport};
use crate::transport::{Connector, Transport};
use bytes::Bytes;
use image::DynamicImage;
use std::time::Duration;
use tracing::{info, warn};

/// Bounded, fixed-backoff retries around a complete transfer attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

/// Send `payload`, reconnecting and restarting from the first phase on every failure.
///
/// The transport is closed after each attempt whatever its outcome. Errors that
/// cannot change between attempts are returned immediately; otherwise the last error
/// is wrapped in [`GiciskyError::ExhaustedRetries`].
pub async fn send_with_retries<C: Connector>(
    connector: &mut C,
    payload: Bytes,
    options: TransferOptions,
    policy: RetryPolicy,
) -> Result<TransferReport, GiciskyError> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        info!("Transfer attempt {}/{}", attempt, attempts);
        let result = run_attempt(connector, payload.clone(), options).await;

        let error = match result {
            Ok(mut report) => {
                report.attempt = attempt;
                return Ok(report);
            }
            Err(e) => e,
        };

        if !error.is_retryable() {
            return Err(error);
        }
        if attempt >= attempts {
            return Err(GiciskyError::ExhaustedRetries {
                attempts,
                source: Box::new(error),
            });
        }

        warn!(
            "Attempt {}/{} failed: {}. Retrying in {:?}",
            attempt, attempts, error, policy.backoff
        );
        tokio::time::sleep(policy.backoff).await;
        attempt += 1;
    }
}

async fn run_attempt<C: Connector>(
    connector: &mut C,
    payload: Bytes,
    options: TransferOptions,
) -> Result<TransferReport, GiciskyError> {
    let mut transport = connector.connect().await?;
    let result = Transfer::new(&mut transport, payload, options).run().await;
    if let Err(e) = transport.close().await {
        warn!("Failed to close transport: {}", e);
    }
    result
}

/// Encode `image` for `descriptor` and upload it with the configured retry policy
pub async fn update_image<C: Connector>(
    connector: &mut C,
    image: &DynamicImage,
    descriptor: &DeviceDescriptor,
    config: &TransferConfig,
) -> Result<(EncodedImage, TransferReport), GiciskyError> {
    config.validate()?;
    let encoded = codec::encode(image, descriptor, config.thresholds)?;
    let report = send_with_retries(
        connector,
        encoded.to_payload(),
        TransferOptions::from(config),
        config.retry_policy(),
    )
    .await?;
    Ok((encoded, report))
}
