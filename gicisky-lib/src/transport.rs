//! Request/response seam between the transfer state machine and a BLE link.
//!
//! The device answers every write with one notification on the command
//! characteristic. [`NotificationSlot`] holds the latest unconsumed notification; the
//! transport clears it right before each write so a stale answer can never satisfy a
//! later request.

use crate::error::GiciskyError;
use bytes::Bytes;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use strum_macros::Display;
use tokio::sync::Notify;
use tracing::warn;

/// Logical channel a packet is written to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Channel {
    /// Command characteristic (write + notify)
    #[strum(to_string = "command")]
    Command,
    /// Image-data characteristic
    #[strum(to_string = "image")]
    Image,
}

/// A connected link to one display tag
pub trait Transport {
    /// Clear any pending notification, write `packet` to `channel` and wait for the
    /// next notification.
    fn request(&mut self, channel: Channel, packet: Bytes) -> impl Future<Output = Result<Bytes, GiciskyError>> + Send;

    /// Unsubscribe and disconnect. Safe to call more than once.
    fn close(&mut self) -> impl Future<Output = Result<(), GiciskyError>> + Send;
}

/// Produces a fresh [`Transport`] for every transfer attempt
pub trait Connector {
    type Transport: Transport + Send;

    fn connect(&mut self) -> impl Future<Output = Result<Self::Transport, GiciskyError>> + Send;
}

/// Splits GATT writes into small fragments with a pause between them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentPolicy {
    pub size: usize,
    pub delay: Duration,
}

impl FragmentPolicy {
    pub fn fragments<'a>(&self, packet: &'a [u8]) -> std::slice::Chunks<'a, u8> {
        packet.chunks(self.size.max(1))
    }
}

/// Single-slot mailbox holding the most recent notification
#[derive(Debug, Clone, Default)]
pub struct NotificationSlot {
    inner: Arc<SlotInner>,
}

#[derive(Debug, Default)]
struct SlotInner {
    value: Mutex<Option<Bytes>>,
    notify: Notify,
}

impl NotificationSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a notification, replacing any older unconsumed one
    pub fn put(&self, value: Bytes) {
        *self.lock() = Some(value);
        self.inner.notify.notify_one();
    }

    /// Drop any pending notification
    pub fn clear(&self) {
        self.lock().take();
    }

    pub fn take(&self) -> Option<Bytes> {
        self.lock().take()
    }

    /// Wait for the next notification, or fail with `Timeout`
    pub async fn recv(&self, timeout: Duration) -> Result<Bytes, GiciskyError> {
        let value = tokio::time::timeout(timeout, async {
            loop {
                if let Some(value) = self.take() {
                    return value;
                }
                // A permit left over from an already-consumed value only causes one
                // extra pass through the loop.
                self.inner.notify.notified().await;
            }
        })
        .await?;
        Ok(value)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Bytes>> {
        self.inner.value.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clear the slot, write `packet` fragment by fragment with the policy's pause after
/// each one, then wait for the answering notification.
pub async fn request_fragmented<'a, W, Fut, E>(
    slot: &NotificationSlot,
    policy: FragmentPolicy,
    packet: &'a [u8],
    timeout: Duration,
    mut write: W,
) -> Result<Bytes, GiciskyError>
where
    W: FnMut(&'a [u8]) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    GiciskyError: From<E>,
{
    slot.clear();
    for fragment in policy.fragments(packet) {
        write(fragment).await?;
        tokio::time::sleep(policy.delay).await;
    }
    slot.recv(timeout).await
}

/// Unsubscribe then disconnect, marking the link closed only once the disconnect went through.
///
/// A cancelled or failed teardown leaves `closed` false so the owner can still tear the link
/// down later. An unsubscribe failure is logged and does not stop the disconnect.
pub async fn close_link<U, D, E>(
    closed: &mut bool,
    unsubscribe: impl FnOnce() -> U,
    disconnect: impl FnOnce() -> D,
) -> Result<(), GiciskyError>
where
    U: Future<Output = Result<(), E>>,
    D: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
    GiciskyError: From<E>,
{
    if *closed {
        return Ok(());
    }
    if let Err(e) = unsubscribe().await {
        warn!("Failed to unsubscribe: {}", e);
    }
    disconnect().await?;
    *closed = true;
    Ok(())
}
