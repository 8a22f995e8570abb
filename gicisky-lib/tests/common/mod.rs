//! Common test utilities: a scripted in-memory device

// Shared across test files; not every helper is used by every file
#![allow(dead_code)]

pub use bytes::Bytes;
pub use gicisky_lib::error::GiciskyError;
pub use gicisky_lib::transport::{Channel, Connector, FragmentPolicy, NotificationSlot, Transport};

use gicisky_lib::constants::{DEFAULT_FRAGMENT_DELAY, DEFAULT_FRAGMENT_SIZE};
use gicisky_lib::transport::request_fragmented;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

pub const FRAGMENTS: FragmentPolicy = FragmentPolicy {
    size: DEFAULT_FRAGMENT_SIZE,
    delay: DEFAULT_FRAGMENT_DELAY,
};

/// Route library logs to the test harness; `RUST_LOG=debug` shows wire traffic
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Decode hex string to bytes for testing
pub fn hex_to_bytes(hex_data: &str) -> Bytes {
    Bytes::from(hex::decode(hex_data).expect("Failed to decode hex"))
}

/// Chunk-request notification for `index`
pub fn chunk_request(index: u32) -> String {
    format!("0500{}", hex::encode(index.to_le_bytes()))
}

/// Successful start and size replies followed by a request for chunk `first`
pub fn handshake(first: u32) -> Vec<Option<String>> {
    vec![Some("01f400".to_string()), Some("02".to_string()), Some(chunk_request(first))]
}

/// Packets written by a scripted transport, shared with the test
pub type SentLog = Arc<Mutex<Vec<(Channel, Bytes)>>>;

/// Answers each request with the next scripted notification once the last fragment of
/// the packet has been written.
///
/// `None` (or an exhausted script) keeps the device silent so the request runs into
/// the response timeout.
pub struct ScriptedTransport {
    script: VecDeque<Option<String>>,
    slot: NotificationSlot,
    sent: SentLog,
    closes: Arc<AtomicU32>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Option<String>>) -> Self {
        Self::with_log(script, SentLog::default(), Arc::default())
    }

    fn with_log(script: Vec<Option<String>>, sent: SentLog, closes: Arc<AtomicU32>) -> Self {
        Self {
            script: script.into(),
            slot: NotificationSlot::new(),
            sent,
            closes,
        }
    }

    pub fn sent(&self) -> Vec<(Channel, Bytes)> {
        self.sent.lock().unwrap().clone()
    }
}

impl Transport for ScriptedTransport {
    async fn request(&mut self, channel: Channel, packet: Bytes) -> Result<Bytes, GiciskyError> {
        self.sent.lock().unwrap().push((channel, packet.clone()));
        let mut reply = self.script.pop_front().flatten().map(|r| hex_to_bytes(&r));
        let device = self.slot.clone();
        let mut written = 0;

        request_fragmented(&self.slot, FRAGMENTS, &packet, RESPONSE_TIMEOUT, |fragment| {
            written += fragment.len();
            if written == packet.len() {
                if let Some(reply) = reply.take() {
                    device.put(reply);
                }
            }
            std::future::ready(Ok::<(), GiciskyError>(()))
        })
        .await
    }

    async fn close(&mut self) -> Result<(), GiciskyError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out one scripted transport per connection attempt
pub struct ScriptedConnector {
    attempts: VecDeque<Vec<Option<String>>>,
    pub connects: u32,
    pub sent: SentLog,
    pub closes: Arc<AtomicU32>,
}

impl ScriptedConnector {
    pub fn new(attempts: Vec<Vec<Option<String>>>) -> Self {
        Self {
            attempts: attempts.into(),
            connects: 0,
            sent: SentLog::default(),
            closes: Arc::default(),
        }
    }

    pub fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Connector for ScriptedConnector {
    type Transport = ScriptedTransport;

    async fn connect(&mut self) -> Result<ScriptedTransport, GiciskyError> {
        self.connects += 1;
        let script = self
            .attempts
            .pop_front()
            .ok_or_else(|| GiciskyError::DeviceNotFound("AA:BB:CC:DD:EE:FF".to_string()))?;
        Ok(ScriptedTransport::with_log(script, self.sent.clone(), self.closes.clone()))
    }
}
