//! Four-phase image upload: start, announce size, begin image, stream chunks.
//!
//! Each phase writes one packet and validates the single notification the device
//! answers with. Any mismatch fails the whole transfer; there is no resume, a retry
//! starts again from [`Phase::Start`].

use crate::config::{ChunkOrdering, TransferConfig};
use crate::error::GiciskyError;
use crate::packet::{self, Opcode, Response};
use crate::transport::{Channel, Transport};
use bytes::Bytes;
use strum_macros::Display;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Phase {
    Start,
    SizeAnnounced,
    ImageStart,
    ImageData,
    Done,
    Failed,
}

/// Parameters of the chunk stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOptions {
    pub chunk_size: usize,
    pub ordering: ChunkOrdering,
}

impl From<&TransferConfig> for TransferOptions {
    fn from(config: &TransferConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            ordering: config.chunk_ordering,
        }
    }
}

/// Outcome of a completed transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReport {
    pub payload_len: usize,
    pub chunk_count: u32,
    pub chunks_sent: u32,
    /// Request/response round trips, handshake included
    pub exchanges: u32,
    /// Last chunk index the device asked for
    pub final_index: u32,
    /// Which attempt of the retry shell succeeded (1 when run directly)
    pub attempt: u32,
}

/// Mutable state of one transfer; never reused
#[derive(Debug)]
pub struct TransferSession {
    phase: Phase,
    payload: Bytes,
    chunk_size: usize,
    chunk_count: u32,
    last_response: Option<Bytes>,
    cursor: u32,
    exchanges: u32,
    chunks_sent: u32,
}

impl TransferSession {
    pub fn new(payload: Bytes, chunk_size: usize) -> Self {
        Self {
            phase: Phase::Start,
            payload,
            chunk_size,
            chunk_count: 0,
            last_response: None,
            cursor: 0,
            exchanges: 0,
            chunks_sent: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Next chunk index the device asked for
    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    /// Number of chunks in the payload; known once the transfer has started
    pub fn chunk_count(&self) -> u32 {
        self.chunk_count
    }

    pub fn last_response(&self) -> Option<&Bytes> {
        self.last_response.as_ref()
    }
}

/// Drives one [`TransferSession`] over an exclusively borrowed transport
pub struct Transfer<'t, T: Transport> {
    transport: &'t mut T,
    session: TransferSession,
    ordering: ChunkOrdering,
}

impl<'t, T: Transport> Transfer<'t, T> {
    pub fn new(transport: &'t mut T, payload: Bytes, options: TransferOptions) -> Self {
        Self {
            transport,
            session: TransferSession::new(payload, options.chunk_size),
            ordering: options.ordering,
        }
    }

    pub fn phase(&self) -> Phase {
        self.session.phase
    }

    pub fn session(&self) -> &TransferSession {
        &self.session
    }

    /// Run the handshake and chunk stream to completion
    pub async fn run(&mut self) -> Result<TransferReport, GiciskyError> {
        if self.session.chunk_size == 0 {
            self.session.phase = Phase::Failed;
            return Err(GiciskyError::InvalidConfig("chunk_size must be non-zero".to_string()));
        }
        if self.session.phase == Phase::Start {
            match packet::chunk_count(self.session.payload.len(), self.session.chunk_size) {
                Ok(count) => self.session.chunk_count = count,
                Err(e) => {
                    self.session.phase = Phase::Failed;
                    return Err(e);
                }
            }
        }

        info!(
            bytes = self.session.payload.len(),
            chunks = self.session.chunk_count,
            ordering = %self.ordering,
            "Starting image transfer"
        );

        loop {
            match self.session.phase {
                Phase::Done => break,
                Phase::Failed => {
                    return Err(GiciskyError::Protocol("transfer session already failed".to_string()));
                }
                phase => {
                    if let Err(e) = self.step().await {
                        warn!("Transfer failed in phase {}: {}", phase, e);
                        self.session.phase = Phase::Failed;
                        return Err(e);
                    }
                }
            }
        }

        let report = self.report();
        info!(
            chunks_sent = report.chunks_sent,
            exchanges = report.exchanges,
            "Image transfer complete"
        );
        Ok(report)
    }

    async fn step(&mut self) -> Result<(), GiciskyError> {
        match self.session.phase {
            Phase::Start => {
                let response = self.exchange(Channel::Command, packet::command_packet(Opcode::Start)).await?;
                match Response::from(response.clone()) {
                    Response::Ready => self.advance(Phase::SizeAnnounced),
                    _ => return Err(self.unexpected(&response)),
                }
            }
            Phase::SizeAnnounced => {
                let total = u32::try_from(self.session.payload.len())
                    .map_err(|_| GiciskyError::InvalidPacket("payload exceeds 4 GiB".to_string()))?;
                let response = self.exchange(Channel::Command, packet::size_packet(total)).await?;
                match Response::from(response.clone()) {
                    Response::SizeAccepted => self.advance(Phase::ImageStart),
                    _ => return Err(self.unexpected(&response)),
                }
            }
            Phase::ImageStart => {
                let response = self
                    .exchange(Channel::Command, packet::command_packet(Opcode::BeginImage))
                    .await?;
                match Response::from(response.clone()) {
                    Response::ChunkRequest(index) => {
                        self.session.cursor = index;
                        self.advance(Phase::ImageData);
                    }
                    _ => return Err(self.unexpected(&response)),
                }
            }
            Phase::ImageData => {
                let index = self.session.cursor;
                if index >= self.session.chunk_count {
                    self.advance(Phase::Done);
                    return Ok(());
                }

                let chunk = packet::image_chunk_packet(index, &self.session.payload, self.session.chunk_size)?;
                let response = self.exchange(Channel::Image, chunk).await?;
                self.session.chunks_sent += 1;

                match Response::from(response) {
                    Response::ChunkRequest(next) => {
                        if self.ordering == ChunkOrdering::Strict && next != index + 1 {
                            return Err(GiciskyError::OutOfOrderChunk {
                                expected: index + 1,
                                actual: next,
                            });
                        }
                        self.session.cursor = next;
                    }
                    other => {
                        // Some firmware ends the stream with an arbitrary frame instead of
                        // asking for the index past the end.
                        debug!(?other, "Device stopped requesting chunks");
                        self.advance(Phase::Done);
                    }
                }
            }
            Phase::Done | Phase::Failed => {}
        }
        Ok(())
    }

    async fn exchange(&mut self, channel: Channel, packet: Bytes) -> Result<Bytes, GiciskyError> {
        match channel {
            Channel::Command => debug!(phase = %self.session.phase, bytes = hex::encode(&packet), "BLE Write"),
            Channel::Image => trace!(phase = %self.session.phase, bytes = hex::encode(&packet), "BLE Write"),
        }
        let response = self.transport.request(channel, packet).await?;
        self.session.exchanges += 1;
        debug!(bytes = hex::encode(&response), "BLE Notify");
        self.session.last_response = Some(response.clone());
        Ok(response)
    }

    fn advance(&mut self, next: Phase) {
        info!("Phase {} -> {}", self.session.phase, next);
        self.session.phase = next;
    }

    fn unexpected(&self, response: &[u8]) -> GiciskyError {
        GiciskyError::UnexpectedResponse {
            phase: self.session.phase,
            response: hex::encode(response),
        }
    }

    fn report(&self) -> TransferReport {
        TransferReport {
            payload_len: self.session.payload.len(),
            chunk_count: self.session.chunk_count,
            chunks_sent: self.session.chunks_sent,
            exchanges: self.session.exchanges,
            final_index: self.session.cursor,
            attempt: 1,
        }
    }
}
