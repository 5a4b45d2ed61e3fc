//! Per-connection pipeline: bytes → records → updates → log.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

use score_api::{PublishError, encode_update};

use crate::config::{AckMode, PipelineConfig};
use crate::error::FramingError;
use crate::framing::LineFramer;
use crate::publisher::{Delivery, LogPublisher};
use crate::validate::Validator;

/// How much of a rejected record goes into the log line.
const RECORD_PREVIEW_BYTES: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Reading,
    Processing,
    Closed,
}

/// Why a connection pipeline stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    EndOfStream,
    ReadError(String),
    Framing(FramingError),
    LogClosed,
    Cancelled,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::EndOfStream => f.write_str("end of stream"),
            CloseReason::ReadError(e) => write!(f, "read error: {e}"),
            CloseReason::Framing(e) => write!(f, "framing error: {e}"),
            CloseReason::LogClosed => f.write_str("log closed"),
            CloseReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Non-empty records cut by the framer.
    pub framed: u64,
    /// Records that passed validation.
    pub accepted: u64,
    pub rejected: u64,
    /// Records the log acknowledged.
    pub published: u64,
    /// Valid records the log refused or that could not be encoded.
    pub dropped: u64,
    /// Undelimited bytes thrown away at close.
    pub discarded_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionReport {
    /// Always `Closed`: a report is produced only after the drain.
    pub state: ConnectionState,
    pub stats: ConnectionStats,
    pub reason: CloseReason,
}

struct Pending {
    player: String,
    delivery: Delivery,
}

/// State for one accepted connection.
///
/// Records are handled strictly one after another. In `sync` mode each
/// record's delivery resolves before the next record is looked at; in
/// `pipelined` mode up to `max_pending_acks` deliveries run behind the
/// reader and the oldest one is awaited when the window is full.
pub struct ConnectionPipeline {
    peer: String,
    state: ConnectionState,
    framer: LineFramer,
    validator: Validator,
    publisher: Arc<LogPublisher>,
    ack_mode: AckMode,
    max_pending: usize,
    read_chunk: usize,
    pending: VecDeque<Pending>,
    stats: ConnectionStats,
}

impl ConnectionPipeline {
    pub fn new(
        peer: impl Into<String>,
        publisher: Arc<LogPublisher>,
        validator: Validator,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            peer: peer.into(),
            state: ConnectionState::Open,
            framer: LineFramer::new(config.framing.max_record_bytes),
            validator,
            publisher,
            ack_mode: config.publisher.ack_mode,
            max_pending: config.publisher.max_pending_acks.max(1),
            read_chunk: config.framing.read_chunk_bytes.max(1),
            pending: VecDeque::new(),
            stats: ConnectionStats::default(),
        }
    }

    /// Drive the connection until the stream ends, fails, or `token` fires.
    ///
    /// Deliveries already handed to the publisher are never abandoned: the
    /// report is produced only after every one of them has resolved.
    pub async fn run<R>(mut self, mut stream: R, token: &CancellationToken) -> ConnectionReport
    where
        R: AsyncRead + Unpin,
    {
        let mut chunk = vec![0u8; self.read_chunk];

        let reason = loop {
            self.set_state(ConnectionState::Reading);
            let read = tokio::select! {
                r = stream.read(&mut chunk) => r,
                _ = token.cancelled() => break CloseReason::Cancelled,
            };
            let n = match read {
                Ok(0) => break CloseReason::EndOfStream,
                Ok(n) => n,
                Err(e) => break CloseReason::ReadError(e.to_string()),
            };

            self.framer.push(&chunk[..n]);
            if let Err(reason) = self.process_framed().await {
                break reason;
            }
        };

        self.close(reason).await
    }

    async fn process_framed(&mut self) -> Result<(), CloseReason> {
        while let Some(raw) = self.framer.next_record().map_err(CloseReason::Framing)? {
            self.set_state(ConnectionState::Processing);
            self.process_record(&raw).await?;
        }
        Ok(())
    }

    async fn process_record(&mut self, raw: &[u8]) -> Result<(), CloseReason> {
        self.stats.framed += 1;

        let update = match self.validator.validate(raw) {
            Ok(update) => update,
            Err(reason) => {
                self.stats.rejected += 1;
                tracing::warn!(
                    peer = %self.peer,
                    reason = reason.as_str(),
                    record = %preview(raw),
                    "record rejected"
                );
                return Ok(());
            }
        };
        self.stats.accepted += 1;

        let mut payload = Vec::new();
        if let Err(e) = encode_update(&update, &mut payload) {
            self.stats.dropped += 1;
            tracing::error!(peer = %self.peer, player = %update.player_id, error = %e, "serialization failed");
            return Ok(());
        }

        let key = Bytes::from(update.player_id.clone().into_bytes());
        let delivery = match self.publisher.enqueue(key, Bytes::from(payload)).await {
            Ok(delivery) => delivery,
            Err(PublishError::Closed) => {
                self.stats.dropped += 1;
                return Err(CloseReason::LogClosed);
            }
            Err(e) => {
                self.record_failure(&update.player_id, &e);
                return Ok(());
            }
        };

        let pending = Pending {
            player: update.player_id,
            delivery,
        };

        match self.ack_mode {
            AckMode::Sync => self.settle(pending).await,
            AckMode::Pipelined => {
                self.pending.push_back(pending);
                self.reap_finished().await?;
                while self.pending.len() > self.max_pending {
                    self.settle_oldest().await?;
                }
                Ok(())
            }
        }
    }

    async fn reap_finished(&mut self) -> Result<(), CloseReason> {
        while self.pending.front().is_some_and(|p| p.delivery.is_finished()) {
            self.settle_oldest().await?;
        }
        Ok(())
    }

    async fn settle_oldest(&mut self) -> Result<(), CloseReason> {
        match self.pending.pop_front() {
            Some(pending) => self.settle(pending).await,
            None => Ok(()),
        }
    }

    async fn settle(&mut self, pending: Pending) -> Result<(), CloseReason> {
        match pending.delivery.wait().await {
            Ok(ack) => {
                self.stats.published += 1;
                tracing::debug!(
                    peer = %self.peer,
                    player = %pending.player,
                    partition = ack.partition,
                    offset = ack.offset,
                    "published"
                );
                Ok(())
            }
            Err(PublishError::Closed) => {
                self.stats.dropped += 1;
                Err(CloseReason::LogClosed)
            }
            Err(e) => {
                self.record_failure(&pending.player, &e);
                Ok(())
            }
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            tracing::trace!(peer = %self.peer, from = ?self.state, to = ?state, "connection state");
            self.state = state;
        }
    }

    fn record_failure(&mut self, player: &str, error: &PublishError) {
        self.stats.dropped += 1;
        tracing::warn!(peer = %self.peer, player = %player, error = %error, "record dropped");
    }

    async fn close(mut self, reason: CloseReason) -> ConnectionReport {
        while let Some(pending) = self.pending.pop_front() {
            // already closing; a closed log only adds to the drop count
            let _ = self.settle(pending).await;
        }
        self.set_state(ConnectionState::Closed);
        self.stats.discarded_bytes = self.framer.buffered();

        let stats = &self.stats;
        match &reason {
            CloseReason::EndOfStream | CloseReason::Cancelled => tracing::info!(
                peer = %self.peer,
                reason = %reason,
                framed = stats.framed,
                rejected = stats.rejected,
                published = stats.published,
                dropped = stats.dropped,
                discarded_bytes = stats.discarded_bytes,
                "connection closed"
            ),
            _ => tracing::warn!(
                peer = %self.peer,
                reason = %reason,
                framed = stats.framed,
                rejected = stats.rejected,
                published = stats.published,
                dropped = stats.dropped,
                discarded_bytes = stats.discarded_bytes,
                "connection closed"
            ),
        }

        ConnectionReport {
            state: self.state,
            stats: self.stats,
            reason,
        }
    }
}

/// Run one connection with a fresh validator.
pub async fn run_connection<R>(
    peer: &str,
    stream: R,
    publisher: Arc<LogPublisher>,
    config: &PipelineConfig,
    token: &CancellationToken,
) -> ConnectionReport
where
    R: AsyncRead + Unpin,
{
    ConnectionPipeline::new(peer, publisher, Validator::new(), config)
        .run(stream, token)
        .await
}

fn preview(raw: &[u8]) -> String {
    let end = raw.len().min(RECORD_PREVIEW_BYTES);
    let mut text = String::from_utf8_lossy(&raw[..end]).into_owned();
    if end < raw.len() {
        text.push_str("...");
    }
    text
}
