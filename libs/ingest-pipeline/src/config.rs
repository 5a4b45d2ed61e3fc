use serde::Deserialize;

use crate::PipelineError;

/// Upper bound on unacknowledged sends per partition. A retry may only be
/// overtaken by sends the log can still tell apart by sequence.
pub const MAX_IN_FLIGHT_LIMIT: usize = 5;

// ═══════════════════════════════════════════════════════════════
//  Framing Config
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct FramingConfig {
    /// Longest accepted record, delimiter excluded.
    #[serde(default = "default_max_record_bytes")]
    pub max_record_bytes: usize,
    /// Size of a single socket read.
    #[serde(default = "default_read_chunk_bytes")]
    pub read_chunk_bytes: usize,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            max_record_bytes: default_max_record_bytes(),
            read_chunk_bytes: default_read_chunk_bytes(),
        }
    }
}

fn default_max_record_bytes() -> usize {
    64 * 1024
}
fn default_read_chunk_bytes() -> usize {
    4096
}

// ═══════════════════════════════════════════════════════════════
//  Publisher Config
// ═══════════════════════════════════════════════════════════════

/// When a connection waits for the log's acknowledgment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckMode {
    /// Every record is acknowledged before the next one is processed.
    #[default]
    Sync,
    /// Deliveries run in the background, bounded by `max_pending_acks`.
    Pipelined,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublisherConfig {
    /// Unacknowledged sends allowed per partition (1..=5).
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// First retry delay after a transient log error.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Ceiling for the doubling retry delay.
    #[serde(default = "default_retry_backoff_max_ms")]
    pub retry_backoff_max_ms: u64,
    #[serde(default)]
    pub ack_mode: AckMode,
    /// Pending deliveries per connection in pipelined mode.
    #[serde(default = "default_max_pending_acks")]
    pub max_pending_acks: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            retry_backoff_ms: default_retry_backoff_ms(),
            retry_backoff_max_ms: default_retry_backoff_max_ms(),
            ack_mode: AckMode::default(),
            max_pending_acks: default_max_pending_acks(),
        }
    }
}

fn default_max_in_flight() -> usize {
    MAX_IN_FLIGHT_LIMIT
}
fn default_retry_backoff_ms() -> u64 {
    100
}
fn default_retry_backoff_max_ms() -> u64 {
    5000
}
fn default_max_pending_acks() -> usize {
    64
}

// ═══════════════════════════════════════════════════════════════
//  Pipeline Config
// ═══════════════════════════════════════════════════════════════

/// Everything a connection pipeline needs besides the publisher.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub framing: FramingConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        let framing = &self.framing;
        let publisher = &self.publisher;

        if framing.max_record_bytes == 0 {
            return Err(PipelineError::Config("framing.max_record_bytes must be >= 1".into()));
        }
        if framing.read_chunk_bytes == 0 {
            return Err(PipelineError::Config("framing.read_chunk_bytes must be >= 1".into()));
        }
        if !(1..=MAX_IN_FLIGHT_LIMIT).contains(&publisher.max_in_flight) {
            return Err(PipelineError::Config(format!(
                "publisher.max_in_flight must be in 1..={MAX_IN_FLIGHT_LIMIT}, got {}",
                publisher.max_in_flight
            )));
        }
        if publisher.retry_backoff_ms == 0 {
            return Err(PipelineError::Config("publisher.retry_backoff_ms must be >= 1".into()));
        }
        if publisher.retry_backoff_max_ms < publisher.retry_backoff_ms {
            return Err(PipelineError::Config(
                "publisher.retry_backoff_max_ms must be >= retry_backoff_ms".into(),
            ));
        }
        if publisher.max_pending_acks == 0 {
            return Err(PipelineError::Config("publisher.max_pending_acks must be >= 1".into()));
        }
        Ok(())
    }
}
