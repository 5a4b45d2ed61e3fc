use std::fmt;

// ════════════════════════════════════════════════════════════════
//  Record rejection
// ════════════════════════════════════════════════════════════════

/// Why a framed record was dropped by the validator. Record-local:
/// the connection keeps going.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum RejectionReason {
    #[error("malformed record")]
    Malformed,

    #[error("invalid leaderboard id 'lb'")]
    InvalidLeaderboardId,

    #[error("invalid player id 'player'")]
    InvalidPlayerId,

    #[error("invalid score")]
    InvalidScore,

    #[error("score overflow")]
    ScoreOverflow,

    #[error("invalid timestamp 'ts_ms'")]
    InvalidTimestamp,
}

impl RejectionReason {
    /// Stable snake_case label for structured logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::Malformed => "malformed",
            RejectionReason::InvalidLeaderboardId => "invalid_leaderboard_id",
            RejectionReason::InvalidPlayerId => "invalid_player_id",
            RejectionReason::InvalidScore => "invalid_score",
            RejectionReason::ScoreOverflow => "score_overflow",
            RejectionReason::InvalidTimestamp => "invalid_timestamp",
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  Log errors
// ════════════════════════════════════════════════════════════════

/// Category of a log error. Drives the publisher's retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Broker-side hiccup. Retry the same send with the same sequence.
    Transient,
    /// The log will never accept this record. Drop it.
    Fatal,
    /// The client is shut down. Nothing more can be sent.
    Closed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Transient => f.write_str("transient"),
            ErrorKind::Fatal => f.write_str("fatal"),
            ErrorKind::Closed => f.write_str("closed"),
        }
    }
}

/// Error returned by a [`crate::LogClient`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LogError {
    #[error("leader not available for partition {partition}")]
    LeaderNotAvailable { partition: u32 },

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("out of order sequence on partition {partition}: expected {expected}, got {got}")]
    OutOfOrderSequence { partition: u32, expected: u64, got: u64 },

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("unknown partition {0}")]
    UnknownPartition(u32),

    #[error("sequence {sequence} on partition {partition} is a duplicate with no cached result")]
    DuplicateSequence { partition: u32, sequence: u64 },

    #[error("storage: {0}")]
    Storage(String),

    #[error("log client closed")]
    Closed,
}

impl LogError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LogError::LeaderNotAvailable { .. }
            | LogError::Timeout(_)
            | LogError::OutOfOrderSequence { .. } => ErrorKind::Transient,
            LogError::MessageTooLarge { .. }
            | LogError::UnknownPartition(_)
            | LogError::DuplicateSequence { .. }
            | LogError::Storage(_) => ErrorKind::Fatal,
            LogError::Closed => ErrorKind::Closed,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

impl From<std::io::Error> for LogError {
    fn from(e: std::io::Error) -> Self {
        LogError::Storage(e.to_string())
    }
}

// ════════════════════════════════════════════════════════════════
//  Publish errors
// ════════════════════════════════════════════════════════════════

/// What the publisher surfaces upward. Transient log errors never appear
/// here: the publisher retries them until they resolve.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    /// Non-retryable rejection of this one record.
    #[error("record rejected by log: {0}")]
    Fatal(LogError),

    /// The log client is gone; the connection should close.
    #[error("log client closed")]
    Closed,
}

impl From<LogError> for PublishError {
    fn from(e: LogError) -> Self {
        match e.kind() {
            ErrorKind::Closed => PublishError::Closed,
            _ => PublishError::Fatal(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_errors_classify() {
        assert!(LogError::LeaderNotAvailable { partition: 0 }.is_transient());
        assert!(LogError::Timeout("produce".into()).is_transient());
        assert_eq!(
            LogError::MessageTooLarge { size: 10, max: 5 }.kind(),
            ErrorKind::Fatal
        );
        assert_eq!(LogError::Closed.kind(), ErrorKind::Closed);
    }

    #[test]
    fn publish_error_from_log_error() {
        assert_eq!(PublishError::from(LogError::Closed), PublishError::Closed);
        assert_eq!(
            PublishError::from(LogError::UnknownPartition(9)),
            PublishError::Fatal(LogError::UnknownPartition(9))
        );
    }

    #[test]
    fn player_rejection_names_player_field() {
        assert_eq!(
            RejectionReason::InvalidPlayerId.to_string(),
            "invalid player id 'player'"
        );
        assert_eq!(RejectionReason::ScoreOverflow.as_str(), "score_overflow");
    }
}
