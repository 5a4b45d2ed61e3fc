//! Outbound wire schema.
//!
//! Equivalent `.proto`:
//!
//! ```text
//! message ScoreUpdate {
//!   string leaderboard_id = 1;
//!   string player_id      = 2;
//!   int64  score          = 3;
//!   int64  timestamp_ms   = 4;
//! }
//! ```
//!
//! Fields are tagged, so consumers skip tags they do not know and
//! default tags that are missing.

use prost::Message;

use crate::{RejectionReason, ScoreUpdate};

#[derive(Clone, PartialEq, Message)]
pub struct ScoreUpdateProto {
    #[prost(string, tag = "1")]
    pub leaderboard_id: String,
    #[prost(string, tag = "2")]
    pub player_id: String,
    #[prost(int64, tag = "3")]
    pub score: i64,
    #[prost(int64, tag = "4")]
    pub timestamp_ms: i64,
}

impl From<&ScoreUpdate> for ScoreUpdateProto {
    fn from(u: &ScoreUpdate) -> Self {
        Self {
            leaderboard_id: u.leaderboard_id.clone(),
            player_id: u.player_id.clone(),
            score: u.score,
            timestamp_ms: u.timestamp_ms,
        }
    }
}

impl From<ScoreUpdateProto> for ScoreUpdate {
    fn from(p: ScoreUpdateProto) -> Self {
        Self {
            leaderboard_id: p.leaderboard_id,
            player_id: p.player_id,
            score: p.score,
            timestamp_ms: p.timestamp_ms,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("protobuf encode: {0}")]
    Encode(#[from] prost::EncodeError),

    #[error("protobuf decode: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("decoded record violates invariants: {0}")]
    Invalid(RejectionReason),
}

/// Append the canonical encoding of `update` to `buf`.
///
/// Deterministic: the same update always yields the same bytes.
pub fn encode_update(update: &ScoreUpdate, buf: &mut Vec<u8>) -> Result<(), WireError> {
    let proto = ScoreUpdateProto::from(update);
    buf.reserve(proto.encoded_len());
    proto.encode(buf)?;
    Ok(())
}

/// Decode a log payload back into a [`ScoreUpdate`], re-checking invariants.
pub fn decode_update(bytes: &[u8]) -> Result<ScoreUpdate, WireError> {
    let update = ScoreUpdate::from(ScoreUpdateProto::decode(bytes)?);
    update.check().map_err(WireError::Invalid)?;
    Ok(update)
}
