pub mod error;
pub mod wire;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub use error::{ErrorKind, LogError, PublishError, RejectionReason};
pub use wire::{WireError, decode_update, encode_update};

/// Default log topic for score updates.
pub const DEFAULT_TOPIC: &str = "score_updates";

/// Maximum leaderboard id length in bytes.
pub const MAX_LEADERBOARD_ID_LEN: usize = 63;

/// Maximum player id length in bytes.
pub const MAX_PLAYER_ID_LEN: usize = 127;

// ════════════════════════════════════════════════════════════════
//  Domain
// ════════════════════════════════════════════════════════════════

/// A validated score update. Every instance that leaves the validator
/// has all four fields present and in range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreUpdate {
    pub leaderboard_id: String,
    /// Player id, also the partition key.
    pub player_id: String,
    /// Non-negative, fits in i64.
    pub score: i64,
    /// Unix epoch milliseconds. Sender-supplied or ingest time.
    pub timestamp_ms: i64,
}

impl ScoreUpdate {
    /// Partition key for the log.
    pub fn key(&self) -> &[u8] {
        self.player_id.as_bytes()
    }

    /// Check the domain invariants, reporting the first violated field
    /// in wire order.
    pub fn check(&self) -> Result<(), RejectionReason> {
        if !valid_leaderboard_id(&self.leaderboard_id) {
            return Err(RejectionReason::InvalidLeaderboardId);
        }
        if !valid_player_id(&self.player_id) {
            return Err(RejectionReason::InvalidPlayerId);
        }
        if self.score < 0 {
            return Err(RejectionReason::InvalidScore);
        }
        Ok(())
    }
}

pub fn valid_leaderboard_id(id: &str) -> bool {
    (1..=MAX_LEADERBOARD_ID_LEN).contains(&id.len())
}

pub fn valid_player_id(id: &str) -> bool {
    (1..=MAX_PLAYER_ID_LEN).contains(&id.len())
}

// ════════════════════════════════════════════════════════════════
//  Log client contract
// ════════════════════════════════════════════════════════════════

/// One send to the log. `producer_id` + `sequence` make retries of the
/// same logical send idempotent on the log side.
#[derive(Debug, Clone)]
pub struct ProduceRequest {
    pub partition: u32,
    pub producer_id: u64,
    pub sequence: u64,
    pub key: Bytes,
    pub payload: Bytes,
}

/// Durable acknowledgment: where the record landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ack {
    pub partition: u32,
    pub offset: u64,
}

/// Client of a partitioned, ordered-per-partition log bound to one topic.
///
/// Implementations must be safe for concurrent use: every connection
/// pipeline shares one instance.
pub trait LogClient: Send + Sync {
    /// Topic this client writes to.
    fn topic(&self) -> &str;

    /// Number of partitions in the topic.
    fn partition_count(&self) -> u32;

    /// Partition a key routes to. Must be stable for the lifetime of the topic.
    fn partition_for(&self, key: &[u8]) -> u32 {
        partition_for_key(key, self.partition_count())
    }

    /// Send one record and resolve once it is durable (acks=all) or rejected.
    fn produce(
        &self,
        request: ProduceRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Ack, LogError>> + Send + '_>>;

    /// Flush buffered writes.
    fn flush(&self) -> Pin<Box<dyn Future<Output = Result<(), LogError>> + Send + '_>>;
}

// ════════════════════════════════════════════════════════════════
//  Utilities
// ════════════════════════════════════════════════════════════════

/// Murmur2 hash (32-bit, seed 0x9747b28c), the same function Kafka's
/// default partitioner uses, so keys route identically.
pub fn murmur2(data: &[u8]) -> u32 {
    const SEED: u32 = 0x9747_b28c;
    const M: u32 = 0x5bd1_e995;
    const R: u32 = 24;

    let mut h = SEED ^ (data.len() as u32);

    let chunks = data.chunks_exact(4);
    let tail = chunks.remainder();
    for chunk in chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h = h.wrapping_mul(M);
        h ^= k;
    }

    match tail.len() {
        3 => {
            h ^= (tail[2] as u32) << 16;
            h ^= (tail[1] as u32) << 8;
            h ^= tail[0] as u32;
            h = h.wrapping_mul(M);
        }
        2 => {
            h ^= (tail[1] as u32) << 8;
            h ^= tail[0] as u32;
            h = h.wrapping_mul(M);
        }
        1 => {
            h ^= tail[0] as u32;
            h = h.wrapping_mul(M);
        }
        _ => {}
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;
    h
}

/// Map a key onto `[0, partitions)`. `partitions` must be non-zero.
pub fn partition_for_key(key: &[u8], partitions: u32) -> u32 {
    (murmur2(key) & 0x7fff_ffff) % partitions
}

/// Current Unix time in milliseconds.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(lb: &str, player: &str, score: i64) -> ScoreUpdate {
        ScoreUpdate {
            leaderboard_id: lb.into(),
            player_id: player.into(),
            score,
            timestamp_ms: 0,
        }
    }

    #[test]
    fn check_reports_first_bad_field() {
        assert_eq!(update("", "", -1).check(), Err(RejectionReason::InvalidLeaderboardId));
        assert_eq!(update("global", "", -1).check(), Err(RejectionReason::InvalidPlayerId));
        assert_eq!(update("global", "p1", -1).check(), Err(RejectionReason::InvalidScore));
        assert_eq!(update("global", "p1", i64::MAX).check(), Ok(()));
    }

    #[test]
    fn id_length_limits_are_in_bytes() {
        assert!(valid_leaderboard_id(&"a".repeat(63)));
        assert!(!valid_leaderboard_id(&"a".repeat(64)));
        // 32 two-byte chars = 64 bytes
        assert!(!valid_leaderboard_id(&"é".repeat(32)));
        assert!(valid_player_id(&"a".repeat(127)));
        assert!(!valid_player_id(&"a".repeat(128)));
    }

    #[test]
    fn partitioning_is_stable_and_in_range() {
        for key in ["p1", "p2", "player-with-a-longer-name", ""] {
            let p = partition_for_key(key.as_bytes(), 12);
            assert!(p < 12);
            assert_eq!(p, partition_for_key(key.as_bytes(), 12));
        }
        assert_eq!(partition_for_key(b"anything", 1), 0);
    }

    #[test]
    fn murmur2_covers_every_tail_length() {
        let hashes: Vec<u32> = ["abcd", "abcde", "abcdef", "abcdefg"]
            .iter()
            .map(|s| murmur2(s.as_bytes()))
            .collect();
        for (i, a) in hashes.iter().enumerate() {
            for b in &hashes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
