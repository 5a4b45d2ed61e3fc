//! Raw record → [`ScoreUpdate`].

use serde_json::{Map, Number, Value};

use score_api::{RejectionReason, ScoreUpdate, now_ms, valid_leaderboard_id, valid_player_id};

/// Turns one framed record into a [`ScoreUpdate`] or the first reason it
/// fails. Checks run in field order: `lb`, `player`, `score`, `ts_ms`.
#[derive(Clone, Copy)]
pub struct Validator {
    clock: fn() -> i64,
}

impl Default for Validator {
    fn default() -> Self {
        Self { clock: now_ms }
    }
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `clock` for the ingest time of records without `ts_ms`.
    pub fn with_clock(clock: fn() -> i64) -> Self {
        Self { clock }
    }

    pub fn validate(&self, raw: &[u8]) -> Result<ScoreUpdate, RejectionReason> {
        let value: Value = serde_json::from_slice(raw).map_err(|_| RejectionReason::Malformed)?;
        let Value::Object(fields) = value else {
            return Err(RejectionReason::Malformed);
        };

        let leaderboard_id = string_field(&fields, "lb", valid_leaderboard_id)
            .ok_or(RejectionReason::InvalidLeaderboardId)?;
        let player_id = string_field(&fields, "player", valid_player_id)
            .ok_or(RejectionReason::InvalidPlayerId)?;
        let score = score_field(fields.get("score"))?;
        let timestamp_ms = match fields.get("ts_ms") {
            None => (self.clock)(),
            Some(v) => v.as_i64().ok_or(RejectionReason::InvalidTimestamp)?,
        };

        Ok(ScoreUpdate {
            leaderboard_id,
            player_id,
            score,
            timestamp_ms,
        })
    }
}

fn string_field(fields: &Map<String, Value>, name: &str, valid: fn(&str) -> bool) -> Option<String> {
    match fields.get(name) {
        Some(Value::String(s)) if valid(s) => Some(s.clone()),
        _ => None,
    }
}

/// 2^63 as f64; the first float past `i64::MAX`.
const I64_LIMIT_F64: f64 = 9_223_372_036_854_775_808.0;

fn score_field(value: Option<&Value>) -> Result<i64, RejectionReason> {
    let Some(Value::Number(n)) = value else {
        return Err(RejectionReason::InvalidScore);
    };
    classify_score(n)
}

fn classify_score(n: &Number) -> Result<i64, RejectionReason> {
    if let Some(v) = n.as_i64() {
        return if v >= 0 { Ok(v) } else { Err(RejectionReason::InvalidScore) };
    }
    if n.as_u64().is_some() {
        // integer literal in (i64::MAX, u64::MAX]
        return Err(RejectionReason::ScoreOverflow);
    }
    match n.as_f64() {
        // serde_json parses the integer literal `-0` as -0.0
        Some(f) if f == 0.0 && f.is_sign_negative() => Ok(0),
        Some(f) if f >= I64_LIMIT_F64 && f.fract() == 0.0 => Err(RejectionReason::ScoreOverflow),
        _ => Err(RejectionReason::InvalidScore),
    }
}
