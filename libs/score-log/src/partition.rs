use std::collections::{HashMap, VecDeque};

use bytes::Bytes;

use score_api::{Ack, LogError, ProduceRequest};

use crate::segment::Segment;

/// Results kept per producer for answering duplicate sends. Matches the
/// publisher's in-flight cap: a retry can only ever target one of the
/// last this-many sequences.
pub(crate) const PRODUCER_RESULT_CACHE: usize = 5;

/// A record as stored in a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub offset: u64,
    pub key: Bytes,
    pub payload: Bytes,
}

#[derive(Default)]
struct ProducerState {
    next_sequence: u64,
    recent: VecDeque<(u64, Result<Ack, LogError>)>,
}

impl ProducerState {
    fn remember(&mut self, sequence: u64, result: Result<Ack, LogError>) {
        if self.recent.len() == PRODUCER_RESULT_CACHE {
            self.recent.pop_front();
        }
        self.recent.push_back((sequence, result));
        self.next_sequence = sequence + 1;
    }

    fn cached(&self, sequence: u64) -> Option<Result<Ack, LogError>> {
        self.recent
            .iter()
            .find(|(s, _)| *s == sequence)
            .map(|(_, r)| r.clone())
    }
}

/// One ordered shard of the topic.
///
/// Keeps a bounded in-memory window of records (`retained`) and, when
/// persistent, the full history in its segment file.
pub(crate) struct Partition {
    id: u32,
    records: VecDeque<StoredRecord>,
    retained: usize,
    next_offset: u64,
    producers: HashMap<u64, ProducerState>,
    segment: Option<Segment>,
}

impl Partition {
    pub(crate) fn new(id: u32, retained: usize) -> Self {
        Self {
            id,
            records: VecDeque::new(),
            retained,
            next_offset: 0,
            producers: HashMap::new(),
            segment: None,
        }
    }

    /// Attach a segment and load what it already holds.
    pub(crate) fn with_segment(self, segment: Segment, entries: Vec<(Bytes, Bytes)>) -> Self {
        let mut partition = self.with_entries(entries);
        partition.segment = Some(segment);
        partition
    }

    /// Load replayed entries without a file to append to.
    pub(crate) fn with_entries(mut self, entries: Vec<(Bytes, Bytes)>) -> Self {
        for (key, payload) in entries {
            self.push(key, payload);
        }
        self
    }

    /// Idempotent append.
    ///
    /// - `sequence < expected` → duplicate, answer with the cached result
    /// - `sequence > expected` → gap, transient `OutOfOrderSequence`
    /// - `sequence == expected` → size check, write, advance
    ///
    /// A rejected in-order send still consumes its sequence, otherwise
    /// every later send from that producer would stall behind it.
    pub(crate) fn append(&mut self, request: ProduceRequest, max_message_bytes: usize) -> Result<Ack, LogError> {
        let expected = self
            .producers
            .get(&request.producer_id)
            .map(|p| p.next_sequence)
            .unwrap_or(0);

        if request.sequence < expected {
            let cached = self
                .producers
                .get(&request.producer_id)
                .and_then(|p| p.cached(request.sequence));
            tracing::debug!(
                partition = self.id,
                producer = request.producer_id,
                sequence = request.sequence,
                "duplicate send"
            );
            return cached.unwrap_or(Err(LogError::DuplicateSequence {
                partition: self.id,
                sequence: request.sequence,
            }));
        }
        if request.sequence > expected {
            return Err(LogError::OutOfOrderSequence {
                partition: self.id,
                expected,
                got: request.sequence,
            });
        }

        let result = self.write(request.key, request.payload, max_message_bytes);
        self.producers
            .entry(request.producer_id)
            .or_default()
            .remember(request.sequence, result.clone());
        result
    }

    fn write(&mut self, key: Bytes, payload: Bytes, max_message_bytes: usize) -> Result<Ack, LogError> {
        let size = key.len() + payload.len();
        if size > max_message_bytes {
            return Err(LogError::MessageTooLarge { size, max: max_message_bytes });
        }
        if let Some(segment) = self.segment.as_mut() {
            segment.append(&key, &payload)?;
        }
        let offset = self.push(key, payload);
        Ok(Ack { partition: self.id, offset })
    }

    fn push(&mut self, key: Bytes, payload: Bytes) -> u64 {
        let offset = self.next_offset;
        if self.records.len() >= self.retained {
            self.records.pop_front();
        }
        self.records.push_back(StoredRecord { offset, key, payload });
        self.next_offset += 1;
        offset
    }

    /// Up to `max` records starting at `from` (clamped to the retained window).
    pub(crate) fn read(&self, from: u64, max: usize) -> Vec<StoredRecord> {
        let base = self.records.front().map(|r| r.offset).unwrap_or(self.next_offset);
        let skip = from.saturating_sub(base) as usize;
        self.records.iter().skip(skip).take(max).cloned().collect()
    }

    pub(crate) fn end_offset(&self) -> u64 {
        self.next_offset
    }

    pub(crate) fn sync(&mut self) -> Result<(), LogError> {
        if let Some(segment) = self.segment.as_mut() {
            segment.sync()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(producer_id: u64, sequence: u64, key: &str, payload: &str) -> ProduceRequest {
        ProduceRequest {
            partition: 0,
            producer_id,
            sequence,
            key: Bytes::copy_from_slice(key.as_bytes()),
            payload: Bytes::copy_from_slice(payload.as_bytes()),
        }
    }

    #[test]
    fn in_order_sends_get_consecutive_offsets() {
        let mut p = Partition::new(0, 100);
        assert_eq!(p.append(req(1, 0, "p1", "a"), 1024).unwrap().offset, 0);
        assert_eq!(p.append(req(1, 1, "p1", "b"), 1024).unwrap().offset, 1);
        assert_eq!(p.append(req(2, 0, "p2", "c"), 1024).unwrap().offset, 2);
        assert_eq!(p.end_offset(), 3);
    }

    #[test]
    fn duplicate_returns_original_ack_without_appending() {
        let mut p = Partition::new(0, 100);
        let first = p.append(req(1, 0, "p1", "a"), 1024).unwrap();
        let again = p.append(req(1, 0, "p1", "a"), 1024).unwrap();
        assert_eq!(first, again);
        assert_eq!(p.end_offset(), 1);
    }

    #[test]
    fn gap_is_transient_and_does_not_advance() {
        let mut p = Partition::new(0, 100);
        let err = p.append(req(1, 1, "p1", "b"), 1024).unwrap_err();
        assert!(err.is_transient());
        assert_eq!(p.append(req(1, 0, "p1", "a"), 1024).unwrap().offset, 0);
        assert_eq!(p.append(req(1, 1, "p1", "b"), 1024).unwrap().offset, 1);
    }

    #[test]
    fn oversize_consumes_sequence() {
        let mut p = Partition::new(0, 100);
        let err = p.append(req(1, 0, "p1", "too large"), 4).unwrap_err();
        assert!(matches!(err, LogError::MessageTooLarge { .. }));
        assert_eq!(p.append(req(1, 1, "p1", "ok"), 4).unwrap().offset, 0);
        // retry of the rejected one answers the same rejection
        assert_eq!(p.append(req(1, 0, "p1", "too large"), 4), Err(err));
    }

    #[test]
    fn evicted_duplicate_is_fatal() {
        let mut p = Partition::new(0, 100);
        for seq in 0..(PRODUCER_RESULT_CACHE as u64 + 1) {
            p.append(req(1, seq, "p1", "x"), 1024).unwrap();
        }
        let err = p.append(req(1, 0, "p1", "x"), 1024).unwrap_err();
        assert!(matches!(err, LogError::DuplicateSequence { sequence: 0, .. }));
    }

    #[test]
    fn retention_trims_window_but_keeps_offsets() {
        let mut p = Partition::new(0, 2);
        for seq in 0..5 {
            p.append(req(1, seq, "p1", "x"), 1024).unwrap();
        }
        let window = p.read(0, 10);
        assert_eq!(window.iter().map(|r| r.offset).collect::<Vec<_>>(), vec![3, 4]);
        assert_eq!(p.read(4, 10).len(), 1);
        assert!(p.read(5, 10).is_empty());
    }
}
