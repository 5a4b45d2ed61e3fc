//! Idempotent publishing on top of a [`LogClient`].
//!
//! Each [`LogPublisher`] is one producer: it owns a producer id and a
//! sequence counter per partition. Sequences are taken in call order at
//! [`LogPublisher::enqueue`], so the order records are enqueued in is the
//! order the log appends them in, whatever order the sends complete in.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use score_api::{Ack, LogClient, LogError, ProduceRequest, PublishError, now_ms};

use crate::config::PublisherConfig;

/// Key + payload bound used when none is set explicitly.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// First retry delay when the log reports a sequence gap. A gap means an
/// earlier send is still on its way, so it clears quickly.
const GAP_BACKOFF: Duration = Duration::from_millis(1);

static PRODUCER_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_producer_id() -> u64 {
    let millis = now_ms().max(0) as u64;
    (millis << 16) | (PRODUCER_COUNTER.fetch_add(1, Ordering::Relaxed) & 0xffff)
}

pub struct LogPublisher {
    client: Arc<dyn LogClient>,
    producer_id: u64,
    sequences: Vec<AtomicU64>,
    in_flight: Vec<Arc<Semaphore>>,
    max_message_bytes: usize,
    retry_backoff: Duration,
    retry_backoff_max: Duration,
}

impl LogPublisher {
    pub fn new(client: Arc<dyn LogClient>, config: &PublisherConfig) -> Self {
        let partitions = client.partition_count() as usize;
        Self {
            producer_id: next_producer_id(),
            sequences: (0..partitions).map(|_| AtomicU64::new(0)).collect(),
            in_flight: (0..partitions)
                .map(|_| Arc::new(Semaphore::new(config.max_in_flight)))
                .collect(),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            retry_backoff_max: Duration::from_millis(config.retry_backoff_max_ms),
            client,
        }
    }

    /// Reject larger records before they take a sequence number.
    pub fn with_max_message_bytes(mut self, max: usize) -> Self {
        self.max_message_bytes = max;
        self
    }

    pub fn producer_id(&self) -> u64 {
        self.producer_id
    }

    /// Reserve an in-flight slot and the next sequence of the key's
    /// partition, then start sending. Waits while the partition is at its
    /// in-flight cap.
    ///
    /// The send runs on its own task from the moment a sequence is taken,
    /// so dropping the returned [`Delivery`] or the future of
    /// [`publish`](Self::publish) never leaves a hole in the partition's
    /// sequence.
    pub async fn enqueue(&self, key: Bytes, payload: Bytes) -> Result<Delivery, PublishError> {
        let size = key.len() + payload.len();
        if size > self.max_message_bytes {
            return Err(PublishError::Fatal(LogError::MessageTooLarge {
                size,
                max: self.max_message_bytes,
            }));
        }

        let partition = self.client.partition_for(&key);
        let (Some(slots), Some(sequence)) = (
            self.in_flight.get(partition as usize),
            self.sequences.get(partition as usize),
        ) else {
            return Err(PublishError::Fatal(LogError::UnknownPartition(partition)));
        };

        let permit = slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PublishError::Closed)?;
        let sequence = sequence.fetch_add(1, Ordering::AcqRel);

        let send = SendTask {
            client: self.client.clone(),
            request: ProduceRequest {
                partition,
                producer_id: self.producer_id,
                sequence,
                key,
                payload,
            },
            _permit: permit,
            retry_backoff: self.retry_backoff,
            retry_backoff_max: self.retry_backoff_max,
        };

        Ok(Delivery {
            partition,
            sequence,
            handle: tokio::spawn(send.run()),
        })
    }

    /// Enqueue and wait for the outcome.
    pub async fn publish(&self, key: Bytes, payload: Bytes) -> Result<Ack, PublishError> {
        self.enqueue(key, payload).await?.wait().await
    }

    /// Stop handing out slots. Pending enqueues fail with `Closed`;
    /// deliveries already enqueued still run to completion.
    pub fn close(&self) {
        for slots in &self.in_flight {
            slots.close();
        }
    }
}

/// Handle to one enqueued send. Dropping it detaches the send, which keeps
/// running until the log answers.
pub struct Delivery {
    partition: u32,
    sequence: u64,
    handle: JoinHandle<Result<Ack, PublishError>>,
}

impl Delivery {
    pub fn partition(&self) -> u32 {
        self.partition
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// True once the outcome is known and `wait` will not block.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the log to acknowledge or fail for good.
    pub async fn wait(self) -> Result<Ack, PublishError> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(PublishError::Fatal(LogError::Storage(format!(
                "delivery task failed: {e}"
            )))),
        }
    }
}

/// A send in progress. Holds its in-flight slot until it resolves.
struct SendTask {
    client: Arc<dyn LogClient>,
    request: ProduceRequest,
    _permit: OwnedSemaphorePermit,
    retry_backoff: Duration,
    retry_backoff_max: Duration,
}

impl SendTask {
    /// Transient errors are retried with the same sequence number, so a
    /// send the log already appended is answered from its duplicate cache
    /// instead of being written twice.
    async fn run(self) -> Result<Ack, PublishError> {
        let partition = self.request.partition;
        let sequence = self.request.sequence;
        let mut backoff = self.retry_backoff;
        let mut gap_backoff = GAP_BACKOFF;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let err = match self.client.produce(self.request.clone()).await {
                Ok(ack) => return Ok(ack),
                Err(e) if !e.is_transient() => return Err(PublishError::from(e)),
                Err(e) => e,
            };

            let delay = if matches!(err, LogError::OutOfOrderSequence { .. }) {
                let d = gap_backoff;
                gap_backoff = (gap_backoff * 2).min(self.retry_backoff);
                d
            } else {
                let d = backoff;
                backoff = (backoff * 2).min(self.retry_backoff_max);
                d
            };
            tracing::debug!(
                partition,
                sequence,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient log error, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
