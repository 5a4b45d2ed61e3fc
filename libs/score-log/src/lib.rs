//! Embedded partitioned log.
//!
//! Implements [`LogClient`] with the guarantees the gateway relies on:
//! key-hash partitioning, total order within a partition, idempotent
//! producer sequencing, a per-message size limit, and (with `data_dir`)
//! append-then-flush persistence before acknowledging.

pub mod error;
mod partition;
mod segment;

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Deserialize;

use score_api::{Ack, DEFAULT_TOPIC, LogClient, LogError, ProduceRequest};

pub use error::OpenError;
pub use partition::StoredRecord;

use partition::Partition;
use segment::Segment;

// ═══════════════════════════════════════════════════════════════
//  LogConfig
// ═══════════════════════════════════════════════════════════════

fn default_topic() -> String {
    DEFAULT_TOPIC.into()
}
fn default_partitions() -> u32 {
    12
}
fn default_max_message_bytes() -> usize {
    1024 * 1024
}
fn default_retained_records() -> usize {
    100_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_partitions")]
    pub partitions: u32,
    /// Key + payload size limit per record.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
    /// Records per partition kept in memory for reads.
    #[serde(default = "default_retained_records")]
    pub retained_records: usize,
    /// Directory for partition files. None = memory only.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// fsync every append before acknowledging.
    #[serde(default)]
    pub fsync: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            partitions: default_partitions(),
            max_message_bytes: default_max_message_bytes(),
            retained_records: default_retained_records(),
            data_dir: None,
            fsync: false,
        }
    }
}

impl LogConfig {
    pub fn in_memory(topic: impl Into<String>, partitions: u32) -> Self {
        Self {
            topic: topic.into(),
            partitions,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), OpenError> {
        if self.topic.is_empty() {
            return Err(OpenError::Config("topic must not be empty".into()));
        }
        if self.partitions == 0 {
            return Err(OpenError::Config("partitions must be >= 1".into()));
        }
        if self.retained_records == 0 {
            return Err(OpenError::Config("retained_records must be >= 1".into()));
        }
        if self.max_message_bytes == 0 {
            return Err(OpenError::Config("max_message_bytes must be >= 1".into()));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════
//  PartitionedLog
// ═══════════════════════════════════════════════════════════════

pub struct PartitionedLog {
    topic: String,
    max_message_bytes: usize,
    partitions: Vec<Arc<Mutex<Partition>>>,
    persistent: bool,
    closed: AtomicBool,
}

fn lock(partition: &Mutex<Partition>) -> MutexGuard<'_, Partition> {
    partition.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl PartitionedLog {
    /// Open the topic. With `data_dir`, existing partition files are replayed.
    pub fn open(config: &LogConfig) -> Result<Self, OpenError> {
        config.validate()?;

        if let Some(dir) = &config.data_dir {
            std::fs::create_dir_all(dir).map_err(|e| OpenError::io(dir, e))?;
        }

        let mut partitions = Vec::with_capacity(config.partitions as usize);
        for id in 0..config.partitions {
            let mut partition = Partition::new(id, config.retained_records);
            if let Some(dir) = &config.data_dir {
                let path = dir.join(format!("{}-{id}.log", config.topic));
                let (segment, entries) = Segment::open(&path, config.fsync)?;
                partition = partition.with_segment(segment, entries);
                tracing::debug!(
                    topic = %config.topic,
                    partition = id,
                    end_offset = partition.end_offset(),
                    "partition loaded"
                );
            }
            partitions.push(Arc::new(Mutex::new(partition)));
        }

        tracing::info!(
            topic = %config.topic,
            partitions = config.partitions,
            persistent = config.data_dir.is_some(),
            fsync = config.fsync,
            "log opened"
        );

        Ok(Self {
            topic: config.topic.clone(),
            max_message_bytes: config.max_message_bytes,
            partitions,
            persistent: config.data_dir.is_some(),
            closed: AtomicBool::new(false),
        })
    }

    /// Open the topic's partition files for reading only.
    ///
    /// Nothing on disk is created or modified: missing partition files load
    /// as empty partitions and a torn trailing entry is left in place. The
    /// returned log is closed, so sends fail with `LogError::Closed`.
    pub fn open_read_only(config: &LogConfig) -> Result<Self, OpenError> {
        config.validate()?;
        let Some(dir) = &config.data_dir else {
            return Err(OpenError::Config("read-only open needs a data_dir".into()));
        };

        let mut partitions = Vec::with_capacity(config.partitions as usize);
        for id in 0..config.partitions {
            let path = dir.join(format!("{}-{id}.log", config.topic));
            let mut partition = Partition::new(id, config.retained_records);
            match Segment::replay(&path)? {
                Some(entries) => partition = partition.with_entries(entries),
                None => tracing::debug!(path = %path.display(), "partition file missing, reading as empty"),
            }
            partitions.push(Arc::new(Mutex::new(partition)));
        }

        tracing::info!(
            topic = %config.topic,
            partitions = config.partitions,
            "log opened read-only"
        );

        Ok(Self {
            topic: config.topic.clone(),
            max_message_bytes: config.max_message_bytes,
            partitions,
            persistent: false,
            closed: AtomicBool::new(true),
        })
    }

    fn partition(&self, id: u32) -> Result<&Arc<Mutex<Partition>>, LogError> {
        self.partitions
            .get(id as usize)
            .ok_or(LogError::UnknownPartition(id))
    }

    /// Read up to `max` records of `partition` starting at `from_offset`.
    pub fn read(&self, partition: u32, from_offset: u64, max: usize) -> Result<Vec<StoredRecord>, LogError> {
        Ok(lock(self.partition(partition)?).read(from_offset, max))
    }

    /// Offset the next appended record of `partition` will get.
    pub fn end_offset(&self, partition: u32) -> Result<u64, LogError> {
        Ok(lock(self.partition(partition)?).end_offset())
    }

    /// Stop accepting sends. Reads keep working.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl LogClient for PartitionedLog {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn partition_count(&self) -> u32 {
        self.partitions.len() as u32
    }

    fn produce(
        &self,
        request: ProduceRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Ack, LogError>> + Send + '_>> {
        Box::pin(async move {
            if self.is_closed() {
                return Err(LogError::Closed);
            }
            let partition = self.partition(request.partition)?.clone();
            let max = self.max_message_bytes;

            if self.persistent {
                // File I/O stays off the async workers.
                tokio::task::spawn_blocking(move || lock(&partition).append(request, max))
                    .await
                    .map_err(|e| LogError::Storage(format!("append task: {e}")))?
            } else {
                lock(&partition).append(request, max)
            }
        })
    }

    fn flush(&self) -> Pin<Box<dyn Future<Output = Result<(), LogError>> + Send + '_>> {
        Box::pin(async move {
            if !self.persistent {
                return Ok(());
            }
            let partitions = self.partitions.clone();
            tokio::task::spawn_blocking(move || {
                for partition in &partitions {
                    lock(partition).sync()?;
                }
                Ok::<(), LogError>(())
            })
            .await
            .map_err(|e| LogError::Storage(format!("flush task: {e}")))?
        })
    }
}
