//! Log Contract
//!
//! The durable partitioned log is an external collaborator: this module pins
//! down the contract the engine programs against, and nothing else. The
//! in-memory implementation in [`crate::mem`] exists for tests and embedded
//! use; a durable backend implements the same three traits.
//!
//! ## Contract
//!
//! - A stream is append-only and immutable once written: re-reading a
//!   partition from the same offset reproduces the same records.
//! - Ordering is guaranteed within a partition only.
//! - Consumer positions are tracked per (group, stream, partition) and only
//!   move when `commit` is called; a tailer restarted with `seek_committed`
//!   resumes deterministically from the last committed position.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use logflow_core::Record;

use crate::error::Result;

/// A record as read back from a partition, tagged with its offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub offset: u64,
    pub record: Record,
}

/// Consumer progress against one stream: committed position vs end of log,
/// summed over partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Lag {
    /// Sum of committed positions.
    pub lower: u64,
    /// Sum of end offsets.
    pub upper: u64,
}

impl Lag {
    /// Records appended but not yet committed by the group.
    pub fn lag(&self) -> u64 {
        self.upper.saturating_sub(self.lower)
    }
}

/// Handle for appending records to one stream.
#[async_trait]
pub trait LogAppender: Send + Sync {
    /// Append to an explicit partition. Returns the record's offset.
    async fn append(&self, partition: u32, record: Record) -> Result<u64>;

    /// Append to the partition selected by the record key.
    async fn append_by_key(&self, record: Record) -> Result<u64>;

    fn partitions(&self) -> u32;
}

/// Tailer over a single (stream, partition), scoped to a consumer group.
///
/// Not `Sync`: a tailer is owned by exactly one consumer task.
#[async_trait]
pub trait LogTailer: Send {
    /// Read the next record in strict offset order, waiting up to `timeout`.
    ///
    /// Returns `None` when no record arrived within the timeout. This is the
    /// engine's only blocking point: an empty partition parks the consumer,
    /// which is what backpressure amounts to.
    async fn read(&mut self, timeout: Duration) -> Result<Option<LogRecord>>;

    /// Persist the current read position for this tailer's group.
    async fn commit(&mut self) -> Result<()>;

    /// Rewind to the last committed position (the start when none exists).
    async fn seek_committed(&mut self) -> Result<()>;

    /// Next offset this tailer will read.
    fn position(&self) -> u64;

    fn stream(&self) -> &str;

    fn partition(&self) -> u32;
}

/// The external log store boundary.
#[async_trait]
pub trait LogManager: Send + Sync {
    /// Create a stream. Creating an existing stream with the same partition
    /// count is a no-op; a different count fails with `StreamExists`.
    async fn create_stream(&self, name: &str, partitions: u32) -> Result<()>;

    async fn exists(&self, name: &str) -> bool;

    /// Partition count of a stream, or `UnknownStream`.
    async fn partitions(&self, name: &str) -> Result<u32>;

    async fn appender(&self, name: &str) -> Result<Arc<dyn LogAppender>>;

    /// Open a tailer positioned at the group's last committed offset.
    async fn tailer(&self, group: &str, name: &str, partition: u32)
        -> Result<Box<dyn LogTailer>>;

    /// Committed position for (group, stream, partition); 0 when never
    /// committed.
    async fn committed(&self, group: &str, name: &str, partition: u32) -> Result<u64>;

    /// End offset (next offset to be assigned) of one partition.
    async fn end_offset(&self, name: &str, partition: u32) -> Result<u64>;

    /// Lag of a consumer group against a stream, summed over partitions.
    async fn lag(&self, group: &str, name: &str) -> Result<Lag> {
        let partitions = self.partitions(name).await?;
        let mut acc = Lag::default();
        for partition in 0..partitions {
            acc.lower += self.committed(group, name, partition).await?;
            acc.upper += self.end_offset(name, partition).await?;
        }
        Ok(acc)
    }
}
