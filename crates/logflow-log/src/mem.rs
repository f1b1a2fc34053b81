//! In-Memory Log
//!
//! A complete implementation of the log contract backed by plain vectors.
//! One `Vec<Record>` per partition is the whole storage story: append-only,
//! immutable once written, offsets are vector indices. This is the backend
//! used by tests and by embedded single-process deployments; durability is
//! explicitly not its job.
//!
//! ## Blocking reads
//!
//! `read` parks the caller on a `tokio::sync::Notify` until a record is
//! appended or the timeout elapses. The notified future is created *before*
//! re-checking the partition length, so an append that races the check cannot
//! be missed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use logflow_core::Record;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::time::timeout;
use tracing::debug;

use crate::error::{LogError, Result};
use crate::manager::{LogAppender, LogManager, LogRecord, LogTailer};
use crate::stream::partition_for_key;

/// Committed positions per (group, stream, partition).
type OffsetMap = HashMap<(String, String, u32), u64>;

struct MemPartition {
    records: RwLock<Vec<Record>>,
    appended: Notify,
}

impl MemPartition {
    fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            appended: Notify::new(),
        }
    }
}

struct MemStream {
    name: String,
    partitions: Vec<MemPartition>,
}

/// In-memory [`LogManager`].
///
/// Cheap to clone via `Arc`; all state is interior.
pub struct MemLogManager {
    streams: RwLock<HashMap<String, Arc<MemStream>>>,
    offsets: Arc<Mutex<OffsetMap>>,
}

impl MemLogManager {
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            offsets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn stream(&self, name: &str) -> Result<Arc<MemStream>> {
        self.streams
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| LogError::UnknownStream(name.to_string()))
    }
}

impl Default for MemLogManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogManager for MemLogManager {
    async fn create_stream(&self, name: &str, partitions: u32) -> Result<()> {
        let partitions = partitions.max(1);
        let mut streams = self.streams.write().await;
        if let Some(existing) = streams.get(name) {
            if existing.partitions.len() as u32 == partitions {
                return Ok(());
            }
            return Err(LogError::StreamExists(
                name.to_string(),
                existing.partitions.len() as u32,
            ));
        }
        debug!(stream = name, partitions, "Creating stream");
        streams.insert(
            name.to_string(),
            Arc::new(MemStream {
                name: name.to_string(),
                partitions: (0..partitions).map(|_| MemPartition::new()).collect(),
            }),
        );
        Ok(())
    }

    async fn exists(&self, name: &str) -> bool {
        self.streams.read().await.contains_key(name)
    }

    async fn partitions(&self, name: &str) -> Result<u32> {
        Ok(self.stream(name).await?.partitions.len() as u32)
    }

    async fn appender(&self, name: &str) -> Result<Arc<dyn LogAppender>> {
        Ok(Arc::new(MemAppender {
            stream: self.stream(name).await?,
        }))
    }

    async fn tailer(
        &self,
        group: &str,
        name: &str,
        partition: u32,
    ) -> Result<Box<dyn LogTailer>> {
        let stream = self.stream(name).await?;
        let max = stream.partitions.len() as u32;
        if partition >= max {
            return Err(LogError::InvalidPartition(
                partition,
                name.to_string(),
                max - 1,
            ));
        }
        let position = self.committed(group, name, partition).await?;
        Ok(Box::new(MemTailer {
            stream,
            group: group.to_string(),
            partition,
            position,
            offsets: Arc::clone(&self.offsets),
        }))
    }

    async fn committed(&self, group: &str, name: &str, partition: u32) -> Result<u64> {
        let offsets = self.offsets.lock().await;
        Ok(*offsets
            .get(&(group.to_string(), name.to_string(), partition))
            .unwrap_or(&0))
    }

    async fn end_offset(&self, name: &str, partition: u32) -> Result<u64> {
        let stream = self.stream(name).await?;
        let max = stream.partitions.len() as u32;
        if partition >= max {
            return Err(LogError::InvalidPartition(
                partition,
                name.to_string(),
                max - 1,
            ));
        }
        let len = stream.partitions[partition as usize].records.read().await.len() as u64;
        Ok(len)
    }
}

struct MemAppender {
    stream: Arc<MemStream>,
}

#[async_trait]
impl LogAppender for MemAppender {
    async fn append(&self, partition: u32, record: Record) -> Result<u64> {
        let max = self.stream.partitions.len() as u32;
        if partition >= max {
            return Err(LogError::InvalidPartition(
                partition,
                self.stream.name.clone(),
                max - 1,
            ));
        }
        let part = &self.stream.partitions[partition as usize];
        let offset = {
            let mut records = part.records.write().await;
            records.push(record);
            records.len() as u64 - 1
        };
        part.appended.notify_waiters();
        Ok(offset)
    }

    async fn append_by_key(&self, record: Record) -> Result<u64> {
        let partition = partition_for_key(record.key(), self.partitions());
        self.append(partition, record).await
    }

    fn partitions(&self) -> u32 {
        self.stream.partitions.len() as u32
    }
}

struct MemTailer {
    stream: Arc<MemStream>,
    group: String,
    partition: u32,
    position: u64,
    offsets: Arc<Mutex<OffsetMap>>,
}

impl MemTailer {
    async fn next(&self) -> Option<Record> {
        let records = self.stream.partitions[self.partition as usize]
            .records
            .read()
            .await;
        records.get(self.position as usize).cloned()
    }
}

#[async_trait]
impl LogTailer for MemTailer {
    async fn read(&mut self, wait: Duration) -> Result<Option<LogRecord>> {
        let deadline = tokio::time::Instant::now() + wait;
        let part = &self.stream.partitions[self.partition as usize];
        loop {
            // Arm the notification before checking, so an append between the
            // check and the wait still wakes us.
            let appended = part.appended.notified();
            if let Some(record) = self.next().await {
                let offset = self.position;
                self.position += 1;
                return Ok(Some(LogRecord { offset, record }));
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            if timeout(remaining, appended).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn commit(&mut self) -> Result<()> {
        let mut offsets = self.offsets.lock().await;
        offsets.insert(
            (
                self.group.clone(),
                self.stream.name.clone(),
                self.partition,
            ),
            self.position,
        );
        Ok(())
    }

    async fn seek_committed(&mut self) -> Result<()> {
        let offsets = self.offsets.lock().await;
        self.position = *offsets
            .get(&(
                self.group.clone(),
                self.stream.name.clone(),
                self.partition,
            ))
            .unwrap_or(&0);
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn stream(&self) -> &str {
        &self.stream.name
    }

    fn partition(&self) -> u32 {
        self.partition
    }
}
