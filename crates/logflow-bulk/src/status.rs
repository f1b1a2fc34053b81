//! Bulk Status
//!
//! The aggregated progress of one bulk command, reduced from partial deltas
//! on the shared status stream. State transitions are monotonic: a command
//! never moves backward, and a terminal state is final.
//!
//! ```text
//! SCHEDULED --first delta--> RUNNING --processed+errors == total--> COMPLETED
//!     |                         |
//!     +--------- abort ---------+-------> ABORTED
//! ```

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use logflow_core::Record;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, RwLock};
use uuid::Uuid;

use crate::error::Result;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Lifecycle state of a bulk command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BulkState {
    Scheduled,
    Running,
    Completed,
    Aborted,
}

impl BulkState {
    pub fn is_terminal(self) -> bool {
        matches!(self, BulkState::Completed | BulkState::Aborted)
    }
}

/// Aggregated progress of one bulk command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkStatus {
    pub command_id: Uuid,
    pub action: String,
    pub username: String,
    pub state: BulkState,
    pub processed: u64,
    pub errors: u64,
    pub total: u64,
    pub submit_time: u64,
    pub completion_time: Option<u64>,
    pub error_message: Option<String>,
}

impl BulkStatus {
    /// Initial status written at submit time. Zero targets short-circuits
    /// straight to `Completed`.
    pub fn scheduled(
        command_id: Uuid,
        action: &str,
        username: &str,
        total: u64,
        now: u64,
    ) -> Self {
        let (state, completion_time) = if total == 0 {
            (BulkState::Completed, Some(now))
        } else {
            (BulkState::Scheduled, None)
        };
        Self {
            command_id,
            action: action.to_string(),
            username: username.to_string(),
            state,
            processed: 0,
            errors: 0,
            total,
            submit_time: now,
            completion_time,
            error_message: None,
        }
    }

    /// Fold one partial delta in. First delta moves `Scheduled -> Running`;
    /// reaching the total moves `Running -> Completed`. Counts still fold
    /// after an abort (in-flight buckets finish), but terminal states never
    /// change.
    pub fn apply_delta(&mut self, delta: &StatusDelta, now: u64) {
        self.processed += delta.processed;
        self.errors += delta.errors;
        if delta.error_message.is_some() {
            self.error_message = delta.error_message.clone();
        }
        if self.state == BulkState::Scheduled {
            self.state = BulkState::Running;
        }
        if self.state == BulkState::Running && self.processed + self.errors >= self.total {
            self.state = BulkState::Completed;
            self.completion_time = Some(now);
        }
    }

    /// Mark aborted, unless already terminal.
    pub fn abort(&mut self, now: u64) {
        if !self.state.is_terminal() {
            self.state = BulkState::Aborted;
            self.completion_time = Some(now);
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// One partial completion emitted by an action computation after a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusDelta {
    pub command_id: Uuid,
    pub processed: u64,
    pub errors: u64,
    pub error_message: Option<String>,
}

/// Messages carried on the shared status stream, keyed by command id so the
/// reduction of one command always happens on one partition, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusMessage {
    /// Written once at submit time, carries the target total.
    Init(BulkStatus),
    /// Partial completion of one bucket.
    Delta(StatusDelta),
    /// Cooperative cancellation marker.
    Abort { command_id: Uuid },
}

impl StatusMessage {
    pub fn command_id(&self) -> Uuid {
        match self {
            StatusMessage::Init(status) => status.command_id,
            StatusMessage::Delta(delta) => delta.command_id,
            StatusMessage::Abort { command_id } => *command_id,
        }
    }

    /// Encode as a record keyed by the command id.
    pub fn to_record(&self) -> Result<Record> {
        let value = serde_json::to_vec(self)?;
        Ok(Record::of(self.command_id().to_string(), value).map_err(logflow_log::LogError::from)?)
    }

    /// Decode from a record payload, `None` for control records.
    pub fn from_record(record: &Record) -> Result<Option<StatusMessage>> {
        if record.is_control() {
            return Ok(None);
        }
        let Some(value) = record.value() else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(value)?))
    }
}

/// Materialized view of the latest reduced status per command.
///
/// Written by the status computation (and seeded at submit time), read by
/// `get_status`, abort checks and completion waiters. This is in-process
/// shared state of the service, not of any computation: cross-partition
/// aggregation itself only ever happens through the status stream.
#[derive(Default)]
pub struct StatusStore {
    statuses: RwLock<HashMap<Uuid, BulkStatus>>,
    changed: Notify,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, command_id: Uuid) -> Option<BulkStatus> {
        self.statuses.read().await.get(&command_id).cloned()
    }

    /// Insert or replace the reduced status and wake any waiters.
    ///
    /// A terminal state recorded here never regresses: a fold that raced an
    /// abort keeps its counts but not its pre-terminal state, so cooperative
    /// abort checks stay stable while late deltas drain.
    pub async fn put(&self, mut status: BulkStatus) {
        let mut statuses = self.statuses.write().await;
        if let Some(existing) = statuses.get(&status.command_id) {
            if existing.state.is_terminal() && !status.state.is_terminal() {
                status.state = existing.state;
                status.completion_time = existing.completion_time;
            }
        }
        statuses.insert(status.command_id, status);
        drop(statuses);
        self.changed.notify_waiters();
    }

    /// Apply `f` to the stored status, returning the updated copy.
    pub async fn update<F>(&self, command_id: Uuid, f: F) -> Option<BulkStatus>
    where
        F: FnOnce(&mut BulkStatus),
    {
        let mut statuses = self.statuses.write().await;
        let status = statuses.get_mut(&command_id)?;
        f(status);
        let updated = status.clone();
        drop(statuses);
        self.changed.notify_waiters();
        Some(updated)
    }

    pub async fn is_aborted(&self, command_id: Uuid) -> bool {
        matches!(
            self.statuses.read().await.get(&command_id),
            Some(status) if status.state == BulkState::Aborted
        )
    }

    /// Snapshot of every known status.
    pub async fn snapshot(&self) -> HashMap<Uuid, BulkStatus> {
        self.statuses.read().await.clone()
    }

    /// Wait until the command reaches a terminal state, or `timeout`.
    pub async fn wait_for_terminal(
        &self,
        command_id: Uuid,
        timeout: Duration,
    ) -> Option<BulkStatus> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.changed.notified();
            if let Some(status) = self.get(command_id).await {
                if status.is_terminal() {
                    return Some(status);
                }
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(total: u64) -> BulkStatus {
        BulkStatus::scheduled(Uuid::new_v4(), "noop", "system", total, 1000)
    }

    fn delta(id: Uuid, processed: u64, errors: u64) -> StatusDelta {
        StatusDelta {
            command_id: id,
            processed,
            errors,
            error_message: None,
        }
    }

    #[test]
    fn test_zero_total_completes_immediately() {
        let s = status(0);
        assert_eq!(s.state, BulkState::Completed);
        assert_eq!(s.total, 0);
        assert!(s.completion_time.is_some());
    }

    #[test]
    fn test_state_progression() {
        let mut s = status(5);
        assert_eq!(s.state, BulkState::Scheduled);

        s.apply_delta(&delta(s.command_id, 2, 0), 2000);
        assert_eq!(s.state, BulkState::Running);
        assert!(s.completion_time.is_none());

        s.apply_delta(&delta(s.command_id, 2, 1), 3000);
        assert_eq!(s.state, BulkState::Completed);
        assert_eq!(s.processed, 4);
        assert_eq!(s.errors, 1);
        assert_eq!(s.completion_time, Some(3000));
    }

    #[test]
    fn test_abort_is_terminal_and_monotonic() {
        let mut s = status(5);
        s.abort(2000);
        assert_eq!(s.state, BulkState::Aborted);

        // Late deltas still fold counts but never resurrect the command.
        s.apply_delta(&delta(s.command_id, 5, 0), 3000);
        assert_eq!(s.state, BulkState::Aborted);
        assert_eq!(s.processed, 5);

        // Abort after completion is a no-op.
        let mut done = status(0);
        done.abort(2000);
        assert_eq!(done.state, BulkState::Completed);
    }

    #[test]
    fn test_message_record_roundtrip() {
        let message = StatusMessage::Delta(delta(Uuid::new_v4(), 3, 1));
        let record = message.to_record().unwrap();
        assert_eq!(record.key(), message.command_id().to_string());
        let back = StatusMessage::from_record(&record).unwrap().unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn test_control_records_are_skipped() {
        let poison = Record::poison("k").unwrap();
        assert!(StatusMessage::from_record(&poison).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_never_regresses_terminal_state() {
        let store = StatusStore::new();
        let mut s = status(10);
        let id = s.command_id;
        store.put(s.clone()).await;
        store.update(id, |st| st.abort(2000)).await.unwrap();

        // A racing fold that still thinks the command is running keeps its
        // counts but cannot resurrect it.
        s.apply_delta(&delta(id, 3, 0), 2500);
        assert_eq!(s.state, BulkState::Running);
        store.put(s).await;

        let stored = store.get(id).await.unwrap();
        assert_eq!(stored.state, BulkState::Aborted);
        assert_eq!(stored.processed, 3);
    }

    #[tokio::test]
    async fn test_store_wait_for_terminal() {
        let store = std::sync::Arc::new(StatusStore::new());
        let mut s = status(1);
        let id = s.command_id;
        store.put(s.clone()).await;

        let waiter = std::sync::Arc::clone(&store);
        let handle = tokio::spawn(async move {
            waiter
                .wait_for_terminal(id, Duration::from_secs(5))
                .await
                .expect("should reach terminal state")
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        s.apply_delta(&delta(id, 1, 0), 2000);
        store.put(s).await;

        let terminal = handle.await.unwrap();
        assert_eq!(terminal.state, BulkState::Completed);
    }
}
