//! Bulk Computations
//!
//! The two computation kinds the bulk layer contributes to a topology:
//!
//! - [`BulkActionComputation`]: consumes bucket records from one action's
//!   input stream, applies the domain action to each member id inside a local
//!   transaction, and emits a partial-status delta per bucket.
//! - [`StatusComputation`]: the keyed reducer on the shared status stream,
//!   folding init records and deltas into one [`BulkStatus`] per command and
//!   publishing terminal statuses on the done stream.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use logflow_compute::{Computation, ComputationContext};
use logflow_core::Record;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::action::{BulkAction, TransactionRunner};
use crate::command::BulkBucket;
use crate::status::{now_millis, BulkStatus, StatusDelta, StatusMessage, StatusStore};

/// Applies one registered action to every id of every bucket record.
///
/// Fault containment is per id: a failing id is counted as an error and the
/// remaining ids in the bucket still run. Replayed buckets (same record key)
/// are deduped in-instance and emit no second delta; durable idempotence per
/// id remains the action implementation's obligation.
pub struct BulkActionComputation {
    action_name: String,
    action: Arc<dyn BulkAction>,
    transactions: Arc<dyn TransactionRunner>,
    store: Arc<StatusStore>,
    seen_buckets: HashSet<String>,
}

impl BulkActionComputation {
    pub fn new(
        action_name: impl Into<String>,
        action: Arc<dyn BulkAction>,
        transactions: Arc<dyn TransactionRunner>,
        store: Arc<StatusStore>,
    ) -> Self {
        Self {
            action_name: action_name.into(),
            action,
            transactions,
            store,
            seen_buckets: HashSet::new(),
        }
    }

    /// Run one bucket inside a transaction, counting per-id outcomes.
    async fn run_bucket(&self, bucket: &BulkBucket) -> StatusDelta {
        let mut delta = StatusDelta {
            command_id: bucket.command_id,
            processed: 0,
            errors: 0,
            error_message: None,
        };

        if let Err(err) = self.transactions.begin().await {
            warn!(
                action = self.action_name,
                command = %bucket.command_id,
                error = %err,
                "Could not open bucket transaction"
            );
            delta.errors = bucket.ids.len() as u64;
            delta.error_message = Some(format!("transaction begin: {err}"));
            return delta;
        }

        for id in &bucket.ids {
            // Cooperative cancellation, checked at id granularity.
            if self.store.is_aborted(bucket.command_id).await {
                info!(
                    action = self.action_name,
                    command = %bucket.command_id,
                    "Command aborted, skipping rest of bucket"
                );
                break;
            }
            match self.action.apply(id, &bucket.params).await {
                Ok(()) => delta.processed += 1,
                Err(err) => {
                    warn!(
                        action = self.action_name,
                        command = %bucket.command_id,
                        id,
                        error = %err,
                        "Action failed on one id"
                    );
                    delta.errors += 1;
                    delta.error_message = Some(format!("{id}: {err}"));
                }
            }
        }

        if let Err(err) = self.transactions.commit().await {
            warn!(
                action = self.action_name,
                command = %bucket.command_id,
                error = %err,
                "Bucket transaction failed to commit"
            );
            // Nothing in the bucket landed.
            delta.errors += delta.processed;
            delta.processed = 0;
            delta.error_message = Some(format!("transaction commit: {err}"));
            let _ = self.transactions.rollback().await;
        }
        delta
    }
}

#[async_trait]
impl Computation for BulkActionComputation {
    async fn process_record(
        &mut self,
        ctx: &mut ComputationContext,
        _input: &str,
        record: Record,
    ) -> anyhow::Result<()> {
        if record.is_control() {
            return Ok(());
        }
        let Some(value) = record.value() else {
            anyhow::bail!("bucket record '{}' has no payload", record.key());
        };
        let bucket: BulkBucket = serde_json::from_slice(value)?;

        if !self.seen_buckets.insert(record.key().to_string()) {
            debug!(
                action = self.action_name,
                bucket = record.key(),
                "Replayed bucket, already applied"
            );
            return Ok(());
        }

        let delta = self.run_bucket(&bucket).await;
        debug!(
            action = self.action_name,
            bucket = record.key(),
            processed = delta.processed,
            errors = delta.errors,
            "Bucket done"
        );
        let Some(status_stream) = ctx.outputs().first().cloned() else {
            anyhow::bail!("action computation '{}' has no status output", self.action_name);
        };
        ctx.produce(status_stream, StatusMessage::Delta(delta).to_record()?);
        Ok(())
    }

    async fn destroy(&mut self) {
        self.seen_buckets.clear();
    }
}

/// Keyed reducer folding status messages into one status per command id.
///
/// Per-key ordering on the status stream guarantees the init record is seen
/// before its deltas; every fold is materialized into the shared store, and
/// terminal statuses are additionally published on the done stream.
pub struct StatusComputation {
    store: Arc<StatusStore>,
    statuses: HashMap<Uuid, BulkStatus>,
}

impl StatusComputation {
    pub fn new(store: Arc<StatusStore>) -> Self {
        Self {
            store,
            statuses: HashMap::new(),
        }
    }

    fn publish_if_terminal(&self, ctx: &mut ComputationContext, status: &BulkStatus) {
        if !status.is_terminal() {
            return;
        }
        info!(
            command = %status.command_id,
            action = status.action,
            state = ?status.state,
            processed = status.processed,
            errors = status.errors,
            "Bulk command reached terminal state"
        );
        let Some(done_stream) = ctx.outputs().first().cloned() else {
            return;
        };
        match StatusMessage::Init(status.clone()).to_record() {
            Ok(record) => ctx.produce(done_stream, record),
            Err(err) => warn!(command = %status.command_id, error = %err,
                "Could not encode done record"),
        }
    }
}

#[async_trait]
impl Computation for StatusComputation {
    /// Re-seed the fold from the materialized view, so a replayed partition
    /// resumes from the last reduced state instead of dropping deltas.
    async fn init(&mut self, _ctx: &mut ComputationContext) {
        self.statuses = self.store.snapshot().await;
    }

    async fn process_record(
        &mut self,
        ctx: &mut ComputationContext,
        _input: &str,
        record: Record,
    ) -> anyhow::Result<()> {
        let Some(message) = StatusMessage::from_record(&record)? else {
            return Ok(());
        };
        match message {
            StatusMessage::Init(status) => {
                // A replayed init never resets an existing fold.
                let entry = self
                    .statuses
                    .entry(status.command_id)
                    .or_insert_with(|| status.clone());
                let snapshot = entry.clone();
                self.store.put(snapshot.clone()).await;
                self.publish_if_terminal(ctx, &snapshot);
            }
            StatusMessage::Delta(delta) => {
                let Some(status) = self.statuses.get_mut(&delta.command_id) else {
                    warn!(
                        command = %delta.command_id,
                        "Delta for unknown command, dropping"
                    );
                    return Ok(());
                };
                let was_terminal = status.is_terminal();
                status.apply_delta(&delta, now_millis());
                let snapshot = status.clone();
                self.store.put(snapshot.clone()).await;
                if !was_terminal {
                    self.publish_if_terminal(ctx, &snapshot);
                }
            }
            StatusMessage::Abort { command_id } => {
                let Some(status) = self.statuses.get_mut(&command_id) else {
                    warn!(command = %command_id, "Abort for unknown command, dropping");
                    return Ok(());
                };
                let was_terminal = status.is_terminal();
                status.abort(now_millis());
                let snapshot = status.clone();
                self.store.put(snapshot.clone()).await;
                if !was_terminal {
                    self.publish_if_terminal(ctx, &snapshot);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::NoopTransactionRunner;
    use crate::status::BulkState;
    use std::sync::Mutex;

    struct RecordingAction {
        applied: Arc<Mutex<Vec<String>>>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl BulkAction for RecordingAction {
        async fn apply(
            &self,
            id: &str,
            _params: &HashMap<String, String>,
        ) -> anyhow::Result<()> {
            if self.fail_on.as_deref() == Some(id) {
                anyhow::bail!("cannot touch {id}");
            }
            self.applied.lock().unwrap().push(id.to_string());
            Ok(())
        }
    }

    fn bucket_record(bucket: &BulkBucket, index: usize) -> Record {
        Record::of(
            BulkBucket::key(bucket.command_id, index),
            serde_json::to_vec(bucket).unwrap(),
        )
        .unwrap()
    }

    fn ctx() -> ComputationContext {
        ComputationContext::new("action-test", 0, vec!["bulk-status".to_string()])
    }

    fn delta_from(ctx: &mut ComputationContext) -> Option<StatusDelta> {
        let produced = ctx.take_produced();
        let (_, record) = produced.first()?;
        match StatusMessage::from_record(record).unwrap() {
            Some(StatusMessage::Delta(delta)) => Some(delta),
            other => panic!("expected delta, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_bucket_applies_every_id() {
        let applied = Arc::new(Mutex::new(Vec::new()));
        let mut computation = BulkActionComputation::new(
            "noop",
            Arc::new(RecordingAction {
                applied: Arc::clone(&applied),
                fail_on: None,
            }),
            Arc::new(NoopTransactionRunner),
            Arc::new(StatusStore::new()),
        );
        let bucket = BulkBucket {
            command_id: Uuid::new_v4(),
            ids: vec!["a".into(), "b".into(), "c".into()],
            params: HashMap::new(),
        };
        let mut ctx = ctx();
        computation
            .process_record(&mut ctx, "bulk-noop", bucket_record(&bucket, 0))
            .await
            .unwrap();

        let delta = delta_from(&mut ctx).unwrap();
        assert_eq!(delta.processed, 3);
        assert_eq!(delta.errors, 0);
        assert_eq!(*applied.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_failing_id_does_not_abort_bucket() {
        let applied = Arc::new(Mutex::new(Vec::new()));
        let mut computation = BulkActionComputation::new(
            "noop",
            Arc::new(RecordingAction {
                applied: Arc::clone(&applied),
                fail_on: Some("b".to_string()),
            }),
            Arc::new(NoopTransactionRunner),
            Arc::new(StatusStore::new()),
        );
        let bucket = BulkBucket {
            command_id: Uuid::new_v4(),
            ids: vec!["a".into(), "b".into(), "c".into()],
            params: HashMap::new(),
        };
        let mut ctx = ctx();
        computation
            .process_record(&mut ctx, "bulk-noop", bucket_record(&bucket, 0))
            .await
            .unwrap();

        let delta = delta_from(&mut ctx).unwrap();
        assert_eq!(delta.processed, 2);
        assert_eq!(delta.errors, 1);
        assert!(delta.error_message.unwrap().contains("b"));
        assert_eq!(*applied.lock().unwrap(), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_replayed_bucket_is_deduped() {
        let applied = Arc::new(Mutex::new(Vec::new()));
        let mut computation = BulkActionComputation::new(
            "noop",
            Arc::new(RecordingAction {
                applied: Arc::clone(&applied),
                fail_on: None,
            }),
            Arc::new(NoopTransactionRunner),
            Arc::new(StatusStore::new()),
        );
        let bucket = BulkBucket {
            command_id: Uuid::new_v4(),
            ids: vec!["a".into(), "b".into()],
            params: HashMap::new(),
        };

        let mut ctx = ctx();
        computation
            .process_record(&mut ctx, "bulk-noop", bucket_record(&bucket, 0))
            .await
            .unwrap();
        assert_eq!(delta_from(&mut ctx).unwrap().processed, 2);

        // Same record key again, as a crash-before-commit replay would
        // deliver it: no second application, no second delta.
        computation
            .process_record(&mut ctx, "bulk-noop", bucket_record(&bucket, 0))
            .await
            .unwrap();
        assert!(ctx.take_produced().is_empty());
        assert_eq!(applied.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_aborted_command_skips_remaining_ids() {
        let store = Arc::new(StatusStore::new());
        let command_id = Uuid::new_v4();
        let mut aborted = BulkStatus::scheduled(command_id, "noop", "system", 10, 0);
        aborted.abort(1);
        store.put(aborted).await;

        let applied = Arc::new(Mutex::new(Vec::new()));
        let mut computation = BulkActionComputation::new(
            "noop",
            Arc::new(RecordingAction {
                applied: Arc::clone(&applied),
                fail_on: None,
            }),
            Arc::new(NoopTransactionRunner),
            Arc::clone(&store),
        );
        let bucket = BulkBucket {
            command_id,
            ids: vec!["a".into(), "b".into()],
            params: HashMap::new(),
        };
        let mut ctx = ctx();
        computation
            .process_record(&mut ctx, "bulk-noop", bucket_record(&bucket, 0))
            .await
            .unwrap();

        let delta = delta_from(&mut ctx).unwrap();
        assert_eq!(delta.processed, 0);
        assert_eq!(delta.errors, 0);
        assert!(applied.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_reduction_end_to_end() {
        let store = Arc::new(StatusStore::new());
        let mut reducer = StatusComputation::new(Arc::clone(&store));
        let mut ctx =
            ComputationContext::new("status", 0, vec!["bulk-done".to_string()]);
        reducer.init(&mut ctx).await;

        let command_id = Uuid::new_v4();
        let init = BulkStatus::scheduled(command_id, "noop", "system", 3, 0);
        reducer
            .process_record(
                &mut ctx,
                "bulk-status",
                StatusMessage::Init(init).to_record().unwrap(),
            )
            .await
            .unwrap();
        assert!(ctx.take_produced().is_empty());
        assert_eq!(
            store.get(command_id).await.unwrap().state,
            BulkState::Scheduled
        );

        let delta = StatusDelta {
            command_id,
            processed: 3,
            errors: 0,
            error_message: None,
        };
        reducer
            .process_record(
                &mut ctx,
                "bulk-status",
                StatusMessage::Delta(delta).to_record().unwrap(),
            )
            .await
            .unwrap();

        let status = store.get(command_id).await.unwrap();
        assert_eq!(status.state, BulkState::Completed);
        assert_eq!(status.processed, 3);
        // The terminal status went out on the done stream.
        let produced = ctx.take_produced();
        assert_eq!(produced.len(), 1);
        assert_eq!(produced[0].0, "bulk-done");
    }
}
