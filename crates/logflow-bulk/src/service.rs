//! Bulk Service
//!
//! The programmatic entry point of the bulk layer: submit a command, poll or
//! wait for its aggregated status, abort it cooperatively.
//!
//! ## Wiring
//!
//! The builder assembles one topology from the registered actions:
//!
//! ```text
//!                     bulk-<action-a> ──> action-<action-a> ─┐
//!  submit() ──buckets─> bulk-<action-b> ──> action-<action-b> ─┼─> bulk-status
//!       │                                                      │       │
//!       └──────────────── init status ─────────────────────────┘   status (keyed
//!                                                                   reducer)
//!                                                                       │
//!                                                                   bulk-done
//! ```
//!
//! `submit` never blocks on completion: it expands the selector into bucket
//! records, appends them, and returns the fresh command id. Everything after
//! that flows through the engine.
//!
//! ## Example
//!
//! ```ignore
//! let mut service = BulkService::builder()
//!     .log_manager(log)
//!     .selector(selector)
//!     .register_action("reindex", action_factory(|| Arc::new(Reindex::new())))
//!     .build()?;
//! service.start().await?;
//!
//! let command = BulkCommand::builder("reindex", "SELECT * FROM Document")
//!     .username("admin")
//!     .bucket_size(50)
//!     .build();
//! let id = service.submit(command).await?;
//! let status = service.wait_for_completion(id, Duration::from_secs(60)).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use logflow_compute::{factory, ProcessorSettings, StreamProcessor, Topology};
use logflow_core::Record;
use logflow_log::{produce, LogError, LogManager, RetryPolicy};
use tracing::{debug, info};
use uuid::Uuid;

use crate::action::{
    ActionRegistry, BulkActionFactory, DocumentSelector, NoopTransactionRunner,
    TransactionRunner,
};
use crate::command::{BulkBucket, BulkCommand, DEFAULT_BUCKET_SIZE};
use crate::computation::{BulkActionComputation, StatusComputation};
use crate::error::{BulkError, Result};
use crate::status::{now_millis, BulkStatus, StatusMessage, StatusStore};

/// Shared status stream every action computation writes deltas to.
pub const STATUS_STREAM: &str = "bulk-status";

/// Stream carrying one record per command that reached a terminal state.
pub const DONE_STREAM: &str = "bulk-done";

/// Dispatches bulk commands and serves their aggregated status.
pub struct BulkService {
    log: Arc<dyn LogManager>,
    selector: Arc<dyn DocumentSelector>,
    registry: ActionRegistry,
    store: Arc<StatusStore>,
    processor: StreamProcessor,
    bucket_size: usize,
    retry: RetryPolicy,
}

impl BulkService {
    pub fn builder() -> BulkServiceBuilder {
        BulkServiceBuilder::new()
    }

    /// Input stream name for an action.
    pub fn input_stream(action: &str) -> String {
        format!("bulk-{action}")
    }

    /// Start the underlying stream processor.
    pub async fn start(&mut self) -> Result<()> {
        self.processor.start().await?;
        Ok(())
    }

    /// Gracefully stop the underlying stream processor.
    pub async fn stop(&mut self) {
        self.processor.stop().await;
    }

    /// Validate, expand and dispatch a command. Returns the fresh command id
    /// without waiting for any processing.
    pub async fn submit(&self, command: BulkCommand) -> Result<Uuid> {
        if command.action().is_empty() {
            return Err(BulkError::InvalidCommand("action name is required".into()));
        }
        if command.query().trim().is_empty() {
            return Err(BulkError::InvalidCommand(
                "selector query is required".into(),
            ));
        }
        if !self.registry.contains(command.action()) {
            return Err(BulkError::UnknownAction(command.action().to_string()));
        }

        let ids = self
            .selector
            .query(command.query(), command.repository())
            .await
            .map_err(BulkError::Selector)?;

        let command_id = Uuid::new_v4();
        let total = ids.len() as u64;
        let now = now_millis();
        let status =
            BulkStatus::scheduled(command_id, command.action(), command.username(), total, now);

        // Seed the materialized view so the status is readable the moment
        // submit returns, then let the keyed reduction take over.
        self.store.put(status.clone()).await;
        produce(
            &self.log,
            STATUS_STREAM,
            StatusMessage::Init(status).to_record()?,
            &self.retry,
        )
        .await?;

        let bucket_size = command.bucket_size().unwrap_or(self.bucket_size).max(1);
        let stream = Self::input_stream(command.action());
        let mut buckets = 0;
        for (index, chunk) in ids.chunks(bucket_size).enumerate() {
            let bucket = BulkBucket {
                command_id,
                ids: chunk.to_vec(),
                params: command.params().clone(),
            };
            let record = Record::of(
                BulkBucket::key(command_id, index),
                serde_json::to_vec(&bucket)?,
            )
            .map_err(LogError::from)?;
            produce(&self.log, &stream, record, &self.retry).await?;
            buckets += 1;
        }

        info!(
            command = %command_id,
            action = command.action(),
            username = command.username(),
            total,
            buckets,
            bucket_size,
            "Bulk command submitted"
        );
        Ok(command_id)
    }

    /// Latest reduced status for a command.
    pub async fn get_status(&self, command_id: Uuid) -> Result<BulkStatus> {
        self.store
            .get(command_id)
            .await
            .ok_or(BulkError::CommandNotFound(command_id))
    }

    /// Cooperatively abort a command.
    ///
    /// The status flips to `Aborted` immediately (unless already terminal);
    /// bucket computations check the flag before each remaining id. An abort
    /// marker also goes through the status stream so the keyed reduction
    /// stays authoritative.
    pub async fn abort(&self, command_id: Uuid) -> Result<BulkStatus> {
        let now = now_millis();
        let status = self
            .store
            .update(command_id, |status| status.abort(now))
            .await
            .ok_or(BulkError::CommandNotFound(command_id))?;
        produce(
            &self.log,
            STATUS_STREAM,
            StatusMessage::Abort { command_id }.to_record()?,
            &self.retry,
        )
        .await?;
        debug!(command = %command_id, "Bulk command aborted");
        Ok(status)
    }

    /// Block until the command reaches a terminal state.
    pub async fn wait_for_completion(
        &self,
        command_id: Uuid,
        timeout: Duration,
    ) -> Result<BulkStatus> {
        if self.store.get(command_id).await.is_none() {
            return Err(BulkError::CommandNotFound(command_id));
        }
        self.store
            .wait_for_terminal(command_id, timeout)
            .await
            .ok_or(BulkError::Timeout(command_id))
    }

    /// Faults reported by the underlying processor since the last call.
    pub fn failures(&self) -> Vec<logflow_compute::ProcessorError> {
        self.processor.failures()
    }
}

/// Builder wiring the bulk service topology.
pub struct BulkServiceBuilder {
    log: Option<Arc<dyn LogManager>>,
    selector: Option<Arc<dyn DocumentSelector>>,
    transactions: Arc<dyn TransactionRunner>,
    registry: ActionRegistry,
    bucket_size: usize,
    input_partitions: u32,
    status_partitions: u32,
    settings: ProcessorSettings,
}

impl BulkServiceBuilder {
    pub fn new() -> Self {
        Self {
            log: None,
            selector: None,
            transactions: Arc::new(NoopTransactionRunner),
            registry: ActionRegistry::new(),
            bucket_size: DEFAULT_BUCKET_SIZE,
            input_partitions: 4,
            status_partitions: 1,
            settings: ProcessorSettings::default(),
        }
    }

    /// The log store to run on (required).
    pub fn log_manager(mut self, log: Arc<dyn LogManager>) -> Self {
        self.log = Some(log);
        self
    }

    /// The document-selector collaborator (required).
    pub fn selector(mut self, selector: Arc<dyn DocumentSelector>) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Per-bucket transaction collaborator (default: no-op).
    pub fn transaction_runner(mut self, transactions: Arc<dyn TransactionRunner>) -> Self {
        self.transactions = transactions;
        self
    }

    /// Register an action under `name`.
    pub fn register_action(mut self, name: impl Into<String>, action: BulkActionFactory) -> Self {
        self.registry.register(name, action);
        self
    }

    /// Default bucket size for commands that do not set one (default: 100).
    pub fn bucket_size(mut self, size: usize) -> Self {
        self.bucket_size = size.max(1);
        self
    }

    /// Partition count of each action input stream (default: 4).
    pub fn input_partitions(mut self, partitions: u32) -> Self {
        self.input_partitions = partitions.max(1);
        self
    }

    /// Partition count of the shared status stream (default: 1).
    pub fn status_partitions(mut self, partitions: u32) -> Self {
        self.status_partitions = partitions.max(1);
        self
    }

    /// Settings of the underlying stream processor.
    pub fn settings(mut self, settings: ProcessorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Assemble the topology and the service. The processor is not started;
    /// call [`BulkService::start`].
    pub fn build(self) -> Result<BulkService> {
        let log = self
            .log
            .ok_or_else(|| BulkError::Config("log_manager is required".into()))?;
        let selector = self
            .selector
            .ok_or_else(|| BulkError::Config("selector is required".into()))?;

        let store = Arc::new(StatusStore::new());

        let mut topology = Topology::builder()
            .add_stream(STATUS_STREAM, self.status_partitions)
            .add_stream(DONE_STREAM, 1);
        for action in self.registry.names() {
            let input = BulkService::input_stream(&action);
            topology = topology.add_stream(&input, self.input_partitions);

            let action_factory = match self.registry.get(&action) {
                Some(f) => Arc::clone(f),
                None => continue,
            };
            let transactions = Arc::clone(&self.transactions);
            let action_store = Arc::clone(&store);
            let name = action.clone();
            topology = topology.add_computation(
                format!("action-{action}"),
                factory(move || {
                    Box::new(BulkActionComputation::new(
                        name.clone(),
                        (action_factory)(),
                        Arc::clone(&transactions),
                        Arc::clone(&action_store),
                    ))
                }),
                [input],
                [STATUS_STREAM.to_string()],
            );
        }
        let reducer_store = Arc::clone(&store);
        topology = topology.add_computation(
            "status",
            factory(move || Box::new(StatusComputation::new(Arc::clone(&reducer_store)))),
            [STATUS_STREAM.to_string()],
            [DONE_STREAM.to_string()],
        );
        let topology = topology.build()?;

        let retry = self.settings.retry.clone();
        let processor = StreamProcessor::new(Arc::clone(&log), topology, self.settings);
        Ok(BulkService {
            log,
            selector,
            registry: self.registry,
            store,
            processor,
            bucket_size: self.bucket_size,
            retry,
        })
    }
}

impl Default for BulkServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
