//! Computation Model
//!
//! A computation is a stateful processing unit bound to input and output
//! streams. The processor instantiates one per assigned partition, feeds it
//! records one at a time in per-partition order, and calls it back at every
//! batch boundary.
//!
//! ## Lifecycle
//!
//! 1. **init**: called once per partition, before any record. Allocate state
//!    here; sources may also produce their first records here.
//! 2. **process_record**: called for every record pulled from a bound input,
//!    including force-batch control records (their payload carries no
//!    meaning). Emit downstream records with [`ComputationContext::produce`];
//!    they are appended to the output streams after the callback returns.
//! 3. **checkpoint**: called at each batch boundary, right before the input
//!    offsets consumed since the previous boundary are committed. Flush any
//!    buffered state here - after this returns, the batch is the unit of
//!    replay.
//! 4. **destroy**: called when the partition drains (poison) or the processor
//!    stops. Never runs concurrently with a later `init` for the same
//!    partition.
//!
//! ## Contract
//!
//! Offset commit is the only at-least-once anchor: a crash between
//! `process_record` and the commit replays the uncommitted records, so
//! computations must be idempotent or dedupe on the record key.

use async_trait::async_trait;
use logflow_core::Record;
use std::sync::Arc;

/// Per-invocation context handed to every computation callback.
///
/// Buffers produced records; the processor drains the buffer after each
/// callback and appends the records to the declared output streams.
pub struct ComputationContext {
    computation: String,
    partition: u32,
    outputs: Vec<String>,
    produced: Vec<(String, Record)>,
}

impl ComputationContext {
    /// Build a standalone context.
    ///
    /// The processor builds one per worker; building one directly is the way
    /// to drive a computation in unit tests.
    pub fn new(computation: &str, partition: u32, outputs: Vec<String>) -> Self {
        Self {
            computation: computation.to_string(),
            partition,
            outputs,
            produced: Vec::new(),
        }
    }

    /// Emit a record onto `output`.
    ///
    /// The record is buffered and appended once the current callback returns;
    /// producing to a stream the computation never declared stops the
    /// partition with an `UndeclaredOutput` fault.
    pub fn produce(&mut self, output: impl Into<String>, record: Record) {
        self.produced.push((output.into(), record));
    }

    /// Name of the computation this context belongs to.
    pub fn computation(&self) -> &str {
        &self.computation
    }

    /// Partition this instance is bound to.
    pub fn partition(&self) -> u32 {
        self.partition
    }

    /// Output streams declared for this computation, in declaration order.
    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    /// Drain the records buffered by the last callback, in emission order.
    pub fn take_produced(&mut self) -> Vec<(String, Record)> {
        std::mem::take(&mut self.produced)
    }
}

/// A stateful per-partition processing unit.
///
/// Implementations fail by returning `Err`; the processor also catches
/// panics. Either way the owning (computation, partition) is stopped and the
/// fault is reported with its record-processing path.
#[async_trait]
pub trait Computation: Send {
    /// Allocate internal state. Called once per partition before any record.
    async fn init(&mut self, _ctx: &mut ComputationContext) {}

    /// Handle one record pulled from `input`, in per-partition order.
    async fn process_record(
        &mut self,
        ctx: &mut ComputationContext,
        input: &str,
        record: Record,
    ) -> anyhow::Result<()>;

    /// Batch-boundary callback, invoked right before offsets commit.
    async fn checkpoint(&mut self, _ctx: &mut ComputationContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Release internal state. Always the last call on an instance.
    async fn destroy(&mut self) {}
}

/// Factory producing a fresh computation instance per (partition) worker.
pub type ComputationFactory = Arc<dyn Fn() -> Box<dyn Computation> + Send + Sync>;

/// Wrap a closure as a [`ComputationFactory`].
pub fn factory<F>(f: F) -> ComputationFactory
where
    F: Fn() -> Box<dyn Computation> + Send + Sync + 'static,
{
    Arc::new(f)
}
