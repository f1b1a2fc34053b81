//! Stream Processor
//!
//! The runtime that drives a validated topology: one tokio task per
//! (computation, partition), pulling records from the bound input streams in
//! per-partition order, dispatching them to the computation, and committing
//! input offsets at batch boundaries.
//!
//! ## Execution state machine
//!
//! Each (computation, partition) worker moves through
//! `Idle -> Running -> Draining -> Stopped`:
//!
//! - **Idle**: spawned, `init` not yet complete.
//! - **Running**: the steady loop. Inputs are polled round-robin with a
//!   bounded read timeout; an empty partition parks only its own worker.
//! - **Draining**: a poison record arrived, or a graceful stop was requested;
//!   the in-flight batch is finished before anything else happens.
//! - **Stopped**: no further records are pulled until an explicit restart.
//!
//! ## Batch boundaries
//!
//! A boundary fires when the batch reaches `batch_capacity` records, when a
//! non-empty batch grows older than `batch_threshold`, or immediately after a
//! record carrying the force-batch flag - the force flag always wins over
//! threshold state, which lets a producer guarantee "everything up to here is
//! flushed together" without knowing the consumer's batching policy. At every
//! boundary the worker calls `checkpoint()` on the computation, appends
//! whatever it produced, and only then commits the input offsets consumed
//! since the previous boundary. That commit is the sole at-least-once anchor:
//! a crash before it replays the whole batch.
//!
//! ## Poison
//!
//! A poison record is not dispatched to the computation. The worker finishes
//! its in-flight batch (checkpoint + commit, which also covers the poison
//! record's own offset), destroys the computation, forwards the poison record
//! unchanged to every declared output so downstream partitions shut down in
//! causal order, and stops.
//!
//! ## Faults
//!
//! An `Err` or a panic escaping `process_record`/`checkpoint` stops the
//! owning (computation, partition) without committing the current batch, and
//! is reported through [`StreamProcessor::failures`] together with the
//! record-processing path that led to it. Other partitions keep running.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use logflow_core::Record;
use logflow_log::{produce, LogManager, LogRecord, LogTailer};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::computation::{Computation, ComputationContext};
use crate::error::{PathFrame, ProcessorError, RecordPath, Result};
use crate::settings::ProcessorSettings;
use crate::topology::Topology;

/// Lifecycle state of one (computation, partition) worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Running,
    Draining,
    Stopped,
}

struct WorkerStatus {
    state: AtomicU8,
    idle: AtomicBool,
}

impl WorkerStatus {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(WorkerState::Idle as u8),
            idle: AtomicBool::new(false),
        }
    }

    fn set(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn get(&self) -> WorkerState {
        match self.state.load(Ordering::SeqCst) {
            0 => WorkerState::Idle,
            1 => WorkerState::Running,
            2 => WorkerState::Draining,
            _ => WorkerState::Stopped,
        }
    }

    fn set_idle(&self, idle: bool) {
        self.idle.store(idle, Ordering::SeqCst);
    }

    fn is_idle(&self) -> bool {
        self.idle.load(Ordering::SeqCst)
    }
}

struct WorkerHandle {
    computation: String,
    partition: u32,
    status: Arc<WorkerStatus>,
    join: JoinHandle<()>,
}

/// Drives a topology against a log manager.
pub struct StreamProcessor {
    log: Arc<dyn LogManager>,
    topology: Arc<Topology>,
    settings: ProcessorSettings,
    workers: Vec<WorkerHandle>,
    shutdown: Option<watch::Sender<bool>>,
    failures: Arc<Mutex<Vec<ProcessorError>>>,
}

impl StreamProcessor {
    pub fn new(log: Arc<dyn LogManager>, topology: Topology, settings: ProcessorSettings) -> Self {
        Self {
            log,
            topology: Arc::new(topology),
            settings,
            workers: Vec::new(),
            shutdown: None,
            failures: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create every declared stream and spawn one worker per
    /// (computation, partition). Returns once all workers are spawned.
    pub async fn start(&mut self) -> Result<()> {
        if self.shutdown.is_some() {
            return Ok(());
        }
        for stream in self.topology.streams() {
            self.log
                .create_stream(stream.name(), stream.partitions())
                .await?;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        for def in self.topology.computations() {
            // A worker per partition of the widest input; workers tail the
            // matching partition of every input that has one. Computations
            // without inputs get a single worker driven by init only.
            let worker_count = def
                .inputs()
                .iter()
                .filter_map(|input| self.topology.stream(input))
                .map(|s| s.partitions())
                .max()
                .unwrap_or(1);

            for partition in 0..worker_count {
                let mut tailers = Vec::new();
                for input in def.inputs() {
                    let partitions = self
                        .topology
                        .stream(input)
                        .map(|s| s.partitions())
                        .unwrap_or(0);
                    if partition < partitions {
                        tailers.push(self.log.tailer(def.name(), input, partition).await?);
                    }
                }

                let status = Arc::new(WorkerStatus::new());
                let worker = Worker {
                    name: def.name().to_string(),
                    partition,
                    outputs: def.outputs().to_vec(),
                    computation: def.instantiate(),
                    ctx: ComputationContext::new(def.name(), partition, def.outputs().to_vec()),
                    tailers,
                    log: Arc::clone(&self.log),
                    settings: self.settings.clone(),
                    status: Arc::clone(&status),
                    shutdown: shutdown_rx.clone(),
                    failures: Arc::clone(&self.failures),
                    batch_count: 0,
                    batch_started: None,
                };
                self.workers.push(WorkerHandle {
                    computation: def.name().to_string(),
                    partition,
                    status,
                    join: tokio::spawn(worker.run()),
                });
            }
        }
        self.shutdown = Some(shutdown_tx);
        info!(
            computations = self.topology.computations().len(),
            workers = self.workers.len(),
            "Stream processor started"
        );
        Ok(())
    }

    /// Graceful stop: every worker finishes its in-flight batch
    /// (checkpoint + commit), destroys its computation and stops.
    pub async fn stop(&mut self) {
        let Some(shutdown) = self.shutdown.take() else {
            return;
        };
        let _ = shutdown.send(true);
        for handle in self.workers.drain(..) {
            if let Err(err) = handle.join.await {
                warn!(
                    computation = handle.computation,
                    partition = handle.partition,
                    error = %err,
                    "Worker task ended abnormally"
                );
            }
        }
        info!("Stream processor stopped");
    }

    /// Wait until every worker has consumed and committed its assigned
    /// partitions to the end of the log, then stop.
    ///
    /// Returns `false` when the timeout elapsed first (the processor is
    /// stopped either way).
    pub async fn drain_and_stop(&mut self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_drained().await? {
                self.stop().await;
                return Ok(true);
            }
            if Instant::now() >= deadline {
                warn!("Timed out draining stream processor");
                self.stop().await;
                return Ok(false);
            }
            sleep(Duration::from_millis(20)).await;
        }
    }

    /// Wait until every worker has finished `init` and entered its loop.
    pub async fn wait_for_assignments(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self
                .workers
                .iter()
                .all(|w| w.status.get() != WorkerState::Idle)
            {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(Duration::from_millis(10)).await;
        }
    }

    /// Records appended to `computation`'s inputs but not yet committed by
    /// it, summed over input streams and partitions.
    pub async fn lag(&self, computation: &str) -> Result<u64> {
        let Some(def) = self.topology.computation(computation) else {
            return Ok(0);
        };
        let mut total = 0;
        for input in def.inputs() {
            total += self.log.lag(computation, input).await?.lag();
        }
        Ok(total)
    }

    /// Drain the faults reported by stopped workers since the last call.
    pub fn failures(&self) -> Vec<ProcessorError> {
        let mut guard = self
            .failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::take(&mut *guard)
    }

    /// Current state of one (computation, partition) worker.
    pub fn worker_state(&self, computation: &str, partition: u32) -> Option<WorkerState> {
        self.workers
            .iter()
            .find(|w| w.computation == computation && w.partition == partition)
            .map(|w| w.status.get())
    }

    async fn is_drained(&self) -> Result<bool> {
        for handle in &self.workers {
            let state = handle.status.get();
            if state == WorkerState::Stopped {
                continue;
            }
            if state != WorkerState::Running || !handle.status.is_idle() {
                return Ok(false);
            }
        }
        for def in self.topology.computations() {
            for input in def.inputs() {
                if self.log.lag(def.name(), input).await?.lag() > 0 {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

enum LoopOutcome {
    Shutdown,
    Poisoned(Record),
    Failed(ProcessorError),
}

struct Worker {
    name: String,
    partition: u32,
    outputs: Vec<String>,
    computation: Box<dyn Computation>,
    ctx: ComputationContext,
    tailers: Vec<Box<dyn LogTailer>>,
    log: Arc<dyn LogManager>,
    settings: ProcessorSettings,
    status: Arc<WorkerStatus>,
    shutdown: watch::Receiver<bool>,
    failures: Arc<Mutex<Vec<ProcessorError>>>,
    batch_count: usize,
    batch_started: Option<Instant>,
}

impl Worker {
    async fn run(mut self) {
        debug!(
            computation = self.name,
            partition = self.partition,
            inputs = self.tailers.len(),
            "Worker starting"
        );

        let init = AssertUnwindSafe(self.computation.init(&mut self.ctx))
            .catch_unwind()
            .await;
        if let Err(payload) = init {
            self.fail(ProcessorError::ComputationFailed {
                computation: self.name.clone(),
                partition: self.partition,
                path: RecordPath::default(),
                source: anyhow::anyhow!("init panicked: {}", panic_message(payload)),
            })
            .await;
            return;
        }
        if let Err(err) = self.flush_produced(None).await {
            self.fail(err).await;
            return;
        }
        self.status.set(WorkerState::Running);

        if self.tailers.is_empty() {
            // Nothing to pull: park until shutdown.
            self.status.set_idle(true);
            while !*self.shutdown.borrow() {
                if self.shutdown.changed().await.is_err() {
                    break;
                }
            }
            self.finish_graceful().await;
            return;
        }

        match self.run_loop().await {
            LoopOutcome::Shutdown => self.finish_graceful().await,
            LoopOutcome::Poisoned(poison) => self.finish_poisoned(poison).await,
            LoopOutcome::Failed(err) => self.fail(err).await,
        }
    }

    async fn run_loop(&mut self) -> LoopOutcome {
        loop {
            if *self.shutdown.borrow() {
                return LoopOutcome::Shutdown;
            }
            let mut progressed = false;
            for i in 0..self.tailers.len() {
                if *self.shutdown.borrow() {
                    return LoopOutcome::Shutdown;
                }
                match self.tailers[i].read(self.settings.read_timeout).await {
                    Ok(Some(log_record)) => {
                        progressed = true;
                        let input = self.tailers[i].stream().to_string();
                        if log_record.record.is_poison() {
                            info!(
                                computation = self.name,
                                partition = self.partition,
                                input,
                                "Poison record received, draining"
                            );
                            return LoopOutcome::Poisoned(log_record.record);
                        }
                        if let Err(err) = self.dispatch(&input, log_record).await {
                            return LoopOutcome::Failed(err);
                        }
                    }
                    Ok(None) => {}
                    Err(err) if err.is_retryable() => {
                        warn!(
                            computation = self.name,
                            partition = self.partition,
                            error = %err,
                            "Transient read failure, backing off"
                        );
                        sleep(self.settings.retry.initial_backoff).await;
                    }
                    Err(err) => return LoopOutcome::Failed(err.into()),
                }
            }
            if self.batch_due() {
                if let Err(err) = self.boundary().await {
                    return LoopOutcome::Failed(err);
                }
            }
            self.status
                .set_idle(!progressed && self.batch_count == 0);
        }
    }

    /// Dispatch one record, append what it produced, and close the batch if
    /// the record forced a boundary or filled the batch.
    async fn dispatch(&mut self, input: &str, log_record: LogRecord) -> Result<()> {
        let frame = PathFrame::Dispatch {
            input: input.to_string(),
            offset: log_record.offset,
            key: log_record.record.key().to_string(),
        };
        let force = log_record.record.is_force_batch();

        let outcome = AssertUnwindSafe(self.computation.process_record(
            &mut self.ctx,
            input,
            log_record.record,
        ))
        .catch_unwind()
        .await;
        let outcome = match outcome {
            Ok(result) => result,
            Err(payload) => Err(anyhow::anyhow!("panicked: {}", panic_message(payload))),
        };
        if let Err(source) = outcome {
            return Err(ProcessorError::ComputationFailed {
                computation: self.name.clone(),
                partition: self.partition,
                path: RecordPath {
                    frames: vec![frame],
                },
                source,
            });
        }

        self.flush_produced(Some(&frame)).await?;

        if self.batch_count == 0 {
            self.batch_started = Some(Instant::now());
        }
        self.batch_count += 1;

        if force || self.batch_count >= self.settings.batch_capacity {
            self.boundary().await?;
        }
        Ok(())
    }

    fn batch_due(&self) -> bool {
        match self.batch_started {
            Some(started) if self.batch_count > 0 => {
                started.elapsed() >= self.settings.batch_threshold
            }
            _ => false,
        }
    }

    /// Batch boundary: checkpoint the computation, append what it flushed,
    /// then commit every input offset consumed since the last boundary.
    async fn boundary(&mut self) -> Result<()> {
        debug!(
            computation = self.name,
            partition = self.partition,
            records = self.batch_count,
            "Batch boundary"
        );
        let outcome = AssertUnwindSafe(self.computation.checkpoint(&mut self.ctx))
            .catch_unwind()
            .await;
        let outcome = match outcome {
            Ok(result) => result,
            Err(payload) => Err(anyhow::anyhow!("panicked: {}", panic_message(payload))),
        };
        if let Err(source) = outcome {
            return Err(ProcessorError::ComputationFailed {
                computation: self.name.clone(),
                partition: self.partition,
                path: RecordPath::default(),
                source,
            });
        }
        self.flush_produced(None).await?;

        for tailer in &mut self.tailers {
            let mut attempt = 0;
            loop {
                match tailer.commit().await {
                    Ok(()) => break,
                    Err(err)
                        if err.is_retryable() && attempt < self.settings.retry.max_retries =>
                    {
                        let backoff = self.settings.retry.backoff_for(attempt);
                        warn!(
                            computation = self.name,
                            partition = self.partition,
                            error = %err,
                            "Retrying offset commit"
                        );
                        sleep(backoff).await;
                        attempt += 1;
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }
        self.batch_count = 0;
        self.batch_started = None;
        Ok(())
    }

    /// Append the records buffered by the last computation callback to their
    /// output streams.
    async fn flush_produced(&mut self, origin: Option<&PathFrame>) -> Result<()> {
        for (output, record) in self.ctx.take_produced() {
            if !self.outputs.contains(&output) {
                return Err(ProcessorError::UndeclaredOutput {
                    computation: self.name.clone(),
                    output,
                });
            }
            let key = record.key().to_string();
            if let Err(err) =
                produce(&self.log, &output, record, &self.settings.retry).await
            {
                // Trace the failed forward back to the record that caused it.
                let mut frames = Vec::new();
                if let Some(origin) = origin {
                    frames.push(origin.clone());
                }
                frames.push(PathFrame::Produce {
                    output: output.clone(),
                    key,
                });
                return Err(ProcessorError::ComputationFailed {
                    computation: self.name.clone(),
                    partition: self.partition,
                    path: RecordPath { frames },
                    source: anyhow::Error::new(err),
                });
            }
        }
        Ok(())
    }

    /// Shutdown path: finish the in-flight batch, then destroy.
    async fn finish_graceful(&mut self) {
        self.status.set(WorkerState::Draining);
        if self.batch_count > 0 {
            if let Err(err) = self.boundary().await {
                self.fail(err).await;
                return;
            }
        }
        let _ = AssertUnwindSafe(self.computation.destroy())
            .catch_unwind()
            .await;
        self.status.set(WorkerState::Stopped);
        debug!(
            computation = self.name,
            partition = self.partition,
            "Worker stopped"
        );
    }

    /// Poison path: finish the in-flight batch (the commit also covers the
    /// poison record's offset), destroy, then forward the poison record
    /// unchanged to every declared output so downstream partitions drain in
    /// causal order.
    async fn finish_poisoned(&mut self, poison: Record) {
        self.status.set(WorkerState::Draining);
        if let Err(err) = self.boundary().await {
            self.fail(err).await;
            return;
        }
        let _ = AssertUnwindSafe(self.computation.destroy())
            .catch_unwind()
            .await;
        for output in self.outputs.clone() {
            if let Err(err) =
                produce(&self.log, &output, poison.clone(), &self.settings.retry).await
            {
                error!(
                    computation = self.name,
                    partition = self.partition,
                    output,
                    error = %err,
                    "Failed to forward poison record"
                );
                self.report(ProcessorError::Log(err));
            }
        }
        self.status.set(WorkerState::Stopped);
        info!(
            computation = self.name,
            partition = self.partition,
            "Worker drained after poison record"
        );
    }

    /// Fault path: report, destroy best-effort, stop without committing so
    /// the uncommitted batch replays on restart.
    async fn fail(&mut self, err: ProcessorError) {
        error!(
            computation = self.name,
            partition = self.partition,
            error = %err,
            "Worker stopped on failure"
        );
        self.report(err);
        let _ = AssertUnwindSafe(self.computation.destroy())
            .catch_unwind()
            .await;
        self.status.set(WorkerState::Stopped);
    }

    fn report(&self, err: ProcessorError) {
        let mut guard = self
            .failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.push(err);
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
