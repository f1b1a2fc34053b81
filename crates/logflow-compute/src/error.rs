//! Error types for topology construction and processor execution.
//!
//! ## Error Categories
//!
//! ### Build Errors (fatal, raised before anything starts)
//! A topology that fails validation never runs: no computation is
//! instantiated, no stream is touched. These are programming errors, not
//! operational ones, and are never retried.
//!
//! ### Processor Errors (runtime)
//! - `ComputationFailed`: a fault escaped `process_record` or `checkpoint`
//!   (an `Err` or a panic). The owning (computation, partition) is stopped,
//!   its uncommitted batch is left for replay, and the fault is reported with
//!   the record-processing path that led to it.
//! - `UndeclaredOutput`: a computation produced to a stream it never declared.
//! - `Log`: a transport failure that survived the internal retry policy.

use std::fmt;

use logflow_log::LogError;
use thiserror::Error;

/// Fatal topology-validation failure.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Empty {0} name")]
    EmptyName(&'static str),

    #[error("Duplicate stream '{0}'")]
    DuplicateStream(String),

    #[error("Duplicate computation '{0}'")]
    DuplicateComputation(String),

    #[error("Computation '{computation}' references undeclared stream '{stream}'")]
    UnknownStream {
        computation: String,
        stream: String,
    },

    #[error("Topology is not a DAG, cycle through: {0}")]
    Cycle(String),
}

/// One step of the causal path that led to a computation fault.
#[derive(Debug, Clone)]
pub enum PathFrame {
    /// A record dispatched from an input stream.
    Dispatch {
        input: String,
        offset: u64,
        key: String,
    },
    /// A record the computation produced while handling the dispatch.
    Produce { output: String, key: String },
}

impl fmt::Display for PathFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathFrame::Dispatch { input, offset, key } => {
                write!(f, "{input}@{offset} key={key}")
            }
            PathFrame::Produce { output, key } => {
                write!(f, "produce {output} key={key}")
            }
        }
    }
}

/// The full record-processing path reported with a computation fault, so a
/// failure on a forwarded record can be traced back to the record that
/// triggered it.
#[derive(Debug, Clone, Default)]
pub struct RecordPath {
    pub frames: Vec<PathFrame>,
}

impl fmt::Display for RecordPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.frames.is_empty() {
            return write!(f, "<no record in flight>");
        }
        let mut first = true;
        for frame in &self.frames {
            if !first {
                write!(f, " -> ")?;
            }
            write!(f, "{frame}")?;
            first = false;
        }
        Ok(())
    }
}

/// Runtime failure inside the processor.
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Computation '{computation}' partition {partition} failed at [{path}]: {source}")]
    ComputationFailed {
        computation: String,
        partition: u32,
        path: RecordPath,
        #[source]
        source: anyhow::Error,
    },

    #[error("Computation '{computation}' produced to undeclared output '{output}'")]
    UndeclaredOutput {
        computation: String,
        output: String,
    },

    #[error("Log error: {0}")]
    Log(#[from] LogError),
}

pub type Result<T> = std::result::Result<T, ProcessorError>;
