//! Error types for the bulk layer.
//!
//! `InvalidCommand` and `UnknownAction` are returned synchronously by
//! `submit` before any state mutation; everything else wraps a lower layer.

use logflow_compute::{BuildError, ProcessorError};
use logflow_log::LogError;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, BulkError>;

#[derive(Debug, Error)]
pub enum BulkError {
    /// Required command fields are missing or empty.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// No action registered under this name. The registry is explicit and
    /// populated at startup; lookups fail fast.
    #[error("No action registered under '{0}'")]
    UnknownAction(String),

    /// No status known for this command id.
    #[error("Command {0} not found")]
    CommandNotFound(Uuid),

    /// The service was built with missing or inconsistent configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The document selector collaborator failed to evaluate the query.
    #[error("Selector failed: {0}")]
    Selector(#[source] anyhow::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Log error: {0}")]
    Log(#[from] LogError),

    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    #[error("Processor error: {0}")]
    Processor(#[from] ProcessorError),

    /// `wait_for_completion` gave up before the command reached a terminal
    /// state.
    #[error("Timed out waiting for command {0}")]
    Timeout(Uuid),
}
