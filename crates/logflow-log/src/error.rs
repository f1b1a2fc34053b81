//! Error types for log operations.
//!
//! ## Error Handling Strategy
//!
//! - **Retryable**: `StreamUnavailable` - the transport to the backing log
//!   failed; callers (or the `produce` helper) retry with backoff.
//! - **Caller errors**: `UnknownStream`, `InvalidPartition`, `StreamExists` -
//!   wrong name or partition, retrying cannot help.
//! - **Data errors**: `Codec` - a frame failed to decode, surfaced from
//!   `logflow-core`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LogError>;

#[derive(Debug, Error)]
pub enum LogError {
    /// The named stream has not been created.
    #[error("Stream '{0}' does not exist")]
    UnknownStream(String),

    /// A stream already exists with a different partition count.
    #[error("Stream '{0}' already exists with {1} partitions")]
    StreamExists(String, u32),

    /// Partition id out of range for the stream.
    #[error("Partition {0} does not exist for stream '{1}' (max: {2})")]
    InvalidPartition(u32, String, u32),

    /// The backing log transport cannot be reached. Retryable.
    #[error("Stream '{stream}' unavailable: {reason}")]
    StreamUnavailable { stream: String, reason: String },

    /// Record-level failure surfaced from the core codec.
    #[error("Codec error: {0}")]
    Codec(#[from] logflow_core::Error),
}

impl LogError {
    /// True when a retry with backoff may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LogError::StreamUnavailable { .. })
    }
}
