//! Produce Helper
//!
//! Key-routed append with transport retry. This is the one write path the
//! engine uses: the partition comes from the record key, and transient
//! `StreamUnavailable` failures are retried with backoff before surfacing.

use std::sync::Arc;

use logflow_core::Record;
use tracing::trace;

use crate::error::Result;
use crate::manager::LogManager;
use crate::retry::{retry_with_backoff, RetryPolicy};

/// Append `record` to `stream`, routed by key, retrying per `policy`.
///
/// Returns the offset assigned within the target partition.
pub async fn produce(
    log: &Arc<dyn LogManager>,
    stream: &str,
    record: Record,
    policy: &RetryPolicy,
) -> Result<u64> {
    let appender = retry_with_backoff(policy, || {
        let log = Arc::clone(log);
        let stream = stream.to_string();
        async move { log.appender(&stream).await }
    })
    .await?;

    let key = record.key().to_string();
    let offset = retry_with_backoff(policy, || {
        let appender = Arc::clone(&appender);
        let record = record.clone();
        async move { appender.append_by_key(record).await }
    })
    .await?;
    trace!(stream, key, offset, "Produced record");
    Ok(offset)
}
