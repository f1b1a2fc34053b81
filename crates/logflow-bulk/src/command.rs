//! Bulk Command
//!
//! A bulk command names an action, a document selector query and the
//! parameters the action needs. Submitting one expands the selector into a
//! bounded set of target-id buckets, each pushed as one record onto the
//! action's input stream.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default maximum number of target ids per bucket.
pub const DEFAULT_BUCKET_SIZE: usize = 100;

/// An immutable description of bulk work to run over a document corpus.
///
/// Built with [`BulkCommand::builder`]; the command id is assigned by the
/// service at submit time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkCommand {
    action: String,
    query: String,
    username: String,
    repository: String,
    params: HashMap<String, String>,
    bucket_size: Option<usize>,
}

impl BulkCommand {
    pub fn builder(action: impl Into<String>, query: impl Into<String>) -> BulkCommandBuilder {
        BulkCommandBuilder {
            action: action.into(),
            query: query.into(),
            username: "system".to_string(),
            repository: "default".to_string(),
            params: HashMap::new(),
            bucket_size: None,
        }
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    /// Bucket size for this command, or the service default.
    pub fn bucket_size(&self) -> Option<usize> {
        self.bucket_size
    }
}

/// Fluent builder for [`BulkCommand`].
///
/// Validation happens at submit time, not here: `submit` is the synchronous
/// boundary that rejects invalid commands.
#[derive(Debug, Clone)]
pub struct BulkCommandBuilder {
    action: String,
    query: String,
    username: String,
    repository: String,
    params: HashMap<String, String>,
    bucket_size: Option<usize>,
}

impl BulkCommandBuilder {
    /// User on whose behalf the command runs (default: "system").
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    /// Repository the selector query runs against (default: "default").
    pub fn repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = repository.into();
        self
    }

    /// Add one action parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Replace all action parameters.
    pub fn params(mut self, params: HashMap<String, String>) -> Self {
        self.params = params;
        self
    }

    /// Maximum target ids per bucket; values below 1 are ignored.
    pub fn bucket_size(mut self, size: usize) -> Self {
        if size >= 1 {
            self.bucket_size = Some(size);
        }
        self
    }

    pub fn build(self) -> BulkCommand {
        BulkCommand {
            action: self.action,
            query: self.query,
            username: self.username,
            repository: self.repository,
            params: self.params,
            bucket_size: self.bucket_size,
        }
    }
}

/// One bucket of target ids, carried as the JSON payload of a bucket record.
///
/// The record key is `"<command_id>#<bucket_index>"`, which both spreads
/// buckets over the action stream's partitions and gives replayed buckets a
/// stable identity to dedupe on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkBucket {
    pub command_id: Uuid,
    pub ids: Vec<String>,
    pub params: HashMap<String, String>,
}

impl BulkBucket {
    /// Record key for bucket `index` of `command_id`.
    pub fn key(command_id: Uuid, index: usize) -> String {
        format!("{command_id}#{index}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let command = BulkCommand::builder("reindex", "SELECT * FROM Document").build();
        assert_eq!(command.action(), "reindex");
        assert_eq!(command.username(), "system");
        assert_eq!(command.repository(), "default");
        assert_eq!(command.bucket_size(), None);
    }

    #[test]
    fn test_zero_bucket_size_ignored() {
        let command = BulkCommand::builder("a", "q").bucket_size(0).build();
        assert_eq!(command.bucket_size(), None);
    }

    #[test]
    fn test_bucket_key_format() {
        let id = Uuid::nil();
        assert_eq!(
            BulkBucket::key(id, 3),
            "00000000-0000-0000-0000-000000000000#3"
        );
    }

    #[test]
    fn test_bucket_json_roundtrip() {
        let bucket = BulkBucket {
            command_id: Uuid::new_v4(),
            ids: vec!["doc-1".into(), "doc-2".into()],
            params: HashMap::from([("force".to_string(), "true".to_string())]),
        };
        let json = serde_json::to_vec(&bucket).unwrap();
        let back: BulkBucket = serde_json::from_slice(&json).unwrap();
        assert_eq!(back, bucket);
    }
}
