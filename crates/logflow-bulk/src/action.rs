//! Bulk Actions and Collaborator Seams
//!
//! The engine knows nothing about documents: a bulk action is a named plug-in
//! applied to one target id at a time, and the surrounding collaborators
//! (document selector, per-bucket transaction runner) are trait seams filled
//! in by the hosting platform.
//!
//! ## Registration
//!
//! Actions are registered by exact name in an explicit [`ActionRegistry`]
//! populated at startup; a submit against a missing name fails fast with
//! `UnknownAction`. There is no scanning or reflection-style lookup.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

/// A domain action applied to one target id.
///
/// Applied inside a per-bucket transaction; a failure on one id is caught and
/// counted without aborting the rest of the bucket. Implementations must be
/// idempotent per id: a crash before offset commit replays whole buckets.
#[async_trait]
pub trait BulkAction: Send + Sync {
    async fn apply(&self, id: &str, params: &HashMap<String, String>) -> anyhow::Result<()>;
}

/// Factory producing the action instance used by one (computation, partition)
/// worker.
pub type BulkActionFactory = Arc<dyn Fn() -> Arc<dyn BulkAction> + Send + Sync>;

/// Wrap a closure as a [`BulkActionFactory`].
pub fn action_factory<F>(f: F) -> BulkActionFactory
where
    F: Fn() -> Arc<dyn BulkAction> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Explicit name -> factory registry, populated at startup.
#[derive(Default, Clone)]
pub struct ActionRegistry {
    actions: HashMap<String, BulkActionFactory>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action under `name`, replacing any previous registration.
    pub fn register(&mut self, name: impl Into<String>, factory: BulkActionFactory) {
        self.actions.insert(name.into(), factory);
    }

    pub fn get(&self, name: &str) -> Option<&BulkActionFactory> {
        self.actions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Registered action names, sorted for deterministic topology layout.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Evaluates a selector query into the ordered list of target document ids.
///
/// External collaborator: the engine never interprets the query string.
#[async_trait]
pub trait DocumentSelector: Send + Sync {
    async fn query(&self, query: &str, repository: &str) -> anyhow::Result<Vec<String>>;
}

/// Runs each bucket inside one local transaction.
///
/// External collaborator: the hosting platform supplies the real transaction
/// demarcation; [`NoopTransactionRunner`] is for tests and stores without
/// transactions.
#[async_trait]
pub trait TransactionRunner: Send + Sync {
    async fn begin(&self) -> anyhow::Result<()>;
    async fn commit(&self) -> anyhow::Result<()>;
    async fn rollback(&self) -> anyhow::Result<()>;
}

/// Transaction runner that does nothing.
pub struct NoopTransactionRunner;

#[async_trait]
impl TransactionRunner for NoopTransactionRunner {
    async fn begin(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn commit(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn rollback(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl BulkAction for Noop {
        async fn apply(
            &self,
            _id: &str,
            _params: &HashMap<String, String>,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = ActionRegistry::new();
        assert!(registry.is_empty());
        registry.register("noop", action_factory(|| Arc::new(Noop)));
        assert!(registry.contains("noop"));
        assert!(!registry.contains("missing"));
        assert_eq!(registry.names(), vec!["noop".to_string()]);
    }

    #[test]
    fn test_registry_names_sorted() {
        let mut registry = ActionRegistry::new();
        registry.register("zeta", action_factory(|| Arc::new(Noop)));
        registry.register("alpha", action_factory(|| Arc::new(Noop)));
        assert_eq!(registry.names(), vec!["alpha".to_string(), "zeta".to_string()]);
    }
}
