//! End-to-end demo: submit a bulk command against an in-memory log and watch
//! it complete.
//!
//! Run with: cargo run --example bulk_reindex

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use logflow_bulk::{
    action_factory, BulkAction, BulkCommand, BulkService, DocumentSelector,
};
use logflow_log::{LogManager, MemLogManager};
use tracing::info;

/// Pretends every document in the corpus matches.
struct DemoSelector;

#[async_trait]
impl DocumentSelector for DemoSelector {
    async fn query(&self, _query: &str, _repository: &str) -> anyhow::Result<Vec<String>> {
        Ok((0..1000).map(|i| format!("doc-{i:04}")).collect())
    }
}

/// Pretends to reindex one document.
struct ReindexAction;

#[async_trait]
impl BulkAction for ReindexAction {
    async fn apply(&self, id: &str, _params: &HashMap<String, String>) -> anyhow::Result<()> {
        tracing::debug!(id, "reindexed");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let log: Arc<dyn LogManager> = Arc::new(MemLogManager::new());
    let mut service = BulkService::builder()
        .log_manager(log)
        .selector(Arc::new(DemoSelector))
        .register_action("reindex", action_factory(|| Arc::new(ReindexAction)))
        .bucket_size(50)
        .build()?;
    service.start().await?;

    let command = BulkCommand::builder("reindex", "SELECT * FROM Document")
        .username("demo")
        .build();
    let id = service.submit(command).await?;
    info!(%id, "submitted");

    let status = service
        .wait_for_completion(id, Duration::from_secs(30))
        .await?;
    info!(
        processed = status.processed,
        errors = status.errors,
        state = ?status.state,
        "done"
    );

    service.stop().await;
    Ok(())
}
