#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod bootstrap;
pub mod completion;
pub mod coordinator;
pub mod index_manager;
pub mod orchestration;
pub mod parser;
pub mod runner;
pub mod scanner;

use chrono::Utc;
use common::storage::{
    db::SurrealDbClient,
    types::workflow_task::{WorkflowTask, DEFAULT_LEASE_SECS},
};
pub use runner::WorkflowExecutor;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Claim-and-execute loop for the durable orchestration variant. Runs until
/// the process is stopped; safe to run from many workers concurrently.
pub async fn run_worker_loop(
    db: Arc<SurrealDbClient>,
    executor: Arc<WorkflowExecutor>,
) -> Result<(), Box<dyn std::error::Error>> {
    let worker_id = format!("pipeline-worker-{}", Uuid::new_v4());
    let lease_duration = Duration::from_secs(DEFAULT_LEASE_SECS as u64);
    let idle_backoff = Duration::from_millis(500);

    loop {
        match WorkflowTask::claim_next_ready(&db, &worker_id, Utc::now(), lease_duration).await {
            Ok(Some(task)) => {
                let task_id = task.id.clone();
                info!(
                    %worker_id,
                    %task_id,
                    workflow = task.workflow.as_str(),
                    attempt = task.attempts,
                    "claimed workflow task"
                );
                if let Err(err) = executor.process_task(task, &db).await {
                    error!(%worker_id, %task_id, error = %err, "workflow task failed");
                }
            }
            Ok(None) => {
                sleep(idle_backoff).await;
            }
            Err(err) => {
                error!(%worker_id, error = %err, "failed to claim workflow task");
                warn!("Backing off for 1s after claim error");
                sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
