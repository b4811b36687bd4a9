use std::sync::Arc;

use common::utils::config::get_config;
use document_pipeline::{bootstrap::PipelineRuntime, run_worker_loop};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

    let runtime = PipelineRuntime::from_config(&config).await?;

    run_worker_loop(Arc::clone(&runtime.db), Arc::clone(&runtime.executor)).await
}
