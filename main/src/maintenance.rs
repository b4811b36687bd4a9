use common::utils::config::get_config;
use document_pipeline::{bootstrap::PipelineRuntime, scanner::StatusFilter};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// One-shot corrective pass over the document catalogue: find documents whose
/// statuses match the configured failure filter and, if enabled, resubmit
/// them through the orchestration layer.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;
    let filter: StatusFilter = config.scan_filter.parse()?;
    let trigger = config.scan_trigger_extraction;

    let runtime = PipelineRuntime::from_config(&config).await?;

    let report = runtime
        .scanner
        .scan_and_correct(&runtime.coordinator, filter, trigger)
        .await?;

    info!(
        filter = filter.as_str(),
        matching = report.matching,
        processed = report.processed,
        succeeded = report.succeeded,
        failed = report.failed,
        "maintenance scan complete"
    );

    if report.failed > 0 {
        warn!("Some corrective submissions failed. Check the logs for details.");
        std::process::exit(1);
    }

    Ok(())
}
