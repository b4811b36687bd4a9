use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::document::{
            can_proceed, Document, EnrichmentEvent, ExtractionEvent, IngestionEvent,
            IngestionStatus, PipelineStage,
        },
    },
};

use crate::{
    orchestration::{OrchestrationProvider, WorkflowOutcome, WorkflowRequest},
    runner::{ExtractionSettings, WorkflowExecutor},
};

/// The terminal result of one stage run, delivered as a typed event so the
/// coordinator logic is identical whether the engine is in-process or remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Completed,
    Failed { reason: String },
}

/// Advance a document's status for a finished stage. Returns `None` when the
/// document is gone (deleted/cancelled mid-flight); the event is then simply
/// not applied, per the cancellation contract.
pub async fn apply_stage_outcome(
    db: &SurrealDbClient,
    document_id: &str,
    stage: PipelineStage,
    outcome: StageOutcome,
) -> Result<Option<Document>, AppError> {
    match (stage, outcome) {
        (PipelineStage::Ingestion, StageOutcome::Completed) => {
            Document::apply_ingestion_event(document_id, IngestionEvent::Store, None, db).await
        }
        (PipelineStage::Ingestion, StageOutcome::Failed { reason }) => {
            Document::apply_ingestion_event(document_id, IngestionEvent::Fail, Some(reason), db)
                .await
        }
        (PipelineStage::Extraction, StageOutcome::Completed) => {
            Document::apply_extraction_event(document_id, ExtractionEvent::Complete, None, db)
                .await
        }
        (PipelineStage::Extraction, StageOutcome::Failed { reason }) => {
            Document::apply_extraction_event(document_id, ExtractionEvent::Fail, Some(reason), db)
                .await
        }
        (PipelineStage::Enrichment, StageOutcome::Completed) => {
            Document::apply_enrichment_event(document_id, EnrichmentEvent::Complete, None, db)
                .await
        }
        (PipelineStage::Enrichment, StageOutcome::Failed { reason }) => {
            Document::apply_enrichment_event(document_id, EnrichmentEvent::Fail, Some(reason), db)
                .await
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SubmitOptions {
    /// When false the stages execute inline, with no durability or retry, and
    /// the call blocks until the document is `stored` or `failed`.
    pub run_with_orchestration: bool,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            run_with_orchestration: true,
        }
    }
}

/// Drives documents through ingestion, extraction and enrichment against the
/// orchestration contract.
pub struct PipelineCoordinator {
    db: Arc<SurrealDbClient>,
    orchestration: Arc<dyn OrchestrationProvider>,
    executor: Arc<WorkflowExecutor>,
}

impl PipelineCoordinator {
    pub fn new(
        db: Arc<SurrealDbClient>,
        orchestration: Arc<dyn OrchestrationProvider>,
        executor: Arc<WorkflowExecutor>,
    ) -> Self {
        Self {
            db,
            orchestration,
            executor,
        }
    }

    pub fn db(&self) -> &Arc<SurrealDbClient> {
        &self.db
    }

    /// Submit a document for ingestion.
    ///
    /// Idempotent: a document already at `stored` is acknowledged without a
    /// new workflow run; a `failed` one is reset to `pending` and restarted
    /// from the first stage.
    pub async fn submit(
        &self,
        document: Document,
        options: &SubmitOptions,
    ) -> Result<WorkflowOutcome, AppError> {
        if document.content.trim().is_empty() {
            return Err(AppError::Validation(
                "document has no raw content to ingest".into(),
            ));
        }

        let document_id = document.id.clone();
        match self.db.get_item::<Document>(&document_id).await? {
            Some(existing) if existing.ingestion_status == IngestionStatus::Stored => {
                info!(%document_id, "document already stored; submission is a no-op");
                return Ok(WorkflowOutcome::Completed(json!({
                    "document_id": document_id,
                    "message": "already stored",
                })));
            }
            Some(existing) if existing.ingestion_status == IngestionStatus::Failed => {
                Document::reset_for_resubmission(&document_id, &self.db).await?;
            }
            Some(_) => {
                // Pending or mid-flight; the duplicate-run guard arbitrates.
            }
            None => {
                if let Err(err) = self.db.store_item(document).await {
                    // A concurrent submission may win the create race; the
                    // duplicate-run guard arbitrates the dispatch either way.
                    if !err.to_string().contains("already exists") {
                        return Err(AppError::Database(err));
                    }
                }
            }
        }

        self.dispatch(
            WorkflowRequest::ingest_document(&document_id),
            options.run_with_orchestration,
        )
        .await
    }

    /// Stage-result callback from the workflow engine.
    pub async fn on_stage_complete(
        &self,
        document_id: &str,
        stage: PipelineStage,
        outcome: StageOutcome,
    ) -> Result<(), AppError> {
        let updated = apply_stage_outcome(&self.db, document_id, stage, outcome).await?;
        if updated.is_none() {
            warn!(
                %document_id,
                stage = stage.as_str(),
                "stage result arrived for a deleted or superseded document; dropped"
            );
        }
        Ok(())
    }

    /// Kick off knowledge-graph extraction for a stored document.
    pub async fn trigger_extraction(
        &self,
        document_id: &str,
        settings: ExtractionSettings,
        run_with_orchestration: bool,
    ) -> Result<WorkflowOutcome, AppError> {
        let document = self
            .db
            .get_item::<Document>(document_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("document {document_id}")))?;

        if !can_proceed(PipelineStage::Extraction, &document) {
            return Err(AppError::PreconditionFailed(format!(
                "extraction requires ingestion_status 'stored', found '{}'",
                document.ingestion_status.as_str()
            )));
        }

        self.dispatch(
            WorkflowRequest::extract_entities(document_id, &settings),
            run_with_orchestration,
        )
        .await
    }

    /// Kick off graph enrichment for an extracted document.
    pub async fn trigger_enrichment(
        &self,
        document_id: &str,
        run_with_orchestration: bool,
    ) -> Result<WorkflowOutcome, AppError> {
        let document = self
            .db
            .get_item::<Document>(document_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("document {document_id}")))?;

        if !can_proceed(PipelineStage::Enrichment, &document) {
            return Err(AppError::PreconditionFailed(format!(
                "enrichment requires extraction_status 'extracted', found '{}'",
                document.extraction_status.as_str()
            )));
        }

        self.dispatch(
            WorkflowRequest::enrich_graph(document_id),
            run_with_orchestration,
        )
        .await
    }

    /// Explicitly delete a document: cancel its in-flight runs, then remove
    /// the document together with its chunks and graph slice.
    pub async fn delete_document(&self, document_id: &str) -> Result<(), AppError> {
        if self.db.get_item::<Document>(document_id).await?.is_none() {
            return Err(AppError::NotFound(format!("document {document_id}")));
        }

        Document::delete_with_dependents(document_id, &self.db).await?;
        info!(%document_id, "document deleted with dependents");
        Ok(())
    }

    async fn dispatch(
        &self,
        request: WorkflowRequest,
        run_with_orchestration: bool,
    ) -> Result<WorkflowOutcome, AppError> {
        if run_with_orchestration {
            self.orchestration.run_workflow(request).await
        } else {
            self.executor
                .execute(request.workflow, &request.payload)
                .await
                .map(WorkflowOutcome::Completed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use uuid::Uuid;

    async fn memory_db() -> SurrealDbClient {
        SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surrealdb")
    }

    fn stored_document() -> Document {
        let mut doc = Document::new(
            "Doc".to_string(),
            "text/plain".to_string(),
            "Body.".to_string(),
            HashMap::new(),
            vec![],
        );
        doc.ingestion_status = IngestionStatus::Embedding;
        doc
    }

    #[tokio::test]
    async fn stage_outcome_completes_ingestion() {
        let db = memory_db().await;
        let doc = stored_document();
        db.store_item(doc.clone()).await.expect("store");

        let updated = apply_stage_outcome(
            &db,
            &doc.id,
            PipelineStage::Ingestion,
            StageOutcome::Completed,
        )
        .await
        .expect("apply")
        .expect("present");
        assert_eq!(updated.ingestion_status, IngestionStatus::Stored);
    }

    #[tokio::test]
    async fn stage_outcome_for_missing_document_is_dropped() {
        let db = memory_db().await;
        let result = apply_stage_outcome(
            &db,
            "ghost",
            PipelineStage::Ingestion,
            StageOutcome::Failed {
                reason: "boom".into(),
            },
        )
        .await
        .expect("no infrastructure error");
        assert!(result.is_none());
    }
}
