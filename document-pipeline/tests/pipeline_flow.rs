//! End-to-end pipeline scenarios over an in-memory database with the offline
//! provider backends (hashed embeddings, extractive completion).

use std::collections::HashMap;
use std::sync::Arc;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            document::{Document, IngestionStatus, KgEnrichmentStatus, KgExtractionStatus},
            document_chunk::DocumentChunk,
            knowledge_entity::KnowledgeEntity,
            vector_index::{
                IndexConfig, IndexFilters, IndexMeasure, IndexMethod, IndexState, VectorTableName,
            },
            workflow_task::{TaskState, WorkflowTask},
        },
    },
    utils::config::{
        AppConfig, CompletionBackendKind, EmbeddingBackendKind, OrchestrationBackendKind,
    },
};
use document_pipeline::{
    bootstrap::PipelineRuntime,
    coordinator::SubmitOptions,
    orchestration::WorkflowOutcome,
    runner::ExtractionSettings,
    scanner::StatusFilter,
};
use serde_json::json;
use uuid::Uuid;

const ARTICLE: &str = "Ada Lovelace wrote the first published program for the Analytical \
Engine, reasoning about loops and variables a century before hardware existed. Charles \
Babbage designed the Analytical Engine in London and corresponded with Ada Lovelace about \
its capabilities.\n\nThe Analytical Engine was never completed, but its design anticipated \
the separation of storage and mill that modern machines still follow. Later engineers \
rediscovered these notes and credited Ada Lovelace with seeing the generality Charles \
Babbage himself undersold.";

fn offline_config(orchestration: OrchestrationBackendKind) -> AppConfig {
    AppConfig {
        surrealdb_address: "mem://".to_string(),
        surrealdb_username: String::new(),
        surrealdb_password: String::new(),
        surrealdb_namespace: "itest".to_string(),
        surrealdb_database: "itest".to_string(),
        openai_api_key: None,
        openai_base_url: "https://api.openai.com/v1".to_string(),
        embedding_backend: EmbeddingBackendKind::Hashed,
        embedding_model: String::new(),
        embedding_dimensions: 32,
        completion_backend: CompletionBackendKind::Extractive,
        completion_model: String::new(),
        orchestration_backend: orchestration,
        chunk_min_chars: 50,
        chunk_max_chars: 200,
        scan_batch_size: 2,
        scan_filter: "ingestion_failed".to_string(),
        scan_trigger_extraction: false,
    }
}

async fn runtime(orchestration: OrchestrationBackendKind) -> PipelineRuntime {
    let db = Arc::new(
        SurrealDbClient::memory("itest", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surrealdb"),
    );
    db.ensure_initialized().await.expect("schema");
    PipelineRuntime::assemble(db, &offline_config(orchestration))
        .await
        .expect("runtime")
}

fn article_document() -> Document {
    Document::new(
        "Notes on the Analytical Engine".to_string(),
        "text/plain".to_string(),
        ARTICLE.to_string(),
        HashMap::new(),
        vec!["research".to_string()],
    )
}

#[tokio::test]
async fn ingestion_runs_to_stored_with_embedded_chunks() {
    let runtime = runtime(OrchestrationBackendKind::Simple).await;
    let document = article_document();
    let document_id = document.id.clone();

    let outcome = runtime
        .coordinator
        .submit(document, &SubmitOptions::default())
        .await
        .expect("submit");
    assert!(matches!(outcome, WorkflowOutcome::Completed(_)));

    let stored: Document = runtime
        .db
        .get_item(&document_id)
        .await
        .expect("fetch")
        .expect("document exists");
    assert_eq!(stored.ingestion_status, IngestionStatus::Stored);
    assert!(stored.ingestion_error.is_none());
    assert!(stored.summary.is_some());

    let chunks = DocumentChunk::list_by_document(&document_id, &runtime.db)
        .await
        .expect("chunks");
    assert!(!chunks.is_empty());
    for chunk in &chunks {
        assert!(!chunk.text.is_empty());
        assert!(!chunk.embedding.is_empty());
    }
}

#[tokio::test]
async fn resubmitting_a_stored_document_is_a_noop() {
    let runtime = runtime(OrchestrationBackendKind::Simple).await;
    let document = article_document();
    let document_id = document.id.clone();

    runtime
        .coordinator
        .submit(document.clone(), &SubmitOptions::default())
        .await
        .expect("first submit");

    let chunk_ids_before: Vec<String> = DocumentChunk::list_by_document(&document_id, &runtime.db)
        .await
        .expect("chunks")
        .into_iter()
        .map(|chunk| chunk.id)
        .collect();

    let outcome = runtime
        .coordinator
        .submit(document, &SubmitOptions::default())
        .await
        .expect("resubmit");
    match outcome {
        WorkflowOutcome::Completed(value) => {
            assert_eq!(value["message"], "already stored");
        }
        WorkflowOutcome::Accepted { .. } => panic!("no workflow should have been dispatched"),
    }

    let chunk_ids_after: Vec<String> = DocumentChunk::list_by_document(&document_id, &runtime.db)
        .await
        .expect("chunks")
        .into_iter()
        .map(|chunk| chunk.id)
        .collect();
    assert_eq!(chunk_ids_before, chunk_ids_after);
}

#[tokio::test]
async fn resubmitting_a_stored_document_dispatches_no_durable_run() {
    let runtime = runtime(OrchestrationBackendKind::Queue).await;
    let mut document = article_document();
    document.ingestion_status = IngestionStatus::Stored;
    runtime
        .db
        .store_item(document.clone())
        .await
        .expect("store");

    runtime
        .coordinator
        .submit(document, &SubmitOptions::default())
        .await
        .expect("submit");

    let tasks = WorkflowTask::get_unfinished_tasks(&runtime.db)
        .await
        .expect("tasks");
    assert!(tasks.is_empty(), "no task may be enqueued for a stored doc");
}

#[tokio::test]
async fn failed_ingestion_records_reason_and_recovers_on_resubmit() {
    let runtime = runtime(OrchestrationBackendKind::Simple).await;
    let mut document = article_document();
    document.mime_type = "application/pdf".to_string();
    let document_id = document.id.clone();

    let err = runtime
        .coordinator
        .submit(document.clone(), &SubmitOptions::default())
        .await
        .expect_err("unsupported mime must fail the run");
    assert!(matches!(err, AppError::Processing(_)));

    let failed: Document = runtime
        .db
        .get_item(&document_id)
        .await
        .expect("fetch")
        .expect("document exists");
    assert_eq!(failed.ingestion_status, IngestionStatus::Failed);
    let reason = failed.ingestion_error.expect("failure reason recorded");
    assert!(reason.contains("Unsupported format"));
    // Downstream stages were never reached.
    assert_eq!(failed.extraction_status, KgExtractionStatus::Pending);
    assert_eq!(failed.enrichment_status, KgEnrichmentStatus::Pending);

    // Fix the input and resubmit: reset to pending, rerun, end at stored.
    runtime
        .db
        .client
        .query("UPDATE type::thing('document', $id) SET mime_type = 'text/plain'")
        .bind(("id", document_id.clone()))
        .await
        .expect("patch mime type");

    document.mime_type = "text/plain".to_string();
    runtime
        .coordinator
        .submit(document, &SubmitOptions::default())
        .await
        .expect("recovery submit");

    let recovered: Document = runtime
        .db
        .get_item(&document_id)
        .await
        .expect("fetch")
        .expect("document exists");
    assert_eq!(recovered.ingestion_status, IngestionStatus::Stored);
    assert!(recovered.ingestion_error.is_none());
}

#[tokio::test]
async fn extraction_requires_stored_ingestion_and_dispatches_nothing() {
    let runtime = runtime(OrchestrationBackendKind::Queue).await;
    let document = article_document();
    let document_id = document.id.clone();
    runtime.db.store_item(document).await.expect("store");

    let err = runtime
        .coordinator
        .trigger_extraction(&document_id, ExtractionSettings::default(), true)
        .await
        .expect_err("pending ingestion must be rejected");
    assert!(matches!(err, AppError::PreconditionFailed(_)));

    let tasks = WorkflowTask::get_unfinished_tasks(&runtime.db)
        .await
        .expect("tasks");
    assert!(tasks.is_empty(), "no extraction workflow may be dispatched");
}

#[tokio::test]
async fn extraction_builds_a_graph_and_enrichment_follows() {
    let runtime = runtime(OrchestrationBackendKind::Simple).await;
    let document = article_document();
    let document_id = document.id.clone();

    runtime
        .coordinator
        .submit(document, &SubmitOptions::default())
        .await
        .expect("submit");

    // Enrichment before extraction is out of order.
    let err = runtime
        .coordinator
        .trigger_enrichment(&document_id, true)
        .await
        .expect_err("enrichment requires extraction");
    assert!(matches!(err, AppError::PreconditionFailed(_)));

    runtime
        .coordinator
        .trigger_extraction(&document_id, ExtractionSettings::default(), true)
        .await
        .expect("extraction");

    let extracted: Document = runtime
        .db
        .get_item(&document_id)
        .await
        .expect("fetch")
        .expect("document exists");
    assert_eq!(extracted.extraction_status, KgExtractionStatus::Extracted);

    let entities = KnowledgeEntity::list_by_document(&document_id, &runtime.db)
        .await
        .expect("entities");
    assert!(!entities.is_empty());
    let names: Vec<&str> = entities.iter().map(|e| e.name.as_str()).collect();
    assert!(names.contains(&"Ada Lovelace"));

    runtime
        .coordinator
        .trigger_enrichment(&document_id, true)
        .await
        .expect("enrichment");

    let enriched: Document = runtime
        .db
        .get_item(&document_id)
        .await
        .expect("fetch")
        .expect("document exists");
    assert_eq!(enriched.enrichment_status, KgEnrichmentStatus::Enriched);
}

#[tokio::test]
async fn automatic_deduplication_collapses_matching_entities() {
    let runtime = runtime(OrchestrationBackendKind::Simple).await;
    let settings = ExtractionSettings {
        automatic_deduplication: true,
    };

    for _ in 0..2 {
        let document = article_document();
        let document_id = document.id.clone();
        runtime
            .coordinator
            .submit(document, &SubmitOptions::default())
            .await
            .expect("submit");
        runtime
            .coordinator
            .trigger_extraction(&document_id, settings, true)
            .await
            .expect("extraction");
    }

    let duplicates: Vec<KnowledgeEntity> = runtime
        .db
        .client
        .query(
            "SELECT * FROM knowledge_entity
             WHERE collection_id = 'research' AND normalized_name = 'ada lovelace'",
        )
        .await
        .expect("query")
        .take(0)
        .expect("rows");
    assert_eq!(
        duplicates.len(),
        1,
        "the second extraction must reuse the existing entity"
    );
}

#[tokio::test]
async fn concurrent_submissions_never_duplicate_chunks() {
    let runtime = runtime(OrchestrationBackendKind::Simple).await;
    let document = article_document();
    let document_id = document.id.clone();
    let options = SubmitOptions::default();

    let first = runtime.coordinator.submit(document.clone(), &options);
    let second = runtime.coordinator.submit(document, &options);
    let (first, second) = tokio::join!(first, second);

    let winners = [&first, &second]
        .iter()
        .filter(|result| result.is_ok())
        .count();
    assert!(winners >= 1, "at least one submission must succeed");
    for result in [&first, &second] {
        if let Err(err) = result {
            assert!(
                matches!(err, AppError::DuplicateRun(_)),
                "the losing submission may only fail as a duplicate run, got: {err}"
            );
        }
    }

    let chunks = DocumentChunk::list_by_document(&document_id, &runtime.db)
        .await
        .expect("chunks");
    let mut ordinals: Vec<u32> = chunks.iter().map(|chunk| chunk.ordinal).collect();
    ordinals.sort_unstable();
    ordinals.dedup();
    assert_eq!(
        ordinals.len(),
        chunks.len(),
        "a duplicated stage execution would leave duplicate ordinals"
    );
}

#[tokio::test]
async fn deleting_a_document_cancels_runs_and_cleans_up() {
    let runtime = runtime(OrchestrationBackendKind::Queue).await;
    let document = article_document();
    let document_id = document.id.clone();

    // Enqueue a durable ingestion run, but delete before a worker claims it.
    let outcome = runtime
        .coordinator
        .submit(document, &SubmitOptions::default())
        .await
        .expect("submit");
    let WorkflowOutcome::Accepted { task_id } = outcome else {
        panic!("queue orchestration must return an accepted handle");
    };

    runtime
        .coordinator
        .delete_document(&document_id)
        .await
        .expect("delete");

    let task: WorkflowTask = runtime
        .db
        .get_item(&task_id)
        .await
        .expect("fetch task")
        .expect("task exists");
    assert_eq!(task.state, TaskState::Cancelled);

    // A late execution of the stale payload is dropped quietly.
    let result = runtime
        .executor
        .execute(
            common::storage::types::workflow_task::WorkflowName::IngestDocument,
            &json!({ "request": { "document_id": document_id } }),
        )
        .await
        .expect("stale execution is not an error");
    assert_eq!(result["skipped"], true);

    let chunks = DocumentChunk::list_by_document(&document_id, &runtime.db)
        .await
        .expect("chunks");
    assert!(chunks.is_empty());
    assert!(runtime
        .db
        .get_item::<Document>(&document_id)
        .await
        .expect("fetch")
        .is_none());
}

#[tokio::test]
async fn index_lifecycle_create_get_list_delete() {
    let runtime = runtime(OrchestrationBackendKind::Simple).await;

    // Some vector rows that must survive the whole index lifecycle.
    let document = article_document();
    let document_id = document.id.clone();
    runtime
        .coordinator
        .submit(document, &SubmitOptions::default())
        .await
        .expect("submit");
    let chunk_count = DocumentChunk::count_for_document(&document_id, &runtime.db)
        .await
        .expect("count");
    assert!(chunk_count > 0);

    let config = IndexConfig {
        table_name: VectorTableName::Vectors,
        index_method: IndexMethod::Hnsw,
        index_measure: IndexMeasure::Cosine,
        index_name: "chunks_hnsw".to_string(),
        index_column: None,
        index_arguments: HashMap::from([("m".to_string(), json!(8))]),
        concurrently: false,
    };

    runtime
        .index_manager
        .create_index(config.clone())
        .await
        .expect("create index");

    let record = runtime
        .index_manager
        .get_index(VectorTableName::Vectors, "chunks_hnsw")
        .await
        .expect("get index");
    assert_eq!(record.state, IndexState::Ready);

    let err = runtime
        .index_manager
        .create_index(config)
        .await
        .expect_err("duplicate identity");
    assert!(matches!(err, AppError::IndexNameConflict(_)));

    let (indices, page_info) = runtime
        .index_manager
        .list_indices(0, 10, &IndexFilters::default())
        .await
        .expect("list");
    assert_eq!(indices.len(), 1);
    assert_eq!(page_info.total_entries, 1);

    runtime
        .index_manager
        .delete_index(VectorTableName::Vectors, "chunks_hnsw")
        .await
        .expect("delete index");

    let err = runtime
        .index_manager
        .get_index(VectorTableName::Vectors, "chunks_hnsw")
        .await
        .expect_err("record removed");
    assert!(matches!(err, AppError::IndexNotFound(_)));

    // The underlying vector rows are untouched by the create/delete cycle.
    let surviving = DocumentChunk::count_for_document(&document_id, &runtime.db)
        .await
        .expect("count");
    assert_eq!(surviving, chunk_count);
}

#[tokio::test]
async fn scan_and_correct_isolates_failures_and_reports() {
    let runtime = runtime(OrchestrationBackendKind::Simple).await;

    // Catalogue of three documents; exactly one has failed ingestion.
    let mut failed_doc = article_document();
    failed_doc.ingestion_status = IngestionStatus::Failed;
    runtime.db.store_item(failed_doc).await.expect("store");
    for _ in 0..2 {
        let mut healthy = article_document();
        healthy.ingestion_status = IngestionStatus::Stored;
        runtime.db.store_item(healthy).await.expect("store");
    }

    let report = runtime
        .scanner
        .scan_and_correct(&runtime.coordinator, StatusFilter::IngestionFailed, true)
        .await
        .expect("recoverable failures never abort the scan");

    assert_eq!(report.matching, 1);
    assert_eq!(report.processed, 1);
    // The corrective extraction hits the ingestion precondition; that is a
    // recoverable, per-document failure and must not abort the batch.
    assert_eq!(report.failed, 1);
    assert_eq!(report.succeeded, 0);
}

#[tokio::test]
async fn scan_and_correct_reextracts_extraction_failures() {
    let runtime = runtime(OrchestrationBackendKind::Simple).await;

    // A document whose ingestion succeeded but extraction failed.
    let document = article_document();
    let document_id = document.id.clone();
    runtime
        .coordinator
        .submit(document, &SubmitOptions::default())
        .await
        .expect("submit");
    runtime
        .db
        .client
        .query(
            "UPDATE type::thing('document', $id)
             SET extraction_status = 'failed', extraction_error = 'llm outage'",
        )
        .bind(("id", document_id.clone()))
        .await
        .expect("mark extraction failed");

    let report = runtime
        .scanner
        .scan_and_correct(&runtime.coordinator, StatusFilter::ExtractionFailed, true)
        .await
        .expect("scan");

    assert_eq!(report.matching, 1);
    assert_eq!(report.processed, 1);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 0);

    let corrected: Document = runtime
        .db
        .get_item(&document_id)
        .await
        .expect("fetch")
        .expect("document exists");
    assert_eq!(corrected.extraction_status, KgExtractionStatus::Extracted);
}
