use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use text_splitter::TextSplitter;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        indexes,
        types::{
            document::{can_proceed, Document, EnrichmentEvent, ExtractionEvent, IngestionEvent,
                IngestionStatus, KgEnrichmentStatus, KgExtractionStatus, PipelineStage},
            document_chunk::DocumentChunk,
            knowledge_entity::{normalize_entity_name, KnowledgeEntity},
            knowledge_relationship::KnowledgeRelationship,
            vector_index::{IndexConfig, IndexState, VectorIndex, VectorTableName},
            workflow_task::{TaskErrorInfo, WorkflowName, WorkflowTask},
        },
    },
    utils::embedding::{embed_batch_with_retry, EmbeddingProvider},
};

use crate::{
    completion::CompletionProvider,
    coordinator::{apply_stage_outcome, StageOutcome},
    parser::ParsingProvider,
};

/// Options for a knowledge-graph extraction run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractionSettings {
    #[serde(default)]
    pub automatic_deduplication: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub min_chars: usize,
    pub max_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            min_chars: 500,
            max_chars: 2000,
        }
    }
}

/// Longest document prefix handed to the summary model.
const SUMMARY_INPUT_CHARS: usize = 4000;

/// Executes the pipeline stages. Shared by the inline orchestration variant
/// and the durable worker loop, so stage semantics cannot drift between them.
pub struct StageRunner {
    db: Arc<SurrealDbClient>,
    parser: Arc<ParsingProvider>,
    embedding: Arc<EmbeddingProvider>,
    completion: Arc<CompletionProvider>,
    chunking: ChunkingConfig,
}

impl StageRunner {
    pub fn new(
        db: Arc<SurrealDbClient>,
        parser: Arc<ParsingProvider>,
        embedding: Arc<EmbeddingProvider>,
        completion: Arc<CompletionProvider>,
        chunking: ChunkingConfig,
    ) -> Self {
        Self {
            db,
            parser,
            embedding,
            completion,
            chunking,
        }
    }

    pub fn db(&self) -> &Arc<SurrealDbClient> {
        &self.db
    }

    /// parse -> chunk -> embed -> store. Re-entrant: a document already at
    /// `stored` is a no-op, a `failed` one restarts from the first stage.
    pub async fn run_ingestion(&self, document_id: &str) -> Result<Value, AppError> {
        let Some(document) = self.db.get_item::<Document>(document_id).await? else {
            warn!(%document_id, "document vanished before ingestion; skipping");
            return Ok(skipped_result(document_id));
        };

        match document.ingestion_status {
            IngestionStatus::Stored => {
                return Ok(json!({
                    "document_id": document_id,
                    "message": "already stored",
                }));
            }
            IngestionStatus::Failed => {
                if Document::reset_for_resubmission(document_id, &self.db)
                    .await?
                    .is_none()
                {
                    return Ok(skipped_result(document_id));
                }
            }
            _ => {}
        }

        let Some(document) = Document::apply_ingestion_event(
            document_id,
            IngestionEvent::StartParsing,
            None,
            &self.db,
        )
        .await?
        else {
            return Ok(skipped_result(document_id));
        };

        let segments = match self
            .parser
            .parse(document.content.as_bytes(), &document.mime_type)
        {
            Ok(segments) if !segments.is_empty() => segments,
            Ok(_) => {
                return self
                    .fail_ingestion(
                        document_id,
                        AppError::Processing("document produced no text segments".into()),
                    )
                    .await;
            }
            Err(err) => return self.fail_ingestion(document_id, err).await,
        };

        if Document::apply_ingestion_event(
            document_id,
            IngestionEvent::StartChunking,
            None,
            &self.db,
        )
        .await?
        .is_none()
        {
            return Ok(skipped_result(document_id));
        }

        let splitter = TextSplitter::new(self.chunking.min_chars..self.chunking.max_chars);
        let mut chunk_texts: Vec<String> = Vec::new();
        for segment in &segments {
            for chunk in splitter.chunks(segment) {
                let trimmed = chunk.trim();
                if !trimmed.is_empty() {
                    chunk_texts.push(trimmed.to_string());
                }
            }
        }

        if Document::apply_ingestion_event(
            document_id,
            IngestionEvent::StartEmbedding,
            None,
            &self.db,
        )
        .await?
        .is_none()
        {
            return Ok(skipped_result(document_id));
        }

        let embeddings = match embed_batch_with_retry(&self.embedding, chunk_texts.clone()).await {
            Ok(embeddings) => embeddings,
            Err(err) => return self.fail_ingestion(document_id, err).await,
        };

        // Replace chunks wholesale so a restarted run cannot leave duplicates.
        DocumentChunk::delete_by_document_id(document_id, &self.db).await?;
        for (ordinal, (text, embedding)) in
            chunk_texts.iter().zip(embeddings.into_iter()).enumerate()
        {
            let chunk = DocumentChunk::new(
                document_id.to_string(),
                ordinal as u32,
                text.clone(),
                embedding,
            );
            self.db.store_item(chunk).await?;
        }

        let stored = apply_stage_outcome(
            &self.db,
            document_id,
            PipelineStage::Ingestion,
            StageOutcome::Completed,
        )
        .await?;
        if stored.is_none() {
            return Ok(skipped_result(document_id));
        }

        if let Err(err) = self.generate_summary(&document).await {
            warn!(%document_id, error = %err, "document summary generation failed");
        }

        info!(%document_id, chunks = chunk_texts.len(), "document ingestion stored");
        Ok(json!({
            "document_id": document_id,
            "chunks": chunk_texts.len(),
        }))
    }

    async fn fail_ingestion(
        &self,
        document_id: &str,
        err: AppError,
    ) -> Result<Value, AppError> {
        let reason = err.to_string();
        apply_stage_outcome(
            &self.db,
            document_id,
            PipelineStage::Ingestion,
            StageOutcome::Failed {
                reason: reason.clone(),
            },
        )
        .await?;
        warn!(%document_id, error = %reason, "document ingestion failed");
        Err(AppError::Processing(reason))
    }

    async fn generate_summary(&self, document: &Document) -> Result<(), AppError> {
        let input: String = document.content.chars().take(SUMMARY_INPUT_CHARS).collect();
        let summary = self.completion.summarize(&document.title, &input).await?;
        let embedding = self.embedding.embed(&summary).await?;
        Document::set_summary(&document.id, summary, embedding, &self.db).await
    }

    /// Derive entity/relationship candidates from the stored chunks and
    /// persist them into the collection's graph.
    pub async fn run_extraction(
        &self,
        document_id: &str,
        settings: ExtractionSettings,
    ) -> Result<Value, AppError> {
        let Some(document) = self.db.get_item::<Document>(document_id).await? else {
            warn!(%document_id, "document vanished before extraction; skipping");
            return Ok(skipped_result(document_id));
        };

        if !can_proceed(PipelineStage::Extraction, &document) {
            return Err(AppError::PreconditionFailed(format!(
                "extraction requires ingestion_status 'stored', found '{}'",
                document.ingestion_status.as_str()
            )));
        }

        match document.extraction_status {
            KgExtractionStatus::Extracted => {
                return Ok(json!({
                    "document_id": document_id,
                    "message": "already extracted",
                }));
            }
            KgExtractionStatus::Failed => {
                if Document::apply_extraction_event(
                    document_id,
                    ExtractionEvent::Reset,
                    None,
                    &self.db,
                )
                .await?
                .is_none()
                {
                    return Ok(skipped_result(document_id));
                }
            }
            _ => {}
        }

        if Document::apply_extraction_event(document_id, ExtractionEvent::Start, None, &self.db)
            .await?
            .is_none()
        {
            return Ok(skipped_result(document_id));
        }

        let chunks = DocumentChunk::list_by_document(document_id, &self.db).await?;
        let collection_id = document.primary_collection().to_string();

        // Clear this document's slice of the graph first, so deduplication
        // can only resolve against entities other documents contributed.
        KnowledgeRelationship::delete_by_document_id(document_id, &self.db).await?;
        KnowledgeEntity::delete_by_document_id(document_id, &self.db).await?;

        let mut entities: Vec<KnowledgeEntity> = Vec::new();
        let mut by_name: HashMap<String, String> = HashMap::new();
        let mut seen_identities: HashSet<String> = HashSet::new();
        let mut raw_relationships: Vec<(String, String, String)> = Vec::new();
        let mut failed_chunks = 0usize;

        for chunk in &chunks {
            let candidates = match self.completion.extract_graph(&chunk.text).await {
                Ok(candidates) => candidates,
                Err(err) => {
                    // Per-chunk failure is non-fatal to the document.
                    failed_chunks += 1;
                    warn!(
                        %document_id,
                        chunk_ordinal = chunk.ordinal,
                        error = %err,
                        "entity extraction failed for chunk"
                    );
                    continue;
                }
            };

            for candidate in candidates.entities {
                let normalized = normalize_entity_name(&candidate.name);
                let identity = format!("{normalized}:{}", candidate.entity_type);
                if seen_identities.contains(&identity) {
                    continue;
                }
                seen_identities.insert(identity);

                if settings.automatic_deduplication {
                    if let Some(existing) = KnowledgeEntity::find_duplicate(
                        &collection_id,
                        &candidate.name,
                        &candidate.entity_type,
                        &self.db,
                    )
                    .await?
                    {
                        by_name.entry(normalized).or_insert(existing.id);
                        continue;
                    }
                }

                let descriptor = format!(
                    "name: {}, description: {}, type: {}",
                    candidate.name, candidate.description, candidate.entity_type
                );
                let embedding = match embed_batch_with_retry(&self.embedding, vec![descriptor])
                    .await
                {
                    Ok(mut vectors) => vectors.pop().unwrap_or_default(),
                    Err(err) => {
                        warn!(
                            %document_id,
                            entity = %candidate.name,
                            error = %err,
                            "embedding failed for entity; skipping it"
                        );
                        continue;
                    }
                };

                let entity = KnowledgeEntity::new(
                    document_id.to_string(),
                    collection_id.clone(),
                    candidate.name,
                    candidate.entity_type,
                    candidate.description,
                    embedding,
                );
                by_name.entry(normalized).or_insert(entity.id.clone());
                entities.push(entity);
            }

            for relationship in candidates.relationships {
                raw_relationships.push((
                    relationship.subject,
                    relationship.predicate,
                    relationship.object,
                ));
            }
        }

        if !chunks.is_empty() && failed_chunks == chunks.len() {
            return self
                .fail_extraction(
                    document_id,
                    AppError::Processing("entity extraction failed for every chunk".into()),
                )
                .await;
        }

        let mut relationships: Vec<KnowledgeRelationship> = Vec::new();
        let mut seen_edges: HashSet<(String, String, String)> = HashSet::new();
        for (subject, predicate, object) in raw_relationships {
            let Some(in_id) = by_name.get(&normalize_entity_name(&subject)) else {
                continue;
            };
            let Some(out_id) = by_name.get(&normalize_entity_name(&object)) else {
                continue;
            };
            if in_id == out_id {
                continue;
            }
            let edge = (in_id.clone(), predicate.clone(), out_id.clone());
            if seen_edges.insert(edge) {
                relationships.push(KnowledgeRelationship::new(
                    in_id.clone(),
                    out_id.clone(),
                    document_id.to_string(),
                    collection_id.clone(),
                    predicate,
                ));
            }
        }

        let entity_count = entities.len();
        let relationship_count = relationships.len();
        if let Err(err) = self.store_graph(entities, relationships).await {
            return self.fail_extraction(document_id, err).await;
        }

        let completed = apply_stage_outcome(
            &self.db,
            document_id,
            PipelineStage::Extraction,
            StageOutcome::Completed,
        )
        .await?;
        if completed.is_none() {
            return Ok(skipped_result(document_id));
        }

        info!(
            %document_id,
            entities = entity_count,
            relationships = relationship_count,
            "knowledge graph extraction completed"
        );
        Ok(json!({
            "document_id": document_id,
            "entities": entity_count,
            "relationships": relationship_count,
        }))
    }

    async fn fail_extraction(
        &self,
        document_id: &str,
        err: AppError,
    ) -> Result<Value, AppError> {
        let reason = err.to_string();
        apply_stage_outcome(
            &self.db,
            document_id,
            PipelineStage::Extraction,
            StageOutcome::Failed {
                reason: reason.clone(),
            },
        )
        .await?;
        warn!(%document_id, error = %reason, "knowledge graph extraction failed");
        Err(AppError::Processing(reason))
    }

    async fn store_graph(
        &self,
        entities: Vec<KnowledgeEntity>,
        relationships: Vec<KnowledgeRelationship>,
    ) -> Result<(), AppError> {
        if entities.is_empty() && relationships.is_empty() {
            return Ok(());
        }

        const STORE_GRAPH_MUTATION: &str = r#"
            BEGIN TRANSACTION;
            LET $entities = $entities;
            LET $relationships = $relationships;

            FOR $entity IN $entities {
                CREATE type::thing('knowledge_entity', $entity.id) CONTENT $entity;
            };

            FOR $relationship IN $relationships {
                LET $in_node = type::thing('knowledge_entity', $relationship.in);
                LET $out_node = type::thing('knowledge_entity', $relationship.out);
                RELATE $in_node->relates_to->$out_node CONTENT {
                    id: type::thing('relates_to', $relationship.id),
                    metadata: $relationship.metadata
                };
            };

            COMMIT TRANSACTION;
        "#;

        const MAX_ATTEMPTS: usize = 3;
        const INITIAL_BACKOFF_MS: u64 = 50;
        const MAX_BACKOFF_MS: u64 = 800;

        let mut backoff_ms = INITIAL_BACKOFF_MS;

        for attempt in 0..MAX_ATTEMPTS {
            let result = self
                .db
                .client
                .query(STORE_GRAPH_MUTATION)
                .bind(("entities", entities.clone()))
                .bind(("relationships", relationships.clone()))
                .await;

            match result {
                Ok(_) => return Ok(()),
                Err(err) => {
                    if is_retryable_conflict(&err) && attempt + 1 < MAX_ATTEMPTS {
                        warn!(
                            attempt = attempt + 1,
                            "Transient SurrealDB conflict while storing graph data; retrying"
                        );
                        sleep(Duration::from_millis(backoff_ms)).await;
                        backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
                        continue;
                    }

                    return Err(AppError::from(err));
                }
            }
        }

        Err(AppError::InternalError(
            "Failed to store graph entities after retries".to_string(),
        ))
    }

    /// Post-process the extracted graph: fold each entity's neighborhood into
    /// its description and refresh its embedding.
    pub async fn run_enrichment(&self, document_id: &str) -> Result<Value, AppError> {
        let Some(document) = self.db.get_item::<Document>(document_id).await? else {
            warn!(%document_id, "document vanished before enrichment; skipping");
            return Ok(skipped_result(document_id));
        };

        if !can_proceed(PipelineStage::Enrichment, &document) {
            return Err(AppError::PreconditionFailed(format!(
                "enrichment requires extraction_status 'extracted', found '{}'",
                document.extraction_status.as_str()
            )));
        }

        match document.enrichment_status {
            KgEnrichmentStatus::Enriched => {
                return Ok(json!({
                    "document_id": document_id,
                    "message": "already enriched",
                }));
            }
            KgEnrichmentStatus::Failed => {
                if Document::apply_enrichment_event(
                    document_id,
                    EnrichmentEvent::Reset,
                    None,
                    &self.db,
                )
                .await?
                .is_none()
                {
                    return Ok(skipped_result(document_id));
                }
            }
            _ => {}
        }

        if Document::apply_enrichment_event(document_id, EnrichmentEvent::Start, None, &self.db)
            .await?
            .is_none()
        {
            return Ok(skipped_result(document_id));
        }

        let entities = KnowledgeEntity::list_by_document(document_id, &self.db).await?;
        let mut enriched = 0usize;
        let mut failures = 0usize;

        for entity in &entities {
            let edges = KnowledgeRelationship::list_for_entity(&entity.id, &self.db).await?;
            let mut neighbor_ids: Vec<&str> = edges
                .iter()
                .map(|edge| {
                    if edge.in_ == entity.id {
                        edge.out.as_str()
                    } else {
                        edge.in_.as_str()
                    }
                })
                .collect();
            neighbor_ids.sort_unstable();
            neighbor_ids.dedup();

            let mut neighbors = Vec::with_capacity(neighbor_ids.len());
            for neighbor_id in neighbor_ids {
                if let Some(neighbor) = self.db.get_item::<KnowledgeEntity>(neighbor_id).await? {
                    neighbors.push(neighbor.name);
                }
            }

            let description = match self
                .completion
                .enrich_description(
                    &entity.name,
                    &entity.entity_type,
                    &entity.description,
                    &neighbors,
                )
                .await
            {
                Ok(description) => description,
                Err(err) => {
                    failures += 1;
                    warn!(
                        %document_id,
                        entity = %entity.name,
                        error = %err,
                        "enrichment failed for entity"
                    );
                    continue;
                }
            };

            let descriptor = format!(
                "name: {}, description: {description}, type: {}",
                entity.name, entity.entity_type
            );
            match embed_batch_with_retry(&self.embedding, vec![descriptor]).await {
                Ok(mut vectors) => {
                    let embedding = vectors.pop().unwrap_or_default();
                    KnowledgeEntity::update_enrichment(
                        &entity.id,
                        &description,
                        embedding,
                        &self.db,
                    )
                    .await?;
                    enriched += 1;
                }
                Err(err) => {
                    failures += 1;
                    warn!(
                        %document_id,
                        entity = %entity.name,
                        error = %err,
                        "re-embedding failed for enriched entity"
                    );
                }
            }
        }

        if !entities.is_empty() && failures == entities.len() {
            let reason = "graph enrichment failed for every entity".to_string();
            apply_stage_outcome(
                &self.db,
                document_id,
                PipelineStage::Enrichment,
                StageOutcome::Failed {
                    reason: reason.clone(),
                },
            )
            .await?;
            return Err(AppError::Processing(reason));
        }

        let completed = apply_stage_outcome(
            &self.db,
            document_id,
            PipelineStage::Enrichment,
            StageOutcome::Completed,
        )
        .await?;
        if completed.is_none() {
            return Ok(skipped_result(document_id));
        }

        info!(%document_id, enriched, "graph enrichment completed");
        Ok(json!({
            "document_id": document_id,
            "enriched": enriched,
        }))
    }

    /// Build the index structure described by a validated config and flip the
    /// record to `ready`. Runs inside a workflow since builds over large
    /// tables take minutes.
    pub async fn build_vector_index(&self, config: IndexConfig) -> Result<Value, AppError> {
        config.validate()?;

        let records = VectorIndex::find(config.table_name, &config.index_name, &self.db).await?;
        let record = match records.into_iter().next() {
            Some(record) => record,
            // The workflow may run standalone, without a manager-created record.
            None => {
                let record = VectorIndex::from_config(&config);
                self.db.store_item(record.clone()).await?;
                record
            }
        };

        match indexes::build_index(&self.db, &config, self.embedding.dimension()).await {
            Ok(()) => {
                VectorIndex::set_state(&record.id, IndexState::Ready, &self.db).await?;
                Ok(json!({
                    "table_name": config.table_name.as_str(),
                    "index_name": config.index_name,
                    "state": IndexState::Ready.as_str(),
                }))
            }
            Err(err) => {
                VectorIndex::set_state(&record.id, IndexState::Failed, &self.db).await?;
                Err(err)
            }
        }
    }

    /// Remove the index structure and its record. Vector rows are untouched;
    /// queries fall back to full scans until a replacement exists.
    pub async fn drop_vector_index(
        &self,
        table_name: VectorTableName,
        index_name: &str,
    ) -> Result<Value, AppError> {
        indexes::drop_index(&self.db, table_name, index_name).await?;

        for record in VectorIndex::find(table_name, index_name, &self.db).await? {
            self.db.delete_item::<VectorIndex>(&record.id).await?;
        }

        Ok(json!({
            "table_name": table_name.as_str(),
            "index_name": index_name,
            "deleted": true,
        }))
    }
}

fn skipped_result(document_id: &str) -> Value {
    json!({
        "document_id": document_id,
        "skipped": true,
    })
}

fn is_retryable_conflict(err: &surrealdb::Error) -> bool {
    let text = err.to_string().to_lowercase();
    text.contains("conflict") || text.contains("retry") || text.contains("transaction")
}

#[derive(Debug, Deserialize)]
struct DocumentRequest {
    document_id: String,
}

#[derive(Debug, Deserialize)]
struct ExtractionRequest {
    document_id: String,
    #[serde(default)]
    settings: ExtractionSettings,
}

#[derive(Debug, Deserialize)]
struct DeleteIndexRequest {
    table_name: VectorTableName,
    index_name: String,
    #[serde(default)]
    #[allow(dead_code)]
    concurrently: bool,
}

/// Dispatches catalogue workflows onto the stage runner. Both orchestration
/// variants and the durable worker loop execute through this one type.
pub struct WorkflowExecutor {
    runner: StageRunner,
}

impl WorkflowExecutor {
    pub fn new(runner: StageRunner) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &StageRunner {
        &self.runner
    }

    pub async fn execute(
        &self,
        workflow: WorkflowName,
        payload: &Value,
    ) -> Result<Value, AppError> {
        let request = payload.get("request").ok_or_else(|| {
            AppError::Validation("workflow payload is missing the 'request' object".into())
        })?;

        match workflow {
            WorkflowName::IngestDocument => {
                let request: DocumentRequest = parse_request(request)?;
                self.runner.run_ingestion(&request.document_id).await
            }
            WorkflowName::ExtractEntities => {
                let request: ExtractionRequest = parse_request(request)?;
                self.runner
                    .run_extraction(&request.document_id, request.settings)
                    .await
            }
            WorkflowName::EnrichGraph => {
                let request: DocumentRequest = parse_request(request)?;
                self.runner.run_enrichment(&request.document_id).await
            }
            WorkflowName::CreateVectorIndex => {
                let config: IndexConfig = parse_request(request)?;
                self.runner.build_vector_index(config).await
            }
            WorkflowName::DeleteVectorIndex => {
                let request: DeleteIndexRequest = parse_request(request)?;
                self.runner
                    .drop_vector_index(request.table_name, &request.index_name)
                    .await
            }
        }
    }

    /// Run one claimed task to a terminal task state, with the retry ladder.
    pub async fn process_task(
        &self,
        task: WorkflowTask,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let task_id = task.id.clone();
        let attempt = task.attempts;
        let processing_task = task.mark_processing(db).await?;

        match self
            .execute(processing_task.workflow, &processing_task.payload)
            .await
        {
            Ok(_) => {
                processing_task.mark_succeeded(db).await?;
                info!(%task_id, attempt, "workflow task succeeded");
                Ok(())
            }
            Err(err) => {
                let reason = err.to_string();
                let error_info = TaskErrorInfo {
                    code: None,
                    message: reason.clone(),
                };
                let retryable = !matches!(
                    err,
                    AppError::PreconditionFailed(_)
                        | AppError::Validation(_)
                        | AppError::UnsupportedFormat(_)
                        | AppError::InvalidInput(_)
                );

                if retryable && processing_task.can_retry() {
                    let delay = retry_delay(processing_task.attempts);
                    processing_task.mark_failed(error_info, delay, db).await?;
                    warn!(
                        %task_id,
                        attempt = processing_task.attempts,
                        retry_in_secs = delay.as_secs(),
                        "workflow task failed; scheduled retry"
                    );
                } else {
                    processing_task.mark_dead_letter(error_info, db).await?;
                    warn!(
                        %task_id,
                        attempt = processing_task.attempts,
                        "workflow task failed; moved to dead letter queue"
                    );
                }

                Err(AppError::Processing(reason))
            }
        }
    }
}

fn retry_delay(attempt: u32) -> Duration {
    const BASE_SECONDS: u64 = 30;
    const MAX_SECONDS: u64 = 15 * 60;

    let capped_attempt = attempt.saturating_sub(1).min(5);
    let multiplier = 2_u64.pow(capped_attempt);
    let delay = BASE_SECONDS * multiplier;

    Duration::from_secs(delay.min(MAX_SECONDS))
}

fn parse_request<T: DeserializeOwned>(request: &Value) -> Result<T, AppError> {
    serde_json::from_value(request.clone())
        .map_err(|err| AppError::Validation(format!("malformed workflow request: {err}")))
}
