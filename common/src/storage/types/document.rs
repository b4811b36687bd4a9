use std::collections::HashMap;

use state_machines::state_machine;
use surrealdb::sql::Datetime as SurrealDatetime;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::{
    document_chunk::DocumentChunk, knowledge_entity::KnowledgeEntity,
    knowledge_relationship::KnowledgeRelationship, workflow_task::WorkflowTask,
};

/// Ingestion drives a document from raw content to stored, embedded chunks.
#[derive(Debug, Default, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IngestionStatus {
    #[default]
    Pending,
    Parsing,
    Chunking,
    Embedding,
    Stored,
    Failed,
}

impl IngestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestionStatus::Pending => "pending",
            IngestionStatus::Parsing => "parsing",
            IngestionStatus::Chunking => "chunking",
            IngestionStatus::Embedding => "embedding",
            IngestionStatus::Stored => "stored",
            IngestionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, IngestionStatus::Stored | IngestionStatus::Failed)
    }
}

/// Knowledge-graph extraction; only meaningful once ingestion reached `stored`.
#[derive(Debug, Default, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KgExtractionStatus {
    #[default]
    Pending,
    Extracting,
    Extracted,
    Failed,
}

impl KgExtractionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KgExtractionStatus::Pending => "pending",
            KgExtractionStatus::Extracting => "extracting",
            KgExtractionStatus::Extracted => "extracted",
            KgExtractionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            KgExtractionStatus::Extracted | KgExtractionStatus::Failed
        )
    }
}

/// Graph enrichment; only meaningful once extraction reached `extracted`.
#[derive(Debug, Default, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KgEnrichmentStatus {
    #[default]
    Pending,
    Enriching,
    Enriched,
    Failed,
}

impl KgEnrichmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KgEnrichmentStatus::Pending => "pending",
            KgEnrichmentStatus::Enriching => "enriching",
            KgEnrichmentStatus::Enriched => "enriched",
            KgEnrichmentStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            KgEnrichmentStatus::Enriched | KgEnrichmentStatus::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionEvent {
    StartParsing,
    StartChunking,
    StartEmbedding,
    Store,
    Fail,
    Reset,
}

impl IngestionEvent {
    fn as_str(&self) -> &'static str {
        match self {
            IngestionEvent::StartParsing => "start_parsing",
            IngestionEvent::StartChunking => "start_chunking",
            IngestionEvent::StartEmbedding => "start_embedding",
            IngestionEvent::Store => "store",
            IngestionEvent::Fail => "fail",
            IngestionEvent::Reset => "reset",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionEvent {
    Start,
    Complete,
    Fail,
    Reset,
}

impl ExtractionEvent {
    fn as_str(&self) -> &'static str {
        match self {
            ExtractionEvent::Start => "start",
            ExtractionEvent::Complete => "complete",
            ExtractionEvent::Fail => "fail",
            ExtractionEvent::Reset => "reset",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichmentEvent {
    Start,
    Complete,
    Fail,
    Reset,
}

impl EnrichmentEvent {
    fn as_str(&self) -> &'static str {
        match self {
            EnrichmentEvent::Start => "start",
            EnrichmentEvent::Complete => "complete",
            EnrichmentEvent::Fail => "fail",
            EnrichmentEvent::Reset => "reset",
        }
    }
}

/// The three processing stages, in their mandatory order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Ingestion,
    Extraction,
    Enrichment,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Ingestion => "ingestion",
            PipelineStage::Extraction => "extraction",
            PipelineStage::Enrichment => "enrichment",
        }
    }
}

mod ingestion_lifecycle {
    use super::state_machine;

    state_machine! {
        name: IngestionMachine,
        initial: Pending,
        states: [Pending, Parsing, Chunking, Embedding, Stored, Failed],
        events {
            start_parsing {
                transition: { from: Pending, to: Parsing }
            }
            start_chunking {
                transition: { from: Parsing, to: Chunking }
            }
            start_embedding {
                transition: { from: Chunking, to: Embedding }
            }
            store {
                transition: { from: Embedding, to: Stored }
            }
            fail {
                transition: { from: Pending, to: Failed }
                transition: { from: Parsing, to: Failed }
                transition: { from: Chunking, to: Failed }
                transition: { from: Embedding, to: Failed }
            }
            reset {
                transition: { from: Failed, to: Pending }
                transition: { from: Stored, to: Pending }
            }
        }
    }

    pub(super) fn pending() -> IngestionMachine<(), Pending> {
        IngestionMachine::new(())
    }

    pub(super) fn parsing() -> IngestionMachine<(), Parsing> {
        pending()
            .start_parsing()
            .expect("start_parsing transition from Pending should exist")
    }

    pub(super) fn chunking() -> IngestionMachine<(), Chunking> {
        parsing()
            .start_chunking()
            .expect("start_chunking transition from Parsing should exist")
    }

    pub(super) fn embedding() -> IngestionMachine<(), Embedding> {
        chunking()
            .start_embedding()
            .expect("start_embedding transition from Chunking should exist")
    }

    pub(super) fn stored() -> IngestionMachine<(), Stored> {
        embedding()
            .store()
            .expect("store transition from Embedding should exist")
    }

    pub(super) fn failed() -> IngestionMachine<(), Failed> {
        parsing()
            .fail()
            .expect("fail transition from Parsing should exist")
    }
}

mod extraction_lifecycle {
    use super::state_machine;

    state_machine! {
        name: ExtractionMachine,
        initial: Pending,
        states: [Pending, Extracting, Extracted, Failed],
        events {
            start {
                transition: { from: Pending, to: Extracting }
            }
            complete {
                transition: { from: Extracting, to: Extracted }
            }
            fail {
                transition: { from: Pending, to: Failed }
                transition: { from: Extracting, to: Failed }
            }
            reset {
                transition: { from: Failed, to: Pending }
                transition: { from: Extracted, to: Pending }
            }
        }
    }

    pub(super) fn pending() -> ExtractionMachine<(), Pending> {
        ExtractionMachine::new(())
    }

    pub(super) fn extracting() -> ExtractionMachine<(), Extracting> {
        pending()
            .start()
            .expect("start transition from Pending should exist")
    }

    pub(super) fn extracted() -> ExtractionMachine<(), Extracted> {
        extracting()
            .complete()
            .expect("complete transition from Extracting should exist")
    }

    pub(super) fn failed() -> ExtractionMachine<(), Failed> {
        extracting()
            .fail()
            .expect("fail transition from Extracting should exist")
    }
}

mod enrichment_lifecycle {
    use super::state_machine;

    state_machine! {
        name: EnrichmentMachine,
        initial: Pending,
        states: [Pending, Enriching, Enriched, Failed],
        events {
            start {
                transition: { from: Pending, to: Enriching }
            }
            complete {
                transition: { from: Enriching, to: Enriched }
            }
            fail {
                transition: { from: Pending, to: Failed }
                transition: { from: Enriching, to: Failed }
            }
            reset {
                transition: { from: Failed, to: Pending }
                transition: { from: Enriched, to: Pending }
            }
        }
    }

    pub(super) fn pending() -> EnrichmentMachine<(), Pending> {
        EnrichmentMachine::new(())
    }

    pub(super) fn enriching() -> EnrichmentMachine<(), Enriching> {
        pending()
            .start()
            .expect("start transition from Pending should exist")
    }

    pub(super) fn enriched() -> EnrichmentMachine<(), Enriched> {
        enriching()
            .complete()
            .expect("complete transition from Enriching should exist")
    }

    pub(super) fn failed() -> EnrichmentMachine<(), Failed> {
        enriching()
            .fail()
            .expect("fail transition from Enriching should exist")
    }
}

fn invalid_ingestion(state: &IngestionStatus, event: IngestionEvent) -> AppError {
    AppError::InvalidTransition {
        stage: "ingestion",
        from: state.as_str(),
        event: event.as_str(),
    }
}

fn invalid_extraction(state: &KgExtractionStatus, event: ExtractionEvent) -> AppError {
    AppError::InvalidTransition {
        stage: "extraction",
        from: state.as_str(),
        event: event.as_str(),
    }
}

fn invalid_enrichment(state: &KgEnrichmentStatus, event: EnrichmentEvent) -> AppError {
    AppError::InvalidTransition {
        stage: "enrichment",
        from: state.as_str(),
        event: event.as_str(),
    }
}

impl IngestionStatus {
    /// Compute the successor state for `event`, without side effects.
    pub fn transition(&self, event: IngestionEvent) -> Result<IngestionStatus, AppError> {
        use ingestion_lifecycle::*;
        if self.is_terminal() && event != IngestionEvent::Reset {
            return Err(AppError::AlreadyTerminal(self.as_str()));
        }
        match (self, event) {
            (IngestionStatus::Pending, IngestionEvent::StartParsing) => pending()
                .start_parsing()
                .map(|_| IngestionStatus::Parsing)
                .map_err(|_| invalid_ingestion(self, event)),
            (IngestionStatus::Parsing, IngestionEvent::StartChunking) => parsing()
                .start_chunking()
                .map(|_| IngestionStatus::Chunking)
                .map_err(|_| invalid_ingestion(self, event)),
            (IngestionStatus::Chunking, IngestionEvent::StartEmbedding) => chunking()
                .start_embedding()
                .map(|_| IngestionStatus::Embedding)
                .map_err(|_| invalid_ingestion(self, event)),
            (IngestionStatus::Embedding, IngestionEvent::Store) => embedding()
                .store()
                .map(|_| IngestionStatus::Stored)
                .map_err(|_| invalid_ingestion(self, event)),
            (IngestionStatus::Pending, IngestionEvent::Fail) => pending()
                .fail()
                .map(|_| IngestionStatus::Failed)
                .map_err(|_| invalid_ingestion(self, event)),
            (IngestionStatus::Parsing, IngestionEvent::Fail) => parsing()
                .fail()
                .map(|_| IngestionStatus::Failed)
                .map_err(|_| invalid_ingestion(self, event)),
            (IngestionStatus::Chunking, IngestionEvent::Fail) => chunking()
                .fail()
                .map(|_| IngestionStatus::Failed)
                .map_err(|_| invalid_ingestion(self, event)),
            (IngestionStatus::Embedding, IngestionEvent::Fail) => embedding()
                .fail()
                .map(|_| IngestionStatus::Failed)
                .map_err(|_| invalid_ingestion(self, event)),
            (IngestionStatus::Failed, IngestionEvent::Reset) => failed()
                .reset()
                .map(|_| IngestionStatus::Pending)
                .map_err(|_| invalid_ingestion(self, event)),
            (IngestionStatus::Stored, IngestionEvent::Reset) => stored()
                .reset()
                .map(|_| IngestionStatus::Pending)
                .map_err(|_| invalid_ingestion(self, event)),
            _ => Err(invalid_ingestion(self, event)),
        }
    }
}

impl KgExtractionStatus {
    pub fn transition(&self, event: ExtractionEvent) -> Result<KgExtractionStatus, AppError> {
        use extraction_lifecycle::*;
        if self.is_terminal() && event != ExtractionEvent::Reset {
            return Err(AppError::AlreadyTerminal(self.as_str()));
        }
        match (self, event) {
            (KgExtractionStatus::Pending, ExtractionEvent::Start) => pending()
                .start()
                .map(|_| KgExtractionStatus::Extracting)
                .map_err(|_| invalid_extraction(self, event)),
            (KgExtractionStatus::Extracting, ExtractionEvent::Complete) => extracting()
                .complete()
                .map(|_| KgExtractionStatus::Extracted)
                .map_err(|_| invalid_extraction(self, event)),
            (KgExtractionStatus::Pending, ExtractionEvent::Fail) => pending()
                .fail()
                .map(|_| KgExtractionStatus::Failed)
                .map_err(|_| invalid_extraction(self, event)),
            (KgExtractionStatus::Extracting, ExtractionEvent::Fail) => extracting()
                .fail()
                .map(|_| KgExtractionStatus::Failed)
                .map_err(|_| invalid_extraction(self, event)),
            (KgExtractionStatus::Failed, ExtractionEvent::Reset) => failed()
                .reset()
                .map(|_| KgExtractionStatus::Pending)
                .map_err(|_| invalid_extraction(self, event)),
            (KgExtractionStatus::Extracted, ExtractionEvent::Reset) => extracted()
                .reset()
                .map(|_| KgExtractionStatus::Pending)
                .map_err(|_| invalid_extraction(self, event)),
            _ => Err(invalid_extraction(self, event)),
        }
    }
}

impl KgEnrichmentStatus {
    pub fn transition(&self, event: EnrichmentEvent) -> Result<KgEnrichmentStatus, AppError> {
        use enrichment_lifecycle::*;
        if self.is_terminal() && event != EnrichmentEvent::Reset {
            return Err(AppError::AlreadyTerminal(self.as_str()));
        }
        match (self, event) {
            (KgEnrichmentStatus::Pending, EnrichmentEvent::Start) => pending()
                .start()
                .map(|_| KgEnrichmentStatus::Enriching)
                .map_err(|_| invalid_enrichment(self, event)),
            (KgEnrichmentStatus::Enriching, EnrichmentEvent::Complete) => enriching()
                .complete()
                .map(|_| KgEnrichmentStatus::Enriched)
                .map_err(|_| invalid_enrichment(self, event)),
            (KgEnrichmentStatus::Pending, EnrichmentEvent::Fail) => pending()
                .fail()
                .map(|_| KgEnrichmentStatus::Failed)
                .map_err(|_| invalid_enrichment(self, event)),
            (KgEnrichmentStatus::Enriching, EnrichmentEvent::Fail) => enriching()
                .fail()
                .map(|_| KgEnrichmentStatus::Failed)
                .map_err(|_| invalid_enrichment(self, event)),
            (KgEnrichmentStatus::Failed, EnrichmentEvent::Reset) => failed()
                .reset()
                .map(|_| KgEnrichmentStatus::Pending)
                .map_err(|_| invalid_enrichment(self, event)),
            (KgEnrichmentStatus::Enriched, EnrichmentEvent::Reset) => enriched()
                .reset()
                .map(|_| KgEnrichmentStatus::Pending)
                .map_err(|_| invalid_enrichment(self, event)),
            _ => Err(invalid_enrichment(self, event)),
        }
    }
}

/// Whether a stage may start given the document's predecessor-stage statuses.
pub fn can_proceed(stage: PipelineStage, document: &Document) -> bool {
    match stage {
        PipelineStage::Ingestion => true,
        PipelineStage::Extraction => document.ingestion_status == IngestionStatus::Stored,
        PipelineStage::Enrichment => document.extraction_status == KgExtractionStatus::Extracted,
    }
}

stored_object!(Document, "document", {
    title: String,
    mime_type: String,
    content: String,
    metadata: HashMap<String, serde_json::Value>,
    collection_ids: Vec<String>,
    summary: Option<String>,
    summary_embedding: Option<Vec<f32>>,
    ingestion_status: IngestionStatus,
    extraction_status: KgExtractionStatus,
    enrichment_status: KgEnrichmentStatus,
    ingestion_error: Option<String>,
    extraction_error: Option<String>,
    enrichment_error: Option<String>
});

impl Document {
    pub fn new(
        title: String,
        mime_type: String,
        content: String,
        metadata: HashMap<String, serde_json::Value>,
        collection_ids: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            title,
            mime_type,
            content,
            metadata,
            collection_ids,
            summary: None,
            summary_embedding: None,
            ingestion_status: IngestionStatus::Pending,
            extraction_status: KgExtractionStatus::Pending,
            enrichment_status: KgEnrichmentStatus::Pending,
            ingestion_error: None,
            extraction_error: None,
            enrichment_error: None,
        }
    }

    /// The collection whose graph extraction writes into.
    pub fn primary_collection(&self) -> &str {
        self.collection_ids
            .first()
            .map(String::as_str)
            .unwrap_or("default")
    }

    /// Advance the ingestion status with a guarded single-statement update.
    ///
    /// Returns `Ok(None)` when the document vanished or another writer moved
    /// it first; the caller must treat that as "someone else owns this run".
    pub async fn apply_ingestion_event(
        id: &str,
        event: IngestionEvent,
        reason: Option<String>,
        db: &SurrealDbClient,
    ) -> Result<Option<Document>, AppError> {
        let Some(current) = db.get_item::<Document>(id).await? else {
            return Ok(None);
        };
        let next = current.ingestion_status.transition(event)?;

        const ADVANCE_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET ingestion_status = $next,
                ingestion_error = $reason,
                updated_at = $now
            WHERE ingestion_status = $current
            RETURN AFTER;
        "#;

        let mut result = db
            .client
            .query(ADVANCE_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_string()))
            .bind(("next", next.as_str()))
            .bind(("current", current.ingestion_status.as_str()))
            .bind(("reason", reason))
            .bind(("now", SurrealDatetime::from(Utc::now())))
            .await?;

        let updated: Option<Document> = result.take(0)?;
        Ok(updated)
    }

    pub async fn apply_extraction_event(
        id: &str,
        event: ExtractionEvent,
        reason: Option<String>,
        db: &SurrealDbClient,
    ) -> Result<Option<Document>, AppError> {
        let Some(current) = db.get_item::<Document>(id).await? else {
            return Ok(None);
        };
        let next = current.extraction_status.transition(event)?;

        // Re-running extraction invalidates any prior enrichment of the graph.
        const ADVANCE_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET extraction_status = $next,
                extraction_error = $reason,
                enrichment_status = if $event = 'reset' THEN 'pending' ELSE enrichment_status END,
                enrichment_error = if $event = 'reset' THEN NONE ELSE enrichment_error END,
                updated_at = $now
            WHERE extraction_status = $current
            RETURN AFTER;
        "#;

        let mut result = db
            .client
            .query(ADVANCE_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_string()))
            .bind(("next", next.as_str()))
            .bind(("current", current.extraction_status.as_str()))
            .bind(("event", event.as_str()))
            .bind(("reason", reason))
            .bind(("now", SurrealDatetime::from(Utc::now())))
            .await?;

        let updated: Option<Document> = result.take(0)?;
        Ok(updated)
    }

    pub async fn apply_enrichment_event(
        id: &str,
        event: EnrichmentEvent,
        reason: Option<String>,
        db: &SurrealDbClient,
    ) -> Result<Option<Document>, AppError> {
        let Some(current) = db.get_item::<Document>(id).await? else {
            return Ok(None);
        };
        let next = current.enrichment_status.transition(event)?;

        const ADVANCE_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET enrichment_status = $next,
                enrichment_error = $reason,
                updated_at = $now
            WHERE enrichment_status = $current
            RETURN AFTER;
        "#;

        let mut result = db
            .client
            .query(ADVANCE_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_string()))
            .bind(("next", next.as_str()))
            .bind(("current", current.enrichment_status.as_str()))
            .bind(("reason", reason))
            .bind(("now", SurrealDatetime::from(Utc::now())))
            .await?;

        let updated: Option<Document> = result.take(0)?;
        Ok(updated)
    }

    /// Reset a failed document for a fresh ingestion run. All three stage
    /// statuses are cleared in one statement so no observer sees a partial
    /// reset.
    pub async fn reset_for_resubmission(
        id: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Document>, AppError> {
        let Some(current) = db.get_item::<Document>(id).await? else {
            return Ok(None);
        };
        current
            .ingestion_status
            .transition(IngestionEvent::Reset)?;

        const RESET_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET ingestion_status = 'pending',
                extraction_status = 'pending',
                enrichment_status = 'pending',
                ingestion_error = NONE,
                extraction_error = NONE,
                enrichment_error = NONE,
                updated_at = $now
            WHERE ingestion_status = $current
            RETURN AFTER;
        "#;

        let mut result = db
            .client
            .query(RESET_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_string()))
            .bind(("current", current.ingestion_status.as_str()))
            .bind(("now", SurrealDatetime::from(Utc::now())))
            .await?;

        let updated: Option<Document> = result.take(0)?;
        Ok(updated)
    }

    pub async fn set_summary(
        id: &str,
        summary: String,
        summary_embedding: Vec<f32>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing($table, $id)
                 SET summary = $summary,
                     summary_embedding = $embedding,
                     updated_at = $now",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_string()))
            .bind(("summary", summary))
            .bind(("embedding", summary_embedding))
            .bind(("now", SurrealDatetime::from(Utc::now())))
            .await?;
        Ok(())
    }

    /// A stable page of the catalogue plus the total entry count.
    pub async fn list_paginated(
        db: &SurrealDbClient,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<Document>, u64), AppError> {
        let mut result = db
            .client
            .query(
                "SELECT * FROM type::table($table)
                 ORDER BY created_at ASC, id ASC
                 LIMIT $limit START $offset;
                 SELECT count() AS count FROM type::table($table) GROUP ALL;",
            )
            .bind(("table", Self::table_name()))
            .bind(("limit", limit))
            .bind(("offset", offset))
            .await?;

        let documents: Vec<Document> = result.take(0)?;
        let counts: Vec<CountRow> = result.take(1)?;
        let total = counts.first().map(|row| row.count).unwrap_or(0);

        Ok((documents, total))
    }

    /// Explicit document deletion: cancels in-flight work, then removes the
    /// document and everything it owns or produced.
    pub async fn delete_with_dependents(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        WorkflowTask::cancel_active_for_document(id, db).await?;
        DocumentChunk::delete_by_document_id(id, db).await?;
        KnowledgeRelationship::delete_by_document_id(id, db).await?;
        KnowledgeEntity::delete_by_document_id(id, db).await?;
        db.delete_item::<Document>(id).await?;
        Ok(())
    }
}

#[derive(Debug, serde::Deserialize)]
struct CountRow {
    count: u64,
}
