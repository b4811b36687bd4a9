use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(DocumentChunk, "document_chunk", {
    document_id: String,
    ordinal: u32,
    text: String,
    embedding: Vec<f32>
});

impl DocumentChunk {
    pub fn new(document_id: String, ordinal: u32, text: String, embedding: Vec<f32>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            document_id,
            ordinal,
            text,
            embedding,
        }
    }

    pub async fn list_by_document(
        document_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<DocumentChunk>, AppError> {
        let chunks: Vec<DocumentChunk> = db
            .client
            .query(
                "SELECT * FROM type::table($table)
                 WHERE document_id = $document_id
                 ORDER BY ordinal ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("document_id", document_id.to_string()))
            .await?
            .take(0)?;

        Ok(chunks)
    }

    pub async fn count_for_document(
        document_id: &str,
        db: &SurrealDbClient,
    ) -> Result<u64, AppError> {
        #[derive(serde::Deserialize)]
        struct CountRow {
            count: u64,
        }

        let rows: Vec<CountRow> = db
            .client
            .query(
                "SELECT count() AS count FROM type::table($table)
                 WHERE document_id = $document_id GROUP ALL",
            )
            .bind(("table", Self::table_name()))
            .bind(("document_id", document_id.to_string()))
            .await?
            .take(0)?;

        Ok(rows.first().map(|row| row.count).unwrap_or(0))
    }

    pub async fn delete_by_document_id(
        document_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query("DELETE type::table($table) WHERE document_id = $document_id")
            .bind(("table", Self::table_name()))
            .bind(("document_id", document_id.to_string()))
            .await?;

        Ok(())
    }
}
