use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(KnowledgeEntity, "knowledge_entity", {
    document_id: String,
    collection_id: String,
    name: String,
    normalized_name: String,
    entity_type: String,
    description: String,
    embedding: Vec<f32>
});

/// Canonical dedup key for an entity name: NFKC, casefolded, single-spaced.
pub fn normalize_entity_name(name: &str) -> String {
    name.nfkc()
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

impl KnowledgeEntity {
    pub fn new(
        document_id: String,
        collection_id: String,
        name: String,
        entity_type: String,
        description: String,
        embedding: Vec<f32>,
    ) -> Self {
        let now = Utc::now();
        let normalized_name = normalize_entity_name(&name);
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            document_id,
            collection_id,
            name,
            normalized_name,
            entity_type,
            description,
            embedding,
        }
    }

    /// Look up an entity with the same identity within a collection's graph.
    pub async fn find_duplicate(
        collection_id: &str,
        name: &str,
        entity_type: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<KnowledgeEntity>, AppError> {
        let mut result = db
            .client
            .query(
                "SELECT * FROM type::table($table)
                 WHERE collection_id = $collection_id
                   AND normalized_name = $normalized_name
                   AND entity_type = $entity_type
                 LIMIT 1",
            )
            .bind(("table", Self::table_name()))
            .bind(("collection_id", collection_id.to_string()))
            .bind(("normalized_name", normalize_entity_name(name)))
            .bind(("entity_type", entity_type.to_string()))
            .await?;

        let existing: Vec<KnowledgeEntity> = result.take(0)?;
        Ok(existing.into_iter().next())
    }

    pub async fn list_by_document(
        document_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<KnowledgeEntity>, AppError> {
        let entities: Vec<KnowledgeEntity> = db
            .client
            .query(
                "SELECT * FROM type::table($table)
                 WHERE document_id = $document_id
                 ORDER BY name ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("document_id", document_id.to_string()))
            .await?
            .take(0)?;

        Ok(entities)
    }

    pub async fn update_enrichment(
        id: &str,
        description: &str,
        embedding: Vec<f32>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing($table, $id)
                 SET description = $description,
                     embedding = $embedding,
                     updated_at = time::now()",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_string()))
            .bind(("description", description.to_string()))
            .bind(("embedding", embedding))
            .await?;

        Ok(())
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

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_db() -> SurrealDbClient {
        SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surrealdb")
    }

    #[test]
    fn normalization_collapses_case_and_spacing() {
        assert_eq!(normalize_entity_name("Ada   Lovelace"), "ada lovelace");
        assert_eq!(normalize_entity_name("  ADA Lovelace "), "ada lovelace");
        // NFKC folds compatibility forms such as the ligature.
        assert_eq!(normalize_entity_name("ﬁrst"), "first");
    }

    #[tokio::test]
    async fn test_find_duplicate_matches_normalized_identity() {
        let db = memory_db().await;
        let entity = KnowledgeEntity::new(
            "doc-1".to_string(),
            "col-1".to_string(),
            "Ada Lovelace".to_string(),
            "person".to_string(),
            "Mathematician".to_string(),
            vec![0.1, 0.2],
        );
        db.store_item(entity.clone()).await.expect("store");

        let hit = KnowledgeEntity::find_duplicate("col-1", "ada   LOVELACE", "person", &db)
            .await
            .expect("query");
        assert_eq!(hit.map(|e| e.id), Some(entity.id.clone()));

        // Different type or collection is a different identity.
        let miss = KnowledgeEntity::find_duplicate("col-1", "Ada Lovelace", "place", &db)
            .await
            .expect("query");
        assert!(miss.is_none());
        let miss = KnowledgeEntity::find_duplicate("col-2", "Ada Lovelace", "person", &db)
            .await
            .expect("query");
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn test_delete_by_document_id() {
        let db = memory_db().await;
        let keep = KnowledgeEntity::new(
            "doc-keep".to_string(),
            "col-1".to_string(),
            "Keeper".to_string(),
            "person".to_string(),
            String::new(),
            vec![0.1],
        );
        let dropped = KnowledgeEntity::new(
            "doc-drop".to_string(),
            "col-1".to_string(),
            "Dropped".to_string(),
            "person".to_string(),
            String::new(),
            vec![0.1],
        );
        db.store_item(keep.clone()).await.expect("store");
        db.store_item(dropped).await.expect("store");

        KnowledgeEntity::delete_by_document_id("doc-drop", &db)
            .await
            .expect("delete");

        let remaining = KnowledgeEntity::list_by_document("doc-drop", &db)
            .await
            .expect("list");
        assert!(remaining.is_empty());
        let kept = KnowledgeEntity::list_by_document("doc-keep", &db)
            .await
            .expect("list");
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, keep.id);
    }
}
