use crate::storage::types::document_chunk::deserialize_flexible_id;
use crate::{error::AppError, storage::db::SurrealDbClient};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Provenance for a graph edge: which document produced it and which
/// collection's graph it belongs to. A back-reference, not ownership.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RelationshipMetadata {
    pub document_id: String,
    pub collection_id: String,
    pub predicate: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct KnowledgeRelationship {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    pub id: String,
    #[serde(rename = "in", deserialize_with = "deserialize_flexible_id")]
    pub in_: String,
    #[serde(deserialize_with = "deserialize_flexible_id")]
    pub out: String,
    pub metadata: RelationshipMetadata,
}

impl KnowledgeRelationship {
    pub fn new(
        in_: String,
        out: String,
        document_id: String,
        collection_id: String,
        predicate: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            in_,
            out,
            metadata: RelationshipMetadata {
                document_id,
                collection_id,
                predicate,
            },
        }
    }

    pub async fn store_relationship(&self, db: &SurrealDbClient) -> Result<(), AppError> {
        db.client
            .query(
                "RELATE (type::thing('knowledge_entity', $in_id))
                     ->relates_to->
                     (type::thing('knowledge_entity', $out_id))
                 CONTENT {
                     id: type::thing('relates_to', $id),
                     metadata: $metadata
                 }",
            )
            .bind(("in_id", self.in_.clone()))
            .bind(("out_id", self.out.clone()))
            .bind(("id", self.id.clone()))
            .bind(("metadata", self.metadata.clone()))
            .await?;

        Ok(())
    }

    /// Edges touching the given entity, in either direction.
    pub async fn list_for_entity(
        entity_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<KnowledgeRelationship>, AppError> {
        let mut result = db
            .client
            .query(
                "SELECT * FROM relates_to
                 WHERE in = type::thing('knowledge_entity', $entity_id)
                    OR out = type::thing('knowledge_entity', $entity_id)",
            )
            .bind(("entity_id", entity_id.to_string()))
            .await?;

        let relationships: Vec<KnowledgeRelationship> = result.take(0)?;
        Ok(relationships)
    }

    pub async fn delete_by_document_id(
        document_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query("DELETE relates_to WHERE metadata.document_id = $document_id")
            .bind(("document_id", document_id.to_string()))
            .await?;

        Ok(())
    }
}
