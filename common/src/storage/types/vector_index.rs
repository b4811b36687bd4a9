use std::collections::HashMap;

use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// The fixed set of tables a similarity index may be built over.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VectorTableName {
    Vectors,
    Entity,
    DocumentCollections,
}

impl VectorTableName {
    pub fn as_str(&self) -> &'static str {
        match self {
            VectorTableName::Vectors => "vectors",
            VectorTableName::Entity => "entity",
            VectorTableName::DocumentCollections => "document_collections",
        }
    }

    /// The physical table the logical name maps onto.
    pub fn target_table(&self) -> &'static str {
        match self {
            VectorTableName::Vectors => "document_chunk",
            VectorTableName::Entity => "knowledge_entity",
            VectorTableName::DocumentCollections => "document",
        }
    }

    /// Default embedding column when the request leaves `index_column` unset.
    pub fn default_column(&self) -> &'static str {
        match self {
            VectorTableName::Vectors | VectorTableName::Entity => "embedding",
            VectorTableName::DocumentCollections => "summary_embedding",
        }
    }
}

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IndexMethod {
    Hnsw,
    IvfFlat,
}

impl IndexMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexMethod::Hnsw => "hnsw",
            IndexMethod::IvfFlat => "ivf_flat",
        }
    }

    /// Argument keys this method understands.
    fn allowed_arguments(&self) -> &'static [&'static str] {
        match self {
            IndexMethod::Hnsw => &["m", "ef_construction", "ef"],
            IndexMethod::IvfFlat => &["lists", "probe"],
        }
    }
}

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IndexMeasure {
    Cosine,
    L2,
    InnerProduct,
}

impl IndexMeasure {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexMeasure::Cosine => "cosine",
            IndexMeasure::L2 => "l2",
            IndexMeasure::InnerProduct => "inner_product",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IndexState {
    #[default]
    Building,
    Ready,
    Failed,
}

impl IndexState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexState::Building => "building",
            IndexState::Ready => "ready",
            IndexState::Failed => "failed",
        }
    }
}

/// A create-index request. Immutable once the build has been dispatched.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct IndexConfig {
    pub table_name: VectorTableName,
    pub index_method: IndexMethod,
    pub index_measure: IndexMeasure,
    pub index_name: String,
    #[serde(default)]
    pub index_column: Option<String>,
    #[serde(default)]
    pub index_arguments: HashMap<String, serde_json::Value>,
    #[serde(default = "default_concurrently")]
    pub concurrently: bool,
}

fn default_concurrently() -> bool {
    true
}

impl IndexConfig {
    pub fn column(&self) -> &str {
        self.index_column
            .as_deref()
            .unwrap_or_else(|| self.table_name.default_column())
    }

    /// Validate the request before any workflow is dispatched. Index names are
    /// spliced into DDL statements, so they must stay plain identifiers.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.index_name.is_empty() {
            return Err(AppError::Validation("index_name must not be empty".into()));
        }
        if !self
            .index_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(AppError::Validation(format!(
                "index_name '{}' may only contain alphanumerics and underscores",
                self.index_name
            )));
        }
        if let Some(column) = self.index_column.as_deref() {
            if column.is_empty() || !column.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Err(AppError::Validation(format!(
                    "index_column '{column}' may only contain alphanumerics and underscores"
                )));
            }
        }

        let allowed = self.index_method.allowed_arguments();
        for (key, value) in &self.index_arguments {
            if !allowed.contains(&key.as_str()) {
                return Err(AppError::Validation(format!(
                    "argument '{key}' is not valid for method '{}'",
                    self.index_method.as_str()
                )));
            }
            match value.as_u64() {
                Some(v) if v > 0 => {}
                _ => {
                    return Err(AppError::Validation(format!(
                        "argument '{key}' must be a positive integer"
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn argument(&self, key: &str) -> Option<u64> {
        self.index_arguments.get(key).and_then(|v| v.as_u64())
    }
}

stored_object!(VectorIndex, "vector_index", {
    table_name: VectorTableName,
    index_method: IndexMethod,
    index_measure: IndexMeasure,
    index_name: String,
    index_column: String,
    index_arguments: HashMap<String, serde_json::Value>,
    concurrently: bool,
    state: IndexState
});

/// Pagination envelope returned alongside index listings.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct PageInfo {
    pub offset: usize,
    pub limit: usize,
    pub total_entries: u64,
}

/// Optional listing filters; both match exactly.
#[derive(Debug, Clone, Default)]
pub struct IndexFilters {
    pub table_name: Option<VectorTableName>,
    pub index_name: Option<String>,
}

impl VectorIndex {
    pub fn from_config(config: &IndexConfig) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            table_name: config.table_name,
            index_method: config.index_method,
            index_measure: config.index_measure,
            index_name: config.index_name.clone(),
            index_column: config.column().to_string(),
            index_arguments: config.index_arguments.clone(),
            concurrently: config.concurrently,
            state: IndexState::Building,
        }
    }

    pub fn to_config(&self) -> IndexConfig {
        IndexConfig {
            table_name: self.table_name,
            index_method: self.index_method,
            index_measure: self.index_measure,
            index_name: self.index_name.clone(),
            index_column: Some(self.index_column.clone()),
            index_arguments: self.index_arguments.clone(),
            concurrently: self.concurrently,
        }
    }

    /// All records matching a `(table, name)` identity. More than one is an
    /// internal-consistency violation the caller must surface, not swallow.
    pub async fn find(
        table_name: VectorTableName,
        index_name: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<VectorIndex>, AppError> {
        let mut result = db
            .client
            .query(
                "SELECT * FROM type::table($table)
                 WHERE table_name = $table_name AND index_name = $index_name",
            )
            .bind(("table", Self::table_name()))
            .bind(("table_name", table_name.as_str()))
            .bind(("index_name", index_name.to_string()))
            .await?;

        let records: Vec<VectorIndex> = result.take(0)?;
        Ok(records)
    }

    /// Page through index records in stable `index_name` order.
    pub async fn list(
        db: &SurrealDbClient,
        offset: usize,
        limit: usize,
        filters: &IndexFilters,
    ) -> Result<(Vec<VectorIndex>, PageInfo), AppError> {
        let table_filter = filters.table_name.map(|t| t.as_str().to_string());
        let name_filter = filters.index_name.clone();

        const LIST_QUERY: &str = r#"
            SELECT * FROM type::table($table)
            WHERE ($table_name = NONE OR table_name = $table_name)
              AND ($index_name = NONE OR index_name = $index_name)
            ORDER BY index_name ASC
            LIMIT $limit START $offset;
            SELECT count() AS count FROM type::table($table)
            WHERE ($table_name = NONE OR table_name = $table_name)
              AND ($index_name = NONE OR index_name = $index_name)
            GROUP ALL;
        "#;

        let mut result = db
            .client
            .query(LIST_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("table_name", table_filter))
            .bind(("index_name", name_filter))
            .bind(("limit", limit))
            .bind(("offset", offset))
            .await?;

        let indices: Vec<VectorIndex> = result.take(0)?;
        let counts: Vec<CountRow> = result.take(1)?;
        let total_entries = counts.first().map(|row| row.count).unwrap_or(0);

        Ok((
            indices,
            PageInfo {
                offset,
                limit,
                total_entries,
            },
        ))
    }

    pub async fn set_state(
        id: &str,
        state: IndexState,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing($table, $id)
                 SET state = $state, updated_at = time::now()",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_string()))
            .bind(("state", state.as_str()))
            .await?;
        Ok(())
    }
}

#[derive(Debug, serde::Deserialize)]
struct CountRow {
    count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hnsw_config(name: &str) -> IndexConfig {
        IndexConfig {
            table_name: VectorTableName::Vectors,
            index_method: IndexMethod::Hnsw,
            index_measure: IndexMeasure::Cosine,
            index_name: name.to_string(),
            index_column: None,
            index_arguments: HashMap::from([
                ("m".to_string(), json!(16)),
                ("ef_construction".to_string(), json!(64)),
            ]),
            concurrently: true,
        }
    }

    async fn memory_db() -> SurrealDbClient {
        SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surrealdb")
    }

    #[test]
    fn validate_accepts_known_arguments() {
        hnsw_config("chunks_hnsw").validate().expect("valid config");
    }

    #[test]
    fn validate_rejects_foreign_arguments() {
        let mut config = hnsw_config("chunks_hnsw");
        config
            .index_arguments
            .insert("lists".to_string(), json!(100));
        let err = config.validate().expect_err("lists is an ivf_flat key");
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn validate_rejects_non_positive_arguments() {
        let mut config = hnsw_config("chunks_hnsw");
        config.index_arguments.insert("m".to_string(), json!(0));
        assert!(config.validate().is_err());
        config.index_arguments.insert("m".to_string(), json!("16"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_hostile_index_names() {
        let mut config = hnsw_config("ok_name");
        config.index_name = "x; REMOVE TABLE document".to_string();
        assert!(config.validate().is_err());
        config.index_name = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn default_columns_follow_table() {
        assert_eq!(hnsw_config("a").column(), "embedding");
        let config = IndexConfig {
            table_name: VectorTableName::DocumentCollections,
            ..hnsw_config("a")
        };
        assert_eq!(config.column(), "summary_embedding");
    }

    #[tokio::test]
    async fn list_is_stably_ordered_and_counted() {
        let db = memory_db().await;
        for name in ["zeta", "alpha", "midway"] {
            let record = VectorIndex::from_config(&hnsw_config(name));
            db.store_item(record).await.expect("store");
        }

        let (indices, page_info) =
            VectorIndex::list(&db, 0, 10, &IndexFilters::default())
                .await
                .expect("list");
        let names: Vec<&str> = indices.iter().map(|i| i.index_name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "midway", "zeta"]);
        assert_eq!(page_info.total_entries, 3);

        let (page, page_info) = VectorIndex::list(&db, 1, 1, &IndexFilters::default())
            .await
            .expect("list");
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].index_name, "midway");
        assert_eq!(page_info.total_entries, 3);
    }

    #[tokio::test]
    async fn list_filters_by_table_and_name() {
        let db = memory_db().await;
        db.store_item(VectorIndex::from_config(&hnsw_config("chunks_idx")))
            .await
            .expect("store");
        let entity_config = IndexConfig {
            table_name: VectorTableName::Entity,
            ..hnsw_config("entity_idx")
        };
        db.store_item(VectorIndex::from_config(&entity_config))
            .await
            .expect("store");

        let filters = IndexFilters {
            table_name: Some(VectorTableName::Entity),
            index_name: None,
        };
        let (indices, page_info) = VectorIndex::list(&db, 0, 10, &filters).await.expect("list");
        assert_eq!(indices.len(), 1);
        assert_eq!(indices[0].index_name, "entity_idx");
        assert_eq!(page_info.total_entries, 1);

        let filters = IndexFilters {
            table_name: None,
            index_name: Some("chunks_idx".to_string()),
        };
        let (indices, _) = VectorIndex::list(&db, 0, 10, &filters).await.expect("list");
        assert_eq!(indices.len(), 1);
        assert_eq!(indices[0].table_name, VectorTableName::Vectors);
    }

    #[tokio::test]
    async fn find_matches_identity() {
        let db = memory_db().await;
        db.store_item(VectorIndex::from_config(&hnsw_config("chunks_idx")))
            .await
            .expect("store");

        let hits = VectorIndex::find(VectorTableName::Vectors, "chunks_idx", &db)
            .await
            .expect("find");
        assert_eq!(hits.len(), 1);

        let misses = VectorIndex::find(VectorTableName::Entity, "chunks_idx", &db)
            .await
            .expect("find");
        assert!(misses.is_empty());
    }
}
