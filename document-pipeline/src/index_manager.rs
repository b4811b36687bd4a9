use std::sync::Arc;

use tracing::info;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::vector_index::{IndexConfig, IndexFilters, PageInfo, VectorIndex, VectorTableName},
    },
};

use crate::orchestration::{OrchestrationProvider, WorkflowOutcome, WorkflowRequest};

/// Create/list/get/delete for similarity-search indices. Builds and deletions
/// are dispatched as workflows since they can run for minutes over large
/// tables; reads are served synchronously.
pub struct IndexLifecycleManager {
    db: Arc<SurrealDbClient>,
    orchestration: Arc<dyn OrchestrationProvider>,
}

impl IndexLifecycleManager {
    pub fn new(db: Arc<SurrealDbClient>, orchestration: Arc<dyn OrchestrationProvider>) -> Self {
        Self { db, orchestration }
    }

    /// Validate the config, claim the `(table, name)` identity, and dispatch
    /// the build workflow. The returned outcome is the orchestration handle.
    pub async fn create_index(&self, config: IndexConfig) -> Result<WorkflowOutcome, AppError> {
        config.validate()?;

        let existing = VectorIndex::find(config.table_name, &config.index_name, &self.db).await?;
        if !existing.is_empty() {
            return Err(AppError::IndexNameConflict(format!(
                "index '{}' already exists on table '{}'",
                config.index_name,
                config.table_name.as_str()
            )));
        }

        let record = VectorIndex::from_config(&config);
        let record_id = record.id.clone();
        self.db.store_item(record).await?;

        info!(
            table = config.table_name.as_str(),
            index = %config.index_name,
            method = config.index_method.as_str(),
            measure = config.index_measure.as_str(),
            concurrently = config.concurrently,
            "dispatching vector index build"
        );

        match self
            .orchestration
            .run_workflow(WorkflowRequest::create_vector_index(&config))
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                // The build never started; release the claimed identity.
                self.db.delete_item::<VectorIndex>(&record_id).await?;
                Err(err)
            }
        }
    }

    /// Pure read over the index records, stable `index_name` ordering.
    pub async fn list_indices(
        &self,
        offset: usize,
        limit: usize,
        filters: &IndexFilters,
    ) -> Result<(Vec<VectorIndex>, PageInfo), AppError> {
        VectorIndex::list(&self.db, offset, limit, filters).await
    }

    pub async fn get_index(
        &self,
        table_name: VectorTableName,
        index_name: &str,
    ) -> Result<VectorIndex, AppError> {
        let mut matches = VectorIndex::find(table_name, index_name, &self.db).await?;
        match matches.len() {
            0 => Err(AppError::IndexNotFound(format!(
                "index '{index_name}' on table '{}'",
                table_name.as_str()
            ))),
            1 => Ok(matches.remove(0)),
            n => Err(AppError::InternalError(format!(
                "index '{index_name}' on table '{}' has {n} records; identity must be unique",
                table_name.as_str()
            ))),
        }
    }

    /// Dispatch removal of an existing index. Underlying vector rows are
    /// never touched.
    pub async fn delete_index(
        &self,
        table_name: VectorTableName,
        index_name: &str,
    ) -> Result<WorkflowOutcome, AppError> {
        // Existence (and uniqueness) check happens before any dispatch.
        self.get_index(table_name, index_name).await?;

        info!(
            table = table_name.as_str(),
            index = %index_name,
            "dispatching vector index deletion"
        );

        self.orchestration
            .run_workflow(WorkflowRequest::delete_vector_index(
                table_name, index_name, true,
            ))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::QueueOrchestrationProvider;
    use common::storage::types::vector_index::{IndexMeasure, IndexMethod, IndexState};
    use std::collections::HashMap;
    use uuid::Uuid;

    fn config(name: &str) -> IndexConfig {
        IndexConfig {
            table_name: VectorTableName::Vectors,
            index_method: IndexMethod::Hnsw,
            index_measure: IndexMeasure::Cosine,
            index_name: name.to_string(),
            index_column: None,
            index_arguments: HashMap::new(),
            concurrently: true,
        }
    }

    async fn manager() -> (IndexLifecycleManager, Arc<SurrealDbClient>) {
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
                .await
                .expect("in-memory surrealdb"),
        );
        let orchestration = Arc::new(QueueOrchestrationProvider::new(Arc::clone(&db)));
        (
            IndexLifecycleManager::new(Arc::clone(&db), orchestration),
            db,
        )
    }

    #[tokio::test]
    async fn create_records_identity_and_dispatches() {
        let (manager, _db) = manager().await;

        let outcome = manager.create_index(config("chunks_idx")).await.expect("create");
        assert!(matches!(outcome, WorkflowOutcome::Accepted { .. }));

        let record = manager
            .get_index(VectorTableName::Vectors, "chunks_idx")
            .await
            .expect("get");
        assert_eq!(record.state, IndexState::Building);
    }

    #[tokio::test]
    async fn duplicate_create_conflicts_and_leaves_record_unchanged() {
        let (manager, _db) = manager().await;

        manager.create_index(config("chunks_idx")).await.expect("create");
        let before = manager
            .get_index(VectorTableName::Vectors, "chunks_idx")
            .await
            .expect("get");

        let err = manager
            .create_index(config("chunks_idx"))
            .await
            .expect_err("duplicate must conflict");
        assert!(matches!(err, AppError::IndexNameConflict(_)));

        let after = manager
            .get_index(VectorTableName::Vectors, "chunks_idx")
            .await
            .expect("get");
        assert_eq!(before.id, after.id);
    }

    #[tokio::test]
    async fn same_name_on_other_table_is_allowed() {
        let (manager, _db) = manager().await;

        manager.create_index(config("shared_name")).await.expect("create");
        let entity_config = IndexConfig {
            table_name: VectorTableName::Entity,
            ..config("shared_name")
        };
        manager.create_index(entity_config).await.expect("create");
    }

    #[tokio::test]
    async fn get_and_delete_missing_index_not_found() {
        let (manager, _db) = manager().await;

        let err = manager
            .get_index(VectorTableName::Vectors, "absent")
            .await
            .expect_err("missing index");
        assert!(matches!(err, AppError::IndexNotFound(_)));

        let err = manager
            .delete_index(VectorTableName::Vectors, "absent")
            .await
            .expect_err("missing index");
        assert!(matches!(err, AppError::IndexNotFound(_)));
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_any_record() {
        let (manager, db) = manager().await;

        let mut bad = config("bad name with spaces");
        bad.index_name = "bad name".to_string();
        let err = manager.create_index(bad).await.expect_err("invalid name");
        assert!(matches!(err, AppError::Validation(_)));

        let all = db
            .get_all_stored_items::<VectorIndex>()
            .await
            .expect("list");
        assert!(all.is_empty());
    }
}
