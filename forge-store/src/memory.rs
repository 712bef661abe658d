//! In-process store used by tests and ephemeral servers.

use async_trait::async_trait;
use chrono::Utc;
use forge_primitives::ToolId;
use tokio::sync::RwLock;

use crate::StoreResult;
use crate::record::{
    GeneratedTool, GeneratedToolPatch, LogFilter, NewGeneratedTool, ToolCreationLog, ToolStatus,
};
use crate::state::StoreState;
use crate::store::ToolStore;

/// Volatile [`ToolStore`]; contents are lost when dropped.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<StoreState>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ToolStore for InMemoryStore {
    async fn create_generated_tool(&self, tool: NewGeneratedTool) -> StoreResult<GeneratedTool> {
        self.inner.write().await.create(tool, Utc::now())
    }

    async fn get_generated_tools(
        &self,
        status: Option<ToolStatus>,
    ) -> StoreResult<Vec<GeneratedTool>> {
        Ok(self.inner.read().await.list(status))
    }

    async fn get_generated_tool_by_name(&self, name: &str) -> StoreResult<Option<GeneratedTool>> {
        Ok(self.inner.read().await.by_name(name))
    }

    async fn update_generated_tool(
        &self,
        id: ToolId,
        patch: GeneratedToolPatch,
    ) -> StoreResult<GeneratedTool> {
        let (tool, _) = self.inner.write().await.update(id, patch, Utc::now())?;
        Ok(tool)
    }

    async fn increment_tool_usage(&self, id: ToolId) -> StoreResult<()> {
        self.inner.write().await.increment_usage(id, Utc::now())?;
        Ok(())
    }

    async fn log_tool_creation(&self, row: ToolCreationLog) -> StoreResult<ToolCreationLog> {
        Ok(self.inner.write().await.append_log(row))
    }

    async fn get_tool_creation_logs(
        &self,
        filter: &LogFilter,
    ) -> StoreResult<Vec<ToolCreationLog>> {
        Ok(self.inner.read().await.logs(filter))
    }
}

#[cfg(test)]
mod tests {
    use forge_primitives::{EvolutionId, ToolName};
    use serde_json::{Value, json};

    use super::*;
    use crate::StoreError;
    use crate::record::{CreationStage, SourceType, StageStatus};

    fn new_tool(name: &str) -> NewGeneratedTool {
        NewGeneratedTool {
            name: ToolName::new(name).unwrap(),
            description: format!("{name} tool"),
            category: "generated".into(),
            input_schema: json!({ "type": "object", "properties": {} }),
            handler_code: "return function(args) return args end".into(),
            source_type: SourceType::AiGenerated,
            source_url: None,
            source_data: Value::Null,
            test_results: Value::Null,
            security_scan: Value::Null,
        }
    }

    #[tokio::test]
    async fn names_stay_unique_across_statuses() {
        let store = InMemoryStore::new();
        let tool = store.create_generated_tool(new_tool("slugify")).await.unwrap();
        store
            .update_generated_tool(tool.id, GeneratedToolPatch::status(ToolStatus::Disabled))
            .await
            .unwrap();

        let err = store
            .create_generated_tool(new_tool("slugify"))
            .await
            .expect_err("duplicate");
        assert!(err.is_conflict());

        assert!(store.get_generated_tools(Some(ToolStatus::Active)).await.unwrap().is_empty());
        assert_eq!(store.get_generated_tools(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn usage_counter_increments() {
        let store = InMemoryStore::new();
        let tool = store.create_generated_tool(new_tool("count_me")).await.unwrap();
        store.increment_tool_usage(tool.id).await.unwrap();
        store.increment_tool_usage(tool.id).await.unwrap();

        let stored = store.get_generated_tool_by_name("count_me").await.unwrap().unwrap();
        assert_eq!(stored.usage_count, 2);
        assert!(stored.last_used_at.is_some());
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let store = InMemoryStore::new();
        let err = store
            .increment_tool_usage(ToolId::random())
            .await
            .expect_err("missing");
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn logs_are_sequenced_and_filtered() {
        let store = InMemoryStore::new();
        let run = EvolutionId::random();
        let other = EvolutionId::random();
        let name = ToolName::new("slugify").unwrap();

        for (id, stage) in [
            (run, CreationStage::Started),
            (other, CreationStage::Started),
            (run, CreationStage::Discovery),
            (run, CreationStage::Completed),
        ] {
            let row = ToolCreationLog::builder(id, name.clone(), stage, StageStatus::InProgress)
                .build();
            store.log_tool_creation(row).await.unwrap();
        }

        let rows = store
            .get_tool_creation_logs(&LogFilter::for_evolution(run))
            .await
            .unwrap();
        let stages: Vec<_> = rows.iter().map(|row| row.stage).collect();
        assert_eq!(
            stages,
            [
                CreationStage::Started,
                CreationStage::Discovery,
                CreationStage::Completed
            ]
        );
        assert!(rows.windows(2).all(|w| w[0].sequence < w[1].sequence));

        let limited = store
            .get_tool_creation_logs(&LogFilter {
                limit: Some(1),
                ..LogFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].stage, CreationStage::Completed);
    }
}
