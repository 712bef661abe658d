//! Storage trait consumed by the registry and the evolution orchestrator.

use async_trait::async_trait;
use forge_primitives::ToolId;

use crate::StoreResult;
use crate::record::{
    GeneratedTool, GeneratedToolPatch, LogFilter, NewGeneratedTool, ToolCreationLog, ToolStatus,
};

/// Durable home of generated tools and the evolution audit log.
///
/// Implementations serialise writes so that audit rows observe a single
/// total order, exposed through [`ToolCreationLog::sequence`].
#[async_trait]
pub trait ToolStore: Send + Sync {
    /// Persists a new tool as `active`, version 1.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::Conflict`] if any row, disabled ones
    /// included, already uses the name.
    async fn create_generated_tool(&self, tool: NewGeneratedTool) -> StoreResult<GeneratedTool>;

    /// Lists tools, optionally restricted to one status, oldest first.
    async fn get_generated_tools(&self, status: Option<ToolStatus>)
    -> StoreResult<Vec<GeneratedTool>>;

    /// Looks a tool up by exact name regardless of status.
    async fn get_generated_tool_by_name(&self, name: &str) -> StoreResult<Option<GeneratedTool>>;

    /// Applies a partial update.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::NotFound`] for unknown ids.
    async fn update_generated_tool(
        &self,
        id: ToolId,
        patch: GeneratedToolPatch,
    ) -> StoreResult<GeneratedTool>;

    /// Bumps the usage counter and stamps `last_used_at`.
    async fn increment_tool_usage(&self, id: ToolId) -> StoreResult<()>;

    /// Appends an audit row and returns it with its sequence number.
    async fn log_tool_creation(&self, row: ToolCreationLog) -> StoreResult<ToolCreationLog>;

    /// Returns matching audit rows in insertion order.
    async fn get_tool_creation_logs(&self, filter: &LogFilter)
    -> StoreResult<Vec<ToolCreationLog>>;
}
