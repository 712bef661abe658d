//! Table state shared by the in-memory and file-backed stores.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use forge_primitives::ToolId;

use crate::error::{StoreError, StoreResult};
use crate::record::{
    GeneratedTool, GeneratedToolPatch, LogFilter, NewGeneratedTool, ToolCreationLog, ToolStatus,
};

#[derive(Debug, Default)]
pub(crate) struct StoreState {
    tools: HashMap<ToolId, GeneratedTool>,
    by_name: HashMap<String, ToolId>,
    logs: Vec<ToolCreationLog>,
    next_sequence: u64,
}

impl StoreState {
    pub(crate) fn create(
        &mut self,
        tool: NewGeneratedTool,
        now: DateTime<Utc>,
    ) -> StoreResult<GeneratedTool> {
        let record = self.prepare_create(tool, now)?;
        self.upsert(record.clone());
        Ok(record)
    }

    /// Builds the row [`StoreState::create`] would insert without inserting it.
    pub(crate) fn prepare_create(
        &self,
        tool: NewGeneratedTool,
        now: DateTime<Utc>,
    ) -> StoreResult<GeneratedTool> {
        if self.by_name.contains_key(tool.name.as_str()) {
            return Err(StoreError::Conflict {
                name: tool.name.to_string(),
            });
        }
        Ok(tool.into_record(now))
    }

    /// Inserts or replaces a row by id. Used for creation and replay.
    pub(crate) fn upsert(&mut self, record: GeneratedTool) {
        self.by_name.insert(record.name.to_string(), record.id);
        self.tools.insert(record.id, record);
    }

    pub(crate) fn list(&self, status: Option<ToolStatus>) -> Vec<GeneratedTool> {
        let mut tools: Vec<_> = self
            .tools
            .values()
            .filter(|tool| status.is_none_or(|status| tool.status == status))
            .cloned()
            .collect();
        tools.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        tools
    }

    pub(crate) fn by_name(&self, name: &str) -> Option<GeneratedTool> {
        self.by_name
            .get(name)
            .and_then(|id| self.tools.get(id))
            .cloned()
    }

    pub(crate) fn update(
        &mut self,
        id: ToolId,
        patch: GeneratedToolPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<(GeneratedTool, bool)> {
        let (tool, changed) = self.prepare_update(id, patch, now)?;
        if changed {
            self.upsert(tool.clone());
        }
        Ok((tool, changed))
    }

    /// Returns the patched row and whether anything changed; the table is
    /// left untouched.
    pub(crate) fn prepare_update(
        &self,
        id: ToolId,
        patch: GeneratedToolPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<(GeneratedTool, bool)> {
        let mut tool = self.tools.get(&id).cloned().ok_or(StoreError::NotFound { id })?;
        let changed = patch.apply(&mut tool, now);
        Ok((tool, changed))
    }

    pub(crate) fn increment_usage(
        &mut self,
        id: ToolId,
        now: DateTime<Utc>,
    ) -> StoreResult<GeneratedTool> {
        let tool = self.prepare_usage(id, now)?;
        self.upsert(tool.clone());
        Ok(tool)
    }

    pub(crate) fn prepare_usage(&self, id: ToolId, now: DateTime<Utc>) -> StoreResult<GeneratedTool> {
        let mut tool = self.tools.get(&id).cloned().ok_or(StoreError::NotFound { id })?;
        tool.usage_count += 1;
        tool.last_used_at = Some(now);
        Ok(tool)
    }

    /// Stamps the next sequence number and appends the row.
    pub(crate) fn append_log(&mut self, row: ToolCreationLog) -> ToolCreationLog {
        let row = self.stamp_log(row);
        self.replay_log(row.clone());
        row
    }

    /// Stamps the sequence number the next appended row will carry.
    pub(crate) fn stamp_log(&self, mut row: ToolCreationLog) -> ToolCreationLog {
        row.sequence = self.next_sequence + 1;
        row
    }

    /// Appends a row that already carries a sequence number.
    pub(crate) fn replay_log(&mut self, row: ToolCreationLog) {
        self.next_sequence = self.next_sequence.max(row.sequence);
        self.logs.push(row);
    }

    pub(crate) fn logs(&self, filter: &LogFilter) -> Vec<ToolCreationLog> {
        let mut rows: Vec<_> = self
            .logs
            .iter()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.sequence);
        if let Some(limit) = filter.limit {
            let skip = rows.len().saturating_sub(limit);
            rows.drain(..skip);
        }
        rows
    }

    pub(crate) fn tools(&self) -> impl Iterator<Item = &GeneratedTool> {
        self.tools.values()
    }

    pub(crate) fn all_logs(&self) -> &[ToolCreationLog] {
        &self.logs
    }
}
