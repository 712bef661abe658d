//! Persisted row types.

use std::fmt::{self, Display, Formatter};

use chrono::{DateTime, Utc};
use forge_primitives::{EvolutionId, LogId, ToolId, ToolName};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Where a generated tool's implementation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceType {
    /// Adapted from a code-repository hit.
    RepoSearch,
    /// Adapted from an API-collection hit.
    ApiCollectionSearch,
    /// Written by the model without a reference.
    AiGenerated,
}

impl SourceType {
    /// Stable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RepoSearch => "repo-search",
            Self::ApiCollectionSearch => "api-collection-search",
            Self::AiGenerated => "ai-generated",
        }
    }
}

impl Display for SourceType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a generated tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    /// Loaded into the registry and callable.
    Active,
    /// Soft-deleted; kept for audit and name uniqueness.
    Disabled,
}

/// A persisted generated tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedTool {
    /// Row id.
    pub id: ToolId,
    /// Unique tool name.
    pub name: ToolName,
    /// What the tool does.
    pub description: String,
    /// Grouping label.
    pub category: String,
    /// Argument schema.
    pub input_schema: Value,
    /// Lua handler source.
    pub handler_code: String,
    /// Provenance of the implementation.
    pub source_type: SourceType,
    /// Link to the reference the tool was adapted from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    /// Source-specific provenance details.
    #[serde(default)]
    pub source_data: Value,
    /// Starts at 1; bumped whenever `handler_code` changes.
    pub version: u32,
    /// Lifecycle status.
    pub status: ToolStatus,
    /// Sandbox report captured at registration.
    #[serde(default)]
    pub test_results: Value,
    /// Security scan captured at registration.
    #[serde(default)]
    pub security_scan: Value,
    /// Number of executions.
    pub usage_count: u64,
    /// Time of the last execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    /// Insertion time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when registering a generated tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewGeneratedTool {
    /// Unique tool name.
    pub name: ToolName,
    /// What the tool does.
    pub description: String,
    /// Grouping label.
    pub category: String,
    /// Argument schema.
    pub input_schema: Value,
    /// Lua handler source.
    pub handler_code: String,
    /// Provenance of the implementation.
    pub source_type: SourceType,
    /// Link to the reference the tool was adapted from.
    pub source_url: Option<String>,
    /// Source-specific provenance details.
    pub source_data: Value,
    /// Sandbox report.
    pub test_results: Value,
    /// Security scan.
    pub security_scan: Value,
}

impl NewGeneratedTool {
    /// Materialises an active, version-1 row.
    #[must_use]
    pub fn into_record(self, now: DateTime<Utc>) -> GeneratedTool {
        GeneratedTool {
            id: ToolId::random(),
            name: self.name,
            description: self.description,
            category: self.category,
            input_schema: self.input_schema,
            handler_code: self.handler_code,
            source_type: self.source_type,
            source_url: self.source_url,
            source_data: self.source_data,
            version: 1,
            status: ToolStatus::Active,
            test_results: self.test_results,
            security_scan: self.security_scan,
            usage_count: 0,
            last_used_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update of a generated tool. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratedToolPatch {
    /// New description.
    pub description: Option<String>,
    /// New category.
    pub category: Option<String>,
    /// New argument schema.
    pub input_schema: Option<Value>,
    /// New handler source; bumps the version when it differs.
    pub handler_code: Option<String>,
    /// New status.
    pub status: Option<ToolStatus>,
    /// New sandbox report.
    pub test_results: Option<Value>,
    /// New security scan.
    pub security_scan: Option<Value>,
}

impl GeneratedToolPatch {
    /// Patch that only changes the status.
    #[must_use]
    pub fn status(status: ToolStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Applies the patch, returning `true` when anything changed.
    pub fn apply(self, tool: &mut GeneratedTool, now: DateTime<Utc>) -> bool {
        let mut changed = false;
        if let Some(code) = self.handler_code {
            if code != tool.handler_code {
                tool.handler_code = code;
                tool.version += 1;
                changed = true;
            }
        }
        changed |= replace(&mut tool.description, self.description);
        changed |= replace(&mut tool.category, self.category);
        changed |= replace(&mut tool.input_schema, self.input_schema);
        changed |= replace(&mut tool.status, self.status);
        changed |= replace(&mut tool.test_results, self.test_results);
        changed |= replace(&mut tool.security_scan, self.security_scan);
        if changed {
            tool.updated_at = now;
        }
        changed
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: Option<T>) -> bool {
    match value {
        Some(value) if *slot != value => {
            *slot = value;
            true
        }
        _ => false,
    }
}

/// Stage of an evolution run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationStage {
    /// Run accepted.
    Started,
    /// Searching for prior art.
    Discovery,
    /// Asking the model for an implementation.
    Generation,
    /// Running the candidate in the sandbox.
    Testing,
    /// Persisting the tool.
    Registration,
    /// Terminal success.
    Completed,
    /// Terminal failure.
    Error,
}

impl CreationStage {
    /// Stable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Discovery => "discovery",
            Self::Generation => "generation",
            Self::Testing => "testing",
            Self::Registration => "registration",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// Whether no further stage may follow.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl Display for CreationStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status attached to an audit row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage entered.
    InProgress,
    /// Stage finished.
    Completed,
    /// Stage or run failed.
    Failed,
    /// Run finished successfully.
    Success,
}

/// Append-only audit row describing one step of an evolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCreationLog {
    /// Row id.
    pub id: LogId,
    /// Run this row belongs to.
    pub evolution_id: EvolutionId,
    /// Tool id once registered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<ToolId>,
    /// Tool name being evolved.
    pub tool_name: ToolName,
    /// Stage the row describes.
    pub stage: CreationStage,
    /// Status of that stage.
    pub status: StageStatus,
    /// Stage-specific details.
    #[serde(default)]
    pub details: Map<String, Value>,
    /// Prompt sent to the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_prompt_used: Option<String>,
    /// Raw model answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_response: Option<String>,
    /// Stage duration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Insertion time.
    pub created_at: DateTime<Utc>,
    /// Store-assigned insertion counter.
    #[serde(default)]
    pub sequence: u64,
}

impl ToolCreationLog {
    /// Starts a builder for a new audit row.
    #[must_use]
    pub fn builder(
        evolution_id: EvolutionId,
        tool_name: ToolName,
        stage: CreationStage,
        status: StageStatus,
    ) -> ToolCreationLogBuilder {
        ToolCreationLogBuilder {
            row: Self {
                id: LogId::random(),
                evolution_id,
                tool_id: None,
                tool_name,
                stage,
                status,
                details: Map::new(),
                ai_prompt_used: None,
                ai_response: None,
                duration_ms: None,
                created_at: Utc::now(),
                sequence: 0,
            },
        }
    }
}

/// Builder for [`ToolCreationLog`].
#[derive(Debug)]
pub struct ToolCreationLogBuilder {
    row: ToolCreationLog,
}

impl ToolCreationLogBuilder {
    /// Links the row to a registered tool.
    #[must_use]
    pub fn tool_id(mut self, id: ToolId) -> Self {
        self.row.tool_id = Some(id);
        self
    }

    /// Adds one detail entry.
    #[must_use]
    pub fn detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.row.details.insert(key.into(), value);
        self
    }

    /// Merges a detail map, overwriting duplicate keys.
    #[must_use]
    pub fn details(mut self, details: Map<String, Value>) -> Self {
        self.row.details.extend(details);
        self
    }

    /// Records the prompt sent to the model.
    #[must_use]
    pub fn ai_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.row.ai_prompt_used = Some(prompt.into());
        self
    }

    /// Records the raw model answer.
    #[must_use]
    pub fn ai_response(mut self, response: Option<String>) -> Self {
        self.row.ai_response = response;
        self
    }

    /// Records the stage duration.
    #[must_use]
    pub fn duration_ms(mut self, duration_ms: u64) -> Self {
        self.row.duration_ms = Some(duration_ms);
        self
    }

    /// Finalises the row. The store assigns `sequence` on insert.
    #[must_use]
    pub fn build(self) -> ToolCreationLog {
        self.row
    }
}

/// Selects audit rows. Empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
    /// Only rows of this run.
    pub evolution_id: Option<EvolutionId>,
    /// Only rows for this tool name.
    pub tool_name: Option<String>,
    /// Only rows of this stage.
    pub stage: Option<CreationStage>,
    /// Keep only the newest `limit` matches.
    pub limit: Option<usize>,
}

impl LogFilter {
    /// Filter for one tool name.
    #[must_use]
    pub fn for_tool(name: impl Into<String>) -> Self {
        Self {
            tool_name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Filter for one run.
    #[must_use]
    pub fn for_evolution(id: EvolutionId) -> Self {
        Self {
            evolution_id: Some(id),
            ..Self::default()
        }
    }

    /// Returns `true` if `row` matches.
    #[must_use]
    pub fn matches(&self, row: &ToolCreationLog) -> bool {
        self.evolution_id.is_none_or(|id| id == row.evolution_id)
            && self
                .tool_name
                .as_deref()
                .is_none_or(|name| name == row.tool_name.as_str())
            && self.stage.is_none_or(|stage| stage == row.stage)
    }
}
