use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A handler awaiting validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateTool {
    /// Tool name.
    pub name: String,
    /// What the tool does.
    pub description: String,
    /// Free-form grouping label.
    pub category: String,
    /// JSON-Schema-like description of the arguments.
    pub input_schema: Value,
    /// Lua source evaluating to the handler function.
    pub handler_code: String,
}

/// Named input fed to a handler during testing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    /// Label shown in the report.
    pub name: String,
    /// Arguments passed as the handler's first parameter.
    pub input: Value,
}

impl TestCase {
    /// Creates a test case.
    #[must_use]
    pub fn new(name: impl Into<String>, input: Value) -> Self {
        Self {
            name: name.into(),
            input,
        }
    }
}
