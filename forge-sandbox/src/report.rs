use forge_policy::ScanReport;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Outcome of the compile check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilationTest {
    /// Whether the source produced a handler function.
    pub passed: bool,
    /// Compiler message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Time spent compiling.
    pub duration_ms: u64,
}

/// Outcome of one test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionTest {
    /// Test case label.
    pub name: String,
    /// Arguments passed to the handler.
    pub input: Value,
    /// Whether the handler returned a valid response in time.
    pub passed: bool,
    /// Returned value, when the handler produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Failure message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Lines written to the `log` sink.
    #[serde(default)]
    pub logs: Vec<String>,
    /// Wall-clock time of the run.
    pub duration_ms: u64,
}

/// Full validation report for a candidate handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxTestReport {
    /// Unique id of this test run.
    pub test_id: Uuid,
    /// Candidate tool name.
    pub tool_name: String,
    /// `true` iff scan, compilation and every execution test passed.
    pub passed: bool,
    /// Security scan of the handler source.
    pub security_scan: ScanReport,
    /// Compile check.
    pub compilation_test: CompilationTest,
    /// Per-case results, empty when an earlier stage failed.
    pub execution_tests: Vec<ExecutionTest>,
    /// Total time spent testing.
    pub duration_ms: u64,
}

impl SandboxTestReport {
    /// First failure message in pipeline order, if any.
    #[must_use]
    pub fn failure_reason(&self) -> Option<String> {
        if !self.security_scan.passed {
            return Some(format!("security scan failed ({})", self.security_scan.summary()));
        }
        if !self.compilation_test.passed {
            return Some(
                self.compilation_test
                    .error
                    .clone()
                    .unwrap_or_else(|| "compilation failed".to_owned()),
            );
        }
        self.execution_tests
            .iter()
            .find(|test| !test.passed)
            .map(|test| {
                format!(
                    "test `{}` failed: {}",
                    test.name,
                    test.error.as_deref().unwrap_or("unknown error")
                )
            })
    }
}
