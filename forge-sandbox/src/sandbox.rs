use std::sync::Arc;
use std::time::{Duration, Instant};

use forge_policy::SecurityScanner;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::candidate::{CandidateTool, TestCase};
use crate::cases::default_test_cases;
use crate::error::{SandboxError, SandboxResult};
use crate::limits::SandboxLimits;
use crate::report::{CompilationTest, ExecutionTest, SandboxTestReport};
use crate::response::validate_response;
use crate::vm::{self, Invocation, duration_ms};

/// Successful handler run.
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxOutput {
    /// Validated tool response.
    pub value: Value,
    /// Lines the handler wrote to its `log` sink.
    pub logs: Vec<String>,
    /// Wall-clock time of the run.
    pub duration: Duration,
}

/// Compiles, tests and runs handler source under fixed resource limits.
///
/// Cloning is cheap; clones share the scanner.
#[derive(Debug, Clone)]
pub struct Sandbox {
    scanner: Arc<SecurityScanner>,
    limits: SandboxLimits,
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new(SandboxLimits::default())
    }
}

impl Sandbox {
    /// Creates a sandbox using the built-in scanner rules.
    #[must_use]
    pub fn new(limits: SandboxLimits) -> Self {
        Self {
            scanner: Arc::new(SecurityScanner::new()),
            limits,
        }
    }

    /// Replaces the security scanner.
    #[must_use]
    pub fn with_scanner(mut self, scanner: SecurityScanner) -> Self {
        self.scanner = Arc::new(scanner);
        self
    }

    /// Returns the configured limits.
    #[must_use]
    pub const fn limits(&self) -> &SandboxLimits {
        &self.limits
    }

    /// Returns the scanner gating every compilation.
    #[must_use]
    pub fn scanner(&self) -> &SecurityScanner {
        &self.scanner
    }

    /// Runs a registered handler for a production call.
    ///
    /// The source is re-scanned and compiled in a fresh VM on every call.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::SecurityViolation`] when the scan fails,
    /// [`SandboxError::Timeout`] when the deadline passes, and the matching
    /// variant for compile, runtime or output-format failures.
    pub async fn execute(
        &self,
        tool_name: &str,
        handler_code: &str,
        args: Value,
        timeout: Option<Duration>,
    ) -> SandboxResult<SandboxOutput> {
        let report = self.scanner.scan(handler_code);
        if !report.passed {
            warn!(tool = %tool_name, blocked = %report.summary(), "refusing to execute handler");
            return Err(SandboxError::security(report));
        }

        let timeout = self.limits.effective_timeout(timeout);
        let started = Instant::now();
        let invocation = self.invoke(tool_name, handler_code, args, timeout).await?;
        let value = invocation.result?;
        validate_response(&value)?;

        Ok(SandboxOutput {
            value,
            logs: invocation.logs,
            duration: started.elapsed(),
        })
    }

    /// Validates a candidate: scan, compile, then run every test case.
    ///
    /// Without explicit cases, `required_only` and `all_properties` are
    /// synthesized from the input schema. Never fails; inspect
    /// [`SandboxTestReport::passed`].
    pub async fn test(
        &self,
        candidate: &CandidateTool,
        cases: Option<Vec<TestCase>>,
    ) -> SandboxTestReport {
        let started = Instant::now();
        let test_id = Uuid::new_v4();
        let security_scan = self.scanner.scan(&candidate.handler_code);

        if !security_scan.passed {
            warn!(
                tool = %candidate.name,
                blocked = %security_scan.summary(),
                "candidate rejected by security scan"
            );
            return SandboxTestReport {
                test_id,
                tool_name: candidate.name.clone(),
                passed: false,
                security_scan,
                compilation_test: CompilationTest {
                    passed: false,
                    error: Some("skipped: security scan failed".to_owned()),
                    duration_ms: 0,
                },
                execution_tests: Vec::new(),
                duration_ms: duration_ms(started.elapsed()),
            };
        }

        let timeout = self.limits.effective_timeout(None);
        let compile_started = Instant::now();
        let compiled = {
            let name = candidate.name.clone();
            let code = candidate.handler_code.clone();
            let limits = self.limits;
            self.run_blocking(timeout, move || {
                vm::compile_check(&name, &code, &limits, timeout)
            })
            .await
        };
        let compilation_test = CompilationTest {
            passed: compiled.is_ok(),
            error: compiled.err().map(|err| err.to_string()),
            duration_ms: duration_ms(compile_started.elapsed()),
        };

        let mut execution_tests = Vec::new();
        if compilation_test.passed {
            let cases = cases
                .filter(|cases| !cases.is_empty())
                .unwrap_or_else(|| default_test_cases(&candidate.input_schema));
            for case in cases {
                execution_tests.push(self.run_case(candidate, case, timeout).await);
            }
        }

        let passed =
            compilation_test.passed && execution_tests.iter().all(|test| test.passed);
        let report = SandboxTestReport {
            test_id,
            tool_name: candidate.name.clone(),
            passed,
            security_scan,
            compilation_test,
            execution_tests,
            duration_ms: duration_ms(started.elapsed()),
        };

        if passed {
            info!(tool = %candidate.name, %test_id, duration_ms = report.duration_ms, "sandbox tests passed");
        } else {
            debug!(
                tool = %candidate.name,
                %test_id,
                reason = report.failure_reason().as_deref().unwrap_or("unknown"),
                "sandbox tests failed"
            );
        }
        report
    }

    async fn run_case(
        &self,
        candidate: &CandidateTool,
        case: TestCase,
        timeout: Duration,
    ) -> ExecutionTest {
        let started = Instant::now();
        let outcome = self
            .invoke(
                &candidate.name,
                &candidate.handler_code,
                case.input.clone(),
                timeout,
            )
            .await;

        let (output, logs, error) = match outcome {
            Ok(Invocation { result, logs }) => match result {
                Ok(value) => {
                    let error = validate_response(&value).err().map(|err| err.to_string());
                    (Some(value), logs, error)
                }
                Err(err) => (None, logs, Some(err.to_string())),
            },
            Err(err) => (None, Vec::new(), Some(err.to_string())),
        };

        ExecutionTest {
            name: case.name,
            input: case.input,
            passed: error.is_none(),
            output,
            error,
            logs,
            duration_ms: duration_ms(started.elapsed()),
        }
    }

    async fn invoke(
        &self,
        tool_name: &str,
        handler_code: &str,
        args: Value,
        timeout: Duration,
    ) -> SandboxResult<Invocation> {
        let name = tool_name.to_owned();
        let code = handler_code.to_owned();
        let limits = self.limits;
        let now = chrono::Utc::now().to_rfc3339();
        self.run_blocking(timeout, move || {
            Ok(vm::invoke(&name, &code, &args, &now, &limits, timeout))
        })
        .await
    }

    /// Runs `job` on a blocking worker and stops waiting once the deadline
    /// plus grace has passed. The VM watchdog aborts the worker itself.
    async fn run_blocking<F, T>(&self, timeout: Duration, job: F) -> SandboxResult<T>
    where
        F: FnOnce() -> SandboxResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let handle = tokio::task::spawn_blocking(job);
        match tokio::time::timeout(timeout + self.limits.grace, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(SandboxError::internal(format!(
                "sandbox worker failed: {join}"
            ))),
            Err(_) => Err(SandboxError::Timeout {
                timeout_ms: duration_ms(timeout),
            }),
        }
    }
}
