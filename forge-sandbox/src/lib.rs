//! Execution sandbox for generated tool handlers.
//!
//! Handlers are Lua source evaluating to a function `(args, ctx) -> response`.
//! Every run gets a fresh VM with only the `string`, `table`, `math` and `utf8`
//! libraries, a memory ceiling, and a watchdog that aborts the VM once its
//! deadline passes. The watchdog runs from the instruction hook and from the
//! pattern functions, and `pcall` cannot swallow it. The
//! [`forge_policy::SecurityScanner`] gates every compilation.

#![warn(missing_docs, clippy::pedantic)]

mod candidate;
mod cases;
mod error;
mod limits;
mod pattern;
mod report;
mod response;
mod sandbox;
mod vm;
mod watchdog;

pub use candidate::{CandidateTool, TestCase};
pub use cases::{default_test_cases, sample_value};
pub use error::{SandboxError, SandboxResult};
pub use limits::{MAX_TIMEOUT, SandboxLimits};
pub use report::{CompilationTest, ExecutionTest, SandboxTestReport};
pub use response::validate_response;
pub use sandbox::{Sandbox, SandboxOutput};
