//! Capability categories and severities attached to scan findings.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// How serious a finding is.
///
/// Ordered from least to most severe so callers can compare with `>=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Style or hygiene advice.
    Low,
    /// Potential resource abuse that does not block a handler.
    Medium,
    /// Blocks the handler.
    High,
    /// Blocks the handler; direct host capability access.
    Critical,
}

impl Severity {
    /// Returns `true` when a finding of this severity fails the scan.
    #[must_use]
    pub const fn is_blocking(self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }

    /// Stable lower-case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host capability a finding tries to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityCategory {
    /// Process spawning, environment variables, module loaders.
    ProcessEnvironment,
    /// Reading or writing files.
    Filesystem,
    /// Sockets, HTTP clients, DNS.
    Network,
    /// Compiling strings into code at runtime.
    DynamicEval,
    /// Timers and loops with no exit condition.
    Timers,
    /// Writes to the global or shared environment.
    GlobalMutation,
    /// Metatables, debug hooks, proxies.
    Reflection,
    /// Foreign function interfaces and raw buffers.
    UnsafeMemory,
    /// Garbage collector and weak-reference introspection.
    Finalizers,
    /// Non-blocking hygiene findings.
    Advisory,
}

impl CapabilityCategory {
    /// Stable lower-case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ProcessEnvironment => "process_environment",
            Self::Filesystem => "filesystem",
            Self::Network => "network",
            Self::DynamicEval => "dynamic_eval",
            Self::Timers => "timers",
            Self::GlobalMutation => "global_mutation",
            Self::Reflection => "reflection",
            Self::UnsafeMemory => "unsafe_memory",
            Self::Finalizers => "finalizers",
            Self::Advisory => "advisory",
        }
    }
}

impl Display for CapabilityCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_high_and_critical_block() {
        assert!(Severity::Critical.is_blocking());
        assert!(Severity::High.is_blocking());
        assert!(!Severity::Medium.is_blocking());
        assert!(!Severity::Low.is_blocking());
        assert!(Severity::Critical > Severity::Low);
    }

    #[test]
    fn labels_match_serde() {
        let json = serde_json::to_string(&CapabilityCategory::DynamicEval).unwrap();
        assert_eq!(json, "\"dynamic_eval\"");
        assert_eq!(CapabilityCategory::DynamicEval.to_string(), "dynamic_eval");
    }
}
