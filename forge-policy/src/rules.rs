//! Pattern rules and the built-in rule set.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::category::{CapabilityCategory, Severity};
use crate::{PolicyError, PolicyResult};

/// A named pattern that flags one capability.
#[derive(Debug, Clone)]
pub struct ScanRule {
    name: String,
    category: CapabilityCategory,
    severity: Severity,
    pattern: Regex,
}

impl ScanRule {
    /// Compiles a new rule.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::InvalidRule`] when the name is empty or the
    /// pattern does not compile.
    pub fn new(
        name: impl Into<String>,
        category: CapabilityCategory,
        severity: Severity,
        pattern: &str,
    ) -> PolicyResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(PolicyError::InvalidRule {
                name,
                reason: "rule name cannot be empty".into(),
            });
        }
        let pattern = Regex::new(pattern).map_err(|err| PolicyError::InvalidRule {
            name: name.clone(),
            reason: err.to_string(),
        })?;

        Ok(Self {
            name,
            category,
            severity,
            pattern,
        })
    }

    /// Returns the rule name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the category the rule guards.
    #[must_use]
    pub const fn category(&self) -> CapabilityCategory {
        self.category
    }

    /// Returns the severity attached to matches.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        self.severity
    }

    pub(crate) fn pattern(&self) -> &Regex {
        &self.pattern
    }
}

use CapabilityCategory as C;
use Severity as S;

// Handlers are Lua, but models regularly emit JavaScript idioms as well, so
// most categories carry both spellings.
const DEFAULT_RULES: &[(&str, CapabilityCategory, Severity, &str)] = &[
    // process / environment
    (
        "os_process",
        C::ProcessEnvironment,
        S::Critical,
        r"\bos\s*\.\s*(getenv|execute|exit|setlocale)\b",
    ),
    ("io_popen", C::ProcessEnvironment, S::Critical, r"\bio\s*\.\s*popen\b"),
    (
        "process_object",
        C::ProcessEnvironment,
        S::Critical,
        r"\bprocess\s*\.\s*(env|exit|argv|cwd|kill|binding|dlopen|pid|platform)\b",
    ),
    ("child_process", C::ProcessEnvironment, S::Critical, r"\bchild_process\b"),
    (
        "native_loader",
        C::ProcessEnvironment,
        S::Critical,
        r"\bpackage\s*\.\s*(loadlib|cpath|path|searchers|searchpath|loaded|preload)\b",
    ),
    ("module_loading", C::ProcessEnvironment, S::High, r"\brequire\s*\(?\s*['\x22]"),
    (
        "host_clock",
        C::ProcessEnvironment,
        S::High,
        r"\bos\s*\.\s*(clock|time|date|difftime)\b",
    ),
    // filesystem
    (
        "io_file",
        C::Filesystem,
        S::Critical,
        r"\bio\s*\.\s*(open|lines|read|write|input|output|close|tmpfile)\b",
    ),
    ("os_file", C::Filesystem, S::Critical, r"\bos\s*\.\s*(remove|rename|tmpname)\b"),
    ("file_loader", C::Filesystem, S::Critical, r"\b(loadfile|dofile)\b"),
    (
        "fs_module",
        C::Filesystem,
        S::Critical,
        r"\brequire\s*\(?\s*['\x22](node:)?(fs|fs/promises|path|lfs)['\x22]",
    ),
    (
        "fs_calls",
        C::Filesystem,
        S::Critical,
        r"\b(readFileSync|writeFileSync|readFile|writeFile|appendFile|appendFileSync|createReadStream|createWriteStream|readdirSync|unlinkSync)\s*\(",
    ),
    // network
    (
        "network_module",
        C::Network,
        S::Critical,
        r"\brequire\s*\(?\s*['\x22](node:)?(socket|socket\.http|ssl\.https|http|https|net|dgram|dns|tls|ws|axios|node-fetch|request)['\x22]",
    ),
    ("socket_api", C::Network, S::Critical, r"\bsocket\s*\.\s*[A-Za-z_]"),
    ("http_client", C::Network, S::Critical, r"\bhttps?\s*\.\s*(request|get)\s*\("),
    ("browser_network", C::Network, S::Critical, r"\b(XMLHttpRequest|WebSocket|EventSource)\b"),
    (
        "net_socket",
        C::Network,
        S::Critical,
        r"\bnet\s*\.\s*(connect|createConnection|createServer|Socket)\b",
    ),
    ("dns_lookup", C::Network, S::Critical, r"\bdns\s*\.\s*[A-Za-z_]"),
    // dynamic evaluation
    ("lua_load", C::DynamicEval, S::Critical, r"\bload\s*\("),
    ("loadstring", C::DynamicEval, S::Critical, r"\bloadstring\b"),
    ("string_dump", C::DynamicEval, S::Critical, r"\bstring\s*\.\s*dump\b"),
    ("js_eval", C::DynamicEval, S::Critical, r"\beval\s*\("),
    ("function_constructor", C::DynamicEval, S::Critical, r"\bnew\s+Function\b|\bFunction\s*\("),
    // timers and unbounded loops
    ("set_interval", C::Timers, S::High, r"\bsetInterval\s*\("),
    ("lua_while_true", C::Timers, S::High, r"\bwhile\s*\(?\s*true\s*\)?\s*do\b"),
    ("lua_repeat_forever", C::Timers, S::High, r"\brepeat\b[\s\S]*?\buntil\s*\(?\s*false\b"),
    ("js_while_true", C::Timers, S::High, r"\bwhile\s*\(\s*(true|1)\s*\)"),
    ("js_for_ever", C::Timers, S::High, r"\bfor\s*\(\s*;\s*;\s*\)"),
    ("set_timeout", C::Timers, S::Medium, r"\b(setTimeout|setImmediate)\s*\("),
    // global scope
    ("global_table", C::GlobalMutation, S::High, r"\b(_G|_ENV)\b"),
    ("function_env", C::GlobalMutation, S::High, r"\b(setfenv|getfenv)\b"),
    ("global_this", C::GlobalMutation, S::High, r"\bglobalThis\b"),
    ("rawset", C::GlobalMutation, S::High, r"\brawset\b"),
    // reflection
    (
        "metatable_access",
        C::Reflection,
        S::High,
        r"\b(setmetatable|getmetatable|rawget|rawequal|rawlen)\b",
    ),
    ("debug_library", C::Reflection, S::High, r"\bdebug\s*\.\s*[A-Za-z_]"),
    ("metamethod", C::Reflection, S::High, r"__(index|newindex|call|metatable)\b"),
    ("js_proxy", C::Reflection, S::High, r"\bnew\s+Proxy\b|\bReflect\s*\."),
    (
        "define_property",
        C::Reflection,
        S::High,
        r"\bObject\s*\.\s*(defineProperty|defineProperties|setPrototypeOf)\b",
    ),
    ("proto_access", C::Reflection, S::High, r"__proto__"),
    // raw memory
    ("ffi", C::UnsafeMemory, S::Critical, r"\bffi\b"),
    (
        "shared_memory",
        C::UnsafeMemory,
        S::Critical,
        r"\bSharedArrayBuffer\b|\bAtomics\s*\.",
    ),
    ("unsafe_buffer", C::UnsafeMemory, S::Critical, r"\bBuffer\s*\.\s*allocUnsafe"),
    ("webassembly", C::UnsafeMemory, S::Critical, r"\bWebAssembly\b"),
    // finalizers
    ("gc_metamethod", C::Finalizers, S::High, r"__(gc|mode)\b"),
    ("collectgarbage", C::Finalizers, S::High, r"\bcollectgarbage\b"),
    ("weak_ref", C::Finalizers, S::High, r"\b(WeakRef|FinalizationRegistry)\b"),
    // advisory
    ("print_call", C::Advisory, S::Low, r"\bprint\s*\("),
    ("string_rep", C::Advisory, S::Medium, r"\bstring\s*\.\s*rep\s*\(|:\s*rep\s*\("),
];

static RULES: Lazy<Vec<ScanRule>> = Lazy::new(|| {
    DEFAULT_RULES
        .iter()
        .map(|(name, category, severity, pattern)| {
            ScanRule::new(*name, *category, *severity, pattern)
                .unwrap_or_else(|err| panic!("built-in scan rule must compile: {err}"))
        })
        .collect()
});

/// Returns the built-in rule set, compiled once per process.
#[must_use]
pub fn default_rules() -> &'static [ScanRule] {
    &RULES
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    #[test]
    fn built_in_rules_compile() {
        assert_eq!(default_rules().len(), DEFAULT_RULES.len());
    }

    #[test]
    fn rule_names_are_unique() {
        let names: BTreeSet<_> = default_rules().iter().map(ScanRule::name).collect();
        assert_eq!(names.len(), default_rules().len());
    }

    #[test]
    fn every_blocked_category_has_a_rule() {
        let covered: BTreeSet<_> = default_rules().iter().map(ScanRule::category).collect();
        for category in [
            C::ProcessEnvironment,
            C::Filesystem,
            C::Network,
            C::DynamicEval,
            C::Timers,
            C::GlobalMutation,
            C::Reflection,
            C::UnsafeMemory,
            C::Finalizers,
        ] {
            assert!(covered.contains(&category), "{category} has no rule");
        }
    }

    #[test]
    fn invalid_patterns_are_rejected() {
        let err = ScanRule::new("broken", C::Advisory, S::Low, "(").unwrap_err();
        assert!(matches!(err, PolicyError::InvalidRule { .. }));
        assert!(ScanRule::new(" ", C::Advisory, S::Low, "x").is_err());
    }
}
