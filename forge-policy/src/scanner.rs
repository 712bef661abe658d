//! Static security scanner for handler source.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::category::{CapabilityCategory, Severity};
use crate::rules::{ScanRule, default_rules};

/// One rule that matched the scanned source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanIssue {
    /// Name of the rule that fired.
    pub name: String,
    /// Capability the rule guards.
    pub category: CapabilityCategory,
    /// Severity of the finding.
    pub severity: Severity,
    /// 1-based line of the first match.
    pub line: usize,
    /// Number of matches in the source.
    pub occurrences: usize,
}

/// Number of issues per severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    /// Critical issues.
    pub critical: usize,
    /// High issues.
    pub high: usize,
    /// Medium issues.
    pub medium: usize,
    /// Low issues.
    pub low: usize,
}

impl SeverityCounts {
    fn record(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
        }
    }
}

/// Outcome of scanning a single source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    /// `false` iff any critical or high issue was found.
    pub passed: bool,
    /// Findings ordered by severity (most severe first), then line.
    pub issues: Vec<ScanIssue>,
    /// Per-severity totals.
    pub counts: SeverityCounts,
}

impl ScanReport {
    /// Categories of the findings that failed the scan.
    #[must_use]
    pub fn blocked_categories(&self) -> Vec<CapabilityCategory> {
        self.issues
            .iter()
            .filter(|issue| issue.severity.is_blocking())
            .map(|issue| issue.category)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Short operator-facing summary, e.g. `blocked: network, filesystem`.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.passed {
            return "passed".to_owned();
        }
        let labels: Vec<&str> = self
            .blocked_categories()
            .into_iter()
            .map(CapabilityCategory::as_str)
            .collect();
        format!("blocked: {}", labels.join(", "))
    }
}

/// Regex-based scanner. Never executes the code it inspects.
#[derive(Debug, Clone)]
pub struct SecurityScanner {
    rules: Vec<ScanRule>,
}

impl Default for SecurityScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityScanner {
    /// Scanner with the built-in rule set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rules: default_rules().to_vec(),
        }
    }

    /// Scanner with a caller-supplied rule set.
    #[must_use]
    pub fn with_rules(rules: Vec<ScanRule>) -> Self {
        Self { rules }
    }

    /// Adds a rule after the existing ones.
    #[must_use]
    pub fn with_rule(mut self, rule: ScanRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Returns the active rules.
    #[must_use]
    pub fn rules(&self) -> &[ScanRule] {
        &self.rules
    }

    /// Scans `source` and reports every rule that matched.
    #[must_use]
    pub fn scan(&self, source: &str) -> ScanReport {
        let mut issues = Vec::new();
        let mut counts = SeverityCounts::default();

        for rule in &self.rules {
            let mut matches = rule.pattern().find_iter(source);
            let Some(first) = matches.next() else {
                continue;
            };
            let occurrences = 1 + matches.count();
            counts.record(rule.severity());
            issues.push(ScanIssue {
                name: rule.name().to_owned(),
                category: rule.category(),
                severity: rule.severity(),
                line: line_of(source, first.start()),
                occurrences,
            });
        }

        issues.sort_by(|a, b| b.severity.cmp(&a.severity).then(a.line.cmp(&b.line)));
        let passed = counts.critical == 0 && counts.high == 0;
        debug!(passed, issues = issues.len(), "security scan finished");

        ScanReport {
            passed,
            issues,
            counts,
        }
    }
}

fn line_of(source: &str, offset: usize) -> usize {
    source[..offset].bytes().filter(|b| *b == b'\n').count() + 1
}
