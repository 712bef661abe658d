use std::fmt::{self, Display, Formatter};
use std::time::{Duration, Instant};

use forge_adapters::traits::AdapterError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of catalogue a candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// Source-code repository search.
    RepoSearch,
    /// Public API collection search.
    ApiCollectionSearch,
}

impl SourceKind {
    /// Stable label, e.g. `repo-search`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RepoSearch => "repo-search",
            Self::ApiCollectionSearch => "api-collection-search",
        }
    }
}

impl Display for SourceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Knobs for a single search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    /// Upper bound on returned candidates.
    pub max_results: usize,
    /// Deadline for the whole search, including the HTTP round trip.
    pub timeout: Duration,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            max_results: 5,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Source-specific details of a candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CandidatePayload {
    /// A file in a code repository.
    Code {
        /// `owner/name` of the repository.
        repository: String,
        /// Path of the file inside the repository.
        path: String,
        /// Browser URL of the file.
        url: String,
        /// Matching fragment of the file, when the source returned one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        excerpt: Option<String>,
    },
    /// A request inside a published API collection.
    ApiRequest {
        /// Collection or workspace name.
        collection: String,
        /// HTTP method of the request.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        method: Option<String>,
        /// Request URL template.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
        /// Browser URL of the collection entry.
        url: String,
    },
}

impl CandidatePayload {
    /// Browser URL of the candidate.
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::Code { url, .. } | Self::ApiRequest { url, .. } => url,
        }
    }

    /// Non-empty code excerpt, if any.
    #[must_use]
    pub fn excerpt(&self) -> Option<&str> {
        match self {
            Self::Code {
                excerpt: Some(excerpt),
                ..
            } if !excerpt.trim().is_empty() => Some(excerpt),
            _ => None,
        }
    }
}

/// One ranked search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    /// Display name.
    pub name: String,
    /// Short description.
    pub description: String,
    /// Ranking signal in `[0, 1]`.
    pub relevance_score: f64,
    /// Source-specific details.
    pub payload: CandidatePayload,
}

/// Everything one source returned for one tool name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResult {
    /// Source that produced the result.
    pub source: SourceKind,
    /// Tool name searched for.
    pub tool_name: String,
    /// Candidates, best first.
    pub results: Vec<Candidate>,
    /// Wall-clock time of the search.
    pub duration_ms: u64,
    /// Failure description when the search did not complete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DiscoveryResult {
    /// Wraps the outcome of a search, sorting and clamping the candidates.
    #[must_use]
    pub fn finish(
        source: SourceKind,
        tool_name: &str,
        started: Instant,
        outcome: Result<Vec<Candidate>, DiscoveryError>,
        max_results: usize,
    ) -> Self {
        let (mut results, error) = match outcome {
            Ok(results) => (results, None),
            Err(err) => (Vec::new(), Some(err.to_string())),
        };
        for candidate in &mut results {
            candidate.relevance_score = candidate.relevance_score.clamp(0.0, 1.0);
        }
        results.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
        results.truncate(max_results);

        Self {
            source,
            tool_name: tool_name.to_owned(),
            results,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            error,
        }
    }

    /// Result describing a failed search.
    #[must_use]
    pub fn failed(source: SourceKind, tool_name: &str, started: Instant, error: DiscoveryError) -> Self {
        Self::finish(source, tool_name, started, Err(error), 0)
    }
}

/// Errors a source may hit; always folded into [`DiscoveryResult::error`].
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The source is missing credentials or has a bad endpoint.
    #[error("discovery source not configured: {reason}")]
    Configuration {
        /// What is missing.
        reason: String,
    },
    /// HTTP exchange failed.
    #[error(transparent)]
    Http(#[from] AdapterError),
    /// The source answered with something unexpected.
    #[error("unexpected discovery response: {reason}")]
    Decode {
        /// Parser message.
        reason: String,
    },
    /// The search exceeded its deadline.
    #[error("discovery timed out after {after:?}")]
    Timeout {
        /// Deadline that elapsed.
        after: Duration,
    },
    /// The source panicked while searching.
    #[error("discovery source panicked: {message}")]
    Panicked {
        /// Panic payload, when it was a string.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn candidate(name: &str, score: f64) -> Candidate {
        Candidate {
            name: name.into(),
            description: String::new(),
            relevance_score: score,
            payload: CandidatePayload::Code {
                repository: "o/r".into(),
                path: "a.lua".into(),
                url: "https://example.com".into(),
                excerpt: None,
            },
        }
    }

    #[test]
    fn finish_sorts_clamps_and_truncates() {
        let result = DiscoveryResult::finish(
            SourceKind::RepoSearch,
            "x",
            Instant::now(),
            Ok(vec![candidate("low", 0.1), candidate("high", 1.7), candidate("mid", 0.5)]),
            2,
        );
        let names: Vec<_> = result.results.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["high", "mid"]);
        assert!((result.results[0].relevance_score - 1.0).abs() < f64::EPSILON);
        assert!(result.error.is_none());
    }

    #[test]
    fn failures_become_empty_results() {
        let result = DiscoveryResult::failed(
            SourceKind::ApiCollectionSearch,
            "x",
            Instant::now(),
            DiscoveryError::Configuration {
                reason: "no token".into(),
            },
        );
        assert!(result.results.is_empty());
        assert!(result.error.unwrap().contains("no token"));
    }

    #[test]
    fn serializes_with_wire_names() {
        let value = serde_json::to_value(candidate("a", 0.5)).unwrap();
        assert_eq!(value["relevanceScore"], json!(0.5));
        assert_eq!(value["payload"]["kind"], json!("code"));
        assert_eq!(serde_json::to_value(SourceKind::RepoSearch).unwrap(), json!("repo-search"));
    }

    #[test]
    fn blank_excerpts_are_ignored() {
        let payload = CandidatePayload::Code {
            repository: "o/r".into(),
            path: "p".into(),
            url: "u".into(),
            excerpt: Some("   ".into()),
        };
        assert!(payload.excerpt().is_none());
    }
}
