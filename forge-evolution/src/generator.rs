//! Turns discovery results into a candidate tool via the completion provider.

use std::sync::Arc;

use forge_adapters::traits::{InferenceRequest, ModelAdapter, PromptMessage};
use forge_discovery::{DiscoveryResult, SourceKind};
use forge_policy::SecurityScanner;
use forge_primitives::ToolName;
use forge_sandbox::CandidateTool;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{GenerationError, GenerationResult};
use crate::parse::parse_candidate;
use crate::prompt::{SYSTEM_PROMPT, user_prompt};

/// References kept for the prompt.
pub const MAX_REFERENCES: usize = 3;

/// Tunables for [`Generator`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeneratorConfig {
    /// Attempts per generation, including the first.
    pub max_attempts: u32,
    /// Output token ceiling passed to the provider.
    pub max_output_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_output_tokens: 2_048,
            temperature: 0.2,
        }
    }
}

/// How the model is asked to build the tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Approach {
    /// At least one reference carries code to adapt.
    AdaptExisting,
    /// Write from scratch.
    AiGenerated,
}

/// A discovery candidate selected for the prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    /// Candidate name.
    pub name: String,
    /// Source that found it.
    pub source: SourceKind,
    /// Candidate description.
    pub description: String,
    /// Link to the candidate.
    pub url: String,
    /// Relevance in `[0, 1]`.
    pub relevance_score: f64,
    /// Code excerpt, when the source returned one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
}

/// Ranking of every discovery candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    /// Candidates across all sources.
    pub total_candidates: usize,
    /// Best [`MAX_REFERENCES`] candidates, highest relevance first.
    pub references: Vec<Reference>,
    /// Chosen approach.
    pub suggested_approach: Approach,
}

impl Analysis {
    /// Ranks all candidates by relevance and keeps the best few.
    #[must_use]
    pub fn from_results(results: &[DiscoveryResult]) -> Self {
        let mut references: Vec<Reference> = results
            .iter()
            .flat_map(|result| {
                result.results.iter().map(move |candidate| Reference {
                    name: candidate.name.clone(),
                    source: result.source,
                    description: candidate.description.clone(),
                    url: candidate.payload.url().to_owned(),
                    relevance_score: candidate.relevance_score,
                    excerpt: candidate.payload.excerpt().map(str::to_owned),
                })
            })
            .collect();
        let total_candidates = references.len();
        references.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
        references.truncate(MAX_REFERENCES);

        let suggested_approach = if references.iter().any(|r| r.excerpt.is_some()) {
            Approach::AdaptExisting
        } else {
            Approach::AiGenerated
        };

        Self {
            total_candidates,
            references,
            suggested_approach,
        }
    }

    /// Highest-ranked reference, if any.
    #[must_use]
    pub fn best(&self) -> Option<&Reference> {
        self.references.first()
    }
}

/// Result of [`Generator::generate`].
#[derive(Debug)]
pub struct GenerationOutcome {
    /// Whether `tool` is set.
    pub success: bool,
    /// The parsed, scanned candidate.
    pub tool: Option<CandidateTool>,
    /// Ranking the prompt was built from.
    pub analysis: Analysis,
    /// User prompt sent to the provider.
    pub ai_prompt_used: String,
    /// Raw answer of the last attempt that produced one.
    pub ai_response: Option<String>,
    /// Why generation failed.
    pub error: Option<GenerationError>,
    /// Attempts made.
    pub attempts: u32,
}

/// Asks the completion provider for a tool and validates the answer.
#[derive(Clone)]
pub struct Generator {
    adapter: Arc<dyn ModelAdapter>,
    scanner: Arc<SecurityScanner>,
    config: GeneratorConfig,
}

impl std::fmt::Debug for Generator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generator")
            .field("adapter", self.adapter.metadata())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Generator {
    /// Creates a generator using the built-in scanner rules.
    #[must_use]
    pub fn new(adapter: Arc<dyn ModelAdapter>, config: GeneratorConfig) -> Self {
        Self {
            adapter,
            scanner: Arc::new(SecurityScanner::new()),
            config,
        }
    }

    /// Replaces the scanner applied to generated handlers.
    #[must_use]
    pub fn with_scanner(mut self, scanner: Arc<SecurityScanner>) -> Self {
        self.scanner = scanner;
        self
    }

    /// Produces a candidate for `tool_name`.
    ///
    /// Never fails; inspect [`GenerationOutcome::success`].
    pub async fn generate(
        &self,
        tool_name: &ToolName,
        description: Option<&str>,
        discovery: &[DiscoveryResult],
    ) -> GenerationOutcome {
        let analysis = Analysis::from_results(discovery);
        let prompt = user_prompt(tool_name.as_str(), description, &analysis.references);
        debug!(
            tool = %tool_name,
            references = analysis.references.len(),
            approach = ?analysis.suggested_approach,
            "generating tool"
        );

        let mut outcome = GenerationOutcome {
            success: false,
            tool: None,
            analysis,
            ai_prompt_used: prompt,
            ai_response: None,
            error: None,
            attempts: 0,
        };

        let request = match InferenceRequest::new(vec![PromptMessage::user(
            outcome.ai_prompt_used.clone(),
        )]) {
            Ok(request) => request
                .with_system_prompt(SYSTEM_PROMPT)
                .with_max_output_tokens(self.config.max_output_tokens)
                .with_temperature(self.config.temperature)
                .with_json_output(),
            Err(err) => {
                outcome.error = Some(err.into());
                return outcome;
            }
        };

        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = None;
        while outcome.attempts < max_attempts {
            outcome.attempts += 1;
            match self.attempt(&request, tool_name, &mut outcome.ai_response).await {
                Ok(tool) => {
                    info!(tool = %tool_name, attempts = outcome.attempts, "candidate generated");
                    outcome.success = true;
                    outcome.tool = Some(tool);
                    return outcome;
                }
                Err(err) if err.is_retryable() => {
                    debug!(tool = %tool_name, attempt = outcome.attempts, %err, "generation attempt failed");
                    last_error = Some(err);
                }
                Err(err) => {
                    warn!(tool = %tool_name, attempt = outcome.attempts, %err, "generation rejected");
                    outcome.error = Some(err);
                    return outcome;
                }
            }
        }

        if let Some(last) = last_error {
            warn!(tool = %tool_name, attempts = outcome.attempts, %last, "generation attempts exhausted");
            outcome.error = Some(GenerationError::Exhausted {
                attempts: outcome.attempts,
                last: Box::new(last),
            });
        }
        outcome
    }

    async fn attempt(
        &self,
        request: &InferenceRequest,
        tool_name: &ToolName,
        response: &mut Option<String>,
    ) -> GenerationResult<CandidateTool> {
        let completion = self.adapter.chat(request.clone()).await?;
        let candidate = parse_candidate(&completion.content, tool_name);
        *response = Some(completion.content);
        let candidate = candidate?;

        let report = self.scanner.scan(&candidate.handler_code);
        if !report.passed {
            return Err(GenerationError::security(report));
        }
        Ok(candidate)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use async_trait::async_trait;
    use forge_adapters::traits::{
        AdapterError, AdapterMetadata, AdapterResult, AdapterStream, InferenceChunk,
    };
    use forge_discovery::{Candidate, CandidatePayload};
    use forge_policy::CapabilityCategory;
    use futures::stream;

    use super::*;

    const GOOD: &str = r#"{"name":"uuid_gen","description":"Generates UUIDs","category":"utility","inputSchema":{"type":"object","properties":{}},"handlerCode":"function(args) return { content = { { type = \"text\", text = \"id\" } } } end"}"#;

    const NETWORK: &str = r#"{"name":"x","description":"fetches","inputSchema":{"type":"object"},"handlerCode":"function(args) local http = require('socket.http') return http.request('http://x') end"}"#;

    struct ScriptedAdapter {
        metadata: AdapterMetadata,
        answers: Mutex<VecDeque<AdapterResult<String>>>,
        calls: AtomicUsize,
    }

    impl ScriptedAdapter {
        fn new(answers: Vec<AdapterResult<String>>) -> Arc<Self> {
            Arc::new(Self {
                metadata: AdapterMetadata::new("test", "scripted"),
                answers: Mutex::new(answers.into()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ModelAdapter for ScriptedAdapter {
        fn metadata(&self) -> &AdapterMetadata {
            &self.metadata
        }

        async fn infer(&self, _request: InferenceRequest) -> AdapterResult<AdapterStream> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let answer = self
                .answers
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(GOOD.to_owned()))?;
            let chunk = InferenceChunk::new(answer, true);
            Ok(Box::pin(stream::once(async move { Ok(chunk) })))
        }
    }

    fn name() -> ToolName {
        ToolName::new("uuid_gen").unwrap()
    }

    fn generator(adapter: Arc<ScriptedAdapter>) -> Generator {
        Generator::new(adapter, GeneratorConfig::default())
    }

    fn candidate(name: &str, score: f64, excerpt: Option<&str>) -> Candidate {
        Candidate {
            name: name.into(),
            description: format!("{name} description"),
            relevance_score: score,
            payload: CandidatePayload::Code {
                repository: "acme/tools".into(),
                path: format!("{name}.lua"),
                url: format!("https://example.invalid/{name}"),
                excerpt: excerpt.map(str::to_owned),
            },
        }
    }

    #[test]
    fn analysis_keeps_top_three_across_sources() {
        let repo = DiscoveryResult::finish(
            SourceKind::RepoSearch,
            "uuid_gen",
            Instant::now(),
            Ok(vec![candidate("a", 0.2, None), candidate("b", 0.9, None)]),
            5,
        );
        let api = DiscoveryResult::finish(
            SourceKind::ApiCollectionSearch,
            "uuid_gen",
            Instant::now(),
            Ok(vec![candidate("c", 0.5, Some("code")), candidate("d", 0.7, None)]),
            5,
        );
        let analysis = Analysis::from_results(&[repo, api]);

        assert_eq!(analysis.total_candidates, 4);
        let names: Vec<_> = analysis.references.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["b", "d", "c"]);
        assert_eq!(analysis.suggested_approach, Approach::AdaptExisting);
        assert_eq!(analysis.best().unwrap().source, SourceKind::RepoSearch);
    }

    #[test]
    fn no_results_means_ai_generated() {
        let analysis = Analysis::from_results(&[]);
        assert_eq!(analysis.suggested_approach, Approach::AiGenerated);
        assert!(analysis.best().is_none());
    }

    #[tokio::test]
    async fn succeeds_on_first_good_answer() {
        let adapter = ScriptedAdapter::new(vec![]);
        let outcome = generator(adapter.clone()).generate(&name(), None, &[]).await;

        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.tool.unwrap().category, "utility");
        assert_eq!(outcome.ai_response.as_deref(), Some(GOOD));
        assert!(outcome.ai_prompt_used.contains("uuid_gen"));
    }

    #[tokio::test]
    async fn retries_malformed_answers() {
        let adapter = ScriptedAdapter::new(vec![
            Ok("I cannot comply".into()),
            Err(AdapterError::transport("connection reset")),
            Ok(GOOD.into()),
        ]);
        let outcome = generator(adapter.clone()).generate(&name(), None, &[]).await;

        assert!(outcome.success);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_keeps_last_error() {
        let adapter = ScriptedAdapter::new(vec![
            Ok("nope".into()),
            Ok("nope".into()),
            Ok(r#"{"name":"x"}"#.into()),
        ]);
        let outcome = generator(adapter).generate(&name(), None, &[]).await;

        assert!(!outcome.success);
        match outcome.error.unwrap() {
            GenerationError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, GenerationError::MissingField { field: "description" }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn security_violation_is_terminal() {
        let adapter = ScriptedAdapter::new(vec![Ok(NETWORK.into())]);
        let outcome = generator(adapter.clone()).generate(&name(), None, &[]).await;

        assert!(!outcome.success);
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);
        match outcome.error.unwrap() {
            GenerationError::SecurityViolation { categories, .. } => {
                assert!(categories.contains(&CapabilityCategory::Network));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(outcome.ai_response.as_deref(), Some(NETWORK));
    }

    #[tokio::test]
    async fn provider_rejection_is_terminal() {
        let adapter = ScriptedAdapter::new(vec![Err(AdapterError::response("401 unauthorized"))]);
        let outcome = generator(adapter.clone()).generate(&name(), None, &[]).await;

        assert!(!outcome.success);
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);
        assert!(matches!(outcome.error, Some(GenerationError::Provider { .. })));
    }
}
