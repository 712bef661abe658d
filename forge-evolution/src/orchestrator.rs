//! Drives one evolution run from discovery to registration.

use std::any::Any;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use forge_discovery::{DiscoveryResult, DiscoverySource, SearchOptions, SourceKind, search_all};
use forge_primitives::{EvolutionId, ToolName};
use forge_sandbox::{CandidateTool, Sandbox, SandboxTestReport};
use forge_store::{
    CreationStage, GeneratedTool, LogFilter, NewGeneratedTool, SourceType, StageStatus,
    StoreResult, ToolCreationLog, ToolCreationLogBuilder, ToolStore,
};
use forge_tools::{EvolutionOutcome, EvolveRequest, ToolEvolver};
use futures::FutureExt;
use serde_json::{Map, Value, json};
use tracing::{debug, error, info, warn};

use crate::gate::{EvolutionGate, EvolutionRun, RunPermit};
use crate::generator::{Analysis, GenerationOutcome, Generator, Reference};
use crate::lifecycle::RunLifecycle;

/// Tunables for [`EvolutionOrchestrator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Global cap on runs in flight.
    pub max_concurrent: NonZeroUsize,
    /// Per-source discovery limits.
    pub search: SearchOptions,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: EvolutionGate::default().max_concurrent(),
            search: SearchOptions::default(),
        }
    }
}

struct Inner {
    store: Arc<dyn ToolStore>,
    sources: Vec<Arc<dyn DiscoverySource>>,
    generator: Generator,
    sandbox: Sandbox,
    gate: EvolutionGate,
    search: SearchOptions,
}

/// Runs discovery, generation, sandbox testing and registration for tools
/// that do not exist yet.
///
/// Every stage transition is written to the store's audit log. Runs are
/// spawned onto the runtime, so a caller that stops waiting does not cancel
/// an accepted run. Cloning is cheap; clones share the gate.
#[derive(Clone)]
pub struct EvolutionOrchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for EvolutionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvolutionOrchestrator")
            .field("sources", &self.inner.sources.len())
            .field("gate", &self.inner.gate)
            .finish_non_exhaustive()
    }
}

impl EvolutionOrchestrator {
    /// Wires an orchestrator.
    #[must_use]
    pub fn new(
        store: Arc<dyn ToolStore>,
        sources: Vec<Arc<dyn DiscoverySource>>,
        generator: Generator,
        sandbox: Sandbox,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                sources,
                generator,
                sandbox,
                gate: EvolutionGate::new(config.max_concurrent),
                search: config.search,
            }),
        }
    }

    /// Runs in flight, oldest first.
    #[must_use]
    pub fn active(&self) -> Vec<EvolutionRun> {
        self.inner.gate.active()
    }

    /// Audit rows for `tool_name`, in insertion order.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn history(&self, tool_name: &str) -> StoreResult<Vec<ToolCreationLog>> {
        self.inner
            .store
            .get_tool_creation_logs(&LogFilter::for_tool(tool_name))
            .await
    }

    /// Audit rows of one run, in insertion order.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn run_history(&self, evolution_id: EvolutionId) -> StoreResult<Vec<ToolCreationLog>> {
        self.inner
            .store
            .get_tool_creation_logs(&LogFilter::for_evolution(evolution_id))
            .await
    }

    /// Evolves `tool_name`, waiting for the run to finish.
    ///
    /// Returns [`EvolutionOutcome::Rejected`] immediately when the name is
    /// already being evolved or the cap is reached. Panics inside the run are
    /// caught and reported as [`EvolutionOutcome::Failed`].
    pub async fn evolve(&self, tool_name: ToolName, description: Option<String>) -> EvolutionOutcome {
        let permit = match self.inner.gate.try_acquire(&tool_name) {
            Ok(permit) => permit,
            Err(rejection) => {
                debug!(tool = %tool_name, reason = %rejection.reason(), "evolution rejected");
                return EvolutionOutcome::Rejected(rejection);
            }
        };

        let evolution_id = permit.evolution_id();
        let lifecycle = Arc::new(Mutex::new(RunLifecycle::new(evolution_id)));
        let task = tokio::spawn(Arc::clone(&self.inner).drive(
            permit,
            tool_name.clone(),
            description,
            Arc::clone(&lifecycle),
        ));

        match task.await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(tool = %tool_name, %evolution_id, %err, "evolution task aborted");
                EvolutionOutcome::Failed {
                    evolution_id,
                    stage: current_stage(&lifecycle),
                    reason: format!("evolution task aborted: {err}"),
                    details: None,
                }
            }
        }
    }
}

#[async_trait]
impl ToolEvolver for EvolutionOrchestrator {
    async fn evolve(&self, request: EvolveRequest) -> EvolutionOutcome {
        EvolutionOrchestrator::evolve(self, request.name, request.description).await
    }

    fn active_count(&self) -> usize {
        self.inner.gate.len()
    }
}

/// Failure of one stage, before it is written as an `error` row.
struct StageFailure {
    stage: CreationStage,
    reason: String,
    details: Map<String, Value>,
    ai_prompt: Option<String>,
    ai_response: Option<String>,
}

impl StageFailure {
    fn new(stage: CreationStage, reason: impl Into<String>) -> Self {
        Self {
            stage,
            reason: reason.into(),
            details: Map::new(),
            ai_prompt: None,
            ai_response: None,
        }
    }

    fn detail(mut self, key: &str, value: Value) -> Self {
        self.details.insert(key.to_owned(), value);
        self
    }
}

/// Per-run state threaded through the stages.
struct RunContext {
    evolution_id: EvolutionId,
    tool_name: ToolName,
    description: Option<String>,
    lifecycle: Arc<Mutex<RunLifecycle>>,
    started: Instant,
}

impl Inner {
    async fn drive(
        self: Arc<Self>,
        permit: RunPermit,
        tool_name: ToolName,
        description: Option<String>,
        lifecycle: Arc<Mutex<RunLifecycle>>,
    ) -> EvolutionOutcome {
        let ctx = RunContext {
            evolution_id: permit.evolution_id(),
            tool_name,
            description,
            lifecycle,
            started: Instant::now(),
        };

        let outcome = AssertUnwindSafe(self.run(&ctx)).catch_unwind().await;
        let outcome = match outcome {
            Ok(Ok((tool, duration))) => EvolutionOutcome::Completed {
                evolution_id: ctx.evolution_id,
                tool: Box::new(tool),
                duration,
            },
            Ok(Err(failure)) => self.fail(&ctx, failure).await,
            Err(panic) => {
                let reason = format!("evolution panicked: {}", panic_message(&*panic));
                error!(tool = %ctx.tool_name, evolution_id = %ctx.evolution_id, %reason, "caught panic in evolution");
                let stage = current_stage(&ctx.lifecycle);
                self.fail(&ctx, StageFailure::new(stage, reason)).await
            }
        };
        drop(permit);
        outcome
    }

    async fn run(&self, ctx: &RunContext) -> Result<(GeneratedTool, Duration), StageFailure> {
        info!(tool = %ctx.tool_name, evolution_id = %ctx.evolution_id, "evolution started");
        let mut started = Map::new();
        started.insert("description".into(), json!(ctx.description));
        started.insert("sources".into(), json!(self.sources.iter().map(|s| s.kind()).collect::<Vec<_>>()));
        self.record(ctx, CreationStage::Started, StageStatus::InProgress, |row| row.details(started))
            .await;

        let discovery = self.discover(ctx).await?;
        let (candidate, analysis) = self.generate(ctx, &discovery).await?;
        let report = self.test(ctx, &candidate).await?;
        let tool = self.register(ctx, candidate, &analysis, &report).await?;

        self.enter(ctx, CreationStage::Completed)?;
        let duration = ctx.started.elapsed();
        let tool_id = tool.id;
        let version = tool.version;
        let source_type = tool.source_type;
        self.record(ctx, CreationStage::Completed, StageStatus::Success, |row| {
            row.tool_id(tool_id)
                .duration_ms(millis(duration))
                .detail("version", json!(version))
                .detail("sourceType", json!(source_type))
        })
        .await;
        info!(
            tool = %ctx.tool_name,
            evolution_id = %ctx.evolution_id,
            %tool_id,
            duration_ms = millis(duration),
            "evolution completed"
        );
        Ok((tool, duration))
    }

    async fn discover(&self, ctx: &RunContext) -> Result<Vec<DiscoveryResult>, StageFailure> {
        self.enter(ctx, CreationStage::Discovery)?;
        self.record(ctx, CreationStage::Discovery, StageStatus::InProgress, |row| row)
            .await;

        let started = Instant::now();
        let results = search_all(&self.sources, ctx.tool_name.as_str(), &self.search).await;
        let summary: Vec<Value> = results
            .iter()
            .map(|result| {
                json!({
                    "source": result.source,
                    "hits": result.results.len(),
                    "durationMs": result.duration_ms,
                    "error": result.error,
                })
            })
            .collect();
        let total: usize = results.iter().map(|result| result.results.len()).sum();

        let elapsed = millis(started.elapsed());
        self.record(ctx, CreationStage::Discovery, StageStatus::Completed, |row| {
            row.duration_ms(elapsed)
                .detail("sources", Value::Array(summary))
                .detail("totalResults", json!(total))
        })
        .await;
        info!(tool = %ctx.tool_name, evolution_id = %ctx.evolution_id, total, "discovery finished");
        Ok(results)
    }

    async fn generate(
        &self,
        ctx: &RunContext,
        discovery: &[DiscoveryResult],
    ) -> Result<(CandidateTool, Analysis), StageFailure> {
        self.enter(ctx, CreationStage::Generation)?;
        self.record(ctx, CreationStage::Generation, StageStatus::InProgress, |row| row)
            .await;

        let started = Instant::now();
        let GenerationOutcome {
            tool,
            analysis,
            ai_prompt_used,
            ai_response,
            error,
            attempts,
            ..
        } = self
            .generator
            .generate(&ctx.tool_name, ctx.description.as_deref(), discovery)
            .await;
        let analysis_json = serde_json::to_value(&analysis).unwrap_or(Value::Null);

        let Some(tool) = tool else {
            let reason = error.map_or_else(|| "generator produced no tool".to_owned(), |err| err.to_string());
            let mut failure = StageFailure::new(CreationStage::Generation, reason)
                .detail("analysis", analysis_json)
                .detail("attempts", json!(attempts));
            failure.ai_prompt = Some(ai_prompt_used);
            failure.ai_response = ai_response;
            return Err(failure);
        };

        let elapsed = millis(started.elapsed());
        self.record(ctx, CreationStage::Generation, StageStatus::Completed, |row| {
            row.duration_ms(elapsed)
                .ai_prompt(ai_prompt_used)
                .ai_response(ai_response)
                .detail("analysis", analysis_json)
                .detail("attempts", json!(attempts))
                .detail("category", json!(tool.category))
        })
        .await;
        Ok((tool, analysis))
    }

    async fn test(
        &self,
        ctx: &RunContext,
        candidate: &CandidateTool,
    ) -> Result<SandboxTestReport, StageFailure> {
        self.enter(ctx, CreationStage::Testing)?;
        self.record(ctx, CreationStage::Testing, StageStatus::InProgress, |row| row)
            .await;

        let report = self.sandbox.test(candidate, None).await;
        let report_json = serde_json::to_value(&report).unwrap_or(Value::Null);
        if !report.passed {
            let reason = report
                .failure_reason()
                .unwrap_or_else(|| "sandbox tests failed".to_owned());
            if !report.security_scan.passed {
                warn!(
                    tool = %ctx.tool_name,
                    evolution_id = %ctx.evolution_id,
                    blocked = %report.security_scan.summary(),
                    "candidate rejected by security scan"
                );
            }
            return Err(StageFailure::new(CreationStage::Testing, reason).detail("report", report_json));
        }

        let passed = report.execution_tests.len();
        self.record(ctx, CreationStage::Testing, StageStatus::Completed, |row| {
            row.duration_ms(report.duration_ms)
                .detail("testId", json!(report.test_id))
                .detail("casesPassed", json!(passed))
        })
        .await;
        info!(tool = %ctx.tool_name, evolution_id = %ctx.evolution_id, cases = passed, "sandbox tests passed");
        Ok(report)
    }

    async fn register(
        &self,
        ctx: &RunContext,
        candidate: CandidateTool,
        analysis: &Analysis,
        report: &SandboxTestReport,
    ) -> Result<GeneratedTool, StageFailure> {
        self.enter(ctx, CreationStage::Registration)?;
        self.record(ctx, CreationStage::Registration, StageStatus::InProgress, |row| row)
            .await;

        let (source_type, source_url, source_data) = provenance(analysis.best());
        let new_tool = NewGeneratedTool {
            name: ctx.tool_name.clone(),
            description: candidate.description,
            category: candidate.category,
            input_schema: candidate.input_schema,
            handler_code: candidate.handler_code,
            source_type,
            source_url,
            source_data,
            test_results: serde_json::to_value(report).unwrap_or(Value::Null),
            security_scan: serde_json::to_value(&report.security_scan).unwrap_or(Value::Null),
        };

        self.store.create_generated_tool(new_tool).await.map_err(|err| {
            let reason = if err.is_conflict() {
                format!("tool `{}` already exists", ctx.tool_name)
            } else {
                err.to_string()
            };
            StageFailure::new(CreationStage::Registration, reason)
        })
    }

    fn enter(&self, ctx: &RunContext, stage: CreationStage) -> Result<(), StageFailure> {
        let mut lifecycle = ctx.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        lifecycle
            .advance(stage)
            .map(|_| ())
            .map_err(|err| StageFailure::new(lifecycle.stage(), err.to_string()))
    }

    async fn fail(&self, ctx: &RunContext, failure: StageFailure) -> EvolutionOutcome {
        let StageFailure {
            stage,
            reason,
            mut details,
            ai_prompt,
            ai_response,
        } = failure;

        {
            let mut lifecycle = ctx.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(err) = lifecycle.advance(CreationStage::Error) {
                warn!(evolution_id = %ctx.evolution_id, %err, "recording error after terminal stage");
            }
        }

        let duration = millis(ctx.started.elapsed());
        let recorded = details.clone();
        self.record(ctx, CreationStage::Error, StageStatus::Failed, |mut row| {
            row = row
                .duration_ms(duration)
                .detail("failedStage", json!(stage))
                .detail("error", json!(reason))
                .details(recorded)
                .ai_response(ai_response);
            if let Some(prompt) = ai_prompt {
                row = row.ai_prompt(prompt);
            }
            row
        })
        .await;
        warn!(
            tool = %ctx.tool_name,
            evolution_id = %ctx.evolution_id,
            stage = ?stage,
            %reason,
            "evolution failed"
        );

        let details = match details.remove("report") {
            Some(report) => Some(report),
            None if details.is_empty() => None,
            None => Some(Value::Object(details)),
        };
        EvolutionOutcome::Failed {
            evolution_id: ctx.evolution_id,
            stage,
            reason,
            details,
        }
    }

    /// Appends one audit row. Store failures are logged, never propagated.
    async fn record<F>(&self, ctx: &RunContext, stage: CreationStage, status: StageStatus, build: F)
    where
        F: FnOnce(ToolCreationLogBuilder) -> ToolCreationLogBuilder,
    {
        let row = build(ToolCreationLog::builder(
            ctx.evolution_id,
            ctx.tool_name.clone(),
            stage,
            status,
        ))
        .build();
        if let Err(err) = self.store.log_tool_creation(row).await {
            warn!(
                tool = %ctx.tool_name,
                evolution_id = %ctx.evolution_id,
                stage = ?stage,
                %err,
                "failed to write audit row"
            );
        }
    }
}

fn provenance(best: Option<&Reference>) -> (SourceType, Option<String>, Value) {
    match best {
        Some(reference) => {
            let source_type = match reference.source {
                SourceKind::RepoSearch => SourceType::RepoSearch,
                SourceKind::ApiCollectionSearch => SourceType::ApiCollectionSearch,
            };
            (
                source_type,
                Some(reference.url.clone()),
                serde_json::to_value(reference).unwrap_or(Value::Null),
            )
        }
        None => (SourceType::AiGenerated, None, Value::Null),
    }
}

fn current_stage(lifecycle: &Mutex<RunLifecycle>) -> CreationStage {
    lifecycle.lock().unwrap_or_else(PoisonError::into_inner).stage()
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use forge_adapters::traits::{
        AdapterMetadata, AdapterResult, AdapterStream, InferenceChunk, InferenceRequest,
        ModelAdapter,
    };
    use forge_discovery::{Candidate, CandidatePayload};
    use forge_store::{InMemoryStore, ToolStatus};
    use forge_tools::Rejection;
    use futures::stream;

    use super::*;
    use crate::generator::GeneratorConfig;

    const ANSWER: &str = r#"{"name":"slugify","description":"Slugifies text","category":"text","inputSchema":{"type":"object","properties":{"text":{"type":"string"}},"required":["text"]},"handlerCode":"function(args) return { content = { { type = \"text\", text = string.lower(args.text or '') } } } end"}"#;

    enum Behaviour {
        Answer(&'static str),
        Slow(Duration),
        Panic,
    }

    struct FakeAdapter {
        metadata: AdapterMetadata,
        behaviour: Behaviour,
        calls: AtomicUsize,
    }

    impl FakeAdapter {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                metadata: AdapterMetadata::new("test", "fake"),
                behaviour,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ModelAdapter for FakeAdapter {
        fn metadata(&self) -> &AdapterMetadata {
            &self.metadata
        }

        async fn infer(&self, _request: InferenceRequest) -> AdapterResult<AdapterStream> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let answer = match self.behaviour {
                Behaviour::Answer(answer) => answer,
                Behaviour::Slow(delay) => {
                    tokio::time::sleep(delay).await;
                    ANSWER
                }
                Behaviour::Panic => panic!("provider exploded"),
            };
            let chunk = InferenceChunk::new(answer, true);
            Ok(Box::pin(stream::once(async move { Ok(chunk) })))
        }
    }

    struct FixedSource(Vec<Candidate>);

    #[async_trait]
    impl DiscoverySource for FixedSource {
        fn kind(&self) -> SourceKind {
            SourceKind::RepoSearch
        }

        async fn search(&self, tool_name: &str, options: &SearchOptions) -> DiscoveryResult {
            DiscoveryResult::finish(
                self.kind(),
                tool_name,
                Instant::now(),
                Ok(self.0.clone()),
                options.max_results,
            )
        }
    }

    fn orchestrator(
        store: &Arc<InMemoryStore>,
        adapter: Arc<FakeAdapter>,
        sources: Vec<Arc<dyn DiscoverySource>>,
    ) -> EvolutionOrchestrator {
        EvolutionOrchestrator::new(
            store.clone(),
            sources,
            Generator::new(adapter, GeneratorConfig::default()),
            Sandbox::default(),
            OrchestratorConfig::default(),
        )
    }

    fn name(value: &str) -> ToolName {
        ToolName::new(value).unwrap()
    }

    fn stages(rows: &[ToolCreationLog]) -> Vec<(CreationStage, StageStatus)> {
        rows.iter().map(|row| (row.stage, row.status)).collect()
    }

    #[tokio::test]
    async fn successful_run_logs_every_stage() {
        let store = Arc::new(InMemoryStore::new());
        let source: Arc<dyn DiscoverySource> = Arc::new(FixedSource(vec![Candidate {
            name: "slug.lua".into(),
            description: "acme/strings".into(),
            relevance_score: 0.9,
            payload: CandidatePayload::Code {
                repository: "acme/strings".into(),
                path: "slug.lua".into(),
                url: "https://example.invalid/slug.lua".into(),
                excerpt: Some("return s:lower()".into()),
            },
        }]));
        let orchestrator = orchestrator(&store, FakeAdapter::new(Behaviour::Answer(ANSWER)), vec![source]);

        let outcome = orchestrator.evolve(name("slugify"), None).await;
        let EvolutionOutcome::Completed { evolution_id, tool, .. } = outcome else {
            panic!("expected completion: {outcome:?}");
        };
        assert_eq!(tool.status, ToolStatus::Active);
        assert_eq!(tool.version, 1);
        assert_eq!(tool.source_type, SourceType::RepoSearch);
        assert_eq!(tool.source_url.as_deref(), Some("https://example.invalid/slug.lua"));
        assert_eq!(tool.test_results["passed"], true);

        let rows = orchestrator.run_history(evolution_id).await.unwrap();
        use CreationStage as C;
        use StageStatus as S;
        assert_eq!(
            stages(&rows),
            [
                (C::Started, S::InProgress),
                (C::Discovery, S::InProgress),
                (C::Discovery, S::Completed),
                (C::Generation, S::InProgress),
                (C::Generation, S::Completed),
                (C::Testing, S::InProgress),
                (C::Testing, S::Completed),
                (C::Registration, S::InProgress),
                (C::Completed, S::Success),
            ]
        );
        assert_eq!(rows.last().unwrap().tool_id, Some(tool.id));
        assert!(rows[4].ai_prompt_used.is_some());
        assert!(orchestrator.active().is_empty());
    }

    #[tokio::test]
    async fn failing_tests_end_with_error_row() {
        let store = Arc::new(InMemoryStore::new());
        let bad = r#"{"name":"x","description":"d","inputSchema":{"type":"object"},"handlerCode":"function(args) return { text = 'no content' } end"}"#;
        let orchestrator = orchestrator(&store, FakeAdapter::new(Behaviour::Answer(bad)), vec![]);

        let outcome = orchestrator.evolve(name("broken"), None).await;
        let EvolutionOutcome::Failed { stage, details, .. } = outcome else {
            panic!("expected failure");
        };
        assert_eq!(stage, CreationStage::Testing);
        assert_eq!(details.unwrap()["passed"], false);

        let rows = orchestrator.history("broken").await.unwrap();
        let last = rows.last().unwrap();
        assert_eq!((last.stage, last.status), (CreationStage::Error, StageStatus::Failed));
        assert_eq!(last.details["failedStage"], "testing");
        assert!(store.get_generated_tool_by_name("broken").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_calls_share_one_run() {
        let store = Arc::new(InMemoryStore::new());
        let adapter = FakeAdapter::new(Behaviour::Slow(Duration::from_millis(200)));
        let orchestrator = orchestrator(&store, adapter.clone(), vec![]);

        let first = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move { orchestrator.evolve(name("slugify"), None).await }
        });
        while orchestrator.active().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let running = orchestrator.active()[0].evolution_id;

        let second = orchestrator.evolve(name("slugify"), None).await;
        assert!(matches!(
            second,
            EvolutionOutcome::Rejected(Rejection::InFlight { evolution_id }) if evolution_id == running
        ));

        let first = first.await.unwrap();
        assert!(matches!(first, EvolutionOutcome::Completed { .. }));
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);

        let started = orchestrator
            .history("slugify")
            .await
            .unwrap()
            .iter()
            .filter(|row| row.stage == CreationStage::Started)
            .count();
        assert_eq!(started, 1);
    }

    #[tokio::test]
    async fn panics_become_failures_and_release_the_name() {
        let store = Arc::new(InMemoryStore::new());
        let orchestrator = orchestrator(&store, FakeAdapter::new(Behaviour::Panic), vec![]);

        let outcome = orchestrator.evolve(name("explode"), None).await;
        let EvolutionOutcome::Failed { stage, reason, .. } = outcome else {
            panic!("expected failure");
        };
        assert_eq!(stage, CreationStage::Generation);
        assert!(reason.contains("provider exploded"), "{reason}");
        assert!(orchestrator.active().is_empty());

        let rows = orchestrator.history("explode").await.unwrap();
        assert_eq!(rows.last().unwrap().stage, CreationStage::Error);
    }

    #[tokio::test]
    async fn existing_name_fails_registration() {
        let store = Arc::new(InMemoryStore::new());
        let orchestrator = orchestrator(&store, FakeAdapter::new(Behaviour::Answer(ANSWER)), vec![]);
        assert!(matches!(
            orchestrator.evolve(name("slugify"), None).await,
            EvolutionOutcome::Completed { .. }
        ));

        let outcome = orchestrator.evolve(name("slugify"), None).await;
        let EvolutionOutcome::Failed { stage, reason, .. } = outcome else {
            panic!("expected failure");
        };
        assert_eq!(stage, CreationStage::Registration);
        assert!(reason.contains("already exists"));
        assert_eq!(store.get_generated_tools(None).await.unwrap().len(), 1);
    }
}
