use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream;
use serde_json::{Value, json};
use toolforge::Forge;
use toolforge::adapters::traits::{
    AdapterMetadata, AdapterResult, AdapterStream, InferenceChunk, InferenceRequest, ModelAdapter,
};
use toolforge::config::ForgeConfig;
use toolforge::discovery::{
    Candidate, CandidatePayload, DiscoveryResult, DiscoverySource, SearchOptions, SourceKind,
};
use toolforge::evolution::EvolutionOrchestrator;
use toolforge::primitives::ToolName;
use toolforge::sandbox::{CandidateTool, Sandbox};
use toolforge::store::{
    CreationStage, FileStore, InMemoryStore, NewGeneratedTool, SourceType, StageStatus,
    ToolStatus, ToolStore,
};
use toolforge::tools::{EvolutionOutcome, ExecutionContext, RegistryError, ToolCallResult};

/// Completion provider that returns one canned answer per tool name.
struct StaticAdapter {
    metadata: AdapterMetadata,
    answers: Vec<(&'static str, String)>,
    delay: Duration,
    calls: AtomicUsize,
}

impl StaticAdapter {
    fn new(answers: Vec<(&'static str, String)>) -> Self {
        Self {
            metadata: AdapterMetadata::new("static", "static-model"),
            answers,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelAdapter for StaticAdapter {
    fn metadata(&self) -> &AdapterMetadata {
        &self.metadata
    }

    async fn infer(&self, request: InferenceRequest) -> AdapterResult<AdapterStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let prompt: String = request
            .messages()
            .iter()
            .map(|message| message.content())
            .collect();
        let answer = self
            .answers
            .iter()
            .find(|(name, _)| prompt.contains(&format!("`{name}`")))
            .map(|(_, answer)| answer.clone())
            .unwrap_or_else(|| "I cannot help with that.".to_owned());
        let chunk = InferenceChunk::new(answer, true);
        Ok(Box::pin(stream::once(async move { Ok(chunk) })))
    }
}

/// Discovery source with a fixed hit list.
struct FixedSource {
    kind: SourceKind,
    hits: Vec<Candidate>,
}

#[async_trait]
impl DiscoverySource for FixedSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn search(&self, tool_name: &str, options: &SearchOptions) -> DiscoveryResult {
        DiscoveryResult::finish(
            self.kind,
            tool_name,
            Instant::now(),
            Ok(self.hits.clone()),
            options.max_results,
        )
    }
}

fn answer(name: &str, schema: Value, handler: &str) -> String {
    let body = json!({
        "name": name,
        "description": format!("Generated {name}"),
        "category": "generated",
        "inputSchema": schema,
        "handlerCode": handler,
    });
    format!("Here is the tool:\n```json\n{body:#}\n```")
}

fn text_schema() -> Value {
    json!({
        "type": "object",
        "required": ["text"],
        "properties": { "text": { "type": "string" } }
    })
}

const SENTIMENT: &str = "function(args)\n  local score = 0\n  if string.find(args.text, 'good') then score = 1 end\n  return { content = { { type = 'text', text = tostring(score) } } }\nend";

const UUID_GEN: &str = "function(args)\n  return { content = { { type = 'text', text = string.format('%08x', math.random(0, 0x7fffffff)) } } }\nend";

async fn forge_with(
    store: Arc<dyn ToolStore>,
    adapter: Arc<StaticAdapter>,
    sources: Vec<Arc<dyn DiscoverySource>>,
) -> Forge {
    Forge::with_components(ForgeConfig::default(), store, adapter, sources)
        .await
        .unwrap()
}

fn metadata(result: &ToolCallResult) -> &serde_json::Map<String, Value> {
    result.metadata.as_ref().expect("metadata present")
}

#[tokio::test]
async fn zero_discovery_results_still_generate_an_active_tool() {
    let store = Arc::new(InMemoryStore::new());
    let adapter = Arc::new(StaticAdapter::new(vec![(
        "sentiment_score",
        answer("sentiment_score", text_schema(), SENTIMENT),
    )]));
    let forge = forge_with(store.clone(), adapter.clone(), Vec::new()).await;

    let result = forge
        .registry()
        .execute(
            "sentiment_score",
            json!({ "text": "a good day" }),
            &ExecutionContext::default(),
        )
        .await
        .unwrap();
    assert!(!result.is_error, "{result:?}");
    assert_eq!(result.text_content(), "1");
    assert_eq!(metadata(&result)["evolution"]["evolved"], true);

    let tool = store
        .get_generated_tool_by_name("sentiment_score")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tool.status, ToolStatus::Active);
    assert_eq!(tool.source_type, SourceType::AiGenerated);
    assert_eq!(tool.usage_count, 1);

    let history = forge.orchestrator().history("sentiment_score").await.unwrap();
    let generation = history
        .iter()
        .find(|row| row.stage == CreationStage::Generation && row.status == StageStatus::Completed)
        .unwrap();
    assert_eq!(
        generation.details["analysis"]["suggestedApproach"],
        "ai-generated"
    );

    // The second call runs the registered tool without another evolution.
    let again = forge
        .registry()
        .execute(
            "sentiment_score",
            json!({ "text": "meh" }),
            &ExecutionContext::default(),
        )
        .await
        .unwrap();
    assert_eq!(again.text_content(), "0");
    assert!(again.metadata.is_none());
    assert_eq!(adapter.calls(), 1);
}

#[tokio::test]
async fn network_access_is_rejected_before_registration() {
    let store = Arc::new(InMemoryStore::new());
    let handler = "function(args)\n  local body = http.request('http://example.com/')\n  return { content = { { type = 'text', text = body } } }\nend";
    let adapter = Arc::new(StaticAdapter::new(vec![(
        "fetch_page",
        answer("fetch_page", text_schema(), handler),
    )]));
    let forge = forge_with(store.clone(), adapter.clone(), Vec::new()).await;

    let result = forge
        .registry()
        .execute("fetch_page", json!({ "text": "x" }), &ExecutionContext::default())
        .await
        .unwrap();
    assert!(result.is_error);
    let metadata = metadata(&result);
    assert_eq!(metadata["stage"], "generation");
    assert!(
        metadata["reason"].as_str().unwrap().contains("network"),
        "{metadata:?}"
    );

    assert!(store.get_generated_tool_by_name("fetch_page").await.unwrap().is_none());
    assert_eq!(adapter.calls(), 1, "security violations are not retried");
    assert!(!forge.registry().has("fetch_page"));
}

#[tokio::test]
async fn concurrent_calls_for_one_name_produce_one_tool() {
    let store = Arc::new(InMemoryStore::new());
    let adapter = Arc::new(
        StaticAdapter::new(vec![("uuid_gen", answer("uuid_gen", json!({"type": "object"}), UUID_GEN))])
            .with_delay(Duration::from_millis(200)),
    );
    let forge = forge_with(store.clone(), adapter.clone(), Vec::new()).await;
    let registry = forge.registry();
    let context = ExecutionContext::default();

    let (first, second) = tokio::join!(
        registry.execute("uuid_gen", json!({}), &context),
        registry.execute("uuid_gen", json!({}), &context),
    );
    let results = [first.unwrap(), second.unwrap()];

    let evolved: Vec<_> = results.iter().filter(|r| !r.is_error).collect();
    let rejected: Vec<_> = results.iter().filter(|r| r.is_error).collect();
    assert_eq!(evolved.len(), 1);
    assert_eq!(rejected.len(), 1);

    let winner = &metadata(evolved[0])["evolution"]["evolutionId"];
    let pointer = metadata(rejected[0]);
    assert_eq!(pointer["rejected"], true);
    assert_eq!(&pointer["evolutionId"], winner);

    let rows = store.get_generated_tools(None).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].name.as_str(), "uuid_gen");
    assert_eq!(adapter.calls(), 1);

    let started = forge
        .orchestrator()
        .history("uuid_gen")
        .await
        .unwrap()
        .into_iter()
        .filter(|row| row.stage == CreationStage::Started)
        .count();
    assert_eq!(started, 1);
}

#[tokio::test]
async fn required_only_case_receives_synthesized_string() {
    let store = Arc::new(InMemoryStore::new());
    let strict = "function(args)\n  if type(args.text) ~= 'string' then error('text is required') end\n  return { content = { { type = 'text', text = string.upper(args.text) } } }\nend";
    let adapter = Arc::new(StaticAdapter::new(vec![(
        "shout",
        answer("shout", text_schema(), strict),
    )]));
    let forge = forge_with(store.clone(), adapter, Vec::new()).await;

    let outcome = forge
        .orchestrator()
        .evolve(ToolName::new("shout").unwrap(), None)
        .await;
    let EvolutionOutcome::Completed { tool, .. } = outcome else {
        panic!("expected completion: {outcome:?}");
    };

    let cases = tool.test_results["executionTests"].as_array().unwrap();
    let required_only = cases
        .iter()
        .find(|case| case["name"] == "required_only")
        .unwrap();
    assert_eq!(required_only["input"], json!({ "text": "test_value" }));
    assert_eq!(required_only["passed"], true);
    assert_eq!(required_only["output"]["content"][0]["text"], "TEST_VALUE");
}

#[tokio::test]
async fn discovery_hits_set_provenance() {
    let store = Arc::new(InMemoryStore::new());
    let source: Arc<dyn DiscoverySource> = Arc::new(FixedSource {
        kind: SourceKind::ApiCollectionSearch,
        hits: vec![Candidate {
            name: "Shout API".into(),
            description: "Upper-cases text".into(),
            relevance_score: 0.8,
            payload: CandidatePayload::ApiRequest {
                collection: "Text tools".into(),
                method: Some("POST".into()),
                endpoint: Some("/shout".into()),
                url: "https://example.invalid/collections/shout".into(),
            },
        }],
    });
    let strict = "function(args)\n  return { content = { { type = 'text', text = string.upper(args.text or '') } } }\nend";
    let adapter = Arc::new(StaticAdapter::new(vec![(
        "shout",
        answer("shout", text_schema(), strict),
    )]));
    let forge = forge_with(store.clone(), adapter, vec![source]).await;

    let result = forge
        .registry()
        .execute("shout", json!({ "text": "hi" }), &ExecutionContext::default())
        .await
        .unwrap();
    assert_eq!(result.text_content(), "HI");

    let tool = store.get_generated_tool_by_name("shout").await.unwrap().unwrap();
    assert_eq!(tool.source_type, SourceType::ApiCollectionSearch);
    assert_eq!(
        tool.source_url.as_deref(),
        Some("https://example.invalid/collections/shout")
    );
}

#[tokio::test]
async fn registered_names_are_never_registered_twice() {
    let store = Arc::new(InMemoryStore::new());
    let adapter = Arc::new(StaticAdapter::new(vec![(
        "sentiment_score",
        answer("sentiment_score", text_schema(), SENTIMENT),
    )]));
    let forge = forge_with(store.clone(), adapter, Vec::new()).await;
    let orchestrator: &EvolutionOrchestrator = forge.orchestrator();
    let name = ToolName::new("sentiment_score").unwrap();

    assert!(matches!(
        orchestrator.evolve(name.clone(), None).await,
        EvolutionOutcome::Completed { .. }
    ));
    let outcome = orchestrator.evolve(name, None).await;
    assert!(matches!(
        outcome,
        EvolutionOutcome::Failed { stage: CreationStage::Registration, .. }
    ));
    assert_eq!(store.get_generated_tools(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn disabled_auto_evolve_reports_missing_tools() {
    let store = Arc::new(InMemoryStore::new());
    let adapter = Arc::new(StaticAdapter::new(Vec::new()));
    let mut config = ForgeConfig::default();
    config.evolution.auto_evolve = false;
    let forge = Forge::with_components(config, store, adapter.clone(), Vec::new())
        .await
        .unwrap();

    let err = forge
        .registry()
        .execute("sentiment_score", json!({}), &ExecutionContext::default())
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::NotFound { .. }));
    assert_eq!(err.status_code(), 404);
    assert_eq!(adapter.calls(), 0);

    let echoed = forge
        .registry()
        .execute("echo", json!({ "message": "still here" }), &ExecutionContext::default())
        .await
        .unwrap();
    assert_eq!(echoed.text_content(), "still here");
}

#[tokio::test]
async fn runaway_handlers_stop_at_the_deadline() {
    let store = Arc::new(InMemoryStore::new());
    store
        .create_generated_tool(NewGeneratedTool {
            name: ToolName::new("spin").unwrap(),
            description: "Never returns".into(),
            category: "generated".into(),
            input_schema: json!({ "type": "object" }),
            handler_code: "function(args)\n  local n = 0\n  while n >= 0 do n = n + 1 end\nend".into(),
            source_type: SourceType::AiGenerated,
            source_url: None,
            source_data: Value::Null,
            test_results: Value::Null,
            security_scan: Value::Null,
        })
        .await
        .unwrap();
    let forge = forge_with(store, Arc::new(StaticAdapter::new(Vec::new())), Vec::new()).await;

    let context = ExecutionContext {
        timeout: Some(Duration::from_millis(200)),
        ..ExecutionContext::default()
    };
    let started = Instant::now();
    let result = forge
        .registry()
        .execute("spin", json!({}), &context)
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(result.is_error);
    assert_eq!(metadata(&result)["errorKind"], "timeout");
}

#[tokio::test]
async fn failed_scans_never_reach_execution() {
    let sandbox = Sandbox::default();
    let candidate = CandidateTool {
        name: "wipe".into(),
        description: "Removes files".into(),
        category: "generated".into(),
        input_schema: json!({ "type": "object" }),
        handler_code: "function(args) os.execute('rm -rf /') return { content = {} } end".into(),
    };

    let first = sandbox.test(&candidate, None).await;
    let second = sandbox.test(&candidate, None).await;
    assert!(!first.passed);
    assert!(first.execution_tests.is_empty());
    assert!(!first.compilation_test.passed);
    assert_eq!(first.security_scan, second.security_scan);
}

#[tokio::test]
async fn generated_tools_survive_a_restart() {
    let path = std::env::temp_dir().join(format!(
        "toolforge-restart-{}.jsonl",
        toolforge::primitives::ToolId::random()
    ));
    let adapter = Arc::new(StaticAdapter::new(vec![(
        "sentiment_score",
        answer("sentiment_score", text_schema(), SENTIMENT),
    )]));

    {
        let store: Arc<dyn ToolStore> = Arc::new(FileStore::open(path.clone()).await.unwrap());
        let forge = forge_with(store, adapter.clone(), Vec::new()).await;
        let result = forge
            .registry()
            .execute(
                "sentiment_score",
                json!({ "text": "good" }),
                &ExecutionContext::default(),
            )
            .await
            .unwrap();
        assert!(!result.is_error);
    }

    let store: Arc<dyn ToolStore> = Arc::new(FileStore::open(path.clone()).await.unwrap());
    let forge = forge_with(store, adapter.clone(), Vec::new()).await;
    assert!(forge.registry().has("sentiment_score"));
    let result = forge
        .registry()
        .execute(
            "sentiment_score",
            json!({ "text": "good" }),
            &ExecutionContext::default(),
        )
        .await
        .unwrap();
    assert_eq!(result.text_content(), "1");
    assert_eq!(adapter.calls(), 1);

    let history = forge.orchestrator().history("sentiment_score").await.unwrap();
    assert_eq!(history.last().unwrap().stage, CreationStage::Completed);

    let _ = std::fs::remove_file(path);
}
