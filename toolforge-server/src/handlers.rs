//! Routing of JSON-RPC methods to the runtime.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use toolforge::Forge;
use toolforge::primitives::EvolutionId;
use toolforge::store::{CreationStage, LogFilter, StoreError};
use toolforge::tools::{ExecutionContext, RegistryError};
use tracing::debug;

use crate::rpc::{INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND, RpcError};

/// Methods the server answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Handshake.
    Initialize,
    /// Liveness probe.
    Ping,
    /// Enumerate tools.
    ToolsList,
    /// Execute, evolving on demand.
    ToolsCall,
    /// Registry counters.
    ToolsStats,
    /// Reload generated tools from the store.
    ToolsReload,
    /// Soft-delete a generated tool.
    ToolsDisable,
    /// Audit rows and runs in flight.
    EvolutionHistory,
}

impl Method {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Ping => "ping",
            Self::ToolsList => "tools/list",
            Self::ToolsCall => "tools/call",
            Self::ToolsStats => "tools/stats",
            Self::ToolsReload => "tools/reload",
            Self::ToolsDisable => "tools/disable",
            Self::EvolutionHistory => "evolution/history",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = HandlerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "initialize" => Self::Initialize,
            "ping" => Self::Ping,
            "tools/list" => Self::ToolsList,
            "tools/call" => Self::ToolsCall,
            "tools/stats" => Self::ToolsStats,
            "tools/reload" => Self::ToolsReload,
            "tools/disable" => Self::ToolsDisable,
            "evolution/history" => Self::EvolutionHistory,
            other => return Err(HandlerError::UnknownMethod(other.to_owned())),
        })
    }
}

/// Context provided to method handlers.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    method: Method,
    params: Value,
    received_at: Instant,
}

impl HandlerContext {
    /// Builds a context for one request.
    #[must_use]
    pub fn new(method: Method, params: Value) -> Self {
        Self {
            method,
            params,
            received_at: Instant::now(),
        }
    }

    /// Method being handled.
    #[must_use]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// Raw parameters.
    #[must_use]
    pub fn params(&self) -> &Value {
        &self.params
    }

    /// Time the request was read.
    #[must_use]
    pub fn received_at(&self) -> Instant {
        self.received_at
    }

    /// Decodes the parameters; `null` is treated as `{}`.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::InvalidParams`] when decoding fails.
    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> HandlerResult<T> {
        let params = if self.params.is_null() {
            json!({})
        } else {
            self.params.clone()
        };
        serde_json::from_value(params).map_err(|err| HandlerError::InvalidParams {
            reason: format!("{}: {err}", self.method),
        })
    }
}

/// Errors that can occur while handling a request.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Method name not recognised.
    #[error("method `{0}` not found")]
    UnknownMethod(String),
    /// The handler does not implement the method.
    #[error("method `{0}` is not supported")]
    Unsupported(Method),
    /// Parameters could not be decoded.
    #[error("invalid params for {reason}")]
    InvalidParams {
        /// Decoder message.
        reason: String,
    },
    /// Registry rejected the call.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// Store access failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<&HandlerError> for RpcError {
    fn from(err: &HandlerError) -> Self {
        match err {
            HandlerError::UnknownMethod(_) | HandlerError::Unsupported(_) => {
                RpcError::new(METHOD_NOT_FOUND, err.to_string())
            }
            HandlerError::InvalidParams { .. } => RpcError::new(INVALID_PARAMS, err.to_string()),
            HandlerError::Registry(inner) => RpcError::from(inner),
            HandlerError::Store(_) => RpcError::new(INTERNAL_ERROR, err.to_string()),
        }
    }
}

/// Result alias for handler operations.
pub type HandlerResult<T = Value> = Result<T, HandlerError>;

/// Trait implemented by JSON-RPC method handlers.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Called for `initialize`.
    async fn initialize(&self, ctx: HandlerContext) -> HandlerResult {
        self.handle_unhandled(ctx).await
    }

    /// Called for `ping`.
    async fn ping(&self, _ctx: HandlerContext) -> HandlerResult {
        Ok(json!({}))
    }

    /// Called for `tools/list`.
    async fn tools_list(&self, ctx: HandlerContext) -> HandlerResult {
        self.handle_unhandled(ctx).await
    }

    /// Called for `tools/call`.
    async fn tools_call(&self, ctx: HandlerContext) -> HandlerResult {
        self.handle_unhandled(ctx).await
    }

    /// Called for `tools/stats`.
    async fn tools_stats(&self, ctx: HandlerContext) -> HandlerResult {
        self.handle_unhandled(ctx).await
    }

    /// Called for `tools/reload`.
    async fn tools_reload(&self, ctx: HandlerContext) -> HandlerResult {
        self.handle_unhandled(ctx).await
    }

    /// Called for `tools/disable`.
    async fn tools_disable(&self, ctx: HandlerContext) -> HandlerResult {
        self.handle_unhandled(ctx).await
    }

    /// Called for `evolution/history`.
    async fn evolution_history(&self, ctx: HandlerContext) -> HandlerResult {
        self.handle_unhandled(ctx).await
    }

    /// Fallback invoked when a specialized handler is not implemented.
    async fn handle_unhandled(&self, ctx: HandlerContext) -> HandlerResult {
        Err(HandlerError::Unsupported(ctx.method()))
    }
}

/// Dispatches a request to the appropriate handler.
///
/// # Errors
///
/// Propagates errors returned by the underlying handler implementation.
pub async fn dispatch_request<H>(handler: &H, ctx: HandlerContext) -> HandlerResult
where
    H: RequestHandler + ?Sized,
{
    let method = ctx.method();
    let result = match method {
        Method::Initialize => handler.initialize(ctx).await,
        Method::Ping => handler.ping(ctx).await,
        Method::ToolsList => handler.tools_list(ctx).await,
        Method::ToolsCall => handler.tools_call(ctx).await,
        Method::ToolsStats => handler.tools_stats(ctx).await,
        Method::ToolsReload => handler.tools_reload(ctx).await,
        Method::ToolsDisable => handler.tools_disable(ctx).await,
        Method::EvolutionHistory => handler.evolution_history(ctx).await,
    };
    debug!(%method, ok = result.is_ok(), "request handled");
    result
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListParams {
    category: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
    auto_evolve: Option<bool>,
    description: Option<String>,
    user: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct DisableParams {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryParams {
    tool_name: Option<String>,
    evolution_id: Option<EvolutionId>,
    stage: Option<CreationStage>,
    limit: Option<usize>,
}

/// Serves every method from a [`Forge`] runtime.
#[derive(Debug, Clone)]
pub struct ForgeHandler {
    forge: Forge,
}

impl ForgeHandler {
    /// Wraps a runtime.
    #[must_use]
    pub fn new(forge: Forge) -> Self {
        Self { forge }
    }
}

#[async_trait]
impl RequestHandler for ForgeHandler {
    async fn initialize(&self, _ctx: HandlerContext) -> HandlerResult {
        Ok(json!({
            "protocolVersion": "2024-11-05",
            "serverInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": { "tools": { "listChanged": false } },
        }))
    }

    async fn tools_list(&self, ctx: HandlerContext) -> HandlerResult {
        let params: ListParams = ctx.decode()?;
        let registry = self.forge.registry();
        let tools = match params.category.as_deref() {
            Some(category) => registry.get_by_category(category),
            None => registry.list(),
        };
        Ok(json!({ "tools": tools }))
    }

    async fn tools_call(&self, ctx: HandlerContext) -> HandlerResult {
        let params: CallParams = ctx.decode()?;
        let context = ExecutionContext {
            auto_evolve: params.auto_evolve,
            description: params.description,
            user: params.user,
            timeout: params.timeout_ms.map(Duration::from_millis),
        };
        let arguments = if params.arguments.is_null() {
            json!({})
        } else {
            params.arguments
        };
        let result = self
            .forge
            .registry()
            .execute(&params.name, arguments, &context)
            .await?;
        Ok(serde_json::to_value(result).unwrap_or(Value::Null))
    }

    async fn tools_stats(&self, _ctx: HandlerContext) -> HandlerResult {
        Ok(serde_json::to_value(self.forge.registry().get_stats()).unwrap_or(Value::Null))
    }

    async fn tools_reload(&self, _ctx: HandlerContext) -> HandlerResult {
        let loaded = self.forge.registry().reload().await?;
        Ok(json!({ "loaded": loaded }))
    }

    async fn tools_disable(&self, ctx: HandlerContext) -> HandlerResult {
        let params: DisableParams = ctx.decode()?;
        let tool = self.forge.registry().disable(&params.name).await?;
        Ok(json!({ "tool": tool }))
    }

    async fn evolution_history(&self, ctx: HandlerContext) -> HandlerResult {
        let params: HistoryParams = ctx.decode()?;
        let filter = LogFilter {
            evolution_id: params.evolution_id,
            tool_name: params.tool_name,
            stage: params.stage,
            limit: params.limit,
        };
        let logs = self.forge.store().get_tool_creation_logs(&filter).await?;
        Ok(json!({
            "logs": logs,
            "active": self.forge.orchestrator().active(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::stream;
    use toolforge::adapters::traits::{
        AdapterMetadata, AdapterResult, AdapterStream, InferenceChunk, InferenceRequest,
        ModelAdapter,
    };
    use toolforge::config::ForgeConfig;
    use toolforge::store::InMemoryStore;

    use super::*;

    struct StaticAdapter {
        metadata: AdapterMetadata,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ModelAdapter for StaticAdapter {
        fn metadata(&self) -> &AdapterMetadata {
            &self.metadata
        }

        async fn infer(&self, _request: InferenceRequest) -> AdapterResult<AdapterStream> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let answer = json!({
                "name": "reverse",
                "description": "Reverses text",
                "category": "text",
                "inputSchema": {
                    "type": "object",
                    "required": ["text"],
                    "properties": { "text": { "type": "string" } }
                },
                "handlerCode": "function(args) return { content = { { type = 'text', text = string.reverse(args.text) } } } end",
            });
            let chunk = InferenceChunk::new(answer.to_string(), true);
            Ok(Box::pin(stream::once(async move { Ok(chunk) })))
        }
    }

    async fn handler() -> ForgeHandler {
        let adapter = Arc::new(StaticAdapter {
            metadata: AdapterMetadata::new("static", "static-model"),
            calls: AtomicUsize::new(0),
        });
        let forge = Forge::with_components(
            ForgeConfig::default(),
            Arc::new(InMemoryStore::new()),
            adapter,
            Vec::new(),
        )
        .await
        .unwrap();
        ForgeHandler::new(forge)
    }

    async fn call(handler: &ForgeHandler, method: Method, params: Value) -> HandlerResult {
        dispatch_request(handler, HandlerContext::new(method, params)).await
    }

    #[test]
    fn method_names_round_trip() {
        for method in [
            Method::Initialize,
            Method::Ping,
            Method::ToolsList,
            Method::ToolsCall,
            Method::ToolsStats,
            Method::ToolsReload,
            Method::ToolsDisable,
            Method::EvolutionHistory,
        ] {
            assert_eq!(method.as_str().parse::<Method>().unwrap(), method);
        }
        let err = "tools/delete".parse::<Method>().unwrap_err();
        assert_eq!(RpcError::from(&err).code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn default_handlers_are_unsupported() {
        struct Empty;
        impl RequestHandler for Empty {}

        let err = dispatch_request(&Empty, HandlerContext::new(Method::ToolsStats, Value::Null))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Unsupported(Method::ToolsStats)));
        assert!(
            dispatch_request(&Empty, HandlerContext::new(Method::Ping, Value::Null))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn lists_builtins_by_category() {
        let handler = handler().await;
        let all = call(&handler, Method::ToolsList, Value::Null).await.unwrap();
        assert_eq!(all["tools"].as_array().unwrap().len(), 6);

        let encoding = call(&handler, Method::ToolsList, json!({ "category": "encoding" }))
            .await
            .unwrap();
        let names: Vec<_> = encoding["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|tool| tool["name"].as_str().unwrap().to_owned())
            .collect();
        assert_eq!(names, ["base64_decode", "base64_encode"]);
    }

    #[tokio::test]
    async fn call_evolves_then_history_shows_the_run() {
        let handler = handler().await;
        let result = call(
            &handler,
            Method::ToolsCall,
            json!({ "name": "reverse", "arguments": { "text": "abc" } }),
        )
        .await
        .unwrap();
        assert_eq!(result["content"][0]["text"], "cba");
        assert_eq!(result["metadata"]["evolution"]["evolved"], true);

        let history = call(
            &handler,
            Method::EvolutionHistory,
            json!({ "toolName": "reverse" }),
        )
        .await
        .unwrap();
        let stages: Vec<_> = history["logs"]
            .as_array()
            .unwrap()
            .iter()
            .map(|row| row["stage"].as_str().unwrap().to_owned())
            .collect();
        assert_eq!(stages.first().map(String::as_str), Some("started"));
        assert_eq!(stages.last().map(String::as_str), Some("completed"));
        assert_eq!(history["active"], json!([]));

        let stats = call(&handler, Method::ToolsStats, Value::Null).await.unwrap();
        assert_eq!(stats["generated"], 1);
    }

    #[tokio::test]
    async fn disabled_tools_are_not_found() {
        let handler = handler().await;
        call(
            &handler,
            Method::ToolsCall,
            json!({ "name": "reverse", "arguments": { "text": "abc" } }),
        )
        .await
        .unwrap();

        let disabled = call(&handler, Method::ToolsDisable, json!({ "name": "reverse" }))
            .await
            .unwrap();
        assert_eq!(disabled["tool"]["status"], "disabled");

        let err = call(
            &handler,
            Method::ToolsCall,
            json!({ "name": "reverse", "arguments": { "text": "abc" } }),
        )
        .await
        .unwrap_err();
        assert_eq!(RpcError::from(&err).code, crate::rpc::TOOL_NOT_FOUND);

        let err = call(&handler, Method::ToolsDisable, json!({ "name": "echo" }))
            .await
            .unwrap_err();
        assert_eq!(RpcError::from(&err).code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn bad_params_are_invalid() {
        let handler = handler().await;
        let err = call(&handler, Method::ToolsCall, json!({ "arguments": {} }))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::InvalidParams { .. }));
        assert_eq!(RpcError::from(&err).code, INVALID_PARAMS);
    }
}
