//! Runtime registry for tool metadata and execution.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use forge_primitives::ToolName;
use forge_sandbox::{Sandbox, SandboxError};
use forge_store::{GeneratedTool, GeneratedToolPatch, ToolStatus, ToolStore};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::error::{RegistryError, RegistryResult, ToolError, ToolResult};
use crate::evolver::{EvolutionOutcome, EvolveRequest, Rejection, ToolEvolver};
use crate::types::{ExecutionContext, ToolCallResult, ToolDefinition};

/// Trait implemented by built-in tool executors.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Invokes the tool with the given JSON input, returning JSON output.
    ///
    /// A string output becomes a single text item; anything else is rendered
    /// as pretty JSON.
    async fn invoke(&self, input: Value) -> ToolResult<Value>;
}

#[async_trait]
impl<F, Fut> Tool for F
where
    F: Send + Sync + Fn(Value) -> Fut,
    Fut: Future<Output = ToolResult<Value>> + Send,
{
    async fn invoke(&self, input: Value) -> ToolResult<Value> {
        (self)(input).await
    }
}

/// Handle returned by the registry for direct invocation of a built-in.
#[derive(Clone)]
pub struct ToolHandle {
    definition: ToolDefinition,
    executor: Arc<dyn Tool>,
}

impl ToolHandle {
    /// Returns the associated definition.
    #[must_use]
    pub fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    /// Executes the underlying tool implementation.
    ///
    /// # Errors
    ///
    /// Propagates any [`ToolError`] returned by the implementation.
    pub async fn invoke(&self, input: Value) -> ToolResult<Value> {
        self.executor.invoke(input).await
    }
}

struct GeneratedEntry {
    tool: GeneratedTool,
    definition: ToolDefinition,
    usage: AtomicU64,
}

impl GeneratedEntry {
    fn new(tool: GeneratedTool) -> Self {
        Self {
            definition: ToolDefinition::from(&tool),
            usage: AtomicU64::new(tool.usage_count),
            tool,
        }
    }
}

type GeneratedMap = HashMap<String, Arc<GeneratedEntry>>;

enum Resolved {
    Builtin(ToolHandle),
    Generated(Arc<GeneratedEntry>),
}

/// Snapshot returned by [`ToolRegistry::get_stats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    /// Number of built-in tools.
    pub builtin: usize,
    /// Number of active generated tools.
    pub generated: usize,
    /// `builtin + generated`.
    pub total: usize,
    /// Tool count per category.
    pub by_category: BTreeMap<String, usize>,
    /// Executions across generated tools.
    pub total_usage: u64,
    /// Evolutions currently in flight.
    pub active_evolutions: usize,
    /// Whether missing tools are evolved.
    pub auto_evolve: bool,
}

/// Registry of built-in and generated tools.
///
/// Built-ins are registered once at start-up and cannot be replaced. Generated
/// tools live in an immutable snapshot: readers clone the `Arc`, writers swap
/// in a modified copy.
pub struct ToolRegistry {
    builtins: RwLock<HashMap<String, ToolHandle>>,
    generated: RwLock<Arc<GeneratedMap>>,
    store: Arc<dyn ToolStore>,
    sandbox: Sandbox,
    evolver: Option<Arc<dyn ToolEvolver>>,
    auto_evolve: bool,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let builtins: Vec<_> = read(&self.builtins).keys().cloned().collect();
        let generated: Vec<_> = self.snapshot().keys().cloned().collect();
        f.debug_struct("ToolRegistry")
            .field("builtins", &builtins)
            .field("generated", &generated)
            .field("auto_evolve", &self.auto_evolve)
            .finish_non_exhaustive()
    }
}

impl ToolRegistry {
    /// Creates an empty registry backed by `store`.
    ///
    /// Call [`ToolRegistry::reload`] to load persisted tools.
    #[must_use]
    pub fn new(store: Arc<dyn ToolStore>, sandbox: Sandbox) -> Self {
        Self {
            builtins: RwLock::new(HashMap::new()),
            generated: RwLock::new(Arc::new(HashMap::new())),
            store,
            sandbox,
            evolver: None,
            auto_evolve: true,
        }
    }

    /// Attaches the component that creates missing tools.
    #[must_use]
    pub fn with_evolver(mut self, evolver: Arc<dyn ToolEvolver>) -> Self {
        self.evolver = Some(evolver);
        self
    }

    /// Enables or disables auto-evolution globally.
    #[must_use]
    pub fn with_auto_evolve(mut self, enabled: bool) -> Self {
        self.auto_evolve = enabled;
        self
    }

    /// Returns the store backing generated tools.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ToolStore> {
        &self.store
    }

    /// Registers a built-in tool implementation.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] if the name is already present.
    pub fn register_builtin<T>(&self, definition: ToolDefinition, tool: T) -> RegistryResult<()>
    where
        T: Tool + 'static,
    {
        let mut inner = write(&self.builtins);
        let name = definition.name.to_string();
        if inner.contains_key(&name) {
            return Err(RegistryError::Duplicate { name });
        }

        debug!(tool = %name, "built-in tool registered");
        inner.insert(
            name,
            ToolHandle {
                definition,
                executor: Arc::new(tool),
            },
        );
        Ok(())
    }

    /// Adds or replaces a generated tool in the in-memory map.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] if a built-in owns the name.
    pub fn register_generated(&self, tool: GeneratedTool) -> RegistryResult<ToolDefinition> {
        if read(&self.builtins).contains_key(tool.name.as_str()) {
            return Err(RegistryError::Duplicate {
                name: tool.name.to_string(),
            });
        }
        let entry = self.insert_generated(tool);
        Ok(entry.definition.clone())
    }

    /// Returns the definition of a tool by exact name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<ToolDefinition> {
        match self.resolve(name)? {
            Resolved::Builtin(handle) => Some(handle.definition),
            Resolved::Generated(entry) => Some(entry.definition.clone()),
        }
    }

    /// Returns a built-in handle by exact name.
    #[must_use]
    pub fn get_builtin(&self, name: &str) -> Option<ToolHandle> {
        read(&self.builtins).get(name).cloned()
    }

    /// Returns `true` if a built-in or active generated tool has this name.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    /// Lists built-ins followed by generated tools, each sorted by name.
    #[must_use]
    pub fn list(&self) -> Vec<ToolDefinition> {
        let mut builtins: Vec<_> = read(&self.builtins)
            .values()
            .map(|handle| handle.definition.clone())
            .collect();
        builtins.sort_by(|a, b| a.name.cmp(&b.name));

        let mut generated: Vec<_> = self
            .snapshot()
            .values()
            .map(|entry| entry.definition.clone())
            .collect();
        generated.sort_by(|a, b| a.name.cmp(&b.name));

        builtins.extend(generated);
        builtins
    }

    /// Lists tools whose category equals `category`.
    #[must_use]
    pub fn get_by_category(&self, category: &str) -> Vec<ToolDefinition> {
        self.list()
            .into_iter()
            .filter(|definition| definition.category == category)
            .collect()
    }

    /// Counts tools, usage and in-flight evolutions.
    #[must_use]
    pub fn get_stats(&self) -> RegistryStats {
        let mut by_category = BTreeMap::new();
        for definition in self.list() {
            *by_category.entry(definition.category).or_insert(0) += 1;
        }

        let builtin = read(&self.builtins).len();
        let snapshot = self.snapshot();
        let total_usage = snapshot
            .values()
            .map(|entry| entry.usage.load(Ordering::Relaxed))
            .sum();

        RegistryStats {
            builtin,
            generated: snapshot.len(),
            total: builtin + snapshot.len(),
            by_category,
            total_usage,
            active_evolutions: self
                .evolver
                .as_ref()
                .map_or(0, |evolver| evolver.active_count()),
            auto_evolve: self.auto_evolve,
        }
    }

    /// Replaces the generated map with the store's active rows.
    ///
    /// # Errors
    ///
    /// Propagates store failures; the previous map stays in place.
    pub async fn reload(&self) -> RegistryResult<usize> {
        let tools = self.store.get_generated_tools(Some(ToolStatus::Active)).await?;
        let mut map = GeneratedMap::with_capacity(tools.len());
        {
            let builtins = read(&self.builtins);
            for tool in tools {
                if builtins.contains_key(tool.name.as_str()) {
                    warn!(tool = %tool.name, "generated tool shadows a built-in; skipping");
                    continue;
                }
                map.insert(tool.name.to_string(), Arc::new(GeneratedEntry::new(tool)));
            }
        }

        let count = map.len();
        *write(&self.generated) = Arc::new(map);
        info!(count, "generated tools loaded");
        Ok(count)
    }

    /// Soft-deletes a generated tool and drops it from the map.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Validation`] for built-ins,
    /// [`RegistryError::NotFound`] for unknown names, and store failures.
    pub async fn disable(&self, name: &str) -> RegistryResult<GeneratedTool> {
        if read(&self.builtins).contains_key(name) {
            return Err(RegistryError::validation(format!(
                "built-in tool `{name}` cannot be disabled"
            )));
        }

        let tool = self
            .store
            .get_generated_tool_by_name(name)
            .await?
            .ok_or_else(|| RegistryError::NotFound {
                name: name.to_owned(),
            })?;
        let updated = self
            .store
            .update_generated_tool(tool.id, GeneratedToolPatch::status(ToolStatus::Disabled))
            .await?;

        {
            let mut guard = write(&self.generated);
            if guard.contains_key(name) {
                let mut next = GeneratedMap::clone(&guard);
                next.remove(name);
                *guard = Arc::new(next);
            }
        }

        info!(tool = %name, "generated tool disabled");
        Ok(updated)
    }

    /// Executes a tool, evolving it first when it does not exist.
    ///
    /// Expected failures (handler errors, timeouts, failed evolutions) come
    /// back as `Ok` results with `is_error` set.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Validation`] for bad names or arguments,
    /// [`RegistryError::NotFound`] when the tool is missing and no evolution
    /// was attempted, and store failures.
    pub async fn execute(
        &self,
        name: &str,
        args: Value,
        context: &ExecutionContext,
    ) -> RegistryResult<ToolCallResult> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RegistryError::validation("tool name cannot be empty"));
        }

        if let Some(resolved) = self.resolve(name) {
            return self.run(resolved, args, context).await;
        }

        if !self.should_evolve(context) {
            return Err(RegistryError::NotFound {
                name: name.to_owned(),
            });
        }

        let sanitized =
            ToolName::sanitize(name).map_err(|err| RegistryError::validation(err.to_string()))?;
        if let Some(resolved) = self.resolve(sanitized.as_str()) {
            return self.run(resolved, args, context).await;
        }

        match self.store.get_generated_tool_by_name(sanitized.as_str()).await? {
            Some(tool) if tool.status == ToolStatus::Active => {
                debug!(tool = %sanitized, "picking up tool registered elsewhere");
                let entry = self.insert_generated(tool);
                return Ok(self.run_generated(&entry, args, context).await);
            }
            Some(_) => {
                return Err(RegistryError::NotFound {
                    name: sanitized.to_string(),
                });
            }
            None => {}
        }

        self.evolve_and_run(sanitized, args, context).await
    }

    fn should_evolve(&self, context: &ExecutionContext) -> bool {
        self.auto_evolve && context.auto_evolve != Some(false) && self.evolver.is_some()
    }

    async fn evolve_and_run(
        &self,
        name: ToolName,
        args: Value,
        context: &ExecutionContext,
    ) -> RegistryResult<ToolCallResult> {
        let Some(evolver) = self.evolver.as_ref() else {
            return Err(RegistryError::NotFound {
                name: name.to_string(),
            });
        };

        info!(tool = %name, user = ?context.user, "tool missing; evolving");
        let request = EvolveRequest {
            name: name.clone(),
            description: context.description.clone(),
        };

        match evolver.evolve(request).await {
            EvolutionOutcome::Completed {
                evolution_id,
                tool,
                duration,
            } => {
                let tool_id = tool.id;
                let entry = self.insert_generated(*tool);
                let result = self.run_generated(&entry, args, context).await;
                let duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
                Ok(result.with_metadata(
                    "evolution",
                    json!({
                        "evolutionId": evolution_id,
                        "durationMs": duration_ms,
                        "toolId": tool_id,
                        "evolved": true,
                    }),
                ))
            }
            EvolutionOutcome::Failed {
                evolution_id,
                stage,
                reason,
                details,
            } => {
                warn!(tool = %name, %evolution_id, stage = %stage, %reason, "evolution failed");
                let mut result = ToolCallResult::error(format!(
                    "failed to evolve tool `{name}` during {stage}: {reason}"
                ))
                .with_metadata("stage", json!(stage))
                .with_metadata("reason", json!(reason))
                .with_metadata("evolutionId", json!(evolution_id));
                if let Some(details) = details {
                    result = result.with_metadata("details", details);
                }
                Ok(result)
            }
            EvolutionOutcome::Rejected(rejection) => {
                let reason = rejection.reason();
                debug!(tool = %name, %reason, "evolution rejected");
                let mut result =
                    ToolCallResult::error(format!("cannot evolve tool `{name}`: {reason}"))
                        .with_metadata("reason", json!(reason))
                        .with_metadata("rejected", json!(true));
                if let Rejection::InFlight { evolution_id } = rejection {
                    result = result.with_metadata("evolutionId", json!(evolution_id));
                }
                Ok(result)
            }
        }
    }

    async fn run(
        &self,
        resolved: Resolved,
        args: Value,
        context: &ExecutionContext,
    ) -> RegistryResult<ToolCallResult> {
        match resolved {
            Resolved::Builtin(handle) => match handle.invoke(args).await {
                Ok(value) => Ok(ToolCallResult::text(render(value))),
                Err(ToolError::InvalidArguments { reason }) => {
                    Err(RegistryError::Validation { reason })
                }
                Err(err @ ToolError::Execution { .. }) => Ok(ToolCallResult::error(err.to_string())),
            },
            Resolved::Generated(entry) => Ok(self.run_generated(&entry, args, context).await),
        }
    }

    async fn run_generated(
        &self,
        entry: &GeneratedEntry,
        args: Value,
        context: &ExecutionContext,
    ) -> ToolCallResult {
        let name = entry.tool.name.as_str();
        let outcome = self
            .sandbox
            .execute(name, &entry.tool.handler_code, args, context.timeout)
            .await;

        entry.usage.fetch_add(1, Ordering::Relaxed);
        if let Err(err) = self.store.increment_tool_usage(entry.tool.id).await {
            warn!(tool = %name, %err, "failed to record tool usage");
        }

        match outcome {
            Ok(output) => {
                debug!(tool = %name, elapsed = ?output.duration, "generated tool executed");
                serde_json::from_value::<ToolCallResult>(output.value).unwrap_or_else(|err| {
                    ToolCallResult::error(format!("invalid response format: {err}"))
                        .with_metadata("errorKind", json!("invalid_output"))
                })
            }
            Err(err) => {
                warn!(tool = %name, %err, "generated tool failed");
                ToolCallResult::error(err.to_string())
                    .with_metadata("errorKind", json!(error_kind(&err)))
            }
        }
    }

    fn resolve(&self, name: &str) -> Option<Resolved> {
        if let Some(handle) = read(&self.builtins).get(name) {
            return Some(Resolved::Builtin(handle.clone()));
        }
        self.snapshot().get(name).cloned().map(Resolved::Generated)
    }

    fn snapshot(&self) -> Arc<GeneratedMap> {
        Arc::clone(&read(&self.generated))
    }

    fn insert_generated(&self, tool: GeneratedTool) -> Arc<GeneratedEntry> {
        let entry = Arc::new(GeneratedEntry::new(tool));
        let mut guard = write(&self.generated);
        let mut next = GeneratedMap::clone(&guard);
        next.insert(entry.tool.name.to_string(), Arc::clone(&entry));
        *guard = Arc::new(next);
        info!(tool = %entry.tool.name, version = entry.tool.version, "generated tool registered");
        entry
    }
}

fn render(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => serde_json::to_string_pretty(&other).unwrap_or_else(|_| other.to_string()),
    }
}

fn error_kind(err: &SandboxError) -> &'static str {
    match err {
        SandboxError::SecurityViolation { .. } => "security_violation",
        SandboxError::Compile { .. } => "compile",
        SandboxError::Timeout { .. } => "timeout",
        SandboxError::Runtime { .. } => "runtime",
        SandboxError::InvalidOutput { .. } => "invalid_output",
        SandboxError::Internal { .. } => "internal",
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
