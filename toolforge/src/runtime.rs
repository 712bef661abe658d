//! Assembles a complete runtime from [`ForgeConfig`].

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use forge_adapters::anthropic::{AnthropicAdapter, AnthropicConfig};
use forge_adapters::openai::{OpenAiAdapter, OpenAiConfig};
use forge_adapters::traits::ModelAdapter;
use forge_config::{ForgeConfig, ProviderKind};
use forge_discovery::{
    DiscoverySource, GitHubCodeSearch, GitHubConfig, PostmanConfig, PostmanSearch, SearchOptions,
};
use forge_evolution::{EvolutionOrchestrator, Generator, GeneratorConfig, OrchestratorConfig};
use forge_sandbox::{Sandbox, SandboxLimits};
use forge_store::{FileStore, InMemoryStore, ToolStore};
use forge_tools::{ToolRegistry, register_builtins};
use tracing::info;

/// A wired runtime: store, orchestrator and registry sharing one config.
#[derive(Clone)]
pub struct Forge {
    config: ForgeConfig,
    store: Arc<dyn ToolStore>,
    orchestrator: EvolutionOrchestrator,
    registry: Arc<ToolRegistry>,
}

impl fmt::Debug for Forge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Forge")
            .field("orchestrator", &self.orchestrator)
            .field("auto_evolve", &self.config.evolution.auto_evolve)
            .finish_non_exhaustive()
    }
}

impl Forge {
    /// Builds every component from `config`.
    ///
    /// Opens the file store when `store.path` is set, creates the configured
    /// completion provider and the enabled discovery sources, then loads
    /// active generated tools from the store.
    ///
    /// # Errors
    ///
    /// Fails when the store cannot be opened, a provider or source rejects
    /// its configuration, or the initial reload fails.
    pub async fn from_config(config: ForgeConfig) -> Result<Self> {
        let store: Arc<dyn ToolStore> = match &config.store.path {
            Some(path) => Arc::new(
                FileStore::open(path.clone())
                    .await
                    .with_context(|| format!("opening store {}", path.display()))?,
            ),
            None => Arc::new(InMemoryStore::new()),
        };
        let adapter = build_adapter(&config)?;
        let sources = build_sources(&config)?;
        Self::with_components(config, store, adapter, sources).await
    }

    /// Builds the runtime around caller-supplied collaborators.
    ///
    /// # Errors
    ///
    /// Fails when the configuration is invalid or the initial reload fails.
    pub async fn with_components(
        config: ForgeConfig,
        store: Arc<dyn ToolStore>,
        adapter: Arc<dyn ModelAdapter>,
        sources: Vec<Arc<dyn DiscoverySource>>,
    ) -> Result<Self> {
        config.validate().context("validating configuration")?;

        let sandbox = Sandbox::new(sandbox_limits(&config));
        let generator = Generator::new(
            adapter,
            GeneratorConfig {
                max_attempts: config.generator.max_attempts,
                max_output_tokens: config.generator.max_output_tokens,
                temperature: config.generator.temperature,
            },
        );
        let max_concurrent = NonZeroUsize::new(config.evolution.max_concurrent)
            .context("evolution.max_concurrent must be at least 1")?;
        let orchestrator = EvolutionOrchestrator::new(
            Arc::clone(&store),
            sources,
            generator,
            sandbox.clone(),
            OrchestratorConfig {
                max_concurrent,
                search: SearchOptions {
                    max_results: config.discovery.max_results,
                    timeout: Duration::from_millis(config.discovery.timeout_ms),
                },
            },
        );

        let registry = ToolRegistry::new(Arc::clone(&store), sandbox)
            .with_evolver(Arc::new(orchestrator.clone()))
            .with_auto_evolve(config.evolution.auto_evolve);
        register_builtins(&registry).context("registering built-in tools")?;
        let loaded = registry
            .reload()
            .await
            .context("loading generated tools")?;
        info!(
            generated = loaded,
            auto_evolve = config.evolution.auto_evolve,
            max_concurrent = config.evolution.max_concurrent,
            "toolforge runtime ready"
        );

        Ok(Self {
            config,
            store,
            orchestrator,
            registry: Arc::new(registry),
        })
    }

    /// Configuration the runtime was built from.
    #[must_use]
    pub fn config(&self) -> &ForgeConfig {
        &self.config
    }

    /// Shared durable store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ToolStore> {
        &self.store
    }

    /// Evolution orchestrator wired into the registry.
    #[must_use]
    pub fn orchestrator(&self) -> &EvolutionOrchestrator {
        &self.orchestrator
    }

    /// Tool registry; the entry point for transports.
    #[must_use]
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }
}

fn sandbox_limits(config: &ForgeConfig) -> SandboxLimits {
    SandboxLimits {
        default_timeout: Duration::from_millis(config.sandbox.default_timeout_ms),
        max_timeout: Duration::from_millis(config.sandbox.max_timeout_ms),
        memory_limit: config.sandbox.memory_limit_mb.saturating_mul(1024 * 1024),
        ..SandboxLimits::default()
    }
}

fn build_adapter(config: &ForgeConfig) -> Result<Arc<dyn ModelAdapter>> {
    let provider = &config.provider;
    let timeout = Duration::from_millis(provider.timeout_ms);
    let adapter: Arc<dyn ModelAdapter> = match provider.kind {
        ProviderKind::OpenAi => {
            let mut cfg = OpenAiConfig::new(provider.model())
                .with_timeout(timeout)
                .with_default_temperature(config.generator.temperature);
            if let Some(key) = &provider.api_key {
                cfg = cfg.with_api_key(key.clone());
            }
            if let Some(url) = &provider.base_url {
                cfg = cfg.with_base_url(url)?;
            }
            Arc::new(OpenAiAdapter::new(cfg)?)
        }
        ProviderKind::Anthropic => {
            let mut cfg = AnthropicConfig::new(provider.model())
                .with_timeout(timeout)
                .with_default_temperature(config.generator.temperature)
                .with_default_max_tokens(config.generator.max_output_tokens);
            if let Some(key) = &provider.api_key {
                cfg = cfg.with_api_key(key.clone());
            }
            if let Some(url) = &provider.base_url {
                cfg = cfg.with_base_url(url)?;
            }
            Arc::new(AnthropicAdapter::new(cfg)?)
        }
    };
    if provider.api_key.is_none() {
        tracing::warn!(
            provider = %provider.kind,
            env = provider.kind.api_key_env(),
            "no API key configured; evolutions will fail at generation"
        );
    }
    Ok(adapter)
}

fn build_sources(config: &ForgeConfig) -> Result<Vec<Arc<dyn DiscoverySource>>> {
    let discovery = &config.discovery;
    let mut sources: Vec<Arc<dyn DiscoverySource>> = Vec::new();
    if !discovery.enabled {
        return Ok(sources);
    }

    if discovery.github.enabled {
        let mut cfg = GitHubConfig::default();
        if let Some(token) = &discovery.github.token {
            cfg = cfg.with_token(token.clone());
        }
        if let Some(language) = &discovery.github.language {
            cfg = cfg.with_language(language.clone());
        }
        if let Some(url) = &discovery.github.base_url {
            cfg = cfg.with_base_url(url)?;
        }
        sources.push(Arc::new(GitHubCodeSearch::new(cfg)?));
    }

    if discovery.postman.enabled {
        let mut cfg = PostmanConfig::default();
        if let Some(url) = &discovery.postman.base_url {
            cfg = cfg.with_base_url(url)?;
        }
        sources.push(Arc::new(PostmanSearch::new(cfg)?));
    }
    Ok(sources)
}
