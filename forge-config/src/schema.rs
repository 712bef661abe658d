//! Strongly typed configuration sections.
//!
//! Every field has a serde default, so an empty file (or no file) yields a
//! working in-memory setup.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Hard ceiling on any sandbox deadline, in milliseconds.
pub const MAX_SANDBOX_TIMEOUT_MS: u64 = 30_000;

/// Root configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ForgeConfig {
    /// Auto-evolution switches and the concurrency cap.
    pub evolution: EvolutionConfig,
    /// Sandbox deadlines and memory ceiling.
    pub sandbox: SandboxConfig,
    /// Generator retry and sampling settings.
    pub generator: GeneratorConfig,
    /// Discovery sources.
    pub discovery: DiscoveryConfig,
    /// Durable store location.
    pub store: StoreConfig,
    /// Completion provider.
    pub provider: ProviderConfig,
    /// Log filter and format.
    pub logging: LoggingConfig,
}

/// `[evolution]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EvolutionConfig {
    /// Evolve unknown tools on first call.
    pub auto_evolve: bool,
    /// Global cap on evolutions in flight.
    pub max_concurrent: usize,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            auto_evolve: true,
            max_concurrent: 5,
        }
    }
}

/// `[sandbox]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxConfig {
    /// Deadline applied when a call supplies none.
    pub default_timeout_ms: u64,
    /// Largest deadline a call may request.
    pub max_timeout_ms: u64,
    /// Memory ceiling per VM.
    pub memory_limit_mb: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 5_000,
            max_timeout_ms: MAX_SANDBOX_TIMEOUT_MS,
            memory_limit_mb: 32,
        }
    }
}

/// `[generator]` section.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeneratorConfig {
    /// Attempts per generation, including the first.
    pub max_attempts: u32,
    /// Output token ceiling per completion.
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

/// `[discovery]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscoveryConfig {
    /// Master switch for all sources.
    pub enabled: bool,
    /// Upper bound on candidates per source.
    pub max_results: usize,
    /// Deadline per source search.
    pub timeout_ms: u64,
    /// GitHub code search.
    pub github: GitHubSourceConfig,
    /// Postman API network search.
    pub postman: PostmanSourceConfig,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_results: 5,
            timeout_ms: 10_000,
            github: GitHubSourceConfig::default(),
            postman: PostmanSourceConfig::default(),
        }
    }
}

/// `[discovery.github]` section.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GitHubSourceConfig {
    /// Include this source.
    pub enabled: bool,
    /// Personal access token; anonymous search is heavily rate limited.
    pub token: Option<String>,
    /// Alternative API host.
    pub base_url: Option<String>,
    /// Restrict hits to one language.
    pub language: Option<String>,
}

impl Default for GitHubSourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            token: None,
            base_url: None,
            language: None,
        }
    }
}

impl fmt::Debug for GitHubSourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubSourceConfig")
            .field("enabled", &self.enabled)
            .field("has_token", &self.token.is_some())
            .field("base_url", &self.base_url)
            .field("language", &self.language)
            .finish()
    }
}

/// `[discovery.postman]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PostmanSourceConfig {
    /// Include this source.
    pub enabled: bool,
    /// Alternative API host.
    pub base_url: Option<String>,
}

impl Default for PostmanSourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: None,
        }
    }
}

/// `[store]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// JSON-lines file backing the store; in-memory when absent.
    pub path: Option<PathBuf>,
}

/// Supported completion providers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI-compatible chat completions.
    #[default]
    OpenAi,
    /// Anthropic messages API.
    Anthropic,
}

impl ProviderKind {
    /// Lower-case identifier used in files and flags.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
        }
    }

    /// Model used when none is configured.
    #[must_use]
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-4o-mini",
            Self::Anthropic => "claude-3-5-sonnet-latest",
        }
    }

    /// Environment variable holding this provider's API key.
    #[must_use]
    pub const fn api_key_env(self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(ConfigError::InvalidValue {
                key: "provider".into(),
                message: format!("unknown provider `{other}`, expected openai or anthropic"),
            }),
        }
    }
}

/// `[provider]` section.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderConfig {
    /// Which provider to call.
    pub kind: ProviderKind,
    /// Model identifier; [`ProviderKind::default_model`] when absent.
    pub model: Option<String>,
    /// Alternative API host.
    pub base_url: Option<String>,
    /// API key; usually supplied through the environment.
    pub api_key: Option<String>,
    /// HTTP deadline per completion.
    pub timeout_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            model: None,
            base_url: None,
            api_key: None,
            timeout_ms: 60_000,
        }
    }
}

impl ProviderConfig {
    /// Configured model, or the provider default.
    #[must_use]
    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(self.kind.default_model())
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("model", &self.model())
            .field("base_url", &self.base_url)
            .field("has_api_key", &self.api_key.is_some())
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_owned(),
            json: false,
        }
    }
}
