//! Command-line flags.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use toolforge::config::{ForgeConfig, ProviderKind};

/// Self-evolving tool server speaking JSON-RPC 2.0 over stdio.
#[derive(Debug, Parser)]
#[command(name = "toolforge-server", version, about)]
pub struct Cli {
    /// TOML configuration file.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// JSON-lines store file; overrides `store.path`.
    #[arg(long, value_name = "PATH")]
    pub store: Option<PathBuf>,

    /// Answer unknown tools with an error instead of evolving them.
    #[arg(long)]
    pub no_auto_evolve: bool,

    /// Completion provider; overrides `provider.kind`.
    #[arg(long, value_enum)]
    pub provider: Option<ProviderArg>,
}

/// Provider names accepted by `--provider`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProviderArg {
    /// OpenAI-compatible chat completions.
    Openai,
    /// Anthropic messages.
    Anthropic,
}

impl From<ProviderArg> for ProviderKind {
    fn from(value: ProviderArg) -> Self {
        match value {
            ProviderArg::Openai => Self::OpenAi,
            ProviderArg::Anthropic => Self::Anthropic,
        }
    }
}

impl Cli {
    /// Applies flag overrides on top of the loaded configuration.
    ///
    /// Switching provider also switches to that provider's API key variable
    /// via `api_key_lookup`.
    pub fn apply<F>(&self, config: &mut ForgeConfig, api_key_lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = &self.store {
            config.store.path = Some(path.clone());
        }
        if self.no_auto_evolve {
            config.evolution.auto_evolve = false;
        }
        if let Some(provider) = self.provider {
            let kind = ProviderKind::from(provider);
            if kind != config.provider.kind {
                config.provider.kind = kind;
                config.provider.model = None;
                config.provider.api_key = api_key_lookup(kind.api_key_env());
            }
        }
    }
}
