//! Configuration for the toolforge runtime.
//!
//! [`ForgeConfig`] is read from an optional TOML file, overridden from the
//! environment and validated before any component is built.
//!
//! ```toml
//! [evolution]
//! auto_evolve = true
//! max_concurrent = 5
//!
//! [sandbox]
//! default_timeout_ms = 5000
//! max_timeout_ms = 30000
//!
//! [store]
//! path = "toolforge.jsonl"
//!
//! [provider]
//! kind = "openai"
//! model = "gpt-4o-mini"
//! ```

#![warn(missing_docs, clippy::pedantic)]

mod error;
pub mod loader;
pub mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::GITHUB_TOKEN_ENV;
pub use schema::{
    DiscoveryConfig, EvolutionConfig, ForgeConfig, GeneratorConfig, GitHubSourceConfig,
    LoggingConfig, MAX_SANDBOX_TIMEOUT_MS, PostmanSourceConfig, ProviderConfig, ProviderKind,
    SandboxConfig, StoreConfig,
};
