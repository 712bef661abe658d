//! Self-evolving tool server runtime SDK facade.
//!
//! Bundles the runtime crates behind feature flags. With the default
//! `runtime` feature, [`Forge`] wires store, sandbox, completion provider,
//! discovery sources, orchestrator and registry from a
//! [`ForgeConfig`](forge_config::ForgeConfig).

#![warn(missing_docs, clippy::pedantic)]

/// Identifiers and tool names.
pub use forge_primitives as primitives;

/// Static security scanner.
pub use forge_policy as policy;

/// Lua execution sandbox.
pub use forge_sandbox as sandbox;

/// Generated-tool store and audit log.
pub use forge_store as store;

/// Tool registry and built-in tools.
pub use forge_tools as tools;

/// Completion providers (enabled by `adapters` feature).
#[cfg(feature = "adapters")]
pub use forge_adapters as adapters;

/// Discovery sources (enabled by `discovery` feature).
#[cfg(feature = "discovery")]
pub use forge_discovery as discovery;

/// Generator and orchestrator (enabled by `evolution` feature).
#[cfg(feature = "evolution")]
pub use forge_evolution as evolution;

/// Configuration loading (enabled by `config` feature).
#[cfg(feature = "config")]
pub use forge_config as config;

/// Tracing setup (enabled by `telemetry` feature).
#[cfg(feature = "telemetry")]
pub use forge_telemetry as telemetry;

#[cfg(feature = "runtime")]
mod runtime;

#[cfg(feature = "runtime")]
pub use runtime::Forge;
