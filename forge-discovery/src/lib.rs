//! Discovery sources: where the evolution pipeline looks for prior art.
//!
//! A source never fails a search. Transport errors, missing credentials and
//! timeouts are carried in [`DiscoveryResult::error`] next to an empty result
//! list, so one broken source degrades the run instead of aborting it.

#![warn(missing_docs, clippy::pedantic)]

mod fanout;
pub mod github;
pub mod postman;
mod rank;
mod types;

pub use fanout::search_all;
pub use github::{GitHubCodeSearch, GitHubConfig};
pub use postman::{PostmanConfig, PostmanSearch};
pub use rank::{name_tokens, relevance};
pub use types::{
    Candidate, CandidatePayload, DiscoveryError, DiscoveryResult, SearchOptions, SourceKind,
};

use async_trait::async_trait;

/// A searchable catalogue of existing implementations.
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    /// Which kind of catalogue this is.
    fn kind(&self) -> SourceKind;

    /// Searches for candidates matching `tool_name`.
    ///
    /// Never fails: errors are reported in the returned result.
    async fn search(&self, tool_name: &str, options: &SearchOptions) -> DiscoveryResult;
}
