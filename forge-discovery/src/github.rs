//! GitHub code search.
//!
//! Uses `GET /search/code` with the text-match media type so each hit carries
//! the matching fragment, which becomes the candidate's code excerpt. Code
//! search requires a token; without one every search reports a configuration
//! error.

use std::env;
use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use forge_adapters::http::{HttpsClient, build_https_client, sanitize_base_url, send};
use hyper::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use hyper::{Body, Request};
use serde::Deserialize;

use crate::DiscoverySource;
use crate::rank::{name_tokens, relevance};
use crate::types::{
    Candidate, CandidatePayload, DiscoveryError, DiscoveryResult, SearchOptions, SourceKind,
};

/// Environment variable holding the API token.
pub const GITHUB_TOKEN_ENV: &str = "GITHUB_TOKEN";

const USER_AGENT_VALUE: &str = concat!("toolforge/", env!("CARGO_PKG_VERSION"));

/// Configuration for [`GitHubCodeSearch`].
#[derive(Clone)]
pub struct GitHubConfig {
    token: Option<String>,
    base_url: String,
    language: Option<String>,
}

impl fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("base_url", &self.base_url)
            .field("language", &self.language)
            .field("has_token", &self.token.is_some())
            .finish()
    }
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            base_url: "https://api.github.com/".to_owned(),
            language: None,
        }
    }
}

impl GitHubConfig {
    /// Reads the token from `GITHUB_TOKEN`.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            token: env::var(GITHUB_TOKEN_ENV).ok(),
            ..Self::default()
        }
    }

    /// Supplies an explicit token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Restricts hits to one language, e.g. `lua`.
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Points the client at a GitHub Enterprise or mock API.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Http`] wrapping a configuration error when
    /// the URL is invalid.
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, DiscoveryError> {
        self.base_url = sanitize_base_url("GitHub", base_url)?;
        Ok(self)
    }
}

/// Code-repository discovery source backed by GitHub code search.
pub struct GitHubCodeSearch {
    client: HttpsClient,
    config: GitHubConfig,
}

impl fmt::Debug for GitHubCodeSearch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubCodeSearch")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl GitHubCodeSearch {
    /// Creates the source.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Http`] if the HTTPS client cannot be built.
    pub fn new(config: GitHubConfig) -> Result<Self, DiscoveryError> {
        Ok(Self {
            client: build_https_client()?,
            config,
        })
    }

    fn query_url(&self, tool_name: &str, max_results: usize) -> String {
        let mut query = name_tokens(tool_name).join(" ");
        if let Some(language) = &self.config.language {
            query.push_str(" language:");
            query.push_str(language);
        }
        format!(
            "{}search/code?q={}&per_page={}",
            self.config.base_url,
            urlencoding::encode(&query),
            max_results.clamp(1, 100)
        )
    }

    async fn query(
        &self,
        tool_name: &str,
        options: &SearchOptions,
    ) -> Result<Vec<Candidate>, DiscoveryError> {
        let token = self
            .config
            .token
            .as_deref()
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| DiscoveryError::Configuration {
                reason: format!("{GITHUB_TOKEN_ENV} is not set"),
            })?;

        let request = Request::get(self.query_url(tool_name, options.max_results))
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .header(ACCEPT, "application/vnd.github.text-match+json")
            .header(USER_AGENT, USER_AGENT_VALUE)
            .body(Body::empty())
            .map_err(|err| DiscoveryError::Configuration {
                reason: format!("failed to build GitHub request: {err}"),
            })?;

        let deadline = options.timeout.max(Duration::from_millis(1));
        let response = send(&self.client, request, deadline, "github")
            .await?
            .error_for_status("GitHub")?;
        let body: SearchResponse = response.json("GitHub")?;
        Ok(candidates(tool_name, body))
    }
}

#[async_trait]
impl DiscoverySource for GitHubCodeSearch {
    fn kind(&self) -> SourceKind {
        SourceKind::RepoSearch
    }

    async fn search(&self, tool_name: &str, options: &SearchOptions) -> DiscoveryResult {
        let started = Instant::now();
        let outcome = self.query(tool_name, options).await;
        DiscoveryResult::finish(self.kind(), tool_name, started, outcome, options.max_results)
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<CodeItem>,
}

#[derive(Debug, Deserialize)]
struct CodeItem {
    name: String,
    path: String,
    html_url: String,
    repository: Repository,
    #[serde(default)]
    text_matches: Vec<TextMatch>,
}

#[derive(Debug, Deserialize)]
struct Repository {
    full_name: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TextMatch {
    #[serde(default)]
    fragment: String,
}

fn candidates(tool_name: &str, body: SearchResponse) -> Vec<Candidate> {
    let tokens = name_tokens(tool_name);
    let total = body.items.len();
    body.items
        .into_iter()
        .enumerate()
        .map(|(position, item)| {
            let excerpt = item
                .text_matches
                .iter()
                .map(|m| m.fragment.as_str())
                .filter(|fragment| !fragment.trim().is_empty())
                .collect::<Vec<_>>()
                .join("\n...\n");
            let haystack = format!("{} {}", item.path, excerpt);
            Candidate {
                relevance_score: relevance(&tokens, &haystack, position, total),
                description: item
                    .repository
                    .description
                    .unwrap_or_else(|| format!("{} in {}", item.path, item.repository.full_name)),
                name: item.name,
                payload: CandidatePayload::Code {
                    repository: item.repository.full_name,
                    path: item.path,
                    url: item.html_url,
                    excerpt: (!excerpt.is_empty()).then_some(excerpt),
                },
            }
        })
        .collect()
}
