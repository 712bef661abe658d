//! Postman public API network search.
//!
//! The public search endpoint is undocumented, so the response is read as
//! loosely typed JSON and any entry missing a name is skipped.

use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use forge_adapters::http::{HttpsClient, build_https_client, sanitize_base_url, send};
use hyper::header::{CONTENT_TYPE, USER_AGENT};
use hyper::{Body, Request};
use serde_json::{Value, json};

use crate::DiscoverySource;
use crate::rank::{name_tokens, relevance};
use crate::types::{
    Candidate, CandidatePayload, DiscoveryError, DiscoveryResult, SearchOptions, SourceKind,
};

/// Configuration for [`PostmanSearch`].
#[derive(Debug, Clone)]
pub struct PostmanConfig {
    base_url: String,
}

impl Default for PostmanConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.postman.com/".to_owned(),
        }
    }
}

impl PostmanConfig {
    /// Points the client at a different host.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Http`] wrapping a configuration error when
    /// the URL is invalid.
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, DiscoveryError> {
        self.base_url = sanitize_base_url("Postman", base_url)?;
        Ok(self)
    }
}

/// API-collection discovery source backed by the Postman API network.
pub struct PostmanSearch {
    client: HttpsClient,
    config: PostmanConfig,
}

impl fmt::Debug for PostmanSearch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostmanSearch")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PostmanSearch {
    /// Creates the source.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Http`] if the HTTPS client cannot be built.
    pub fn new(config: PostmanConfig) -> Result<Self, DiscoveryError> {
        Ok(Self {
            client: build_https_client()?,
            config,
        })
    }

    async fn query(
        &self,
        tool_name: &str,
        options: &SearchOptions,
    ) -> Result<Vec<Candidate>, DiscoveryError> {
        let body = search_body(tool_name, options.max_results);
        let body = serde_json::to_vec(&body).map_err(|err| DiscoveryError::Decode {
            reason: err.to_string(),
        })?;

        let request = Request::post(format!("{}_api/ws/proxy", self.config.base_url))
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, concat!("toolforge/", env!("CARGO_PKG_VERSION")))
            .body(Body::from(body))
            .map_err(|err| DiscoveryError::Configuration {
                reason: format!("failed to build Postman request: {err}"),
            })?;

        let deadline = options.timeout.max(Duration::from_millis(1));
        let response = send(&self.client, request, deadline, "postman")
            .await?
            .error_for_status("Postman")?;
        let body: Value = response.json("Postman")?;
        candidates(tool_name, &self.config.base_url, &body)
    }
}

#[async_trait]
impl DiscoverySource for PostmanSearch {
    fn kind(&self) -> SourceKind {
        SourceKind::ApiCollectionSearch
    }

    async fn search(&self, tool_name: &str, options: &SearchOptions) -> DiscoveryResult {
        let started = Instant::now();
        let outcome = self.query(tool_name, options).await;
        DiscoveryResult::finish(self.kind(), tool_name, started, outcome, options.max_results)
    }
}

fn search_body(tool_name: &str, max_results: usize) -> Value {
    json!({
        "service": "search",
        "method": "POST",
        "path": "/search-all",
        "body": {
            "queryIndices": ["runtime.request"],
            "queryText": name_tokens(tool_name).join(" "),
            "size": max_results.clamp(1, 25),
            "from": 0,
            "requestOrigin": "srp",
            "mergeEntities": true,
            "nonNestedRequests": true
        }
    })
}

fn text<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
}

fn candidates(tool_name: &str, base_url: &str, body: &Value) -> Result<Vec<Candidate>, DiscoveryError> {
    let entries = match body.get("data") {
        Some(Value::Array(entries)) => entries.as_slice(),
        Some(Value::Null) | None => &[],
        Some(_) => {
            return Err(DiscoveryError::Decode {
                reason: "`data` is not an array".into(),
            });
        }
    };

    let tokens = name_tokens(tool_name);
    let total = entries.len();
    let hits = entries
        .iter()
        .enumerate()
        .filter_map(|(position, entry)| {
            let document = entry.get("document").unwrap_or(entry);
            let name = text(document, "name")?;
            let collection = document
                .get("collection")
                .and_then(|collection| text(collection, "name"))
                .or_else(|| text(document, "collectionName"))
                .or_else(|| text(document, "publisherHandle"))
                .unwrap_or("unknown collection");
            let endpoint = text(document, "url").map(str::to_owned);
            let method = text(document, "method").map(str::to_ascii_uppercase);
            let description = text(document, "description")
                .map_or_else(|| format!("{name} ({collection})"), str::to_owned);
            let url = text(document, "id").map_or_else(
                || base_url.to_owned(),
                |id| format!("{base_url}explore/request/{id}"),
            );

            let haystack = format!("{name} {description} {}", endpoint.as_deref().unwrap_or(""));
            Some(Candidate {
                name: name.to_owned(),
                description,
                relevance_score: relevance(&tokens, &haystack, position, total),
                payload: CandidatePayload::ApiRequest {
                    collection: collection.to_owned(),
                    method,
                    endpoint,
                    url,
                },
            })
        })
        .collect();
    Ok(hits)
}
