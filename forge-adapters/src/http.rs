//! HTTPS client shared by the completion providers and discovery sources.

use std::sync::Arc;
use std::time::Duration;

use hyper::body::{Bytes, to_bytes};
use hyper::client::HttpConnector;
use hyper::header::RETRY_AFTER;
use hyper::{Body, Client, HeaderMap, Request, StatusCode, Uri};
use hyper_rustls::HttpsConnector;
use rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore};
use tokio::time::timeout;
use webpki_roots::TLS_SERVER_ROOTS;

use crate::traits::{AdapterError, AdapterResult};

/// Hyper client speaking HTTP/1 over rustls.
pub type HttpsClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Builds a client trusting the webpki root set.
///
/// # Errors
///
/// Currently infallible; kept fallible so TLS setup can grow checks.
#[allow(clippy::unnecessary_wraps)]
pub fn build_https_client() -> AdapterResult<HttpsClient> {
    let mut roots = RootCertStore::empty();
    roots.add_trust_anchors(TLS_SERVER_ROOTS.iter().map(|anchor| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            anchor.subject,
            anchor.spki,
            anchor.name_constraints,
        )
    }));

    let config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();

    let mut http = HttpConnector::new();
    http.enforce_http(false);

    let connector = HttpsConnector::from((http, Arc::new(config)));

    Ok(Client::builder().build::<_, Body>(connector))
}

/// Buffered HTTP response.
#[derive(Debug)]
pub struct HttpResponse {
    /// Status line code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Full body.
    pub body: Bytes,
}

impl HttpResponse {
    /// Decodes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Response`] when the body is not valid JSON for `T`.
    pub fn json<T: serde::de::DeserializeOwned>(&self, provider: &str) -> AdapterResult<T> {
        serde_json::from_slice(&self.body).map_err(|err| {
            AdapterError::response(format!("failed to decode {provider} response: {err}"))
        })
    }

    /// Maps a non-success status onto the adapter error taxonomy.
    ///
    /// `429` becomes [`AdapterError::RateLimited`], `502`/`503`/`504` become
    /// [`AdapterError::Transport`]; every other status is a provider
    /// rejection.
    ///
    /// # Errors
    ///
    /// Returns the mapped error unless the status is a success.
    pub fn error_for_status(self, provider: &str) -> AdapterResult<Self> {
        if self.status.is_success() {
            return Ok(self);
        }

        let body = String::from_utf8_lossy(&self.body);
        let body: String = body.chars().take(512).collect();
        Err(match self.status {
            StatusCode::TOO_MANY_REQUESTS => AdapterError::RateLimited {
                retry_after: retry_after(&self.headers),
            },
            StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
                AdapterError::transport(format!("{provider} unavailable ({}): {body}", self.status))
            }
            status => AdapterError::response(format!("{provider} returned {status}: {body}")),
        })
    }
}

/// Sends `request`, bounding connect, headers, and body by `deadline`.
///
/// # Errors
///
/// Returns [`AdapterError::Timeout`] when the deadline passes and
/// [`AdapterError::Transport`] for connection or body failures.
pub async fn send(
    client: &HttpsClient,
    request: Request<Body>,
    deadline: Duration,
    provider: &'static str,
) -> AdapterResult<HttpResponse> {
    let exchange = async {
        let response = client
            .request(request)
            .await
            .map_err(|err| AdapterError::transport(format!("{provider} request failed: {err}")))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body()).await.map_err(|err| {
            AdapterError::transport(format!("failed to read {provider} response: {err}"))
        })?;
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    };

    timeout(deadline, exchange)
        .await
        .map_err(|_| AdapterError::Timeout {
            provider,
            after: deadline,
        })?
}

/// Validates a base URL and normalises it to end with `/`.
///
/// # Errors
///
/// Returns [`AdapterError::Configuration`] if the URL lacks an HTTP scheme or
/// does not parse.
pub fn sanitize_base_url(provider: &str, input: &str) -> AdapterResult<String> {
    let mut base = input.trim().to_owned();
    if !(base.starts_with("http://") || base.starts_with("https://")) {
        return Err(AdapterError::configuration(format!(
            "{provider} base URL must start with http:// or https://"
        )));
    }
    if !base.ends_with('/') {
        base.push('/');
    }
    base.parse::<Uri>().map_err(|err| {
        AdapterError::configuration(format!("invalid {provider} base URL: {err}"))
    })?;
    Ok(base)
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use hyper::header::HeaderValue;

    use super::*;

    fn response(status: StatusCode, body: &'static str) -> HttpResponse {
        HttpResponse {
            status,
            headers: HeaderMap::new(),
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    #[test]
    fn base_url_requires_scheme() {
        let err = sanitize_base_url("OpenAI", "api.openai.com").unwrap_err();
        assert!(matches!(err, AdapterError::Configuration { .. }));
        assert_eq!(
            sanitize_base_url("OpenAI", "https://example.com/v").unwrap(),
            "https://example.com/v/"
        );
    }

    #[test]
    fn rate_limits_carry_retry_after() {
        let mut resp = response(StatusCode::TOO_MANY_REQUESTS, "slow down");
        resp.headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        match resp.error_for_status("test") {
            Err(AdapterError::RateLimited { retry_after }) => {
                assert_eq!(retry_after, Some(Duration::from_secs(7)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn outages_are_unavailable_but_rejections_are_not() {
        let outage = response(StatusCode::SERVICE_UNAVAILABLE, "")
            .error_for_status("test")
            .unwrap_err();
        assert!(outage.is_unavailable());

        let rejected = response(StatusCode::BAD_REQUEST, "bad")
            .error_for_status("test")
            .unwrap_err();
        assert!(!rejected.is_unavailable());
        assert!(rejected.to_string().contains("400"));
    }

    #[test]
    fn success_passes_through() {
        let ok = response(StatusCode::OK, "{\"a\":1}")
            .error_for_status("test")
            .unwrap();
        let value: serde_json::Value = ok.json("test").unwrap();
        assert_eq!(value["a"], 1);
    }
}
