use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use futures::future::join_all;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::DiscoverySource;
use crate::types::{DiscoveryError, DiscoveryResult, SearchOptions};

/// Queries every source concurrently, each bounded by `options.timeout`.
///
/// One entry per source is returned in the order given; a source that fails,
/// panics or times out yields an empty result carrying the error.
pub async fn search_all(
    sources: &[Arc<dyn DiscoverySource>],
    tool_name: &str,
    options: &SearchOptions,
) -> Vec<DiscoveryResult> {
    let searches = sources.iter().map(|source| async move {
        let started = Instant::now();
        let search = AssertUnwindSafe(source.search(tool_name, options)).catch_unwind();
        let error = match timeout(options.timeout, search).await {
            Ok(Ok(result)) => return result,
            Ok(Err(panic)) => DiscoveryError::Panicked {
                message: panic_message(&*panic),
            },
            Err(_) => DiscoveryError::Timeout {
                after: options.timeout,
            },
        };
        DiscoveryResult::failed(source.kind(), tool_name, started, error)
    });

    let results = join_all(searches).await;
    for result in &results {
        match &result.error {
            Some(error) => warn!(
                tool = %tool_name,
                source = %result.source,
                %error,
                "discovery source failed"
            ),
            None => debug!(
                tool = %tool_name,
                source = %result.source,
                hits = result.results.len(),
                duration_ms = result.duration_ms,
                "discovery source finished"
            ),
        }
    }
    results
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}
