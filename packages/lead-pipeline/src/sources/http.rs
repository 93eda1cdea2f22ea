//! Paced, cancellable HTTP GET shared by the built-in adapters.

use chrono::Utc;
use tracing::{debug, warn};
use url::Url;

use crate::error::{FetchError, FetchResult};
use crate::traits::source::FetchContext;
use crate::types::candidate::RawDocument;

/// GET a URL as a raw document.
///
/// Waits for the source's pacer first. Aborts with
/// [`FetchError::Cancelled`] as soon as the run is cancelled.
pub async fn get_document(ctx: &FetchContext, url: &str) -> FetchResult<RawDocument> {
    let parsed = Url::parse(url).map_err(|_| FetchError::InvalidUrl {
        url: url.to_string(),
    })?;

    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => Err(FetchError::Cancelled),
        result = fetch(ctx, parsed) => result,
    }
}

async fn fetch(ctx: &FetchContext, url: Url) -> FetchResult<RawDocument> {
    ctx.pacer.until_ready().await;

    debug!(url = %url, "HTTP fetch starting");
    let response = ctx.client.get(url.clone()).send().await.map_err(|e| {
        warn!(url = %url, error = %e, "HTTP request failed");
        FetchError::from_reqwest(url.as_str(), e)
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let body = response
        .text()
        .await
        .map_err(|e| FetchError::from_reqwest(url.as_str(), e))?;

    let mut document = RawDocument::new(url.as_str(), body)
        .with_metadata("http_status", status.as_u16().to_string());
    document.fetched_at = Utc::now();
    if let Some(ct) = content_type {
        document = document.with_content_type(ct);
    }
    Ok(document)
}

/// Resolve a possibly relative link against the page it appeared on.
pub fn resolve_link(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    Url::parse(base).ok()?.join(href).ok().map(|u| u.to_string())
}
