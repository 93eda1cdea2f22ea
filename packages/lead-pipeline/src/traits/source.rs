//! Source adapter trait for pluggable lead sources.
//!
//! Each external site or API gets one adapter. The pipeline only needs a
//! name, the kind of lead the source publishes, a lazy document stream and a
//! parser; everything site-specific stays behind this seam.
//!
//! # Usage
//!
//! ```rust,ignore
//! use futures::TryStreamExt;
//!
//! let docs: Vec<RawDocument> = adapter.fetch(&source_config, &ctx).try_collect().await?;
//! for doc in &docs {
//!     let candidates = adapter.parse(doc)?;
//! }
//! ```

use futures::stream::BoxStream;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{FetchError, FetchResult, ParseResult};
use crate::sources::pacing::RequestPacer;
use crate::types::candidate::{CandidateLead, RawDocument};
use crate::types::config::{ScrapingConfig, SourceConfig};
use crate::types::lead::LeadType;

/// Shared resources for one source's fetch attempt.
#[derive(Clone)]
pub struct FetchContext {
    /// HTTP client with the configured timeout and user agent
    pub client: reqwest::Client,

    /// Spaces requests to this source
    pub pacer: Arc<RequestPacer>,

    /// Cancelled when the run is aborted
    pub cancel: CancellationToken,
}

impl FetchContext {
    pub fn new(client: reqwest::Client, pacer: Arc<RequestPacer>, cancel: CancellationToken) -> Self {
        Self {
            client,
            pacer,
            cancel,
        }
    }

    /// Context with a client and pacer built from scraping settings.
    pub fn from_config(scraping: &ScrapingConfig, cancel: CancellationToken) -> FetchResult<Self> {
        let client = build_client(scraping)?;
        Ok(Self::new(
            client,
            Arc::new(RequestPacer::new(scraping.request_delay())),
            cancel,
        ))
    }

    /// Context for tests and adapters that never touch the network.
    pub fn offline() -> Self {
        Self::new(
            reqwest::Client::new(),
            Arc::new(RequestPacer::new(Duration::ZERO)),
            CancellationToken::new(),
        )
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// HTTP client honouring the configured timeout and user agent.
pub fn build_client(scraping: &ScrapingConfig) -> FetchResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(scraping.timeout())
        .user_agent(scraping.user_agent.clone())
        .build()
        .map_err(|e| FetchError::Http(Box::new(e)))
}

/// A source of raw documents and the parser that turns them into candidates.
///
/// `fetch` returns a lazy, finite stream that cannot be resumed: any error
/// item fails the whole attempt, and a retry calls `fetch` again from the
/// start. `parse` handles one document; a parse error skips only that
/// document.
pub trait SourceAdapter: Send + Sync {
    /// Unique name, matched against the keys of the sources config.
    fn name(&self) -> &str;

    /// Kind of lead this source publishes.
    fn lead_type(&self) -> LeadType;

    /// Stream the source's documents.
    fn fetch<'a>(
        &'a self,
        config: &'a SourceConfig,
        ctx: &'a FetchContext,
    ) -> BoxStream<'a, FetchResult<RawDocument>>;

    /// Map one document to zero or more candidates.
    fn parse(&self, document: &RawDocument) -> ParseResult<Vec<CandidateLead>>;
}
