//! Source adapters and the registry the orchestrator draws from.
//!
//! Available adapters:
//! - `UsaJobsSource` - USAJOBS search API (JSON)
//! - `ListingSource` - CSS-selector listing pages (BidNet Direct,
//!   InstantMarkets, SecurityJobs.net)

pub mod http;
pub mod listing;
pub mod pacing;
pub mod usajobs;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::traits::source::SourceAdapter;

pub use listing::{ListingSource, SelectorProfile};
pub use pacing::RequestPacer;
pub use usajobs::UsaJobsSource;

/// Named set of adapters. Registering a source never touches the orchestrator.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    adapters: BTreeMap<String, Arc<dyn SourceAdapter>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in adapter.
    pub fn with_defaults() -> Self {
        Self::new()
            .with(UsaJobsSource::new())
            .with(ListingSource::bidnetdirect())
            .with(ListingSource::instantmarkets())
            .with(ListingSource::securityjobsnet())
    }

    pub fn with(mut self, adapter: impl SourceAdapter + 'static) -> Self {
        self.register(Arc::new(adapter));
        self
    }

    /// Add an adapter, replacing any with the same name.
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.adapters.keys()).finish()
    }
}
