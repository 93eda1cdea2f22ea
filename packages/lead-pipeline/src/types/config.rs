//! Configuration types for sources, scraping, validation and scheduling.
//!
//! The whole tree deserializes from one JSON document. Every section has
//! defaults so a partial file is valid.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::dedup::MatchPolicy;
use crate::error::{ConfigError, ConfigResult};
use crate::pipeline::schedule::ScheduleConfig;

/// Per-source settings, keyed by adapter name in [`PipelineConfig::sources`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Entry URL for the source (listing page or API endpoint)
    pub url: String,

    /// Disabled sources are skipped without being counted as failed.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Upper bound on documents fetched per run.
    #[serde(default = "default_max_documents")]
    pub max_documents: usize,
}

impl SourceConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            enabled: true,
            max_documents: default_max_documents(),
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_max_documents(mut self, max: usize) -> Self {
        self.max_documents = max;
        self
    }
}

/// Network behaviour shared by every source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapingConfig {
    /// Minimum spacing between two requests of the same source.
    pub request_delay_seconds: f64,

    /// Per-request timeout.
    pub timeout_seconds: u64,

    /// Retries after the first failed attempt of a source.
    pub max_retries: u32,

    /// Base delay between attempts; doubles after each failure.
    pub retry_backoff_seconds: f64,

    /// Sources fetched at the same time.
    pub max_concurrent_sources: usize,

    pub user_agent: String,
}

impl Default for ScrapingConfig {
    fn default() -> Self {
        Self {
            request_delay_seconds: 2.0,
            timeout_seconds: 30,
            max_retries: 3,
            retry_backoff_seconds: 2.0,
            max_concurrent_sources: 3,
            user_agent: "GuardlineLeadsBot/1.0".to_string(),
        }
    }
}

impl ScrapingConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_secs_f64(self.request_delay_seconds.max(0.0))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 2f64.powi(attempt.saturating_sub(1).min(16) as i32);
        Duration::from_secs_f64((self.retry_backoff_seconds * factor).max(0.0))
    }
}

/// Acceptance gate and curation toggles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Candidates scoring below this are dropped. A score equal to it is kept.
    pub min_confidence_score: f64,

    /// When false every accepted candidate becomes a new lead.
    pub deduplication_enabled: bool,

    /// Industry detection and contact-name inference.
    pub enrichment_enabled: bool,

    /// Drop candidates whose text is not about guarding work.
    pub relevance_filter: bool,

    pub match_policy: MatchPolicy,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_confidence_score: 0.3,
            deduplication_enabled: true,
            enrichment_enabled: true,
            relevance_filter: false,
            match_policy: MatchPolicy::Exact,
        }
    }
}

/// Root configuration read at the start of every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub sources: BTreeMap<String, SourceConfig>,
    pub scraping: ScrapingConfig,
    pub schedule: ScheduleConfig,

    /// Run records retained; oldest evicted first.
    pub max_history: usize,

    pub validation: ValidationConfig,

    /// Store failures in one run that escalate the run to `Failed`.
    pub max_store_errors: usize,

    /// Scheduler evaluation period.
    pub tick_seconds: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let sources = [
            (
                "usajobs",
                "https://data.usajobs.gov/api/search?Keyword=security%20guard",
            ),
            (
                "bidnetdirect",
                "https://www.bidnetdirect.com/public/solicitations/open?keywords=Security+Services",
            ),
            (
                "instantmarkets",
                "https://www.instantmarkets.com/q/event_security_guard",
            ),
            ("securityjobsnet", "https://securityjobs.net/"),
        ]
        .into_iter()
        .map(|(name, url)| (name.to_string(), SourceConfig::new(url)))
        .collect();

        Self {
            sources,
            scraping: ScrapingConfig::default(),
            schedule: ScheduleConfig::default(),
            max_history: 100,
            validation: ValidationConfig::default(),
            max_store_errors: 10,
            tick_seconds: 60,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// A config with no sources, for callers that register their own.
    pub fn empty() -> Self {
        Self {
            sources: BTreeMap::new(),
            ..Default::default()
        }
    }

    /// Load and validate a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_source(mut self, name: impl Into<String>, source: SourceConfig) -> Self {
        self.sources.insert(name.into(), source);
        self
    }

    pub fn with_scraping(mut self, scraping: ScrapingConfig) -> Self {
        self.scraping = scraping;
        self
    }

    pub fn with_validation(mut self, validation: ValidationConfig) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_schedule(mut self, schedule: ScheduleConfig) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_max_history(mut self, max: usize) -> Self {
        self.max_history = max;
        self
    }

    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.get(name)
    }

    /// Names of sources enabled in this config.
    pub fn enabled_sources(&self) -> Vec<&str> {
        self.sources
            .iter()
            .filter(|(_, s)| s.enabled)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Reject values the pipeline cannot honour.
    pub fn validate(&self) -> ConfigResult<()> {
        let min = self.validation.min_confidence_score;
        if !(0.0..=1.0).contains(&min) {
            return Err(ConfigError::invalid(
                "validation.min_confidence_score",
                format!("{min} is outside [0, 1]"),
            ));
        }
        if let MatchPolicy::TokenSimilarity { min_similarity } = self.validation.match_policy {
            if !(0.0..=1.0).contains(&min_similarity) || min_similarity == 0.0 {
                return Err(ConfigError::invalid(
                    "validation.match_policy.min_similarity",
                    format!("{min_similarity} is outside (0, 1]"),
                ));
            }
        }
        if self.scraping.max_concurrent_sources == 0 {
            return Err(ConfigError::invalid(
                "scraping.max_concurrent_sources",
                "must be at least 1",
            ));
        }
        if !self.scraping.request_delay_seconds.is_finite() || self.scraping.request_delay_seconds < 0.0 {
            return Err(ConfigError::invalid(
                "scraping.request_delay_seconds",
                "must be a non-negative number",
            ));
        }
        if !self.scraping.retry_backoff_seconds.is_finite() || self.scraping.retry_backoff_seconds < 0.0 {
            return Err(ConfigError::invalid(
                "scraping.retry_backoff_seconds",
                "must be a non-negative number",
            ));
        }
        if self.scraping.timeout_seconds == 0 {
            return Err(ConfigError::invalid("scraping.timeout_seconds", "must be at least 1"));
        }
        if self.max_history == 0 {
            return Err(ConfigError::invalid("max_history", "must be at least 1"));
        }
        if self.max_store_errors == 0 {
            return Err(ConfigError::invalid("max_store_errors", "must be at least 1"));
        }
        if self.tick_seconds == 0 {
            return Err(ConfigError::invalid("tick_seconds", "must be at least 1"));
        }
        for (name, source) in &self.sources {
            if source.enabled && url::Url::parse(&source.url).is_err() {
                return Err(ConfigError::invalid(
                    format!("sources.{name}.url"),
                    format!("{:?} is not a valid URL", source.url),
                ));
            }
        }
        self.schedule.validate()?;
        Ok(())
    }
}

/// Shared, hot-swappable configuration.
///
/// Runs take a snapshot at start; `replace` affects the next run only.
#[derive(Debug, Clone, Default)]
pub struct ConfigHandle {
    inner: Arc<RwLock<PipelineConfig>>,
}

impl ConfigHandle {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    pub fn snapshot(&self) -> PipelineConfig {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Validate and swap in a new configuration.
    pub fn replace(&self, config: PipelineConfig) -> ConfigResult<()> {
        config.validate()?;
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = config;
        tracing::info!("pipeline configuration replaced");
        Ok(())
    }

    /// Apply an in-place edit, keeping the old config if the result is invalid.
    pub fn update(&self, edit: impl FnOnce(&mut PipelineConfig)) -> ConfigResult<()> {
        let mut next = self.snapshot();
        edit(&mut next);
        self.replace(next)
    }
}

fn default_true() -> bool {
    true
}

fn default_max_documents() -> usize {
    25
}
