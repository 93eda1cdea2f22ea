use anyhow::{Context, Result};
use lead_pipeline::{ConfigHandle, PipelineConfig};
use std::env;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;

const DEFAULT_DATABASE_URL: &str = "sqlite://leads.db?mode=rwc";

/// Process configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// JSON pipeline config; built-in defaults when unset
    pub pipeline_config_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenvy::dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            pipeline_config_path: env::var("LEADS_CONFIG").ok().map(PathBuf::from),
        })
    }

    pub fn with_pipeline_config(mut self, path: Option<PathBuf>) -> Self {
        if path.is_some() {
            self.pipeline_config_path = path;
        }
        self
    }

    /// Read and validate the pipeline config.
    pub fn load_pipeline_config(&self) -> Result<PipelineConfig> {
        match &self.pipeline_config_path {
            Some(path) => PipelineConfig::from_file(path)
                .with_context(|| format!("Failed to load pipeline config from {}", path.display())),
            None => {
                let config = PipelineConfig::default();
                config.validate().context("Built-in pipeline config is invalid")?;
                Ok(config)
            }
        }
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Reload the pipeline config file whenever it changes on disk.
///
/// An invalid file is logged and ignored; the running config stays in place.
pub async fn watch_pipeline_config(
    path: PathBuf,
    handle: ConfigHandle,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut last = modified(&path);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        let current = modified(&path);
        if current == last {
            continue;
        }
        last = current;

        match PipelineConfig::from_file(&path).and_then(|config| handle.replace(config)) {
            Ok(()) => tracing::info!(path = %path.display(), "pipeline config reloaded"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "ignoring invalid pipeline config"),
        }
    }
}
