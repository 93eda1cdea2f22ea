//! Lead pipeline daemon and operator CLI.
//!
//! `serve` runs the scheduler until Ctrl-C; the other subcommands act on
//! the lead database once and exit.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use lead_pipeline::{
    export, AggregateBy, ConfigHandle, LeadFilter, LeadId, LeadStatus, LeadStore, LeadType,
    Orchestrator, PipelineStore, Scheduler, SourceRegistry, SqliteStore, TriggerKind,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{watch_pipeline_config, Config};

/// How long shutdown waits for an in-flight run to wind down.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "lead-server")]
#[command(about = "Security-guard lead acquisition pipeline")]
struct Cli {
    /// Pipeline config JSON (overrides LEADS_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until Ctrl-C
    Serve {
        /// Start a run immediately instead of waiting for the schedule
        #[arg(long)]
        run_now: bool,
    },

    /// Execute one run and print its record. Refused while any process
    /// sharing the database holds the run lock.
    RunOnce,

    /// Print run state (including runs held by another process), last run
    /// and next scheduled time
    Status,

    /// Export leads matching the filters
    Export {
        #[arg(long, value_enum, default_value = "json")]
        format: ExportFormat,

        /// Write to this file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Record a triage decision for a lead
    SetStatus {
        id: String,
        status: String,
        #[arg(long)]
        notes: Option<String>,
    },

    /// Count leads by source, type or confidence band
    Stats {
        #[arg(long, value_enum, default_value = "source")]
        by: StatsBy,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportFormat {
    Json,
    Csv,
}

#[derive(Clone, Copy, ValueEnum)]
enum StatsBy {
    Source,
    LeadType,
    Confidence,
}

impl From<StatsBy> for AggregateBy {
    fn from(by: StatsBy) -> Self {
        match by {
            StatsBy::Source => AggregateBy::Source,
            StatsBy::LeadType => AggregateBy::LeadType,
            StatsBy::Confidence => AggregateBy::ConfidenceBucket,
        }
    }
}

#[derive(clap::Args)]
struct FilterArgs {
    /// State code or name
    #[arg(long)]
    state: Option<String>,
    #[arg(long)]
    source: Option<String>,
    #[arg(long)]
    keyword: Option<String>,
    #[arg(long)]
    min_confidence: Option<f64>,
    #[arg(long)]
    status: Option<String>,
    /// job_posting, rfp or contract
    #[arg(long)]
    lead_type: Option<String>,
}

impl FilterArgs {
    fn into_filter(self) -> Result<LeadFilter> {
        let status = self
            .status
            .map(|s| s.parse::<LeadStatus>())
            .transpose()
            .map_err(anyhow::Error::msg)?;
        let lead_type = self.lead_type.map(|t| parse_lead_type(&t)).transpose()?;

        Ok(LeadFilter {
            state: self.state,
            source: self.source,
            keyword: self.keyword,
            min_confidence: self.min_confidence,
            status,
            lead_type,
        })
    }
}

fn parse_lead_type(raw: &str) -> Result<LeadType> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "job_posting" | "job" => Ok(LeadType::JobPosting),
        "rfp" => Ok(LeadType::Rfp),
        "contract" => Ok(LeadType::Contract),
        other => anyhow::bail!("unknown lead type: {other}"),
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,lead_pipeline=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?.with_pipeline_config(cli.config);
    let pipeline_config = config.load_pipeline_config()?;
    tracing::info!(
        sources = ?pipeline_config.enabled_sources(),
        "pipeline configuration loaded"
    );

    let store = Arc::new(
        SqliteStore::new(&config.database_url)
            .await
            .with_context(|| format!("Failed to open lead database {}", config.database_url))?,
    );
    tracing::info!(database = %config.database_url, "lead database ready");

    let handle = ConfigHandle::new(pipeline_config);
    let shutdown = CancellationToken::new();
    let orchestrator = Orchestrator::new(
        handle.clone(),
        SourceRegistry::with_defaults(),
        store.clone() as Arc<dyn PipelineStore>,
    )
    .with_shutdown(shutdown.clone());

    match cli.command {
        Commands::Serve { run_now } => serve(config, handle, orchestrator, shutdown, run_now).await,
        Commands::RunOnce => {
            let ctrl_c = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    ctrl_c.cancel();
                }
            });
            let record = orchestrator
                .run_once(TriggerKind::Manual)
                .await
                .context("A run is already in progress against this database")?;
            print_json(&record)
        }
        Commands::Status => print_json(&orchestrator.status().await),
        Commands::Export {
            format,
            output,
            filter,
        } => {
            let leads = store.query_all(&filter.into_filter()?).await?;
            let body = match format {
                ExportFormat::Json => export::to_json(&leads)?,
                ExportFormat::Csv => export::to_csv(&leads),
            };
            match output {
                Some(path) => {
                    std::fs::write(&path, body)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    tracing::info!(count = leads.len(), path = %path.display(), "leads exported");
                }
                None => print!("{body}"),
            }
            Ok(())
        }
        Commands::SetStatus { id, status, notes } => {
            let id: LeadId = id.parse().context("Lead id must be a UUID")?;
            let status: LeadStatus = status.parse().map_err(anyhow::Error::msg)?;
            let lead = store.update_status(id, status, notes).await?;
            print_json(&lead)
        }
        Commands::Stats { by } => print_json(&store.aggregate(by.into()).await?),
    }
}

async fn serve(
    config: Config,
    handle: ConfigHandle,
    orchestrator: Orchestrator,
    shutdown: CancellationToken,
    run_now: bool,
) -> Result<()> {
    tracing::info!("Starting lead pipeline scheduler");

    let mut tasks = Vec::new();
    if let Some(path) = config.pipeline_config_path.clone() {
        let tick = Duration::from_secs(handle.snapshot().tick_seconds.max(1));
        tasks.push(tokio::spawn(watch_pipeline_config(
            path,
            handle.clone(),
            tick,
            shutdown.clone(),
        )));
    }
    tasks.push(tokio::spawn(
        Scheduler::new(orchestrator.clone()).run(shutdown.clone()),
    ));

    if run_now {
        let outcome = orchestrator.run_now();
        tracing::info!(?outcome, "initial run requested");
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutdown requested");
    shutdown.cancel();

    if tokio::time::timeout(SHUTDOWN_GRACE, orchestrator.wait_idle())
        .await
        .is_err()
    {
        tracing::warn!("In-flight run did not finish before the grace period");
    }
    join_tasks(tasks).await;

    tracing::info!("Scheduler stopped");
    Ok(())
}

async fn join_tasks(tasks: Vec<tokio::task::JoinHandle<()>>) {
    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "background task ended abnormally");
        }
    }
}
