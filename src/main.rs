mod classify;
mod config;
mod error;
mod filter;
mod identity;
mod location;
mod merge;
mod model;
mod orchestrator;
mod retry;
mod source;
mod stats;
mod store;
mod tracker;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::classify::HttpClassifier;
use crate::config::Settings;
use crate::filter::RelevanceGate;
use crate::merge::MergeEngine;
use crate::orchestrator::{Orchestrator, RunOptions};
use crate::store::{JobStore, MemoryStore, SqliteStore};

#[derive(Parser)]
#[command(name = "job_ingest", about = "Multi-source job posting ingest with deduplication")]
struct Cli {
    /// Config file (default: ingest.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape stale entities, merge and persist canonical records
    Run {
        /// Scrape every entity, ignoring freshness
        #[arg(long)]
        force: bool,
        /// Keep everything in memory; nothing is written to the database
        #[arg(long)]
        dry_run: bool,
    },
    /// Most recently seen canonical records
    Records {
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
    /// Store totals and the last run report
    Stats,
    /// Show how a raw location string normalizes
    Normalize {
        location: String,
        /// Description text used as eligibility evidence
        #[arg(short, long)]
        description: Option<String>,
        /// With --title, also print the identity key
        #[arg(long)]
        employer: Option<String>,
        #[arg(long)]
        title: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run { force, dry_run } => {
            let settings = Settings::load(cli.config.as_deref()).context("loading config")?;
            run(settings, force, dry_run).await
        }
        Commands::Records { limit } => {
            let settings = Settings::load(cli.config.as_deref()).context("loading config")?;
            let store = SqliteStore::open(&settings.database_path)?;
            let records = store.list_records(limit).await?;
            if records.is_empty() {
                println!("No records yet. Run 'run' first.");
                return Ok(());
            }

            println!(
                "{:>3} | {:<20} | {:<32} | {:<30} | {:<7} | {:>3} | {:<10}",
                "#", "Employer", "Title", "Locations", "Status", "Src", "Last seen"
            );
            println!("{}", "-".repeat(120));

            for (i, r) in records.iter().enumerate() {
                let locations = r
                    .locations
                    .iter()
                    .map(|l| l.to_string())
                    .collect::<Vec<_>>()
                    .join(" ");
                println!(
                    "{:>3} | {:<20} | {:<32} | {:<30} | {:<7} | {:>3} | {:<10}",
                    i + 1,
                    truncate(&r.employer, 20),
                    truncate(&r.title, 32),
                    truncate(&locations, 30),
                    r.url_status.as_str(),
                    r.sources.len(),
                    r.last_seen.format("%Y-%m-%d").to_string(),
                );
            }

            println!("\n{} records", records.len());
            Ok(())
        }
        Commands::Stats => {
            let settings = Settings::load(cli.config.as_deref()).context("loading config")?;
            let store = SqliteStore::open(&settings.database_path)?;
            let c = store.counts().await?;
            println!("Records:         {} ({} live, {} missing)", c.records, c.live, c.missing);
            println!("Entities:        {} ({} failing)", c.entities, c.failing_entities);
            println!("Runs:            {}", c.runs);
            println!("Classifications: {}", c.classifications);
            if let Some(last) = store.last_run().await? {
                println!("\n{}", last.render_markdown());
            }
            Ok(())
        }
        Commands::Normalize {
            location: raw,
            description,
            employer,
            title,
        } => {
            let n = location::normalize_detailed(&raw, description.as_deref());
            for loc in &n.locations {
                println!("{loc}");
            }
            if n.remote_unscoped {
                println!("(remote scope unknown; narrowable by sibling postings)");
            }
            if let (Some(employer), Some(title)) = (employer, title) {
                let key = identity::identity_key(&employer, &title, &n.locations);
                println!("key: {}", key.as_str());
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn run(settings: Settings, force: bool, dry_run: bool) -> anyhow::Result<()> {
    if settings.sources.is_empty() {
        println!("No sources configured. Add [[sources]] to the config file.");
        return Ok(());
    }

    let client = reqwest::Client::builder()
        .timeout(settings.fetch_timeout())
        .user_agent(concat!("job_ingest/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("building HTTP client")?;

    let jobs = settings
        .sources
        .iter()
        .map(|s| source::build(s, &client).with_context(|| format!("source '{}'", s.id)))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let store: Arc<dyn JobStore> = if dry_run {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(
            SqliteStore::open(&settings.database_path)
                .with_context(|| format!("opening {}", settings.database_path.display()))?,
        )
    };

    let gate = RelevanceGate::new(&settings.relevance);
    info!(
        patterns = gate.pattern_count(),
        sources = jobs.len(),
        dry_run,
        "Relevance gate ready"
    );
    let mut options = RunOptions::from_settings(&settings);
    options.force = force;

    let mut orchestrator = Orchestrator::new(
        jobs,
        store,
        gate,
        MergeEngine::new(settings.merge.clone()),
        options,
    );
    if let Some(cfg) = &settings.classifier {
        orchestrator = orchestrator.with_classifier(Arc::new(HttpClassifier::new(client.clone(), cfg)));
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight stages");
            on_signal.cancel();
        }
    });

    let stats = orchestrator.run(&cancel).await;
    println!("{}", stats.render_markdown());
    if stats.entities_failed > 0 {
        println!(
            "{} entities failed; they stay stale and are retried next run.",
            stats.entities_failed
        );
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
