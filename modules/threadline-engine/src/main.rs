use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use threadline_common::{Article, Config};
use threadline_engine::{
    ClaudeComposer, DetectionCycle, DormancySweep, NarrativeComposer, RetryComposer, ShallowMerger,
};
use threadline_store::{MemoryNarrativeStore, NarrativeStore, PgNarrativeStore};

#[derive(Parser)]
#[command(name = "threadline", version, about = "News narrative detection and lifecycle engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Cluster a batch of annotated articles, then attach or found narratives
    Cycle {
        /// JSON file holding the article batch
        batch: PathBuf,
    },
    /// Demote narratives whose coverage has gone quiet
    Sweep,
    /// Fold shallow narratives into the substantial ones they overlap
    Merge,
    /// List narratives that have come back from dormancy
    Resurrections,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("threadline=info".parse()?))
        .init();

    let cli = Cli::parse();

    info!("Threadline engine starting...");

    // Load config
    let config = Config::from_env();

    // Connect the narrative store
    let store = connect_store(&config).await?;

    match cli.command {
        Commands::Cycle { batch } => {
            let articles = read_batch(&batch)?;
            let composer = build_composer(&config);
            let cycle = DetectionCycle::new(store.clone(), composer, config.tuning.clone());
            let stats = cycle.run(articles, Utc::now()).await?;
            info!("Cycle run complete. {stats}");
        }
        Commands::Sweep => {
            let sweep = DormancySweep::new(store.clone(), config.tuning.clone());
            let stats = sweep.run(Utc::now()).await?;
            info!("Sweep run complete. {stats}");
        }
        Commands::Merge => {
            let merger = ShallowMerger::new(store.clone(), config.tuning.clone());
            let stats = merger.run().await?;
            info!("Merge run complete. {stats}");
        }
        Commands::Resurrections => {
            let rows = store.resurrections().await?;
            if rows.is_empty() {
                println!("No resurrections on record.");
            }
            for row in rows {
                let n = &row.narrative;
                println!(
                    "{}  [{}]  {}  reawakened {}x, {:.2} articles/day since comeback",
                    n.id,
                    n.lifecycle_state,
                    n.title,
                    n.reawakening_count,
                    n.resurrection_velocity.unwrap_or(0.0),
                );
            }
        }
    }

    Ok(())
}

/// Postgres when `DATABASE_URL` is set, otherwise the in-memory store.
async fn connect_store(config: &Config) -> Result<Arc<dyn NarrativeStore>> {
    match config.database_url.as_deref() {
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .context("Failed to connect to Postgres")?;
            info!("Connected to database");

            let store = PgNarrativeStore::new(pool);
            store.migrate().await?;
            store.backfill_nucleus_mirror().await?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set; using the in-memory store (state is lost on exit)");
            Ok(Arc::new(MemoryNarrativeStore::new()))
        }
    }
}

/// Claude-backed composer when `ANTHROPIC_API_KEY` is set. Without one the
/// cycle falls back to placeholder titles.
fn build_composer(config: &Config) -> Option<Arc<dyn NarrativeComposer>> {
    match config.anthropic_api_key.as_deref() {
        Some(key) => Some(Arc::new(RetryComposer::new(Arc::new(ClaudeComposer::new(
            key,
        ))))),
        None => {
            warn!("ANTHROPIC_API_KEY not set; new narratives get placeholder titles");
            None
        }
    }
}

fn read_batch(path: &Path) -> Result<Vec<Article>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read article batch from {}", path.display()))?;
    let articles: Vec<Article> =
        serde_json::from_str(&raw).context("Failed to parse article batch JSON")?;
    Ok(articles)
}
