use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use macfit_core::ConfigurationRecord;
use macfit_sync::{load_snapshot_or_empty, parse_budget, BudgetMatcher, IngestPipeline, ScoringWeights, SyncConfig};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_LOG_FILTER: &str =
    "warn,macfit_adapters=info,macfit_storage=info,macfit_sync=info,macfit_web=info,macfit_cli=info";

#[derive(Debug, Parser)]
#[command(name = "macfit-cli")]
#[command(about = "Mac Budget Fit: ingest Apple Store captures and match budgets")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Rebuild the catalog snapshot from the enabled targets.
    Ingest,
    /// Best configuration for a budget, with its price neighbors.
    Match {
        /// Amount in rupees; grouping commas and a leading ₹ are accepted.
        #[arg(long)]
        budget: String,
    },
    /// Every catalog record, cheapest first.
    Products {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Markdown digest of recent ingestion runs.
    Report {
        #[arg(long, default_value_t = 5)]
        runs: usize,
    },
    Serve {
        #[arg(long, env = "MACFIT_WEB_PORT", default_value_t = macfit_web::DEFAULT_PORT)]
        port: u16,
        /// Run one ingestion before serving.
        #[arg(long)]
        ingest: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let json = std::env::var("MACFIT_LOG_JSON").is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().with_target(false)).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Ingest) {
        Commands::Ingest => {
            let summary = macfit_sync::run_ingest_once_from_env().await?;
            println!(
                "ingest complete: run_id={} targets={} captures={} records={} rejected={} failed_targets={} reports={}",
                summary.run_id,
                summary.enabled_targets,
                summary.captures,
                summary.catalog_records,
                summary.rejected,
                summary.failed_targets,
                summary.reports_dir
            );
        }
        Commands::Match { budget } => {
            let budget = parse_budget(&budget)?;
            let snapshot = load_snapshot_or_empty(&config).await?;
            if snapshot.products.is_empty() {
                bail!("no catalog snapshot at {}; run `ingest` first", config.snapshot_path.display());
            }
            let weights = ScoringWeights::load(config.scoring_rules_path())?;
            let found = BudgetMatcher::default().find(&snapshot.products, budget)?;
            info!(budget, outcome = ?found.outcome, "budget matched");
            let scored = |record: Option<&ConfigurationRecord>| record.map(|r| weights.annotate(r));
            let out = serde_json::json!({
                "outcome": found.outcome,
                "best_match": scored(found.best),
                "cheaper_alternative": scored(found.cheaper),
                "expensive_alternative": scored(found.pricier),
            });
            println!("{}", serde_json::to_string_pretty(&out).context("serializing match")?);
        }
        Commands::Products { limit } => {
            let snapshot = load_snapshot_or_empty(&config).await?;
            let weights = ScoringWeights::load(config.scoring_rules_path())?;
            let mut listing = weights.price_ordered_listing(&snapshot.products);
            if let Some(limit) = limit {
                listing.truncate(limit);
            }
            println!("{}", serde_json::to_string_pretty(&listing).context("serializing products")?);
        }
        Commands::Report { runs } => {
            println!("{}", macfit_sync::report_recent_runs(runs, &config.reports_dir)?);
        }
        Commands::Serve { port, ingest } => {
            let state = macfit_web::AppState::load(&config).await?;
            if ingest {
                let handle = state.snapshots.clone();
                let pipeline = IngestPipeline::new(config.clone())?;
                tokio::spawn(async move {
                    let summary = match pipeline.run_once().await {
                        Ok(summary) => summary,
                        Err(err) => {
                            warn!(error = %err, "background ingest failed; serving the previous snapshot");
                            return;
                        }
                    };
                    info!(run_id = %summary.run_id, records = summary.catalog_records, "background ingest finished");
                    if let Err(err) = handle.reload(&config).await {
                        warn!(error = %err, "reloading the ingested snapshot failed");
                    }
                });
            }
            macfit_web::serve(state, port).await?;
        }
    }

    Ok(())
}
