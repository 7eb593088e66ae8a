use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use djc_storage::PgPostingStore;
use djc_sync::{cancel_on_ctrl_c, report_recent_runs, today, SyncConfig, SyncServices};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "djc-cli")]
#[command(about = "Dev Job Collector command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one collection batch and print its summary.
    Collect {
        /// Listings to request; defaults to DJC_BATCH_SIZE.
        #[arg(long)]
        size: Option<usize>,
        /// Serve recorded portal responses from this directory instead of calling the portal.
        #[arg(long)]
        fixtures: Option<PathBuf>,
        /// Keep postings in memory instead of Postgres.
        #[arg(long)]
        in_memory: bool,
    },
    /// Deactivate postings whose end date has passed.
    Expire,
    /// Delete inactive postings older than the retention period.
    Purge,
    Migrate,
    /// Web surface plus the cron scheduler when DJC_SCHEDULER_ENABLED is set.
    Serve,
    /// Print a markdown digest of recent run reports.
    Report {
        #[arg(long, default_value_t = 5)]
        runs: usize,
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,djc_sync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let cli = Cli::parse();
    let mut config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Collect {
        size: None,
        fixtures: None,
        in_memory: false,
    }) {
        Commands::Collect {
            size,
            fixtures,
            in_memory,
        } => {
            if fixtures.is_some() {
                config.fixtures_dir = fixtures;
            }
            let size = size.unwrap_or(config.batch_size);
            let services = if in_memory {
                SyncServices::in_memory(config)?
            } else {
                SyncServices::connect(config).await?
            };
            tokio::spawn(cancel_on_ctrl_c(services.cancellation_token()));

            let summary = services.pipeline.run_once(size).await;
            println!(
                "collect {}: run_id={} requested={} new={} skipped={} errors={} \
                 success_rate={} elapsed_ms={}",
                summary.outcome,
                summary.run_id,
                summary.requested,
                summary.new_count,
                summary.skipped,
                summary.errors,
                summary.success_rate_label(),
                summary.elapsed_ms
            );
            if summary.outcome.is_failure() {
                bail!("collection run {} failed: {}", summary.run_id, summary.outcome);
            }
        }
        Commands::Expire => {
            let services = SyncServices::connect(config).await?;
            let report = services.sweeper.expire(today()).await?;
            println!("expire: today={} deactivated={}", report.today, report.deactivated);
        }
        Commands::Purge => {
            let services = SyncServices::connect(config).await?;
            let report = services.sweeper.purge(today()).await?;
            println!(
                "purge: threshold={} candidates={} deleted={} sample={:?}",
                report.threshold, report.candidates, report.deleted, report.sample
            );
        }
        Commands::Migrate => {
            let store = PgPostingStore::connect(&config.database_url)
                .await
                .context("connecting to postgres")?;
            store.migrate().await.context("applying migrations")?;
            println!("migrations applied");
        }
        Commands::Serve => djc_web::serve_from_env().await?,
        Commands::Report { runs, dir } => {
            let dir = dir
                .or(config.reports_dir)
                .unwrap_or_else(|| PathBuf::from("reports"));
            println!("{}", report_recent_runs(&dir, runs)?);
        }
    }

    Ok(())
}
