use std::sync::atomic::Ordering;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use flowline_adapters::load_fixture_adapters;
use flowline_sync::{SyncConfig, SyncEngine};

#[derive(Debug, Parser)]
#[command(name = "flowline")]
#[command(about = "Mirror daily river-gauge series from upstream networks")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Refresh site catalogs and fetch observations for every due site.
    Sync {
        /// Global site ids to sync; default is every due site.
        sites: Vec<String>,
        /// Ignore staleness and refetch from the epoch.
        #[arg(long)]
        force: bool,
    },
    /// List stored sites.
    Stations {
        /// Restrict to one source.
        #[arg(long)]
        source: Option<String>,
        /// Only sites the source reports as active.
        #[arg(long)]
        active: bool,
        /// Only sites with stored data at most this many days old.
        #[arg(long)]
        recent_days: Option<i64>,
    },
    /// Print stored observations as JSON lines.
    Values {
        /// Global site ids; default is every stored site.
        sites: Vec<String>,
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
    },
    /// Days since each source last synced a site.
    Freshness,
}

fn build_engine(force: bool) -> Result<SyncEngine> {
    let mut config = SyncConfig::from_env();
    config.force = config.force || force;

    let fixtures_dir = config.data_dir.join("_fixtures");
    let adapters = load_fixture_adapters(&fixtures_dir)?;
    if adapters.is_empty() {
        warn!(
            "no sources configured; drop fixture bundles under {}",
            fixtures_dir.display()
        );
    }

    Ok(SyncEngine::new(config, adapters)?)
}

async fn run_sync(sites: Vec<String>, force: bool) -> Result<()> {
    let engine = build_engine(force)?;

    let shutdown = engine.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("shutdown requested; in-flight sites will finish");
            shutdown.store(true, Ordering::Relaxed);
        }
    });

    let filter = if sites.is_empty() {
        None
    } else {
        Some(sites.as_slice())
    };
    let summary = engine.sync_all(filter).await?;

    for (source, report) in &summary.sources {
        if report.skipped_missing_credential {
            println!("{source}: skipped (credential not configured)");
            continue;
        }
        if let Some(message) = &report.precondition {
            println!("{source}: {message}");
            continue;
        }
        println!(
            "{source}: listed={} synced={} fresh={} no_data={} cancelled={} failed={} invalid_rows={} dropped_rows={}",
            report.listed,
            report.synced,
            report.skipped_fresh,
            report.no_data,
            report.cancelled,
            report.failed.len(),
            report.invalid_rows,
            report.dropped_rows,
        );
        if let Some(message) = &report.listing_error {
            println!("  listing failed: {message}");
        }
        for failed in &report.failed {
            println!("  {}: {}", failed.site_id, failed.reason);
        }
    }
    // Per-site failures are reported above but never change the exit
    // status; only run-level errors do.
    println!(
        "run {} finished: {} site(s) synced, {} failed",
        summary.run_id,
        summary.total_synced(),
        summary.total_failed(),
    );
    Ok(())
}

fn run_stations(source: Option<String>, active: bool, recent_days: Option<i64>) -> Result<()> {
    let engine = build_engine(false)?;
    let mut records = engine.sites(source.as_ref().map(std::slice::from_ref))?;

    if active {
        records.retain(|record| record.active);
    }
    if let Some(days) = recent_days {
        let cutoff = chrono::Utc::now().date_naive() - chrono::Duration::days(days);
        records.retain(|record| record.stats.is_some_and(|stats| stats.max_date >= cutoff));
    }

    for record in records {
        let last_synced = record
            .last_synced
            .map(|when| when.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{}\t{}\t({:.4}, {:.4})\tlast_synced={last_synced}",
            record.site_id, record.name, record.latitude, record.longitude,
        );
    }
    Ok(())
}

fn run_values(
    sites: Vec<String>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<()> {
    let engine = build_engine(false)?;
    let filter = if sites.is_empty() {
        None
    } else {
        Some(sites.as_slice())
    };
    for row in engine.observations(filter, start, end)? {
        println!("{}", serde_json::to_string(&row)?);
    }
    Ok(())
}

fn run_freshness() -> Result<()> {
    let engine = build_engine(false)?;
    for (source, age) in engine.freshness() {
        match age {
            Some(days) => println!("{source}: synced {days} day(s) ago"),
            None => println!("{source}: never synced"),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Sync { sites, force } => run_sync(sites, force).await,
        Commands::Stations {
            source,
            active,
            recent_days,
        } => run_stations(source, active, recent_days),
        Commands::Values { sites, start, end } => run_values(sites, start, end),
        Commands::Freshness => run_freshness(),
    }
}
