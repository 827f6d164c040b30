//! vehicle-sync: keeps a local vehicle store in step with a dealer's XML
//! listing feed.
//!
//! Each pass fetches the feed, reconciles vehicles, accessories and images
//! into SQLite, then makes sure every vehicle has a packaged zip of its
//! images published to object storage with the public link cached on the
//! vehicle row.

#![warn(clippy::all)]

mod archive;
mod cli;
mod config;
mod error;
mod feed;
mod normalize;
mod reconcile;
pub mod retry;
mod shutdown;
mod storage;
mod store;
mod sync;
#[cfg(test)]
mod testutil;
mod types;
mod vehicle;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Command;
use store::{SqliteVehicleStore, VehicleStore};

/// Run the status command.
async fn run_status(args: cli::StatusArgs) -> anyhow::Result<()> {
    let db_path = config::expand_tilde(&args.database);

    if !db_path.exists() {
        println!("No vehicle database found at {}", db_path.display());
        println!("Run a sync first to create the database.");
        return Ok(());
    }

    let db = SqliteVehicleStore::open(&db_path).await?;
    let summary = db.get_summary().await?;

    println!("Vehicle Database: {}", db_path.display());
    println!();
    println!("Vehicles:");
    println!("  Total:           {}", summary.vehicles);
    println!("  With archive:    {}", summary.with_archive);
    println!(
        "  Without archive: {}",
        summary.vehicles.saturating_sub(summary.with_archive)
    );
    println!("  Accessory rows:  {}", summary.accessories);
    println!("  Image rows:      {}", summary.images);
    println!();

    if let Some(started) = &summary.last_sync_started {
        println!(
            "Last sync started:   {}",
            started.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    if let Some(completed) = &summary.last_sync_completed {
        println!(
            "Last sync completed: {}",
            completed.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    if let Some(run) = &summary.last_run {
        println!(
            "  {} inserted, {} updated, {} unchanged, {} deleted, {} failed, {} archives built{}",
            run.inserted,
            run.updated,
            run.unchanged,
            run.deleted,
            run.failed,
            run.archives_built,
            if run.interrupted { " (interrupted)" } else { "" }
        );
    }

    Ok(())
}

async fn open_store(path: &Path) -> anyhow::Result<Arc<SqliteVehicleStore>> {
    let db = SqliteVehicleStore::open(path)
        .await
        .with_context(|| format!("Failed to open vehicle database at {}", path.display()))?;
    tracing::debug!("Vehicle database opened at {}", path.display());
    Ok(Arc::new(db))
}

async fn run_sync_command(args: cli::SyncArgs) -> anyhow::Result<()> {
    let config = config::Config::from_cli(args)?;
    tracing::info!(
        workers = config.workers,
        dry_run = config.dry_run,
        "Starting vehicle-sync"
    );
    tracing::debug!(?config, "Resolved configuration");

    let client = reqwest::Client::builder()
        .user_agent(concat!("vehicle-sync/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    let store = open_store(&config.database).await?;
    let objects = storage::SupabaseStorage::new(
        client.clone(),
        &config.supabase_url,
        config.supabase_key.clone(),
        config.bucket.clone(),
        config.request_timeout,
        config.retry,
    )?;
    let ctx = sync::SyncContext {
        feed: Arc::new(feed::HttpFeedReader::new(
            client.clone(),
            config.feed_url.clone(),
            config.request_timeout,
            config.retry,
        )),
        store,
        objects: Arc::new(objects),
        builder: Arc::new(archive::HttpArchiveBuilder::new(
            client,
            config.scratch_dir.clone(),
            config.request_timeout,
            config.retry,
        )),
    };
    let settings = config.sync_settings();

    let shutdown_token = shutdown::install_signal_handler()?;

    loop {
        if shutdown_token.is_cancelled() {
            tracing::info!("Shutdown requested, exiting...");
            break;
        }

        let result = sync::run_sync(&ctx, &settings, &shutdown_token).await;

        let Some(interval) = config.watch_with_interval else {
            result?;
            break;
        };
        if let Err(e) = result {
            tracing::error!("Sync pass failed: {:#}", e);
        }

        if shutdown_token.is_cancelled() {
            tracing::info!("Shutdown requested, exiting...");
            break;
        }
        tracing::info!("Waiting {} seconds...", interval);
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(interval)) => {}
            _ = shutdown_token.cancelled() => {
                tracing::info!("Shutdown during wait, exiting...");
                break;
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = cli::Cli::parse();
    let command = cli.effective_command();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(command.log_level().as_filter())),
        )
        .init();

    match command {
        Command::Status(args) => run_status(args).await,
        Command::Sync(args) => run_sync_command(args).await,
    }
}
