//! One full sync pass: fetch, normalize, reconcile, refresh archives, and
//! record the run.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use crate::archive::{ArchiveBuilder, ArchiveReport, ArchiveSettings, ArtifactCacheManager};
use crate::feed::FeedReader;
use crate::normalize;
use crate::reconcile::{ReconcileReport, ReconcileSettings, Reconciler};
use crate::storage::ObjectStore;
use crate::store::{SyncRunStats, VehicleStore};
use crate::types::ArchiveNaming;

/// Subset of application config consumed by a sync pass.
#[derive(Debug, Clone, Copy)]
pub struct SyncSettings {
    pub naming: ArchiveNaming,
    pub workers: usize,
    pub dry_run: bool,
    pub skip_archives: bool,
    pub no_progress_bar: bool,
}

/// Explicit handles to every collaborator a sync pass talks to.
pub struct SyncContext {
    pub feed: Arc<dyn FeedReader>,
    pub store: Arc<dyn VehicleStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub builder: Arc<dyn ArchiveBuilder>,
}

#[derive(Debug, Clone)]
pub struct SyncReport {
    pub reconcile: ReconcileReport,
    /// `None` when the archive pass was skipped.
    pub archives: Option<ArchiveReport>,
}

impl SyncReport {
    pub fn stats(&self) -> SyncRunStats {
        let archives = self.archives.as_ref();
        SyncRunStats {
            inserted: self.reconcile.inserted(),
            updated: self.reconcile.updated(),
            unchanged: self.reconcile.unchanged(),
            deleted: self.reconcile.deleted(),
            failed: self.reconcile.failed() + archives.map_or(0, ArchiveReport::failed),
            archives_built: archives.map_or(0, ArchiveReport::rebuilt),
            interrupted: self.reconcile.interrupted || archives.is_some_and(|a| a.interrupted),
        }
    }
}

/// Run one sync pass.
///
/// Errors only when the feed cannot be fetched or parsed, or the store
/// cannot be listed; everything else is recorded per vehicle in the report.
pub async fn run_sync(
    ctx: &SyncContext,
    settings: &SyncSettings,
    shutdown: &CancellationToken,
) -> anyhow::Result<SyncReport> {
    let started = Instant::now();

    let records = ctx.feed.fetch().await.context("Failed to read listing feed")?;
    let vehicles: Vec<_> = records.iter().map(normalize::normalize_record).collect();
    tracing::info!(records = vehicles.len(), "Fetched feed");

    let run_id = if settings.dry_run {
        None
    } else {
        match ctx.store.start_sync_run().await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!("Failed to record sync run start: {}", e);
                None
            }
        }
    };

    let reconciler = Reconciler::new(
        ctx.store.clone(),
        ctx.objects.clone(),
        ReconcileSettings {
            naming: settings.naming,
            workers: settings.workers,
            dry_run: settings.dry_run,
        },
    );
    let reconcile = reconciler
        .reconcile(vehicles, shutdown)
        .await
        .context("Failed to reconcile vehicles")?;

    let archives = if settings.skip_archives || shutdown.is_cancelled() {
        None
    } else {
        let manager = ArtifactCacheManager::new(
            ctx.store.clone(),
            ctx.objects.clone(),
            ctx.builder.clone(),
            ArchiveSettings {
                naming: settings.naming,
                workers: settings.workers,
                dry_run: settings.dry_run,
                no_progress_bar: settings.no_progress_bar,
            },
        );
        Some(
            manager
                .refresh_all(shutdown)
                .await
                .context("Failed to refresh archives")?,
        )
    };

    let report = SyncReport {
        reconcile,
        archives,
    };
    let mut stats = report.stats();
    stats.interrupted |= shutdown.is_cancelled();

    if let Some(run_id) = run_id {
        if let Err(e) = ctx.store.complete_sync_run(run_id, &stats).await {
            tracing::warn!("Failed to record sync run completion: {}", e);
        }
    }

    log_summary(&report, &stats, started.elapsed(), settings.dry_run);
    Ok(report)
}

fn log_summary(report: &SyncReport, stats: &SyncRunStats, elapsed: Duration, dry_run: bool) {
    if dry_run {
        tracing::info!("── Dry Run Summary ──");
    } else {
        tracing::info!("── Summary ──");
    }
    tracing::info!(
        "  {} inserted, {} updated, {} unchanged, {} deleted",
        stats.inserted,
        stats.updated,
        stats.unchanged,
        stats.deleted
    );
    if !report.reconcile.duplicates.is_empty() {
        tracing::info!(
            "  {} duplicate feed records collapsed",
            report.reconcile.duplicates.len()
        );
    }
    if let Some(archives) = &report.archives {
        tracing::info!(
            "  archives: {} rebuilt, {} repaired, {} current, {} without images",
            archives.rebuilt(),
            archives.repaired(),
            archives.current(),
            archives.skipped()
        );
    }
    if stats.failed > 0 {
        tracing::warn!("  {} failed", stats.failed);
    }
    if stats.interrupted {
        tracing::info!("  interrupted by shutdown request");
    }
    tracing::info!("  elapsed: {}", format_duration(elapsed));
}

fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {:02}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}
