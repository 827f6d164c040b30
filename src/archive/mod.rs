//! Artifact cache manager.
//!
//! Keeps each vehicle's published image archive in step with the object
//! store. The object store is the source of truth: a vehicle whose archive
//! exists only has its stored reference repaired, and only a missing archive
//! triggers a download-and-package rebuild.

pub mod builder;
pub mod download;
pub mod error;
pub mod naming;

use std::collections::BTreeMap;
use std::io::IsTerminal;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use crate::error::Failure;
use crate::storage::ObjectStore;
use crate::store::{StoreError, VehicleStore};
use crate::types::ArchiveNaming;
use crate::vehicle::{ExternalId, VehicleSummary};

pub use builder::{ArchiveBuilder, HttpArchiveBuilder};
pub use error::{ArchiveError, DownloadError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveState {
    /// No object under the expected name.
    Missing,
    /// The object exists but the stored reference does not point at it.
    Stale,
    Current,
}

pub fn classify(exists: bool, stored_reference: Option<&str>, expected_reference: &str) -> ArchiveState {
    match (exists, stored_reference) {
        (false, _) => ArchiveState::Missing,
        (true, Some(stored)) if stored == expected_reference => ArchiveState::Current,
        (true, _) => ArchiveState::Stale,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    Current,
    ReferenceRepaired,
    Rebuilt,
    /// The vehicle has no images, so there is nothing to package.
    SkippedNoImages,
    /// Dry-run mode: the state that was observed, with no action taken.
    DryRun(ArchiveState),
    Failed(Failure),
}

#[derive(Debug, Clone)]
pub struct ArchiveResult {
    pub external_id: ExternalId,
    pub title: String,
    pub archive_name: String,
    pub outcome: ArchiveOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct ArchiveReport {
    pub results: Vec<ArchiveResult>,
    pub interrupted: bool,
}

impl ArchiveReport {
    fn count(&self, f: impl Fn(&ArchiveOutcome) -> bool) -> u64 {
        self.results.iter().filter(|r| f(&r.outcome)).count() as u64
    }

    pub fn current(&self) -> u64 {
        self.count(|o| *o == ArchiveOutcome::Current)
    }

    pub fn repaired(&self) -> u64 {
        self.count(|o| *o == ArchiveOutcome::ReferenceRepaired)
    }

    pub fn rebuilt(&self) -> u64 {
        self.count(|o| *o == ArchiveOutcome::Rebuilt)
    }

    pub fn skipped(&self) -> u64 {
        self.count(|o| *o == ArchiveOutcome::SkippedNoImages)
    }

    pub fn failed(&self) -> u64 {
        self.count(|o| matches!(o, ArchiveOutcome::Failed(_)))
    }
}

/// Archive names claimed by more than one stored vehicle, with the external
/// ids involved. Only title naming can collide.
pub fn shared_archive_names(
    naming: ArchiveNaming,
    vehicles: &[VehicleSummary],
) -> Vec<(String, Vec<ExternalId>)> {
    let mut by_name: BTreeMap<String, Vec<ExternalId>> = BTreeMap::new();
    for vehicle in vehicles {
        let name = naming::archive_name(naming, &vehicle.title, vehicle.vehicle_id);
        by_name.entry(name).or_default().push(vehicle.external_id);
    }
    by_name.into_iter().filter(|(_, ids)| ids.len() > 1).collect()
}

#[derive(Debug, Clone, Copy)]
pub struct ArchiveSettings {
    pub naming: ArchiveNaming,
    pub workers: usize,
    pub dry_run: bool,
    pub no_progress_bar: bool,
}

/// Create a progress bar with a consistent template.
///
/// Hidden when the user passed `--no-progress-bar` or stdout is not a TTY.
fn create_progress_bar(no_progress_bar: bool, total: u64) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::with_template(
        "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    )
    .map(|s| s.progress_chars("=> "))
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb
}

pub struct ArtifactCacheManager {
    store: Arc<dyn VehicleStore>,
    objects: Arc<dyn ObjectStore>,
    builder: Arc<dyn ArchiveBuilder>,
    settings: ArchiveSettings,
}

impl ArtifactCacheManager {
    pub fn new(
        store: Arc<dyn VehicleStore>,
        objects: Arc<dyn ObjectStore>,
        builder: Arc<dyn ArchiveBuilder>,
        settings: ArchiveSettings,
    ) -> Self {
        Self {
            store,
            objects,
            builder,
            settings,
        }
    }

    /// Bring every stored vehicle's archive up to date.
    ///
    /// The vehicle listing is read once up front; a failure there is the only
    /// error returned; per-vehicle failures land in the report.
    pub async fn refresh_all(&self, shutdown: &CancellationToken) -> Result<ArchiveReport, StoreError> {
        let vehicles = self.store.list_all().await?;
        for (name, external_ids) in shared_archive_names(self.settings.naming, &vehicles) {
            tracing::warn!(
                archive = %name,
                ?external_ids,
                "Vehicles share one archive name; use --archive-naming vehicle-id to keep their images apart"
            );
        }
        let total = vehicles.len();
        let pb = create_progress_bar(self.settings.no_progress_bar, total as u64);

        let results = stream::iter(vehicles)
            .take_while(|_| std::future::ready(!shutdown.is_cancelled()))
            .map(|vehicle| async move { self.refresh_vehicle(vehicle).await })
            .buffer_unordered(self.settings.workers.max(1));
        tokio::pin!(results);

        let mut report = ArchiveReport::default();
        while let Some(result) = results.next().await {
            pb.set_message(result.archive_name.clone());
            match &result.outcome {
                ArchiveOutcome::Failed(failure) => pb.suspend(|| {
                    tracing::error!(
                        title = %result.title,
                        archive = %result.archive_name,
                        kind = %failure.kind,
                        "Archive refresh failed: {}",
                        failure.message
                    )
                }),
                ArchiveOutcome::SkippedNoImages => pb.suspend(|| {
                    tracing::warn!(title = %result.title, "No images, skipping archive")
                }),
                ArchiveOutcome::Rebuilt => pb.suspend(|| {
                    tracing::info!(title = %result.title, archive = %result.archive_name, "Published archive")
                }),
                _ => {}
            }
            pb.inc(1);
            report.results.push(result);
        }
        pb.finish_and_clear();

        if report.results.len() < total {
            tracing::info!(
                processed = report.results.len(),
                total,
                "Shutdown requested, stopped archive refresh"
            );
            report.interrupted = true;
        }
        Ok(report)
    }

    async fn refresh_vehicle(&self, vehicle: VehicleSummary) -> ArchiveResult {
        let name = naming::archive_name(self.settings.naming, &vehicle.title, vehicle.vehicle_id);
        let outcome = self.refresh(&vehicle, &name).await;
        ArchiveResult {
            external_id: vehicle.external_id,
            title: vehicle.title,
            archive_name: name,
            outcome,
        }
    }

    async fn refresh(&self, vehicle: &VehicleSummary, name: &str) -> ArchiveOutcome {
        let expected = self.objects.public_reference(name);
        let exists = match self.objects.exists(name).await {
            Ok(exists) => exists,
            Err(e) => return ArchiveOutcome::Failed(Failure::new(e.kind(), e.to_string())),
        };

        let state = classify(exists, vehicle.artifact_reference.as_deref(), &expected);
        if self.settings.dry_run {
            if state != ArchiveState::Current {
                tracing::info!(title = %vehicle.title, archive = name, ?state, "[DRY RUN] Would refresh archive");
            }
            return ArchiveOutcome::DryRun(state);
        }

        match state {
            ArchiveState::Current => ArchiveOutcome::Current,
            ArchiveState::Stale => {
                match self
                    .store
                    .set_artifact_reference(vehicle.vehicle_id, Some(&expected))
                    .await
                {
                    Ok(()) => {
                        tracing::debug!(title = %vehicle.title, archive = name, "Archive exists, reference repaired");
                        ArchiveOutcome::ReferenceRepaired
                    }
                    Err(e) => ArchiveOutcome::Failed(Failure::new(e.kind(), e.to_string())),
                }
            }
            ArchiveState::Missing => match self.rebuild(vehicle, name, &expected).await {
                Ok(outcome) => outcome,
                Err(failure) => ArchiveOutcome::Failed(failure),
            },
        }
    }

    async fn rebuild(
        &self,
        vehicle: &VehicleSummary,
        name: &str,
        expected: &str,
    ) -> Result<ArchiveOutcome, Failure> {
        let urls = self
            .store
            .image_urls(vehicle.vehicle_id)
            .await
            .map_err(|e| Failure::new(e.kind(), e.to_string()))?;
        if urls.is_empty() {
            return Ok(ArchiveOutcome::SkippedNoImages);
        }

        let label = naming::archive_label(self.settings.naming, &vehicle.title, vehicle.vehicle_id);
        let bytes = self
            .builder
            .build(&label, &urls)
            .await
            .map_err(|e| Failure::new(e.kind(), e.to_string()))?;
        self.objects
            .upload(name, &bytes)
            .await
            .map_err(|e| Failure::new(e.kind(), e.to_string()))?;
        self.store
            .set_artifact_reference(vehicle.vehicle_id, Some(expected))
            .await
            .map_err(|e| Failure::new(e.kind(), e.to_string()))?;

        Ok(ArchiveOutcome::Rebuilt)
    }
}
