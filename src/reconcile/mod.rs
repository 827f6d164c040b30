//! Reconciliation engine.
//!
//! Brings the store in line with one feed snapshot: inserts unseen external
//! ids, rewrites only the differing parts of known vehicles, and deletes
//! vehicles that left the feed along with their published archive. Each
//! vehicle is handled on its own so one failure never aborts the run.

pub mod plan;

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::Failure;
use crate::storage::ObjectStore;
use crate::store::{StoreError, VehicleStore};
use crate::types::ArchiveNaming;
use crate::vehicle::{ExternalId, FeedVehicle, VehicleId};

use plan::{Deletion, VehiclePlan, VehicleUpdate};

/// Result of one write against the store or object store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteStatus {
    /// Nothing to write, or the write was not attempted.
    Skipped,
    Written,
    Failed(Failure),
}

impl WriteStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, WriteStatus::Failed(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleAction {
    Inserted,
    Updated,
    Unchanged,
    Failed,
}

/// What happened to one feed vehicle. In dry-run mode `action` is the planned
/// action and every write is [`WriteStatus::Skipped`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleOutcome {
    pub external_id: ExternalId,
    pub title: String,
    pub vehicle_id: Option<VehicleId>,
    pub action: VehicleAction,
    pub attributes: WriteStatus,
    pub accessories: WriteStatus,
    pub images: WriteStatus,
    /// Removal of a published archive that no longer matches the vehicle.
    pub archive_cleanup: WriteStatus,
    /// The failure that abandoned the vehicle, if any.
    pub error: Option<Failure>,
}

impl VehicleOutcome {
    fn new(vehicle: &FeedVehicle, action: VehicleAction) -> Self {
        Self {
            external_id: vehicle.external_id,
            title: vehicle.attributes.title.clone(),
            vehicle_id: None,
            action,
            attributes: WriteStatus::Skipped,
            accessories: WriteStatus::Skipped,
            images: WriteStatus::Skipped,
            archive_cleanup: WriteStatus::Skipped,
            error: None,
        }
    }

    /// Whether any part of this vehicle's processing failed.
    pub fn has_failure(&self) -> bool {
        self.action == VehicleAction::Failed
            || self.attributes.is_failed()
            || self.accessories.is_failed()
            || self.images.is_failed()
            || self.archive_cleanup.is_failed()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionOutcome {
    pub external_id: ExternalId,
    pub vehicle_id: VehicleId,
    pub title: String,
    pub archive_name: String,
    /// Cascading removal of the vehicle row and its associations.
    pub row: WriteStatus,
    pub archive: WriteStatus,
}

impl DeletionOutcome {
    fn new(deletion: &Deletion) -> Self {
        Self {
            external_id: deletion.external_id,
            vehicle_id: deletion.vehicle_id,
            title: deletion.title.clone(),
            archive_name: deletion.archive_name.clone(),
            row: WriteStatus::Skipped,
            archive: WriteStatus::Skipped,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub vehicles: Vec<VehicleOutcome>,
    pub deletions: Vec<DeletionOutcome>,
    /// External ids that appeared more than once in the feed.
    pub duplicates: Vec<ExternalId>,
    pub dry_run: bool,
    /// Shutdown was requested before every vehicle was processed.
    pub interrupted: bool,
}

impl ReconcileReport {
    fn count_action(&self, action: VehicleAction) -> u64 {
        self.vehicles.iter().filter(|o| o.action == action).count() as u64
    }

    pub fn inserted(&self) -> u64 {
        self.count_action(VehicleAction::Inserted)
    }

    pub fn updated(&self) -> u64 {
        self.count_action(VehicleAction::Updated)
    }

    pub fn unchanged(&self) -> u64 {
        self.count_action(VehicleAction::Unchanged)
    }

    /// Vehicles whose row deletion succeeded (or would, in dry-run mode).
    pub fn deleted(&self) -> u64 {
        self.deletions.iter().filter(|d| !d.row.is_failed()).count() as u64
    }

    pub fn failed(&self) -> u64 {
        let vehicles = self.vehicles.iter().filter(|o| o.has_failure()).count();
        let deletions = self
            .deletions
            .iter()
            .filter(|d| d.row.is_failed() || d.archive.is_failed())
            .count();
        (vehicles + deletions) as u64
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReconcileSettings {
    pub naming: ArchiveNaming,
    pub workers: usize,
    pub dry_run: bool,
}

pub struct Reconciler {
    store: Arc<dyn VehicleStore>,
    objects: Arc<dyn ObjectStore>,
    settings: ReconcileSettings,
}

fn persistence_failure(e: &StoreError) -> Failure {
    Failure::new(e.kind(), e.to_string())
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn VehicleStore>,
        objects: Arc<dyn ObjectStore>,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            store,
            objects,
            settings,
        }
    }

    /// Reconcile the store against one normalized feed snapshot.
    ///
    /// Per-vehicle failures are recorded in the report. Only a failure to
    /// list the stored vehicles for the deletion diff is returned as an error.
    pub async fn reconcile(
        &self,
        records: Vec<FeedVehicle>,
        shutdown: &CancellationToken,
    ) -> Result<ReconcileReport, StoreError> {
        let (records, duplicates) = plan::collapse_duplicates(records);
        for external_id in &duplicates {
            tracing::warn!(external_id, "Duplicate feed record, keeping the last occurrence");
        }
        let feed_ids: HashSet<ExternalId> = records.iter().map(|r| r.external_id).collect();
        let total = records.len();

        let vehicles: Vec<VehicleOutcome> = stream::iter(records)
            .take_while(|_| std::future::ready(!shutdown.is_cancelled()))
            .map(|record| async move { self.apply_vehicle(record).await })
            .buffer_unordered(self.settings.workers.max(1))
            .collect()
            .await;

        let mut report = ReconcileReport {
            vehicles,
            duplicates,
            dry_run: self.settings.dry_run,
            ..ReconcileReport::default()
        };

        if shutdown.is_cancelled() {
            tracing::info!(
                processed = report.vehicles.len(),
                total,
                "Shutdown requested, skipping deletions"
            );
            report.interrupted = true;
            return Ok(report);
        }

        let stored = self.store.list_all().await?;
        let deletions = plan::plan_deletions(&stored, &feed_ids, self.settings.naming);
        report.deletions = stream::iter(deletions)
            .take_while(|_| std::future::ready(!shutdown.is_cancelled()))
            .map(|deletion| async move { self.apply_deletion(deletion).await })
            .buffer_unordered(self.settings.workers.max(1))
            .collect()
            .await;
        report.interrupted = shutdown.is_cancelled();

        Ok(report)
    }

    async fn apply_vehicle(&self, vehicle: FeedVehicle) -> VehicleOutcome {
        let title = vehicle.attributes.title.as_str();
        let external_id = vehicle.external_id;

        let stored = match self.store.find_by_external_id(external_id).await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::error!(title, external_id, kind = %e.kind(), "Lookup failed: {}", e);
                let mut outcome = VehicleOutcome::new(&vehicle, VehicleAction::Failed);
                outcome.error = Some(persistence_failure(&e));
                return outcome;
            }
        };

        match plan::plan_vehicle(&vehicle, stored.as_ref(), self.settings.naming) {
            VehiclePlan::Insert { vehicle_id } => self.insert(&vehicle, vehicle_id).await,
            VehiclePlan::Update(update) => self.update(&vehicle, update).await,
            VehiclePlan::Unchanged { vehicle_id } => {
                tracing::debug!(title, external_id, "Unchanged");
                let mut outcome = VehicleOutcome::new(&vehicle, VehicleAction::Unchanged);
                outcome.vehicle_id = Some(vehicle_id);
                outcome
            }
        }
    }

    async fn insert(&self, vehicle: &FeedVehicle, vehicle_id: VehicleId) -> VehicleOutcome {
        let title = vehicle.attributes.title.as_str();
        let external_id = vehicle.external_id;
        let mut outcome = VehicleOutcome::new(vehicle, VehicleAction::Inserted);
        outcome.vehicle_id = Some(vehicle_id);

        if self.settings.dry_run {
            tracing::info!(title, external_id, "[DRY RUN] Would insert vehicle");
            return outcome;
        }

        match self.store.insert_vehicle(vehicle_id, vehicle).await {
            Ok(()) => {
                tracing::info!(title, external_id, vehicle_id = %vehicle_id, "Inserted vehicle");
                outcome.attributes = WriteStatus::Written;
                outcome.accessories = WriteStatus::Written;
                outcome.images = WriteStatus::Written;
            }
            Err(e) => {
                tracing::error!(title, external_id, kind = %e.kind(), "Insert failed: {}", e);
                let failure = persistence_failure(&e);
                outcome.action = VehicleAction::Failed;
                outcome.attributes = WriteStatus::Failed(failure.clone());
                outcome.accessories = WriteStatus::Failed(failure.clone());
                outcome.images = WriteStatus::Failed(failure.clone());
                outcome.error = Some(failure);
            }
        }
        outcome
    }

    async fn update(&self, vehicle: &FeedVehicle, update: VehicleUpdate) -> VehicleOutcome {
        let title = vehicle.attributes.title.as_str();
        let external_id = vehicle.external_id;
        let vehicle_id = update.vehicle_id;
        let mut outcome = VehicleOutcome::new(vehicle, VehicleAction::Updated);
        outcome.vehicle_id = Some(vehicle_id);

        if self.settings.dry_run {
            tracing::info!(
                title,
                external_id,
                attributes = update.attributes.is_some(),
                accessories = update.accessories.is_some(),
                images = update.images.is_some(),
                "[DRY RUN] Would update vehicle"
            );
            return outcome;
        }

        if let Some(attributes) = &update.attributes {
            if let Err(e) = self.store.update_attributes(vehicle_id, attributes).await {
                tracing::error!(title, external_id, kind = %e.kind(), "Attribute update failed: {}", e);
                let failure = persistence_failure(&e);
                outcome.action = VehicleAction::Failed;
                outcome.attributes = WriteStatus::Failed(failure.clone());
                outcome.error = Some(failure);
                return outcome;
            }
            outcome.attributes = WriteStatus::Written;
        }

        if let Some(accessories) = &update.accessories {
            outcome.accessories = match self.store.replace_accessories(vehicle_id, accessories).await
            {
                Ok(()) => WriteStatus::Written,
                Err(e) => {
                    tracing::error!(title, external_id, kind = %e.kind(), "Accessory update failed: {}", e);
                    WriteStatus::Failed(persistence_failure(&e))
                }
            };
        }

        if let Some(images) = &update.images {
            outcome.images = match self.store.replace_images(vehicle_id, images).await {
                Ok(()) => WriteStatus::Written,
                Err(e) => {
                    tracing::error!(title, external_id, kind = %e.kind(), "Image update failed: {}", e);
                    WriteStatus::Failed(persistence_failure(&e))
                }
            };
        }

        // A rolled-back image write leaves the stored reference in place, and
        // it must keep pointing at an object.
        if let Some(retired) = update
            .retired_archive
            .as_ref()
            .filter(|_| !outcome.images.is_failed())
        {
            outcome.archive_cleanup = match self.objects.delete(retired).await {
                Ok(()) => {
                    tracing::debug!(title, archive = %retired, "Removed outdated archive");
                    WriteStatus::Written
                }
                Err(e) => {
                    tracing::warn!(title, archive = %retired, kind = %e.kind(), "Could not remove outdated archive: {}", e);
                    WriteStatus::Failed(Failure::new(e.kind(), e.to_string()))
                }
            };
        }

        tracing::info!(
            title,
            external_id,
            attributes = update.attributes.is_some(),
            accessories = update.accessories.is_some(),
            images = update.images.is_some(),
            "Updated vehicle"
        );
        outcome
    }

    async fn apply_deletion(&self, deletion: Deletion) -> DeletionOutcome {
        let title = deletion.title.as_str();
        let external_id = deletion.external_id;
        let mut outcome = DeletionOutcome::new(&deletion);

        if self.settings.dry_run {
            tracing::info!(title, external_id, archive = %deletion.archive_name, "[DRY RUN] Would delete vehicle");
            return outcome;
        }

        if let Err(e) = self.store.delete_vehicle(deletion.vehicle_id).await {
            tracing::error!(title, external_id, kind = %e.kind(), "Delete failed: {}", e);
            outcome.row = WriteStatus::Failed(persistence_failure(&e));
            return outcome;
        }
        outcome.row = WriteStatus::Written;
        tracing::info!(title, external_id, "Deleted vehicle");

        outcome.archive = match self.objects.delete(&deletion.archive_name).await {
            Ok(()) => WriteStatus::Written,
            Err(e) => {
                tracing::warn!(title, archive = %deletion.archive_name, kind = %e.kind(), "Archive delete failed: {}", e);
                WriteStatus::Failed(Failure::new(e.kind(), e.to_string()))
            }
        };
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::store::SqliteVehicleStore;
    use crate::testutil::{feed_vehicle, FlakyVehicleStore, MemoryObjectStore, StoreWrite};
    use crate::vehicle::ImageEntry;

    struct Fixture {
        store: Arc<SqliteVehicleStore>,
        objects: Arc<MemoryObjectStore>,
        reconciler: Reconciler,
    }

    fn fixture_with(naming: ArchiveNaming, dry_run: bool) -> Fixture {
        let store = Arc::new(SqliteVehicleStore::open_in_memory().unwrap());
        let objects = Arc::new(MemoryObjectStore::new());
        let reconciler = Reconciler::new(
            store.clone(),
            objects.clone(),
            ReconcileSettings {
                naming,
                workers: 4,
                dry_run,
            },
        );
        Fixture {
            store,
            objects,
            reconciler,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(ArchiveNaming::Title, false)
    }

    async fn run(f: &Fixture, records: Vec<FeedVehicle>) -> ReconcileReport {
        f.reconciler
            .reconcile(records, &CancellationToken::new())
            .await
            .unwrap()
    }

    struct FlakyFixture {
        store: Arc<FlakyVehicleStore>,
        objects: Arc<MemoryObjectStore>,
        reconciler: Reconciler,
    }

    fn flaky_fixture() -> FlakyFixture {
        let sqlite = Arc::new(SqliteVehicleStore::open_in_memory().unwrap());
        let store = Arc::new(FlakyVehicleStore::new(sqlite));
        let objects = Arc::new(MemoryObjectStore::new());
        let reconciler = Reconciler::new(
            store.clone(),
            objects.clone(),
            ReconcileSettings {
                naming: ArchiveNaming::Title,
                workers: 2,
                dry_run: false,
            },
        );
        FlakyFixture {
            store,
            objects,
            reconciler,
        }
    }

    impl FlakyFixture {
        async fn run(&self, records: Vec<FeedVehicle>) -> ReconcileReport {
            self.reconciler
                .reconcile(records, &CancellationToken::new())
                .await
                .unwrap()
        }

        async fn vehicle_id(&self, external_id: ExternalId) -> VehicleId {
            self.store
                .find_by_external_id(external_id)
                .await
                .unwrap()
                .unwrap()
                .vehicle_id
        }
    }

    fn outcome_for(report: &ReconcileReport, external_id: ExternalId) -> &VehicleOutcome {
        report
            .vehicles
            .iter()
            .find(|o| o.external_id == external_id)
            .unwrap()
    }

    fn snapshot() -> Vec<FeedVehicle> {
        let mut third = feed_vehicle(3, "Moto X");
        third.attributes.category = "Motocicleta".into();
        third.attributes.doors = None;
        third.accessories.clear();
        third.images.push(ImageEntry {
            position: 2,
            url: "https://img.example/3/3.jpg".into(),
            large_url: None,
        });
        vec![feed_vehicle(1, "Model A"), feed_vehicle(2, "Model B"), third]
    }

    #[tokio::test]
    async fn test_insert_new_vehicle() {
        let f = fixture();
        let report = run(&f, vec![feed_vehicle(42, "Model A")]).await;

        assert_eq!(report.inserted(), 1);
        let outcome = &report.vehicles[0];
        assert_eq!(outcome.attributes, WriteStatus::Written);
        assert_eq!(outcome.accessories, WriteStatus::Written);
        assert_eq!(outcome.images, WriteStatus::Written);

        let stored = f.store.find_by_external_id(42).await.unwrap().unwrap();
        assert_eq!(Some(stored.vehicle_id), outcome.vehicle_id);
        assert_eq!(stored.attributes.title, "Model A");
        assert_eq!(stored.artifact_reference, None);
    }

    #[tokio::test]
    async fn test_second_run_is_all_unchanged() {
        let f = fixture();
        run(&f, snapshot()).await;
        let report = run(&f, snapshot()).await;

        assert_eq!(report.unchanged(), 3);
        assert_eq!(report.inserted() + report.updated() + report.deleted(), 0);
        for outcome in &report.vehicles {
            assert_eq!(outcome.attributes, WriteStatus::Skipped);
            assert_eq!(outcome.accessories, WriteStatus::Skipped);
            assert_eq!(outcome.images, WriteStatus::Skipped);
        }
    }

    #[tokio::test]
    async fn test_store_matches_feed_after_reconcile() {
        let f = fixture();
        run(&f, snapshot()).await;

        let mut next = snapshot();
        next.remove(1);
        next[0].attributes.mileage = 5000;
        next[1].accessories.insert("Bau".into());
        next.push(feed_vehicle(4, "Model D"));
        run(&f, next.clone()).await;

        let stored_ids: HashSet<ExternalId> = f
            .store
            .list_all()
            .await
            .unwrap()
            .iter()
            .map(|v| v.external_id)
            .collect();
        let feed_ids: HashSet<ExternalId> = next.iter().map(|v| v.external_id).collect();
        assert_eq!(stored_ids, feed_ids);

        for vehicle in &next {
            let stored = f
                .store
                .find_by_external_id(vehicle.external_id)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(stored.attributes, vehicle.attributes);
            assert_eq!(stored.accessories, vehicle.accessories);
            assert_eq!(stored.images, vehicle.images);
        }
    }

    #[tokio::test]
    async fn test_delete_cascades_and_removes_archive() {
        let f = fixture();
        run(&f, vec![feed_vehicle(42, "Model A")]).await;
        let vehicle_id = f
            .store
            .find_by_external_id(42)
            .await
            .unwrap()
            .unwrap()
            .vehicle_id;
        f.objects.put("Model_A_images.zip", b"zip");
        assert_eq!(f.store.association_counts(vehicle_id), (2, 1));

        let report = run(&f, Vec::new()).await;

        assert_eq!(report.deleted(), 1);
        assert_eq!(report.deletions[0].archive, WriteStatus::Written);
        assert!(f.store.find_by_external_id(42).await.unwrap().is_none());
        assert_eq!(f.store.association_counts(vehicle_id), (0, 0));
        assert_eq!(f.objects.deletes(), vec!["Model_A_images.zip"]);
        assert!(!f.objects.contains("Model_A_images.zip"));
    }

    #[tokio::test]
    async fn test_archive_delete_failure_keeps_row_deletion() {
        let f = fixture();
        run(&f, vec![feed_vehicle(42, "Model A")]).await;
        f.objects.fail_writes();

        let report = run(&f, Vec::new()).await;

        assert_eq!(report.deleted(), 1);
        assert_eq!(report.failed(), 1);
        assert!(matches!(
            &report.deletions[0].archive,
            WriteStatus::Failed(failure) if failure.kind == FailureKind::Artifact
        ));
        assert!(f.store.find_by_external_id(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_price_change_only_writes_attributes() {
        let f = fixture();
        run(&f, vec![feed_vehicle(42, "Model A")]).await;
        let stored = f.store.find_by_external_id(42).await.unwrap().unwrap();
        f.store
            .set_artifact_reference(stored.vehicle_id, Some("memory://x"))
            .await
            .unwrap();

        let mut changed = feed_vehicle(42, "Model A");
        changed.attributes.price = 9500.0;
        let report = run(&f, vec![changed]).await;

        let outcome = &report.vehicles[0];
        assert_eq!(outcome.action, VehicleAction::Updated);
        assert_eq!(outcome.attributes, WriteStatus::Written);
        assert_eq!(outcome.accessories, WriteStatus::Skipped);
        assert_eq!(outcome.images, WriteStatus::Skipped);

        let after = f.store.find_by_external_id(42).await.unwrap().unwrap();
        assert_eq!(after.attributes.price, 9500.0);
        assert_eq!(after.vehicle_id, stored.vehicle_id);
        assert_eq!(after.artifact_reference, None);
    }

    #[tokio::test]
    async fn test_each_mutation_kind_invalidates_reference() {
        let f = fixture();
        run(&f, vec![feed_vehicle(1, "A")]).await;
        let id = f.store.find_by_external_id(1).await.unwrap().unwrap().vehicle_id;

        let mut accessories_changed = feed_vehicle(1, "A");
        accessories_changed.accessories.insert("Bau".into());
        let mut images_changed = accessories_changed.clone();
        images_changed.images[0].url = "https://img.example/new.jpg".into();

        for next in [accessories_changed, images_changed] {
            f.store.set_artifact_reference(id, Some("ref")).await.unwrap();
            let report = run(&f, vec![next]).await;
            assert_eq!(report.updated(), 1);
            let stored = f.store.find_by_external_id(1).await.unwrap().unwrap();
            assert_eq!(stored.artifact_reference, None);
        }
    }

    #[tokio::test]
    async fn test_unchanged_vehicle_keeps_reference() {
        let f = fixture();
        run(&f, vec![feed_vehicle(1, "A")]).await;
        let id = f.store.find_by_external_id(1).await.unwrap().unwrap().vehicle_id;
        f.store.set_artifact_reference(id, Some("ref")).await.unwrap();

        run(&f, vec![feed_vehicle(1, "A")]).await;
        let stored = f.store.find_by_external_id(1).await.unwrap().unwrap();
        assert_eq!(stored.artifact_reference.as_deref(), Some("ref"));
    }

    #[tokio::test]
    async fn test_title_rename_removes_old_archive() {
        let f = fixture();
        run(&f, vec![feed_vehicle(1, "Model A")]).await;
        f.objects.put("Model_A_images.zip", b"zip");

        let report = run(&f, vec![feed_vehicle(1, "Model A Turbo")]).await;
        assert_eq!(report.vehicles[0].archive_cleanup, WriteStatus::Written);
        assert_eq!(f.objects.deletes(), vec!["Model_A_images.zip"]);
    }

    #[tokio::test]
    async fn test_image_change_retires_current_archive() {
        let f = fixture();
        run(&f, vec![feed_vehicle(1, "Model A")]).await;
        f.objects.put("Model_A_images.zip", b"zip");

        let mut accessories_changed = feed_vehicle(1, "Model A");
        accessories_changed.accessories.insert("Bau".into());
        run(&f, vec![accessories_changed.clone()]).await;
        assert!(f.objects.contains("Model_A_images.zip"));

        let mut images_changed = accessories_changed;
        images_changed.images[0].url = "https://img.example/new.jpg".into();
        let report = run(&f, vec![images_changed]).await;

        assert_eq!(report.vehicles[0].archive_cleanup, WriteStatus::Written);
        assert!(!f.objects.contains("Model_A_images.zip"));
    }

    #[tokio::test]
    async fn test_failed_insert_does_not_stop_other_vehicles() {
        let f = flaky_fixture();
        f.store.fail_insert(1);

        let report = f
            .run(vec![feed_vehicle(1, "Model A"), feed_vehicle(2, "Model B")])
            .await;

        assert_eq!(report.inserted(), 1);
        assert_eq!(report.failed(), 1);
        let failed = outcome_for(&report, 1);
        assert_eq!(failed.action, VehicleAction::Failed);
        assert!(matches!(
            &failed.error,
            Some(failure) if failure.kind == FailureKind::Persistence
        ));
        assert!(f.store.find_by_external_id(1).await.unwrap().is_none());
        assert!(f.store.find_by_external_id(2).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_attribute_write_abandons_vehicle() {
        let f = flaky_fixture();
        f.run(vec![feed_vehicle(1, "Model A")]).await;
        let id = f.vehicle_id(1).await;
        f.store.fail_write(StoreWrite::Attributes, id);

        let mut changed = feed_vehicle(1, "Model A");
        changed.attributes.price = 9500.0;
        changed.accessories.insert("Bau".into());
        let report = f.run(vec![changed]).await;

        let outcome = outcome_for(&report, 1);
        assert_eq!(outcome.action, VehicleAction::Failed);
        assert!(outcome.attributes.is_failed());
        assert_eq!(outcome.accessories, WriteStatus::Skipped);
        assert_eq!(outcome.images, WriteStatus::Skipped);
        let stored = f.store.find_by_external_id(1).await.unwrap().unwrap();
        assert_eq!(stored.attributes.price, 10000.0);
        assert!(!stored.accessories.contains("Bau"));
    }

    #[tokio::test]
    async fn test_failed_accessory_write_still_writes_images() {
        let f = flaky_fixture();
        f.run(vec![feed_vehicle(1, "Model A")]).await;
        let id = f.vehicle_id(1).await;
        f.store.fail_write(StoreWrite::Accessories, id);

        let mut changed = feed_vehicle(1, "Model A");
        changed.accessories.insert("Bau".into());
        changed.images[0].url = "https://img.example/new.jpg".into();
        let report = f.run(vec![changed.clone()]).await;

        let outcome = outcome_for(&report, 1);
        assert_eq!(outcome.action, VehicleAction::Updated);
        assert!(outcome.accessories.is_failed());
        assert_eq!(outcome.images, WriteStatus::Written);
        assert!(outcome.has_failure());
        assert_eq!(report.failed(), 1);
        let stored = f.store.find_by_external_id(1).await.unwrap().unwrap();
        assert_eq!(stored.images, changed.images);
        assert!(!stored.accessories.contains("Bau"));
    }

    #[tokio::test]
    async fn test_failed_image_write_keeps_published_archive() {
        let f = flaky_fixture();
        f.run(vec![feed_vehicle(1, "Model A")]).await;
        let id = f.vehicle_id(1).await;
        f.objects.put("Model_A_images.zip", b"zip");
        f.store
            .set_artifact_reference(id, Some("memory://vehicle_images/Model_A_images.zip"))
            .await
            .unwrap();
        f.store.fail_write(StoreWrite::Images, id);

        let mut changed = feed_vehicle(1, "Model A");
        changed.images[0].url = "https://img.example/new.jpg".into();
        let report = f.run(vec![changed]).await;

        let outcome = outcome_for(&report, 1);
        assert!(outcome.images.is_failed());
        assert_eq!(outcome.archive_cleanup, WriteStatus::Skipped);
        assert!(f.objects.contains("Model_A_images.zip"));
        assert!(f.objects.deletes().is_empty());
        let stored = f.store.find_by_external_id(1).await.unwrap().unwrap();
        assert_eq!(
            stored.artifact_reference.as_deref(),
            Some("memory://vehicle_images/Model_A_images.zip")
        );
    }

    #[tokio::test]
    async fn test_duplicates_collapsed_last_wins() {
        let f = fixture();
        let mut last = feed_vehicle(42, "Model A");
        last.attributes.price = 1.0;
        let report = run(&f, vec![feed_vehicle(42, "Model A"), last]).await;

        assert_eq!(report.duplicates, vec![42]);
        assert_eq!(report.vehicles.len(), 1);
        let stored = f.store.find_by_external_id(42).await.unwrap().unwrap();
        assert_eq!(stored.attributes.price, 1.0);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let f = fixture_with(ArchiveNaming::Title, true);
        let report = run(&f, vec![feed_vehicle(42, "Model A")]).await;

        assert!(report.dry_run);
        assert_eq!(report.vehicles[0].action, VehicleAction::Inserted);
        assert_eq!(report.vehicles[0].attributes, WriteStatus::Skipped);
        assert!(f.store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_plans_deletions_without_deleting() {
        let live = fixture();
        run(&live, vec![feed_vehicle(42, "Model A")]).await;
        let dry = Reconciler::new(
            live.store.clone(),
            live.objects.clone(),
            ReconcileSettings {
                naming: ArchiveNaming::Title,
                workers: 1,
                dry_run: true,
            },
        );

        let report = dry
            .reconcile(Vec::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.deletions.len(), 1);
        assert_eq!(report.deletions[0].row, WriteStatus::Skipped);
        assert!(live.store.find_by_external_id(42).await.unwrap().is_some());
        assert!(live.objects.deletes().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_run_skips_work_and_deletions() {
        let f = fixture();
        run(&f, vec![feed_vehicle(1, "A")]).await;

        let token = CancellationToken::new();
        token.cancel();
        let report = f
            .reconciler
            .reconcile(vec![feed_vehicle(2, "B")], &token)
            .await
            .unwrap();

        assert!(report.interrupted);
        assert!(report.vehicles.is_empty());
        assert!(report.deletions.is_empty());
        assert!(f.store.find_by_external_id(1).await.unwrap().is_some());
    }
}
