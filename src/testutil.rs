//! In-process fakes and fixtures shared by unit tests.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::archive::{ArchiveBuilder, ArchiveError};
use crate::feed::{xml, FeedError, FeedNode, FeedReader};
use crate::storage::{ObjectStore, StorageError};
use crate::store::{SqliteVehicleStore, StoreError, StoreSummary, SyncRunStats, VehicleStore};
use crate::vehicle::{
    ExternalId, FeedVehicle, ImageEntry, StoredVehicle, VehicleAttributes, VehicleId,
    VehicleSummary,
};

/// A normalized vehicle with two accessories and one image.
pub fn feed_vehicle(external_id: i64, title: &str) -> FeedVehicle {
    FeedVehicle {
        external_id,
        attributes: VehicleAttributes {
            title: title.to_string(),
            category: "Carro".to_string(),
            make: "Fiat".to_string(),
            year: 2020,
            doors: Some(4),
            price: 10000.0,
            ..VehicleAttributes::default()
        },
        accessories: ["ABS", "Air bag"].into_iter().map(String::from).collect(),
        images: vec![ImageEntry {
            position: 0,
            url: format!("https://img.example/{}/1.jpg", external_id),
            large_url: Some(format!("https://img.example/{}/1L.jpg", external_id)),
        }],
    }
}

/// One `<AD>` record with two accessories and one image.
pub fn ad(id: i64, title: &str, price: &str) -> String {
    format!(
        "<AD><ID>{id}</ID><TITLE>{title}</TITLE><CATEGORY>Carro</CATEGORY>\
         <MAKE>Fiat</MAKE><YEAR>2020</YEAR><DOORS>4</DOORS><PRICE>{price}</PRICE>\
         <ACCESSORIES>ABS, Air bag</ACCESSORIES>\
         <IMAGES><IMAGE_URL>https://img.example/{id}/1.jpg</IMAGE_URL></IMAGES>\
         <IMAGES_LARGE><IMAGE_URL_LARGE>https://img.example/{id}/1L.jpg</IMAGE_URL_LARGE></IMAGES_LARGE></AD>"
    )
}

pub fn feed_document(ads: &[String]) -> String {
    format!("<?xml version=\"1.0\"?><ADS>{}</ADS>", ads.concat())
}

/// Feed reader serving a fixed document, or failing like an unavailable
/// upstream when built with [`StaticFeedReader::unavailable`].
pub struct StaticFeedReader {
    document: Mutex<Option<String>>,
}

impl StaticFeedReader {
    pub fn new(document: String) -> Self {
        Self {
            document: Mutex::new(Some(document)),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            document: Mutex::new(None),
        }
    }

    pub fn set_document(&self, document: String) {
        *self.document.lock().unwrap() = Some(document);
    }
}

#[async_trait]
impl FeedReader for StaticFeedReader {
    async fn fetch(&self) -> Result<Vec<FeedNode>, FeedError> {
        let document = self.document.lock().unwrap().clone();
        match document {
            Some(doc) => xml::extract_records(xml::parse_document(doc.as_bytes())?),
            None => Err(FeedError::HttpStatus {
                status: 503,
                url: "https://feed.example/ads.xml".to_string(),
            }),
        }
    }
}

/// Object store keeping objects in memory and recording every mutation.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    uploads: Mutex<Vec<String>>,
    deletes: Mutex<Vec<String>>,
    fail_writes: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, name: &str, bytes: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(name.to_string(), bytes.to_vec());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.objects.lock().unwrap().contains_key(name)
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }

    /// Make subsequent uploads and deletes fail with a server error.
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    fn check_writable(&self, op: &'static str, name: &str) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::HttpStatus {
                op,
                name: name.to_string(),
                status: 500,
                body: "unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn exists(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.contains(name))
    }

    async fn upload(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.check_writable("upload", name)?;
        self.uploads.lock().unwrap().push(name.to_string());
        self.put(name, bytes);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), StorageError> {
        self.check_writable("delete", name)?;
        self.deletes.lock().unwrap().push(name.to_string());
        self.objects.lock().unwrap().remove(name);
        Ok(())
    }

    fn public_reference(&self, name: &str) -> String {
        format!("memory://vehicle_images/{}", name)
    }
}

/// Archive builder that returns deterministic bytes without any I/O.
#[derive(Default)]
pub struct StaticArchiveBuilder {
    calls: Mutex<Vec<(String, Vec<String>)>>,
    fail: AtomicBool,
}

impl StaticArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every build fails as if no image could be downloaded.
    pub fn failing() -> Self {
        let builder = Self::default();
        builder.fail.store(true, Ordering::SeqCst);
        builder
    }

    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArchiveBuilder for StaticArchiveBuilder {
    async fn build(&self, label: &str, urls: &[String]) -> Result<Vec<u8>, ArchiveError> {
        self.calls
            .lock()
            .unwrap()
            .push((label.to_string(), urls.to_vec()));
        if self.fail.load(Ordering::SeqCst) {
            return Err(ArchiveError::NoImages {
                label: label.to_string(),
                attempted: urls.len(),
            });
        }
        Ok(format!("zip:{}:{}", label, urls.len()).into_bytes())
    }
}

/// A vehicle write that [`FlakyVehicleStore`] can be told to reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreWrite {
    Insert,
    Attributes,
    Accessories,
    Images,
}

/// SQLite store that rejects chosen writes for chosen vehicles and passes
/// everything else through.
pub struct FlakyVehicleStore {
    inner: Arc<SqliteVehicleStore>,
    failing_inserts: Mutex<HashSet<ExternalId>>,
    failing_writes: Mutex<HashSet<(StoreWrite, VehicleId)>>,
}

impl FlakyVehicleStore {
    pub fn new(inner: Arc<SqliteVehicleStore>) -> Self {
        Self {
            inner,
            failing_inserts: Mutex::new(HashSet::new()),
            failing_writes: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_insert(&self, external_id: ExternalId) {
        self.failing_inserts.lock().unwrap().insert(external_id);
    }

    /// Reject `write` for an existing vehicle. Use [`Self::fail_insert`] for
    /// inserts.
    pub fn fail_write(&self, write: StoreWrite, vehicle_id: VehicleId) {
        self.failing_writes
            .lock()
            .unwrap()
            .insert((write, vehicle_id));
    }

    fn check(&self, write: StoreWrite, vehicle_id: VehicleId) -> Result<(), StoreError> {
        if self.failing_writes.lock().unwrap().contains(&(write, vehicle_id)) {
            return Err(StoreError::Query("database is locked".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl VehicleStore for FlakyVehicleStore {
    async fn find_by_external_id(
        &self,
        external_id: ExternalId,
    ) -> Result<Option<StoredVehicle>, StoreError> {
        self.inner.find_by_external_id(external_id).await
    }

    async fn insert_vehicle(
        &self,
        vehicle_id: VehicleId,
        vehicle: &FeedVehicle,
    ) -> Result<(), StoreError> {
        if self
            .failing_inserts
            .lock()
            .unwrap()
            .contains(&vehicle.external_id)
        {
            return Err(StoreError::Query("database is locked".to_string()));
        }
        self.inner.insert_vehicle(vehicle_id, vehicle).await
    }

    async fn update_attributes(
        &self,
        vehicle_id: VehicleId,
        attributes: &VehicleAttributes,
    ) -> Result<(), StoreError> {
        self.check(StoreWrite::Attributes, vehicle_id)?;
        self.inner.update_attributes(vehicle_id, attributes).await
    }

    async fn replace_accessories(
        &self,
        vehicle_id: VehicleId,
        accessories: &BTreeSet<String>,
    ) -> Result<(), StoreError> {
        self.check(StoreWrite::Accessories, vehicle_id)?;
        self.inner.replace_accessories(vehicle_id, accessories).await
    }

    async fn replace_images(
        &self,
        vehicle_id: VehicleId,
        images: &[ImageEntry],
    ) -> Result<(), StoreError> {
        self.check(StoreWrite::Images, vehicle_id)?;
        self.inner.replace_images(vehicle_id, images).await
    }

    async fn delete_vehicle(&self, vehicle_id: VehicleId) -> Result<(), StoreError> {
        self.inner.delete_vehicle(vehicle_id).await
    }

    async fn list_all(&self) -> Result<Vec<VehicleSummary>, StoreError> {
        self.inner.list_all().await
    }

    async fn image_urls(&self, vehicle_id: VehicleId) -> Result<Vec<String>, StoreError> {
        self.inner.image_urls(vehicle_id).await
    }

    async fn set_artifact_reference(
        &self,
        vehicle_id: VehicleId,
        reference: Option<&str>,
    ) -> Result<(), StoreError> {
        self.inner.set_artifact_reference(vehicle_id, reference).await
    }

    async fn start_sync_run(&self) -> Result<i64, StoreError> {
        self.inner.start_sync_run().await
    }

    async fn complete_sync_run(
        &self,
        run_id: i64,
        stats: &SyncRunStats,
    ) -> Result<(), StoreError> {
        self.inner.complete_sync_run(run_id, stats).await
    }

    async fn get_summary(&self) -> Result<StoreSummary, StoreError> {
        self.inner.get_summary().await
    }
}
