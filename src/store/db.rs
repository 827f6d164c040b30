//! Vehicle store trait and SQLite implementation.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{Local, TimeZone, Utc};
use rusqlite::types::ToSql;
use rusqlite::{Connection, OptionalExtension, Row};

use super::error::StoreError;
use super::schema;
use super::types::{StoreSummary, SyncRunStats};
use crate::vehicle::{
    ExternalId, FeedVehicle, ImageEntry, StoredVehicle, VehicleAttributes, VehicleId,
    VehicleSummary,
};

/// Trait for persistent vehicle storage.
///
/// Object-safe so it can be shared as `Arc<dyn VehicleStore>` across the
/// reconcile and archive worker pools.
#[async_trait]
pub trait VehicleStore: Send + Sync {
    /// Look up one vehicle with its accessories and images.
    async fn find_by_external_id(
        &self,
        external_id: ExternalId,
    ) -> Result<Option<StoredVehicle>, StoreError>;

    /// Insert a new vehicle with all of its associations. The artifact
    /// reference starts absent.
    async fn insert_vehicle(
        &self,
        vehicle_id: VehicleId,
        vehicle: &FeedVehicle,
    ) -> Result<(), StoreError>;

    /// Overwrite the attribute set and clear the artifact reference.
    async fn update_attributes(
        &self,
        vehicle_id: VehicleId,
        attributes: &VehicleAttributes,
    ) -> Result<(), StoreError>;

    /// Replace the accessory set and clear the artifact reference.
    async fn replace_accessories(
        &self,
        vehicle_id: VehicleId,
        accessories: &BTreeSet<String>,
    ) -> Result<(), StoreError>;

    /// Replace the image list and clear the artifact reference.
    async fn replace_images(
        &self,
        vehicle_id: VehicleId,
        images: &[ImageEntry],
    ) -> Result<(), StoreError>;

    /// Delete a vehicle together with its accessories and images.
    async fn delete_vehicle(&self, vehicle_id: VehicleId) -> Result<(), StoreError>;

    /// List every stored vehicle, ordered by external id.
    async fn list_all(&self) -> Result<Vec<VehicleSummary>, StoreError>;

    /// Primary image URLs of a vehicle in position order.
    async fn image_urls(&self, vehicle_id: VehicleId) -> Result<Vec<String>, StoreError>;

    async fn set_artifact_reference(
        &self,
        vehicle_id: VehicleId,
        reference: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Start a new sync run and return its ID.
    async fn start_sync_run(&self) -> Result<i64, StoreError>;

    /// Complete a sync run with statistics.
    async fn complete_sync_run(&self, run_id: i64, stats: &SyncRunStats)
        -> Result<(), StoreError>;

    async fn get_summary(&self) -> Result<StoreSummary, StoreError>;
}

/// SQLite implementation of the vehicle store.
pub struct SqliteVehicleStore {
    /// Wrapped in Mutex because rusqlite::Connection is not Sync. Guards are
    /// never held across an await point.
    conn: Mutex<Connection>,
    /// Path to the database file (for error messages).
    path: PathBuf,
}

impl std::fmt::Debug for SqliteVehicleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteVehicleStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn configure(conn: &Connection) -> Result<(), StoreError> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    schema::migrate(conn)
}

impl SqliteVehicleStore {
    /// Open or create a database at the given path.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let path = path.to_path_buf();
        let path_clone = path.clone();

        let conn = tokio::task::spawn_blocking(move || {
            if let Some(parent) = path_clone.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| StoreError::CreateDir {
                        path: parent.to_path_buf(),
                        source: e,
                    })?;
                }
            }

            let conn = Connection::open(&path_clone).map_err(|e| StoreError::Open {
                path: path_clone.clone(),
                source: e,
            })?;

            // WAL keeps the status command readable while a sync is writing
            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(StoreError::Migration)?;
            conn.pragma_update(None, "synchronous", "NORMAL")
                .map_err(StoreError::Migration)?;

            configure(&conn)?;
            Ok::<_, StoreError>(conn)
        })
        .await??;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Open an in-memory database (for testing).
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        configure(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Query(e.to_string()))
    }

    /// Row counts of the association tables for one vehicle (for tests).
    #[cfg(test)]
    pub fn association_counts(&self, vehicle_id: VehicleId) -> (i64, i64) {
        let conn = self.lock().unwrap();
        let id = vehicle_id.to_string();
        let accessories: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM vehicle_accessories WHERE vehicle_id = ?1",
                [&id],
                |row| row.get(0),
            )
            .unwrap();
        let images: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM vehicle_images WHERE vehicle_id = ?1",
                [&id],
                |row| row.get(0),
            )
            .unwrap();
        (accessories, images)
    }
}

const ATTRIBUTE_COLUMNS: &str = "title, category, description, make, model, base_model, \
    year, manufacture_year, condition, mileage, fuel_type, transmission, engine, plate, \
    chassis, doors, color, price, promotion_price, horsepower, body_type, fipe_code, fipe_value";

/// Named parameters for every attribute column, shared by insert and update.
fn attribute_params(a: &VehicleAttributes) -> Vec<(&'static str, &dyn ToSql)> {
    let params: [(&'static str, &dyn ToSql); 23] = [
        (":title", &a.title),
        (":category", &a.category),
        (":description", &a.description),
        (":make", &a.make),
        (":model", &a.model),
        (":base_model", &a.base_model),
        (":year", &a.year),
        (":manufacture_year", &a.manufacture_year),
        (":condition", &a.condition),
        (":mileage", &a.mileage),
        (":fuel_type", &a.fuel_type),
        (":transmission", &a.transmission),
        (":engine", &a.engine),
        (":plate", &a.plate),
        (":chassis", &a.chassis),
        (":doors", &a.doors),
        (":color", &a.color),
        (":price", &a.price),
        (":promotion_price", &a.promotion_price),
        (":horsepower", &a.horsepower),
        (":body_type", &a.body_type),
        (":fipe_code", &a.fipe_code),
        (":fipe_value", &a.fipe_value),
    ];
    params.to_vec()
}

fn row_to_attributes(row: &Row<'_>) -> rusqlite::Result<VehicleAttributes> {
    Ok(VehicleAttributes {
        title: row.get("title")?,
        category: row.get("category")?,
        description: row.get("description")?,
        make: row.get("make")?,
        model: row.get("model")?,
        base_model: row.get("base_model")?,
        year: row.get("year")?,
        manufacture_year: row.get("manufacture_year")?,
        condition: row.get("condition")?,
        mileage: row.get("mileage")?,
        fuel_type: row.get("fuel_type")?,
        transmission: row.get("transmission")?,
        engine: row.get("engine")?,
        plate: row.get("plate")?,
        chassis: row.get("chassis")?,
        doors: row.get("doors")?,
        color: row.get("color")?,
        price: row.get("price")?,
        promotion_price: row.get("promotion_price")?,
        horsepower: row.get("horsepower")?,
        body_type: row.get("body_type")?,
        fipe_code: row.get("fipe_code")?,
        fipe_value: row.get("fipe_value")?,
    })
}

fn parse_vehicle_id(raw: &str) -> Result<VehicleId, StoreError> {
    VehicleId::parse(raw).ok_or_else(|| StoreError::InvalidRow(format!("bad vehicle_id {raw:?}")))
}

fn insert_accessories(
    conn: &Connection,
    vehicle_id: &str,
    accessories: &BTreeSet<String>,
) -> Result<(), StoreError> {
    let mut stmt = conn
        .prepare_cached("INSERT INTO vehicle_accessories (vehicle_id, accessory) VALUES (?1, ?2)")
        .map_err(StoreError::query)?;
    for accessory in accessories {
        stmt.execute(rusqlite::params![vehicle_id, accessory])
            .map_err(StoreError::query)?;
    }
    Ok(())
}

fn insert_images(
    conn: &Connection,
    vehicle_id: &str,
    images: &[ImageEntry],
) -> Result<(), StoreError> {
    let mut stmt = conn
        .prepare_cached(
            "INSERT INTO vehicle_images (vehicle_id, position, image_url, image_url_large) VALUES (?1, ?2, ?3, ?4)",
        )
        .map_err(StoreError::query)?;
    for image in images {
        stmt.execute(rusqlite::params![
            vehicle_id,
            image.position,
            image.url,
            image.large_url
        ])
        .map_err(StoreError::query)?;
    }
    Ok(())
}

/// Clear the artifact reference, failing if the vehicle is gone.
fn invalidate_artifact(conn: &Connection, vehicle_id: &str) -> Result<(), StoreError> {
    let rows = conn
        .execute(
            "UPDATE vehicles SET download = NULL WHERE vehicle_id = ?1",
            [vehicle_id],
        )
        .map_err(StoreError::query)?;
    if rows == 0 {
        return Err(StoreError::VehicleNotFound(vehicle_id.to_string()));
    }
    Ok(())
}

fn count(conn: &Connection, sql: &str) -> Result<u64, StoreError> {
    let n: i64 = conn
        .query_row(sql, [], |row| row.get(0))
        .map_err(StoreError::query)?;
    Ok(n as u64)
}

#[async_trait]
impl VehicleStore for SqliteVehicleStore {
    async fn find_by_external_id(
        &self,
        external_id: ExternalId,
    ) -> Result<Option<StoredVehicle>, StoreError> {
        let conn = self.lock()?;

        let found = conn
            .query_row(
                &format!(
                    "SELECT vehicle_id, download, {} FROM vehicles WHERE external_id = ?1",
                    ATTRIBUTE_COLUMNS
                ),
                [external_id],
                |row| {
                    Ok((
                        row.get::<_, String>("vehicle_id")?,
                        row.get::<_, Option<String>>("download")?,
                        row_to_attributes(row)?,
                    ))
                },
            )
            .optional()
            .map_err(StoreError::query)?;

        let Some((raw_id, artifact_reference, attributes)) = found else {
            return Ok(None);
        };

        let accessories = conn
            .prepare_cached("SELECT accessory FROM vehicle_accessories WHERE vehicle_id = ?1")
            .map_err(StoreError::query)?
            .query_map([&raw_id], |row| row.get::<_, String>(0))
            .map_err(StoreError::query)?
            .collect::<Result<BTreeSet<_>, _>>()
            .map_err(StoreError::query)?;

        let images = conn
            .prepare_cached(
                "SELECT position, image_url, image_url_large FROM vehicle_images WHERE vehicle_id = ?1 ORDER BY position",
            )
            .map_err(StoreError::query)?
            .query_map([&raw_id], |row| {
                Ok(ImageEntry {
                    position: row.get(0)?,
                    url: row.get(1)?,
                    large_url: row.get(2)?,
                })
            })
            .map_err(StoreError::query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::query)?;

        Ok(Some(StoredVehicle {
            vehicle_id: parse_vehicle_id(&raw_id)?,
            external_id,
            attributes,
            accessories,
            images,
            artifact_reference,
        }))
    }

    async fn insert_vehicle(
        &self,
        vehicle_id: VehicleId,
        vehicle: &FeedVehicle,
    ) -> Result<(), StoreError> {
        let id = vehicle_id.to_string();
        let date_added = Local::now().format("%Y-%m-%d").to_string();

        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(StoreError::query)?;

        let mut params = attribute_params(&vehicle.attributes);
        params.push((":vehicle_id", &id));
        params.push((":external_id", &vehicle.external_id));
        params.push((":date_added", &date_added));
        tx.execute(
            &format!(
                "INSERT INTO vehicles (vehicle_id, external_id, date_added, download, {}) \
                 VALUES (:vehicle_id, :external_id, :date_added, NULL, :title, :category, \
                 :description, :make, :model, :base_model, :year, :manufacture_year, :condition, \
                 :mileage, :fuel_type, :transmission, :engine, :plate, :chassis, :doors, :color, \
                 :price, :promotion_price, :horsepower, :body_type, :fipe_code, :fipe_value)",
                ATTRIBUTE_COLUMNS
            ),
            params.as_slice(),
        )
        .map_err(StoreError::query)?;

        insert_accessories(&tx, &id, &vehicle.accessories)?;
        insert_images(&tx, &id, &vehicle.images)?;

        tx.commit().map_err(StoreError::query)
    }

    async fn update_attributes(
        &self,
        vehicle_id: VehicleId,
        attributes: &VehicleAttributes,
    ) -> Result<(), StoreError> {
        let id = vehicle_id.to_string();
        let conn = self.lock()?;

        let mut params = attribute_params(attributes);
        params.push((":vehicle_id", &id));
        let rows = conn
            .execute(
                "UPDATE vehicles SET title = :title, category = :category, \
                 description = :description, make = :make, model = :model, \
                 base_model = :base_model, year = :year, manufacture_year = :manufacture_year, \
                 condition = :condition, mileage = :mileage, fuel_type = :fuel_type, \
                 transmission = :transmission, engine = :engine, plate = :plate, \
                 chassis = :chassis, doors = :doors, color = :color, price = :price, \
                 promotion_price = :promotion_price, horsepower = :horsepower, \
                 body_type = :body_type, fipe_code = :fipe_code, fipe_value = :fipe_value, \
                 download = NULL \
                 WHERE vehicle_id = :vehicle_id",
                params.as_slice(),
            )
            .map_err(StoreError::query)?;

        if rows == 0 {
            return Err(StoreError::VehicleNotFound(id));
        }
        Ok(())
    }

    async fn replace_accessories(
        &self,
        vehicle_id: VehicleId,
        accessories: &BTreeSet<String>,
    ) -> Result<(), StoreError> {
        let id = vehicle_id.to_string();
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(StoreError::query)?;

        invalidate_artifact(&tx, &id)?;
        tx.execute(
            "DELETE FROM vehicle_accessories WHERE vehicle_id = ?1",
            [&id],
        )
        .map_err(StoreError::query)?;
        insert_accessories(&tx, &id, accessories)?;

        tx.commit().map_err(StoreError::query)
    }

    async fn replace_images(
        &self,
        vehicle_id: VehicleId,
        images: &[ImageEntry],
    ) -> Result<(), StoreError> {
        let id = vehicle_id.to_string();
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(StoreError::query)?;

        invalidate_artifact(&tx, &id)?;
        tx.execute("DELETE FROM vehicle_images WHERE vehicle_id = ?1", [&id])
            .map_err(StoreError::query)?;
        insert_images(&tx, &id, images)?;

        tx.commit().map_err(StoreError::query)
    }

    async fn delete_vehicle(&self, vehicle_id: VehicleId) -> Result<(), StoreError> {
        let id = vehicle_id.to_string();
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(StoreError::query)?;

        tx.execute(
            "DELETE FROM vehicle_accessories WHERE vehicle_id = ?1",
            [&id],
        )
        .map_err(StoreError::query)?;
        tx.execute("DELETE FROM vehicle_images WHERE vehicle_id = ?1", [&id])
            .map_err(StoreError::query)?;
        let rows = tx
            .execute("DELETE FROM vehicles WHERE vehicle_id = ?1", [&id])
            .map_err(StoreError::query)?;
        if rows == 0 {
            return Err(StoreError::VehicleNotFound(id));
        }

        tx.commit().map_err(StoreError::query)
    }

    async fn list_all(&self) -> Result<Vec<VehicleSummary>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare_cached(
                "SELECT external_id, vehicle_id, title, download FROM vehicles ORDER BY external_id",
            )
            .map_err(StoreError::query)?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })
            .map_err(StoreError::query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::query)?;

        rows.into_iter()
            .map(|(external_id, raw_id, title, artifact_reference)| {
                Ok(VehicleSummary {
                    external_id,
                    vehicle_id: parse_vehicle_id(&raw_id)?,
                    title,
                    artifact_reference,
                })
            })
            .collect()
    }

    async fn image_urls(&self, vehicle_id: VehicleId) -> Result<Vec<String>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare_cached(
                "SELECT image_url FROM vehicle_images WHERE vehicle_id = ?1 ORDER BY position",
            )
            .map_err(StoreError::query)?;

        let urls = stmt
            .query_map([vehicle_id.to_string()], |row| row.get::<_, String>(0))
            .map_err(StoreError::query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::query)?;
        Ok(urls)
    }

    async fn set_artifact_reference(
        &self,
        vehicle_id: VehicleId,
        reference: Option<&str>,
    ) -> Result<(), StoreError> {
        let id = vehicle_id.to_string();
        let conn = self.lock()?;
        let rows = conn
            .execute(
                "UPDATE vehicles SET download = ?1 WHERE vehicle_id = ?2",
                rusqlite::params![reference, &id],
            )
            .map_err(StoreError::query)?;
        if rows == 0 {
            return Err(StoreError::VehicleNotFound(id));
        }
        Ok(())
    }

    async fn start_sync_run(&self) -> Result<i64, StoreError> {
        let started_at = Utc::now().timestamp();
        let conn = self.lock()?;

        conn.execute(
            "INSERT INTO sync_runs (started_at) VALUES (?1)",
            [started_at],
        )
        .map_err(StoreError::query)?;

        Ok(conn.last_insert_rowid())
    }

    async fn complete_sync_run(
        &self,
        run_id: i64,
        stats: &SyncRunStats,
    ) -> Result<(), StoreError> {
        let completed_at = Utc::now().timestamp();
        let conn = self.lock()?;

        conn.execute(
            "UPDATE sync_runs SET completed_at = ?1, inserted = ?2, updated = ?3, unchanged = ?4, \
             deleted = ?5, failed = ?6, archives_built = ?7, interrupted = ?8 WHERE id = ?9",
            rusqlite::params![
                completed_at,
                stats.inserted as i64,
                stats.updated as i64,
                stats.unchanged as i64,
                stats.deleted as i64,
                stats.failed as i64,
                stats.archives_built as i64,
                stats.interrupted,
                run_id
            ],
        )
        .map_err(StoreError::query)?;

        Ok(())
    }

    async fn get_summary(&self) -> Result<StoreSummary, StoreError> {
        let conn = self.lock()?;

        let vehicles = count(&conn, "SELECT COUNT(*) FROM vehicles")?;
        let with_archive = count(
            &conn,
            "SELECT COUNT(*) FROM vehicles WHERE download IS NOT NULL",
        )?;
        let accessories = count(&conn, "SELECT COUNT(*) FROM vehicle_accessories")?;
        let images = count(&conn, "SELECT COUNT(*) FROM vehicle_images")?;

        let last_started: Option<i64> = conn
            .query_row(
                "SELECT started_at FROM sync_runs ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::query)?;

        let last_completed: Option<(i64, SyncRunStats)> = conn
            .query_row(
                "SELECT completed_at, inserted, updated, unchanged, deleted, failed, \
                 archives_built, interrupted FROM sync_runs \
                 WHERE completed_at IS NOT NULL ORDER BY id DESC LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get(0)?,
                        SyncRunStats {
                            inserted: row.get::<_, i64>(1)? as u64,
                            updated: row.get::<_, i64>(2)? as u64,
                            unchanged: row.get::<_, i64>(3)? as u64,
                            deleted: row.get::<_, i64>(4)? as u64,
                            failed: row.get::<_, i64>(5)? as u64,
                            archives_built: row.get::<_, i64>(6)? as u64,
                            interrupted: row.get(7)?,
                        },
                    ))
                },
            )
            .optional()
            .map_err(StoreError::query)?;

        let (last_sync_completed, last_run) = match last_completed {
            Some((ts, stats)) => (Utc.timestamp_opt(ts, 0).single(), Some(stats)),
            None => (None, None),
        };

        Ok(StoreSummary {
            vehicles,
            with_archive,
            accessories,
            images,
            last_sync_started: last_started.and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
            last_sync_completed,
            last_run,
        })
    }
}
