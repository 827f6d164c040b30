//! Database schema definitions and migrations.

use rusqlite::Connection;

use super::error::StoreError;

/// Current schema version. Increment when making schema changes.
pub const SCHEMA_VERSION: i32 = 1;

/// Schema DDL for version 1.
const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS vehicles (
    vehicle_id TEXT PRIMARY KEY,
    external_id INTEGER NOT NULL UNIQUE,
    title TEXT NOT NULL,
    category TEXT NOT NULL,
    description TEXT NOT NULL,
    make TEXT NOT NULL,
    model TEXT NOT NULL,
    base_model TEXT NOT NULL,
    year INTEGER NOT NULL,
    manufacture_year INTEGER NOT NULL,
    condition TEXT NOT NULL,
    mileage INTEGER NOT NULL,
    fuel_type TEXT NOT NULL,
    transmission TEXT NOT NULL,
    engine TEXT NOT NULL,
    plate TEXT NOT NULL,
    chassis TEXT NOT NULL,
    doors INTEGER,
    color TEXT NOT NULL,
    price REAL NOT NULL,
    promotion_price REAL NOT NULL,
    horsepower INTEGER NOT NULL,
    body_type TEXT NOT NULL,
    fipe_code TEXT NOT NULL,
    fipe_value REAL NOT NULL,
    date_added TEXT NOT NULL,
    download TEXT
);

CREATE TABLE IF NOT EXISTS vehicle_accessories (
    vehicle_id TEXT NOT NULL REFERENCES vehicles(vehicle_id) ON DELETE CASCADE,
    accessory TEXT NOT NULL,
    PRIMARY KEY (vehicle_id, accessory)
);

CREATE TABLE IF NOT EXISTS vehicle_images (
    vehicle_id TEXT NOT NULL REFERENCES vehicles(vehicle_id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    image_url TEXT NOT NULL,
    image_url_large TEXT,
    PRIMARY KEY (vehicle_id, position)
);

CREATE INDEX IF NOT EXISTS idx_vehicles_download ON vehicles(download);

CREATE TABLE IF NOT EXISTS sync_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at INTEGER NOT NULL,
    completed_at INTEGER,
    inserted INTEGER DEFAULT 0,
    updated INTEGER DEFAULT 0,
    unchanged INTEGER DEFAULT 0,
    deleted INTEGER DEFAULT 0,
    failed INTEGER DEFAULT 0,
    archives_built INTEGER DEFAULT 0,
    interrupted INTEGER DEFAULT 0
);
"#;

/// Get the current schema version from the database.
pub(crate) fn get_schema_version(conn: &Connection) -> Result<i32, StoreError> {
    let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), StoreError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

/// Initialize or migrate the database schema.
///
/// Idempotent; safe on both new and existing databases.
pub(crate) fn migrate(conn: &Connection) -> Result<(), StoreError> {
    let current_version = get_schema_version(conn)?;

    if current_version > SCHEMA_VERSION {
        return Err(StoreError::UnsupportedSchemaVersion {
            found: current_version,
            expected: SCHEMA_VERSION,
        });
    }

    if current_version < SCHEMA_VERSION {
        for version in (current_version + 1)..=SCHEMA_VERSION {
            migrate_to_version(conn, version)?;
        }
    }

    Ok(())
}

fn migrate_to_version(conn: &Connection, version: i32) -> Result<(), StoreError> {
    match version {
        1 => conn.execute_batch(SCHEMA_V1)?,
        other => {
            return Err(StoreError::UnsupportedSchemaVersion {
                found: other,
                expected: SCHEMA_VERSION,
            })
        }
    }
    set_schema_version(conn, version)?;
    tracing::debug!("Migrated database to schema version {}", version);
    Ok(())
}
