//! Persistent vehicle store.
//!
//! SQLite-backed storage for vehicles, their accessory and image
//! associations, and sync run bookkeeping. Every write that changes a
//! vehicle's data clears its artifact reference in the same transaction so
//! the archive pass re-checks it.

pub mod db;
pub mod error;
pub mod schema;
pub mod types;

pub use db::{SqliteVehicleStore, VehicleStore};
pub use error::StoreError;
pub use types::{StoreSummary, SyncRunStats};
