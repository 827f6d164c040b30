//! Object names for published archives.
//!
//! The name is the join key between a vehicle's stored artifact reference and
//! the object in the store, so it must be a pure function of the vehicle.

use crate::types::ArchiveNaming;
use crate::vehicle::VehicleId;

const ARCHIVE_SUFFIX: &str = "_images.zip";

/// Folder and file-name prefix used inside the archive.
///
/// Path separators are flattened so a title always maps to a single
/// top-level object in the bucket.
pub fn archive_label(naming: ArchiveNaming, title: &str, vehicle_id: VehicleId) -> String {
    match naming {
        ArchiveNaming::Title => title.replace([' ', '/', '\\'], "_"),
        ArchiveNaming::VehicleId => vehicle_id.to_string(),
    }
}

pub fn archive_name(naming: ArchiveNaming, title: &str, vehicle_id: VehicleId) -> String {
    format!("{}{}", archive_label(naming, title, vehicle_id), ARCHIVE_SUFFIX)
}
