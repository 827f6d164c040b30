//! Canonical vehicle types shared by the normalizer, reconciler and store.

use std::collections::BTreeSet;
use std::fmt;

use uuid::Uuid;

/// Vehicle identifier as provided by the upstream feed. Natural key for
/// matching feed records against stored vehicles.
pub type ExternalId = i64;

/// System-assigned vehicle identifier, fixed at first insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VehicleId(Uuid);

impl VehicleId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse the string stored in the database.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// The flat attribute set compared field by field during reconciliation.
///
/// Equality is strict per field (derived `PartialEq`); the normalizer never
/// produces non-finite floats, so float comparison is reflexive here.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VehicleAttributes {
    pub title: String,
    pub category: String,
    pub description: String,
    pub make: String,
    pub model: String,
    pub base_model: String,
    pub year: i64,
    pub manufacture_year: i64,
    pub condition: String,
    pub mileage: i64,
    pub fuel_type: String,
    pub transmission: String,
    pub engine: String,
    pub plate: String,
    pub chassis: String,
    /// Absent for the two-wheeled category.
    pub doors: Option<i64>,
    pub color: String,
    pub price: f64,
    pub promotion_price: f64,
    pub horsepower: i64,
    pub body_type: String,
    pub fipe_code: String,
    pub fipe_value: f64,
}

/// One stored image association. `position` is the index in the feed's
/// positionally-paired image list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageEntry {
    pub position: u32,
    pub url: String,
    pub large_url: Option<String>,
}

/// A feed record after normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedVehicle {
    pub external_id: ExternalId,
    pub attributes: VehicleAttributes,
    pub accessories: BTreeSet<String>,
    pub images: Vec<ImageEntry>,
}

/// A vehicle as read back from the persistent store, with its sub-collections.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredVehicle {
    pub vehicle_id: VehicleId,
    pub external_id: ExternalId,
    pub attributes: VehicleAttributes,
    pub accessories: BTreeSet<String>,
    pub images: Vec<ImageEntry>,
    pub artifact_reference: Option<String>,
}

/// Lightweight listing row used for deletion diffing and the archive pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleSummary {
    pub external_id: ExternalId,
    pub vehicle_id: VehicleId,
    pub title: String,
    pub artifact_reference: Option<String>,
}
