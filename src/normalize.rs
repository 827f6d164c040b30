//! Record normalizer: raw feed record → canonical [`FeedVehicle`].
//!
//! Coercion is total. Unparsable or missing numbers become `0` / `0.0`
//! instead of rejecting the record, and image lists of unequal length are
//! padded rather than treated as invalid.

use std::collections::BTreeSet;

use crate::feed::{FeedNode, FeedValue};
use crate::vehicle::{FeedVehicle, ImageEntry, VehicleAttributes};

/// Category whose vehicles have no door count.
const TWO_WHEELED_CATEGORY: &str = "motocicleta";

pub fn safe_int(value: Option<&str>) -> i64 {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(0)
}

pub fn safe_float(value: Option<&str>) -> f64 {
    value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|f| f.is_finite())
        .unwrap_or(0.0)
}

/// Split the comma-separated accessory text into a set of trimmed labels.
pub fn split_accessories(text: Option<&str>) -> BTreeSet<String> {
    text.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Pair the primary and large image lists by position.
///
/// The shorter list is right-padded with `None`. Positions whose primary URL
/// is absent are dropped since a stored image needs one, but the surviving
/// entries keep their feed position.
pub fn pair_images(primary: &[Option<&str>], large: &[Option<&str>]) -> Vec<ImageEntry> {
    let len = primary.len().max(large.len());
    (0..len)
        .filter_map(|i| {
            let url = primary.get(i).copied().flatten()?;
            let large_url = large.get(i).copied().flatten().map(str::to_string);
            Some(ImageEntry {
                position: i as u32,
                url: url.to_string(),
                large_url,
            })
        })
        .collect()
}

/// Read `GROUP/ITEM`, accepting either a single item or a repeated one.
fn image_list<'a>(record: &'a FeedNode, group: &str, item: &str) -> Vec<Option<&'a str>> {
    record
        .node(group)
        .and_then(|n| n.get(item))
        .map(FeedValue::texts)
        .unwrap_or_default()
}

pub fn normalize_record(record: &FeedNode) -> FeedVehicle {
    let text = |key: &str| record.text(key).unwrap_or_default().to_string();
    let int = |key: &str| safe_int(record.text(key));
    let float = |key: &str| safe_float(record.text(key));

    let category = text("CATEGORY");
    let doors = if category.to_lowercase() == TWO_WHEELED_CATEGORY {
        None
    } else {
        Some(int("DOORS"))
    };

    let attributes = VehicleAttributes {
        title: text("TITLE"),
        description: text("DESCRIPTION"),
        make: text("MAKE"),
        model: text("MODEL"),
        base_model: text("BASE_MODEL"),
        year: int("YEAR"),
        manufacture_year: int("FABRIC_YEAR"),
        condition: text("CONDITION"),
        mileage: int("MILEAGE"),
        fuel_type: text("FUEL"),
        transmission: text("GEAR"),
        engine: text("MOTOR"),
        plate: text("PLATE"),
        chassis: text("CHASSI"),
        doors,
        color: text("COLOR"),
        price: float("PRICE"),
        promotion_price: float("PROMOTION_PRICE"),
        horsepower: int("HP"),
        body_type: text("BODY_TYPE"),
        fipe_code: text("FIPE"),
        fipe_value: float("VALOR_FIPE"),
        category,
    };

    let primary = image_list(record, "IMAGES", "IMAGE_URL");
    let large = image_list(record, "IMAGES_LARGE", "IMAGE_URL_LARGE");

    FeedVehicle {
        external_id: int("ID"),
        attributes,
        accessories: split_accessories(record.text("ACCESSORIES")),
        images: pair_images(&primary, &large),
    }
}
