//! Pure diffing of feed vehicles against stored state.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::archive::naming::archive_name;
use crate::types::ArchiveNaming;
use crate::vehicle::{
    ExternalId, FeedVehicle, ImageEntry, StoredVehicle, VehicleAttributes, VehicleId,
    VehicleSummary,
};

/// Parts of a stored vehicle that differ from the feed. `None` means the part
/// is already equal and must not be written.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleUpdate {
    pub vehicle_id: VehicleId,
    pub attributes: Option<VehicleAttributes>,
    pub accessories: Option<BTreeSet<String>>,
    pub images: Option<Vec<ImageEntry>>,
    /// Published archive that no longer matches the vehicle: the one under
    /// its previous name after a rename, or its current one when the images
    /// changed. Removing it makes the archive pass rebuild.
    pub retired_archive: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VehiclePlan {
    Insert { vehicle_id: VehicleId },
    Update(VehicleUpdate),
    Unchanged { vehicle_id: VehicleId },
}

/// A stored vehicle whose external id is gone from the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deletion {
    pub vehicle_id: VehicleId,
    pub external_id: ExternalId,
    pub title: String,
    pub archive_name: String,
}

pub fn plan_vehicle(
    feed: &FeedVehicle,
    stored: Option<&StoredVehicle>,
    naming: ArchiveNaming,
) -> VehiclePlan {
    let Some(stored) = stored else {
        return VehiclePlan::Insert {
            vehicle_id: VehicleId::generate(),
        };
    };

    let attributes = (feed.attributes != stored.attributes).then(|| feed.attributes.clone());
    let accessories = (feed.accessories != stored.accessories).then(|| feed.accessories.clone());
    let images = (feed.images != stored.images).then(|| feed.images.clone());

    if attributes.is_none() && accessories.is_none() && images.is_none() {
        return VehiclePlan::Unchanged {
            vehicle_id: stored.vehicle_id,
        };
    }

    let old_name = archive_name(naming, &stored.attributes.title, stored.vehicle_id);
    let new_name = archive_name(naming, &feed.attributes.title, stored.vehicle_id);
    let retired_archive = if old_name != new_name || images.is_some() {
        Some(old_name)
    } else {
        None
    };

    VehiclePlan::Update(VehicleUpdate {
        vehicle_id: stored.vehicle_id,
        attributes,
        accessories,
        images,
        retired_archive,
    })
}

pub fn plan_deletions(
    stored: &[VehicleSummary],
    feed_ids: &HashSet<ExternalId>,
    naming: ArchiveNaming,
) -> Vec<Deletion> {
    stored
        .iter()
        .filter(|v| !feed_ids.contains(&v.external_id))
        .map(|v| Deletion {
            vehicle_id: v.vehicle_id,
            external_id: v.external_id,
            title: v.title.clone(),
            archive_name: archive_name(naming, &v.title, v.vehicle_id),
        })
        .collect()
}

/// Keep one record per external id, the last occurrence winning, while
/// preserving first-seen order. Returns the ids that were duplicated.
pub fn collapse_duplicates(records: Vec<FeedVehicle>) -> (Vec<FeedVehicle>, Vec<ExternalId>) {
    let mut slot_of: HashMap<ExternalId, usize> = HashMap::with_capacity(records.len());
    let mut unique: Vec<FeedVehicle> = Vec::with_capacity(records.len());
    let mut duplicates = Vec::new();

    for record in records {
        match slot_of.get(&record.external_id) {
            Some(&slot) => {
                duplicates.push(record.external_id);
                unique[slot] = record;
            }
            None => {
                slot_of.insert(record.external_id, unique.len());
                unique.push(record);
            }
        }
    }
    (unique, duplicates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::feed_vehicle;

    fn stored_from(feed: &FeedVehicle) -> StoredVehicle {
        StoredVehicle {
            vehicle_id: VehicleId::generate(),
            external_id: feed.external_id,
            attributes: feed.attributes.clone(),
            accessories: feed.accessories.clone(),
            images: feed.images.clone(),
            artifact_reference: Some("memory://vehicle_images/Model_A_images.zip".into()),
        }
    }

    fn summary(external_id: ExternalId, title: &str) -> VehicleSummary {
        VehicleSummary {
            external_id,
            vehicle_id: VehicleId::generate(),
            title: title.to_string(),
            artifact_reference: None,
        }
    }

    #[test]
    fn test_new_vehicle_is_inserted() {
        let feed = feed_vehicle(42, "Model A");
        assert!(matches!(
            plan_vehicle(&feed, None, ArchiveNaming::Title),
            VehiclePlan::Insert { .. }
        ));
    }

    #[test]
    fn test_identical_vehicle_is_unchanged() {
        let feed = feed_vehicle(42, "Model A");
        let stored = stored_from(&feed);
        assert_eq!(
            plan_vehicle(&feed, Some(&stored), ArchiveNaming::Title),
            VehiclePlan::Unchanged {
                vehicle_id: stored.vehicle_id
            }
        );
    }

    #[test]
    fn test_price_change_touches_only_attributes() {
        let mut feed = feed_vehicle(42, "Model A");
        let stored = stored_from(&feed);
        feed.attributes.price = 9500.0;

        let VehiclePlan::Update(update) = plan_vehicle(&feed, Some(&stored), ArchiveNaming::Title)
        else {
            panic!("expected update");
        };
        assert_eq!(update.vehicle_id, stored.vehicle_id);
        assert_eq!(update.attributes.unwrap().price, 9500.0);
        assert!(update.accessories.is_none());
        assert!(update.images.is_none());
        assert!(update.retired_archive.is_none());
    }

    #[test]
    fn test_accessory_set_difference_detected() {
        let mut feed = feed_vehicle(42, "Model A");
        let stored = stored_from(&feed);
        feed.accessories.insert("Teto solar".into());

        let VehiclePlan::Update(update) = plan_vehicle(&feed, Some(&stored), ArchiveNaming::Title)
        else {
            panic!("expected update");
        };
        assert!(update.attributes.is_none());
        assert_eq!(update.accessories.unwrap().len(), 3);
        assert!(update.images.is_none());
    }

    #[test]
    fn test_image_order_matters() {
        let mut feed = feed_vehicle(42, "Model A");
        feed.images.push(ImageEntry {
            position: 1,
            url: "https://img.example/2.jpg".into(),
            large_url: None,
        });
        let stored = stored_from(&feed);
        feed.images.swap(0, 1);
        feed.images[0].position = 0;
        feed.images[1].position = 1;

        let VehiclePlan::Update(update) = plan_vehicle(&feed, Some(&stored), ArchiveNaming::Title)
        else {
            panic!("expected update");
        };
        assert!(update.images.is_some());
        assert!(update.attributes.is_none());
        assert_eq!(update.retired_archive.as_deref(), Some("Model_A_images.zip"));
    }

    #[test]
    fn test_large_url_change_detected() {
        let mut feed = feed_vehicle(42, "Model A");
        let stored = stored_from(&feed);
        feed.images[0].large_url = None;
        assert!(matches!(
            plan_vehicle(&feed, Some(&stored), ArchiveNaming::Title),
            VehiclePlan::Update(VehicleUpdate {
                images: Some(_),
                ..
            })
        ));
    }

    #[test]
    fn test_title_change_retires_title_named_archive() {
        let mut feed = feed_vehicle(42, "Model A");
        let stored = stored_from(&feed);
        feed.attributes.title = "Model A Turbo".into();

        let VehiclePlan::Update(update) = plan_vehicle(&feed, Some(&stored), ArchiveNaming::Title)
        else {
            panic!("expected update");
        };
        assert_eq!(update.retired_archive.as_deref(), Some("Model_A_images.zip"));
    }

    #[test]
    fn test_title_change_keeps_vehicle_id_named_archive() {
        let mut feed = feed_vehicle(42, "Model A");
        let stored = stored_from(&feed);
        feed.attributes.title = "Model A Turbo".into();

        let VehiclePlan::Update(update) =
            plan_vehicle(&feed, Some(&stored), ArchiveNaming::VehicleId)
        else {
            panic!("expected update");
        };
        assert!(update.retired_archive.is_none());
    }

    #[test]
    fn test_deletions_are_stored_minus_feed() {
        let stored = vec![summary(1, "Kept"), summary(42, "Model A"), summary(7, "Gone")];
        let feed_ids: HashSet<ExternalId> = [1, 99].into_iter().collect();

        let deletions = plan_deletions(&stored, &feed_ids, ArchiveNaming::Title);
        let ids: Vec<_> = deletions.iter().map(|d| d.external_id).collect();
        assert_eq!(ids, vec![42, 7]);
        assert_eq!(deletions[0].archive_name, "Model_A_images.zip");
        assert_eq!(deletions[0].vehicle_id, stored[1].vehicle_id);
    }

    #[test]
    fn test_empty_feed_deletes_everything() {
        let stored = vec![summary(1, "A"), summary(2, "B")];
        let deletions = plan_deletions(&stored, &HashSet::new(), ArchiveNaming::VehicleId);
        assert_eq!(deletions.len(), 2);
        assert_eq!(
            deletions[1].archive_name,
            format!("{}_images.zip", stored[1].vehicle_id)
        );
    }

    #[test]
    fn test_collapse_duplicates_last_wins() {
        let mut second = feed_vehicle(42, "Model A");
        second.attributes.price = 1.0;
        let records = vec![
            feed_vehicle(42, "Model A"),
            feed_vehicle(7, "Other"),
            second,
        ];

        let (unique, duplicates) = collapse_duplicates(records);
        assert_eq!(duplicates, vec![42]);
        assert_eq!(
            unique.iter().map(|v| v.external_id).collect::<Vec<_>>(),
            vec![42, 7]
        );
        assert_eq!(unique[0].attributes.price, 1.0);
    }

    #[test]
    fn test_collapse_without_duplicates() {
        let (unique, duplicates) =
            collapse_duplicates(vec![feed_vehicle(1, "A"), feed_vehicle(2, "B")]);
        assert_eq!(unique.len(), 2);
        assert!(duplicates.is_empty());
    }
}
