//! Identity (hash key) resolution for manifest tables
//!
//! Every content table stores its domain identity somewhere inside the row
//! JSON, usually in a `<thing>Hash` property and occasionally nested. The
//! [`IDENTITY_FIELDS`] table records where, per table. Tables that are not
//! listed resolve to no identity so that tables added upstream keep flowing
//! through the pipeline.

use dme_common::types::{IdentityKey, ManifestEntry};
use serde_json::Value;
use tracing::debug;

/// Location of a table's identity inside its row payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityPath {
    /// The table has no addressable identity (e.g. a single-row table).
    NoField,
    /// Property names to follow from the payload root.
    Field(&'static [&'static str]),
}

impl IdentityPath {
    /// Follow the path into `payload`.
    pub fn lookup<'a>(&self, payload: &'a Value) -> Option<&'a Value> {
        match self {
            IdentityPath::NoField => None,
            IdentityPath::Field(segments) => segments
                .iter()
                .try_fold(payload, |value, segment| value.get(*segment)),
        }
    }
}

const fn field(segments: &'static [&'static str]) -> IdentityPath {
    IdentityPath::Field(segments)
}

/// Identity field per content table. Must stay sorted by table name.
pub static IDENTITY_FIELDS: &[(&str, IdentityPath)] = &[
    ("DestinyActivityBundleDefinition", field(&["bundleHash"])),
    ("DestinyActivityCategoryDefinition", field(&["categoryHash"])),
    ("DestinyActivityDefinition", field(&["activityHash"])),
    ("DestinyActivityModeDefinition", field(&["hash"])),
    ("DestinyActivityTypeDefinition", field(&["activityTypeHash"])),
    ("DestinyBondDefinition", field(&["hash"])),
    ("DestinyClassDefinition", field(&["classHash"])),
    ("DestinyCombatantDefinition", field(&["combatantHash"])),
    ("DestinyDamageTypeDefinition", field(&["damageTypeHash"])),
    ("DestinyDestinationDefinition", field(&["destinationHash"])),
    ("DestinyDirectorBookDefinition", field(&["bookHash"])),
    ("DestinyEnemyRaceDefinition", field(&["raceHash"])),
    ("DestinyFactionDefinition", field(&["factionHash"])),
    ("DestinyGenderDefinition", field(&["genderHash"])),
    ("DestinyGrimoireCardDefinition", field(&["cardId"])),
    ("DestinyGrimoireDefinition", IdentityPath::NoField),
    ("DestinyHistoricalStatsDefinition", field(&["statId"])),
    ("DestinyInventoryBucketDefinition", field(&["bucketHash"])),
    ("DestinyInventoryItemDefinition", field(&["itemHash"])),
    ("DestinyItemCategoryDefinition", field(&["itemCategoryHash"])),
    ("DestinyLocationDefinition", field(&["locationHash"])),
    ("DestinyObjectiveDefinition", field(&["objectiveHash"])),
    ("DestinyPlaceDefinition", field(&["placeHash"])),
    ("DestinyProgressionDefinition", field(&["progressionHash"])),
    ("DestinyRaceDefinition", field(&["raceHash"])),
    ("DestinyRecordBookDefinition", field(&["hash"])),
    ("DestinyRecordDefinition", field(&["hash"])),
    ("DestinyRewardSourceDefinition", field(&["sourceHash"])),
    ("DestinySandboxPerkDefinition", field(&["perkHash"])),
    ("DestinyScriptedSkullDefinition", field(&["skullHash"])),
    ("DestinySpecialEventDefinition", field(&["eventHash"])),
    ("DestinyStatDefinition", field(&["statHash"])),
    ("DestinyStatGroupDefinition", field(&["statGroupHash"])),
    ("DestinyTalentGridDefinition", field(&["gridHash"])),
    ("DestinyTriumphSetDefinition", field(&["triumphSetHash"])),
    ("DestinyUnlockFlagDefinition", field(&["flagHash"])),
    ("DestinyVendorCategoryDefinition", field(&["categoryHash"])),
    ("DestinyVendorDefinition", field(&["summary", "vendorHash"])),
];

/// Identity path for `table`, or `None` when the table is not mapped.
pub fn identity_path(table: &str) -> Option<IdentityPath> {
    IDENTITY_FIELDS
        .binary_search_by(|(name, _)| (*name).cmp(table))
        .ok()
        .map(|index| IDENTITY_FIELDS[index].1)
}

/// Resolve the identity key of a row from `table`.
///
/// Returns `None` when the table has no identity field, when the path does
/// not exist in this payload, or when the table is not mapped at all.
pub fn resolve(table: &str, payload: &Value) -> Option<IdentityKey> {
    let Some(path) = identity_path(table) else {
        debug!(table = %table, "No identity field mapped for table");
        return None;
    };

    path.lookup(payload).and_then(IdentityKey::from_value)
}

/// Outcome of re-checking an entry's identity against its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityCheck {
    /// The stored key equals the value at the identity path.
    Consistent,
    /// The payload holds a different value (or none) at the identity path.
    Mismatch { found: Option<Value> },
    /// The entry has no key, or its table has no identity path.
    Unaddressable,
}

/// Verify that `entry`'s identity key still appears verbatim in its payload.
pub fn check(entry: &ManifestEntry) -> IdentityCheck {
    let (Some(key), Some(path)) = (entry.identity_key(), identity_path(entry.table())) else {
        return IdentityCheck::Unaddressable;
    };

    match path.lookup(entry.payload()) {
        Some(found) if *found == key.to_value() => IdentityCheck::Consistent,
        found => IdentityCheck::Mismatch {
            found: found.cloned(),
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_identity_fields_sorted_and_unique() {
        for pair in IDENTITY_FIELDS.windows(2) {
            assert!(pair[0].0 < pair[1].0, "{} must sort before {}", pair[0].0, pair[1].0);
        }
    }

    #[test]
    fn test_resolve_flat_field() {
        let payload = json!({"classHash": 10, "name": "Titan"});
        assert_eq!(resolve("DestinyClassDefinition", &payload), Some(IdentityKey::from(10)));
    }

    #[test]
    fn test_resolve_nested_field() {
        let payload = json!({"summary": {"vendorHash": 1990950, "vendorName": "Xur"}});
        assert_eq!(
            resolve("DestinyVendorDefinition", &payload),
            Some(IdentityKey::from(1990950))
        );
    }

    #[test]
    fn test_resolve_string_identity() {
        let payload = json!({"statId": "activitiesCleared"});
        assert_eq!(
            resolve("DestinyHistoricalStatsDefinition", &payload),
            Some(IdentityKey::from("activitiesCleared"))
        );
    }

    #[test]
    fn test_resolve_missing_intermediate_key() {
        let payload = json!({"vendorHash": 5});
        assert_eq!(resolve("DestinyVendorDefinition", &payload), None);
    }

    #[test]
    fn test_table_without_identity_field() {
        let payload = json!({"themeCollection": []});
        assert_eq!(identity_path("DestinyGrimoireDefinition"), Some(IdentityPath::NoField));
        assert_eq!(resolve("DestinyGrimoireDefinition", &payload), None);
    }

    #[test]
    fn test_unmapped_table_degrades_to_absent() {
        let payload = json!({"hash": 1});
        assert_eq!(identity_path("DestinyBrandNewDefinition"), None);
        assert_eq!(resolve("DestinyBrandNewDefinition", &payload), None);
    }

    #[test]
    fn test_check_detects_mismatch() {
        let entry = ManifestEntry::new(
            "DestinyClassDefinition",
            "en",
            1,
            Some(IdentityKey::from(11)),
            json!({"classHash": 10}),
        );
        assert_eq!(check(&entry), IdentityCheck::Mismatch { found: Some(json!(10)) });

        let consistent = ManifestEntry::new(
            "DestinyClassDefinition",
            "en",
            1,
            Some(IdentityKey::from(10)),
            json!({"classHash": 10}),
        );
        assert_eq!(check(&consistent), IdentityCheck::Consistent);
    }

    #[test]
    fn test_check_unaddressable_without_key() {
        let entry = ManifestEntry::new("DestinyGrimoireDefinition", "en", 1, None, json!({}));
        assert_eq!(check(&entry), IdentityCheck::Unaddressable);
    }

    fn payload_at(path: &[&str], key: i64) -> Value {
        path.iter().rev().fold(Value::from(key), |inner, segment| {
            let mut object = serde_json::Map::new();
            object.insert((*segment).to_string(), inner);
            Value::Object(object)
        })
    }

    proptest! {
        #[test]
        fn prop_resolved_key_matches_payload(
            index in 0..IDENTITY_FIELDS.len(),
            key in any::<u32>(),
        ) {
            let (table, path) = IDENTITY_FIELDS[index];
            if let IdentityPath::Field(segments) = path {
                let payload = payload_at(segments, i64::from(key));
                let resolved = resolve(table, &payload);
                prop_assert_eq!(resolved.clone(), Some(IdentityKey::from(i64::from(key))));

                let entry = ManifestEntry::new(table, "en", 1, resolved, payload);
                prop_assert_eq!(check(&entry), IdentityCheck::Consistent);
            }
        }
    }
}
