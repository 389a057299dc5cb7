//! Foreign-key rewriting.

use serde_json::Value as JsonValue;
use uuid::Uuid;

use callsheet_core::{Cardinality, CollectionSchema, Fields};

use crate::identity::IdentityMapper;

/// Rewrite every declared foreign key of `data` through `identity`.
///
/// Ids with a mapping are replaced; anything else (ids of untracked
/// collections, malformed values, nulls, missing fields) is kept as is.
pub fn resolve_references(
    mut data: Fields,
    entry: &CollectionSchema,
    identity: &IdentityMapper,
) -> Fields {
    for fk in &entry.foreign_keys {
        let Some(value) = data.get_mut(&fk.field) else {
            continue;
        };
        match fk.cardinality {
            Cardinality::Single => remap_value(value, &fk.references, identity),
            Cardinality::Array => {
                if let JsonValue::Array(items) = value {
                    for item in items.iter_mut() {
                        remap_value(item, &fk.references, identity);
                    }
                }
            }
        }
    }
    data
}

fn remap_value(value: &mut JsonValue, collection: &str, identity: &IdentityMapper) {
    let mapped = value
        .as_str()
        .and_then(|s| Uuid::parse_str(s).ok())
        .and_then(|old| identity.resolve(collection, old));
    if let Some(new_id) = mapped {
        *value = JsonValue::String(new_id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: JsonValue) -> Fields {
        value.as_object().cloned().unwrap_or_default()
    }

    fn scenes() -> CollectionSchema {
        CollectionSchema::new("scenes")
            .single("location_id", "locations")
            .array("cast_member_ids", "cast_members")
    }

    #[test]
    fn test_single_and_array_references_are_remapped() {
        let mut ids = IdentityMapper::new();
        let (l1, c1, c2) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let nl1 = ids.allocate("locations", l1).unwrap();
        let nc1 = ids.allocate("cast_members", c1).unwrap();
        let nc2 = ids.allocate("cast_members", c2).unwrap();

        let out = resolve_references(
            fields(json!({
                "heading": "INT. LIGHTHOUSE",
                "location_id": l1.to_string(),
                "cast_member_ids": [c1.to_string(), c2.to_string()],
            })),
            &scenes(),
            &ids,
        );

        assert_eq!(out["location_id"], json!(nl1.to_string()));
        assert_eq!(
            out["cast_member_ids"],
            json!([nc1.to_string(), nc2.to_string()])
        );
        assert_eq!(out["heading"], json!("INT. LIGHTHOUSE"));
    }

    #[test]
    fn test_unmapped_and_malformed_values_pass_through() {
        let mut ids = IdentityMapper::new();
        let c1 = Uuid::new_v4();
        let nc1 = ids.allocate("cast_members", c1).unwrap();
        let stranger = Uuid::new_v4();

        let out = resolve_references(
            fields(json!({
                "location_id": null,
                "cast_member_ids": [c1.to_string(), stranger.to_string(), 42, "TBD"],
            })),
            &scenes(),
            &ids,
        );

        assert_eq!(out["location_id"], JsonValue::Null);
        assert_eq!(
            out["cast_member_ids"],
            json!([nc1.to_string(), stranger.to_string(), 42, "TBD"])
        );
    }

    #[test]
    fn test_missing_fields_and_scalar_arrays_are_untouched() {
        let ids = IdentityMapper::new();
        let out = resolve_references(
            fields(json!({ "cast_member_ids": "not-a-list" })),
            &scenes(),
            &ids,
        );
        assert_eq!(out.get("location_id"), None);
        assert_eq!(out["cast_member_ids"], json!("not-a-list"));
    }

    #[test]
    fn test_untracked_collection_is_passed_through() {
        let ids = IdentityMapper::new();
        let template = Uuid::new_v4();
        let entry = CollectionSchema::new("budget_categories").single("template_id", "budget_templates");
        let out = resolve_references(
            fields(json!({ "template_id": template.to_string() })),
            &entry,
            &ids,
        );
        assert_eq!(out["template_id"], json!(template.to_string()));
    }
}
