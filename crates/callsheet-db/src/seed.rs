//! Demo template seeding.
//!
//! Writes a small but complete production graph (one project and a few
//! documents in every cloned collection) so a fresh database has a template
//! to clone from. Used by the in-memory API backend and by tests.

use std::collections::BTreeMap;

use serde_json::{json, Value as JsonValue};
use tracing::info;
use uuid::Uuid;

use callsheet_core::{defaults::ROOT_COLLECTION, DocumentStore, Fields, NewDocument, Result};

/// Collection of shared budget templates referenced by budget categories.
pub const BUDGET_TEMPLATE_COLLECTION: &str = "budget_templates";

/// Ids of the seeded template.
#[derive(Debug, Clone)]
pub struct SeededTemplate {
    pub root_id: Uuid,
    /// Shared budget template the categories point at (never cloned).
    pub budget_template_id: Uuid,
    /// Documents written per dependent collection.
    pub counts: BTreeMap<String, usize>,
}

impl SeededTemplate {
    /// Total dependent documents under the template root.
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }
}

struct Seeder<'a> {
    store: &'a dyn DocumentStore,
    root_id: Uuid,
    counts: BTreeMap<String, usize>,
}

impl Seeder<'_> {
    async fn add(&mut self, collection: &str, body: JsonValue) -> Result<Uuid> {
        let id = self
            .store
            .create_document(collection, NewDocument::new(Some(self.root_id), fields(body)))
            .await?;
        *self.counts.entry(collection.to_string()).or_default() += 1;
        Ok(id)
    }
}

fn fields(value: JsonValue) -> Fields {
    match value {
        JsonValue::Object(map) => map,
        _ => Fields::new(),
    }
}

/// Seed the demo template project under `namespace`.
pub async fn seed_demo_template(store: &dyn DocumentStore, namespace: Uuid) -> Result<SeededTemplate> {
    let budget_template_id = store
        .create_document(
            BUDGET_TEMPLATE_COLLECTION,
            NewDocument::new(None, fields(json!({ "name": "Indie feature (under $1M)" }))),
        )
        .await?;

    let root_id = store
        .create_document(
            ROOT_COLLECTION,
            NewDocument::new(
                Some(namespace),
                fields(json!({
                    "title": "The Lighthouse Keeper",
                    "format": "short",
                    "status": "pre_production",
                    "owner_id": namespace.to_string(),
                })),
            ),
        )
        .await?;

    let mut s = Seeder {
        store,
        root_id,
        counts: BTreeMap::new(),
    };

    let harbor = s
        .add("locations", json!({ "name": "Harbor Pier", "address": "12 Quay Rd" }))
        .await?;
    let lighthouse = s
        .add("locations", json!({ "name": "Lighthouse Interior", "address": "Point Lookout" }))
        .await?;

    let keeper = s
        .add("cast_members", json!({ "name": "Ada Moss", "character": "Keeper" }))
        .await?;
    let sailor = s
        .add("cast_members", json!({ "name": "Theo Lane", "character": "Sailor" }))
        .await?;
    let child = s
        .add("cast_members", json!({ "name": "Rin Park", "character": "Child" }))
        .await?;

    let dp = s
        .add("crew_members", json!({ "name": "Jo Reyes", "department": "camera", "role": "DP" }))
        .await?;
    let gaffer = s
        .add("crew_members", json!({ "name": "Sam Ortiz", "department": "lighting", "role": "Gaffer" }))
        .await?;

    let scene_1 = s
        .add(
            "scenes",
            json!({
                "number": "1",
                "heading": "EXT. HARBOR PIER - DAWN",
                "location_id": harbor.to_string(),
                "cast_member_ids": [sailor.to_string(), child.to_string()],
            }),
        )
        .await?;
    let scene_2 = s
        .add(
            "scenes",
            json!({
                "number": "2",
                "heading": "INT. LIGHTHOUSE - NIGHT",
                "location_id": lighthouse.to_string(),
                "cast_member_ids": [keeper.to_string()],
            }),
        )
        .await?;
    let scene_3 = s
        .add(
            "scenes",
            json!({
                "number": "3",
                "heading": "INT. LIGHTHOUSE - DAY",
                "location_id": lighthouse.to_string(),
                "cast_member_ids": [keeper.to_string(), child.to_string()],
            }),
        )
        .await?;

    for (scene, shot, size) in [
        (scene_1, "1A", "wide"),
        (scene_1, "1B", "close"),
        (scene_2, "2A", "medium"),
        (scene_3, "3A", "insert"),
    ] {
        s.add(
            "shots",
            json!({ "scene_id": scene.to_string(), "shot_number": shot, "size": size }),
        )
        .await?;
    }

    let camera = s
        .add("equipment", json!({ "name": "Cinema camera body", "category": "camera" }))
        .await?;
    let lens = s
        .add("equipment", json!({ "name": "Prime lens set", "category": "camera" }))
        .await?;
    let light = s
        .add("equipment", json!({ "name": "1.2K HMI", "category": "lighting" }))
        .await?;
    s.add(
        "equipment_packages",
        json!({
            "name": "A-camera package",
            "equipment_ids": [camera.to_string(), lens.to_string()],
        }),
    )
    .await?;
    s.add(
        "equipment_packages",
        json!({ "name": "Night lighting", "equipment_ids": [light.to_string()] }),
    )
    .await?;

    let day_1 = s
        .add(
            "schedule_days",
            json!({ "day_number": 1, "date": "2026-11-02", "location_id": harbor.to_string() }),
        )
        .await?;
    let day_2 = s
        .add(
            "schedule_days",
            json!({ "day_number": 2, "date": "2026-11-03", "location_id": lighthouse.to_string() }),
        )
        .await?;

    for (day, scene, location, call) in [
        (day_1, scene_1, harbor, "05:30"),
        (day_2, scene_2, lighthouse, "17:00"),
        (day_2, scene_3, lighthouse, "09:00"),
    ] {
        s.add(
            "schedule_events",
            json!({
                "schedule_day_id": day.to_string(),
                "scene_id": scene.to_string(),
                "location_id": location.to_string(),
                "call_time": call,
            }),
        )
        .await?;
    }

    let above_line = s
        .add(
            "budget_categories",
            json!({
                "name": "Above the line",
                "code": "1000",
                "template_id": budget_template_id.to_string(),
            }),
        )
        .await?;
    let production = s
        .add(
            "budget_categories",
            json!({
                "name": "Production",
                "code": "2000",
                "template_id": budget_template_id.to_string(),
            }),
        )
        .await?;

    s.add(
        "budget_items",
        json!({ "description": "Director fee", "amount_cents": 500_000, "category_id": above_line.to_string() }),
    )
    .await?;
    s.add(
        "budget_items",
        json!({
            "description": "Director of photography",
            "amount_cents": 250_000,
            "category_id": production.to_string(),
            "crew_member_id": dp.to_string(),
        }),
    )
    .await?;
    s.add(
        "budget_items",
        json!({
            "description": "Gaffer",
            "amount_cents": 120_000,
            "category_id": production.to_string(),
            "crew_member_id": gaffer.to_string(),
        }),
    )
    .await?;

    let seeded = SeededTemplate {
        root_id,
        budget_template_id,
        counts: s.counts,
    };

    info!(
        subsystem = "db",
        component = "seed",
        op = "seed_demo_template",
        backend = store.backend_name(),
        new_root_id = %root_id,
        doc_count = seeded.total(),
        "Seeded demo template project"
    );
    Ok(seeded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDocumentStore;

    #[tokio::test]
    async fn test_seed_populates_every_production_collection() {
        let store = MemoryDocumentStore::new();
        let seeded = seed_demo_template(&store, Uuid::new_v4()).await.unwrap();

        let schema = callsheet_core::CloneSchema::production().unwrap();
        for entry in schema.clone_order() {
            let count = seeded.counts.get(&entry.name).copied().unwrap_or(0);
            assert!(count > 0, "{} was not seeded", entry.name);
            assert_eq!(store.count(&entry.name).await, count);
        }
        assert_eq!(store.count(ROOT_COLLECTION).await, 1);
        assert_eq!(store.count(BUDGET_TEMPLATE_COLLECTION).await, 1);
    }
}
