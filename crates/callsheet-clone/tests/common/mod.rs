//! Shared fixtures for clone engine integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use callsheet_clone::{CloneConfig, CloneOrchestrator};
use callsheet_core::{
    Cardinality, CheckpointRepository, CloneSchema, CollectionSchema, Document, DocumentStore,
    Fields, SYSTEM_FIELDS,
};
use callsheet_db::{seed_demo_template, MemoryCheckpointRepository, MemoryDocumentStore, SeededTemplate};

pub fn fields(value: JsonValue) -> Fields {
    value.as_object().cloned().unwrap_or_default()
}

/// Store holding the seeded demo template under a fresh namespace.
pub async fn seeded_store() -> (Arc<MemoryDocumentStore>, SeededTemplate) {
    let store = Arc::new(MemoryDocumentStore::new());
    let seeded = seed_demo_template(store.as_ref(), Uuid::new_v4())
        .await
        .expect("seed template");
    (store, seeded)
}

pub fn orchestrator(store: &Arc<MemoryDocumentStore>, config: CloneConfig) -> CloneOrchestrator {
    CloneOrchestrator::new(
        store.clone() as Arc<dyn DocumentStore>,
        CloneSchema::production().expect("production schema"),
        config,
    )
}

pub fn checkpointed_orchestrator(
    store: &Arc<MemoryDocumentStore>,
    checkpoints: &Arc<MemoryCheckpointRepository>,
    config: CloneConfig,
) -> CloneOrchestrator {
    orchestrator(store, config.with_checkpoints(true))
        .with_checkpoints(checkpoints.clone() as Arc<dyn CheckpointRepository>)
}

/// Nine independent collections `c1`..`c9`.
pub fn nine_collection_schema() -> CloneSchema {
    CloneSchema::new(
        "projects",
        (1..=9)
            .map(|i| CollectionSchema::new(format!("c{}", i)))
            .collect(),
    )
    .expect("schema")
}

/// Body of a document minus system fields and foreign keys: its identity
/// independent of ids.
fn fingerprint(doc: &Document, entry: &CollectionSchema) -> String {
    let mut data = doc.data.clone();
    for field in SYSTEM_FIELDS {
        data.remove(*field);
    }
    for fk in &entry.foreign_keys {
        data.remove(&fk.field);
    }
    JsonValue::Object(data).to_string()
}

/// Id-free rendering of the graph under `root_id`.
///
/// Foreign keys into tracked collections are replaced by the fingerprint of
/// the document they point at (or `dangling:<id>` when the target is not
/// under the same root); other values are kept verbatim. Two graphs render
/// equal exactly when they are isomorphic.
pub async fn canonical(
    store: &MemoryDocumentStore,
    schema: &CloneSchema,
    root_id: Uuid,
) -> BTreeMap<String, Vec<String>> {
    let mut docs: BTreeMap<String, Vec<Document>> = BTreeMap::new();
    let mut prints: HashMap<(String, Uuid), String> = HashMap::new();
    for entry in schema.clone_order() {
        let found = store
            .read_by_parent(&entry.name, root_id)
            .await
            .expect("read");
        for doc in &found {
            prints.insert((entry.name.clone(), doc.id), fingerprint(doc, entry));
        }
        docs.insert(entry.name.clone(), found);
    }

    let render = |value: &JsonValue, target: &str| -> JsonValue {
        if !schema.tracks(target) {
            return value.clone();
        }
        match value.as_str().and_then(|s| Uuid::parse_str(s).ok()) {
            Some(id) => match prints.get(&(target.to_string(), id)) {
                Some(print) => json!(format!("{}:{}", target, print)),
                None => json!(format!("dangling:{}", id)),
            },
            None => value.clone(),
        }
    };

    let mut out = BTreeMap::new();
    for entry in schema.clone_order() {
        let mut rendered: Vec<String> = docs[&entry.name]
            .iter()
            .map(|doc| {
                let mut data = doc.data.clone();
                for field in SYSTEM_FIELDS {
                    data.remove(*field);
                }
                for fk in &entry.foreign_keys {
                    let Some(value) = data.get(&fk.field) else {
                        continue;
                    };
                    let resolved = match (fk.cardinality, value) {
                        (Cardinality::Array, JsonValue::Array(items)) => JsonValue::Array(
                            items.iter().map(|v| render(v, &fk.references)).collect(),
                        ),
                        _ => render(value, &fk.references),
                    };
                    data.insert(fk.field.clone(), resolved);
                }
                JsonValue::Object(data).to_string()
            })
            .collect();
        rendered.sort();
        out.insert(entry.name.clone(), rendered);
    }
    out
}

/// Every id used by documents under `root_id`, the root included.
pub async fn ids_under(store: &MemoryDocumentStore, schema: &CloneSchema, root_id: Uuid) -> Vec<Uuid> {
    let mut ids = vec![root_id];
    for entry in schema.clone_order() {
        ids.extend(
            store
                .read_by_parent(&entry.name, root_id)
                .await
                .expect("read")
                .iter()
                .map(|d| d.id),
        );
    }
    ids
}
