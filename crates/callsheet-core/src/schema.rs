//! Collection schema for the clone engine.
//!
//! A [`CloneSchema`] declares every collection that participates in a clone
//! and the foreign keys each one holds into the others. The set of
//! declarations must form a DAG; the clone order is derived from it rather
//! than maintained by hand:
//!
//! - an edge `A → B` exists when `B` declares a foreign key into `A`
//! - foreign keys into the root collection remap the root itself and add no edge
//! - foreign keys into collections outside the schema are pass-through
//!   references (shared templates) and add no edge
//!
//! Among collections whose dependencies are satisfied, declaration order
//! wins, so a schema declared in a valid order clones in exactly that order.

use std::collections::{HashMap, HashSet};

use petgraph::algo::{is_cyclic_directed, tarjan_scc};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use crate::defaults::ROOT_COLLECTION;
use crate::error::{Error, Result};

/// Whether a foreign-key field holds one id or a list of ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    Single,
    Array,
}

/// One foreign-key field of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub field: String,
    pub references: String,
    pub cardinality: Cardinality,
}

/// Descriptor of one cloned collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub name: String,
    pub foreign_keys: Vec<ForeignKey>,
}

impl CollectionSchema {
    /// Describe a collection with no foreign keys yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            foreign_keys: Vec::new(),
        }
    }

    /// Declare a single-valued foreign key.
    pub fn single(mut self, field: impl Into<String>, references: impl Into<String>) -> Self {
        self.foreign_keys.push(ForeignKey {
            field: field.into(),
            references: references.into(),
            cardinality: Cardinality::Single,
        });
        self
    }

    /// Declare an array-valued foreign key.
    pub fn array(mut self, field: impl Into<String>, references: impl Into<String>) -> Self {
        self.foreign_keys.push(ForeignKey {
            field: field.into(),
            references: references.into(),
            cardinality: Cardinality::Array,
        });
        self
    }
}

/// Validated set of collection descriptors plus their derived clone order.
#[derive(Debug, Clone)]
pub struct CloneSchema {
    root_collection: String,
    entries: Vec<CollectionSchema>,
    order: Vec<usize>,
}

impl CloneSchema {
    /// Build and validate a schema.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] if a collection is declared twice, shadows
    /// the root collection, references itself, or takes part in a cycle.
    pub fn new(root_collection: impl Into<String>, entries: Vec<CollectionSchema>) -> Result<Self> {
        let root_collection = root_collection.into();

        let mut index: HashMap<&str, usize> = HashMap::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            if entry.name.is_empty() {
                return Err(Error::Schema("collection name must not be empty".into()));
            }
            if entry.name == root_collection {
                return Err(Error::Schema(format!(
                    "root collection '{}' cannot be cloned as a dependent collection",
                    root_collection
                )));
            }
            if index.insert(entry.name.as_str(), i).is_some() {
                return Err(Error::Schema(format!(
                    "collection '{}' declared more than once",
                    entry.name
                )));
            }
            for fk in &entry.foreign_keys {
                if fk.references == entry.name {
                    return Err(Error::Schema(format!(
                        "collection '{}' references itself through '{}'",
                        entry.name, fk.field
                    )));
                }
            }
        }

        let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(entries.len(), 0);
        let nodes: Vec<NodeIndex> = (0..entries.len()).map(|i| graph.add_node(i)).collect();
        for (i, entry) in entries.iter().enumerate() {
            for fk in &entry.foreign_keys {
                if let Some(&dep) = index.get(fk.references.as_str()) {
                    graph.update_edge(nodes[dep], nodes[i], ());
                }
            }
        }

        if is_cyclic_directed(&graph) {
            let mut members: Vec<String> = tarjan_scc(&graph)
                .into_iter()
                .filter(|scc| scc.len() > 1)
                .flatten()
                .map(|n| entries[graph[n]].name.clone())
                .collect();
            members.sort();
            return Err(Error::Schema(format!(
                "collection dependencies contain a cycle: {}",
                members.join(", ")
            )));
        }

        let order = stable_topological_order(&entries, &index);
        Ok(Self {
            root_collection,
            entries,
            order,
        })
    }

    /// Schema of the production-management project graph.
    pub fn production() -> Result<Self> {
        Self::new(
            ROOT_COLLECTION,
            vec![
                CollectionSchema::new("locations"),
                CollectionSchema::new("cast_members"),
                CollectionSchema::new("crew_members"),
                CollectionSchema::new("scenes")
                    .single("location_id", "locations")
                    .array("cast_member_ids", "cast_members"),
                CollectionSchema::new("shots").single("scene_id", "scenes"),
                CollectionSchema::new("equipment"),
                CollectionSchema::new("equipment_packages").array("equipment_ids", "equipment"),
                CollectionSchema::new("schedule_days").single("location_id", "locations"),
                CollectionSchema::new("schedule_events")
                    .single("scene_id", "scenes")
                    .single("location_id", "locations")
                    .single("schedule_day_id", "schedule_days"),
                // Budget templates are shared across all projects and never cloned.
                CollectionSchema::new("budget_categories").single("template_id", "budget_templates"),
                CollectionSchema::new("budget_items")
                    .single("category_id", "budget_categories")
                    .single("crew_member_id", "crew_members"),
            ],
        )
    }

    /// Collection holding root entities.
    pub fn root_collection(&self) -> &str {
        &self.root_collection
    }

    /// Collections in clone order (dependencies first).
    pub fn clone_order(&self) -> impl DoubleEndedIterator<Item = &CollectionSchema> + '_ {
        self.order.iter().map(move |&i| &self.entries[i])
    }

    /// Look up a collection descriptor by name.
    pub fn entry(&self, name: &str) -> Option<&CollectionSchema> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Whether `name` is cloned by this schema (the root collection included).
    pub fn tracks(&self, name: &str) -> bool {
        name == self.root_collection || self.entry(name).is_some()
    }

    /// Number of dependent collections.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the schema clones nothing besides the root.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Kahn-style ordering that always picks the earliest declared ready entry.
fn stable_topological_order(entries: &[CollectionSchema], index: &HashMap<&str, usize>) -> Vec<usize> {
    let deps: Vec<HashSet<usize>> = entries
        .iter()
        .map(|e| {
            e.foreign_keys
                .iter()
                .filter_map(|fk| index.get(fk.references.as_str()).copied())
                .collect()
        })
        .collect();

    let mut emitted = vec![false; entries.len()];
    let mut order = Vec::with_capacity(entries.len());
    while order.len() < entries.len() {
        let next = (0..entries.len())
            .find(|&i| !emitted[i] && deps[i].iter().all(|&d| emitted[d]));
        match next {
            Some(i) => {
                emitted[i] = true;
                order.push(i);
            }
            // Unreachable for an acyclic graph, which the caller has verified.
            None => break,
        }
    }
    order
}
