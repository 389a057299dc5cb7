//! Identity mapping: source id → clone id, per collection.

use std::collections::{BTreeMap, HashSet};

use uuid::Uuid;

use callsheet_core::{defaults::IDENTITY_ALLOCATION_ATTEMPTS, new_v7, IdentitySnapshot};

use crate::error::{CloneError, Result};

type IdGenerator = Box<dyn FnMut() -> Uuid + Send + Sync>;

/// Per-job identity maps.
///
/// Every source document is mapped exactly once to a freshly generated id.
/// Generated ids never repeat an id already issued by this mapper, nor any
/// source id it has been told about.
pub struct IdentityMapper {
    maps: BTreeMap<String, BTreeMap<Uuid, Uuid>>,
    issued: HashSet<Uuid>,
    reserved: HashSet<Uuid>,
    generate: IdGenerator,
}

impl Default for IdentityMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityMapper {
    /// Mapper that generates UUIDv7 ids.
    pub fn new() -> Self {
        Self::with_generator(new_v7)
    }

    /// Mapper with a custom id generator.
    pub fn with_generator(generate: impl FnMut() -> Uuid + Send + Sync + 'static) -> Self {
        Self {
            maps: BTreeMap::new(),
            issued: HashSet::new(),
            reserved: HashSet::new(),
            generate: Box::new(generate),
        }
    }

    /// Restore maps persisted in a checkpoint.
    pub fn from_snapshot(snapshot: IdentitySnapshot) -> Self {
        let mut mapper = Self::new();
        for (collection, entries) in snapshot {
            for (old_id, new_id) in entries {
                mapper.reserved.insert(old_id);
                mapper.issued.insert(new_id);
                mapper.maps.entry(collection.clone()).or_default().insert(old_id, new_id);
            }
        }
        mapper
    }

    /// Ids generated ids must never collide with (source ids).
    pub fn reserve(&mut self, ids: impl IntoIterator<Item = Uuid>) {
        self.reserved.extend(ids);
    }

    /// Allocate the clone id for `old_id` in `collection`.
    pub fn allocate(&mut self, collection: &str, old_id: Uuid) -> Result<Uuid> {
        if self.is_mapped(collection, old_id) {
            return Err(CloneError::Identity {
                collection: collection.to_string(),
                reason: format!("source id {} is already mapped", old_id),
            });
        }
        for _ in 0..IDENTITY_ALLOCATION_ATTEMPTS {
            let candidate = (self.generate)();
            if candidate == old_id
                || self.issued.contains(&candidate)
                || self.reserved.contains(&candidate)
            {
                continue;
            }
            self.insert(collection, old_id, candidate);
            return Ok(candidate);
        }
        Err(CloneError::Identity {
            collection: collection.to_string(),
            reason: format!(
                "no unique id after {} attempts",
                IDENTITY_ALLOCATION_ATTEMPTS
            ),
        })
    }

    /// Record a mapping whose new id was allocated elsewhere (by the store).
    pub fn record(&mut self, collection: &str, old_id: Uuid, new_id: Uuid) -> Result<()> {
        if self.is_mapped(collection, old_id) {
            return Err(CloneError::Identity {
                collection: collection.to_string(),
                reason: format!("source id {} is already mapped", old_id),
            });
        }
        self.insert(collection, old_id, new_id);
        Ok(())
    }

    /// Drop mappings of documents whose batch never committed.
    ///
    /// Their new ids stay issued and are never handed out again.
    pub fn forget(&mut self, collection: &str, old_ids: &[Uuid]) {
        if let Some(map) = self.maps.get_mut(collection) {
            for old_id in old_ids {
                map.remove(old_id);
            }
        }
    }

    /// Clone id of `old_id` in `collection`, if mapped.
    pub fn resolve(&self, collection: &str, old_id: Uuid) -> Option<Uuid> {
        self.maps.get(collection).and_then(|m| m.get(&old_id)).copied()
    }

    pub fn is_mapped(&self, collection: &str, old_id: Uuid) -> bool {
        self.resolve(collection, old_id).is_some()
    }

    /// Number of mapped documents in `collection`.
    pub fn len(&self, collection: &str) -> usize {
        self.maps.get(collection).map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.maps.values().all(BTreeMap::is_empty)
    }

    /// Serializable copy of every map.
    pub fn snapshot(&self) -> IdentitySnapshot {
        self.maps
            .iter()
            .filter(|(_, m)| !m.is_empty())
            .map(|(c, m)| (c.clone(), m.clone()))
            .collect()
    }

    fn insert(&mut self, collection: &str, old_id: Uuid, new_id: Uuid) {
        self.issued.insert(new_id);
        self.maps
            .entry(collection.to_string())
            .or_default()
            .insert(old_id, new_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_allocate_and_resolve() {
        let mut ids = IdentityMapper::new();
        let old = Uuid::new_v4();
        let new = ids.allocate("locations", old).unwrap();
        assert_ne!(new, old);
        assert_eq!(ids.resolve("locations", old), Some(new));
        assert_eq!(ids.resolve("scenes", old), None);
        assert_eq!(ids.len("locations"), 1);
    }

    #[test]
    fn test_double_allocation_is_an_error() {
        let mut ids = IdentityMapper::new();
        let old = Uuid::new_v4();
        ids.allocate("locations", old).unwrap();
        assert!(matches!(
            ids.allocate("locations", old),
            Err(CloneError::Identity { .. })
        ));
        // The same source id in another collection is a different document.
        ids.allocate("scenes", old).unwrap();
    }

    #[test]
    fn test_collisions_are_regenerated() {
        let taken = Uuid::new_v4();
        let fresh = Uuid::new_v4();
        let queue = Arc::new(Mutex::new(vec![fresh, taken, taken]));
        let source = queue.clone();
        let mut ids = IdentityMapper::with_generator(move || {
            source.lock().unwrap().pop().unwrap_or_else(Uuid::new_v4)
        });
        ids.reserve([taken]);

        assert_eq!(ids.allocate("cast_members", Uuid::new_v4()).unwrap(), fresh);
        assert!(queue.lock().unwrap().is_empty());
    }

    #[test]
    fn test_generator_that_only_collides_is_exhausted() {
        let stuck = Uuid::new_v4();
        let mut ids = IdentityMapper::with_generator(move || stuck);
        ids.allocate("equipment", Uuid::new_v4()).unwrap();
        let err = ids.allocate("equipment", Uuid::new_v4()).unwrap_err();
        assert!(err.to_string().contains("no unique id"));
    }

    #[test]
    fn test_forget_keeps_ids_issued() {
        let repeated = Uuid::new_v4();
        let mut ids = IdentityMapper::with_generator(move || repeated);
        let old = Uuid::new_v4();
        ids.allocate("shots", old).unwrap();
        ids.forget("shots", &[old]);
        assert!(!ids.is_mapped("shots", old));
        assert!(ids.allocate("shots", old).is_err());
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let mut ids = IdentityMapper::new();
        let old = Uuid::new_v4();
        let new = ids.allocate("schedule_days", old).unwrap();
        ids.record("projects", Uuid::new_v4(), Uuid::new_v4()).unwrap();

        let restored = IdentityMapper::from_snapshot(ids.snapshot());
        assert_eq!(restored.resolve("schedule_days", old), Some(new));
        assert_eq!(restored.snapshot(), ids.snapshot());
    }
}
