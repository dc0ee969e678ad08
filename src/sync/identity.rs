//! External-to-internal identifier mapping
//!
//! Populated whenever an entity is upserted, and read when a row needs to
//! reference another entity (a player's team, a game's home and away teams)
//! without a round-trip to the store.

use crate::sync::provider::EntityKind;
use dashmap::DashMap;
use std::collections::HashMap;

/// Concurrent `(kind, external id) -> internal id` map
#[derive(Debug, Default)]
pub struct IdentityMapper {
    ids: DashMap<(EntityKind, String), i64>,
}

impl IdentityMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Internal id for an external id, if one has been recorded
    pub fn get(&self, kind: EntityKind, external_id: &str) -> Option<i64> {
        self.ids
            .get(&(kind, external_id.to_string()))
            .map(|entry| *entry.value())
    }

    /// Record a mapping; the last writer wins
    pub fn set(&self, kind: EntityKind, external_id: impl Into<String>, internal_id: i64) {
        self.ids.insert((kind, external_id.into()), internal_id);
    }

    /// Number of mappings per entity kind
    pub fn stats(&self) -> HashMap<EntityKind, usize> {
        let mut counts = HashMap::new();
        for entry in self.ids.iter() {
            *counts.entry(entry.key().0).or_insert(0) += 1;
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Forget every mapping of one kind
    pub fn clear_kind(&self, kind: EntityKind) {
        self.ids.retain(|(k, _), _| *k != kind);
    }
}
