//! Invalidation table - the current version of every live entity
//!
//! Collaborators register an entity when it is created and re-register it with a
//! higher version after every edit. Deleting an entity removes its row, so cached
//! values derived from it become stale without any tombstone bookkeeping.
//!
//! Versions are deliberately approximate: they may skip numbers or keep going up
//! after an undo. The only contract is that a semantic edit never leaves the
//! recorded version unchanged.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use log::trace;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Monotonic edit counter of an entity
pub type Version = u64;

/// Stable identity of a versioned unit of content
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityId {
    /// A drawable frame: frame id (shared by all layers at one timeline slot) + owning layer
    Frame { frame: Uuid, layer: Uuid },
    /// Any other versioned input, e.g. an overlay mask owned by the view
    Named(String),
}

impl EntityId {
    pub fn frame(frame: Uuid, layer: Uuid) -> Self {
        EntityId::Frame { frame, layer }
    }

    pub fn named(name: impl Into<String>) -> Self {
        EntityId::Named(name.into())
    }
}

impl From<&str> for EntityId {
    fn from(name: &str) -> Self {
        EntityId::Named(name.to_string())
    }
}

impl From<String> for EntityId {
    fn from(name: String) -> Self {
        EntityId::Named(name)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Frame { frame, layer } => write!(f, "frame:{}@{}", frame, layer),
            EntityId::Named(name) => write!(f, "{}", name),
        }
    }
}

/// Shared handle to the `EntityId -> Version` table.
///
/// Cloning is cheap; every clone sees the same rows. Writes and cache lookups are
/// serialized through one mutex so a parallel producer can never interleave a
/// version bump with a lookup that should observe it.
#[derive(Debug, Clone, Default)]
pub struct VersionTable {
    rows: Arc<Mutex<HashMap<EntityId, Version>>>,
}

impl VersionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the current version of `id` (creation or edit).
    ///
    /// A lower version than the one already recorded is accepted as-is.
    pub fn register(&self, id: EntityId, version: Version) {
        trace!("register {} v{}", id, version);
        self.rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, version);
    }

    /// Forget `id`; everything derived from it is stale from now on
    pub fn unregister(&self, id: &EntityId) -> Option<Version> {
        trace!("unregister {}", id);
        self.rows.lock().unwrap_or_else(|e| e.into_inner()).remove(id)
    }

    pub fn current(&self, id: &EntityId) -> Option<Version> {
        self.rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .copied()
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.rows.lock().unwrap_or_else(|e| e.into_inner()).contains_key(id)
    }

    /// True if any `(id, version)` pair no longer matches the table.
    ///
    /// A pair is stale when its id is gone or when the recorded version differs
    /// from the one the value was computed at, in either direction.
    pub fn is_stale<'a, I>(&self, deps: I) -> bool
    where
        I: IntoIterator<Item = &'a (EntityId, Version)>,
    {
        let rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        deps.into_iter()
            .any(|(id, version)| rows.get(id) != Some(version))
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_unregister() {
        let table = VersionTable::new();
        table.register("f1".into(), 0);
        assert_eq!(table.current(&"f1".into()), Some(0));

        table.register("f1".into(), 3);
        assert_eq!(table.current(&"f1".into()), Some(3));

        assert_eq!(table.unregister(&"f1".into()), Some(3));
        assert!(!table.contains(&"f1".into()));
        assert!(table.is_empty());
    }

    #[test]
    fn test_clones_share_rows() {
        let table = VersionTable::new();
        let other = table.clone();
        other.register(EntityId::named("mask"), 7);
        assert_eq!(table.current(&EntityId::named("mask")), Some(7));
    }

    #[test]
    fn test_staleness() {
        let table = VersionTable::new();
        let frame = EntityId::frame(Uuid::new_v4(), Uuid::new_v4());
        table.register(frame.clone(), 2);

        assert!(!table.is_stale(&[(frame.clone(), 2)]));
        // computed before the last edit
        assert!(table.is_stale(&[(frame.clone(), 1)]));
        // recorded version went backwards: treat as stale rather than risk a false hit
        assert!(table.is_stale(&[(frame.clone(), 5)]));
        // unknown entity
        assert!(table.is_stale(&[(EntityId::named("gone"), 0)]));
        // empty dependency set never goes stale
        assert!(!table.is_stale(std::iter::empty()));
    }
}
