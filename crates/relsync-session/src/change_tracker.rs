//! Snapshot-based change detection.
//!
//! The tracker records each managed entity's scalar column values at
//! load/attach time and diffs current values against that snapshot on demand.
//! Comparison is by value equality, never instance identity, so re-loading
//! the same conceptual value produces no false positive. Relation-valued
//! properties are not part of snapshots; collection membership is tracked by
//! the collections themselves.

use relsync_core::{EntityHandle, InstanceId, Value, WeakEntityHandle};
use std::collections::{BTreeMap, HashMap};

/// A change-set: property name → (old value, new value). Absent entries mean
/// "unchanged".
pub type ChangeSet = BTreeMap<&'static str, (Value, Value)>;

/// Snapshot of an entity's scalar state at a point in time.
struct Snapshot {
    values: Vec<(&'static str, Value)>,
    handle: WeakEntityHandle,
}

/// Tracks scalar-value snapshots for managed entities.
#[derive(Default)]
pub struct ChangeTracker {
    snapshots: HashMap<InstanceId, Snapshot>,
}

impl ChangeTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the entity's current scalar values, replacing any prior
    /// snapshot.
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn take_snapshot(&mut self, handle: &EntityHandle) {
        let values = handle.read().to_row();
        tracing::trace!(
            entity = handle.read().entity_name(),
            columns = values.len(),
            "taking snapshot"
        );
        self.snapshots.insert(
            handle.instance_id(),
            Snapshot {
                values,
                handle: handle.downgrade(),
            },
        );
    }

    /// Whether the entity's scalar values differ from its snapshot.
    ///
    /// An entity with no snapshot is treated as changed.
    pub fn has_changes(&self, handle: &EntityHandle) -> bool {
        match self.snapshots.get(&handle.instance_id()) {
            Some(snapshot) => handle.read().to_row() != snapshot.values,
            None => true,
        }
    }

    /// Compute the change-set against the last snapshot.
    ///
    /// With no snapshot, every column is reported with `Value::Null` as the
    /// old value.
    pub fn change_set(&self, handle: &EntityHandle) -> ChangeSet {
        let current = handle.read().to_row();
        let Some(snapshot) = self.snapshots.get(&handle.instance_id()) else {
            return current
                .into_iter()
                .map(|(name, value)| (name, (Value::Null, value)))
                .collect();
        };

        let mut changes = ChangeSet::new();
        for (name, new_value) in current {
            let old_value = snapshot
                .values
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, v)| v.clone())
                .unwrap_or(Value::Null);
            if old_value != new_value {
                changes.insert(name, (old_value, new_value));
            }
        }
        changes
    }

    /// Whether a snapshot exists for the entity.
    pub fn has_snapshot(&self, handle: &EntityHandle) -> bool {
        self.snapshots.contains_key(&handle.instance_id())
    }

    /// Drop the snapshot for one entity.
    pub fn clear(&mut self, handle: &EntityHandle) {
        self.snapshots.remove(&handle.instance_id());
    }

    /// Drop all snapshots.
    pub fn clear_all(&mut self) {
        self.snapshots.clear();
    }

    /// Remove snapshots whose instances have been dropped.
    pub fn prune(&mut self) {
        self.snapshots.retain(|_, s| s.handle.is_alive());
    }

    /// Number of tracked snapshots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Whether no snapshots are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}
