//! Entity lifecycle states and pending-operation schedules.
//!
//! The [`LifecycleTracker`] records each entity's position in the
//! NEW / MANAGED / REMOVED / DETACHED state machine and the per-cycle
//! schedules of pending insertions and deletions, including the dependency
//! edges that order cascaded child inserts after their parents.
//!
//! Conflict rule: scheduling the same entity for both insertion and deletion
//! in one cycle resolves to **deletion wins**. A pending NEW entity that gets
//! scheduled for deletion is simply dropped from the insertion schedule (its
//! row never existed) and detached.

use relsync_core::{EntityHandle, InstanceId, WeakEntityHandle};
use std::collections::HashMap;

/// State of a tracked entity instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    /// Scheduled for insertion, not yet persisted.
    New,
    /// Synchronized with a storage row.
    Managed,
    /// Deleted from storage; terminal for this instance.
    Removed,
    /// Disconnected from the engine; terminal for this instance.
    Detached,
}

struct TrackedState {
    state: EntityState,
    handle: WeakEntityHandle,
}

/// A dependency edge: the child's insert is ordered after the parent's, and
/// once the parent's key is known it is copied into `fk_column` on the child.
struct DependencyEdge {
    parent_id: InstanceId,
    parent: WeakEntityHandle,
    fk_column: Option<&'static str>,
}

/// Tracks lifecycle states and the schedules of pending operations.
#[derive(Default)]
pub struct LifecycleTracker {
    states: HashMap<InstanceId, TrackedState>,
    /// Managed instances in first-seen order, for stable iteration.
    managed_order: Vec<InstanceId>,
    insertions: Vec<EntityHandle>,
    deletions: Vec<EntityHandle>,
    dependencies: HashMap<InstanceId, Vec<DependencyEdge>>,
}

impl LifecycleTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule an entity for insertion, marking it NEW.
    ///
    /// Idempotent per instance. Ignored when the entity is already managed,
    /// or already scheduled for deletion in this cycle (deletion wins).
    pub fn schedule_for_insertion(&mut self, handle: &EntityHandle) {
        let id = handle.instance_id();
        if self.is_scheduled_for_deletion(handle) {
            tracing::warn!(
                entity = handle.read().entity_name(),
                "entity scheduled for deletion in this cycle; insertion ignored"
            );
            return;
        }
        match self.states.get(&id).map(|t| t.state) {
            Some(EntityState::Managed | EntityState::Removed | EntityState::Detached) => return,
            Some(EntityState::New) | None => {}
        }
        if self.insertions.iter().any(|h| h.instance_id() == id) {
            return;
        }
        self.states.insert(
            id,
            TrackedState {
                state: EntityState::New,
                handle: handle.downgrade(),
            },
        );
        self.insertions.push(handle.clone());
        tracing::trace!(
            entity = handle.read().entity_name(),
            "scheduled for insertion"
        );
    }

    /// Schedule an entity for deletion.
    ///
    /// A pending NEW entity is removed from the insertion schedule and
    /// detached instead; no DELETE is emitted for a row that never existed.
    pub fn schedule_for_deletion(&mut self, handle: &EntityHandle) {
        let id = handle.instance_id();
        let was_pending_insert = self.insertions.iter().any(|h| h.instance_id() == id);
        if was_pending_insert {
            self.insertions.retain(|h| h.instance_id() != id);
            self.dependencies.remove(&id);
            self.set_state(handle, EntityState::Detached);
            tracing::debug!(
                entity = handle.read().entity_name(),
                "pending insertion cancelled by deletion"
            );
            return;
        }
        if self.deletions.iter().any(|h| h.instance_id() == id) {
            return;
        }
        self.deletions.push(handle.clone());
        tracing::trace!(
            entity = handle.read().entity_name(),
            "scheduled for deletion"
        );
    }

    /// Mark an entity as managed.
    pub fn manage(&mut self, handle: &EntityHandle) {
        self.set_state(handle, EntityState::Managed);
    }

    /// Record or replace the state of an instance.
    pub fn set_state(&mut self, handle: &EntityHandle, state: EntityState) {
        let id = handle.instance_id();
        if state == EntityState::Managed && !self.managed_order.contains(&id) {
            self.managed_order.push(id);
        }
        self.states.insert(
            id,
            TrackedState {
                state,
                handle: handle.downgrade(),
            },
        );
    }

    /// Current state of an instance, if tracked.
    pub fn state_of(&self, handle: &EntityHandle) -> Option<EntityState> {
        self.states.get(&handle.instance_id()).map(|t| t.state)
    }

    /// Whether the instance is scheduled for insertion this cycle.
    pub fn is_scheduled_for_insertion(&self, handle: &EntityHandle) -> bool {
        let id = handle.instance_id();
        self.insertions.iter().any(|h| h.instance_id() == id)
    }

    /// Whether the instance is scheduled for deletion this cycle.
    pub fn is_scheduled_for_deletion(&self, handle: &EntityHandle) -> bool {
        let id = handle.instance_id();
        self.deletions.iter().any(|h| h.instance_id() == id)
    }

    /// Scheduled insertions in schedule order.
    pub fn scheduled_insertions(&self) -> Vec<EntityHandle> {
        self.insertions.clone()
    }

    /// Scheduled deletions in schedule order.
    pub fn scheduled_deletions(&self) -> Vec<EntityHandle> {
        self.deletions.clone()
    }

    /// Live managed entities in first-seen order, excluding those scheduled
    /// for deletion.
    pub fn managed_entities(&self) -> Vec<EntityHandle> {
        self.managed_order
            .iter()
            .filter_map(|id| {
                let tracked = self.states.get(id)?;
                if tracked.state != EntityState::Managed {
                    return None;
                }
                let handle = tracked.handle.upgrade()?;
                if self.is_scheduled_for_deletion(&handle) {
                    return None;
                }
                Some(handle)
            })
            .collect()
    }

    /// Record that `child`'s insert must be ordered after `parent`'s, copying
    /// the parent's key into `fk_column` on the child once known.
    pub fn add_insertion_dependency(
        &mut self,
        child: &EntityHandle,
        parent: &EntityHandle,
        fk_column: Option<&'static str>,
    ) {
        let parent_id = parent.instance_id();
        let edges = self.dependencies.entry(child.instance_id()).or_default();
        if edges
            .iter()
            .any(|e| e.parent_id == parent_id && e.fk_column == fk_column)
        {
            return;
        }
        edges.push(DependencyEdge {
            parent_id,
            parent: parent.downgrade(),
            fk_column,
        });
    }

    /// Dependency parents of `child` with their foreign key columns.
    pub fn dependency_edges(&self, child: &EntityHandle) -> Vec<(EntityHandle, Option<&'static str>)> {
        self.dependencies
            .get(&child.instance_id())
            .map(|edges| {
                edges
                    .iter()
                    .filter_map(|e| Some((e.parent.upgrade()?, e.fk_column)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Scheduled insertions ordered parents-first along dependency edges,
    /// stable with respect to schedule order. A dependency cycle falls back
    /// to schedule order for the entities involved.
    pub fn insertion_order(&self) -> Vec<EntityHandle> {
        let scheduled: Vec<InstanceId> = self.insertions.iter().map(|h| h.instance_id()).collect();
        let mut emitted: Vec<EntityHandle> = Vec::with_capacity(self.insertions.len());
        let mut emitted_ids: Vec<InstanceId> = Vec::with_capacity(self.insertions.len());
        let mut remaining: Vec<&EntityHandle> = self.insertions.iter().collect();

        while !remaining.is_empty() {
            let mut progressed = false;
            let mut next_round = Vec::with_capacity(remaining.len());
            for handle in remaining {
                let id = handle.instance_id();
                let blocked = self.dependencies.get(&id).is_some_and(|edges| {
                    edges.iter().any(|e| {
                        scheduled.contains(&e.parent_id) && !emitted_ids.contains(&e.parent_id)
                    })
                });
                if blocked {
                    next_round.push(handle);
                } else {
                    emitted.push(handle.clone());
                    emitted_ids.push(id);
                    progressed = true;
                }
            }
            if !progressed {
                tracing::warn!(
                    remaining = next_round.len(),
                    "insertion dependency cycle; falling back to schedule order"
                );
                emitted.extend(next_round.into_iter().cloned());
                break;
            }
            remaining = next_round;
        }

        emitted
    }

    /// Number of pending insertions.
    #[must_use]
    pub fn pending_insertions(&self) -> usize {
        self.insertions.len()
    }

    /// Number of pending deletions.
    #[must_use]
    pub fn pending_deletions(&self) -> usize {
        self.deletions.len()
    }

    /// Detach an instance: drop it from all schedules and mark it DETACHED.
    pub fn detach(&mut self, handle: &EntityHandle) {
        let id = handle.instance_id();
        self.insertions.retain(|h| h.instance_id() != id);
        self.deletions.retain(|h| h.instance_id() != id);
        self.dependencies.remove(&id);
        self.set_state(handle, EntityState::Detached);
    }

    /// Clear the per-cycle schedules and dependency edges, keeping lifecycle
    /// states.
    pub fn clear_schedules(&mut self) {
        self.insertions.clear();
        self.deletions.clear();
        self.dependencies.clear();
    }

    /// Clear everything.
    pub fn clear(&mut self) {
        self.states.clear();
        self.managed_order.clear();
        self.clear_schedules();
    }

    /// Remove state entries whose instances have been dropped.
    pub fn prune(&mut self) {
        self.states.retain(|_, tracked| tracked.handle.is_alive());
        let states = &self.states;
        self.managed_order.retain(|id| states.contains_key(id));
    }
}
