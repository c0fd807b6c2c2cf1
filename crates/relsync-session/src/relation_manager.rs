//! Flush-time relation discovery and link-operation processing.
//!
//! Once per flush cycle the relation manager walks every candidate entity
//! (scheduled insertions plus managed-and-not-deleted entities, including
//! entities it discovers along the way):
//!
//! - **one-to-many**: new children found inside collections are cascaded onto
//!   the insertion schedule with a dependency edge on their owner, so their
//!   foreign keys can be filled in once the owner's key is known;
//! - **many-to-many**: collection membership changes become pending link
//!   operations, processed against storage only after entity inserts have
//!   established primary keys.
//!
//! Each (entity instance, property) pair is visited at most once per cycle,
//! which also breaks cyclic object graphs without any cycle-detection
//! algorithm.

use crate::identity_map::IdentityMap;
use crate::lifecycle::LifecycleTracker;
use crate::link_manager::LinkEntityManager;
use relsync_core::{
    EntityHandle, EntityRegistry, Error, InstanceId, RelationInfo, RelationKind, Result, Storage,
};
use std::collections::{HashSet, VecDeque};

/// Direction of a pending link operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOpKind {
    /// Create a link row between the pair.
    Insert,
    /// Delete the link row between the pair.
    Delete,
}

/// A queued link operation, resolved against storage during the link phase.
#[derive(Clone)]
pub struct LinkOp {
    /// Operation direction.
    pub kind: LinkOpKind,
    /// The owning entity.
    pub owner: EntityHandle,
    /// The related entity on the other side of the link.
    pub related: EntityHandle,
    /// The many-to-many descriptor the operation belongs to.
    pub relation: &'static RelationInfo,
}

impl std::fmt::Debug for LinkOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkOp")
            .field("kind", &self.kind)
            .field("relation", &self.relation.name)
            .field("owner", &self.owner.key())
            .field("related", &self.related.key())
            .finish()
    }
}

/// Outcome of the link phase, for flush reporting.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinkOutcome {
    /// Link entities newly scheduled for insertion.
    pub created: usize,
    /// Link entities scheduled for deletion.
    pub removed: usize,
}

/// Orchestrates relation discovery and queued link operations for one engine.
#[derive(Default)]
pub struct RelationManager {
    /// Per-cycle suppression set: (instance, property).
    processed: HashSet<(InstanceId, &'static str)>,
    /// Queued link operations, executed after entity writes.
    pending: Vec<LinkOp>,
    links: LinkEntityManager,
}

impl RelationManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset all per-cycle state. Must run at the start of every flush cycle
    /// and after a failed one.
    pub fn begin_cycle(&mut self) {
        self.processed.clear();
        self.pending.clear();
        self.links.begin_cycle();
    }

    /// Borrow the link entity manager.
    pub fn link_manager(&mut self) -> &mut LinkEntityManager {
        &mut self.links
    }

    /// Queued link operations awaiting the link phase.
    pub fn pending_link_ops(&self) -> &[LinkOp] {
        &self.pending
    }

    /// Run relation discovery over all candidate entities.
    ///
    /// Safe to invoke more than once per cycle: cascade scheduling is
    /// idempotent and the per-(entity, property) suppression set prevents
    /// duplicate link operations.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn process_relation_changes(&mut self, lifecycle: &mut LifecycleTracker) -> Result<()> {
        let mut worklist: VecDeque<EntityHandle> = lifecycle
            .scheduled_insertions()
            .into_iter()
            .chain(lifecycle.managed_entities())
            .collect();
        let mut visited: HashSet<InstanceId> = HashSet::new();

        while let Some(owner) = worklist.pop_front() {
            if !visited.insert(owner.instance_id()) {
                continue;
            }
            let relations = owner.read().relations();
            for relation in relations {
                match relation.kind {
                    RelationKind::OneToMany => {
                        self.cascade_one_to_many(&owner, relation, lifecycle, &mut worklist)?;
                    }
                    RelationKind::ManyToMany => {
                        self.queue_many_to_many(&owner, relation, lifecycle)?;
                    }
                    RelationKind::OneToOne | RelationKind::ManyToOne => {}
                }
            }
        }

        tracing::debug!(
            candidates = visited.len(),
            queued_link_ops = self.pending.len(),
            "relation discovery complete"
        );
        Ok(())
    }

    /// Cascade insertion of new children found in a one-to-many collection.
    fn cascade_one_to_many(
        &mut self,
        owner: &EntityHandle,
        relation: &'static RelationInfo,
        lifecycle: &mut LifecycleTracker,
        worklist: &mut VecDeque<EntityHandle>,
    ) -> Result<()> {
        let ops = Self::collection_ops(owner, relation)?;
        let members = (ops.members)(&*owner.read());
        for member in members {
            if member.key().is_some() {
                // already persisted or independently managed; updates flow
                // through its own change detection
                continue;
            }
            lifecycle.schedule_for_insertion(&member);
            lifecycle.add_insertion_dependency(&member, owner, relation.remote_column);
            worklist.push_back(member);
        }
        Ok(())
    }

    /// Turn many-to-many membership changes into pending link operations.
    fn queue_many_to_many(
        &mut self,
        owner: &EntityHandle,
        relation: &'static RelationInfo,
        lifecycle: &LifecycleTracker,
    ) -> Result<()> {
        if !self.processed.insert((owner.instance_id(), relation.name)) {
            return Ok(());
        }
        let ops = Self::collection_ops(owner, relation)?;

        let guard = owner.read();
        if (ops.is_tracked)(&*guard) {
            if !(ops.has_changes)(&*guard) {
                return Ok(());
            }
            for added in (ops.added)(&*guard) {
                self.pending.push(LinkOp {
                    kind: LinkOpKind::Insert,
                    owner: owner.clone(),
                    related: added,
                    relation,
                });
            }
            for removed in (ops.removed)(&*guard) {
                self.pending.push(LinkOp {
                    kind: LinkOpKind::Delete,
                    owner: owner.clone(),
                    related: removed,
                    relation,
                });
            }
        } else if lifecycle.is_scheduled_for_insertion(owner) {
            // plain collection on a freshly persisted owner: first-time
            // population, every member is a link insert
            for member in (ops.members)(&*guard) {
                self.pending.push(LinkOp {
                    kind: LinkOpKind::Insert,
                    owner: owner.clone(),
                    related: member,
                    relation,
                });
            }
        }
        Ok(())
    }

    /// Resolve queued link operations to concrete link entities, scheduling
    /// their writes. Duplicate operations targeting the same key pair
    /// collapse through the per-cycle link cache.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn execute_link_operations<S: Storage>(
        &mut self,
        storage: &mut S,
        registry: &EntityRegistry,
        identity: &mut IdentityMap,
        lifecycle: &mut LifecycleTracker,
    ) -> Result<LinkOutcome> {
        let ops = std::mem::take(&mut self.pending);
        let mut outcome = LinkOutcome::default();

        for op in ops {
            match op.kind {
                LinkOpKind::Insert => {
                    let existing = self.links.find_existing(
                        storage,
                        registry,
                        identity,
                        op.relation,
                        &op.owner,
                        &op.related,
                    )?;
                    if existing.is_some() {
                        continue;
                    }
                    let link =
                        self.links
                            .create_link(registry, op.relation, &op.owner, &op.related)?;
                    lifecycle.schedule_for_insertion(&link);
                    outcome.created += 1;
                }
                LinkOpKind::Delete => {
                    if let Some(link) = self.links.find_existing(
                        storage,
                        registry,
                        identity,
                        op.relation,
                        &op.owner,
                        &op.related,
                    )? {
                        if !lifecycle.is_scheduled_for_deletion(&link) {
                            lifecycle.schedule_for_deletion(&link);
                            outcome.removed += 1;
                        }
                        if let (Some(owner_key), Some(related_key)) =
                            (op.owner.key(), op.related.key())
                        {
                            self.links.forget(op.relation, &owner_key, &related_key)?;
                        }
                    }
                    // keep the live collection consistent without a reload
                    if let Some(ops) = op.relation.ops.collection {
                        (ops.remove_member)(&mut *op.owner.write(), &op.related);
                    }
                }
            }
        }

        tracing::debug!(
            created = outcome.created,
            removed = outcome.removed,
            "link operations resolved"
        );
        Ok(outcome)
    }

    fn collection_ops(
        owner: &EntityHandle,
        relation: &RelationInfo,
    ) -> Result<relsync_core::CollectionOps> {
        relation.ops.collection.ok_or_else(|| {
            Error::config(
                owner.read().entity_name(),
                relation.name,
                relation.kind,
                "relation property has no collection accessor",
            )
        })
    }
}
