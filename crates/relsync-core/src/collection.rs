//! Diff-aware entity collections.
//!
//! A [`TrackedCollection`] is an ordered container of related entities that,
//! for database-backed collections, also remembers an "initial state"
//! snapshot taken when it was populated from storage. Diffing the current
//! members against that snapshot is what turns application-level `add`/
//! `remove` calls into link-table operations during flush.
//!
//! A collection that has never been synchronized is *plain*: it reports no
//! snapshot, and the many-to-many processor treats every member as a
//! first-time insert when the owner is newly scheduled.

use crate::entity::{Entity, EntityHandle, Ref};
use crate::value::Value;
use std::sync::Arc;

/// An ordered collection of related entities with optional initial-state
/// tracking.
pub struct TrackedCollection<E: Entity> {
    items: Vec<Ref<E>>,
    /// Members at the last synchronization point. `None` = plain collection.
    snapshot: Option<Vec<Ref<E>>>,
}

impl<E: Entity> TrackedCollection<E> {
    /// Create an empty, plain collection.
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            snapshot: None,
        }
    }

    /// Create a collection from members, leaving it plain.
    pub fn from_members(items: Vec<Ref<E>>) -> Self {
        Self {
            items,
            snapshot: None,
        }
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the collection has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate over the members in order.
    pub fn iter(&self) -> impl Iterator<Item = &Ref<E>> {
        self.items.iter()
    }

    /// Add a member. Duplicate instances are ignored.
    pub fn add(&mut self, member: Ref<E>) {
        if !self.items.iter().any(|m| Self::matches(m, &member)) {
            self.items.push(member);
        }
    }

    /// Wrap a plain entity value and add it, returning the shared reference.
    pub fn attach(&mut self, entity: E) -> Ref<E> {
        let member = crate::entity::shared(entity);
        self.items.push(Arc::clone(&member));
        member
    }

    /// Remove a member, returning whether it was present.
    pub fn remove(&mut self, member: &Ref<E>) -> bool {
        let before = self.items.len();
        self.items.retain(|m| !Self::matches(m, member));
        self.items.len() != before
    }

    /// Whether the collection carries an initial-state snapshot.
    #[must_use]
    pub fn is_tracked(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Re-capture the initial state from the current content.
    ///
    /// Idempotent: synchronizing twice without intervening mutation yields no
    /// diffs afterwards.
    pub fn mark_synchronized(&mut self) {
        self.snapshot = Some(self.items.clone());
    }

    /// Members present now but absent from the snapshot.
    ///
    /// For a plain collection this is empty; first-time population is decided
    /// by the flush-time processor, not the collection.
    pub fn added(&self) -> Vec<Ref<E>> {
        let Some(snapshot) = &self.snapshot else {
            return Vec::new();
        };
        self.items
            .iter()
            .filter(|m| !snapshot.iter().any(|s| Self::matches(s, m)))
            .cloned()
            .collect()
    }

    /// Members present in the snapshot but absent now.
    pub fn removed(&self) -> Vec<Ref<E>> {
        let Some(snapshot) = &self.snapshot else {
            return Vec::new();
        };
        snapshot
            .iter()
            .filter(|s| !self.items.iter().any(|m| Self::matches(m, s)))
            .cloned()
            .collect()
    }

    /// Whether the membership differs from the snapshot.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.added().is_empty() || !self.removed().is_empty()
    }

    /// Current members as type-erased handles.
    pub fn handles(&self) -> Vec<EntityHandle> {
        self.items.iter().cloned().map(EntityHandle::new).collect()
    }

    /// Added members as type-erased handles.
    pub fn added_handles(&self) -> Vec<EntityHandle> {
        self.added().into_iter().map(EntityHandle::new).collect()
    }

    /// Removed members as type-erased handles.
    pub fn removed_handles(&self) -> Vec<EntityHandle> {
        self.removed().into_iter().map(EntityHandle::new).collect()
    }

    /// Replace the members wholesale from type-erased handles. Handles of the
    /// wrong concrete type are dropped. With `synchronized` the new content
    /// is installed as the initial state.
    pub fn replace_handles(&mut self, handles: Vec<EntityHandle>, synchronized: bool) {
        self.items = handles.into_iter().filter_map(|h| h.typed::<E>()).collect();
        if synchronized {
            self.mark_synchronized();
        } else {
            self.snapshot = None;
        }
    }

    /// Remove the member matching a type-erased handle.
    pub fn remove_handle(&mut self, handle: &EntityHandle) -> bool {
        match handle.typed::<E>() {
            Some(member) => self.remove(&member),
            None => false,
        }
    }

    /// Membership identity: same instance, or two instances carrying equal
    /// keys.
    fn matches(a: &Ref<E>, b: &Ref<E>) -> bool {
        if Arc::ptr_eq(a, b) {
            return true;
        }
        let ka = a.read().expect("entity lock poisoned").key();
        let kb = b.read().expect("entity lock poisoned").key();
        matches!((ka, kb), (Some(x), Some(y)) if x == y)
    }

    /// Keys of the current members, skipping keyless ones.
    pub fn member_keys(&self) -> Vec<Value> {
        self.items
            .iter()
            .filter_map(|m| m.read().expect("entity lock poisoned").key())
            .collect()
    }
}

impl<E: Entity> Default for TrackedCollection<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> std::fmt::Debug for TrackedCollection<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedCollection")
            .field("len", &self.items.len())
            .field("tracked", &self.is_tracked())
            .finish()
    }
}

impl<E: Entity> FromIterator<Ref<E>> for TrackedCollection<E> {
    fn from_iter<I: IntoIterator<Item = Ref<E>>>(iter: I) -> Self {
        Self::from_members(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::shared;
    use crate::error::Result;
    use crate::row::Row;

    #[derive(Debug, Default)]
    struct Tag {
        id: Option<i64>,
    }

    impl Entity for Tag {
        const ENTITY: &'static str = "Tag";
        const TABLE: &'static str = "tags";
        const KEY_COLUMN: &'static str = "id";

        fn key(&self) -> Option<Value> {
            self.id.map(Value::BigInt)
        }

        fn set_key(&mut self, key: Value) {
            self.id = key.as_i64();
        }

        fn to_row(&self) -> Vec<(&'static str, Value)> {
            vec![("id", self.id.into())]
        }

        fn from_row(row: &Row) -> Result<Self> {
            Ok(Self {
                id: row.named_opt_i64("id")?,
            })
        }
    }

    fn tag(id: i64) -> Ref<Tag> {
        shared(Tag { id: Some(id) })
    }

    #[test]
    fn test_diff_round_trip() {
        let mut collection: TrackedCollection<Tag> =
            vec![tag(1), tag(2), tag(3)].into_iter().collect();
        collection.mark_synchronized();

        let four = tag(4);
        collection.add(four);
        let two = tag(2);
        assert!(collection.remove(&two));

        let added: Vec<i64> = collection
            .added()
            .iter()
            .map(|t| t.read().unwrap().id.unwrap())
            .collect();
        let removed: Vec<i64> = collection
            .removed()
            .iter()
            .map(|t| t.read().unwrap().id.unwrap())
            .collect();
        assert_eq!(added, vec![4]);
        assert_eq!(removed, vec![2]);

        collection.mark_synchronized();
        assert!(collection.added().is_empty());
        assert!(collection.removed().is_empty());
        assert!(!collection.has_changes());
    }

    #[test]
    fn test_synchronize_is_idempotent() {
        let mut collection: TrackedCollection<Tag> = vec![tag(1)].into_iter().collect();
        collection.mark_synchronized();
        collection.mark_synchronized();
        assert!(!collection.has_changes());
    }

    #[test]
    fn test_plain_collection_reports_no_diffs() {
        let mut collection = TrackedCollection::new();
        collection.add(tag(1));
        assert!(!collection.is_tracked());
        assert!(collection.added().is_empty());
        assert!(collection.removed().is_empty());
    }

    #[test]
    fn test_membership_by_key_across_instances() {
        let mut collection = TrackedCollection::new();
        collection.add(tag(7));
        collection.mark_synchronized();

        // a different instance with the same key counts as the same member
        assert!(collection.remove(&tag(7)));
        let removed = collection.removed();
        assert_eq!(removed.len(), 1);
    }

    #[test]
    fn test_keyless_members_tracked_by_instance() {
        let mut collection = TrackedCollection::new();
        let fresh = shared(Tag::default());
        collection.add(Arc::clone(&fresh));
        collection.mark_synchronized();

        // a second keyless instance is a distinct member
        collection.add(shared(Tag::default()));
        assert_eq!(collection.added().len(), 1);
        assert!(collection.removed().is_empty());

        assert!(collection.remove(&fresh));
        assert_eq!(collection.removed().len(), 1);
    }

    #[test]
    fn test_duplicate_add_ignored() {
        let mut collection = TrackedCollection::new();
        collection.add(tag(1));
        collection.add(tag(1));
        assert_eq!(collection.len(), 1);
    }

    #[test]
    fn test_replace_handles_sets_snapshot() {
        let mut collection: TrackedCollection<Tag> = TrackedCollection::new();
        collection.replace_handles(
            vec![
                EntityHandle::new(tag(1)),
                EntityHandle::new(tag(2)),
            ],
            true,
        );
        assert_eq!(collection.len(), 2);
        assert!(collection.is_tracked());
        assert!(!collection.has_changes());
    }
}
