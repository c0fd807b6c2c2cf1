//! Collection synchronization.
//!
//! After a successful flush (or a fresh load) every diff-aware collection's
//! initial state must be re-captured from its current content, so the next
//! cycle's diffs start from zero. Both operations are idempotent.

use crate::lifecycle::LifecycleTracker;
use relsync_core::EntityHandle;

/// Re-capture initial state for every collection-valued relation property on
/// the entity.
pub fn synchronize_entity_collections(handle: &EntityHandle) {
    let relations = handle.read().relations();
    for relation in relations {
        if let Some(ops) = relation.ops.collection {
            (ops.synchronize)(&mut *handle.write());
        }
    }
}

/// Apply [`synchronize_entity_collections`] to every managed entity.
pub fn synchronize_all_collections(lifecycle: &LifecycleTracker) {
    for handle in lifecycle.managed_entities() {
        synchronize_entity_collections(&handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relsync_core::{
        Entity, RelationInfo, Result, Row, TrackedCollection, Value, collection_accessor, shared,
    };
    use std::sync::Arc;

    #[derive(Debug, Default)]
    struct Shelf {
        id: Option<i64>,
        books: TrackedCollection<Book>,
    }

    #[derive(Debug, Default)]
    struct Book {
        id: Option<i64>,
    }

    impl Entity for Book {
        const ENTITY: &'static str = "Book";
        const TABLE: &'static str = "books";
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

    impl Entity for Shelf {
        const ENTITY: &'static str = "Shelf";
        const TABLE: &'static str = "shelves";
        const KEY_COLUMN: &'static str = "id";
        const RELATIONS: &'static [RelationInfo] = &[RelationInfo::one_to_many(
            "books",
            "Book",
            "shelf_id",
            collection_accessor!(Shelf, books),
        )];

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
                ..Self::default()
            })
        }
    }

    #[test]
    fn test_synchronize_resets_diffs_idempotently() {
        let shelf = shared(Shelf {
            id: Some(1),
            ..Shelf::default()
        });
        shelf
            .write()
            .unwrap()
            .books
            .add(shared(Book { id: Some(1) }));

        let handle = relsync_core::EntityHandle::new(Arc::clone(&shelf));
        synchronize_entity_collections(&handle);
        assert!(shelf.read().unwrap().books.is_tracked());
        assert!(!shelf.read().unwrap().books.has_changes());

        // idempotent: running again without mutation changes nothing
        synchronize_entity_collections(&handle);
        assert!(!shelf.read().unwrap().books.has_changes());
    }

    #[test]
    fn test_synchronize_all_covers_managed_entities() {
        let mut lifecycle = LifecycleTracker::new();
        let shelf = shared(Shelf {
            id: Some(1),
            ..Shelf::default()
        });
        shelf
            .write()
            .unwrap()
            .books
            .add(shared(Book { id: Some(2) }));

        let handle = relsync_core::EntityHandle::new(Arc::clone(&shelf));
        lifecycle.manage(&handle);

        synchronize_all_collections(&lifecycle);
        assert!(shelf.read().unwrap().books.is_tracked());
    }
}
