//! Identity map: one live instance per (entity type, primary key).
//!
//! The identity map guarantees that each table row corresponds to at most one
//! in-memory entity instance within a session. Lookups are O(1) expected,
//! keyed by `(TypeId, key hash)` with the stored key verified on access.
//!
//! Entries are weak: the map never becomes the reason an entity outlives its
//! last real owner. Dead entries are skipped on lookup and removed by
//! [`IdentityMap::prune`].

use relsync_core::{Entity, EntityHandle, Ref, Value, WeakEntityHandle};
use std::any::TypeId;
use std::collections::HashMap;

/// Hash a primary key value for use as a map key component.
pub(crate) fn hash_key(value: &Value) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    match value {
        Value::Null => 0u8.hash(&mut hasher),
        Value::Bool(b) => {
            1u8.hash(&mut hasher);
            b.hash(&mut hasher);
        }
        Value::Int(i) => {
            2u8.hash(&mut hasher);
            i.hash(&mut hasher);
        }
        Value::BigInt(i) => {
            3u8.hash(&mut hasher);
            i.hash(&mut hasher);
        }
        Value::Double(f) => {
            4u8.hash(&mut hasher);
            f.to_bits().hash(&mut hasher);
        }
        Value::Text(s) => {
            5u8.hash(&mut hasher);
            s.hash(&mut hasher);
        }
        Value::Bytes(b) => {
            6u8.hash(&mut hasher);
            b.hash(&mut hasher);
        }
        Value::Timestamp(ts) => {
            7u8.hash(&mut hasher);
            ts.hash(&mut hasher);
        }
        Value::Uuid(u) => {
            8u8.hash(&mut hasher);
            u.hash(&mut hasher);
        }
        Value::Json(j) => {
            9u8.hash(&mut hasher);
            j.to_string().hash(&mut hasher);
        }
    }
    hasher.finish()
}

/// Unique key for an entity row in the identity map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    type_id: TypeId,
    key_hash: u64,
}

impl ObjectKey {
    /// Build a key from an entity type and primary key value.
    pub fn new(type_id: TypeId, key: &Value) -> Self {
        Self {
            type_id,
            key_hash: hash_key(key),
        }
    }

    /// Build a key for a concrete entity type.
    pub fn of<E: Entity>(key: &Value) -> Self {
        Self::new(TypeId::of::<E>(), key)
    }

    /// The key hash component.
    #[must_use]
    pub fn key_hash(&self) -> u64 {
        self.key_hash
    }

    /// The type component.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }
}

/// A weak entry with the exact key retained for collision verification.
struct IdentityEntry {
    handle: WeakEntityHandle,
    key: Value,
}

/// Identity map with weak, per-row entries.
#[derive(Default)]
pub struct IdentityMap {
    entries: HashMap<ObjectKey, IdentityEntry>,
}

impl IdentityMap {
    /// Create a new empty identity map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Add an entity to the map.
    ///
    /// Entities without an assigned key are never placed here; returns
    /// `false` in that case. If an entry for the same row already exists it
    /// is replaced only when dead; the first live instance wins.
    pub fn add(&mut self, handle: &EntityHandle) -> bool {
        let Some(key) = handle.key() else {
            return false;
        };
        let map_key = ObjectKey::new(handle.entity_type(), &key);
        if let Some(existing) = self.entries.get(&map_key) {
            if existing.handle.is_alive() && existing.key == key {
                return true;
            }
        }
        self.entries.insert(
            map_key,
            IdentityEntry {
                handle: handle.downgrade(),
                key,
            },
        );
        true
    }

    /// Look up the live instance for `(type, key)`.
    pub fn get(&self, type_id: TypeId, key: &Value) -> Option<EntityHandle> {
        let entry = self.entries.get(&ObjectKey::new(type_id, key))?;
        if entry.key != *key {
            return None;
        }
        entry.handle.upgrade()
    }

    /// Look up the live instance for a concrete entity type.
    pub fn get_typed<E: Entity>(&self, key: &Value) -> Option<Ref<E>> {
        self.get(TypeId::of::<E>(), key)
            .and_then(|handle| handle.typed::<E>())
    }

    /// Whether a live instance exists for `(type, key)`.
    pub fn contains(&self, type_id: TypeId, key: &Value) -> bool {
        self.get(type_id, key).is_some()
    }

    /// Remove the entry for `(type, key)`.
    pub fn remove(&mut self, type_id: TypeId, key: &Value) -> bool {
        self.entries.remove(&ObjectKey::new(type_id, key)).is_some()
    }

    /// Remove the entry backing a handle, if its key is known.
    pub fn remove_handle(&mut self, handle: &EntityHandle) -> bool {
        match handle.key() {
            Some(key) => self.remove(handle.entity_type(), &key),
            None => false,
        }
    }

    /// Clear all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Remove entries whose instances have been dropped.
    pub fn prune(&mut self) {
        self.entries.retain(|_, entry| entry.handle.is_alive());
    }

    /// Number of entries, including stale ones not yet pruned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relsync_core::{Result, Row, shared};
    use std::sync::Arc;

    #[derive(Debug, Default)]
    struct Account {
        id: Option<i64>,
        name: String,
    }

    impl Entity for Account {
        const ENTITY: &'static str = "Account";
        const TABLE: &'static str = "accounts";
        const KEY_COLUMN: &'static str = "id";

        fn key(&self) -> Option<Value> {
            self.id.map(Value::BigInt)
        }

        fn set_key(&mut self, key: Value) {
            self.id = key.as_i64();
        }

        fn to_row(&self) -> Vec<(&'static str, Value)> {
            vec![
                ("id", self.id.into()),
                ("name", Value::Text(self.name.clone())),
            ]
        }

        fn from_row(row: &Row) -> Result<Self> {
            Ok(Self {
                id: row.named_opt_i64("id")?,
                name: row.named_text("name")?,
            })
        }
    }

    #[derive(Debug, Default)]
    struct Ledger {
        id: Option<i64>,
    }

    impl Entity for Ledger {
        const ENTITY: &'static str = "Ledger";
        const TABLE: &'static str = "ledgers";
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

    fn account(id: i64, name: &str) -> Ref<Account> {
        shared(Account {
            id: Some(id),
            name: name.to_string(),
        })
    }

    #[test]
    fn test_add_and_get_same_instance() {
        let mut map = IdentityMap::new();
        let cell = account(1, "Ada");
        assert!(map.add(&EntityHandle::new(Arc::clone(&cell))));

        let found = map.get_typed::<Account>(&Value::BigInt(1)).unwrap();
        assert!(Arc::ptr_eq(&cell, &found));
    }

    #[test]
    fn test_keyless_entities_are_rejected() {
        let mut map = IdentityMap::new();
        let handle = EntityHandle::from_entity(Account::default());
        assert!(!map.add(&handle));
        assert!(map.is_empty());
    }

    #[test]
    fn test_first_live_instance_wins() {
        let mut map = IdentityMap::new();
        let first = account(1, "Ada");
        let second = account(1, "Grace");
        map.add(&EntityHandle::new(Arc::clone(&first)));
        map.add(&EntityHandle::new(second));

        let found = map.get_typed::<Account>(&Value::BigInt(1)).unwrap();
        assert_eq!(found.read().unwrap().name, "Ada");
    }

    #[test]
    fn test_dead_entries_do_not_resolve() {
        let mut map = IdentityMap::new();
        let cell = account(1, "Ada");
        map.add(&EntityHandle::new(Arc::clone(&cell)));
        drop(cell);

        assert!(map.get_typed::<Account>(&Value::BigInt(1)).is_none());
        assert_eq!(map.len(), 1);
        map.prune();
        assert!(map.is_empty());
    }

    #[test]
    fn test_dead_entry_is_replaceable() {
        let mut map = IdentityMap::new();
        let cell = account(1, "Ada");
        map.add(&EntityHandle::new(Arc::clone(&cell)));
        drop(cell);

        let replacement = account(1, "Grace");
        assert!(map.add(&EntityHandle::new(Arc::clone(&replacement))));
        let found = map.get_typed::<Account>(&Value::BigInt(1)).unwrap();
        assert!(Arc::ptr_eq(&replacement, &found));
    }

    #[test]
    fn test_different_types_same_key() {
        let mut map = IdentityMap::new();
        let acc = account(1, "Ada");
        let ledger = shared(Ledger { id: Some(1) });
        map.add(&EntityHandle::new(Arc::clone(&acc)));
        map.add(&EntityHandle::new(Arc::clone(&ledger)));

        assert!(map.get_typed::<Account>(&Value::BigInt(1)).is_some());
        assert!(map.get_typed::<Ledger>(&Value::BigInt(1)).is_some());
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_remove_and_clear() {
        let mut map = IdentityMap::new();
        let acc = account(1, "Ada");
        let handle = EntityHandle::new(Arc::clone(&acc));
        map.add(&handle);

        assert!(map.remove_handle(&handle));
        assert!(map.get_typed::<Account>(&Value::BigInt(1)).is_none());

        map.add(&handle);
        map.clear();
        assert!(map.is_empty());
    }

    #[test]
    fn test_hash_key_distinguishes_variants() {
        assert_ne!(
            hash_key(&Value::BigInt(1)),
            hash_key(&Value::Text("1".to_string()))
        );
        assert_eq!(hash_key(&Value::BigInt(1)), hash_key(&Value::BigInt(1)));
    }
}
