//! Entity trait and shared entity handles.
//!
//! An [`Entity`] is a mutable domain object mapped to exactly one table row
//! identified by a single scalar key. Entities are shared through
//! `Arc<RwLock<_>>` cells so the identity map can guarantee a single live
//! instance per row while the engine and the application both hold references
//! to it.
//!
//! # Type erasure
//!
//! The engine works over heterogeneous entity types. [`EntityHandle`] keeps
//! two views of the *same* allocation: a `dyn AnyEntity` view for generic
//! access (key, table, scalar row, relation metadata) and a type-erased view
//! that can be downcast back to the concrete `Ref<E>` the application works
//! with. Getting an entity twice through the engine always yields clones of
//! the same `Arc`.

use crate::error::Result;
use crate::relation::RelationInfo;
use crate::row::Row;
use crate::value::Value;
use std::any::{Any, TypeId};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

/// A shared, mutable reference to an entity instance.
pub type Ref<E> = Arc<RwLock<E>>;

/// Wrap a plain entity value into a shared reference.
pub fn shared<E: Entity>(entity: E) -> Ref<E> {
    Arc::new(RwLock::new(entity))
}

/// Trait for domain objects mapped to database tables.
///
/// Implementations provide static mapping metadata (table, key column,
/// relation descriptors) and the scalar row conversion used for change
/// detection and writes. Relation-valued properties are *not* part of
/// `to_row`/`from_row`; they are described by [`RelationInfo`] descriptors
/// and accessed through the accessor capability table.
pub trait Entity: Any + Send + Sync + Sized {
    /// Registry name of this entity type.
    const ENTITY: &'static str;

    /// The name of the database table.
    const TABLE: &'static str;

    /// The primary key column name.
    const KEY_COLUMN: &'static str;

    /// Relation descriptors for this entity type.
    const RELATIONS: &'static [RelationInfo] = &[];

    /// The primary key value, absent until first insert.
    fn key(&self) -> Option<Value>;

    /// Set the primary key after insert.
    fn set_key(&mut self, key: Value);

    /// Convert the scalar columns of this entity to a row of values.
    ///
    /// The key column must be included (as `Value::Null` while unassigned).
    fn to_row(&self) -> Vec<(&'static str, Value)>;

    /// Construct an entity instance from a storage row.
    fn from_row(row: &Row) -> Result<Self>;

    /// Set a single scalar column by name, returning whether the column was
    /// recognized. Used to propagate foreign keys into cascaded children and
    /// link entities.
    fn set_column(&mut self, column: &str, value: Value) -> bool {
        let _ = (column, value);
        false
    }
}

/// Object-safe view of an entity, implemented for every [`Entity`].
pub trait AnyEntity: Any + Send + Sync {
    /// Registry name of the concrete entity type.
    fn entity_name(&self) -> &'static str;

    /// Table the entity maps to.
    fn table(&self) -> &'static str;

    /// Primary key column name.
    fn key_column(&self) -> &'static str;

    /// Relation descriptors of the concrete entity type.
    fn relations(&self) -> &'static [RelationInfo];

    /// The primary key value, if assigned.
    fn key(&self) -> Option<Value>;

    /// Assign the primary key.
    fn set_key(&mut self, key: Value);

    /// Scalar columns as a row of values.
    fn to_row(&self) -> Vec<(&'static str, Value)>;

    /// Set a single scalar column by name.
    fn set_column(&mut self, column: &str, value: Value) -> bool;

    /// Downcast support.
    fn as_any(&self) -> &dyn Any;

    /// Mutable downcast support.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<E: Entity> AnyEntity for E {
    fn entity_name(&self) -> &'static str {
        E::ENTITY
    }

    fn table(&self) -> &'static str {
        E::TABLE
    }

    fn key_column(&self) -> &'static str {
        E::KEY_COLUMN
    }

    fn relations(&self) -> &'static [RelationInfo] {
        E::RELATIONS
    }

    fn key(&self) -> Option<Value> {
        Entity::key(self)
    }

    fn set_key(&mut self, key: Value) {
        Entity::set_key(self, key);
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        Entity::to_row(self)
    }

    fn set_column(&mut self, column: &str, value: Value) -> bool {
        Entity::set_column(self, column, value)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Identity of a live entity instance, independent of its primary key.
///
/// Two handles have the same `InstanceId` exactly when they share the same
/// underlying allocation. Used for per-cycle processed sets and for tracking
/// entities that have no key yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(usize);

/// A type-erased handle to a shared entity instance.
///
/// Cloning the handle clones the `Arc`, not the entity.
#[derive(Clone)]
pub struct EntityHandle {
    /// The cell as `Arc<RwLock<E>>`, kept for typed recovery via downcast.
    erased: Arc<dyn Any + Send + Sync>,
    /// The same allocation, viewable generically.
    shared: Arc<RwLock<dyn AnyEntity>>,
    /// `TypeId` of the concrete entity type.
    type_id: TypeId,
}

impl EntityHandle {
    /// Build a handle from an existing shared reference.
    pub fn new<E: Entity>(cell: Ref<E>) -> Self {
        Self {
            erased: cell.clone(),
            shared: cell,
            type_id: TypeId::of::<E>(),
        }
    }

    /// Wrap a plain entity value and build a handle for it.
    pub fn from_entity<E: Entity>(entity: E) -> Self {
        Self::new(shared(entity))
    }

    /// Recover the typed shared reference, if `E` is the concrete type.
    pub fn typed<E: Entity>(&self) -> Option<Ref<E>> {
        Arc::clone(&self.erased).downcast::<RwLock<E>>().ok()
    }

    /// `TypeId` of the concrete entity type behind this handle.
    #[must_use]
    pub fn entity_type(&self) -> TypeId {
        self.type_id
    }

    /// Lock the entity for reading.
    pub fn read(&self) -> RwLockReadGuard<'_, dyn AnyEntity> {
        self.shared.read().expect("entity lock poisoned")
    }

    /// Lock the entity for writing.
    pub fn write(&self) -> RwLockWriteGuard<'_, dyn AnyEntity> {
        self.shared.write().expect("entity lock poisoned")
    }

    /// The entity's primary key value, if assigned.
    pub fn key(&self) -> Option<Value> {
        self.read().key()
    }

    /// Identity of the underlying instance.
    #[must_use]
    pub fn instance_id(&self) -> InstanceId {
        InstanceId(Arc::as_ptr(&self.erased).cast::<()>() as usize)
    }

    /// Whether two handles point at the same instance.
    ///
    /// Compares allocation addresses, not full fat pointers, so the answer
    /// does not depend on which codegen unit produced the vtable.
    #[must_use]
    pub fn ptr_eq(&self, other: &EntityHandle) -> bool {
        self.instance_id() == other.instance_id()
    }

    /// Whether this handle refers to the same row as `other`: the same
    /// instance, or two instances of the same type carrying equal keys.
    #[must_use]
    pub fn same_row(&self, other: &EntityHandle) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        if self.type_id != other.type_id {
            return false;
        }
        match (self.key(), other.key()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Create a non-owning handle to the same instance.
    #[must_use]
    pub fn downgrade(&self) -> WeakEntityHandle {
        WeakEntityHandle {
            erased: Arc::downgrade(&self.erased),
            shared: Arc::downgrade(&self.shared),
            type_id: self.type_id,
        }
    }
}

impl std::fmt::Debug for EntityHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = self.read();
        f.debug_struct("EntityHandle")
            .field("entity", &guard.entity_name())
            .field("key", &guard.key())
            .finish()
    }
}

/// A non-owning handle to a shared entity instance.
///
/// The identity map and other engine-side tables hold weak handles so they
/// never become the reason an entity outlives its last real owner.
#[derive(Clone)]
pub struct WeakEntityHandle {
    erased: Weak<dyn Any + Send + Sync>,
    shared: Weak<RwLock<dyn AnyEntity>>,
    type_id: TypeId,
}

impl WeakEntityHandle {
    /// Attempt to upgrade to a strong handle.
    pub fn upgrade(&self) -> Option<EntityHandle> {
        let erased = self.erased.upgrade()?;
        let shared = self.shared.upgrade()?;
        Some(EntityHandle {
            erased,
            shared,
            type_id: self.type_id,
        })
    }

    /// Whether the underlying instance is still alive.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.erased.strong_count() > 0
    }
}

impl std::fmt::Debug for WeakEntityHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakEntityHandle")
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Widget {
        id: Option<i64>,
        label: String,
    }

    impl Entity for Widget {
        const ENTITY: &'static str = "Widget";
        const TABLE: &'static str = "widgets";
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
                ("label", Value::Text(self.label.clone())),
            ]
        }

        fn from_row(row: &Row) -> Result<Self> {
            Ok(Self {
                id: row.named_opt_i64("id")?,
                label: row.named_text("label")?,
            })
        }
    }

    #[test]
    fn test_handle_shares_the_instance() {
        let cell = shared(Widget {
            id: Some(1),
            label: "bolt".to_string(),
        });
        let handle = EntityHandle::new(Arc::clone(&cell));

        handle.write().set_column("label", Value::Null);
        // set_column is unimplemented for Widget, so nothing changed
        assert_eq!(cell.read().unwrap().label, "bolt");

        cell.write().unwrap().label = "nut".to_string();
        let typed = handle.typed::<Widget>().unwrap();
        assert_eq!(typed.read().unwrap().label, "nut");
        assert!(Arc::ptr_eq(&cell, &typed));
    }

    #[test]
    fn test_instance_identity() {
        let a = EntityHandle::from_entity(Widget::default());
        let b = EntityHandle::from_entity(Widget::default());
        assert_eq!(a.instance_id(), a.clone().instance_id());
        assert_ne!(a.instance_id(), b.instance_id());
        assert!(a.ptr_eq(&a.clone()));
        assert!(!a.ptr_eq(&b));
    }

    #[test]
    fn test_same_row_by_key() {
        let a = EntityHandle::from_entity(Widget {
            id: Some(3),
            label: String::new(),
        });
        let b = EntityHandle::from_entity(Widget {
            id: Some(3),
            label: "other".to_string(),
        });
        let c = EntityHandle::from_entity(Widget::default());
        assert!(a.same_row(&b));
        assert!(!a.same_row(&c));
    }

    #[test]
    fn test_weak_handle_dies_with_last_owner() {
        let handle = EntityHandle::from_entity(Widget::default());
        let weak = handle.downgrade();
        assert!(weak.is_alive());
        assert!(weak.upgrade().is_some());

        drop(handle);
        assert!(!weak.is_alive());
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_typed_downcast_rejects_wrong_type() {
        #[derive(Debug, Default)]
        struct Gadget {
            id: Option<i64>,
        }

        impl Entity for Gadget {
            const ENTITY: &'static str = "Gadget";
            const TABLE: &'static str = "gadgets";
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

        let handle = EntityHandle::from_entity(Widget::default());
        assert!(handle.typed::<Gadget>().is_none());
        assert!(handle.typed::<Widget>().is_some());
    }
}
