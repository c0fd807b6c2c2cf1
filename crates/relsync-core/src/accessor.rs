//! Accessor capability table for relation-valued properties.
//!
//! The engine reads and writes relation properties on entities it only knows
//! as `dyn AnyEntity`. Each [`RelationInfo`](crate::relation::RelationInfo)
//! therefore carries a table of plain function pointers, built once per
//! (entity type, property) at compile time. The
//! [`reference_accessor!`](crate::reference_accessor) and
//! [`collection_accessor!`](crate::collection_accessor) macros expand to the
//! downcast-and-delegate bodies so entity declarations stay short.

use crate::entity::{AnyEntity, EntityHandle};

/// Read a single-valued relation property.
pub type GetRefFn = fn(&dyn AnyEntity) -> Option<EntityHandle>;

/// Write a single-valued relation property.
///
/// Returns `false` when the property rejects the value (wrong concrete type,
/// or the property is not settable on this entity).
pub type SetRefFn = fn(&mut dyn AnyEntity, Option<EntityHandle>) -> bool;

/// Accessors for one relation property.
#[derive(Clone, Copy)]
pub struct RelationOps {
    /// Getter for single-valued relations (ManyToOne / OneToOne).
    pub get_ref: Option<GetRefFn>,

    /// Setter for single-valued relations.
    pub set_ref: Option<SetRefFn>,

    /// Accessors for collection-valued relations (OneToMany / ManyToMany).
    pub collection: Option<CollectionOps>,
}

impl RelationOps {
    /// A property with no generic access. Only useful in tests and for
    /// relations the engine never touches.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            get_ref: None,
            set_ref: None,
            collection: None,
        }
    }

    /// Accessors for a single-valued relation property.
    #[must_use]
    pub const fn reference(get_ref: GetRefFn, set_ref: SetRefFn) -> Self {
        Self {
            get_ref: Some(get_ref),
            set_ref: Some(set_ref),
            collection: None,
        }
    }

    /// Accessors for a collection-valued relation property.
    #[must_use]
    pub const fn collection(ops: CollectionOps) -> Self {
        Self {
            get_ref: None,
            set_ref: None,
            collection: Some(ops),
        }
    }
}

impl std::fmt::Debug for RelationOps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationOps")
            .field("get_ref", &self.get_ref.is_some())
            .field("set_ref", &self.set_ref.is_some())
            .field("collection", &self.collection.is_some())
            .finish()
    }
}

/// Accessors for one collection-valued relation property.
#[derive(Clone, Copy)]
pub struct CollectionOps {
    /// Current members.
    pub members: fn(&dyn AnyEntity) -> Vec<EntityHandle>,

    /// Members present now but absent from the initial-state snapshot.
    pub added: fn(&dyn AnyEntity) -> Vec<EntityHandle>,

    /// Members present in the initial-state snapshot but absent now.
    pub removed: fn(&dyn AnyEntity) -> Vec<EntityHandle>,

    /// Whether the collection carries an initial-state snapshot. A collection
    /// without one is "plain": first-time population semantics apply.
    pub is_tracked: fn(&dyn AnyEntity) -> bool,

    /// Whether the collection reports membership changes since its snapshot.
    pub has_changes: fn(&dyn AnyEntity) -> bool,

    /// Replace the members wholesale; `synchronized` installs the new content
    /// as the initial state.
    pub replace: fn(&mut dyn AnyEntity, Vec<EntityHandle>, bool),

    /// Remove one member, returning whether it was present.
    pub remove_member: fn(&mut dyn AnyEntity, &EntityHandle) -> bool,

    /// Re-capture the initial state from the current content.
    pub synchronize: fn(&mut dyn AnyEntity),
}

/// Build [`RelationOps`] for a `Option<Ref<Target>>` property.
///
/// ```ignore
/// static RELATIONS: &[RelationInfo] = &[RelationInfo::many_to_one(
///     "order",
///     "Order",
///     "order_id",
///     reference_accessor!(Item, order, Order),
/// )];
/// ```
#[macro_export]
macro_rules! reference_accessor {
    ($owner:ty, $field:ident, $target:ty) => {
        $crate::accessor::RelationOps::reference(
            |entity: &dyn $crate::entity::AnyEntity| {
                entity
                    .as_any()
                    .downcast_ref::<$owner>()
                    .and_then(|owner| owner.$field.clone())
                    .map($crate::entity::EntityHandle::new)
            },
            |entity: &mut dyn $crate::entity::AnyEntity, handle| {
                let Some(owner) = entity.as_any_mut().downcast_mut::<$owner>() else {
                    return false;
                };
                match handle {
                    None => {
                        owner.$field = None;
                        true
                    }
                    Some(handle) => match handle.typed::<$target>() {
                        Some(target) => {
                            owner.$field = Some(target);
                            true
                        }
                        None => false,
                    },
                }
            },
        )
    };
}

/// Build [`RelationOps`] for a `TrackedCollection<Target>` property.
///
/// ```ignore
/// static RELATIONS: &[RelationInfo] = &[RelationInfo::one_to_many(
///     "items",
///     "Item",
///     "order_id",
///     collection_accessor!(Order, items),
/// )];
/// ```
#[macro_export]
macro_rules! collection_accessor {
    ($owner:ty, $field:ident) => {
        $crate::accessor::RelationOps::collection($crate::accessor::CollectionOps {
            members: |entity: &dyn $crate::entity::AnyEntity| {
                entity
                    .as_any()
                    .downcast_ref::<$owner>()
                    .map(|owner| owner.$field.handles())
                    .unwrap_or_default()
            },
            added: |entity: &dyn $crate::entity::AnyEntity| {
                entity
                    .as_any()
                    .downcast_ref::<$owner>()
                    .map(|owner| owner.$field.added_handles())
                    .unwrap_or_default()
            },
            removed: |entity: &dyn $crate::entity::AnyEntity| {
                entity
                    .as_any()
                    .downcast_ref::<$owner>()
                    .map(|owner| owner.$field.removed_handles())
                    .unwrap_or_default()
            },
            is_tracked: |entity: &dyn $crate::entity::AnyEntity| {
                entity
                    .as_any()
                    .downcast_ref::<$owner>()
                    .is_some_and(|owner| owner.$field.is_tracked())
            },
            has_changes: |entity: &dyn $crate::entity::AnyEntity| {
                entity
                    .as_any()
                    .downcast_ref::<$owner>()
                    .is_some_and(|owner| owner.$field.has_changes())
            },
            replace: |entity: &mut dyn $crate::entity::AnyEntity, handles, synchronized| {
                if let Some(owner) = entity.as_any_mut().downcast_mut::<$owner>() {
                    owner.$field.replace_handles(handles, synchronized);
                }
            },
            remove_member: |entity: &mut dyn $crate::entity::AnyEntity, handle| {
                entity
                    .as_any_mut()
                    .downcast_mut::<$owner>()
                    .is_some_and(|owner| owner.$field.remove_handle(handle))
            },
            synchronize: |entity: &mut dyn $crate::entity::AnyEntity| {
                if let Some(owner) = entity.as_any_mut().downcast_mut::<$owner>() {
                    owner.$field.mark_synchronized();
                }
            },
        })
    };
}
