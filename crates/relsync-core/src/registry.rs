//! Explicit entity-type registry.
//!
//! The registry maps entity names to the per-type capabilities the engine
//! needs when no concrete instance is at hand: hydrating from a storage row,
//! constructing link entities, and reading mapping metadata. It is an
//! instance held by each engine (no process-wide state), so multiple isolated
//! engines can coexist in one process.

use crate::entity::{Entity, EntityHandle};
use crate::error::{Error, Result};
use crate::relation::RelationInfo;
use crate::row::Row;
use std::any::TypeId;
use std::collections::HashMap;

/// Per-type capabilities and mapping metadata.
#[derive(Clone, Copy)]
pub struct EntityFactory {
    /// Registry name of the entity type.
    pub entity: &'static str,

    /// Table the type maps to.
    pub table: &'static str,

    /// Primary key column.
    pub key_column: &'static str,

    /// Relation descriptors of the type.
    pub relations: &'static [RelationInfo],

    /// `TypeId` of the concrete type.
    pub type_id: TypeId,

    /// Hydrate an instance from a storage row.
    pub from_row: fn(&Row) -> Result<EntityHandle>,

    /// Construct a blank instance. Present only for link entity types.
    pub create: Option<fn() -> EntityHandle>,
}

impl std::fmt::Debug for EntityFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityFactory")
            .field("entity", &self.entity)
            .field("table", &self.table)
            .field("key_column", &self.key_column)
            .field("creatable", &self.create.is_some())
            .finish()
    }
}

fn hydrate<E: Entity>(row: &Row) -> Result<EntityHandle> {
    E::from_row(row).map(EntityHandle::from_entity)
}

fn construct<E: Entity + Default>() -> EntityHandle {
    EntityHandle::from_entity(E::default())
}

/// Registry of entity types known to one engine instance.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    by_name: HashMap<&'static str, EntityFactory>,
    names_by_type: HashMap<TypeId, &'static str>,
}

impl EntityRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity type under its `ENTITY` name.
    ///
    /// Re-registering a name overrides the previous entry.
    pub fn register<E: Entity>(&mut self) {
        self.insert(EntityFactory {
            entity: E::ENTITY,
            table: E::TABLE,
            key_column: E::KEY_COLUMN,
            relations: E::RELATIONS,
            type_id: TypeId::of::<E>(),
            from_row: hydrate::<E>,
            create: None,
        });
    }

    /// Register a link entity type. Link entities must additionally be
    /// constructible from scratch, since the link entity manager creates
    /// them on demand.
    pub fn register_link<E: Entity + Default>(&mut self) {
        self.insert(EntityFactory {
            entity: E::ENTITY,
            table: E::TABLE,
            key_column: E::KEY_COLUMN,
            relations: E::RELATIONS,
            type_id: TypeId::of::<E>(),
            from_row: hydrate::<E>,
            create: Some(construct::<E>),
        });
    }

    fn insert(&mut self, factory: EntityFactory) {
        self.names_by_type.insert(factory.type_id, factory.entity);
        self.by_name.insert(factory.entity, factory);
    }

    /// Look up a factory by entity name.
    pub fn get(&self, entity: &str) -> Option<&EntityFactory> {
        self.by_name.get(entity)
    }

    /// Look up a factory by entity name, failing with a configuration error.
    pub fn expect(&self, entity: &str) -> Result<EntityFactory> {
        self.by_name.get(entity).copied().ok_or_else(|| {
            Error::config_entity(entity, "entity type is not registered with this engine")
        })
    }

    /// Look up a factory by concrete type.
    pub fn factory_of<E: Entity>(&self) -> Result<EntityFactory> {
        self.names_by_type
            .get(&TypeId::of::<E>())
            .and_then(|name| self.by_name.get(name))
            .copied()
            .ok_or_else(|| {
                Error::config_entity(E::ENTITY, "entity type is not registered with this engine")
            })
    }

    /// Registry name for a concrete type id, if registered.
    pub fn name_of(&self, type_id: TypeId) -> Option<&'static str> {
        self.names_by_type.get(&type_id).copied()
    }

    /// Number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
