//! Link entity management for many-to-many relations.
//!
//! Many-to-many membership changes resolve to concrete join-table entities:
//! an existing link row is found, a new one is created, or an existing one is
//! scheduled for deletion. Link entities are always created and destroyed
//! here, never by application code.
//!
//! Lookups bypass the relation-loading read path: the link row is fetched
//! directly by its two foreign key columns and hydrated without recursive
//! loading. Both the existing-link cache and the resolved column-mapping
//! cache live for one flush cycle only.

use crate::identity_map::{IdentityMap, hash_key};
use relsync_core::{
    EntityHandle, EntityRegistry, Error, RelationInfo, RelationKind, Result, Storage, Value,
};
use std::collections::HashMap;

/// Resolved foreign key columns of a link entity type.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LinkColumns {
    /// Column holding the owning side's key.
    pub join_column: &'static str,
    /// Column holding the target side's key.
    pub inverse_column: &'static str,
}

/// Cache key for one conceptual link row.
type LinkKey = (&'static str, &'static str, u64, u64);

/// Resolves many-to-many operations to concrete link entities.
#[derive(Default)]
pub struct LinkEntityManager {
    /// `(link entity, join property, owner key, related key)` → link.
    existing: HashMap<LinkKey, EntityHandle>,
    /// Resolved column mappings per `(link entity, join property)`.
    columns: HashMap<(&'static str, &'static str), LinkColumns>,
}

impl LinkEntityManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard the per-cycle caches. Stale lookups across cycles are a
    /// correctness bug, not just a performance one.
    pub fn begin_cycle(&mut self) {
        self.existing.clear();
        self.columns.clear();
    }

    /// Find the link entity connecting `owner` and `related`, if one exists.
    ///
    /// Requires both sides to carry primary keys. Consults the per-cycle
    /// cache, then the identity map, then storage directly.
    pub fn find_existing<S: Storage>(
        &mut self,
        storage: &mut S,
        registry: &EntityRegistry,
        identity: &mut IdentityMap,
        relation: &RelationInfo,
        owner: &EntityHandle,
        related: &EntityHandle,
    ) -> Result<Option<EntityHandle>> {
        let link = Self::link_info(relation, owner)?;
        let (owner_key, related_key) = Self::require_keys(relation, owner, related)?;
        let cache_key = Self::cache_key(relation, &owner_key, &related_key)?;

        if let Some(found) = self.existing.get(&cache_key) {
            return Ok(Some(found.clone()));
        }

        let factory = registry.expect(link.entity)?;
        let columns = self.link_columns(registry, relation, owner)?;

        let rows = storage.fetch_matching(
            factory.table,
            &[
                (columns.join_column, owner_key.clone()),
                (columns.inverse_column, related_key.clone()),
            ],
        )?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };

        // Prefer an already-managed instance of this link row.
        let handle = match row
            .value(factory.key_column)
            .filter(|key| !key.is_null())
            .and_then(|key| identity.get(factory.type_id, key))
        {
            Some(managed) => managed,
            None => {
                let hydrated = (factory.from_row)(row)?;
                identity.add(&hydrated);
                hydrated
            }
        };

        self.existing.insert(cache_key, handle.clone());
        Ok(Some(handle))
    }

    /// Instantiate a new link entity wired to `owner` and `related`.
    ///
    /// Fails fast when either identity is missing, the link type is not
    /// registered as creatable, or either reference property is not settable.
    pub fn create_link(
        &mut self,
        registry: &EntityRegistry,
        relation: &RelationInfo,
        owner: &EntityHandle,
        related: &EntityHandle,
    ) -> Result<EntityHandle> {
        let link = Self::link_info(relation, owner)?;
        let (owner_key, related_key) = Self::require_keys(relation, owner, related)?;

        let factory = registry.expect(link.entity)?;
        let Some(create) = factory.create else {
            return Err(Error::config(
                link.entity,
                relation.name,
                RelationKind::ManyToMany,
                "link entity type is not registered as creatable",
            ));
        };
        let columns = self.link_columns(registry, relation, owner)?;

        let handle = create();
        {
            let mut guard = handle.write();
            if !guard.set_column(columns.join_column, owner_key.clone()) {
                return Err(Error::config(
                    link.entity,
                    link.join_property,
                    RelationKind::ManyToMany,
                    format!(
                        "link entity did not accept foreign key column '{}'",
                        columns.join_column
                    ),
                ));
            }
            if !guard.set_column(columns.inverse_column, related_key.clone()) {
                return Err(Error::config(
                    link.entity,
                    link.inverse_join_property,
                    RelationKind::ManyToMany,
                    format!(
                        "link entity did not accept foreign key column '{}'",
                        columns.inverse_column
                    ),
                ));
            }
        }
        Self::set_reference(factory.relations, link.join_property, &handle, owner, relation)?;
        Self::set_reference(
            factory.relations,
            link.inverse_join_property,
            &handle,
            related,
            relation,
        )?;

        let cache_key = Self::cache_key(relation, &owner_key, &related_key)?;
        self.existing.insert(cache_key, handle.clone());

        tracing::debug!(
            link = link.entity,
            owner = %owner.read().entity_name(),
            "created link entity"
        );
        Ok(handle)
    }

    /// Drop a link from the existing-link cache (after scheduling deletion).
    pub fn forget(
        &mut self,
        relation: &RelationInfo,
        owner_key: &Value,
        related_key: &Value,
    ) -> Result<()> {
        let cache_key = Self::cache_key(relation, owner_key, related_key)?;
        self.existing.remove(&cache_key);
        Ok(())
    }

    fn link_info<'r>(
        relation: &'r RelationInfo,
        owner: &EntityHandle,
    ) -> Result<&'r relsync_core::LinkInfo> {
        relation.link.as_ref().ok_or_else(|| {
            Error::config(
                owner.read().entity_name(),
                relation.name,
                relation.kind,
                "many-to-many relation has no link entity mapping",
            )
        })
    }

    fn require_keys(
        relation: &RelationInfo,
        owner: &EntityHandle,
        related: &EntityHandle,
    ) -> Result<(Value, Value)> {
        let owner_key = owner.key().ok_or_else(|| {
            Error::identity(
                owner.read().entity_name(),
                relation.name,
                format!(
                    "{} owning side has no primary key; cascaded inserts must run first",
                    relation.kind.as_str()
                ),
            )
        })?;
        let related_key = related.key().ok_or_else(|| {
            Error::identity(
                related.read().entity_name(),
                relation.name,
                format!(
                    "{} related side has no primary key; cascaded inserts must run first",
                    relation.kind.as_str()
                ),
            )
        })?;
        Ok((owner_key, related_key))
    }

    fn cache_key(
        relation: &RelationInfo,
        owner_key: &Value,
        related_key: &Value,
    ) -> Result<LinkKey> {
        let link = relation.link.as_ref().ok_or_else(|| {
            Error::config_entity(
                relation.target,
                "many-to-many relation has no link entity mapping",
            )
        })?;
        Ok((
            link.entity,
            link.join_property,
            hash_key(owner_key),
            hash_key(related_key),
        ))
    }

    /// Resolve (and cache) the link entity's two foreign key columns from its
    /// own many-to-one descriptors.
    pub(crate) fn link_columns(
        &mut self,
        registry: &EntityRegistry,
        relation: &RelationInfo,
        owner: &EntityHandle,
    ) -> Result<LinkColumns> {
        let link = Self::link_info(relation, owner)?;
        let cache_key = (link.entity, link.join_property);
        if let Some(columns) = self.columns.get(&cache_key) {
            return Ok(*columns);
        }

        let factory = registry.expect(link.entity)?;
        let join_column = Self::fk_column(factory.relations, link.entity, link.join_property)?;
        let inverse_column =
            Self::fk_column(factory.relations, link.entity, link.inverse_join_property)?;

        let columns = LinkColumns {
            join_column,
            inverse_column,
        };
        self.columns.insert(cache_key, columns);
        Ok(columns)
    }

    fn fk_column(
        relations: &[RelationInfo],
        link_entity: &'static str,
        property: &'static str,
    ) -> Result<&'static str> {
        let descriptor = relsync_core::find_relation(relations, property).ok_or_else(|| {
            Error::config(
                link_entity,
                property,
                RelationKind::ManyToMany,
                "link entity has no relation property with this name",
            )
        })?;
        descriptor.local_column.ok_or_else(|| {
            Error::config(
                link_entity,
                property,
                descriptor.kind,
                "link reference property has no foreign key column",
            )
        })
    }

    fn set_reference(
        relations: &[RelationInfo],
        property: &'static str,
        link: &EntityHandle,
        target: &EntityHandle,
        relation: &RelationInfo,
    ) -> Result<()> {
        let link_entity = link.read().entity_name();
        let descriptor = relsync_core::find_relation(relations, property).ok_or_else(|| {
            Error::config(
                link_entity,
                property,
                RelationKind::ManyToMany,
                "link entity has no relation property with this name",
            )
        })?;
        let set_ref = descriptor.ops.set_ref.ok_or_else(|| {
            Error::config(
                link_entity,
                property,
                relation.kind,
                "link reference property is not settable",
            )
        })?;
        if !set_ref(&mut *link.write(), Some(target.clone())) {
            return Err(Error::config(
                link_entity,
                property,
                relation.kind,
                "link reference property rejected the related entity type",
            ));
        }
        Ok(())
    }
}
