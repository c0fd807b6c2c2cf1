//! Relation loading.
//!
//! After an entity is hydrated from a storage row, its relation-valued
//! properties are populated here: single references resolve their foreign key
//! through the identity-map-first find path, collections are filled from
//! follow-up reads and immediately synchronized so later diffs only reflect
//! genuine application changes.
//!
//! Reference resolution is best-effort: a missing target row leaves the
//! property null/unset without error. Missing *mapping* information, by
//! contrast, is a configuration error.

use crate::Session;
use crate::lifecycle::EntityState;
use relsync_core::{
    EntityFactory, EntityHandle, Error, RelationInfo, RelationKind, Result, Row, Storage, Value,
};

impl<S: Storage> Session<S> {
    /// Find the live instance for `(entity name, key)`, consulting the
    /// identity map before storage.
    pub(crate) fn find_by_name(&mut self, entity: &str, key: &Value) -> Result<Option<EntityHandle>> {
        let factory = self.registry.expect(entity)?;
        self.find_with_factory(&factory, key)
    }

    pub(crate) fn find_with_factory(
        &mut self,
        factory: &EntityFactory,
        key: &Value,
    ) -> Result<Option<EntityHandle>> {
        if let Some(handle) = self.identity.get(factory.type_id, key) {
            match self.lifecycle.state_of(&handle) {
                Some(EntityState::Removed | EntityState::Detached) => return Ok(None),
                _ if self.lifecycle.is_scheduled_for_deletion(&handle) => return Ok(None),
                _ => return Ok(Some(handle)),
            }
        }

        let Some(row) = self
            .storage
            .fetch_by_key(factory.table, factory.key_column, key)?
        else {
            return Ok(None);
        };
        self.hydrate(factory, &row).map(Some)
    }

    /// Construct a managed entity from a row, entering the identity map
    /// before relations load so cyclic references terminate.
    pub(crate) fn hydrate(&mut self, factory: &EntityFactory, row: &Row) -> Result<EntityHandle> {
        if let Some(key) = row.value(factory.key_column).filter(|k| !k.is_null()) {
            if let Some(existing) = self.identity.get(factory.type_id, key) {
                return Ok(existing);
            }
        }

        let handle = (factory.from_row)(row)?;
        tracing::trace!(entity = factory.entity, key = ?handle.key(), "hydrated entity");
        self.identity.add(&handle);
        self.lifecycle.manage(&handle);
        self.changes.take_snapshot(&handle);
        self.load_relations(&handle, row)?;
        Ok(handle)
    }

    /// Populate every relation-valued property of a freshly hydrated entity.
    #[tracing::instrument(level = "debug", skip_all)]
    pub(crate) fn load_relations(&mut self, handle: &EntityHandle, row: &Row) -> Result<()> {
        let relations = handle.read().relations();
        for relation in relations {
            match relation.kind {
                RelationKind::ManyToOne | RelationKind::OneToOne => {
                    self.load_reference(handle, relation, row)?;
                }
                RelationKind::OneToMany => self.load_one_to_many(handle, relation)?,
                RelationKind::ManyToMany => self.load_many_to_many(handle, relation)?,
            }
        }
        Ok(())
    }

    fn load_reference(
        &mut self,
        handle: &EntityHandle,
        relation: &'static RelationInfo,
        row: &Row,
    ) -> Result<()> {
        let column = relation.local_column.ok_or_else(|| {
            Error::config(
                handle.read().entity_name(),
                relation.name,
                relation.kind,
                "relation has no foreign key column mapping",
            )
        })?;
        let Some(set_ref) = relation.ops.set_ref else {
            // property is not settable; loading is best-effort
            return Ok(());
        };

        match row.value(column).filter(|v| !v.is_null()).cloned() {
            None => {
                set_ref(&mut *handle.write(), None);
            }
            Some(key) => {
                let target = self.find_by_name(relation.target, &key)?;
                // an unresolvable target resolves to null; the property may
                // reject it, which is not an error either
                set_ref(&mut *handle.write(), target);
            }
        }
        Ok(())
    }

    fn load_one_to_many(
        &mut self,
        handle: &EntityHandle,
        relation: &'static RelationInfo,
    ) -> Result<()> {
        let ops = relation.ops.collection.ok_or_else(|| {
            Error::config(
                handle.read().entity_name(),
                relation.name,
                relation.kind,
                "relation property has no collection accessor",
            )
        })?;

        // without a key there is no foreign key to query by
        let Some(owner_key) = handle.key() else {
            (ops.replace)(&mut *handle.write(), Vec::new(), true);
            return Ok(());
        };

        let remote_column = relation.remote_column.ok_or_else(|| {
            Error::config(
                handle.read().entity_name(),
                relation.name,
                relation.kind,
                "relation has no mapped-by column on the target",
            )
        })?;

        let target = self.registry.expect(relation.target)?;
        let rows = self
            .storage
            .fetch_matching(target.table, &[(remote_column, owner_key)])?;

        let mut members = Vec::with_capacity(rows.len());
        for member_row in &rows {
            members.push(self.hydrate(&target, member_row)?);
        }
        tracing::debug!(
            relation = relation.name,
            members = members.len(),
            "loaded one-to-many collection"
        );
        (ops.replace)(&mut *handle.write(), members, true);
        Ok(())
    }

    fn load_many_to_many(
        &mut self,
        handle: &EntityHandle,
        relation: &'static RelationInfo,
    ) -> Result<()> {
        let ops = relation.ops.collection.ok_or_else(|| {
            Error::config(
                handle.read().entity_name(),
                relation.name,
                relation.kind,
                "relation property has no collection accessor",
            )
        })?;

        let Some(owner_key) = handle.key() else {
            (ops.replace)(&mut *handle.write(), Vec::new(), true);
            return Ok(());
        };

        let link = relation.link.ok_or_else(|| {
            Error::config(
                handle.read().entity_name(),
                relation.name,
                relation.kind,
                "many-to-many relation has no link entity mapping",
            )
        })?;
        let link_factory = self.registry.expect(link.entity)?;
        let columns =
            self.relations
                .link_manager()
                .link_columns(&self.registry, relation, handle)?;

        let link_rows = self
            .storage
            .fetch_matching(link_factory.table, &[(columns.join_column, owner_key)])?;

        let mut members = Vec::with_capacity(link_rows.len());
        for link_row in &link_rows {
            let Some(inverse_key) = link_row
                .value(columns.inverse_column)
                .filter(|v| !v.is_null())
                .cloned()
            else {
                continue;
            };
            if let Some(target) = self.find_by_name(relation.target, &inverse_key)? {
                members.push(target);
            }
        }
        tracing::debug!(
            relation = relation.name,
            members = members.len(),
            "loaded many-to-many collection"
        );
        (ops.replace)(&mut *handle.write(), members, true);
        Ok(())
    }
}
