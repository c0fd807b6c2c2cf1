//! Relation descriptors.
//!
//! Relations are declared as static metadata on each [`Entity`] type and
//! consumed by the session layer (relation loader, flush-time processors,
//! link entity manager) to load and synchronize associated objects without
//! runtime reflection. The generic read/write access they need goes through
//! the accessor capability table in [`crate::accessor`].
//!
//! [`Entity`]: crate::entity::Entity

use crate::accessor::RelationOps;

/// The kind of relation between two entity types.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RelationKind {
    /// One-to-one: `Order` has one `Invoice`.
    OneToOne,
    /// Many-to-one: many `Item`s belong to one `Order`.
    #[default]
    ManyToOne,
    /// One-to-many: one `Order` has many `Item`s.
    OneToMany,
    /// Many-to-many: `Order`s have many `Tag`s via a link entity.
    ManyToMany,
}

impl RelationKind {
    /// Human-readable name, used in error messages.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            RelationKind::OneToOne => "one-to-one",
            RelationKind::ManyToOne => "many-to-one",
            RelationKind::OneToMany => "one-to-many",
            RelationKind::ManyToMany => "many-to-many",
        }
    }
}

/// Link-entity metadata for many-to-many relations.
///
/// A link entity is an ordinary registered entity type representing one row
/// of the join table. It must expose exactly two settable reference
/// properties: `join_property` pointing at the owning side and
/// `inverse_join_property` pointing at the target side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkInfo {
    /// Registry name of the link entity type.
    pub entity: &'static str,

    /// Relation property on the link entity pointing at the owning side.
    pub join_property: &'static str,

    /// Relation property on the link entity pointing at the target side.
    pub inverse_join_property: &'static str,
}

impl LinkInfo {
    /// Create a new link definition.
    #[must_use]
    pub const fn new(
        entity: &'static str,
        join_property: &'static str,
        inverse_join_property: &'static str,
    ) -> Self {
        Self {
            entity,
            join_property,
            inverse_join_property,
        }
    }
}

/// Metadata about a relation-valued property.
#[derive(Clone, Copy)]
pub struct RelationInfo {
    /// Name of the relation property on the owning entity.
    pub name: &'static str,

    /// Kind of relation.
    pub kind: RelationKind,

    /// Registry name of the target entity type.
    pub target: &'static str,

    /// Foreign key column on the owning table (ManyToOne / OneToOne).
    pub local_column: Option<&'static str>,

    /// Foreign key column on the target table (OneToMany).
    pub remote_column: Option<&'static str>,

    /// Link entity for ManyToMany relations.
    pub link: Option<LinkInfo>,

    /// Accessor capability table for this property.
    pub ops: RelationOps,
}

impl RelationInfo {
    /// Declare a many-to-one relation.
    ///
    /// `local_column` is the foreign key column on the owning table.
    #[must_use]
    pub const fn many_to_one(
        name: &'static str,
        target: &'static str,
        local_column: &'static str,
        ops: RelationOps,
    ) -> Self {
        Self {
            name,
            kind: RelationKind::ManyToOne,
            target,
            local_column: Some(local_column),
            remote_column: None,
            link: None,
            ops,
        }
    }

    /// Declare a one-to-one relation.
    #[must_use]
    pub const fn one_to_one(
        name: &'static str,
        target: &'static str,
        local_column: &'static str,
        ops: RelationOps,
    ) -> Self {
        Self {
            name,
            kind: RelationKind::OneToOne,
            target,
            local_column: Some(local_column),
            remote_column: None,
            link: None,
            ops,
        }
    }

    /// Declare a one-to-many relation.
    ///
    /// `remote_column` is the foreign key column on the target table pointing
    /// back at the owning entity.
    #[must_use]
    pub const fn one_to_many(
        name: &'static str,
        target: &'static str,
        remote_column: &'static str,
        ops: RelationOps,
    ) -> Self {
        Self {
            name,
            kind: RelationKind::OneToMany,
            target,
            local_column: None,
            remote_column: Some(remote_column),
            link: None,
            ops,
        }
    }

    /// Declare a many-to-many relation backed by a link entity.
    #[must_use]
    pub const fn many_to_many(
        name: &'static str,
        target: &'static str,
        link: LinkInfo,
        ops: RelationOps,
    ) -> Self {
        Self {
            name,
            kind: RelationKind::ManyToMany,
            target,
            local_column: None,
            remote_column: None,
            link: Some(link),
            ops,
        }
    }
}

impl std::fmt::Debug for RelationInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationInfo")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("target", &self.target)
            .field("local_column", &self.local_column)
            .field("remote_column", &self.remote_column)
            .field("link", &self.link)
            .finish()
    }
}

/// Find a relation by property name in a descriptor slice.
pub fn find_relation<'a>(
    relations: &'a [RelationInfo],
    name: &str,
) -> Option<&'a RelationInfo> {
    relations.iter().find(|r| r.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::RelationOps;

    #[test]
    fn test_kind_names() {
        assert_eq!(RelationKind::ManyToMany.as_str(), "many-to-many");
        assert_eq!(RelationKind::OneToMany.as_str(), "one-to-many");
    }

    #[test]
    fn test_const_builders() {
        const REL: RelationInfo =
            RelationInfo::many_to_one("order", "Order", "order_id", RelationOps::none());
        assert_eq!(REL.kind, RelationKind::ManyToOne);
        assert_eq!(REL.local_column, Some("order_id"));
        assert!(REL.link.is_none());
    }

    #[test]
    fn test_find_relation() {
        static RELATIONS: &[RelationInfo] = &[
            RelationInfo::one_to_many("items", "Item", "order_id", RelationOps::none()),
            RelationInfo::many_to_many(
                "tags",
                "Tag",
                LinkInfo::new("OrderTag", "order", "tag"),
                RelationOps::none(),
            ),
        ];

        let rel = find_relation(RELATIONS, "tags").unwrap();
        assert_eq!(rel.kind, RelationKind::ManyToMany);
        assert_eq!(rel.link.unwrap().inverse_join_property, "tag");
        assert!(find_relation(RELATIONS, "missing").is_none());
    }
}
