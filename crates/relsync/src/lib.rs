//! Relsync - unit-of-work and relation synchronization for relational rows.
//!
//! Relsync keeps in-memory domain objects ("entities") synchronized with
//! relational table rows: it tracks mutations through value snapshots,
//! maintains a single live instance per row via a weak identity map, and
//! computes the minimal set of inserts, updates, and deletes needed to
//! persist an object graph, including the join-table link entities backing
//! many-to-many associations.
//!
//! # Quick Start
//!
//! ```ignore
//! use relsync::prelude::*;
//!
//! #[derive(Debug, Default)]
//! struct Order {
//!     id: Option<i64>,
//!     reference: String,
//!     items: TrackedCollection<Item>,
//! }
//!
//! impl Entity for Order {
//!     const ENTITY: &'static str = "Order";
//!     const TABLE: &'static str = "orders";
//!     const KEY_COLUMN: &'static str = "id";
//!     const RELATIONS: &'static [RelationInfo] = &[RelationInfo::one_to_many(
//!         "items",
//!         "Item",
//!         "order_id",
//!         collection_accessor!(Order, items),
//!     )];
//!     // key/set_key/to_row/from_row elided
//! }
//!
//! let mut session = Session::new(MemoryStorage::new());
//! session.register::<Order>();
//! session.register::<Item>();
//!
//! let order = session.persist(Order::default());
//! session.flush()?;               // inserts the order and cascaded items
//!
//! let id = order.read().unwrap().id.unwrap();
//! let same = session.find::<Order>(id)?.unwrap();   // identity map hit
//! ```
//!
//! # Architecture
//!
//! - **`relsync-core`**: entity traits and handles, values and rows, relation
//!   descriptors with the accessor capability table, diff-aware collections,
//!   the entity registry, and the storage boundary.
//! - **`relsync-session`**: the engine: identity map, lifecycle tracker,
//!   change tracker, relation loader, relation/link managers, and the
//!   `Session` facade driving the flush cycle.

pub use relsync_core::{
    AnyEntity,
    CollectionOps,
    ColumnInfo,
    ConfigError,
    Entity,
    EntityFactory,
    EntityHandle,
    EntityRegistry,
    Error,
    IdentityError,
    InstanceId,
    LinkInfo,
    MemoryStorage,
    Ref,
    RelationInfo,
    RelationKind,
    RelationOps,
    Result,
    Row,
    Storage,
    StorageError,
    TrackedCollection,
    TypeError,
    Value,
    WeakEntityHandle,
    find_relation,
    shared,
};

pub use relsync_session::{
    ChangeSet, ChangeTracker, EntityState, FlushReport, IdentityMap, LifecycleTracker,
    LinkEntityManager, LinkOp, LinkOpKind, LinkOutcome, ObjectKey, PendingCounts, RelationManager,
    Session, SessionConfig, WriteEffect, WriteOp, synchronize_all_collections,
    synchronize_entity_collections,
};

// Re-export the accessor macros at the crate root.
pub use relsync_core::{collection_accessor, reference_accessor};

/// Commonly used imports.
pub mod prelude {
    pub use crate::{
        Entity, EntityState, LinkInfo, MemoryStorage, Ref, RelationInfo, Result, Row, Session,
        Storage, TrackedCollection, Value, collection_accessor, reference_accessor, shared,
    };
}
