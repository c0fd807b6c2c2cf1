//! Core types and traits for Relsync.
//!
//! This crate provides the foundational abstractions the unit-of-work engine
//! is built on:
//!
//! - `Entity` trait for struct-to-row mapping, with the object-safe
//!   `AnyEntity` façade and shared `EntityHandle`s
//! - `Value` and `Row` for dynamically-typed column data
//! - `RelationInfo` descriptors and the accessor capability table
//! - `TrackedCollection` for diff-aware association collections
//! - `EntityRegistry` for per-engine type registration
//! - `Storage` trait marking the boundary to the SQL-rendering collaborator

pub mod accessor;
pub mod collection;
pub mod entity;
pub mod error;
pub mod registry;
pub mod relation;
pub mod row;
pub mod storage;
pub mod value;

pub use accessor::{CollectionOps, RelationOps};
pub use collection::TrackedCollection;
pub use entity::{AnyEntity, Entity, EntityHandle, InstanceId, Ref, WeakEntityHandle, shared};
pub use error::{ConfigError, Error, IdentityError, Result, StorageError, TypeError};
pub use registry::{EntityFactory, EntityRegistry};
pub use relation::{LinkInfo, RelationInfo, RelationKind, find_relation};
pub use row::{ColumnInfo, Row};
pub use storage::{MemoryStorage, Storage};
pub use value::Value;
