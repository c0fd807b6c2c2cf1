//! Pending write operations and flush reporting.
//!
//! The flush cycle turns schedules and change-sets into [`WriteOp`] values
//! executed against the storage collaborator. Ops carry entity handles rather
//! than precomputed rows: cascaded children receive their foreign keys only
//! once the parent insert has run, so insert rows are read from the entity at
//! execution time.

use relsync_core::{EntityHandle, Error, Result, Storage, Value};

/// A pending write against the storage collaborator.
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Insert the entity's current scalar row.
    Insert {
        /// The entity to insert.
        handle: EntityHandle,
    },
    /// Update the changed columns of a managed entity.
    Update {
        /// The entity to update.
        handle: EntityHandle,
        /// Changed columns with their new values.
        assignments: Vec<(&'static str, Value)>,
    },
    /// Delete the entity's row.
    Delete {
        /// The entity to delete.
        handle: EntityHandle,
    },
}

/// What executing a [`WriteOp`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteEffect {
    /// A row was inserted; the entity now carries this key.
    Inserted(Value),
    /// A row was updated.
    Updated,
    /// A row was deleted.
    Deleted,
    /// Nothing was written (no key to address, or nothing to assign).
    Skipped,
}

impl WriteOp {
    /// An insert of the entity's row-at-execution-time.
    pub fn insert(handle: EntityHandle) -> Self {
        WriteOp::Insert { handle }
    }

    /// An update of the given changed columns.
    pub fn update(handle: EntityHandle, assignments: Vec<(&'static str, Value)>) -> Self {
        WriteOp::Update {
            handle,
            assignments,
        }
    }

    /// A delete of the entity's row.
    pub fn delete(handle: EntityHandle) -> Self {
        WriteOp::Delete { handle }
    }

    /// The entity this operation targets.
    pub fn handle(&self) -> &EntityHandle {
        match self {
            WriteOp::Insert { handle }
            | WriteOp::Update { handle, .. }
            | WriteOp::Delete { handle } => handle,
        }
    }

    /// The table this operation touches.
    pub fn table(&self) -> &'static str {
        self.handle().read().table()
    }

    /// Execute the operation.
    ///
    /// Inserts assign the storage-generated key to the entity when it has
    /// none yet; an insert that produces no key at all is a storage error,
    /// since everything downstream (identity map, links) needs one.
    pub fn execute<S: Storage>(&self, storage: &mut S) -> Result<WriteEffect> {
        match self {
            WriteOp::Insert { handle } => {
                let (table, key_column, columns, values) = {
                    let guard = handle.read();
                    let row = guard.to_row();
                    let (columns, values): (Vec<&'static str>, Vec<Value>) =
                        row.into_iter().unzip();
                    (guard.table(), guard.key_column(), columns, values)
                };

                tracing::debug!(table, "executing insert");
                let generated = storage.insert(table, key_column, &columns, &values)?;

                if let Some(key) = generated {
                    let mut guard = handle.write();
                    if guard.key().is_none() {
                        guard.set_key(key);
                    }
                }
                let key = handle.key().ok_or_else(|| {
                    Error::storage(format!(
                        "insert into '{}' produced no key and the entity has none",
                        table
                    ))
                })?;
                Ok(WriteEffect::Inserted(key))
            }
            WriteOp::Update {
                handle,
                assignments,
            } => {
                if assignments.is_empty() {
                    return Ok(WriteEffect::Skipped);
                }
                let (table, key_column, key) = {
                    let guard = handle.read();
                    (guard.table(), guard.key_column(), guard.key())
                };
                let Some(key) = key else {
                    tracing::warn!(table, "skipping update of entity without a key");
                    return Ok(WriteEffect::Skipped);
                };
                tracing::debug!(table, columns = assignments.len(), "executing update");
                storage.update(table, key_column, &key, assignments)?;
                Ok(WriteEffect::Updated)
            }
            WriteOp::Delete { handle } => {
                let (table, key_column, key) = {
                    let guard = handle.read();
                    (guard.table(), guard.key_column(), guard.key())
                };
                let Some(key) = key else {
                    tracing::warn!(table, "skipping delete of entity without a key");
                    return Ok(WriteEffect::Skipped);
                };
                tracing::debug!(table, "executing delete");
                storage.delete(table, key_column, &key)?;
                Ok(WriteEffect::Deleted)
            }
        }
    }
}

/// Count of pending operations by type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingCounts {
    /// Entities pending INSERT.
    pub insertions: usize,
    /// Entities with a non-empty change-set pending UPDATE.
    pub updates: usize,
    /// Entities pending DELETE.
    pub deletions: usize,
}

impl PendingCounts {
    /// Total number of pending operations.
    #[must_use]
    pub fn total(&self) -> usize {
        self.insertions + self.updates + self.deletions
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Result of a flush cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    /// Entity rows inserted.
    pub inserted: usize,
    /// Entity rows updated.
    pub updated: usize,
    /// Entity rows deleted.
    pub deleted: usize,
    /// Link rows inserted.
    pub links_created: usize,
    /// Link rows deleted.
    pub links_removed: usize,
}

impl FlushReport {
    /// Create an empty report.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of rows written.
    #[must_use]
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.deleted + self.links_created + self.links_removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relsync_core::{Entity, MemoryStorage, Result, Row};

    #[derive(Debug, Default)]
    struct Note {
        id: Option<i64>,
        body: String,
    }

    impl Entity for Note {
        const ENTITY: &'static str = "Note";
        const TABLE: &'static str = "notes";
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
                ("body", Value::Text(self.body.clone())),
            ]
        }

        fn from_row(row: &Row) -> Result<Self> {
            Ok(Self {
                id: row.named_opt_i64("id")?,
                body: row.named_text("body")?,
            })
        }
    }

    #[test]
    fn test_insert_assigns_generated_key() {
        let mut storage = MemoryStorage::new();
        let handle = EntityHandle::from_entity(Note {
            id: None,
            body: "draft".to_string(),
        });

        let effect = WriteOp::insert(handle.clone()).execute(&mut storage).unwrap();
        assert_eq!(effect, WriteEffect::Inserted(Value::BigInt(1)));
        assert_eq!(handle.key(), Some(Value::BigInt(1)));
        assert_eq!(storage.row_count("notes"), 1);
    }

    #[test]
    fn test_update_writes_assignments() {
        let mut storage = MemoryStorage::new();
        let handle = EntityHandle::from_entity(Note {
            id: None,
            body: "draft".to_string(),
        });
        WriteOp::insert(handle.clone()).execute(&mut storage).unwrap();

        let effect = WriteOp::update(
            handle.clone(),
            vec![("body", Value::Text("final".to_string()))],
        )
        .execute(&mut storage)
        .unwrap();
        assert_eq!(effect, WriteEffect::Updated);

        let row = storage
            .fetch_by_key("notes", "id", &Value::BigInt(1))
            .unwrap()
            .unwrap();
        assert_eq!(row.named_text("body").unwrap(), "final");
    }

    #[test]
    fn test_update_with_no_assignments_is_skipped() {
        let mut storage = MemoryStorage::new();
        let handle = EntityHandle::from_entity(Note {
            id: Some(1),
            body: String::new(),
        });
        let effect = WriteOp::update(handle, Vec::new())
            .execute(&mut storage)
            .unwrap();
        assert_eq!(effect, WriteEffect::Skipped);
    }

    #[test]
    fn test_delete_without_key_is_skipped() {
        let mut storage = MemoryStorage::new();
        let handle = EntityHandle::from_entity(Note::default());
        let effect = WriteOp::delete(handle).execute(&mut storage).unwrap();
        assert_eq!(effect, WriteEffect::Skipped);
    }

    #[test]
    fn test_op_table_accessor() {
        let handle = EntityHandle::from_entity(Note::default());
        assert_eq!(WriteOp::insert(handle).table(), "notes");
    }

    #[test]
    fn test_pending_counts_and_report_totals() {
        let counts = PendingCounts {
            insertions: 2,
            updates: 1,
            deletions: 1,
        };
        assert_eq!(counts.total(), 4);
        assert!(!counts.is_empty());
        assert!(PendingCounts::default().is_empty());

        let report = FlushReport {
            inserted: 1,
            updated: 0,
            deleted: 0,
            links_created: 2,
            links_removed: 0,
        };
        assert_eq!(report.total(), 3);
    }
}
