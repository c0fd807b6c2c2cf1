//! Error types for Relsync operations.

use crate::relation::RelationKind;
use std::fmt;

/// The primary error type for all Relsync operations.
#[derive(Debug)]
pub enum Error {
    /// Mapping-definition errors (missing table/column mapping, missing join
    /// property, link entity without both settable reference properties).
    /// Always fatal to the current flush.
    Config(ConfigError),
    /// A link entity was created or looked up while one side lacks a primary
    /// key.
    Identity(IdentityError),
    /// Row decoding errors.
    Type(TypeError),
    /// Errors raised by the storage collaborator. Propagated unchanged; the
    /// engine discards its per-cycle caches on this path.
    Storage(StorageError),
    /// Custom error with message.
    Custom(String),
}

/// A mapping-definition bug: raised when the offending relation is first
/// processed, never retried.
#[derive(Debug)]
pub struct ConfigError {
    /// Entity type name the misconfigured mapping belongs to.
    pub entity: String,
    /// Property name, when the error concerns a specific relation.
    pub property: Option<String>,
    /// Relation kind, when known.
    pub kind: Option<RelationKind>,
    pub message: String,
}

/// A missing primary key at the point where one is required.
#[derive(Debug)]
pub struct IdentityError {
    /// Entity type name whose key is missing.
    pub entity: String,
    /// Relation property being processed.
    pub property: Option<String>,
    pub message: String,
}

/// A value did not decode to the expected shape.
#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

/// An error from the storage collaborator.
#[derive(Debug)]
pub struct StorageError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Build a configuration error for a specific relation.
    pub fn config(
        entity: impl Into<String>,
        property: impl Into<String>,
        kind: RelationKind,
        message: impl Into<String>,
    ) -> Self {
        Error::Config(ConfigError {
            entity: entity.into(),
            property: Some(property.into()),
            kind: Some(kind),
            message: message.into(),
        })
    }

    /// Build a configuration error not tied to a relation property.
    pub fn config_entity(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            entity: entity.into(),
            property: None,
            kind: None,
            message: message.into(),
        })
    }

    /// Build an identity error for a relation property.
    pub fn identity(
        entity: impl Into<String>,
        property: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::Identity(IdentityError {
            entity: entity.into(),
            property: Some(property.into()),
            message: message.into(),
        })
    }

    /// Build a storage error from a message.
    pub fn storage(message: impl Into<String>) -> Self {
        Error::Storage(StorageError {
            message: message.into(),
            source: None,
        })
    }

    /// Build a storage error wrapping an underlying error.
    pub fn storage_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Error::Storage(StorageError {
            message: message.into(),
            source: Some(Box::new(source)),
        })
    }

    /// Build a type error for a named column.
    pub fn type_mismatch(
        expected: &'static str,
        actual: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        Error::Type(TypeError {
            expected,
            actual: actual.into(),
            column: Some(column.into()),
        })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => {
                write!(f, "Configuration error on {}", e.entity)?;
                if let Some(property) = &e.property {
                    write!(f, ".{}", property)?;
                }
                if let Some(kind) = e.kind {
                    write!(f, " ({})", kind.as_str())?;
                }
                write!(f, ": {}", e.message)
            }
            Error::Identity(e) => {
                write!(f, "Identity error on {}", e.entity)?;
                if let Some(property) = &e.property {
                    write!(f, ".{}", property)?;
                }
                write!(f, ": {}", e.message)
            }
            Error::Type(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "Type error in column '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Storage(e) => write!(f, "Storage error: {}", e.message),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Storage(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

/// Convenient result type for Relsync operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_names_entity_property_and_kind() {
        let err = Error::config("Order", "items", RelationKind::ManyToMany, "missing link");
        let msg = err.to_string();
        assert!(msg.contains("Order"));
        assert!(msg.contains("items"));
        assert!(msg.contains("many-to-many"));
        assert!(msg.contains("missing link"));
    }

    #[test]
    fn test_identity_error_display() {
        let err = Error::identity("Item", "orders", "related entity has no primary key");
        let msg = err.to_string();
        assert!(msg.starts_with("Identity error on Item.orders"));
    }

    #[test]
    fn test_type_error_display_with_column() {
        let err = Error::type_mismatch("BIGINT", "TEXT", "id");
        assert_eq!(
            err.to_string(),
            "Type error in column 'id': expected BIGINT, found TEXT"
        );
    }

    #[test]
    fn test_storage_error_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = Error::storage_source("write failed", io);
        assert!(std::error::Error::source(&err).is_some());
    }
}
