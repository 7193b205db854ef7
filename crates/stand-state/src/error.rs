//! Error types for stand-state

use thiserror::Error;

/// Errors that can occur in the stand persistence layer
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// A multi-row transaction was rolled back
    #[error("Transaction failed: {0}")]
    Transaction(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),

    /// Connection settings are incomplete or contradictory
    #[error("Invalid store configuration: {0}")]
    Config(String),

    /// Row could not be (de)serialized
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Referenced row does not exist
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// Write rejected because the row is not in the expected state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A persisted status string is outside the known vocabulary
    #[error("Invalid {kind} status: {value:?}")]
    InvalidStatus { kind: &'static str, value: String },
}

impl StoreError {
    /// Shorthand for a [`StoreError::NotFound`].
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        StoreError::NotFound {
            entity,
            key: key.into(),
        }
    }

    /// Whether the error refers to a missing row rather than a backend failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

impl From<surrealdb::Error> for StoreError {
    fn from(err: surrealdb::Error) -> Self {
        StoreError::Query(err.to_string())
    }
}
