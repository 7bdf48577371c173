use thiserror::Error;

use crate::{DocumentId, Version};

/// Errors that can occur when interacting with a document store.
#[derive(Debug, Error)]
pub enum DocumentStoreError {
    /// A write expected the document at one version but the store holds another.
    ///
    /// Version 0 stands for "does not exist" on either side.
    #[error(
        "Concurrency conflict for document {document_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        document_id: DocumentId,
        expected: Version,
        actual: Version,
    },

    /// The document key is empty or blank.
    #[error("Invalid document id: {0:?}")]
    InvalidDocumentId(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store configuration is unusable.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl DocumentStoreError {
    /// Returns true for optimistic-concurrency conflicts.
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, DocumentStoreError::ConcurrencyConflict { .. })
    }
}

/// Result type for document store operations.
pub type Result<T> = std::result::Result<T, DocumentStoreError>;
