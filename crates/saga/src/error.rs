//! Saga error types.

use document_store::DocumentStoreError;
use thiserror::Error;

/// Errors that can occur during saga persistence operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// A session was requested while no message is being processed.
    #[error("Cannot use session outside of message processing")]
    SessionOutsideMessage,

    /// Document store error.
    #[error("Document store error: {0}")]
    Store(#[from] DocumentStoreError),
}

impl SagaError {
    /// Returns true if the store rejected a write made from a stale read.
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, SagaError::Store(e) if e.is_concurrency_conflict())
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;

#[cfg(test)]
mod tests {
    use document_store::{DocumentId, Version};

    use super::*;

    #[test]
    fn store_conflicts_are_reported_as_concurrency_conflicts() {
        let conflict = SagaError::from(DocumentStoreError::ConcurrencyConflict {
            document_id: DocumentId::from_parts("Shipping", 1),
            expected: Version::initial(),
            actual: Version::initial().next(),
        });
        assert!(conflict.is_concurrency_conflict());

        let invalid = SagaError::from(DocumentStoreError::InvalidDocumentId(String::new()));
        assert!(!invalid.is_concurrency_conflict());
        assert!(!SagaError::SessionOutsideMessage.is_concurrency_conflict());
    }
}
