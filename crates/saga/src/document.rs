//! Persisted representation of a saga.

use common::CorrelationId;
use document_store::DocumentId;
use serde::{Deserialize, Serialize};

use crate::saga::Saga;

/// Document key of a saga: `{Saga::NAME}/{correlation id}`.
///
/// Every operation on the same saga type and id derives the same key, so no
/// index is needed to find a saga's document.
pub fn saga_document_id<S: Saga>(id: CorrelationId) -> DocumentId {
    DocumentId::from_parts(S::NAME, id)
}

/// The stored wrapper around a saga's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSagaState<St> {
    pub id: DocumentId,
    pub state: St,
}
