use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{
    Document, DocumentId, DocumentStoreError, Result, Version,
    store::{ChangeKind, ChangeSet, DocumentStore},
};

/// In-memory document store implementation for testing.
///
/// This implementation keeps all documents in memory and provides
/// the same interface and conflict semantics as the PostgreSQL implementation.
#[derive(Clone, Default)]
pub struct InMemoryDocumentStore {
    documents: Arc<RwLock<HashMap<DocumentId, Document>>>,
}

impl InMemoryDocumentStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of documents stored.
    pub async fn document_count(&self) -> usize {
        self.documents.read().await.len()
    }

    /// Returns the IDs of all documents in a collection, sorted.
    pub async fn ids_in_collection(&self, collection: &str) -> Vec<DocumentId> {
        let documents = self.documents.read().await;
        let mut ids: Vec<_> = documents
            .keys()
            .filter(|id| id.collection() == collection)
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Removes all documents.
    pub async fn clear(&self) {
        self.documents.write().await.clear();
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn load(&self, id: &DocumentId) -> Result<Option<Document>> {
        Ok(self.documents.read().await.get(id).cloned())
    }

    async fn commit(&self, changes: ChangeSet) -> Result<Vec<(DocumentId, Version)>> {
        let mut documents = self.documents.write().await;

        // Validate every expectation before touching anything
        for change in &changes.changes {
            let actual = documents
                .get(&change.id)
                .map(|doc| doc.version)
                .unwrap_or(Version::initial());

            if let Some(expected) = change.expected_version
                && expected != actual
            {
                return Err(DocumentStoreError::ConcurrencyConflict {
                    document_id: change.id.clone(),
                    expected,
                    actual,
                });
            }
        }

        let now = Utc::now();
        let mut versions = Vec::with_capacity(changes.len());
        for change in changes.changes {
            match change.kind {
                ChangeKind::Put(body) => {
                    let version = documents
                        .get(&change.id)
                        .map(|doc| doc.version)
                        .unwrap_or(Version::initial())
                        .next();
                    documents.insert(
                        change.id.clone(),
                        Document {
                            id: change.id.clone(),
                            version,
                            last_modified: now,
                            body,
                        },
                    );
                    versions.push((change.id, version));
                }
                ChangeKind::Delete => {
                    documents.remove(&change.id);
                    versions.push((change.id, Version::initial()));
                }
            }
        }

        Ok(versions)
    }
}
