use std::sync::Arc;

use async_trait::async_trait;

use crate::{Document, DocumentId, DocumentSession, Result, SessionOptions, Version};

/// What a change does to its document.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeKind {
    /// Create or replace the document body.
    Put(serde_json::Value),
    /// Remove the document.
    Delete,
}

/// A single pending write.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub id: DocumentId,
    pub kind: ChangeKind,

    /// Version the document must be at for the change to apply.
    /// `Some(Version::initial())` requires the document to be absent;
    /// `None` skips the check.
    pub expected_version: Option<Version>,
}

impl Change {
    pub fn put(id: DocumentId, body: serde_json::Value) -> Self {
        Self {
            id,
            kind: ChangeKind::Put(body),
            expected_version: None,
        }
    }

    pub fn delete(id: DocumentId) -> Self {
        Self {
            id,
            kind: ChangeKind::Delete,
            expected_version: None,
        }
    }

    /// Requires the document to be at `version` when the change is committed.
    pub fn expect_version(mut self, version: Version) -> Self {
        self.expected_version = Some(version);
        self
    }

    /// Requires the document to be absent when the change is committed.
    pub fn expect_new(self) -> Self {
        self.expect_version(Version::initial())
    }
}

/// A batch of changes committed atomically: either every change applies or none does.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub changes: Vec<Change>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, change: Change) {
        self.changes.push(change);
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

impl FromIterator<Change> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = Change>>(iter: I) -> Self {
        Self {
            changes: iter.into_iter().collect(),
        }
    }
}

/// Core trait for document store backends.
///
/// All implementations must be thread-safe (Send + Sync); a single store
/// handle is shared by every session opened against it.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Loads a document by ID.
    ///
    /// Returns None if the document doesn't exist.
    async fn load(&self, id: &DocumentId) -> Result<Option<Document>>;

    /// Commits a change set atomically.
    ///
    /// Fails with `ConcurrencyConflict` (and applies nothing) if any change's
    /// expected version does not match the stored version.
    ///
    /// Returns the resulting version of every changed document, in change
    /// order; deleted documents report `Version::initial()`.
    async fn commit(&self, changes: ChangeSet) -> Result<Vec<(DocumentId, Version)>>;
}

/// Extension trait providing convenience methods for shared store handles.
pub trait DocumentStoreExt {
    /// Opens a new unit-of-work session against this store.
    fn open_session(&self, options: SessionOptions) -> DocumentSession;
}

impl DocumentStoreExt for Arc<dyn DocumentStore> {
    fn open_session(&self, options: SessionOptions) -> DocumentSession {
        DocumentSession::open(Arc::clone(self), options)
    }
}
