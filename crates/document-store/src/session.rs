//! Unit-of-work sessions over a [`DocumentStore`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::store::{Change, ChangeKind, ChangeSet, DocumentStore};
use crate::{DocumentId, Result, Version};

/// Identifies a session in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Options applied when opening a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionOptions {
    /// When set, every write carries the version the session observed for
    /// that document, and a write to a document the session never saw
    /// requires the document to be absent.
    pub optimistic_concurrency: bool,
}

impl SessionOptions {
    /// Options with no version checks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Options with optimistic concurrency enabled.
    pub fn optimistic() -> Self {
        Self {
            optimistic_concurrency: true,
        }
    }
}

/// What the store returned the first time the session read a document.
#[derive(Debug, Clone)]
struct Observed {
    version: Version,
    body: Option<serde_json::Value>,
}

/// A unit of work against a document store.
///
/// Reads go through an identity map, so repeated loads of the same document
/// return what the session first saw, overlaid with the session's own
/// pending writes. Writes are buffered until [`save_changes`] commits them
/// as one atomic [`ChangeSet`]; dropping the session discards whatever was
/// not saved.
///
/// [`save_changes`]: DocumentSession::save_changes
pub struct DocumentSession {
    id: SessionId,
    store: Arc<dyn DocumentStore>,
    options: SessionOptions,
    observed: HashMap<DocumentId, Observed>,
    pending: BTreeMap<DocumentId, ChangeKind>,
}

impl DocumentSession {
    /// Opens a session against a shared store handle.
    pub fn open(store: Arc<dyn DocumentStore>, options: SessionOptions) -> Self {
        let id = SessionId::new();
        tracing::debug!(session_id = %id, optimistic = options.optimistic_concurrency, "document session opened");
        Self {
            id,
            store,
            options,
            observed: HashMap::new(),
            pending: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn options(&self) -> SessionOptions {
        self.options
    }

    /// Loads a document and deserializes its body.
    ///
    /// Returns None if the document doesn't exist or this session deleted it.
    pub async fn load<T: DeserializeOwned>(&mut self, id: &DocumentId) -> Result<Option<T>> {
        let body = self.load_raw(id).await?;
        Ok(body.map(serde_json::from_value).transpose()?)
    }

    /// Loads a document body as raw JSON.
    pub async fn load_raw(&mut self, id: &DocumentId) -> Result<Option<serde_json::Value>> {
        if let Some(kind) = self.pending.get(id) {
            return Ok(match kind {
                ChangeKind::Put(body) => Some(body.clone()),
                ChangeKind::Delete => None,
            });
        }

        if let Some(observed) = self.observed.get(id) {
            return Ok(observed.body.clone());
        }

        let observed = match self.store.load(id).await? {
            Some(doc) => Observed {
                version: doc.version,
                body: Some(doc.body),
            },
            None => Observed {
                version: Version::initial(),
                body: None,
            },
        };
        let body = observed.body.clone();
        self.observed.insert(id.clone(), observed);
        Ok(body)
    }

    /// Returns the store version this session last observed for a document,
    /// or None if the session has not read it.
    pub fn version_of(&self, id: &DocumentId) -> Option<Version> {
        self.observed.get(id).map(|o| o.version)
    }

    /// Stages a create-or-replace of a document.
    pub fn store<T: Serialize + ?Sized>(&mut self, id: DocumentId, document: &T) -> Result<()> {
        let body = serde_json::to_value(document)?;
        self.pending.insert(id, ChangeKind::Put(body));
        Ok(())
    }

    /// Stages the removal of a document.
    pub fn delete(&mut self, id: DocumentId) {
        self.pending.insert(id, ChangeKind::Delete);
    }

    /// Number of staged writes.
    pub fn pending_changes(&self) -> usize {
        self.pending.len()
    }

    pub fn is_dirty(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Commits all staged writes atomically.
    ///
    /// On success the session's observed versions advance so the session can
    /// keep working and flush again. On failure nothing is applied and the
    /// staged writes are kept.
    #[tracing::instrument(skip(self), fields(session_id = %self.id, changes = self.pending.len()))]
    pub async fn save_changes(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let changes: ChangeSet = self
            .pending
            .iter()
            .map(|(id, kind)| Change {
                id: id.clone(),
                kind: kind.clone(),
                expected_version: self.expected_version(id, kind),
            })
            .collect();

        let versions: HashMap<DocumentId, Version> = self
            .store
            .commit(changes)
            .await
            .inspect_err(|e| {
                if e.is_concurrency_conflict() {
                    metrics::counter!("document_store_conflicts_total").increment(1);
                    tracing::warn!(error = %e, "session changes rejected");
                }
            })?
            .into_iter()
            .collect();

        for (id, kind) in std::mem::take(&mut self.pending) {
            let observed = match kind {
                ChangeKind::Put(body) => Observed {
                    version: versions.get(&id).copied().unwrap_or_default(),
                    body: Some(body),
                },
                ChangeKind::Delete => Observed {
                    version: Version::initial(),
                    body: None,
                },
            };
            self.observed.insert(id, observed);
        }

        tracing::debug!(documents = versions.len(), "session changes saved");
        Ok(())
    }

    fn expected_version(&self, id: &DocumentId, kind: &ChangeKind) -> Option<Version> {
        if !self.options.optimistic_concurrency {
            return None;
        }
        match (self.observed.get(id), kind) {
            (Some(observed), _) => Some(observed.version),
            (None, ChangeKind::Put(_)) => Some(Version::initial()),
            (None, ChangeKind::Delete) => None,
        }
    }
}

impl std::fmt::Debug for DocumentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentSession")
            .field("id", &self.id)
            .field("options", &self.options)
            .field("observed", &self.observed.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl Drop for DocumentSession {
    fn drop(&mut self) {
        if self.pending.is_empty() {
            tracing::debug!(session_id = %self.id, "document session disposed");
        } else {
            tracing::debug!(
                session_id = %self.id,
                discarded = self.pending.len(),
                "document session disposed with unsaved changes"
            );
        }
    }
}
