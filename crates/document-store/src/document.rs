use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{DocumentStoreError, Result};

/// Key of a stored document, e.g. `"OrderProcessor/67e55044-10b1-426f-9247-bb680e5fe0c8"`.
///
/// The part before the first `/` is the document's collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Creates a document ID, rejecting empty or blank keys.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(DocumentStoreError::InvalidDocumentId(id));
        }
        Ok(Self(id))
    }

    /// Builds `{collection}/{key}`.
    pub fn from_parts(collection: &str, key: impl std::fmt::Display) -> Self {
        Self(format!("{collection}/{key}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the collection prefix, or the whole key when it has no `/`.
    pub fn collection(&self) -> &str {
        self.0.split_once('/').map_or(&self.0, |(collection, _)| collection)
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DocumentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Version of a stored document, used as its etag for optimistic concurrency.
///
/// A document that does not exist is at version 0; the first write produces
/// version 1 and every later write increments it by one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// The version of a document that does not exist (0).
    pub fn initial() -> Self {
        Self(0)
    }

    /// The version assigned by the first write (1).
    pub fn first() -> Self {
        Self(1)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }

    /// Returns true if this version denotes an absent document.
    pub fn is_initial(&self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// A document as read back from a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,

    /// Version after the last successful write.
    pub version: Version,

    /// When the document was last written.
    pub last_modified: DateTime<Utc>,

    /// The document body as JSON.
    pub body: serde_json::Value,
}

impl Document {
    /// Deserializes the body into a concrete type.
    pub fn into_body<T: DeserializeOwned>(self) -> std::result::Result<T, serde_json::Error> {
        serde_json::from_value(self.body)
    }

    pub fn body_ref(&self) -> &serde_json::Value {
        &self.body
    }
}
