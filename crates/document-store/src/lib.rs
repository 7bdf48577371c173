//! Document store abstraction for saga persistence.
//!
//! A [`DocumentStore`] holds JSON documents addressed by [`DocumentId`] and
//! versioned for optimistic concurrency. Work against a store is batched in a
//! [`DocumentSession`] (a unit of work) whose pending writes become durable
//! only when [`DocumentSession::save_changes`] commits them atomically.

pub mod config;
pub mod document;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod session;
pub mod store;

pub use config::{StoreBackend, StoreConfig, connect};
pub use document::{Document, DocumentId, Version};
pub use error::{DocumentStoreError, Result};
pub use memory::InMemoryDocumentStore;
pub use postgres::PostgresDocumentStore;
pub use session::{DocumentSession, SessionId, SessionOptions};
pub use store::{Change, ChangeKind, ChangeSet, DocumentStore, DocumentStoreExt};
