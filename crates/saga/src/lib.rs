//! Saga persistence on a document store.
//!
//! Sagas are stored one document per instance and accessed through a
//! per-message [`DocumentSession`](document_store::DocumentSession):
//!
//! - [`StoreProviderModule`] opens the session lazily while a message is
//!   processed, saves it right before the message commits and discards it
//!   when processing fails
//! - [`DocumentSagaPersister`] loads, saves and completes sagas through that
//!   session, with optimistic concurrency catching concurrent updates
//! - [`SagaDispatcher`] wires saga handlers to transport messages
//!
//! Nothing a handler writes reaches the store unless the whole message
//! succeeds.

pub mod dispatch;
pub mod document;
pub mod error;
pub mod locator;
pub mod persister;
pub mod provider;
pub mod saga;

pub use dispatch::SagaDispatcher;
pub use document::{PersistedSagaState, saga_document_id};
pub use error::{Result, SagaError};
pub use locator::{DefaultServiceLocator, ServiceLocator, ServiceRegistry};
pub use persister::{DocumentSagaPersister, SagaPersister};
pub use provider::{
    DetachedSessionProvider, DocumentSessionProvider, SessionHandle, StoreProviderModule,
};
pub use saga::Saga;
