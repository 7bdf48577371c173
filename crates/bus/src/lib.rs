//! Bus-side plumbing for per-message units of work.
//!
//! This crate models the parts of a message bus that the saga persistence
//! layer hooks into:
//! - [`TransportEvents`]: lifecycle notifications (message arrived, before
//!   commit, processing completed/failed, serialization exception) that
//!   [`TransportListener`]s subscribe to
//! - [`MessageModule`]: components that register listeners on start and
//!   remove them on stop
//! - [`MessageScope`]: task-local storage that lives exactly as long as the
//!   processing of one message
//! - [`InMemoryTransport`]: an in-process transport that drives the lifecycle
//!   around typed message handlers, on demand or from a worker pool

pub mod config;
pub mod error;
pub mod events;
pub mod message;
pub mod module;
pub mod scope;
pub mod transport;

pub use config::TransportConfig;
pub use error::{BoxError, BusError, Result};
pub use events::{SubscriptionId, TransportEvents, TransportListener};
pub use message::{CurrentMessageInformation, Message, TransportMessage};
pub use module::MessageModule;
pub use scope::{MessageScope, ScopeKey};
pub use transport::{InMemoryTransport, MessageHandler, ProcessingOutcome};
