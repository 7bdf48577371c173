//! Identifier types shared across the saga persistence crates.

pub mod types;

pub use types::{CorrelationId, MessageId};
