//! Components that plug into a transport's lifecycle.

use async_trait::async_trait;

use crate::TransportEvents;

/// A component that hooks into message processing through lifecycle events.
///
/// `init` subscribes whatever listeners the module needs and `stop` removes
/// exactly those, so a module can be started and stopped repeatedly without
/// accumulating subscriptions.
#[async_trait]
pub trait MessageModule: Send + Sync {
    async fn init(&self, events: &TransportEvents);

    async fn stop(&self, events: &TransportEvents);
}
