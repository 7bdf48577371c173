//! Message lifecycle notifications.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{BoxError, BusError, CurrentMessageInformation, Result};

/// Receives lifecycle notifications for every message a transport processes.
///
/// For one message the transport calls, in order: `message_arrived`, then
/// (after handlers succeed) `before_commit`, then on failure either
/// `serialization_exception` or `processing_failed`, and finally
/// `processing_completed` whatever the outcome.
#[async_trait]
pub trait TransportListener: Send + Sync {
    async fn message_arrived(&self, _info: &CurrentMessageInformation) {}

    /// Called once handlers succeeded; an error fails the message.
    async fn before_commit(
        &self,
        _info: &CurrentMessageInformation,
    ) -> std::result::Result<(), BoxError> {
        Ok(())
    }

    async fn processing_failed(&self, _info: &CurrentMessageInformation, _error: &BusError) {}

    async fn serialization_exception(&self, _info: &CurrentMessageInformation, _error: &BusError) {
    }

    async fn processing_completed(
        &self,
        _info: &CurrentMessageInformation,
        _error: Option<&BusError>,
    ) {
    }
}

/// Handle returned by [`TransportEvents::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

impl SubscriptionId {
    fn next() -> Self {
        Self(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "subscription({})", self.0)
    }
}

/// Registry of lifecycle listeners for one transport.
///
/// Listeners are notified in subscription order. Cloning shares the registry.
#[derive(Clone, Default)]
pub struct TransportEvents {
    listeners: Arc<RwLock<Vec<(SubscriptionId, Arc<dyn TransportListener>)>>>,
}

impl TransportEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener.
    pub async fn subscribe(&self, listener: Arc<dyn TransportListener>) -> SubscriptionId {
        let id = SubscriptionId::next();
        self.listeners.write().await.push((id, listener));
        tracing::debug!(%id, "transport listener subscribed");
        id
    }

    /// Removes a listener. Returns false if it was not subscribed.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write().await;
        let before = listeners.len();
        listeners.retain(|(sub, _)| *sub != id);
        let removed = listeners.len() != before;
        if removed {
            tracing::debug!(%id, "transport listener unsubscribed");
        }
        removed
    }

    pub async fn listener_count(&self) -> usize {
        self.listeners.read().await.len()
    }

    // Notifications run against a snapshot so listeners may (un)subscribe
    // without deadlocking the registry.
    async fn snapshot(&self) -> Vec<Arc<dyn TransportListener>> {
        self.listeners
            .read()
            .await
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }

    pub async fn notify_message_arrived(&self, info: &CurrentMessageInformation) {
        for listener in self.snapshot().await {
            listener.message_arrived(info).await;
        }
    }

    /// Stops at the first listener that fails.
    pub async fn notify_before_commit(&self, info: &CurrentMessageInformation) -> Result<()> {
        for listener in self.snapshot().await {
            listener.before_commit(info).await.map_err(BusError::Commit)?;
        }
        Ok(())
    }

    pub async fn notify_processing_failed(&self, info: &CurrentMessageInformation, error: &BusError) {
        for listener in self.snapshot().await {
            listener.processing_failed(info, error).await;
        }
    }

    pub async fn notify_serialization_exception(
        &self,
        info: &CurrentMessageInformation,
        error: &BusError,
    ) {
        for listener in self.snapshot().await {
            listener.serialization_exception(info, error).await;
        }
    }

    pub async fn notify_processing_completed(
        &self,
        info: &CurrentMessageInformation,
        error: Option<&BusError>,
    ) {
        for listener in self.snapshot().await {
            listener.processing_completed(info, error).await;
        }
    }
}
