//! Per-message document sessions driven by transport lifecycle events.

use std::sync::Arc;

use async_trait::async_trait;
use bus::{
    BoxError, BusError, CurrentMessageInformation, MessageModule, MessageScope, ScopeKey,
    SubscriptionId, TransportEvents, TransportListener,
};
use document_store::{DocumentSession, DocumentStore, DocumentStoreExt, SessionOptions};
use tokio::sync::Mutex;

use crate::error::{Result, SagaError};

/// Shared handle to a session, safe to hold across `.await` points.
pub type SessionHandle = Arc<Mutex<DocumentSession>>;

/// Gives consumers the document session they should work in.
pub trait DocumentSessionProvider: Send + Sync {
    /// Returns the session for the current unit of work.
    fn current(&self) -> Result<SessionHandle>;
}

/// Per-message state kept in the [`MessageScope`].
#[derive(Default)]
struct UnitOfWork {
    message_arrived: bool,
    session: Option<SessionHandle>,
}

/// Listener half of [`StoreProviderModule`].
struct ScopedSessions {
    store: Arc<dyn DocumentStore>,
    key: ScopeKey,
}

impl ScopedSessions {
    fn current(&self) -> Result<SessionHandle> {
        MessageScope::with_current(|scope| {
            scope.with_slot(self.key, |unit: &mut UnitOfWork| {
                if !unit.message_arrived {
                    return Err(SagaError::SessionOutsideMessage);
                }
                let session = unit.session.get_or_insert_with(|| {
                    metrics::counter!("document_sessions_opened_total").increment(1);
                    Arc::new(Mutex::new(
                        self.store.open_session(SessionOptions::optimistic()),
                    ))
                });
                Ok(Arc::clone(session))
            })
        })
        .unwrap_or(Err(SagaError::SessionOutsideMessage))
    }

    fn existing_session(&self) -> Option<SessionHandle> {
        MessageScope::with_current(|scope| {
            scope.with_slot(self.key, |unit: &mut UnitOfWork| unit.session.clone())
        })
        .flatten()
    }

    /// Leaves message processing and releases the session, if one was opened.
    fn release(&self, info: &CurrentMessageInformation) {
        let session = MessageScope::with_current(|scope| scope.take_slot::<UnitOfWork>(self.key))
            .flatten()
            .and_then(|unit| unit.session);

        let Some(session) = session else { return };
        match unsaved_changes(&session) {
            Some(0) => tracing::debug!(message_id = %info.message_id, "released session"),
            Some(discarded) => {
                metrics::counter!("document_sessions_discarded_total").increment(1);
                tracing::debug!(
                    message_id = %info.message_id,
                    discarded,
                    "released session with unsaved changes"
                );
            }
            None => tracing::warn!(
                message_id = %info.message_id,
                "released session while still in use, unsaved changes unknown"
            ),
        }
    }
}

/// Number of staged writes, or None if the session is locked elsewhere.
fn unsaved_changes(session: &SessionHandle) -> Option<usize> {
    session
        .try_lock()
        .ok()
        .map(|session| session.pending_changes())
}

#[async_trait]
impl TransportListener for ScopedSessions {
    async fn message_arrived(&self, _info: &CurrentMessageInformation) {
        MessageScope::with_current(|scope| {
            scope.with_slot(self.key, |unit: &mut UnitOfWork| unit.message_arrived = true)
        });
    }

    async fn before_commit(
        &self,
        info: &CurrentMessageInformation,
    ) -> std::result::Result<(), BoxError> {
        let Some(session) = self.existing_session() else {
            return Ok(());
        };
        let mut session = session.lock().await;
        let changes = session.pending_changes();
        session.save_changes().await?;
        metrics::counter!("document_session_flushes_total").increment(1);
        tracing::debug!(message_id = %info.message_id, changes, "flushed session before commit");
        Ok(())
    }

    async fn processing_failed(&self, info: &CurrentMessageInformation, _error: &BusError) {
        self.release(info);
    }

    async fn serialization_exception(&self, info: &CurrentMessageInformation, _error: &BusError) {
        self.release(info);
    }

    async fn processing_completed(
        &self,
        info: &CurrentMessageInformation,
        _error: Option<&BusError>,
    ) {
        self.release(info);
    }
}

/// Provides one optimistic-concurrency session per message being processed.
///
/// Registered as a [`MessageModule`], it follows the transport lifecycle:
/// - message arrived: sessions may be requested from now on; none is opened
///   until the first [`current`](DocumentSessionProvider::current) call
/// - before commit: the session, if any, saves its changes; this is the only
///   point where writes reach the store
/// - completed, failed or serialization exception: the session is released
///   and any unsaved changes are discarded
///
/// Requesting a session outside that window fails with
/// [`SagaError::SessionOutsideMessage`].
pub struct StoreProviderModule {
    sessions: Arc<ScopedSessions>,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl StoreProviderModule {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            sessions: Arc::new(ScopedSessions {
                store,
                key: ScopeKey::new(),
            }),
            subscription: Mutex::new(None),
        }
    }

    /// Returns true while subscribed to a transport's events.
    pub async fn is_subscribed(&self) -> bool {
        self.subscription.lock().await.is_some()
    }
}

impl DocumentSessionProvider for StoreProviderModule {
    fn current(&self) -> Result<SessionHandle> {
        self.sessions.current()
    }
}

#[async_trait]
impl MessageModule for StoreProviderModule {
    async fn init(&self, events: &TransportEvents) {
        let mut subscription = self.subscription.lock().await;
        if subscription.is_some() {
            return;
        }
        let listener: Arc<dyn TransportListener> = self.sessions.clone();
        *subscription = Some(events.subscribe(listener).await);
    }

    async fn stop(&self, events: &TransportEvents) {
        if let Some(id) = self.subscription.lock().await.take() {
            events.unsubscribe(id).await;
        }
    }
}

/// Opens a new session on every call.
///
/// Meant for reading saga state outside message processing, such as from
/// tests or diagnostics. Nothing flushes these sessions, so writes made
/// through them are never persisted.
pub struct DetachedSessionProvider {
    store: Arc<dyn DocumentStore>,
}

impl DetachedSessionProvider {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

impl DocumentSessionProvider for DetachedSessionProvider {
    fn current(&self) -> Result<SessionHandle> {
        Ok(Arc::new(Mutex::new(
            self.store.open_session(SessionOptions::optimistic()),
        )))
    }
}

#[cfg(test)]
mod tests {
    use bus::{InMemoryTransport, Message, TransportMessage};
    use common::CorrelationId;
    use document_store::{DocumentId, InMemoryDocumentStore};
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Serialize, Deserialize)]
    struct Touch {
        key: String,
        fail: bool,
    }

    impl Message for Touch {
        const MESSAGE_TYPE: &'static str = "Touch";
    }

    struct Harness {
        store: InMemoryDocumentStore,
        provider: Arc<StoreProviderModule>,
        transport: InMemoryTransport,
    }

    async fn harness() -> Harness {
        let store = InMemoryDocumentStore::new();
        let provider = Arc::new(StoreProviderModule::new(Arc::new(store.clone())));
        let transport = InMemoryTransport::default();
        transport.add_module(provider.clone()).await;

        let handler_provider = Arc::clone(&provider);
        transport
            .register(move |message: Touch| {
                let provider = Arc::clone(&handler_provider);
                async move {
                    let session = provider.current()?;
                    session.lock().await.store(
                        DocumentId::from_parts("touches", &message.key),
                        &serde_json::json!({"key": message.key}),
                    )?;
                    if message.fail {
                        return Err::<(), BoxError>("handler failed".into());
                    }
                    Ok(())
                }
            })
            .await;

        Harness {
            store,
            provider,
            transport,
        }
    }

    fn touch(key: &str, fail: bool) -> TransportMessage {
        TransportMessage::new(
            &Touch {
                key: key.to_string(),
                fail,
            },
            "local",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn current_fails_outside_message_processing() {
        let h = harness().await;
        assert!(matches!(
            h.provider.current(),
            Err(SagaError::SessionOutsideMessage)
        ));
    }

    #[tokio::test]
    async fn current_fails_in_scope_before_message_arrived() {
        let provider = StoreProviderModule::new(Arc::new(InMemoryDocumentStore::new()));
        let info = CurrentMessageInformation {
            message_id: common::MessageId::new(),
            message_type: "Touch".to_string(),
            correlation_id: Some(CorrelationId::new()),
            source: "local".to_string(),
        };
        let result = MessageScope::run(info, async { provider.current().map(|_| ()) }).await;
        assert!(matches!(result, Err(SagaError::SessionOutsideMessage)));
    }

    #[tokio::test]
    async fn same_session_is_returned_within_a_message() {
        let store = InMemoryDocumentStore::new();
        let provider = Arc::new(StoreProviderModule::new(Arc::new(store)));
        let transport = InMemoryTransport::default();
        transport.add_module(provider.clone()).await;

        let handler_provider = Arc::clone(&provider);
        transport
            .register(move |_: Touch| {
                let provider = Arc::clone(&handler_provider);
                async move {
                    let first = provider.current()?;
                    let second = provider.current()?;
                    assert!(Arc::ptr_eq(&first, &second));
                    Ok::<(), BoxError>(())
                }
            })
            .await;

        transport.process(touch("a", false)).await.unwrap();
    }

    #[tokio::test]
    async fn writes_are_flushed_before_commit() {
        let h = harness().await;
        h.transport.process(touch("a", false)).await.unwrap();

        let doc = h
            .store
            .load(&DocumentId::from_parts("touches", "a"))
            .await
            .unwrap();
        assert!(doc.is_some());
        assert!(matches!(
            h.provider.current(),
            Err(SagaError::SessionOutsideMessage)
        ));
    }

    #[tokio::test]
    async fn failed_message_discards_writes() {
        let h = harness().await;
        let err = h.transport.process(touch("a", true)).await.unwrap_err();
        assert!(matches!(err, BusError::Handler { .. }));
        assert_eq!(h.store.document_count().await, 0);

        // The next message on the same transport starts clean
        h.transport.process(touch("b", false)).await.unwrap();
        assert_eq!(h.store.document_count().await, 1);
    }

    #[tokio::test]
    async fn init_is_idempotent_and_stop_unsubscribes() {
        let provider = StoreProviderModule::new(Arc::new(InMemoryDocumentStore::new()));
        let events = TransportEvents::new();

        provider.init(&events).await;
        provider.init(&events).await;
        assert_eq!(events.listener_count().await, 1);
        assert!(provider.is_subscribed().await);

        provider.stop(&events).await;
        provider.stop(&events).await;
        assert_eq!(events.listener_count().await, 0);

        provider.init(&events).await;
        assert_eq!(events.listener_count().await, 1);
    }

    #[tokio::test]
    async fn completion_releases_session_within_the_same_scope() {
        let sessions = ScopedSessions {
            store: Arc::new(InMemoryDocumentStore::new()),
            key: ScopeKey::new(),
        };
        let info = CurrentMessageInformation {
            message_id: common::MessageId::new(),
            message_type: "Touch".to_string(),
            correlation_id: None,
            source: "local".to_string(),
        };

        MessageScope::run(info.clone(), async {
            sessions.message_arrived(&info).await;
            let session = sessions.current().unwrap();
            session
                .lock()
                .await
                .store(DocumentId::from_parts("touches", "a"), &1)
                .unwrap();

            sessions.processing_completed(&info, None).await;

            assert!(sessions.existing_session().is_none());
            assert!(matches!(
                sessions.current(),
                Err(SagaError::SessionOutsideMessage)
            ));
        })
        .await;
    }

    #[tokio::test]
    async fn unsaved_changes_is_unknown_while_session_is_locked() {
        let provider = DetachedSessionProvider::new(Arc::new(InMemoryDocumentStore::new()));
        let session = provider.current().unwrap();
        session
            .lock()
            .await
            .store(DocumentId::from_parts("touches", "a"), &1)
            .unwrap();
        assert_eq!(unsaved_changes(&session), Some(1));

        let guard = session.lock().await;
        assert_eq!(unsaved_changes(&session), None);
        drop(guard);
        assert_eq!(unsaved_changes(&session), Some(1));
    }

    #[tokio::test]
    async fn detached_provider_opens_a_fresh_session_each_call() {
        let provider = DetachedSessionProvider::new(Arc::new(InMemoryDocumentStore::new()));
        let first = provider.current().unwrap();
        let second = provider.current().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
