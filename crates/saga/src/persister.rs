//! Loading, saving and completing sagas through the current document session.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use common::CorrelationId;

use crate::document::{PersistedSagaState, saga_document_id};
use crate::error::Result;
use crate::locator::{DefaultServiceLocator, ServiceLocator};
use crate::provider::DocumentSessionProvider;
use crate::saga::Saga;

/// Storage of saga instances of one type.
#[async_trait]
pub trait SagaPersister<S: Saga>: Send + Sync {
    /// Loads the saga with the given correlation id, or None if it has no document.
    async fn get(&self, id: CorrelationId) -> Result<Option<S>>;

    /// Records the saga's current state, creating its document if needed.
    async fn save(&self, saga: &S) -> Result<()>;

    /// Removes the saga's document. Completing a saga that is not stored does nothing.
    async fn complete(&self, saga: &S) -> Result<()>;
}

/// Saga persister backed by a document session.
///
/// All operations go through the session returned by the provider and are
/// only staged there; they reach the store when the session is saved, which
/// for [`StoreProviderModule`](crate::StoreProviderModule) happens before the
/// message commits. Sagas are stored as [`PersistedSagaState`] documents keyed
/// by [`saga_document_id`].
pub struct DocumentSagaPersister<S, L = DefaultServiceLocator> {
    provider: Arc<dyn DocumentSessionProvider>,
    locator: Arc<L>,
    _saga: PhantomData<fn() -> S>,
}

impl<S: Saga> DocumentSagaPersister<S> {
    pub fn new(provider: Arc<dyn DocumentSessionProvider>) -> Self {
        Self::with_locator(provider, Arc::new(DefaultServiceLocator))
    }
}

impl<S: Saga, L: ServiceLocator> DocumentSagaPersister<S, L> {
    /// Creates a persister that builds loaded sagas through `locator`.
    pub fn with_locator(provider: Arc<dyn DocumentSessionProvider>, locator: Arc<L>) -> Self {
        Self {
            provider,
            locator,
            _saga: PhantomData,
        }
    }
}

#[async_trait]
impl<S: Saga, L: ServiceLocator + 'static> SagaPersister<S> for DocumentSagaPersister<S, L> {
    #[tracing::instrument(skip(self), fields(saga_type = S::NAME, correlation_id = %id))]
    async fn get(&self, id: CorrelationId) -> Result<Option<S>> {
        let document_id = saga_document_id::<S>(id);
        let session = self.provider.current()?;
        let persisted = session
            .lock()
            .await
            .load::<PersistedSagaState<S::State>>(&document_id)
            .await?;

        let Some(persisted) = persisted else {
            tracing::debug!("saga not found");
            return Ok(None);
        };

        let mut saga: S = self.locator.resolve();
        saga.set_id(id);
        saga.set_state(persisted.state);
        Ok(Some(saga))
    }

    #[tracing::instrument(skip(self, saga), fields(saga_type = S::NAME, correlation_id = %saga.id()))]
    async fn save(&self, saga: &S) -> Result<()> {
        let document_id = saga_document_id::<S>(saga.id());
        let session = self.provider.current()?;
        let mut session = session.lock().await;

        // Loading first registers the stored version, so the flush is checked
        // against the state this message actually read.
        let existed = session.load_raw(&document_id).await?.is_some();
        session.store(
            document_id.clone(),
            &PersistedSagaState {
                id: document_id,
                state: saga.state(),
            },
        )?;

        metrics::counter!("saga_documents_saved_total", "saga_type" => S::NAME).increment(1);
        if existed {
            tracing::debug!("saga updated");
        } else {
            tracing::debug!("saga created");
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, saga), fields(saga_type = S::NAME, correlation_id = %saga.id()))]
    async fn complete(&self, saga: &S) -> Result<()> {
        let document_id = saga_document_id::<S>(saga.id());
        let session = self.provider.current()?;
        let mut session = session.lock().await;

        if session.load_raw(&document_id).await?.is_none() {
            tracing::debug!("completed saga was not stored");
            return Ok(());
        }
        session.delete(document_id);

        metrics::counter!("saga_documents_deleted_total", "saga_type" => S::NAME).increment(1);
        tracing::debug!("saga completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use document_store::{DocumentStore, InMemoryDocumentStore};
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::locator::ServiceRegistry;
    use crate::provider::DetachedSessionProvider;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Tally {
        seen: Vec<String>,
    }

    #[derive(Default)]
    struct Counter {
        id: CorrelationId,
        state: Tally,
        label: &'static str,
    }

    impl Saga for Counter {
        const NAME: &'static str = "Counter";
        type State = Tally;

        fn id(&self) -> CorrelationId {
            self.id
        }

        fn set_id(&mut self, id: CorrelationId) {
            self.id = id;
        }

        fn state(&self) -> &Tally {
            &self.state
        }

        fn set_state(&mut self, state: Tally) {
            self.state = state;
        }

        fn is_completed(&self) -> bool {
            false
        }
    }

    fn counter(id: CorrelationId, seen: &[&str]) -> Counter {
        Counter {
            id,
            state: Tally {
                seen: seen.iter().map(|s| s.to_string()).collect(),
            },
            label: "",
        }
    }

    /// Provider handing out one shared session, flushed by hand.
    struct SharedSession(crate::provider::SessionHandle);

    impl DocumentSessionProvider for SharedSession {
        fn current(&self) -> Result<crate::provider::SessionHandle> {
            Ok(Arc::clone(&self.0))
        }
    }

    fn shared(store: &InMemoryDocumentStore) -> Arc<SharedSession> {
        let store: Arc<dyn DocumentStore> = Arc::new(store.clone());
        let session = DetachedSessionProvider::new(store).current().unwrap();
        Arc::new(SharedSession(session))
    }

    #[tokio::test]
    async fn get_returns_none_for_unknown_saga() {
        let store = InMemoryDocumentStore::new();
        let persister = DocumentSagaPersister::<Counter>::new(shared(&store));
        assert!(persister.get(CorrelationId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn saved_saga_round_trips_after_flush() {
        let store = InMemoryDocumentStore::new();
        let provider = shared(&store);
        let persister = DocumentSagaPersister::<Counter>::new(provider.clone());
        let id = CorrelationId::new();

        persister.save(&counter(id, &["a", "b"])).await.unwrap();
        provider.0.lock().await.save_changes().await.unwrap();

        let reader = DocumentSagaPersister::<Counter>::new(shared(&store));
        let loaded = reader.get(id).await.unwrap().unwrap();
        assert_eq!(loaded.id, id);
        assert_eq!(loaded.state.seen, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn save_is_visible_in_the_same_session_before_flush() {
        let store = InMemoryDocumentStore::new();
        let persister = DocumentSagaPersister::<Counter>::new(shared(&store));
        let id = CorrelationId::new();

        persister.save(&counter(id, &["a"])).await.unwrap();

        assert!(persister.get(id).await.unwrap().is_some());
        assert_eq!(store.document_count().await, 0);
    }

    #[tokio::test]
    async fn second_save_replaces_state() {
        let store = InMemoryDocumentStore::new();
        let provider = shared(&store);
        let persister = DocumentSagaPersister::<Counter>::new(provider.clone());
        let id = CorrelationId::new();

        persister.save(&counter(id, &["a"])).await.unwrap();
        provider.0.lock().await.save_changes().await.unwrap();
        persister.save(&counter(id, &["a", "b", "c"])).await.unwrap();
        provider.0.lock().await.save_changes().await.unwrap();

        let loaded = persister.get(id).await.unwrap().unwrap();
        assert_eq!(loaded.state.seen.len(), 3);
        assert_eq!(store.document_count().await, 1);
    }

    #[tokio::test]
    async fn complete_removes_document_and_is_idempotent() {
        let store = InMemoryDocumentStore::new();
        let provider = shared(&store);
        let persister = DocumentSagaPersister::<Counter>::new(provider.clone());
        let id = CorrelationId::new();
        let saga = counter(id, &["a"]);

        persister.save(&saga).await.unwrap();
        provider.0.lock().await.save_changes().await.unwrap();

        persister.complete(&saga).await.unwrap();
        persister.complete(&saga).await.unwrap();
        provider.0.lock().await.save_changes().await.unwrap();

        assert_eq!(store.document_count().await, 0);
        assert!(persister.get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn complete_of_unknown_saga_is_a_no_op() {
        let store = InMemoryDocumentStore::new();
        let provider = shared(&store);
        let persister = DocumentSagaPersister::<Counter>::new(provider.clone());

        persister
            .complete(&counter(CorrelationId::new(), &[]))
            .await
            .unwrap();
        assert!(!provider.0.lock().await.is_dirty());
    }

    #[tokio::test]
    async fn loaded_sagas_are_built_through_the_locator() {
        let store = InMemoryDocumentStore::new();
        let provider = shared(&store);
        let mut registry = ServiceRegistry::new();
        registry.register(|| Counter {
            label: "from registry",
            ..Counter::default()
        });
        let persister =
            DocumentSagaPersister::<Counter, _>::with_locator(provider.clone(), Arc::new(registry));
        let id = CorrelationId::new();

        persister.save(&counter(id, &["a"])).await.unwrap();
        let loaded = persister.get(id).await.unwrap().unwrap();

        assert_eq!(loaded.label, "from registry");
        assert_eq!(loaded.state.seen, vec!["a"]);
    }

    #[tokio::test]
    async fn sagas_with_different_ids_are_isolated() {
        let store = InMemoryDocumentStore::new();
        let provider = shared(&store);
        let persister = DocumentSagaPersister::<Counter>::new(provider.clone());
        let (first, second) = (CorrelationId::new(), CorrelationId::new());

        persister.save(&counter(first, &["one"])).await.unwrap();
        persister.save(&counter(second, &["two"])).await.unwrap();
        persister.complete(&counter(first, &[])).await.unwrap();
        provider.0.lock().await.save_changes().await.unwrap();

        assert!(persister.get(first).await.unwrap().is_none());
        assert_eq!(
            persister.get(second).await.unwrap().unwrap().state.seen,
            vec!["two"]
        );
    }
}
