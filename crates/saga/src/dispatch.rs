//! Routing bus messages to saga instances.

use std::sync::Arc;

use bus::{BoxError, InMemoryTransport, Message};
use common::CorrelationId;

use crate::locator::{DefaultServiceLocator, ServiceLocator};
use crate::persister::SagaPersister;
use crate::saga::Saga;

/// Registers saga handlers on a transport and persists the saga after each one.
///
/// A message that starts a saga is registered with
/// [`initiated_by`](Self::initiated_by); one that continues an existing saga
/// with [`orchestrates`](Self::orchestrates). After the handler runs, a
/// completed saga is removed and any other saga is saved.
pub struct SagaDispatcher<S: Saga, L = DefaultServiceLocator> {
    persister: Arc<dyn SagaPersister<S>>,
    locator: Arc<L>,
}

impl<S: Saga, L> Clone for SagaDispatcher<S, L> {
    fn clone(&self) -> Self {
        Self {
            persister: Arc::clone(&self.persister),
            locator: Arc::clone(&self.locator),
        }
    }
}

impl<S: Saga> SagaDispatcher<S> {
    pub fn new(persister: Arc<dyn SagaPersister<S>>) -> Self {
        Self::with_locator(persister, Arc::new(DefaultServiceLocator))
    }
}

impl<S: Saga, L: ServiceLocator + 'static> SagaDispatcher<S, L> {
    /// Creates a dispatcher that builds new sagas through `locator`.
    pub fn with_locator(persister: Arc<dyn SagaPersister<S>>, locator: Arc<L>) -> Self {
        Self { persister, locator }
    }

    /// Handles `M` as a message that may start a new saga.
    ///
    /// The saga with the message's correlation id is loaded, or created if
    /// none is stored. A message without a correlation id starts a saga under
    /// a freshly generated one.
    pub async fn initiated_by<M, F>(&self, transport: &InMemoryTransport, handler: F)
    where
        M: Message,
        F: Fn(&mut S, M) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let dispatcher = self.clone();
        let handler = Arc::new(handler);
        transport
            .register(move |message: M| {
                let dispatcher = dispatcher.clone();
                let handler = Arc::clone(&handler);
                async move { dispatcher.initiate(message, handler.as_ref()).await }
            })
            .await;
    }

    /// Handles `M` as a message for an already running saga.
    ///
    /// Messages whose saga is not stored are ignored.
    pub async fn orchestrates<M, F>(&self, transport: &InMemoryTransport, handler: F)
    where
        M: Message,
        F: Fn(&mut S, M) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let dispatcher = self.clone();
        let handler = Arc::new(handler);
        transport
            .register(move |message: M| {
                let dispatcher = dispatcher.clone();
                let handler = Arc::clone(&handler);
                async move { dispatcher.continue_saga(message, handler.as_ref()).await }
            })
            .await;
    }

    async fn initiate<M, F>(&self, message: M, handler: &F) -> Result<(), BoxError>
    where
        M: Message,
        F: Fn(&mut S, M) -> Result<(), BoxError>,
    {
        let id = match message.correlation_id() {
            Some(id) if !id.is_nil() => id,
            _ => CorrelationId::new(),
        };

        let mut saga = match self.persister.get(id).await? {
            Some(saga) => saga,
            None => {
                tracing::debug!(saga_type = S::NAME, correlation_id = %id, "starting saga");
                let mut saga: S = self.locator.resolve();
                saga.set_id(id);
                saga
            }
        };

        handler(&mut saga, message)?;
        self.persist(&saga).await
    }

    async fn continue_saga<M, F>(&self, message: M, handler: &F) -> Result<(), BoxError>
    where
        M: Message,
        F: Fn(&mut S, M) -> Result<(), BoxError>,
    {
        let Some(id) = message.correlation_id().filter(|id| !id.is_nil()) else {
            tracing::debug!(
                saga_type = S::NAME,
                message_type = M::MESSAGE_TYPE,
                "message has no correlation id, ignored"
            );
            return Ok(());
        };

        let Some(mut saga) = self.persister.get(id).await? else {
            metrics::counter!("saga_messages_ignored_total", "saga_type" => S::NAME).increment(1);
            tracing::debug!(saga_type = S::NAME, correlation_id = %id, "no saga for message, ignored");
            return Ok(());
        };

        handler(&mut saga, message)?;
        self.persist(&saga).await
    }

    async fn persist(&self, saga: &S) -> Result<(), BoxError> {
        if saga.is_completed() {
            self.persister.complete(saga).await?;
        } else {
            self.persister.save(saga).await?;
        }
        Ok(())
    }
}
