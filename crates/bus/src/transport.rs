//! In-process transport driving the message lifecycle.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use common::MessageId;
use tokio::sync::{Mutex, RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::{
    BoxError, BusError, CurrentMessageInformation, Message, MessageModule, MessageScope, Result,
    TransportConfig, TransportEvents, TransportMessage,
};

/// Handles transport messages of one type.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &TransportMessage) -> Result<()>;
}

/// Adapts a typed async closure into a [`MessageHandler`].
struct TypedHandler<M, F> {
    handler: F,
    _message: PhantomData<fn(M)>,
}

#[async_trait]
impl<M, F, Fut> MessageHandler for TypedHandler<M, F>
where
    M: Message,
    F: Fn(M) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<(), BoxError>> + Send,
{
    async fn handle(&self, message: &TransportMessage) -> Result<()> {
        let typed: M = serde_json::from_value(message.payload.clone()).map_err(|source| {
            BusError::Serialization {
                message_type: message.message_type.clone(),
                source,
            }
        })?;
        (self.handler)(typed)
            .await
            .map_err(|source| BusError::Handler {
                message_type: message.message_type.clone(),
                source,
            })
    }
}

/// Result of processing one message, broadcast to outcome subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingOutcome {
    pub message_id: MessageId,
    pub message_type: String,
    /// The failure rendered as text, or None on success.
    pub error: Option<String>,
}

impl ProcessingOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

struct Inner {
    config: TransportConfig,
    events: TransportEvents,
    handlers: RwLock<HashMap<String, Vec<Arc<dyn MessageHandler>>>>,
    modules: Mutex<Vec<Arc<dyn MessageModule>>>,
    queue: Mutex<Option<mpsc::Sender<TransportMessage>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    outcomes: broadcast::Sender<ProcessingOutcome>,
}

/// An in-process transport.
///
/// Every message is processed inside its own [`MessageScope`] with the full
/// lifecycle fired on the transport's [`TransportEvents`]. Messages are
/// processed either directly through [`process`](Self::process) or queued
/// with [`send`](Self::send) and drained by worker tasks started with
/// [`start`](Self::start). Cloning shares the transport.
#[derive(Clone)]
pub struct InMemoryTransport {
    inner: Arc<Inner>,
}

impl InMemoryTransport {
    /// Creates a stopped transport.
    ///
    /// A zero `worker_count` or `queue_capacity` is raised to one.
    pub fn new(mut config: TransportConfig) -> Self {
        if config.worker_count == 0 || config.queue_capacity == 0 {
            tracing::warn!(
                worker_count = config.worker_count,
                queue_capacity = config.queue_capacity,
                "transport config values must be at least 1, raising zeros"
            );
            config.worker_count = config.worker_count.max(1);
            config.queue_capacity = config.queue_capacity.max(1);
        }
        let (outcomes, _) = broadcast::channel(config.queue_capacity.max(16));
        Self {
            inner: Arc::new(Inner {
                config,
                events: TransportEvents::new(),
                handlers: RwLock::new(HashMap::new()),
                modules: Mutex::new(Vec::new()),
                queue: Mutex::new(None),
                workers: Mutex::new(Vec::new()),
                outcomes,
            }),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    /// The lifecycle events of this transport.
    pub fn events(&self) -> &TransportEvents {
        &self.inner.events
    }

    /// Registers a handler for messages of type `M`.
    pub async fn register<M, F, Fut>(&self, handler: F)
    where
        M: Message,
        F: Fn(M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
    {
        self.register_handler(
            M::MESSAGE_TYPE,
            Arc::new(TypedHandler {
                handler,
                _message: PhantomData,
            }),
        )
        .await;
    }

    /// Registers an untyped handler for a message type.
    pub async fn register_handler(
        &self,
        message_type: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) {
        let message_type = message_type.into();
        tracing::debug!(%message_type, "message handler registered");
        self.inner
            .handlers
            .write()
            .await
            .entry(message_type)
            .or_default()
            .push(handler);
    }

    /// Adds a module and initializes it against this transport's events.
    pub async fn add_module(&self, module: Arc<dyn MessageModule>) {
        module.init(&self.inner.events).await;
        self.inner.modules.lock().await.push(module);
    }

    /// Receives the outcome of every message processed from now on.
    pub fn subscribe_outcomes(&self) -> broadcast::Receiver<ProcessingOutcome> {
        self.inner.outcomes.subscribe()
    }

    /// Wraps a typed message in an envelope sourced from this endpoint.
    pub fn envelope<M: Message>(&self, message: &M) -> Result<TransportMessage> {
        TransportMessage::new(message, self.inner.config.endpoint.clone())
    }

    /// Processes one message to completion on the calling task.
    #[tracing::instrument(
        skip(self, message),
        fields(message_id = %message.id, message_type = %message.message_type)
    )]
    pub async fn process(&self, message: TransportMessage) -> Result<()> {
        let info = CurrentMessageInformation::from(&message);
        let result = MessageScope::run(info.clone(), self.process_in_scope(&info, &message)).await;

        match &result {
            Ok(()) => {
                metrics::counter!("bus_messages_processed_total").increment(1);
                tracing::debug!("message processed");
            }
            Err(e) => {
                metrics::counter!("bus_messages_failed_total").increment(1);
                tracing::warn!(error = %e, "message processing failed");
            }
        }

        // Nobody listening is fine
        let _ = self.inner.outcomes.send(ProcessingOutcome {
            message_id: message.id,
            message_type: message.message_type.clone(),
            error: result.as_ref().err().map(ToString::to_string),
        });

        result
    }

    async fn process_in_scope(
        &self,
        info: &CurrentMessageInformation,
        message: &TransportMessage,
    ) -> Result<()> {
        let events = &self.inner.events;
        events.notify_message_arrived(info).await;

        let result = match self.dispatch(message).await {
            Ok(()) => events.notify_before_commit(info).await,
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            if e.is_serialization() {
                events.notify_serialization_exception(info, e).await;
            } else {
                events.notify_processing_failed(info, e).await;
            }
        }
        events
            .notify_processing_completed(info, result.as_ref().err())
            .await;

        result
    }

    async fn dispatch(&self, message: &TransportMessage) -> Result<()> {
        let handlers = self
            .inner
            .handlers
            .read()
            .await
            .get(&message.message_type)
            .cloned()
            .unwrap_or_default();

        if handlers.is_empty() {
            return Err(BusError::NoHandler(message.message_type.clone()));
        }
        for handler in handlers {
            handler.handle(message).await?;
        }
        Ok(())
    }

    /// Starts `worker_count` worker tasks draining the send queue.
    ///
    /// Each worker processes one message at a time. Calling `start` on a
    /// running transport does nothing.
    pub async fn start(&self) {
        let mut queue = self.inner.queue.lock().await;
        if queue.is_some() {
            return;
        }

        let (tx, rx) = mpsc::channel(self.inner.config.queue_capacity);
        let rx = Arc::new(Mutex::new(rx));
        let mut workers = self.inner.workers.lock().await;
        for worker in 0..self.inner.config.worker_count {
            let transport = self.clone();
            let rx = Arc::clone(&rx);
            workers.push(tokio::spawn(async move {
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(message) = next else { break };
                    // Failures are reported through lifecycle events and outcomes
                    let _ = transport.process(message).await;
                }
                tracing::debug!(worker, "transport worker stopped");
            }));
        }
        *queue = Some(tx);
        tracing::info!(
            endpoint = %self.inner.config.endpoint,
            workers = self.inner.config.worker_count,
            "transport started"
        );
    }

    /// Queues a message for the workers.
    pub async fn send(&self, message: TransportMessage) -> Result<()> {
        let sender = self
            .inner
            .queue
            .lock()
            .await
            .clone()
            .ok_or(BusError::TransportStopped)?;
        sender
            .send(message)
            .await
            .map_err(|_| BusError::TransportStopped)
    }

    /// Closes the queue, waits for workers to drain it, then stops every module.
    pub async fn shutdown(&self) {
        self.inner.queue.lock().await.take();

        let workers: Vec<_> = self.inner.workers.lock().await.drain(..).collect();
        for result in futures_util::future::join_all(workers).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "transport worker panicked");
            }
        }

        let modules: Vec<_> = self.inner.modules.lock().await.drain(..).collect();
        for module in modules {
            module.stop(&self.inner.events).await;
        }
        tracing::info!(endpoint = %self.inner.config.endpoint, "transport stopped");
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}
