//! Task-local storage bound to the processing of one message.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::CurrentMessageInformation;

tokio::task_local! {
    static CURRENT: MessageScope;
}

/// Key of a slot in a [`MessageScope`].
///
/// Each component that stores per-message state allocates its own key, so
/// two instances of the same component never share a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeKey(u64);

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

impl ScopeKey {
    pub fn new() -> Self {
        Self(NEXT_KEY.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ScopeKey {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-message storage that exists only while one message is processed.
///
/// The transport runs the whole processing of a message, lifecycle
/// notifications included, inside [`MessageScope::run`]. Code on that task
/// reaches the scope through [`MessageScope::with_current`]; code outside
/// any message sees nothing. Everything stored in the scope is dropped when
/// `run` returns, on success, error and panic alike.
pub struct MessageScope {
    info: CurrentMessageInformation,
    slots: Mutex<HashMap<ScopeKey, Box<dyn Any + Send>>>,
}

impl MessageScope {
    fn new(info: CurrentMessageInformation) -> Self {
        Self {
            info,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Runs a future with a fresh scope for the given message.
    pub async fn run<F: Future>(info: CurrentMessageInformation, future: F) -> F::Output {
        CURRENT.scope(MessageScope::new(info), future).await
    }

    /// Calls `f` with the current scope, or returns None outside any message.
    pub fn with_current<R>(f: impl FnOnce(&MessageScope) -> R) -> Option<R> {
        CURRENT.try_with(f).ok()
    }

    /// Returns the information of the message being processed, if any.
    pub fn current_info() -> Option<CurrentMessageInformation> {
        Self::with_current(|scope| scope.info.clone())
    }

    pub fn info(&self) -> &CurrentMessageInformation {
        &self.info
    }

    /// Gives `f` mutable access to a slot, creating it with `Default` first.
    ///
    /// A slot whose stored type differs from `T` is replaced.
    pub fn with_slot<T, R>(&self, key: ScopeKey, f: impl FnOnce(&mut T) -> R) -> R
    where
        T: Default + Send + 'static,
    {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = slots
            .entry(key)
            .or_insert_with(|| Box::new(T::default()));
        if !slot.is::<T>() {
            *slot = Box::new(T::default());
        }
        match slot.downcast_mut::<T>() {
            Some(value) => f(value),
            None => unreachable!("slot was just reset to the requested type"),
        }
    }

    /// Removes a slot, returning its value if it held a `T`.
    pub fn take_slot<T: Send + 'static>(&self, key: ScopeKey) -> Option<T> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .remove(&key)
            .and_then(|slot| slot.downcast::<T>().ok())
            .map(|value| *value)
    }
}
