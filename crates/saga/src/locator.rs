//! Resolution of fresh saga instances.

use std::any::{Any, TypeId};
use std::collections::HashMap;

/// Produces new instances of components on request.
pub trait ServiceLocator: Send + Sync {
    fn resolve<T: Default + Send + 'static>(&self) -> T;
}

/// Resolves every type through its `Default` implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultServiceLocator;

impl ServiceLocator for DefaultServiceLocator {
    fn resolve<T: Default + Send + 'static>(&self) -> T {
        T::default()
    }
}

type Factory = Box<dyn Fn() -> Box<dyn Any + Send> + Send + Sync>;

/// Resolves registered types through their factories and everything else
/// through `Default`.
#[derive(Default)]
pub struct ServiceRegistry {
    factories: HashMap<TypeId, Factory>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the factory used to build `T`, replacing any earlier one.
    pub fn register<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: Send + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.factories.insert(
            TypeId::of::<T>(),
            Box::new(move || Box::new(factory()) as Box<dyn Any + Send>),
        );
        self
    }

    pub fn is_registered<T: 'static>(&self) -> bool {
        self.factories.contains_key(&TypeId::of::<T>())
    }
}

impl ServiceLocator for ServiceRegistry {
    fn resolve<T: Default + Send + 'static>(&self) -> T {
        self.factories
            .get(&TypeId::of::<T>())
            .and_then(|factory| factory().downcast::<T>().ok())
            .map(|instance| *instance)
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("registered", &self.factories.len())
            .finish()
    }
}
