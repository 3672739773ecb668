//! Service lookup and per-event service scopes.

use crate::dispatcher::{BatchDispatcher, QueuedBatchDispatcher};
use rustc_hash::FxHashMap;
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// A type-keyed set of shared services.
///
/// Cloning is cheap; services are reference counted.
#[derive(Clone, Default)]
pub struct Services {
    entries: FxHashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Services {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a service, replacing any service of the same type.
    pub fn insert<T: Send + Sync + 'static>(&mut self, service: T) -> Option<Arc<T>> {
        self.insert_shared(Arc::new(service))
    }

    /// Registers an already shared service.
    pub fn insert_shared<T: Send + Sync + 'static>(&mut self, service: Arc<T>) -> Option<Arc<T>> {
        self.entries
            .insert(TypeId::of::<T>(), service)
            .and_then(|previous| previous.downcast().ok())
    }

    /// Looks up a service by type.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|service| Arc::clone(service).downcast().ok())
    }

    /// Borrows a service by type.
    pub fn get_ref<T: 'static>(&self) -> Option<&T> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|service| service.downcast_ref())
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Adds a service and returns self.
    #[must_use]
    pub fn with<T: Send + Sync + 'static>(mut self, service: T) -> Self {
        self.insert(service);
        self
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("service_count", &self.entries.len())
            .finish()
    }
}

/// Populates a fresh scope with scoped services.
pub type ScopeInitializer = Arc<dyn Fn(&mut Services) + Send + Sync>;

/// Root services plus the recipe for scoped ones.
#[derive(Clone, Default)]
pub struct ServiceProvider {
    root: Services,
    scoped: Vec<ScopeInitializer>,
}

impl ServiceProvider {
    pub fn new(root: Services) -> Self {
        Self {
            root,
            scoped: Vec::new(),
        }
    }

    /// Adds an initializer that runs for every new scope.
    #[must_use]
    pub fn with_scoped<F>(mut self, init: F) -> Self
    where
        F: Fn(&mut Services) + Send + Sync + 'static,
    {
        self.scoped.push(Arc::new(init));
        self
    }

    /// The root services.
    pub fn root(&self) -> &Services {
        &self.root
    }

    /// Creates a scope with its own scoped services and batch dispatcher.
    pub fn create_scope(&self) -> ServiceScope {
        let mut services = self.root.clone();
        for init in &self.scoped {
            init(&mut services);
        }
        ServiceScope {
            services,
            dispatcher: Arc::new(QueuedBatchDispatcher::new()),
        }
    }
}

impl fmt::Debug for ServiceProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProvider")
            .field("root", &self.root)
            .field("scoped_count", &self.scoped.len())
            .finish()
    }
}

/// Services for one unit of work, e.g. one subscription event.
#[derive(Debug, Clone)]
pub struct ServiceScope {
    services: Services,
    dispatcher: Arc<QueuedBatchDispatcher>,
}

impl ServiceScope {
    pub fn services(&self) -> &Services {
        &self.services
    }

    /// The batch dispatcher of this scope.
    pub fn dispatcher(&self) -> Arc<dyn BatchDispatcher> {
        self.dispatcher.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, PartialEq)]
    struct Config(&'static str);

    #[derive(Debug, PartialEq)]
    struct RequestCounter(usize);

    #[test]
    fn test_type_lookup() {
        let mut services = Services::new();
        assert!(services.insert(Config("a")).is_none());
        assert_eq!(services.get_ref::<Config>(), Some(&Config("a")));
        assert!(services.get::<RequestCounter>().is_none());

        let previous = services.insert(Config("b")).unwrap();
        assert_eq!(*previous, Config("a"));
        assert_eq!(*services.get::<Config>().unwrap(), Config("b"));
        assert_eq!(services.len(), 1);
    }

    #[test]
    fn test_scopes_are_fresh() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);
        let provider = ServiceProvider::new(Services::new().with(Config("root")))
            .with_scoped(move |services| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                services.insert(RequestCounter(n));
            });

        let first = provider.create_scope();
        let second = provider.create_scope();

        assert_eq!(first.services().get_ref::<RequestCounter>(), Some(&RequestCounter(0)));
        assert_eq!(second.services().get_ref::<RequestCounter>(), Some(&RequestCounter(1)));
        assert_eq!(first.services().get_ref::<Config>(), Some(&Config("root")));
        assert!(!provider.root().contains::<RequestCounter>());
        assert!(!Arc::ptr_eq(&first.dispatcher(), &second.dispatcher()));
    }
}
