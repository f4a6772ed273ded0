//! Service container with lifetime management
//!
//! A minimal string-keyed service registry supporting singleton and
//! factory lifetimes, alias indirection and circular dependency
//! detection. The loader owns the only instance; runtime callers
//! resolve shared services through it.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;

/// Container errors
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("Service not found: {0}")]
    NotFound(String),

    #[error("Service already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Circular dependency detected: {}", chain.join(" -> "))]
    CircularDependency {
        /// Key whose resolution closed the cycle.
        key: String,
        /// Full resolution chain including the repeated key.
        chain: Vec<String>,
    },

    #[error("Factory for `{key}` failed: {reason}")]
    FactoryFailed {
        /// Key whose factory returned an error.
        key: String,
        /// Description of the underlying failure.
        reason: String,
    },
}

/// Result type for container operations
pub type ContainerResult<T> = Result<T, ContainerError>;

/// A resolved service instance, shared between all holders.
pub type ServiceInstance = Arc<dyn Any + Send + Sync>;

/// Producer closure for a service. Receives the container so it can
/// resolve its own dependencies.
pub type ServiceFactory =
    Box<dyn Fn(&Container) -> ContainerResult<ServiceInstance> + Send + Sync>;

/// Service lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
    /// Factory runs at most once; the result is cached and shared.
    Singleton,
    /// Factory runs on every resolve.
    Factory,
}

/// A registered service: its lifetime, its factory, and (for
/// singletons) the set-once instance cell.
struct ServiceCell {
    lifetime: Lifetime,
    factory: ServiceFactory,
    instance: OnceCell<ServiceInstance>,
}

/// String-keyed service container.
///
/// Registration happens during boot only; resolution is safe for
/// concurrent callers. The first caller to resolve a given singleton
/// serializes all others until its factory returns.
///
/// ```
/// use qumos::core::container::Container;
/// use std::sync::Arc;
///
/// let container = Container::new();
/// container
///     .register_singleton("greeting", |_| Ok(Arc::new(String::from("hello"))))
///     .unwrap();
/// let greeting: Arc<String> = container.resolve("greeting").unwrap();
/// assert_eq!(&*greeting, "hello");
/// ```
pub struct Container {
    services: RwLock<HashMap<String, Arc<ServiceCell>>>,
    // Keys currently mid-resolution, tracked per thread so that
    // concurrent resolution of independent singletons cannot be
    // mistaken for a cycle.
    resolving: Mutex<HashMap<ThreadId, Vec<String>>>,
}

impl Container {
    /// Create an empty container.
    pub fn new() -> Self {
        log::debug!("Container initialized");
        Self {
            services: RwLock::new(HashMap::new()),
            resolving: Mutex::new(HashMap::new()),
        }
    }

    /// Register a singleton service.
    ///
    /// The factory runs once on first resolve; the same instance is
    /// returned for every subsequent resolve.
    pub fn register_singleton<F>(&self, key: impl Into<String>, factory: F) -> ContainerResult<()>
    where
        F: Fn(&Container) -> ContainerResult<ServiceInstance> + Send + Sync + 'static,
    {
        self.register(key.into(), Box::new(factory), Lifetime::Singleton)
    }

    /// Register a factory service.
    ///
    /// The factory runs on every resolve, producing a fresh instance
    /// each time.
    pub fn register_factory<F>(&self, key: impl Into<String>, factory: F) -> ContainerResult<()>
    where
        F: Fn(&Container) -> ContainerResult<ServiceInstance> + Send + Sync + 'static,
    {
        self.register(key.into(), Box::new(factory), Lifetime::Factory)
    }

    /// Register an alias for an existing service.
    ///
    /// Resolving the alias yields the same instance as resolving the
    /// target key.
    pub fn register_alias(
        &self,
        alias: impl Into<String>,
        target: impl Into<String>,
    ) -> ContainerResult<()> {
        let alias = alias.into();
        let target = target.into();

        {
            let services = self.services.read();
            if services.contains_key(&alias) {
                return Err(ContainerError::AlreadyRegistered(alias));
            }
            if !services.contains_key(&target) {
                return Err(ContainerError::NotFound(target));
            }
        }

        log::debug!("Registered alias: {} -> {}", alias, target);
        let delegate = target.clone();
        self.register(
            alias,
            Box::new(move |container| container.resolve_any(&delegate)),
            Lifetime::Singleton,
        )
    }

    fn register(
        &self,
        key: String,
        factory: ServiceFactory,
        lifetime: Lifetime,
    ) -> ContainerResult<()> {
        let mut services = self.services.write();
        if services.contains_key(&key) {
            return Err(ContainerError::AlreadyRegistered(key));
        }

        log::debug!("Registered {:?}: {}", lifetime, key);
        services.insert(
            key,
            Arc::new(ServiceCell {
                lifetime,
                factory,
                instance: OnceCell::new(),
            }),
        );
        Ok(())
    }

    /// Resolve a service and downcast it to its concrete type.
    ///
    /// A failed downcast means producer and consumer disagree about the
    /// type behind the key, which is a programming error; it panics
    /// rather than surfacing as a runtime failure.
    pub fn resolve<T: Any + Send + Sync>(&self, key: &str) -> ContainerResult<Arc<T>> {
        let instance = self.resolve_any(key)?;
        match instance.downcast::<T>() {
            Ok(typed) => Ok(typed),
            Err(_) => panic!(
                "service `{}` resolved to an unexpected type (expected {})",
                key,
                std::any::type_name::<T>()
            ),
        }
    }

    /// Resolve a service as an untyped shared instance.
    pub fn resolve_any(&self, key: &str) -> ContainerResult<ServiceInstance> {
        let cell = self
            .services
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| ContainerError::NotFound(key.to_string()))?;

        // Fast path: cached singleton.
        if cell.lifetime == Lifetime::Singleton {
            if let Some(instance) = cell.instance.get() {
                return Ok(instance.clone());
            }
        }

        let _guard = self.enter(key)?;

        let resolved = match cell.lifetime {
            Lifetime::Singleton => cell
                .instance
                .get_or_try_init(|| (cell.factory)(self))
                .map(Clone::clone)?,
            Lifetime::Factory => (cell.factory)(self)?,
        };

        log::debug!("Resolved: {}", key);
        Ok(resolved)
    }

    /// Try to resolve a service, returning `None` when the key is
    /// unknown. All other failures propagate.
    pub fn try_resolve<T: Any + Send + Sync>(&self, key: &str) -> ContainerResult<Option<Arc<T>>> {
        match self.resolve::<T>(key) {
            Ok(instance) => Ok(Some(instance)),
            Err(ContainerError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Check whether a key is registered.
    pub fn is_registered(&self, key: &str) -> bool {
        self.services.read().contains_key(key)
    }

    /// All registered service keys.
    pub fn list_keys(&self) -> Vec<String> {
        self.services.read().keys().cloned().collect()
    }

    /// Drop every registered service and all in-flight state.
    pub fn clear(&self) {
        self.services.write().clear();
        self.resolving.lock().clear();
        log::debug!("Container cleared");
    }

    /// Mark `key` as mid-resolution on the current thread, failing when
    /// it is already on the chain.
    fn enter(&self, key: &str) -> ContainerResult<ResolveGuard<'_>> {
        let thread = thread::current().id();
        let mut resolving = self.resolving.lock();
        let chain = resolving.entry(thread).or_default();

        if chain.iter().any(|k| k == key) {
            let mut full_chain = chain.clone();
            full_chain.push(key.to_string());
            return Err(ContainerError::CircularDependency {
                key: key.to_string(),
                chain: full_chain,
            });
        }

        chain.push(key.to_string());
        Ok(ResolveGuard {
            container: self,
            thread,
        })
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

/// Pops the current key from the thread's resolution chain on exit,
/// including the error paths out of a factory.
struct ResolveGuard<'a> {
    container: &'a Container,
    thread: ThreadId,
}

impl Drop for ResolveGuard<'_> {
    fn drop(&mut self) {
        let mut resolving = self.container.resolving.lock();
        if let Some(chain) = resolving.get_mut(&self.thread) {
            chain.pop();
            if chain.is_empty() {
                resolving.remove(&self.thread);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Probe {
        value: usize,
    }

    #[test]
    fn test_singleton_returns_same_instance() {
        let container = Container::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let factory_calls = calls.clone();
        container
            .register_singleton("probe", move |_| {
                factory_calls.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(Probe { value: 42 }))
            })
            .unwrap();

        let first: Arc<Probe> = container.resolve("probe").unwrap();
        let second: Arc<Probe> = container.resolve("probe").unwrap();

        assert_eq!(first.value, 42);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_factory_returns_fresh_instances() {
        let container = Container::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let factory_counter = counter.clone();
        container
            .register_factory("probe", move |_| {
                let value = factory_counter.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(Probe { value }))
            })
            .unwrap();

        let first: Arc<Probe> = container.resolve("probe").unwrap();
        let second: Arc<Probe> = container.resolve("probe").unwrap();

        assert_eq!(first.value, 0);
        assert_eq!(second.value, 1);
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let container = Container::new();
        container
            .register_singleton("dup", |_| Ok(Arc::new(1_u32)))
            .unwrap();

        let err = container
            .register_factory("dup", |_| Ok(Arc::new(2_u32)))
            .unwrap_err();
        assert!(matches!(err, ContainerError::AlreadyRegistered(key) if key == "dup"));
    }

    #[test]
    fn test_resolve_unknown_key() {
        let container = Container::new();
        let err = container.resolve::<Probe>("missing").unwrap_err();
        assert!(matches!(err, ContainerError::NotFound(key) if key == "missing"));
    }

    #[test]
    fn test_try_resolve_absent_and_present() {
        let container = Container::new();
        assert!(container.try_resolve::<Probe>("missing").unwrap().is_none());

        container
            .register_singleton("probe", |_| Ok(Arc::new(Probe { value: 7 })))
            .unwrap();
        let probe = container.try_resolve::<Probe>("probe").unwrap().unwrap();
        assert_eq!(probe.value, 7);
    }

    #[test]
    fn test_alias_resolves_to_target_instance() {
        let container = Container::new();
        container
            .register_singleton("target", |_| Ok(Arc::new(Probe { value: 9 })))
            .unwrap();
        container.register_alias("alias", "target").unwrap();

        let direct: Arc<Probe> = container.resolve("target").unwrap();
        let aliased: Arc<Probe> = container.resolve("alias").unwrap();
        assert!(Arc::ptr_eq(&direct, &aliased));
    }

    #[test]
    fn test_alias_requires_existing_target() {
        let container = Container::new();
        let err = container.register_alias("alias", "missing").unwrap_err();
        assert!(matches!(err, ContainerError::NotFound(key) if key == "missing"));
    }

    #[test]
    fn test_circular_dependency_detected() {
        let container = Container::new();
        container
            .register_singleton("a", |c| {
                let _b: Arc<Probe> = c.resolve("b")?;
                Ok(Arc::new(Probe { value: 1 }))
            })
            .unwrap();
        container
            .register_singleton("b", |c| {
                let _a: Arc<Probe> = c.resolve("a")?;
                Ok(Arc::new(Probe { value: 2 }))
            })
            .unwrap();

        let err = container.resolve::<Probe>("a").unwrap_err();
        match err {
            ContainerError::CircularDependency { key, chain } => {
                assert_eq!(key, "a");
                assert_eq!(chain, vec!["a", "b", "a"]);
            }
            other => panic!("expected CircularDependency, got {other:?}"),
        }
    }

    #[test]
    fn test_failed_singleton_factory_retries() {
        let container = Container::new();
        let attempts = Arc::new(AtomicUsize::new(0));

        let factory_attempts = attempts.clone();
        container
            .register_singleton("flaky", move |_| {
                if factory_attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ContainerError::FactoryFailed {
                        key: "flaky".to_string(),
                        reason: "first attempt".to_string(),
                    })
                } else {
                    Ok(Arc::new(Probe { value: 3 }))
                }
            })
            .unwrap();

        assert!(container.resolve::<Probe>("flaky").is_err());
        let probe: Arc<Probe> = container.resolve("flaky").unwrap();
        assert_eq!(probe.value, 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_nested_resolution_is_not_a_cycle() {
        let container = Container::new();
        container
            .register_singleton("inner", |_| Ok(Arc::new(Probe { value: 10 })))
            .unwrap();
        container
            .register_singleton("outer", |c| {
                let inner: Arc<Probe> = c.resolve("inner")?;
                Ok(Arc::new(Probe {
                    value: inner.value + 1,
                }))
            })
            .unwrap();

        let outer: Arc<Probe> = container.resolve("outer").unwrap();
        assert_eq!(outer.value, 11);
    }

    #[test]
    fn test_clear_forgets_everything() {
        let container = Container::new();
        container
            .register_singleton("probe", |_| Ok(Arc::new(Probe { value: 1 })))
            .unwrap();
        assert!(container.is_registered("probe"));

        container.clear();
        assert!(!container.is_registered("probe"));
        assert!(container.list_keys().is_empty());
    }

    #[test]
    fn test_concurrent_singleton_resolution() {
        let container = Arc::new(Container::new());
        container
            .register_singleton("shared", |_| {
                std::thread::sleep(std::time::Duration::from_millis(20));
                Ok(Arc::new(Probe { value: 99 }))
            })
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let container = container.clone();
            handles.push(std::thread::spawn(move || {
                let probe: Arc<Probe> = container.resolve("shared").unwrap();
                Arc::as_ptr(&probe) as usize
            }));
        }

        let pointers: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(pointers.windows(2).all(|w| w[0] == w[1]));
    }
}
