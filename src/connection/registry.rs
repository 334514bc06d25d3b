//! Observer registry for realtime lifecycle and message handlers

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use tracing::error;

struct RegistryInner<H: ?Sized> {
    next_id: u64,
    handlers: BTreeMap<u64, Arc<H>>,
}

trait Unregister: Send + Sync {
    fn unregister(&self, id: u64) -> bool;
}

impl<H: ?Sized + Send + Sync> Unregister for Mutex<RegistryInner<H>> {
    fn unregister(&self, id: u64) -> bool {
        self.lock().handlers.remove(&id).is_some()
    }
}

/// Capability returned by a registration; removes the handler when asked
#[derive(Clone)]
pub struct Subscription {
    id: u64,
    registry: Weak<dyn Unregister>,
}

impl Subscription {
    /// Remove the handler. Returns `false` if it was already removed.
    ///
    /// A dispatch that already started still reaches the handler.
    pub fn unsubscribe(&self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.unregister(self.id),
            None => false,
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Handlers keyed by registration id, dispatched in registration order
pub struct HandlerRegistry<H: ?Sized> {
    name: &'static str,
    inner: Arc<Mutex<RegistryInner<H>>>,
}

impl<H: ?Sized + Send + Sync + 'static> HandlerRegistry<H> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Arc::new(Mutex::new(RegistryInner {
                next_id: 0,
                handlers: BTreeMap::new(),
            })),
        }
    }

    pub fn register(&self, handler: Arc<H>) -> Subscription {
        let id = {
            let mut inner = self.inner.lock();
            inner.next_id += 1;
            let id = inner.next_id;
            inner.handlers.insert(id, handler);
            id
        };

        let registry: Weak<dyn Unregister> = Arc::downgrade(&self.inner) as Weak<dyn Unregister>;
        Subscription { id, registry }
    }

    /// Stable copy of the current handlers
    pub fn snapshot(&self) -> Vec<Arc<H>> {
        self.inner.lock().handlers.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every handler registered when the dispatch starts.
    ///
    /// The lock is not held while handlers run, so handlers may register or
    /// unregister freely. A panicking handler is logged and skipped.
    /// Returns the number of handlers that completed normally.
    pub fn dispatch(&self, invoke: impl Fn(&H)) -> usize {
        let mut delivered = 0;

        for handler in self.snapshot() {
            match catch_unwind(AssertUnwindSafe(|| invoke(handler.as_ref()))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    let detail = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "non-string panic".into());
                    error!("{} handler panicked: {}", self.name, detail);
                }
            }
        }

        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Handler = dyn Fn(u32) + Send + Sync;

    #[test]
    fn test_dispatch_in_registration_order() {
        let registry: HandlerRegistry<Handler> = HandlerRegistry::new("test");
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let seen = seen.clone();
            registry.register(Arc::new(move |n: u32| seen.lock().push(format!("{tag}{n}"))));
        }

        assert_eq!(registry.dispatch(|h| h(1)), 3);
        assert_eq!(*seen.lock(), vec!["a1", "b1", "c1"]);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let registry: HandlerRegistry<Handler> = HandlerRegistry::new("test");
        let sub = registry.register(Arc::new(|_: u32| {}));

        assert_eq!(registry.len(), 1);
        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_panicking_handler_does_not_stop_others() {
        let registry: HandlerRegistry<Handler> = HandlerRegistry::new("test");
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        registry.register(Arc::new(move |_: u32| {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        registry.register(Arc::new(|_: u32| panic!("faulty handler")));
        let c = count.clone();
        registry.register(Arc::new(move |_: u32| {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(registry.dispatch(|h| h(0)), 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_register_during_dispatch_applies_to_next_dispatch() {
        let registry: Arc<HandlerRegistry<Handler>> = Arc::new(HandlerRegistry::new("test"));
        let count = Arc::new(AtomicUsize::new(0));

        let reg = registry.clone();
        let c = count.clone();
        registry.register(Arc::new(move |_: u32| {
            let c = c.clone();
            reg.register(Arc::new(move |_: u32| {
                c.fetch_add(1, Ordering::SeqCst);
            }));
        }));

        registry.dispatch(|h| h(0));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(registry.len(), 2);

        registry.dispatch(|h| h(0));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscription_outliving_registry() {
        let registry: HandlerRegistry<Handler> = HandlerRegistry::new("test");
        let sub = registry.register(Arc::new(|_: u32| {}));
        drop(registry);
        assert!(!sub.unsubscribe());
    }
}
