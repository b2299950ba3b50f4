//! Subscriber registry with isolated dispatch

use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: u64,
    handlers: Vec<(u64, Handler<T>)>,
}

/// A set of callbacks that all receive every dispatched value
pub struct Subscribers<T> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T: 'static> Subscribers<T> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                handlers: Vec::new(),
            })),
        }
    }

    /// Register a handler. It stays registered until the returned
    /// [`Subscription`] is used to unsubscribe.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = {
            let mut registry = self.registry.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.handlers.push((id, Arc::new(handler)));
            id
        };

        let registry: Weak<Mutex<Registry<T>>> = Arc::downgrade(&self.registry);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(registry) = registry.upgrade() {
                    registry.lock().handlers.retain(|(hid, _)| *hid != id);
                }
            })),
        }
    }

    /// Call every registered handler with `value`.
    ///
    /// Handlers run on a snapshot taken before the first call, so handlers
    /// may subscribe or unsubscribe freely. A panicking handler is logged and
    /// skipped; the rest still run.
    pub fn dispatch(&self, value: &T) {
        let snapshot: Vec<Handler<T>> = self
            .registry
            .lock()
            .handlers
            .iter()
            .map(|(_, h)| h.clone())
            .collect();

        for handler in snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(value))).is_err() {
                tracing::error!("Subscriber panicked; continuing delivery to remaining subscribers");
            }
        }
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.registry.lock().handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: 'static> Default for Subscribers<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Capability to remove one registered handler
///
/// Dropping a `Subscription` leaves the handler registered for as long as
/// the hub lives. A handler must not own the thing that owns its hub, or
/// neither is ever freed; capture a weak handle instead (see
/// [`ConnectionManager::downgrade`](crate::network::ConnectionManager::downgrade)).
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_dispatch_reaches_all_handlers() {
        let subs = Subscribers::<u32>::new();
        let total = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let total = total.clone();
            let _ = subs.subscribe(move |v| {
                total.fetch_add(*v as usize, Ordering::SeqCst);
            });
        }

        subs.dispatch(&2);
        assert_eq!(total.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_unsubscribe_removes_only_that_handler() {
        let subs = Subscribers::<u32>::new();
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));

        let a2 = a.clone();
        let sub_a = subs.subscribe(move |_| {
            a2.fetch_add(1, Ordering::SeqCst);
        });
        let b2 = b.clone();
        let _sub_b = subs.subscribe(move |_| {
            b2.fetch_add(1, Ordering::SeqCst);
        });

        subs.dispatch(&0);
        sub_a.unsubscribe();
        subs.dispatch(&0);

        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 2);
        assert_eq!(subs.len(), 1);
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let subs = Subscribers::<u32>::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let _ = subs.subscribe(|_| panic!("bad subscriber"));
        let seen2 = seen.clone();
        let _ = subs.subscribe(move |_| {
            seen2.fetch_add(1, Ordering::SeqCst);
        });

        subs.dispatch(&1);
        subs.dispatch(&1);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_handler_may_subscribe_during_dispatch() {
        let subs = Arc::new(Subscribers::<u32>::new());
        let inner = subs.clone();
        let _ = subs.subscribe(move |_| {
            let _ = inner.subscribe(|_| {});
        });

        subs.dispatch(&0);
        assert_eq!(subs.len(), 2);
    }
}
