use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

pub type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

type Handlers<E> = Mutex<Vec<(u64, Handler<E>)>>;

/// Fan-out of events to subscribed handlers.
///
/// Handlers run on whichever task calls [`EventBus::emit`]; nothing here
/// assumes a particular thread or tick.
pub struct EventBus<E> {
    handlers: Arc<Handlers<E>>,
    next_id: AtomicU64,
}

impl<E: 'static> EventBus<E> {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self, handler: Handler<E>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.handlers).push((id, handler));
        let weak: Weak<Handlers<E>> = Arc::downgrade(&self.handlers);
        Subscription::new(move || {
            if let Some(handlers) = weak.upgrade() {
                lock(&handlers).retain(|(h, _)| *h != id);
            }
        })
    }

    pub fn emit(&self, event: &E) {
        // Snapshot so handlers may subscribe or unsubscribe while being called.
        let snapshot: Vec<Handler<E>> = lock(&self.handlers)
            .iter()
            .map(|(_, h)| h.clone())
            .collect();
        for handler in snapshot {
            handler(event);
        }
    }
}

impl<E: 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Lock `m`, recovering the guard if a handler panicked while holding it.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle returned by `subscribe`; the handler is removed when this is
/// dropped or [`Subscription::unsubscribe`] is called.
#[must_use = "dropping a Subscription unsubscribes the handler"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn delivers_to_every_subscriber() {
        let bus: EventBus<u32> = EventBus::new();
        let total = Arc::new(AtomicUsize::new(0));
        let t1 = total.clone();
        let t2 = total.clone();
        let _a = bus.subscribe(Arc::new(move |v: &u32| {
            t1.fetch_add(*v as usize, Ordering::SeqCst);
        }));
        let _b = bus.subscribe(Arc::new(move |v: &u32| {
            t2.fetch_add(*v as usize, Ordering::SeqCst);
        }));
        bus.emit(&5);
        assert_eq!(total.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn unsubscribe_and_drop_remove_handlers() {
        let bus: EventBus<()> = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let sub = bus.subscribe(Arc::new(move |_: &()| {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        let other = bus.subscribe(Arc::new(|_: &()| {}));
        assert_eq!(lock(&bus.handlers).len(), 2);
        bus.emit(&());
        sub.unsubscribe();
        drop(other);
        bus.emit(&());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(lock(&bus.handlers).is_empty());
    }

    #[test]
    fn lock_recovers_from_poisoned_mutex() {
        let shared = Arc::new(Mutex::new(1u32));
        let poisoner = shared.clone();
        let joined = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("handler panicked while holding the lock");
        })
        .join();
        assert!(joined.is_err());
        assert!(shared.is_poisoned());
        *lock(&shared) += 1;
        assert_eq!(*lock(&shared), 2);
    }

    #[test]
    fn subscription_outliving_bus_is_harmless() {
        let bus: EventBus<()> = EventBus::new();
        let sub = bus.subscribe(Arc::new(|_: &()| {}));
        drop(bus);
        sub.unsubscribe();
    }
}
