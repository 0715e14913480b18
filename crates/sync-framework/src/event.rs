//! # Event Targets
//!
//! Every observable object in the framework (properties, models, collections,
//! stores, services) owns an [`EventTarget`] for its own event enum. Listeners
//! are plain closures; dispatch is synchronous and follows registration order.
//!
//! ## Re-entrancy
//!
//! `dispatch` snapshots the listener list before calling anything, so a
//! listener may subscribe, unsubscribe or call back into the object that is
//! dispatching. Owners of an `EventTarget` must release their own state lock
//! before dispatching; every type in this crate follows that rule.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Handle returned by [`EventTarget::listen`], used to unsubscribe.
pub type ListenerKey = u64;

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Listeners<E> {
    next_key: ListenerKey,
    entries: Vec<(ListenerKey, Listener<E>)>,
}

/// A shared, cloneable list of listeners for one event type.
///
/// Cloning an `EventTarget` yields another handle to the *same* listener list.
pub struct EventTarget<E> {
    listeners: Arc<Mutex<Listeners<E>>>,
}

impl<E> Clone for EventTarget<E> {
    fn clone(&self) -> Self {
        Self {
            listeners: Arc::clone(&self.listeners),
        }
    }
}

impl<E> Default for EventTarget<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for EventTarget<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventTarget")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl<E> EventTarget<E> {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(Listeners {
                next_key: 1,
                entries: Vec::new(),
            })),
        }
    }

    /// Registers a listener and returns the key needed to remove it.
    pub fn listen<F>(&self, listener: F) -> ListenerKey
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let mut listeners = lock(&self.listeners);
        let key = listeners.next_key;
        listeners.next_key += 1;
        listeners.entries.push((key, Arc::new(listener)));
        key
    }

    /// Removes a listener. Returns `false` if the key was unknown.
    pub fn unlisten(&self, key: ListenerKey) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.entries.len();
        listeners.entries.retain(|(k, _)| *k != key);
        listeners.entries.len() != before
    }

    /// Calls every listener registered at the time of the call, in order.
    pub fn dispatch(&self, event: &E) {
        let snapshot: Vec<Listener<E>> = lock(&self.listeners)
            .entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).entries.len()
    }

    /// Drops every listener.
    pub fn clear(&self) {
        lock(&self.listeners).entries.clear();
    }
}

/// Where a change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// The object itself was mutated by its caller.
    Direct,
    /// The owning model or collection overwrote the object during a bulk set.
    ParentPropagated,
}

/// Whether a mutator announces its change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Notify {
    #[default]
    Emit,
    Silent,
}

impl Notify {
    pub fn is_silent(self) -> bool {
        matches!(self, Notify::Silent)
    }
}

/// Whether removing a model from a collection also disposes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Disposal {
    #[default]
    Dispose,
    Bypass,
}

/// Anything whose callbacks must be suppressed once it is torn down.
pub trait Disposable: Send + Sync {
    fn is_disposed(&self) -> bool;
}

/// A standalone disposal token, typically owned by a view.
#[derive(Debug, Clone, Default)]
pub struct Lifetime {
    disposed: Arc<AtomicBool>,
}

impl Lifetime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }
}

impl Disposable for Lifetime {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

/// Locks a mutex, recovering the data if a listener panicked while holding it.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn dispatches_in_registration_order() {
        let target = EventTarget::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = seen.clone();
        target.listen(move |value| first.lock().unwrap().push(("first", *value)));
        let second = seen.clone();
        target.listen(move |value| second.lock().unwrap().push(("second", *value)));

        target.dispatch(&7);
        assert_eq!(*seen.lock().unwrap(), vec![("first", 7), ("second", 7)]);
    }

    #[test]
    fn unlisten_stops_delivery() {
        let target = EventTarget::<()>::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let key = target.listen(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        target.dispatch(&());
        assert!(target.unlisten(key));
        assert!(!target.unlisten(key));
        target.dispatch(&());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_may_subscribe_during_dispatch() {
        let target = EventTarget::<()>::new();
        let inner = target.clone();
        target.listen(move |_| {
            inner.listen(|_| {});
        });

        target.dispatch(&());
        assert_eq!(target.listener_count(), 2);
    }

    #[test]
    fn lifetime_reports_disposal() {
        let lifetime = Lifetime::new();
        let view = lifetime.clone();
        assert!(!view.is_disposed());
        lifetime.dispose();
        assert!(view.is_disposed());
    }
}
