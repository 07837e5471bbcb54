//! Change notification for places and transitions.
//!
//! Observers are registered against a subject and receive every change signal
//! until they unsubscribe or the subject is disposed. Registration returns a
//! [`Subscription`]; dropping it (or calling [`Subscription::unsubscribe`])
//! removes the observer exactly once.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Receives change signals from a place or transition.
pub trait Observer<E>: Send + Sync {
    /// Called on every meaningful state change of the subject.
    fn on_next(&self, event: &E);

    /// Called once when the subject is disposed.
    fn on_completed(&self) {}
}

impl<E, F> Observer<E> for F
where
    F: Fn(&E) + Send + Sync,
{
    fn on_next(&self, event: &E) {
        self(event)
    }
}

/// Set of observers attached to one subject.
pub(crate) struct ObserverSet<E> {
    registry: Arc<Registry<E>>,
}

struct Registry<E> {
    next_id: AtomicU64,
    observers: DashMap<u64, Arc<dyn Observer<E>>>,
}

trait Detach: Send + Sync {
    fn detach(&self, id: u64) -> bool;
}

impl<E: 'static> Detach for Registry<E> {
    fn detach(&self, id: u64) -> bool {
        self.observers.remove(&id).is_some()
    }
}

impl<E: 'static> ObserverSet<E> {
    pub(crate) fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                next_id: AtomicU64::new(1),
                observers: DashMap::new(),
            }),
        }
    }

    /// Registers an observer.
    pub(crate) fn subscribe(&self, observer: Arc<dyn Observer<E>>) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.observers.insert(id, observer);

        let registry: Weak<dyn Detach> = Arc::downgrade(&self.registry) as Weak<dyn Detach>;
        Subscription {
            registry,
            id,
            active: true,
        }
    }

    /// Delivers an event to every registered observer.
    ///
    /// Observers are collected before delivery so callbacks may subscribe or
    /// unsubscribe without deadlocking.
    pub(crate) fn notify(&self, event: &E) {
        if self.registry.observers.is_empty() {
            return;
        }
        for observer in self.snapshot() {
            observer.on_next(event);
        }
    }

    /// Sends the terminal signal and releases every observer.
    pub(crate) fn complete(&self) {
        let observers = self.snapshot();
        self.registry.observers.clear();
        for observer in observers {
            observer.on_completed();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.registry.observers.len()
    }

    fn snapshot(&self) -> Vec<Arc<dyn Observer<E>>> {
        self.registry
            .observers
            .iter()
            .map(|r| r.value().clone())
            .collect()
    }
}

/// Handle returned by `subscribe`.
#[must_use = "dropping a Subscription unsubscribes its observer"]
pub struct Subscription {
    registry: Weak<dyn Detach>,
    id: u64,
    active: bool,
}

impl Subscription {
    /// Returns the subscription id, unique per subject.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Removes the observer.
    ///
    /// Returns true if the observer was still registered.
    pub fn unsubscribe(mut self) -> bool {
        self.detach()
    }

    fn detach(&mut self) -> bool {
        if !self.active {
            return false;
        }
        self.active = false;
        self.registry
            .upgrade()
            .map(|registry| registry.detach(self.id))
            .unwrap_or(false)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<u32>>,
        completed: AtomicUsize,
    }

    impl Observer<u32> for Recorder {
        fn on_next(&self, event: &u32) {
            self.events.lock().push(*event);
        }

        fn on_completed(&self) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_notify_subscribers() {
        let set = ObserverSet::<u32>::new();
        let recorder = Arc::new(Recorder::default());
        let _sub = set.subscribe(recorder.clone());

        set.notify(&1);
        set.notify(&2);

        assert_eq!(*recorder.events.lock(), vec![1, 2]);
    }

    #[test]
    fn test_unsubscribe_once() {
        let set = ObserverSet::<u32>::new();
        let recorder = Arc::new(Recorder::default());
        let sub = set.subscribe(recorder.clone());
        assert_eq!(set.len(), 1);

        assert!(sub.unsubscribe());
        assert_eq!(set.len(), 0);

        set.notify(&3);
        assert!(recorder.events.lock().is_empty());
    }

    #[test]
    fn test_drop_unsubscribes() {
        let set = ObserverSet::<u32>::new();
        let recorder = Arc::new(Recorder::default());
        {
            let _sub = set.subscribe(recorder.clone());
            assert_eq!(set.len(), 1);
        }
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn test_complete_releases_observers() {
        let set = ObserverSet::<u32>::new();
        let recorder = Arc::new(Recorder::default());
        let sub = set.subscribe(recorder.clone());

        set.complete();
        assert_eq!(recorder.completed.load(Ordering::SeqCst), 1);
        assert_eq!(set.len(), 0);

        // Already released by completion
        assert!(!sub.unsubscribe());
    }

    #[test]
    fn test_closure_observer() {
        let set = ObserverSet::<u32>::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let _sub = set.subscribe(Arc::new(move |event: &u32| {
            counter.fetch_add(*event as usize, Ordering::SeqCst);
        }));

        set.notify(&5);
        set.notify(&6);
        assert_eq!(seen.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn test_reentrant_unsubscribe() {
        let set = Arc::new(ObserverSet::<u32>::new());
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicUsize::new(0));

        let inner_slot = slot.clone();
        let inner_calls = calls.clone();
        let sub = set.subscribe(Arc::new(move |_: &u32| {
            inner_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(sub) = inner_slot.lock().take() {
                sub.unsubscribe();
            }
        }));
        *slot.lock() = Some(sub);

        set.notify(&1);
        set.notify(&2);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn test_subscription_outlives_subject() {
        let set = ObserverSet::<u32>::new();
        let sub = set.subscribe(Arc::new(|_: &u32| {}));
        drop(set);
        assert!(!sub.unsubscribe());
    }
}
