//! Observer registry
//!
//! Copy-on-write listener lists shared by the key map, the message registry
//! and the vehicle state tracker.
//!
//! Fan-out runs synchronously on the thread that triggers it and visits
//! listeners in registration order. Subscribing or unsubscribing while a
//! notification is in flight is safe: the notifier walks a snapshot, so the
//! change takes effect from the next notification on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Handle returned by [`ObserverList::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

// Unique across all lists so one ID type can address any of them
static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// An ordered list of listeners for events of type `T`
pub struct ObserverList<T> {
    listeners: RwLock<Arc<Vec<(SubscriptionId, Callback<T>)>>>,
}

impl<T> ObserverList<T> {
    /// Create an empty list
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Register a listener. It is called after every listener registered before it.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = SubscriptionId(NEXT_ID.fetch_add(1, Ordering::Relaxed));
        let mut guard = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push((id, Arc::new(listener) as Callback<T>));
        *guard = Arc::new(next);
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut guard = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        if !guard.iter().any(|(sid, _)| *sid == id) {
            return false;
        }
        let next: Vec<_> = guard.iter().filter(|(sid, _)| *sid != id).cloned().collect();
        *guard = Arc::new(next);
        true
    }

    /// Call every listener with `event`, in registration order
    pub fn notify(&self, event: &T) {
        let snapshot = Arc::clone(&self.listeners.read().unwrap_or_else(PoisonError::into_inner));
        for (_, listener) in snapshot.iter() {
            listener(event);
        }
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.listeners.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Check if no listener is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for ObserverList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for ObserverList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverList")
            .field("listeners", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_notify_in_registration_order() {
        let list = ObserverList::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let seen = Arc::clone(&seen);
            list.subscribe(move |v: &u32| seen.lock().unwrap().push(format!("{tag}{v}")));
        }

        list.notify(&7);
        assert_eq!(*seen.lock().unwrap(), vec!["a7", "b7", "c7"]);
    }

    #[test]
    fn test_unsubscribe() {
        let list = ObserverList::<u32>::new();
        let hits = Arc::new(Mutex::new(0));

        let h = Arc::clone(&hits);
        let id = list.subscribe(move |_| *h.lock().unwrap() += 1);
        assert_eq!(list.len(), 1);

        assert!(list.unsubscribe(id));
        assert!(!list.unsubscribe(id));
        assert!(list.is_empty());

        list.notify(&1);
        assert_eq!(*hits.lock().unwrap(), 0);
    }

    #[test]
    fn test_subscribe_during_notify_applies_next_time() {
        let list = Arc::new(ObserverList::<u32>::new());
        let hits = Arc::new(Mutex::new(0));

        let inner_list = Arc::clone(&list);
        let inner_hits = Arc::clone(&hits);
        list.subscribe(move |_| {
            let h = Arc::clone(&inner_hits);
            inner_list.subscribe(move |_| *h.lock().unwrap() += 1);
        });

        list.notify(&0);
        assert_eq!(*hits.lock().unwrap(), 0);
        assert_eq!(list.len(), 2);

        list.notify(&0);
        assert_eq!(*hits.lock().unwrap(), 1);
    }
}
