//! Collapses concurrent fetches for the same key into one

use std::{
    borrow::Borrow,
    collections::HashMap,
    future::Future,
    hash::Hash,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::task::JoinError;

type Flight<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

enum Slot<T, E> {
    Ready(T),
    Pending(Flight<T, E>),
}

type Slots<K, T, E> = Arc<Mutex<HashMap<K, Slot<T, E>>>>;

/// A map from key to either a settled value or the single fetch in flight
/// for that key
///
/// Fetches run on their own task, so a caller that stops waiting does not
/// cancel the fetch for everyone else. The map lock is only held to look up
/// or replace a slot, never across the fetch itself.
pub(crate) struct SingleFlight<K, T, E> {
    slots: Slots<K, T, E>,
}

impl<K, T, E> SingleFlight<K, T, E>
where
    K: Eq + Hash + Clone + Send + 'static,
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<JoinError> + 'static,
{
    pub(crate) fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The settled value for `key`, if any
    pub(crate) fn cached<Q>(&self, key: &Q) -> Option<T>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match lock(&self.slots).get(key) {
            Some(Slot::Ready(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// Whether a fetch for `key` is in flight
    #[cfg(test)]
    pub(crate) fn is_pending<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        matches!(lock(&self.slots).get(key), Some(Slot::Pending(_)))
    }

    /// Returns the settled value for `key`, joining or starting a fetch if
    /// there is none
    ///
    /// A successful result is kept for the life of the map. A failed result
    /// is handed to every waiter and then forgotten, so the next call
    /// fetches again.
    pub(crate) async fn get_or_fetch<F, Fut>(&self, key: K, fetch: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let flight = {
            let mut slots = lock(&self.slots);
            match slots.get(&key) {
                Some(Slot::Ready(value)) => return Ok(value.clone()),
                Some(Slot::Pending(flight)) => flight.clone(),
                None => self.launch(&mut slots, key, fetch(), true),
            }
        };

        flight.await
    }

    /// Joins or starts a fetch for `key` without keeping its result
    ///
    /// The slot is cleared as soon as the fetch settles.
    pub(crate) async fn run<F, Fut>(&self, key: K, fetch: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let flight = {
            let mut slots = lock(&self.slots);
            match slots.get(&key) {
                Some(Slot::Pending(flight)) => flight.clone(),
                _ => self.launch(&mut slots, key, fetch(), false),
            }
        };

        flight.await
    }

    fn launch<Fut>(
        &self,
        slots: &mut HashMap<K, Slot<T, E>>,
        key: K,
        fetch: Fut,
        keep: bool,
    ) -> Flight<T, E>
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let guard = SettleGuard {
            slots: Arc::clone(&self.slots),
            key: Some(key.clone()),
        };

        let handle = tokio::spawn(async move {
            let mut guard = guard;
            let result = fetch.await;
            if keep {
                if let Ok(value) = &result {
                    guard.keep(value.clone());
                }
            }
            result
        });

        let flight = async move {
            match handle.await {
                Ok(result) => result,
                Err(err) => Err(E::from(err)),
            }
        }
        .boxed()
        .shared();

        slots.insert(key, Slot::Pending(flight.clone()));
        flight
    }
}

impl<K, T, E> std::fmt::Debug for SingleFlight<K, T, E>
where
    K: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = lock(&self.slots);
        f.debug_struct("SingleFlight")
            .field("keys", &slots.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Settles a slot when the fetch that owns it finishes, panics, or is
/// aborted
struct SettleGuard<K: Eq + Hash, T, E> {
    slots: Slots<K, T, E>,
    key: Option<K>,
}

impl<K: Eq + Hash, T, E> SettleGuard<K, T, E> {
    fn keep(&mut self, value: T) {
        if let Some(key) = self.key.take() {
            lock(&self.slots).insert(key, Slot::Ready(value));
        }
    }
}

impl<K: Eq + Hash, T, E> Drop for SettleGuard<K, T, E> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            lock(&self.slots).remove(&key);
        }
    }
}

fn lock<K, T, E>(slots: &Mutex<HashMap<K, Slot<T, E>>>) -> MutexGuard<'_, HashMap<K, Slot<T, E>>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}
