//! Observable keyed map.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

/// Change notification emitted by a [`Registry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent<K> {
    Added(K),
    Removed(K),
}

/// A map whose inserts and removals are broadcast to subscribers.
///
/// Replacing a value under an existing key emits `Removed` then `Added`.
/// Subscribers that fall behind lose the oldest events.
pub struct Registry<K, V> {
    entries: RwLock<HashMap<K, V>>,
    events: broadcast::Sender<RegistryEvent<K>>,
}

impl<K, V> Default for Registry<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Registry<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            events: broadcast::channel(EVENT_CAPACITY).0,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<K, V>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<K, V>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: RegistryEvent<K>) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Inserts `value`, returning the value it replaced.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let previous = self.write().insert(key.clone(), value);
        if previous.is_some() {
            self.emit(RegistryEvent::Removed(key.clone()));
        }
        self.emit(RegistryEvent::Added(key));
        previous
    }

    /// Returns the existing value for `key`, or inserts the one built by
    /// `make`. The flag is true when a new value was inserted.
    pub fn get_or_insert_with(&self, key: K, make: impl FnOnce() -> V) -> (V, bool) {
        let (value, inserted) = {
            let mut entries = self.write();
            match entries.get(&key) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let value = make();
                    entries.insert(key.clone(), value.clone());
                    (value, true)
                }
            }
        };
        if inserted {
            self.emit(RegistryEvent::Added(key));
        }
        (value, inserted)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.read().get(key).cloned()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.read().contains_key(key)
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let removed = self.write().remove(key);
        if removed.is_some() {
            self.emit(RegistryEvent::Removed(key.clone()));
        }
        removed
    }

    /// Removes every entry, returning them.
    pub fn clear(&self) -> Vec<(K, V)> {
        let drained: Vec<(K, V)> = self.write().drain().collect();
        for (key, _) in &drained {
            self.emit(RegistryEvent::Removed(key.clone()));
        }
        drained
    }

    pub fn keys(&self) -> Vec<K> {
        self.read().keys().cloned().collect()
    }

    pub fn values(&self) -> Vec<V> {
        self.read().values().cloned().collect()
    }

    pub fn entries(&self) -> Vec<(K, V)> {
        self.read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent<K>> {
        self.events.subscribe()
    }
}
