//! Single-flight cache of loaded models keyed by canonical reference

use modelgate_core::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Process-wide map from canonical reference to a loaded value
///
/// At most one load runs per key. Callers arriving while a load is in flight
/// wait for it and share its success. A failed load leaves the slot empty, so
/// each waiting caller then runs its own loader. Entries are never evicted.
pub struct VersionCache<V> {
    slots: Mutex<HashMap<String, Arc<OnceCell<V>>>>,
}

impl<V: Clone> VersionCache<V> {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, key: &str) -> Arc<OnceCell<V>> {
        let mut slots = self.slots.lock();
        Arc::clone(slots.entry(key.to_string()).or_default())
    }

    /// Return the cached value for `key`, loading it on a miss
    pub async fn get_or_load<F, Fut>(&self, key: &str, loader: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let slot = self.slot(key);

        if let Some(value) = slot.get() {
            metrics::counter!("modelgate_cache_lookups_total", "result" => "hit").increment(1);
            return Ok(value.clone());
        }

        metrics::counter!("modelgate_cache_lookups_total", "result" => "miss").increment(1);
        tracing::debug!("Cache miss for {}", key);

        slot.get_or_try_init(loader).await.cloned()
    }

    /// Whether `key` has a loaded value
    pub fn contains(&self, key: &str) -> bool {
        self.slots
            .lock()
            .get(key)
            .map_or(false, |slot| slot.initialized())
    }

    /// Number of loaded entries
    pub fn len(&self) -> usize {
        self.slots.lock().values().filter(|slot| slot.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys of loaded entries, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .slots
            .lock()
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }
}

impl<V: Clone> Default for VersionCache<V> {
    fn default() -> Self {
        Self::new()
    }
}
