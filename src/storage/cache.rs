//! Capacity-bounded cache of per-project graph stores.
//!
//! Hosts that serve many projects keep recently used graphs resident and
//! evict the least recently used one when the cache is full. The resolution
//! engine never sees this type; it is handed one project's store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::storage::traits::StorageError;

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

#[derive(Debug)]
struct CacheEntry<S> {
    store: Arc<S>,
    last_used: u64,
}

#[derive(Debug)]
struct CacheState<S> {
    entries: HashMap<String, CacheEntry<S>>,
    tick: u64,
}

impl<S> CacheState<S> {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn evict_lru(&mut self) -> Option<(String, Arc<S>)> {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone())?;
        self.entries.remove(&victim).map(|entry| (victim, entry.store))
    }
}

/// LRU cache mapping project ids to shared stores.
#[derive(Debug)]
pub struct ProjectCache<S> {
    capacity: usize,
    state: Mutex<CacheState<S>>,
}

impl<S> ProjectCache<S> {
    /// Creates a cache holding at most `capacity` projects (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                tick: 0,
            }),
        }
    }

    /// Maximum number of resident projects.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the cached store and marks it most recently used.
    pub fn get(&self, project: &str) -> Result<Option<Arc<S>>, StorageError> {
        let mut state = self.state.lock().map_err(|_| lock_err("cache.get"))?;
        let tick = state.next_tick();
        Ok(state.entries.get_mut(project).map(|entry| {
            entry.last_used = tick;
            Arc::clone(&entry.store)
        }))
    }

    /// Inserts or replaces a project's store.
    ///
    /// Returns the evicted `(project, store)` when the insert pushed the cache
    /// over capacity.
    pub fn insert(
        &self,
        project: impl Into<String>,
        store: Arc<S>,
    ) -> Result<Option<(String, Arc<S>)>, StorageError> {
        let project = project.into();
        let mut state = self.state.lock().map_err(|_| lock_err("cache.insert"))?;
        let tick = state.next_tick();

        let evicted = if !state.entries.contains_key(&project) && state.entries.len() >= self.capacity {
            state.evict_lru()
        } else {
            None
        };

        state.entries.insert(
            project,
            CacheEntry {
                store,
                last_used: tick,
            },
        );
        Ok(evicted)
    }

    /// Returns the cached store, loading and inserting it on a miss.
    ///
    /// The loader runs while the cache lock is held so a project is never
    /// loaded twice concurrently; keep it cheap or pre-load outside.
    pub fn get_or_insert_with<F>(&self, project: &str, load: F) -> Result<Arc<S>, StorageError>
    where
        F: FnOnce() -> Result<S, StorageError>,
    {
        let mut state = self.state.lock().map_err(|_| lock_err("cache.get_or_insert_with"))?;
        let tick = state.next_tick();

        if let Some(entry) = state.entries.get_mut(project) {
            entry.last_used = tick;
            return Ok(Arc::clone(&entry.store));
        }

        let store = Arc::new(load()?);
        if state.entries.len() >= self.capacity {
            if let Some((evicted, _)) = state.evict_lru() {
                tracing::debug!(project = %evicted, "evicted project graph from cache");
            }
        }
        state.entries.insert(
            project.to_string(),
            CacheEntry {
                store: Arc::clone(&store),
                last_used: tick,
            },
        );
        Ok(store)
    }

    /// Drops a project from the cache.
    pub fn remove(&self, project: &str) -> Result<Option<Arc<S>>, StorageError> {
        let mut state = self.state.lock().map_err(|_| lock_err("cache.remove"))?;
        Ok(state.entries.remove(project).map(|entry| entry.store))
    }

    /// Number of resident projects.
    pub fn len(&self) -> Result<usize, StorageError> {
        let state = self.state.lock().map_err(|_| lock_err("cache.len"))?;
        Ok(state.entries.len())
    }

    /// Returns true if no project is resident.
    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}
