//! # Typed, concurrent key/value state shared by modules.
//!
//! [`StateStore`] is an explicitly passed handle (owned by the host, cloned
//! into every module). Keys are case-sensitive strings; each value carries its
//! concrete Rust type, fixed by the last `set` (or first `update`).
//!
//! ## Update algorithm
//! ```text
//! loop {
//!   ├─► read (value, version) under the shard read lock, release it
//!   ├─► downcast to T (mismatch → StateError::TypeMismatch)
//!   ├─► next = updater(value)              (no lock held)
//!   └─► entry(key): version unchanged? ─► store (next, new version), return
//!                                 else ─► retry
//! }
//! ```
//!
//! ## Rules
//! - Types are never coerced: a read or update assuming another type fails.
//! - Concurrent `update`s on one key never lose increments.
//! - `updater` may run more than once per call and must not have side effects.
//! - Entries live until removed explicitly; there is no eviction.

use std::any::{Any, type_name};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;

use crate::error::StateError;

#[derive(Clone)]
struct Slot {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
    version: u64,
}

impl Slot {
    fn read<T: Any + Clone>(&self, key: &str) -> Result<T, StateError> {
        self.value
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| StateError::TypeMismatch {
                key: key.to_string(),
                expected: type_name::<T>(),
                found: self.type_name,
            })
    }
}

struct Inner {
    map: DashMap<String, Slot>,
    versions: AtomicU64,
}

/// Process-wide typed key/value map.
///
/// Cheap to clone; all clones share the same entries.
///
/// ## Example
/// ```rust
/// use modvisor::StateStore;
///
/// let state = StateStore::new();
/// assert_eq!(state.get("volume", 5u8).unwrap(), 5);
///
/// state.set("volume", 7u8);
/// assert_eq!(state.update("volume", |v: u8| v + 1, 0).unwrap(), 8);
///
/// // Same key, different type: fails loudly.
/// assert!(state.get::<String>("volume", String::new()).is_err());
/// ```
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<Inner>,
}

impl StateStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                map: DashMap::new(),
                versions: AtomicU64::new(1),
            }),
        }
    }

    /// Returns the value under `key`, or `default` when absent.
    pub fn get<T>(&self, key: &str, default: T) -> Result<T, StateError>
    where
        T: Any + Clone + Send + Sync,
    {
        match self.snapshot(key) {
            Some(slot) => slot.read(key),
            None => Ok(default),
        }
    }

    /// Stores `value` under `key`, replacing any previous value and type.
    pub fn set<T>(&self, key: impl Into<String>, value: T)
    where
        T: Any + Send + Sync,
    {
        let slot = self.slot(value);
        self.inner.map.insert(key.into(), slot);
    }

    /// True if `key` holds a value.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.map.contains_key(key)
    }

    /// Atomically replaces the value under `key` with `updater(current)`.
    ///
    /// `current` is `default` when the key is absent. Returns the stored value.
    pub fn update<T, F>(&self, key: &str, updater: F, default: T) -> Result<T, StateError>
    where
        T: Any + Clone + Send + Sync,
        F: Fn(T) -> T,
    {
        loop {
            let seen = self.snapshot(key);
            let (current, seen_version) = match &seen {
                Some(slot) => (slot.read::<T>(key)?, Some(slot.version)),
                None => (default.clone(), None),
            };

            let next = updater(current);
            let slot = self.slot(next.clone());

            match self.inner.map.entry(key.to_string()) {
                MapEntry::Occupied(mut occupied)
                    if Some(occupied.get().version) == seen_version =>
                {
                    occupied.insert(slot);
                    return Ok(next);
                }
                MapEntry::Vacant(vacant) if seen_version.is_none() => {
                    vacant.insert(slot);
                    return Ok(next);
                }
                _ => {
                    tracing::trace!(key, "state update raced; retrying");
                }
            }
        }
    }

    /// Removes `key`; returns whether it was present.
    pub fn remove(&self, key: &str) -> bool {
        self.inner.map.remove(key).is_some()
    }

    /// Sorted list of keys currently stored.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.map.iter().map(|e| e.key().clone()).collect();
        keys.sort_unstable();
        keys
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.inner.map.len()
    }

    /// True if no key is stored.
    pub fn is_empty(&self) -> bool {
        self.inner.map.is_empty()
    }

    fn snapshot(&self, key: &str) -> Option<Slot> {
        self.inner.map.get(key).map(|e| e.value().clone())
    }

    fn slot<T: Any + Send + Sync>(&self, value: T) -> Slot {
        Slot {
            value: Arc::new(value),
            type_name: type_name::<T>(),
            version: self.inner.versions.fetch_add(1, Ordering::Relaxed),
        }
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("keys", &self.inner.map.len())
            .finish()
    }
}
