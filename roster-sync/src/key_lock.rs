//! In-flight guard per sync key.
//!
//! The update dispatcher acquires a [`KeyGuard`] before handing a record to
//! a worker. The key is released when the guard drops, on every exit path
//! of the worker including panics.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use roster_core::SyncKey;

/// Shared set of sync keys currently being processed.
#[derive(Debug, Default)]
pub struct KeyLockRegistry {
    in_flight: Mutex<HashSet<SyncKey>>,
}

impl KeyLockRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Mark `key` in flight. `None` if another pass already holds it.
    pub fn try_acquire(self: &Arc<Self>, key: &SyncKey) -> Option<KeyGuard> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !in_flight.insert(key.clone()) {
            return None;
        }
        Some(KeyGuard {
            registry: Arc::clone(self),
            key: key.clone(),
        })
    }

    pub fn is_locked(&self, key: &SyncKey) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(key)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    fn release(&self, key: &SyncKey) {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }
}

/// Releases its key on drop.
#[derive(Debug)]
pub struct KeyGuard {
    registry: Arc<KeyLockRegistry>,
    key: SyncKey,
}

impl KeyGuard {
    pub fn key(&self) -> &SyncKey {
        &self.key
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        self.registry.release(&self.key);
    }
}
