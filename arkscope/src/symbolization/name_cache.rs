//! Bounded method name cache

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, TryLockError};

use crate::domain::MethodId;

#[derive(Debug, Default)]
struct Entries {
    names: HashMap<MethodId, String>,
    order: VecDeque<MethodId>,
}

/// methodId → display name, evicting the oldest entry when full
///
/// Best effort only: if the lock is held (e.g. by the thread a signal
/// interrupted) lookups miss and inserts are dropped instead of blocking.
#[derive(Debug)]
pub struct NameCache {
    capacity: usize,
    entries: Mutex<Entries>,
}

impl NameCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { capacity, entries: Mutex::new(Entries::default()) }
    }

    fn lock(&self) -> Option<MutexGuard<'_, Entries>> {
        match self.entries.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    #[must_use]
    pub fn get(&self, method: MethodId) -> Option<String> {
        self.lock()?.names.get(&method).cloned()
    }

    pub fn insert(&self, method: MethodId, name: String) {
        if self.capacity == 0 {
            return;
        }
        let Some(mut entries) = self.lock() else {
            return;
        };
        if entries.names.insert(method, name).is_some() {
            return;
        }
        entries.order.push_back(method);
        while entries.order.len() > self.capacity {
            if let Some(oldest) = entries.order.pop_front() {
                entries.names.remove(&oldest);
            }
        }
    }

    /// Cached name, or compute, remember and return it
    pub fn get_or_insert_with<F>(&self, method: MethodId, compute: F) -> Option<String>
    where
        F: FnOnce() -> Option<String>,
    {
        if let Some(name) = self.get(method) {
            return Some(name);
        }
        let name = compute()?;
        self.insert(method, name.clone());
        Some(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().map_or(0, |entries| entries.names.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Some(mut entries) = self.lock() {
            entries.names.clear();
            entries.order.clear();
        }
    }
}
