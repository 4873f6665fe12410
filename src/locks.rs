use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::normalize::canonical_id;

/// Short-lived mutexes keyed by normalized student identifier, so two writes
/// to the same student never interleave their read-modify-write.
#[derive(Default)]
pub struct KeyedLocks {
    slots: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lock<T>(&self, id: &str, f: impl FnOnce() -> T) -> T {
        let key = canonical_id(id);
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.entry(key.clone()).or_default().clone()
        };

        let out = {
            let _held = slot.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };

        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // The map and this call hold the only references: nobody is waiting.
        if Arc::strong_count(&slot) == 2 {
            slots.remove(&key);
        }
        out
    }

    #[cfg(test)]
    fn live_slots(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
