use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering as MemOrd};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Process-wide objects addressed by integer ids across the C ABI.
///
/// Ids start at 1 and are never reused, so a stale id can always be told
/// apart from a live one.
pub struct Registry<T> {
    next: AtomicU32,
    live: Mutex<HashMap<u32, Arc<T>>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            next: AtomicU32::new(1),
            live: Mutex::default(),
        }
    }
}

impl<T> Registry<T> {
    fn live(&self) -> MutexGuard<'_, HashMap<u32, Arc<T>>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `None` once every id has been handed out.
    pub fn insert(&self, value: T) -> Option<u32> {
        let id = self
            .next
            .fetch_update(MemOrd::AcqRel, MemOrd::Acquire, |it| it.checked_add(1))
            .ok()?;
        self.live().insert(id, Arc::new(value));
        Some(id)
    }

    pub fn get(&self, id: u32) -> Option<Arc<T>> {
        self.live().get(&id).cloned()
    }

    pub fn remove(&self, id: u32) -> Option<Arc<T>> {
        self.live().remove(&id)
    }

    /// Whether `id` was handed out at some point, live or not.
    pub fn was_issued(&self, id: u32) -> bool {
        id != 0 && id < self.next.load(MemOrd::Acquire)
    }
}
