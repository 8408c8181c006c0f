use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};

/// One mutual-exclusion domain per owning entity.
///
/// Mutations for the same key serialize; mutations for different keys never
/// contend beyond the brief shard lookup. A key's entry lives only while
/// some caller holds or waits on it, so the map is bounded by concurrency,
/// not by the number of keys ever seen.
pub struct KeyedLocks<K: Eq + Hash> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

/// Guard held for the duration of one owner-scoped mutation.
pub struct KeyedGuard<'a, K: Eq + Hash> {
    locks: &'a DashMap<K, Arc<Mutex<()>>>,
    key: K,
    guard: Option<ArcMutexGuard<RawMutex, ()>>,
}

impl<K: Eq + Hash> Drop for KeyedGuard<'_, K> {
    fn drop(&mut self) {
        // Unlock and release our Arc first. Waiters clone the Arc under the
        // shard lock, so a count of one here means nobody else wants the key.
        drop(self.guard.take());
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Block until the lock for `key` is held.
    pub fn lock(&self, key: &K) -> KeyedGuard<'_, K> {
        // Clone the Arc out first so the shard lock is released before we block.
        let mutex = self.locks.entry(key.clone()).or_default().clone();
        KeyedGuard {
            locks: &self.locks,
            key: key.clone(),
            guard: Some(mutex.lock_arc()),
        }
    }

    /// Number of keys currently held or awaited.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn same_key_serializes() {
        let locks = Arc::new(KeyedLocks::<String>::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = locks.clone();
                let inside = inside.clone();
                let max_inside = max_inside.clone();
                thread::spawn(move || {
                    let _guard = locks.lock(&"owner".to_string());
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    thread::yield_now();
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[test]
    fn different_keys_do_not_block() {
        let locks = KeyedLocks::<&'static str>::new();
        let _a = locks.lock(&"a");
        // Would deadlock if keys shared a mutex.
        let _b = locks.lock(&"b");
        assert_eq!(locks.len(), 2);
    }

    #[test]
    fn idle_keys_are_released() {
        let locks = KeyedLocks::<u32>::new();
        for key in 0..100 {
            let _guard = locks.lock(&key);
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());

        let held = locks.lock(&7);
        drop(locks.lock(&8));
        assert_eq!(locks.len(), 1);
        drop(held);
        assert!(locks.is_empty());
    }
}
