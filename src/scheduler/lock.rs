use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use parking_lot::{Mutex, MutexGuard};

pub const DEFAULT_STRIPES: usize = 64;

/// Fixed pool of mutexes indexed by key hash.
///
/// Two keys that collide share a stripe, which only costs contention.
/// Stripes are not reentrant: never take a second stripe from the same
/// instance while holding one.
#[derive(Debug)]
pub struct KeyedLock {
    stripes: Box<[Mutex<()>]>,
}

impl Default for KeyedLock {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}

impl KeyedLock {
    pub fn new(stripes: usize) -> Self {
        let stripes = (0..stripes.max(1)).map(|_| Mutex::new(())).collect();
        Self { stripes }
    }

    pub fn stripes(&self) -> usize {
        self.stripes.len()
    }

    pub fn lock<K: Hash + ?Sized>(&self, key: &K) -> MutexGuard<'_, ()> {
        self.stripes[self.stripe_for(key)].lock()
    }

    fn stripe_for<K: Hash + ?Sized>(&self, key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn zero_stripes_rounds_up() {
        assert_eq!(KeyedLock::new(0).stripes(), 1);
    }

    #[test]
    fn same_key_maps_to_same_stripe() {
        let lock = KeyedLock::new(16);
        assert_eq!(lock.stripe_for("job-1"), lock.stripe_for("job-1"));
    }

    #[test]
    fn serializes_critical_sections() {
        let lock = Arc::new(KeyedLock::new(4));
        let counter = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let lock = lock.clone();
                let counter = counter.clone();
                thread::spawn(move || {
                    let _guard = lock.lock("shared");
                    let mut seen = counter.lock();
                    let len = seen.len();
                    seen.push(i);
                    assert_eq!(seen.len(), len + 1);
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.lock().len(), 8);
    }
}
