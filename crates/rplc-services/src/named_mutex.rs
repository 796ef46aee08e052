use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{ArcMutexGuard, Mutex, RawMutex};

/// A registry of named, process-local mutexes.
///
/// `createTransaction` takes the `"transaction:<id>"` mutex atomically
/// with creating the transaction row, and every subsequent state
/// transition takes the same named mutex (spec.md §4.7). This guarantees
/// that a lock with the same name is held by at most one owner at a time
/// across threads; it is explicitly NOT a cluster-wide lock (spec.md §9).
#[derive(Debug, Default, Clone)]
pub struct NamedMutexRegistry {
    mutexes: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

/// RAII guard for a held named mutex, owning an `Arc` of its backing
/// mutex so the lock outlives any particular reference to the registry.
pub type NamedMutexGuard = ArcMutexGuard<RawMutex, ()>;

impl NamedMutexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, name: &str) -> Arc<Mutex<()>> {
        self.mutexes
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Blocks until the named mutex is acquired.
    pub fn lock(&self, name: &str) -> NamedMutexGuard {
        let mutex = self.entry(name);
        Mutex::lock_arc(&mutex)
    }

    /// Non-blocking variant; returns `None` if the named mutex is
    /// currently held elsewhere.
    pub fn try_lock(&self, name: &str) -> Option<NamedMutexGuard> {
        let mutex = self.entry(name);
        Mutex::try_lock_arc(&mutex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn same_name_mutex_is_exclusive() {
        let registry = NamedMutexRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let counter = counter.clone();
                thread::spawn(move || {
                    let _guard = registry.lock("transaction:1");
                    let before = counter.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(before, 0, "overlapping critical sections");
                    thread::yield_now();
                    counter.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn try_lock_fails_while_held() {
        let registry = NamedMutexRegistry::new();
        let guard = registry.lock("transaction:2");
        assert!(registry.try_lock("transaction:2").is_none());
        drop(guard);
        assert!(registry.try_lock("transaction:2").is_some());
    }

    #[test]
    fn distinct_names_do_not_contend() {
        let registry = NamedMutexRegistry::new();
        let _a = registry.lock("transaction:3");
        assert!(registry.try_lock("transaction:4").is_some());
    }
}
