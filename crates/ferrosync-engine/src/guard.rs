//! In-flight guard
//!
//! One [`JobTable`] per scheduler. Acquiring a key is a single check-and-insert under a
//! mutex, and the returned [`JobPermit`] releases the key when dropped, whichever way the
//! run ends.

use ferrosync_types::JobKey;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Set of schedules with a run in flight
#[derive(Debug, Clone, Default)]
pub struct JobTable {
    held: Arc<Mutex<HashSet<JobKey>>>,
}

impl JobTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<JobKey>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim a key; `None` when a run already holds it
    pub fn try_acquire(&self, key: JobKey) -> Option<JobPermit> {
        if self.lock().insert(key.clone()) {
            Some(JobPermit {
                table: self.clone(),
                key,
            })
        } else {
            None
        }
    }

    /// Whether a key is held
    pub fn is_held(&self, key: &JobKey) -> bool {
        self.lock().contains(key)
    }

    /// Held keys, sorted
    pub fn keys(&self) -> Vec<JobKey> {
        let mut keys: Vec<JobKey> = self.lock().iter().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of held keys
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no key is held
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Ownership of one key in a [`JobTable`]
#[derive(Debug)]
pub struct JobPermit {
    table: JobTable,
    key: JobKey,
}

impl JobPermit {
    /// The held key
    pub fn key(&self) -> &JobKey {
        &self.key
    }
}

impl Drop for JobPermit {
    fn drop(&mut self) {
        self.table.lock().remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_second_acquire_is_rejected_until_release() {
        let table = JobTable::new();
        let key = JobKey::new("c1", "nightly");

        let permit = table.try_acquire(key.clone()).unwrap();
        assert!(table.try_acquire(key.clone()).is_none());
        assert!(table.is_held(&key));
        assert!(table.try_acquire(JobKey::new("c2", "nightly")).is_some());

        drop(permit);
        assert!(!table.is_held(&key));
        assert!(table.try_acquire(key).is_some());
    }

    #[test]
    fn test_concurrent_acquire_admits_exactly_one() {
        let table = JobTable::new();
        let winners = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(std::sync::Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = table.clone();
                let winners = Arc::clone(&winners);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    if let Some(permit) = table.try_acquire(JobKey::new("c1", "nightly")) {
                        winners.fetch_add(1, Ordering::SeqCst);
                        std::mem::forget(permit);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert_eq!(table.keys(), vec![JobKey::new("c1", "nightly")]);
    }
}
