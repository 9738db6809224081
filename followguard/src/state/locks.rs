// followguard/src/state/locks.rs
//
// Per-user serialization. Only the read-modify-write of one user's score and
// badge row takes this lock; unrelated users never contend.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

#[derive(Default)]
pub struct UserLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl UserLocks {
    pub fn new() -> Self { Self::default() }

    /// Run `f` while holding the lock for `user_id`.
    pub fn with_user<T>(&self, user_id: &str, f: impl FnOnce() -> T) -> T {
        let lock = self
            .locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock();
        f()
    }

    /// Drop lock entries nobody currently holds.
    pub fn prune(&self) {
        self.locks.retain(|_, l| Arc::strong_count(l) > 1 || l.is_locked());
    }

    pub fn len(&self) -> usize { self.locks.len() }

    pub fn is_empty(&self) -> bool { self.locks.is_empty() }
}
