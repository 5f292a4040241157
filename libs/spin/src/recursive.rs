// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;

use crate::loom::sync::atomic::{AtomicUsize, Ordering};
use crate::{
    Collector, Error, NoCollector, OwnerId, RawLock, Result, Spinlock, TrackedLock,
    current_thread_id, loom_const_fn,
};

/// A spinlock which can be recursively locked by a single thread.
///
/// This type is identical to [`Spinlock`] except that locking it again from the thread that
/// holds it increments a recursion count instead of deadlocking. The lock is released once
/// [`unlock`](Self::unlock) has been called as many times as it was locked.
///
/// Only the owning thread ever writes `owner` and `count`. The owner is set strictly after
/// winning the inner spinlock and cleared strictly before releasing it, so another thread can
/// never observe its own id in `owner`.
pub struct RecursiveSpinlock<C = NoCollector> {
    lock: Spinlock<C>,
    owner: AtomicUsize,
    count: AtomicUsize,
}

impl<C: Collector> RecursiveSpinlock<C> {
    loom_const_fn! {
        #[must_use]
        pub const fn new() -> Self {
            Self::with_collector(C::INIT)
        }
    }

    loom_const_fn! {
        #[must_use]
        pub const fn with_collector(collector: C) -> Self {
            Self {
                lock: Spinlock::with_collector(collector),
                owner: AtomicUsize::new(0),
                count: AtomicUsize::new(0),
            }
        }
    }

    /// Acquires the lock, spinning until it is available unless the calling thread already
    /// holds it.
    ///
    /// # Panics
    ///
    /// Panics if the recursion count overflows.
    pub fn lock(&self) {
        self.lock_internal(|| {
            self.lock.lock();
            true
        });
    }

    /// Attempts to acquire the lock without spinning.
    ///
    /// # Panics
    ///
    /// Panics if the recursion count overflows.
    pub fn try_lock(&self) -> bool {
        self.lock_internal(|| self.lock.try_lock())
    }

    /// Releases one level of recursion.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnlockCountMismatch`] if the lock is not held, and [`Error::NotOwner`]
    /// if it is held by a different thread.
    pub fn unlock(&self) -> Result<()> {
        let count = self.check_owner()?;

        if count == 1 {
            self.release();
        } else {
            self.count.store(count - 1, Ordering::Relaxed);
        }

        Ok(())
    }

    /// Releases all levels of recursion at once, returning how many there were.
    ///
    /// # Errors
    ///
    /// Same as [`unlock`](Self::unlock).
    pub fn unlock_all(&self) -> Result<usize> {
        let count = self.check_owner()?;
        self.release();
        Ok(count)
    }

    /// Re-acquires the lock and restores a depth returned by [`unlock_all`](Self::unlock_all).
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConcurrencyViolation`] if the calling thread still held the lock, in
    /// which case the depth is left unchanged.
    ///
    /// # Panics
    ///
    /// Panics if the recursion count overflows.
    pub fn relock_all(&self, depth: usize) -> Result<()> {
        if depth == 0 {
            return Ok(());
        }

        self.lock();
        let count = self.count.load(Ordering::Relaxed);
        if count != 1 {
            self.count.store(count - 1, Ordering::Relaxed);
            log::debug!("relock_all found recursive spinlock at depth {count}");
            return Err(Error::ConcurrencyViolation { depth: count });
        }

        self.count.store(depth, Ordering::Relaxed);
        Ok(())
    }

    /// Whether the lock is held by any thread. Advisory only.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    /// Whether the lock is held by the calling thread.
    #[inline]
    pub fn is_held(&self) -> bool {
        self.owner.load(Ordering::Relaxed) == current_thread_id().get()
    }

    /// The thread currently holding the lock. Advisory only, unless called by the owner.
    pub fn owner(&self) -> OwnerId {
        OwnerId::from_thread_raw(self.owner.load(Ordering::Relaxed))
    }

    /// The recursion depth. Only meaningful when called by the owner.
    pub fn depth(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    #[inline]
    fn lock_internal(&self, lock_inner: impl FnOnce() -> bool) -> bool {
        let id = current_thread_id().get();

        if self.owner.load(Ordering::Relaxed) == id {
            let count = self
                .count
                .load(Ordering::Relaxed)
                .checked_add(1)
                .expect("RecursiveSpinlock lock count overflow");
            self.count.store(count, Ordering::Relaxed);
        } else {
            if !lock_inner() {
                return false;
            }
            self.owner.store(id, Ordering::Relaxed);
            debug_assert_eq!(self.count.load(Ordering::Relaxed), 0);
            self.count.store(1, Ordering::Relaxed);
        }
        true
    }

    /// Returns the current depth if the caller owns the lock.
    fn check_owner(&self) -> Result<usize> {
        let me = current_thread_id().get();
        let owner = self.owner.load(Ordering::Relaxed);

        if owner == 0 {
            return Err(Error::UnlockCountMismatch);
        }
        if owner != me {
            let err = Error::NotOwner {
                owner: OwnerId::from_thread_raw(owner),
                caller: OwnerId::from_thread_raw(me),
            };
            log::debug!("{err}");
            return Err(err);
        }

        let count = self.count.load(Ordering::Relaxed);
        debug_assert_ne!(count, 0);
        Ok(count)
    }

    fn release(&self) {
        self.count.store(0, Ordering::Relaxed);
        self.owner.store(0, Ordering::Relaxed);
        self.lock.unlock();
    }
}

impl<C: Collector> Default for RecursiveSpinlock<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for RecursiveSpinlock<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecursiveSpinlock")
            .field(
                "owner",
                &OwnerId::from_thread_raw(self.owner.load(Ordering::Relaxed)),
            )
            .field("count", &self.count.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

// Safety: only the thread that won the inner spinlock records itself as owner, and a
// recursive acquisition requires the caller to already be that owner.
unsafe impl<C: Collector> RawLock for RecursiveSpinlock<C> {
    #[inline]
    fn lock(&self) -> Result<()> {
        RecursiveSpinlock::lock(self);
        Ok(())
    }

    #[inline]
    fn try_lock(&self) -> Result<bool> {
        Ok(RecursiveSpinlock::try_lock(self))
    }

    #[inline]
    fn unlock(&self) -> Result<()> {
        RecursiveSpinlock::unlock(self)
    }

    #[inline]
    fn is_locked(&self) -> bool {
        RecursiveSpinlock::is_locked(self)
    }

    #[inline]
    fn unlock_all(&self) -> Result<usize> {
        RecursiveSpinlock::unlock_all(self)
    }

    #[inline]
    fn relock_all(&self, depth: usize) -> Result<()> {
        RecursiveSpinlock::relock_all(self, depth)
    }
}

// Safety: the owner word holds the caller's id only if the caller wrote it after acquiring.
unsafe impl<C: Collector> TrackedLock for RecursiveSpinlock<C> {
    #[inline]
    fn is_held(&self) -> bool {
        RecursiveSpinlock::is_held(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loom::sync::Arc;
    use crate::loom::thread;

    #[test]
    fn lock_twice_unlock_thrice() {
        crate::loom::model(|| {
            let lock: RecursiveSpinlock = RecursiveSpinlock::new();

            lock.lock();
            lock.lock();
            assert_eq!(lock.depth(), 2);

            lock.unlock().unwrap();
            assert!(lock.is_locked());
            assert_eq!(lock.owner(), OwnerId::current_thread());

            lock.unlock().unwrap();
            assert!(!lock.is_locked());
            assert_eq!(lock.owner(), OwnerId::None);

            assert_eq!(lock.unlock(), Err(Error::UnlockCountMismatch));
        });
    }

    #[test]
    fn reentry_keeps_owner() {
        crate::loom::model(|| {
            let lock: RecursiveSpinlock = RecursiveSpinlock::new();

            assert!(lock.try_lock());
            let owner = lock.owner();
            assert!(lock.try_lock());
            lock.lock();

            assert_eq!(lock.owner(), owner);
            assert_eq!(lock.depth(), 3);
            assert_eq!(lock.unlock_all(), Ok(3));
            assert!(!lock.is_locked());
        });
    }

    #[test]
    fn other_thread_cannot_unlock() {
        crate::loom::model(|| {
            let lock: Arc<RecursiveSpinlock> = Arc::new(RecursiveSpinlock::new());
            lock.lock();
            lock.lock();

            let res = thread::spawn({
                let lock = lock.clone();
                move || (lock.unlock(), lock.unlock_all(), RecursiveSpinlock::try_lock(&lock))
            })
            .join()
            .unwrap();

            assert!(matches!(res.0, Err(Error::NotOwner { .. })));
            assert!(matches!(res.1, Err(Error::NotOwner { .. })));
            assert!(!res.2);

            assert_eq!(lock.depth(), 2);
            assert!(lock.is_held());
            assert_eq!(lock.unlock_all(), Ok(2));
        });
    }

    #[test]
    fn contended_recursive_lock() {
        crate::loom::model(|| {
            let lock: Arc<RecursiveSpinlock> = Arc::new(RecursiveSpinlock::new());

            let threads: Vec<_> = (0..2)
                .map(|_| {
                    let lock = lock.clone();
                    thread::spawn(move || {
                        lock.lock();
                        lock.lock();
                        assert!(lock.is_held());
                        lock.unlock().unwrap();
                        lock.unlock().unwrap();
                    })
                })
                .collect();

            for t in threads {
                t.join().unwrap();
            }

            assert!(!lock.is_locked());
        });
    }

    #[test]
    fn relock_while_held_is_a_violation() {
        crate::loom::model(|| {
            let lock: RecursiveSpinlock = RecursiveSpinlock::new();
            lock.lock();

            assert_eq!(
                lock.relock_all(3),
                Err(Error::ConcurrencyViolation { depth: 2 })
            );
            assert_eq!(lock.depth(), 1);

            lock.unlock().unwrap();
            assert!(!lock.is_locked());
        });
    }

    #[cfg(not(loom))]
    proptest::proptest! {
        #[test]
        fn unlock_all_relock_all_round_trip(depth in 1_usize..64) {
            let lock: RecursiveSpinlock = RecursiveSpinlock::new();
            for _ in 0..depth {
                lock.lock();
            }

            let saved = lock.unlock_all().unwrap();
            proptest::prop_assert_eq!(saved, depth);
            proptest::prop_assert!(!lock.is_locked());

            lock.relock_all(saved).unwrap();
            proptest::prop_assert_eq!(lock.depth(), depth);
            proptest::prop_assert!(lock.is_held());

            for _ in 0..depth {
                lock.unlock().unwrap();
            }
            proptest::prop_assert!(!lock.is_locked());
        }
    }
}
