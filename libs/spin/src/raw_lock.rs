// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::{Error, Result};

/// A mutual-exclusion primitive that higher-level locks and wait queues can be built on.
///
/// This is the seam that lets the same wait-queue and reentrant-lock logic run on top of a
/// cooperative no-op guard, a spinlock, a recursive spinlock or an OS mutex.
///
/// # Safety
///
/// If the implementing type is `Sync`, a successful [`RawLock::lock`] or [`RawLock::try_lock`]
/// must exclude every other thread from acquiring the lock until the matching release, and
/// the release must happen-before the next acquisition. Types that are `!Sync` are confined
/// to one thread and may implement the lock as a no-op.
pub unsafe trait RawLock {
    /// Acquires the lock, blocking (or spinning) until it is available.
    ///
    /// # Errors
    ///
    /// Returns an error if acquiring would deadlock or the underlying resource failed.
    fn lock(&self) -> Result<()>;

    /// Attempts to acquire the lock without blocking, returning whether it was acquired.
    ///
    /// # Errors
    ///
    /// Returns an error if the attempt itself is a contract violation (e.g. self-deadlock).
    fn try_lock(&self) -> Result<bool>;

    /// Releases one level of the lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the caller is not allowed to release the lock.
    fn unlock(&self) -> Result<()>;

    /// Whether the lock is held by anyone.
    ///
    /// This is a racy snapshot and must not be used for synchronization decisions.
    fn is_locked(&self) -> bool;

    /// Releases every level of the lock held by the caller, returning the previous depth.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`RawLock::unlock`].
    fn unlock_all(&self) -> Result<usize> {
        self.unlock()?;
        Ok(1)
    }

    /// Re-acquires the lock and restores a depth previously returned by
    /// [`RawLock::unlock_all`]. A depth of `0` restores "not held" and does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConcurrencyViolation`] if, after re-acquiring, the lock was not held
    /// exactly once. The lock is then left at its prior depth.
    fn relock_all(&self, depth: usize) -> Result<()> {
        if depth == 0 {
            return Ok(());
        }

        self.lock()?;
        if depth == 1 {
            Ok(())
        } else {
            self.unlock()?;
            Err(Error::ConcurrencyViolation { depth: 1 })
        }
    }
}

/// A [`RawLock`] that knows which execution unit holds it.
///
/// # Safety
///
/// If the implementing type is `Sync`, [`TrackedLock::is_held`] must only return `true` when
/// the calling execution unit holds the lock.
pub unsafe trait TrackedLock: RawLock {
    /// Whether the lock is held by the caller.
    fn is_held(&self) -> bool;
}

// No impl for `Arc<L>`: it would shadow the inherent methods of every `Arc<Spinlock>`
// while `RawLock` is in scope.

// Safety: forwards to `L`, which upholds the contract.
unsafe impl<L: RawLock + ?Sized> RawLock for &L {
    #[inline]
    fn lock(&self) -> Result<()> {
        (**self).lock()
    }
    #[inline]
    fn try_lock(&self) -> Result<bool> {
        (**self).try_lock()
    }
    #[inline]
    fn unlock(&self) -> Result<()> {
        (**self).unlock()
    }
    #[inline]
    fn is_locked(&self) -> bool {
        (**self).is_locked()
    }
    #[inline]
    fn unlock_all(&self) -> Result<usize> {
        (**self).unlock_all()
    }
    #[inline]
    fn relock_all(&self, depth: usize) -> Result<()> {
        (**self).relock_all(depth)
    }
}

// Safety: forwards to `L`, which upholds the contract.
unsafe impl<L: TrackedLock + ?Sized> TrackedLock for &L {
    #[inline]
    fn is_held(&self) -> bool {
        (**self).is_held()
    }
}

/// Runs `f` while holding `lock`.
///
/// The lock is released on every exit path: after `f` returns, and when `f` unwinds.
///
/// # Errors
///
/// Returns the error of acquiring or of releasing the lock. If `f` already ran, its result is
/// dropped in favour of the release error.
pub fn with_lock<L, F, R>(lock: &L, f: F) -> Result<R>
where
    L: RawLock + ?Sized,
    F: FnOnce() -> R,
{
    struct Release<'a, L: RawLock + ?Sized> {
        lock: &'a L,
        armed: bool,
    }

    impl<L: RawLock + ?Sized> Drop for Release<'_, L> {
        fn drop(&mut self) {
            if !self.armed {
                return;
            }
            if let Err(err) = self.lock.unlock() {
                log::error!("failed to release lock while unwinding: {err}");
            }
        }
    }

    lock.lock()?;
    let mut release = Release { lock, armed: true };
    let ret = f();
    release.armed = false;
    lock.unlock()?;
    Ok(ret)
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::Spinlock;
    use std::sync::Arc;
    use std::panic::{self, AssertUnwindSafe};

    #[test]
    fn with_lock_releases_after_success() {
        let lock: Spinlock = Spinlock::new();

        let out = with_lock(&lock, || {
            assert!(lock.is_locked());
            42
        });

        assert_eq!(out, Ok(42));
        assert!(!lock.is_locked());
    }

    #[test]
    fn with_lock_releases_on_unwind() {
        let lock: Spinlock = Spinlock::new();

        let res = panic::catch_unwind(AssertUnwindSafe(|| {
            with_lock(&lock, || panic!("boom")).unwrap();
        }));

        assert!(res.is_err());
        assert!(!lock.is_locked());
    }

    #[test]
    fn forwarding_through_reference() {
        let lock: Spinlock = Spinlock::new();
        let by_ref = &lock;

        assert_eq!(RawLock::try_lock(&by_ref), Ok(true));
        assert_eq!(RawLock::try_lock(&by_ref), Ok(false));
        assert_eq!(RawLock::unlock_all(&by_ref), Ok(1));
        assert!(!RawLock::is_locked(&by_ref));
    }

    #[test]
    fn inherent_methods_win_through_arc() {
        let lock: Arc<Spinlock> = Arc::new(Spinlock::new());

        lock.lock();
        let acquired: bool = lock.try_lock();
        assert!(!acquired);
        lock.unlock();
        assert!(!lock.is_locked());
    }

    #[test]
    fn default_relock_all_rejects_depth_above_one() {
        let lock: Spinlock = Spinlock::new();

        assert_eq!(lock.relock_all(0), Ok(()));
        assert!(!lock.is_locked());

        assert_eq!(
            lock.relock_all(2),
            Err(Error::ConcurrencyViolation { depth: 1 })
        );
        assert!(!lock.is_locked());

        assert_eq!(lock.relock_all(1), Ok(()));
        assert!(lock.is_locked());
    }
}
