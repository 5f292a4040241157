// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;
use core::marker::PhantomData;
use core::mem::ManuallyDrop;

use rtlock_spin::{
    Error, OwnerId, RawLock, Result, Spinlock, TrackedLock, loom_const_fn, with_lock,
};

use crate::loom::UnsafeCell;
use crate::loom::sync::atomic::{AtomicUsize, Ordering};
use crate::{Scheduler, Threads, WaitQueue, WaitQueueGuard};

/// An advisory lock which can be recursively locked by its owner.
///
/// Contended callers are suspended on an internal [`WaitQueue`] guarded by `L`. The owner and
/// the recursion count are only written while that guard is held.
///
/// With a [`CoopGuard`] and a cooperative scheduler this is the task-level lock ([`CoopLock`]):
/// it only coordinates tasks on one worker. With a [`Spinlock`] guard and [`Threads`] it is the
/// thread-safe lock ([`ThreadLock`]).
///
/// The lock does not protect any data by itself; see [`ReentrantLock::with`] and
/// [`ReentrantLock::guard`] for scoped use.
///
/// [`CoopGuard`]: crate::CoopGuard
/// [`CoopLock`]: crate::CoopLock
/// [`ThreadLock`]: crate::ThreadLock
pub struct ReentrantLock<L = Spinlock, S: Scheduler = Threads> {
    /// Zero exactly when unowned. Written under the guard, read racily by `is_locked`.
    count: AtomicUsize,
    /// # Safety
    ///
    /// Only accessed while the guard of `queue` is held.
    owner: UnsafeCell<OwnerId>,
    queue: WaitQueue<L, S>,
}

/// An RAII guard releasing one level of a [`ReentrantLock`] when dropped.
#[must_use = "if unused the ReentrantLock will immediately unlock"]
pub struct ReentrantLockGuard<'a, L: RawLock, S: Scheduler> {
    lock: &'a ReentrantLock<L, S>,
    _not_send: PhantomData<*const ()>,
}

// Safety: `owner` is only touched while holding the queue guard, see `WaitQueue`.
unsafe impl<L, S> Sync for ReentrantLock<L, S>
where
    L: RawLock + Sync,
    S: Scheduler + Sync,
    S::Unit: Send + Sync,
{
}

// === impl ReentrantLock ===

impl<L: RawLock + Default, S: Scheduler + Default> ReentrantLock<L, S> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_parts(L::default(), S::default())
    }
}

impl<L: RawLock, S: Scheduler> ReentrantLock<L, S> {
    loom_const_fn! {
        #[must_use]
        pub const fn with_parts(guard: L, scheduler: S) -> Self {
            Self {
                count: AtomicUsize::new(0),
                owner: UnsafeCell::new(OwnerId::None),
                queue: WaitQueue::with_scheduler(guard, scheduler),
            }
        }
    }

    /// Acquires the lock, suspending the caller while another execution unit owns it.
    ///
    /// # Errors
    ///
    /// Returns the error of the internal guard.
    ///
    /// # Panics
    ///
    /// Panics if the recursion count overflows.
    pub fn lock(&self) -> Result<()> {
        let me = self.queue.scheduler().current_owner();
        let mut held = self.queue.lock()?;

        loop {
            if self.try_acquire(&held, me) {
                return held.unlock();
            }

            log::trace!("reentrant lock {self:p} contended");
            held = held.wait()?;
        }
    }

    /// Attempts to acquire the lock without suspending.
    ///
    /// # Errors
    ///
    /// Returns the error of the internal guard.
    ///
    /// # Panics
    ///
    /// Panics if the recursion count overflows.
    pub fn try_lock(&self) -> Result<bool> {
        let me = self.queue.scheduler().current_owner();
        let held = self.queue.lock()?;
        let acquired = self.try_acquire(&held, me);
        held.unlock()?;
        Ok(acquired)
    }

    /// Releases one level of recursion, waking one waiter once the lock becomes free.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnlockCountMismatch`] if the lock is not held, and [`Error::NotOwner`]
    /// if it is held by a different execution unit. The lock is left untouched in both cases.
    pub fn unlock(&self) -> Result<()> {
        let held = self.queue.lock()?;
        let count = self.check_owner(&held)?;

        if count == 1 {
            self.release(&held);
        } else {
            self.count.store(count - 1, Ordering::Relaxed);
        }

        held.unlock()
    }

    /// Releases all levels of recursion at once, returning how many there were.
    ///
    /// # Errors
    ///
    /// Same as [`unlock`](Self::unlock).
    pub fn unlock_all(&self) -> Result<usize> {
        let held = self.queue.lock()?;
        let count = self.check_owner(&held)?;
        self.release(&held);
        held.unlock()?;
        Ok(count)
    }

    /// Re-acquires the lock and restores a depth returned by [`unlock_all`](Self::unlock_all).
    /// A depth of `0` does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConcurrencyViolation`] if the caller still owned the lock, in which
    /// case the depth is left unchanged, or the error of the internal guard.
    ///
    /// # Panics
    ///
    /// Panics if the recursion count overflows.
    pub fn relock_all(&self, depth: usize) -> Result<()> {
        if depth == 0 {
            return Ok(());
        }

        self.lock()?;

        let held = self.queue.lock()?;
        let count = self.count.load(Ordering::Relaxed);
        if count != 1 {
            self.count.store(count - 1, Ordering::Relaxed);
            held.unlock()?;
            log::debug!("relock_all found reentrant lock {self:p} at depth {count}");
            return Err(Error::ConcurrencyViolation { depth: count });
        }

        self.count.store(depth, Ordering::Relaxed);
        held.unlock()
    }

    /// Whether the lock is owned by anyone. Advisory only.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.count.load(Ordering::Relaxed) > 0
    }

    /// Whether the lock is owned by the caller.
    ///
    /// # Errors
    ///
    /// Returns the error of the internal guard.
    pub fn is_held(&self) -> Result<bool> {
        let me = self.queue.scheduler().current_owner();
        let held = self.queue.lock()?;
        let owner = self.load_owner(&held);
        held.unlock()?;
        Ok(owner == me)
    }

    /// The execution unit owning the lock. Stale once returned, unless the caller is the owner.
    ///
    /// # Errors
    ///
    /// Returns the error of the internal guard.
    pub fn owner(&self) -> Result<OwnerId> {
        let held = self.queue.lock()?;
        let owner = self.load_owner(&held);
        held.unlock()?;
        Ok(owner)
    }

    /// The recursion depth. Only meaningful when called by the owner.
    pub fn depth(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub fn scheduler(&self) -> &S {
        self.queue.scheduler()
    }

    /// Acquires one level of the lock, returning a guard that releases it when dropped.
    ///
    /// # Errors
    ///
    /// Same as [`lock`](Self::lock).
    ///
    /// # Panics
    ///
    /// Panics if the recursion count overflows.
    pub fn guard(&self) -> Result<ReentrantLockGuard<'_, L, S>> {
        self.lock()?;
        Ok(ReentrantLockGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    /// Runs `f` while holding one level of the lock, releasing it on every exit path.
    ///
    /// # Errors
    ///
    /// Returns the error of acquiring or releasing the lock.
    pub fn with<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> R,
    {
        with_lock(self, f)
    }

    /// Takes the lock if it is free or already owned by `me`.
    fn try_acquire(&self, held: &WaitQueueGuard<'_, L, S>, me: OwnerId) -> bool {
        let count = self.count.load(Ordering::Relaxed);

        if count == 0 {
            self.store_owner(held, me);
            self.count.store(1, Ordering::Relaxed);
            true
        } else if self.load_owner(held) == me {
            let count = count
                .checked_add(1)
                .expect("ReentrantLock lock count overflow");
            self.count.store(count, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Returns the current depth if the caller owns the lock.
    fn check_owner(&self, held: &WaitQueueGuard<'_, L, S>) -> Result<usize> {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return Err(Error::UnlockCountMismatch);
        }

        let caller = self.queue.scheduler().current_owner();
        let owner = self.load_owner(held);
        if owner != caller {
            let err = Error::NotOwner { owner, caller };
            log::debug!("{err}");
            return Err(err);
        }

        Ok(count)
    }

    fn release(&self, held: &WaitQueueGuard<'_, L, S>) {
        self.count.store(0, Ordering::Relaxed);
        self.store_owner(held, OwnerId::None);
        held.notify(false);
    }

    fn load_owner(&self, _held: &WaitQueueGuard<'_, L, S>) -> OwnerId {
        self.owner.with(|owner| {
            // Safety: `_held` proves the guard is held
            unsafe { *owner }
        })
    }

    fn store_owner(&self, _held: &WaitQueueGuard<'_, L, S>, new: OwnerId) {
        self.owner.with_mut(|owner| {
            // Safety: `_held` proves the guard is held
            unsafe {
                *owner = new;
            }
        });
    }
}

impl<L: RawLock + Default, S: Scheduler + Default> Default for ReentrantLock<L, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: RawLock, S: Scheduler> fmt::Debug for ReentrantLock<L, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReentrantLock")
            .field("count", &self.count.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

// Safety: if `L` is `Sync` it excludes other threads from the owner and count, and a unit only
// becomes owner by finding the lock free or already owned by itself under that guard. If `L`
// is not `Sync`, neither is the lock.
unsafe impl<L: RawLock, S: Scheduler> RawLock for ReentrantLock<L, S> {
    #[inline]
    fn lock(&self) -> Result<()> {
        ReentrantLock::lock(self)
    }

    #[inline]
    fn try_lock(&self) -> Result<bool> {
        ReentrantLock::try_lock(self)
    }

    #[inline]
    fn unlock(&self) -> Result<()> {
        ReentrantLock::unlock(self)
    }

    #[inline]
    fn is_locked(&self) -> bool {
        ReentrantLock::is_locked(self)
    }

    #[inline]
    fn unlock_all(&self) -> Result<usize> {
        ReentrantLock::unlock_all(self)
    }

    #[inline]
    fn relock_all(&self, depth: usize) -> Result<()> {
        ReentrantLock::relock_all(self, depth)
    }
}

// Safety: the owner is read under the guard and only ever set to the caller's own identity.
unsafe impl<L: RawLock, S: Scheduler> TrackedLock for ReentrantLock<L, S> {
    /// A failing guard counts as "not held", so checked waits report [`Error::NotLocked`].
    fn is_held(&self) -> bool {
        ReentrantLock::is_held(self).unwrap_or_else(|err| {
            log::debug!("failed to inspect reentrant lock {self:p}: {err}");
            false
        })
    }
}

// === impl ReentrantLockGuard ===

impl<L: RawLock, S: Scheduler> ReentrantLockGuard<'_, L, S> {
    /// Releases the level held by this guard.
    ///
    /// # Errors
    ///
    /// Same as [`ReentrantLock::unlock`].
    pub fn unlock(self) -> Result<()> {
        let this = ManuallyDrop::new(self);
        this.lock.unlock()
    }
}

impl<L: RawLock, S: Scheduler> Drop for ReentrantLockGuard<'_, L, S> {
    fn drop(&mut self) {
        if let Err(err) = self.lock.unlock() {
            log::error!("failed to release reentrant lock: {err}");
        }
    }
}

impl<L: RawLock, S: Scheduler> fmt::Debug for ReentrantLockGuard<'_, L, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReentrantLockGuard")
            .field("lock", self.lock)
            .finish()
    }
}
