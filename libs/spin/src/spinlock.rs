// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;

use crate::loom::sync::atomic::{AtomicBool, Ordering};
use crate::{Backoff, Collector, NoCollector, RawLock, Result, loom_const_fn};

/// A non-reentrant test-and-test-and-set spinlock.
///
/// Waiters spin on a plain load until the lock looks free and only then attempt the atomic
/// exchange, which keeps the cache line shared while the lock is contended. Every retry polls
/// the collector's safepoint (see [`Backoff::spin`]).
///
/// Locking the spinlock again from the thread that holds it spins forever.
pub struct Spinlock<C = NoCollector> {
    handle: AtomicBool,
    collector: C,
}

/// A data-carrying mutex backed by [`Spinlock`].
#[cfg(not(loom))]
pub type SpinMutex<T, C = NoCollector> = lock_api::Mutex<Spinlock<C>, T>;
#[cfg(not(loom))]
pub type SpinMutexGuard<'a, T, C = NoCollector> = lock_api::MutexGuard<'a, Spinlock<C>, T>;

// === impl Spinlock ===

impl<C: Collector> Spinlock<C> {
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
                handle: AtomicBool::new(false),
                collector,
            }
        }
    }

    pub fn lock(&self) {
        if self.try_lock() {
            return;
        }

        log::trace!("spinlock {self:p} contended");
        let mut boff = Backoff::new();
        loop {
            while self.is_locked() {
                boff.spin(&self.collector);
            }

            if self.try_lock() {
                return;
            }
            boff.spin(&self.collector);
        }
    }

    pub fn try_lock(&self) -> bool {
        self.collector.inhibit_finalizers();

        if self
            .handle
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            true
        } else {
            self.collector.allow_finalizers();
            false
        }
    }

    /// Releases the lock.
    ///
    /// This does not check who holds the lock; releasing a lock held by another thread breaks
    /// mutual exclusion.
    pub fn unlock(&self) {
        self.handle.swap(false, Ordering::Release);
        self.collector.allow_finalizers();
        self.collector.cpu_wake();
    }

    /// Whether the lock is currently held.
    ///
    /// The result is stale the moment it is returned. It is meant for assertions and
    /// diagnostics, not for deciding whether to touch protected state.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.handle.load(Ordering::Relaxed)
    }

    pub fn collector(&self) -> &C {
        &self.collector
    }
}

impl<C: Collector> Default for Spinlock<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for Spinlock<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spinlock")
            .field("locked", &self.handle.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

// Safety: see the `lock_api::RawMutex` impl below.
unsafe impl<C: Collector> RawLock for Spinlock<C> {
    #[inline]
    fn lock(&self) -> Result<()> {
        Spinlock::lock(self);
        Ok(())
    }

    #[inline]
    fn try_lock(&self) -> Result<bool> {
        Ok(Spinlock::try_lock(self))
    }

    #[inline]
    fn unlock(&self) -> Result<()> {
        Spinlock::unlock(self);
        Ok(())
    }

    #[inline]
    fn is_locked(&self) -> bool {
        Spinlock::is_locked(self)
    }
}

// Safety: `lock`/`try_lock` only return after winning the `false -> true` transition with
// acquire ordering, and `unlock` publishes the critical section with release ordering.
#[cfg(not(loom))]
unsafe impl<C: Collector> lock_api::RawMutex for Spinlock<C> {
    const INIT: Self = Self {
        handle: AtomicBool::new(false),
        collector: C::INIT,
    };

    // finalizer inhibition is tracked per thread, so the guard must be released where it was
    // taken
    type GuardMarker = lock_api::GuardNoSend;

    fn lock(&self) {
        Spinlock::lock(self);
    }

    fn try_lock(&self) -> bool {
        Spinlock::try_lock(self)
    }

    unsafe fn unlock(&self) {
        Spinlock::unlock(self);
    }

    fn is_locked(&self) -> bool {
        Spinlock::is_locked(self)
    }
}
