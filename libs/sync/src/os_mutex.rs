// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::cell::UnsafeCell;
use core::fmt;
use core::mem;
use std::sync::atomic::{AtomicUsize, Ordering};

use rtlock_spin::{
    Collector, Error, GcSafeRegion, NoCollector, OwnerId, RawLock, Result, TrackedLock,
    current_thread_id,
};

/// A mutex backed by the platform's blocking mutex (`pthread_mutex_t`).
///
/// Meant for critical sections too long to spin through. A thread blocked in
/// [`lock`](Self::lock) is GC-safe for as long as it is blocked.
///
/// The mutex is not reentrant: locking it again from the owning thread fails with
/// [`Error::SelfDeadlock`] instead of blocking forever.
///
/// The platform mutex is released by [`destroy`](Self::destroy), or when the `OsMutex` is
/// dropped. A mutex that is still held at that point is leaked.
pub struct OsMutex<C = NoCollector> {
    /// Boxed so it never moves once it has been used. `None` once destroyed.
    raw: Option<Box<UnsafeCell<libc::pthread_mutex_t>>>,
    /// Thread id of the owner, `0` if unowned. Written only by the owner.
    owner: AtomicUsize,
    collector: C,
}

// Safety: pthread mutexes may be used and released from any thread.
unsafe impl<C: Send> Send for OsMutex<C> {}
// Safety: see above; the owner word is atomic.
unsafe impl<C: Sync> Sync for OsMutex<C> {}

impl<C: Collector> OsMutex<C> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_collector(C::INIT)
    }

    #[must_use]
    pub fn with_collector(collector: C) -> Self {
        Self {
            raw: Some(Box::new(UnsafeCell::new(libc::PTHREAD_MUTEX_INITIALIZER))),
            owner: AtomicUsize::new(0),
            collector,
        }
    }

    /// Acquires the mutex, blocking the calling thread until it is available.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SelfDeadlock`] if the calling thread already holds the mutex,
    /// [`Error::Destroyed`] if it has been destroyed, and [`Error::Os`] if the platform call
    /// fails.
    pub fn lock(&self) -> Result<()> {
        let (raw, me) = self.prepare()?;

        // Safety: `raw` points to an initialized mutex that lives as long as `self`
        let mut rc = unsafe { libc::pthread_mutex_trylock(raw) };
        if rc == libc::EBUSY {
            log::trace!("os mutex {self:p} contended, blocking");
            let _region = GcSafeRegion::enter(&self.collector);
            // Safety: see above
            rc = unsafe { libc::pthread_mutex_lock(raw) };
        }

        if rc != 0 {
            return Err(Error::Os(rc));
        }
        self.owner.store(me, Ordering::Relaxed);
        Ok(())
    }
}

impl<C> OsMutex<C> {
    /// Attempts to acquire the mutex without blocking.
    ///
    /// # Errors
    ///
    /// Same as [`lock`](Self::lock).
    pub fn try_lock(&self) -> Result<bool> {
        let (raw, me) = self.prepare()?;

        // Safety: `raw` points to an initialized mutex that lives as long as `self`
        match unsafe { libc::pthread_mutex_trylock(raw) } {
            0 => {
                self.owner.store(me, Ordering::Relaxed);
                Ok(true)
            }
            libc::EBUSY => Ok(false),
            rc => Err(Error::Os(rc)),
        }
    }

    /// Releases the mutex.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnlockCountMismatch`] if the mutex is not held, [`Error::NotOwner`] if
    /// another thread holds it, [`Error::Destroyed`] if it has been destroyed, and
    /// [`Error::Os`] if the platform call fails.
    pub fn unlock(&self) -> Result<()> {
        let raw = self.raw()?;
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

        self.owner.store(0, Ordering::Relaxed);
        // Safety: `raw` points to an initialized mutex held by the calling thread
        match unsafe { libc::pthread_mutex_unlock(raw) } {
            0 => Ok(()),
            rc => {
                self.owner.store(me, Ordering::Relaxed);
                Err(Error::Os(rc))
            }
        }
    }

    /// Whether the mutex is held by any thread. Advisory only.
    pub fn is_locked(&self) -> bool {
        self.owner.load(Ordering::Relaxed) != 0
    }

    /// Whether the mutex is held by the calling thread.
    pub fn is_held(&self) -> bool {
        self.owner.load(Ordering::Relaxed) == current_thread_id().get()
    }

    pub fn is_destroyed(&self) -> bool {
        self.raw.is_none()
    }

    /// Releases the platform mutex. Calling this more than once does nothing.
    ///
    /// If the mutex is still held it cannot be destroyed safely and is leaked instead.
    pub fn destroy(&mut self) {
        let Some(raw) = self.raw.take() else {
            return;
        };

        if *self.owner.get_mut() != 0 {
            log::warn!("os mutex {self:p} destroyed while held, leaking it");
            mem::forget(raw);
            return;
        }

        // Safety: the mutex is initialized and unlocked, and nobody else can reach it
        let rc = unsafe { libc::pthread_mutex_destroy(raw.get()) };
        if rc != 0 {
            log::warn!("failed to destroy os mutex {self:p}: {rc}");
        }
    }

    fn raw(&self) -> Result<*mut libc::pthread_mutex_t> {
        self.raw
            .as_deref()
            .map(UnsafeCell::get)
            .ok_or(Error::Destroyed)
    }

    /// Checks that the mutex can be locked by the caller.
    fn prepare(&self) -> Result<(*mut libc::pthread_mutex_t, usize)> {
        let raw = self.raw()?;
        let me = current_thread_id().get();

        // only this thread could have stored its own id
        if self.owner.load(Ordering::Relaxed) == me {
            log::debug!("os mutex {self:p} locked again by its owner");
            return Err(Error::SelfDeadlock);
        }

        Ok((raw, me))
    }
}

impl<C: Collector> Default for OsMutex<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Drop for OsMutex<C> {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl<C> fmt::Debug for OsMutex<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OsMutex")
            .field("owner", &self.owner.load(Ordering::Relaxed))
            .field("destroyed", &self.raw.is_none())
            .finish_non_exhaustive()
    }
}

// Safety: `pthread_mutex_lock`/`trylock` only return success to a single thread at a time, and
// the platform mutex provides acquire/release ordering.
unsafe impl<C: Collector> RawLock for OsMutex<C> {
    #[inline]
    fn lock(&self) -> Result<()> {
        OsMutex::lock(self)
    }

    #[inline]
    fn try_lock(&self) -> Result<bool> {
        OsMutex::try_lock(self)
    }

    #[inline]
    fn unlock(&self) -> Result<()> {
        OsMutex::unlock(self)
    }

    #[inline]
    fn is_locked(&self) -> bool {
        OsMutex::is_locked(self)
    }
}

// Safety: the owner word holds the caller's id only if the caller stored it after acquiring.
unsafe impl<C: Collector> TrackedLock for OsMutex<C> {
    #[inline]
    fn is_held(&self) -> bool {
        OsMutex::is_held(self)
    }
}
