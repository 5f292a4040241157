// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;
use core::marker::PhantomData;
use core::mem::{self, ManuallyDrop};
use core::pin::pin;
use core::ptr::{self, NonNull};

use cordyceps::{Linked, List, list};
use rtlock_spin::{Error, RawLock, Result, TrackedLock, loom_const_fn};

use crate::loom::UnsafeCell;
use crate::loom::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use crate::{Scheduler, Threads};

/// A queue of suspended execution units which can be woken in first-in, first-out order, or
/// all at once.
///
/// Every `WaitQueue` is bound to a guard `L` that protects the queue *and* whatever state the
/// waiters are waiting on. The guard may be a [`CoopGuard`] for cooperatively scheduled tasks,
/// or a real lock such as a [`Spinlock`] (the queue then owns the guard) or a reference to a
/// lock that lives elsewhere, such as `&ThreadLock` (see [`Condition`]).
///
/// Waiting and notifying require holding the guard. The guard is held by the
/// [`WaitQueueGuard`] returned from [`WaitQueue::lock`], or, for guards that know their owner,
/// checked at runtime by [`WaitQueue::wait`] and [`WaitQueue::notify`].
///
/// # Implementation Notes
///
/// The queue is an intrusive doubly-linked list. Each node lives in the stack frame of the
/// waiting unit, so waiting does not allocate. The frame is not left before the node was
/// either popped by a notifier or unlinked again by the waiter itself, which happens when
/// suspending unwinds.
///
/// A waiter is linked *before* the guard is released. A notifier has to hold the guard to
/// pop waiters, so it either runs before the waiter took the guard (and the waiter sees the
/// changed state before enqueueing) or finds the waiter in the queue. A notification can
/// therefore never slip between the release and the suspend.
///
/// [`CoopGuard`]: crate::CoopGuard
/// [`Spinlock`]: rtlock_spin::Spinlock
/// [`Condition`]: crate::Condition
pub struct WaitQueue<L, S: Scheduler = Threads> {
    guard: L,
    scheduler: S,
    /// The waiters, newest at the front.
    ///
    /// # Safety
    ///
    /// Only accessed while `guard` is held.
    waiters: UnsafeCell<List<Waiter<S::Unit>>>,
    /// Mirrors the length of `waiters` for lock-free introspection.
    len: AtomicUsize,
}

/// A node in the waiter list.
struct Waiter<U> {
    links: list::Links<Self>,
    unit: U,
    /// Set by the notifier that popped this node. The node must not be touched by anyone but
    /// its owner afterwards.
    notified: AtomicBool,
}

/// Unlinks a waiter that is dropped without having been notified.
struct Unlink<'a, L: RawLock, S: Scheduler> {
    queue: &'a WaitQueue<L, S>,
    waiter: NonNull<Waiter<S::Unit>>,
}

/// Proof that the guard of a [`WaitQueue`] is held, releasing it when dropped.
///
/// The guard is released on the thread that acquired it, so this type is `!Send`.
#[must_use = "if unused the guard will immediately be released"]
pub struct WaitQueueGuard<'a, L: RawLock, S: Scheduler> {
    queue: &'a WaitQueue<L, S>,
    _not_send: PhantomData<*const ()>,
}

// Safety: the waiters are only touched while holding `guard`, which excludes every other
// thread since `L: RawLock + Sync`.
unsafe impl<L, S> Sync for WaitQueue<L, S>
where
    L: RawLock + Sync,
    S: Scheduler + Sync,
    S::Unit: Send + Sync,
{
}

// === impl WaitQueue ===

impl<L: RawLock, S: Scheduler + Default> WaitQueue<L, S> {
    #[must_use]
    pub fn new(guard: L) -> Self {
        Self::with_scheduler(guard, S::default())
    }
}

impl<L: RawLock, S: Scheduler> WaitQueue<L, S> {
    loom_const_fn! {
        #[must_use]
        pub const fn with_scheduler(guard: L, scheduler: S) -> Self {
            Self {
                guard,
                scheduler,
                waiters: UnsafeCell::new(List::new()),
                len: AtomicUsize::new(0),
            }
        }
    }

    /// Acquires the guard.
    ///
    /// # Errors
    ///
    /// Returns the error of acquiring the guard.
    pub fn lock(&self) -> Result<WaitQueueGuard<'_, L, S>> {
        self.guard.lock()?;
        Ok(WaitQueueGuard::new(self))
    }

    /// Attempts to acquire the guard without blocking.
    ///
    /// # Errors
    ///
    /// Returns the error of acquiring the guard.
    pub fn try_lock(&self) -> Result<Option<WaitQueueGuard<'_, L, S>>> {
        Ok(self.guard.try_lock()?.then(|| WaitQueueGuard::new(self)))
    }

    /// Whether any execution unit is waiting. Advisory only, unless the guard is held.
    pub fn has_waiters(&self) -> bool {
        self.len.load(Ordering::Relaxed) > 0
    }

    pub fn guard(&self) -> &L {
        &self.guard
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// # Safety
    ///
    /// The caller must hold the guard.
    unsafe fn wait_unchecked(&self) -> Result<()> {
        let waiter = pin!(Waiter {
            links: list::Links::new(),
            unit: self.scheduler.current(),
            notified: AtomicBool::new(false),
        });
        let waiter = waiter.into_ref();
        // every field the list or a notifier mutates is interior mutable, so a pointer derived
        // from a shared reference is fine
        let ptr = NonNull::from(waiter.get_ref());

        // Safety: ensured by caller
        unsafe { self.with_waiters(|waiters| waiters.push_front(ptr)) };
        self.len.fetch_add(1, Ordering::Relaxed);
        let unlink = Unlink {
            queue: self,
            waiter: ptr,
        };

        let depth = match self.guard.unlock_all() {
            Ok(depth) => depth,
            Err(err) => {
                // the release failed, so we still hold the guard and nobody else has seen the
                // waiter
                mem::forget(unlink);
                // Safety: ensured by caller, and the waiter is linked
                unsafe { self.unlink(ptr) };
                return Err(err);
            }
        };

        log::trace!("suspending on wait queue {self:p} (depth {depth})");
        while !waiter.notified.load(Ordering::Acquire) {
            self.scheduler.suspend();
        }
        log::trace!("woken on wait queue {self:p}");

        drop(unlink);
        self.guard.relock_all(depth)
    }

    /// # Safety
    ///
    /// The caller must hold the guard.
    unsafe fn notify_unchecked(&self, all: bool) -> usize {
        let mut woken = 0;

        // Safety: ensured by caller
        while let Some(ptr) = unsafe { self.with_waiters(|waiters| waiters.pop_back()) } {
            // Safety: a linked waiter stays alive until it observes `notified`
            let unit = unsafe { ptr.as_ref().unit.clone() };
            // Safety: see above. The waiter may return as soon as the store is visible.
            unsafe { ptr.as_ref().notified.store(true, Ordering::Release) };
            self.scheduler.resume(unit);

            woken += 1;
            if !all {
                break;
            }
        }

        self.len.fetch_sub(woken, Ordering::Relaxed);
        woken
    }

    /// # Safety
    ///
    /// The caller must hold the guard and `waiter` must be linked into this queue.
    unsafe fn unlink(&self, waiter: NonNull<Waiter<S::Unit>>) {
        // Safety: ensured by caller
        unsafe {
            self.with_waiters(|waiters| waiters.remove(waiter));
        }
        self.len.fetch_sub(1, Ordering::Relaxed);
    }

    /// # Safety
    ///
    /// The caller must hold the guard.
    unsafe fn with_waiters<R>(&self, f: impl FnOnce(&mut List<Waiter<S::Unit>>) -> R) -> R {
        self.waiters.with_mut(|waiters| {
            // Safety: ensured by caller
            f(unsafe { &mut *waiters })
        })
    }
}

impl<L: TrackedLock, S: Scheduler> WaitQueue<L, S> {
    /// Suspends the caller until notified.
    ///
    /// The caller must hold the guard. It is released completely, even if it was acquired
    /// recursively, and re-acquired at its previous depth before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotLocked`] if the caller does not hold the guard, or the error of
    /// releasing or re-acquiring it.
    pub fn wait(&self) -> Result<()> {
        if !self.guard.is_held() {
            return Err(Error::NotLocked);
        }

        // Safety: checked above
        unsafe { self.wait_unchecked() }
    }

    /// Wakes the oldest waiter, or every waiter if `all` is set, returning how many were woken.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotLocked`] if the caller does not hold the guard.
    pub fn notify(&self, all: bool) -> Result<usize> {
        if !self.guard.is_held() {
            return Err(Error::NotLocked);
        }

        // Safety: checked above
        Ok(unsafe { self.notify_unchecked(all) })
    }
}

impl<L: Default + RawLock, S: Scheduler + Default> Default for WaitQueue<L, S> {
    fn default() -> Self {
        Self::new(L::default())
    }
}

impl<L: fmt::Debug, S: Scheduler> fmt::Debug for WaitQueue<L, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitQueue")
            .field("guard", &self.guard)
            .field("waiters", &self.len.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

// === impl Waiter ===

// Safety: waiters are pinned in the frame of the waiting unit, which does not return before
// the node is unlinked.
unsafe impl<U> Linked<list::Links<Self>> for Waiter<U> {
    type Handle = NonNull<Self>;

    fn into_ptr(r: Self::Handle) -> NonNull<Self> {
        r
    }

    unsafe fn from_ptr(ptr: NonNull<Self>) -> Self::Handle {
        ptr
    }

    unsafe fn links(target: NonNull<Self>) -> NonNull<list::Links<Self>> {
        // Safety: `target` points to a live waiter, ensured by the caller. Using
        // `addr_of_mut!` avoids creating a temporary reference.
        unsafe { NonNull::new_unchecked(ptr::addr_of_mut!((*target.as_ptr()).links)) }
    }
}

impl<L: RawLock, S: Scheduler> Drop for Unlink<'_, L, S> {
    fn drop(&mut self) {
        // Safety: the waiter outlives this guard
        let notified = unsafe { self.waiter.as_ref().notified.load(Ordering::Acquire) };
        if notified {
            return;
        }

        // only a panic while suspended gets here. The node is about to be freed, so it has to
        // leave the list no matter what.
        if let Err(err) = self.queue.guard.lock() {
            log::error!("cannot unlink waiter from wait queue {:p}: {err}", self.queue);
            std::process::abort();
        }
        // `notified` only changes under the guard, so this check is final
        // Safety: the waiter outlives this guard
        if !unsafe { self.waiter.as_ref().notified.load(Ordering::Acquire) } {
            // Safety: we hold the guard and the waiter was not popped
            unsafe { self.queue.unlink(self.waiter) };
        }
        if let Err(err) = self.queue.guard.unlock() {
            log::error!("failed to release wait queue guard: {err}");
        }
    }
}

// === impl WaitQueueGuard ===

impl<'a, L: RawLock, S: Scheduler> WaitQueueGuard<'a, L, S> {
    fn new(queue: &'a WaitQueue<L, S>) -> Self {
        Self {
            queue,
            _not_send: PhantomData,
        }
    }

    /// Suspends the caller until notified, releasing the guard in the meantime.
    ///
    /// # Errors
    ///
    /// Returns the error of releasing or re-acquiring the guard. The guard is then no longer
    /// considered held by this `WaitQueueGuard`.
    pub fn wait(self) -> Result<Self> {
        let this = ManuallyDrop::new(self);
        // Safety: `this` proves the guard is held
        unsafe { this.queue.wait_unchecked()? };
        Ok(ManuallyDrop::into_inner(this))
    }

    /// Wakes the oldest waiter, or every waiter if `all` is set, returning how many were woken.
    pub fn notify(&self, all: bool) -> usize {
        // Safety: `self` proves the guard is held
        unsafe { self.queue.notify_unchecked(all) }
    }

    /// Releases the guard, returning the error the guard reports.
    ///
    /// # Errors
    ///
    /// Returns the error of releasing the guard.
    pub fn unlock(self) -> Result<()> {
        let this = ManuallyDrop::new(self);
        this.queue.guard.unlock()
    }

    pub fn queue(&self) -> &'a WaitQueue<L, S> {
        self.queue
    }
}

impl<L: RawLock, S: Scheduler> Drop for WaitQueueGuard<'_, L, S> {
    fn drop(&mut self) {
        if let Err(err) = self.queue.guard.unlock() {
            log::error!("failed to release wait queue guard: {err}");
        }
    }
}

impl<L: RawLock, S: Scheduler> fmt::Debug for WaitQueueGuard<'_, L, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitQueueGuard")
            .field("queue", &format_args!("{:p}", self.queue))
            .finish()
    }
}
