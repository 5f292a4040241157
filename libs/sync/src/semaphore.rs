// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;

use rtlock_spin::{Error, RawLock, Result, Spinlock};

use crate::loom::sync::atomic::{AtomicUsize, Ordering};
use crate::{Scheduler, Threads, WaitQueue};

/// A counting semaphore bounding the number of concurrent holders of a resource.
///
/// Callers [`acquire`](Self::acquire) a permit before using the resource and
/// [`release`](Self::release) it afterwards. When all permits are taken, acquiring suspends the
/// caller until a permit is released.
pub struct Semaphore<L = Spinlock, S: Scheduler = Threads> {
    capacity: usize,
    /// Written under the queue guard.
    in_use: AtomicUsize,
    queue: WaitQueue<L, S>,
}

impl<L: RawLock + Default, S: Scheduler + Default> Semaphore<L, S> {
    /// Returns a semaphore with `capacity` permits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCapacity`] if `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self> {
        Self::with_parts(capacity, L::default(), S::default())
    }
}

impl<L: RawLock, S: Scheduler> Semaphore<L, S> {
    /// Returns a semaphore with `capacity` permits, using the provided guard and scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCapacity`] if `capacity` is zero.
    pub fn with_parts(capacity: usize, guard: L, scheduler: S) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidCapacity);
        }

        Ok(Self {
            capacity,
            in_use: AtomicUsize::new(0),
            queue: WaitQueue::with_scheduler(guard, scheduler),
        })
    }

    /// Takes a permit, suspending the caller until one is available.
    ///
    /// # Errors
    ///
    /// Returns the error of the internal guard.
    pub fn acquire(&self) -> Result<()> {
        let mut held = self.queue.lock()?;

        loop {
            let in_use = self.in_use.load(Ordering::Relaxed);
            if in_use < self.capacity {
                self.in_use.store(in_use + 1, Ordering::Relaxed);
                return held.unlock();
            }

            log::trace!("semaphore {self:p} exhausted");
            // another waiter may have taken the permit we were woken for
            held = held.wait()?;
        }
    }

    /// Takes a permit if one is available, without suspending.
    ///
    /// # Errors
    ///
    /// Returns the error of the internal guard.
    pub fn try_acquire(&self) -> Result<bool> {
        let held = self.queue.lock()?;

        let in_use = self.in_use.load(Ordering::Relaxed);
        let acquired = in_use < self.capacity;
        if acquired {
            self.in_use.store(in_use + 1, Ordering::Relaxed);
        }

        held.unlock()?;
        Ok(acquired)
    }

    /// Returns a permit, waking one waiter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ExcessRelease`] if no permit is taken.
    pub fn release(&self) -> Result<()> {
        let held = self.queue.lock()?;

        let in_use = self.in_use.load(Ordering::Relaxed);
        if in_use == 0 {
            log::debug!("semaphore {self:p} released more often than acquired");
            return Err(Error::ExcessRelease);
        }

        self.in_use.store(in_use - 1, Ordering::Relaxed);
        held.notify(false);
        held.unlock()
    }

    /// Runs `f` while holding a permit, returning it on every exit path.
    ///
    /// # Errors
    ///
    /// Returns the error of acquiring or releasing the permit.
    pub fn with_permit<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> R,
    {
        struct Permit<'a, L: RawLock, S: Scheduler> {
            sem: &'a Semaphore<L, S>,
            armed: bool,
        }

        impl<L: RawLock, S: Scheduler> Drop for Permit<'_, L, S> {
            fn drop(&mut self) {
                if !self.armed {
                    return;
                }
                if let Err(err) = self.sem.release() {
                    log::error!("failed to return semaphore permit while unwinding: {err}");
                }
            }
        }

        self.acquire()?;
        let mut permit = Permit {
            sem: self,
            armed: true,
        };
        let ret = f();
        permit.armed = false;
        self.release()?;
        Ok(ret)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of permits taken. Advisory only.
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }

    /// Number of permits available. Advisory only.
    pub fn available(&self) -> usize {
        self.capacity - self.in_use()
    }
}

impl<L: RawLock, S: Scheduler> fmt::Debug for Semaphore<L, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Semaphore")
            .field("capacity", &self.capacity)
            .field("in_use", &self.in_use())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loom::sync::Arc;
    use crate::loom::sync::atomic::AtomicBool;
    use crate::loom::thread;

    #[test]
    fn zero_capacity_is_rejected() {
        crate::loom::model(|| {
            let res: Result<Semaphore> = Semaphore::new(0);
            assert!(matches!(res, Err(Error::InvalidCapacity)));
        });
    }

    #[test]
    fn release_wakes_blocked_acquire() {
        crate::loom::model(|| {
            let sem: Arc<Semaphore> = Arc::new(Semaphore::new(1).unwrap());
            let acquired = Arc::new(AtomicBool::new(false));

            sem.acquire().unwrap();

            let other = thread::spawn({
                let sem = sem.clone();
                let acquired = acquired.clone();
                move || {
                    sem.acquire().unwrap();
                    acquired.store(true, Ordering::SeqCst);
                    sem.release().unwrap();
                }
            });

            assert!(!acquired.load(Ordering::SeqCst));
            sem.release().unwrap();

            other.join().unwrap();
            assert!(acquired.load(Ordering::SeqCst));
            assert_eq!(sem.in_use(), 0);
        });
    }

    #[test]
    fn excess_release_is_rejected() {
        crate::loom::model(|| {
            let sem: Semaphore = Semaphore::new(2).unwrap();
            assert_eq!(sem.release(), Err(Error::ExcessRelease));

            assert_eq!(sem.with_permit(|| sem.available()), Ok(1));
            assert_eq!(sem.in_use(), 0);
        });
    }

    #[cfg(not(loom))]
    #[test_log::test]
    fn release_wakes_exactly_one_acquirer() {
        use crate::CoopGuard;
        use crate::test_util::{Baton, Unsync};
        use std::sync::Mutex;

        let baton = Baton::new();
        let sem = Arc::new(Unsync(
            Semaphore::with_parts(1, CoopGuard::new(), baton.clone()).unwrap(),
        ));
        let acquired = Arc::new(Mutex::new(Vec::new()));

        baton.spawn({
            let (sem, acquired, baton) = (sem.clone(), acquired.clone(), baton.clone());
            move || {
                sem.0.acquire().unwrap();
                // let both other units park on the exhausted semaphore
                baton.yield_now();

                sem.0.release().unwrap();
                assert!(sem.0.queue.has_waiters(), "release woke more than one acquirer");
                baton.yield_now();

                assert_eq!(*acquired.lock().unwrap(), ["b"]);
                assert_eq!(sem.0.in_use(), 1);
                assert!(sem.0.queue.has_waiters());

                // hand the permit taken by "b" back on its behalf
                sem.0.release().unwrap();
                assert!(!sem.0.queue.has_waiters());
            }
        });
        baton.spawn({
            let (sem, acquired) = (sem.clone(), acquired.clone());
            move || {
                sem.0.acquire().unwrap();
                acquired.lock().unwrap().push("b");
            }
        });
        baton.spawn({
            let (sem, acquired) = (sem.clone(), acquired.clone());
            move || {
                sem.0.acquire().unwrap();
                acquired.lock().unwrap().push("c");
                sem.0.release().unwrap();
            }
        });

        baton.run();

        assert_eq!(*acquired.lock().unwrap(), ["b", "c"]);
        assert_eq!(sem.0.in_use(), 0);
    }

    #[cfg(not(loom))]
    proptest::proptest! {
        #[test]
        fn permits_stay_in_bounds(
            capacity in 1_usize..8,
            ops in proptest::collection::vec(proptest::bool::ANY, 0..64),
        ) {
            let sem: Semaphore = Semaphore::new(capacity).unwrap();
            let mut held = 0_usize;

            for op in ops {
                if op {
                    let full = held == capacity;
                    let acquired = sem.try_acquire().unwrap();
                    proptest::prop_assert_eq!(acquired, !full);
                    if acquired {
                        held += 1;
                    }
                } else if held > 0 {
                    sem.release().unwrap();
                    held -= 1;
                } else {
                    proptest::prop_assert_eq!(sem.release(), Err(Error::ExcessRelease));
                }

                proptest::prop_assert_eq!(sem.in_use(), held);
                proptest::prop_assert!(sem.in_use() <= sem.capacity());
            }
        }
    }
}
