// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;

use rtlock_spin::{RawLock, Result, Spinlock};

use crate::loom::sync::atomic::{AtomicBool, Ordering};
use crate::{Scheduler, Threads, WaitQueue};

/// A notification that execution units can wait for.
///
/// A manual-reset event stays signaled once [`notify`](Self::notify)'d, releasing every
/// current and future waiter until it is [`reset`](Self::reset). An auto-reset event wakes a
/// single waiter per notification and the woken waiter consumes the signal.
pub struct Event<L = Spinlock, S: Scheduler = Threads> {
    /// Written under the queue guard.
    set: AtomicBool,
    autoreset: bool,
    queue: WaitQueue<L, S>,
}

impl<L: RawLock + Default, S: Scheduler + Default> Event<L, S> {
    /// Returns a new manual-reset event.
    #[must_use]
    pub fn new() -> Self {
        Self::with_parts(false, L::default(), S::default())
    }

    /// Returns a new auto-reset event.
    #[must_use]
    pub fn autoreset() -> Self {
        Self::with_parts(true, L::default(), S::default())
    }
}

impl<L: RawLock, S: Scheduler> Event<L, S> {
    #[must_use]
    pub fn with_parts(autoreset: bool, guard: L, scheduler: S) -> Self {
        Self {
            set: AtomicBool::new(false),
            autoreset,
            queue: WaitQueue::with_scheduler(guard, scheduler),
        }
    }

    /// Suspends the caller until the event is signaled.
    ///
    /// # Errors
    ///
    /// Returns the error of the internal guard.
    pub fn wait(&self) -> Result<()> {
        if !self.autoreset && self.set.load(Ordering::Acquire) {
            return Ok(());
        }

        let mut held = self.queue.lock()?;
        while !self.set.load(Ordering::Relaxed) {
            held = held.wait()?;
        }
        if self.autoreset {
            self.set.store(false, Ordering::Relaxed);
        }
        held.unlock()
    }

    /// Signals the event, returning the number of waiters woken.
    ///
    /// # Errors
    ///
    /// Returns the error of the internal guard.
    pub fn notify(&self) -> Result<usize> {
        let held = self.queue.lock()?;

        let woken = if self.set.load(Ordering::Relaxed) {
            0
        } else {
            self.set.store(true, Ordering::Release);
            held.notify(!self.autoreset)
        };

        held.unlock()?;
        Ok(woken)
    }

    /// Alias for [`notify`](Self::notify).
    ///
    /// # Errors
    ///
    /// Returns the error of the internal guard.
    #[inline]
    pub fn set(&self) -> Result<usize> {
        self.notify()
    }

    /// Clears the signal.
    ///
    /// # Errors
    ///
    /// Returns the error of the internal guard.
    pub fn reset(&self) -> Result<()> {
        let held = self.queue.lock()?;
        self.set.store(false, Ordering::Relaxed);
        held.unlock()
    }

    /// Whether the event is signaled. Advisory only.
    pub fn is_set(&self) -> bool {
        self.set.load(Ordering::Acquire)
    }

    pub fn is_autoreset(&self) -> bool {
        self.autoreset
    }
}

impl<L: RawLock + Default, S: Scheduler + Default> Default for Event<L, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: RawLock, S: Scheduler> fmt::Debug for Event<L, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("set", &self.is_set())
            .field("autoreset", &self.autoreset)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loom::sync::Arc;
    use crate::loom::thread;

    #[test]
    fn manual_event_stays_set_until_reset() {
        crate::loom::model(|| {
            let event: Event = Event::new();
            assert!(!event.is_set());

            assert_eq!(event.notify(), Ok(0));
            assert!(event.is_set());
            event.wait().unwrap();
            event.wait().unwrap();
            assert_eq!(event.set(), Ok(0));

            event.reset().unwrap();
            assert!(!event.is_set());
        });
    }

    #[test]
    fn waiter_is_woken() {
        crate::loom::model(|| {
            let event: Arc<Event> = Arc::new(Event::new());

            let waiter = thread::spawn({
                let event = event.clone();
                move || event.wait().unwrap()
            });

            event.notify().unwrap();
            waiter.join().unwrap();
            assert!(event.is_set());
        });
    }

    #[test]
    fn autoreset_event_is_consumed_by_waiter() {
        crate::loom::model(|| {
            let event: Arc<Event> = Arc::new(Event::autoreset());

            let waiter = thread::spawn({
                let event = event.clone();
                move || event.wait().unwrap()
            });

            event.notify().unwrap();
            waiter.join().unwrap();
            assert!(!event.is_set());
        });
    }
}
