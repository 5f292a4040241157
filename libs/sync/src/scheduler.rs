// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;

use rtlock_spin::{Collector, GcSafeRegion, NoCollector, OwnerId, loom_const_fn};

use crate::loom::thread;

/// Hooks into whatever schedules the execution units that wait on a [`WaitQueue`].
///
/// An execution unit is either a cooperatively scheduled task or an OS thread. Waiting
/// primitives record [`Scheduler::current`] in their queue, [`Scheduler::suspend`] the caller
/// and later hand the recorded unit back to [`Scheduler::resume`].
///
/// `suspend` is allowed to return spuriously; callers re-check their wakeup condition. A
/// `resume` that happens before the matching `suspend` must not be lost, i.e. the next
/// `suspend` of that unit returns immediately.
///
/// [`WaitQueue`]: crate::WaitQueue
pub trait Scheduler {
    /// Handle to an execution unit that can be resumed from another unit.
    type Unit: Clone;

    /// The calling execution unit.
    fn current(&self) -> Self::Unit;

    /// The identity recorded as lock owner for the calling execution unit.
    fn current_owner(&self) -> OwnerId;

    /// Suspends the calling execution unit until it is resumed.
    fn suspend(&self);

    /// Makes `unit` runnable again.
    fn resume(&self, unit: Self::Unit);
}

/// The [`Scheduler`] for OS threads: suspending parks the thread, resuming unparks it.
///
/// A parked thread is GC-safe, so a collection can run while it is blocked.
pub struct Threads<C = NoCollector> {
    collector: C,
}

// === impl Threads ===

impl<C: Collector> Threads<C> {
    loom_const_fn! {
        #[must_use]
        pub const fn new() -> Self {
            Self::with_collector(C::INIT)
        }
    }

    loom_const_fn! {
        #[must_use]
        pub const fn with_collector(collector: C) -> Self {
            Self { collector }
        }
    }

    pub fn collector(&self) -> &C {
        &self.collector
    }
}

impl<C: Collector> Default for Threads<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for Threads<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Threads").finish_non_exhaustive()
    }
}

impl<C: Collector> Scheduler for Threads<C> {
    type Unit = thread::Thread;

    fn current(&self) -> Self::Unit {
        thread::current()
    }

    fn current_owner(&self) -> OwnerId {
        OwnerId::current_thread()
    }

    fn suspend(&self) {
        let _region = GcSafeRegion::enter(&self.collector);
        log::trace!("parking current thread ({:?})...", thread::current().id());
        thread::park();
    }

    fn resume(&self, unit: Self::Unit) {
        log::trace!("unparking thread {:?}...", unit.id());
        unit.unpark();
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static ENTERED: AtomicUsize = AtomicUsize::new(0);
    static LEFT: AtomicUsize = AtomicUsize::new(0);

    struct Counting;

    impl Collector for Counting {
        const INIT: Self = Counting;
        type GcState = ();

        fn poll_safepoint(&self) {}
        fn enter_gc_safe(&self) {
            ENTERED.fetch_add(1, Ordering::SeqCst);
        }
        fn leave_gc_safe(&self, _state: ()) {
            LEFT.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn early_resume_is_not_lost() {
        let threads: Threads<Counting> = Threads::new();

        threads.resume(threads.current());
        // returns right away because the unpark token is already set
        threads.suspend();

        assert_eq!(ENTERED.load(Ordering::SeqCst), 1);
        assert_eq!(LEFT.load(Ordering::SeqCst), 1);
        assert_eq!(threads.current_owner(), OwnerId::current_thread());
    }
}
