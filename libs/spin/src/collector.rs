// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::hint;

/// Hooks into the garbage collector of the hosting runtime.
///
/// Threads that run managed code must reach a safepoint regularly so the collector can stop
/// the world. A thread that busy-waits on a spinlock or blocks on an OS mutex would otherwise
/// hold up a pending collection forever, and if the lock holder is itself parked at a
/// safepoint the program deadlocks against its own collector.
///
/// The primitives in this crate therefore call [`Collector::poll_safepoint`] on every retry of
/// a spin loop and bracket blocking calls with [`Collector::enter_gc_safe`] /
/// [`Collector::leave_gc_safe`]. Implementations are expected to be zero-sized handles to
/// thread-local runtime state, in the same way [`lock_api::GetThreadId`] is.
pub trait Collector {
    /// Initial value, used when constructing primitives in `const` contexts.
    const INIT: Self;

    /// The GC state saved by [`Collector::enter_gc_safe`] and restored by
    /// [`Collector::leave_gc_safe`].
    type GcState;

    /// Cheap check for a pending stop-the-world request; parks the calling thread until the
    /// collection has finished if there is one.
    fn poll_safepoint(&self);

    /// Marks the calling thread as not touching managed memory.
    fn enter_gc_safe(&self) -> Self::GcState;

    /// Restores the state returned by the matching [`Collector::enter_gc_safe`] call.
    fn leave_gc_safe(&self, state: Self::GcState);

    /// Called right before a spinlock is taken. Finalizers run on the holder's thread could try
    /// to take the same lock again.
    fn inhibit_finalizers(&self) {}

    /// Undoes one [`Collector::inhibit_finalizers`].
    fn allow_finalizers(&self) {}

    /// Hardware spin-loop hint.
    #[inline(always)]
    fn cpu_pause(&self) {
        hint::spin_loop();
    }

    /// Wakes cores waiting for a lock word to change (`sev` on AArch64), issued on every
    /// spinlock release.
    #[inline(always)]
    fn cpu_wake(&self) {}
}

/// A [`Collector`] for code that does not run alongside a garbage collector.
#[derive(Debug, Default, Copy, Clone)]
pub struct NoCollector;

impl Collector for NoCollector {
    const INIT: Self = NoCollector;
    type GcState = ();

    #[inline(always)]
    fn poll_safepoint(&self) {}

    #[inline(always)]
    fn enter_gc_safe(&self) -> Self::GcState {}

    #[inline(always)]
    fn leave_gc_safe(&self, _state: Self::GcState) {}
}

/// An RAII region in which the calling thread is GC-safe.
///
/// The thread leaves the GC-safe state again when the region is dropped, so every exit path of
/// a blocking call (including unwinding) restores the previous state.
#[must_use = "if unused the thread immediately leaves the GC-safe state"]
pub struct GcSafeRegion<'a, C: Collector> {
    collector: &'a C,
    state: Option<C::GcState>,
}

impl<'a, C: Collector> GcSafeRegion<'a, C> {
    pub fn enter(collector: &'a C) -> Self {
        let state = collector.enter_gc_safe();
        Self {
            collector,
            state: Some(state),
        }
    }
}

impl<C: Collector> Drop for GcSafeRegion<'_, C> {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            self.collector.leave_gc_safe(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    std::thread_local! {
        static GC_SAFE: Cell<bool> = const { Cell::new(false) };
    }

    struct Flagging;

    impl Collector for Flagging {
        const INIT: Self = Flagging;
        type GcState = bool;

        fn poll_safepoint(&self) {}

        fn enter_gc_safe(&self) -> bool {
            GC_SAFE.replace(true)
        }

        fn leave_gc_safe(&self, state: bool) {
            GC_SAFE.set(state);
        }
    }

    #[test]
    fn region_restores_previous_state() {
        let collector = Flagging::INIT;

        {
            let _outer = GcSafeRegion::enter(&collector);
            assert!(GC_SAFE.get());
            {
                let _inner = GcSafeRegion::enter(&collector);
                assert!(GC_SAFE.get());
            }
            // the inner region saw `true` on entry and must not clear it
            assert!(GC_SAFE.get());
        }

        assert!(!GC_SAFE.get());
    }

    #[test]
    fn region_is_left_on_unwind() {
        let collector = Flagging::INIT;

        let res = std::panic::catch_unwind(|| {
            let _region = GcSafeRegion::enter(&collector);
            panic!("boom");
        });

        assert!(res.is_err());
        assert!(!GC_SAFE.get());
    }
}
