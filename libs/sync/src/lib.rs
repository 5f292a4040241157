// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Blocking synchronization primitives for runtimes that mix cooperative tasks and OS threads.
//!
//! Everything in here that waits does so through a [`WaitQueue`], which is generic over the
//! guard protecting it and over the [`Scheduler`] that suspends and resumes execution units.
//! The same [`ReentrantLock`], [`Semaphore`] and [`Event`] code therefore serves
//!
//! - cooperatively scheduled tasks, with a no-op [`CoopGuard`] (see [`CoopLock`]), and
//! - OS threads, with a [`Spinlock`] guard and the [`Threads`] scheduler (see [`ThreadLock`]
//!   and [`Condition`]).
//!
//! Threads parked by [`Threads`] or blocked on an [`OsMutex`] are GC-safe while they wait.

mod coop;
mod event;
mod loom;
#[cfg(all(unix, not(loom)))]
mod os_mutex;
mod reentrant_lock;
mod scheduler;
mod semaphore;
#[cfg(all(test, not(loom)))]
mod test_util;
mod wait_queue;

pub use coop::CoopGuard;
pub use event::Event;
#[cfg(all(unix, not(loom)))]
pub use os_mutex::OsMutex;
pub use reentrant_lock::{ReentrantLock, ReentrantLockGuard};
pub use rtlock_spin::{
    Collector, Error, ErrorKind, GcSafeRegion, NoCollector, OwnerId, RawLock, RecursiveSpinlock,
    Result, Spinlock, TrackedLock, with_lock,
};
pub use scheduler::{Scheduler, Threads};
pub use semaphore::Semaphore;
pub use wait_queue::{WaitQueue, WaitQueueGuard};

/// A reentrant lock for OS threads.
pub type ThreadLock<C = NoCollector> = ReentrantLock<Spinlock<C>, Threads<C>>;

/// A reentrant lock for tasks scheduled cooperatively by `S`.
///
/// The lock is advisory and `!Sync`: it only orders the tasks of a single worker.
pub type CoopLock<S> = ReentrantLock<CoopGuard, S>;

/// A condition variable bound to a [`ThreadLock`].
pub type Condition<'a, C = NoCollector> = WaitQueue<&'a ThreadLock<C>, Threads<C>>;
