// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Collector-aware spinlocks for runtimes with stop-the-world garbage collection.
//!
//! This crate is the leaf layer of `rtlock`. It provides the [`Spinlock`] and
//! [`RecursiveSpinlock`] used for true cross-thread mutual exclusion, together with the pieces
//! every higher-level primitive builds on:
//!
//! - [`Collector`], the hooks a spinning or blocking thread uses to cooperate with the
//!   collector's safepoints,
//! - [`OwnerId`] and [`current_thread_id`] for ownership tracking,
//! - the [`RawLock`] trait abstracting over guard primitives,
//! - and the shared [`Error`] type.

mod backoff;
mod collector;
mod error;
mod loom;
mod owner;
mod raw_lock;
mod recursive;
mod spinlock;

pub use backoff::Backoff;
pub use collector::{Collector, GcSafeRegion, NoCollector};
pub use error::{Error, ErrorKind, Result};
pub use owner::{OwnerId, current_thread_id};
pub use raw_lock::{RawLock, TrackedLock, with_lock};
pub use recursive::RecursiveSpinlock;
pub use spinlock::Spinlock;
#[cfg(not(loom))]
pub use spinlock::{SpinMutex, SpinMutexGuard};
