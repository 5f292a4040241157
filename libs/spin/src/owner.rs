// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;
use core::num::NonZeroUsize;

use crate::loom::sync::atomic::{AtomicUsize, Ordering};

/// Identity of the execution context that holds a lock.
///
/// Cooperative primitives are owned by logical tasks, thread-safe primitives by OS threads.
/// Identities are compared by value only; a `Task` never equals a `Thread`, even when their
/// numeric ids coincide.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum OwnerId {
    /// Nobody holds the lock.
    #[default]
    None,
    /// A cooperatively scheduled task, as identified by its scheduler.
    Task(NonZeroUsize),
    /// An OS thread, as identified by [`current_thread_id`].
    Thread(NonZeroUsize),
}

impl OwnerId {
    /// The identity of the calling OS thread.
    pub fn current_thread() -> Self {
        Self::Thread(current_thread_id())
    }

    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Decodes a raw thread id as stored in an owner word, where `0` means "no owner".
    pub fn from_thread_raw(raw: usize) -> Self {
        NonZeroUsize::new(raw).map_or(Self::None, Self::Thread)
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnerId::None => f.pad("<none>"),
            OwnerId::Task(id) => write!(f, "task {id}"),
            OwnerId::Thread(id) => write!(f, "thread {id}"),
        }
    }
}

/// Returns a unique, non-zero identifier for the calling thread.
///
/// Ids are handed out in the order threads first ask for one and are never reused, not even
/// after the thread exited. A thread that dies while holding a lock therefore can never be
/// mistaken for a thread started later.
///
/// # Panics
///
/// Panics if the id counter overflows.
pub fn current_thread_id() -> NonZeroUsize {
    #[cfg(loom)]
    crate::loom::lazy_static! {
        static ref NEXT_ID: AtomicUsize = AtomicUsize::new(1);
    }
    #[cfg(not(loom))]
    static NEXT_ID: AtomicUsize = AtomicUsize::new(1);

    crate::loom::thread_local! {
        static ID: NonZeroUsize = NonZeroUsize::new(NEXT_ID.fetch_add(1, Ordering::Relaxed))
            .expect("thread ID counter overflowed");
    }

    ID.with(|id| *id)
}
