// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::cell::Cell;
use core::marker::PhantomData;

use rtlock_spin::{RawLock, Result, TrackedLock};

/// The guard of primitives shared by cooperatively scheduled tasks.
///
/// Only one task runs at a time on a cooperative worker and tasks switch only at explicit wait
/// points, so the guard has nothing to do: every operation succeeds immediately. The type is
/// `!Sync`, which keeps anything built on it (e.g. a [`CoopLock`]) on its worker thread.
///
/// [`CoopLock`]: crate::CoopLock
#[derive(Debug, Default)]
pub struct CoopGuard {
    _not_sync: PhantomData<Cell<()>>,
}

impl CoopGuard {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            _not_sync: PhantomData,
        }
    }
}

// Safety: `CoopGuard` is `!Sync`, so it can never be shared between threads.
unsafe impl RawLock for CoopGuard {
    #[inline]
    fn lock(&self) -> Result<()> {
        Ok(())
    }

    #[inline]
    fn try_lock(&self) -> Result<bool> {
        Ok(true)
    }

    #[inline]
    fn unlock(&self) -> Result<()> {
        Ok(())
    }

    #[inline]
    fn is_locked(&self) -> bool {
        true
    }
}

// Safety: see above. The running task is the only one that can observe the guard.
unsafe impl TrackedLock for CoopGuard {
    #[inline]
    fn is_held(&self) -> bool {
        true
    }
}
