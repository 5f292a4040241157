// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;

use crate::OwnerId;

pub type Result<T> = core::result::Result<T, Error>;

/// Contract violations reported by the locking primitives.
///
/// Every error is returned to the offending caller before the primitive's state is touched, so
/// a failed operation leaves the lock exactly as it was.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// The lock is held, but not by the caller.
    NotOwner { owner: OwnerId, caller: OwnerId },
    /// More unlocks than locks.
    UnlockCountMismatch,
    /// A wait queue was used without holding its guard.
    NotLocked,
    /// A semaphore was released more often than it was acquired.
    ExcessRelease,
    /// A semaphore was created with zero capacity.
    InvalidCapacity,
    /// The caller tried to re-lock a non-reentrant lock it already holds.
    SelfDeadlock,
    /// `relock_all` found the lock at an unexpected depth after re-acquiring it.
    ConcurrencyViolation { depth: usize },
    /// The OS mutex has already been destroyed.
    Destroyed,
    /// The platform mutex reported an error code.
    Os(i32),
}

/// Broad classes of [`Error`]s.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unlock without lock, unlock by a non-owner, excess releases and the like.
    Usage,
    /// Invalid arguments at construction time.
    Construction,
    /// Operations that would never complete.
    Deadlock,
    /// The platform primitive failed.
    Platform,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotOwner { .. }
            | Error::UnlockCountMismatch
            | Error::NotLocked
            | Error::ExcessRelease
            | Error::Destroyed => ErrorKind::Usage,
            Error::InvalidCapacity => ErrorKind::Construction,
            Error::SelfDeadlock | Error::ConcurrencyViolation { .. } => ErrorKind::Deadlock,
            Error::Os(_) => ErrorKind::Platform,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotOwner { owner, caller } => {
                write!(f, "unlock from wrong owner: held by {owner}, called by {caller}")
            }
            Error::UnlockCountMismatch => f.write_str("unlock count must match lock count"),
            Error::NotLocked => f.write_str("lock must be held by the caller"),
            Error::ExcessRelease => f.write_str("release count must match acquire count"),
            Error::InvalidCapacity => f.write_str("semaphore capacity must be positive"),
            Error::SelfDeadlock => f.write_str("deadlock detected: lock is already held by the caller"),
            Error::ConcurrencyViolation { depth } => {
                write!(f, "concurrency violation detected: relocked at depth {depth}, expected 1")
            }
            Error::Destroyed => f.write_str("mutex was already destroyed"),
            Error::Os(code) => write!(f, "platform mutex failed with error code {code}"),
        }
    }
}

impl core::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;
    use core::num::NonZeroUsize;

    #[test]
    fn kinds_follow_the_taxonomy() {
        let owner = OwnerId::Thread(NonZeroUsize::new(1).unwrap());

        assert_eq!(
            Error::NotOwner {
                owner,
                caller: OwnerId::None
            }
            .kind(),
            ErrorKind::Usage
        );
        assert_eq!(Error::ExcessRelease.kind(), ErrorKind::Usage);
        assert_eq!(Error::InvalidCapacity.kind(), ErrorKind::Construction);
        assert_eq!(Error::SelfDeadlock.kind(), ErrorKind::Deadlock);
        assert_eq!(
            Error::ConcurrencyViolation { depth: 3 }.kind(),
            ErrorKind::Deadlock
        );
        assert_eq!(Error::Os(22).kind(), ErrorKind::Platform);
    }

    #[test]
    fn display() {
        assert_eq!(
            Error::UnlockCountMismatch.to_string(),
            "unlock count must match lock count"
        );
        assert_eq!(
            Error::ConcurrencyViolation { depth: 2 }.to_string(),
            "concurrency violation detected: relocked at depth 2, expected 1"
        );
    }
}
