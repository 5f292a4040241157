// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A cooperative scheduler for tests.
//!
//! Every unit runs on its own OS thread, but only the unit holding the baton is allowed to
//! run. The baton changes hands only when the running unit suspends, yields or finishes, which
//! gives the same interleavings as tasks multiplexed onto a single worker.

use core::cell::Cell;
use core::num::NonZeroUsize;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use rtlock_spin::OwnerId;

use crate::Scheduler;

std::thread_local! {
    static CURRENT: Cell<Option<NonZeroUsize>> = const { Cell::new(None) };
}

#[derive(Clone, Default)]
pub struct Baton {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    turn: Condvar,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Default)]
struct State {
    started: bool,
    running: Option<NonZeroUsize>,
    ready: VecDeque<NonZeroUsize>,
    next_id: usize,
    /// Units that have not finished yet.
    live: usize,
    /// Set when every live unit is suspended.
    deadlocked: bool,
}

/// Shares a value between baton units.
///
/// Only one unit runs at a time and the baton is handed over through a mutex, so accesses
/// from different units never overlap.
pub struct Unsync<T>(pub T);

// Safety: see above
unsafe impl<T> Send for Unsync<T> {}
// Safety: see above
unsafe impl<T> Sync for Unsync<T> {}

impl Baton {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a unit. Units first run in the order they were spawned, once [`Baton::run`] is
    /// called.
    pub fn spawn<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let id = {
            let mut state = self.lock();
            state.next_id += 1;
            state.live += 1;
            let id = NonZeroUsize::new(state.next_id).unwrap();
            state.ready.push_back(id);
            id
        };

        let baton = self.clone();
        let handle = thread::spawn(move || {
            CURRENT.set(Some(id));
            baton.wait_for_turn(baton.lock(), id);

            let res = panic::catch_unwind(AssertUnwindSafe(f));
            baton.finish();
            if let Err(payload) = res {
                panic::resume_unwind(payload);
            }
        });

        self.inner.handles.lock().unwrap().push(handle);
    }

    /// Runs all spawned units to completion, propagating the first panic.
    pub fn run(&self) {
        {
            let mut state = self.lock();
            state.started = true;
            state.running = state.ready.pop_front();
            self.inner.turn.notify_all();
        }

        let handles = std::mem::take(&mut *self.inner.handles.lock().unwrap());
        let mut panicked = None;
        for handle in handles {
            if let Err(payload) = handle.join() {
                panicked.get_or_insert(payload);
            }
        }
        if let Some(payload) = panicked {
            panic::resume_unwind(payload);
        }
    }

    /// Moves the calling unit to the back of the ready queue.
    pub fn yield_now(&self) {
        let me = current();
        let mut state = self.lock();
        state.ready.push_back(me);
        self.hand_off(state, me);
    }

    fn finish(&self) {
        let mut state = self.lock();
        state.live -= 1;
        state.running = state.ready.pop_front();
        if state.running.is_none() && state.live > 0 {
            state.deadlocked = true;
        }
        self.inner.turn.notify_all();
    }

    fn hand_off(&self, mut state: MutexGuard<'_, State>, me: NonZeroUsize) {
        state.running = state.ready.pop_front();
        if state.running.is_none() {
            state.deadlocked = true;
        }
        self.inner.turn.notify_all();
        self.wait_for_turn(state, me);
    }

    fn wait_for_turn(&self, state: MutexGuard<'_, State>, me: NonZeroUsize) {
        let state = self
            .inner
            .turn
            .wait_while(state, |state| {
                !state.deadlocked && !(state.started && state.running == Some(me))
            })
            .unwrap_or_else(PoisonError::into_inner);

        assert!(!state.deadlocked, "every baton unit is suspended");
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Scheduler for Baton {
    type Unit = NonZeroUsize;

    fn current(&self) -> Self::Unit {
        current()
    }

    fn current_owner(&self) -> OwnerId {
        OwnerId::Task(current())
    }

    fn suspend(&self) {
        let me = current();
        let state = self.lock();
        // a unit that was resumed before suspending is already queued
        self.hand_off(state, me);
    }

    fn resume(&self, unit: Self::Unit) {
        self.lock().ready.push_back(unit);
    }
}

fn current() -> NonZeroUsize {
    CURRENT
        .get()
        .expect("not called from a unit spawned on a Baton")
}
