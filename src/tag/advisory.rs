// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The advisory per-tag lock exposed by `lock`/`unlock`.
//!
//! Callers that need multi-step atomicity across the scalar accessors take
//! this lock around the sequence. It is reentrant per thread and purely
//! advisory: the library itself never takes it.

use std::{
    sync::{Condvar, Mutex},
    thread::{self, ThreadId},
};

use crate::status::Status;

#[derive(Debug, Default)]
struct LockState {
    owner: Option<ThreadId>,
    depth: u32,
}

#[derive(Debug)]
pub struct AdvisoryLock {
    state: Mutex<LockState>,
    cv: Condvar,
}

impl AdvisoryLock {
    pub fn new() -> Self {
        Self { state: Mutex::new(LockState::default()), cv: Condvar::new() }
    }

    /// Block until the lock is held by the calling thread. Reentrant.
    pub fn lock(&self) -> Status {
        let me = thread::current().id();
        let mut st = match self.state.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        if st.owner == Some(me) {
            st.depth += 1;
            return Status::Ok;
        }
        while st.owner.is_some() {
            st = match self.cv.wait(st) {
                Ok(g) => g,
                Err(p) => p.into_inner(),
            };
        }
        st.owner = Some(me);
        st.depth = 1;
        Status::Ok
    }

    /// Release one level of the lock. Unlocking a lock the calling thread
    /// does not hold is refused.
    pub fn unlock(&self) -> Status {
        let me = thread::current().id();
        let mut st = match self.state.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        if st.owner != Some(me) {
            return Status::NotAllowed;
        }
        st.depth -= 1;
        if st.depth == 0 {
            st.owner = None;
            self.cv.notify_one();
        }
        Status::Ok
    }
}

impl Default for AdvisoryLock {
    fn default() -> Self {
        Self::new()
    }
}
