// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Single-slot wake-up used by blocked producers.

use std::sync::{Condvar, Mutex};

/// A one-slot notification.
///
/// [`notify`](Self::notify) fills the slot and wakes one waiter. Filling an
/// already full slot is a no-op, so notifications never pile up; a waiter
/// empties the slot when it wakes. Waiters always recheck their condition
/// after waking.
#[derive(Debug, Default)]
pub(crate) struct ConsumedSignal {
    slot: Mutex<bool>,
    cond: Condvar,
}

impl ConsumedSignal {
    pub(crate) fn notify(&self) {
        #[allow(clippy::expect_used)]
        let mut slot = self.slot.lock().expect("lock poisoned");
        if !*slot {
            *slot = true;
            self.cond.notify_one();
        }
    }

    /// Wakes every waiter so it can observe a sticky condition (close, error)
    /// that the caller set before calling this.
    pub(crate) fn broadcast(&self) {
        // Taking the lock orders the caller's state change before any waiter's
        // next check of `abort`.
        #[allow(clippy::expect_used)]
        let _slot = self.slot.lock().expect("lock poisoned");
        self.cond.notify_all();
    }

    /// Blocks until the slot is filled or `abort` returns true.
    #[allow(clippy::expect_used)]
    pub(crate) fn wait(&self, abort: impl Fn() -> bool) {
        let mut slot = self.slot.lock().expect("lock poisoned");
        while !*slot && !abort() {
            slot = self.cond.wait(slot).expect("lock poisoned");
        }
        *slot = false;
    }
}
