//! Counting semaphore, grounded on the teacher's interrupt-masking-based
//! primitives (`arch::InterruptGuard`) and spec §4.3: waiters are kept
//! ordered by descending effective priority, but `up()` re-selects the
//! highest-priority waiter *at that moment* rather than trusting the
//! snapshot order taken when each waiter enqueued, since a waiter's
//! priority may have risen via donation while it slept.
//!
//! `ArcLite`-backed and `Clone`, like `Thread`, so a condition variable can
//! hand a private per-waiter semaphore to both itself and the waiting
//! thread.

extern crate alloc;
use alloc::vec::Vec;

use crate::arch::InterruptGuard;
use crate::mem::ArcLite;
use crate::thread::Thread;

struct SemaphoreState {
    value: u64,
    waiters: Vec<Thread>,
}

struct SemaphoreInner {
    state: spin::Mutex<SemaphoreState>,
}

pub struct Semaphore {
    inner: ArcLite<SemaphoreInner>,
}

impl Semaphore {
    pub fn new(initial_value: u64) -> Self {
        Self {
            inner: ArcLite::new(SemaphoreInner {
                state: spin::Mutex::new(SemaphoreState {
                    value: initial_value,
                    waiters: Vec::new(),
                }),
            }),
        }
    }

    /// Block the calling thread until `value > 0`, then consume one unit.
    /// Each loop iteration masks interrupts for only as long as it takes to
    /// check the count and, if necessary, enqueue onto the waiter list and
    /// block; a concurrent `up()` can only run between iterations, on a
    /// single CPU, from interrupt context.
    pub fn down(&self) {
        loop {
            let _guard = InterruptGuard::new();
            let mut state = self.inner.state.lock();
            if state.value > 0 {
                state.value -= 1;
                return;
            }
            let current = crate::kernel::current_thread();
            let pos = state
                .waiters
                .iter()
                .position(|w| w.priority() < current.priority())
                .unwrap_or(state.waiters.len());
            state.waiters.insert(pos, current);
            drop(state);
            crate::kernel::block_current();
        }
    }

    /// Non-blocking `down`: consume a unit only if one is immediately
    /// available.
    pub fn try_down(&self) -> bool {
        let _guard = InterruptGuard::new();
        let mut state = self.inner.state.lock();
        if state.value > 0 {
            state.value -= 1;
            true
        } else {
            false
        }
    }

    /// Release one unit and wake the highest-priority waiter, if any.
    pub fn up(&self) {
        let _guard = InterruptGuard::new();
        let mut state = self.inner.state.lock();
        state.value += 1;
        let woken = if state.waiters.is_empty() {
            None
        } else {
            let idx = (0..state.waiters.len())
                .max_by_key(|&i| state.waiters[i].priority())
                .unwrap();
            Some(state.waiters.remove(idx))
        };
        drop(state);
        if let Some(thread) = woken {
            crate::kernel::unblock(thread);
        }
    }

    pub fn value(&self) -> u64 {
        self.inner.state.lock().value
    }
}

impl Clone for Semaphore {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

unsafe impl Send for SemaphoreInner {}
unsafe impl Sync for SemaphoreInner {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_down_respects_count() {
        let sem = Semaphore::new(1);
        assert!(sem.try_down());
        assert!(!sem.try_down());
        sem.up();
        assert!(sem.try_down());
    }

    #[test]
    fn clone_shares_state() {
        let sem = Semaphore::new(0);
        let clone = sem.clone();
        clone.up();
        assert_eq!(sem.value(), 1);
    }
}
