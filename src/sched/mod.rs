//! The ready queue and the scheduling-policy state shared by both the
//! strict-priority-donation and MLFQS policies: the occupancy-bitmap ready
//! queue, the `all_threads` table MLFQS walks once a second, and the
//! preemption/deferred-yield bookkeeping for the `TIME_SLICE`-tick rule.
//!
//! The actual context switch and the `current_thread` cell live in
//! `kernel.rs`, mirroring the teacher's split between `sched::rr` (queue
//! and policy) and `kernel.rs` (the dispatch loop that calls `Arch::context_switch`).

pub mod queue;

pub use queue::ReadyQueue;

extern crate alloc;
use alloc::vec::Vec;

use crate::consts::TIME_SLICE;
use crate::thread::{Thread, ThreadId};
use portable_atomic::{AtomicBool, AtomicU64, Ordering};

/// All mutable scheduler state lives behind one lock, consistent with the
/// "interrupt masking is the sole mutual-exclusion mechanism" rule: this
/// lock is only ever taken with interrupts already disabled, so it is never
/// contended and never itself needs to be lock-free.
struct SchedulerState {
    ready: ReadyQueue,
    idle: Option<Thread>,
    all_threads: Vec<Thread>,
    ticks_since_yield: u64,
    mlfqs_mode: bool,
}

pub struct Scheduler {
    state: spin::Mutex<SchedulerState>,
    /// Set when `unblock`/preemption happen from interrupt context and the
    /// resulting yield must be deferred until the ISR returns.
    deferred_yield: AtomicBool,
    load_avg_raw: portable_atomic::AtomicI64,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            state: spin::Mutex::new(SchedulerState {
                ready: ReadyQueue::new(),
                idle: None,
                all_threads: Vec::new(),
                ticks_since_yield: 0,
                mlfqs_mode: false,
            }),
            deferred_yield: AtomicBool::new(false),
            load_avg_raw: portable_atomic::AtomicI64::new(0),
        }
    }

    pub fn set_mlfqs_mode(&self, on: bool) {
        self.state.lock().mlfqs_mode = on;
    }

    pub fn mlfqs_mode(&self) -> bool {
        self.state.lock().mlfqs_mode
    }

    pub fn set_idle(&self, idle: Thread) {
        self.state.lock().idle = Some(idle);
    }

    pub fn idle_id(&self) -> Option<ThreadId> {
        self.state.lock().idle.as_ref().map(|t| t.id())
    }

    /// Register a newly created thread in the global thread table (MLFQS
    /// walks this once a second) and enqueue it as ready.
    pub fn spawn_ready(&self, thread: Thread) {
        let mut state = self.state.lock();
        state.all_threads.push(thread.clone());
        state.ready.push(thread);
    }

    /// Put an already-known thread back on the ready queue (e.g. a waking
    /// sleeper or a thread whose block just ended).
    pub fn enqueue_ready(&self, thread: Thread) {
        self.state.lock().ready.push(thread);
    }

    /// Pop the next thread to run: the highest-priority ready thread, or the
    /// idle thread if the queue is empty.
    pub fn pick_next(&self) -> Option<Thread> {
        let mut state = self.state.lock();
        if let Some(t) = state.ready.pop_highest() {
            Some(t)
        } else {
            state.idle.clone()
        }
    }

    /// `true` if a ready thread now outranks `current_priority` — used by
    /// `unblock` to decide whether the newly-runnable thread should preempt.
    pub fn has_higher_priority_ready_than(&self, current_priority: u8) -> bool {
        self.state
            .lock()
            .ready
            .highest_priority()
            .is_some_and(|p| p > current_priority)
    }

    pub fn ready_len(&self) -> usize {
        self.state.lock().ready.len()
    }

    pub fn remove_from_ready(&self, id: ThreadId) -> Option<Thread> {
        self.state.lock().ready.remove(id)
    }

    /// Re-bucket a thread already sitting in the ready queue after its
    /// priority changed underneath it (donation or MLFQS recompute): the
    /// occupancy-bitmap queue buckets by priority at push time, so a priority
    /// change while `Ready` (not `Running`) must pop and re-push the thread
    /// or it dispatches from its stale, pre-change bucket. No-op if the
    /// thread isn't currently in the ready queue (e.g. it's `Running` or
    /// blocked, where no bucket membership exists to fix up).
    pub fn reposition_ready(&self, id: ThreadId) {
        let mut state = self.state.lock();
        if let Some(thread) = state.ready.remove(id) {
            state.ready.push(thread);
        }
    }

    /// Snapshot of every live thread, for MLFQS's once-a-second pass.
    pub fn all_threads(&self) -> Vec<Thread> {
        self.state.lock().all_threads.clone()
    }

    /// Drop threads that reached `Dying` from the table so MLFQS and
    /// diagnostics stop walking them. Their stacks are released separately
    /// by the dispatcher.
    pub fn reap_dying(&self) {
        self.state
            .lock()
            .all_threads
            .retain(|t| t.state() != crate::thread::ThreadState::Dying);
    }

    /// Bump the preemption counter by one tick; returns `true` once
    /// `TIME_SLICE` ticks have elapsed since the last yield/dispatch.
    pub fn tick_preemption_counter(&self) -> bool {
        let mut state = self.state.lock();
        state.ticks_since_yield += 1;
        state.ticks_since_yield >= TIME_SLICE
    }

    pub fn reset_preemption_counter(&self) {
        self.state.lock().ticks_since_yield = 0;
    }

    pub fn request_deferred_yield(&self) {
        self.deferred_yield.store(true, Ordering::Release);
    }

    pub fn take_deferred_yield(&self) -> bool {
        self.deferred_yield.swap(false, Ordering::AcqRel)
    }

    pub fn load_avg(&self) -> crate::fixed::Fixed {
        crate::fixed::Fixed::from_raw(self.load_avg_raw.load(Ordering::Acquire))
    }

    pub fn set_load_avg(&self, value: crate::fixed::Fixed) {
        self.load_avg_raw.store(value.raw(), Ordering::Release);
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

static TICKS: AtomicU64 = AtomicU64::new(0);

/// Monotonic tick count. Kept here (rather than `time::tick`) since the
/// preemption counter and MLFQS cadence both key off it; `time::tick`
/// re-exports this for the public `timer_ticks` surface.
pub fn ticks() -> u64 {
    TICKS.load(Ordering::Acquire)
}

pub(crate) fn advance_tick() -> u64 {
    TICKS.fetch_add(1, Ordering::AcqRel) + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::{StackPool, StackSizeClass};

    fn make_thread(id: u64, priority: u8, pool: &StackPool) -> Thread {
        let stack = pool.allocate(StackSizeClass::Small).unwrap();
        let (t, _h) = Thread::new(unsafe { ThreadId::new_unchecked(id as usize) }, stack, || {}, priority, 0);
        t
    }

    #[cfg(feature = "std-shim")]
    #[test]
    fn pick_next_prefers_idle_only_when_empty() {
        let pool = StackPool::new();
        let sched = Scheduler::new();
        let idle = make_thread(1, 0, &pool);
        sched.set_idle(idle.clone());

        assert_eq!(sched.pick_next().unwrap().id(), idle.id());

        let worker = make_thread(2, 31, &pool);
        sched.spawn_ready(worker.clone());
        assert_eq!(sched.pick_next().unwrap().id(), worker.id());
        assert_eq!(sched.pick_next().unwrap().id(), idle.id());
    }

    #[cfg(feature = "std-shim")]
    #[test]
    fn preemption_counter_fires_at_time_slice() {
        let sched = Scheduler::new();
        for _ in 0..TIME_SLICE - 1 {
            assert!(!sched.tick_preemption_counter());
        }
        assert!(sched.tick_preemption_counter());
    }
}
