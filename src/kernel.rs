//! The dispatcher: owns the one `Scheduler`, the currently-running thread
//! cell, the stack pool, and the sleep list, and performs every context
//! switch. Grounded on the teacher's `Kernel<A, S>`/`yield_now`/
//! `start_first_thread`, generalized from round-robin to the
//! priority-donation/MLFQS policy and narrowed from a generic `S:
//! Scheduler` to the one concrete `sched::Scheduler`, since `Thread`
//! itself is already hardwired to `arch::DefaultArch` (there is only ever
//! one kernel on this single-CPU target, so the teacher's `AtomicPtr`
//! global-registration dance is replaced by one `static KERNEL`).

use crate::arch::{Arch, DefaultArch, InterruptGuard};
use crate::consts::PRI_MIN;
use crate::errors::{SpawnError, ThreadError, ThreadResult};
use crate::fixed::Fixed;
use crate::mem::StackPool;
use crate::sched::Scheduler;
use crate::thread::{JoinHandle, ReadyRef, Thread, ThreadBuilder};
use portable_atomic::{AtomicBool, Ordering};

extern crate alloc;
use alloc::vec::Vec;

/// `-mlfqs` / `-rs=<seed>`: parsed once by [`Kernel::init`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BootConfig {
    pub mlfqs: bool,
    pub rng_seed: Option<u64>,
}

enum Disposition {
    Ready,
    Blocked,
    Dying,
}

pub struct Kernel {
    scheduler: Scheduler,
    stack_pool: StackPool,
    current_thread: spin::Mutex<Option<crate::thread::RunningRef>>,
    sleeping: spin::Mutex<Vec<Thread>>,
    to_reap: spin::Mutex<Option<Thread>>,
    rng_seed: spin::Mutex<Option<u64>>,
    initialized: AtomicBool,
    started: AtomicBool,
}

impl Kernel {
    pub const fn new() -> Self {
        Self {
            scheduler: Scheduler::new(),
            stack_pool: StackPool::new(),
            current_thread: spin::Mutex::new(None),
            sleeping: spin::Mutex::new(Vec::new()),
            to_reap: spin::Mutex::new(None),
            rng_seed: spin::Mutex::new(None),
            initialized: AtomicBool::new(false),
            started: AtomicBool::new(false),
        }
    }

    /// `thread_init`: apply the boot configuration. Must run before
    /// `start()` and before any `spawn`.
    pub fn init(&self, config: BootConfig) {
        self.scheduler.set_mlfqs_mode(config.mlfqs);
        *self.rng_seed.lock() = config.rng_seed;
        self.initialized.store(true, Ordering::Release);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn rng_seed(&self) -> Option<u64> {
        *self.rng_seed.lock()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// `thread_start`: create the idle thread and perform the first
    /// dispatch. Interrupts become live once this returns (or, on real
    /// hardware, once the first thread's saved `pstate` is restored by the
    /// context switch this never returns from).
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }

        let idle_stack = self
            .stack_pool
            .allocate(crate::mem::StackSizeClass::Small)
            .expect("no stack available for the idle thread");
        let idle_id = crate::thread::allocate_thread_id();
        let (idle, _idle_join) = Thread::new(idle_id, idle_stack, idle_entry, PRI_MIN, 0);
        idle.set_name("idle");
        self.scheduler.set_idle(idle);

        self.dispatch(Disposition::Ready);
    }

    /// `thread_create`: allocate a stack and TCB, enqueue it ready, and —
    /// matching seed scenario S1 — yield to it immediately if it outranks
    /// the caller, so a higher-priority thread runs before `spawn` returns.
    pub fn spawn(&self, name: &str, priority: u8, entry: fn()) -> ThreadResult<JoinHandle> {
        if !self.is_initialized() {
            return Err(ThreadError::Spawn(SpawnError::NotInitialized));
        }

        let id = crate::thread::allocate_thread_id();

        // New threads inherit nice/recent_cpu from their creator; a thread
        // spawned before `start()` (no thread scheduled yet) inherits the
        // same nice=0/recent_cpu=0 the initial thread itself starts at.
        let (creator_nice, creator_recent_cpu) = match self.current_thread.lock().as_ref() {
            Some(running) => (running.thread().nice(), running.thread().recent_cpu()),
            None => (0, Fixed::ZERO),
        };

        let (thread, join_handle) = ThreadBuilder::new()
            .priority(priority)
            .nice(creator_nice)
            .name(name)
            .spawn(entry, &self.stack_pool, id)
            .map_err(ThreadError::Spawn)?;
        thread.set_recent_cpu(creator_recent_cpu);

        let spawned_priority = thread.priority();
        crate::sched_log!("[SPAWN] {} pri={}", name, spawned_priority);
        self.scheduler.spawn_ready(thread);

        if spawned_priority > self.current_priority() {
            crate::sched_log!("[PREEMPT] spawn of {} outranks current", name);
            self.yield_now();
        }

        Ok(join_handle)
    }

    pub fn current(&self) -> Thread {
        self.current_thread
            .lock()
            .as_ref()
            .expect("no thread scheduled yet")
            .thread()
            .clone()
    }

    fn current_priority(&self) -> u8 {
        self.current_thread.lock().as_ref().map(|r| r.priority()).unwrap_or(PRI_MIN)
    }

    /// `thread_yield`: cooperatively give up the CPU, re-entering the ready
    /// queue at the calling thread's own priority.
    pub fn yield_now(&self) {
        self.dispatch(Disposition::Ready);
    }

    /// `thread_block`: used only by `sync::*`, never called directly by
    /// application code (that would be "illegal from interrupt context" if
    /// misused from an ISR, per §7 — there is no ISR call site for it).
    pub fn block_current(&self) {
        self.dispatch(Disposition::Blocked);
    }

    /// `thread_exit`: never returns. The exiting thread's stack is reclaimed
    /// by the *next* dispatch, not this one (it is still running on it).
    pub fn exit(&self) -> ! {
        self.dispatch(Disposition::Dying);
        unreachable!("thread_exit: control must never return to a Dying thread")
    }

    /// `thread_unblock`, called from ordinary thread context (e.g.
    /// `Semaphore::up`, `Lock::release`): if the newly-runnable thread
    /// outranks the caller, yield to it immediately.
    pub fn unblock(&self, thread: Thread) {
        let woken_priority = self.ready_thread(thread);
        if woken_priority > self.current_priority() {
            self.yield_now();
        }
    }

    /// `thread_unblock` called from the timer ISR (sleep-list wakeups):
    /// preemption cannot happen inside the interrupt handler itself, so a
    /// would-be preemption is recorded as a deferred yield and acted on
    /// once the ISR returns.
    pub(crate) fn unblock_from_isr(&self, thread: Thread) {
        let woken_priority = self.ready_thread(thread);
        if woken_priority > self.current_priority() {
            self.scheduler.request_deferred_yield();
        }
    }

    fn ready_thread(&self, thread: Thread) -> u8 {
        thread.set_state(crate::thread::ThreadState::Ready);
        let priority = thread.priority();
        self.scheduler.enqueue_ready(thread);
        priority
    }

    pub(crate) fn sleep_current_until(&self, wakeup_tick: u64) {
        let current = self.current();
        current.set_wakeup_tick(wakeup_tick);
        {
            let mut sleeping = self.sleeping.lock();
            let pos = sleeping
                .iter()
                .position(|t| t.wakeup_tick() > wakeup_tick)
                .unwrap_or(sleeping.len());
            sleeping.insert(pos, current);
        }
        self.block_current();
    }

    fn wake_due_sleepers(&self, now: u64) {
        loop {
            let due = {
                let mut sleeping = self.sleeping.lock();
                match sleeping.first() {
                    Some(t) if t.wakeup_tick() <= now => Some(sleeping.remove(0)),
                    _ => None,
                }
            };
            match due {
                Some(t) => self.unblock_from_isr(t),
                None => break,
            }
        }
    }

    /// `timer_tick`: the ISR entry point, component 8's driver glue. Advances
    /// the tick count, runs MLFQS accounting at its per-tick/4-tick/1-second
    /// cadences when `-mlfqs` is active, wakes due sleepers, and bumps the
    /// preemption counter.
    pub fn tick_isr(&self) {
        let now = crate::sched::advance_tick();

        if self.scheduler.mlfqs_mode() {
            self.mlfqs_tick(now);
        }

        self.wake_due_sleepers(now);

        if self.scheduler.tick_preemption_counter() {
            self.scheduler.request_deferred_yield();
        }
    }

    /// Called by the architecture's timer interrupt vector once the ISR
    /// itself has finished: runs `tick_isr`, then acts on any deferred
    /// yield it (or a sleep-list wakeup) requested, since preemption cannot
    /// happen inside the interrupt handler itself (§7).
    pub fn service_timer_irq(&self) {
        self.tick_isr();
        if self.scheduler.take_deferred_yield() {
            self.yield_now();
        }
    }

    fn mlfqs_tick(&self, now: u64) {
        let (running, is_idle) = {
            let guard = self.current_thread.lock();
            let is_idle = guard
                .as_ref()
                .map(|r| Some(r.id()) == self.scheduler.idle_id())
                .unwrap_or(true);
            (guard.as_ref().map(|r| r.thread().clone()), is_idle)
        };

        if let Some(thread) = &running {
            if !is_idle {
                thread.increment_recent_cpu();
            }
        }

        if now % 4 == 0 {
            for thread in self.scheduler.all_threads() {
                crate::mlfqs::recompute_priority(&thread);
            }
        }

        if now % crate::time::GLOBAL_TICK_COUNTER.frequency() as u64 == 0 {
            let ready_threads = self.scheduler.ready_len() as u64 + u64::from(!is_idle);
            crate::sched_log!("[MLFQS] recompute tick={} ready={}", now, ready_threads);
            crate::mlfqs::recompute_all(&self.scheduler, ready_threads);
        }
    }

    /// Every dispatch: retire `prev` per `disposition`, reclaim the stack of
    /// whichever thread died on the *previous* dispatch, reset the
    /// preemption counter, pick the next thread, and switch to it.
    fn dispatch(&self, disposition: Disposition) {
        let _guard = InterruptGuard::new();
        let mut current_guard = self.current_thread.lock();
        let prev = current_guard.take();
        let prev_ctx = prev
            .as_ref()
            .map(|r| r.thread().context_ptr())
            .unwrap_or(core::ptr::null_mut());

        if let Some(running) = prev {
            debug_assert!(
                running.thread().check_stack_integrity(),
                "bad thread magic: stack overflow detected in thread {:?}",
                running.thread().id()
            );
            match disposition {
                Disposition::Ready => {
                    let ready = running.stop_running();
                    self.scheduler.enqueue_ready(ready.0);
                }
                Disposition::Blocked => running.block(),
                Disposition::Dying => {
                    let dying_thread = running.thread().clone();
                    running.finish();
                    *self.to_reap.lock() = Some(dying_thread);
                }
            }
        }

        self.reap_pending();
        self.scheduler.reset_preemption_counter();

        match self.scheduler.pick_next() {
            Some(next_thread) => {
                crate::sched_log!(
                    "[RESUMED] {} pri={}",
                    next_thread.name().as_deref().unwrap_or("?"),
                    next_thread.priority()
                );
                let next_ctx = next_thread.context_ptr();
                let running = ReadyRef(next_thread).start_running();
                *current_guard = Some(running);
                drop(current_guard);

                if next_ctx.is_null() {
                    return;
                }
                if prev_ctx.is_null() {
                    let mut dummy = <DefaultArch as Arch>::SavedContext::default();
                    unsafe {
                        DefaultArch::context_switch(&mut dummy as *mut _, next_ctx as *const _);
                    }
                } else {
                    unsafe {
                        DefaultArch::context_switch(prev_ctx, next_ctx as *const _);
                    }
                }
            }
            None => drop(current_guard),
        }
    }

    fn reap_pending(&self) {
        if let Some(dead) = self.to_reap.lock().take() {
            self.scheduler.reap_dying();
            if let Some(stack) = dead.release_stack() {
                self.stack_pool.deallocate(stack);
            }
        }
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for Kernel {}
unsafe impl Sync for Kernel {}

fn idle_entry() {
    loop {
        #[cfg(target_arch = "aarch64")]
        unsafe {
            core::arch::asm!("wfe", options(nomem, nostack));
        }
        #[cfg(not(target_arch = "aarch64"))]
        core::hint::spin_loop();
    }
}

static KERNEL: Kernel = Kernel::new();

/// The single system-wide kernel instance.
pub fn kernel() -> &'static Kernel {
    &KERNEL
}

pub fn current_thread() -> Thread {
    KERNEL.current()
}

pub fn block_current() {
    KERNEL.block_current()
}

pub fn unblock(thread: Thread) {
    KERNEL.unblock(thread)
}

pub fn mlfqs_mode() -> bool {
    KERNEL.scheduler().mlfqs_mode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ThreadError;

    #[cfg(feature = "std-shim")]
    #[test]
    fn spawn_before_init_is_rejected() {
        let kernel = Kernel::new();
        let result = kernel.spawn("t", 31, || {});
        assert!(matches!(result, Err(ThreadError::Spawn(SpawnError::NotInitialized))));
    }

    #[cfg(feature = "std-shim")]
    #[test]
    fn start_creates_idle_and_dispatches() {
        let kernel = Kernel::new();
        kernel.init(BootConfig::default());
        kernel.start();
        assert_eq!(kernel.current().id(), kernel.scheduler().idle_id().unwrap());
    }

    /// S1 — priority preemption: spawning a thread that outranks the
    /// caller must switch to it immediately, before `spawn` returns control
    /// to the caller.
    #[cfg(feature = "std-shim")]
    #[test]
    fn spawning_higher_priority_thread_preempts_immediately() {
        let kernel = Kernel::new();
        kernel.init(BootConfig::default());
        kernel.start();

        let _h = kernel.spawn("h", 40, || {}).unwrap();
        assert_eq!(kernel.current().priority(), 40);
    }

    /// S4 — timed sleep ordering: threads requesting `sleep(30)`,
    /// `sleep(10)`, `sleep(20)` must wake in ascending-delay order (10, 20,
    /// 30), never earlier than requested.
    #[cfg(feature = "std-shim")]
    #[test]
    fn sleep_list_orders_and_wakes_by_ascending_delay() {
        use crate::mem::{StackPool, StackSizeClass};
        use crate::thread::RunningRef;

        let kernel = Kernel::new();
        kernel.init(BootConfig::default());
        kernel.start();

        let pool = StackPool::new();
        let mk = |id: usize| {
            let stack = pool.allocate(StackSizeClass::Small).unwrap();
            Thread::new(unsafe { crate::thread::ThreadId::new_unchecked(id) }, stack, || {}, 31, 0).0
        };
        let a = mk(100); // sleep(30)
        let b = mk(101); // sleep(10)
        let c = mk(102); // sleep(20)

        let now = crate::sched::ticks();
        for (t, delay) in [(&a, 30u64), (&b, 10), (&c, 20)] {
            *kernel.current_thread.lock() = Some(RunningRef(t.clone()));
            kernel.sleep_current_until(now + delay);
        }

        {
            let sleeping = kernel.sleeping.lock();
            assert_eq!(sleeping[0].id(), b.id());
            assert_eq!(sleeping[1].id(), c.id());
            assert_eq!(sleeping[2].id(), a.id());
        }

        let mut wake_order = alloc::vec::Vec::new();
        for _ in 0..40 {
            kernel.tick_isr();
            for t in [&b, &c, &a] {
                if t.state() != crate::thread::ThreadState::Blocked && !wake_order.contains(&t.id()) {
                    wake_order.push(t.id());
                }
            }
        }
        assert_eq!(wake_order, alloc::vec![b.id(), c.id(), a.id()]);
    }
}
