//! Thread control blocks and the global thread table.
//!
//! A `Thread` is a cheap, cloneable handle (backed by [`ArcLite`]) to a
//! [`ThreadInner`] carrying everything the scheduler, the donation algorithm,
//! and the MLFQS accounting pass need to observe or mutate. Grounded on the
//! teacher's `Thread`/`ThreadInner`/`ReadyRef`/`RunningRef` shape; the fields
//! unique to strict-priority donation and MLFQS (`base_priority`,
//! `effective_priority`, `donors`, `waiting_for_lock`, `nice`, `recent_cpu`,
//! `wakeup_tick`) are additions this crate's semantics require.

use crate::arch::Arch;
use crate::consts::{NICE_MAX, NICE_MIN, PRI_MAX, PRI_MIN, THREAD_NAME_MAX};
use crate::fixed::Fixed;
use crate::mem::{ArcLite, Stack};
use crate::sync::Semaphore;
use portable_atomic::{AtomicI8, AtomicU64, AtomicU8, AtomicUsize, Ordering};

extern crate alloc;
use alloc::string::String;
use alloc::vec::Vec;

pub mod builder;
pub mod handle;

pub use builder::ThreadBuilder;
pub use handle::JoinHandle;

static NEXT_THREAD_ID: portable_atomic::AtomicU64 = portable_atomic::AtomicU64::new(1);

/// Allocate the next monotonically increasing thread id.
pub fn allocate_thread_id() -> ThreadId {
    let raw = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
    unsafe { ThreadId::new_unchecked(raw as usize) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(core::num::NonZeroUsize);

impl core::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ThreadId {
    /// Create a new thread id from a u64, clamping zero to 1.
    pub fn new(id: u64) -> Self {
        let id_usize = (id as usize).max(1);
        unsafe { Self(core::num::NonZeroUsize::new_unchecked(id_usize)) }
    }

    /// # Safety
    ///
    /// The caller must ensure `id` is non-zero and unique among live threads.
    pub unsafe fn new_unchecked(id: usize) -> Self {
        Self(unsafe { core::num::NonZeroUsize::new_unchecked(id) })
    }

    pub fn get(self) -> usize {
        self.0.get()
    }

    pub fn as_u64(self) -> u64 {
        self.0.get() as u64
    }
}

/// Thread lifecycle state. `Finished` is named `Dying` here to match the
/// vocabulary the scheduler core uses for a thread that has called
/// `thread_exit` but whose stack has not yet been reclaimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadState {
    Running = 0,
    Ready = 1,
    Blocked = 2,
    Dying = 3,
}

impl ThreadState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ThreadState::Running,
            1 => ThreadState::Ready,
            2 => ThreadState::Blocked,
            _ => ThreadState::Dying,
        }
    }
}

pub struct Thread {
    inner: ArcLite<ThreadInner>,
}

/// Shared thread state. Every `Thread`/`ReadyRef`/`RunningRef`/`JoinHandle`
/// clone points at the same `ThreadInner` via `ArcLite`.
pub struct ThreadInner {
    pub id: ThreadId,
    state: AtomicU8,
    base_priority: AtomicU8,
    effective_priority: AtomicU8,
    nice: AtomicI8,
    recent_cpu: spin::Mutex<Fixed>,
    /// Tick at which a sleeping thread becomes runnable again; meaningless
    /// unless the thread is on the sleep list.
    wakeup_tick: AtomicU64,
    /// Numeric id of the lock this thread is blocked trying to acquire, or 0.
    waiting_for_lock: AtomicUsize,
    /// Threads donating priority to this one because they are waiting on a
    /// lock this thread holds. Kept sorted by descending effective priority.
    donors: spin::Mutex<Vec<Thread>>,
    stack: spin::Mutex<Option<Stack>>,
    context: spin::Mutex<<crate::arch::DefaultArch as Arch>::SavedContext>,
    entry_point: Option<fn()>,
    /// Signalled once by `thread_exit`; `JoinHandle::join` waits on it.
    completion: Semaphore,
    name: spin::Mutex<Option<String>>,
}

impl Thread {
    /// Create a new thread with the given parameters. `priority` is both the
    /// initial base and effective priority.
    pub fn new(id: ThreadId, stack: Stack, entry_point: fn(), priority: u8, nice: i8) -> (Self, JoinHandle) {
        let priority = priority.clamp(PRI_MIN, PRI_MAX);
        let nice = nice.clamp(NICE_MIN, NICE_MAX);
        let inner = ThreadInner {
            id,
            state: AtomicU8::new(ThreadState::Ready as u8),
            base_priority: AtomicU8::new(priority),
            effective_priority: AtomicU8::new(priority),
            nice: AtomicI8::new(nice),
            recent_cpu: spin::Mutex::new(Fixed::ZERO),
            wakeup_tick: AtomicU64::new(0),
            waiting_for_lock: AtomicUsize::new(0),
            donors: spin::Mutex::new(Vec::new()),
            stack: spin::Mutex::new(Some(stack)),
            context: spin::Mutex::new(Default::default()),
            entry_point: Some(entry_point),
            completion: Semaphore::new(0),
            name: spin::Mutex::new(None),
        };

        let inner_arc = ArcLite::new(inner);
        let thread = Self { inner: inner_arc.clone() };

        if let Some(stack_bottom) = thread.stack_bottom() {
            let entry = entry_point as usize;
            thread.setup_initial_context(entry, stack_bottom as usize, 0);
        }

        let join_handle = JoinHandle::new(Thread { inner: inner_arc });

        (thread, join_handle)
    }

    pub fn id(&self) -> ThreadId {
        self.inner.id
    }

    pub fn state(&self) -> ThreadState {
        ThreadState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, new_state: ThreadState) {
        self.inner.state.store(new_state as u8, Ordering::Release);
    }

    pub fn is_runnable(&self) -> bool {
        matches!(self.state(), ThreadState::Ready | ThreadState::Running)
    }

    /// The priority used for scheduling: `max(base_priority, donors)`.
    pub fn priority(&self) -> u8 {
        self.inner.effective_priority.load(Ordering::Acquire)
    }

    pub fn base_priority(&self) -> u8 {
        self.inner.base_priority.load(Ordering::Acquire)
    }

    /// `thread_set_priority`: sets the base priority and recomputes the
    /// effective priority from the current donor set. No-op under MLFQS,
    /// enforced by the caller (`kernel::set_priority`), not here.
    pub fn set_base_priority(&self, new_priority: u8) {
        self.inner.base_priority.store(new_priority.clamp(PRI_MIN, PRI_MAX), Ordering::Release);
        self.recompute_effective_priority();
    }

    /// Recompute `effective_priority = max(base_priority, max(donor priorities))`.
    ///
    /// If this thread is currently sitting in the ready queue, re-bucket it
    /// there too — the queue buckets by priority at push time, and a
    /// `Ready` thread's bucket otherwise goes stale the moment donation
    /// changes its priority out from under it.
    pub fn recompute_effective_priority(&self) {
        let base = self.base_priority();
        let donor_max = self
            .inner
            .donors
            .lock()
            .iter()
            .map(|d| d.priority())
            .max()
            .unwrap_or(PRI_MIN);
        self.inner
            .effective_priority
            .store(base.max(donor_max), Ordering::Release);
        self.reposition_if_ready();
    }

    /// Used only by the MLFQS accounting pass, which computes priority
    /// directly rather than through donation (MLFQS disables donation).
    pub fn set_mlfqs_priority(&self, priority: u8) {
        let p = priority.clamp(PRI_MIN, PRI_MAX);
        self.inner.base_priority.store(p, Ordering::Release);
        self.inner.effective_priority.store(p, Ordering::Release);
        self.reposition_if_ready();
    }

    fn reposition_if_ready(&self) {
        if self.state() == ThreadState::Ready {
            crate::kernel::kernel().scheduler().reposition_ready(self.id());
        }
    }

    pub fn nice(&self) -> i8 {
        self.inner.nice.load(Ordering::Acquire)
    }

    /// Clamped to `[NICE_MIN, NICE_MAX]`, same as `set_base_priority` clamps
    /// to `[PRI_MIN, PRI_MAX]`.
    pub fn set_nice(&self, nice: i8) {
        self.inner.nice.store(nice.clamp(NICE_MIN, NICE_MAX), Ordering::Release);
    }

    pub fn recent_cpu(&self) -> Fixed {
        *self.inner.recent_cpu.lock()
    }

    pub fn set_recent_cpu(&self, value: Fixed) {
        *self.inner.recent_cpu.lock() = value;
    }

    pub fn increment_recent_cpu(&self) {
        let mut guard = self.inner.recent_cpu.lock();
        *guard += Fixed::from_int(1);
    }

    pub fn wakeup_tick(&self) -> u64 {
        self.inner.wakeup_tick.load(Ordering::Acquire)
    }

    pub fn set_wakeup_tick(&self, tick: u64) {
        self.inner.wakeup_tick.store(tick, Ordering::Release);
    }

    /// Numeric id (see `sync::lock::next_lock_id`) of the lock this thread is
    /// blocked acquiring, or `None`.
    pub fn waiting_for_lock(&self) -> Option<usize> {
        match self.inner.waiting_for_lock.load(Ordering::Acquire) {
            0 => None,
            id => Some(id),
        }
    }

    pub fn set_waiting_for_lock(&self, lock_id: Option<usize>) {
        self.inner
            .waiting_for_lock
            .store(lock_id.unwrap_or(0), Ordering::Release);
    }

    /// Insert `donor` into this thread's donor set, keeping it sorted by
    /// descending effective priority, then recompute our own effective
    /// priority and propagate up the donee chain.
    pub fn donate_from(&self, donor: Thread) {
        let mut donors = self.inner.donors.lock();
        let pos = donors
            .iter()
            .position(|d| d.priority() < donor.priority())
            .unwrap_or(donors.len());
        donors.insert(pos, donor);
        drop(donors);
        self.recompute_effective_priority();
    }

    /// Remove every donor currently waiting on `lock_id` (called by
    /// `lock_release`) and recompute our effective priority.
    pub fn remove_donors_waiting_on(&self, lock_id: usize) {
        self.inner
            .donors
            .lock()
            .retain(|d| d.waiting_for_lock() != Some(lock_id));
        self.recompute_effective_priority();
    }

    pub fn context_ptr(&self) -> *mut <crate::arch::DefaultArch as Arch>::SavedContext {
        let ctx_guard = self.inner.context.lock();
        let ptr = &*ctx_guard as *const _ as *mut _;
        drop(ctx_guard);
        ptr
    }

    #[allow(unused_variables, unused_mut)]
    pub fn setup_initial_context(&self, entry_point: usize, stack_top: usize, arg: usize) {
        let mut ctx_guard = self.inner.context.lock();

        #[cfg(target_arch = "aarch64")]
        {
            ctx_guard.x = [0; 31];
            ctx_guard.x[0] = arg as u64;
            ctx_guard.sp = stack_top as u64;
            ctx_guard.pc = entry_point as u64;
            ctx_guard.pstate = 0x3c5;

            #[cfg(feature = "full-fpu")]
            {
                ctx_guard.neon_state = [0; 32];
                ctx_guard.fpcr = 0;
                ctx_guard.fpsr = 0;
            }
        }

        #[cfg(not(target_arch = "aarch64"))]
        {
            let _ = (entry_point, stack_top, arg);
        }
    }

    pub fn stack_bottom(&self) -> Option<*mut u8> {
        self.inner.stack.lock().as_ref().map(|stack| stack.stack_bottom())
    }

    /// Check the installed stack canary (spec §7's "bad thread magic").
    pub fn check_stack_integrity(&self) -> bool {
        const CANARY: u64 = 0xDEAD_BEEF_CAFE_BABE;
        match &*self.inner.stack.lock() {
            Some(stack) => stack.check_canary(CANARY),
            None => false,
        }
    }

    pub fn install_stack_canary(&self) {
        const CANARY: u64 = 0xDEAD_BEEF_CAFE_BABE;
        if let Some(stack) = &*self.inner.stack.lock() {
            stack.install_canary(CANARY);
        }
    }

    /// Take this thread's stack out, releasing it back to the pool. Called
    /// by the dispatcher one dispatch after observing `Dying`, never by the
    /// exiting thread itself (it is still running on that stack).
    pub(crate) fn release_stack(&self) -> Option<Stack> {
        self.inner.stack.lock().take()
    }

    pub fn entry_point(&self) -> Option<fn()> {
        self.inner.entry_point
    }

    pub(crate) fn completion(&self) -> &Semaphore {
        &self.inner.completion
    }

    pub fn set_name(&self, name: &str) {
        let truncated: String = name.chars().take(THREAD_NAME_MAX).collect();
        *self.inner.name.lock() = Some(truncated);
    }

    pub fn name(&self) -> Option<String> {
        self.inner.name.lock().clone()
    }

    /// `thread_current`.
    pub fn current() -> Thread {
        crate::kernel::current_thread()
    }
}

/// `thread_init`.
pub fn init(config: crate::kernel::BootConfig) {
    crate::kernel::kernel().init(config);
}

/// `thread_start`.
pub fn start() {
    crate::kernel::kernel().start();
}

/// `thread_create`.
pub fn spawn(name: &str, priority: u8, entry: fn()) -> crate::errors::ThreadResult<JoinHandle> {
    crate::kernel::kernel().spawn(name, priority, entry)
}

/// `thread_tid`/`thread_name` go through `Thread::current()` directly.
pub fn current() -> Thread {
    Thread::current()
}

/// `thread_yield`.
pub fn yield_now() {
    crate::kernel::kernel().yield_now();
}

/// `thread_exit`.
pub fn exit() -> ! {
    crate::kernel::kernel().exit()
}

/// `thread_get_priority`.
pub fn get_priority() -> u8 {
    Thread::current().priority()
}

/// `thread_set_priority`: a no-op under `-mlfqs` (`ScheduleError::PriorityChangeNotAllowed`).
/// Yields only if, after the change, some other ready thread now outranks
/// the caller — lowering your own priority should give up the CPU,
/// raising it should not.
pub fn set_priority(new_priority: u8) -> Result<(), crate::errors::ScheduleError> {
    if crate::kernel::mlfqs_mode() {
        return Err(crate::errors::ScheduleError::PriorityChangeNotAllowed);
    }
    let current = Thread::current();
    current.set_base_priority(new_priority);
    if crate::kernel::kernel().scheduler().has_higher_priority_ready_than(current.priority()) {
        crate::kernel::kernel().yield_now();
    }
    Ok(())
}

/// `thread_get_nice`.
pub fn get_nice() -> i8 {
    Thread::current().nice()
}

/// `thread_set_nice`: only meaningful under `-mlfqs`, but harmless to call
/// otherwise (it just changes a value donation and the priority setter
/// ignore).
pub fn set_nice(nice: i8) {
    let current = Thread::current();
    current.set_nice(nice);
    crate::mlfqs::recompute_priority(&current);
    if crate::kernel::kernel().scheduler().has_higher_priority_ready_than(current.priority()) {
        crate::kernel::kernel().yield_now();
    }
}

impl Clone for Thread {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl PartialEq for Thread {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

unsafe impl Send for Thread {}
unsafe impl Sync for Thread {}
unsafe impl Send for ThreadInner {}
unsafe impl Sync for ThreadInner {}

/// A handle to a thread sitting in the ready queue.
#[derive(Clone)]
pub struct ReadyRef(pub Thread);

/// A handle to the thread currently executing on the CPU.
#[derive(Clone)]
pub struct RunningRef(pub Thread);

impl ReadyRef {
    pub fn start_running(self) -> RunningRef {
        self.0.set_state(ThreadState::Running);
        RunningRef(self.0)
    }

    pub fn priority(&self) -> u8 {
        self.0.priority()
    }

    pub fn id(&self) -> ThreadId {
        self.0.id()
    }
}

impl RunningRef {
    pub fn stop_running(self) -> ReadyRef {
        self.0.set_state(ThreadState::Ready);
        ReadyRef(self.0)
    }

    pub fn block(self) {
        self.0.set_state(ThreadState::Blocked);
    }

    /// Mark this thread `Dying` and wake any joiner. The stack is reclaimed
    /// by the *next* dispatch, never by the exiting thread itself.
    pub fn finish(self) {
        self.0.set_state(ThreadState::Dying);
        self.0.completion().up();
    }

    pub fn priority(&self) -> u8 {
        self.0.priority()
    }

    pub fn id(&self) -> ThreadId {
        self.0.id()
    }

    pub fn thread(&self) -> &Thread {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::{StackPool, StackSizeClass};

    #[cfg(feature = "std-shim")]
    #[test]
    fn test_thread_creation() {
        let pool = StackPool::new();
        let stack = pool.allocate(StackSizeClass::Small).unwrap();
        let thread_id = unsafe { ThreadId::new_unchecked(1) };

        let (thread, _join_handle) = Thread::new(thread_id, stack, || {}, 31, 0);

        assert_eq!(thread.id(), thread_id);
        assert_eq!(thread.state(), ThreadState::Ready);
        assert_eq!(thread.priority(), 31);
        assert!(thread.is_runnable());
    }

    #[cfg(feature = "std-shim")]
    #[test]
    fn test_thread_state_transitions() {
        let pool = StackPool::new();
        let stack = pool.allocate(StackSizeClass::Small).unwrap();
        let thread_id = unsafe { ThreadId::new_unchecked(1) };

        let (thread, _join_handle) = Thread::new(thread_id, stack, || {}, 31, 0);

        assert_eq!(thread.state(), ThreadState::Ready);
        thread.set_state(ThreadState::Running);
        assert_eq!(thread.state(), ThreadState::Running);
        thread.set_state(ThreadState::Blocked);
        assert!(!thread.is_runnable());
        thread.set_state(ThreadState::Dying);
        assert!(!thread.is_runnable());
    }

    #[cfg(feature = "std-shim")]
    #[test]
    fn donation_raises_and_lowers_effective_priority() {
        let pool = StackPool::new();
        let low_stack = pool.allocate(StackSizeClass::Small).unwrap();
        let high_stack = pool.allocate(StackSizeClass::Small).unwrap();
        let low_id = unsafe { ThreadId::new_unchecked(1) };
        let high_id = unsafe { ThreadId::new_unchecked(2) };

        let (low, _h1) = Thread::new(low_id, low_stack, || {}, 20, 0);
        let (high, _h2) = Thread::new(high_id, high_stack, || {}, 40, 0);

        assert_eq!(low.priority(), 20);
        low.donate_from(high.clone());
        assert_eq!(low.priority(), 40);

        high.set_waiting_for_lock(Some(7));
        low.remove_donors_waiting_on(7);
        assert_eq!(low.priority(), 20);
    }
}
