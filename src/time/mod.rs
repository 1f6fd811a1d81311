//! Monotonic time and the tick-driven timer facility: `Instant`/`Duration`
//! for measuring real time off the ARM Generic Timer, plus the public
//! `timer_ticks`/`timer_sleep`/`timer_msleep`/`timer_usleep`/`timer_nsleep`
//! surface (§4.2, §4.7). The CFS-style virtual-runtime `TimeSlice` the
//! teacher used to decide preemption is dropped outright: preemption here
//! is the flat `TIME_SLICE`-tick rule in `sched::Scheduler`, not a
//! priority-weighted quantum (see DESIGN.md).

pub mod tick;

pub use tick::{TickCounter, GLOBAL_TICK_COUNTER};

use crate::errors::TimerError;

/// Nanoseconds since some arbitrary epoch.
///
/// This is used for high-resolution timing and scheduling decisions.
/// The actual epoch is implementation-defined and may vary between architectures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Instant(u64);

impl Instant {
    /// Create a new instant from nanoseconds since epoch.
    pub fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Get nanoseconds since epoch.
    pub fn as_nanos(self) -> u64 {
        self.0
    }

    /// Get the current instant.
    ///
    /// This reads the current time from the ARM Generic Timer and converts
    /// to nanoseconds for consistent time calculations.
    pub fn now() -> Self {
        #[cfg(target_arch = "aarch64")]
        {
            let cnt: u64;
            let freq: u64;
            unsafe {
                core::arch::asm!(
                    "mrs {}, cntpct_el0",
                    out(reg) cnt,
                    options(nostack, nomem, preserves_flags)
                );
                core::arch::asm!(
                    "mrs {}, cntfrq_el0",
                    out(reg) freq,
                    options(nostack, nomem, preserves_flags)
                );
            }
            let nanos = if freq > 0 {
                ((cnt as u128 * 1_000_000_000) / freq as u128) as u64
            } else {
                0
            };
            Self(nanos)
        }

        #[cfg(not(target_arch = "aarch64"))]
        {
            Self(0)
        }
    }

    /// Calculate duration since another instant.
    ///
    /// # Panics
    ///
    /// Panics if `earlier` is after `self`.
    pub fn duration_since(self, earlier: Instant) -> Duration {
        Duration::from_nanos(self.0 - earlier.0)
    }
}

impl core::ops::Add<Duration> for Instant {
    type Output = Self;

    fn add(self, duration: Duration) -> Self {
        Self(self.0 + duration.as_nanos())
    }
}

/// A duration of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Duration(u64);

impl Duration {
    pub fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub fn from_micros(micros: u64) -> Self {
        Self(micros * 1_000)
    }

    pub fn from_millis(millis: u64) -> Self {
        Self(millis * 1_000_000)
    }

    pub fn as_nanos(self) -> u64 {
        self.0
    }

    pub fn as_micros(self) -> u64 {
        self.0 / 1_000
    }

    pub fn as_millis(self) -> u64 {
        self.0 / 1_000_000
    }
}

/// `timer_ticks`: ticks elapsed since boot.
pub fn ticks() -> u64 {
    crate::sched::ticks()
}

/// `timer_sleep`: block the calling thread for at least `ticks` timer
/// ticks. `ticks <= 0` returns immediately, matching `timer_sleep`'s
/// documented "did not happen" behavior rather than blocking for zero time.
pub fn sleep(ticks_to_wait: i64) {
    if ticks_to_wait <= 0 {
        return;
    }
    let wakeup = ticks().saturating_add(ticks_to_wait as u64);
    crate::kernel::kernel().sleep_current_until(wakeup);
}

/// `timer_msleep`/`timer_usleep`/`timer_nsleep`: sleep for a duration finer
/// than one tick. Durations at least one tick long delegate to [`sleep`];
/// shorter ones busy-wait using the current tick frequency to convert the
/// requested duration into an elapsed-tick budget (§4.2.1).
pub fn msleep(ms: u64) {
    sleep_duration(Duration::from_millis(ms));
}

pub fn usleep(us: u64) {
    sleep_duration(Duration::from_micros(us));
}

pub fn nsleep(ns: u64) {
    sleep_duration(Duration::from_nanos(ns));
}

fn sleep_duration(duration: Duration) {
    let ns_per_tick = GLOBAL_TICK_COUNTER.ns_per_tick();
    let whole_ticks = (duration.as_nanos() / ns_per_tick) as i64;
    if whole_ticks > 0 {
        sleep(whole_ticks);
        return;
    }
    busy_wait_nanos(duration.as_nanos());
}

/// Spin for approximately `nanos` nanoseconds using `Instant::now()`. Only
/// used for sub-tick delays, where blocking the scheduler would overshoot
/// by up to a whole tick.
fn busy_wait_nanos(nanos: u64) {
    let start = Instant::now();
    while Instant::now().duration_since(start).as_nanos() < nanos {
        core::hint::spin_loop();
    }
}

/// Reconfigure the timer frequency. Boot-time only in practice (Pintos'
/// `-hz` flag analogue); out of range values are rejected rather than
/// silently clamped, since a wrong `TIMER_FREQ` changes every
/// tick-to-duration conversion in the system.
pub fn set_frequency(hz: u32) -> Result<(), TimerError> {
    GLOBAL_TICK_COUNTER.set_frequency(hz)
}

pub fn frequency() -> u32 {
    GLOBAL_TICK_COUNTER.frequency()
}
