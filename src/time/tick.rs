//! Tick-to-duration conversion. The monotonic tick count itself lives in
//! `sched` (see `sched::ticks`), since the preemption counter and MLFQS
//! cadence key off it directly; `TickCounter` only knows the current timer
//! frequency and how to convert between ticks and nanoseconds.

use crate::consts::{TIMER_FREQ_MAX, TIMER_FREQ_MIN};
use crate::errors::TimerError;
use portable_atomic::{AtomicU32, Ordering};

pub struct TickCounter {
    frequency: AtomicU32,
}

impl TickCounter {
    pub const fn new(frequency: u32) -> Self {
        Self { frequency: AtomicU32::new(frequency) }
    }

    pub fn frequency(&self) -> u32 {
        self.frequency.load(Ordering::Acquire)
    }

    pub fn set_frequency(&self, hz: u32) -> Result<(), TimerError> {
        if !(TIMER_FREQ_MIN..=TIMER_FREQ_MAX).contains(&hz) {
            return Err(TimerError::InvalidFrequency(hz));
        }
        self.frequency.store(hz, Ordering::Release);
        Ok(())
    }

    pub fn ns_per_tick(&self) -> u64 {
        1_000_000_000 / self.frequency() as u64
    }

    pub fn ticks(&self) -> u64 {
        crate::sched::ticks()
    }

    pub fn ticks_to_nanos(&self, ticks: u64) -> u64 {
        ticks * self.ns_per_tick()
    }

    pub fn nanos_to_ticks(&self, nanos: u64) -> u64 {
        nanos / self.ns_per_tick()
    }

    pub fn now(&self) -> super::Instant {
        super::Instant::from_nanos(self.ticks_to_nanos(self.ticks()))
    }
}

/// Global tick counter instance, defaulting to `TIMER_FREQ_DEFAULT` until
/// `thread::init` applies the boot configuration's frequency (if any).
pub static GLOBAL_TICK_COUNTER: TickCounter = TickCounter::new(crate::consts::TIMER_FREQ_DEFAULT);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequency_rejects_out_of_range() {
        let counter = TickCounter::new(100);
        assert!(counter.set_frequency(18).is_err());
        assert!(counter.set_frequency(1001).is_err());
        assert!(counter.set_frequency(100).is_ok());
    }

    #[test]
    fn tick_conversion_round_trips() {
        let counter = TickCounter::new(1000);
        assert_eq!(counter.ticks_to_nanos(1000), 1_000_000_000);
        assert_eq!(counter.nanos_to_ticks(1_000_000_000), 1000);
    }
}
