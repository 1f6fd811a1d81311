//! 4.4BSD-style multi-level feedback queue scheduler accounting.
//!
//! Pure fixed-point formulas, grounded on the `other_examples/` ockernel
//! scheduler's `calc_cpu_time`/`calc_load_avg` (themselves the standard
//! 4.4BSD formulas): this module knows nothing about the ready queue or the
//! thread table, it only turns `(recent_cpu, nice, load_avg, ready_count)`
//! into new values. `kernel::tick_isr` is the driver that calls these at
//! the per-4-tick and per-second cadences and writes the results back onto
//! `Thread`/`Scheduler`.

use crate::consts::{PRI_MAX, PRI_MIN};
use crate::fixed::Fixed;
use crate::sched::Scheduler;
use crate::thread::Thread;

/// `priority = PRI_MAX - (recent_cpu / 4) - (nice * 2)`, clamped to
/// `[PRI_MIN, PRI_MAX]`.
pub fn next_priority(recent_cpu: Fixed, nice: i8) -> u8 {
    let term = recent_cpu.div_int(4);
    let nice_term = Fixed::from_int(nice as i64 * 2);
    let raw = Fixed::from_int(PRI_MAX as i64) - term - nice_term;
    raw.clamp_to_int(PRI_MIN as i64, PRI_MAX as i64) as u8
}

/// `load_avg = (59/60) * load_avg + (1/60) * ready_threads`, where
/// `ready_threads` counts the running thread (if not idle) plus everything
/// on the ready queue.
pub fn next_load_avg(prev: Fixed, ready_threads: u64) -> Fixed {
    let fifty_nine_sixtieths = Fixed::from_int(59).div(Fixed::from_int(60));
    let one_sixtieth = Fixed::from_int(1).div(Fixed::from_int(60));
    fifty_nine_sixtieths.mul(prev) + one_sixtieth.mul(Fixed::from_int(ready_threads as i64))
}

/// `recent_cpu = (2*load_avg)/(2*load_avg + 1) * recent_cpu + nice`.
pub fn next_recent_cpu(prev: Fixed, load_avg: Fixed, nice: i8) -> Fixed {
    let two_load_avg = load_avg.mul_int(2);
    let coefficient = two_load_avg.div(two_load_avg + Fixed::from_int(1));
    coefficient.mul(prev) + Fixed::from_int(nice as i64)
}

/// Recompute and install one thread's MLFQS priority from its current
/// `recent_cpu`/`nice`. Called every 4 ticks for every live thread.
pub fn recompute_priority(thread: &Thread) {
    let priority = next_priority(thread.recent_cpu(), thread.nice());
    thread.set_mlfqs_priority(priority);
}

/// Once-a-second pass: refresh the system load average, then every
/// thread's `recent_cpu` and (since `recent_cpu` moved) its priority.
pub fn recompute_all(scheduler: &Scheduler, ready_threads: u64) {
    let load_avg = next_load_avg(scheduler.load_avg(), ready_threads);
    scheduler.set_load_avg(load_avg);

    for thread in scheduler.all_threads() {
        let recent_cpu = next_recent_cpu(thread.recent_cpu(), load_avg, thread.nice());
        thread.set_recent_cpu(recent_cpu);
        recompute_priority(&thread);
    }
}

/// `thread_get_load_avg`: the system load average, ×100 rounded.
pub fn load_avg_x100(scheduler: &Scheduler) -> i64 {
    scheduler.load_avg().to_int_round_x100()
}

/// `thread_get_recent_cpu`: a thread's `recent_cpu`, ×100 rounded.
pub fn recent_cpu_x100(thread: &Thread) -> i64 {
    thread.recent_cpu().to_int_round_x100()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_system_priority_is_default_minus_nothing() {
        assert_eq!(next_priority(Fixed::ZERO, 0), PRI_MAX);
    }

    #[test]
    fn heavy_cpu_use_lowers_priority() {
        let light = next_priority(Fixed::from_int(4), 0);
        let heavy = next_priority(Fixed::from_int(40), 0);
        assert!(heavy < light);
    }

    #[test]
    fn positive_nice_lowers_priority() {
        let neutral = next_priority(Fixed::ZERO, 0);
        let nice = next_priority(Fixed::ZERO, 10);
        assert!(nice < neutral);
    }

    #[test]
    fn load_avg_tracks_ready_count_over_time() {
        let mut avg = Fixed::ZERO;
        for _ in 0..120 {
            avg = next_load_avg(avg, 1);
        }
        // Converges toward 1.0 with a constantly-ready single thread.
        assert!(avg.to_int_round() == 1);
    }

    #[test]
    fn recent_cpu_decays_toward_zero_when_idle_under_load() {
        let load_avg = Fixed::from_int(1);
        let mut cpu = Fixed::from_int(100);
        for _ in 0..1000 {
            cpu = next_recent_cpu(cpu, load_avg, 0);
        }
        assert!(cpu.to_int_trunc() < 5);
    }

    /// MLFQS monotonicity law (§8): holding `nice` fixed, a thread that has
    /// burned more `recent_cpu` never has a higher priority than one that
    /// has burned less.
    #[test]
    fn monotonicity_law_more_cpu_never_raises_priority() {
        let light_usage = next_priority(Fixed::from_int(8), 0);
        let heavy_usage = next_priority(Fixed::from_int(16), 0);
        assert!(heavy_usage <= light_usage);
    }

    /// S5 — MLFQS fairness: three CPU-bound `nice=0` threads run for many
    /// ticks under identical conditions (each always ready, one always
    /// running); their `recent_cpu` values must track each other, not drift
    /// apart, which is the precondition for the aggregate-CPU-time fairness
    /// the scenario describes.
    #[test]
    fn symmetric_cpu_bound_threads_track_each_other() {
        let load_avg = Fixed::from_int(3);
        let mut cpu = [Fixed::ZERO; 3];
        for _ in 0..400 {
            for c in cpu.iter_mut() {
                *c += Fixed::from_int(1);
                *c = next_recent_cpu(*c, load_avg, 0);
            }
        }
        assert_eq!(cpu[0], cpu[1]);
        assert_eq!(cpu[1], cpu[2]);
        assert_eq!(next_priority(cpu[0], 0), next_priority(cpu[2], 0));
    }
}
