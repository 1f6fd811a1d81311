//! Scheduling constants shared across the core.
//!
//! Grounded on the teacher's `sched::trait_def::priority` module (a constants
//! submodule for scheduler priority bands); generalized here to the exact
//! priority range and cadence this scheduler uses.

/// Lowest legal priority value.
pub const PRI_MIN: u8 = 0;
/// Priority assigned to a newly created thread that doesn't request one.
pub const PRI_DEFAULT: u8 = 31;
/// Highest legal priority value.
pub const PRI_MAX: u8 = 63;

/// Ticks a thread may run before an involuntary preemption is requested.
pub const TIME_SLICE: u64 = 4;

/// Default timer frequency in Hz.
pub const TIMER_FREQ_DEFAULT: u32 = 100;
/// Minimum supported timer frequency in Hz.
pub const TIMER_FREQ_MIN: u32 = 19;
/// Maximum supported timer frequency in Hz.
pub const TIMER_FREQ_MAX: u32 = 1000;

/// Lowest legal `nice` value.
pub const NICE_MIN: i8 = -20;
/// Highest legal `nice` value.
pub const NICE_MAX: i8 = 20;

/// Maximum length of a thread name, not counting the trailing NUL.
pub const THREAD_NAME_MAX: usize = 15;
