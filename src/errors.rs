//! Error types for the threading system.
//!
//! Invariant violations (bad stack magic, releasing a lock from a non-owner,
//! blocking from interrupt context, ...) are not represented here: they are
//! programming errors in the kernel itself and are asserted, not returned.
//! This module covers conditions a caller can legitimately recover from.

#![allow(clippy::uninlined_format_args)]

use core::fmt;

/// Result type for threading operations.
pub type ThreadResult<T> = Result<T, ThreadError>;

/// Top-level error type for all threading operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadError {
    /// Thread spawning errors.
    Spawn(SpawnError),
    /// Scheduling errors.
    Schedule(ScheduleError),
    /// Timer and timing errors.
    Timer(TimerError),
    /// Architecture-specific errors.
    Arch(ArchError),
}

/// Errors that can occur during thread spawning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnError {
    /// `thread_init` has not been called yet.
    NotInitialized,
    /// No free stack of the requested size class.
    OutOfMemory,
    /// The thread table is full.
    TooManyThreads,
    /// Priority outside `[PRI_MIN, PRI_MAX]`.
    InvalidPriority(u8),
}

/// Errors related to scheduling and synchronization operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleError {
    /// `thread_set_priority` called while `-mlfqs` is active.
    PriorityChangeNotAllowed,
    /// A lock/semaphore/condvar operation was attempted from interrupt
    /// context that is only legal from thread context.
    IllegalFromInterrupt,
    /// `lock_acquire` called by the thread that already holds the lock.
    AlreadyHeld,
}

/// Timer and timing related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerError {
    /// `TIMER_FREQ` outside the supported `[19, 1000]` Hz range.
    InvalidFrequency(u32),
}

/// Architecture-specific errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchError {
    /// The requested architecture feature is unavailable on this target.
    UnsupportedFeature,
}

impl fmt::Display for ThreadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadError::Spawn(e) => write!(f, "thread spawn error: {}", e),
            ThreadError::Schedule(e) => write!(f, "scheduling error: {}", e),
            ThreadError::Timer(e) => write!(f, "timer error: {}", e),
            ThreadError::Arch(e) => write!(f, "architecture error: {}", e),
        }
    }
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnError::NotInitialized => write!(f, "threading system not initialized"),
            SpawnError::OutOfMemory => write!(f, "out of memory for thread creation"),
            SpawnError::TooManyThreads => write!(f, "maximum number of threads reached"),
            SpawnError::InvalidPriority(p) => write!(f, "invalid priority: {}", p),
        }
    }
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleError::PriorityChangeNotAllowed => {
                write!(f, "priority change not allowed while mlfqs is active")
            }
            ScheduleError::IllegalFromInterrupt => {
                write!(f, "operation may block and cannot be called from interrupt context")
            }
            ScheduleError::AlreadyHeld => write!(f, "lock already held by the calling thread"),
        }
    }
}

impl fmt::Display for TimerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerError::InvalidFrequency(freq) => {
                write!(f, "timer frequency {} Hz outside supported [19, 1000] range", freq)
            }
        }
    }
}

impl fmt::Display for ArchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchError::UnsupportedFeature => write!(f, "unsupported architecture feature"),
        }
    }
}

impl From<SpawnError> for ThreadError {
    fn from(error: SpawnError) -> Self {
        ThreadError::Spawn(error)
    }
}

impl From<ScheduleError> for ThreadError {
    fn from(error: ScheduleError) -> Self {
        ThreadError::Schedule(error)
    }
}

impl From<TimerError> for ThreadError {
    fn from(error: TimerError) -> Self {
        ThreadError::Timer(error)
    }
}

impl From<ArchError> for ThreadError {
    fn from(error: ArchError) -> Self {
        ThreadError::Arch(error)
    }
}
