//! Synchronization primitives: counting semaphores, a priority-donating
//! lock, and a Mesa-semantics condition variable. All three block by
//! calling into `kernel`'s dispatcher rather than spinning, since spinning
//! on a single CPU with preemption disabled would deadlock against the
//! thread holding what's being waited on.

pub mod condvar;
pub mod lock;
pub mod semaphore;

pub use condvar::CondVar;
pub use lock::Lock;
pub use semaphore::Semaphore;
