//! `JoinHandle`: an additive convenience not named in the public operations
//! of §6 (Pintos' base threads project has no `thread_join`), kept because
//! the teacher crate already shipped one. Waits on the thread's completion
//! semaphore rather than busy-yielding, since we now have a real blocking
//! primitive to hand it.

use super::{Thread, ThreadId, ThreadState};

pub struct JoinHandle {
    thread: Thread,
}

impl JoinHandle {
    pub(super) fn new(thread: Thread) -> Self {
        Self { thread }
    }

    /// Block the calling thread until the joined thread reaches `Dying`.
    pub fn join(self) {
        self.thread.completion().down();
        // Another joiner could race in; leave the semaphore's count at 1 for
        // a second waiter rather than attempting re-broadcast semantics.
        self.thread.completion().up();
    }

    pub fn try_join(&self) -> bool {
        if self.thread.completion().try_down() {
            self.thread.completion().up();
            true
        } else {
            false
        }
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread.id()
    }

    pub fn is_alive(&self) -> bool {
        self.thread.state() != ThreadState::Dying
    }
}

unsafe impl Send for JoinHandle {}
unsafe impl Sync for JoinHandle {}

#[cfg(test)]
mod tests {
    use crate::mem::{StackPool, StackSizeClass};
    use crate::thread::{Thread, ThreadId, ThreadState};

    #[cfg(feature = "std-shim")]
    #[test]
    fn test_join_handle_basic() {
        let pool = StackPool::new();
        let stack = pool.allocate(StackSizeClass::Small).unwrap();
        let thread_id = unsafe { ThreadId::new_unchecked(1) };

        let (thread, join_handle) = Thread::new(thread_id, stack, || {}, 31, 0);

        assert_eq!(join_handle.thread_id(), thread_id);
        assert!(join_handle.is_alive());
        assert!(!join_handle.try_join());

        thread.set_state(ThreadState::Dying);
        thread.completion().up();

        assert!(!join_handle.is_alive());
        assert!(join_handle.try_join());
    }
}
