//! Builder-style thread creation, grounded on the teacher's `ThreadBuilder`.

use super::{JoinHandle, Thread, ThreadId};
use crate::consts::PRI_DEFAULT;
use crate::errors::SpawnError;
use crate::mem::{StackPool, StackSizeClass};

extern crate alloc;
use alloc::string::String;

pub struct ThreadBuilder {
    stack_size: StackSizeClass,
    priority: u8,
    nice: i8,
    name: Option<String>,
}

impl ThreadBuilder {
    pub fn new() -> Self {
        Self {
            stack_size: StackSizeClass::Medium,
            priority: PRI_DEFAULT,
            nice: 0,
            name: None,
        }
    }

    pub fn stack_size(mut self, size: StackSizeClass) -> Self {
        self.stack_size = size;
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn nice(mut self, nice: i8) -> Self {
        self.nice = nice;
        self
    }

    pub fn name<T: Into<String>>(mut self, name: T) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Allocate a stack and a TCB for `entry`, inheriting the builder's
    /// priority, nice value, and name. The caller is responsible for handing
    /// the resulting `Thread` to the scheduler's ready queue.
    pub fn spawn(
        self,
        entry: fn(),
        pool: &StackPool,
        next_id: ThreadId,
    ) -> Result<(Thread, JoinHandle), SpawnError> {
        let stack = pool.allocate(self.stack_size).ok_or(SpawnError::OutOfMemory)?;

        let (thread, handle) = Thread::new(next_id, stack, entry, self.priority, self.nice);
        thread.install_stack_canary();

        if let Some(name) = self.name {
            thread.set_name(&name);
        }

        Ok((thread, handle))
    }
}

impl Default for ThreadBuilder {
    fn default() -> Self {
        Self::new()
    }
}
