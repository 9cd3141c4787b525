//! Task registry — slot table and task state machine
//!
//! The registry exclusively owns every [`Task`]. All state changes go
//! through [`TaskRegistry::transition`], which keeps ready-queue membership
//! in step with the `Ready` state: a task is enrolled exactly when it
//! becomes Ready and unlinked exactly when it leaves Ready.

use core::array;

use heapless::Vec;
use log::{debug, warn};

use crate::config::{MAX_STACK_SIZE, MAX_TASKS, MIN_STACK_SIZE};
use crate::error::{Error, KernelResult};
use crate::heap::{Allocator, FixedHeap};
use crate::scheduler::ReadyQueues;
use crate::task::{Priority, Task, TaskFn, TaskId, TaskState, Wake, WaitOn, WakeReason};

/// Tasks released by [`TaskRegistry::age_delays`], with the wait they abandoned
pub type Expired = Vec<(TaskId, Option<WaitOn>), MAX_TASKS>;

/// Fixed-capacity task table
pub struct TaskRegistry<A = FixedHeap> {
    slots: [Option<Task<A>>; MAX_TASKS],
    count: usize,
}

impl<A> TaskRegistry<A> {
    pub fn new() -> Self {
        Self {
            slots: array::from_fn(|_| None),
            count: 0,
        }
    }

    /// Create a task: validate, take a slot, allocate its stack, enroll it
    ///
    /// Nothing is touched unless every step succeeds.
    pub fn create(
        &mut self,
        entry: TaskFn<A>,
        name: &str,
        priority: Priority,
        stack_size: usize,
        time_slice: u32,
        allocator: &mut A,
        ready: &mut ReadyQueues,
    ) -> KernelResult<TaskId>
    where
        A: Allocator,
    {
        if !priority.is_valid() || !(MIN_STACK_SIZE..=MAX_STACK_SIZE).contains(&stack_size) {
            warn!("task '{}': rejected (priority {}, stack {})", name, priority.0, stack_size);
            return Err(Error::InvalidParam);
        }
        let idx = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(Error::Exhausted)?;
        let stack = allocator.allocate(stack_size).ok_or_else(|| {
            warn!("task '{}': stack allocation of {} bytes failed", name, stack_size);
            Error::Exhausted
        })?;

        let id = TaskId(idx as u8);
        if !ready.enqueue(priority, id) {
            allocator.release(stack);
            return Err(Error::IntegrityError);
        }
        self.slots[idx] = Some(Task::new(id, name, entry, priority, stack, stack_size, time_slice));
        self.count += 1;

        debug!("task '{}' created with id {}, priority {}", name, id, priority.0);
        Ok(id)
    }

    /// Free a task's slot and stack
    ///
    /// The caller unlinks it from any waiter FIFO first; ready-queue
    /// membership is dropped here.
    pub fn delete(&mut self, id: TaskId, allocator: &mut A, ready: &mut ReadyQueues) -> KernelResult<()>
    where
        A: Allocator,
    {
        let task = self.get(id)?;
        if task.state == TaskState::Ready {
            ready.remove(task.priority, id);
        }
        let stack = task.stack;
        self.slots[id.index()] = None;
        self.count -= 1;
        allocator.release(stack);

        debug!("task {} deleted", id);
        Ok(())
    }

    /// Look up an active task
    pub fn get(&self, id: TaskId) -> KernelResult<&Task<A>> {
        self.slots
            .get(id.index())
            .ok_or(Error::InvalidParam)?
            .as_ref()
            .ok_or(Error::ResourceError)
    }

    pub fn get_mut(&mut self, id: TaskId) -> KernelResult<&mut Task<A>> {
        self.slots
            .get_mut(id.index())
            .ok_or(Error::InvalidParam)?
            .as_mut()
            .ok_or(Error::ResourceError)
    }

    /// Current state of an active task
    pub fn get_state(&self, id: TaskId) -> KernelResult<TaskState> {
        self.get(id).map(|t| t.state)
    }

    /// Move a task to `to`, keeping ready-queue membership consistent
    ///
    /// Returns the previous state. Deleted tasks are rejected by the
    /// lookup, so deletion stays terminal.
    pub fn transition(&mut self, id: TaskId, to: TaskState, ready: &mut ReadyQueues) -> KernelResult<TaskState> {
        let task = self.get_mut(id)?;
        let from = task.state;
        if from == to {
            return Ok(from);
        }
        if to == TaskState::Ready && !ready.enqueue(task.priority, id) {
            return Err(Error::IntegrityError);
        }
        if from == TaskState::Ready {
            ready.remove(task.priority, id);
        }
        if from == TaskState::Running {
            task.stats.context_switches += 1;
        }
        task.state = to;
        Ok(from)
    }

    /// One tick of delay aging
    ///
    /// Every Blocked task with a running delay counts down; at zero it
    /// becomes Ready again. A task that was also waiting on a queue or
    /// semaphore gets a `TimedOut` outcome and is reported so the caller can
    /// unlink it from that object's FIFO.
    pub fn age_delays(&mut self, ready: &mut ReadyQueues) -> KernelResult<Expired> {
        let mut expired = Expired::new();
        for idx in 0..MAX_TASKS {
            let Some(task) = self.slots[idx].as_mut() else { continue };
            if task.state != TaskState::Blocked || task.delay_ticks == 0 {
                continue;
            }
            task.delay_ticks -= 1;
            if task.delay_ticks > 0 {
                continue;
            }
            let wait = task.wait.take();
            if let Some(on) = wait {
                task.wake = Some(Wake { on, reason: WakeReason::TimedOut });
            }
            let id = task.id;
            self.transition(id, TaskState::Ready, ready)?;
            // Cannot overflow: at most one entry per slot
            let _ = expired.push((id, wait));
        }
        Ok(expired)
    }

    /// Consume a finished-wait outcome matching `on`
    pub fn take_wake(&mut self, id: TaskId, on: &WaitOn) -> Option<WakeReason> {
        let task = self.get_mut(id).ok()?;
        match task.wake {
            Some(wake) if wake.on.same_wait(on) => {
                task.wake = None;
                Some(wake.reason)
            }
            _ => None,
        }
    }

    /// Number of active tasks
    pub fn count(&self) -> usize {
        self.count
    }

    /// Active tasks in slot order
    pub fn iter(&self) -> impl Iterator<Item = &Task<A>> + '_ {
        self.slots.iter().flatten()
    }
}

impl<A> Default for TaskRegistry<A> {
    fn default() -> Self {
        Self::new()
    }
}
