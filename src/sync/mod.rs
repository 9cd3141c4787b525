//! Synchronization service — bounded message queues and counting semaphores
//!
//! Objects live in fixed tables addressed by caller-chosen ids. Every
//! operation mutates the object and decides which waiter to wake in the same
//! `&mut` step, so a released unit is handed to exactly one party:
//! either a waiter or the object's availability count, never both.
//!
//! Blocking follows a poll-and-retry contract. A call that has to wait
//! enrolls the running task, blocks it and reports [`Error::Timeout`]
//! straight away. When the wait finishes the task is made Ready with a
//! recorded outcome, and its next call to the same operation on the same
//! object returns that outcome instead of competing again.

mod queue;
mod semaphore;

use core::array;
use core::fmt;

use crate::config::{MAX_QUEUES, MAX_SEMAPHORES};
use crate::error::{Error, KernelResult};
use crate::registry::TaskRegistry;
use crate::scheduler::Scheduler;
use crate::task::{TaskId, TaskState, WaitOn, Wake, WakeReason};

pub use queue::MessageQueue;
pub use semaphore::Semaphore;

/// Message queue identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId(pub u8);

/// Semaphore identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemaphoreId(pub u8);

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue {}", self.0)
    }
}

impl fmt::Display for SemaphoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "semaphore {}", self.0)
    }
}

/// Queue and semaphore tables
pub struct SyncService {
    queues: [Option<MessageQueue>; MAX_QUEUES],
    semaphores: [Option<Semaphore>; MAX_SEMAPHORES],
}

impl SyncService {
    pub fn new() -> Self {
        Self {
            queues: array::from_fn(|_| None),
            semaphores: array::from_fn(|_| None),
        }
    }

    pub fn queue(&self, id: QueueId) -> KernelResult<&MessageQueue> {
        self.queues
            .get(id.0 as usize)
            .ok_or(Error::InvalidParam)?
            .as_ref()
            .ok_or(Error::ResourceError)
    }

    fn queue_mut(&mut self, id: QueueId) -> KernelResult<&mut MessageQueue> {
        self.queues
            .get_mut(id.0 as usize)
            .ok_or(Error::InvalidParam)?
            .as_mut()
            .ok_or(Error::ResourceError)
    }

    pub fn semaphore(&self, id: SemaphoreId) -> KernelResult<&Semaphore> {
        self.semaphores
            .get(id.0 as usize)
            .ok_or(Error::InvalidParam)?
            .as_ref()
            .ok_or(Error::ResourceError)
    }

    fn semaphore_mut(&mut self, id: SemaphoreId) -> KernelResult<&mut Semaphore> {
        self.semaphores
            .get_mut(id.0 as usize)
            .ok_or(Error::InvalidParam)?
            .as_mut()
            .ok_or(Error::ResourceError)
    }

    /// Active queues with their ids
    pub fn queues(&self) -> impl Iterator<Item = (QueueId, &MessageQueue)> + '_ {
        self.queues
            .iter()
            .enumerate()
            .filter_map(|(i, q)| q.as_ref().map(|q| (QueueId(i as u8), q)))
    }

    /// Active semaphores with their ids
    pub fn semaphores(&self) -> impl Iterator<Item = (SemaphoreId, &Semaphore)> + '_ {
        self.semaphores
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (SemaphoreId(i as u8), s)))
    }

    /// Drop `task` from the waiter FIFO named by `wait`
    ///
    /// Used when a wait ends for a reason other than the object itself
    /// (timeout, suspension, deletion of the task).
    pub fn unlink(&mut self, wait: WaitOn, task: TaskId) -> bool {
        match wait {
            WaitOn::Send { queue, .. } => self
                .queue_mut(queue)
                .map(|q| q.senders.remove(task))
                .unwrap_or(false),
            WaitOn::Receive { queue } => self
                .queue_mut(queue)
                .map(|q| q.receivers.remove(task))
                .unwrap_or(false),
            WaitOn::Take { semaphore } => self
                .semaphore_mut(semaphore)
                .map(|s| s.waiters.remove(task))
                .unwrap_or(false),
        }
    }

    /// Hand back whatever `task`'s uncollected wake outcome holds
    ///
    /// Called before the task blocks again or is deleted. A granted unit
    /// goes through [`SyncService::give`] once more; a received item goes to
    /// the next receiver or back to the head of its queue. Outcomes that
    /// hold nothing are simply dropped.
    pub fn reclaim<A>(
        &mut self,
        task: TaskId,
        sched: &mut Scheduler,
        tasks: &mut TaskRegistry<A>,
    ) -> KernelResult<()> {
        let Some(wake) = tasks.get_mut(task).ok().and_then(|t| t.wake.take()) else {
            return Ok(());
        };
        self.restore(wake, sched, tasks)
    }

    fn restore<A>(
        &mut self,
        wake: Wake,
        sched: &mut Scheduler,
        tasks: &mut TaskRegistry<A>,
    ) -> KernelResult<()> {
        let result = match (wake.on, wake.reason) {
            (WaitOn::Take { semaphore }, WakeReason::Granted) => self.give(semaphore, sched, tasks),
            (WaitOn::Receive { queue }, WakeReason::Received(item)) => {
                self.requeue(queue, item, sched, tasks)
            }
            _ => Ok(()),
        };
        match result {
            // The object is gone, and the unit with it
            Err(Error::ResourceError) => Ok(()),
            other => other,
        }
    }

    /// How many times `task` sits in the FIFO named by `wait`
    pub fn enrolled(&self, wait: WaitOn, task: TaskId) -> usize {
        match wait {
            WaitOn::Send { queue, .. } => self.queue(queue).map(|q| q.senders.occurrences(task)),
            WaitOn::Receive { queue } => self.queue(queue).map(|q| q.receivers.occurrences(task)),
            WaitOn::Take { semaphore } => self.semaphore(semaphore).map(|s| s.waiters.occurrences(task)),
        }
        .unwrap_or(0)
    }

    /// Consistency walk over every object
    ///
    /// Checks counters against capacity, the "waiters only when nothing is
    /// available" rule, and that every enrolled waiter is a Blocked task
    /// waiting on exactly this object.
    pub fn check_integrity<A>(&self, tasks: &TaskRegistry<A>) -> KernelResult<()> {
        let waiter_ok = |id: TaskId, wait: WaitOn| {
            tasks
                .get(id)
                .map(|t| t.state == TaskState::Blocked && t.wait.is_some_and(|w| w.same_wait(&wait)))
                .unwrap_or(false)
        };

        for (id, q) in self.queues() {
            let ring_ok = q.ring.is_consistent();
            let receivers_ok = q.receivers.is_empty() || q.ring.is_empty();
            let senders_ok = q.senders.is_empty() || q.ring.is_full();
            let fifo_ok = q.receivers.iter().all(|t| waiter_ok(t, WaitOn::Receive { queue: id }))
                && q.senders.iter().all(|t| waiter_ok(t, WaitOn::Send { queue: id, item: 0 }));
            if !(ring_ok && receivers_ok && senders_ok && fifo_ok) {
                log::error!("{} failed integrity check", id);
                return Err(Error::IntegrityError);
            }
        }

        for (id, s) in self.semaphores() {
            let count_ok = s.count <= s.max_count && (s.count == 0 || s.waiters.is_empty());
            let fifo_ok = s.waiters.iter().all(|t| waiter_ok(t, WaitOn::Take { semaphore: id }));
            if !(count_ok && fifo_ok) {
                log::error!("{} failed integrity check", id);
                return Err(Error::IntegrityError);
            }
        }
        Ok(())
    }
}

impl Default for SyncService {
    fn default() -> Self {
        Self::new()
    }
}

/// What a retried call should report for a finished wait
///
/// `None` means the outcome does not settle the call and it should proceed
/// as a fresh attempt.
fn settle(reason: WakeReason) -> Option<KernelResult<()>> {
    match reason {
        WakeReason::Sent | WakeReason::Granted | WakeReason::Received(_) => Some(Ok(())),
        WakeReason::TimedOut => Some(Err(Error::Timeout)),
        WakeReason::Deleted => Some(Err(Error::ResourceError)),
        WakeReason::Aborted => None,
    }
}
