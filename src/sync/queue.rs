//! Bounded message queues

use log::{debug, trace, warn};

use super::{settle, QueueId, SyncService};
use crate::config::{MAX_QUEUE_SIZE, QUEUE_ITEM_SIZE};
use crate::error::{Error, KernelResult};
use crate::fifo::TaskFifo;
use crate::heap::{Allocator, Handle};
use crate::registry::TaskRegistry;
use crate::ring::Ring;
use crate::scheduler::Scheduler;
use crate::task::{WaitOn, WakeReason};

/// Fixed-capacity FIFO of `u32` items with send and receive waiters
///
/// Receivers only wait while the queue is empty and senders only while it
/// is full, so at most one of the two FIFOs is ever populated.
#[derive(Debug)]
pub struct MessageQueue {
    pub(super) ring: Ring<MAX_QUEUE_SIZE>,
    /// Buffer reservation from the allocator
    buffer: Handle,
    pub(super) senders: TaskFifo,
    pub(super) receivers: TaskFifo,
}

impl MessageQueue {
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    pub fn count(&self) -> usize {
        self.ring.len()
    }

    pub fn space(&self) -> usize {
        self.ring.space()
    }

    pub fn is_full(&self) -> bool {
        self.ring.is_full()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Tasks blocked waiting to send
    pub fn senders(&self) -> &TaskFifo {
        &self.senders
    }

    /// Tasks blocked waiting to receive
    pub fn receivers(&self) -> &TaskFifo {
        &self.receivers
    }
}

impl SyncService {
    /// Create queue `id` with room for `capacity` items
    pub fn queue_create<A: Allocator>(&mut self, id: QueueId, capacity: usize, allocator: &mut A) -> KernelResult<()> {
        let slot = self.queues.get_mut(id.0 as usize).ok_or(Error::InvalidParam)?;
        if slot.is_some() || capacity == 0 || capacity > MAX_QUEUE_SIZE {
            return Err(Error::InvalidParam);
        }
        let buffer = allocator
            .allocate(capacity * QUEUE_ITEM_SIZE)
            .ok_or(Error::Exhausted)?;
        *slot = Some(MessageQueue {
            ring: Ring::new(capacity),
            buffer,
            senders: TaskFifo::new(),
            receivers: TaskFifo::new(),
        });
        debug!("{} created with capacity {}", id, capacity);
        Ok(())
    }

    /// Delete queue `id`, waking every waiter with a `Deleted` outcome
    ///
    /// Returns the number of tasks woken.
    pub fn queue_delete<A: Allocator>(
        &mut self,
        id: QueueId,
        allocator: &mut A,
        sched: &mut Scheduler,
        tasks: &mut TaskRegistry<A>,
    ) -> KernelResult<usize> {
        let queue = self.queue_mut(id)?;
        let mut woken = 0;
        while let Some(task) = queue.senders.pop().or_else(|| queue.receivers.pop()) {
            sched.release(tasks, task, WakeReason::Deleted)?;
            woken += 1;
        }
        let buffer = queue.buffer;
        self.queues[id.0 as usize] = None;
        allocator.release(buffer);
        debug!("{} deleted, {} waiters woken", id, woken);
        Ok(woken)
    }

    /// Send `item` to queue `id` on behalf of the running task
    ///
    /// A waiting receiver gets the item directly. On a full queue,
    /// `timeout == 0` (or no running task) reports `Full`; otherwise the
    /// task blocks holding its item and `Timeout` is reported.
    pub fn send<A>(
        &mut self,
        id: QueueId,
        item: u32,
        timeout: u32,
        sched: &mut Scheduler,
        tasks: &mut TaskRegistry<A>,
    ) -> KernelResult<()> {
        let caller = sched.current();
        let wait = WaitOn::Send { queue: id, item };
        if let Some(outcome) = caller.and_then(|c| tasks.take_wake(c, &wait)).and_then(settle) {
            return outcome;
        }

        let queue = self.queue_mut(id)?;

        if let Some(receiver) = queue.receivers.pop() {
            trace!("{}: item {} handed to task {}", id, item, receiver);
            return sched.release(tasks, receiver, WakeReason::Received(item));
        }
        if queue.ring.push(item) {
            return Ok(());
        }

        let Some(caller) = caller.filter(|_| timeout > 0) else {
            return Err(Error::Full);
        };
        self.reclaim(caller, sched, tasks)?;
        let task = sched.block_current(tasks, Some(wait), timeout)?;
        if !self.queue_mut(id)?.senders.push(task) {
            return Err(Error::IntegrityError);
        }
        Err(Error::Timeout)
    }

    /// Receive the head item of queue `id` on behalf of the running task
    ///
    /// Freeing a slot moves the first waiting sender's item in and wakes
    /// it. On an empty queue, `timeout == 0` (or no running task) reports
    /// `Empty`; otherwise the task blocks and `Timeout` is reported.
    pub fn receive<A>(
        &mut self,
        id: QueueId,
        timeout: u32,
        sched: &mut Scheduler,
        tasks: &mut TaskRegistry<A>,
    ) -> KernelResult<u32> {
        let caller = sched.current();
        let wait = WaitOn::Receive { queue: id };
        if let Some(reason) = caller.and_then(|c| tasks.take_wake(c, &wait)) {
            if let WakeReason::Received(item) = reason {
                return Ok(item);
            }
            if let Some(Err(e)) = settle(reason) {
                return Err(e);
            }
        }

        let queue = self.queue_mut(id)?;

        if let Some(item) = queue.ring.pop() {
            if let Some(sender) = queue.senders.pop() {
                if let Some(WaitOn::Send { item: pending, .. }) = tasks.get(sender)?.wait {
                    queue.ring.push(pending);
                }
                trace!("{}: slot freed for task {}", id, sender);
                sched.release(tasks, sender, WakeReason::Sent)?;
            }
            return Ok(item);
        }

        let Some(caller) = caller.filter(|_| timeout > 0) else {
            return Err(Error::Empty);
        };
        self.reclaim(caller, sched, tasks)?;
        let task = sched.block_current(tasks, Some(wait), timeout)?;
        if !self.queue_mut(id)?.receivers.push(task) {
            return Err(Error::IntegrityError);
        }
        Err(Error::Timeout)
    }

    /// Return an item a receiver will never collect
    ///
    /// The next waiting receiver gets it; otherwise it goes back in front of
    /// the head. A queue refilled in the meantime has no room for it, and
    /// the item is dropped with a warning.
    pub(super) fn requeue<A>(
        &mut self,
        id: QueueId,
        item: u32,
        sched: &mut Scheduler,
        tasks: &mut TaskRegistry<A>,
    ) -> KernelResult<()> {
        let queue = self.queue_mut(id)?;
        if let Some(receiver) = queue.receivers.pop() {
            trace!("{}: returned item {} handed to task {}", id, item, receiver);
            return sched.release(tasks, receiver, WakeReason::Received(item));
        }
        if !queue.ring.push_front(item) {
            warn!("{}: no room to return item {}, dropped", id, item);
        }
        Ok(())
    }

    /// Read the head item of queue `id` without removing it
    pub fn peek(&self, id: QueueId) -> KernelResult<u32> {
        self.queue(id)?.ring.peek().ok_or(Error::Empty)
    }
}
