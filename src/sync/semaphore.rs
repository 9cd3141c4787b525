//! Counting semaphores

use log::{debug, trace};

use super::{settle, SemaphoreId, SyncService};
use crate::error::{Error, KernelResult};
use crate::fifo::TaskFifo;
use crate::registry::TaskRegistry;
use crate::scheduler::Scheduler;
use crate::task::{WaitOn, WakeReason};

/// Counting semaphore with a FIFO of waiters
///
/// A unit released while someone waits goes straight to the first waiter,
/// so `count > 0` and a non-empty waiter FIFO never coexist.
#[derive(Debug)]
pub struct Semaphore {
    pub(super) count: u8,
    pub(super) max_count: u8,
    pub(super) waiters: TaskFifo,
}

impl Semaphore {
    pub fn count(&self) -> u8 {
        self.count
    }

    pub fn max_count(&self) -> u8 {
        self.max_count
    }

    /// Tasks blocked in `take`
    pub fn waiters(&self) -> &TaskFifo {
        &self.waiters
    }
}

impl SyncService {
    /// Create semaphore `id` holding `initial` of `max_count` units
    ///
    /// `max_count` is a `u8`, so it never exceeds
    /// [`SEMAPHORE_MAX_COUNT`](crate::config::SEMAPHORE_MAX_COUNT).
    pub fn semaphore_create(&mut self, id: SemaphoreId, initial: u8, max_count: u8) -> KernelResult<()> {
        let slot = self.semaphores.get_mut(id.0 as usize).ok_or(Error::InvalidParam)?;
        if slot.is_some() || max_count == 0 || initial > max_count {
            return Err(Error::InvalidParam);
        }
        *slot = Some(Semaphore {
            count: initial,
            max_count,
            waiters: TaskFifo::new(),
        });
        debug!("{} created (initial {}, max {})", id, initial, max_count);
        Ok(())
    }

    /// Delete semaphore `id`, waking every waiter with a `Deleted` outcome
    ///
    /// Returns the number of tasks woken.
    pub fn semaphore_delete<A>(
        &mut self,
        id: SemaphoreId,
        sched: &mut Scheduler,
        tasks: &mut TaskRegistry<A>,
    ) -> KernelResult<usize> {
        let sem = self.semaphore_mut(id)?;
        let mut woken = 0;
        while let Some(task) = sem.waiters.pop() {
            sched.release(tasks, task, WakeReason::Deleted)?;
            woken += 1;
        }
        self.semaphores[id.0 as usize] = None;
        debug!("{} deleted, {} waiters woken", id, woken);
        Ok(woken)
    }

    /// Take one unit on behalf of the running task
    ///
    /// With no unit available, `timeout == 0` (or no running task) reports
    /// `Timeout` at once; otherwise the task joins the waiter FIFO, blocks
    /// and `Timeout` is reported. A later `give` transfers the unit to it,
    /// and its retried `take` then succeeds without touching the count.
    pub fn take<A>(
        &mut self,
        id: SemaphoreId,
        timeout: u32,
        sched: &mut Scheduler,
        tasks: &mut TaskRegistry<A>,
    ) -> KernelResult<()> {
        let caller = sched.current();
        let wait = WaitOn::Take { semaphore: id };
        if let Some(outcome) = caller.and_then(|c| tasks.take_wake(c, &wait)).and_then(settle) {
            return outcome;
        }

        let sem = self.semaphore_mut(id)?;
        if sem.count > 0 {
            sem.count -= 1;
            return Ok(());
        }
        let Some(caller) = caller.filter(|_| timeout > 0) else {
            return Err(Error::Timeout);
        };
        self.reclaim(caller, sched, tasks)?;
        let task = sched.block_current(tasks, Some(wait), timeout)?;
        if !self.semaphore_mut(id)?.waiters.push(task) {
            return Err(Error::IntegrityError);
        }
        Err(Error::Timeout)
    }

    /// Release one unit
    ///
    /// The first waiter, if any, receives it directly and the count stays
    /// put. Otherwise the count rises, saturating at `max_count`.
    pub fn give<A>(&mut self, id: SemaphoreId, sched: &mut Scheduler, tasks: &mut TaskRegistry<A>) -> KernelResult<()> {
        let sem = self.semaphore_mut(id)?;
        if let Some(waiter) = sem.waiters.pop() {
            trace!("{}: unit handed to task {}", id, waiter);
            return sched.release(tasks, waiter, WakeReason::Granted);
        }
        if sem.count < sem.max_count {
            sem.count += 1;
        } else {
            trace!("{}: give at max count {} ignored", id, sem.max_count);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::FixedHeap;
    use crate::kernel::Kernel;
    use crate::task::{Priority, TaskId, TaskState};

    fn noop(_: &mut Kernel, _: TaskId) {}

    struct Fixture {
        sync: SyncService,
        tasks: TaskRegistry,
        heap: FixedHeap,
        sched: Scheduler,
    }

    impl Fixture {
        fn new(initial: u8, max: u8) -> Self {
            let mut sync = SyncService::new();
            sync.semaphore_create(SemaphoreId(0), initial, max).unwrap();
            Self { sync, tasks: TaskRegistry::new(), heap: FixedHeap::new(), sched: Scheduler::new() }
        }

        fn spawn(&mut self) -> TaskId {
            self.tasks
                .create(noop, "t", Priority::MEDIUM, 128, 10, &mut self.heap, self.sched.ready_mut())
                .unwrap()
        }

        fn run_as(&mut self, id: TaskId) {
            self.sched.transition(&mut self.tasks, id, TaskState::Running).unwrap();
        }

        fn take(&mut self, timeout: u32) -> KernelResult<()> {
            self.sync.take(SemaphoreId(0), timeout, &mut self.sched, &mut self.tasks)
        }

        fn give(&mut self) -> KernelResult<()> {
            self.sync.give(SemaphoreId(0), &mut self.sched, &mut self.tasks)
        }

        fn count(&self) -> u8 {
            self.sync.semaphore(SemaphoreId(0)).unwrap().count()
        }
    }

    #[test]
    fn test_create_validation() {
        let mut sync = SyncService::new();
        assert_eq!(sync.semaphore_create(SemaphoreId(0), 2, 1), Err(Error::InvalidParam));
        assert_eq!(sync.semaphore_create(SemaphoreId(0), 0, 0), Err(Error::InvalidParam));
        assert_eq!(sync.semaphore_create(SemaphoreId(7), 0, 1), Err(Error::InvalidParam));
        sync.semaphore_create(SemaphoreId(0), 0, 1).unwrap();
        assert_eq!(sync.semaphore_create(SemaphoreId(0), 0, 1), Err(Error::InvalidParam));
    }

    #[test]
    fn test_mutex_handoff() {
        let mut f = Fixture::new(1, 1);
        let t1 = f.spawn();
        let t2 = f.spawn();

        f.run_as(t1);
        assert_eq!(f.take(0), Ok(()));
        assert_eq!(f.count(), 0);

        f.run_as(t2);
        assert_eq!(f.take(0), Err(Error::Timeout));
        assert_eq!(f.tasks.get_state(t2), Ok(TaskState::Running));
        assert_eq!(f.take(10), Err(Error::Timeout));
        assert_eq!(f.tasks.get_state(t2), Ok(TaskState::Blocked));

        f.run_as(t1);
        assert_eq!(f.give(), Ok(()));
        assert_eq!(f.tasks.get_state(t2), Ok(TaskState::Ready));
        assert_eq!(f.count(), 0);
        f.sync.check_integrity(&f.tasks).unwrap();

        // The transferred unit is honoured on retry
        f.run_as(t2);
        assert_eq!(f.take(0), Ok(()));
        assert_eq!(f.count(), 0);
    }

    #[test]
    fn test_give_saturates() {
        let mut f = Fixture::new(0, 2);
        for _ in 0..5 {
            assert_eq!(f.give(), Ok(()));
        }
        assert_eq!(f.count(), 2);
    }

    #[test]
    fn test_waiters_woken_in_arrival_order() {
        let mut f = Fixture::new(0, 3);
        let a = f.spawn();
        let b = f.spawn();
        for id in [a, b] {
            f.run_as(id);
            assert_eq!(f.take(crate::config::WAIT_FOREVER), Err(Error::Timeout));
        }
        f.give().unwrap();
        assert_eq!(f.tasks.get_state(a), Ok(TaskState::Ready));
        assert_eq!(f.tasks.get_state(b), Ok(TaskState::Blocked));
        f.give().unwrap();
        assert_eq!(f.tasks.get_state(b), Ok(TaskState::Ready));
        assert_eq!(f.count(), 0);
    }

    #[test]
    fn test_delete_wakes_waiters_with_error() {
        let mut f = Fixture::new(0, 1);
        let a = f.spawn();
        f.run_as(a);
        assert_eq!(f.take(5), Err(Error::Timeout));
        assert_eq!(f.sync.semaphore_delete(SemaphoreId(0), &mut f.sched, &mut f.tasks), Ok(1));
        assert_eq!(f.tasks.get_state(a), Ok(TaskState::Ready));
        f.run_as(a);
        assert_eq!(f.take(0), Err(Error::ResourceError));
        assert_eq!(f.give(), Err(Error::ResourceError));
    }
}
