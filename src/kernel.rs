//! Kernel — the single owned context
//!
//! Combines registry + scheduler + synchronization service + allocator +
//! tick clock. Every operation takes `&mut self`, which makes each one a
//! critical section with respect to scheduling decisions. Independent
//! kernels can coexist (one per test, for instance); nothing is global.

use log::{debug, error, info, warn};

use crate::config::{KernelConfig, MIN_STACK_SIZE, WAIT_FOREVER};
use crate::error::{Error, KernelResult};
use crate::heap::{Allocator, FixedHeap};
use crate::registry::TaskRegistry;
use crate::scheduler::{Scheduler, SchedulerStats};
use crate::sync::{MessageQueue, QueueId, Semaphore, SemaphoreId, SyncService};
use crate::task::{Priority, Task, TaskFn, TaskId, TaskState, WakeReason};
use crate::timer::TickClock;

/// Idle routine: nothing to do (a target port would sleep until the next
/// interrupt here)
fn idle_entry<A>(_kernel: &mut Kernel<A>, _id: TaskId) {}

/// Kernel instance
pub struct Kernel<A = FixedHeap> {
    config: KernelConfig,
    registry: TaskRegistry<A>,
    scheduler: Scheduler,
    sync: SyncService,
    allocator: A,
    clock: TickClock,
    /// Set once a consistency walk fails; the kernel refuses to continue
    halted: bool,
}

impl Kernel<FixedHeap> {
    /// Kernel backed by the reference [`FixedHeap`]
    pub fn new(config: KernelConfig) -> KernelResult<Self> {
        Self::with_allocator(config, FixedHeap::new())
    }
}

impl<A: Allocator> Kernel<A> {
    /// Kernel over a caller-supplied allocator; creates the idle task
    pub fn with_allocator(config: KernelConfig, allocator: A) -> KernelResult<Self> {
        let mut kernel = Self {
            config,
            registry: TaskRegistry::new(),
            scheduler: Scheduler::new(),
            sync: SyncService::new(),
            allocator,
            clock: TickClock::new(config.tick_rate_hz),
            halted: false,
        };
        let idle = kernel.task_create(idle_entry::<A>, "IDLE", Priority::IDLE, MIN_STACK_SIZE)?;
        kernel.scheduler.ready_mut().set_idle(Priority::IDLE, idle);
        debug!("kernel initialized, idle task {}", idle);
        Ok(kernel)
    }

    // ---- Task registry ----

    /// Create a Ready task
    pub fn task_create(
        &mut self,
        entry: TaskFn<A>,
        name: &str,
        priority: Priority,
        stack_size: usize,
    ) -> KernelResult<TaskId> {
        self.registry.create(
            entry,
            name,
            priority,
            stack_size,
            self.config.time_slice_ticks,
            &mut self.allocator,
            self.scheduler.ready_mut(),
        )
    }

    /// Delete a task, unlinking it from every queue it sits in
    ///
    /// A semaphore unit or queue item handed to the task but not yet
    /// collected is passed on, see [`SyncService::reclaim`].
    pub fn task_delete(&mut self, id: TaskId) -> KernelResult<()> {
        self.reject_idle(id)?;
        let task = self.registry.get(id)?;
        let (wait, state) = (task.wait, task.state);
        if let Some(wait) = wait {
            self.sync.unlink(wait, id);
        }
        self.sync.reclaim(id, &mut self.scheduler, &mut self.registry)?;
        if state == TaskState::Running {
            self.scheduler.transition(&mut self.registry, id, TaskState::Suspended)?;
        }
        self.registry.delete(id, &mut self.allocator, self.scheduler.ready_mut())
    }

    /// Park a task until [`Kernel::task_resume`]
    ///
    /// A task blocked on a queue or semaphore leaves that wait with an
    /// `Aborted` outcome.
    pub fn task_suspend(&mut self, id: TaskId) -> KernelResult<()> {
        self.reject_idle(id)?;
        if self.registry.get_state(id)? == TaskState::Suspended {
            return Ok(());
        }
        self.abort_wait(id)?;
        self.scheduler.transition(&mut self.registry, id, TaskState::Suspended)?;
        debug!("task {} suspended", id);
        Ok(())
    }

    /// Return a suspended task to Ready
    pub fn task_resume(&mut self, id: TaskId) -> KernelResult<()> {
        if self.registry.get_state(id)? != TaskState::Suspended {
            warn!("task {}: resume of a task that is not suspended", id);
            return Err(Error::InvalidParam);
        }
        self.scheduler.transition(&mut self.registry, id, TaskState::Ready)?;
        debug!("task {} resumed", id);
        Ok(())
    }

    /// Block the running task for `ticks` ticks
    ///
    /// `delay(0)` yields instead.
    pub fn task_delay(&mut self, ticks: u32) -> KernelResult<()> {
        if ticks == 0 {
            return self.yield_now();
        }
        let id = self.scheduler.current().ok_or(Error::InvalidParam)?;
        self.sync.reclaim(id, &mut self.scheduler, &mut self.registry)?;
        self.scheduler.block_current(&mut self.registry, None, ticks)?;
        Ok(())
    }

    /// [`Kernel::task_delay`] with a duration in milliseconds
    pub fn task_delay_ms(&mut self, ms: u32) -> KernelResult<()> {
        let ticks = self.clock.ms_to_ticks(ms);
        self.task_delay(ticks)
    }

    /// Running task gives up the CPU and goes to the tail of its level
    pub fn yield_now(&mut self) -> KernelResult<()> {
        let id = self.scheduler.current().ok_or(Error::InvalidParam)?;
        self.registry.get_mut(id)?.time_slice_remaining = self.config.time_slice_ticks;
        self.scheduler.transition(&mut self.registry, id, TaskState::Ready)
    }

    /// Force a task into `state`
    ///
    /// `Running` makes it the current task (the previous one becomes
    /// Ready); `Blocked` parks it with no expiry until it is set Ready
    /// again. Leaving a queue/semaphore wait this way aborts the wait. The
    /// idle task can only be Ready or Running.
    pub fn set_task_state(&mut self, id: TaskId, state: TaskState) -> KernelResult<()> {
        self.registry.get(id)?;
        if matches!(state, TaskState::Blocked | TaskState::Suspended) {
            self.reject_idle(id)?;
        }
        if state != TaskState::Blocked {
            self.abort_wait(id)?;
        } else {
            self.registry.get_mut(id)?.delay_ticks = 0;
        }
        self.scheduler.transition(&mut self.registry, id, state)
    }

    /// State of an active task (`ResourceError` once deleted)
    pub fn task_state(&self, id: TaskId) -> KernelResult<TaskState> {
        self.registry.get_state(id)
    }

    /// Read-only view of a task
    pub fn task(&self, id: TaskId) -> KernelResult<&Task<A>> {
        self.registry.get(id)
    }

    /// Active tasks, idle task included
    pub fn task_count(&self) -> usize {
        self.registry.count()
    }

    /// Outcome of the task's last finished wait, if not yet consumed
    pub fn wake_reason(&self, id: TaskId) -> Option<WakeReason> {
        self.registry.get(id).ok()?.wake.map(|w| w.reason)
    }

    pub fn tasks(&self) -> &TaskRegistry<A> {
        &self.registry
    }

    pub fn idle_task(&self) -> Option<TaskId> {
        self.scheduler.ready().idle()
    }

    pub fn current_task(&self) -> Option<TaskId> {
        self.scheduler.current()
    }

    fn reject_idle(&self, id: TaskId) -> KernelResult<()> {
        if Some(id) == self.idle_task() {
            warn!("task {}: the idle task cannot be deleted, blocked or suspended", id);
            return Err(Error::InvalidParam);
        }
        Ok(())
    }

    fn abort_wait(&mut self, id: TaskId) -> KernelResult<()> {
        let Some(wait) = self.registry.get(id)?.wait else {
            return Ok(());
        };
        self.sync.unlink(wait, id);
        self.scheduler.release(&mut self.registry, id, WakeReason::Aborted)
    }

    // ---- Scheduler ----

    /// Start scheduling; returns the task promoted first
    pub fn start(&mut self) -> KernelResult<Option<TaskId>> {
        self.ensure_not_halted()?;
        let first = self.scheduler.start(&mut self.registry, self.config.time_slice_ticks)?;
        info!("scheduler started with {} tasks", self.registry.count());
        Ok(first)
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Task that should hold the CPU now (idle task when nothing is Ready)
    pub fn next_ready(&self) -> Option<TaskId> {
        self.scheduler.next_ready()
    }

    /// Re-evaluate who holds the CPU; returns the new current task if it
    /// changed
    pub fn switch_context(&mut self) -> KernelResult<Option<TaskId>> {
        self.ensure_not_halted()?;
        self.scheduler.switch(&mut self.registry, self.config.time_slice_ticks, false)
    }

    /// Tick callback
    ///
    /// Ages delays (waking timed-out waiters), ages the running task's
    /// slice and applies any preemption due at this boundary.
    pub fn tick(&mut self) -> KernelResult<()> {
        self.ensure_not_halted()?;
        self.clock.advance();
        if !self.scheduler.is_running() {
            return Ok(());
        }

        let expired = self.registry.age_delays(self.scheduler.ready_mut())?;
        for (id, wait) in expired {
            if let Some(wait) = wait {
                self.sync.unlink(wait, id);
            }
        }
        self.scheduler.tick_current(&mut self.registry, self.config.time_slice_ticks)?;

        self.verify()
    }

    /// Suppress preemption
    pub fn lock(&mut self) {
        self.scheduler.lock();
    }

    /// Re-enable preemption, switching at once if a better task is Ready
    pub fn unlock(&mut self) -> KernelResult<Option<TaskId>> {
        self.ensure_not_halted()?;
        self.scheduler.unlock(&mut self.registry, self.config.time_slice_ticks)
    }

    pub fn is_locked(&self) -> bool {
        self.scheduler.is_locked()
    }

    /// Run one task for one unit of work
    ///
    /// Selects the next task (see [`Scheduler::select_for_dispatch`]),
    /// makes it Running, invokes its entry routine once and, unless the
    /// routine blocked or otherwise left Running, returns it to the tail of
    /// its level. Returns the id of the task that ran.
    pub fn run_next(&mut self) -> KernelResult<TaskId> {
        self.ensure_not_halted()?;
        if !self.scheduler.is_running() {
            return Err(Error::ResourceError);
        }
        let id = self.scheduler.select_for_dispatch(&mut self.registry)?;
        let entry = self.registry.get(id)?.entry;
        entry(self, id);
        self.scheduler.finish_dispatch(&mut self.registry, id)?;
        self.verify()?;
        Ok(id)
    }

    /// Drive the kernel for `ticks` ticks, dispatching once per tick
    pub fn run_for(&mut self, ticks: u32) -> KernelResult<KernelStats> {
        if !self.scheduler.is_running() {
            self.start()?;
        }
        let start = self.clock.now_ticks();
        let mut tasks_executed = 0u64;
        for _ in 0..ticks {
            if Some(self.run_next()?) != self.idle_task() {
                tasks_executed += 1;
            }
            self.tick()?;
        }
        let stats = self.scheduler.stats();
        Ok(KernelStats {
            total_ticks: self.clock.elapsed_since(start),
            tasks_executed,
            context_switches: stats.context_switches as u64,
            utilization: stats.cpu_utilization(),
        })
    }

    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    pub fn reset_stats(&mut self) {
        self.scheduler.reset_stats();
    }

    pub fn clock(&self) -> &TickClock {
        &self.clock
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    // ---- Queues ----

    pub fn queue_create(&mut self, id: QueueId, capacity: usize) -> KernelResult<()> {
        self.sync.queue_create(id, capacity, &mut self.allocator)
    }

    /// Delete a queue; returns the number of waiters woken with an error
    pub fn queue_delete(&mut self, id: QueueId) -> KernelResult<usize> {
        self.sync
            .queue_delete(id, &mut self.allocator, &mut self.scheduler, &mut self.registry)
    }

    /// Send from the running task, waiting at most `timeout` ticks
    pub fn queue_send(&mut self, id: QueueId, item: u32, timeout: u32) -> KernelResult<()> {
        self.sync.send(id, item, timeout, &mut self.scheduler, &mut self.registry)
    }

    /// Receive into the running task, waiting at most `timeout` ticks
    pub fn queue_receive(&mut self, id: QueueId, timeout: u32) -> KernelResult<u32> {
        self.sync.receive(id, timeout, &mut self.scheduler, &mut self.registry)
    }

    pub fn queue_peek(&self, id: QueueId) -> KernelResult<u32> {
        self.sync.peek(id)
    }

    pub fn queue(&self, id: QueueId) -> KernelResult<&MessageQueue> {
        self.sync.queue(id)
    }

    pub fn queue_count(&self, id: QueueId) -> KernelResult<usize> {
        self.sync.queue(id).map(MessageQueue::count)
    }

    pub fn queue_space(&self, id: QueueId) -> KernelResult<usize> {
        self.sync.queue(id).map(MessageQueue::space)
    }

    pub fn queue_is_full(&self, id: QueueId) -> KernelResult<bool> {
        self.sync.queue(id).map(MessageQueue::is_full)
    }

    pub fn queue_is_empty(&self, id: QueueId) -> KernelResult<bool> {
        self.sync.queue(id).map(MessageQueue::is_empty)
    }

    // ---- Semaphores ----

    pub fn semaphore_create(&mut self, id: SemaphoreId, initial: u8, max_count: u8) -> KernelResult<()> {
        self.sync.semaphore_create(id, initial, max_count)
    }

    /// Delete a semaphore; returns the number of waiters woken with an error
    pub fn semaphore_delete(&mut self, id: SemaphoreId) -> KernelResult<usize> {
        self.sync.semaphore_delete(id, &mut self.scheduler, &mut self.registry)
    }

    /// Take from the running task, waiting at most `timeout` ticks
    pub fn semaphore_take(&mut self, id: SemaphoreId, timeout: u32) -> KernelResult<()> {
        self.sync.take(id, timeout, &mut self.scheduler, &mut self.registry)
    }

    pub fn semaphore_give(&mut self, id: SemaphoreId) -> KernelResult<()> {
        self.sync.give(id, &mut self.scheduler, &mut self.registry)
    }

    pub fn semaphore(&self, id: SemaphoreId) -> KernelResult<&Semaphore> {
        self.sync.semaphore(id)
    }

    pub fn semaphore_count(&self, id: SemaphoreId) -> KernelResult<u8> {
        self.sync.semaphore(id).map(Semaphore::count)
    }

    /// Tasks blocked in `take` on semaphore `id`
    pub fn semaphore_waiting(&self, id: SemaphoreId) -> KernelResult<usize> {
        self.sync.semaphore(id).map(|s| s.waiters().len())
    }

    // ---- Integrity ----

    /// Walk every structure and check it against the task states
    ///
    /// - each ready-queue entry is an active Ready task of that level,
    ///   enrolled once, and every Ready task (bar idle) is enrolled;
    /// - the idle task is Ready or Running;
    /// - the current task, and only it, is Running;
    /// - every task waiting on an object sits in that object's FIFO once;
    /// - queue and semaphore counters respect their bounds.
    pub fn check_integrity(&self) -> KernelResult<()> {
        let ready = self.scheduler.ready();
        let idle = ready.idle();

        for (level, fifo) in ready.levels().iter().enumerate() {
            for id in fifo.iter() {
                let ok = self
                    .registry
                    .get(id)
                    .map(|t| t.state == TaskState::Ready && t.priority.level() == level)
                    .unwrap_or(false);
                if !ok || fifo.occurrences(id) != 1 || Some(id) == idle {
                    return Err(self.integrity_failure("ready queue entry"));
                }
            }
        }

        if let Some(idle) = idle {
            let state = self.registry.get_state(idle);
            if !matches!(state, Ok(TaskState::Ready | TaskState::Running)) {
                return Err(self.integrity_failure("idle task not schedulable"));
            }
        }

        if let Some(cur) = self.scheduler.current() {
            if self.registry.get_state(cur) != Ok(TaskState::Running) {
                return Err(self.integrity_failure("current task not running"));
            }
        }

        for task in self.registry.iter() {
            let enrolled = ready.level(task.priority).occurrences(task.id);
            let ok = match task.state {
                TaskState::Ready => Some(task.id) == idle || enrolled == 1,
                TaskState::Running => self.scheduler.current() == Some(task.id),
                TaskState::Blocked => match task.wait {
                    Some(wait) => self.sync.enrolled(wait, task.id) == 1,
                    None => true,
                },
                TaskState::Suspended => task.wait.is_none(),
            };
            let stray_wait = task.state != TaskState::Blocked && task.wait.is_some();
            if !ok || stray_wait {
                return Err(self.integrity_failure("task state"));
            }
        }

        self.sync.check_integrity(&self.registry)
    }

    /// Has a failed consistency walk stopped the kernel?
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    fn integrity_failure(&self, what: &str) -> Error {
        error!("integrity check failed: {}", what);
        Error::IntegrityError
    }

    fn verify(&mut self) -> KernelResult<()> {
        if !self.config.integrity_checks {
            return Ok(());
        }
        if let Err(e) = self.check_integrity() {
            error!("kernel halted");
            self.halted = true;
            return Err(e);
        }
        Ok(())
    }

    fn ensure_not_halted(&self) -> KernelResult<()> {
        if self.halted {
            Err(Error::IntegrityError)
        } else {
            Ok(())
        }
    }

    /// Memory footprint estimate
    pub fn memory_footprint(&self) -> usize {
        core::mem::size_of::<Self>()
    }

    /// Convert a duration to ticks for a blocking call (`None` waits forever)
    pub fn timeout_ticks(&self, ms: Option<u32>) -> u32 {
        ms.map_or(WAIT_FOREVER, |ms| self.clock.ms_to_ticks(ms))
    }
}

/// Kernel execution statistics
#[derive(Debug, Clone)]
pub struct KernelStats {
    /// Ticks elapsed during the run
    pub total_ticks: u64,
    /// Dispatches that ran a task other than idle
    pub tasks_executed: u64,
    /// Context switches so far
    pub context_switches: u64,
    /// CPU utilization in percent
    pub utilization: u32,
}
