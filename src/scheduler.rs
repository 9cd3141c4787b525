//! Priority / round-robin scheduler
//!
//! Fixed-priority selection across levels, round-robin within a level.
//! The scheduler owns the ready queues, the lock flag and the notion of the
//! current task; task state itself lives in the registry.
//!
//! Preemption only happens at well-defined points: a tick boundary
//! ([`Scheduler::tick_current`]), [`Scheduler::unlock`], or between two
//! dispatches. Nothing interrupts a task mid-routine.

use core::array;

use log::{debug, trace};

use crate::config::{PRIORITY_LEVELS, WAIT_FOREVER};
use crate::error::{Error, KernelResult};
use crate::fifo::TaskFifo;
use crate::registry::TaskRegistry;
use crate::task::{Priority, TaskId, TaskState, WaitOn, Wake, WakeReason};

/// One FIFO of Ready task ids per priority level
///
/// The designated idle task is never enrolled; [`ReadyQueues::next`] falls
/// back to it when every level is empty.
#[derive(Debug, Clone)]
pub struct ReadyQueues {
    levels: [TaskFifo; PRIORITY_LEVELS],
    idle: Option<TaskId>,
}

impl ReadyQueues {
    pub fn new() -> Self {
        Self {
            levels: array::from_fn(|_| TaskFifo::new()),
            idle: None,
        }
    }

    /// Append `id` at the tail of its level (no-op for the idle task)
    ///
    /// Returns false if the level is full or `priority` is out of range.
    pub fn enqueue(&mut self, priority: Priority, id: TaskId) -> bool {
        if self.idle == Some(id) {
            return true;
        }
        match self.levels.get_mut(priority.level()) {
            Some(level) => level.contains(id) || level.push(id),
            None => false,
        }
    }

    pub fn remove(&mut self, priority: Priority, id: TaskId) -> bool {
        self.levels
            .get_mut(priority.level())
            .map(|level| level.remove(id))
            .unwrap_or(false)
    }

    /// Move `id` to the head of its level
    pub fn move_to_front(&mut self, priority: Priority, id: TaskId) {
        if let Some(level) = self.levels.get_mut(priority.level()) {
            if level.remove(id) {
                level.push_front(id);
            }
        }
    }

    /// Head of the highest non-empty level
    pub fn highest(&self) -> Option<TaskId> {
        self.levels.iter().rev().find_map(TaskFifo::front)
    }

    /// Highest-priority Ready task, or the idle task if none
    pub fn next(&self) -> Option<TaskId> {
        self.highest().or(self.idle)
    }

    pub fn level(&self, priority: Priority) -> &TaskFifo {
        &self.levels[priority.level().min(PRIORITY_LEVELS - 1)]
    }

    pub fn levels(&self) -> &[TaskFifo; PRIORITY_LEVELS] {
        &self.levels
    }

    pub fn idle(&self) -> Option<TaskId> {
        self.idle
    }

    pub(crate) fn set_idle(&mut self, priority: Priority, id: TaskId) {
        self.remove(priority, id);
        self.idle = Some(id);
    }

    /// Ready tasks across all levels
    pub fn len(&self) -> usize {
        self.levels.iter().map(TaskFifo::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.iter().all(TaskFifo::is_empty)
    }
}

impl Default for ReadyQueues {
    fn default() -> Self {
        Self::new()
    }
}

/// Scheduler statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Times the CPU changed hands
    pub context_switches: u32,
    /// Tick callbacks seen while running
    pub ticks: u32,
    /// Dispatches through `run_next`
    pub dispatches: u32,
    /// Dispatches that landed on the idle task
    pub idle_runs: u32,
}

impl SchedulerStats {
    /// Share of dispatches spent on real work, in percent
    pub fn cpu_utilization(&self) -> u32 {
        if self.dispatches == 0 {
            0
        } else {
            100 - (self.idle_runs as u64 * 100 / self.dispatches as u64) as u32
        }
    }
}

/// Scheduler state
pub struct Scheduler {
    ready: ReadyQueues,
    /// Task in the Running state, if any
    current: Option<TaskId>,
    /// Last task that held the CPU
    last: Option<TaskId>,
    /// Preemption suppressed
    locked: bool,
    running: bool,
    /// Dispatch round, see [`Scheduler::select_for_dispatch`]
    round: u32,
    stats: SchedulerStats,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            ready: ReadyQueues::new(),
            current: None,
            last: None,
            locked: false,
            running: false,
            round: 1,
            stats: SchedulerStats::default(),
        }
    }

    pub fn ready(&self) -> &ReadyQueues {
        &self.ready
    }

    pub fn ready_mut(&mut self) -> &mut ReadyQueues {
        &mut self.ready
    }

    pub fn current(&self) -> Option<TaskId> {
        self.current
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = SchedulerStats::default();
    }

    /// Change a task's state and keep `current` in step
    pub fn transition<A>(&mut self, tasks: &mut TaskRegistry<A>, id: TaskId, to: TaskState) -> KernelResult<()> {
        if to == TaskState::Running {
            if let Some(prev) = self.current.filter(|&prev| prev != id) {
                tasks.transition(prev, TaskState::Ready, &mut self.ready)?;
            }
            tasks.transition(id, TaskState::Running, &mut self.ready)?;
            self.current = Some(id);
            if self.last != Some(id) {
                self.stats.context_switches += 1;
                self.last = Some(id);
            }
        } else {
            tasks.transition(id, to, &mut self.ready)?;
            if self.current == Some(id) {
                self.current = None;
            }
        }
        Ok(())
    }

    /// Mark the scheduler running and promote the first task
    pub fn start<A>(&mut self, tasks: &mut TaskRegistry<A>, quantum: u32) -> KernelResult<Option<TaskId>> {
        self.running = true;
        self.switch(tasks, quantum, false)?;
        debug!("scheduler started, first task {:?}", self.current);
        Ok(self.current)
    }

    /// Task that should hold the CPU now
    ///
    /// While locked the current task keeps it; otherwise the head of the
    /// highest non-empty level, falling back to the idle task.
    pub fn next_ready(&self) -> Option<TaskId> {
        if self.locked && self.current.is_some() {
            return self.current;
        }
        self.ready.next()
    }

    /// Hand the CPU to the best candidate if it outranks the current task
    ///
    /// With `rotate` set (slice expiry) an equal-priority candidate also
    /// wins, sending the current task to the tail of its level. A running
    /// task is never replaced by the idle task. Returns the new current task
    /// when a switch happened.
    pub fn switch<A>(&mut self, tasks: &mut TaskRegistry<A>, quantum: u32, rotate: bool) -> KernelResult<Option<TaskId>> {
        if !self.running || self.locked {
            return Ok(None);
        }
        let Some(candidate) = self.ready.next() else {
            return Ok(None);
        };
        if let Some(cur) = self.current {
            if cur == candidate || Some(candidate) == self.ready.idle() {
                return Ok(None);
            }
            let cur_priority = tasks.get(cur)?.priority;
            let cand_priority = tasks.get(candidate)?.priority;
            let wins = cand_priority > cur_priority || (rotate && cand_priority == cur_priority);
            if !wins {
                return Ok(None);
            }
            tasks.get_mut(cur)?.time_slice_remaining = quantum;
            self.transition(tasks, cur, TaskState::Ready)?;
            trace!("switch {} -> {}", cur, candidate);
        }
        self.transition(tasks, candidate, TaskState::Running)?;
        Ok(Some(candidate))
    }

    /// Age the current task's time slice by one tick
    ///
    /// On expiry its level rotates and an equal-or-higher candidate takes
    /// over; otherwise a strictly higher one woken this tick preempts it.
    pub fn tick_current<A>(&mut self, tasks: &mut TaskRegistry<A>, quantum: u32) -> KernelResult<()> {
        self.stats.ticks += 1;
        let Some(cur) = self.current else { return Ok(()) };
        let task = tasks.get_mut(cur)?;
        task.time_slice_remaining = task.time_slice_remaining.saturating_sub(1);
        if task.time_slice_remaining > 0 {
            self.switch(tasks, quantum, false)?;
            return Ok(());
        }
        if self.switch(tasks, quantum, true)?.is_none() {
            // Nobody to rotate with: start a fresh slice
            tasks.get_mut(cur)?.time_slice_remaining = quantum;
        }
        Ok(())
    }

    pub fn lock(&mut self) {
        self.locked = true;
    }

    /// Re-enable preemption and deliver any switch deferred while locked
    pub fn unlock<A>(&mut self, tasks: &mut TaskRegistry<A>, quantum: u32) -> KernelResult<Option<TaskId>> {
        self.locked = false;
        self.switch(tasks, quantum, false)
    }

    /// Pick and promote the task for the next `run_next` dispatch
    ///
    /// `run_next` serves every Ready task at most once per dispatch round:
    /// levels are scanned highest first and, within a level, in queue order
    /// for the first task not yet served this round. When all Ready tasks
    /// have been served a new round begins. The idle task runs only when
    /// nothing else is Ready. While locked the current task is dispatched
    /// again.
    pub fn select_for_dispatch<A>(&mut self, tasks: &mut TaskRegistry<A>) -> KernelResult<TaskId> {
        if self.locked {
            if let Some(cur) = self.current {
                return Ok(cur);
            }
        }
        // A task promoted by switch() goes back to the head it came from
        if let Some(cur) = self.current {
            self.transition(tasks, cur, TaskState::Ready)?;
            let priority = tasks.get(cur)?.priority;
            self.ready.move_to_front(priority, cur);
        }

        let id = match self.unserved(tasks) {
            Some(id) => id,
            None => {
                self.round = self.round.wrapping_add(1);
                match self.unserved(tasks) {
                    Some(id) => id,
                    None => self.ready.idle().ok_or(Error::ResourceError)?,
                }
            }
        };
        self.transition(tasks, id, TaskState::Running)?;
        self.stats.dispatches += 1;
        if Some(id) == self.ready.idle() {
            self.stats.idle_runs += 1;
        }
        Ok(id)
    }

    fn unserved<A>(&self, tasks: &TaskRegistry<A>) -> Option<TaskId> {
        self.ready.levels().iter().rev().find_map(|level| {
            level
                .iter()
                .find(|&id| tasks.get(id).map(|t| t.served_round != self.round).unwrap_or(false))
        })
    }

    /// Wrap up a dispatch: count the run and, unless the routine blocked,
    /// yielded or suspended itself, send the task to the tail of its level
    pub fn finish_dispatch<A>(&mut self, tasks: &mut TaskRegistry<A>, id: TaskId) -> KernelResult<()> {
        let Ok(task) = tasks.get_mut(id) else {
            // Deleted itself
            return Ok(());
        };
        task.served_round = self.round;
        task.stats.runs += 1;
        if task.state == TaskState::Running && !self.locked {
            self.transition(tasks, id, TaskState::Ready)?;
        }
        Ok(())
    }

    /// Block the current task on `wait` for at most `ticks`
    ///
    /// `WAIT_FOREVER` blocks without expiry. A pending outcome that still
    /// holds a unit or an item must be handed back first
    /// ([`SyncService::reclaim`](crate::sync::SyncService::reclaim)); it is
    /// never overwritten.
    pub fn block_current<A>(&mut self, tasks: &mut TaskRegistry<A>, wait: Option<WaitOn>, ticks: u32) -> KernelResult<TaskId> {
        let id = self.current.ok_or(Error::InvalidParam)?;
        let task = tasks.get_mut(id)?;
        if task.wake.is_some_and(|w| w.reason.holds_resource()) {
            return Err(Error::IntegrityError);
        }
        task.wait = wait;
        task.wake = None;
        task.delay_ticks = if ticks == WAIT_FOREVER { 0 } else { ticks };
        self.transition(tasks, id, TaskState::Blocked)?;
        trace!("task {} blocked on {:?} for {} ticks", id, wait, ticks);
        Ok(id)
    }

    /// Release a task from its wait with `reason` and make it Ready
    pub fn release<A>(&mut self, tasks: &mut TaskRegistry<A>, id: TaskId, reason: WakeReason) -> KernelResult<()> {
        let task = tasks.get_mut(id)?;
        if let Some(on) = task.wait.take() {
            task.wake = Some(Wake { on, reason });
        }
        task.delay_ticks = 0;
        self.transition(tasks, id, TaskState::Ready)?;
        trace!("task {} woken: {:?}", id, reason);
        Ok(())
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
