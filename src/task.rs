//! Task definition — static, no-alloc task control blocks
//!
//! Each task is a bounded unit of work: its entry routine is invoked once
//! per dispatch, does one step and returns. Tasks live in the registry's
//! slot table and are referred to everywhere else by [`TaskId`].

use core::fmt;

use crate::config::{MAX_TASK_NAME_LENGTH, PRIORITY_LEVELS};
use crate::heap::{FixedHeap, Handle};
use crate::kernel::Kernel;
use crate::sync::{QueueId, SemaphoreId};

/// Task entry routine, called once per dispatch with the kernel and the
/// task's own id
pub type TaskFn<A = FixedHeap> = fn(&mut Kernel<A>, TaskId);

/// Stable task identifier (slot index in the registry)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u8);

impl TaskId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Task priority (higher number = higher priority)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub u8);

impl Priority {
    /// Idle level, selected only when nothing else is ready
    pub const IDLE: Priority = Priority(0);
    /// Background work
    pub const LOW: Priority = Priority(1);
    /// Normal processing
    pub const MEDIUM: Priority = Priority(2);
    /// Control loops
    pub const HIGH: Priority = Priority(3);
    /// Hard deadlines
    pub const CRITICAL: Priority = Priority(4);

    /// Is this one of the configured levels?
    pub fn is_valid(self) -> bool {
        (self.0 as usize) < PRIORITY_LEVELS
    }

    /// Ready-queue index
    pub fn level(self) -> usize {
        self.0 as usize
    }
}

/// Task execution state (a deleted task has no state, its slot is empty)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Eligible for selection, enrolled in its priority's ready queue
    Ready,
    /// Currently executing
    Running,
    /// Waiting for a delay, a queue or a semaphore
    Blocked,
    /// Administratively parked
    Suspended,
}

/// What a blocked task is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOn {
    /// Room in a queue; the item is delivered on wake
    Send { queue: QueueId, item: u32 },
    /// An item from a queue
    Receive { queue: QueueId },
    /// A semaphore unit
    Take { semaphore: SemaphoreId },
}

impl WaitOn {
    /// Same object and operation, ignoring the payload
    pub fn same_wait(&self, other: &WaitOn) -> bool {
        match (self, other) {
            (WaitOn::Send { queue: a, .. }, WaitOn::Send { queue: b, .. }) => a == b,
            (WaitOn::Receive { queue: a }, WaitOn::Receive { queue: b }) => a == b,
            (WaitOn::Take { semaphore: a }, WaitOn::Take { semaphore: b }) => a == b,
            _ => false,
        }
    }
}

/// Why a blocked task was released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// The pending item was moved into the queue
    Sent,
    /// An item was handed over directly
    Received(u32),
    /// A semaphore unit was transferred
    Granted,
    /// The wait expired
    TimedOut,
    /// The object was deleted
    Deleted,
    /// The task was suspended while waiting
    Aborted,
}

impl WakeReason {
    /// Does the outcome carry a semaphore unit or a queue item that only
    /// this task can collect?
    pub fn holds_resource(self) -> bool {
        matches!(self, WakeReason::Granted | WakeReason::Received(_))
    }
}

/// Outcome of a finished wait, consumed by the task's next matching call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wake {
    pub on: WaitOn,
    pub reason: WakeReason,
}

/// Per-task execution statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskStats {
    /// Times the task was switched out
    pub context_switches: u32,
    /// Entry routine invocations
    pub runs: u32,
}

/// Task control block
pub struct Task<A = FixedHeap> {
    /// Slot id
    pub id: TaskId,
    /// Name (NUL padded)
    name: [u8; MAX_TASK_NAME_LENGTH],
    /// Entry routine
    pub entry: TaskFn<A>,
    /// Priority level
    pub priority: Priority,
    /// Current state
    pub state: TaskState,
    /// Ticks left in the current time slice
    pub time_slice_remaining: u32,
    /// Ticks until a timed block expires (0 = no expiry)
    pub delay_ticks: u32,
    /// Stack storage from the allocator
    pub stack: Handle,
    /// Requested stack size in bytes
    pub stack_size: usize,
    /// Pending wait, set while Blocked on a sync object
    pub wait: Option<WaitOn>,
    /// Result of the last finished wait
    pub wake: Option<Wake>,
    /// Last dispatch round this task was served in
    pub(crate) served_round: u32,
    pub stats: TaskStats,
}

impl<A> Task<A> {
    /// Fresh Ready task
    pub fn new(
        id: TaskId,
        name: &str,
        entry: TaskFn<A>,
        priority: Priority,
        stack: Handle,
        stack_size: usize,
        time_slice: u32,
    ) -> Self {
        let mut n = [0u8; MAX_TASK_NAME_LENGTH];
        // Keep one byte of padding and never split a UTF-8 sequence
        let mut len = name.len().min(MAX_TASK_NAME_LENGTH - 1);
        while !name.is_char_boundary(len) {
            len -= 1;
        }
        n[..len].copy_from_slice(&name.as_bytes()[..len]);

        Self {
            id,
            name: n,
            entry,
            priority,
            state: TaskState::Ready,
            time_slice_remaining: time_slice,
            delay_ticks: 0,
            stack,
            stack_size,
            wait: None,
            wake: None,
            served_round: 0,
            stats: TaskStats::default(),
        }
    }

    /// Task name
    pub fn name(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        core::str::from_utf8(&self.name[..len]).unwrap_or("")
    }
}

impl<A> fmt::Debug for Task<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("priority", &self.priority)
            .field("state", &self.state)
            .field("time_slice_remaining", &self.time_slice_remaining)
            .field("delay_ticks", &self.delay_ticks)
            .field("wait", &self.wait)
            .finish()
    }
}
