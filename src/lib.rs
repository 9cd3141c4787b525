//! coop-rtos — cooperative single-core task kernel
//!
//! Run-to-completion task kernel for microcontroller-class systems:
//! - Static task table with stable ids (no heap; stacks come from a
//!   pluggable [`Allocator`])
//! - Fixed-priority scheduling, round-robin within a level
//! - Bounded message queues and counting semaphores with FIFO waiters
//! - One owned [`Kernel`] context, optionally shared with an interrupt
//!   handler through [`SharedKernel`]
//!
//! ```
//! use coop_rtos::{Kernel, KernelConfig, Priority, TaskId};
//!
//! fn blink(kernel: &mut Kernel, _id: TaskId) {
//!     kernel.task_delay(5).ok();
//! }
//!
//! let mut kernel = Kernel::new(KernelConfig::default()).unwrap();
//! let led = kernel.task_create(blink, "led", Priority::LOW, 256).unwrap();
//! kernel.start().unwrap();
//! assert_eq!(kernel.run_next(), Ok(led));
//! ```

#![no_std]

#[cfg(feature = "std")]
extern crate std;

pub mod config;
pub mod error;
pub mod fifo;
pub mod heap;
pub mod kernel;
pub mod registry;
pub mod ring;
pub mod scheduler;
pub mod shared;
pub mod sync;
pub mod task;
pub mod timer;

pub use config::{KernelConfig, WAIT_FOREVER};
pub use error::{Error, KernelResult};
pub use heap::{Allocator, FixedHeap, Handle};
pub use kernel::{Kernel, KernelStats};
pub use registry::TaskRegistry;
pub use scheduler::{Scheduler, SchedulerStats};
pub use shared::SharedKernel;
pub use sync::{MessageQueue, QueueId, Semaphore, SemaphoreId};
pub use task::{Priority, Task, TaskFn, TaskId, TaskState, WakeReason};
pub use timer::TickClock;
