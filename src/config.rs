//! Kernel configuration
//!
//! Table capacities are compile-time constants so every structure stays
//! statically sized. Timing knobs live in [`KernelConfig`] and are chosen
//! when the kernel is constructed.

/// Maximum tasks the kernel can manage (idle task included)
pub const MAX_TASKS: usize = 8;

/// Task name storage, one byte reserved as in a C string
pub const MAX_TASK_NAME_LENGTH: usize = 16;

/// Smallest stack a task may request (bytes)
pub const MIN_STACK_SIZE: usize = 128;
/// Largest stack a task may request (bytes)
pub const MAX_STACK_SIZE: usize = 1024;

/// Number of priority levels
pub const PRIORITY_LEVELS: usize = 5;

/// Maximum number of message queues
pub const MAX_QUEUES: usize = 4;
/// Maximum slots in one message queue
pub const MAX_QUEUE_SIZE: usize = 16;
/// Bytes per queue item
pub const QUEUE_ITEM_SIZE: usize = core::mem::size_of::<u32>();

/// Maximum number of semaphores
pub const MAX_SEMAPHORES: usize = 4;
/// Upper bound for any semaphore's `max_count`
pub const SEMAPHORE_MAX_COUNT: u8 = 255;

/// Allocator budget for the reference heap (bytes)
pub const HEAP_SIZE: usize = 4096;

/// Wait without expiry
pub const WAIT_FOREVER: u32 = u32::MAX;

/// Runtime kernel configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct KernelConfig {
    /// Round-robin quantum in ticks
    pub time_slice_ticks: u32,
    /// Tick source frequency
    pub tick_rate_hz: u32,
    /// Run the consistency walk on every tick and dispatch
    pub integrity_checks: bool,
}

impl KernelConfig {
    pub const fn new() -> Self {
        Self {
            time_slice_ticks: 10,
            tick_rate_hz: 1000,
            integrity_checks: cfg!(debug_assertions),
        }
    }

    pub fn with_time_slice(self, time_slice_ticks: u32) -> Self {
        Self { time_slice_ticks: time_slice_ticks.max(1), ..self }
    }

    pub fn with_tick_rate(self, tick_rate_hz: u32) -> Self {
        Self { tick_rate_hz: tick_rate_hz.max(1), ..self }
    }

    pub fn with_integrity_checks(self, integrity_checks: bool) -> Self {
        Self { integrity_checks, ..self }
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = KernelConfig::default();
        assert_eq!(config.time_slice_ticks, 10);
        assert_eq!(config.tick_rate_hz, 1000);
    }

    #[test]
    fn test_builder_clamps_zero() {
        let config = KernelConfig::default().with_time_slice(0).with_tick_rate(0);
        assert_eq!(config.time_slice_ticks, 1);
        assert_eq!(config.tick_rate_hz, 1);
    }
}
