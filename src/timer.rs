//! Tick clock — hardware-abstract tick source
//!
//! The kernel only needs a monotonically increasing tick count and a
//! millisecond↔tick conversion at the configured rate. On real hardware the
//! count is advanced from SysTick (Cortex-M) or MTIME (RISC-V); on a host it
//! is advanced by whoever drives [`Kernel::tick`](crate::Kernel::tick).

use crate::config::WAIT_FOREVER;

/// System tick clock
///
/// Size: 16 bytes
#[derive(Debug, Clone)]
pub struct TickClock {
    /// Ticks since start
    ticks: u64,
    /// Tick frequency in Hz
    tick_rate_hz: u32,
}

impl TickClock {
    /// Create a clock ticking at `tick_rate_hz`
    pub const fn new(tick_rate_hz: u32) -> Self {
        Self {
            ticks: 0,
            tick_rate_hz: if tick_rate_hz == 0 { 1 } else { tick_rate_hz },
        }
    }

    /// Advance by one tick
    pub fn advance(&mut self) {
        self.ticks = self.ticks.wrapping_add(1);
    }

    /// Current tick count
    pub fn now_ticks(&self) -> u64 {
        self.ticks
    }

    /// Uptime in milliseconds
    pub fn uptime_ms(&self) -> u64 {
        self.ticks * 1000 / self.tick_rate_hz as u64
    }

    /// Convert milliseconds to ticks, rounding down
    ///
    /// A non-zero duration never converts to zero ticks (zero means "do not
    /// wait" to every blocking call), nor to [`WAIT_FOREVER`].
    pub fn ms_to_ticks(&self, ms: u32) -> u32 {
        if ms == 0 {
            return 0;
        }
        let ticks = ms as u64 * self.tick_rate_hz as u64 / 1000;
        ticks.clamp(1, WAIT_FOREVER as u64 - 1) as u32
    }

    /// Convert ticks to milliseconds
    pub fn ticks_to_ms(&self, ticks: u32) -> u64 {
        ticks as u64 * 1000 / self.tick_rate_hz as u64
    }

    /// Tick frequency
    pub fn tick_rate_hz(&self) -> u32 {
        self.tick_rate_hz
    }

    /// Elapsed ticks since a reference point
    pub fn elapsed_since(&self, reference: u64) -> u64 {
        self.ticks.wrapping_sub(reference)
    }

    /// Reset to zero
    pub fn reset(&mut self) {
        self.ticks = 0;
    }
}
