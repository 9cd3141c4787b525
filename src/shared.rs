//! Interrupt-safe kernel cell
//!
//! A [`Kernel`] is an ordinary owned value. On a target where the tick
//! arrives from an interrupt handler, park it in a `static SharedKernel`
//! and reach it through [`SharedKernel::with`]: every access runs inside a
//! `critical_section`, so the tick handler and the main loop never observe
//! a half-finished operation.

use core::cell::RefCell;

use critical_section::Mutex;
use log::{debug, warn};

use crate::error::{Error, KernelResult};
use crate::heap::FixedHeap;
use crate::kernel::Kernel;
use crate::task::TaskId;

pub struct SharedKernel<A = FixedHeap> {
    inner: Mutex<RefCell<Option<Kernel<A>>>>,
}

impl<A> SharedKernel<A> {
    /// Empty cell, usable in a `static`
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(None)),
        }
    }

    /// Install a kernel; `ResourceError` if one is already installed
    pub fn init(&self, kernel: Kernel<A>) -> KernelResult<()> {
        critical_section::with(|cs| {
            let mut slot = self.inner.borrow_ref_mut(cs);
            if slot.is_some() {
                warn!("shared kernel already initialized");
                return Err(Error::ResourceError);
            }
            *slot = Some(kernel);
            debug!("shared kernel installed");
            Ok(())
        })
    }

    /// Run `f` on the kernel inside a critical section
    ///
    /// `ResourceError` if no kernel is installed. Must not be re-entered
    /// from within `f`.
    pub fn with<R>(&self, f: impl FnOnce(&mut Kernel<A>) -> R) -> KernelResult<R> {
        critical_section::with(|cs| {
            let mut slot = self.inner.borrow_ref_mut(cs);
            slot.as_mut().map(f).ok_or(Error::ResourceError)
        })
    }

    /// Remove and return the installed kernel
    pub fn take(&self) -> Option<Kernel<A>> {
        critical_section::with(|cs| self.inner.borrow_ref_mut(cs).take())
    }

    pub fn is_initialized(&self) -> bool {
        critical_section::with(|cs| self.inner.borrow_ref(cs).is_some())
    }
}

impl<A: crate::heap::Allocator> SharedKernel<A> {
    /// Tick callback for an interrupt handler
    pub fn tick(&self) -> KernelResult<()> {
        self.with(Kernel::tick)?
    }

    /// One dispatch from the main loop
    pub fn run_next(&self) -> KernelResult<TaskId> {
        self.with(Kernel::run_next)?
    }
}

impl<A> Default for SharedKernel<A> {
    fn default() -> Self {
        Self::new()
    }
}
