//! Volatile register cell with memory ordering for UHPHS MMIO
//!
//! On ARM targets every access is bracketed by `dmb`/`dsb` so register writes
//! are observed in program order by the controller. Elsewhere (host-side
//! simulation over RAM images) a sequentially consistent fence stands in.

use core::cell::UnsafeCell;
use core::ptr::{read_volatile, write_volatile};
use crate::error::{Result, UsbError};

#[inline(always)]
fn barrier() {
    #[cfg(target_arch = "arm")]
    cortex_m::asm::dmb();
    #[cfg(not(target_arch = "arm"))]
    core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
}

#[inline(always)]
fn sync_barrier() {
    #[cfg(target_arch = "arm")]
    cortex_m::asm::dsb();
    #[cfg(not(target_arch = "arm"))]
    core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
}

/// Register access wrapper with memory ordering
#[repr(transparent)]
pub struct Register<T> {
    value: UnsafeCell<T>,
}

unsafe impl<T> Send for Register<T> where T: Send {}
unsafe impl<T> Sync for Register<T> where T: Sync {}

impl Register<u32> {
    /// Create a register cell holding `value`
    pub const fn new(value: u32) -> Self {
        Self {
            value: UnsafeCell::new(value),
        }
    }

    /// Read register
    #[inline(always)]
    pub fn read(&self) -> u32 {
        barrier();
        // SAFETY: the cell is either device memory or a RAM image owned by self
        let value = unsafe { read_volatile(self.value.get()) };
        barrier();
        value
    }

    /// Write register
    #[inline(always)]
    pub fn write(&self, value: u32) {
        barrier();
        // SAFETY: see `read`
        unsafe { write_volatile(self.value.get(), value) };
        sync_barrier();
    }

    /// Read-modify-write
    #[inline(always)]
    pub fn modify<F>(&self, f: F)
    where
        F: FnOnce(u32) -> u32,
    {
        barrier();
        // SAFETY: see `read`
        let current = unsafe { read_volatile(self.value.get()) };
        barrier();
        let new_value = f(current);
        barrier();
        // SAFETY: see `read`
        unsafe { write_volatile(self.value.get(), new_value) };
        sync_barrier();
    }

    /// Set bits
    #[inline(always)]
    pub fn set_bits(&self, mask: u32) {
        self.modify(|v| v | mask);
    }

    /// Clear bits
    #[inline(always)]
    pub fn clear_bits(&self, mask: u32) {
        self.modify(|v| v & !mask);
    }

    /// True when every bit of `mask` reads set
    #[inline(always)]
    pub fn is_set(&self, mask: u32) -> bool {
        self.read() & mask == mask
    }
}

impl Default for Register<u32> {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Poll `condition` at most `limit` times
pub fn wait_for<F>(limit: u32, mut condition: F) -> Result<()>
where
    F: FnMut() -> bool,
{
    for _ in 0..limit {
        if condition() {
            return Ok(());
        }
        core::hint::spin_loop();
    }
    Err(UsbError::Timeout)
}
