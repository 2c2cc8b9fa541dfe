//! DMA buffer descriptors and cache maintenance for USB transfers
//!
//! The UHPHS engines read and write client buffers by DMA. Buffers are
//! described by [`DmaBuffer`], a copyable pointer/length pair that the driver
//! threads through IRPs and hands to the transfer engines.

use core::ptr::NonNull;
use crate::error::{Result, UsbError};

/// DMA buffer alignment requirement (32-byte cache line)
pub const DMA_ALIGNMENT: usize = 32;

/// Size of the shared control staging buffer
pub const STAGING_BUFFER_SIZE: usize = 512;

/// Cache-line aligned staging area shared by the engines for control data stages
#[repr(C, align(32))]
pub struct StagingBuffer(pub [u8; STAGING_BUFFER_SIZE]);

impl StagingBuffer {
    /// Zeroed staging buffer
    pub const fn new() -> Self {
        Self([0; STAGING_BUFFER_SIZE])
    }
}

impl Default for StagingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

const _: () = {
    assert!(core::mem::align_of::<StagingBuffer>() == DMA_ALIGNMENT);
    assert!(STAGING_BUFFER_SIZE % DMA_ALIGNMENT == 0);
};

/// Client buffer handed to the hardware for the lifetime of an IRP
#[derive(Clone, Copy)]
pub struct DmaBuffer {
    ptr: NonNull<u8>,
    size: usize,
}

// The buffer is a plain memory range; ownership is tracked by the IRP holding it.
unsafe impl Send for DmaBuffer {}

impl PartialEq for DmaBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr && self.size == other.size
    }
}

impl core::fmt::Debug for DmaBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DmaBuffer")
            .field("addr", &self.dma_addr())
            .field("size", &self.size)
            .finish()
    }
}

impl DmaBuffer {
    /// Wrap a static buffer
    pub fn from_static(buffer: &'static mut [u8]) -> Self {
        let size = buffer.len();
        Self {
            ptr: NonNull::from(buffer).cast(),
            size,
        }
    }

    /// Wrap a raw memory range
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `size` bytes for as long as
    /// the buffer is attached to an IRP, and nothing else may access it meanwhile.
    pub unsafe fn from_raw_parts(ptr: NonNull<u8>, size: usize) -> Self {
        Self { ptr, size }
    }

    /// Buffer length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.size
    }

    /// True for a zero length buffer
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Start address as seen by the bus master
    #[inline]
    pub fn dma_addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// Raw pointer to the first byte
    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// View the buffer contents
    ///
    /// # Safety
    ///
    /// No DMA transfer may be writing the buffer while the slice is alive.
    pub unsafe fn as_slice(&self) -> &[u8] {
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.size) }
    }

    /// Copy `src` into the start of the buffer, clamped to its length
    ///
    /// Returns the number of bytes copied.
    ///
    /// # Safety
    ///
    /// No DMA transfer may be accessing the buffer during the copy.
    pub(crate) unsafe fn fill_from(&self, src: &[u8]) -> usize {
        let count = src.len().min(self.size);
        unsafe {
            core::ptr::copy_nonoverlapping(src.as_ptr(), self.ptr.as_ptr(), count);
        }
        count
    }
}

/// Validation of client supplied buffers
pub struct BoundsChecker;

impl BoundsChecker {
    /// Validate that `buffer` covers `len` bytes without address overflow
    pub fn validate_transfer(buffer: Option<&DmaBuffer>, len: u32) -> Result<()> {
        let len = len as usize;
        match buffer {
            None if len == 0 => Ok(()),
            None => Err(UsbError::InvalidParameter),
            Some(buf) => {
                if buf.dma_addr().checked_add(buf.len()).is_none() {
                    return Err(UsbError::InvalidParameter);
                }
                if len > buf.len() {
                    return Err(UsbError::InvalidParameter);
                }
                Ok(())
            }
        }
    }

    /// Validate alignment requirements
    pub fn validate_alignment(addr: usize, alignment: usize) -> Result<()> {
        if alignment == 0 || (alignment & (alignment - 1)) != 0 {
            return Err(UsbError::InvalidParameter);
        }
        if addr & (alignment - 1) != 0 {
            return Err(UsbError::InvalidParameter);
        }
        Ok(())
    }
}

/// Cache line range covering `[addr, addr + size)`
#[inline]
pub const fn cache_line_span(addr: usize, size: usize) -> (usize, usize) {
    let start = addr & !(DMA_ALIGNMENT - 1);
    let end = (addr + size + DMA_ALIGNMENT - 1) & !(DMA_ALIGNMENT - 1);
    (start, end)
}

/// Check if an address is DMA-aligned
#[inline]
pub const fn is_dma_aligned(addr: usize) -> bool {
    addr & (DMA_ALIGNMENT - 1) == 0
}

/// Cache maintenance for DMA buffers placed in cacheable memory
///
/// Board [`HostController`](crate::engine::HostController) implementations
/// call these from `invalidate_dcache`. Only meaningful on Cortex-M7 class
/// cores with a data cache.
pub mod cache_ops {
    use super::{cache_line_span, DmaBuffer, DMA_ALIGNMENT};
    use cortex_m::asm::{dsb, isb};

    const SCB_DCCMVAC: *mut u32 = 0xE000_EF68 as *mut u32; // Clean by MVA to PoC
    const SCB_DCIMVAC: *mut u32 = 0xE000_EF5C as *mut u32; // Invalidate by MVA to PoC

    fn by_line(reg: *mut u32, addr: usize, size: usize) {
        let (start, end) = cache_line_span(addr, size);
        dsb();
        for line in (start..end).step_by(DMA_ALIGNMENT) {
            // SAFETY: SCB maintenance registers are always present on Cortex-M7
            unsafe { core::ptr::write_volatile(reg, line as u32) };
        }
        dsb();
        isb();
    }

    /// Write back dirty lines before the hardware reads the range
    pub fn clean_dcache(addr: usize, size: usize) {
        by_line(SCB_DCCMVAC, addr, size);
    }

    /// Drop cached lines after the hardware wrote the range
    pub fn invalidate_dcache(addr: usize, size: usize) {
        by_line(SCB_DCIMVAC, addr, size);
    }

    /// Invalidate the lines covering a DMA buffer
    #[inline]
    pub fn invalidate_buffer(buffer: &DmaBuffer) {
        invalidate_dcache(buffer.dma_addr(), buffer.len());
    }
}
