//! Operating system services consumed by the driver
//!
//! The driver never sleeps. Delays are armed and then polled for completion,
//! mutexes guard client-context mutations, and the interrupt gate masks the
//! UHPHS interrupt source around list surgery.
//!
//! Bare-metal implementations are provided for builds without an RTOS:
//! [`BareMetalMutexes`], [`DwtDelay`] (over [`TimerSlots`]) and [`NvicGate`].

use core::sync::atomic::{AtomicBool, Ordering};
use crate::error::{Result, UsbError};

/// Armed delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DelayHandle(pub u16);

/// Non-blocking delay service
pub trait DelayService {
    /// Arm a delay of `ms` milliseconds; fails if no timer is free
    fn delay_ms(&mut self, ms: u32) -> Result<DelayHandle>;

    /// Arm a delay of `us` microseconds; fails if no timer is free
    fn delay_us(&mut self, us: u32) -> Result<DelayHandle>;

    /// Poll an armed delay; a completed handle is released
    fn delay_is_complete(&mut self, handle: DelayHandle) -> bool;
}

/// Mutex identifier returned by [`MutexService::mutex_create`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MutexId(pub u8);

/// Mutual exclusion between client contexts
pub trait MutexService {
    /// Create a mutex
    fn mutex_create(&mut self) -> Result<MutexId>;
    /// Acquire, waiting without limit
    fn mutex_lock(&mut self, mutex: MutexId) -> Result<()>;
    /// Release
    fn mutex_unlock(&mut self, mutex: MutexId) -> Result<()>;
    /// Destroy
    fn mutex_delete(&mut self, mutex: MutexId) -> Result<()>;
}

/// Interrupt controller source number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InterruptSource(pub u16);

/// Per-source interrupt masking
pub trait InterruptGate {
    /// Unmask `source`
    fn interrupt_enable(&mut self, source: InterruptSource);

    /// Mask `source`, returning whether it was enabled
    fn interrupt_disable(&mut self, source: InterruptSource) -> bool;

    /// Clear a pending request of `source`
    fn interrupt_clear(&mut self, source: InterruptSource);

    /// Re-enable `source` only if `was_enabled`
    fn interrupt_restore(&mut self, source: InterruptSource, was_enabled: bool) {
        if was_enabled {
            self.interrupt_enable(source);
        }
    }
}

/// Every service the driver consumes
pub trait Osal: DelayService + MutexService + InterruptGate {}

impl<T: DelayService + MutexService + InterruptGate> Osal for T {}

/// Mutex table for single-core builds without an RTOS
///
/// There is no scheduler to wait on, so locking a held mutex fails with
/// [`UsbError::MutexFailure`] instead of blocking.
pub struct BareMetalMutexes<const N: usize> {
    created: [AtomicBool; N],
    locked: [AtomicBool; N],
}

impl<const N: usize> BareMetalMutexes<N> {
    /// Empty table
    pub const fn new() -> Self {
        const FREE: AtomicBool = AtomicBool::new(false);
        Self {
            created: [FREE; N],
            locked: [FREE; N],
        }
    }

    fn slot(&self, mutex: MutexId) -> Result<usize> {
        let index = mutex.0 as usize;
        match self.created.get(index) {
            Some(created) if created.load(Ordering::Acquire) => Ok(index),
            _ => Err(UsbError::MutexFailure),
        }
    }

    /// Create a mutex
    pub fn create(&self) -> Result<MutexId> {
        for (i, created) in self.created.iter().enumerate() {
            if !created.swap(true, Ordering::AcqRel) {
                self.locked[i].store(false, Ordering::Release);
                return Ok(MutexId(i as u8));
            }
        }
        Err(UsbError::MutexFailure)
    }

    /// Acquire without waiting
    pub fn lock(&self, mutex: MutexId) -> Result<()> {
        let index = self.slot(mutex)?;
        if self.locked[index].swap(true, Ordering::Acquire) {
            return Err(UsbError::MutexFailure);
        }
        Ok(())
    }

    /// Release
    pub fn unlock(&self, mutex: MutexId) -> Result<()> {
        let index = self.slot(mutex)?;
        if !self.locked[index].swap(false, Ordering::Release) {
            return Err(UsbError::MutexFailure);
        }
        Ok(())
    }

    /// Destroy
    pub fn delete(&self, mutex: MutexId) -> Result<()> {
        let index = self.slot(mutex)?;
        self.locked[index].store(false, Ordering::Release);
        self.created[index].store(false, Ordering::Release);
        Ok(())
    }
}

impl<const N: usize> Default for BareMetalMutexes<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> MutexService for BareMetalMutexes<N> {
    fn mutex_create(&mut self) -> Result<MutexId> {
        self.create()
    }

    fn mutex_lock(&mut self, mutex: MutexId) -> Result<()> {
        self.lock(mutex)
    }

    fn mutex_unlock(&mut self, mutex: MutexId) -> Result<()> {
        self.unlock(mutex)
    }

    fn mutex_delete(&mut self, mutex: MutexId) -> Result<()> {
        self.delete(mutex)
    }
}

#[derive(Clone, Copy)]
struct TimerSlot {
    start: u32,
    duration: u32,
}

/// Polled delay bookkeeping over a free-running 32-bit tick counter
///
/// Elapsed time is computed with wrapping arithmetic, so a delay survives one
/// counter rollover.
pub struct TimerSlots<const N: usize> {
    slots: [Option<TimerSlot>; N],
}

impl<const N: usize> TimerSlots<N> {
    /// All slots free
    pub const fn new() -> Self {
        Self { slots: [None; N] }
    }

    /// Arm a delay of `ticks` starting at `now`
    pub fn arm(&mut self, now: u32, ticks: u32) -> Result<DelayHandle> {
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(UsbError::TimerUnavailable)?;
        self.slots[index] = Some(TimerSlot {
            start: now,
            duration: ticks,
        });
        Ok(DelayHandle(index as u16))
    }

    /// True once the delay elapsed; the slot is released at that point
    ///
    /// A handle that is not armed reads as complete.
    pub fn poll(&mut self, now: u32, handle: DelayHandle) -> bool {
        let Some(entry) = self.slots.get_mut(handle.0 as usize) else {
            return true;
        };
        match *entry {
            Some(slot) if now.wrapping_sub(slot.start) < slot.duration => false,
            _ => {
                *entry = None;
                true
            }
        }
    }

    /// Number of armed delays
    pub fn armed(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

impl<const N: usize> Default for TimerSlots<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Delay service over the Cortex-M DWT cycle counter
///
/// The cycle counter must be enabled (`DCB::enable_trace`, `DWT::enable_cycle_counter`)
/// before use. At 600 MHz the counter wraps every ~7 s, which bounds the
/// longest delay.
pub struct DwtDelay<const N: usize> {
    slots: TimerSlots<N>,
    cycles_per_us: u32,
}

impl<const N: usize> DwtDelay<N> {
    /// Delay service for a core running at `core_clock_hz`
    pub const fn new(core_clock_hz: u32) -> Self {
        Self {
            slots: TimerSlots::new(),
            cycles_per_us: core_clock_hz / 1_000_000,
        }
    }

    fn arm_us(&mut self, us: u32) -> Result<DelayHandle> {
        let cycles = us.saturating_mul(self.cycles_per_us);
        self.slots.arm(cortex_m::peripheral::DWT::cycle_count(), cycles)
    }
}

impl<const N: usize> DelayService for DwtDelay<N> {
    fn delay_ms(&mut self, ms: u32) -> Result<DelayHandle> {
        self.arm_us(ms.saturating_mul(1000))
    }

    fn delay_us(&mut self, us: u32) -> Result<DelayHandle> {
        self.arm_us(us)
    }

    fn delay_is_complete(&mut self, handle: DelayHandle) -> bool {
        self.slots.poll(cortex_m::peripheral::DWT::cycle_count(), handle)
    }
}

/// NVIC interrupt number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqNumber(pub u16);

// SAFETY: the number comes from the device's interrupt table via `InterruptSource`
unsafe impl cortex_m::interrupt::InterruptNumber for IrqNumber {
    fn number(self) -> u16 {
        self.0
    }
}

/// Interrupt gate over the Cortex-M NVIC
pub struct NvicGate;

impl InterruptGate for NvicGate {
    fn interrupt_enable(&mut self, source: InterruptSource) {
        // SAFETY: unmasking the UHPHS line cannot break a critical section of
        // this driver; every mutation runs with the line masked first.
        unsafe { cortex_m::peripheral::NVIC::unmask(IrqNumber(source.0)) };
    }

    fn interrupt_disable(&mut self, source: InterruptSource) -> bool {
        let irq = IrqNumber(source.0);
        let was_enabled = cortex_m::peripheral::NVIC::is_enabled(irq);
        cortex_m::peripheral::NVIC::mask(irq);
        was_enabled
    }

    fn interrupt_clear(&mut self, source: InterruptSource) {
        cortex_m::peripheral::NVIC::unpend(IrqNumber(source.0));
    }
}
