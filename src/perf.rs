//! Driver statistics
//!
//! Relaxed atomic counters bumped on IRP finalization, interrupt service and
//! port reset. Reading is lock-free through [`PerfCounters::snapshot`].

use core::sync::atomic::{AtomicU32, Ordering};
use crate::irp::IrpStatus;

/// Counters for host port activity
pub struct PerfCounters {
    /// IRPs finalized with `Completed`
    pub irps_completed: AtomicU32,
    /// IRPs finalized with `CompletedShort`
    pub irps_short: AtomicU32,
    /// IRPs finalized with `ErrorStall`
    pub irps_stalled: AtomicU32,
    /// IRPs finalized with `Aborted`
    pub irps_aborted: AtomicU32,
    /// Bytes moved by completed IRPs (saturating)
    pub bytes_transferred: AtomicU32,
    /// Interrupt service passes
    pub interrupt_count: AtomicU32,
    /// Root port resets started
    pub port_resets: AtomicU32,
}

impl PerfCounters {
    /// Zeroed counters
    pub const fn new() -> Self {
        Self {
            irps_completed: AtomicU32::new(0),
            irps_short: AtomicU32::new(0),
            irps_stalled: AtomicU32::new(0),
            irps_aborted: AtomicU32::new(0),
            bytes_transferred: AtomicU32::new(0),
            interrupt_count: AtomicU32::new(0),
            port_resets: AtomicU32::new(0),
        }
    }

    /// Record a finalized IRP
    #[inline]
    pub fn record_irp(&self, status: IrpStatus, bytes: u32) {
        let counter = match status {
            IrpStatus::Completed => &self.irps_completed,
            IrpStatus::CompletedShort => &self.irps_short,
            IrpStatus::ErrorStall => &self.irps_stalled,
            IrpStatus::Aborted => &self.irps_aborted,
            IrpStatus::Pending | IrpStatus::InProgress => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if matches!(status, IrpStatus::Completed | IrpStatus::CompletedShort) {
            let _ = self.bytes_transferred.fetch_update(
                Ordering::Relaxed,
                Ordering::Relaxed,
                |current| Some(current.saturating_add(bytes)),
            );
        }
    }

    /// Record one interrupt service pass
    #[inline]
    pub fn record_interrupt(&self) {
        self.interrupt_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a port reset request
    #[inline]
    pub fn record_port_reset(&self) {
        self.port_resets.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current statistics snapshot
    pub fn snapshot(&self) -> PerfSnapshot {
        PerfSnapshot {
            irps_completed: self.irps_completed.load(Ordering::Relaxed),
            irps_short: self.irps_short.load(Ordering::Relaxed),
            irps_stalled: self.irps_stalled.load(Ordering::Relaxed),
            irps_aborted: self.irps_aborted.load(Ordering::Relaxed),
            bytes_transferred: self.bytes_transferred.load(Ordering::Relaxed),
            interrupt_count: self.interrupt_count.load(Ordering::Relaxed),
            port_resets: self.port_resets.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters
    pub fn reset(&self) {
        for counter in [
            &self.irps_completed,
            &self.irps_short,
            &self.irps_stalled,
            &self.irps_aborted,
            &self.bytes_transferred,
            &self.interrupt_count,
            &self.port_resets,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for PerfCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable snapshot of performance counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub struct PerfSnapshot {
    pub irps_completed: u32,
    pub irps_short: u32,
    pub irps_stalled: u32,
    pub irps_aborted: u32,
    pub bytes_transferred: u32,
    pub interrupt_count: u32,
    pub port_resets: u32,
}

impl PerfSnapshot {
    /// IRPs that reached any terminal status
    pub fn irps_finalized(&self) -> u32 {
        self.irps_completed + self.irps_short + self.irps_stalled + self.irps_aborted
    }
}
