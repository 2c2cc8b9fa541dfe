//! OHCI companion controller registers of the UHPHS block
//!
//! The port state machine only drives the controller functional state and
//! the host controller reset request; list management belongs to the OHCI
//! transfer engine.

use crate::ehci::Register;
use bitflags::bitflags;

/// OHCI Operational Registers
#[repr(C)]
pub struct OhciRegisters {
    /// HcRevision
    pub hc_revision: Register<u32>,
    /// HcControl
    pub hc_control: Register<u32>,
    /// HcCommandStatus
    pub hc_command_status: Register<u32>,
    /// HcInterruptStatus
    pub hc_interrupt_status: Register<u32>,
    /// HcInterruptEnable
    pub hc_interrupt_enable: Register<u32>,
    /// HcInterruptDisable
    pub hc_interrupt_disable: Register<u32>,
    /// HcHCCA
    pub hc_hcca: Register<u32>,
    /// HcPeriodCurrentED
    pub hc_period_current_ed: Register<u32>,
    /// HcControlHeadED
    pub hc_control_head_ed: Register<u32>,
    /// HcControlCurrentED
    pub hc_control_current_ed: Register<u32>,
    /// HcBulkHeadED
    pub hc_bulk_head_ed: Register<u32>,
    /// HcBulkCurrentED
    pub hc_bulk_current_ed: Register<u32>,
    /// HcDoneHead
    pub hc_done_head: Register<u32>,
    /// HcFmInterval
    pub hc_fm_interval: Register<u32>,
    /// HcFmRemaining
    pub hc_fm_remaining: Register<u32>,
    /// HcFmNumber
    pub hc_fm_number: Register<u32>,
    /// HcPeriodicStart
    pub hc_periodic_start: Register<u32>,
    /// HcLSThreshold
    pub hc_ls_threshold: Register<u32>,
    /// HcRhDescriptorA
    pub hc_rh_descriptor_a: Register<u32>,
    /// HcRhDescriptorB
    pub hc_rh_descriptor_b: Register<u32>,
    /// HcRhStatus
    pub hc_rh_status: Register<u32>,
    /// HcRhPortStatus
    pub hc_rh_port_status: [Register<u32>; 3],
}

impl OhciRegisters {
    /// Zeroed register image for simulation
    pub const fn new() -> Self {
        const ZERO: Register<u32> = Register::new(0);
        Self {
            hc_revision: ZERO,
            hc_control: ZERO,
            hc_command_status: ZERO,
            hc_interrupt_status: ZERO,
            hc_interrupt_enable: ZERO,
            hc_interrupt_disable: ZERO,
            hc_hcca: ZERO,
            hc_period_current_ed: ZERO,
            hc_control_head_ed: ZERO,
            hc_control_current_ed: ZERO,
            hc_bulk_head_ed: ZERO,
            hc_bulk_current_ed: ZERO,
            hc_done_head: ZERO,
            hc_fm_interval: ZERO,
            hc_fm_remaining: ZERO,
            hc_fm_number: ZERO,
            hc_periodic_start: ZERO,
            hc_ls_threshold: ZERO,
            hc_rh_descriptor_a: ZERO,
            hc_rh_descriptor_b: ZERO,
            hc_rh_status: ZERO,
            hc_rh_port_status: [ZERO; 3],
        }
    }

    /// Map an OHCI register block
    ///
    /// # Safety
    ///
    /// `ohci_base` must be the OHCI base address of a UHPHS instance, and the
    /// caller must not create a second mapping used concurrently.
    pub unsafe fn from_base(ohci_base: usize) -> &'static Self {
        unsafe { &*(ohci_base as *const Self) }
    }

    /// Request a host controller software reset
    #[inline]
    pub fn request_reset(&self) {
        // HcCommandStatus is write-1-to-set
        self.hc_command_status.write(HcCommandStatus::HOST_CONTROLLER_RESET.bits());
    }

    /// True while the software reset is still in progress
    #[inline]
    pub fn reset_in_progress(&self) -> bool {
        self.hc_command_status.is_set(HcCommandStatus::HOST_CONTROLLER_RESET.bits())
    }

    /// Force the functional state, leaving the other control bits as they are
    #[inline]
    pub fn set_functional_state(&self, state: FunctionalState) {
        self.hc_control
            .modify(|v| (v & !HcControl::FUNCTIONAL_STATE_MASK.bits()) | state.bits());
    }

    /// Current functional state
    pub fn functional_state(&self) -> FunctionalState {
        FunctionalState::from_control(self.hc_control.read())
    }
}

impl Default for OhciRegisters {
    fn default() -> Self {
        Self::new()
    }
}

/// HcControl.HCFS values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum FunctionalState {
    UsbReset = 0,
    UsbResume = 1,
    UsbOperational = 2,
    UsbSuspend = 3,
}

impl FunctionalState {
    /// Field value positioned in HcControl
    pub const fn bits(self) -> u32 {
        (self as u32) << 6
    }

    /// Decode the HCFS field
    pub const fn from_control(control: u32) -> Self {
        match (control >> 6) & 0b11 {
            0 => Self::UsbReset,
            1 => Self::UsbResume,
            2 => Self::UsbOperational,
            _ => Self::UsbSuspend,
        }
    }
}

bitflags! {
    /// HcControl bit definitions
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HcControl: u32 {
        /// Control/Bulk Service Ratio - Bits [1:0]
        const CONTROL_BULK_RATIO_MASK = 0b11;
        /// Periodic List Enable - Bit 2
        const PERIODIC_LIST_ENABLE = 1 << 2;
        /// Isochronous Enable - Bit 3
        const ISOCHRONOUS_ENABLE = 1 << 3;
        /// Control List Enable - Bit 4
        const CONTROL_LIST_ENABLE = 1 << 4;
        /// Bulk List Enable - Bit 5
        const BULK_LIST_ENABLE = 1 << 5;
        /// Host Controller Functional State - Bits [7:6]
        const FUNCTIONAL_STATE_MASK = 0b11 << 6;
        /// Interrupt Routing - Bit 8
        const INTERRUPT_ROUTING = 1 << 8;
    }
}

bitflags! {
    /// HcCommandStatus bit definitions
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HcCommandStatus: u32 {
        /// Host Controller Reset - Bit 0
        const HOST_CONTROLLER_RESET = 1 << 0;
        /// Control List Filled - Bit 1
        const CONTROL_LIST_FILLED = 1 << 1;
        /// Bulk List Filled - Bit 2
        const BULK_LIST_FILLED = 1 << 2;
    }
}

const _: () = {
    assert!(core::mem::size_of::<OhciRegisters>() == 0x54 + 4 * 3);
};
