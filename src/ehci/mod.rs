//! EHCI register interface of the UHPHS block
//!
//! Only the operational registers the port state machines touch are modelled:
//! the command/status/interrupt registers, CONFIGFLAG and the per-port PORTSC
//! array. Queue construction lives in the transfer engines.
//!
//! # Register Memory Layout
//!
//! - Capability Registers (read-only, offset 0x00-0x0F)
//! - Operational Registers (offset CAPLENGTH, 0x10 on UHPHS)

pub mod register;

pub use register::Register;

use crate::error::{Result, UsbError};
use bitflags::bitflags;

/// Maximum PORTSC registers in the operational block
pub const MAX_PORTS: usize = 8;

/// Type-safe port identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PortId(u8);

impl PortId {
    /// Create a new port ID, validating range
    pub const fn new(port: u8) -> Result<Self> {
        if port as usize >= MAX_PORTS {
            Err(UsbError::InvalidParameter)
        } else {
            Ok(Self(port))
        }
    }

    /// Get the port index as usize for array access
    #[inline(always)]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Get the raw port number
    #[inline(always)]
    pub const fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<usize> for PortId {
    type Error = UsbError;

    fn try_from(port: usize) -> Result<Self> {
        if port >= MAX_PORTS {
            Err(UsbError::InvalidParameter)
        } else {
            Ok(Self(port as u8))
        }
    }
}

/// Offset of the operational registers from the UHPHS EHCI base
pub const OPERATIONAL_OFFSET: usize = 0x10;

/// EHCI Operational Registers
#[repr(C)]
pub struct EhciOperationalRegisters {
    /// USB Command Register (USBCMD)
    pub usbcmd: Register<u32>,
    /// USB Status Register (USBSTS)
    pub usbsts: Register<u32>,
    /// USB Interrupt Enable Register (USBINTR)
    pub usbintr: Register<u32>,
    /// USB Frame Index Register (FRINDEX)
    pub frindex: Register<u32>,
    /// Control Data Structure Segment Register (CTRLDSSEGMENT)
    pub ctrldssegment: Register<u32>,
    /// Periodic Frame List Base Address Register (PERIODICLISTBASE)
    pub periodiclistbase: Register<u32>,
    /// Asynchronous List Address Register (ASYNCLISTADDR)
    pub asynclistaddr: Register<u32>,
    _reserved0: [Register<u32>; 9],
    /// Configured Flag Register (CONFIGFLAG)
    pub configflag: Register<u32>,
    /// Port Status and Control Registers (PORTSC)
    pub portsc: [Register<u32>; MAX_PORTS],
}

impl EhciOperationalRegisters {
    /// Zeroed register image
    ///
    /// Real hardware is reached through [`Self::from_base`]; a RAM image is
    /// used for simulation.
    pub const fn new() -> Self {
        const ZERO: Register<u32> = Register::new(0);
        Self {
            usbcmd: ZERO,
            usbsts: ZERO,
            usbintr: ZERO,
            frindex: ZERO,
            ctrldssegment: ZERO,
            periodiclistbase: ZERO,
            asynclistaddr: ZERO,
            _reserved0: [ZERO; 9],
            configflag: ZERO,
            portsc: [ZERO; MAX_PORTS],
        }
    }

    /// Map the operational block of an EHCI controller
    ///
    /// # Safety
    ///
    /// `ehci_base` must be the EHCI base address of a UHPHS instance, and the
    /// caller must not create a second mapping used concurrently.
    pub unsafe fn from_base(ehci_base: usize) -> &'static Self {
        unsafe { &*((ehci_base + OPERATIONAL_OFFSET) as *const Self) }
    }

    /// Current PORTSC value
    #[inline]
    pub fn port_status(&self, port: PortId) -> PortSc {
        PortSc::from_bits_retain(self.portsc[port.index()].read())
    }

    /// Set PORTSC bits, leaving write-1-to-clear change bits untouched
    #[inline]
    pub fn set_port_bits(&self, port: PortId, bits: PortSc) {
        self.portsc[port.index()]
            .modify(|v| (v & !PortSc::CHANGE_BITS.bits()) | bits.bits());
    }

    /// Clear PORTSC bits, leaving write-1-to-clear change bits untouched
    #[inline]
    pub fn clear_port_bits(&self, port: PortId, bits: PortSc) {
        self.portsc[port.index()]
            .modify(|v| v & !PortSc::CHANGE_BITS.bits() & !bits.bits());
    }

    /// Release `port` to the companion OHCI controller
    ///
    /// Masks EHCI interrupts, sets the port owner bit and clears the
    /// configure flag so unclaimed ports route to the companion.
    pub fn route_to_companion(&self, port: PortId) {
        self.usbintr.write(0);
        self.set_port_bits(port, PortSc::PORT_OWNER);
        self.configflag.clear_bits(ConfigFlag::CONFIGURED.bits());
    }

    /// Line status bits of `port`
    #[inline]
    pub fn line_state(&self, port: PortId) -> LineState {
        LineState::from_portsc(self.port_status(port))
    }
}

impl Default for EhciOperationalRegisters {
    fn default() -> Self {
        Self::new()
    }
}

/// USB line state sampled in PORTSC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum LineState {
    SE0,
    /// Low-speed device signalling
    KState,
    JState,
    Undefined,
}

impl LineState {
    /// Decode the line status field
    pub const fn from_portsc(portsc: PortSc) -> Self {
        match (portsc.bits() & PortSc::LINE_STATUS_MASK.bits()) >> 10 {
            0b00 => Self::SE0,
            0b01 => Self::KState,
            0b10 => Self::JState,
            _ => Self::Undefined,
        }
    }
}

bitflags! {
    /// USB Command Register (USBCMD) bit definitions
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UsbCmd: u32 {
        /// Run/Stop (RS) - Bit 0
        const RUN_STOP = 1 << 0;
        /// Host Controller Reset (HCRESET) - Bit 1
        const HC_RESET = 1 << 1;
        /// Periodic Schedule Enable (PSE) - Bit 4
        const PERIODIC_SCHEDULE_ENABLE = 1 << 4;
        /// Asynchronous Schedule Enable (ASE) - Bit 5
        const ASYNC_SCHEDULE_ENABLE = 1 << 5;
        /// Interrupt on Async Advance Doorbell (IAAD) - Bit 6
        const INTERRUPT_ON_ASYNC_ADVANCE = 1 << 6;
    }
}

bitflags! {
    /// USB Status Register (USBSTS) bit definitions
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UsbSts: u32 {
        /// USB Interrupt (USBINT) - Bit 0
        const USB_INTERRUPT = 1 << 0;
        /// USB Error Interrupt (USBERRINT) - Bit 1
        const USB_ERROR_INTERRUPT = 1 << 1;
        /// Port Change Detect (PCD) - Bit 2
        const PORT_CHANGE_DETECT = 1 << 2;
        /// Host System Error (HSE) - Bit 4
        const HOST_SYSTEM_ERROR = 1 << 4;
        /// Host Controller Halted (HCHalted) - Bit 12
        const HC_HALTED = 1 << 12;
    }
}

bitflags! {
    /// USB Interrupt Enable Register (USBINTR) bit definitions
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UsbIntr: u32 {
        /// USB Interrupt Enable - Bit 0
        const USB_INTERRUPT_ENABLE = 1 << 0;
        /// USB Error Interrupt Enable - Bit 1
        const USB_ERROR_INTERRUPT_ENABLE = 1 << 1;
        /// Port Change Interrupt Enable - Bit 2
        const PORT_CHANGE_INTERRUPT_ENABLE = 1 << 2;
        /// Host System Error Enable - Bit 4
        const HOST_SYSTEM_ERROR_ENABLE = 1 << 4;
    }
}

bitflags! {
    /// Configured Flag Register (CONFIGFLAG)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ConfigFlag: u32 {
        /// Route all ports to EHCI (CF) - Bit 0
        const CONFIGURED = 1 << 0;
    }
}

bitflags! {
    /// Port Status and Control Register (PORTSC) bit definitions
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PortSc: u32 {
        /// Current Connect Status (CCS) - Bit 0
        const CURRENT_CONNECT_STATUS = 1 << 0;
        /// Connect Status Change (CSC) - Bit 1
        const CONNECT_STATUS_CHANGE = 1 << 1;
        /// Port Enabled/Disabled (PED) - Bit 2
        const PORT_ENABLED = 1 << 2;
        /// Port Enable/Disable Change (PEDC) - Bit 3
        const PORT_ENABLE_CHANGE = 1 << 3;
        /// Over-current Active (OCA) - Bit 4
        const OVER_CURRENT_ACTIVE = 1 << 4;
        /// Over-current Change (OCC) - Bit 5
        const OVER_CURRENT_CHANGE = 1 << 5;
        /// Force Port Resume (FPR) - Bit 6
        const FORCE_PORT_RESUME = 1 << 6;
        /// Suspend (SUSP) - Bit 7
        const SUSPEND = 1 << 7;
        /// Port Reset (PR) - Bit 8
        const PORT_RESET = 1 << 8;
        /// Line Status - Bits [11:10]
        const LINE_STATUS_MASK = 0b11 << 10;
        const LINE_STATUS_K_STATE = 0b01 << 10;
        const LINE_STATUS_J_STATE = 0b10 << 10;
        /// Port Power (PP) - Bit 12
        const PORT_POWER = 1 << 12;
        /// Port Owner (PO) - Bit 13
        const PORT_OWNER = 1 << 13;
        /// Write-1-to-clear change bits
        const CHANGE_BITS = (1 << 1) | (1 << 3) | (1 << 5);
    }
}

const _: () = {
    assert!(core::mem::size_of::<EhciOperationalRegisters>() == 0x44 + 4 * MAX_PORTS);
    assert!(core::mem::align_of::<EhciOperationalRegisters>() == 4);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitflag_definitions() {
        assert_eq!(UsbCmd::RUN_STOP.bits(), 1);
        assert_eq!(PortSc::CURRENT_CONNECT_STATUS.bits(), 1);
        assert_eq!(PortSc::PORT_RESET.bits(), 1 << 8);
        assert_eq!(PortSc::PORT_OWNER.bits(), 1 << 13);
        assert_eq!(ConfigFlag::CONFIGURED.bits(), 1);
    }

    #[test]
    fn test_configflag_offset() {
        let regs = EhciOperationalRegisters::new();
        let base = &regs as *const _ as usize;
        assert_eq!(&regs.configflag as *const _ as usize - base, 0x40);
        assert_eq!(&regs.portsc[0] as *const _ as usize - base, 0x44);
    }

    #[test]
    fn test_route_to_companion() {
        let regs = EhciOperationalRegisters::new();
        let port = PortId::new(0).unwrap();
        regs.usbintr.write(0x37);
        regs.configflag.write(1);
        regs.portsc[0].write(PortSc::CURRENT_CONNECT_STATUS.bits() | PortSc::CONNECT_STATUS_CHANGE.bits());

        regs.route_to_companion(port);

        assert_eq!(regs.usbintr.read(), 0);
        assert_eq!(regs.configflag.read(), 0);
        let status = regs.port_status(port);
        assert!(status.contains(PortSc::PORT_OWNER));
        // change bits are not written back as ones
        assert!(!status.contains(PortSc::CONNECT_STATUS_CHANGE));
    }

    #[test]
    fn test_line_state_decode() {
        assert_eq!(LineState::from_portsc(PortSc::LINE_STATUS_K_STATE), LineState::KState);
        assert_eq!(LineState::from_portsc(PortSc::LINE_STATUS_J_STATE), LineState::JState);
        assert_eq!(LineState::from_portsc(PortSc::empty()), LineState::SE0);
        assert!(PortId::new(8).is_err());
    }
}
