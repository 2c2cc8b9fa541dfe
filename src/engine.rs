//! Seams to the low-level transfer engines and the host stack
//!
//! The EHCI and OHCI engines own queue heads, transfer descriptors and the
//! controller interrupt status. The driver core only sees the events they
//! report after servicing an interrupt, and hands them transfers to start.

use crate::dma::DmaBuffer;
use crate::ehci::PortId;
use crate::error::Result;
use crate::transfer::{SetupPacket, TransferType, UsbSpeed};
use crate::vbus::PortPower;

/// Outcome reported for the transfer owned by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CompletionSignal {
    /// Nothing finished
    #[default]
    Idle,
    /// Descriptor retired normally
    Complete,
    /// Endpoint returned STALL
    Stall,
}

impl CompletionSignal {
    /// Decode the raw "queue descriptor complete" flag (0, 1 or 0xFF)
    pub const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Complete,
            0xFF => Self::Stall,
            _ => Self::Idle,
        }
    }
}

/// Root port connection change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PortEvent {
    /// Device connected on `port`
    Connected(PortId),
    /// Device removed from `port`
    Disconnected(PortId),
}

/// Progress of the transfer on one hardware endpoint slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransferEvent {
    /// Hardware endpoint slot, 0 for the control endpoint
    pub endpoint: u8,
    /// Completion outcome
    pub signal: CompletionSignal,
    /// Bytes moved since the previous event
    pub bytes: u32,
    /// The device ended the data stage with a short packet
    pub short_packet: bool,
    /// Data toggle to use for the next transaction on this endpoint
    pub data_toggle: Option<bool>,
}

impl TransferEvent {
    /// Normal completion of `bytes` on `endpoint`
    pub const fn complete(endpoint: u8, bytes: u32) -> Self {
        Self {
            endpoint,
            signal: CompletionSignal::Complete,
            bytes,
            short_packet: false,
            data_toggle: None,
        }
    }

    /// STALL on `endpoint`
    pub const fn stall(endpoint: u8) -> Self {
        Self {
            endpoint,
            signal: CompletionSignal::Stall,
            bytes: 0,
            short_packet: false,
            data_toggle: None,
        }
    }
}

/// Everything one engine reported during an interrupt service pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EngineEvents {
    /// Connection change on a root port
    pub port: Option<PortEvent>,
    /// Transfer progress
    pub transfer: Option<TransferEvent>,
}

/// Transfer handed to an engine
#[derive(Debug, Clone, Copy)]
pub struct TransferRequest<'a> {
    /// Hardware endpoint slot
    pub host_endpoint: u8,
    /// Device address
    pub device_address: u8,
    /// Endpoint number and direction
    pub endpoint_and_direction: u8,
    /// Transfer type
    pub transfer_type: TransferType,
    /// Max packet size
    pub endpoint_size: u16,
    /// Device speed
    pub speed: UsbSpeed,
    /// Hub address, 0 for the root port
    pub hub_address: u8,
    /// Hub port
    pub hub_port: u8,
    /// Polling interval
    pub interval: u8,
    /// Setup stage of a control transfer
    pub setup: Option<&'a SetupPacket>,
    /// Data buffer
    pub buffer: Option<&'a DmaBuffer>,
    /// Requested byte count
    pub size: u32,
    /// Data stage runs device-to-host
    pub data_in: bool,
    /// Starting data toggle
    pub data_toggle: bool,
}

/// EHCI or OHCI transfer engine
pub trait TransferEngine {
    /// Controller bring-up
    fn init(&mut self);

    /// Service the controller interrupt status
    fn service(&mut self) -> EngineEvents;

    /// Start a transfer
    fn submit(&mut self, request: &TransferRequest<'_>) -> Result<()>;

    /// Stop the list that carried the last completed transfer
    fn disable_transfer_list(&mut self);

    /// Bytes received by the last control data stage
    fn received_size(&self) -> u32;

    /// Enable or disable root hub operation
    fn set_operation_enabled(&mut self, enable: bool);

    /// Arm port reset signalling on `port`
    fn port_reset_enable(&mut self, _port: PortId) {}
}

/// Board specific pieces of one UHPHS instance
pub trait HostController {
    /// High-speed engine
    type Ehci: TransferEngine;
    /// Low/full-speed engine
    type Ohci: TransferEngine;

    /// EHCI engine
    fn ehci(&mut self) -> &mut Self::Ehci;

    /// OHCI engine
    fn ohci(&mut self) -> &mut Self::Ohci;

    /// Enable the UTMI PLL and the UHPHS peripheral clock
    fn enable_clock(&mut self);

    /// UTMI PLL locked
    fn clock_ready(&self) -> bool;

    /// DMA-visible staging buffer the engines use for control data stages
    fn staging_buffer(&self) -> &[u8];

    /// Invalidate the data cache lines covering `buffer`
    fn invalidate_dcache(&mut self, buffer: &DmaBuffer);

    /// Root port power switch, if the board has one
    fn port_power(&mut self) -> Option<&mut dyn PortPower> {
        None
    }
}

/// Token the host stack gave the root hub at initialization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RootHubToken(pub usize);

/// Device object created by the host stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceHandle(pub usize);

/// Entry points of the generic USB host stack
pub trait HostStack {
    /// A debounced device appeared on `port` of the root hub
    fn device_enumerate(&mut self, root_hub: RootHubToken, port: u8) -> DeviceHandle;

    /// The device was removed
    fn device_denumerate(&mut self, device: DeviceHandle);
}
