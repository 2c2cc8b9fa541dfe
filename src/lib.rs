#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

//! USB Host Port (UHPHS) driver for Microchip SAM9X60 / SAMA5D2 class parts
//!
//! The UHPHS block pairs an EHCI controller (high speed) with a companion
//! OHCI controller (low and full speed) on the same port. This crate hides
//! that split behind one pipe/IRP interface for a generic USB host stack.
//!
//! # Core Components
//!
//! - [`host`] - driver instances, task dispatcher, pipes, IRPs and root hub
//! - [`pipe`] / [`irp`] - fixed pools of pipes and I/O request packets
//! - [`engine`] - traits for the EHCI/OHCI transfer engines and the host stack
//! - [`osal`] - delay, mutex and interrupt services the driver consumes
//! - [`ehci`] / [`ohci`] - register blocks used for the port handoff
//! - [`clk`] - PMC bring-up of the UTMI PLL and the USB clocks
//! - [`vbus`] - root port power switching and over-current detection
//! - [`dma`] - DMA buffers and cache maintenance
//! - [`error`] - error types
//!
//! # Usage
//!
//! ```ignore
//! let mut host = UhpHost::new(os);
//! let module = host.initialize(0, UhpInit::new(board, regs, UHPHS_IRQ))?;
//! loop {
//!     host.tasks(module, &mut stack);
//!     if host.status(module) == DriverStatus::Ready {
//!         break;
//!     }
//! }
//! let client = host.open(0, IoIntent::SUPPORTED)?;
//! host.root_hub_initialize(client, RootHubToken(0))?;
//! ```

#[cfg(feature = "defmt")]
use defmt as _;

pub mod clk;
pub mod config;
pub mod dma;
pub mod ehci;
pub mod engine;
pub mod error;
pub mod host;
pub mod irp;
pub mod ohci;
pub mod osal;
pub mod perf;
pub mod pipe;
pub mod transfer;
pub mod vbus;

pub use engine::{DeviceHandle, HostController, HostStack, RootHubToken, TransferEngine};
pub use error::{Result, UsbError};
pub use host::{
    ClientEventCallback, ClientHandle, DriverStatus, HostEvent, IoIntent, ModuleHandle, RegisterBlocks,
    RootHubConfig, UhpHost, UhpInit,
};
pub use irp::{IrpCompletion, IrpHandle, IrpRequest, IrpStatus};
pub use pipe::{PipeConfig, PipeHandle, PipeInfo};
pub use transfer::{Direction, SetupPacket, TransferType, UsbSpeed};
