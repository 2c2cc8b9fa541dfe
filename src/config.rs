//! Compile-time capacities and timing constants
//!
//! Capacities size the fixed arenas (instances, pipes, IRPs). Nothing in the
//! driver allocates at runtime.

/// Number of host port driver instances
pub const INSTANCES_NUMBER: usize = 1;

/// Pipe objects shared by all instances, control region included
pub const PIPES_NUMBER: usize = 16;

/// Leading pipe indices reserved for control pipes
///
/// Control pipes always bind hardware endpoint slot 0 and are never drawn
/// from the general pool.
pub const CONTROL_PIPES_NUMBER: usize = 4;

/// IRP slots shared by all instances
pub const IRPS_NUMBER: usize = 32;

/// Smallest endpoint size accepted by pipe setup
pub const MIN_ENDPOINT_SIZE: u16 = 8;

/// Largest endpoint size accepted by pipe setup
pub const MAX_ENDPOINT_SIZE: u16 = 4096;

/// Root hub ports exposed per instance
pub const ROOT_HUB_PORTS: u8 = 1;

const _: () = {
    assert!(CONTROL_PIPES_NUMBER >= 1);
    assert!(CONTROL_PIPES_NUMBER < PIPES_NUMBER);
    assert!(PIPES_NUMBER <= u8::MAX as usize);
    assert!(IRPS_NUMBER <= u16::MAX as usize);
};

/// Bounded delays used by the port state machines (milliseconds)
pub mod timing {
    /// Settle time after EHCI reset-enable before reading line status
    pub const RESET_SETTLE_MS: u32 = 70;
    /// Settle time after handing a low-speed port to OHCI
    pub const LOW_SPEED_SETTLE_MS: u32 = 50;
    /// Default EHCI port reset assertion time (TDRSTR)
    pub const RESET_DURATION_MS: u32 = 50;
    /// Attach debounce window
    pub const ATTACH_DEBOUNCE_MS: u32 = 100;
    /// UTMI bandgap and regulator startup wait (microseconds)
    pub const UTMI_STARTUP_US: u32 = 10;
}
