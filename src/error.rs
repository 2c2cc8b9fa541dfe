//! USB host port error types

use core::fmt;

/// USB host port result type
pub type Result<T> = core::result::Result<T, UsbError>;

/// USB host port error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UsbError {
    /// Driver instance already initialized
    AlreadyInitialized,
    /// Driver instance is not ready for the requested operation
    NotReady,
    /// Handle is stale, out of range or refers to an unused object
    InvalidHandle,
    /// Invalid parameter
    InvalidParameter,
    /// Invalid state for operation
    InvalidState,
    /// No available resources (pipes, IRPs, timers)
    NoResources,
    /// Instance already opened by another client
    AlreadyOpen,
    /// Requested I/O intent is not supported
    UnsupportedIntent,
    /// Mutex creation, lock or release failed
    MutexFailure,
    /// Delay service could not arm a timer
    TimerUnavailable,
    /// Timeout waiting for hardware
    Timeout,
    /// USB stall condition
    Stall,
    /// Port over-current condition
    OverCurrent,
    /// Port power switch failure
    PowerFailure,
    /// Transfer engine rejected the request
    EngineRejected,
}

impl fmt::Display for UsbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyInitialized => write!(f, "Instance already initialized"),
            Self::NotReady => write!(f, "Instance not ready"),
            Self::InvalidHandle => write!(f, "Invalid handle"),
            Self::InvalidParameter => write!(f, "Invalid parameter"),
            Self::InvalidState => write!(f, "Invalid state"),
            Self::NoResources => write!(f, "No resources available"),
            Self::AlreadyOpen => write!(f, "Instance already open"),
            Self::UnsupportedIntent => write!(f, "Unsupported I/O intent"),
            Self::MutexFailure => write!(f, "Mutex operation failed"),
            Self::TimerUnavailable => write!(f, "Delay timer unavailable"),
            Self::Timeout => write!(f, "Timeout"),
            Self::Stall => write!(f, "USB stall"),
            Self::OverCurrent => write!(f, "Port over-current"),
            Self::PowerFailure => write!(f, "Port power failure"),
            Self::EngineRejected => write!(f, "Transfer engine rejected request"),
        }
    }
}
