//! Network error types

use core::fmt;

pub type Result<T> = core::result::Result<T, NetError>;

/// Driver-level failures reported by a [`NicDriver`](crate::driver::NicDriver).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    /// TX queue is full, try again after completions collected.
    QueueFull,
    /// Device not ready.
    DeviceNotReady,
    /// Frame too large.
    FrameTooLarge,
    /// Provided buffer too small for a received frame.
    BufferTooSmall,
    /// Hardware reported an error.
    DeviceError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetError {
    /// Memory pool exhausted.
    OutOfMemory,
    /// Fixed table or chunk limit reached.
    OutOfResources,
    InvalidParameter,
    InvalidAddress,
    InvalidLength,
    /// Malformed protocol header.
    InvalidHeader,
    /// Generic transfer failure.
    Failure,
    Timeout,
    /// No suitable interface or source address.
    NoRoute,
    /// Link-layer address of the next hop is unknown.
    Unresolved,
    LinkDown,
    /// Error reported by the NIC driver.
    Driver(DriverError),
}

impl From<DriverError> for NetError {
    fn from(e: DriverError) -> Self {
        NetError::Driver(e)
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull => write!(f, "TX queue full"),
            Self::DeviceNotReady => write!(f, "Device not ready"),
            Self::FrameTooLarge => write!(f, "Frame too large"),
            Self::BufferTooSmall => write!(f, "Buffer too small"),
            Self::DeviceError => write!(f, "Device error"),
        }
    }
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "Out of memory"),
            Self::OutOfResources => write!(f, "Out of resources"),
            Self::InvalidParameter => write!(f, "Invalid parameter"),
            Self::InvalidAddress => write!(f, "Invalid address"),
            Self::InvalidLength => write!(f, "Invalid length"),
            Self::InvalidHeader => write!(f, "Invalid header"),
            Self::Failure => write!(f, "Operation failed"),
            Self::Timeout => write!(f, "Request timed out"),
            Self::NoRoute => write!(f, "No route to destination"),
            Self::Unresolved => write!(f, "Link-layer address unresolved"),
            Self::LinkDown => write!(f, "Link is down"),
            Self::Driver(e) => write!(f, "Driver error: {}", e),
        }
    }
}
