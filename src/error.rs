//! Engine error types

use crate::types::UsbError;
use thiserror::Error;

/// Errors surfaced synchronously by engine operations
///
/// Per-transfer failures are never reported here; they travel through the
/// submitter's completion sink as a [`crate::TransferOutcome`].
#[derive(Debug, Error)]
pub enum Error {
    /// Device could not be opened or its descriptors read
    #[error("failed to open device at {location}: {reason}")]
    Open {
        /// Platform location of the device
        location: String,
        /// What went wrong during open
        reason: String,
    },

    /// Interface is already claimed
    #[error("interface {0} is already claimed")]
    InUse(u8),

    /// Interface was not claimed
    #[error("interface {0} is not claimed")]
    NotClaimed(u8),

    /// Out-of-range index or otherwise malformed argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The handle's worker is not running (failed startup or shut down)
    #[error("device handle is not initialized")]
    NotInitialized,

    /// Transport-level failure from the raw driver
    #[error("I/O error: {0}")]
    Io(UsbError),

    /// OS resource acquisition failed (thread spawn, wakeup channel)
    #[error("resource error: {0}")]
    Resource(String),
}

/// Type alias for engine results
pub type Result<T> = std::result::Result<T, Error>;
