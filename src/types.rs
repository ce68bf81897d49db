//! USB transfer and descriptor type definitions
//!
//! This module defines the types shared between the engine and the
//! surrounding USB stack: transfer descriptors, completion outcomes, and the
//! descriptor data handed over by the platform driver layer.

use serde::{Deserialize, Serialize};

/// Request ID for matching completions
///
/// Each submitted transfer carries a caller-generated ID so that completions
/// can be matched to their requests (typically from an atomic counter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

/// Opaque platform path identifying a device
///
/// The engine never parses this string; it only hands it to the platform
/// driver layer and uses it in diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceLocation(pub String);

impl std::fmt::Display for DeviceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transfer direction relative to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Device to host
    In,
    /// Host to device
    Out,
}

/// USB transfer descriptors
///
/// Supports control, interrupt, and bulk transfers. Buffer contents are
/// opaque to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TransferType {
    /// Control transfer (endpoint 0)
    ///
    /// Always synchronous with the driver's default timeout.
    Control {
        /// Request type byte (bmRequestType)
        request_type: u8,
        /// Request byte (bRequest)
        request: u8,
        /// Value parameter (wValue)
        value: u16,
        /// Index parameter (wIndex)
        index: u16,
        /// Data to send (OUT) or the desired buffer size for IN transfers
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },
    /// Interrupt transfer
    ///
    /// Used for HID devices and other low-latency endpoints.
    Interrupt {
        /// Endpoint address (includes direction bit)
        endpoint: u8,
        /// Data to send (OUT) or buffer sizing for IN transfers
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
        /// Timeout in milliseconds
        timeout_ms: u32,
    },
    /// Bulk transfer
    ///
    /// Used for storage devices, network adapters, and other high-throughput
    /// endpoints.
    Bulk {
        /// Endpoint address (includes direction bit)
        endpoint: u8,
        /// Data to send (OUT) or buffer sizing for IN transfers
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
        /// Timeout in milliseconds
        timeout_ms: u32,
    },
}

impl TransferType {
    /// Transfer direction, from bit 7 of the request type (control) or the
    /// endpoint address (interrupt/bulk).
    pub fn direction(&self) -> Direction {
        let bits = match self {
            TransferType::Control { request_type, .. } => *request_type,
            TransferType::Interrupt { endpoint, .. } | TransferType::Bulk { endpoint, .. } => {
                *endpoint
            }
        };
        if bits & 0x80 != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }

    /// Target endpoint address; zero for control transfers.
    pub fn endpoint(&self) -> u8 {
        match self {
            TransferType::Control { .. } => 0,
            TransferType::Interrupt { endpoint, .. } | TransferType::Bulk { endpoint, .. } => {
                *endpoint
            }
        }
    }
}

/// One transfer submission: caller-generated ID plus the descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Unique request ID for matching the completion
    pub id: RequestId,
    /// Transfer to perform
    pub transfer: TransferType,
}

/// One completion, delivered through the submitter's sink
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    /// Request ID matching the original submission
    pub id: RequestId,
    /// Final outcome of the transfer
    pub outcome: TransferOutcome,
}

/// Final outcome of a transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TransferOutcome {
    /// Transfer finished on the device
    Success {
        /// Data received (for IN transfers), empty for OUT transfers
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
        /// Bytes actually moved in either direction
        transferred: usize,
    },
    /// Cancellation was observed before the outcome was reported
    Cancelled,
    /// Transfer failed at the transport level
    Error {
        /// Error details
        error: UsbError,
    },
}

impl TransferOutcome {
    /// Returns true for a `Success` outcome.
    pub fn is_success(&self) -> bool {
        matches!(self, TransferOutcome::Success { .. })
    }

    /// Returns true for a `Cancelled` outcome.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransferOutcome::Cancelled)
    }
}

/// Transport-level USB errors reported by the raw driver layer
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum UsbError {
    /// Transfer timed out
    #[error("transfer timed out")]
    Timeout,
    /// Endpoint stalled (protocol error)
    #[error("endpoint stalled")]
    Stall,
    /// Device was disconnected
    #[error("device disconnected")]
    NoDevice,
    /// Device or endpoint not found
    #[error("device or endpoint not found")]
    NotFound,
    /// Device is busy
    #[error("device busy")]
    Busy,
    /// Buffer overflow
    #[error("buffer overflow")]
    Overflow,
    /// I/O error
    #[error("I/O error")]
    Io,
    /// Invalid parameter
    #[error("invalid parameter")]
    InvalidParam,
    /// Access denied (permissions)
    #[error("access denied")]
    Access,
    /// Other error with message
    #[error("{message}")]
    Other { message: String },
}

/// Device descriptor handed over by the platform layer
///
/// Carries the raw descriptor bytes (opaque to the engine) next to the
/// parsed fields the engine needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Raw descriptor bytes as read from the device
    #[serde(with = "serde_bytes")]
    pub raw: Vec<u8>,
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// USB device class
    pub class: u8,
    /// Number of configurations the device reports
    pub num_configurations: u8,
}

/// One configuration descriptor: raw bytes plus parsed topology
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigDescriptor {
    /// Raw descriptor bytes, including interface and endpoint descriptors
    #[serde(with = "serde_bytes")]
    pub raw: Vec<u8>,
    /// bConfigurationValue used to select this configuration
    pub value: u8,
    /// Interfaces within this configuration
    pub interfaces: Vec<InterfaceDescriptor>,
}

/// Interface topology within a configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceDescriptor {
    /// bInterfaceNumber
    pub number: u8,
    /// Endpoint addresses owned by this interface, in descriptor order
    pub endpoints: Vec<u8>,
}
