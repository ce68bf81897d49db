//! Platform raw-device driver surface
//!
//! The engine never talks to the kernel itself. Everything platform-specific
//! (device files, ioctls, libusb) sits behind [`RawDevice`], a narrow
//! synchronous trait the engine calls from its worker thread.

use crate::types::{ConfigDescriptor, DeviceDescriptor, TransferType, UsbError};

/// Result of one raw I/O submission
#[derive(Debug, Clone, Default)]
pub struct RawCompletion {
    /// Bytes read from the device (IN transfers), empty for OUT transfers
    pub data: Vec<u8>,
    /// Bytes actually moved in either direction
    pub transferred: usize,
}

/// Synchronous surface of the platform driver layer
///
/// Implementations are shared between submitting threads and the worker,
/// so every method takes `&self` and must be safe to call concurrently.
pub trait RawDevice: Send + Sync {
    /// Read the device descriptor.
    fn device_descriptor(&self) -> Result<DeviceDescriptor, UsbError>;

    /// Read all configuration descriptors, in index order.
    fn configuration_descriptors(&self) -> Result<Vec<ConfigDescriptor>, UsbError>;

    /// Claim an interface at the driver level.
    fn claim_interface(&self, interface: u8) -> Result<(), UsbError>;

    /// Release a previously claimed interface.
    fn release_interface(&self, interface: u8) -> Result<(), UsbError>;

    /// Select the configuration with the given bConfigurationValue.
    fn set_configuration(&self, value: u8) -> Result<(), UsbError>;

    /// Select an alternate setting on an interface.
    fn set_alt_setting(&self, interface: u8, alt: u8) -> Result<(), UsbError>;

    /// Execute one transfer synchronously, blocking until it completes,
    /// times out, or fails.
    fn submit_io(&self, transfer: &TransferType) -> Result<RawCompletion, UsbError>;
}
