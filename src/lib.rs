//! Transfer execution engine for platform USB access backends
//!
//! This crate owns an opened USB device connection, serializes I/O transfers
//! submitted by a higher-level USB stack onto a dedicated per-handle worker
//! thread, and supports cancellation of in-flight transfers from other
//! threads. A small non-blocking wakeup channel integrates device readiness
//! with an external reactor.
//!
//! The platform driver layer (raw open, claim, submit-io) is consumed through
//! the [`raw::RawDevice`] trait; an optional `rusb`-backed implementation is
//! available behind the `libusb` feature.

pub mod device;
pub mod error;
pub mod handle;
#[cfg(feature = "libusb")]
pub mod libusb;
pub mod logging;
pub mod raw;
pub mod test_utils;
pub mod transfer;
pub mod types;
#[cfg(unix)]
pub mod wakeup;

pub use device::Device;
pub use error::{Error, Result};
pub use handle::DeviceHandle;
pub use logging::setup_logging;
pub use raw::{RawCompletion, RawDevice};
pub use transfer::{CompletionSink, Transfer};
pub use types::{
    Completion, ConfigDescriptor, DeviceDescriptor, DeviceLocation, Direction, InterfaceDescriptor,
    RequestId, TransferOutcome, TransferRequest, TransferType, UsbError,
};
#[cfg(unix)]
pub use wakeup::WakeupPipe;

/// Recovers the guard from a poisoned lock. The engine's shared state must
/// stay usable for teardown even after a worker panic.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
