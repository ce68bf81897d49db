//! libusb-backed implementation of the raw driver surface
//!
//! Adapts `rusb` to [`RawDevice`] so the engine can drive real hardware.
//! Only compiled with the `libusb` feature; it needs a system libusb.

use crate::raw::{RawCompletion, RawDevice};
use crate::types::{
    ConfigDescriptor, DeviceDescriptor, DeviceLocation, Direction, InterfaceDescriptor,
    TransferType, UsbError,
};
use rusb::{Context, UsbContext};
use std::time::Duration;
use tracing::debug;

/// Default timeout for control transfers and descriptor reads (5 seconds)
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// GET_DESCRIPTOR request constants
const REQUEST_GET_DESCRIPTOR: u8 = 0x06;
const REQUEST_TYPE_DEVICE_IN: u8 = 0x80;
const DESCRIPTOR_TYPE_DEVICE: u16 = 0x0100;
const DESCRIPTOR_TYPE_CONFIG: u16 = 0x0200;

/// An opened libusb device usable as the engine's raw driver
pub struct LibusbDevice {
    device: rusb::Device<Context>,
    handle: rusb::DeviceHandle<Context>,
}

impl LibusbDevice {
    /// Opens the device at a `bus.address` location string.
    pub fn open(location: &DeviceLocation) -> Result<Self, UsbError> {
        let (bus, address) = parse_location(&location.0)?;

        let context = Context::new().map_err(map_rusb_error)?;
        let devices = context.devices().map_err(map_rusb_error)?;
        for device in devices.iter() {
            if device.bus_number() == bus && device.address() == address {
                let handle = device.open().map_err(map_rusb_error)?;
                debug!("Opened libusb device at {}", location);
                return Ok(Self { device, handle });
            }
        }
        Err(UsbError::NotFound)
    }

    /// Raw descriptor bytes straight from the device; the engine treats
    /// them as opaque.
    fn read_raw_descriptor(&self, value: u16, len: usize) -> Result<Vec<u8>, UsbError> {
        let mut raw = vec![0u8; len];
        let n = self
            .handle
            .read_control(
                REQUEST_TYPE_DEVICE_IN,
                REQUEST_GET_DESCRIPTOR,
                value,
                0,
                &mut raw,
                DEFAULT_TIMEOUT,
            )
            .map_err(map_rusb_error)?;
        raw.truncate(n);
        Ok(raw)
    }
}

impl RawDevice for LibusbDevice {
    fn device_descriptor(&self) -> Result<DeviceDescriptor, UsbError> {
        let desc = self.device.device_descriptor().map_err(map_rusb_error)?;
        let raw = self.read_raw_descriptor(DESCRIPTOR_TYPE_DEVICE, 18)?;

        Ok(DeviceDescriptor {
            raw,
            vendor_id: desc.vendor_id(),
            product_id: desc.product_id(),
            class: desc.class_code(),
            num_configurations: desc.num_configurations(),
        })
    }

    fn configuration_descriptors(&self) -> Result<Vec<ConfigDescriptor>, UsbError> {
        let desc = self.device.device_descriptor().map_err(map_rusb_error)?;

        let mut configurations = Vec::with_capacity(desc.num_configurations() as usize);
        for index in 0..desc.num_configurations() {
            let config = self
                .device
                .config_descriptor(index)
                .map_err(map_rusb_error)?;

            let mut interfaces = Vec::new();
            for interface in config.interfaces() {
                // The first alternate setting carries the endpoint layout.
                if let Some(setting) = interface.descriptors().next() {
                    let endpoints = setting
                        .endpoint_descriptors()
                        .map(|endpoint| endpoint.address())
                        .collect();
                    interfaces.push(InterfaceDescriptor {
                        number: interface.number(),
                        endpoints,
                    });
                }
            }

            // Two-step raw read: header first for wTotalLength, then the
            // full descriptor.
            let header =
                self.read_raw_descriptor(DESCRIPTOR_TYPE_CONFIG | u16::from(index), 9)?;
            if header.len() < 4 {
                return Err(UsbError::Io);
            }
            let total = usize::from(u16::from_le_bytes([header[2], header[3]]));
            let raw = self.read_raw_descriptor(DESCRIPTOR_TYPE_CONFIG | u16::from(index), total)?;

            configurations.push(ConfigDescriptor {
                raw,
                value: config.number(),
                interfaces,
            });
        }
        Ok(configurations)
    }

    fn claim_interface(&self, interface: u8) -> Result<(), UsbError> {
        self.handle.claim_interface(interface).map_err(map_rusb_error)
    }

    fn release_interface(&self, interface: u8) -> Result<(), UsbError> {
        self.handle
            .release_interface(interface)
            .map_err(map_rusb_error)
    }

    fn set_configuration(&self, value: u8) -> Result<(), UsbError> {
        self.handle
            .set_active_configuration(value)
            .map_err(map_rusb_error)
    }

    fn set_alt_setting(&self, interface: u8, alt: u8) -> Result<(), UsbError> {
        self.handle
            .set_alternate_setting(interface, alt)
            .map_err(map_rusb_error)
    }

    fn submit_io(&self, transfer: &TransferType) -> Result<RawCompletion, UsbError> {
        match transfer {
            TransferType::Control {
                request_type,
                request,
                value,
                index,
                data,
            } => {
                if transfer.direction() == Direction::In {
                    let len = if data.is_empty() { 64 } else { data.len() };
                    let mut buffer = vec![0u8; len];
                    let n = self
                        .handle
                        .read_control(
                            *request_type,
                            *request,
                            *value,
                            *index,
                            &mut buffer,
                            DEFAULT_TIMEOUT,
                        )
                        .map_err(map_rusb_error)?;
                    buffer.truncate(n);
                    Ok(RawCompletion {
                        transferred: n,
                        data: buffer,
                    })
                } else {
                    let n = self
                        .handle
                        .write_control(
                            *request_type,
                            *request,
                            *value,
                            *index,
                            data,
                            DEFAULT_TIMEOUT,
                        )
                        .map_err(map_rusb_error)?;
                    Ok(RawCompletion {
                        data: Vec::new(),
                        transferred: n,
                    })
                }
            }

            TransferType::Bulk {
                endpoint,
                data,
                timeout_ms,
            } => {
                let timeout = Duration::from_millis(u64::from(*timeout_ms));
                if transfer.direction() == Direction::In {
                    let mut buffer = vec![0u8; data.len()];
                    let n = self
                        .handle
                        .read_bulk(*endpoint, &mut buffer, timeout)
                        .map_err(map_rusb_error)?;
                    buffer.truncate(n);
                    Ok(RawCompletion {
                        transferred: n,
                        data: buffer,
                    })
                } else {
                    let n = self
                        .handle
                        .write_bulk(*endpoint, data, timeout)
                        .map_err(map_rusb_error)?;
                    Ok(RawCompletion {
                        data: Vec::new(),
                        transferred: n,
                    })
                }
            }

            TransferType::Interrupt {
                endpoint,
                data,
                timeout_ms,
            } => {
                let timeout = Duration::from_millis(u64::from(*timeout_ms));
                if transfer.direction() == Direction::In {
                    let mut buffer = vec![0u8; data.len()];
                    let n = self
                        .handle
                        .read_interrupt(*endpoint, &mut buffer, timeout)
                        .map_err(map_rusb_error)?;
                    buffer.truncate(n);
                    Ok(RawCompletion {
                        transferred: n,
                        data: buffer,
                    })
                } else {
                    let n = self
                        .handle
                        .write_interrupt(*endpoint, data, timeout)
                        .map_err(map_rusb_error)?;
                    Ok(RawCompletion {
                        data: Vec::new(),
                        transferred: n,
                    })
                }
            }
        }
    }
}

fn parse_location(location: &str) -> Result<(u8, u8), UsbError> {
    let (bus, address) = location.split_once('.').ok_or(UsbError::InvalidParam)?;
    let bus = bus.parse().map_err(|_| UsbError::InvalidParam)?;
    let address = address.parse().map_err(|_| UsbError::InvalidParam)?;
    Ok((bus, address))
}

/// Map rusb::Error to the engine's transport error type.
fn map_rusb_error(err: rusb::Error) -> UsbError {
    match err {
        rusb::Error::Timeout => UsbError::Timeout,
        rusb::Error::Pipe => UsbError::Stall,
        rusb::Error::NoDevice => UsbError::NoDevice,
        rusb::Error::NotFound => UsbError::NotFound,
        rusb::Error::Busy => UsbError::Busy,
        rusb::Error::Overflow => UsbError::Overflow,
        rusb::Error::Io => UsbError::Io,
        rusb::Error::InvalidParam => UsbError::InvalidParam,
        rusb::Error::Access => UsbError::Access,
        _ => UsbError::Other {
            message: err.to_string(),
        },
    }
}
