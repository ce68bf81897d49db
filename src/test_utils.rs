//! Test utilities
//!
//! Scripted mock raw device and request builders shared by the unit and
//! integration tests. The mock records every driver-level operation so tests
//! can assert what actually reached the platform layer.

use crate::device::Device;
use crate::raw::{RawCompletion, RawDevice};
use crate::types::{
    ConfigDescriptor, DeviceDescriptor, DeviceLocation, Direction, InterfaceDescriptor, RequestId,
    TransferRequest, TransferType, UsbError,
};
use std::collections::VecDeque;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// One driver-level operation observed by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawOperation {
    /// claim_interface(interface)
    Claim(u8),
    /// release_interface(interface)
    Release(u8),
    /// set_configuration(bConfigurationValue)
    SetConfiguration(u8),
    /// set_alt_setting(interface, alt)
    SetAltSetting(u8, u8),
    /// submit_io on the given endpoint
    SubmitIo(u8),
}

struct Gate {
    started_tx: Sender<()>,
    release_rx: Mutex<Receiver<()>>,
}

/// Caller side of a gated mock: observe an execution start, then release it.
pub struct GateControl {
    started_rx: Receiver<()>,
    release_tx: Sender<()>,
}

impl GateControl {
    /// Blocks until the worker has entered `submit_io`.
    pub fn wait_started(&self) {
        self.started_rx
            .recv_timeout(DEFAULT_TEST_TIMEOUT)
            .expect("worker entered submit_io");
    }

    /// Lets one blocked `submit_io` call finish.
    pub fn release_one(&self) {
        let _ = self.release_tx.send(());
    }
}

/// Scripted implementation of the raw driver surface
///
/// Default behavior echoes plausible completions: IN transfers yield a
/// pattern-filled buffer of the requested size, OUT transfers report the
/// full payload as written. Results can be overridden per call with
/// [`MockRawDevice::queue_result`].
pub struct MockRawDevice {
    descriptor: DeviceDescriptor,
    configurations: Vec<ConfigDescriptor>,
    io_results: Mutex<VecDeque<Result<RawCompletion, UsbError>>>,
    operations: Mutex<Vec<RawOperation>>,
    fail_next: Mutex<Option<UsbError>>,
    delay: Mutex<Option<Duration>>,
    gate: Option<Gate>,
    fail_descriptors: bool,
}

impl MockRawDevice {
    /// Mock with the default two-interface topology.
    pub fn new() -> Self {
        let (descriptor, configurations) = default_topology();
        Self::with_topology(descriptor, configurations)
    }

    /// Mock with a caller-supplied descriptor set.
    pub fn with_topology(
        descriptor: DeviceDescriptor,
        configurations: Vec<ConfigDescriptor>,
    ) -> Self {
        Self {
            descriptor,
            configurations,
            io_results: Mutex::new(VecDeque::new()),
            operations: Mutex::new(Vec::new()),
            fail_next: Mutex::new(None),
            delay: Mutex::new(None),
            gate: None,
            fail_descriptors: false,
        }
    }

    /// Mock whose descriptor reads fail, for open-error paths.
    pub fn failing_descriptors() -> Self {
        let mut mock = Self::new();
        mock.fail_descriptors = true;
        mock
    }

    /// Mock whose every `submit_io` blocks until released through the
    /// returned [`GateControl`]. Used to pin the worker mid-execution.
    pub fn gated() -> (Self, GateControl) {
        let (started_tx, started_rx) = channel();
        let (release_tx, release_rx) = channel();
        let mut mock = Self::new();
        mock.gate = Some(Gate {
            started_tx,
            release_rx: Mutex::new(release_rx),
        });
        (
            mock,
            GateControl {
                started_rx,
                release_tx,
            },
        )
    }

    /// Scripts the result of the next unscripted `submit_io` call.
    pub fn queue_result(&self, result: Result<RawCompletion, UsbError>) {
        crate::lock(&self.io_results).push_back(result);
    }

    /// Makes the next claim/release/configuration call fail with `err`.
    pub fn fail_next_op(&self, err: UsbError) {
        *crate::lock(&self.fail_next) = Some(err);
    }

    /// Adds a fixed delay to every `submit_io` call.
    pub fn set_delay(&self, delay: Duration) {
        *crate::lock(&self.delay) = Some(delay);
    }

    /// Every driver-level operation seen so far, in order.
    pub fn operations(&self) -> Vec<RawOperation> {
        crate::lock(&self.operations).clone()
    }

    fn record(&self, op: RawOperation) {
        crate::lock(&self.operations).push(op);
    }

    fn take_forced_failure(&self) -> Option<UsbError> {
        crate::lock(&self.fail_next).take()
    }
}

impl Default for MockRawDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl RawDevice for MockRawDevice {
    fn device_descriptor(&self) -> Result<DeviceDescriptor, UsbError> {
        if self.fail_descriptors {
            return Err(UsbError::Io);
        }
        Ok(self.descriptor.clone())
    }

    fn configuration_descriptors(&self) -> Result<Vec<ConfigDescriptor>, UsbError> {
        if self.fail_descriptors {
            return Err(UsbError::Io);
        }
        Ok(self.configurations.clone())
    }

    fn claim_interface(&self, interface: u8) -> Result<(), UsbError> {
        if let Some(err) = self.take_forced_failure() {
            return Err(err);
        }
        self.record(RawOperation::Claim(interface));
        Ok(())
    }

    fn release_interface(&self, interface: u8) -> Result<(), UsbError> {
        if let Some(err) = self.take_forced_failure() {
            return Err(err);
        }
        self.record(RawOperation::Release(interface));
        Ok(())
    }

    fn set_configuration(&self, value: u8) -> Result<(), UsbError> {
        if let Some(err) = self.take_forced_failure() {
            return Err(err);
        }
        self.record(RawOperation::SetConfiguration(value));
        Ok(())
    }

    fn set_alt_setting(&self, interface: u8, alt: u8) -> Result<(), UsbError> {
        if let Some(err) = self.take_forced_failure() {
            return Err(err);
        }
        self.record(RawOperation::SetAltSetting(interface, alt));
        Ok(())
    }

    fn submit_io(&self, transfer: &TransferType) -> Result<RawCompletion, UsbError> {
        self.record(RawOperation::SubmitIo(transfer.endpoint()));

        if let Some(gate) = &self.gate {
            let _ = gate.started_tx.send(());
            let _ = crate::lock(&gate.release_rx).recv_timeout(DEFAULT_TEST_TIMEOUT);
        }

        let delay = *crate::lock(&self.delay);
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        if let Some(result) = crate::lock(&self.io_results).pop_front() {
            return result;
        }

        let requested = match transfer {
            TransferType::Control { data, .. } => {
                if data.is_empty() {
                    64
                } else {
                    data.len()
                }
            }
            TransferType::Interrupt { data, .. } | TransferType::Bulk { data, .. } => data.len(),
        };

        match transfer.direction() {
            Direction::In => Ok(RawCompletion {
                data: mock_bulk_data(requested),
                transferred: requested,
            }),
            Direction::Out => Ok(RawCompletion {
                data: Vec::new(),
                transferred: requested,
            }),
        }
    }
}

/// Default descriptor set: one configuration, two interfaces, one IN and one
/// OUT endpoint each.
pub fn default_topology() -> (DeviceDescriptor, Vec<ConfigDescriptor>) {
    let descriptor = DeviceDescriptor {
        raw: mock_device_descriptor_bytes(),
        vendor_id: 0x1234,
        product_id: 0x5678,
        class: 0x00,
        num_configurations: 1,
    };
    let configurations = vec![ConfigDescriptor {
        raw: mock_config_descriptor_bytes(),
        value: 1,
        interfaces: vec![
            InterfaceDescriptor {
                number: 0,
                endpoints: vec![0x81, 0x01],
            },
            InterfaceDescriptor {
                number: 1,
                endpoints: vec![0x82, 0x02],
            },
        ],
    }];
    (descriptor, configurations)
}

/// Descriptor set with two selectable configurations (values 1 and 2).
pub fn two_config_topology() -> (DeviceDescriptor, Vec<ConfigDescriptor>) {
    let descriptor = DeviceDescriptor {
        raw: mock_device_descriptor_bytes(),
        vendor_id: 0x1234,
        product_id: 0x5678,
        class: 0x00,
        num_configurations: 2,
    };
    let configurations = vec![
        ConfigDescriptor {
            raw: mock_config_descriptor_bytes(),
            value: 1,
            interfaces: vec![InterfaceDescriptor {
                number: 0,
                endpoints: vec![0x81, 0x01],
            }],
        },
        ConfigDescriptor {
            raw: mock_config_descriptor_bytes(),
            value: 2,
            interfaces: vec![InterfaceDescriptor {
                number: 0,
                endpoints: vec![0x83, 0x03],
            }],
        },
    ];
    (descriptor, configurations)
}

/// Opens a [`Device`] over a fresh default mock.
///
/// ```
/// use rawusb::test_utils::mock_device;
///
/// let (device, _raw) = mock_device();
/// assert_eq!(device.count_configurations(), 1);
/// ```
pub fn mock_device() -> (Arc<Device>, Arc<MockRawDevice>) {
    let raw = Arc::new(MockRawDevice::new());
    let device = Device::open(DeviceLocation("mock-0".to_string()), raw.clone())
        .expect("mock device opens");
    (Arc::new(device), raw)
}

/// Opens a [`Device`] over a gated mock, for races against the worker.
pub fn gated_device() -> (Arc<Device>, GateControl) {
    let (raw, gate) = MockRawDevice::gated();
    let device = Device::open(DeviceLocation("mock-0".to_string()), Arc::new(raw))
        .expect("mock device opens");
    (Arc::new(device), gate)
}

/// Bulk IN request reading `len` bytes from `endpoint`.
pub fn bulk_in_request(id: u64, endpoint: u8, len: usize) -> TransferRequest {
    TransferRequest {
        id: RequestId(id),
        transfer: TransferType::Bulk {
            endpoint,
            data: vec![0u8; len],
            timeout_ms: 1000,
        },
    }
}

/// Bulk OUT request writing `len` pattern bytes to `endpoint`.
pub fn bulk_out_request(id: u64, endpoint: u8, len: usize) -> TransferRequest {
    TransferRequest {
        id: RequestId(id),
        transfer: TransferType::Bulk {
            endpoint,
            data: mock_bulk_data(len),
            timeout_ms: 1000,
        },
    }
}

/// Pattern data of the given size for transfer payloads.
pub fn mock_bulk_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i & 0xFF) as u8).collect()
}

/// Standard 18-byte device descriptor used by the default mock topology.
pub fn mock_device_descriptor_bytes() -> Vec<u8> {
    vec![
        0x12, // bLength
        0x01, // bDescriptorType (Device)
        0x00, 0x02, // bcdUSB (2.00)
        0x00, // bDeviceClass
        0x00, // bDeviceSubClass
        0x00, // bDeviceProtocol
        0x40, // bMaxPacketSize0 (64 bytes)
        0x34, 0x12, // idVendor (0x1234)
        0x78, 0x56, // idProduct (0x5678)
        0x00, 0x01, // bcdDevice (1.00)
        0x01, // iManufacturer
        0x02, // iProduct
        0x03, // iSerialNumber
        0x01, // bNumConfigurations
    ]
}

/// Minimal configuration descriptor with one interface and one endpoint.
pub fn mock_config_descriptor_bytes() -> Vec<u8> {
    vec![
        // Configuration descriptor
        0x09, // bLength
        0x02, // bDescriptorType (Configuration)
        0x19, 0x00, // wTotalLength (25 bytes)
        0x01, // bNumInterfaces
        0x01, // bConfigurationValue
        0x00, // iConfiguration
        0x80, // bmAttributes (Bus-powered)
        0x32, // bMaxPower (100mA)
        // Interface descriptor
        0x09, // bLength
        0x04, // bDescriptorType (Interface)
        0x00, // bInterfaceNumber
        0x00, // bAlternateSetting
        0x01, // bNumEndpoints
        0xFF, // bInterfaceClass (Vendor-specific)
        0x00, // bInterfaceSubClass
        0x00, // bInterfaceProtocol
        0x00, // iInterface
        // Endpoint descriptor
        0x07, // bLength
        0x05, // bDescriptorType (Endpoint)
        0x81, // bEndpointAddress (EP1 IN)
        0x02, // bmAttributes (Bulk)
        0x00, 0x02, // wMaxPacketSize (512 bytes)
        0x00, // bInterval
    ]
}
