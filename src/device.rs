//! USB device abstraction
//!
//! Wraps an opened raw device with cached descriptors, the claimed-interface
//! bitmask, and endpoint lookup maps. Descriptor data is read once at open
//! and immutable afterwards; only the bitmask and the active configuration
//! index change, through the claim/release/set-configuration operations.

use crate::error::{Error, Result};
use crate::lock;
use crate::raw::RawDevice;
use crate::types::{ConfigDescriptor, DeviceDescriptor, DeviceLocation};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Interfaces are tracked in a 32-bit mask, like the raw driver does.
const MAX_INTERFACES: u8 = 32;

/// An opened physical USB device
///
/// Shared between handles via `Arc`; a `Device` may back several
/// [`crate::DeviceHandle`]s where the platform permits concurrent access.
pub struct Device {
    location: DeviceLocation,
    raw: Arc<dyn RawDevice>,
    descriptor: DeviceDescriptor,
    configurations: Vec<ConfigDescriptor>,
    /// Endpoint address -> owning interface number, one map per configuration
    endpoint_interfaces: Vec<HashMap<u8, u8>>,
    /// Endpoint address -> index within its interface, one map per configuration
    endpoint_indices: Vec<HashMap<u8, u8>>,
    state: Mutex<DeviceState>,
}

struct DeviceState {
    claimed_interfaces: u32,
    active_configuration: usize,
}

impl Device {
    /// Opens the device at `location` through the platform driver and reads
    /// its descriptor set.
    ///
    /// Fails with [`Error::Open`] when the location cannot be read or the
    /// descriptor set is malformed.
    pub fn open(location: DeviceLocation, raw: Arc<dyn RawDevice>) -> Result<Self> {
        let descriptor = raw.device_descriptor().map_err(|e| Error::Open {
            location: location.0.clone(),
            reason: format!("device descriptor unreadable: {}", e),
        })?;

        let configurations = raw.configuration_descriptors().map_err(|e| Error::Open {
            location: location.0.clone(),
            reason: format!("configuration descriptors unreadable: {}", e),
        })?;

        if configurations.is_empty() {
            return Err(Error::Open {
                location: location.0.clone(),
                reason: "device reports no configurations".to_string(),
            });
        }

        if configurations.len() != descriptor.num_configurations as usize {
            return Err(Error::Open {
                location: location.0.clone(),
                reason: format!(
                    "descriptor promises {} configurations, driver returned {}",
                    descriptor.num_configurations,
                    configurations.len()
                ),
            });
        }

        let mut endpoint_interfaces = Vec::with_capacity(configurations.len());
        let mut endpoint_indices = Vec::with_capacity(configurations.len());
        for config in &configurations {
            let mut interfaces = HashMap::new();
            let mut indices = HashMap::new();
            for interface in &config.interfaces {
                for (index, endpoint) in interface.endpoints.iter().enumerate() {
                    interfaces.insert(*endpoint, interface.number);
                    indices.insert(*endpoint, index as u8);
                }
            }
            endpoint_interfaces.push(interfaces);
            endpoint_indices.push(indices);
        }

        debug!(
            "Opened device at {} ({:04x}:{:04x}, {} configurations)",
            location,
            descriptor.vendor_id,
            descriptor.product_id,
            configurations.len()
        );

        Ok(Self {
            location,
            raw,
            descriptor,
            configurations,
            endpoint_interfaces,
            endpoint_indices,
            state: Mutex::new(DeviceState {
                claimed_interfaces: 0,
                active_configuration: 0,
            }),
        })
    }

    /// Platform location this device was opened at.
    pub fn location(&self) -> &DeviceLocation {
        &self.location
    }

    /// Cached device descriptor.
    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    /// Number of configurations the device carries.
    pub fn count_configurations(&self) -> u8 {
        self.configurations.len() as u8
    }

    /// Descriptor of the configuration at `index`.
    pub fn configuration_descriptor(&self, index: usize) -> Result<&ConfigDescriptor> {
        self.configurations
            .get(index)
            .ok_or_else(|| Error::InvalidArgument(format!("no configuration at index {}", index)))
    }

    /// Index of the currently active configuration.
    pub fn active_configuration(&self) -> usize {
        lock(&self.state).active_configuration
    }

    /// Descriptor of the currently active configuration.
    pub fn active_configuration_descriptor(&self) -> &ConfigDescriptor {
        &self.configurations[self.active_configuration()]
    }

    /// Current claimed-interface bitmask.
    pub fn claimed_interfaces(&self) -> u32 {
        lock(&self.state).claimed_interfaces
    }

    /// Claims an interface of the active configuration.
    ///
    /// The claim bit is set only after the raw driver accepted the claim.
    pub fn claim_interface(&self, interface: u8) -> Result<()> {
        let mut state = lock(&self.state);
        self.check_interface(state.active_configuration, interface)?;

        let bit = 1u32 << interface;
        if state.claimed_interfaces & bit != 0 {
            return Err(Error::InUse(interface));
        }

        self.raw.claim_interface(interface).map_err(Error::Io)?;
        state.claimed_interfaces |= bit;
        debug!("Claimed interface {} on {}", interface, self.location);
        Ok(())
    }

    /// Releases a claimed interface.
    pub fn release_interface(&self, interface: u8) -> Result<()> {
        let mut state = lock(&self.state);
        if interface >= MAX_INTERFACES || state.claimed_interfaces & (1u32 << interface) == 0 {
            return Err(Error::NotClaimed(interface));
        }

        self.raw.release_interface(interface).map_err(Error::Io)?;
        state.claimed_interfaces &= !(1u32 << interface);
        debug!("Released interface {} on {}", interface, self.location);
        Ok(())
    }

    /// Switches the device to the configuration at `index`.
    pub fn set_active_configuration(&self, index: usize) -> Result<()> {
        let mut state = lock(&self.state);
        let config = self
            .configurations
            .get(index)
            .ok_or_else(|| Error::InvalidArgument(format!("no configuration at index {}", index)))?;

        self.raw.set_configuration(config.value).map_err(Error::Io)?;
        state.active_configuration = index;
        debug!("Activated configuration {} on {}", index, self.location);
        Ok(())
    }

    /// Selects an alternate setting on an interface of the active
    /// configuration.
    pub fn set_alt_setting(&self, interface: u8, alt: u8) -> Result<()> {
        let state = lock(&self.state);
        self.check_interface(state.active_configuration, interface)?;
        self.raw.set_alt_setting(interface, alt).map_err(Error::Io)
    }

    /// Maps an endpoint address to its owning interface number within the
    /// active configuration.
    pub fn endpoint_to_interface(&self, endpoint: u8) -> Result<u8> {
        let config = self.active_configuration();
        self.endpoint_interfaces[config]
            .get(&endpoint)
            .copied()
            .ok_or_else(|| {
                Error::InvalidArgument(format!("unknown endpoint {:#04x}", endpoint))
            })
    }

    /// Maps an endpoint address to its index within its interface, within
    /// the active configuration.
    pub fn endpoint_to_index(&self, endpoint: u8) -> Result<u8> {
        let config = self.active_configuration();
        self.endpoint_indices[config]
            .get(&endpoint)
            .copied()
            .ok_or_else(|| {
                Error::InvalidArgument(format!("unknown endpoint {:#04x}", endpoint))
            })
    }

    pub(crate) fn raw(&self) -> &Arc<dyn RawDevice> {
        &self.raw
    }

    fn check_interface(&self, config: usize, interface: u8) -> Result<()> {
        if interface >= MAX_INTERFACES {
            return Err(Error::InvalidArgument(format!(
                "interface {} out of range",
                interface
            )));
        }
        let known = self.configurations[config]
            .interfaces
            .iter()
            .any(|i| i.number == interface);
        if !known {
            return Err(Error::InvalidArgument(format!(
                "no interface {} in configuration {}",
                interface, config
            )));
        }
        Ok(())
    }
}
