// Copyright (c) 2019-2022 Alibaba Cloud
// Copyright (c) 2019-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

//! Devices of a domain descriptor that take part in PCI address assignment.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::vm::DiskBus;

pub const CONTROLLER_TYPE_PCI: &str = "pci";
pub const MODEL_PCI_ROOT: &str = "pci-root";
pub const MODEL_PCIE_ROOT: &str = "pcie-root";
pub const MODEL_PCIE_EXPANDER_BUS: &str = "pcie-expander-bus";
pub const MODEL_PCIE_ROOT_PORT: &str = "pcie-root-port";

/// A PCI address `domain:bus:slot.function`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub struct PciAddress {
    pub domain: u16,
    pub bus: u8,
    pub slot: u8,
    pub function: u8,
}

impl PciAddress {
    pub fn new(domain: u16, bus: u8, slot: u8, function: u8) -> Self {
        PciAddress {
            domain,
            bus,
            slot,
            function,
        }
    }

    /// Function 0 of `slot` on bus 0 of domain 0.
    pub fn root_bus(slot: u8) -> Self {
        PciAddress::new(0, 0, slot, 0)
    }

    pub fn is_on_root_bus(&self) -> bool {
        self.domain == 0 && self.bus == 0
    }
}

impl fmt::Display for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{:x}",
            self.domain, self.bus, self.slot, self.function
        )
    }
}

/// Malformed PCI address.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid pci address {0:?}, expected dddd:bb:ss.f")]
pub struct InvalidPciAddress(pub String);

impl FromStr for PciAddress {
    type Err = InvalidPciAddress;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || InvalidPciAddress(s.to_string());

        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 {
            return Err(err());
        }
        let (slot, function) = parts[2].split_once('.').ok_or_else(err)?;

        Ok(PciAddress {
            domain: u16::from_str_radix(parts[0], 16).map_err(|_| err())?,
            bus: u8::from_str_radix(parts[1], 16).map_err(|_| err())?,
            slot: u8::from_str_radix(slot, 16).map_err(|_| err())?,
            function: u8::from_str_radix(function, 16).map_err(|_| err())?,
        })
    }
}

/// Address element of a device.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DeviceAddress {
    /// A fully specified PCI address.
    Pci(PciAddress),
    /// PCI, with the address left for the placement core to choose.
    PciAuto,
    /// Any non PCI address type, such as `ccw` or `drive`.
    Other { kind: String },
}

/// Whether the PCI assigners should give a device a new address.
pub fn needs_pci_address(address: &Option<DeviceAddress>) -> bool {
    matches!(address, None | Some(DeviceAddress::PciAuto))
}

/// Target of a PCI controller.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ControllerTarget {
    /// First bus number behind an expander bus.
    pub bus_nr: Option<u32>,
    /// Guest NUMA node an expander bus is local to.
    pub node: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Controller {
    #[serde(rename = "type")]
    pub kind: String,
    pub index: u32,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub target: Option<ControllerTarget>,
    #[serde(default)]
    pub address: Option<DeviceAddress>,
}

impl Controller {
    pub fn new(kind: &str, index: u32, model: Option<&str>) -> Self {
        Controller {
            kind: kind.to_string(),
            index,
            model: model.map(|m| m.to_string()),
            target: None,
            address: None,
        }
    }

    pub fn is_pci(&self) -> bool {
        self.kind == CONTROLLER_TYPE_PCI
    }

    /// The implicit root bus controllers, which never get an address.
    pub fn is_pci_root(&self) -> bool {
        self.is_pci()
            && matches!(
                self.model.as_deref(),
                Some(MODEL_PCI_ROOT) | Some(MODEL_PCIE_ROOT)
            )
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Interface {
    pub alias: String,
    #[serde(default)]
    pub address: Option<DeviceAddress>,
}

/// A host device passed through to the guest.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct HostDevice {
    pub alias: String,
    /// PCI address of the device on the host, for PCI devices.
    #[serde(default)]
    pub source: Option<PciAddress>,
    /// Host NUMA node of the device as resolved from sysfs.
    #[serde(default)]
    pub numa_node: Option<u32>,
    #[serde(default)]
    pub address: Option<DeviceAddress>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Disk {
    pub name: String,
    pub bus: DiskBus,
    #[serde(default)]
    pub address: Option<DeviceAddress>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputBus {
    Virtio,
    Usb,
    Ps2,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Input {
    pub alias: String,
    pub bus: InputBus,
    #[serde(default)]
    pub address: Option<DeviceAddress>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Watchdog {
    pub model: String,
    #[serde(default)]
    pub address: Option<DeviceAddress>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Rng {
    #[serde(default)]
    pub address: Option<DeviceAddress>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct MemBalloon {
    pub model: String,
    #[serde(default)]
    pub address: Option<DeviceAddress>,
}

/// Device list of a domain descriptor, owned by the caller.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DomainDevices {
    pub interfaces: Vec<Interface>,
    pub host_devices: Vec<HostDevice>,
    pub controllers: Vec<Controller>,
    pub disks: Vec<Disk>,
    pub inputs: Vec<Input>,
    pub watchdogs: Vec<Watchdog>,
    pub rng: Option<Rng>,
    pub balloon: Option<MemBalloon>,
}

impl DomainDevices {
    /// Every PCI address already in use by a device or controller.
    pub fn used_pci_addresses(&self) -> Vec<PciAddress> {
        let mut used = Vec::new();
        let mut push = |address: &Option<DeviceAddress>| {
            if let Some(DeviceAddress::Pci(pci)) = address {
                used.push(*pci);
            }
        };

        self.interfaces.iter().for_each(|d| push(&d.address));
        self.host_devices.iter().for_each(|d| push(&d.address));
        self.controllers.iter().for_each(|d| push(&d.address));
        self.disks.iter().for_each(|d| push(&d.address));
        self.inputs.iter().for_each(|d| push(&d.address));
        self.watchdogs.iter().for_each(|d| push(&d.address));
        self.rng.iter().for_each(|d| push(&d.address));
        self.balloon.iter().for_each(|d| push(&d.address));

        used
    }

    /// Highest index of the existing PCI controllers.
    pub fn max_pci_controller_index(&self) -> Option<u32> {
        self.controllers
            .iter()
            .filter(|c| c.is_pci())
            .map(|c| c.index)
            .max()
    }
}
