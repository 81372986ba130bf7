// Copyright (c) 2019-2022 Alibaba Cloud
// Copyright (c) 2019-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

use std::collections::BTreeMap;
use std::convert::TryFrom;

use placement_types::arch::Arch;
use placement_types::config::PciConfig;
use placement_types::device::{
    needs_pci_address, Controller, ControllerTarget, DeviceAddress, DomainDevices, PciAddress,
    CONTROLLER_TYPE_PCI, MODEL_PCIE_EXPANDER_BUS, MODEL_PCIE_ROOT_PORT,
};

use crate::error::{PlacementError, Result};
use crate::numa::NumaGuestLayout;

/// An expander bus together with its root ports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpanderBus {
    pub controller: Controller,
    pub root_ports: Vec<Controller>,
}

impl ExpanderBus {
    /// Address of the device plugged into the root port at `port`.
    pub fn device_address(&self, port: usize) -> Option<PciAddress> {
        let index = self.root_ports.get(port)?.index;
        let bus = u8::try_from(index).ok()?;
        Some(PciAddress::new(0, bus, 0, 0))
    }
}

/// Allocates expander buses and root ports.
///
/// Expander bus numbers are taken from the top of the bus number space, each
/// expander reserving its own bus and one bus per root port. Controller
/// indexes grow from the bottom and must stay below the last expander bus
/// number.
#[derive(Debug)]
pub struct ExpanderBusAssigner {
    max_bus_nr: u32,
    allocated_bus_nrs: u32,
    next_index: u32,
}

impl ExpanderBusAssigner {
    pub fn new(max_bus_nr: u32, first_index: u32) -> Self {
        ExpanderBusAssigner {
            max_bus_nr,
            allocated_bus_nrs: 0,
            next_index: first_index,
        }
    }

    /// Create an expander bus local to `guest_node` with `ports` root ports.
    pub fn add_expander_bus(&mut self, guest_node: u32, ports: usize) -> Result<ExpanderBus> {
        let ports = ports as u32;
        let last_index = self.next_index + ports;
        let bus_nr = self
            .max_bus_nr
            .checked_sub(self.allocated_bus_nrs + ports)
            .ok_or(PlacementError::ExpanderBusExhausted {
                index: last_index,
                bus_nr: 0,
            })?;
        if last_index >= bus_nr {
            return Err(PlacementError::ExpanderBusExhausted {
                index: last_index,
                bus_nr,
            });
        }
        self.allocated_bus_nrs += ports + 1;

        let expander_index = self.next_index;
        let expander_bus = u8::try_from(expander_index).map_err(|_| {
            PlacementError::ExpanderBusExhausted {
                index: expander_index,
                bus_nr,
            }
        })?;
        let mut controller = Controller::new(
            CONTROLLER_TYPE_PCI,
            expander_index,
            Some(MODEL_PCIE_EXPANDER_BUS),
        );
        controller.target = Some(ControllerTarget {
            bus_nr: Some(bus_nr),
            node: Some(guest_node),
        });

        let root_ports = (0..ports)
            .map(|port| {
                let mut root_port = Controller::new(
                    CONTROLLER_TYPE_PCI,
                    expander_index + 1 + port,
                    Some(MODEL_PCIE_ROOT_PORT),
                );
                root_port.address = Some(DeviceAddress::Pci(PciAddress::new(
                    0,
                    expander_bus,
                    port as u8,
                    0,
                )));
                root_port
            })
            .collect();
        self.next_index = last_index + 1;

        info!(sl!(), "created pcie expander bus";
            "index" => expander_index,
            "bus_nr" => bus_nr,
            "guest_node" => guest_node,
            "root_ports" => ports);

        Ok(ExpanderBus {
            controller,
            root_ports,
        })
    }
}

/// Place host devices behind expander buses local to their guest NUMA node.
///
/// Host devices are grouped by the host NUMA node of their source address;
/// each group gets one expander bus on the guest node mapped to that host
/// node, and every device a root port of its own. Devices without a source
/// address or NUMA node, devices on nodes outside the guest layout, and all
/// devices when there is no guest layout, are left as they are.
pub fn place_pci_devices_with_numa_alignment(
    devices: &mut DomainDevices,
    layout: Option<&NumaGuestLayout>,
    config: &PciConfig,
    arch: Arch,
) -> Result<()> {
    if !arch.capabilities().pcie_expander_bus {
        debug!(sl!(), "pcie expander buses are not supported"; "arch" => arch.as_str());
        return Ok(());
    }
    let layout = match layout {
        Some(layout) => layout,
        None => {
            debug!(sl!(), "no guest numa layout, host devices are not numa aligned");
            return Ok(());
        }
    };

    let mut groups: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    for (idx, device) in devices.host_devices.iter().enumerate() {
        if !needs_pci_address(&device.address) {
            continue;
        }
        let node = match (device.source, device.numa_node) {
            (Some(_), Some(node)) => node,
            _ => {
                debug!(sl!(), "skipping host device without numa affinity"; "alias" => &device.alias);
                continue;
            }
        };
        if layout.guest_cell_of_host(node).is_none() {
            debug!(sl!(), "skipping host device on a numa node outside the guest";
                "alias" => &device.alias,
                "node" => node);
            continue;
        }
        groups.entry(node).or_default().push(idx);
    }

    let first_index = devices.max_pci_controller_index().map_or(1, |i| i + 1);
    let mut assigner = ExpanderBusAssigner::new(config.max_expander_bus_nr, first_index);
    let mut placed = Vec::new();
    for (node, members) in groups.into_iter() {
        let guest_node = match layout.guest_cell_of_host(node) {
            Some(guest_node) => guest_node,
            None => continue,
        };
        let expander = assigner.add_expander_bus(guest_node, members.len())?;
        placed.push((expander, members));
    }

    for (expander, members) in placed.into_iter() {
        for (port, idx) in members.into_iter().enumerate() {
            if let Some(address) = expander.device_address(port) {
                devices.host_devices[idx].address = Some(DeviceAddress::Pci(address));
            }
        }
        devices.controllers.push(expander.controller);
        devices.controllers.extend(expander.root_ports);
    }

    Ok(())
}
