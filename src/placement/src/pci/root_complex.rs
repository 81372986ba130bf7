// Copyright (c) 2019-2022 Alibaba Cloud
// Copyright (c) 2019-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

use std::collections::HashSet;
use std::convert::TryFrom;

use placement_types::arch::Arch;
use placement_types::device::{needs_pci_address, DeviceAddress, DomainDevices, InputBus, PciAddress};
use placement_types::vm::DiskBus;

use crate::error::{PlacementError, Result};

// Slots 0 and 1 are taken by the host bridge and VGA.
const FIRST_FREE_SLOT: u32 = 2;
const AUDIO_SLOT: u32 = 0x1b;
const SATA_SLOT: u32 = 0x1f;
const ROOT_BUS_SLOTS: u32 = 0x20;

const BALLOON_MODEL_NONE: &str = "none";

/// Hands out free slots of the root PCI bus in ascending order.
#[derive(Debug, Default)]
pub struct RootSlotAssigner {
    slot: u32,
    used: HashSet<u32>,
}

impl RootSlotAssigner {
    pub fn new() -> Self {
        Self::default()
    }

    /// An assigner which never hands out the given slots.
    pub fn with_used_slots<I: IntoIterator<Item = u8>>(used: I) -> Self {
        RootSlotAssigner {
            slot: 0,
            used: used.into_iter().map(u32::from).collect(),
        }
    }

    pub fn next_slot(&mut self) -> Result<u8> {
        loop {
            self.slot += 1;
            if self.slot < FIRST_FREE_SLOT {
                self.slot = FIRST_FREE_SLOT;
            }
            if self.slot >= ROOT_BUS_SLOTS {
                // stay at the end so repeated calls keep failing
                self.slot = ROOT_BUS_SLOTS;
                return Err(PlacementError::RootBusFull);
            }
            if self.slot == AUDIO_SLOT || self.slot == SATA_SLOT || self.used.contains(&self.slot) {
                continue;
            }
            return u8::try_from(self.slot).map_err(|_| PlacementError::RootBusFull);
        }
    }

    pub fn next_address(&mut self) -> Result<PciAddress> {
        Ok(PciAddress::root_bus(self.next_slot()?))
    }

    fn assign(&mut self, address: &mut Option<DeviceAddress>) -> Result<()> {
        if needs_pci_address(address) {
            *address = Some(DeviceAddress::Pci(self.next_address()?));
        }
        Ok(())
    }
}

/// Give every PCI device without an address a slot on the root bus.
///
/// Devices are visited in a fixed order: interfaces, host devices,
/// controllers, virtio disks, virtio inputs, watchdogs, rng and balloon.
/// Fully addressed devices and devices on other bus types are left alone.
/// On error `devices` is not modified.
pub fn place_pci_devices_on_root_complex(devices: &mut DomainDevices, arch: Arch) -> Result<()> {
    if !arch.capabilities().pci_bus {
        debug!(sl!(), "no pci bus on this architecture"; "arch" => arch.as_str());
        return Ok(());
    }

    let used = devices
        .used_pci_addresses()
        .into_iter()
        .filter(|a| a.is_on_root_bus())
        .map(|a| a.slot);
    let mut assigner = RootSlotAssigner::with_used_slots(used);
    let mut placed = devices.clone();
    assign_root_slots(&mut assigner, &mut placed)?;
    *devices = placed;

    Ok(())
}

fn assign_root_slots(assigner: &mut RootSlotAssigner, devices: &mut DomainDevices) -> Result<()> {
    for interface in devices.interfaces.iter_mut() {
        assigner.assign(&mut interface.address)?;
    }
    for host_device in devices.host_devices.iter_mut() {
        assigner.assign(&mut host_device.address)?;
    }
    for controller in devices.controllers.iter_mut().filter(|c| !c.is_pci_root()) {
        assigner.assign(&mut controller.address)?;
    }
    for disk in devices.disks.iter_mut().filter(|d| d.bus == DiskBus::Virtio) {
        assigner.assign(&mut disk.address)?;
    }
    for input in devices.inputs.iter_mut().filter(|i| i.bus == InputBus::Virtio) {
        assigner.assign(&mut input.address)?;
    }
    for watchdog in devices.watchdogs.iter_mut() {
        assigner.assign(&mut watchdog.address)?;
    }
    if let Some(rng) = devices.rng.as_mut() {
        assigner.assign(&mut rng.address)?;
    }
    if let Some(balloon) = devices.balloon.as_mut() {
        if balloon.model != BALLOON_MODEL_NONE {
            assigner.assign(&mut balloon.address)?;
        }
    }

    Ok(())
}
