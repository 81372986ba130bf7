// Copyright (c) 2019-2022 Alibaba Cloud
// Copyright (c) 2019-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

//! Stable target names (`vda`, `sdb`, ...) for disks.

use std::collections::HashMap;

use placement_types::vm::{DiskBus, DiskSpec, KnownTarget};
use serde::Serialize;

use crate::error::{PlacementError, Result};

const PREFIXES: [&str; 2] = ["vd", "sd"];
const NAMES_PER_PREFIX: u32 = 26 * 26 * 26;

/// Name of the device with the given index, `sd` + 0 is `sda`, `sd` + 26 is `sdaa`.
pub fn format_device_name(prefix: &str, index: u32) -> String {
    let mut letters = Vec::new();
    let mut remaining = i64::from(index);
    while remaining >= 0 {
        letters.push(b'a' + (remaining % 26) as u8);
        remaining = remaining / 26 - 1;
    }
    letters.reverse();

    let mut name = String::with_capacity(prefix.len() + letters.len());
    name.push_str(prefix);
    name.extend(letters.into_iter().map(char::from));
    name
}

/// Index of a device name, the inverse of [`format_device_name`].
pub fn device_name_index(prefix: &str, name: &str) -> Option<u32> {
    let suffix = name.strip_prefix(prefix)?;
    if suffix.is_empty() {
        return None;
    }

    let mut index: u32 = 0;
    for c in suffix.bytes() {
        if !c.is_ascii_lowercase() {
            return None;
        }
        index = index
            .checked_mul(26)?
            .checked_add(u32::from(c - b'a') + 1)?;
    }
    Some(index - 1)
}

/// Target name chosen for a disk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DiskTarget {
    pub disk: String,
    pub target: String,
    pub index: u32,
}

#[derive(Debug, Default)]
struct PrefixNames {
    name_by_disk: HashMap<String, String>,
    disk_by_name: HashMap<String, String>,
}

impl PrefixNames {
    fn insert(&mut self, disk: &str, name: &str) {
        self.name_by_disk.insert(disk.to_string(), name.to_string());
        self.disk_by_name.insert(name.to_string(), disk.to_string());
    }
}

/// Hands out target names per bus prefix.
///
/// Names seen before keep their disk. New disks get the first free name of
/// their prefix, so names released by removed disks are reused.
#[derive(Debug, Default)]
pub struct DeviceNamer {
    prefixes: HashMap<&'static str, PrefixNames>,
}

impl DeviceNamer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A namer which keeps the targets the given disks received before.
    ///
    /// Targets of disks no longer present are not reserved, and a target is
    /// only kept while it matches the name prefix of the disk's current bus.
    pub fn for_disks(disks: &[DiskSpec], known: &[KnownTarget]) -> Self {
        let mut namer = Self::new();
        for disk in disks.iter() {
            let target = match known.iter().find(|k| k.disk == disk.name) {
                Some(known) => known.target.as_str(),
                None => continue,
            };
            let prefix = disk.bus.name_prefix();
            if device_name_index(prefix, target).is_some() {
                namer.prefixes.entry(prefix).or_default().insert(&disk.name, target);
            } else {
                debug!(sl!(), "dropping disk target of another bus"; "disk" => &disk.name, "target" => target);
            }
        }
        namer
    }

    /// Forget the target of `disk`, making its name available again.
    pub fn remove(&mut self, disk: &str) {
        for names in self.prefixes.values_mut() {
            if let Some(name) = names.name_by_disk.remove(disk) {
                names.disk_by_name.remove(&name);
            }
        }
    }

    /// Target name of `disk` on `bus`, reusing an earlier name of the disk.
    pub fn assign(&mut self, disk: &str, bus: DiskBus) -> Result<DiskTarget> {
        let prefix = bus.name_prefix();
        let names = self.prefixes.entry(prefix).or_default();

        if let Some(name) = names.name_by_disk.get(disk) {
            if let Some(index) = device_name_index(prefix, name) {
                return Ok(DiskTarget {
                    disk: disk.to_string(),
                    target: name.clone(),
                    index,
                });
            }
        }

        for index in 0..NAMES_PER_PREFIX {
            let name = format_device_name(prefix, index);
            if !names.disk_by_name.contains_key(&name) {
                names.insert(disk, &name);
                return Ok(DiskTarget {
                    disk: disk.to_string(),
                    target: name,
                    index,
                });
            }
        }

        Err(PlacementError::DeviceNamesExhausted(prefix.to_string()))
    }
}
