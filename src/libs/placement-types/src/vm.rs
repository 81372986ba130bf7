// Copyright (c) 2019-2022 Alibaba Cloud
// Copyright (c) 2019-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

//! The parts of a VM request that drive placement.

use serde::{Deserialize, Serialize};

/// Bus a disk is attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskBus {
    Virtio,
    Sata,
    Scsi,
    Usb,
}

impl DiskBus {
    /// Prefix of the target device names on this bus.
    pub fn name_prefix(self) -> &'static str {
        match self {
            DiskBus::Virtio => "vd",
            DiskBus::Sata | DiskBus::Scsi | DiskBus::Usb => "sd",
        }
    }
}

/// How IOThreads are shared between disks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum IoThreadsPolicy {
    Shared,
    Auto,
    SupplementalPool,
}

/// Virtual cpu topology and pinning requests.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CpuSpec {
    pub sockets: u32,
    pub cores: u32,
    pub threads: u32,
    /// Upper bound of sockets for cpu hotplug, 0 when hotplug is not used.
    pub max_sockets: u32,
    /// vCPUs currently reported as disabled by the guest.
    pub disabled_vcpus: u32,
    pub dedicated_cpu_placement: bool,
    pub isolate_emulator_thread: bool,
    pub numa_passthrough: bool,
    pub realtime: bool,
}

/// Cpu resources of the VM, in whole cpus.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ResourceSpec {
    pub cpu_request: Option<u32>,
    pub cpu_limit: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct MemorySpec {
    /// Guest memory in bytes.
    pub guest: u64,
    /// Hugepage size such as `2Mi` or `1Gi`, unset when hugepages are not used.
    pub hugepage_size: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct DiskSpec {
    pub name: String,
    pub bus: DiskBus,
    #[serde(default)]
    pub dedicated_io_thread: bool,
    #[serde(default)]
    pub hotplugged: bool,
}

impl DiskSpec {
    pub fn new(name: &str, bus: DiskBus) -> Self {
        DiskSpec {
            name: name.to_string(),
            bus,
            dedicated_io_thread: false,
            hotplugged: false,
        }
    }

    pub fn dedicated(mut self) -> Self {
        self.dedicated_io_thread = true;
        self
    }

    pub fn hotplugged(mut self) -> Self {
        self.hotplugged = true;
        self
    }
}

/// Target name a disk received in an earlier conversion of the same VM.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct KnownTarget {
    pub disk: String,
    pub target: String,
}

/// Everything of a VM request the placement core looks at.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct VmSpec {
    pub cpu: CpuSpec,
    pub resources: ResourceSpec,
    pub memory: MemorySpec,
    pub io_threads_policy: Option<IoThreadsPolicy>,
    pub supplemental_pool_thread_count: Option<u32>,
    /// Disks in declaration order.
    pub disks: Vec<DiskSpec>,
    pub known_targets: Vec<KnownTarget>,
}

impl VmSpec {
    pub fn has_dedicated_io_threads(&self) -> bool {
        self.disks.iter().any(|d| d.dedicated_io_thread)
    }
}
