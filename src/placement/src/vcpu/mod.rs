// Copyright (c) 2019-2022 Alibaba Cloud
// Copyright (c) 2019-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

mod pool;

pub use pool::{CpuPool, PinningPolicy};

use placement_types::arch::Arch;
use placement_types::vm::{CpuSpec, ResourceSpec};
use serde::Serialize;

use crate::error::{PlacementError, Result};
use crate::iothread::IoThreadPin;

/// Requested virtual cpu topology.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RequestedTopology {
    pub sockets: u32,
    pub cores: u32,
    pub threads: u32,
}

impl RequestedTopology {
    /// A topology with at least one vCPU, whose vCPU count fits a `u32`.
    pub fn new(sockets: u32, cores: u32, threads: u32) -> Result<Self> {
        let vcpus = sockets
            .checked_mul(cores)
            .and_then(|total| total.checked_mul(threads));
        if vcpus.map_or(true, |vcpus| vcpus == 0) {
            return Err(PlacementError::InvalidCpuTopology {
                sockets,
                cores,
                threads,
            });
        }
        Ok(RequestedTopology {
            sockets,
            cores,
            threads,
        })
    }

    /// Derive the topology from the cpu section and the cpu resources of a VM.
    ///
    /// Unset dimensions default to 1. Without any dimension set, every cpu of
    /// the limit, or else of the request, becomes one socket.
    pub fn from_vm(cpu: &CpuSpec, resources: &ResourceSpec) -> Result<Self> {
        if cpu.sockets == 0 && cpu.cores == 0 && cpu.threads == 0 {
            let sockets = resources.cpu_limit.or(resources.cpu_request).unwrap_or(1);
            return Self::new(sockets, 1, 1);
        }

        Self::new(
            cpu.sockets.max(1),
            cpu.cores.max(1),
            cpu.threads.max(1),
        )
    }

    /// Drop the sockets whose vCPUs are all disabled, when cpu hotplug is in use.
    pub fn without_disabled_vcpus(self, cpu: &CpuSpec) -> Result<Self> {
        if cpu.max_sockets == 0 || cpu.disabled_vcpus == 0 {
            return Ok(self);
        }

        let disabled_sockets = cpu.disabled_vcpus / self.cores.saturating_mul(self.threads).max(1);
        Self::new(
            self.sockets.saturating_sub(disabled_sockets),
            self.cores,
            self.threads,
        )
    }

    pub fn vcpus(&self) -> u32 {
        self.sockets
            .saturating_mul(self.cores)
            .saturating_mul(self.threads)
    }

    /// Number of whole cores to fit onto the host.
    pub fn total_cores(&self) -> u32 {
        self.sockets.saturating_mul(self.cores)
    }
}

/// Pin of one vCPU to one host cpu.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct VcpuPin {
    pub vcpu: u32,
    pub cpu: u32,
}

/// Cpu tuning of the domain.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CpuTune {
    pub vcpu_pins: Vec<VcpuPin>,
    /// Host cpu of the emulator thread, when it is isolated.
    pub emulator_pin: Option<u32>,
    pub iothread_pins: Vec<IoThreadPin>,
}

/// Cpu features toggled by the pinning request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CpuFeatures {
    /// Request KVM `hint-dedicated`.
    pub kvm_hint_dedicated: bool,
    /// Turn the PMU off.
    pub pmu_off: bool,
}

impl CpuFeatures {
    pub fn for_request(cpu: &CpuSpec, arch: Arch) -> Self {
        CpuFeatures {
            kvm_hint_dedicated: cpu.dedicated_cpu_placement
                && arch.capabilities().kvm_hint_dedicated,
            pmu_off: cpu.realtime,
        }
    }
}
