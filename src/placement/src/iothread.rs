// Copyright (c) 2019-2022 Alibaba Cloud
// Copyright (c) 2019-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

//! IOThread planning and pinning.

use placement_types::cpuset::format_cpu_list;
use placement_types::vm::{CpuSpec, DiskBus, IoThreadsPolicy, ResourceSpec, VmSpec};
use serde::Serialize;

use crate::error::{PlacementError, Result};

/// IOThread handling of one disk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum DiskIoThread {
    /// The disk is served by the emulator thread.
    None,
    /// One IOThread, 1-based.
    Thread(u32),
    /// Any IOThread of the supplemental pool.
    Pool(Vec<u32>),
    /// Hot-plugged disk, served by the `io=threads` backend.
    IoThreads,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DiskIoThreadAssignment {
    pub disk: String,
    pub io_thread: DiskIoThread,
}

/// IOThread and queues of the virtio-scsi controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ScsiControllerIoThread {
    pub iothread: u32,
    pub queues: u32,
}

/// Host cpus an IOThread may run on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IoThreadPin {
    pub iothread: u32,
    pub cpus: Vec<u32>,
}

impl IoThreadPin {
    /// The cpu set in descriptor format, e.g. `5,6,7`.
    pub fn cpuset(&self) -> String {
        format_cpu_list(&self.cpus)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IoThreadPlan {
    /// Number of IOThreads of the domain.
    pub count: u32,
    /// Assignments in disk order.
    pub disks: Vec<DiskIoThreadAssignment>,
    pub scsi_controller: Option<ScsiControllerIoThread>,
}

impl IoThreadPlan {
    pub fn disk(&self, name: &str) -> Option<&DiskIoThread> {
        self.disks
            .iter()
            .find(|d| d.disk == name)
            .map(|d| &d.io_thread)
    }
}

/// Upper bound of shared IOThreads.
pub fn thread_pool_limit(
    policy: Option<IoThreadsPolicy>,
    cpu: &CpuSpec,
    resources: &ResourceSpec,
) -> u32 {
    match policy {
        Some(IoThreadsPolicy::Auto) => {
            if cpu.dedicated_cpu_placement && cpu.isolate_emulator_thread {
                1
            } else {
                resources
                    .cpu_request
                    .or(resources.cpu_limit)
                    .unwrap_or(1)
                    .saturating_mul(2)
            }
        }
        _ => 1,
    }
}

/// Decide how many IOThreads the domain gets and which disk uses which.
///
/// `vcpus` is the vCPU count, used as queue count of a virtio-scsi controller
/// with a dedicated IOThread.
pub fn plan_io_threads(vm: &VmSpec, vcpus: u32) -> Result<IoThreadPlan> {
    if vm.io_threads_policy == Some(IoThreadsPolicy::SupplementalPool) {
        return plan_supplemental_pool(vm);
    }

    if vm.io_threads_policy.is_none() && !vm.has_dedicated_io_threads() {
        return Ok(IoThreadPlan {
            count: 0,
            disks: vm
                .disks
                .iter()
                .map(|d| DiskIoThreadAssignment {
                    disk: d.name.clone(),
                    io_thread: if d.hotplugged {
                        DiskIoThread::IoThreads
                    } else {
                        DiskIoThread::None
                    },
                })
                .collect(),
            scsi_controller: None,
        });
    }

    let dedicated = vm.disks.iter().filter(|d| d.dedicated_io_thread).count() as u32;
    let shared = vm.disks.len() as u32 - dedicated;
    let limit = thread_pool_limit(vm.io_threads_policy, &vm.cpu, &vm.resources);
    let auto = shared.min(limit.saturating_sub(dedicated)).max(1);

    let mut current_auto = 1;
    let mut current_dedicated = auto + 1;
    let mut disks = Vec::with_capacity(vm.disks.len());
    for disk in vm.disks.iter() {
        let io_thread = if disk.hotplugged {
            DiskIoThread::IoThreads
        } else if disk.dedicated_io_thread {
            current_dedicated += 1;
            DiskIoThread::Thread(current_dedicated - 1)
        } else {
            let id = current_auto;
            current_auto = current_auto % auto + 1;
            DiskIoThread::Thread(id)
        };
        disks.push(DiskIoThreadAssignment {
            disk: disk.name.clone(),
            io_thread,
        });
    }

    let scsi_controller = vm
        .disks
        .iter()
        .any(|d| d.bus == DiskBus::Scsi && d.dedicated_io_thread)
        .then(|| ScsiControllerIoThread {
            iothread: current_auto,
            queues: vcpus,
        });

    let plan = IoThreadPlan {
        count: auto + dedicated,
        disks,
        scsi_controller,
    };
    info!(sl!(), "planned iothreads";
        "count" => plan.count,
        "shared" => auto,
        "dedicated" => dedicated,
        "limit" => limit);

    Ok(plan)
}

fn plan_supplemental_pool(vm: &VmSpec) -> Result<IoThreadPlan> {
    let count = match vm.supplemental_pool_thread_count {
        Some(count) if count > 0 => count,
        _ => return Err(PlacementError::InvalidIoThreadPool),
    };
    let pool: Vec<u32> = (1..=count).collect();

    let disks = vm
        .disks
        .iter()
        .map(|d| DiskIoThreadAssignment {
            disk: d.name.clone(),
            io_thread: if d.hotplugged {
                DiskIoThread::IoThreads
            } else if d.bus == DiskBus::Virtio {
                DiskIoThread::Pool(pool.clone())
            } else {
                DiskIoThread::None
            },
        })
        .collect();

    info!(sl!(), "planned supplemental iothread pool"; "count" => count);
    Ok(IoThreadPlan {
        count,
        disks,
        scsi_controller: None,
    })
}

/// Pin IOThreads to the cpus granted to the vCPUs.
///
/// With an isolated emulator thread every IOThread shares its cpu. With at
/// least as many IOThreads as vCPUs, thread `t` runs on `cpu_set[t % vcpus]`.
/// Otherwise the first `vcpus` cpus are split into contiguous ranges, the
/// first `vcpus % count` threads getting one cpu more than the others.
pub fn pin_io_threads(
    count: u32,
    vcpus: u32,
    cpu_set: &[u32],
    emulator_cpu: Option<u32>,
) -> Result<Vec<IoThreadPin>> {
    if count == 0 {
        return Ok(Vec::new());
    }

    if let Some(cpu) = emulator_cpu {
        return Ok((1..=count)
            .map(|iothread| IoThreadPin {
                iothread,
                cpus: vec![cpu],
            })
            .collect());
    }

    if vcpus == 0 || cpu_set.len() < vcpus as usize {
        return Err(PlacementError::CpuSetTooSmall {
            vcpus,
            available: cpu_set.len(),
        });
    }

    if count >= vcpus {
        return Ok((1..=count)
            .map(|iothread| IoThreadPin {
                iothread,
                cpus: vec![cpu_set[(iothread % vcpus) as usize]],
            })
            .collect());
    }

    let base = (vcpus / count) as usize;
    let extra = vcpus % count;
    let mut start = 0;
    let mut pins = Vec::with_capacity(count as usize);
    for iothread in 1..=count {
        let len = if iothread <= extra { base + 1 } else { base };
        pins.push(IoThreadPin {
            iothread,
            cpus: cpu_set[start..start + len].to_vec(),
        });
        start += len;
    }

    Ok(pins)
}
