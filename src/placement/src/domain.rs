// Copyright (c) 2019-2022 Alibaba Cloud
// Copyright (c) 2019-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

use placement_types::arch::Arch;
use placement_types::topology::HostTopology;
use placement_types::vm::VmSpec;
use serde::Serialize;

use crate::error::{PlacementError, Result};
use crate::iothread::{pin_io_threads, plan_io_threads, IoThreadPlan};
use crate::naming::{DeviceNamer, DiskTarget};
use crate::numa::{map_numa, parse_hugepage_size, NumaGuestLayout};
use crate::vcpu::{CpuFeatures, CpuPool, CpuTune, PinningPolicy, RequestedTopology};

/// Host side inputs of a placement call.
///
/// The context owns copies of the topology and cpu set, so a placement never
/// holds on to caller data.
#[derive(Clone, Debug, Default)]
pub struct PlacementContext {
    topology: Option<HostTopology>,
    cpu_set: Vec<u32>,
    arch: Arch,
}

impl PlacementContext {
    pub fn new(arch: Arch) -> Self {
        PlacementContext {
            topology: None,
            cpu_set: Vec::new(),
            arch,
        }
    }

    pub fn with_topology(mut self, topology: &HostTopology) -> Self {
        self.topology = Some(topology.clone());
        self
    }

    /// Host cpus granted to the VM.
    pub fn with_cpu_set(mut self, cpu_set: &[u32]) -> Self {
        self.cpu_set = cpu_set.to_vec();
        self
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }
}

/// Everything placement adds to the domain descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DomainPlacement {
    pub topology: RequestedTopology,
    pub features: CpuFeatures,
    /// Disk target names in disk order.
    pub disk_targets: Vec<DiskTarget>,
    pub io_threads: IoThreadPlan,
    /// Set with dedicated cpu placement only.
    pub cpu_tune: Option<CpuTune>,
    /// Set with numa passthrough only.
    pub numa: Option<NumaGuestLayout>,
}

/// Place the vCPUs, IOThreads, memory and disks of a VM onto the host.
///
/// Pinning and the guest NUMA layout are only computed with dedicated cpu
/// placement. Any error aborts the whole placement.
pub fn place_domain(vm: &VmSpec, ctx: &PlacementContext) -> Result<DomainPlacement> {
    let topology =
        RequestedTopology::from_vm(&vm.cpu, &vm.resources)?.without_disabled_vcpus(&vm.cpu)?;
    let vcpus = topology.vcpus();

    let mut namer = DeviceNamer::for_disks(&vm.disks, &vm.known_targets);
    let disk_targets = vm
        .disks
        .iter()
        .map(|disk| namer.assign(&disk.name, disk.bus))
        .collect::<Result<Vec<_>>>()?;

    let io_threads = plan_io_threads(vm, vcpus)?;
    let features = CpuFeatures::for_request(&vm.cpu, ctx.arch);

    let mut cpu_tune = None;
    let mut numa = None;
    if vm.cpu.dedicated_cpu_placement {
        let host_topology = ctx
            .topology
            .as_ref()
            .ok_or(PlacementError::MissingHostTopology)?;
        let policy = if vm.cpu.numa_passthrough {
            PinningPolicy::Strict
        } else {
            PinningPolicy::Relaxed
        };

        let mut pool = CpuPool::new(&topology, host_topology, &ctx.cpu_set, policy);
        let vcpu_pins = pool.fit_cores()?;
        let emulator_pin = if vm.cpu.isolate_emulator_thread {
            let cpu = pool
                .fit_thread()
                .map_err(|e| PlacementError::EmulatorThread(Box::new(e)))?;
            Some(cpu)
        } else {
            None
        };
        let iothread_pins = pin_io_threads(io_threads.count, vcpus, &ctx.cpu_set, emulator_pin)?;

        if vm.cpu.numa_passthrough {
            let hugepage_size = vm
                .memory
                .hugepage_size
                .as_deref()
                .map(parse_hugepage_size)
                .transpose()?;
            numa = map_numa(
                &vcpu_pins,
                Some(host_topology),
                vm.memory.guest,
                hugepage_size,
                vm.cpu.realtime,
            )?;
        }

        cpu_tune = Some(CpuTune {
            vcpu_pins,
            emulator_pin,
            iothread_pins,
        });
    }

    info!(sl!(), "placed domain";
        "vcpus" => vcpus,
        "iothreads" => io_threads.count,
        "dedicated_cpus" => vm.cpu.dedicated_cpu_placement,
        "guest_numa_cells" => numa.as_ref().map_or(0, |n: &NumaGuestLayout| n.cells.len()),
        "arch" => ctx.arch.as_str());

    Ok(DomainPlacement {
        topology,
        features,
        disk_targets,
        io_threads,
        cpu_tune,
        numa,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::iothread::DiskIoThread;
    use placement_types::topology::{Cell, Cpu};
    use placement_types::vm::{
        CpuSpec, DiskBus, DiskSpec, IoThreadsPolicy, KnownTarget, MemorySpec, ResourceSpec,
    };

    const MI: u64 = 1024 * 1024;

    // One cell holding cpus 0..=31 without hyperthreads.
    fn single_cell_topology() -> HostTopology {
        HostTopology::new(vec![Cell::new(
            0,
            (0..32).map(|id| Cpu::new(id, vec![id])).collect(),
        )])
    }

    // Two cells of four cores with two threads each, cpu n and n+1 are siblings.
    fn two_cell_topology() -> HostTopology {
        let cell = |id: u32, first: u32| {
            let cpus = (first..first + 8)
                .map(|cpu| {
                    let core = cpu - cpu % 2;
                    Cpu::new(cpu, vec![core, core + 1])
                })
                .collect();
            Cell::new(id, cpus)
        };
        HostTopology::new(vec![cell(0, 0), cell(1, 8)])
    }

    fn disks(count: usize) -> Vec<DiskSpec> {
        (0..count)
            .map(|i| DiskSpec::new(&format!("disk{}", i), DiskBus::Virtio))
            .collect()
    }

    #[test]
    fn test_place_domain_iothread_pinning() {
        let vm = VmSpec {
            cpu: CpuSpec {
                cores: 16,
                dedicated_cpu_placement: true,
                ..Default::default()
            },
            resources: ResourceSpec {
                cpu_request: Some(16),
                cpu_limit: Some(16),
            },
            io_threads_policy: Some(IoThreadsPolicy::Auto),
            disks: disks(6),
            ..Default::default()
        };
        let cpu_set: Vec<u32> = (5..=20).collect();
        let ctx = PlacementContext::new(Arch::Amd64)
            .with_topology(&single_cell_topology())
            .with_cpu_set(&cpu_set);

        let placement = place_domain(&vm, &ctx).unwrap();
        assert_eq!(placement.io_threads.count, 6);

        let cpu_tune = placement.cpu_tune.unwrap();
        assert_eq!(cpu_tune.vcpu_pins.len(), 16);
        assert_eq!(cpu_tune.vcpu_pins[0].cpu, 5);
        assert_eq!(cpu_tune.vcpu_pins[15].cpu, 20);
        assert_eq!(cpu_tune.emulator_pin, None);

        let pins: Vec<(u32, String)> = cpu_tune
            .iothread_pins
            .iter()
            .map(|p| (p.iothread, p.cpuset()))
            .collect();
        assert_eq!(
            pins,
            vec![
                (1, "5,6,7".to_string()),
                (2, "8,9,10".to_string()),
                (3, "11,12,13".to_string()),
                (4, "14,15,16".to_string()),
                (5, "17,18".to_string()),
                (6, "19,20".to_string()),
            ]
        );
        assert!(placement.features.kvm_hint_dedicated);
        assert!(placement.numa.is_none());
        assert_eq!(placement.disk_targets[5].target, "vdf");
    }

    #[test]
    fn test_place_domain_numa_passthrough() {
        let vm = VmSpec {
            cpu: CpuSpec {
                sockets: 2,
                cores: 2,
                threads: 2,
                dedicated_cpu_placement: true,
                isolate_emulator_thread: true,
                numa_passthrough: true,
                realtime: true,
                ..Default::default()
            },
            memory: MemorySpec {
                guest: 1025 * MI,
                hugepage_size: Some("2Mi".to_string()),
            },
            disks: vec![DiskSpec::new("root", DiskBus::Virtio).dedicated()],
            ..Default::default()
        };
        // cell 0 has three whole cores, cell 1 all four
        let cpu_set: Vec<u32> = (2..16).collect();
        let ctx = PlacementContext::new(Arch::Arm64)
            .with_topology(&two_cell_topology())
            .with_cpu_set(&cpu_set);

        let placement = place_domain(&vm, &ctx).unwrap();
        let cpu_tune = placement.cpu_tune.unwrap();
        let cpus: Vec<u32> = cpu_tune.vcpu_pins.iter().map(|p| p.cpu).collect();
        assert_eq!(cpus, vec![2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(cpu_tune.emulator_pin, Some(10));
        // IOThreads share the cpu of the isolated emulator thread
        assert_eq!(placement.io_threads.count, 2);
        assert!(cpu_tune.iothread_pins.iter().all(|p| p.cpus == vec![10]));
        assert_eq!(placement.io_threads.disk("root"), Some(&DiskIoThread::Thread(2)));

        let numa = placement.numa.unwrap();
        assert_eq!(numa.cells.len(), 2);
        assert_eq!(numa.cells[0].vcpus, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(numa.cells[1].vcpus, vec![6, 7]);
        assert_eq!(numa.cells[0].memory, 512 * MI);
        assert_eq!(numa.cells[1].memory, 512 * MI);
        assert_eq!(numa.node_set_string(), "0,1");
        assert!(numa.memory_backing.no_share_pages);
        assert!(placement.features.pmu_off);
        assert!(!placement.features.kvm_hint_dedicated);
    }

    #[test]
    fn test_place_domain_without_dedicated_cpus() {
        let vm = VmSpec {
            cpu: CpuSpec {
                cores: 2,
                ..Default::default()
            },
            disks: vec![
                DiskSpec::new("root", DiskBus::Virtio),
                DiskSpec::new("data", DiskBus::Virtio),
                DiskSpec::new("cdrom", DiskBus::Sata),
            ],
            known_targets: vec![KnownTarget {
                disk: "data".to_string(),
                target: "vda".to_string(),
            }],
            ..Default::default()
        };

        let placement = place_domain(&vm, &PlacementContext::new(Arch::Amd64)).unwrap();
        assert!(placement.cpu_tune.is_none());
        assert!(placement.numa.is_none());
        assert_eq!(placement.io_threads.count, 0);
        let targets: Vec<&str> = placement
            .disk_targets
            .iter()
            .map(|t| t.target.as_str())
            .collect();
        assert_eq!(targets, vec!["vdb", "vda", "sda"]);

        let value = serde_json::to_value(&placement).unwrap();
        assert_eq!(value["topology"]["cores"], 2);
        assert_eq!(value["disk_targets"][1]["target"], "vda");
        assert_eq!(value["io_threads"]["count"], 0);
        assert!(value["cpu_tune"].is_null());
    }

    #[test]
    fn test_place_domain_reuses_target_of_removed_disk() {
        let vm = VmSpec {
            disks: vec![DiskSpec::new("new", DiskBus::Virtio)],
            known_targets: vec![KnownTarget {
                disk: "gone".to_string(),
                target: "vda".to_string(),
            }],
            ..Default::default()
        };

        let placement = place_domain(&vm, &PlacementContext::new(Arch::Amd64)).unwrap();
        assert_eq!(placement.disk_targets[0].target, "vda");
        assert_eq!(placement.disk_targets[0].index, 0);
    }

    #[test]
    fn test_place_domain_errors() {
        let mut vm = VmSpec {
            cpu: CpuSpec {
                cores: 4,
                threads: 2,
                dedicated_cpu_placement: true,
                numa_passthrough: true,
                ..Default::default()
            },
            ..Default::default()
        };

        let ctx = PlacementContext::new(Arch::Amd64);
        let err = place_domain(&vm, &ctx).unwrap_err();
        assert_eq!(err, PlacementError::MissingHostTopology);
        assert_eq!(err.kind(), ErrorKind::TopologyInconsistency);

        // cpus 7 and 8 are loose threads of different cells, strict pinning refuses
        let ctx = PlacementContext::new(Arch::Amd64)
            .with_topology(&two_cell_topology())
            .with_cpu_set(&[0, 1, 2, 3, 4, 5, 7, 8]);
        assert_eq!(
            place_domain(&vm, &ctx).unwrap_err(),
            PlacementError::CellBoundary(1)
        );

        // relaxed pinning takes the loose threads of both cells
        vm.cpu.numa_passthrough = false;
        let placement = place_domain(&vm, &ctx).unwrap();
        let cpus: Vec<u32> = placement
            .cpu_tune
            .unwrap()
            .vcpu_pins
            .iter()
            .map(|p| p.cpu)
            .collect();
        assert_eq!(cpus, vec![0, 1, 2, 3, 4, 5, 7, 8]);

        vm.cpu.isolate_emulator_thread = true;
        let err = place_domain(&vm, &ctx).unwrap_err();
        assert_eq!(
            err,
            PlacementError::EmulatorThread(Box::new(PlacementError::NoRemainingThreads))
        );
        assert_eq!(err.kind(), ErrorKind::ResourceInsufficient);

        vm.cpu.isolate_emulator_thread = false;
        vm.cpu.numa_passthrough = true;
        vm.cpu.cores = 2;
        let err = place_domain(&vm, &ctx).unwrap_err();
        assert_eq!(err, PlacementError::HugepagesRequired);
        assert_eq!(err.kind(), ErrorKind::PolicyViolation);
    }
}
