// Copyright (c) 2019-2022 Alibaba Cloud
// Copyright (c) 2019-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

//! Host introspection through sysfs.

use std::convert::TryFrom;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use placement_types::config::SysfsConfig;
use placement_types::cpuset::parse_cpu_list;
use placement_types::device::{DomainDevices, PciAddress};
use placement_types::topology::{Cell, Cpu, HostTopology};

const PCI_DEVICES_DIR: &str = "bus/pci/devices";
const NODE_DIR: &str = "devices/system/node";
const CPU_DIR: &str = "devices/system/cpu";

/// Reads NUMA and cpu topology information below a sysfs mount point.
#[derive(Clone, Debug)]
pub struct SysfsInspector {
    root: PathBuf,
}

impl SysfsInspector {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        SysfsInspector { root: root.into() }
    }

    pub fn from_config(config: &SysfsConfig) -> Self {
        Self::new(config.root.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// NUMA node of a PCI device, `None` when the kernel reports no affinity.
    pub fn pci_device_numa_node(&self, address: &PciAddress) -> Result<Option<u32>> {
        let path = self
            .root
            .join(PCI_DEVICES_DIR)
            .join(address.to_string())
            .join("numa_node");
        let content = read_trimmed(&path)?;
        let node: i64 = content
            .parse()
            .with_context(|| format!("parse numa node {:?} of {}", content, path.display()))?;

        if node < 0 {
            return Ok(None);
        }
        u32::try_from(node)
            .map(Some)
            .map_err(|_| anyhow!("numa node {} of {} out of range", node, path.display()))
    }

    /// Ids of the online NUMA nodes, in ascending order.
    pub fn numa_nodes(&self) -> Result<Vec<u32>> {
        let dir = self.root.join(NODE_DIR);
        let mut nodes = Vec::new();
        for entry in fs::read_dir(&dir).with_context(|| format!("read dir {}", dir.display()))? {
            let entry = entry.with_context(|| format!("read dir {}", dir.display()))?;
            let name = entry.file_name();
            let id = name
                .to_str()
                .and_then(|n| n.strip_prefix("node"))
                .and_then(|n| n.parse::<u32>().ok());
            if let Some(id) = id {
                nodes.push(id);
            }
        }
        nodes.sort_unstable();
        Ok(nodes)
    }

    /// Cpus of a NUMA node.
    pub fn node_cpus(&self, node: u32) -> Result<Vec<u32>> {
        let path = self
            .root
            .join(NODE_DIR)
            .join(format!("node{}", node))
            .join("cpulist");
        read_cpu_list(&path)
    }

    /// Hyperthreads sharing the physical core of `cpu`, including `cpu`.
    pub fn cpu_siblings(&self, cpu: u32) -> Result<Vec<u32>> {
        let path = self
            .root
            .join(CPU_DIR)
            .join(format!("cpu{}", cpu))
            .join("topology/thread_siblings_list");
        read_cpu_list(&path)
    }

    /// Snapshot of the host NUMA topology.
    ///
    /// A cpu whose sibling list cannot be read is treated as a core of its own.
    pub fn host_topology(&self) -> Result<HostTopology> {
        let mut cells = Vec::new();
        for node in self.numa_nodes()? {
            let mut cpus = Vec::new();
            for id in self.node_cpus(node)? {
                let siblings = match self.cpu_siblings(id) {
                    Ok(siblings) => siblings,
                    Err(e) => {
                        warn!(sl!(), "no thread siblings for cpu"; "cpu" => id, "error" => format!("{:?}", e));
                        Vec::new()
                    }
                };
                cpus.push(Cpu::new(id, siblings));
            }
            cells.push(Cell::new(node, cpus));
        }

        Ok(HostTopology::new(cells))
    }

    /// Fill in the NUMA node of host devices that have a PCI source address.
    ///
    /// Devices whose node is already known are left alone.
    pub fn annotate_host_devices(&self, devices: &mut DomainDevices) -> Result<()> {
        for device in devices.host_devices.iter_mut() {
            if device.numa_node.is_some() {
                continue;
            }
            if let Some(source) = device.source {
                device.numa_node = self
                    .pci_device_numa_node(&source)
                    .with_context(|| format!("resolve numa node of host device {}", device.alias))?;
            }
        }
        Ok(())
    }
}

fn read_trimmed(path: &Path) -> Result<String> {
    let content =
        fs::read_to_string(path).with_context(|| format!("read file {}", path.display()))?;
    Ok(content.trim().to_string())
}

fn read_cpu_list(path: &Path) -> Result<Vec<u32>> {
    let content = read_trimmed(path)?;
    parse_cpu_list(&content).with_context(|| format!("parse cpu list of {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use placement_types::device::HostDevice;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    // Two nodes with two cores of two threads each, cpu n and n+4 are siblings.
    fn fake_sysfs() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "devices/system/node/node0/cpulist", "0-1,4-5\n");
        write(root, "devices/system/node/node1/cpulist", "2-3,6-7\n");
        write(root, "devices/system/node/possible", "0-1\n");
        for cpu in 0..8 {
            let siblings = format!("{},{}\n", cpu % 4, cpu % 4 + 4);
            write(
                root,
                &format!("devices/system/cpu/cpu{}/topology/thread_siblings_list", cpu),
                &siblings,
            );
        }
        write(root, "bus/pci/devices/0000:3b:00.0/numa_node", "1\n");
        write(root, "bus/pci/devices/0000:00:1f.2/numa_node", "-1\n");
        write(root, "bus/pci/devices/0000:af:00.0/numa_node", "garbage\n");
        dir
    }

    #[test]
    fn test_pci_device_numa_node() {
        let dir = fake_sysfs();
        let inspector = SysfsInspector::new(dir.path());

        let gpu: PciAddress = "0000:3b:00.0".parse().unwrap();
        assert_eq!(inspector.pci_device_numa_node(&gpu).unwrap(), Some(1));
        let sata: PciAddress = "0000:00:1f.2".parse().unwrap();
        assert_eq!(inspector.pci_device_numa_node(&sata).unwrap(), None);
        let broken: PciAddress = "0000:af:00.0".parse().unwrap();
        assert!(inspector.pci_device_numa_node(&broken).is_err());
        let missing: PciAddress = "0000:01:00.0".parse().unwrap();
        assert!(inspector.pci_device_numa_node(&missing).is_err());
    }

    #[test]
    fn test_host_topology() {
        let dir = fake_sysfs();
        let inspector = SysfsInspector::from_config(&SysfsConfig {
            root: dir.path().to_path_buf(),
        });
        assert_eq!(inspector.root(), dir.path());
        assert_eq!(inspector.numa_nodes().unwrap(), vec![0, 1]);
        assert_eq!(inspector.node_cpus(1).unwrap(), vec![2, 3, 6, 7]);
        assert_eq!(inspector.cpu_siblings(6).unwrap(), vec![2, 6]);

        let topology = inspector.host_topology().unwrap();
        assert_eq!(topology.cells.len(), 2);
        assert_eq!(topology.cells[0].id, 0);
        assert_eq!(
            topology.cells[0].cpus.iter().map(|c| c.id).collect::<Vec<_>>(),
            vec![0, 1, 4, 5]
        );
        assert_eq!(topology.cells[0].cpus[2].siblings, vec![0, 4]);
        assert_eq!(topology.cpu_to_cell()[&7], 1);
    }

    #[test]
    fn test_host_topology_without_siblings() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "devices/system/node/node0/cpulist", "0-1\n");
        let topology = SysfsInspector::new(dir.path()).host_topology().unwrap();
        assert_eq!(topology.cells[0].cpus.len(), 2);
        assert!(topology.cells[0].cpus[0].siblings.is_empty());

        let empty = tempfile::tempdir().unwrap();
        assert!(SysfsInspector::new(empty.path()).host_topology().is_err());
    }

    #[test]
    fn test_annotate_host_devices() {
        let dir = fake_sysfs();
        let inspector = SysfsInspector::new(dir.path());
        let mut devices = DomainDevices {
            host_devices: vec![
                HostDevice {
                    alias: "gpu0".to_string(),
                    source: Some("0000:3b:00.0".parse().unwrap()),
                    ..Default::default()
                },
                HostDevice {
                    alias: "sata".to_string(),
                    source: Some("0000:00:1f.2".parse().unwrap()),
                    ..Default::default()
                },
                HostDevice {
                    alias: "mdev".to_string(),
                    ..Default::default()
                },
                HostDevice {
                    alias: "pinned".to_string(),
                    source: Some("0000:01:00.0".parse().unwrap()),
                    numa_node: Some(0),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        inspector.annotate_host_devices(&mut devices).unwrap();
        let nodes: Vec<Option<u32>> = devices.host_devices.iter().map(|d| d.numa_node).collect();
        assert_eq!(nodes, vec![Some(1), None, None, Some(0)]);

        devices.host_devices.push(HostDevice {
            alias: "broken".to_string(),
            source: Some("0000:af:00.0".parse().unwrap()),
            ..Default::default()
        });
        assert!(inspector.annotate_host_devices(&mut devices).is_err());
    }
}
