// Copyright (c) 2019-2022 Alibaba Cloud
// Copyright (c) 2019-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

//! Guest NUMA layout mirroring the host cells the vCPUs are pinned to.

use std::collections::HashMap;

use placement_types::size::parse_size;
use placement_types::topology::HostTopology;
use serde::Serialize;

use crate::error::{PlacementError, Result};
use crate::vcpu::VcpuPin;

/// A guest NUMA cell.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GuestNumaCell {
    /// Guest cell id, counted from 0.
    pub id: u32,
    /// Host cell backing this guest cell.
    pub host_cell: u32,
    pub vcpus: Vec<u32>,
    /// Memory in bytes.
    pub memory: u64,
}

/// Binds the memory of a guest cell to a host cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct MemNode {
    pub cell_id: u32,
    pub mode: NumaTuneMode,
    pub node_set: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NumaTuneMode {
    Strict,
}

/// Hugepages backing one guest cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct HugePage {
    /// Page size in bytes.
    pub size: u64,
    /// Guest cell id.
    pub node_set: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MemoryBacking {
    pub hugepages: Vec<HugePage>,
    pub no_share_pages: bool,
    /// Memory is allocated when the domain starts.
    pub immediate_allocation: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NumaGuestLayout {
    pub cells: Vec<GuestNumaCell>,
    pub mode: NumaTuneMode,
    /// Host cells the guest memory is bound to, in cell order.
    pub node_set: Vec<u32>,
    pub mem_nodes: Vec<MemNode>,
    pub memory_backing: MemoryBacking,
}

impl NumaGuestLayout {
    /// Node set of the numa tune, e.g. `0,1`.
    pub fn node_set_string(&self) -> String {
        self.node_set
            .iter()
            .map(|n| n.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Guest cell backed by the given host cell.
    pub fn guest_cell_of_host(&self, host_cell: u32) -> Option<u32> {
        self.cells
            .iter()
            .find(|c| c.host_cell == host_cell)
            .map(|c| c.id)
    }

    pub fn total_memory(&self) -> u64 {
        self.cells.iter().map(|c| c.memory).sum()
    }
}

/// Parse a hugepage size, rejecting sizes of zero bytes.
pub fn parse_hugepage_size(size: &str) -> Result<u64> {
    match parse_size(size) {
        Ok(bytes) if bytes > 0 => Ok(bytes),
        _ => Err(PlacementError::InvalidHugepageSize(size.to_string())),
    }
}

/// Compute the guest NUMA layout for pinned vCPUs.
///
/// Returns `None` when no host topology is known. Every host cell holding a
/// pinned vCPU becomes one guest cell, in host cell order. Guest memory is
/// rounded down to whole hugepages and split evenly, the first cells taking
/// one page more when the pages do not divide evenly.
pub fn map_numa(
    pins: &[VcpuPin],
    topology: Option<&HostTopology>,
    memory: u64,
    hugepage_size: Option<u64>,
    realtime: bool,
) -> Result<Option<NumaGuestLayout>> {
    let topology = match topology {
        Some(topology) if !topology.is_empty() => topology,
        _ => return Ok(None),
    };

    let cpu_to_cell = topology.cpu_to_cell();
    let mut vcpus_by_cell: HashMap<u32, Vec<u32>> = HashMap::new();
    for pin in pins.iter() {
        let cell = cpu_to_cell
            .get(&pin.cpu)
            .ok_or(PlacementError::UnknownHostCpu {
                vcpu: pin.vcpu,
                cpu: pin.cpu,
            })?;
        vcpus_by_cell.entry(*cell).or_default().push(pin.vcpu);
    }

    let mut cells = Vec::new();
    for host_cell in topology.cells.iter() {
        if let Some(vcpus) = vcpus_by_cell.remove(&host_cell.id) {
            cells.push(GuestNumaCell {
                id: cells.len() as u32,
                host_cell: host_cell.id,
                vcpus,
                memory: 0,
            });
        }
    }
    if cells.is_empty() {
        return Ok(None);
    }

    let hugepage_size = hugepage_size.ok_or(PlacementError::HugepagesRequired)?;
    if hugepage_size == 0 {
        return Err(PlacementError::InvalidHugepageSize("0".to_string()));
    }
    split_memory(&mut cells, memory, hugepage_size)?;

    let node_set = cells.iter().map(|c| c.host_cell).collect();
    let mem_nodes = cells
        .iter()
        .map(|c| MemNode {
            cell_id: c.id,
            mode: NumaTuneMode::Strict,
            node_set: c.host_cell,
        })
        .collect();
    let hugepages = cells
        .iter()
        .map(|c| HugePage {
            size: hugepage_size,
            node_set: c.id,
        })
        .collect();

    Ok(Some(NumaGuestLayout {
        cells,
        mode: NumaTuneMode::Strict,
        node_set,
        mem_nodes,
        memory_backing: MemoryBacking {
            hugepages,
            no_share_pages: realtime,
            immediate_allocation: true,
        },
    }))
}

fn split_memory(cells: &mut [GuestNumaCell], memory: u64, hugepage_size: u64) -> Result<()> {
    let count = cells.len() as u64;
    let required = count * hugepage_size;
    if memory < required {
        return Err(PlacementError::NotEnoughMemory { memory, required });
    }

    let pages = memory / hugepage_size;
    if pages * hugepage_size != memory {
        warn!(sl!(), "guest memory is not a multiple of the hugepage size, rounding down";
            "memory" => memory,
            "hugepage_size" => hugepage_size,
            "usable" => pages * hugepage_size);
    }

    let per_cell = pages / count * hugepage_size;
    let extra_pages = pages % count;
    for (idx, cell) in cells.iter_mut().enumerate() {
        cell.memory = per_cell;
        if (idx as u64) < extra_pages {
            cell.memory += hugepage_size;
        }
    }
    debug!(sl!(), "split guest memory over numa cells";
        "cells" => count,
        "per_cell" => per_cell,
        "extra_pages" => extra_pages);

    Ok(())
}
