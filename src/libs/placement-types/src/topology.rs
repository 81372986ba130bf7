// Copyright (c) 2019-2022 Alibaba Cloud
// Copyright (c) 2019-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A host logical CPU and the hyperthreads sharing its physical core.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Cpu {
    pub id: u32,
    /// Logical CPUs on the same physical core, usually including `id` itself.
    #[serde(default)]
    pub siblings: Vec<u32>,
}

impl Cpu {
    pub fn new(id: u32, siblings: Vec<u32>) -> Self {
        Cpu { id, siblings }
    }
}

/// A host NUMA cell.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Cell {
    pub id: u32,
    #[serde(default)]
    pub cpus: Vec<Cpu>,
}

impl Cell {
    pub fn new(id: u32, cpus: Vec<Cpu>) -> Self {
        Cell { id, cpus }
    }
}

/// Snapshot of the host NUMA topology, cells in the order reported by the node.
///
/// The order of cells and cpus matters: placement walks them front to back and
/// the resulting pins follow that order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct HostTopology {
    #[serde(default)]
    pub cells: Vec<Cell>,
}

impl HostTopology {
    pub fn new(cells: Vec<Cell>) -> Self {
        HostTopology { cells }
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Map every host cpu id to the id of the cell it belongs to.
    pub fn cpu_to_cell(&self) -> HashMap<u32, u32> {
        let mut map = HashMap::new();
        for cell in self.cells.iter() {
            for cpu in cell.cpus.iter() {
                map.insert(cpu.id, cell.id);
            }
        }
        map
    }
}
