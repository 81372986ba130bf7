// Copyright (c) 2019-2022 Alibaba Cloud
// Copyright (c) 2019-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

use std::collections::{HashSet, VecDeque};

use placement_types::topology::HostTopology;

use super::{RequestedTopology, VcpuPin};
use crate::error::{PlacementError, Result};

/// Whether a virtual core may take its threads from more than one host cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PinningPolicy {
    /// Threads of one virtual core never span host numa cells.
    Strict,
    /// Fall back to spanning cells when nothing else fits.
    Relaxed,
}

// Free host threads of one numa cell.
//
// A physical core with at least `threads_per_core` free threads is full and
// can host a whole virtual core, anything smaller is kept as loose threads in
// `fragmented`.
#[derive(Debug)]
struct Cell {
    full_cores: VecDeque<Vec<u32>>,
    fragmented: VecDeque<u32>,
    threads_per_core: usize,
}

impl Cell {
    fn new(cores: Vec<Vec<u32>>, threads_per_core: usize) -> Self {
        let mut cell = Cell {
            full_cores: VecDeque::new(),
            fragmented: VecDeque::new(),
            threads_per_core,
        };
        for core in cores {
            if core.len() >= threads_per_core {
                cell.full_cores.push_back(core);
            } else {
                cell.fragmented.extend(core);
            }
        }
        cell
    }

    // Move the front core to the fragments once it can no longer host a whole virtual core.
    fn settle_front_core(&mut self) {
        let too_small = self
            .full_cores
            .front()
            .map_or(false, |core| core.len() < self.threads_per_core);
        if too_small {
            if let Some(rest) = self.full_cores.pop_front() {
                self.fragmented.extend(rest);
            }
        }
    }

    fn not_fragmented_threads(&mut self) -> Option<Vec<u32>> {
        let tpc = self.threads_per_core;
        let core = self.full_cores.front_mut()?;
        let selected: Vec<u32> = core.drain(..tpc).collect();
        self.settle_front_core();
        Some(selected)
    }

    fn fragmented_threads(&mut self) -> Option<Vec<u32>> {
        if self.fragmented.len() < self.threads_per_core {
            return None;
        }
        Some(self.fragmented.drain(..self.threads_per_core).collect())
    }

    fn fragmented_threads_up_to(&mut self, count: usize) -> Vec<u32> {
        let count = count.min(self.fragmented.len());
        self.fragmented.drain(..count).collect()
    }

    fn thread(&mut self) -> Option<u32> {
        if let Some(thread) = self.fragmented.pop_front() {
            return Some(thread);
        }

        let core = self.full_cores.front_mut()?;
        let thread = core.remove(0);
        self.settle_front_core();
        Some(thread)
    }
}

/// Host threads granted to a VM, consumed while fitting vCPUs.
///
/// A pool is built for one placement call and consumed by it.
#[derive(Debug)]
pub struct CpuPool {
    cells: Vec<Cell>,
    cores: usize,
    threads_per_core: usize,
    available_threads: usize,
    policy: PinningPolicy,
}

impl CpuPool {
    pub fn new(
        requested: &RequestedTopology,
        topology: &HostTopology,
        cpu_set: &[u32],
        policy: PinningPolicy,
    ) -> Self {
        let threads_per_core = requested.threads as usize;
        let cells = cpu_chunks_to_cells(cpu_set, topology)
            .into_iter()
            .map(|cores| Cell::new(cores, threads_per_core))
            .collect();

        CpuPool {
            cells,
            cores: requested.total_cores() as usize,
            threads_per_core,
            available_threads: cpu_set.len(),
            policy,
        }
    }

    pub fn policy(&self) -> PinningPolicy {
        self.policy
    }

    /// Pin every vCPU of the requested topology to a host thread.
    ///
    /// Whole free physical cores are used first, then loose threads of one
    /// cell, and with the relaxed policy finally loose threads of any cell.
    /// vCPU indexes follow the order threads are taken in.
    pub fn fit_cores(&mut self) -> Result<Vec<VcpuPin>> {
        let (threads, remaining) = self.fit(self.cores);
        if remaining > 0 {
            if self.policy == PinningPolicy::Relaxed
                || self.available_threads < self.cores * self.threads_per_core
            {
                return Err(PlacementError::NotEnoughThreads(remaining));
            }
            return Err(PlacementError::CellBoundary(remaining));
        }

        let pins: Vec<VcpuPin> = threads
            .into_iter()
            .enumerate()
            .map(|(vcpu, cpu)| VcpuPin {
                vcpu: vcpu as u32,
                cpu,
            })
            .collect();
        debug!(sl!(), "fitted vcpus"; "policy" => format!("{:?}", self.policy), "pins" => format!("{:?}", pins));

        Ok(pins)
    }

    /// Take one more host thread, preferring leftovers of partially used cores.
    pub fn fit_thread(&mut self) -> Result<u32> {
        self.cells
            .iter_mut()
            .find_map(|cell| cell.thread())
            .ok_or(PlacementError::NoRemainingThreads)
    }

    fn fit(&mut self, requested: usize) -> (Vec<u32>, usize) {
        let (mut threads, remaining) =
            fit_chunk(&mut self.cells, requested, Cell::not_fragmented_threads);
        if remaining == 0 {
            return (threads, 0);
        }

        let (cell_bound, remaining) =
            fit_chunk(&mut self.cells, remaining, Cell::fragmented_threads);
        threads.extend(cell_bound);
        if remaining == 0 || self.policy == PinningPolicy::Strict {
            return (threads, remaining);
        }

        let (unbound, remaining) = self.fit_unbound(remaining);
        threads.extend(unbound);
        (threads, remaining)
    }

    // Collect loose threads from any cell, letting a virtual core span cells.
    // Returns the number of cores which still could not be fitted.
    fn fit_unbound(&mut self, requested: usize) -> (Vec<u32>, usize) {
        let mut remaining_threads = requested * self.threads_per_core;
        let mut threads = Vec::with_capacity(remaining_threads);

        for cell in self.cells.iter_mut() {
            let chunk = cell.fragmented_threads_up_to(remaining_threads);
            assert!(
                chunk.len() <= remaining_threads,
                "remaining thread count must never drop below zero"
            );
            remaining_threads -= chunk.len();
            threads.extend(chunk);
            if remaining_threads == 0 {
                return (threads, 0);
            }
        }

        let remaining_cores =
            (remaining_threads + self.threads_per_core - 1) / self.threads_per_core;
        (threads, remaining_cores)
    }
}

// Take whole virtual cores from the cells in order until `requested` are found.
// Returns the threads taken and the number of cores still missing.
fn fit_chunk<F>(cells: &mut [Cell], requested: usize, mut allocate: F) -> (Vec<u32>, usize)
where
    F: FnMut(&mut Cell) -> Option<Vec<u32>>,
{
    let mut threads = Vec::new();
    let mut remaining = requested;
    if remaining == 0 {
        return (threads, 0);
    }

    for cell in cells.iter_mut() {
        while let Some(chunk) = allocate(cell) {
            threads.extend(chunk);
            remaining -= 1;
            if remaining == 0 {
                return (threads, 0);
            }
        }
    }

    (threads, remaining)
}

// Group the granted cpus by host cell and physical core.
//
// Cores keep the order of the topology; cpus outside the cpu set are left out
// and a cpu without sibling information forms a core of its own.
fn cpu_chunks_to_cells(cpu_set: &[u32], topology: &HostTopology) -> Vec<Vec<Vec<u32>>> {
    let granted: HashSet<u32> = cpu_set.iter().copied().collect();
    let mut visited: HashSet<u32> = HashSet::new();
    let mut cells = Vec::with_capacity(topology.cells.len());

    for cell in topology.cells.iter() {
        let mut cores = Vec::new();
        for cpu in cell.cpus.iter() {
            if visited.contains(&cpu.id) {
                continue;
            }

            let mut core = Vec::new();
            if cpu.siblings.is_empty() {
                visited.insert(cpu.id);
                if granted.contains(&cpu.id) {
                    core.push(cpu.id);
                }
            } else {
                for sibling in cpu.siblings.iter() {
                    if visited.insert(*sibling) && granted.contains(sibling) {
                        core.push(*sibling);
                    }
                }
            }
            if !core.is_empty() {
                cores.push(core);
            }
        }
        cells.push(cores);
    }

    cells
}
