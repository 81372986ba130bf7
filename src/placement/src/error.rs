// Copyright (c) 2019-2022 Alibaba Cloud
// Copyright (c) 2019-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

/// Broad class of a placement failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Not enough host threads, PCI slots, bus numbers or device names.
    ResourceInsufficient,
    /// The inputs reference cpus or cells absent from the host topology.
    TopologyInconsistency,
    /// A placement mode was requested without its precondition.
    PolicyViolation,
}

/// Errors associated with placing a domain onto the host.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum PlacementError {
    /// Requested cpu topology with a zero dimension.
    #[error("invalid cpu topology: sockets={sockets}, cores={cores}, threads={threads}")]
    InvalidCpuTopology {
        sockets: u32,
        cores: u32,
        threads: u32,
    },

    /// Too few host threads for the requested cores.
    #[error("not enough exclusive threads provided, could not fit {0} core(s)")]
    NotEnoughThreads(usize),

    /// Enough threads, but not without splitting a core across numa cells.
    #[error("could not fit {0} core(s) without crossing numa cell boundaries for individual cores")]
    CellBoundary(usize),

    /// The pool has no thread left.
    #[error("no remaining unassigned threads")]
    NoRemainingThreads,

    /// No thread left for the emulator.
    #[error("no CPU allocated for the emulation thread: {0}")]
    EmulatorThread(Box<PlacementError>),

    /// Dedicated cpus were requested without a host topology.
    #[error("host numa topology is required for dedicated cpu placement")]
    MissingHostTopology,

    /// A vCPU is pinned to a cpu absent from the host topology.
    #[error("vcpu {vcpu} is mapped to a not existing host cpu set {cpu}")]
    UnknownHostCpu { vcpu: u32, cpu: u32 },

    /// The granted cpu set is smaller than the vCPU count.
    #[error("cpu set of {available} cpu(s) is too small for {vcpus} vcpu(s)")]
    CpuSetTooSmall { vcpus: u32, available: usize },

    /// Numa passthrough without hugepages.
    #[error("passing through a numa topology is restricted to VMIs with hugepages enabled")]
    HugepagesRequired,

    /// Unusable hugepage size.
    #[error("invalid hugepage size {0:?}")]
    InvalidHugepageSize(String),

    /// Less guest memory than one hugepage per guest numa cell.
    #[error("not enough memory requested to allocate at least one hugepage per numa node: {memory} < {required}")]
    NotEnoughMemory { memory: u64, required: u64 },

    /// Supplemental pool policy without a pool size.
    #[error("iothreads policy supplementalPool requires a positive thread count")]
    InvalidIoThreadPool,

    /// Root bus slots exhausted.
    #[error("No space left on the root PCI bus.")]
    RootBusFull,

    /// Controller indexes ran into the expander bus numbers.
    #[error("not enough pci bus numbers: controller index {index} reaches expander bus number {bus_nr}")]
    ExpanderBusExhausted { index: u32, bus_nr: u32 },

    /// Every name of a prefix is taken.
    #[error("no free device name left with prefix {0}")]
    DeviceNamesExhausted(String),
}

impl PlacementError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlacementError::NotEnoughThreads(_)
            | PlacementError::CellBoundary(_)
            | PlacementError::NoRemainingThreads
            | PlacementError::CpuSetTooSmall { .. }
            | PlacementError::NotEnoughMemory { .. }
            | PlacementError::RootBusFull
            | PlacementError::ExpanderBusExhausted { .. }
            | PlacementError::DeviceNamesExhausted(_) => ErrorKind::ResourceInsufficient,
            PlacementError::EmulatorThread(cause) => cause.kind(),
            PlacementError::MissingHostTopology | PlacementError::UnknownHostCpu { .. } => {
                ErrorKind::TopologyInconsistency
            }
            PlacementError::InvalidCpuTopology { .. }
            | PlacementError::HugepagesRequired
            | PlacementError::InvalidHugepageSize(_)
            | PlacementError::InvalidIoThreadPool => ErrorKind::PolicyViolation,
        }
    }
}

pub type Result<T> = std::result::Result<T, PlacementError>;
