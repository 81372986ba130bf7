// Copyright (c) 2019-2022 Alibaba Cloud
// Copyright (c) 2019-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Guest architectures the placement core knows about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum Arch {
    Amd64,
    Arm64,
    Ppc64le,
    S390x,
}

/// Device related capabilities of an architecture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArchCapabilities {
    /// Devices are attached to a PCI root complex.
    pub pci_bus: bool,
    /// KVM accepts the `hint-dedicated` feature for pinned vCPUs.
    pub kvm_hint_dedicated: bool,
    /// PCIe expander buses can be used to align devices with guest NUMA nodes.
    pub pcie_expander_bus: bool,
}

// Indexed by `Arch as usize`.
static CAPABILITIES: [ArchCapabilities; 4] = [
    // amd64
    ArchCapabilities {
        pci_bus: true,
        kvm_hint_dedicated: true,
        pcie_expander_bus: true,
    },
    // arm64
    ArchCapabilities {
        pci_bus: true,
        kvm_hint_dedicated: false,
        pcie_expander_bus: true,
    },
    // ppc64le
    ArchCapabilities {
        pci_bus: true,
        kvm_hint_dedicated: false,
        pcie_expander_bus: false,
    },
    // s390x
    ArchCapabilities {
        pci_bus: false,
        kvm_hint_dedicated: false,
        pcie_expander_bus: false,
    },
];

impl Arch {
    pub fn capabilities(self) -> &'static ArchCapabilities {
        &CAPABILITIES[self as usize]
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Arch::Amd64 => "amd64",
            Arch::Arm64 => "arm64",
            Arch::Ppc64le => "ppc64le",
            Arch::S390x => "s390x",
        }
    }

    /// Architecture this crate was compiled for, defaulting to amd64.
    pub fn host() -> Self {
        if cfg!(target_arch = "aarch64") {
            Arch::Arm64
        } else if cfg!(target_arch = "powerpc64") {
            Arch::Ppc64le
        } else if cfg!(target_arch = "s390x") {
            Arch::S390x
        } else {
            Arch::Amd64
        }
    }
}

impl Default for Arch {
    fn default() -> Self {
        Arch::host()
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unknown architecture name.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("unsupported architecture {0:?}")]
pub struct UnknownArch(pub String);

impl FromStr for Arch {
    type Err = UnknownArch;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "amd64" | "x86_64" => Ok(Arch::Amd64),
            "arm64" | "aarch64" => Ok(Arch::Arm64),
            "ppc64le" => Ok(Arch::Ppc64le),
            "s390x" => Ok(Arch::S390x),
            _ => Err(UnknownArch(s.to_string())),
        }
    }
}

impl TryFrom<String> for Arch {
    type Error = UnknownArch;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Arch> for String {
    fn from(arch: Arch) -> Self {
        arch.as_str().to_string()
    }
}
