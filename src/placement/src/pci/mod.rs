// Copyright (c) 2019-2022 Alibaba Cloud
// Copyright (c) 2019-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

//! PCI address assignment.
//!
//! Two strategies are offered: flat placement of devices on the root complex,
//! and placement of host devices behind PCIe expander buses local to the guest
//! NUMA node matching their host NUMA node. When both are used the NUMA aware
//! one runs first, so that the created expander buses get root bus slots too.

mod numa_aligned;
mod root_complex;

pub use numa_aligned::{place_pci_devices_with_numa_alignment, ExpanderBus, ExpanderBusAssigner};
pub use root_complex::{place_pci_devices_on_root_complex, RootSlotAssigner};
