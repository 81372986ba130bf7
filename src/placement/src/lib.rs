// Copyright (c) 2019-2022 Alibaba Cloud
// Copyright (c) 2019-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

//! Placement of virtual resources of a domain onto the host.
//!
//! Given a snapshot of the host topology, the cpus granted to a VM and the VM
//! request, this crate pins vCPUs and IOThreads to host cpus, derives the
//! guest NUMA layout, assigns PCI addresses and names disks. Every call builds
//! its state from scratch; nothing is kept between calls.

#[macro_use]
extern crate slog;

logging::logger_with_subsystem!(sl, "placement");

mod domain;
pub mod error;
pub mod iothread;
pub mod naming;
pub mod numa;
pub mod pci;
pub mod sysfs;
pub mod vcpu;

pub use domain::{place_domain, DomainPlacement, PlacementContext};
pub use error::{ErrorKind, PlacementError, Result};
