// Copyright (c) 2019-2022 Alibaba Cloud
// Copyright (c) 2019-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

//! Constants and data types shared by the domain placement components.
//!
//! Everything in here is an input snapshot handed over by the caller (host
//! topology, granted CPU set, the VM request, the device list of the domain
//! descriptor) or static knowledge about the target architecture.

#[macro_use]
extern crate slog;

// Convenience macro to obtain the scoped logger
#[macro_export]
macro_rules! sl {
    () => {
        slog_scope::logger()
    };
}

pub mod arch;
pub mod config;
pub mod cpuset;
pub mod device;
pub mod size;
pub mod topology;
pub mod vm;
