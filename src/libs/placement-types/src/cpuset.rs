// Copyright (c) 2019-2022 Alibaba Cloud
// Copyright (c) 2019-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

//! Host CPU lists.
//!
//! The kernel reports CPU lists as comma separated ids and ranges
//! (`0-3,8,10-11`), the domain descriptor expects plain comma separated ids.

/// Errors raised while parsing a CPU list.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum CpuListError {
    /// An entry is not a CPU id.
    #[error("invalid cpu id {0:?} in cpu list")]
    InvalidId(String),

    /// A range whose end is smaller than its start.
    #[error("invalid cpu range {0:?} in cpu list")]
    InvalidRange(String),
}

/// Parse a kernel style cpu list, keeping the order of the entries.
///
/// Surrounding whitespace and empty entries are ignored, so the content of a
/// sysfs file can be passed in as read.
pub fn parse_cpu_list(list: &str) -> Result<Vec<u32>, CpuListError> {
    let mut cpus = Vec::new();

    for entry in list.trim().split(',').map(str::trim) {
        if entry.is_empty() {
            continue;
        }

        match entry.split_once('-') {
            Some((start, end)) => {
                let start = parse_cpu_id(start)?;
                let end = parse_cpu_id(end)?;
                if end < start {
                    return Err(CpuListError::InvalidRange(entry.to_string()));
                }
                cpus.extend(start..=end);
            }
            None => cpus.push(parse_cpu_id(entry)?),
        }
    }

    Ok(cpus)
}

fn parse_cpu_id(id: &str) -> Result<u32, CpuListError> {
    id.trim()
        .parse::<u32>()
        .map_err(|_| CpuListError::InvalidId(id.to_string()))
}

/// Format cpu ids as a comma separated list, e.g. `5,6,7`.
pub fn format_cpu_list(cpus: &[u32]) -> String {
    cpus.iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
