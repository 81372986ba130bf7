// Copyright (c) 2019-2022 Alibaba Cloud
// Copyright (c) 2019-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

use std::convert::TryFrom;

use byte_unit::Byte;

/// Errors raised while parsing a memory size.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SizeError {
    /// Not a size understood by the parser.
    #[error("invalid memory size {0:?}")]
    Invalid(String),

    /// The size does not fit into 64 bits.
    #[error("memory size {0:?} is too large")]
    TooLarge(String),
}

/// Parse a memory size such as `2Mi`, `1Gi`, `2MiB` or `2097152` into bytes.
///
/// Quantities using the binary suffixes of Kubernetes (`Ki`, `Mi`, `Gi`, ...)
/// are accepted in addition to the units understood by byte-unit.
pub fn parse_size(size: &str) -> Result<u64, SizeError> {
    let trimmed = size.trim();
    if trimmed.is_empty() {
        return Err(SizeError::Invalid(size.to_string()));
    }

    let normalized = if trimmed.ends_with('i') {
        format!("{}B", trimmed)
    } else {
        trimmed.to_string()
    };

    let bytes = Byte::from_str(&normalized).map_err(|_| SizeError::Invalid(size.to_string()))?;
    u64::try_from(bytes.get_bytes()).map_err(|_| SizeError::TooLarge(size.to_string()))
}
