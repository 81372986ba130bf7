// Copyright (c) 2019-2022 Alibaba Cloud
// Copyright (c) 2019-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

/// Highest bus number an expander bus may take by default.
pub const DEFAULT_MAX_EXPANDER_BUS_NR: u32 = 0xfe;
/// Default mount point of sysfs.
pub const DEFAULT_SYSFS_ROOT: &str = "/sys";
/// Default log level name.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// PCI related settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PciConfig {
    /// Ceiling expander bus numbers are counted down from.
    pub max_expander_bus_nr: u32,
}

impl Default for PciConfig {
    fn default() -> Self {
        PciConfig {
            max_expander_bus_nr: DEFAULT_MAX_EXPANDER_BUS_NR,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SysfsConfig {
    pub root: PathBuf,
}

impl Default for SysfsConfig {
    fn default() -> Self {
        SysfsConfig {
            root: PathBuf::from(DEFAULT_SYSFS_ROOT),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl LogConfig {
    /// The configured level as a slog level.
    pub fn slog_level(&self) -> Result<slog::Level> {
        logging::level_name_to_slog_level(&self.level).map_err(|e| anyhow!(e))
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

/// Configuration of the placement core.
///
/// ```toml
/// [pci]
/// max_expander_bus_nr = 254
///
/// [sysfs]
/// root = "/sys"
///
/// [log]
/// level = "info"
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PlacementConfig {
    pub pci: PciConfig,
    pub sysfs: SysfsConfig,
    pub log: LogConfig,
}

impl PlacementConfig {
    /// Parse and validate a configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: PlacementConfig =
            toml::from_str(content).context("parse placement configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("read placement configuration {}", path.display()))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("load placement configuration {}", path.display()))?;
        info!(sl!(), "loaded placement configuration"; "path" => path.display().to_string());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pci.max_expander_bus_nr == 0 || self.pci.max_expander_bus_nr > 0xff {
            return Err(anyhow!(
                "invalid max_expander_bus_nr {:#x}, must be within 0x1..=0xff",
                self.pci.max_expander_bus_nr
            ));
        }
        self.log.slog_level()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = PlacementConfig::from_toml_str("").unwrap();
        assert_eq!(config, PlacementConfig::default());
        assert_eq!(config.pci.max_expander_bus_nr, 0xfe);
        assert_eq!(config.sysfs.root, PathBuf::from("/sys"));
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_partial_config() {
        let config = PlacementConfig::from_toml_str(
            r#"
            [pci]
            max_expander_bus_nr = 128

            [log]
            level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.pci.max_expander_bus_nr, 128);
        assert_eq!(config.sysfs.root, PathBuf::from("/sys"));
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.slog_level().unwrap(), slog::Level::Debug);
    }

    #[test]
    fn test_invalid_config() {
        assert!(PlacementConfig::from_toml_str("[pci]\nmax_expander_bus_nr = 0").is_err());
        assert!(PlacementConfig::from_toml_str("[pci]\nmax_expander_bus_nr = 256").is_err());
        assert!(PlacementConfig::from_toml_str("[log]\nlevel = \"loud\"").is_err());
        assert!(PlacementConfig::from_toml_str("[log]\nlevel = \"warning\"").is_err());
        assert!(PlacementConfig::from_toml_str("[log]\nlevel = \"warn\"").is_ok());
        assert!(PlacementConfig::from_toml_str("[pci\n").is_err());
    }

    #[test]
    fn test_load_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sysfs]\nroot = \"/tmp/fake-sys\"").unwrap();

        let config = PlacementConfig::load(file.path()).unwrap();
        assert_eq!(config.sysfs.root, PathBuf::from("/tmp/fake-sys"));

        let missing = file.path().with_extension("missing");
        assert!(PlacementConfig::load(&missing).is_err());
    }
}
