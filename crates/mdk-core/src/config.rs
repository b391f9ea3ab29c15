//! Tool configuration.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::backend::InterfaceFilter;

/// Default broadcast buffer of the device event hub.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Configuration shared by the discovery hub and the CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Transports to enumerate and watch.
    pub interface: InterfaceFilter,
    /// Events buffered per subscriber before a slow one starts skipping.
    pub event_capacity: usize,
    /// Developer disk image used by `mount-image` when none is given.
    pub developer_disk_image: Option<PathBuf>,
    /// Detached signature of the developer disk image.
    pub developer_disk_image_signature: Option<PathBuf>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            interface: InterfaceFilter::Any,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            developer_disk_image: None,
            developer_disk_image_signature: None,
        }
    }
}

impl ToolConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ToolConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
