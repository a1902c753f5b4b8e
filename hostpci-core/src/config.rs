//! Configuration management.

use crate::binder::is_valid_driver_name;
use crate::error::{HostpciError, Result};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable holding the Proxmox API password.
///
/// The password is never stored in the config file.
pub const PASSWORD_ENV: &str = "HOSTPCI_PVE_PASSWORD";

/// Persistent configuration for hostpci.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    /// Kernel driver that takes ownership of passthrough devices.
    pub passthrough_driver: String,
    /// Root of the PCI sysfs tree (`/sys/bus/pci`).
    pub sysfs_pci_root: String,
    /// Directory of `<vmid>.conf` guest records.
    pub guest_config_dir: String,
    pub lspci_program: String,
    pub qm_program: String,
    /// Re-read the driver link after binding and fail if it does not match.
    pub verify_binding: bool,
    pub api: ApiConfig,
}

/// Proxmox VE API settings used by the guest inventory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    /// API host; empty means the local node.
    pub host: String,
    pub port: u16,
    pub node: String,
    pub user: String,
    /// API token in `USER@REALM!TOKENID=SECRET` form. Takes precedence over password auth.
    pub token: Option<String>,
    pub verify_tls: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            passthrough_driver: "vfio-pci".to_string(),
            sysfs_pci_root: paths::DEFAULT_SYSFS_PCI_ROOT.to_string(),
            guest_config_dir: paths::DEFAULT_GUEST_CONFIG_DIR.to_string(),
            lspci_program: "lspci".to_string(),
            qm_program: "qm".to_string(),
            verify_binding: false,
            api: ApiConfig::default(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 8006,
            node: "pve".to_string(),
            user: "root@pam".to_string(),
            token: None,
            verify_tls: false,
        }
    }
}

impl Config {
    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        paths::config_file()
    }

    /// Load configuration from the default location.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults when it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| HostpciError::InvalidConfig {
            reason: format!("Failed to read config {}: {}", path.display(), e),
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            HostpciError::InvalidConfig { reason: format!("Failed to parse config: {}", e) }
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| HostpciError::IoError { path: parent.to_path_buf(), source: e })?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            HostpciError::InvalidConfig { reason: format!("Failed to serialize config: {}", e) }
        })?;
        std::fs::write(path, content)
            .map_err(|e| HostpciError::IoError { path: path.to_path_buf(), source: e })
    }

    fn validate(&self) -> Result<()> {
        if !is_valid_driver_name(&self.passthrough_driver) {
            return Err(HostpciError::InvalidConfig {
                reason: format!("Invalid passthrough driver name: {:?}", self.passthrough_driver),
            });
        }
        if self.api.node.trim().is_empty() {
            return Err(HostpciError::InvalidConfig {
                reason: "api.node must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Proxmox API password from the environment, if set.
    pub fn api_password() -> Option<String> {
        std::env::var(PASSWORD_ENV).ok().filter(|p| !p.is_empty())
    }
}
