//! Centralized path configuration for hostpci.
//!
//! Host locations (sysfs, Proxmox guest configs) and the tool's own config
//! directory are resolved here so the CLI and tests agree on them.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

const CONFIG_DIR_ENV: &str = "HOSTPCI_CONFIG_DIR";
const SYSTEM_CONFIG_DIR: &str = "/etc/hostpci";

/// Default sysfs root for PCI devices and drivers.
pub const DEFAULT_SYSFS_PCI_ROOT: &str = "/sys/bus/pci";

/// Default directory holding `<vmid>.conf` guest records.
pub const DEFAULT_GUEST_CONFIG_DIR: &str = "/etc/pve/qemu-server";

/// Get the hostpci configuration directory.
///
/// Resolution order:
/// 1. `HOSTPCI_CONFIG_DIR` environment variable
/// 2. `/etc/hostpci` if it exists (system install)
/// 3. `~/.config/hostpci` for user installs
pub fn config_dir() -> PathBuf {
    resolve_config_dir(std::env::var_os(CONFIG_DIR_ENV), Path::new(SYSTEM_CONFIG_DIR))
}

fn resolve_config_dir(env_dir: Option<OsString>, system_dir: &Path) -> PathBuf {
    if let Some(dir) = env_dir.filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }

    if system_dir.exists() {
        return system_dir.to_path_buf();
    }

    dirs::config_dir().map(|c| c.join("hostpci")).unwrap_or_else(|| system_dir.to_path_buf())
}

/// Get the configuration file path.
pub fn config_file() -> PathBuf {
    config_dir().join("config.json")
}

/// Check whether the current process runs as root.
///
/// Driver rebinding and guest config writes need root on a real host.
pub fn is_root() -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::geteuid() == 0 }
    }
    #[cfg(not(unix))]
    {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    #[test]
    fn test_env_dir_wins() {
        let system = TempDir::new().unwrap();
        let dir = resolve_config_dir(Some("/tmp/hostpci-test".into()), system.path());
        assert_eq!(dir, PathBuf::from("/tmp/hostpci-test"));
    }

    #[test]
    fn test_existing_system_dir() {
        let system = TempDir::new().unwrap();
        assert_eq!(resolve_config_dir(None, system.path()), system.path());
        assert_eq!(resolve_config_dir(Some("".into()), system.path()), system.path());
    }

    #[test]
    fn test_missing_system_dir_falls_back_to_user_dir() {
        let system = TempDir::new().unwrap();
        let missing = system.path().join("absent");
        let dir = resolve_config_dir(None, &missing);
        match dirs::config_dir() {
            Some(user) => assert_eq!(dir, user.join("hostpci")),
            None => assert_eq!(dir, missing),
        }
    }
}
