//! Real host access through sysfs and host commands.

use super::{ControlPath, HostDriverController};
use crate::config::Config;
use crate::error::{HostpciError, Result};
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, warn};

/// Host controller backed by `lspci`, `modprobe` and the PCI sysfs tree.
#[derive(Debug, Clone)]
pub struct SystemHost {
    sysfs_root: PathBuf,
    lspci_program: String,
}

impl SystemHost {
    pub fn new(sysfs_root: impl Into<PathBuf>, lspci_program: impl Into<String>) -> Self {
        Self { sysfs_root: sysfs_root.into(), lspci_program: lspci_program.into() }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.sysfs_pci_root, &config.lspci_program)
    }
}

impl HostDriverController for SystemHost {
    fn pci_listing(&self) -> Result<String> {
        run_command(&self.lspci_program, &["-Dnn"])
    }

    fn current_driver(&self, address: &str) -> Option<String> {
        let driver_link = self.sysfs_root.join("devices").join(address).join("driver");
        fs::read_link(&driver_link)
            .ok()
            .and_then(|target| target.file_name().map(|n| n.to_string_lossy().to_string()))
    }

    fn write_control(&self, path: &ControlPath, value: &str) -> Result<()> {
        let full = self.sysfs_root.join(path.relative());
        debug!(path = %full.display(), value = %value, "Writing sysfs control file");
        fs::write(&full, value).map_err(|e| HostpciError::IoError { path: full, source: e })
    }

    fn load_module(&self, driver: &str) -> Result<()> {
        let driver_path = self.sysfs_root.join("drivers").join(driver);
        if driver_path.exists() {
            debug!(driver = %driver, "Driver already registered, skipping modprobe");
            return Ok(());
        }

        let module = driver.replace('-', "_");
        run_command("modprobe", &[&module])?;

        if !driver_path.exists() {
            warn!(driver = %driver, "modprobe succeeded but driver is not registered");
            return Err(HostpciError::CommandFailed {
                command: format!("modprobe {}", module),
                reason: format!(
                    "driver {} not present at {} after loading",
                    driver,
                    driver_path.display()
                ),
            });
        }
        Ok(())
    }
}

/// Run a host command and return its stdout.
pub(crate) fn run_command(program: &str, args: &[&str]) -> Result<String> {
    let command_line =
        std::iter::once(program).chain(args.iter().copied()).collect::<Vec<_>>().join(" ");
    debug!(command = %command_line, "Running host command");

    let output = Command::new(program).args(args).output().map_err(|e| {
        HostpciError::CommandFailed { command: command_line.clone(), reason: e.to_string() }
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(HostpciError::CommandFailed {
            command: command_line,
            reason: if stderr.is_empty() { output.status.to_string() } else { stderr },
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
