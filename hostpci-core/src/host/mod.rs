//! Host capabilities.
//!
//! Everything that touches global host state goes through two traits:
//!
//! - [`HostDriverController`]: PCI bus query, driver lookup, sysfs control
//!   writes and kernel module loading.
//! - [`GuestRuntime`]: live-apply of configuration changes to a guest through
//!   the hypervisor's management command.
//!
//! [`SystemHost`] and [`QmRuntime`] talk to the real host; tests substitute
//! recording fakes.

use crate::error::Result;
use crate::guest_config::GuestId;
use std::fmt;

mod qm;
mod system;

#[cfg(test)]
pub(crate) mod fake;

pub use qm::QmRuntime;
pub use system::SystemHost;

/// A write-only control file under the PCI sysfs root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlPath {
    /// `devices/<address>/driver/unbind`: detach from whatever driver owns the device.
    DeviceUnbind { address: String },
    /// `drivers/<driver>/bind`
    DriverBind { driver: String },
    /// `drivers_probe`: let the kernel pick a driver for the device.
    DriversProbe,
}

impl ControlPath {
    /// Path relative to the PCI sysfs root.
    pub fn relative(&self) -> String {
        match self {
            Self::DeviceUnbind { address } => format!("devices/{}/driver/unbind", address),
            Self::DriverBind { driver } => format!("drivers/{}/bind", driver),
            Self::DriversProbe => "drivers_probe".to_string(),
        }
    }
}

impl fmt::Display for ControlPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.relative())
    }
}

/// Access to host PCI state and driver control endpoints.
///
/// Writes are fire-and-forget: implementations report whether the write
/// itself succeeded, never whether the kernel acted on it.
pub trait HostDriverController {
    /// Raw, unfiltered PCI listing (`lspci -Dnn` format).
    fn pci_listing(&self) -> Result<String>;

    /// Driver currently bound to `address`, if any.
    fn current_driver(&self, address: &str) -> Option<String>;

    /// Write `value` to a control file.
    fn write_control(&self, path: &ControlPath, value: &str) -> Result<()>;

    /// Make sure the kernel module for `driver` is loaded.
    fn load_module(&self, driver: &str) -> Result<()>;
}

impl<T: HostDriverController + ?Sized> HostDriverController for &T {
    fn pci_listing(&self) -> Result<String> {
        (**self).pci_listing()
    }

    fn current_driver(&self, address: &str) -> Option<String> {
        (**self).current_driver(address)
    }

    fn write_control(&self, path: &ControlPath, value: &str) -> Result<()> {
        (**self).write_control(path, value)
    }

    fn load_module(&self, driver: &str) -> Result<()> {
        (**self).load_module(driver)
    }
}

/// A configuration change mirrored to a guest's runtime state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveChange {
    Set { key: String, value: String },
    Delete { key: String },
}

impl fmt::Display for LiveChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Set { key, value } => write!(f, "set {}={}", key, value),
            Self::Delete { key } => write!(f, "delete {}", key),
        }
    }
}

/// Applies configuration changes to a guest without a restart.
pub trait GuestRuntime {
    fn apply(&self, guest: GuestId, change: &LiveChange) -> Result<()>;
}

impl<T: GuestRuntime + ?Sized> GuestRuntime for &T {
    fn apply(&self, guest: GuestId, change: &LiveChange) -> Result<()> {
        (**self).apply(guest, change)
    }
}
