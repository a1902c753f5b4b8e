//! Driver rebinding between the host driver and the pass-through driver.
//!
//! Binding is a three-step sysfs protocol:
//!
//! 1. Unbind from the current driver (`devices/<addr>/driver/unbind`)
//! 2. Load the pass-through driver module
//! 3. Bind to the pass-through driver (`drivers/<driver>/bind`)
//!
//! A failure in step 1 leaves the device on its original driver. A failure in
//! step 2 or 3 leaves it with no driver at all; that is reported as
//! [`HostpciError::BindingInterrupted`] and never retried or rolled back.

use crate::error::{BindStep, HostpciError, Result};
use crate::host::{ControlPath, HostDriverController};
use crate::validate::ValidatedAddress;
use tracing::{debug, info, warn};

/// VFIO-PCI driver name.
pub const VFIO_PCI_DRIVER: &str = "vfio-pci";

/// True when `name` can be a kernel driver directory under `drivers/`.
pub fn is_valid_driver_name(name: &str) -> bool {
    !matches!(name, "" | "." | "..")
        && !name.contains(|c: char| c == '/' || c == '\0' || c.is_whitespace())
}

/// Options for device binding operations.
#[derive(Debug, Clone)]
pub struct BindOptions {
    /// Driver that takes ownership of passthrough devices.
    pub passthrough_driver: String,

    /// Re-read the driver link after each rebind and fail on mismatch.
    pub verify_binding: bool,
}

impl Default for BindOptions {
    fn default() -> Self {
        Self { passthrough_driver: VFIO_PCI_DRIVER.to_string(), verify_binding: false }
    }
}

/// Result of moving a device to the pass-through driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindReport {
    pub pci_address: String,
    /// Driver bound before the operation.
    pub previous_driver: Option<String>,
    pub driver: String,
    /// The device was already on the pass-through driver; nothing was written.
    pub already_bound: bool,
    /// The final driver was read back and matched.
    pub verified: bool,
}

/// Result of handing a device back to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseReport {
    pub pci_address: String,
    pub previous_driver: Option<String>,
    /// Driver read back after the release, when verification is enabled.
    pub driver: Option<String>,
    /// The device was not on the pass-through driver; nothing was written.
    pub not_owned: bool,
}

/// Moves devices between drivers through a [`HostDriverController`].
pub struct DriverBinder<H> {
    host: H,
    options: BindOptions,
}

impl<H: HostDriverController> DriverBinder<H> {
    pub fn new(host: H, options: BindOptions) -> Self {
        Self { host, options }
    }

    /// Detach `addr` from its driver and attach it to the pass-through driver.
    pub fn unbind_and_rebind(&self, addr: &ValidatedAddress) -> Result<BindReport> {
        let target = self.options.passthrough_driver.as_str();
        let previous = self.host.current_driver(addr.as_str());

        if previous.as_deref() == Some(target) {
            debug!(address = %addr, driver = %target, "Device already bound to pass-through driver");
            return Ok(BindReport {
                pci_address: addr.to_string(),
                previous_driver: previous,
                driver: target.to_string(),
                already_bound: true,
                verified: false,
            });
        }

        info!(address = %addr, from = ?previous, to = %target, "Rebinding device");

        // Step 1: unbind from the current driver
        match &previous {
            Some(current) => {
                let unbind = ControlPath::DeviceUnbind { address: addr.to_string() };
                self.host.write_control(&unbind, addr.as_str()).map_err(|e| {
                    HostpciError::UnbindFailed {
                        pci_address: addr.to_string(),
                        driver: current.clone(),
                        reason: e.to_string(),
                    }
                })?;
                debug!(address = %addr, driver = %current, "Unbound from driver");
            }
            None => debug!(address = %addr, "No driver bound, skipping unbind"),
        }

        // Step 2: make sure the pass-through driver exists
        self.host.load_module(target).map_err(|e| {
            warn!(address = %addr, driver = %target, error = %e, "Device left without a driver");
            HostpciError::BindingInterrupted {
                pci_address: addr.to_string(),
                step: BindStep::LoadModule,
                reason: e.to_string(),
            }
        })?;

        // Step 3: bind to the pass-through driver
        let bind = ControlPath::DriverBind { driver: target.to_string() };
        self.host.write_control(&bind, addr.as_str()).map_err(|e| {
            warn!(address = %addr, driver = %target, error = %e, "Device left without a driver");
            HostpciError::BindingInterrupted {
                pci_address: addr.to_string(),
                step: BindStep::Bind,
                reason: e.to_string(),
            }
        })?;

        let verified = if self.options.verify_binding {
            let now = self.host.current_driver(addr.as_str());
            if now.as_deref() != Some(target) {
                return Err(HostpciError::BindingInterrupted {
                    pci_address: addr.to_string(),
                    step: BindStep::Verify,
                    reason: format!("driver is {:?} after bind, expected {}", now, target),
                });
            }
            true
        } else {
            false
        };

        info!(address = %addr, driver = %target, verified, "Device bound to pass-through driver");

        Ok(BindReport {
            pci_address: addr.to_string(),
            previous_driver: previous,
            driver: target.to_string(),
            already_bound: false,
            verified,
        })
    }

    /// Hand `addr` back to the host.
    ///
    /// With `host_driver` the device is bound to that driver explicitly;
    /// otherwise the kernel reprobes it and picks its native driver.
    pub fn release_to_host(
        &self,
        addr: &ValidatedAddress,
        host_driver: Option<&str>,
    ) -> Result<ReleaseReport> {
        if let Some(driver) = host_driver.filter(|d| !is_valid_driver_name(d)) {
            warn!(address = %addr, driver = %driver, "Invalid host driver name");
            return Err(HostpciError::InvalidIdentifier {
                identifier: driver.to_string(),
                reason: "not a kernel driver name".to_string(),
            });
        }

        let passthrough = self.options.passthrough_driver.as_str();
        let previous = self.host.current_driver(addr.as_str());

        if let Some(current) = previous.as_deref().filter(|d| *d != passthrough) {
            debug!(address = %addr, driver = %current, "Device not owned by pass-through driver");
            return Ok(ReleaseReport {
                pci_address: addr.to_string(),
                previous_driver: previous.clone(),
                driver: previous,
                not_owned: true,
            });
        }

        info!(address = %addr, to = ?host_driver, "Releasing device to host");

        if previous.is_some() {
            let unbind = ControlPath::DeviceUnbind { address: addr.to_string() };
            self.host.write_control(&unbind, addr.as_str()).map_err(|e| {
                HostpciError::UnbindFailed {
                    pci_address: addr.to_string(),
                    driver: passthrough.to_string(),
                    reason: e.to_string(),
                }
            })?;
        }

        let reprobe = match host_driver {
            Some(driver) => ControlPath::DriverBind { driver: driver.to_string() },
            None => ControlPath::DriversProbe,
        };
        self.host.write_control(&reprobe, addr.as_str()).map_err(|e| {
            HostpciError::BindingInterrupted {
                pci_address: addr.to_string(),
                step: BindStep::Reprobe,
                reason: e.to_string(),
            }
        })?;

        let driver = if self.options.verify_binding {
            let now = self.host.current_driver(addr.as_str());
            let settled = match (host_driver, now.as_deref()) {
                (Some(expected), Some(actual)) => expected == actual,
                (None, Some(actual)) => actual != passthrough,
                (_, None) => false,
            };
            if !settled {
                return Err(HostpciError::BindingInterrupted {
                    pci_address: addr.to_string(),
                    step: BindStep::Verify,
                    reason: format!("driver is {:?} after release", now),
                });
            }
            now
        } else {
            None
        };

        info!(address = %addr, driver = ?driver, "Device released to host");

        Ok(ReleaseReport {
            pci_address: addr.to_string(),
            previous_driver: previous,
            driver,
            not_owned: false,
        })
    }
}
