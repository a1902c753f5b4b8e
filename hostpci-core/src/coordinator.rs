//! Assignment coordinator.
//!
//! Orchestrates validation, driver rebinding and guest configuration changes.
//! Each operation is a short state machine with no persisted state of its own:
//!
//! ```text
//! Assign:  Start -> Validated -> Bound -> Configured -> Done
//!            \-> Rejected (invalid identifier or guest already has a device)
//! Remove:  Start -> Removed | NothingToRemove
//! Unbind:  Start -> Validated -> Rebound  |  Start -> Rejected
//! Release: Start -> Validated -> Released |  Start -> Rejected
//! ```
//!
//! Assign is not transactional. If the configuration step fails after a
//! successful bind, the device stays on the pass-through driver without an
//! owning guest and the error says so.

use crate::binder::{BindOptions, BindReport, DriverBinder, ReleaseReport};
use crate::config::Config;
use crate::error::{HostpciError, Result};
use crate::guest_config::{GuestConfigStore, GuestId, Removal};
use crate::host::{GuestRuntime, HostDriverController, QmRuntime, SystemHost};
use crate::inventory::{list_gpu_devices, GpuInventory};
use crate::validate::{ValidatedAddress, Validator};
use std::fmt;
use tracing::{debug, error, info, warn};

/// States of an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignState {
    Start,
    Validated,
    Bound,
    Configured,
    Done,
    Rejected,
}

impl fmt::Display for AssignState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Start => "start",
            Self::Validated => "validated",
            Self::Bound => "bound",
            Self::Configured => "configured",
            Self::Done => "done",
            Self::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// Successful assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub guest_id: GuestId,
    pub pci_address: String,
    pub bind: BindReport,
}

/// Drives device assignment against injected host capabilities.
pub struct AssignmentCoordinator<H, R> {
    host: H,
    store: GuestConfigStore<R>,
    options: BindOptions,
}

impl AssignmentCoordinator<SystemHost, QmRuntime> {
    /// Coordinator for the local host.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            SystemHost::from_config(config),
            GuestConfigStore::new(&config.guest_config_dir, QmRuntime::new(&config.qm_program)),
            BindOptions {
                passthrough_driver: config.passthrough_driver.clone(),
                verify_binding: config.verify_binding,
            },
        )
    }
}

impl<H: HostDriverController, R: GuestRuntime> AssignmentCoordinator<H, R> {
    pub fn new(host: H, store: GuestConfigStore<R>, options: BindOptions) -> Self {
        Self { host, store, options }
    }

    fn validator(&self) -> Validator<&H> {
        Validator::new(&self.host)
    }

    fn binder(&self) -> DriverBinder<&H> {
        DriverBinder::new(&self.host, self.options.clone())
    }

    /// Current GPU inventory.
    pub fn list_gpus(&self) -> GpuInventory<'_, H> {
        list_gpu_devices(&self.host)
    }

    /// Check an identifier against the live PCI listing.
    pub fn validate(&self, identifier: &str) -> bool {
        self.validator().validate(identifier)
    }

    /// Bind `identifier` to the pass-through driver and attach it to `guest`.
    pub fn assign(&self, guest: GuestId, identifier: &str) -> Result<Assignment> {
        let mut state = AssignState::Start;
        debug!(guest = %guest, identifier = %identifier, state = %state, "Assign requested");

        let addr = match self.admit(guest, identifier) {
            Ok(addr) => addr,
            Err(e) => {
                state = AssignState::Rejected;
                warn!(
                    guest = %guest,
                    identifier = %identifier,
                    state = %state,
                    error = %e,
                    "Assign rejected"
                );
                return Err(e);
            }
        };
        state = advance(state, AssignState::Validated, guest, &addr);

        let bind = self.binder().unbind_and_rebind(&addr).map_err(|e| {
            error!(guest = %guest, address = %addr, state = %state, error = %e, "Binding failed");
            e
        })?;
        state = advance(state, AssignState::Bound, guest, &addr);

        self.store.append_passthrough_entry(guest, &addr).map_err(|e| {
            error!(
                guest = %guest,
                address = %addr,
                state = %state,
                error = %e,
                "Device is bound to the pass-through driver but not attached to any guest"
            );
            e
        })?;
        state = advance(state, AssignState::Configured, guest, &addr);
        advance(state, AssignState::Done, guest, &addr);

        info!(guest = %guest, address = %addr, "Device assigned");
        Ok(Assignment { guest_id: guest, pci_address: addr.to_string(), bind })
    }

    /// Validation gate for assign: the device exists and the guest slot is free.
    fn admit(&self, guest: GuestId, identifier: &str) -> Result<ValidatedAddress> {
        let addr = self.validator().require(identifier)?;

        let config = self.store.read(guest)?;
        if let Some(existing) = config.passthrough_entry() {
            return Err(HostpciError::DuplicateAssignment {
                guest_id: guest,
                existing: existing.to_string(),
            });
        }
        Ok(addr)
    }

    /// Detach the passthrough device from `guest`.
    ///
    /// The device stays on the pass-through driver; use [`Self::release`] to
    /// hand it back to the host.
    pub fn remove(&self, guest: GuestId) -> Result<Removal> {
        debug!(guest = %guest, "Remove requested");
        let removal = self.store.remove_passthrough_entry(guest)?;
        match &removal {
            Removal::Removed { value } => info!(guest = %guest, value = %value, "Device removed"),
            Removal::NotPresent => info!(guest = %guest, "No device assigned, nothing to remove"),
        }
        Ok(removal)
    }

    /// Move a device to the pass-through driver without touching any guest.
    pub fn unbind(&self, identifier: &str) -> Result<BindReport> {
        debug!(identifier = %identifier, "Unbind requested");
        let addr = self.validator().require(identifier)?;
        let report = self.binder().unbind_and_rebind(&addr)?;
        debug!(address = %addr, "Device rebound");
        Ok(report)
    }

    /// Return a device from the pass-through driver to a host driver.
    pub fn release(&self, identifier: &str, host_driver: Option<&str>) -> Result<ReleaseReport> {
        debug!(identifier = %identifier, driver = ?host_driver, "Release requested");
        let addr = self.validator().require(identifier)?;
        self.binder().release_to_host(&addr, host_driver)
    }
}

fn advance(
    from: AssignState,
    to: AssignState,
    guest: GuestId,
    addr: &ValidatedAddress,
) -> AssignState {
    debug!(guest = %guest, address = %addr, from = %from, to = %to, "Assign state change");
    to
}
