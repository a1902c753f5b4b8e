//! Error types for hostpci.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error chains.
//! Errors raised after a device has been touched carry the PCI address, the guest
//! (where one is involved) and the step that failed, since recovering from them
//! usually needs an operator at the host.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::guest_config::GuestId;

/// Result type alias for hostpci operations.
pub type Result<T> = std::result::Result<T, HostpciError>;

/// Step of the driver rebind sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindStep {
    /// Detach from the currently bound driver.
    Unbind,
    /// Load the pass-through driver module.
    LoadModule,
    /// Attach to the pass-through driver.
    Bind,
    /// Optional read-back of the driver link after binding.
    Verify,
    /// Attach to a host driver (or reprobe) when releasing a device.
    Reprobe,
}

impl fmt::Display for BindStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unbind => "unbind",
            Self::LoadModule => "load-module",
            Self::Bind => "bind",
            Self::Verify => "verify",
            Self::Reprobe => "reprobe",
        };
        f.write_str(s)
    }
}

/// Step of a guest configuration mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigStep {
    /// Reading the persisted record.
    Read,
    /// Writing the persisted record.
    Persist,
    /// Mirroring the change to the running guest.
    LiveApply,
}

impl fmt::Display for ConfigStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Read => "read",
            Self::Persist => "persist",
            Self::LiveApply => "live-apply",
        };
        f.write_str(s)
    }
}

/// Main error type for hostpci.
#[derive(Error, Debug)]
pub enum HostpciError {
    // Validation errors
    #[error("Invalid PCI identifier: {identifier}. {reason}")]
    InvalidIdentifier { identifier: String, reason: String },

    #[error("PCI query unavailable: {reason}")]
    QueryUnavailable { reason: String },

    // Binding errors
    #[error("Failed to unbind {pci_address} from {driver}: {reason} (device is still on {driver})")]
    UnbindFailed { pci_address: String, driver: String, reason: String },

    #[error(
        "Binding of {pci_address} interrupted at step '{step}': {reason}. \
         The device may have no driver bound; manual recovery is required"
    )]
    BindingInterrupted { pci_address: String, step: BindStep, reason: String },

    // Guest configuration errors
    #[error(
        "Configuration of guest {guest_id} failed at step '{step}' for device {pci_address}: \
         {reason} (persisted record intact: {record_intact})"
    )]
    ConfigWriteFailure {
        guest_id: GuestId,
        pci_address: String,
        step: ConfigStep,
        reason: String,
        record_intact: bool,
    },

    #[error("Guest {guest_id} already has a passthrough device ({existing}); remove it first")]
    DuplicateAssignment { guest_id: GuestId, existing: String },

    #[error("Guest not found: {guest_id} (no configuration at {path:?})")]
    GuestNotFound { guest_id: GuestId, path: PathBuf },

    // Host command errors
    #[error("Command `{command}` failed: {reason}")]
    CommandFailed { command: String, reason: String },

    // File system errors
    #[error("I/O error at {path:?}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Hypervisor API errors
    #[error("API error: {message}")]
    ApiError { message: String },

    // Configuration errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HostpciError {
    /// True when the host may have been left in a state that needs manual repair.
    pub fn needs_operator(&self) -> bool {
        matches!(
            self,
            Self::BindingInterrupted { .. } | Self::ConfigWriteFailure { record_intact: false, .. }
        )
    }
}
