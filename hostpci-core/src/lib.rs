//! hostpci core library
//!
//! GPU passthrough assignment for a hypervisor host: PCI inventory, identifier
//! validation, vfio-pci driver rebinding and guest configuration changes.

pub mod binder;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod guest_config;
pub mod guests;
pub mod host;
pub mod inventory;
pub mod observability;
pub mod paths;
pub mod validate;

// Re-export commonly used items
pub use binder::{BindOptions, BindReport, DriverBinder, ReleaseReport};
pub use config::Config;
pub use coordinator::{AssignState, Assignment, AssignmentCoordinator};
pub use error::{BindStep, ConfigStep, HostpciError, Result};
pub use guest_config::{GuestConfig, GuestConfigStore, GuestId, Removal, PASSTHROUGH_KEY};
pub use guests::{Guest, GuestInventory, GuestStatus, ProxmoxApi};
pub use host::{ControlPath, GuestRuntime, HostDriverController, LiveChange, QmRuntime, SystemHost};
pub use inventory::{list_gpu_devices, DeviceClass, GpuInventory, GpuListing, GpuVendor, PciDevice};
pub use validate::{ValidatedAddress, Validator};
