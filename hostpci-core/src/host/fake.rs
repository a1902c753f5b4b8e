//! In-memory host used by unit tests.

use super::{ControlPath, GuestRuntime, HostDriverController, LiveChange};
use crate::error::{HostpciError, Result};
use crate::guest_config::GuestId;
use std::cell::RefCell;
use std::collections::HashMap;

pub(crate) const LISTING: &str = "\
0000:00:02.0 VGA compatible controller [0300]: Intel Corporation UHD Graphics 630 [8086:3e92]
0000:00:1f.3 Audio device [0403]: Intel Corporation Cannon Lake PCH cAVS [8086:a348] (rev 10)
0000:01:00.0 VGA compatible controller [0300]: NVIDIA Corporation GA102 [GeForce RTX 3090] [10de:2204] (rev a1)
0000:01:00.1 Audio device [0403]: NVIDIA Corporation GA102 High Definition Audio Controller [10de:1aef] (rev a1)
0000:02:00.0 3D controller [0302]: NVIDIA Corporation GA100 [A100 PCIe 40GB] [10de:20f1] (rev a1)
";

/// Host operations observed by the fake, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HostOp {
    Write(ControlPath, String),
    LoadModule(String),
}

#[derive(Debug, Default)]
pub(crate) struct FakeHost {
    pub listing: Option<String>,
    pub drivers: RefCell<HashMap<String, String>>,
    pub ops: RefCell<Vec<HostOp>>,
    pub fail_write: Option<ControlPath>,
    pub fail_load: bool,
    /// Accept bind writes without changing the recorded driver.
    pub ignore_bind: bool,
}

impl FakeHost {
    pub fn new() -> Self {
        let mut drivers = HashMap::new();
        drivers.insert("0000:00:02.0".to_string(), "i915".to_string());
        drivers.insert("0000:01:00.0".to_string(), "nvidia".to_string());
        drivers.insert("0000:01:00.1".to_string(), "snd_hda_intel".to_string());
        Self { listing: Some(LISTING.to_string()), drivers: RefCell::new(drivers), ..Self::default() }
    }

    pub fn unavailable() -> Self {
        Self { listing: None, ..Self::new() }
    }

    pub fn ops(&self) -> Vec<HostOp> {
        self.ops.borrow().clone()
    }

    pub fn driver(&self, address: &str) -> Option<String> {
        self.drivers.borrow().get(address).cloned()
    }
}

impl HostDriverController for FakeHost {
    fn pci_listing(&self) -> Result<String> {
        self.listing
            .clone()
            .ok_or_else(|| HostpciError::CommandFailed {
                command: "lspci -Dnn".to_string(),
                reason: "not installed".to_string(),
            })
    }

    fn current_driver(&self, address: &str) -> Option<String> {
        self.driver(address)
    }

    fn write_control(&self, path: &ControlPath, value: &str) -> Result<()> {
        self.ops.borrow_mut().push(HostOp::Write(path.clone(), value.to_string()));
        if self.fail_write.as_ref() == Some(path) {
            return Err(HostpciError::Internal(format!("write to {} refused", path)));
        }

        let mut drivers = self.drivers.borrow_mut();
        match path {
            ControlPath::DeviceUnbind { address } => {
                drivers.remove(address);
            }
            ControlPath::DriverBind { driver } if !self.ignore_bind => {
                drivers.insert(value.to_string(), driver.clone());
            }
            ControlPath::DriverBind { .. } => {}
            ControlPath::DriversProbe => {
                drivers.insert(value.to_string(), "nvidia".to_string());
            }
        }
        Ok(())
    }

    fn load_module(&self, driver: &str) -> Result<()> {
        self.ops.borrow_mut().push(HostOp::LoadModule(driver.to_string()));
        if self.fail_load {
            return Err(HostpciError::CommandFailed {
                command: format!("modprobe {}", driver),
                reason: "module not found".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub(crate) struct FakeRuntime {
    pub applied: RefCell<Vec<(GuestId, LiveChange)>>,
    pub fail: bool,
}

impl FakeRuntime {
    pub fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }

    pub fn applied(&self) -> Vec<(GuestId, LiveChange)> {
        self.applied.borrow().clone()
    }
}

impl GuestRuntime for FakeRuntime {
    fn apply(&self, guest: GuestId, change: &LiveChange) -> Result<()> {
        self.applied.borrow_mut().push((guest, change.clone()));
        if self.fail {
            return Err(HostpciError::CommandFailed {
                command: format!("qm set {}", guest),
                reason: "VM is locked (backup)".to_string(),
            });
        }
        Ok(())
    }
}
