//! Integration tests for the passthrough assignment lifecycle.
//!
//! These tests drive the coordinator end to end:
//! - Validate a device against the PCI listing
//! - Assign it to a guest (rebind + config append + live-apply)
//! - Remove it from the guest
//!
//! A recording host stands in for sysfs and `qm`, and guest records live in a
//! temporary directory.

use hostpci_core::{
    AssignmentCoordinator, BindOptions, BindStep, ConfigStep, ControlPath, GuestConfigStore,
    GuestId, GuestRuntime, HostDriverController, HostpciError, LiveChange, Removal, Result,
    PASSTHROUGH_KEY,
};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use tempfile::TempDir;

const LISTING: &str = "\
0000:00:02.0 VGA compatible controller [0300]: Intel Corporation UHD Graphics 630 [8086:3e92]
0000:01:00.0 VGA compatible controller [0300]: NVIDIA Corporation AD102 [GeForce RTX 4090] [10de:2684] (rev a1)
0000:01:00.1 Audio device [0403]: NVIDIA Corporation AD102 High Definition Audio Controller [10de:22ba] (rev a1)
";

/// Every host interaction, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Listing,
    Write(String, String),
    Modprobe(String),
    Apply(u32, LiveChange),
}

/// Which step should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    None,
    Unbind,
    Modprobe,
    Bind,
    LiveApply,
}

/// Mock host (doesn't touch sysfs or run `qm`).
struct RecordingHost {
    events: RefCell<Vec<Event>>,
    drivers: RefCell<HashMap<String, String>>,
    fault: Fault,
}

impl RecordingHost {
    fn new(fault: Fault) -> Self {
        let drivers = HashMap::from([
            ("0000:00:02.0".to_string(), "i915".to_string()),
            ("0000:01:00.0".to_string(), "nvidia".to_string()),
        ]);
        Self { events: RefCell::new(Vec::new()), drivers: RefCell::new(drivers), fault }
    }

    fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    fn mutations(&self) -> Vec<Event> {
        self.events().into_iter().filter(|e| *e != Event::Listing).collect()
    }

    fn driver(&self, address: &str) -> Option<String> {
        self.drivers.borrow().get(address).cloned()
    }
}

impl HostDriverController for RecordingHost {
    fn pci_listing(&self) -> Result<String> {
        self.events.borrow_mut().push(Event::Listing);
        Ok(LISTING.to_string())
    }

    fn current_driver(&self, address: &str) -> Option<String> {
        self.driver(address)
    }

    fn write_control(&self, path: &ControlPath, value: &str) -> Result<()> {
        self.events.borrow_mut().push(Event::Write(path.relative(), value.to_string()));
        let refused = match path {
            ControlPath::DeviceUnbind { .. } => self.fault == Fault::Unbind,
            ControlPath::DriverBind { .. } => self.fault == Fault::Bind,
            ControlPath::DriversProbe => false,
        };
        if refused {
            return Err(HostpciError::Internal("Device or resource busy".to_string()));
        }
        match path {
            ControlPath::DeviceUnbind { address } => {
                self.drivers.borrow_mut().remove(address);
            }
            ControlPath::DriverBind { driver } => {
                self.drivers.borrow_mut().insert(value.to_string(), driver.clone());
            }
            ControlPath::DriversProbe => {}
        }
        Ok(())
    }

    fn load_module(&self, driver: &str) -> Result<()> {
        self.events.borrow_mut().push(Event::Modprobe(driver.to_string()));
        if self.fault == Fault::Modprobe {
            return Err(HostpciError::CommandFailed {
                command: format!("modprobe {}", driver),
                reason: "Module not found".to_string(),
            });
        }
        Ok(())
    }
}

impl GuestRuntime for RecordingHost {
    fn apply(&self, guest: GuestId, change: &LiveChange) -> Result<()> {
        self.events.borrow_mut().push(Event::Apply(guest.get(), change.clone()));
        if self.fault == Fault::LiveApply {
            return Err(HostpciError::CommandFailed {
                command: format!("qm set {}", guest),
                reason: "VM 101 is locked (migrate)".to_string(),
            });
        }
        Ok(())
    }
}

struct Fixture {
    dir: TempDir,
    host: RecordingHost,
}

impl Fixture {
    fn new(fault: Fault, conf: &str) -> Self {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("101.conf"), conf).unwrap();
        Self { dir, host: RecordingHost::new(fault) }
    }

    fn coordinator(&self) -> AssignmentCoordinator<&RecordingHost, &RecordingHost> {
        AssignmentCoordinator::new(
            &self.host,
            GuestConfigStore::new(self.dir.path(), &self.host),
            BindOptions::default(),
        )
    }

    fn conf(&self) -> String {
        fs::read_to_string(self.dir.path().join("101.conf")).unwrap()
    }
}

fn guest() -> GuestId {
    GuestId::new(101).unwrap()
}

const BASE_CONF: &str = "\
boot: order=scsi0;net0
cores: 8
machine: q35
memory: 32768
name: cuda-worker
scsi0: local-lvm:vm-101-disk-0,size=64G
";

#[test]
fn test_end_to_end_assign_and_remove() {
    let fixture = Fixture::new(Fault::None, BASE_CONF);
    let coordinator = fixture.coordinator();

    assert!(coordinator.validate("0000:01:00.0"));

    let assignment = coordinator.assign(guest(), "0000:01:00.0").unwrap();
    assert_eq!(assignment.pci_address, "0000:01:00.0");
    assert!(fixture.conf().lines().any(|l| l == "hostpci0: 0000:01:00.0,pcie=1"));
    assert_eq!(fixture.host.driver("0000:01:00.0").as_deref(), Some("vfio-pci"));

    let removal = coordinator.remove(guest()).unwrap();
    assert_eq!(removal, Removal::Removed { value: "0000:01:00.0,pcie=1".to_string() });
    assert!(!fixture.conf().contains(PASSTHROUGH_KEY));
    assert_eq!(fixture.conf(), BASE_CONF);
}

#[test]
fn test_validation_gate_blocks_all_mutation() {
    let fixture = Fixture::new(Fault::None, BASE_CONF);
    let coordinator = fixture.coordinator();

    for identifier in ["0000:03:00.0", "", "01:00", "10de:2684", "0000:01:00.0/../../x"] {
        assert!(!coordinator.validate(identifier), "{identifier:?} should be invalid");
        assert!(matches!(
            coordinator.assign(guest(), identifier),
            Err(HostpciError::InvalidIdentifier { .. })
        ));
        assert!(matches!(
            coordinator.unbind(identifier),
            Err(HostpciError::InvalidIdentifier { .. })
        ));
    }

    assert!(fixture.host.mutations().is_empty());
    assert_eq!(fixture.conf(), BASE_CONF);
}

#[test]
fn test_assign_writes_exactly_one_entry() {
    let fixture = Fixture::new(Fault::None, BASE_CONF);

    fixture.coordinator().assign(guest(), "0000:01:00.0").unwrap();

    let conf = fixture.conf();
    let entries: Vec<&str> = conf.lines().filter(|l| l.starts_with("hostpci0:")).collect();
    assert_eq!(entries, vec!["hostpci0: 0000:01:00.0,pcie=1"]);
}

#[test]
fn test_bind_order_and_live_apply_last() {
    let fixture = Fixture::new(Fault::None, BASE_CONF);

    fixture.coordinator().assign(guest(), "0000:01:00.0").unwrap();

    assert_eq!(
        fixture.host.mutations(),
        vec![
            Event::Write(
                "devices/0000:01:00.0/driver/unbind".to_string(),
                "0000:01:00.0".to_string()
            ),
            Event::Modprobe("vfio-pci".to_string()),
            Event::Write("drivers/vfio-pci/bind".to_string(), "0000:01:00.0".to_string()),
            Event::Apply(
                101,
                LiveChange::Set {
                    key: "hostpci0".to_string(),
                    value: "0000:01:00.0,pcie=1".to_string()
                }
            ),
        ]
    );
}

#[test]
fn test_validation_runs_before_every_mutation() {
    let fixture = Fixture::new(Fault::None, BASE_CONF);
    let coordinator = fixture.coordinator();

    coordinator.unbind("0000:01:00.0").unwrap();
    coordinator.release("0000:01:00.0", Some("nvidia")).unwrap();

    let events = fixture.host.events();
    assert_eq!(events[0], Event::Listing);
    let second_listing = events.iter().skip(1).position(|e| *e == Event::Listing).unwrap() + 1;
    assert!(events[1..second_listing].iter().all(|e| *e != Event::Listing));
    assert_eq!(fixture.host.driver("0000:01:00.0").as_deref(), Some("nvidia"));
}

#[test]
fn test_remove_without_entry_is_idempotent() {
    let fixture = Fixture::new(Fault::None, BASE_CONF);
    let coordinator = fixture.coordinator();

    assert_eq!(coordinator.remove(guest()).unwrap(), Removal::NotPresent);
    assert_eq!(coordinator.remove(guest()).unwrap(), Removal::NotPresent);

    assert_eq!(fixture.conf(), BASE_CONF);
    assert!(fixture.host.mutations().is_empty());
}

#[test]
fn test_each_failure_has_its_own_kind() {
    let invalid = Fixture::new(Fault::None, BASE_CONF)
        .coordinator()
        .assign(guest(), "0000:0a:00.0")
        .unwrap_err();
    assert!(matches!(invalid, HostpciError::InvalidIdentifier { .. }));

    let unbind = Fixture::new(Fault::Unbind, BASE_CONF);
    let err = unbind.coordinator().assign(guest(), "0000:01:00.0").unwrap_err();
    assert!(matches!(err, HostpciError::UnbindFailed { .. }));
    assert_eq!(unbind.host.driver("0000:01:00.0").as_deref(), Some("nvidia"));

    let modprobe = Fixture::new(Fault::Modprobe, BASE_CONF);
    let err = modprobe.coordinator().assign(guest(), "0000:01:00.0").unwrap_err();
    assert!(matches!(err, HostpciError::BindingInterrupted { step: BindStep::LoadModule, .. }));
    assert_eq!(modprobe.host.driver("0000:01:00.0"), None);
    assert_eq!(modprobe.conf(), BASE_CONF);

    let bind = Fixture::new(Fault::Bind, BASE_CONF);
    let err = bind.coordinator().assign(guest(), "0000:01:00.0").unwrap_err();
    assert!(matches!(err, HostpciError::BindingInterrupted { step: BindStep::Bind, .. }));
    assert!(err.needs_operator());

    let config = Fixture::new(Fault::LiveApply, BASE_CONF);
    let err = config.coordinator().assign(guest(), "0000:01:00.0").unwrap_err();
    match err {
        HostpciError::ConfigWriteFailure { guest_id, pci_address, step, record_intact, .. } => {
            assert_eq!(guest_id, guest());
            assert_eq!(pci_address, "0000:01:00.0");
            assert_eq!(step, ConfigStep::LiveApply);
            assert!(record_intact);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(config.host.driver("0000:01:00.0").as_deref(), Some("vfio-pci"));
    assert_eq!(config.conf(), BASE_CONF);
}

#[test]
fn test_second_assign_is_rejected_until_removed() {
    let fixture = Fixture::new(Fault::None, BASE_CONF);
    let coordinator = fixture.coordinator();

    coordinator.assign(guest(), "0000:01:00.0").unwrap();
    let mutations = fixture.host.mutations().len();

    let err = coordinator.assign(guest(), "0000:00:02.0").unwrap_err();
    assert!(matches!(err, HostpciError::DuplicateAssignment { .. }));
    assert_eq!(fixture.host.mutations().len(), mutations);
    assert_eq!(fixture.host.driver("0000:00:02.0").as_deref(), Some("i915"));

    coordinator.remove(guest()).unwrap();
    coordinator.assign(guest(), "0000:00:02.0").unwrap();
    assert!(fixture.conf().contains("hostpci0: 0000:00:02.0,pcie=1"));
}

#[test]
fn test_snapshots_survive_assign_and_remove() {
    let conf = format!(
        "{}parent: pre-gpu\n\n[pre-gpu]\ncores: 8\nhostpci0: 0000:00:02.0,pcie=1\nsnaptime: 1712000000\n",
        BASE_CONF
    );
    let fixture = Fixture::new(Fault::None, &conf);
    let coordinator = fixture.coordinator();

    coordinator.assign(guest(), "0000:01:00.0").unwrap();
    let assigned = fixture.conf();
    assert!(assigned.find("hostpci0: 0000:01:00.0").unwrap() < assigned.find("[pre-gpu]").unwrap());
    assert!(assigned.ends_with("[pre-gpu]\ncores: 8\nhostpci0: 0000:00:02.0,pcie=1\nsnaptime: 1712000000\n"));

    coordinator.remove(guest()).unwrap();
    assert_eq!(fixture.conf(), conf);
}
