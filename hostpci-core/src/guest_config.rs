//! Guest configuration records (`/etc/pve/qemu-server/<vmid>.conf`).
//!
//! A record is a list of `key: value` lines. Lines before the first
//! `[section]` header are the guest's current configuration; each later
//! section is a snapshot and is left untouched.
//!
//! Every mutation of the persisted record is mirrored to the running guest
//! through a [`GuestRuntime`]. If that mirror fails, the previous file
//! content is restored and the operation fails.

use crate::error::{ConfigStep, HostpciError, Result};
use crate::host::{GuestRuntime, LiveChange};
use crate::validate::ValidatedAddress;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, error, info};

/// Configuration key of the single passthrough slot.
pub const PASSTHROUGH_KEY: &str = "hostpci0";

/// Smallest guest id the hypervisor assigns.
const MIN_GUEST_ID: u32 = 100;
const MAX_GUEST_ID: u32 = 999_999_999;

/// Host-assigned guest identifier (Proxmox vmid).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct GuestId(u32);

impl GuestId {
    pub fn new(id: u32) -> Result<Self> {
        if !(MIN_GUEST_ID..=MAX_GUEST_ID).contains(&id) {
            return Err(HostpciError::InvalidIdentifier {
                identifier: id.to_string(),
                reason: format!("guest ids range from {} to {}", MIN_GUEST_ID, MAX_GUEST_ID),
            });
        }
        Ok(Self(id))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for GuestId {
    type Error = HostpciError;

    fn try_from(id: u32) -> Result<Self> {
        Self::new(id)
    }
}

impl From<GuestId> for u32 {
    fn from(id: GuestId) -> Self {
        id.0
    }
}

impl FromStr for GuestId {
    type Err = HostpciError;

    fn from_str(s: &str) -> Result<Self> {
        let id = s.trim().parse::<u32>().map_err(|_| HostpciError::InvalidIdentifier {
            identifier: s.to_string(),
            reason: "guest id must be numeric".to_string(),
        })?;
        Self::new(id)
    }
}

impl fmt::Display for GuestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Value written for a passthrough device.
pub fn passthrough_value(addr: &ValidatedAddress) -> String {
    format!("{},pcie=1", addr)
}

/// Outcome of a passthrough removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removal {
    /// The entry was removed; holds its former value.
    Removed { value: String },
    /// The guest had no passthrough entry. Nothing was written.
    NotPresent,
}

/// In-memory copy of a guest configuration record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GuestConfig {
    lines: Vec<String>,
    trailing_newline: bool,
}

impl GuestConfig {
    pub fn parse(text: &str) -> Self {
        Self {
            lines: text.lines().map(str::to_string).collect(),
            trailing_newline: text.is_empty() || text.ends_with('\n'),
        }
    }

    pub fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        if self.trailing_newline && !self.lines.is_empty() {
            out.push('\n');
        }
        out
    }

    /// Index one past the last line of the current configuration.
    fn current_end(&self) -> usize {
        self.lines.iter().position(|l| l.trim_start().starts_with('[')).unwrap_or(self.lines.len())
    }

    /// `key: value` entries of the current configuration, in file order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.lines[..self.current_end()].iter().filter_map(|l| parse_entry(l))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    pub fn passthrough_entry(&self) -> Option<&str> {
        self.get(PASSTHROUGH_KEY)
    }

    /// Number of `key` entries in the current configuration.
    pub fn count(&self, key: &str) -> usize {
        self.entries().filter(|(k, _)| *k == key).count()
    }

    /// Append `key: value` at the end of the current configuration.
    pub fn push_entry(&mut self, key: &str, value: &str) {
        let mut at = self.current_end();
        while at > 0 && self.lines[at - 1].trim().is_empty() && at < self.lines.len() {
            at -= 1;
        }
        self.lines.insert(at, format!("{}: {}", key, value));
    }

    /// Drop every `key` entry from the current configuration. Returns the removed values.
    pub fn remove_key(&mut self, key: &str) -> Vec<String> {
        let end = self.current_end();
        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(self.lines.len());
        for (i, line) in self.lines.drain(..).enumerate() {
            match parse_entry(&line) {
                Some((k, v)) if i < end && k == key => removed.push(v.to_string()),
                _ => kept.push(line),
            }
        }
        self.lines = kept;
        removed
    }
}

fn parse_entry(line: &str) -> Option<(&str, &str)> {
    let trimmed = line.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('[') {
        return None;
    }
    let (key, value) = trimmed.split_once(':')?;
    Some((key.trim(), value.trim()))
}

/// Reads and mutates guest records, keeping running guests in step.
pub struct GuestConfigStore<R> {
    dir: PathBuf,
    runtime: R,
}

impl<R: GuestRuntime> GuestConfigStore<R> {
    pub fn new(dir: impl Into<PathBuf>, runtime: R) -> Self {
        Self { dir: dir.into(), runtime }
    }

    pub fn config_path(&self, guest: GuestId) -> PathBuf {
        self.dir.join(format!("{}.conf", guest))
    }

    /// Read a guest's persisted record.
    pub fn read(&self, guest: GuestId) -> Result<GuestConfig> {
        self.read_raw(guest).map(|text| GuestConfig::parse(&text))
    }

    fn read_raw(&self, guest: GuestId) -> Result<String> {
        let path = self.config_path(guest);
        fs::read_to_string(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => HostpciError::GuestNotFound { guest_id: guest, path },
            _ => HostpciError::IoError { path, source: e },
        })
    }

    /// Add a `hostpci0` entry for `addr` and apply it to the running guest.
    ///
    /// Does not look for an existing entry; callers decide that policy.
    pub fn append_passthrough_entry(&self, guest: GuestId, addr: &ValidatedAddress) -> Result<()> {
        let failure = |step: ConfigStep, reason: String, record_intact: bool| {
            HostpciError::ConfigWriteFailure {
                guest_id: guest,
                pci_address: addr.to_string(),
                step,
                reason,
                record_intact,
            }
        };

        let original =
            self.read_raw(guest).map_err(|e| failure(ConfigStep::Read, e.to_string(), true))?;
        let value = passthrough_value(addr);

        let mut config = GuestConfig::parse(&original);
        config.push_entry(PASSTHROUGH_KEY, &value);

        self.persist(guest, &config.render())
            .map_err(|e| failure(ConfigStep::Persist, e.to_string(), true))?;
        debug!(guest = %guest, value = %value, "Persisted passthrough entry");

        let change = LiveChange::Set { key: PASSTHROUGH_KEY.to_string(), value };
        if let Err(e) = self.runtime.apply(guest, &change) {
            let record_intact = self.restore(guest, &original);
            return Err(failure(ConfigStep::LiveApply, e.to_string(), record_intact));
        }

        info!(guest = %guest, address = %addr, "Passthrough entry added");
        Ok(())
    }

    /// Remove the `hostpci0` entry and apply the removal to the running guest.
    ///
    /// Removing an absent entry succeeds without touching anything.
    pub fn remove_passthrough_entry(&self, guest: GuestId) -> Result<Removal> {
        let original = self.read_raw(guest)?;
        let mut config = GuestConfig::parse(&original);
        let removed = config.remove_key(PASSTHROUGH_KEY);

        let Some(value) = removed.first().cloned() else {
            debug!(guest = %guest, "No passthrough entry to remove");
            return Ok(Removal::NotPresent);
        };

        let pci_address = value.split(',').next().unwrap_or_default().to_string();
        let failure = |step: ConfigStep, reason: String, record_intact: bool| {
            HostpciError::ConfigWriteFailure {
                guest_id: guest,
                pci_address: pci_address.clone(),
                step,
                reason,
                record_intact,
            }
        };

        self.persist(guest, &config.render())
            .map_err(|e| failure(ConfigStep::Persist, e.to_string(), true))?;

        let change = LiveChange::Delete { key: PASSTHROUGH_KEY.to_string() };
        if let Err(e) = self.runtime.apply(guest, &change) {
            let record_intact = self.restore(guest, &original);
            return Err(failure(ConfigStep::LiveApply, e.to_string(), record_intact));
        }

        info!(guest = %guest, value = %value, "Passthrough entry removed");
        Ok(Removal::Removed { value })
    }

    /// Replace the record through a temporary file in the same directory.
    fn persist(&self, guest: GuestId, content: &str) -> Result<()> {
        let path = self.config_path(guest);
        let temp_path = self.dir.join(format!(".{}.conf.tmp", guest));

        fs::write(&temp_path, content)
            .map_err(|e| HostpciError::IoError { path: temp_path.clone(), source: e })?;
        fs::rename(&temp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            HostpciError::IoError { path: path.clone(), source: e }
        })
    }

    fn restore(&self, guest: GuestId, original: &str) -> bool {
        match self.persist(guest, original) {
            Ok(()) => {
                info!(guest = %guest, "Restored persisted record after live-apply failure");
                true
            }
            Err(e) => {
                error!(
                    guest = %guest,
                    error = %e,
                    "Failed to restore persisted record; persisted and running config differ"
                );
                false
            }
        }
    }
}
