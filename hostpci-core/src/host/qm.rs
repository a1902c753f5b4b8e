//! Live-apply through the Proxmox `qm` management command.

use super::system::run_command;
use super::{GuestRuntime, LiveChange};
use crate::error::Result;
use crate::guest_config::GuestId;
use tracing::info;

/// Guest runtime driven by `qm set`.
#[derive(Debug, Clone)]
pub struct QmRuntime {
    program: String,
}

impl QmRuntime {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }

    /// Arguments passed to `qm` for a change.
    pub fn args(guest: GuestId, change: &LiveChange) -> Vec<String> {
        let mut args = vec!["set".to_string(), guest.to_string()];
        match change {
            LiveChange::Set { key, value } => {
                args.push(format!("--{}", key));
                args.push(value.clone());
            }
            LiveChange::Delete { key } => {
                args.push("--delete".to_string());
                args.push(key.clone());
            }
        }
        args
    }
}

impl Default for QmRuntime {
    fn default() -> Self {
        Self::new("qm")
    }
}

impl GuestRuntime for QmRuntime {
    fn apply(&self, guest: GuestId, change: &LiveChange) -> Result<()> {
        let args = Self::args(guest, change);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        run_command(&self.program, &arg_refs)?;
        info!(guest = %guest, change = %change, "Applied change to running guest");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HostpciError;

    fn guest() -> GuestId {
        GuestId::new(101).unwrap()
    }

    #[test]
    fn test_set_args() {
        let change = LiveChange::Set {
            key: "hostpci0".to_string(),
            value: "0000:01:00.0,pcie=1".to_string(),
        };
        assert_eq!(
            QmRuntime::args(guest(), &change),
            vec!["set", "101", "--hostpci0", "0000:01:00.0,pcie=1"]
        );
    }

    #[test]
    fn test_delete_args() {
        let change = LiveChange::Delete { key: "hostpci0".to_string() };
        assert_eq!(QmRuntime::args(guest(), &change), vec!["set", "101", "--delete", "hostpci0"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_status_is_reported() {
        let change = LiveChange::Delete { key: "hostpci0".to_string() };

        QmRuntime::new("true").apply(guest(), &change).unwrap();

        let err = QmRuntime::new("false").apply(guest(), &change).unwrap_err();
        assert!(matches!(err, HostpciError::CommandFailed { .. }));
    }
}
