//! CLI command implementations

pub mod assign;
pub mod gpu;
pub mod guest;
pub mod menu;
pub mod monitor;
mod prompt;

use colored::Colorize;
use hostpci_core::paths;

/// Sysfs writes and `qm` need root; say so up front instead of failing halfway.
pub fn warn_if_not_root() {
    if !paths::is_root() {
        eprintln!(
            "{} Not running as root: driver binding and guest changes will likely fail",
            "⚠".yellow().bold()
        );
    }
}
