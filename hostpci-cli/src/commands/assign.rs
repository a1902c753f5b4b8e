//! `hostpci assign`, `remove`, `unbind` and `release` commands

use crate::commands::prompt;
use anyhow::Result;
use colored::Colorize;
use hostpci_core::{AssignmentCoordinator, Config, GuestId, HostpciError, Removal};

/// Print recovery guidance for errors that leave the host half-changed.
fn fail(e: HostpciError) -> anyhow::Error {
    if e.needs_operator() {
        eprintln!(
            "{} Host state needs attention; check the device with `lspci -k -s <address>`",
            "✗".red().bold()
        );
    }
    e.into()
}

/// Bind a GPU to the pass-through driver and attach it to a guest.
pub fn assign(config: &Config, guest: Option<GuestId>, device: Option<String>) -> Result<()> {
    let guest = prompt::guest_id(guest)?;
    let device = prompt::device(device)?;

    let coordinator = AssignmentCoordinator::from_config(config);
    let assignment = coordinator.assign(guest, &device).map_err(fail)?;

    println!(
        "{} GPU {} assigned to guest {}",
        "✓".green().bold(),
        assignment.pci_address.bold(),
        guest
    );
    let bind = &assignment.bind;
    if bind.already_bound {
        println!("  {} already on {}", "•".dimmed(), bind.driver);
    } else {
        let previous = bind.previous_driver.as_deref().unwrap_or("no driver");
        println!("  {} {} -> {}", "•".dimmed(), previous, bind.driver);
    }
    println!(
        "{}",
        "If the guest cannot hot-plug the device, the change stays pending until it restarts"
            .dimmed()
    );

    Ok(())
}

/// Detach the GPU from a guest. The device stays on the pass-through driver.
pub fn remove(config: &Config, guest: Option<GuestId>) -> Result<()> {
    let guest = prompt::guest_id(guest)?;

    let coordinator = AssignmentCoordinator::from_config(config);
    match coordinator.remove(guest).map_err(fail)? {
        Removal::Removed { value } => {
            println!("{} GPU {} removed from guest {}", "✓".red().bold(), value.bold(), guest);
            println!(
                "{}",
                "The device is still bound to the pass-through driver; use `hostpci release` to \
                 return it to the host"
                    .dimmed()
            );
        }
        Removal::NotPresent => {
            println!("{} No GPU assigned to guest {}", "⚠".yellow().bold(), guest);
        }
    }

    Ok(())
}

/// Move a GPU to the pass-through driver without touching any guest.
pub fn unbind(config: &Config, device: Option<String>) -> Result<()> {
    let device = prompt::device(device)?;

    let coordinator = AssignmentCoordinator::from_config(config);
    let report = coordinator.unbind(&device).map_err(fail)?;

    if report.already_bound {
        println!(
            "{} GPU {} is already bound to {}",
            "⚠".yellow().bold(),
            report.pci_address.bold(),
            report.driver
        );
    } else {
        println!(
            "{} GPU {} unbound from {} and bound to {}",
            "✓".green().bold(),
            report.pci_address.bold(),
            report.previous_driver.as_deref().unwrap_or("no driver"),
            report.driver
        );
    }

    Ok(())
}

/// Hand a GPU back from the pass-through driver to the host.
pub fn release(config: &Config, device: Option<String>, driver: Option<String>) -> Result<()> {
    let device = prompt::device(device)?;

    let coordinator = AssignmentCoordinator::from_config(config);
    let report = coordinator.release(&device, driver.as_deref()).map_err(fail)?;

    if report.not_owned {
        println!(
            "{} GPU {} is not bound to {} (driver: {})",
            "⚠".yellow().bold(),
            report.pci_address.bold(),
            config.passthrough_driver,
            report.previous_driver.as_deref().unwrap_or("-")
        );
        return Ok(());
    }

    let target = driver.as_deref().unwrap_or("kernel default");
    println!(
        "{} GPU {} released to host ({})",
        "✓".green().bold(),
        report.pci_address.bold(),
        report.driver.as_deref().unwrap_or(target)
    );

    Ok(())
}
