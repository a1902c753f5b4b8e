//! `hostpci gpus` command

use anyhow::{bail, Result};
use colored::Colorize;
use hostpci_core::{AssignmentCoordinator, Config, GpuInventory, PciDevice};
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
struct GpuRow {
    #[tabled(rename = "PCI ADDRESS")]
    address: String,
    #[tabled(rename = "VENDOR")]
    vendor: String,
    #[tabled(rename = "CLASS")]
    class: String,
    #[tabled(rename = "MODEL")]
    model: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "DRIVER")]
    driver: String,
    #[tabled(rename = "STATUS")]
    status: String,
}

fn status(gpu: &PciDevice, passthrough_driver: &str) -> String {
    if gpu.is_bound_to(passthrough_driver) {
        "passthrough".green().to_string()
    } else if gpu.driver.is_none() {
        "no driver".yellow().to_string()
    } else {
        "host".to_string()
    }
}

/// List GPUs on the host with their current driver.
pub fn list(config: &Config) -> Result<()> {
    let coordinator = AssignmentCoordinator::from_config(config);

    let listing = match coordinator.list_gpus() {
        GpuInventory::Listed(listing) => listing,
        GpuInventory::QueryUnavailable { reason } => {
            bail!("PCI device query unavailable: {}", reason);
        }
    };

    if listing.is_empty() {
        println!("No GPUs detected");
        return Ok(());
    }

    let driver = config.passthrough_driver.as_str();
    let gpus: Vec<PciDevice> = listing.iter().collect();

    let rows: Vec<GpuRow> = gpus
        .iter()
        .map(|gpu| GpuRow {
            address: gpu.address.clone(),
            vendor: gpu.vendor().to_string(),
            class: gpu.class.to_string(),
            model: truncate(&gpu.description, 48),
            id: gpu.id_token(),
            driver: gpu.driver.clone().unwrap_or_else(|| "-".to_string()),
            status: status(gpu, driver),
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::modern());
    println!("{}", table);

    println!();
    println!("Total: {} GPU(s)", gpus.len());

    let passthrough = gpus.iter().filter(|g| g.is_bound_to(driver)).count();
    if passthrough > 0 {
        println!("Note: {} GPU(s) bound to {}", passthrough, driver);
    }

    Ok(())
}

/// Truncate string to max length with ellipsis.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("GeForce RTX 4090", 48), "GeForce RTX 4090");
        assert_eq!(truncate("NVIDIA Corporation AD102", 10), "NVIDIA ...");
    }
}
