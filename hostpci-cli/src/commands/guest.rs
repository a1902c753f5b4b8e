//! `hostpci guests` command

use anyhow::Result;
use colored::Colorize;
use hostpci_core::{
    Config, GuestConfigStore, GuestInventory, GuestStatus, ProxmoxApi, QmRuntime,
};
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
struct GuestRow {
    #[tabled(rename = "VMID")]
    id: u32,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "GPU")]
    gpu: String,
}

/// List guests on the configured node, with their passthrough entry if any.
pub async fn list(config: &Config) -> Result<()> {
    let api = ProxmoxApi::from_config(config)?;
    let guests = api.list_guests().await?;

    if guests.is_empty() {
        println!("No guests on node {}", config.api.node);
        return Ok(());
    }

    let store = GuestConfigStore::new(&config.guest_config_dir, QmRuntime::new(&config.qm_program));

    let rows: Vec<GuestRow> = guests
        .into_iter()
        .map(|guest| {
            let gpu = store
                .read(guest.id)
                .ok()
                .and_then(|c| c.passthrough_entry().map(str::to_string))
                .unwrap_or_else(|| "-".to_string());
            let status = match guest.status {
                GuestStatus::Running => "running".green().to_string(),
                GuestStatus::Paused => "paused".yellow().to_string(),
                other => other.to_string(),
            };
            GuestRow {
                id: guest.id.get(),
                name: if guest.name.is_empty() { "-".to_string() } else { guest.name },
                status,
                gpu,
            }
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::modern());

    println!("{}", table);

    Ok(())
}
