use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hostpci_core::{Config, GuestId};
use std::path::PathBuf;
use tracing::debug;

mod commands;

#[derive(Parser)]
#[command(name = "hostpci")]
#[command(about = "GPU passthrough assignment for Proxmox VE guests", long_about = None)]
struct Cli {
    /// Config file (defaults to <config dir>/config.json)
    #[arg(short, long, env = "HOSTPCI_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List GPUs on the host PCI bus
    Gpus,

    /// List guests on this node
    Guests,

    /// Bind a GPU to vfio-pci and attach it to a guest
    Assign {
        /// Guest ID (vmid)
        #[arg(short, long)]
        guest: Option<GuestId>,

        /// PCI address (e.g., "0000:01:00.0")
        #[arg(short, long)]
        device: Option<String>,
    },

    /// Detach the GPU from a guest
    Remove {
        /// Guest ID (vmid)
        #[arg(short, long)]
        guest: Option<GuestId>,
    },

    /// Move a GPU from its host driver to vfio-pci
    Unbind {
        /// PCI address
        #[arg(short, long)]
        device: Option<String>,
    },

    /// Return a GPU from vfio-pci to a host driver
    Release {
        /// PCI address
        #[arg(short, long)]
        device: Option<String>,

        /// Host driver to bind (kernel picks one when omitted)
        #[arg(long)]
        driver: Option<String>,
    },

    /// Show GPU usage (nvidia-smi)
    Monitor,

    /// Interactive menu (default)
    Menu,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    hostpci_core::observability::init(&config.log_level)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;
    debug!(
        sysfs = %config.sysfs_pci_root,
        guest_configs = %config.guest_config_dir,
        driver = %config.passthrough_driver,
        "Configuration loaded"
    );

    match cli.command.unwrap_or(Commands::Menu) {
        Commands::Gpus => {
            commands::gpu::list(&config)?;
        }

        Commands::Guests => {
            commands::guest::list(&config).await?;
        }

        Commands::Assign { guest, device } => {
            commands::warn_if_not_root();
            commands::assign::assign(&config, guest, device)?;
        }

        Commands::Remove { guest } => {
            commands::warn_if_not_root();
            commands::assign::remove(&config, guest)?;
        }

        Commands::Unbind { device } => {
            commands::warn_if_not_root();
            commands::assign::unbind(&config, device)?;
        }

        Commands::Release { device, driver } => {
            commands::warn_if_not_root();
            commands::assign::release(&config, device, driver)?;
        }

        Commands::Monitor => {
            commands::monitor::run()?;
        }

        Commands::Menu => {
            commands::warn_if_not_root();
            commands::menu::run(&config).await?;
        }
    }

    Ok(())
}
