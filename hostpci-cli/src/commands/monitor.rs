//! `hostpci monitor` command

use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::process::Command;

const NVIDIA_SMI: &str = "nvidia-smi";

/// Show GPU utilisation through `nvidia-smi`.
pub fn run() -> Result<()> {
    let Some(program) = find_in_path(NVIDIA_SMI) else {
        bail!("{} not found on PATH; install the NVIDIA driver utilities", NVIDIA_SMI);
    };

    let status = Command::new(&program)
        .status()
        .with_context(|| format!("Failed to run {}", program.display()))?;

    if !status.success() {
        bail!("{} exited with {}", NVIDIA_SMI, status);
    }
    Ok(())
}

fn find_in_path(program: &str) -> Option<PathBuf> {
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths).map(|dir| dir.join(program)).find(|p| p.is_file())
}
