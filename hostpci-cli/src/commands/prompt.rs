//! Interactive input for arguments the operator left out.

use anyhow::{bail, Context, Result};
use hostpci_core::GuestId;
use std::io::{self, Write};

/// Read one trimmed line. `None` on end of input.
pub fn read_line(label: &str) -> Result<Option<String>> {
    print!("{}: ", label);
    io::stdout().flush()?;

    let mut buf = String::new();
    if io::stdin().read_line(&mut buf)? == 0 {
        return Ok(None);
    }
    Ok(Some(buf.trim().to_string()))
}

fn required(label: &str) -> Result<String> {
    match read_line(label)? {
        Some(value) if !value.is_empty() => Ok(value),
        _ => bail!("No {} given", label.to_lowercase()),
    }
}

/// Use `value` or ask for a guest id.
pub fn guest_id(value: Option<GuestId>) -> Result<GuestId> {
    if let Some(id) = value {
        return Ok(id);
    }
    let raw = required("Guest ID")?;
    raw.parse().with_context(|| format!("Invalid guest ID: {}", raw))
}

/// Use `value` or ask for a PCI address.
pub fn device(value: Option<String>) -> Result<String> {
    match value {
        Some(device) => Ok(device),
        None => required("PCI address"),
    }
}

/// Optional free-form answer; empty input means `None`.
pub fn optional(label: &str) -> Result<Option<String>> {
    Ok(read_line(label)?.filter(|v| !v.is_empty()))
}
