//! Identifier validation against the live host PCI listing.

use crate::error::{HostpciError, Result};
use crate::host::HostDriverController;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use tracing::{debug, warn};

/// PCI address with optional domain: `0000:01:00.0` or `01:00.0`.
static PCI_ADDRESS_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[0-9a-fA-F]{4}:)?[0-9a-fA-F]{2}:[0-9a-fA-F]{2}\.[0-7]$")
        .expect("Invalid PCI address regex")
});

/// Length of `bb:dd.f`.
const SHORT_ADDRESS_LEN: usize = 7;
const DEFAULT_DOMAIN: &str = "0000";

/// Validate PCI address format.
pub fn is_valid_pci_address(address: &str) -> bool {
    PCI_ADDRESS_REGEX.is_match(address)
}

/// A PCI address that was present in the host listing when it was checked.
///
/// Only [`Validator::require`] creates one, and nothing stores it between
/// operations, so every mutation runs against a fresh check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedAddress {
    address: String,
}

impl ValidatedAddress {
    /// Canonical address including the domain.
    pub fn as_str(&self) -> &str {
        &self.address
    }
}

impl fmt::Display for ValidatedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

/// Checks operator-supplied identifiers against the host.
pub struct Validator<H> {
    host: H,
}

impl<H: HostDriverController> Validator<H> {
    pub fn new(host: H) -> Self {
        Self { host }
    }

    /// True when `identifier` appears in a fresh PCI listing.
    ///
    /// A failed query is indistinguishable from an absent device here; use
    /// [`Validator::require`] for the reason.
    pub fn validate(&self, identifier: &str) -> bool {
        self.require(identifier).is_ok()
    }

    /// Validate `identifier` and return its canonical address.
    pub fn require(&self, identifier: &str) -> Result<ValidatedAddress> {
        let identifier = identifier.trim();
        if !is_valid_pci_address(identifier) {
            warn!(identifier = %identifier, "Invalid PCI identifier");
            return Err(HostpciError::InvalidIdentifier {
                identifier: identifier.to_string(),
                reason: "expected a PCI address such as 0000:01:00.0".to_string(),
            });
        }

        let listing = self.host.pci_listing().map_err(|e| {
            warn!(identifier = %identifier, error = %e, "Invalid PCI identifier (query failed)");
            HostpciError::InvalidIdentifier {
                identifier: identifier.to_string(),
                reason: format!("PCI listing unavailable: {}", e),
            }
        })?;

        let needle = identifier.to_ascii_lowercase();
        if !listing.to_ascii_lowercase().contains(&needle) {
            warn!(identifier = %identifier, "Invalid PCI identifier (not on bus)");
            return Err(HostpciError::InvalidIdentifier {
                identifier: identifier.to_string(),
                reason: "no such device in the host PCI listing".to_string(),
            });
        }

        let address = canonical_address(&listing, &needle).map_err(|reason| {
            warn!(identifier = %identifier, reason = %reason, "Invalid PCI identifier");
            HostpciError::InvalidIdentifier { identifier: identifier.to_string(), reason }
        })?;
        debug!(address = %address, "PCI identifier validated");
        Ok(ValidatedAddress { address })
    }
}

/// Full address of the listed device named by `needle`.
///
/// A short form takes its domain from the matching listing line and is
/// ambiguous when it appears in more than one domain.
fn canonical_address(listing: &str, needle: &str) -> std::result::Result<String, String> {
    let mut found: Vec<String> = listing
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_ascii_lowercase)
        .filter_map(|token| {
            if token == needle {
                return Some(if token.len() == SHORT_ADDRESS_LEN {
                    format!("{}:{}", DEFAULT_DOMAIN, token)
                } else {
                    token
                });
            }
            let domain = token.strip_suffix(needle)?;
            let short = needle.len() == SHORT_ADDRESS_LEN;
            (short && domain.len() == 5 && domain.ends_with(':')).then_some(token)
        })
        .collect();
    found.sort();
    found.dedup();

    match found.as_slice() {
        [address] => Ok(address.clone()),
        [] => Err("not a device address in the host PCI listing".to_string()),
        _ => Err(format!("ambiguous across PCI domains: {}", found.join(", "))),
    }
}
