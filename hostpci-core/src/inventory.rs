//! GPU inventory from the host PCI listing.
//!
//! Parses `lspci -Dnn` output and keeps display-class devices. Nothing is
//! cached: binding state changes underneath us, so every call re-queries the
//! host.

use crate::host::HostDriverController;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use tracing::{debug, warn};

/// One `lspci -Dnn` line, e.g.
/// `0000:01:00.0 VGA compatible controller [0300]: NVIDIA Corporation GA102 [10de:2204] (rev a1)`.
///
/// The domain is optional so listings from `lspci -nn` parse too.
static LSPCI_LINE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^(?P<address>(?:[0-9a-fA-F]{4}:)?[0-9a-fA-F]{2}:[0-9a-fA-F]{2}\.[0-7])\s+",
        r"(?P<class_name>.+?)\s+\[(?P<class>[0-9a-fA-F]{4})\]:\s+",
        r"(?P<description>.*?)\s*\[(?P<vendor>[0-9a-fA-F]{4}):(?P<device>[0-9a-fA-F]{4})\]",
        r"(?:\s+\(rev\s+[0-9a-fA-F]+\))?\s*$",
    ))
    .expect("Invalid lspci line regex")
});

/// PCI class codes treated as GPUs.
pub mod class {
    /// VGA compatible controller
    pub const VGA_CONTROLLER: &str = "0300";
    /// 3D controller (compute GPUs without display outputs)
    pub const CONTROLLER_3D: &str = "0302";
    /// Display controller
    pub const DISPLAY_CONTROLLER: &str = "0380";
}

/// Known GPU vendor IDs.
pub mod vendor {
    pub const NVIDIA: &str = "10de";
    pub const AMD: &str = "1002";
    pub const INTEL: &str = "8086";
}

/// Display-class classification of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Vga,
    ThreeD,
    Display,
}

impl DeviceClass {
    /// Classify a four-digit PCI class code; `None` for non-GPU classes.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.to_ascii_lowercase().as_str() {
            class::VGA_CONTROLLER => Some(Self::Vga),
            class::CONTROLLER_3D => Some(Self::ThreeD),
            class::DISPLAY_CONTROLLER => Some(Self::Display),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Vga => "VGA",
            Self::ThreeD => "3D",
            Self::Display => "Display",
        };
        f.write_str(s)
    }
}

/// GPU vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Other,
}

impl fmt::Display for GpuVendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Nvidia => "NVIDIA",
            Self::Amd => "AMD",
            Self::Intel => "Intel",
            Self::Other => "Other",
        };
        f.write_str(s)
    }
}

/// A GPU seen on the host PCI bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PciDevice {
    /// PCI address (e.g., "0000:01:00.0")
    pub address: String,
    /// Vendor ID (e.g., "10de")
    pub vendor_id: String,
    /// Device ID (e.g., "2204")
    pub device_id: String,
    /// Class name as printed by lspci (e.g., "VGA compatible controller")
    pub class_name: String,
    pub class: DeviceClass,
    /// Human-readable description (e.g., "NVIDIA Corporation GA102 [GeForce RTX 3090]")
    pub description: String,
    /// Current driver (None if unbound)
    pub driver: Option<String>,
}

impl PciDevice {
    /// The `vendor:device` token, e.g. `10de:2204`.
    pub fn id_token(&self) -> String {
        format!("{}:{}", self.vendor_id, self.device_id)
    }

    pub fn vendor(&self) -> GpuVendor {
        match self.vendor_id.as_str() {
            vendor::NVIDIA => GpuVendor::Nvidia,
            vendor::AMD => GpuVendor::Amd,
            vendor::INTEL => GpuVendor::Intel,
            _ => GpuVendor::Other,
        }
    }

    /// Check if the device is bound to `driver`.
    pub fn is_bound_to(&self, driver: &str) -> bool {
        self.driver.as_deref() == Some(driver)
    }
}

/// Parse one listing line into a GPU. Non-GPU and malformed lines yield `None`.
///
/// The driver is left empty; [`GpuListing::iter`] fills it in.
pub fn parse_lspci_line(line: &str) -> Option<PciDevice> {
    let caps = LSPCI_LINE_REGEX.captures(line.trim_end())?;
    let class = DeviceClass::from_code(&caps["class"])?;

    let raw_address = &caps["address"];
    let address = if raw_address.len() == 7 {
        format!("0000:{}", raw_address.to_ascii_lowercase())
    } else {
        raw_address.to_ascii_lowercase()
    };

    Some(PciDevice {
        address,
        vendor_id: caps["vendor"].to_ascii_lowercase(),
        device_id: caps["device"].to_ascii_lowercase(),
        class_name: caps["class_name"].to_string(),
        class,
        description: caps["description"].trim().to_string(),
        driver: None,
    })
}

/// Outcome of a GPU inventory query.
///
/// An empty listing and a failed query are distinct: callers must not read
/// "no GPUs" into a host that could not be queried.
pub enum GpuInventory<'h, H: HostDriverController> {
    Listed(GpuListing<'h, H>),
    QueryUnavailable { reason: String },
}

impl<'h, H: HostDriverController> GpuInventory<'h, H> {
    pub fn listing(&self) -> Option<&GpuListing<'h, H>> {
        match self {
            Self::Listed(listing) => Some(listing),
            Self::QueryUnavailable { .. } => None,
        }
    }
}

/// Snapshot of the raw host listing, iterated lazily.
pub struct GpuListing<'h, H: HostDriverController> {
    raw: String,
    host: &'h H,
}

impl<'h, H: HostDriverController> GpuListing<'h, H> {
    /// Iterate GPUs in bus enumeration order.
    ///
    /// Each call starts over from the first device; drivers are looked up as
    /// devices are yielded.
    pub fn iter(&self) -> impl Iterator<Item = PciDevice> + '_ {
        self.raw.lines().filter_map(parse_lspci_line).map(move |mut device| {
            device.driver = self.host.current_driver(&device.address);
            device
        })
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

/// Query the host for display and 3D controllers.
pub fn list_gpu_devices<H: HostDriverController>(host: &H) -> GpuInventory<'_, H> {
    match host.pci_listing() {
        Ok(raw) => {
            debug!(lines = raw.lines().count(), "PCI listing received");
            GpuInventory::Listed(GpuListing { raw, host })
        }
        Err(e) => {
            warn!(error = %e, "PCI query unavailable");
            GpuInventory::QueryUnavailable { reason: e.to_string() }
        }
    }
}
