use std::path::{Path, PathBuf};

use tracing::debug;

/// Substring of the USB product string reported by ACE Pro units.
pub const ACE_PRODUCT_MARKER: &str = "ACE";

const SYSFS_TTY: &str = "/sys/class/tty";
const DEV_ROOT: &str = "/dev";

// Sort keys for ports whose USB location can't be parsed.
const FALLBACK_LOCATION: u32 = 999_998;
const UNKNOWN_LOCATION: u32 = 999_999;

/// A candidate serial device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Device node, e.g. `/dev/ttyACM0`.
    pub path: PathBuf,
    /// USB product string, if sysfs exposes one.
    pub product: Option<String>,
    /// USB interface location, e.g. `1-1.4.3:1.0`.
    pub location: Option<String>,
}

impl PortInfo {
    /// Ordering key: physical hub position first, then tty number.
    pub fn sort_key(&self) -> Vec<u32> {
        if let Some(location) = &self.location {
            let key = usb_location_key(location);
            if key != [UNKNOWN_LOCATION] {
                return key;
            }
        }
        match tty_number(&self.path) {
            Some(n) => vec![FALLBACK_LOCATION, n],
            None => vec![UNKNOWN_LOCATION],
        }
    }
}

/// Parse a USB interface location into a sortable key.
///
/// `"1-1.4.3:1.0"` becomes `[1, 1, 4, 3]`. Anything unparseable sorts last.
pub fn usb_location_key(location: &str) -> Vec<u32> {
    let port_part = location.split(':').next().unwrap_or_default();
    let parsed: Option<Vec<u32>> = port_part
        .split(['-', '.'])
        .map(|part| part.parse().ok())
        .collect();
    match parsed {
        Some(key) if !key.is_empty() => key,
        _ => vec![UNKNOWN_LOCATION],
    }
}

fn tty_number(path: &Path) -> Option<u32> {
    let name = path.file_name()?.to_str()?;
    let digits: String = name
        .chars()
        .rev()
        .take_while(char::is_ascii_digit)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().ok()
}

/// List ACM ports whose product string contains `product_filter`, in hub order.
///
/// Returns an empty list when sysfs is unavailable.
pub fn find_ports(product_filter: &str) -> Vec<PortInfo> {
    match scan_sysfs(Path::new(SYSFS_TTY), Path::new(DEV_ROOT), product_filter) {
        Ok(ports) => ports,
        Err(err) => {
            debug!(%err, "serial discovery unavailable");
            Vec::new()
        }
    }
}

/// Scan a sysfs-style `class/tty` tree.
pub fn scan_sysfs(
    sysfs_tty: &Path,
    dev_root: &Path,
    product_filter: &str,
) -> std::io::Result<Vec<PortInfo>> {
    let mut ports = Vec::new();
    for entry in std::fs::read_dir(sysfs_tty)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !name.starts_with("ttyACM") {
            continue;
        }

        let interface = std::fs::canonicalize(entry.path().join("device")).ok();
        let location = interface
            .as_ref()
            .and_then(|dir| dir.file_name())
            .and_then(|n| n.to_str())
            .map(str::to_string);
        let product = interface
            .as_ref()
            .and_then(|dir| dir.parent())
            .and_then(|usb| std::fs::read_to_string(usb.join("product")).ok())
            .map(|s| s.trim().to_string());

        let matches = product
            .as_deref()
            .is_some_and(|p| p.contains(product_filter));
        if !matches {
            debug!(port = name, ?product, "skipping serial port");
            continue;
        }

        ports.push(PortInfo {
            path: dev_root.join(name),
            product,
            location,
        });
    }

    ports.sort_by_key(PortInfo::sort_key);
    Ok(ports)
}
