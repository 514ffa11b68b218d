//! Device discovery from the sysfs DRM class directory.
//!
//! Each `cardN` entry in the DRM directory is a symlink into the PCI device
//! tree, e.g. `../../devices/pci0000:00/0000:00:02.0/drm/card0`. The
//! device's UID is built from its PCI address and its vendor and device
//! ids, so it stays stable across reboots.
//!
//! When the directory or a card symlink cannot be read, the node is treated
//! as having no real hardware and a fixed set of fake devices is returned.

use std::fs;
use std::path::Path;

use devalloc_core::{DeviceDescriptor, DeviceMap, DeviceType, DeviceUid};
use tracing::{debug, error, info};

/// Number of fake devices reported when no hardware is readable.
pub const FAKE_DEVICE_COUNT: usize = 5;

fn has_numeric_suffix(name: &str, prefix: &str) -> bool {
    name.strip_prefix(prefix)
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

fn is_card(name: &str) -> bool {
    has_numeric_suffix(name, "card")
}

fn is_renderd(name: &str) -> bool {
    has_numeric_suffix(name, "renderD")
}

/// The fixed fake inventory: `fakeDevice00` through `fakeDevice04`.
#[must_use]
pub fn fake_devices() -> DeviceMap {
    (0..FAKE_DEVICE_COUNT)
        .map(|i| {
            let device = DeviceDescriptor::fake(format!("fakeDevice{i:02}"));
            (device.uid.clone(), device)
        })
        .collect()
}

/// Enumerate the devices under `drm_dir`.
///
/// Falls back to [`fake_devices`] if the directory or a card symlink cannot
/// be read. Cards whose identity files are missing are skipped.
#[must_use]
pub fn enumerate_devices(drm_dir: &Path) -> DeviceMap {
    let entries = match fs::read_dir(drm_dir) {
        Ok(entries) => entries,
        Err(e) => {
            info!(dir = %drm_dir.display(), error = %e, "No DRM directory, using fake devices");
            return fake_devices();
        }
    };

    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    names.sort();

    let mut devices = DeviceMap::new();
    for name in names.into_iter().filter(|n| is_card(n)) {
        let link_path = drm_dir.join(&name);
        let target = match fs::read_link(&link_path) {
            Ok(target) => target,
            Err(e) => {
                info!(path = %link_path.display(), error = %e, "Unreadable card symlink, using fake devices");
                return fake_devices();
            }
        };

        // <drm_dir>/<link> resolves to .../<pci-address>/drm/cardN
        let card_path = drm_dir.join(target);
        let Some(card_drm_dir) = card_path.parent() else {
            error!(path = %card_path.display(), "Card path has no parent, skipping");
            continue;
        };
        let Some(pci_dir) = card_drm_dir.parent() else {
            error!(path = %card_drm_dir.display(), "DRM dir has no parent, skipping");
            continue;
        };

        if let Some(device) = read_device(card_drm_dir, pci_dir) {
            debug!(uid = %device.uid, card = ?device.card, renderd = ?device.renderd, "Discovered device");
            devices.insert(device.uid.clone(), device);
        }
    }

    info!(count = devices.len(), "Enumerated DRM devices");
    devices
}

fn read_device(card_drm_dir: &Path, pci_dir: &Path) -> Option<DeviceDescriptor> {
    let entries = match fs::read_dir(card_drm_dir) {
        Ok(entries) => entries,
        Err(e) => {
            error!(dir = %card_drm_dir.display(), error = %e, "Failed reading device DRM dir, skipping");
            return None;
        }
    };

    let mut card = None;
    let mut renderd = None;
    for name in entries
        .filter_map(Result::ok)
        .filter_map(|entry| entry.file_name().into_string().ok())
    {
        if is_card(&name) {
            card = Some(name);
        } else if is_renderd(&name) {
            renderd = Some(name);
        }
    }

    // renderD may be absent, the card node may not.
    let Some(card) = card else {
        error!(dir = %card_drm_dir.display(), "No DRM card node, skipping device");
        return None;
    };

    let vendor = read_id(&pci_dir.join("vendor"))?;
    let device_id = read_id(&pci_dir.join("device"))?;
    let pci_address = pci_dir.file_name()?.to_str()?;

    let uid = DeviceUid::new(format!("{pci_address}-{vendor}-{device_id}"));
    Some(DeviceDescriptor {
        cdi_name: uid.to_string(),
        uid,
        device_type: DeviceType::Type0,
        card: Some(card),
        renderd,
    })
}

fn read_id(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(contents) => Some(contents.trim().to_string()),
        Err(e) => {
            error!(path = %path.display(), error = %e, "Failed reading device identity file");
            None
        }
    }
}
