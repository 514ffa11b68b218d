//! Container Device Interface (CDI) spec registry.
//!
//! The container runtime injects devices by their qualified CDI name
//! (`devices.example.com/device=<name>`), looked up in JSON spec files under
//! the CDI root. This module keeps this driver's specs in step with the
//! devices present on the node.
//!
//! Only specs of kind [`CDI_KIND`] are loaded; spec files of other vendors
//! in the same directory are left untouched.

use std::fs;
use std::path::{Path, PathBuf};

use devalloc_core::{DeviceDescriptor, DeviceMap};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{PluginError, Result};

/// CDI spec version written by this driver.
pub const CDI_VERSION: &str = "0.5.0";

/// Vendor part of the CDI kind.
pub const CDI_VENDOR: &str = "devices.example.com";

/// Device class part of the CDI kind.
pub const CDI_CLASS: &str = "device";

/// CDI kind under which this driver's devices are published.
pub const CDI_KIND: &str = "devices.example.com/device";

/// File name used when no spec of our kind exists yet.
const DEFAULT_SPEC_FILE: &str = "devices.example.com-device.json";

/// Fully qualified CDI name of a device.
#[must_use]
pub fn qualified_name(name: &str) -> String {
    format!("{CDI_KIND}={name}")
}

/// A CDI spec file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdiSpec {
    /// Spec format version.
    pub cdi_version: String,
    /// `vendor/class` of every device in the spec.
    pub kind: String,
    /// Devices described by the spec.
    #[serde(default)]
    pub devices: Vec<CdiDevice>,
    /// Edits applied whenever any device of the spec is injected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_edits: Option<ContainerEdits>,
}

impl CdiSpec {
    /// An empty spec of this driver's kind.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cdi_version: CDI_VERSION.to_string(),
            kind: CDI_KIND.to_string(),
            devices: Vec::new(),
            container_edits: None,
        }
    }
}

impl Default for CdiSpec {
    fn default() -> Self {
        Self::new()
    }
}

/// A device entry in a CDI spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdiDevice {
    /// Unqualified device name.
    pub name: String,
    /// Edits applied when the device is injected.
    pub container_edits: ContainerEdits,
}

impl CdiDevice {
    /// Build the CDI entry for a discovered device.
    #[must_use]
    pub fn for_device(device: &DeviceDescriptor) -> Self {
        let device_nodes = [device.card.as_deref(), device.renderd.as_deref()]
            .into_iter()
            .flatten()
            .map(|file| DeviceNode {
                path: format!("/dev/dri/{file}"),
                node_type: Some("c".to_string()),
            })
            .collect();

        Self {
            name: device.cdi_name.clone(),
            container_edits: ContainerEdits {
                env: vec![format!("DEVALLOC_DEVICE_UID={}", device.uid)],
                device_nodes,
            },
        }
    }
}

/// Changes a runtime applies to a container's config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerEdits {
    /// `KEY=value` environment entries.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    /// Device nodes to create in the container.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub device_nodes: Vec<DeviceNode>,
}

/// A device node injected into a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceNode {
    /// Path of the node inside the container.
    pub path: String,
    /// Node type, `c` for character devices.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
}

/// The set of this driver's CDI specs in a directory.
#[derive(Debug)]
pub struct CdiRegistry {
    root: PathBuf,
    specs: Vec<(PathBuf, CdiSpec)>,
}

impl CdiRegistry {
    /// Open the registry rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns `PluginError::CdiIo` if the directory cannot be created or read.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| PluginError::CdiIo {
            path: root.clone(),
            source,
        })?;

        let mut registry = Self {
            root,
            specs: Vec::new(),
        };
        registry.refresh()?;
        Ok(registry)
    }

    /// Directory the registry reads and writes.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reload every spec of our kind from disk.
    ///
    /// Files that fail to parse are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns `PluginError::CdiIo` if the directory cannot be listed.
    pub fn refresh(&mut self) -> Result<()> {
        let entries = fs::read_dir(&self.root).map_err(|source| PluginError::CdiIo {
            path: self.root.clone(),
            source,
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut specs = Vec::new();
        for path in paths {
            let spec = match fs::read(&path)
                .map_err(|e| e.to_string())
                .and_then(|bytes| {
                    serde_json::from_slice::<CdiSpec>(&bytes).map_err(|e| e.to_string())
                }) {
                Ok(spec) => spec,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable CDI spec");
                    continue;
                }
            };
            if spec.kind == CDI_KIND {
                specs.push((path, spec));
            }
        }

        debug!(root = %self.root.display(), specs = specs.len(), "Refreshed CDI registry");
        self.specs = specs;
        Ok(())
    }

    /// Look up a device by its qualified name.
    #[must_use]
    pub fn get_device(&self, qualified: &str) -> Option<&CdiDevice> {
        let (kind, name) = qualified.split_once('=')?;
        if kind != CDI_KIND {
            return None;
        }
        self.devices().find(|d| d.name == name)
    }

    /// Every device of our kind, across all specs.
    pub fn devices(&self) -> impl Iterator<Item = &CdiDevice> {
        self.specs.iter().flat_map(|(_, spec)| spec.devices.iter())
    }

    /// Make the registry describe exactly the `detected` devices.
    ///
    /// Entries of absent devices are dropped, existing entries are kept as
    /// written, and new devices are appended to the first spec (or to a new
    /// spec file if there is none).
    ///
    /// # Errors
    ///
    /// Returns an error if a spec file cannot be written.
    pub fn sync_detected_devices(&mut self, detected: &DeviceMap) -> Result<()> {
        let mut to_add: DeviceMap = detected.clone();

        for (path, spec) in &mut self.specs {
            let before = spec.devices.len();
            spec.devices.retain(|d| {
                let keep = detected.values().any(|dev| dev.cdi_name == d.name);
                if !keep {
                    info!(device = %d.name, "Removing undetected device from CDI registry");
                }
                keep
            });
            to_add.retain(|_, dev| !spec.devices.iter().any(|d| d.name == dev.cdi_name));

            if spec.devices.len() != before {
                write_spec(path, spec)?;
            }
        }

        self.append(to_add.values())?;
        self.refresh()
    }

    /// Add devices not yet in the registry. Existing entries are untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if a spec file cannot be written.
    pub fn add_devices<'a>(
        &mut self,
        devices: impl IntoIterator<Item = &'a DeviceDescriptor>,
    ) -> Result<()> {
        let new: Vec<&DeviceDescriptor> = devices
            .into_iter()
            .filter(|dev| self.get_device(&qualified_name(&dev.cdi_name)).is_none())
            .collect();
        self.append(new)?;
        self.refresh()
    }

    /// Remove the device named `name` from every spec.
    ///
    /// Returns whether anything was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if a spec file cannot be written.
    pub fn remove_device(&mut self, name: &str) -> Result<bool> {
        let mut removed = false;
        for (path, spec) in &mut self.specs {
            let before = spec.devices.len();
            spec.devices.retain(|d| d.name != name);
            if spec.devices.len() != before {
                info!(device = %name, "Removing device from CDI registry");
                write_spec(path, spec)?;
                removed = true;
            }
        }
        Ok(removed)
    }

    fn append<'a>(&mut self, devices: impl IntoIterator<Item = &'a DeviceDescriptor>) -> Result<()> {
        let entries: Vec<CdiDevice> = devices.into_iter().map(CdiDevice::for_device).collect();
        if entries.is_empty() {
            return Ok(());
        }
        info!(count = entries.len(), "Adding devices to CDI registry");

        if let Some((path, spec)) = self.specs.first_mut() {
            spec.devices.extend(entries);
            return write_spec(path, spec);
        }

        let path = self.root.join(DEFAULT_SPEC_FILE);
        let spec = CdiSpec {
            devices: entries,
            ..CdiSpec::new()
        };
        write_spec(&path, &spec)?;
        self.specs.push((path, spec));
        Ok(())
    }
}

/// Write a spec through a temporary file so readers never see a partial one.
fn write_spec(path: &Path, spec: &CdiSpec) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(spec).map_err(|source| PluginError::CdiEncode {
        path: path.to_path_buf(),
        source,
    })?;

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes)
        .and_then(|()| fs::rename(&tmp, path))
        .map_err(|source| PluginError::CdiIo {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::fake_devices;
    use devalloc_core::{DeviceType, DeviceUid};
    use tempfile::TempDir;

    fn names(registry: &CdiRegistry) -> Vec<String> {
        let mut names: Vec<String> = registry.devices().map(|d| d.name.clone()).collect();
        names.sort();
        names
    }

    fn drm_device(uid: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            uid: DeviceUid::new(uid),
            cdi_name: uid.to_string(),
            device_type: DeviceType::Type0,
            card: Some("card0".to_string()),
            renderd: Some("renderD128".to_string()),
        }
    }

    #[test]
    fn qualified_names() {
        assert_eq!(
            qualified_name("fakeDevice00"),
            "devices.example.com/device=fakeDevice00"
        );
    }

    #[test]
    fn sync_creates_spec_and_resolves_devices() {
        let dir = TempDir::new().unwrap();
        let mut registry = CdiRegistry::open(dir.path()).unwrap();
        registry.sync_detected_devices(&fake_devices()).unwrap();

        assert!(dir.path().join(DEFAULT_SPEC_FILE).exists());
        assert_eq!(registry.devices().count(), 5);
        assert!(registry
            .get_device("devices.example.com/device=fakeDevice02")
            .is_some());
        assert!(registry.get_device("other.com/device=fakeDevice02").is_none());
        assert!(registry.get_device("fakeDevice02").is_none());

        // A fresh registry sees the same devices.
        let reopened = CdiRegistry::open(dir.path()).unwrap();
        assert_eq!(names(&reopened), names(&registry));
    }

    #[test]
    fn sync_drops_absent_and_keeps_present() {
        let dir = TempDir::new().unwrap();
        let mut registry = CdiRegistry::open(dir.path()).unwrap();
        registry.sync_detected_devices(&fake_devices()).unwrap();

        let mut detected = fake_devices();
        detected.remove("fakeDevice01");
        let extra = drm_device("0000:00:02.0-0x8086-0x56a0");
        detected.insert(extra.uid.clone(), extra);
        registry.sync_detected_devices(&detected).unwrap();

        let names = names(&registry);
        assert_eq!(names.len(), 5);
        assert!(!names.contains(&"fakeDevice01".to_string()));
        assert!(names.contains(&"0000:00:02.0-0x8086-0x56a0".to_string()));

        let entry = registry
            .get_device(&qualified_name("0000:00:02.0-0x8086-0x56a0"))
            .unwrap();
        let paths: Vec<&str> = entry
            .container_edits
            .device_nodes
            .iter()
            .map(|n| n.path.as_str())
            .collect();
        assert_eq!(paths, ["/dev/dri/card0", "/dev/dri/renderD128"]);
        assert_eq!(
            entry.container_edits.env,
            ["DEVALLOC_DEVICE_UID=0000:00:02.0-0x8086-0x56a0"]
        );
    }

    #[test]
    fn foreign_specs_are_ignored() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("vendor.json"),
            r#"{"cdiVersion":"0.5.0","kind":"vendor.com/gpu","devices":[{"name":"g0","containerEdits":{}}]}"#,
        )
        .unwrap();
        fs::write(dir.path().join("broken.json"), "{not json").unwrap();

        let mut registry = CdiRegistry::open(dir.path()).unwrap();
        assert_eq!(registry.devices().count(), 0);

        registry.sync_detected_devices(&fake_devices()).unwrap();
        let foreign = fs::read_to_string(dir.path().join("vendor.json")).unwrap();
        assert!(foreign.contains("vendor.com/gpu"));
    }

    #[test]
    fn add_is_additive_and_remove_reports() {
        let dir = TempDir::new().unwrap();
        let mut registry = CdiRegistry::open(dir.path()).unwrap();
        registry.sync_detected_devices(&fake_devices()).unwrap();

        let extra = DeviceDescriptor::fake("hotplug0");
        registry.add_devices([&extra]).unwrap();
        registry.add_devices([&extra]).unwrap();
        assert_eq!(registry.devices().count(), 6);

        assert!(registry.remove_device("hotplug0").unwrap());
        assert!(!registry.remove_device("hotplug0").unwrap());
        assert_eq!(registry.devices().count(), 5);
    }
}
