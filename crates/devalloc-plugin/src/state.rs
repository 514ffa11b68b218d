//! The plugin's in-memory view of its node.
//!
//! [`NodeState`] holds the node's allocatable devices and the devices
//! committed to each claim, and translates between that view, the node's
//! allocation record, and the CDI registry.

use std::collections::BTreeMap;

use devalloc_core::{ClaimUid, DeviceDescriptor, DeviceMap, DeviceUid};
use devalloc_crd::{AllocatableDevice, AllocatedDevice, CrdError, NodeAllocationStateSpec};
use tracing::{debug, error, info};

use crate::cdi::{qualified_name, CdiRegistry};
use crate::{PluginError, Result};

/// Devices committed to each claim on this node.
pub type ClaimAllocations = BTreeMap<ClaimUid, Vec<DeviceDescriptor>>;

/// Local allocatable devices, claim allocations and the CDI registry.
#[derive(Debug)]
pub struct NodeState {
    cdi: CdiRegistry,
    allocatable: DeviceMap,
    allocations: ClaimAllocations,
}

impl NodeState {
    /// Create a state with no allocations.
    #[must_use]
    pub fn new(cdi: CdiRegistry, allocatable: DeviceMap) -> Self {
        Self {
            cdi,
            allocatable,
            allocations: ClaimAllocations::new(),
        }
    }

    /// Devices the node can hand out.
    #[must_use]
    pub const fn allocatable(&self) -> &DeviceMap {
        &self.allocatable
    }

    /// Replace local allocations with the record's committed ones.
    ///
    /// Leaves local state untouched on error.
    ///
    /// # Errors
    ///
    /// Returns `CrdError::InconsistentState` if a committed device is not
    /// allocatable on this node.
    pub fn sync_from_spec(&mut self, spec: &NodeAllocationStateSpec) -> Result<()> {
        let mut allocations = ClaimAllocations::new();

        for (claim, devices) in &spec.claim_allocations {
            let mut local = Vec::with_capacity(devices.len());
            for device in devices {
                let Some(known) = self.allocatable.get(&device.uid) else {
                    error!(claim = %claim, device = %device.uid, "Allocated device is no longer available");
                    return Err(PluginError::Crd(CrdError::InconsistentState {
                        claim: claim.clone(),
                        device: device.uid.clone(),
                    }));
                };
                local.push(known.clone());
            }
            allocations.insert(claim.clone(), local);
        }

        debug!(claims = allocations.len(), "Synced allocations from record");
        self.allocations = allocations;
        Ok(())
    }

    /// Drop a claim's local allocation. Returns whether it was present.
    pub fn free(&mut self, claim: &ClaimUid) -> bool {
        self.allocations.remove(claim).is_some()
    }

    /// A copy of `spec` carrying the local allocatable set and allocations.
    #[must_use]
    pub fn updated_spec(&self, spec: &NodeAllocationStateSpec) -> NodeAllocationStateSpec {
        let mut out = spec.clone();

        out.allocatable_devices = self
            .allocatable
            .values()
            .map(|d| {
                (
                    d.uid.clone(),
                    AllocatableDevice {
                        uid: d.uid.clone(),
                        device_type: d.device_type,
                        cdi_device: d.cdi_name.clone(),
                    },
                )
            })
            .collect();

        out.claim_allocations = self
            .allocations
            .iter()
            .map(|(claim, devices)| {
                let devices = devices
                    .iter()
                    .map(|d| AllocatedDevice {
                        uid: d.uid.clone(),
                        device_type: d.device_type,
                        cdi_device: d.cdi_name.clone(),
                    })
                    .collect();
                (claim.clone(), devices)
            })
            .collect();

        out
    }

    /// Qualified CDI names of the devices committed to `claim`.
    ///
    /// # Errors
    ///
    /// Returns `PluginError::NoAllocation` if the claim has no local
    /// allocation or an empty one, or `PluginError::CdiDeviceNotFound` if any of its devices
    /// is missing from the CDI registry. No partial list is returned.
    pub fn allocated_cdi_devices(&self, claim: &ClaimUid) -> Result<Vec<String>> {
        let devices = self
            .allocations
            .get(claim)
            .filter(|devices| !devices.is_empty())
            .ok_or_else(|| PluginError::NoAllocation(claim.clone()))?;

        devices
            .iter()
            .map(|device| {
                let name = qualified_name(&device.cdi_name);
                match self.cdi.get_device(&name) {
                    Some(_) => Ok(name),
                    None => {
                        error!(claim = %claim, device = %device.uid, "Device not found in CDI registry");
                        Err(PluginError::CdiDeviceNotFound {
                            claim: claim.clone(),
                            name,
                        })
                    }
                }
            })
            .collect()
    }

    /// Add a device to the allocatable set and the CDI registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the CDI registry cannot be updated.
    pub fn announce(&mut self, device: DeviceDescriptor) -> Result<()> {
        self.cdi.refresh()?;
        self.cdi.add_devices([&device])?;
        info!(device = %device.uid, "Announced device");
        self.allocatable.insert(device.uid.clone(), device);
        Ok(())
    }

    /// Remove a device from the allocatable set and the CDI registry.
    ///
    /// # Errors
    ///
    /// Returns `PluginError::UnknownDevice` if the device is not allocatable,
    /// or an error if the CDI registry cannot be updated.
    pub fn unannounce(&mut self, uid: &DeviceUid) -> Result<()> {
        let device = self
            .allocatable
            .remove(uid)
            .ok_or_else(|| PluginError::UnknownDevice(uid.clone()))?;

        self.cdi.refresh()?;
        self.cdi.remove_device(&device.cdi_name)?;
        info!(device = %uid, "Unannounced device");
        Ok(())
    }
}
