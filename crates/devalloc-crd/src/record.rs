//! Read-side helpers on a node's allocation record.

use std::collections::BTreeMap;

use devalloc_core::{ClaimUid, DeviceUid, NodeName};
use kube::ResourceExt;
use tracing::{debug, warn};

use crate::error::{CrdError, Result};
use crate::types::{
    AllocatableDevice, AllocatedDevice, AllocationStateStatus, NodeAllocationState,
    NodeAllocationStateSpec,
};

impl NodeAllocationState {
    /// The node this record belongs to.
    #[must_use]
    pub fn node_name(&self) -> NodeName {
        NodeName::new(self.name_any())
    }

    /// Whether the node plugin has published its inventory.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status == Some(AllocationStateStatus::Ready)
    }
}

impl NodeAllocationStateSpec {
    /// Whether a device is committed to any claim.
    #[must_use]
    pub fn device_is_allocated(&self, uid: &DeviceUid) -> bool {
        self.claim_allocations
            .values()
            .flatten()
            .any(|device| &device.uid == uid)
    }

    /// Allocatable devices not committed to any claim.
    #[must_use]
    pub fn available(&self) -> BTreeMap<DeviceUid, AllocatableDevice> {
        let available: BTreeMap<_, _> = self
            .allocatable_devices
            .iter()
            .filter(|(uid, _)| !self.device_is_allocated(uid))
            .map(|(uid, device)| (uid.clone(), device.clone()))
            .collect();
        debug!(
            allocatable = self.allocatable_devices.len(),
            allocations = self.claim_allocations.len(),
            available = available.len(),
            "Computed available devices"
        );
        available
    }

    /// Whether every listed device is currently available.
    pub fn devices_available<'a>(&self, uids: impl IntoIterator<Item = &'a DeviceUid>) -> bool {
        let available = self.available();
        uids.into_iter().all(|uid| {
            let present = available.contains_key(uid);
            if !present {
                warn!(device = %uid, "Device is no longer available");
            }
            present
        })
    }

    /// Promote a claim's recorded selection into a committed allocation.
    ///
    /// Does nothing if the claim has no recorded selection.
    ///
    /// # Errors
    ///
    /// Returns `CrdError::InconsistentState` if a selected device is not
    /// allocatable on this node. The spec is left untouched in that case.
    pub fn commit_claim_request(&mut self, claim: &ClaimUid) -> Result<()> {
        let Some(request) = self.claim_requests.get(claim) else {
            return Ok(());
        };

        let allocated = request
            .uids()
            .map(|uid| {
                self.allocatable_devices
                    .get(uid)
                    .map(AllocatedDevice::from)
                    .ok_or_else(|| CrdError::InconsistentState {
                        claim: claim.clone(),
                        device: uid.clone(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        self.claim_allocations.insert(claim.clone(), allocated);
        Ok(())
    }

    /// Drop every trace of a claim. Returns whether anything was removed.
    pub fn remove_claim(&mut self, claim: &ClaimUid) -> bool {
        let had_request = self.claim_requests.remove(claim).is_some();
        let had_allocation = self.claim_allocations.remove(claim).is_some();
        had_request || had_allocation
    }
}
