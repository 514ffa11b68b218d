//! Custom resource definitions served by the driver.
//!
//! All three kinds live in the `devices.example.com/v1alpha1` API group:
//!
//! - [`NodeAllocationState`]: one per node, the only channel between the
//!   controller and the node plugin
//! - [`DeviceClaimParameters`]: per-claim request (count and type)
//! - [`DeviceClassParameters`]: per-class device selectors

use std::collections::BTreeMap;
use std::fmt;

use devalloc_core::{ClaimUid, DeviceType, DeviceUid};
use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// API group of every resource in this crate.
pub const API_GROUP: &str = "devices.example.com";

/// API version of every resource in this crate.
pub const API_VERSION: &str = "v1alpha1";

/// Kind name of [`DeviceClaimParameters`].
pub const CLAIM_PARAMETERS_KIND: &str = "DeviceClaimParameters";

/// Kind name of [`DeviceClassParameters`].
pub const CLASS_PARAMETERS_KIND: &str = "DeviceClassParameters";

/// Largest number of devices a single claim may request.
pub const MAX_DEVICES_PER_CLAIM: u32 = 8;

/// `group/version` string that parameter references must carry.
#[must_use]
pub fn api_group_version() -> String {
    format!("{API_GROUP}/{API_VERSION}")
}

// ============================================================================
// NodeAllocationState
// ============================================================================

/// Lifecycle of a node's allocation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AllocationStateStatus {
    /// The plugin has not yet published its inventory.
    #[default]
    NotReady,
    /// Inventory is published; the controller may allocate against it.
    Ready,
}

impl fmt::Display for AllocationStateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReady => f.write_str("NotReady"),
            Self::Ready => f.write_str("Ready"),
        }
    }
}

/// Spec of a node's allocation record.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[kube(
    group = "devices.example.com",
    version = "v1alpha1",
    kind = "NodeAllocationState",
    namespaced,
    status = "AllocationStateStatus",
    shortname = "nas",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct NodeAllocationStateSpec {
    /// Devices present on the node. Written only by the node plugin.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub allocatable_devices: BTreeMap<DeviceUid, AllocatableDevice>,
    /// Device selections recorded for claims by the controller.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub claim_requests: BTreeMap<ClaimUid, RequestedDevices>,
    /// Committed allocations, one entry per claim.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub claim_allocations: BTreeMap<ClaimUid, Vec<AllocatedDevice>>,
}

/// A device advertised by a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocatableDevice {
    /// Hardware identity.
    pub uid: DeviceUid,
    /// Device type.
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    /// Name of the device in the node's CDI registry.
    pub cdi_device: String,
}

/// A device committed to a claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocatedDevice {
    /// Hardware identity.
    pub uid: DeviceUid,
    /// Device type.
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    /// Name of the device in the node's CDI registry.
    pub cdi_device: String,
}

impl From<&AllocatableDevice> for AllocatedDevice {
    fn from(d: &AllocatableDevice) -> Self {
        Self {
            uid: d.uid.clone(),
            device_type: d.device_type,
            cdi_device: d.cdi_device.clone(),
        }
    }
}

/// A single device picked for a claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedDevice {
    /// Hardware identity.
    pub uid: DeviceUid,
}

/// The devices picked for a claim along with what it asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedDevices {
    /// What the claim asked for.
    pub spec: DeviceClaimParametersSpec,
    /// What was picked.
    pub devices: Vec<RequestedDevice>,
}

impl RequestedDevices {
    /// Whether the selection satisfies the requested count.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.devices.len() == self.spec.count as usize
    }

    /// Iterate over the picked device UIDs.
    pub fn uids(&self) -> impl Iterator<Item = &DeviceUid> {
        self.devices.iter().map(|d| &d.uid)
    }
}

// ============================================================================
// Parameters
// ============================================================================

/// Spec of a claim's parameters object.
#[derive(CustomResource, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[kube(
    group = "devices.example.com",
    version = "v1alpha1",
    kind = "DeviceClaimParameters",
    namespaced,
    schema = "disabled"
)]
pub struct DeviceClaimParametersSpec {
    /// Number of devices requested.
    pub count: u32,
    /// Requested device type.
    #[serde(default, rename = "type")]
    pub device_type: DeviceType,
}

impl Default for DeviceClaimParametersSpec {
    fn default() -> Self {
        Self {
            count: 1,
            device_type: DeviceType::Type0,
        }
    }
}

/// Selects devices by type and name pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSelector {
    /// Device type.
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    /// Name pattern, `*` for any.
    pub name: String,
}

/// Spec of a class's parameters object.
#[derive(CustomResource, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[kube(
    group = "devices.example.com",
    version = "v1alpha1",
    kind = "DeviceClassParameters",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct DeviceClassParametersSpec {
    /// Device selectors for the class.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub device_selector: Vec<DeviceSelector>,
}

impl Default for DeviceClassParametersSpec {
    fn default() -> Self {
        Self {
            device_selector: vec![DeviceSelector {
                device_type: DeviceType::Type0,
                name: "*".to_string(),
            }],
        }
    }
}
