//! Device types and descriptors.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;
use crate::ids::DeviceUid;

/// The kind of device a claim asks for.
///
/// Only one type exists today; the enum keeps the wire format closed so an
/// unknown type in a parameters object is rejected instead of silently
/// matching nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "String", into = "String")]
pub enum DeviceType {
    /// The generic device type exposed by this driver.
    #[default]
    Type0,
}

impl DeviceType {
    /// Wire name of the type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Type0 => "type0",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "type0" => Ok(Self::Type0),
            other => Err(CoreError::UnsupportedDeviceType(other.to_string())),
        }
    }
}

impl TryFrom<String> for DeviceType {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DeviceType> for String {
    fn from(ty: DeviceType) -> Self {
        ty.as_str().to_string()
    }
}

/// A device found on the local node.
///
/// Descriptors are rebuilt on every discovery pass and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Stable hardware identity.
    pub uid: DeviceUid,
    /// Name of the device in the CDI registry. Equal to the UID for discovered
    /// devices so names survive restarts.
    pub cdi_name: String,
    /// Device type.
    pub device_type: DeviceType,
    /// DRM card node, e.g. `card0`.
    pub card: Option<String>,
    /// DRM render node, e.g. `renderD128`.
    pub renderd: Option<String>,
}

impl DeviceDescriptor {
    /// Create a descriptor with no backing device files.
    #[must_use]
    pub fn fake(uid: impl Into<String>) -> Self {
        let uid = DeviceUid::new(uid);
        Self {
            cdi_name: uid.to_string(),
            uid,
            device_type: DeviceType::Type0,
            card: None,
            renderd: None,
        }
    }
}

/// Devices keyed by UID, iterated in UID order.
pub type DeviceMap = BTreeMap<DeviceUid, DeviceDescriptor>;
