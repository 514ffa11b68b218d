//! Identifier types for devalloc.
//!
//! Claims, nodes, and devices are all identified by opaque strings handed to
//! us by Kubernetes or by hardware discovery. Wrapping them keeps a claim UID
//! from being passed where a node name is expected.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

use crate::error::CoreError;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $what:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw string value.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Parse a non-empty value.
            ///
            /// # Errors
            ///
            /// Returns an error if the value is empty.
            pub fn parse(value: &str) -> Result<Self, CoreError> {
                if value.is_empty() {
                    return Err(CoreError::EmptyId($what));
                }
                Ok(Self(value.to_string()))
            }

            /// Borrow the underlying string.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume the identifier, returning the underlying string.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// The UID of a `ResourceClaim`, assigned by the API server.
    ClaimUid,
    "claim"
);

string_id!(
    /// The name of a cluster node. Also the name of its allocation record.
    NodeName,
    "node"
);

string_id!(
    /// Stable hardware identity of a device, e.g. `0000:03:00.0-0x8086-0x56a0`.
    DeviceUid,
    "device"
);
