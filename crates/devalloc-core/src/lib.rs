//! Core types and utilities for devalloc.
//!
//! This crate provides the foundational types shared by the controller and
//! the node plugin:
//!
//! - **Identifiers**: Strongly-typed names for claims, nodes, and devices
//! - **Devices**: Device types and the descriptors produced by discovery
//! - **Error types**: Common error definitions shared across crates
//!
//! # Example
//!
//! ```
//! use devalloc_core::{ClaimUid, DeviceType, NodeName};
//!
//! let claim = ClaimUid::new("7c9e6679-7425-40de-944b-e07fc1f90ae7");
//! let node = NodeName::new("worker-1");
//! let ty: DeviceType = "type0".parse().unwrap();
//!
//! assert_eq!(node.as_str(), "worker-1");
//! assert_eq!(ty, DeviceType::Type0);
//! # let _ = claim;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod device;
pub mod error;
pub mod ids;

pub use device::{DeviceDescriptor, DeviceMap, DeviceType};
pub use error::{CoreError, Result};
pub use ids::{ClaimUid, DeviceUid, NodeName};
