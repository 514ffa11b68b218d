//! Error types for the node plugin.
//!
//! This module defines all errors that can occur while discovering devices,
//! maintaining the CDI registry, and preparing claims.

use std::path::PathBuf;

use devalloc_core::{ClaimUid, DeviceUid};
use devalloc_crd::{Conflict, CrdError};
use thiserror::Error;

/// A result type using `PluginError`.
pub type Result<T> = std::result::Result<T, PluginError>;

/// Errors that can occur in node plugin operations.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The claim has no committed allocation on this node.
    #[error("no devices allocated to claim {0} on this node")]
    NoAllocation(ClaimUid),

    /// An allocated device has no entry in the CDI registry.
    #[error("CDI device {name} for claim {claim} not found in registry")]
    CdiDeviceNotFound {
        /// Claim being prepared.
        claim: ClaimUid,
        /// Qualified CDI name that failed to resolve.
        name: String,
    },

    /// The device is not announced on this node.
    #[error("device {0} is not known on this node")]
    UnknownDevice(DeviceUid),

    /// A CDI spec file could not be read or written.
    #[error("CDI spec I/O error at {path}: {source}")]
    CdiIo {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A CDI spec file could not be encoded.
    #[error("CDI spec encoding error at {path}: {source}")]
    CdiEncode {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// Record store error.
    #[error("record store error: {0}")]
    Crd(#[from] CrdError),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl PluginError {
    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::NoAllocation(_) | Self::UnknownDevice(_) => 404,
            Self::CdiDeviceNotFound { .. } | Self::CdiIo { .. } | Self::CdiEncode { .. } => 500,
            Self::Crd(CrdError::Conflict(_)) => 409,
            Self::Crd(CrdError::NotFound { .. }) => 404,
            Self::Crd(CrdError::Timeout(_)) => 504,
            Self::Crd(CrdError::Kube(_)) => 503,
            Self::Crd(_) => 500,
            Self::Config(_) => 400,
        }
    }

    /// Returns true if this error might be resolved by retrying.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Crd(CrdError::Conflict(_) | CrdError::Timeout(_) | CrdError::Kube(_))
        )
    }
}

impl Conflict for PluginError {
    fn is_conflict(&self) -> bool {
        matches!(self, Self::Crd(e) if e.is_conflict())
    }
}
