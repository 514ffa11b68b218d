//! Error types for record and parameter storage.

use devalloc_core::{ClaimUid, DeviceUid};
use thiserror::Error;

/// A result type using `CrdError`.
pub type Result<T> = std::result::Result<T, CrdError>;

/// Errors that can occur while reading or writing custom resources.
#[derive(Debug, Error)]
pub enum CrdError {
    /// The requested object does not exist.
    #[error("{kind} not found: {name}")]
    NotFound {
        /// Resource kind.
        kind: &'static str,
        /// Object name.
        name: String,
    },

    /// The object changed since it was read.
    #[error("conflicting update to {0}")]
    Conflict(String),

    /// The API server did not answer in time.
    #[error("timed out talking to the API server: {0}")]
    Timeout(String),

    /// Kubernetes API error.
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// A claim references a device the node does not advertise.
    #[error("claim {claim} references device {device} which is not allocatable")]
    InconsistentState {
        /// Claim whose allocation is broken.
        claim: ClaimUid,
        /// Device that could not be found.
        device: DeviceUid,
    },

    /// A parameters reference named an unknown kind.
    #[error("unsupported parameters kind: {0}")]
    UnsupportedKind(String),

    /// A parameters reference named the wrong API group.
    #[error("incorrect API group and version: {actual} (expected {expected})")]
    IncorrectApiGroup {
        /// Group found on the reference.
        actual: String,
        /// Group this driver serves.
        expected: String,
    },

    /// A parameters object failed validation.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
}

impl CrdError {
    /// Build a `NotFound` error.
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Whether this error is an optimistic-concurrency conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Whether this error means the object is absent.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Convert a kube error, mapping well-known status codes.
    pub(crate) fn from_kube(kind: &'static str, name: &str, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ref resp) if resp.code == 404 => Self::not_found(kind, name),
            kube::Error::Api(ref resp) if resp.code == 409 => Self::Conflict(name.to_string()),
            other => Self::Kube(other),
        }
    }
}
