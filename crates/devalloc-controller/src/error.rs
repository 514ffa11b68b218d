//! Error types for the controller crate.

use devalloc_core::{ClaimUid, NodeName};
use devalloc_crd::CrdError;
use thiserror::Error;

/// Errors that can occur while allocating devices to claims.
#[derive(Error, Debug)]
pub enum ControllerError {
    /// The node's plugin has not published its inventory yet.
    #[error("allocation record for node {0} is not ready")]
    NotReady(NodeName),

    /// The node cannot satisfy the claim's request.
    #[error("unable to allocate devices on node {node}: insufficient resources")]
    InsufficientResources {
        /// Node that was asked.
        node: NodeName,
    },

    /// Immediate allocation found no node with enough free devices.
    #[error("no suitable node found for claim {0}")]
    NoSuitableNode(ClaimUid),

    /// Pending allocation arrived before filtering selected devices.
    #[error("no allocation requests generated for claim {claim} on node {node} yet")]
    NoPendingRequest {
        /// Claim being allocated.
        claim: ClaimUid,
        /// Node chosen by the scheduler.
        node: NodeName,
    },

    /// Record or parameter storage failed.
    #[error(transparent)]
    Crd(#[from] CrdError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ControllerError {
    /// Check if the caller should try again later.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::NotReady(_) | Self::NoPendingRequest { .. } => true,
            Self::Crd(e) => matches!(
                e,
                CrdError::Conflict(_) | CrdError::Timeout(_) | CrdError::Kube(_)
            ),
            Self::InsufficientResources { .. } | Self::NoSuitableNode(_) | Self::Config(_) => false,
        }
    }

    /// Get the HTTP status code for this error.
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::NotReady(_) => 503,
            Self::InsufficientResources { .. }
            | Self::NoSuitableNode(_)
            | Self::NoPendingRequest { .. } => 409,
            Self::Config(_) => 400,
            Self::Crd(e) => match e {
                CrdError::NotFound { .. } => 404,
                CrdError::Conflict(_) => 409,
                CrdError::Timeout(_) => 504,
                CrdError::UnsupportedKind(_)
                | CrdError::IncorrectApiGroup { .. }
                | CrdError::InvalidParameters(_) => 400,
                CrdError::Kube(_) => 503,
                CrdError::InconsistentState { .. } => 500,
            },
        }
    }
}

/// A specialized Result type for controller operations.
pub type Result<T> = std::result::Result<T, ControllerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_classification() {
        assert!(ControllerError::NotReady(NodeName::new("n1")).is_retriable());
        assert!(ControllerError::Crd(CrdError::Conflict("n1".into())).is_retriable());
        assert!(!ControllerError::NoSuitableNode(ClaimUid::new("c")).is_retriable());
        assert!(!ControllerError::Crd(CrdError::UnsupportedKind("X".into())).is_retriable());
    }

    #[test]
    fn status_codes() {
        let insufficient = ControllerError::InsufficientResources {
            node: NodeName::new("n1"),
        };
        assert_eq!(insufficient.http_status_code(), 409);
        assert_eq!(
            ControllerError::Crd(CrdError::not_found("NodeAllocationState", "n1"))
                .http_status_code(),
            404
        );
        assert_eq!(
            ControllerError::Crd(CrdError::InvalidParameters("count".into())).http_status_code(),
            400
        );
    }
}
