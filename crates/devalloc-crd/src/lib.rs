//! Custom resources and record storage for devalloc.
//!
//! This crate owns the per-node allocation record, the parameter objects
//! claims and classes point at, and the storage traits used to read and
//! write them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐                    ┌──────────────────────┐
//! │     Controller       │                    │     Node Plugin      │
//! │  (claimRequests,     │                    │  (allocatableDevices,│
//! │   claimAllocations)  │                    │   claimAllocations,  │
//! │                      │                    │   status)            │
//! └──────────┬───────────┘                    └───────────┬──────────┘
//!            │            ┌──────────────────┐            │
//!            └───────────▶│   RecordStore    │◀───────────┘
//!                         └────────┬─────────┘
//!                    ┌─────────────┴─────────────┐
//!                    ▼                           ▼
//!           ┌────────────────┐          ┌──────────────────┐
//!           │ KubeRecordStore│          │ MemoryRecordStore│
//!           │ (API server)   │          │ (test-utils)     │
//!           └────────────────┘          └──────────────────┘
//! ```
//!
//! Every write carries the `resourceVersion` it was computed from. A stale
//! write fails with [`CrdError::Conflict`]; callers reload and retry through
//! [`retry_on_conflict`].
//!
//! # Example
//!
//! ```no_run
//! use devalloc_core::NodeName;
//! use devalloc_crd::{KubeRecordStore, RecordStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let store = KubeRecordStore::new(client, "default", std::time::Duration::from_secs(10));
//!
//! let record = store.get(&NodeName::new("worker-1")).await?;
//! println!("ready: {}", record.is_ready());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod k8s;
pub mod params;
pub mod record;
pub mod retry;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use error::{CrdError, Result};
pub use k8s::{KubeParameterStore, KubeRecordStore};
pub use params::{ClaimParameters, ClassParameters, ParametersRef};
pub use retry::{retry_on_conflict, Conflict, RetryPolicy};
pub use types::{
    AllocatableDevice, AllocatedDevice, AllocationStateStatus, DeviceClaimParameters,
    DeviceClaimParametersSpec, DeviceClassParameters, DeviceClassParametersSpec, DeviceSelector,
    NodeAllocationState, NodeAllocationStateSpec, RequestedDevice, RequestedDevices,
};

#[cfg(any(test, feature = "test-utils"))]
pub use mock::{MemoryParameterStore, MemoryRecordStore};

use async_trait::async_trait;
use devalloc_core::NodeName;
use tracing::info;

/// Whole-document access to node allocation records.
///
/// Records are keyed by node name within a single namespace. Writes are
/// rejected with [`CrdError::Conflict`] when the record's `resourceVersion`
/// no longer matches the stored one.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch a node's record.
    ///
    /// # Errors
    ///
    /// Returns `CrdError::NotFound` if the node has no record.
    async fn get(&self, node: &NodeName) -> Result<NodeAllocationState>;

    /// List the names of every record in the namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing fails.
    async fn list_names(&self) -> Result<Vec<NodeName>>;

    /// Create a new record.
    ///
    /// # Errors
    ///
    /// Returns `CrdError::Conflict` if the record already exists.
    async fn create(&self, record: &NodeAllocationState) -> Result<NodeAllocationState>;

    /// Replace a record's spec.
    ///
    /// # Errors
    ///
    /// Returns `CrdError::Conflict` if the record changed since it was read.
    async fn update_spec(&self, record: &NodeAllocationState) -> Result<NodeAllocationState>;

    /// Set a record's status.
    ///
    /// # Errors
    ///
    /// Returns `CrdError::Conflict` if the record changed since it was read.
    async fn update_status(
        &self,
        record: &NodeAllocationState,
        status: AllocationStateStatus,
    ) -> Result<NodeAllocationState>;

    /// Fetch a node's record, creating an empty one if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the record can be neither read nor created.
    async fn get_or_create(&self, node: &NodeName) -> Result<NodeAllocationState> {
        match self.get(node).await {
            Err(e) if e.is_not_found() => {
                info!(node = %node, "Creating allocation record");
                let mut record =
                    NodeAllocationState::new(node.as_str(), NodeAllocationStateSpec::default());
                record.status = Some(AllocationStateStatus::NotReady);
                self.create(&record).await
            }
            other => other,
        }
    }
}

/// Lookup of class and claim parameter objects.
#[async_trait]
pub trait ParameterStore: Send + Sync {
    /// Fetch a claim parameters object.
    ///
    /// # Errors
    ///
    /// Returns `CrdError::NotFound` if the object does not exist.
    async fn get_claim_parameters(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<DeviceClaimParametersSpec>;

    /// Fetch a cluster-scoped class parameters object.
    ///
    /// # Errors
    ///
    /// Returns `CrdError::NotFound` if the object does not exist.
    async fn get_class_parameters(&self, name: &str) -> Result<DeviceClassParametersSpec>;
}
