//! Scheduling-time allocation controller for devalloc.
//!
//! This crate provides the [`Driver`] trait and the [`DeviceController`]
//! implementation invoked by the claim reconciliation engine. It handles:
//!
//! - Class and claim parameter resolution
//! - Filtering candidate nodes for a batch of co-scheduled claims
//! - Allocating devices, either on a node of its choosing or on the node the
//!   scheduler picked
//! - Releasing a claim's devices
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 Claim Reconciliation Engine                     │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      DeviceController                           │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────────┐    │
//! │  │  Unsuitable │ │  Allocate   │ │      Deallocate         │    │
//! │  │  Nodes      │ │             │ │                         │    │
//! │  └─────────────┘ └─────────────┘ └─────────────────────────┘    │
//! │         │               │                    │                  │
//! │   ┌─────┴───────┬───────┴────────┬───────────┘                  │
//! │   ▼             ▼                ▼                              │
//! │ ┌──────────┐ ┌──────────────┐ ┌──────────────┐                  │
//! │ │ Pending  │ │  Selection   │ │ Per-Node     │                  │
//! │ │ Requests │ │  Algorithm   │ │ Mutex        │                  │
//! │ └──────────┘ └──────────────┘ └──────────────┘                  │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │              NodeAllocationState records (RecordStore)          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use devalloc_controller::{DeviceController, Driver};
//! use devalloc_crd::{KubeParameterStore, KubeRecordStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let timeout = Duration::from_secs(10);
//! let controller = DeviceController::new(
//!     Arc::new(KubeRecordStore::new(client.clone(), "default", timeout)),
//!     Arc::new(KubeParameterStore::new(client, timeout)),
//! );
//! # let _ = controller;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod driver;
pub mod error;
pub mod lock;
pub mod pending;
pub mod pool;
pub mod selection;
pub mod types;

pub use config::ControllerConfig;
pub use driver::{DeviceController, Driver};
pub use error::{ControllerError, Result};
pub use lock::PerNodeMutex;
pub use pending::PendingClaimRequests;
pub use pool::WorkerPool;
pub use selection::{select_devices, ClaimRequest};
pub use types::{AllocationMode, AllocationResult, ClaimAllocation, ResourceClaim, ResourceClass};
