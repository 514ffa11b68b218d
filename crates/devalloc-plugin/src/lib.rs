//! Node-resident plugin for devalloc.
//!
//! This crate runs on every node. At startup it discovers the node's
//! devices, publishes them to the CDI registry and to the node's allocation
//! record, and marks the record ready. Afterwards it prepares and unprepares
//! claims the controller has committed to the node.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Node Runtime (HTTP)                       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        NodeDriver                           │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────┐    │
//! │  │  Prepare    │ │  Unprepare  │ │  Announce /         │    │
//! │  │             │ │             │ │  Unannounce         │    │
//! │  └─────────────┘ └─────────────┘ └─────────────────────┘    │
//! │                     NodeState (mutex)                       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!               ┌──────────────┼──────────────┐
//!               ▼              ▼              ▼
//!        ┌──────────┐   ┌──────────┐   ┌──────────┐
//!        │  Record  │   │   CDI    │   │  sysfs   │
//!        │  (K8s)   │   │  specs   │   │   DRM    │
//!        └──────────┘   └──────────┘   └──────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use devalloc_crd::{KubeRecordStore, RetryPolicy};
//! use devalloc_plugin::{enumerate_devices, CdiRegistry, NodeDriver, NodePlugin};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let records = Arc::new(KubeRecordStore::new(client, "default", Duration::from_secs(10)));
//!
//! let driver = NodeDriver::start(
//!     "worker-1".into(),
//!     records,
//!     CdiRegistry::open("/etc/cdi")?,
//!     enumerate_devices("/sys/class/drm".as_ref()),
//!     RetryPolicy::default(),
//! )
//! .await?;
//!
//! let cdi_names = driver.prepare(&"claim-uid".into()).await?;
//! println!("Inject: {cdi_names:?}");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod cdi;
pub mod config;
pub mod discovery;
pub mod driver;
pub mod error;
pub mod state;

pub use cdi::{qualified_name, CdiDevice, CdiRegistry, CdiSpec, ContainerEdits, DeviceNode, CDI_KIND};
pub use config::PluginConfig;
pub use discovery::{enumerate_devices, fake_devices};
pub use driver::{NodeDriver, NodePlugin};
pub use error::{PluginError, Result};
pub use state::{ClaimAllocations, NodeState};
