//! The node-side driver.
//!
//! This module provides the [`NodePlugin`] trait invoked by the node runtime
//! and the [`NodeDriver`] implementation that keeps the node's allocation
//! record, its local state, and its CDI registry in step.

use std::sync::Arc;

use async_trait::async_trait;
use devalloc_core::{ClaimUid, DeviceDescriptor, DeviceMap, DeviceUid, NodeName};
use devalloc_crd::{retry_on_conflict, AllocationStateStatus, RecordStore, RetryPolicy};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::cdi::CdiRegistry;
use crate::error::Result;
use crate::state::NodeState;

/// Operations the node runtime performs on claims placed on this node.
#[async_trait]
pub trait NodePlugin: Send + Sync {
    /// Make a claim's devices available to containers.
    ///
    /// Returns the qualified CDI names of the claim's devices.
    ///
    /// # Errors
    ///
    /// Returns `PluginError::NoAllocation` if nothing is committed to the
    /// claim on this node, or an error if any device cannot be resolved.
    async fn prepare(&self, claim: &ClaimUid) -> Result<Vec<String>>;

    /// Release a claim's devices on this node.
    ///
    /// Unpreparing a claim that is not prepared is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be read or written.
    async fn unprepare(&self, claim: &ClaimUid) -> Result<()>;
}

/// Node driver backed by the node's allocation record.
pub struct NodeDriver {
    node: NodeName,
    records: Arc<dyn RecordStore>,
    state: Mutex<NodeState>,
    retry: RetryPolicy,
}

impl NodeDriver {
    /// Bring the node online.
    ///
    /// Reconciles `detected` into the CDI registry, fetches or creates the
    /// node's record, publishes the allocatable set, and marks the record
    /// ready.
    ///
    /// # Errors
    ///
    /// Returns an error if the CDI registry cannot be written, the record
    /// cannot be read or written, or the record commits a device that is no
    /// longer present.
    pub async fn start(
        node: NodeName,
        records: Arc<dyn RecordStore>,
        mut cdi: CdiRegistry,
        detected: DeviceMap,
        retry: RetryPolicy,
    ) -> Result<Self> {
        info!(node = %node, devices = detected.len(), "Starting node driver");
        cdi.sync_detected_devices(&detected)?;

        records.get_or_create(&node).await?;

        let driver = Self {
            node,
            records,
            state: Mutex::new(NodeState::new(cdi, detected)),
            retry,
        };

        let this = &driver;
        retry_on_conflict(driver.retry, move || this.publish()).await?;
        info!(node = %driver.node, "Node driver ready");
        Ok(driver)
    }

    /// Node this driver serves.
    #[must_use]
    pub const fn node(&self) -> &NodeName {
        &self.node
    }

    /// Devices currently allocatable on this node.
    pub async fn allocatable(&self) -> DeviceMap {
        self.state.lock().await.allocatable().clone()
    }

    /// Add a device to the node.
    ///
    /// The record picks the device up on the next prepare or unprepare.
    ///
    /// # Errors
    ///
    /// Returns an error if the CDI registry cannot be updated.
    pub async fn announce_device(&self, device: DeviceDescriptor) -> Result<()> {
        self.state.lock().await.announce(device)
    }

    /// Remove a device from the node.
    ///
    /// The record drops the device on the next prepare or unprepare.
    ///
    /// # Errors
    ///
    /// Returns an error if the device is unknown or the CDI registry cannot
    /// be updated.
    pub async fn unannounce_device(&self, uid: &DeviceUid) -> Result<()> {
        self.state.lock().await.unannounce(uid)
    }

    /// Publish the inventory and mark the record ready.
    async fn publish(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut record = self.records.get(&self.node).await?;

        state.sync_from_spec(&record.spec)?;
        record.spec = state.updated_spec(&record.spec);

        let record = self.records.update_spec(&record).await?;
        if !record.is_ready() {
            self.records
                .update_status(&record, AllocationStateStatus::Ready)
                .await?;
        }
        Ok(())
    }

    async fn prepare_once(&self, claim: &ClaimUid) -> Result<Vec<String>> {
        let mut state = self.state.lock().await;
        let mut record = self.records.get(&self.node).await?;

        state.sync_from_spec(&record.spec)?;
        let names = state.allocated_cdi_devices(claim)?;

        let updated = state.updated_spec(&record.spec);
        if updated != record.spec {
            debug!(node = %self.node, "Pushing local inventory to record");
            record.spec = updated;
            self.records.update_spec(&record).await?;
        }
        Ok(names)
    }

    async fn unprepare_once(&self, claim: &ClaimUid) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut record = self.records.get(&self.node).await?;

        state.sync_from_spec(&record.spec)?;
        if !state.free(claim) {
            info!(claim = %claim, node = %self.node, "Claim not prepared on node, nothing to release");
        }

        let updated = state.updated_spec(&record.spec);
        if updated != record.spec {
            record.spec = updated;
            self.records.update_spec(&record).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl NodePlugin for NodeDriver {
    async fn prepare(&self, claim: &ClaimUid) -> Result<Vec<String>> {
        let names = retry_on_conflict(self.retry, move || self.prepare_once(claim)).await?;
        info!(claim = %claim, node = %self.node, devices = ?names, "Prepared claim");
        Ok(names)
    }

    async fn unprepare(&self, claim: &ClaimUid) -> Result<()> {
        retry_on_conflict(self.retry, move || self.unprepare_once(claim)).await?;
        info!(claim = %claim, node = %self.node, "Unprepared claim");
        Ok(())
    }
}
