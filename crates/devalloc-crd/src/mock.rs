//! In-memory stores for tests.
//!
//! [`MemoryRecordStore`] enforces `resourceVersion` checks the way the API
//! server does, so conflict handling can be exercised without a cluster.

use std::collections::BTreeMap;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use devalloc_core::NodeName;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;
use parking_lot::Mutex;

use crate::error::{CrdError, Result};
use crate::types::{
    AllocationStateStatus, DeviceClaimParametersSpec, DeviceClassParametersSpec,
    NodeAllocationState,
};
use crate::{ParameterStore, RecordStore};

const RECORD_KIND: &str = "NodeAllocationState";

#[derive(Default)]
struct Inner {
    records: BTreeMap<NodeName, NodeAllocationState>,
    next_version: u64,
    injected_conflicts: u32,
    writes: u64,
}

impl Inner {
    fn stamp(&mut self, record: &mut NodeAllocationState) {
        self.next_version += 1;
        record.metadata.resource_version = Some(self.next_version.to_string());
    }

    fn take_injected_conflict(&mut self, name: &str) -> Result<()> {
        if self.injected_conflicts > 0 {
            self.injected_conflicts -= 1;
            return Err(CrdError::Conflict(name.to_string()));
        }
        Ok(())
    }

    fn check_version(&self, record: &NodeAllocationState) -> Result<&NodeAllocationState> {
        let name = record.name_any();
        let stored = self
            .records
            .get(name.as_str())
            .ok_or_else(|| CrdError::not_found(RECORD_KIND, &name))?;
        if stored.metadata.resource_version != record.metadata.resource_version {
            return Err(CrdError::Conflict(name));
        }
        Ok(stored)
    }
}

/// A record store that keeps everything in memory.
#[derive(Default)]
pub struct MemoryRecordStore {
    inner: Mutex<Inner>,
}

impl MemoryRecordStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a record, bypassing version checks.
    pub fn insert(&self, mut record: NodeAllocationState) {
        let mut inner = self.inner.lock();
        inner.stamp(&mut record);
        inner.records.insert(record.node_name(), record);
    }

    /// Current stored copy of a record.
    #[must_use]
    pub fn snapshot(&self, node: &NodeName) -> Option<NodeAllocationState> {
        self.inner.lock().records.get(node).cloned()
    }

    /// Fail the next `count` writes with a conflict.
    pub fn inject_conflicts(&self, count: u32) {
        self.inner.lock().injected_conflicts = count;
    }

    /// Number of successful writes so far.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.inner.lock().writes
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(&self, node: &NodeName) -> Result<NodeAllocationState> {
        self.inner
            .lock()
            .records
            .get(node)
            .cloned()
            .ok_or_else(|| CrdError::not_found(RECORD_KIND, node.as_str()))
    }

    async fn list_names(&self) -> Result<Vec<NodeName>> {
        Ok(self.inner.lock().records.keys().cloned().collect())
    }

    async fn create(&self, record: &NodeAllocationState) -> Result<NodeAllocationState> {
        let mut inner = self.inner.lock();
        let node = record.node_name();
        if inner.records.contains_key(&node) {
            return Err(CrdError::Conflict(node.into_inner()));
        }

        let mut created = record.clone();
        created.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        created.metadata.creation_timestamp = Some(Time(Utc::now()));
        inner.stamp(&mut created);
        inner.writes += 1;
        inner.records.insert(node, created.clone());
        Ok(created)
    }

    async fn update_spec(&self, record: &NodeAllocationState) -> Result<NodeAllocationState> {
        let mut inner = self.inner.lock();
        inner.take_injected_conflict(&record.name_any())?;
        let mut updated = inner.check_version(record)?.clone();

        updated.spec = record.spec.clone();
        inner.stamp(&mut updated);
        inner.writes += 1;
        inner.records.insert(updated.node_name(), updated.clone());
        Ok(updated)
    }

    async fn update_status(
        &self,
        record: &NodeAllocationState,
        status: AllocationStateStatus,
    ) -> Result<NodeAllocationState> {
        let mut inner = self.inner.lock();
        inner.take_injected_conflict(&record.name_any())?;
        let mut updated = inner.check_version(record)?.clone();

        updated.status = Some(status);
        inner.stamp(&mut updated);
        inner.writes += 1;
        inner.records.insert(updated.node_name(), updated.clone());
        Ok(updated)
    }
}

/// A parameter store that keeps everything in memory.
#[derive(Default)]
pub struct MemoryParameterStore {
    claims: Mutex<HashMap<(String, String), DeviceClaimParametersSpec>>,
    classes: Mutex<HashMap<String, DeviceClassParametersSpec>>,
}

impl MemoryParameterStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a claim parameters object.
    pub fn put_claim_parameters(&self, namespace: &str, name: &str, spec: DeviceClaimParametersSpec) {
        self.claims
            .lock()
            .insert((namespace.to_string(), name.to_string()), spec);
    }

    /// Store a class parameters object.
    pub fn put_class_parameters(&self, name: &str, spec: DeviceClassParametersSpec) {
        self.classes.lock().insert(name.to_string(), spec);
    }
}

#[async_trait]
impl ParameterStore for MemoryParameterStore {
    async fn get_claim_parameters(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<DeviceClaimParametersSpec> {
        self.claims
            .lock()
            .get(&(namespace.to_string(), name.to_string()))
            .copied()
            .ok_or_else(|| CrdError::not_found("DeviceClaimParameters", format!("{namespace}/{name}")))
    }

    async fn get_class_parameters(&self, name: &str) -> Result<DeviceClassParametersSpec> {
        self.classes
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| CrdError::not_found("DeviceClassParameters", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeAllocationStateSpec;

    fn node() -> NodeName {
        NodeName::new("worker-1")
    }

    #[tokio::test]
    async fn get_or_create_creates_not_ready_record() {
        let store = MemoryRecordStore::new();
        assert!(store.get(&node()).await.unwrap_err().is_not_found());

        let record = store.get_or_create(&node()).await.unwrap();
        assert!(!record.is_ready());
        assert!(record.metadata.uid.is_some());

        let again = store.get_or_create(&node()).await.unwrap();
        assert_eq!(again.metadata.resource_version, record.metadata.resource_version);
        assert_eq!(store.list_names().await.unwrap(), vec![node()]);
    }

    #[tokio::test]
    async fn stale_writes_conflict() {
        let store = MemoryRecordStore::new();
        let first = store.get_or_create(&node()).await.unwrap();
        let stale = first.clone();

        let updated = store
            .update_status(&first, AllocationStateStatus::Ready)
            .await
            .unwrap();
        assert!(updated.is_ready());

        let err = store.update_spec(&stale).await.unwrap_err();
        assert!(err.is_conflict());

        let mut fresh = store.get(&node()).await.unwrap();
        fresh.spec = NodeAllocationStateSpec::default();
        store.update_spec(&fresh).await.unwrap();
    }

    #[tokio::test]
    async fn injected_conflicts_are_consumed() {
        let store = MemoryRecordStore::new();
        let record = store.get_or_create(&node()).await.unwrap();
        store.inject_conflicts(1);

        assert!(store.update_spec(&record).await.unwrap_err().is_conflict());
        store.update_spec(&record).await.unwrap();
        assert_eq!(store.write_count(), 2);
    }
}
