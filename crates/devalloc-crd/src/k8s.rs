//! Kubernetes-backed record and parameter stores.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use devalloc_core::NodeName;
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::debug;

use crate::error::{CrdError, Result};
use crate::types::{
    AllocationStateStatus, DeviceClaimParameters, DeviceClaimParametersSpec,
    DeviceClassParameters, DeviceClassParametersSpec, NodeAllocationState,
};
use crate::{ParameterStore, RecordStore};

const RECORD_KIND: &str = "NodeAllocationState";

/// Run an API call under a deadline, mapping errors for `name`.
async fn bounded<T, F>(timeout: Duration, kind: &'static str, name: &str, call: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, kube::Error>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result.map_err(|e| CrdError::from_kube(kind, name, e)),
        Err(_) => Err(CrdError::Timeout(format!("{kind}/{name}"))),
    }
}

/// Allocation records stored as `NodeAllocationState` objects.
#[derive(Clone)]
pub struct KubeRecordStore {
    api: Api<NodeAllocationState>,
    timeout: Duration,
}

impl KubeRecordStore {
    /// Create a store for records in `namespace`.
    #[must_use]
    pub fn new(client: Client, namespace: &str, timeout: Duration) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            timeout,
        }
    }
}

#[async_trait]
impl RecordStore for KubeRecordStore {
    async fn get(&self, node: &NodeName) -> Result<NodeAllocationState> {
        bounded(self.timeout, RECORD_KIND, node.as_str(), self.api.get(node.as_str())).await
    }

    async fn list_names(&self) -> Result<Vec<NodeName>> {
        let list = bounded(
            self.timeout,
            RECORD_KIND,
            "*",
            self.api.list(&ListParams::default()),
        )
        .await?;
        Ok(list
            .items
            .iter()
            .map(|record| NodeName::new(record.name_any()))
            .collect())
    }

    async fn create(&self, record: &NodeAllocationState) -> Result<NodeAllocationState> {
        let name = record.name_any();
        bounded(
            self.timeout,
            RECORD_KIND,
            &name,
            self.api.create(&PostParams::default(), record),
        )
        .await
    }

    async fn update_spec(&self, record: &NodeAllocationState) -> Result<NodeAllocationState> {
        let name = record.name_any();
        let updated = bounded(
            self.timeout,
            RECORD_KIND,
            &name,
            self.api.replace(&name, &PostParams::default(), record),
        )
        .await?;
        debug!(
            node = %name,
            resource_version = ?updated.resource_version(),
            "Updated allocation record spec"
        );
        Ok(updated)
    }

    async fn update_status(
        &self,
        record: &NodeAllocationState,
        status: AllocationStateStatus,
    ) -> Result<NodeAllocationState> {
        let name = record.name_any();
        // resourceVersion in a merge patch makes the API server reject stale writes.
        let patch = json!({
            "metadata": { "resourceVersion": record.resource_version() },
            "status": status,
        });
        bounded(
            self.timeout,
            RECORD_KIND,
            &name,
            self.api
                .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch)),
        )
        .await
    }
}

/// Parameter objects read from the API server.
#[derive(Clone)]
pub struct KubeParameterStore {
    client: Client,
    timeout: Duration,
}

impl KubeParameterStore {
    /// Create a parameter store.
    #[must_use]
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl ParameterStore for KubeParameterStore {
    async fn get_claim_parameters(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<DeviceClaimParametersSpec> {
        let api: Api<DeviceClaimParameters> = Api::namespaced(self.client.clone(), namespace);
        let object = bounded(self.timeout, "DeviceClaimParameters", name, api.get(name)).await?;
        Ok(object.spec)
    }

    async fn get_class_parameters(&self, name: &str) -> Result<DeviceClassParametersSpec> {
        let api: Api<DeviceClassParameters> = Api::all(self.client.clone());
        let object = bounded(self.timeout, "DeviceClassParameters", name, api.get(name)).await?;
        Ok(object.spec)
    }
}
