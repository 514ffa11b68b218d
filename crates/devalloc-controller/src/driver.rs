//! The scheduling-time allocation driver.
//!
//! [`DeviceController`] implements the [`Driver`] callbacks the claim
//! reconciliation engine invokes: parameter lookup, node filtering,
//! allocation, and deallocation.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use devalloc_core::{ClaimUid, NodeName};
use devalloc_crd::params::{
    resolve_claim_parameters, resolve_class_parameters, validate_claim_parameters,
};
use devalloc_crd::{
    ClaimParameters, ClassParameters, NodeAllocationState, ParameterStore, RecordStore,
    RequestedDevices,
};
use tracing::{debug, info, warn};

use crate::lock::PerNodeMutex;
use crate::pending::PendingClaimRequests;
use crate::selection::{select_devices, ClaimRequest};
use crate::types::{AllocationMode, AllocationResult, ClaimAllocation, ResourceClaim, ResourceClass};
use crate::{ControllerError, Result};

/// Callbacks invoked by the claim reconciliation engine.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Resolve a class's parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the reference is malformed or the object is missing.
    async fn get_class_parameters(&self, class: &ResourceClass) -> Result<ClassParameters>;

    /// Resolve a claim's parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the reference is malformed, the object is missing,
    /// or it fails validation.
    async fn get_claim_parameters(
        &self,
        claim: &ResourceClaim,
        class: &ResourceClass,
        class_parameters: &ClassParameters,
    ) -> Result<ClaimParameters>;

    /// Allocate devices for a claim.
    ///
    /// With no `selected_node` the driver picks a node itself; otherwise it
    /// commits the selection made for that node during filtering.
    ///
    /// # Errors
    ///
    /// Returns an error if no devices could be committed.
    async fn allocate(
        &self,
        claim: &ResourceClaim,
        claim_parameters: &ClaimParameters,
        class: &ResourceClass,
        class_parameters: &ClassParameters,
        selected_node: Option<&NodeName>,
    ) -> Result<AllocationResult>;

    /// Release a claim's devices.
    ///
    /// # Errors
    ///
    /// Returns an error if the node's record cannot be read or written.
    async fn deallocate(&self, claim: &ResourceClaim) -> Result<()>;

    /// Mark, on each claim, the candidate nodes that cannot serve the batch.
    ///
    /// # Errors
    ///
    /// Returns an error only for failures that affect every node.
    async fn unsuitable_nodes(
        &self,
        claims: &mut [ClaimAllocation],
        potential_nodes: &[NodeName],
    ) -> Result<()>;
}

/// Allocation driver backed by per-node allocation records.
pub struct DeviceController {
    records: Arc<dyn RecordStore>,
    parameters: Arc<dyn ParameterStore>,
    locks: PerNodeMutex,
    pending: PendingClaimRequests,
}

impl DeviceController {
    /// Create a controller over the given stores.
    #[must_use]
    pub fn new(records: Arc<dyn RecordStore>, parameters: Arc<dyn ParameterStore>) -> Self {
        Self {
            records,
            parameters,
            locks: PerNodeMutex::new(),
            pending: PendingClaimRequests::new(),
        }
    }

    /// The pending-selection table.
    #[must_use]
    pub fn pending(&self) -> &PendingClaimRequests {
        &self.pending
    }

    /// Commit a selection on a locked node and persist the record.
    async fn commit(
        &self,
        mut record: NodeAllocationState,
        claim: &ResourceClaim,
        devices: RequestedDevices,
    ) -> Result<()> {
        record.spec.claim_requests.insert(claim.uid.clone(), devices);
        record.spec.commit_claim_request(&claim.uid)?;
        self.records.update_spec(&record).await?;
        self.pending.remove(&claim.uid);
        Ok(())
    }

    /// Node on which `claim` already holds committed devices, if any.
    async fn existing_binding(&self, claim: &ClaimUid, nodes: &[NodeName]) -> Option<NodeName> {
        for node in nodes {
            let _guard = self.locks.lock(node).await;
            match self.records.get(node).await {
                Ok(record) if record.spec.claim_allocations.contains_key(claim) => {
                    return Some(node.clone());
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(node = %node, error = %e, "Failed to load allocation record while looking up binding");
                }
            }
        }
        None
    }

    async fn allocate_immediate(
        &self,
        claim: &ResourceClaim,
        request: ClaimRequest,
    ) -> Result<AllocationResult> {
        let nodes = self.records.list_names().await?;

        if let Some(node) = self.existing_binding(&claim.uid, &nodes).await {
            debug!(claim = %claim.uid, node = %node, "Claim already allocated");
            return Ok(AllocationResult::for_node(&node));
        }

        for node in nodes {
            let _guard = self.locks.lock(&node).await;

            let record = match self.records.get(&node).await {
                Ok(record) => record,
                Err(e) => {
                    warn!(node = %node, error = %e, "Failed to load allocation record, skipping node");
                    continue;
                }
            };
            if record.spec.claim_allocations.contains_key(&claim.uid) {
                debug!(claim = %claim.uid, node = %node, "Claim already allocated");
                return Ok(AllocationResult::for_node(&node));
            }
            if !record.is_ready() {
                debug!(node = %node, "Allocation record not ready, skipping node");
                continue;
            }

            let selection = select_devices(&record.spec, std::slice::from_ref(&request))
                .remove(&claim.uid)
                .filter(RequestedDevices::is_complete);
            let Some(devices) = selection else {
                debug!(claim = %claim.uid, node = %node, "Not enough devices on node");
                continue;
            };

            self.commit(record, claim, devices).await?;
            info!(claim = %claim.uid, node = %node, "Allocated claim");
            return Ok(AllocationResult::for_node(&node));
        }

        Err(ControllerError::NoSuitableNode(claim.uid.clone()))
    }

    async fn allocate_pending(
        &self,
        claim: &ResourceClaim,
        request: ClaimRequest,
        node: &NodeName,
    ) -> Result<AllocationResult> {
        let _guard = self.locks.lock(node).await;

        let record = self.records.get(node).await?;
        if !record.is_ready() {
            return Err(ControllerError::NotReady(node.clone()));
        }
        if record.spec.claim_allocations.contains_key(&claim.uid) {
            debug!(claim = %claim.uid, node = %node, "Claim already allocated");
            return Ok(AllocationResult::for_node(node));
        }

        let devices = if let Some(pending) = self.pending.get(&claim.uid, node) {
            pending
        } else {
            let fresh = select_devices(&record.spec, std::slice::from_ref(&request))
                .remove(&claim.uid)
                .filter(RequestedDevices::is_complete)
                .ok_or_else(|| ControllerError::InsufficientResources { node: node.clone() })?;
            if claim.allocation_mode != AllocationMode::Immediate {
                return Err(ControllerError::NoPendingRequest {
                    claim: claim.uid.clone(),
                    node: node.clone(),
                });
            }
            fresh
        };

        if !record.spec.devices_available(devices.uids()) {
            warn!(claim = %claim.uid, node = %node, "Pending selection is no longer available");
            return Err(ControllerError::InsufficientResources { node: node.clone() });
        }

        self.commit(record, claim, devices).await?;
        info!(claim = %claim.uid, node = %node, "Allocated claim on selected node");
        Ok(AllocationResult::for_node(node))
    }

    /// Whether `node` can serve every request in the batch.
    ///
    /// On success the node's selections are stored as pending requests.
    async fn node_is_suitable(&self, requests: &[ClaimRequest], node: &NodeName) -> bool {
        let _guard = self.locks.lock(node).await;

        let mut record = match self.records.get(node).await {
            Ok(record) if record.is_ready() => record,
            Ok(_) => {
                debug!(node = %node, "Allocation record not ready, node unsuitable");
                return false;
            }
            Err(e) => {
                debug!(node = %node, error = %e, "Allocation record unavailable, node unsuitable");
                return false;
            }
        };

        self.pending.cleanup_node(node, &mut record.spec);

        let mut selection = select_devices(&record.spec, requests);
        let all_satisfied = requests.iter().all(|r| {
            selection
                .get(&r.claim)
                .is_some_and(RequestedDevices::is_complete)
        });
        if !all_satisfied {
            debug!(node = %node, claims = requests.len(), "Node cannot serve every claim in the batch");
            return false;
        }

        for request in requests {
            if let Some(devices) = selection.remove(&request.claim) {
                self.pending.set(request.claim.clone(), node.clone(), devices);
            }
        }
        true
    }
}

fn mark_unsuitable(claims: &mut [ClaimAllocation], node: &NodeName) {
    for ca in claims {
        ca.unsuitable_nodes.push(node.clone());
    }
}

fn dedup_preserving_order(nodes: &mut Vec<NodeName>) {
    let mut seen = std::collections::HashSet::new();
    nodes.retain(|node| seen.insert(node.clone()));
}

#[async_trait]
impl Driver for DeviceController {
    async fn get_class_parameters(&self, class: &ResourceClass) -> Result<ClassParameters> {
        debug!(class = %class.name, "Getting class parameters");
        Ok(resolve_class_parameters(self.parameters.as_ref(), class.parameters_ref.as_ref()).await?)
    }

    async fn get_claim_parameters(
        &self,
        claim: &ResourceClaim,
        _class: &ResourceClass,
        _class_parameters: &ClassParameters,
    ) -> Result<ClaimParameters> {
        debug!(claim = %claim.uid, namespace = %claim.namespace, name = %claim.name, "Getting claim parameters");
        Ok(resolve_claim_parameters(
            self.parameters.as_ref(),
            &claim.namespace,
            claim.parameters_ref.as_ref(),
        )
        .await?)
    }

    async fn allocate(
        &self,
        claim: &ResourceClaim,
        claim_parameters: &ClaimParameters,
        _class: &ResourceClass,
        _class_parameters: &ClassParameters,
        selected_node: Option<&NodeName>,
    ) -> Result<AllocationResult> {
        validate_claim_parameters(claim_parameters.device_request())?;
        let request = ClaimRequest::new(claim.uid.clone(), *claim_parameters.device_request());
        debug!(
            claim = %claim.uid,
            count = request.request.count,
            selected_node = ?selected_node.map(NodeName::as_str),
            "Allocate called"
        );

        match selected_node {
            None => self.allocate_immediate(claim, request).await,
            Some(node) => self.allocate_pending(claim, request, node).await,
        }
    }

    async fn deallocate(&self, claim: &ResourceClaim) -> Result<()> {
        let Some(node) = claim
            .allocation
            .as_ref()
            .and_then(AllocationResult::selected_node)
        else {
            debug!(claim = %claim.uid, "Claim has no node binding, nothing to release");
            return Ok(());
        };

        let _guard = self.locks.lock(&node).await;
        let mut record = self.records.get(&node).await?;

        if !record.spec.claim_requests.contains_key(&claim.uid) {
            info!(claim = %claim.uid, node = %node, "Claim not recorded on node, already released");
            return Ok(());
        }

        self.pending.remove(&claim.uid);
        record.spec.remove_claim(&claim.uid);
        self.records.update_spec(&record).await?;
        info!(claim = %claim.uid, node = %node, "Deallocated claim");
        Ok(())
    }

    async fn unsuitable_nodes(
        &self,
        claims: &mut [ClaimAllocation],
        potential_nodes: &[NodeName],
    ) -> Result<()> {
        debug!(claims = claims.len(), nodes = potential_nodes.len(), "Filtering nodes");

        let requests = claims
            .iter()
            .map(|ca| {
                let request = ca.claim_parameters.device_request();
                validate_claim_parameters(request)?;
                Ok(ClaimRequest::new(ca.claim.uid.clone(), *request))
            })
            .collect::<Result<Vec<_>>>()?;

        let verdicts = join_all(
            potential_nodes
                .iter()
                .map(|node| self.node_is_suitable(&requests, node)),
        )
        .await;

        for (node, suitable) in potential_nodes.iter().zip(verdicts) {
            if !suitable {
                mark_unsuitable(claims, node);
            }
        }
        for ca in claims.iter_mut() {
            dedup_preserving_order(&mut ca.unsuitable_nodes);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devalloc_core::{DeviceType, DeviceUid};
    use devalloc_crd::{
        AllocatableDevice, AllocationStateStatus, CrdError, DeviceClaimParametersSpec,
        MemoryParameterStore, MemoryRecordStore, NodeAllocationStateSpec, ParametersRef,
    };

    struct Harness {
        records: Arc<MemoryRecordStore>,
        parameters: Arc<MemoryParameterStore>,
        controller: DeviceController,
    }

    fn harness() -> Harness {
        let records = Arc::new(MemoryRecordStore::new());
        let parameters = Arc::new(MemoryParameterStore::new());
        let controller = DeviceController::new(records.clone(), parameters.clone());
        Harness {
            records,
            parameters,
            controller,
        }
    }

    fn node_record(name: &str, devices: usize, ready: bool) -> NodeAllocationState {
        let mut spec = NodeAllocationStateSpec::default();
        for i in 0..devices {
            let uid = DeviceUid::new(format!("{name}-dev{i}"));
            spec.allocatable_devices.insert(
                uid.clone(),
                AllocatableDevice {
                    cdi_device: uid.to_string(),
                    uid,
                    device_type: DeviceType::Type0,
                },
            );
        }
        let mut record = NodeAllocationState::new(name, spec);
        record.status = Some(if ready {
            AllocationStateStatus::Ready
        } else {
            AllocationStateStatus::NotReady
        });
        record
    }

    fn claim(uid: &str, mode: AllocationMode) -> ResourceClaim {
        ResourceClaim {
            uid: ClaimUid::new(uid),
            namespace: "default".to_string(),
            name: format!("claim-{uid}"),
            allocation_mode: mode,
            parameters_ref: None,
            allocation: None,
        }
    }

    fn class() -> ResourceClass {
        ResourceClass {
            name: "devices".to_string(),
            parameters_ref: None,
        }
    }

    fn params(count: u32) -> ClaimParameters {
        ClaimParameters::DeviceClaimParameters(DeviceClaimParametersSpec {
            count,
            device_type: DeviceType::Type0,
        })
    }

    fn claim_allocation(c: ResourceClaim, count: u32) -> ClaimAllocation {
        ClaimAllocation {
            claim: c,
            claim_parameters: params(count),
            class: class(),
            class_parameters: ClassParameters::default(),
            unsuitable_nodes: Vec::new(),
        }
    }

    async fn allocate(
        h: &Harness,
        c: &ResourceClaim,
        count: u32,
        node: Option<&NodeName>,
    ) -> Result<AllocationResult> {
        h.controller
            .allocate(c, &params(count), &class(), &ClassParameters::default(), node)
            .await
    }

    fn committed(h: &Harness, node: &str) -> usize {
        h.records
            .snapshot(&NodeName::new(node))
            .unwrap()
            .spec
            .claim_allocations
            .values()
            .map(Vec::len)
            .sum()
    }

    #[tokio::test]
    async fn immediate_allocation_binds_to_first_fitting_node() {
        let h = harness();
        h.records.insert(node_record("n1", 5, true));
        let c = claim("c1", AllocationMode::Immediate);

        let result = allocate(&h, &c, 3, None).await.unwrap();
        assert_eq!(result.selected_node(), Some(NodeName::new("n1")));

        let record = h.records.snapshot(&NodeName::new("n1")).unwrap();
        assert_eq!(record.spec.claim_allocations[&c.uid].len(), 3);
        assert_eq!(record.spec.available().len(), 2);
    }

    #[tokio::test]
    async fn immediate_allocation_skips_unready_and_small_nodes() {
        let h = harness();
        h.records.insert(node_record("a-unready", 5, false));
        h.records.insert(node_record("b-small", 1, true));
        h.records.insert(node_record("c-big", 4, true));
        let c = claim("c1", AllocationMode::Immediate);

        let result = allocate(&h, &c, 2, None).await.unwrap();
        assert_eq!(result.selected_node(), Some(NodeName::new("c-big")));
        assert_eq!(committed(&h, "a-unready"), 0);
        assert_eq!(committed(&h, "b-small"), 0);
    }

    #[tokio::test]
    async fn immediate_allocation_without_room_fails() {
        let h = harness();
        h.records.insert(node_record("n1", 2, true));
        let c = claim("c1", AllocationMode::Immediate);

        let err = allocate(&h, &c, 3, None).await.unwrap_err();
        assert!(matches!(err, ControllerError::NoSuitableNode(_)));
    }

    #[tokio::test]
    async fn immediate_allocation_is_idempotent() {
        let h = harness();
        h.records.insert(node_record("n1", 5, true));
        let c = claim("c1", AllocationMode::Immediate);

        allocate(&h, &c, 2, None).await.unwrap();
        let first = h.records.snapshot(&NodeName::new("n1")).unwrap();
        allocate(&h, &c, 2, None).await.unwrap();
        let second = h.records.snapshot(&NodeName::new("n1")).unwrap();

        assert_eq!(
            first.spec.claim_allocations[&c.uid],
            second.spec.claim_allocations[&c.uid]
        );
        assert_eq!(committed(&h, "n1"), 2);
    }

    #[tokio::test]
    async fn repeated_immediate_allocation_keeps_original_node() {
        let h = harness();
        h.records.insert(node_record("a", 1, true));
        h.records.insert(node_record("b", 5, true));
        let c = claim("c1", AllocationMode::Immediate);

        let first = allocate(&h, &c, 2, None).await.unwrap();
        assert_eq!(first.selected_node(), Some(NodeName::new("b")));

        // Node a grows enough to fit the claim on its own.
        h.records.insert(node_record("a", 5, true));

        let second = allocate(&h, &c, 2, None).await.unwrap();
        assert_eq!(second, first);
        assert_eq!(committed(&h, "a"), 0);
        assert_eq!(committed(&h, "b"), 2);
    }

    #[tokio::test]
    async fn zero_count_is_rejected_before_touching_records() {
        let h = harness();
        h.records.insert(node_record("n1", 5, true));
        let writes = h.records.write_count();
        let node = NodeName::new("n1");

        let c = claim("c1", AllocationMode::Immediate);
        let err = allocate(&h, &c, 0, None).await.unwrap_err();
        assert!(matches!(err, ControllerError::Crd(CrdError::InvalidParameters(_))));
        let err = allocate(&h, &c, 0, Some(&node)).await.unwrap_err();
        assert_eq!(err.http_status_code(), 400);

        let mut cas = vec![claim_allocation(claim("c2", AllocationMode::WaitForFirstConsumer), 0)];
        let err = h
            .controller
            .unsuitable_nodes(&mut cas, std::slice::from_ref(&node))
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Crd(CrdError::InvalidParameters(_))));
        assert!(h.controller.pending().is_empty());

        assert_eq!(h.records.write_count(), writes);
        assert!(h.records.snapshot(&node).unwrap().spec.claim_allocations.is_empty());
    }

    fn committed_uids(h: &Harness, node: &str) -> Vec<DeviceUid> {
        h.records
            .snapshot(&NodeName::new(node))
            .unwrap()
            .spec
            .claim_allocations
            .values()
            .flatten()
            .map(|d| d.uid.clone())
            .collect()
    }

    fn assert_distinct(uids: &[DeviceUid]) {
        let distinct: std::collections::BTreeSet<_> = uids.iter().collect();
        assert_eq!(distinct.len(), uids.len(), "device committed twice: {uids:?}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_immediate_allocations_never_share_devices() {
        let h = Arc::new(harness());
        h.records.insert(node_record("n1", 5, true));

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let h = Arc::clone(&h);
                tokio::spawn(async move {
                    let c = claim(&format!("c{i}"), AllocationMode::Immediate);
                    allocate(&h, &c, 1, None).await
                })
            })
            .collect();

        let mut ok = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(result) => {
                    assert_eq!(result.selected_node(), Some(NodeName::new("n1")));
                    ok += 1;
                }
                Err(e) => assert!(matches!(e, ControllerError::NoSuitableNode(_))),
            }
        }

        let uids = committed_uids(&h, "n1");
        assert_eq!(ok, 5);
        assert_eq!(uids.len(), 5);
        assert_distinct(&uids);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_filter_then_allocate_never_shares_devices() {
        let h = Arc::new(harness());
        h.records.insert(node_record("n1", 5, true));
        let node = NodeName::new("n1");

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let h = Arc::clone(&h);
                let node = node.clone();
                tokio::spawn(async move {
                    let c = claim(&format!("c{i}"), AllocationMode::WaitForFirstConsumer);
                    let mut cas = vec![claim_allocation(c.clone(), 1)];
                    h.controller
                        .unsuitable_nodes(&mut cas, std::slice::from_ref(&node))
                        .await
                        .unwrap();
                    if !cas[0].unsuitable_nodes.is_empty() {
                        return None;
                    }
                    Some(allocate(&h, &c, 1, Some(&node)).await)
                })
            })
            .collect();

        let mut suitable = 0;
        for task in tasks {
            if let Some(result) = task.await.unwrap() {
                result.unwrap();
                suitable += 1;
            }
        }

        let uids = committed_uids(&h, "n1");
        assert_eq!(suitable, 5);
        assert_eq!(uids.len(), 5);
        assert_distinct(&uids);
        assert!(h.controller.pending().is_empty());
    }

    #[tokio::test]
    async fn filter_then_allocate_commits_pending_selection() {
        let h = harness();
        h.records.insert(node_record("n1", 5, true));
        h.records.insert(node_record("n2", 1, true));
        let c = claim("c1", AllocationMode::WaitForFirstConsumer);
        let mut cas = vec![claim_allocation(c.clone(), 2)];
        let nodes = [NodeName::new("n1"), NodeName::new("n2"), NodeName::new("n1")];

        h.controller.unsuitable_nodes(&mut cas, &nodes).await.unwrap();
        assert_eq!(cas[0].unsuitable_nodes, vec![NodeName::new("n2")]);
        let pending = h.controller.pending().get(&c.uid, &NodeName::new("n1")).unwrap();

        let node = NodeName::new("n1");
        let result = allocate(&h, &c, 2, Some(&node)).await.unwrap();
        assert_eq!(result.selected_node(), Some(node.clone()));

        let record = h.records.snapshot(&node).unwrap();
        let committed: Vec<_> = record.spec.claim_allocations[&c.uid]
            .iter()
            .map(|d| d.uid.clone())
            .collect();
        let selected: Vec<_> = pending.uids().cloned().collect();
        assert_eq!(committed, selected);
        assert!(!h.controller.pending().exists(&c.uid, &node));

        // Second call is a no-op returning the same binding.
        let again = allocate(&h, &c, 2, Some(&node)).await.unwrap();
        assert_eq!(again, result);
        assert_eq!(h.records.snapshot(&node).unwrap().spec, record.spec);
    }

    #[tokio::test]
    async fn filter_is_all_or_nothing_for_a_batch() {
        let h = harness();
        h.records.insert(node_record("n1", 3, true));
        let mut cas = vec![
            claim_allocation(claim("c1", AllocationMode::WaitForFirstConsumer), 2),
            claim_allocation(claim("c2", AllocationMode::WaitForFirstConsumer), 2),
        ];

        h.controller
            .unsuitable_nodes(&mut cas, &[NodeName::new("n1")])
            .await
            .unwrap();

        for ca in &cas {
            assert_eq!(ca.unsuitable_nodes, vec![NodeName::new("n1")]);
        }
        assert!(h.controller.pending().is_empty());
    }

    #[tokio::test]
    async fn filter_marks_missing_and_unready_nodes() {
        let h = harness();
        h.records.insert(node_record("unready", 5, false));
        let mut cas = vec![claim_allocation(claim("c1", AllocationMode::WaitForFirstConsumer), 1)];

        h.controller
            .unsuitable_nodes(&mut cas, &[NodeName::new("unready"), NodeName::new("missing")])
            .await
            .unwrap();

        assert_eq!(
            cas[0].unsuitable_nodes,
            vec![NodeName::new("unready"), NodeName::new("missing")]
        );
    }

    #[tokio::test]
    async fn oversized_claim_is_filtered_and_rejected() {
        let h = harness();
        h.records.insert(node_record("n1", 5, true));
        let c = claim("c1", AllocationMode::WaitForFirstConsumer);
        let node = NodeName::new("n1");
        let mut cas = vec![claim_allocation(c.clone(), 6)];

        h.controller
            .unsuitable_nodes(&mut cas, std::slice::from_ref(&node))
            .await
            .unwrap();
        assert_eq!(cas[0].unsuitable_nodes, vec![node.clone()]);

        let err = allocate(&h, &c, 6, Some(&node)).await.unwrap_err();
        assert!(matches!(err, ControllerError::InsufficientResources { .. }));
    }

    #[tokio::test]
    async fn pending_allocation_requires_filtering_for_delayed_claims() {
        let h = harness();
        h.records.insert(node_record("n1", 5, true));
        let c = claim("c1", AllocationMode::WaitForFirstConsumer);

        let err = allocate(&h, &c, 1, Some(&NodeName::new("n1"))).await.unwrap_err();
        assert!(matches!(err, ControllerError::NoPendingRequest { .. }));
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn pending_allocation_on_unready_node_fails() {
        let h = harness();
        h.records.insert(node_record("n1", 5, false));
        let c = claim("c1", AllocationMode::Immediate);

        let err = allocate(&h, &c, 1, Some(&NodeName::new("n1"))).await.unwrap_err();
        assert!(matches!(err, ControllerError::NotReady(_)));
    }

    #[tokio::test]
    async fn stale_pending_selection_is_rejected() {
        let h = harness();
        h.records.insert(node_record("n1", 2, true));
        let node = NodeName::new("n1");
        let c1 = claim("c1", AllocationMode::WaitForFirstConsumer);
        let c2 = claim("c2", AllocationMode::WaitForFirstConsumer);

        // Filter both claims separately: each sees both devices as free.
        let mut first = vec![claim_allocation(c1.clone(), 2)];
        h.controller
            .unsuitable_nodes(&mut first, std::slice::from_ref(&node))
            .await
            .unwrap();
        let mut second = vec![claim_allocation(c2.clone(), 2)];
        h.controller
            .unsuitable_nodes(&mut second, std::slice::from_ref(&node))
            .await
            .unwrap();
        assert!(first[0].unsuitable_nodes.is_empty());
        assert!(second[0].unsuitable_nodes.is_empty());

        allocate(&h, &c1, 2, Some(&node)).await.unwrap();
        let err = allocate(&h, &c2, 2, Some(&node)).await.unwrap_err();
        assert!(matches!(err, ControllerError::InsufficientResources { .. }));
        assert_eq!(committed(&h, "n1"), 2);
    }

    #[tokio::test]
    async fn deallocate_releases_and_is_idempotent() {
        let h = harness();
        h.records.insert(node_record("n1", 5, true));
        let mut c = claim("c1", AllocationMode::Immediate);

        c.allocation = Some(allocate(&h, &c, 3, None).await.unwrap());
        h.controller.deallocate(&c).await.unwrap();

        let record = h.records.snapshot(&NodeName::new("n1")).unwrap();
        assert!(record.spec.claim_allocations.is_empty());
        assert!(record.spec.claim_requests.is_empty());

        let writes = h.records.write_count();
        h.controller.deallocate(&c).await.unwrap();
        assert_eq!(h.records.write_count(), writes);
    }

    #[tokio::test]
    async fn deallocate_without_binding_is_a_noop() {
        let h = harness();
        let c = claim("c1", AllocationMode::Immediate);
        h.controller.deallocate(&c).await.unwrap();
        assert_eq!(h.records.write_count(), 0);
    }

    #[tokio::test]
    async fn conflicting_write_surfaces_to_caller() {
        let h = harness();
        h.records.insert(node_record("n1", 5, true));
        h.records.inject_conflicts(1);
        let c = claim("c1", AllocationMode::Immediate);

        let err = allocate(&h, &c, 1, None).await.unwrap_err();
        assert!(err.is_retriable());
        assert_eq!(committed(&h, "n1"), 0);
    }

    #[tokio::test]
    async fn claim_parameters_come_from_the_parameter_store() {
        let h = harness();
        h.parameters.put_claim_parameters(
            "default",
            "four",
            DeviceClaimParametersSpec {
                count: 4,
                device_type: DeviceType::Type0,
            },
        );
        let mut c = claim("c1", AllocationMode::Immediate);
        c.parameters_ref = Some(ParametersRef::claim("four"));

        let class_params = h.controller.get_class_parameters(&class()).await.unwrap();
        let params = h
            .controller
            .get_claim_parameters(&c, &class(), &class_params)
            .await
            .unwrap();
        assert_eq!(params.device_request().count, 4);

        c.parameters_ref = Some(ParametersRef::claim("missing"));
        let err = h
            .controller
            .get_claim_parameters(&c, &class(), &class_params)
            .await
            .unwrap_err();
        assert_eq!(err.http_status_code(), 404);
    }
}
