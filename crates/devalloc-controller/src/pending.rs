//! Tentative device selections made during node filtering.
//!
//! Filtering runs before the scheduler has picked a node, so every candidate
//! node that can satisfy a claim gets an entry here. Allocation on the chosen
//! node consumes the entry; deallocation drops every entry for the claim.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use devalloc_core::{ClaimUid, NodeName};
use devalloc_crd::{NodeAllocationStateSpec, RequestedDevices};
use parking_lot::RwLock;
use tracing::debug;

#[derive(Debug, Clone)]
struct PendingRequest {
    devices: RequestedDevices,
    created_at: DateTime<Utc>,
}

/// Process-wide table of pending selections keyed by claim, then node.
#[derive(Debug, Default)]
pub struct PendingClaimRequests {
    requests: RwLock<HashMap<ClaimUid, HashMap<NodeName, PendingRequest>>>,
}

impl PendingClaimRequests {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a selection exists for the claim on the node.
    #[must_use]
    pub fn exists(&self, claim: &ClaimUid, node: &NodeName) -> bool {
        self.requests
            .read()
            .get(claim)
            .is_some_and(|nodes| nodes.contains_key(node))
    }

    /// The selection for the claim on the node, if any.
    #[must_use]
    pub fn get(&self, claim: &ClaimUid, node: &NodeName) -> Option<RequestedDevices> {
        self.requests
            .read()
            .get(claim)
            .and_then(|nodes| nodes.get(node))
            .map(|pending| pending.devices.clone())
    }

    /// Record a selection, replacing any previous one for the pair.
    pub fn set(&self, claim: ClaimUid, node: NodeName, devices: RequestedDevices) {
        self.requests.write().entry(claim).or_default().insert(
            node,
            PendingRequest {
                devices,
                created_at: Utc::now(),
            },
        );
    }

    /// Drop every selection for the claim, on all nodes.
    pub fn remove(&self, claim: &ClaimUid) {
        if self.requests.write().remove(claim).is_some() {
            debug!(claim = %claim, "Removed pending claim requests");
        }
    }

    /// Reconcile the table with a freshly loaded record for `node`.
    ///
    /// Claims the record already carries a selection for have been allocated,
    /// so their entries are dropped. Remaining selections for this node are
    /// copied into `spec.claim_requests` so the next selection pass reuses
    /// them instead of handing the same devices to another claim.
    pub fn cleanup_node(&self, node: &NodeName, spec: &mut NodeAllocationStateSpec) {
        let mut requests = self.requests.write();
        requests.retain(|claim, nodes| {
            let Some(pending) = nodes.get(node) else {
                return true;
            };
            if spec.claim_requests.contains_key(claim) {
                debug!(
                    claim = %claim,
                    node = %node,
                    age_ms = (Utc::now() - pending.created_at).num_milliseconds(),
                    "Dropping processed pending request"
                );
                false
            } else {
                spec.claim_requests
                    .insert(claim.clone(), pending.devices.clone());
                true
            }
        });
    }

    /// Number of claims with at least one pending selection.
    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.read().len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devalloc_core::{DeviceType, DeviceUid};
    use devalloc_crd::{DeviceClaimParametersSpec, RequestedDevice};

    fn selection(uids: &[&str]) -> RequestedDevices {
        RequestedDevices {
            spec: DeviceClaimParametersSpec {
                count: u32::try_from(uids.len()).unwrap(),
                device_type: DeviceType::Type0,
            },
            devices: uids
                .iter()
                .map(|u| RequestedDevice {
                    uid: DeviceUid::new(*u),
                })
                .collect(),
        }
    }

    #[test]
    fn set_get_remove() {
        let table = PendingClaimRequests::new();
        let claim = ClaimUid::new("c1");
        let n1 = NodeName::new("n1");
        let n2 = NodeName::new("n2");

        table.set(claim.clone(), n1.clone(), selection(&["a"]));
        table.set(claim.clone(), n2.clone(), selection(&["b"]));

        assert!(table.exists(&claim, &n1));
        assert_eq!(table.get(&claim, &n2), Some(selection(&["b"])));
        assert!(table.get(&ClaimUid::new("other"), &n1).is_none());

        table.remove(&claim);
        assert!(!table.exists(&claim, &n1));
        assert!(!table.exists(&claim, &n2));
        assert!(table.is_empty());
    }

    #[test]
    fn cleanup_drops_processed_and_seeds_the_rest() {
        let table = PendingClaimRequests::new();
        let node = NodeName::new("n1");
        let done = ClaimUid::new("done");
        let waiting = ClaimUid::new("waiting");
        let elsewhere = ClaimUid::new("elsewhere");

        table.set(done.clone(), node.clone(), selection(&["a"]));
        table.set(waiting.clone(), node.clone(), selection(&["b"]));
        table.set(elsewhere.clone(), NodeName::new("n2"), selection(&["c"]));

        let mut spec = NodeAllocationStateSpec::default();
        spec.claim_requests.insert(done.clone(), selection(&["a"]));

        table.cleanup_node(&node, &mut spec);

        assert!(!table.exists(&done, &node));
        assert!(table.exists(&waiting, &node));
        assert!(table.exists(&elsewhere, &NodeName::new("n2")));
        assert_eq!(spec.claim_requests.get(&waiting), Some(&selection(&["b"])));
        assert!(!spec.claim_requests.contains_key(&elsewhere));
    }
}
