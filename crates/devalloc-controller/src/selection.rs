//! Device selection.
//!
//! A pure function over a snapshot of a node's record: it never touches the
//! record itself, only a working copy of the available pool.

use std::collections::BTreeMap;

use devalloc_core::ClaimUid;
use devalloc_crd::{DeviceClaimParametersSpec, NodeAllocationStateSpec, RequestedDevice, RequestedDevices};
use tracing::debug;

/// One claim's request as seen by the selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimRequest {
    /// Claim being served.
    pub claim: ClaimUid,
    /// What it asks for.
    pub request: DeviceClaimParametersSpec,
}

impl ClaimRequest {
    /// Pair a claim with its request.
    #[must_use]
    pub fn new(claim: ClaimUid, request: DeviceClaimParametersSpec) -> Self {
        Self { claim, request }
    }
}

/// Pick devices for a batch of claims against one node.
///
/// Claims are served in order from a shared pool of uncommitted devices, so
/// two claims in the same batch never receive the same device. A claim whose
/// recorded selection is still entirely available gets that selection back
/// unchanged; otherwise devices of the requested type are taken in UID order.
///
/// A result shorter than the requested count means the node cannot serve
/// that claim.
#[must_use]
pub fn select_devices(
    spec: &NodeAllocationStateSpec,
    requests: &[ClaimRequest],
) -> BTreeMap<ClaimUid, RequestedDevices> {
    let mut pool = spec.available();
    let mut selected = BTreeMap::new();

    for ClaimRequest { claim, request } in requests {
        if let Some(previous) = spec.claim_requests.get(claim) {
            if previous.uids().all(|uid| pool.contains_key(uid)) {
                for uid in previous.uids() {
                    pool.remove(uid);
                }
                debug!(claim = %claim, "Reusing recorded device selection");
                selected.insert(
                    claim.clone(),
                    RequestedDevices {
                        spec: *request,
                        devices: previous.devices.clone(),
                    },
                );
                continue;
            }
            debug!(claim = %claim, "Recorded selection is stale, selecting again");
        }

        let picks: Vec<_> = pool
            .values()
            .filter(|device| device.device_type == request.device_type)
            .take(request.count as usize)
            .map(|device| device.uid.clone())
            .collect();
        for uid in &picks {
            pool.remove(uid);
        }

        debug!(
            claim = %claim,
            requested = request.count,
            selected = picks.len(),
            "Selected devices"
        );
        selected.insert(
            claim.clone(),
            RequestedDevices {
                spec: *request,
                devices: picks.into_iter().map(|uid| RequestedDevice { uid }).collect(),
            },
        );
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use devalloc_core::{DeviceType, DeviceUid};
    use devalloc_crd::{AllocatableDevice, AllocatedDevice};

    fn record(n: usize) -> NodeAllocationStateSpec {
        let mut spec = NodeAllocationStateSpec::default();
        for i in 0..n {
            let uid = DeviceUid::new(format!("fakeDevice{i:02}"));
            spec.allocatable_devices.insert(
                uid.clone(),
                AllocatableDevice {
                    cdi_device: uid.to_string(),
                    uid,
                    device_type: DeviceType::Type0,
                },
            );
        }
        spec
    }

    fn req(claim: &str, count: u32) -> ClaimRequest {
        ClaimRequest::new(
            ClaimUid::new(claim),
            DeviceClaimParametersSpec {
                count,
                device_type: DeviceType::Type0,
            },
        )
    }

    fn uids(devices: &RequestedDevices) -> Vec<&str> {
        devices.devices.iter().map(|d| d.uid.as_str()).collect()
    }

    #[test]
    fn takes_devices_in_uid_order() {
        let spec = record(5);
        let out = select_devices(&spec, &[req("c1", 3)]);
        let c1 = &out[&ClaimUid::new("c1")];
        assert!(c1.is_complete());
        assert_eq!(uids(c1), ["fakeDevice00", "fakeDevice01", "fakeDevice02"]);
    }

    #[test]
    fn batch_claims_do_not_share_devices() {
        let spec = record(4);
        let out = select_devices(&spec, &[req("c1", 2), req("c2", 2)]);
        assert_eq!(uids(&out[&ClaimUid::new("c1")]), ["fakeDevice00", "fakeDevice01"]);
        assert_eq!(uids(&out[&ClaimUid::new("c2")]), ["fakeDevice02", "fakeDevice03"]);
    }

    #[test]
    fn short_selection_when_pool_exhausted() {
        let spec = record(5);
        let out = select_devices(&spec, &[req("c1", 6)]);
        let c1 = &out[&ClaimUid::new("c1")];
        assert_eq!(c1.devices.len(), 5);
        assert!(!c1.is_complete());
    }

    #[test]
    fn committed_devices_are_skipped() {
        let mut spec = record(3);
        spec.claim_allocations.insert(
            ClaimUid::new("other"),
            vec![AllocatedDevice {
                uid: DeviceUid::new("fakeDevice00"),
                device_type: DeviceType::Type0,
                cdi_device: "fakeDevice00".into(),
            }],
        );
        let out = select_devices(&spec, &[req("c1", 2)]);
        assert_eq!(uids(&out[&ClaimUid::new("c1")]), ["fakeDevice01", "fakeDevice02"]);
    }

    #[test]
    fn reuses_recorded_selection_when_still_available() {
        let mut spec = record(5);
        let first = select_devices(&spec, &[req("c1", 2)]);
        // Pretend an earlier pass picked the last two devices.
        let mut recorded = first[&ClaimUid::new("c1")].clone();
        recorded.devices = vec![
            RequestedDevice { uid: DeviceUid::new("fakeDevice03") },
            RequestedDevice { uid: DeviceUid::new("fakeDevice04") },
        ];
        spec.claim_requests.insert(ClaimUid::new("c1"), recorded.clone());

        let again = select_devices(&spec, &[req("c1", 2), req("c2", 3)]);
        assert_eq!(again[&ClaimUid::new("c1")].devices, recorded.devices);
        assert_eq!(
            uids(&again[&ClaimUid::new("c2")]),
            ["fakeDevice00", "fakeDevice01", "fakeDevice02"]
        );
    }

    #[test]
    fn stale_recorded_selection_is_replaced_without_losing_devices() {
        let mut spec = record(3);
        spec.claim_requests.insert(
            ClaimUid::new("c1"),
            RequestedDevices {
                spec: req("c1", 2).request,
                devices: vec![
                    RequestedDevice { uid: DeviceUid::new("fakeDevice01") },
                    RequestedDevice { uid: DeviceUid::new("gone") },
                ],
            },
        );

        let out = select_devices(&spec, &[req("c1", 2)]);
        assert_eq!(uids(&out[&ClaimUid::new("c1")]), ["fakeDevice00", "fakeDevice01"]);
    }

    #[test]
    fn selection_does_not_mutate_record() {
        let spec = record(2);
        let before = spec.clone();
        let _ = select_devices(&spec, &[req("c1", 2)]);
        assert_eq!(spec, before);
    }
}
