//! Types exchanged with the claim reconciliation engine.

use devalloc_core::{ClaimUid, NodeName};
use devalloc_crd::{ClaimParameters, ClassParameters, ParametersRef};
use k8s_openapi::api::core::v1::{NodeSelector, NodeSelectorRequirement, NodeSelectorTerm};
use serde::{Deserialize, Serialize};

/// Field the allocation result's node selector matches on.
pub const NODE_NAME_FIELD: &str = "metadata.name";

/// When a claim should be allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AllocationMode {
    /// Allocate as soon as the claim exists; the driver picks the node.
    Immediate,
    /// Allocate once a pod using the claim is scheduled.
    #[default]
    WaitForFirstConsumer,
}

/// The subset of a `ResourceClaim` the driver looks at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceClaim {
    /// Claim UID.
    pub uid: ClaimUid,
    /// Claim namespace.
    pub namespace: String,
    /// Claim name.
    pub name: String,
    /// Allocation mode.
    #[serde(default)]
    pub allocation_mode: AllocationMode,
    /// Reference to the claim's parameters object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters_ref: Option<ParametersRef>,
    /// Result of a previous allocation, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocation: Option<AllocationResult>,
}

/// The subset of a `ResourceClass` the driver looks at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceClass {
    /// Class name.
    pub name: String,
    /// Reference to the class's parameters object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters_ref: Option<ParametersRef>,
}

/// Where an allocated claim may be used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationResult {
    /// Nodes on which the allocated devices are reachable.
    pub available_on_nodes: NodeSelector,
    /// Whether several pods may share the claim. Claims here have a single owner.
    #[serde(default)]
    pub shareable: bool,
}

impl AllocationResult {
    /// A result binding the claim to a single node.
    #[must_use]
    pub fn for_node(node: &NodeName) -> Self {
        Self {
            available_on_nodes: NodeSelector {
                node_selector_terms: vec![NodeSelectorTerm {
                    match_fields: Some(vec![NodeSelectorRequirement {
                        key: NODE_NAME_FIELD.to_string(),
                        operator: "In".to_string(),
                        values: Some(vec![node.to_string()]),
                    }]),
                    ..NodeSelectorTerm::default()
                }],
            },
            shareable: false,
        }
    }

    /// The node this result binds to, if it names exactly one.
    #[must_use]
    pub fn selected_node(&self) -> Option<NodeName> {
        let term = match self.available_on_nodes.node_selector_terms.as_slice() {
            [term] => term,
            _ => return None,
        };
        let requirement = match term.match_fields.as_deref() {
            Some([requirement]) => requirement,
            _ => return None,
        };
        if requirement.key != NODE_NAME_FIELD || requirement.operator != "In" {
            return None;
        }
        match requirement.values.as_deref() {
            Some([node]) => Some(NodeName::new(node.as_str())),
            _ => None,
        }
    }
}

/// A claim handed to node filtering, with its parsed parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimAllocation {
    /// The claim.
    pub claim: ResourceClaim,
    /// Its resolved parameters.
    #[serde(default)]
    pub claim_parameters: ClaimParameters,
    /// Its class.
    pub class: ResourceClass,
    /// The class's resolved parameters.
    #[serde(default)]
    pub class_parameters: ClassParameters,
    /// Nodes found unable to serve the claim. Filled in by filtering.
    #[serde(default)]
    pub unsuitable_nodes: Vec<NodeName>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_result_round_trips_node() {
        let node = NodeName::new("worker-3");
        let result = AllocationResult::for_node(&node);
        assert_eq!(result.selected_node(), Some(node));
        assert!(!result.shareable);
        assert_eq!(serde_json::to_value(&result).unwrap()["shareable"], false);

        let json = serde_json::to_value(&result).unwrap();
        let fields = &json["availableOnNodes"]["nodeSelectorTerms"][0]["matchFields"][0];
        assert_eq!(fields["key"], "metadata.name");
        assert_eq!(fields["operator"], "In");
        assert_eq!(fields["values"][0], "worker-3");
    }

    #[test]
    fn selected_node_ignores_other_shapes() {
        let mut result = AllocationResult::for_node(&NodeName::new("a"));
        result.available_on_nodes.node_selector_terms[0].match_fields = Some(vec![
            NodeSelectorRequirement {
                key: NODE_NAME_FIELD.to_string(),
                operator: "In".to_string(),
                values: Some(vec!["a".into(), "b".into()]),
            },
        ]);
        assert_eq!(result.selected_node(), None);

        let empty = AllocationResult {
            available_on_nodes: NodeSelector::default(),
            shareable: false,
        };
        assert_eq!(empty.selected_node(), None);
    }

    #[test]
    fn claim_defaults_to_wait_for_first_consumer() {
        let claim: ResourceClaim = serde_json::from_str(
            r#"{"uid":"u1","namespace":"default","name":"gpu-claim"}"#,
        )
        .unwrap();
        assert_eq!(claim.allocation_mode, AllocationMode::WaitForFirstConsumer);
        assert!(claim.parameters_ref.is_none());
    }
}
