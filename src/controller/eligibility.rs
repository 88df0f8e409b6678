//! Node eligibility for BGP neighbor membership
//!
//! A node backs a neighbor entry on the device when it is Ready, not cordoned,
//! reports an `ExternalIP` address and carries the configured `key=value` label.
//! Everything here is a pure function of the observed node object.

use std::fmt;
use std::str::FromStr;

use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use tracing::{debug, error};

use crate::error::Error;

const READY_CONDITION: &str = "Ready";
const EXTERNAL_IP: &str = "ExternalIP";

/// A single `key=value` node label selector
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelSelector {
    pub key: String,
    pub value: String,
}

impl LabelSelector {
    /// Whether the node's labels contain `key` with exactly `value`
    pub fn matches(&self, node: &Node) -> bool {
        node.labels().get(&self.key) == Some(&self.value)
    }
}

impl FromStr for LabelSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('=').collect();
        match parts.as_slice() {
            [key, value] => Ok(Self {
                key: (*key).to_string(),
                value: (*value).to_string(),
            }),
            _ => Err(Error::ConfigError(format!(
                "label selector {s:?} must be in the format key=value"
            ))),
        }
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Why a node is not a neighbor candidate
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IneligibleReason {
    InvalidSelector,
    NotReady,
    Cordoned,
    NoExternalIp,
    Unlabeled,
}

impl fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IneligibleReason::InvalidSelector => "invalid label selector",
            IneligibleReason::NotReady => "not ready",
            IneligibleReason::Cordoned => "cordoned",
            IneligibleReason::NoExternalIp => "no external IP",
            IneligibleReason::Unlabeled => "missing label",
        };
        f.write_str(s)
    }
}

/// Outcome of [`evaluate`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Eligibility {
    /// The node should be a neighbor at this address
    Eligible(String),
    Ineligible(IneligibleReason),
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Eligibility::Eligible(_))
    }

    /// The neighbor address, present only for eligible nodes
    pub fn address(&self) -> Option<&str> {
        match self {
            Eligibility::Eligible(address) => Some(address),
            Eligibility::Ineligible(_) => None,
        }
    }
}

/// Decide whether `node` belongs in the desired neighbor set
///
/// A selector that does not split into exactly two `=`-separated parts makes
/// every node ineligible; this is logged but never fatal.
pub fn evaluate(node: &Node, label_selector: &str) -> Eligibility {
    let name = node.name_any();

    let selector = match label_selector.parse::<LabelSelector>() {
        Ok(selector) => selector,
        Err(e) => {
            error!(node = %name, label_selector, error = %e, "Invalid label selector");
            return Eligibility::Ineligible(IneligibleReason::InvalidSelector);
        }
    };

    let result = if !is_ready(node) {
        Eligibility::Ineligible(IneligibleReason::NotReady)
    } else if is_cordoned(node) {
        Eligibility::Ineligible(IneligibleReason::Cordoned)
    } else if !selector.matches(node) {
        Eligibility::Ineligible(IneligibleReason::Unlabeled)
    } else {
        match external_address(node) {
            Some(address) => Eligibility::Eligible(address.to_string()),
            None => Eligibility::Ineligible(IneligibleReason::NoExternalIp),
        }
    };

    debug!(node = %name, eligibility = ?result, "Evaluated node eligibility");
    result
}

/// Whether the node carries the selector label; `false` for a malformed selector
pub fn is_labeled(node: &Node, label_selector: &str) -> bool {
    match label_selector.parse::<LabelSelector>() {
        Ok(selector) => selector.matches(node),
        Err(e) => {
            error!(node = %node.name_any(), label_selector, error = %e, "Invalid label selector");
            false
        }
    }
}

/// `Ready` condition with status `True`; a missing condition means not ready
pub fn is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| conditions.iter().rev().find(|c| c.type_ == READY_CONDITION))
        .map(|c| c.status == "True")
        .unwrap_or(false)
}

pub fn is_cordoned(node: &Node) -> bool {
    node.spec
        .as_ref()
        .and_then(|s| s.unschedulable)
        .unwrap_or(false)
}

/// First non-empty `ExternalIP` in the order the node reports them
pub fn external_address(node: &Node) -> Option<&str> {
    node.status
        .as_ref()
        .and_then(|s| s.addresses.as_ref())
        .and_then(|addresses| {
            addresses
                .iter()
                .find(|a| a.type_ == EXTERNAL_IP && !a.address.is_empty())
        })
        .map(|a| a.address.as_str())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{NodeAddress, NodeCondition, NodeSpec, NodeStatus};
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    /// Build a node object with the fields the evaluator inspects
    pub(crate) fn make_node(
        name: &str,
        ready: bool,
        cordoned: bool,
        external_ip: Option<&str>,
        labels: &[(&str, &str)],
    ) -> Node {
        let mut addresses = vec![NodeAddress {
            type_: "InternalIP".to_string(),
            address: "192.168.0.10".to_string(),
        }];
        if let Some(ip) = external_ip {
            addresses.push(NodeAddress {
                type_: "ExternalIP".to_string(),
                address: ip.to_string(),
            });
        }

        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect::<BTreeMap<_, _>>(),
                ),
                ..Default::default()
            },
            spec: Some(NodeSpec {
                unschedulable: Some(cordoned),
                ..Default::default()
            }),
            status: Some(NodeStatus {
                conditions: Some(vec![NodeCondition {
                    type_: "Ready".to_string(),
                    status: if ready { "True" } else { "False" }.to_string(),
                    ..Default::default()
                }]),
                addresses: Some(addresses),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_eligible_node() {
        let node = make_node("n1", true, false, Some("1.2.3.4"), &[("bgp", "cilium")]);
        let result = evaluate(&node, "bgp=cilium");
        assert!(result.is_eligible());
        assert_eq!(result.address(), Some("1.2.3.4"));
    }

    #[test]
    fn test_cordoned_node_is_ineligible() {
        let node = make_node("n1", true, true, Some("1.2.3.4"), &[("bgp", "cilium")]);
        assert_eq!(
            evaluate(&node, "bgp=cilium"),
            Eligibility::Ineligible(IneligibleReason::Cordoned)
        );
    }

    #[test]
    fn test_not_ready_node_is_ineligible() {
        let node = make_node("n1", false, false, Some("1.2.3.4"), &[("bgp", "cilium")]);
        assert_eq!(
            evaluate(&node, "bgp=cilium"),
            Eligibility::Ineligible(IneligibleReason::NotReady)
        );
    }

    #[test]
    fn test_missing_ready_condition_is_not_ready() {
        let mut node = make_node("n1", true, false, Some("1.2.3.4"), &[("bgp", "cilium")]);
        node.status.as_mut().unwrap().conditions = None;
        assert!(!is_ready(&node));
        assert!(!evaluate(&node, "bgp=cilium").is_eligible());
    }

    #[test]
    fn test_node_without_external_ip_is_ineligible() {
        let node = make_node("n1", true, false, None, &[("bgp", "cilium")]);
        assert_eq!(
            evaluate(&node, "bgp=cilium"),
            Eligibility::Ineligible(IneligibleReason::NoExternalIp)
        );
    }

    #[test]
    fn test_label_value_must_match_exactly() {
        let node = make_node("n1", true, false, Some("1.2.3.4"), &[("bgp", "calico")]);
        assert_eq!(
            evaluate(&node, "bgp=cilium"),
            Eligibility::Ineligible(IneligibleReason::Unlabeled)
        );

        let unlabeled = make_node("n2", true, false, Some("1.2.3.4"), &[]);
        assert!(!evaluate(&unlabeled, "bgp=").is_eligible());
    }

    #[test]
    fn test_malformed_selector_fails_closed() {
        let node = make_node("n1", true, false, Some("1.2.3.4"), &[("bgp", "cilium")]);
        for selector in ["bgp", "bgp=cilium=extra", ""] {
            assert_eq!(
                evaluate(&node, selector),
                Eligibility::Ineligible(IneligibleReason::InvalidSelector),
                "selector {selector:?}"
            );
            assert!(!is_labeled(&node, selector));
        }
    }

    #[test]
    fn test_first_external_ip_wins() {
        let mut node = make_node("n1", true, false, Some("1.2.3.4"), &[("bgp", "cilium")]);
        node.status
            .as_mut()
            .unwrap()
            .addresses
            .as_mut()
            .unwrap()
            .push(NodeAddress {
                type_: "ExternalIP".to_string(),
                address: "5.6.7.8".to_string(),
            });
        assert_eq!(external_address(&node), Some("1.2.3.4"));
    }

    #[test]
    fn test_evaluate_is_repeatable() {
        let node = make_node("n1", true, false, Some("1.2.3.4"), &[("bgp", "cilium")]);
        assert_eq!(evaluate(&node, "bgp=cilium"), evaluate(&node, "bgp=cilium"));
    }

    #[test]
    fn test_label_selector_parse_and_display() {
        let selector: LabelSelector = "bgp=cilium".parse().unwrap();
        assert_eq!(selector.key, "bgp");
        assert_eq!(selector.value, "cilium");
        assert_eq!(selector.to_string(), "bgp=cilium");
        assert!("a=b=c".parse::<LabelSelector>().is_err());
    }
}
