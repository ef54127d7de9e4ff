use parking_lot::RwLock;
use std::{collections::BTreeMap, sync::Arc};
use switchyard_controller_k8s_api::{Node, ResourceExt};

/// Tracks the externally reachable addresses of cluster nodes, used for
/// Gateways exposed through NodePort Services.
///
/// Constructed once by the process and handed to the index.
#[derive(Clone, Debug, Default)]
pub struct NodeAddresses(Arc<RwLock<BTreeMap<String, Addresses>>>);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Addresses {
    external: Vec<String>,
    internal: Vec<String>,
}

// === impl NodeAddresses ===

impl NodeAddresses {
    /// Records a node's addresses. Returns true if they changed.
    pub fn apply(&self, node: &Node) -> bool {
        let mut addrs = Addresses::default();
        for addr in node
            .status
            .as_ref()
            .and_then(|s| s.addresses.as_ref())
            .into_iter()
            .flatten()
        {
            match addr.type_.as_str() {
                "ExternalIP" => addrs.external.push(addr.address.clone()),
                "InternalIP" => addrs.internal.push(addr.address.clone()),
                _ => {}
            }
        }

        let mut nodes = self.0.write();
        let name = node.name_unchecked();
        if nodes.get(&name) == Some(&addrs) {
            return false;
        }
        nodes.insert(name, addrs);
        true
    }

    pub fn delete(&self, name: &str) -> bool {
        self.0.write().remove(name).is_some()
    }

    /// Returns one address per node, preferring external addresses, in node
    /// name order.
    pub fn addresses(&self) -> Vec<String> {
        let nodes = self.0.read();
        let mut addrs = nodes
            .values()
            .flat_map(|a| {
                if a.external.is_empty() {
                    a.internal.first()
                } else {
                    a.external.first()
                }
            })
            .cloned()
            .collect::<Vec<_>>();
        addrs.dedup();
        addrs
    }
}
