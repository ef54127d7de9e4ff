//! Adapts the index and snapshots to the delivery and extension authorization
//! seams.

use crate::{
    grpc::{auth::GatewayNamespaces, ServiceGrants},
    index::{GroupKind, SharedIndex, Snapshots},
    k8s::policy,
};

const EXTENSION_MANAGER: GroupKind<'static> = GroupKind {
    group: policy::GROUP,
    kind: "ExtensionManager",
};

const SERVICE: GroupKind<'static> = GroupKind {
    group: "",
    kind: "Service",
};

/// Answers Gateway namespace checks from the latest reconciled snapshots.
#[derive(Clone, Debug)]
pub struct SnapshotGateways(pub Snapshots);

/// Answers extension Service grant checks from the indexed ReferenceGrants.
#[derive(Clone, Debug)]
pub struct IndexGrants(pub SharedIndex);

impl GatewayNamespaces for SnapshotGateways {
    fn has_gateway(&self, group: &str, namespace: &str) -> bool {
        self.0
            .load(&group.to_string())
            .is_some_and(|snapshot| snapshot.gateways.keys().any(|id| id.namespace == namespace))
    }
}

impl ServiceGrants for IndexGrants {
    fn permits(&self, from_namespace: &str, to_namespace: &str, service: &str) -> bool {
        self.0.read().grants().is_granted(
            EXTENSION_MANAGER,
            from_namespace,
            SERVICE,
            to_namespace,
            service,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::Watchable,
        index::{queue, Config, Index, NodeAddresses, ObjectId, ResourceSnapshot},
        k8s::{
            gateway::{
                Gateway, GatewayClass, GatewayClassSpec, GatewaySpec, ReferenceGrant,
                ReferenceGrantFrom, ReferenceGrantSpec, ReferenceGrantTo,
            },
            ObjectMeta,
        },
    };
    use std::sync::Arc;

    fn snapshot(gateways: &[(&str, &str)]) -> Arc<ResourceSnapshot> {
        let class = GatewayClass::new(
            "switchyard",
            GatewayClassSpec {
                controller_name: crate::core::DEFAULT_CONTROLLER_NAME.to_string(),
                parameters_ref: None,
                description: None,
            },
        );
        let mut snapshot = ResourceSnapshot::new(
            "switchyard".to_string(),
            crate::core::DEFAULT_CONTROLLER_NAME.to_string(),
            class,
        );
        for (ns, name) in gateways {
            snapshot.gateways.insert(
                ObjectId::new(*ns, *name),
                Gateway {
                    metadata: ObjectMeta {
                        namespace: Some(ns.to_string()),
                        name: Some(name.to_string()),
                        ..Default::default()
                    },
                    spec: GatewaySpec::default(),
                    status: None,
                },
            );
        }
        Arc::new(snapshot)
    }

    #[test]
    fn gateway_namespaces_follow_the_latest_snapshot() {
        let snapshots = Snapshots::new(Watchable::new());
        let gateways = SnapshotGateways(snapshots.clone());
        assert!(!gateways.has_gateway("switchyard", "edge"));

        snapshots.store("switchyard".to_string(), snapshot(&[("edge", "public")]));
        assert!(gateways.has_gateway("switchyard", "edge"));
        assert!(!gateways.has_gateway("switchyard", "apps"));
        assert!(!gateways.has_gateway("other", "edge"));

        snapshots.store("switchyard".to_string(), snapshot(&[("apps", "internal")]));
        assert!(!gateways.has_gateway("switchyard", "edge"));
        assert!(gateways.has_gateway("switchyard", "apps"));
    }

    #[test]
    fn extension_services_are_granted_by_reference_grants() {
        let (queue, _worker) = queue::channel(1);
        let index = Index::shared(Config::default(), NodeAddresses::default(), queue);
        let grants = IndexGrants(index.clone());
        assert!(grants.permits("switchyard-system", "switchyard-system", "ext"));
        assert!(!grants.permits("switchyard-system", "extensions", "ext"));

        index.write().apply_object(ReferenceGrant {
            metadata: ObjectMeta {
                namespace: Some("extensions".to_string()),
                name: Some("allow-switchyard".to_string()),
                ..Default::default()
            },
            spec: ReferenceGrantSpec {
                from: vec![ReferenceGrantFrom {
                    group: "gateway.switchyard.io".to_string(),
                    kind: "ExtensionManager".to_string(),
                    namespace: "switchyard-system".to_string(),
                }],
                to: vec![ReferenceGrantTo {
                    group: "".to_string(),
                    kind: "Service".to_string(),
                    name: Some("ext".to_string()),
                }],
            },
        });
        assert!(grants.permits("switchyard-system", "extensions", "ext"));
        assert!(!grants.permits("switchyard-system", "extensions", "other"));
        assert!(!grants.permits("apps", "extensions", "ext"));
    }
}
