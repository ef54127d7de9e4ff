use crate::object::{ObjectId, ObjectRef};
use std::collections::BTreeMap;
use switchyard_controller_core::extension::ExtensionObject;
use switchyard_controller_k8s_api::{
    gateway::{Gateway, GatewayClass, GrpcRoute, HttpRoute, TcpRoute, TlsRoute},
    multicluster::ServiceImport,
    policy::{BackendTrafficPolicy, ClientTrafficPolicy, ProxyConfig, SecurityPolicy},
    ConfigMap, EndpointSlice, Secret, Service,
};

/// The closed-world set of objects relevant to one group.
///
/// Routes carry only the backend references that resolved; every reference
/// that was dropped is listed in `dropped` with its reason. Ordered maps make
/// equal inputs produce equal snapshots.
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceSnapshot {
    pub group: String,
    pub controller: String,
    pub class: GatewayClass,
    pub proxy_config: Option<ProxyConfig>,

    pub gateways: BTreeMap<ObjectId, Gateway>,
    /// Addresses assigned to each Gateway.
    pub addresses: BTreeMap<ObjectId, Vec<String>>,

    pub http_routes: BTreeMap<ObjectId, HttpRoute>,
    pub grpc_routes: BTreeMap<ObjectId, GrpcRoute>,
    pub tls_routes: BTreeMap<ObjectId, TlsRoute>,
    pub tcp_routes: BTreeMap<ObjectId, TcpRoute>,
    /// The listeners each route attached to.
    pub attachments: BTreeMap<ObjectRef, Vec<ListenerRef>>,

    pub services: BTreeMap<ObjectId, Service>,
    pub service_imports: BTreeMap<ObjectId, ServiceImport>,
    pub endpoint_slices: BTreeMap<ObjectId, EndpointSlice>,
    pub secrets: BTreeMap<ObjectId, Secret>,
    pub config_maps: BTreeMap<ObjectId, ConfigMap>,

    pub backend_traffic_policies: BTreeMap<ObjectId, BackendTrafficPolicy>,
    pub client_traffic_policies: BTreeMap<ObjectId, ClientTrafficPolicy>,
    pub security_policies: BTreeMap<ObjectId, SecurityPolicy>,

    /// Extension objects referenced by route filters.
    pub extension_resources: BTreeMap<ObjectRef, ExtensionObject>,
    /// Extension policies targeting objects in the group.
    pub extension_policies: BTreeMap<ObjectRef, ExtensionObject>,

    pub dropped: Vec<DroppedRef>,
}

/// Names one listener of a Gateway.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerRef {
    pub gateway: ObjectId,
    pub listener: String,
}

/// A reference excluded from the snapshot. The target is described by group
/// and kind since it may name a kind the controller does not know.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct DroppedRef {
    pub from: ObjectRef,
    pub group: String,
    pub kind: String,
    pub to: ObjectId,
    pub reason: &'static str,
}

// === impl ResourceSnapshot ===

impl ResourceSnapshot {
    pub fn new(group: String, controller: String, class: GatewayClass) -> Self {
        Self {
            group,
            controller,
            class,
            proxy_config: None,
            gateways: BTreeMap::new(),
            addresses: BTreeMap::new(),
            http_routes: BTreeMap::new(),
            grpc_routes: BTreeMap::new(),
            tls_routes: BTreeMap::new(),
            tcp_routes: BTreeMap::new(),
            attachments: BTreeMap::new(),
            services: BTreeMap::new(),
            service_imports: BTreeMap::new(),
            endpoint_slices: BTreeMap::new(),
            secrets: BTreeMap::new(),
            config_maps: BTreeMap::new(),
            backend_traffic_policies: BTreeMap::new(),
            client_traffic_policies: BTreeMap::new(),
            security_policies: BTreeMap::new(),
            extension_resources: BTreeMap::new(),
            extension_policies: BTreeMap::new(),
            dropped: Vec::new(),
        }
    }

    /// All extension objects, in a stable order.
    pub fn extension_objects(&self) -> impl Iterator<Item = &ExtensionObject> {
        self.extension_resources
            .values()
            .chain(self.extension_policies.values())
    }

    /// The routes attached to a listener.
    pub fn routes_on<'a>(
        &'a self,
        gateway: &'a ObjectId,
        listener: &'a str,
    ) -> impl Iterator<Item = &'a ObjectRef> + 'a {
        self.attachments.iter().filter_map(move |(route, listeners)| {
            listeners
                .iter()
                .any(|l| l.gateway == *gateway && l.listener == listener)
                .then_some(route)
        })
    }
}
