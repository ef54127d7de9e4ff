//! The object cache the reconciler reads from.
//!
//! Watches feed the index through kubert's index traits. Each update is
//! compared against the cached object; when it changed, the index works out
//! which controllers may be affected and enqueues them.

use crate::{
    grants::Grants,
    nodes::NodeAddresses,
    object::{Kind, ObjectId, ObjectRef},
    queue::Queue,
    refs::RefIndex,
    routes::RouteObject,
};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use parking_lot::RwLock;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};
use switchyard_controller_core::extension::ExtensionKind;
use switchyard_controller_k8s_api::{
    gateway::{
        self, BackendRef, Gateway, GatewayClass, GrpcRoute, HttpRoute, ReferenceGrant,
        SecretObjectReference, TcpRoute, TlsRoute,
    },
    labels::{self, Selector},
    multicluster::ServiceImport,
    policy::{
        self, BackendTrafficPolicy, ClientTrafficPolicy, LocalPolicyTargetReference, ProxyConfig,
        SecurityPolicy,
    },
    ConfigMap, Deployment, DynamicObject, EndpointSlice, Namespace, Node, ObjectMeta, Resource,
    ResourceExt, Secret, Service,
};

pub type SharedIndex = Arc<RwLock<Index>>;

#[derive(Clone, Debug, Default)]
pub struct Config {
    /// The controller names this process reconciles.
    pub controllers: Vec<String>,

    /// Extension kinds that routes may reference through `ExtensionRef`
    /// filters.
    pub extension_kinds: Vec<ExtensionKind>,

    /// Extension kinds that attach to Gateways and routes by `targetRefs`.
    pub extension_policy_kinds: Vec<ExtensionKind>,

    /// When set, ReferenceGrants are honored only in selected namespaces.
    pub namespace_scope: Option<Selector>,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0} objects have not been synced")]
    NotSynced(Kind),
}

/// The cached objects of every watched kind.
#[derive(Debug, Default)]
pub struct Objects {
    pub classes: BTreeMap<ObjectId, GatewayClass>,
    pub gateways: BTreeMap<ObjectId, Gateway>,
    pub http_routes: BTreeMap<ObjectId, HttpRoute>,
    pub grpc_routes: BTreeMap<ObjectId, GrpcRoute>,
    pub tls_routes: BTreeMap<ObjectId, TlsRoute>,
    pub tcp_routes: BTreeMap<ObjectId, TcpRoute>,
    pub reference_grants: BTreeMap<ObjectId, ReferenceGrant>,
    pub backend_traffic_policies: BTreeMap<ObjectId, BackendTrafficPolicy>,
    pub client_traffic_policies: BTreeMap<ObjectId, ClientTrafficPolicy>,
    pub security_policies: BTreeMap<ObjectId, SecurityPolicy>,
    pub proxy_configs: BTreeMap<ObjectId, ProxyConfig>,
    pub namespaces: BTreeMap<String, Namespace>,
    pub services: BTreeMap<ObjectId, Service>,
    pub service_imports: BTreeMap<ObjectId, ServiceImport>,
    pub endpoint_slices: BTreeMap<ObjectId, EndpointSlice>,
    pub secrets: BTreeMap<ObjectId, Secret>,
    pub config_maps: BTreeMap<ObjectId, ConfigMap>,
    pub deployments: BTreeMap<ObjectId, Deployment>,
    pub extensions: BTreeMap<ExtensionKind, BTreeMap<ObjectId, DynamicObject>>,
}

#[derive(Debug)]
pub struct Index {
    config: Config,
    objects: Objects,
    nodes: NodeAddresses,
    synced: HashSet<Kind>,
    refs: RefIndex,

    /// The controllers whose last pass read each object.
    members: HashMap<ObjectRef, BTreeSet<String>>,

    queue: Queue,
}

/// A kind the index caches by namespace and name.
pub trait Cached: Resource<DynamicType = ()> + Clone {
    const KIND: Kind;

    /// Kinds whose spec changes bump `metadata.generation` are compared by
    /// generation, so that status-only writes are ignored. Other kinds are
    /// compared by resource version.
    const BY_GENERATION: bool;

    fn objects(objects: &mut Objects) -> &mut BTreeMap<ObjectId, Self>;

    /// The objects this object references. A pure function of the object and
    /// the static configuration.
    fn index_keys(&self, _config: &Config) -> Vec<ObjectRef> {
        Vec::new()
    }

    /// Controllers affected by this object regardless of past passes.
    fn controllers(&self, _index: &Index) -> BTreeSet<String> {
        BTreeSet::new()
    }
}

// === impl Index ===

impl Index {
    pub fn shared(config: Config, nodes: NodeAddresses, queue: Queue) -> SharedIndex {
        Arc::new(RwLock::new(Self {
            config,
            objects: Objects::default(),
            nodes,
            synced: HashSet::new(),
            refs: RefIndex::default(),
            members: HashMap::new(),
            queue,
        }))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn objects(&self) -> &Objects {
        &self.objects
    }

    pub fn nodes(&self) -> &NodeAddresses {
        &self.nodes
    }

    pub fn grants(&self) -> Grants<'_> {
        Grants::new(
            &self.objects.reference_grants,
            &self.objects.namespaces,
            self.config.namespace_scope.as_ref(),
        )
    }

    /// Fails unless every watched kind has completed its initial list.
    pub fn check_synced(&self) -> Result<(), Error> {
        let extensions = self
            .config
            .extension_kinds
            .iter()
            .chain(&self.config.extension_policy_kinds)
            .cloned()
            .map(Kind::Extension);
        for kind in Kind::BUILTIN.into_iter().chain(extensions) {
            if !self.synced.contains(&kind) {
                return Err(Error::NotSynced(kind));
            }
        }
        Ok(())
    }

    pub fn mark_synced(&mut self, kind: Kind) {
        if self.synced.insert(kind.clone()) {
            tracing::debug!(%kind, "Synced");
            for controller in &self.config.controllers {
                self.queue.enqueue(controller.clone());
            }
        }
    }

    /// Records the objects a controller's pass read, so later changes to them
    /// enqueue that controller.
    pub fn record_members(&mut self, controller: &str, members: BTreeSet<ObjectRef>) {
        self.members.retain(|obj, controllers| {
            if !members.contains(obj) {
                controllers.remove(controller);
            }
            !controllers.is_empty()
        });
        for obj in members {
            self.members
                .entry(obj)
                .or_default()
                .insert(controller.to_string());
        }
    }

    pub fn apply_object<T: Cached>(&mut self, obj: T) {
        let id = ObjectId::of(&obj);
        let changed = T::objects(&mut self.objects)
            .get(&id)
            .is_none_or(|prior| is_changed(prior.meta(), obj.meta(), T::BY_GENERATION));
        if !changed {
            tracing::trace!(kind = %T::KIND, %id, "Unchanged");
            T::objects(&mut self.objects).insert(id, obj);
            return;
        }

        let oref = ObjectRef {
            kind: T::KIND,
            id: id.clone(),
        };
        let mut direct = obj.controllers(self);
        self.refs.update(oref.clone(), obj.index_keys(&self.config));
        if let Some(prior) = T::objects(&mut self.objects).insert(id, obj) {
            // A class or Gateway may have moved away from a controller.
            direct.extend(prior.controllers(self));
        }
        self.trigger(&oref, direct);
    }

    pub fn delete_object<T: Cached>(&mut self, id: ObjectId) {
        let Some(prior) = T::objects(&mut self.objects).remove(&id) else {
            return;
        };
        let oref = ObjectRef { kind: T::KIND, id };
        let direct = prior.controllers(self);
        self.trigger(&oref, direct);
        self.refs.remove(&oref);
    }

    pub fn apply_extension(&mut self, kind: &ExtensionKind, obj: DynamicObject) {
        let id = ObjectId::of(&obj);
        let changed = self
            .objects
            .extensions
            .get(kind)
            .and_then(|objs| objs.get(&id))
            .is_none_or(|prior| is_changed(&prior.metadata, &obj.metadata, true));
        let direct = if changed {
            self.extension_controllers(kind, &obj)
        } else {
            BTreeSet::new()
        };
        self.objects
            .extensions
            .entry(kind.clone())
            .or_default()
            .insert(id.clone(), obj);
        if changed {
            let oref = ObjectRef {
                kind: Kind::Extension(kind.clone()),
                id,
            };
            self.trigger(&oref, direct);
        }
    }

    pub fn delete_extension(&mut self, kind: &ExtensionKind, id: ObjectId) {
        let Some(prior) = self
            .objects
            .extensions
            .get_mut(kind)
            .and_then(|objs| objs.remove(&id))
        else {
            return;
        };
        let direct = self.extension_controllers(kind, &prior);
        let oref = ObjectRef {
            kind: Kind::Extension(kind.clone()),
            id,
        };
        self.trigger(&oref, direct);
    }

    /// Replaces all extension objects of a kind and marks the kind synced.
    pub fn reset_extensions(&mut self, kind: &ExtensionKind, objs: Vec<DynamicObject>) {
        let live = objs.iter().map(ObjectId::of).collect::<HashSet<_>>();
        let stale = self
            .objects
            .extensions
            .get(kind)
            .into_iter()
            .flat_map(|objs| objs.keys())
            .filter(|id| !live.contains(*id))
            .cloned()
            .collect::<Vec<_>>();
        for obj in objs {
            self.apply_extension(kind, obj);
        }
        for id in stale {
            self.delete_extension(kind, id);
        }
        self.mark_synced(Kind::Extension(kind.clone()));
    }

    fn trigger(&self, obj: &ObjectRef, mut controllers: BTreeSet<String>) {
        if matches!(obj.kind, Kind::ReferenceGrant | Kind::Namespace | Kind::Node) {
            controllers.extend(self.config.controllers.iter().cloned());
        }
        controllers.extend(self.members.get(obj).into_iter().flatten().cloned());
        for referrer in self.refs.referrers(obj) {
            controllers.extend(self.members.get(referrer).into_iter().flatten().cloned());
            controllers.extend(self.direct_controllers(referrer));
        }

        for controller in controllers {
            tracing::debug!(%obj, %controller, "Enqueueing");
            self.queue.enqueue(controller);
        }
    }

    fn direct_controllers(&self, obj: &ObjectRef) -> BTreeSet<String> {
        let id = &obj.id;
        match &obj.kind {
            Kind::GatewayClass => self.class_controllers(&id.name),
            Kind::Gateway => self.gateway_controllers(&id.namespace, &id.name),
            Kind::HttpRoute => self.route_controllers(self.objects.http_routes.get(id)),
            Kind::GrpcRoute => self.route_controllers(self.objects.grpc_routes.get(id)),
            Kind::TlsRoute => self.route_controllers(self.objects.tls_routes.get(id)),
            Kind::TcpRoute => self.route_controllers(self.objects.tcp_routes.get(id)),
            Kind::BackendTrafficPolicy => self
                .objects
                .backend_traffic_policies
                .get(id)
                .map(|p| p.controllers(self))
                .unwrap_or_default(),
            Kind::ClientTrafficPolicy => self
                .objects
                .client_traffic_policies
                .get(id)
                .map(|p| p.controllers(self))
                .unwrap_or_default(),
            Kind::SecurityPolicy => self
                .objects
                .security_policies
                .get(id)
                .map(|p| p.controllers(self))
                .unwrap_or_default(),
            _ => BTreeSet::new(),
        }
    }

    fn class_controllers(&self, class: &str) -> BTreeSet<String> {
        self.objects
            .classes
            .get(&ObjectId::cluster(class))
            .map(|c| c.spec.controller_name.clone())
            .filter(|name| self.config.controllers.contains(name))
            .into_iter()
            .collect()
    }

    fn gateway_controllers(&self, namespace: &str, name: &str) -> BTreeSet<String> {
        self.objects
            .gateways
            .get(&ObjectId::new(namespace, name))
            .map(|gw| self.class_controllers(&gw.spec.gateway_class_name))
            .unwrap_or_default()
    }

    fn route_controllers<R: RouteObject>(&self, route: Option<&R>) -> BTreeSet<String> {
        let Some(route) = route else {
            return BTreeSet::new();
        };
        let ns = route.namespace().unwrap_or_default();
        route
            .parent_refs()
            .iter()
            .filter(|p| p.is_gateway())
            .flat_map(|p| {
                self.gateway_controllers(p.namespace.as_deref().unwrap_or(&ns), &p.name)
            })
            .collect()
    }

    fn target_controllers(
        &self,
        namespace: &str,
        targets: &[LocalPolicyTargetReference],
    ) -> BTreeSet<String> {
        targets
            .iter()
            .flat_map(|t| {
                let id = ObjectId::new(namespace, t.name.clone());
                if t.group == gateway::GROUP && t.kind == "Gateway" {
                    return self.gateway_controllers(namespace, &t.name);
                }
                match Kind::route(&t.group, &t.kind) {
                    Some(kind) => {
                        let oref = ObjectRef { kind, id };
                        let mut controllers = self.direct_controllers(&oref);
                        controllers
                            .extend(self.members.get(&oref).into_iter().flatten().cloned());
                        controllers
                    }
                    None => BTreeSet::new(),
                }
            })
            .collect()
    }

    fn extension_controllers(
        &self,
        kind: &ExtensionKind,
        obj: &DynamicObject,
    ) -> BTreeSet<String> {
        if !self.config.extension_policy_kinds.contains(kind) {
            return BTreeSet::new();
        }
        let ns = obj.namespace().unwrap_or_default();
        self.target_controllers(&ns, &extension_targets(obj))
    }
}

/// Reads `spec.targetRefs` from an unstructured policy object.
pub(crate) fn extension_targets(obj: &DynamicObject) -> Vec<LocalPolicyTargetReference> {
    obj.data
        .get("spec")
        .and_then(|spec| spec.get("targetRefs"))
        .and_then(|refs| serde_json::from_value(refs.clone()).ok())
        .unwrap_or_default()
}

fn is_changed(prior: &ObjectMeta, next: &ObjectMeta, by_generation: bool) -> bool {
    if by_generation {
        if let (Some(a), Some(b)) = (prior.generation, next.generation) {
            return a != b || prior.labels != next.labels;
        }
    }
    prior.resource_version.is_none() || prior.resource_version != next.resource_version
}

fn owning_gateway(meta: &ObjectMeta) -> Option<(&str, &str)> {
    let labels = meta.labels.as_ref()?;
    let name = labels.get(labels::OWNING_GATEWAY_NAME)?;
    let ns = labels.get(labels::OWNING_GATEWAY_NAMESPACE)?;
    Some((ns.as_str(), name.as_str()))
}

fn backend_ref_keys<'a>(
    refs: impl IntoIterator<Item = &'a BackendRef>,
    namespace: &str,
) -> Vec<ObjectRef> {
    refs.into_iter()
        .filter_map(|b| {
            let kind = Kind::backend(b.group(), b.kind())?;
            let ns = b.namespace.as_deref().unwrap_or(namespace);
            Some(ObjectRef::new(kind, ns, b.name.clone()))
        })
        .collect()
}

fn route_keys<R: RouteObject>(route: &R, config: &Config) -> Vec<ObjectRef> {
    let ns = route.namespace().unwrap_or_default();
    let mut keys = backend_ref_keys(route.backend_refs(), &ns);
    for ext in route.extension_refs() {
        if let Some(kind) = config
            .extension_kinds
            .iter()
            .find(|k| k.matches(&ext.group, &ext.kind))
        {
            keys.push(ObjectRef::new(
                Kind::Extension(kind.clone()),
                ns.clone(),
                ext.name.clone(),
            ));
        }
    }
    keys
}

fn secret_ref_key(r: &SecretObjectReference, namespace: &str) -> Option<ObjectRef> {
    let kind = match (r.group(), r.kind()) {
        ("", "Secret") => Kind::Secret,
        ("", "ConfigMap") => Kind::ConfigMap,
        _ => return None,
    };
    let ns = r.namespace.as_deref().unwrap_or(namespace);
    Some(ObjectRef::new(kind, ns, r.name.clone()))
}

// === impl Cached ===

impl Cached for GatewayClass {
    const KIND: Kind = Kind::GatewayClass;
    const BY_GENERATION: bool = true;

    fn objects(objects: &mut Objects) -> &mut BTreeMap<ObjectId, Self> {
        &mut objects.classes
    }

    fn index_keys(&self, _: &Config) -> Vec<ObjectRef> {
        self.spec
            .parameters_ref
            .iter()
            .filter(|p| p.group == policy::GROUP && p.kind == "ProxyConfig")
            .map(|p| {
                ObjectRef::new(
                    Kind::ProxyConfig,
                    p.namespace.clone().unwrap_or_default(),
                    p.name.clone(),
                )
            })
            .collect()
    }

    fn controllers(&self, index: &Index) -> BTreeSet<String> {
        Some(self.spec.controller_name.clone())
            .filter(|name| index.config.controllers.contains(name))
            .into_iter()
            .collect()
    }
}

impl Cached for Gateway {
    const KIND: Kind = Kind::Gateway;
    const BY_GENERATION: bool = true;

    fn objects(objects: &mut Objects) -> &mut BTreeMap<ObjectId, Self> {
        &mut objects.gateways
    }

    fn index_keys(&self, _: &Config) -> Vec<ObjectRef> {
        let ns = self.namespace().unwrap_or_default();
        self.spec
            .listeners
            .iter()
            .filter_map(|l| l.tls.as_ref())
            .flat_map(|tls| tls.certificate_refs.iter().flatten())
            .filter_map(|r| secret_ref_key(r, &ns))
            .collect()
    }

    fn controllers(&self, index: &Index) -> BTreeSet<String> {
        index.class_controllers(&self.spec.gateway_class_name)
    }
}

impl Cached for HttpRoute {
    const KIND: Kind = Kind::HttpRoute;
    const BY_GENERATION: bool = true;

    fn objects(objects: &mut Objects) -> &mut BTreeMap<ObjectId, Self> {
        &mut objects.http_routes
    }

    fn index_keys(&self, config: &Config) -> Vec<ObjectRef> {
        route_keys(self, config)
    }

    fn controllers(&self, index: &Index) -> BTreeSet<String> {
        index.route_controllers(Some(self))
    }
}

impl Cached for GrpcRoute {
    const KIND: Kind = Kind::GrpcRoute;
    const BY_GENERATION: bool = true;

    fn objects(objects: &mut Objects) -> &mut BTreeMap<ObjectId, Self> {
        &mut objects.grpc_routes
    }

    fn index_keys(&self, config: &Config) -> Vec<ObjectRef> {
        route_keys(self, config)
    }

    fn controllers(&self, index: &Index) -> BTreeSet<String> {
        index.route_controllers(Some(self))
    }
}

impl Cached for TlsRoute {
    const KIND: Kind = Kind::TlsRoute;
    const BY_GENERATION: bool = true;

    fn objects(objects: &mut Objects) -> &mut BTreeMap<ObjectId, Self> {
        &mut objects.tls_routes
    }

    fn index_keys(&self, config: &Config) -> Vec<ObjectRef> {
        route_keys(self, config)
    }

    fn controllers(&self, index: &Index) -> BTreeSet<String> {
        index.route_controllers(Some(self))
    }
}

impl Cached for TcpRoute {
    const KIND: Kind = Kind::TcpRoute;
    const BY_GENERATION: bool = true;

    fn objects(objects: &mut Objects) -> &mut BTreeMap<ObjectId, Self> {
        &mut objects.tcp_routes
    }

    fn index_keys(&self, config: &Config) -> Vec<ObjectRef> {
        route_keys(self, config)
    }

    fn controllers(&self, index: &Index) -> BTreeSet<String> {
        index.route_controllers(Some(self))
    }
}

impl Cached for ReferenceGrant {
    const KIND: Kind = Kind::ReferenceGrant;
    const BY_GENERATION: bool = true;

    fn objects(objects: &mut Objects) -> &mut BTreeMap<ObjectId, Self> {
        &mut objects.reference_grants
    }
}

impl Cached for BackendTrafficPolicy {
    const KIND: Kind = Kind::BackendTrafficPolicy;
    const BY_GENERATION: bool = true;

    fn objects(objects: &mut Objects) -> &mut BTreeMap<ObjectId, Self> {
        &mut objects.backend_traffic_policies
    }

    fn controllers(&self, index: &Index) -> BTreeSet<String> {
        index.target_controllers(&self.namespace().unwrap_or_default(), &self.spec.target_refs)
    }
}

impl Cached for ClientTrafficPolicy {
    const KIND: Kind = Kind::ClientTrafficPolicy;
    const BY_GENERATION: bool = true;

    fn objects(objects: &mut Objects) -> &mut BTreeMap<ObjectId, Self> {
        &mut objects.client_traffic_policies
    }

    fn index_keys(&self, _: &Config) -> Vec<ObjectRef> {
        let ns = self.namespace().unwrap_or_default();
        self.spec
            .tls
            .iter()
            .filter_map(|tls| tls.client_validation.as_ref())
            .flat_map(|v| &v.ca_certificate_refs)
            .filter_map(|r| secret_ref_key(r, &ns))
            .collect()
    }

    fn controllers(&self, index: &Index) -> BTreeSet<String> {
        index.target_controllers(&self.namespace().unwrap_or_default(), &self.spec.target_refs)
    }
}

impl Cached for SecurityPolicy {
    const KIND: Kind = Kind::SecurityPolicy;
    const BY_GENERATION: bool = true;

    fn objects(objects: &mut Objects) -> &mut BTreeMap<ObjectId, Self> {
        &mut objects.security_policies
    }

    fn index_keys(&self, _: &Config) -> Vec<ObjectRef> {
        let ns = self.namespace().unwrap_or_default();
        let users = self
            .spec
            .basic_auth
            .iter()
            .map(|auth| ObjectRef::new(Kind::Secret, ns.clone(), auth.users.name.clone()));
        let ext_auth = self
            .spec
            .ext_auth
            .iter()
            .flat_map(|auth| backend_ref_keys(&auth.backend_refs, &ns));
        users.chain(ext_auth).collect()
    }

    fn controllers(&self, index: &Index) -> BTreeSet<String> {
        index.target_controllers(&self.namespace().unwrap_or_default(), &self.spec.target_refs)
    }
}

impl Cached for ProxyConfig {
    const KIND: Kind = Kind::ProxyConfig;
    const BY_GENERATION: bool = true;

    fn objects(objects: &mut Objects) -> &mut BTreeMap<ObjectId, Self> {
        &mut objects.proxy_configs
    }
}

impl Cached for Service {
    const KIND: Kind = Kind::Service;
    const BY_GENERATION: bool = false;

    fn objects(objects: &mut Objects) -> &mut BTreeMap<ObjectId, Self> {
        &mut objects.services
    }

    fn controllers(&self, index: &Index) -> BTreeSet<String> {
        owning_gateway(&self.metadata)
            .map(|(ns, name)| index.gateway_controllers(ns, name))
            .unwrap_or_default()
    }
}

impl Cached for ServiceImport {
    const KIND: Kind = Kind::ServiceImport;
    const BY_GENERATION: bool = false;

    fn objects(objects: &mut Objects) -> &mut BTreeMap<ObjectId, Self> {
        &mut objects.service_imports
    }
}

impl Cached for EndpointSlice {
    const KIND: Kind = Kind::EndpointSlice;
    const BY_GENERATION: bool = false;

    fn objects(objects: &mut Objects) -> &mut BTreeMap<ObjectId, Self> {
        &mut objects.endpoint_slices
    }

    /// Slices affect the groups that hold their Service.
    fn controllers(&self, index: &Index) -> BTreeSet<String> {
        let Some(svc) = self.labels().get(labels::SERVICE_NAME) else {
            return BTreeSet::new();
        };
        let svc = ObjectRef::new(
            Kind::Service,
            self.namespace().unwrap_or_default(),
            svc.clone(),
        );
        index.members.get(&svc).cloned().unwrap_or_default()
    }
}

impl Cached for Secret {
    const KIND: Kind = Kind::Secret;
    const BY_GENERATION: bool = false;

    fn objects(objects: &mut Objects) -> &mut BTreeMap<ObjectId, Self> {
        &mut objects.secrets
    }
}

impl Cached for ConfigMap {
    const KIND: Kind = Kind::ConfigMap;
    const BY_GENERATION: bool = false;

    fn objects(objects: &mut Objects) -> &mut BTreeMap<ObjectId, Self> {
        &mut objects.config_maps
    }
}

impl Cached for Deployment {
    const KIND: Kind = Kind::Deployment;
    // Availability is reported in status.
    const BY_GENERATION: bool = false;

    fn objects(objects: &mut Objects) -> &mut BTreeMap<ObjectId, Self> {
        &mut objects.deployments
    }

    fn controllers(&self, index: &Index) -> BTreeSet<String> {
        owning_gateway(&self.metadata)
            .map(|(ns, name)| index.gateway_controllers(ns, name))
            .unwrap_or_default()
    }
}

// === impl kubert::index ===

impl<T: Cached> kubert::index::IndexNamespacedResource<T> for Index {
    fn apply(&mut self, obj: T) {
        self.apply_object(obj);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.delete_object::<T>(ObjectId::new(namespace, name));
    }

    fn reset(&mut self, objs: Vec<T>, removed: kubert::index::NamespacedRemoved) {
        for obj in objs {
            self.apply_object(obj);
        }
        for (namespace, names) in removed {
            for name in names {
                self.delete_object::<T>(ObjectId::new(namespace.clone(), name));
            }
        }
        self.mark_synced(T::KIND);
    }
}

impl kubert::index::IndexClusterResource<GatewayClass> for Index {
    fn apply(&mut self, class: GatewayClass) {
        self.apply_object(class);
    }

    fn delete(&mut self, name: String) {
        self.delete_object::<GatewayClass>(ObjectId::cluster(name));
    }

    fn reset(&mut self, classes: Vec<GatewayClass>, removed: kubert::index::ClusterRemoved) {
        for class in classes {
            self.apply_object(class);
        }
        for name in removed {
            self.delete_object::<GatewayClass>(ObjectId::cluster(name));
        }
        self.mark_synced(Kind::GatewayClass);
    }
}

impl kubert::index::IndexClusterResource<Namespace> for Index {
    fn apply(&mut self, ns: Namespace) {
        let name = ns.name_unchecked();
        let changed = self
            .objects
            .namespaces
            .get(&name)
            .is_none_or(|prior| is_changed(&prior.metadata, &ns.metadata, false));
        self.objects.namespaces.insert(name.clone(), ns);
        if changed {
            self.trigger(&ObjectRef::new(Kind::Namespace, "", name), BTreeSet::new());
        }
    }

    fn delete(&mut self, name: String) {
        if self.objects.namespaces.remove(&name).is_some() {
            self.trigger(&ObjectRef::new(Kind::Namespace, "", name), BTreeSet::new());
        }
    }

    fn reset(&mut self, nss: Vec<Namespace>, removed: kubert::index::ClusterRemoved) {
        for ns in nss {
            kubert::index::IndexClusterResource::apply(self, ns);
        }
        for name in removed {
            kubert::index::IndexClusterResource::<Namespace>::delete(self, name);
        }
        self.mark_synced(Kind::Namespace);
    }
}

impl kubert::index::IndexClusterResource<Node> for Index {
    fn apply(&mut self, node: Node) {
        if self.nodes.apply(&node) {
            self.trigger(
                &ObjectRef::new(Kind::Node, "", node.name_unchecked()),
                BTreeSet::new(),
            );
        }
    }

    fn delete(&mut self, name: String) {
        if self.nodes.delete(&name) {
            self.trigger(&ObjectRef::new(Kind::Node, "", name), BTreeSet::new());
        }
    }

    fn reset(&mut self, nodes: Vec<Node>, removed: kubert::index::ClusterRemoved) {
        for node in nodes {
            kubert::index::IndexClusterResource::apply(self, node);
        }
        for name in removed {
            kubert::index::IndexClusterResource::<Node>::delete(self, name);
        }
        self.mark_synced(Kind::Node);
    }
}
