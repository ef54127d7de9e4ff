use super::{gateways::ListenerState, Pass};
use crate::{
    index::Objects,
    object::{Kind, ObjectId, ObjectRef},
    routes::RouteObject,
    snapshot::{DroppedRef, ListenerRef, ResourceSnapshot},
    status::{condition, ParentStatus},
};
use ahash::AHashSet as HashSet;
use std::collections::{BTreeMap, BTreeSet};
use switchyard_controller_core::extension::ExtensionObject;
use switchyard_controller_k8s_api::{
    gateway::{
        BackendRef, GrpcRoute, HttpRoute, LocalObjectReference, ParentReference, TcpRoute,
        TlsRoute,
    },
    labels::{self, Selector},
    ResourceExt,
};

const RESOLVED: &str = "Resolved all the Object references for the Route";

/// Access to a route kind's cached and snapshot maps.
trait Routes: RouteObject {
    fn cached(objects: &Objects) -> &BTreeMap<ObjectId, Self>;
    fn snapshot(snapshot: &mut ResourceSnapshot) -> &mut BTreeMap<ObjectId, Self>;
}

/// Why a reference did not resolve.
pub(super) struct Unresolved {
    pub(super) reason: &'static str,
    pub(super) message: String,
}

impl Pass<'_> {
    pub(super) fn routes(&mut self) {
        self.routes_of::<HttpRoute>();
        self.routes_of::<GrpcRoute>();
        self.routes_of::<TlsRoute>();
        self.routes_of::<TcpRoute>();
    }

    /// Adds the Services and ServiceImports referenced by accepted routes,
    /// releasing backends no accepted route references anymore.
    pub(super) fn backends(&mut self) {
        let group = self.snapshot.group.clone();

        let accepted = self.route_parents.keys().cloned().collect::<HashSet<_>>();
        for orphan in self.mapping.retain_routes(&group, &accepted) {
            tracing::debug!(%group, backend = %orphan, "Backend no longer referenced");
        }

        for backend in self.mapping.backends(&group) {
            self.add_backend(&backend);
        }
    }

    /// Adds a resolved backend to the snapshot. A Service's EndpointSlices
    /// come with it.
    pub(super) fn add_backend(&mut self, backend: &ObjectRef) {
        let index = self.index;
        let objects = index.objects();
        self.out.members.insert(backend.clone());
        match backend.kind {
            Kind::Service => {
                let Some(svc) = objects.services.get(&backend.id) else {
                    return;
                };
                self.snapshot.services.insert(backend.id.clone(), svc.clone());
                let slices = objects.endpoint_slices.iter().filter(|(id, slice)| {
                    id.namespace == backend.id.namespace
                        && slice.labels().get(labels::SERVICE_NAME) == Some(&backend.id.name)
                });
                for (id, slice) in slices {
                    self.snapshot.endpoint_slices.insert(id.clone(), slice.clone());
                }
            }
            Kind::ServiceImport => {
                if let Some(import) = objects.service_imports.get(&backend.id) {
                    self.snapshot
                        .service_imports
                        .insert(backend.id.clone(), import.clone());
                }
            }
            _ => {}
        }
    }

    fn routes_of<R: Routes>(&mut self) {
        let index = self.index;
        for (id, route) in R::cached(index.objects()) {
            self.route(id, route);
        }
    }

    fn route<R: Routes>(&mut self, id: &ObjectId, route: &R) {
        let generation = route.meta().generation;
        let mut attached = Vec::new();
        for parent in route.parent_refs() {
            if !parent.is_gateway() {
                continue;
            }
            let gw = ObjectId::new(
                parent.namespace.as_deref().unwrap_or(&id.namespace),
                parent.name.clone(),
            );
            // Parents outside the group belong to other controllers.
            if !self.snapshot.gateways.contains_key(&gw) {
                continue;
            }
            let accepted = self.attach::<R>(&gw, parent, &id.namespace, route.hostnames());
            attached.push((parent.clone(), accepted));
        }
        if attached.is_empty() {
            return;
        }

        let route_ref = ObjectRef {
            kind: R::KIND,
            id: id.clone(),
        };
        self.out.members.insert(route_ref.clone());

        let mut unresolved = None::<Unresolved>;
        let mut failed = HashSet::new();
        let mut dropped = Vec::new();
        let mut backends = BTreeSet::new();
        for backend in route.backend_refs() {
            match self.backend(R::KIND, &id.namespace, backend) {
                Ok(backend) => {
                    backends.insert(backend);
                }
                Err(error) => {
                    dropped.push(DroppedRef {
                        from: route_ref.clone(),
                        group: backend.group().to_string(),
                        kind: backend.kind().to_string(),
                        to: ObjectId::new(
                            backend.namespace.as_deref().unwrap_or(&id.namespace),
                            backend.name.clone(),
                        ),
                        reason: error.reason,
                    });
                    failed.insert(backend.clone());
                    if unresolved.is_none() {
                        unresolved = Some(error);
                    }
                }
            }
        }
        for ext in route.extension_refs() {
            if let Err(error) = self.extension_filter(&id.namespace, ext) {
                if unresolved.is_none() {
                    unresolved = Some(error);
                }
            }
        }

        let resolved = match &unresolved {
            Some(Unresolved { reason, message }) => {
                condition("ResolvedRefs", false, reason, message.clone(), generation)
            }
            None => condition("ResolvedRefs", true, "ResolvedRefs", RESOLVED, generation),
        };

        let mut parents = Vec::with_capacity(attached.len());
        let mut accepted_by = Vec::new();
        let mut listeners = Vec::new();
        for (parent_ref, accepted) in attached {
            let accepted_cond = match accepted {
                Ok(matched) => {
                    accepted_by.push(parent_ref.clone());
                    listeners.extend(matched);
                    condition("Accepted", true, "Accepted", "Route is accepted", generation)
                }
                Err(Unresolved { reason, message }) => {
                    condition("Accepted", false, reason, message, generation)
                }
            };
            parents.push(ParentStatus {
                parent_ref,
                conditions: vec![accepted_cond, resolved.clone()],
            });
        }
        self.out.derive_parents(R::STATUS, id.clone(), parents);

        if accepted_by.is_empty() {
            tracing::debug!(kind = %R::KIND, route = %id, "Route not accepted by any parent");
            return;
        }

        if let Some(Unresolved { reason, message }) = &unresolved {
            tracing::info!(kind = %R::KIND, route = %id, %reason, %message, "Route has unresolved references");
        }
        let mut route = route.clone();
        route.retain_backend_refs(|b| !failed.contains(b));
        R::snapshot(&mut self.snapshot).insert(id.clone(), route);
        self.snapshot.dropped.extend(dropped);
        self.mapping
            .insert(&self.snapshot.group, route_ref.clone(), backends);
        listeners.sort();
        listeners.dedup();
        self.snapshot.attachments.insert(route_ref.clone(), listeners);
        self.route_parents.insert(route_ref, accepted_by);
    }

    /// Attempts to attach a route to the listeners of one parent Gateway,
    /// counting the route on every listener that admits it. Returns the
    /// listeners it attached to.
    fn attach<R: Routes>(
        &mut self,
        gw: &ObjectId,
        parent: &ParentReference,
        route_ns: &str,
        hostnames: &[String],
    ) -> Result<Vec<ListenerRef>, Unresolved> {
        let index = self.index;
        let Some(listeners) = self.listeners.get_mut(gw) else {
            return Err(Unresolved {
                reason: "NoMatchingParent",
                message: format!("Gateway {gw} has no listeners"),
            });
        };

        let mut candidates = listeners
            .iter_mut()
            .filter(|l| {
                parent
                    .section_name
                    .as_ref()
                    .is_none_or(|name| *name == l.listener.name)
                    && parent.port.is_none_or(|port| port == l.listener.port)
            })
            .peekable();
        if candidates.peek().is_none() {
            return Err(Unresolved {
                reason: "NoMatchingParent",
                message: "No listener matches the parent reference".to_string(),
            });
        }

        let objects = index.objects();
        let mut allowed = candidates
            .filter(|l| {
                l.is_accepted()
                    && l.admits(&R::KIND)
                    && allows_namespace(objects, l, &gw.namespace, route_ns)
            })
            .peekable();
        if allowed.peek().is_none() {
            return Err(Unresolved {
                reason: "NotAllowedByListeners",
                message: format!("No listener of Gateway {gw} allows this route"),
            });
        }

        let mut matched = Vec::new();
        for listener in allowed {
            let host = listener.listener.hostname.as_deref();
            let intersects = match host {
                None => true,
                Some(host) => {
                    hostnames.is_empty() || hostnames.iter().any(|h| hostnames_intersect(host, h))
                }
            };
            if intersects {
                listener.attached_routes += 1;
                matched.push(ListenerRef {
                    gateway: gw.clone(),
                    listener: listener.listener.name.clone(),
                });
            }
        }
        if matched.is_empty() {
            return Err(Unresolved {
                reason: "NoMatchingListenerHostname",
                message: "No listener hostname matches the route's hostnames".to_string(),
            });
        }
        Ok(matched)
    }

    pub(super) fn backend(
        &mut self,
        from: Kind,
        namespace: &str,
        backend: &BackendRef,
    ) -> Result<ObjectRef, Unresolved> {
        let kind = match Kind::backend(backend.group(), backend.kind()) {
            Some(kind) => kind,
            None => {
                return Err(Unresolved {
                    reason: "InvalidKind",
                    message: format!(
                        "Unsupported backend kind {}/{}",
                        backend.group(),
                        backend.kind()
                    ),
                })
            }
        };

        let index = self.index;
        let ns = backend.namespace.as_deref().unwrap_or(namespace);
        let backend_ref = ObjectRef::new(kind.clone(), ns, backend.name.clone());
        self.out.members.insert(backend_ref.clone());

        let granted = index.grants().is_granted(
            from.group_kind(),
            namespace,
            kind.group_kind(),
            ns,
            &backend.name,
        );
        if !granted {
            return Err(Unresolved {
                reason: "RefNotPermitted",
                message: format!(
                    "Backend ref to {kind} {} not permitted by any ReferenceGrant",
                    backend_ref.id
                ),
            });
        }

        let objects = index.objects();
        let exists = match kind {
            Kind::Service => objects.services.contains_key(&backend_ref.id),
            _ => objects.service_imports.contains_key(&backend_ref.id),
        };
        if !exists {
            return Err(Unresolved {
                reason: "BackendNotFound",
                message: format!("{kind} {} not found", backend_ref.id),
            });
        }
        Ok(backend_ref)
    }

    /// Resolves an `ExtensionRef` filter into the snapshot.
    fn extension_filter(
        &mut self,
        namespace: &str,
        ext: &LocalObjectReference,
    ) -> Result<(), Unresolved> {
        let index = self.index;
        let Some(kind) = index
            .config()
            .extension_kinds
            .iter()
            .find(|k| k.matches(&ext.group, &ext.kind))
        else {
            return Err(Unresolved {
                reason: "InvalidKind",
                message: format!("Unknown extension filter kind {}/{}", ext.group, ext.kind),
            });
        };

        let id = ObjectId::new(namespace, ext.name.clone());
        let oref = ObjectRef {
            kind: Kind::Extension(kind.clone()),
            id,
        };
        self.out.members.insert(oref.clone());
        let Some(obj) = index
            .objects()
            .extensions
            .get(kind)
            .and_then(|objs| objs.get(&oref.id))
        else {
            return Err(Unresolved {
                reason: "RefNotFound",
                message: format!("{} {} not found", ext.kind, oref.id),
            });
        };

        match serde_json::to_vec(obj) {
            Ok(json) => {
                self.snapshot.extension_resources.insert(
                    oref.clone(),
                    ExtensionObject {
                        kind: kind.clone(),
                        namespace: Some(oref.id.namespace.clone()),
                        name: oref.id.name.clone(),
                        json,
                    },
                );
                Ok(())
            }
            Err(error) => {
                tracing::warn!(%error, object = %oref, "Failed to encode extension object");
                Err(Unresolved {
                    reason: "RefNotFound",
                    message: format!("{} {} could not be encoded", ext.kind, oref.id),
                })
            }
        }
    }
}

fn allows_namespace(objects: &Objects, l: &ListenerState, gw_ns: &str, route_ns: &str) -> bool {
    let namespaces = l
        .listener
        .allowed_routes
        .as_ref()
        .and_then(|a| a.namespaces.as_ref());
    match namespaces.and_then(|n| n.from.as_deref()).unwrap_or("Same") {
        "All" => true,
        "Same" => gw_ns == route_ns,
        "Selector" => {
            let Some(selector) = namespaces
                .and_then(|n| n.selector.as_ref())
                .and_then(|s| Selector::try_from(s).ok())
            else {
                return false;
            };
            objects
                .namespaces
                .get(route_ns)
                .is_some_and(|ns| selector.matches(ns.labels()))
        }
        _ => false,
    }
}

/// Returns true if a listener hostname and a route hostname can both match
/// some request host. Either may be a `*.` wildcard.
fn hostnames_intersect(listener: &str, route: &str) -> bool {
    match (listener.strip_prefix('*'), route.strip_prefix('*')) {
        (None, None) => listener.eq_ignore_ascii_case(route),
        (Some(suffix), None) => route.len() > suffix.len() && ends_with(route, suffix),
        (None, Some(suffix)) => listener.len() > suffix.len() && ends_with(listener, suffix),
        (Some(a), Some(b)) => ends_with(a, b) || ends_with(b, a),
    }
}

fn ends_with(host: &str, suffix: &str) -> bool {
    host.len()
        .checked_sub(suffix.len())
        .and_then(|i| host.get(i..))
        .is_some_and(|tail| tail.eq_ignore_ascii_case(suffix))
}

// === impl Routes ===

impl Routes for HttpRoute {
    fn cached(objects: &Objects) -> &BTreeMap<ObjectId, Self> {
        &objects.http_routes
    }

    fn snapshot(snapshot: &mut ResourceSnapshot) -> &mut BTreeMap<ObjectId, Self> {
        &mut snapshot.http_routes
    }
}

impl Routes for GrpcRoute {
    fn cached(objects: &Objects) -> &BTreeMap<ObjectId, Self> {
        &objects.grpc_routes
    }

    fn snapshot(snapshot: &mut ResourceSnapshot) -> &mut BTreeMap<ObjectId, Self> {
        &mut snapshot.grpc_routes
    }
}

impl Routes for TlsRoute {
    fn cached(objects: &Objects) -> &BTreeMap<ObjectId, Self> {
        &objects.tls_routes
    }

    fn snapshot(snapshot: &mut ResourceSnapshot) -> &mut BTreeMap<ObjectId, Self> {
        &mut snapshot.tls_routes
    }
}

impl Routes for TcpRoute {
    fn cached(objects: &Objects) -> &BTreeMap<ObjectId, Self> {
        &objects.tcp_routes
    }

    fn snapshot(snapshot: &mut ResourceSnapshot) -> &mut BTreeMap<ObjectId, Self> {
        &mut snapshot.tcp_routes
    }
}

#[cfg(test)]
mod tests {
    use super::hostnames_intersect;
    use rstest::rstest;

    #[rstest]
    #[case("example.com", "example.com", true)]
    #[case("example.com", "EXAMPLE.com", true)]
    #[case("example.com", "www.example.com", false)]
    #[case("*.example.com", "www.example.com", true)]
    #[case("*.example.com", "a.b.example.com", true)]
    #[case("*.example.com", "example.com", false)]
    #[case("www.example.com", "*.example.com", true)]
    #[case("*.example.com", "*.b.example.com", true)]
    #[case("*.example.com", "*.example.org", false)]
    #[case("foo.example.org", "*.example.com", false)]
    fn hostname_intersection(#[case] listener: &str, #[case] route: &str, #[case] expected: bool) {
        assert_eq!(hostnames_intersect(listener, route), expected);
    }
}
