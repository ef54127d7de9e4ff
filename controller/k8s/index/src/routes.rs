//! A uniform view over the route kinds.

use crate::{object::Kind, status::StatusKind};
use switchyard_controller_k8s_api::{
    gateway::{
        BackendRef, GrpcRoute, HttpRoute, HttpRouteFilter, LocalObjectReference, ParentReference,
        TcpRoute, TlsRoute,
    },
    Resource,
};

/// Operations the reconciler needs from every route kind.
pub trait RouteObject: Resource<DynamicType = ()> + Clone {
    const KIND: Kind;
    const STATUS: StatusKind;

    fn parent_refs(&self) -> &[ParentReference];

    /// Route hostnames. Kinds without hostnames match every listener.
    fn hostnames(&self) -> &[String];

    fn backend_refs(&self) -> Vec<&BackendRef>;

    /// Drops backend references rejected by `keep`.
    fn retain_backend_refs(&mut self, keep: impl FnMut(&BackendRef) -> bool);

    fn extension_refs(&self) -> Vec<&LocalObjectReference> {
        Vec::new()
    }
}

fn filter_extensions(
    filters: Option<&Vec<HttpRouteFilter>>,
) -> impl Iterator<Item = &LocalObjectReference> {
    filters
        .into_iter()
        .flatten()
        .filter(|f| f.type_ == "ExtensionRef")
        .filter_map(|f| f.extension_ref.as_ref())
}

impl RouteObject for HttpRoute {
    const KIND: Kind = Kind::HttpRoute;
    const STATUS: StatusKind = StatusKind::HttpRoute;

    fn parent_refs(&self) -> &[ParentReference] {
        self.spec.parent_refs.as_deref().unwrap_or_default()
    }

    fn hostnames(&self) -> &[String] {
        self.spec.hostnames.as_deref().unwrap_or_default()
    }

    fn backend_refs(&self) -> Vec<&BackendRef> {
        self.spec
            .rules
            .iter()
            .flatten()
            .flat_map(|r| r.backend_refs.iter().flatten())
            .collect()
    }

    fn retain_backend_refs(&mut self, mut keep: impl FnMut(&BackendRef) -> bool) {
        for rule in self.spec.rules.iter_mut().flatten() {
            if let Some(refs) = rule.backend_refs.as_mut() {
                refs.retain(&mut keep);
            }
        }
    }

    fn extension_refs(&self) -> Vec<&LocalObjectReference> {
        self.spec
            .rules
            .iter()
            .flatten()
            .flat_map(|r| filter_extensions(r.filters.as_ref()))
            .collect()
    }
}

impl RouteObject for GrpcRoute {
    const KIND: Kind = Kind::GrpcRoute;
    const STATUS: StatusKind = StatusKind::GrpcRoute;

    fn parent_refs(&self) -> &[ParentReference] {
        self.spec.parent_refs.as_deref().unwrap_or_default()
    }

    fn hostnames(&self) -> &[String] {
        self.spec.hostnames.as_deref().unwrap_or_default()
    }

    fn backend_refs(&self) -> Vec<&BackendRef> {
        self.spec
            .rules
            .iter()
            .flatten()
            .flat_map(|r| r.backend_refs.iter().flatten())
            .collect()
    }

    fn retain_backend_refs(&mut self, mut keep: impl FnMut(&BackendRef) -> bool) {
        for rule in self.spec.rules.iter_mut().flatten() {
            if let Some(refs) = rule.backend_refs.as_mut() {
                refs.retain(&mut keep);
            }
        }
    }

    fn extension_refs(&self) -> Vec<&LocalObjectReference> {
        self.spec
            .rules
            .iter()
            .flatten()
            .flat_map(|r| filter_extensions(r.filters.as_ref()))
            .collect()
    }
}

impl RouteObject for TlsRoute {
    const KIND: Kind = Kind::TlsRoute;
    const STATUS: StatusKind = StatusKind::TlsRoute;

    fn parent_refs(&self) -> &[ParentReference] {
        self.spec.parent_refs.as_deref().unwrap_or_default()
    }

    fn hostnames(&self) -> &[String] {
        self.spec.hostnames.as_deref().unwrap_or_default()
    }

    fn backend_refs(&self) -> Vec<&BackendRef> {
        self.spec
            .rules
            .iter()
            .flat_map(|r| r.backend_refs.iter().flatten())
            .collect()
    }

    fn retain_backend_refs(&mut self, mut keep: impl FnMut(&BackendRef) -> bool) {
        for rule in self.spec.rules.iter_mut() {
            if let Some(refs) = rule.backend_refs.as_mut() {
                refs.retain(&mut keep);
            }
        }
    }
}

impl RouteObject for TcpRoute {
    const KIND: Kind = Kind::TcpRoute;
    const STATUS: StatusKind = StatusKind::TcpRoute;

    fn parent_refs(&self) -> &[ParentReference] {
        self.spec.parent_refs.as_deref().unwrap_or_default()
    }

    fn hostnames(&self) -> &[String] {
        &[]
    }

    fn backend_refs(&self) -> Vec<&BackendRef> {
        self.spec
            .rules
            .iter()
            .flat_map(|r| r.backend_refs.iter().flatten())
            .collect()
    }

    fn retain_backend_refs(&mut self, mut keep: impl FnMut(&BackendRef) -> bool) {
        for rule in self.spec.rules.iter_mut() {
            if let Some(refs) = rule.backend_refs.as_mut() {
                refs.retain(&mut keep);
            }
        }
    }
}
