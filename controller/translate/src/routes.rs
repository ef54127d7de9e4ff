use crate::{
    config::{BackendPolicy, ExtAuth, Matches, Route, Rule, Security, WeightedCluster},
    names, policies,
};
use std::collections::BTreeMap;
use switchyard_controller_core::extension::ExtensionObject;
use switchyard_controller_k8s_api::gateway::{
    BackendRef, GrpcRoute, HttpRoute, HttpRouteFilter, TcpRoute, TlsRoute,
};
use switchyard_controller_k8s_index::{Kind, ObjectId, ObjectRef, ResourceSnapshot, RouteObject};

/// Renders a route kind's rules.
pub(crate) trait ConvertRoute: RouteObject + Sync {
    /// The kind as it appears in route resources.
    const NAME: &'static str;

    fn routes(snapshot: &ResourceSnapshot) -> &BTreeMap<ObjectId, Self>;

    fn rules(&self, namespace: &str) -> Vec<Rule<'_>>;
}

pub(crate) fn convert<'a, R: ConvertRoute>(
    snapshot: &'a ResourceSnapshot,
    route_ref: &ObjectRef,
    name: &'a str,
    route: &'a R,
) -> Route<'a> {
    let attachments = snapshot
        .attachments
        .get(route_ref)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let backend_policy =
        policies::for_route(&snapshot.backend_traffic_policies, route_ref, attachments).map(
            |(id, policy)| BackendPolicy {
                policy: id.to_string(),
                timeout: policy.spec.timeout.as_ref(),
                retry: policy.spec.retry.as_ref(),
                load_balancer: policy.spec.load_balancer.as_ref(),
                circuit_breaker: policy.spec.circuit_breaker.as_ref(),
            },
        );

    let security = policies::for_route(&snapshot.security_policies, route_ref, attachments).map(
        |(id, policy)| Security {
            policy: id.to_string(),
            cors: policy.spec.cors.as_ref(),
            basic_auth: policy.spec.basic_auth.as_ref().map(|auth| {
                names::secret(&Kind::Secret, &ObjectId::new(&id.namespace, &auth.users.name))
            }),
            ext_auth: policy.spec.ext_auth.as_ref().map(|auth| ExtAuth {
                backends: auth
                    .backend_refs
                    .iter()
                    .filter_map(|b| weighted(&id.namespace, b))
                    .collect(),
                headers: auth.headers_to_ext_auth.as_deref().unwrap_or_default(),
                fail_open: auth.fail_open.unwrap_or(false),
            }),
        },
    );

    Route {
        name,
        kind: R::NAME,
        hostnames: route.hostnames(),
        rules: route.rules(&route_ref.id.namespace),
        backend_policy,
        security,
    }
}

/// The extension objects named by a route's filters.
pub(crate) fn extension_resources<R: RouteObject>(
    snapshot: &ResourceSnapshot,
    namespace: &str,
    route: &R,
) -> Vec<ExtensionObject> {
    route
        .extension_refs()
        .into_iter()
        .filter_map(|ext| {
            snapshot.extension_resources.iter().find_map(|(oref, obj)| {
                let found = oref.id.namespace == namespace
                    && oref.id.name == ext.name
                    && obj.kind.matches(&ext.group, &ext.kind);
                found.then(|| obj.clone())
            })
        })
        .collect()
}

/// The cluster serving a backend, if its kind is supported.
pub(crate) fn weighted(namespace: &str, backend: &BackendRef) -> Option<WeightedCluster> {
    let kind = Kind::backend(backend.group(), backend.kind())?;
    let id = ObjectId::new(
        backend.namespace.as_deref().unwrap_or(namespace),
        backend.name.clone(),
    );
    Some(WeightedCluster {
        cluster: names::cluster(&kind, &id),
        port: backend.port,
        weight: backend.weight.unwrap_or(1),
    })
}

fn backends<'b>(
    namespace: &str,
    refs: impl IntoIterator<Item = &'b BackendRef>,
) -> Vec<WeightedCluster> {
    refs.into_iter()
        .filter_map(|b| weighted(namespace, b))
        .collect()
}

const NO_FILTERS: &[HttpRouteFilter] = &[];

impl ConvertRoute for HttpRoute {
    const NAME: &'static str = "HTTPRoute";

    fn routes(snapshot: &ResourceSnapshot) -> &BTreeMap<ObjectId, Self> {
        &snapshot.http_routes
    }

    fn rules(&self, namespace: &str) -> Vec<Rule<'_>> {
        self.spec
            .rules
            .iter()
            .flatten()
            .map(|rule| Rule {
                matches: Matches::Http(rule.matches.as_deref().unwrap_or_default()),
                filters: rule.filters.as_deref().unwrap_or_default(),
                backends: backends(namespace, rule.backend_refs.iter().flatten()),
                timeouts: rule.timeouts.as_ref(),
            })
            .collect()
    }
}

impl ConvertRoute for GrpcRoute {
    const NAME: &'static str = "GRPCRoute";

    fn routes(snapshot: &ResourceSnapshot) -> &BTreeMap<ObjectId, Self> {
        &snapshot.grpc_routes
    }

    fn rules(&self, namespace: &str) -> Vec<Rule<'_>> {
        self.spec
            .rules
            .iter()
            .flatten()
            .map(|rule| Rule {
                matches: Matches::Grpc(rule.matches.as_deref().unwrap_or_default()),
                filters: rule.filters.as_deref().unwrap_or_default(),
                backends: backends(namespace, rule.backend_refs.iter().flatten()),
                timeouts: None,
            })
            .collect()
    }
}

impl ConvertRoute for TlsRoute {
    const NAME: &'static str = "TLSRoute";

    fn routes(snapshot: &ResourceSnapshot) -> &BTreeMap<ObjectId, Self> {
        &snapshot.tls_routes
    }

    fn rules(&self, namespace: &str) -> Vec<Rule<'_>> {
        self.spec
            .rules
            .iter()
            .map(|rule| Rule {
                matches: Matches::Http(&[]),
                filters: NO_FILTERS,
                backends: backends(namespace, rule.backend_refs.iter().flatten()),
                timeouts: None,
            })
            .collect()
    }
}

impl ConvertRoute for TcpRoute {
    const NAME: &'static str = "TCPRoute";

    fn routes(snapshot: &ResourceSnapshot) -> &BTreeMap<ObjectId, Self> {
        &snapshot.tcp_routes
    }

    fn rules(&self, namespace: &str) -> Vec<Rule<'_>> {
        self.spec
            .rules
            .iter()
            .map(|rule| Rule {
                matches: Matches::Http(&[]),
                filters: NO_FILTERS,
                backends: backends(namespace, rule.backend_refs.iter().flatten()),
                timeouts: None,
            })
            .collect()
    }
}
