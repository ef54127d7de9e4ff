use crate::{
    config::{ClientSettings, ClientValidation, ListenerTls},
    names, policies, secrets,
};
use std::collections::BTreeMap;
use switchyard_controller_core::extension::ExtensionObject;
use switchyard_controller_k8s_api::gateway::{self, GrpcRoute, HttpRoute, Listener};
use switchyard_controller_k8s_index::{Kind, ObjectId, ObjectRef, ResourceSnapshot};

/// The hostname a listener matches when it names none.
pub(crate) const ANY_HOST: &str = "*";

/// Groups a listener's routes by the hostnames they serve on it.
///
/// A route without hostnames serves the listener's hostname. Otherwise each
/// of its hostnames that intersects the listener's is served, taking the
/// more specific of the two.
pub(crate) fn virtual_hosts<'s>(
    snapshot: &'s ResourceSnapshot,
    listener: &'s Listener,
    routes: &[(&'s ObjectRef, String)],
) -> BTreeMap<&'s str, Vec<String>> {
    let listener_host = listener.hostname.as_deref();
    let mut hosts = BTreeMap::<&str, Vec<String>>::new();
    for (route, name) in routes {
        let route_hosts = route_hostnames(snapshot, route);
        if route_hosts.is_empty() {
            let host = listener_host.unwrap_or(ANY_HOST);
            hosts.entry(host).or_default().push(name.clone());
            continue;
        }
        for host in route_hosts {
            if let Some(host) = intersect(listener_host, host) {
                let served = hosts.entry(host).or_default();
                if !served.contains(name) {
                    served.push(name.clone());
                }
            }
        }
    }
    hosts
}

fn route_hostnames<'s>(snapshot: &'s ResourceSnapshot, route: &ObjectRef) -> &'s [String] {
    let hostnames = match route.kind {
        Kind::HttpRoute => snapshot
            .http_routes
            .get(&route.id)
            .and_then(|r: &HttpRoute| r.spec.hostnames.as_deref()),
        Kind::GrpcRoute => snapshot
            .grpc_routes
            .get(&route.id)
            .and_then(|r: &GrpcRoute| r.spec.hostnames.as_deref()),
        _ => None,
    };
    hostnames.unwrap_or_default()
}

/// The hostname served when a route hostname meets a listener hostname.
fn intersect<'h>(listener: Option<&'h str>, route: &'h str) -> Option<&'h str> {
    let Some(listener) = listener else {
        return Some(route);
    };
    if listener.eq_ignore_ascii_case(route) {
        return Some(route);
    }
    match (listener.strip_prefix('*'), route.strip_prefix('*')) {
        (Some(suffix), _) if ends_with(route, suffix) => Some(route),
        (_, Some(suffix)) if ends_with(listener, suffix) => Some(listener),
        _ => None,
    }
}

fn ends_with(host: &str, suffix: &str) -> bool {
    host.len() > suffix.len()
        && host
            .get(host.len() - suffix.len()..)
            .is_some_and(|tail| tail.eq_ignore_ascii_case(suffix))
}

/// The TLS settings of a listener, naming the certificate secrets that
/// resolved. Returns `None` for listeners that do not use TLS.
pub(crate) fn tls(
    snapshot: &ResourceSnapshot,
    gateway: &ObjectId,
    listener: &Listener,
) -> Option<ListenerTls> {
    if listener.protocol != "HTTPS" && listener.protocol != "TLS" {
        return None;
    }
    if !listener.is_tls_terminated() {
        return Some(ListenerTls {
            mode: "Passthrough",
            certificates: Vec::new(),
        });
    }
    let certificates = listener
        .tls
        .iter()
        .flat_map(|tls| tls.certificate_refs.iter().flatten())
        .filter_map(|cert| secrets::reference(cert, &gateway.namespace))
        .filter(|(kind, id)| *kind == Kind::Secret && snapshot.secrets.contains_key(id))
        .map(|(kind, id)| names::secret(&kind, &id))
        .collect();
    Some(ListenerTls {
        mode: "Terminate",
        certificates,
    })
}

/// Client settings from the ClientTrafficPolicy that applies to a listener.
pub(crate) fn client<'s>(
    snapshot: &'s ResourceSnapshot,
    gateway: &ObjectId,
    listener: &Listener,
) -> Option<ClientSettings<'s>> {
    let (id, policy) =
        policies::for_listener(&snapshot.client_traffic_policies, gateway, &listener.name)?;
    let tls = policy.spec.tls.as_ref();
    let client_validation = tls
        .and_then(|tls| tls.client_validation.as_ref())
        .map(|v| ClientValidation {
            optional: v.optional,
            ca_certificates: v
                .ca_certificate_refs
                .iter()
                .filter_map(|ca| secrets::reference(ca, &id.namespace))
                .map(|(kind, id)| names::secret(&kind, &id))
                .collect(),
        });
    Some(ClientSettings {
        policy: id.to_string(),
        timeout: policy.spec.timeout.as_ref(),
        min_tls_version: tls.and_then(|tls| tls.min_version.as_deref()),
        max_tls_version: tls.and_then(|tls| tls.max_version.as_deref()),
        client_validation,
        http2: policy.spec.http2.as_ref(),
    })
}

/// Extension policies whose targets include the listener or its Gateway.
pub(crate) fn extension_policies(
    snapshot: &ResourceSnapshot,
    gateway: &ObjectId,
    listener: &str,
) -> Vec<ExtensionObject> {
    snapshot
        .extension_policies
        .values()
        .filter(|obj| obj.namespace.as_deref() == Some(gateway.namespace.as_str()))
        .filter(|obj| targets_listener(&obj.json, &gateway.name, listener))
        .cloned()
        .collect()
}

fn targets_listener(json: &[u8], gateway_name: &str, listener: &str) -> bool {
    let Ok(obj) = serde_json::from_slice::<serde_json::Value>(json) else {
        return false;
    };
    let targets = obj
        .pointer("/spec/targetRefs")
        .and_then(|t| t.as_array())
        .into_iter()
        .flatten();
    for target in targets {
        let field = |name: &str| target.get(name).and_then(|v| v.as_str());
        let is_gateway = field("group") == Some(gateway::GROUP)
            && field("kind") == Some("Gateway")
            && field("name") == Some(gateway_name);
        if is_gateway && field("sectionName").is_none_or(|s| s == listener) {
            return true;
        }
    }
    false
}
