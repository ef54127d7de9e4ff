use super::Pass;
use crate::{
    object::{GroupKind, Kind, ObjectId},
    status::{condition, DerivedStatus, StatusKind},
};
use std::net::IpAddr;
use switchyard_controller_k8s_api::{
    gateway::{
        self, Gateway, GatewayAddress, GatewayStatus, Listener, ListenerStatus, RouteGroupKind,
        SecretObjectReference,
    },
    labels, Condition, ObjectMeta,
};

const SUPPORTED_PROTOCOLS: [&str; 4] = ["HTTP", "HTTPS", "TLS", "TCP"];

/// A listener's validation state, accumulated as routes attach.
#[derive(Clone, Debug)]
pub(super) struct ListenerState {
    pub(super) listener: Listener,
    pub(super) supported_kinds: Vec<RouteGroupKind>,
    pub(super) attached_routes: i32,

    /// Set when the listener cannot be accepted.
    invalid: Option<(&'static str, String)>,

    /// Set when a reference held by the listener does not resolve.
    unresolved: Option<(&'static str, String)>,

    generation: Option<i64>,
}

/// The conditions that keep a Gateway from being programmed.
struct Readiness {
    addresses: Vec<String>,
    available: bool,
}

impl Pass<'_> {
    /// Adds the class's Gateways to the snapshot and validates their
    /// listeners.
    pub(super) fn gateways(&mut self) {
        let index = self.index;
        let class = self.snapshot.group.clone();
        let gateways = index
            .objects()
            .gateways
            .iter()
            .filter(|(_, gw)| gw.spec.gateway_class_name == class);
        for (id, gw) in gateways {
            if gw.metadata.deletion_timestamp.is_some() {
                tracing::debug!(gateway = %id, "Skipping deleted Gateway");
                continue;
            }
            self.out.touch(Kind::Gateway, id);

            let listeners = gw
                .spec
                .listeners
                .iter()
                .map(|l| self.listener(id, gw, l))
                .collect();
            self.listeners.insert(id.clone(), listeners);

            let readiness = self.readiness(id, gw);
            self.snapshot
                .addresses
                .insert(id.clone(), readiness.addresses.clone());
            self.snapshot.gateways.insert(id.clone(), gw.clone());
            self.available.insert(id.clone(), readiness.available);
        }
    }

    /// Derives Gateway status once routes have attached.
    pub(super) fn gateway_statuses(&mut self) {
        for (id, gw) in &self.snapshot.gateways {
            let generation = gw.metadata.generation;
            let addresses = self.snapshot.addresses.get(id).cloned().unwrap_or_default();
            let available = self.available.get(id).copied().unwrap_or(false);

            let programmed = if addresses.is_empty() {
                condition(
                    "Programmed",
                    false,
                    "AddressNotAssigned",
                    "No addresses have been assigned to the Gateway",
                    generation,
                )
            } else if !available {
                condition(
                    "Programmed",
                    false,
                    "NoResources",
                    "Deployment replicas unavailable",
                    generation,
                )
            } else {
                condition(
                    "Programmed",
                    true,
                    "Programmed",
                    "Address assigned to the Gateway",
                    generation,
                )
            };

            let listeners = self
                .listeners
                .get(id)
                .into_iter()
                .flatten()
                .map(ListenerState::status)
                .collect();

            let status = GatewayStatus {
                addresses: Some(addresses.into_iter().map(gateway_address).collect()),
                conditions: Some(vec![
                    condition(
                        "Accepted",
                        true,
                        "Accepted",
                        "The Gateway has been scheduled",
                        generation,
                    ),
                    programmed,
                ]),
                listeners: Some(listeners),
            };
            self.out
                .derive(StatusKind::Gateway, id.clone(), DerivedStatus::Gateway(status));
        }
    }

    fn listener(&mut self, id: &ObjectId, gw: &Gateway, listener: &Listener) -> ListenerState {
        let mut state = ListenerState {
            listener: listener.clone(),
            supported_kinds: Vec::new(),
            attached_routes: 0,
            invalid: None,
            unresolved: None,
            generation: gw.metadata.generation,
        };

        if !SUPPORTED_PROTOCOLS.contains(&listener.protocol.as_str()) {
            state.invalid = Some((
                "UnsupportedProtocol",
                format!("Protocol {} is not supported", listener.protocol),
            ));
            return state;
        }

        let defaults = listener.default_route_kinds();
        match listener.allowed_routes.as_ref().and_then(|a| a.kinds.as_ref()) {
            Some(kinds) => {
                for k in kinds {
                    let group = k.group.as_deref().unwrap_or(gateway::GROUP);
                    if group == gateway::GROUP && defaults.contains(&k.kind.as_str()) {
                        state.supported_kinds.push(RouteGroupKind {
                            group: Some(gateway::GROUP.to_string()),
                            kind: k.kind.clone(),
                        });
                    } else if state.unresolved.is_none() {
                        state.unresolved = Some((
                            "InvalidRouteKinds",
                            format!("{group}/{} is not supported by {}", k.kind, listener.protocol),
                        ));
                    }
                }
            }
            None => {
                state.supported_kinds = defaults
                    .iter()
                    .map(|kind| RouteGroupKind {
                        group: Some(gateway::GROUP.to_string()),
                        kind: kind.to_string(),
                    })
                    .collect();
            }
        }

        if listener.is_tls_terminated() {
            let refs = listener
                .tls
                .as_ref()
                .and_then(|tls| tls.certificate_refs.as_deref())
                .unwrap_or_default();
            if refs.is_empty() {
                state.unresolved = Some((
                    "InvalidCertificateRef",
                    "Listener must have at least one TLS certificate ref".to_string(),
                ));
            }
            for cert in refs {
                if let Err(failure) = self.certificate(&id.namespace, cert) {
                    if state.unresolved.is_none() {
                        state.unresolved = Some(failure);
                    }
                }
            }
        }

        state
    }

    /// Resolves a listener certificate into the snapshot.
    fn certificate(
        &mut self,
        gw_ns: &str,
        cert: &SecretObjectReference,
    ) -> Result<(), (&'static str, String)> {
        if cert.group() != "" || cert.kind() != "Secret" {
            return Err((
                "InvalidCertificateRef",
                format!("Unsupported certificate ref kind {}", cert.kind()),
            ));
        }

        let index = self.index;
        let ns = cert.namespace.as_deref().unwrap_or(gw_ns);
        let granted = index.grants().is_granted(
            Kind::Gateway.group_kind(),
            gw_ns,
            Kind::Secret.group_kind(),
            ns,
            &cert.name,
        );
        if !granted {
            return Err((
                "RefNotPermitted",
                format!("Certificate ref to Secret {ns}/{} is not permitted", cert.name),
            ));
        }

        let id = ObjectId::new(ns, cert.name.clone());
        self.out.touch(Kind::Secret, &id);
        let secret = index.objects().secrets.get(&id).filter(|s| {
            s.data
                .as_ref()
                .is_some_and(|d| d.contains_key("tls.crt") && d.contains_key("tls.key"))
        });
        match secret {
            Some(secret) => {
                self.snapshot.secrets.insert(id, secret.clone());
                Ok(())
            }
            None => Err((
                "InvalidCertificateRef",
                format!("Secret {id} does not exist or does not hold a TLS keypair"),
            )),
        }
    }

    fn readiness(&mut self, id: &ObjectId, gw: &Gateway) -> Readiness {
        let index = self.index;
        let objects = index.objects();
        let nodes = index.nodes().addresses();
        let mut addresses = gw
            .spec
            .addresses
            .iter()
            .flatten()
            .map(|a| a.value.clone())
            .collect::<Vec<_>>();

        for (svc_id, svc) in &objects.services {
            if !is_owned_by(&svc.metadata, id) {
                continue;
            }
            self.out.touch(Kind::Service, svc_id);
            addresses.extend(service_addresses(svc, &nodes));
        }
        addresses.dedup();

        let mut available = false;
        for (deploy_id, deploy) in &objects.deployments {
            if !is_owned_by(&deploy.metadata, id) {
                continue;
            }
            self.out.touch(Kind::Deployment, deploy_id);
            available |= deploy
                .status
                .as_ref()
                .and_then(|s| s.available_replicas)
                .is_some_and(|n| n > 0);
        }

        Readiness {
            addresses,
            available,
        }
    }
}

// === impl ListenerState ===

impl ListenerState {
    pub(super) fn is_accepted(&self) -> bool {
        self.invalid.is_none()
    }

    pub(super) fn admits(&self, kind: &Kind) -> bool {
        let GroupKind { group, kind } = kind.group_kind();
        self.supported_kinds
            .iter()
            .any(|k| k.group.as_deref() == Some(group) && k.kind == kind)
    }

    fn status(&self) -> ListenerStatus {
        let generation = self.generation;
        let accepted = match &self.invalid {
            Some((reason, message)) => condition("Accepted", false, reason, message.clone(), generation),
            None => condition("Accepted", true, "Accepted", "Listener is valid", generation),
        };
        let resolved = match &self.unresolved {
            Some((reason, message)) => {
                condition("ResolvedRefs", false, reason, message.clone(), generation)
            }
            None => condition(
                "ResolvedRefs",
                true,
                "ResolvedRefs",
                "All references resolved",
                generation,
            ),
        };
        let programmed = if self.invalid.is_none() && self.unresolved.is_none() {
            condition("Programmed", true, "Programmed", "Listener is programmed", generation)
        } else {
            condition("Programmed", false, "Invalid", "Listener is invalid", generation)
        };

        let conditions: Vec<Condition> = vec![accepted, resolved, programmed];
        ListenerStatus {
            name: self.listener.name.clone(),
            supported_kinds: self.supported_kinds.clone(),
            attached_routes: self.attached_routes,
            conditions,
        }
    }
}

fn is_owned_by(meta: &ObjectMeta, gw: &ObjectId) -> bool {
    let Some(labels) = meta.labels.as_ref() else {
        return false;
    };
    labels.get(labels::OWNING_GATEWAY_NAME) == Some(&gw.name)
        && labels.get(labels::OWNING_GATEWAY_NAMESPACE) == Some(&gw.namespace)
}

fn service_addresses(
    svc: &switchyard_controller_k8s_api::Service,
    nodes: &[String],
) -> Vec<String> {
    let ingress = svc
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .into_iter()
        .flatten()
        .filter_map(|i| i.ip.clone().or_else(|| i.hostname.clone()))
        .collect::<Vec<_>>();
    if !ingress.is_empty() {
        return ingress;
    }

    let Some(spec) = svc.spec.as_ref() else {
        return Vec::new();
    };
    match spec.type_.as_deref() {
        Some("LoadBalancer") => Vec::new(),
        Some("NodePort") => nodes.to_vec(),
        _ => spec
            .cluster_ips
            .clone()
            .or_else(|| spec.cluster_ip.clone().map(|ip| vec![ip]))
            .unwrap_or_default()
            .into_iter()
            .filter(|ip| !ip.is_empty() && ip != "None")
            .collect(),
    }
}

fn gateway_address(value: String) -> GatewayAddress {
    let type_ = if value.parse::<IpAddr>().is_ok() {
        "IPAddress"
    } else {
        "Hostname"
    };
    GatewayAddress {
        type_: Some(type_.to_string()),
        value,
    }
}
