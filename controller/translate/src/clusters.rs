use crate::{
    config::{Cluster, ClusterPort, Endpoint},
    names, Output,
};
use std::collections::BTreeSet;
use switchyard_controller_core::ResourceType;
use switchyard_controller_k8s_api::{
    labels, multicluster::ServiceImport, EndpointSlice, ResourceExt, Service,
};
use switchyard_controller_k8s_index::{Kind, ObjectId, ResourceSnapshot};

/// Adds a cluster for every backend in the snapshot.
pub(crate) fn translate(snapshot: &ResourceSnapshot, out: &mut Output) {
    for (id, svc) in &snapshot.services {
        let name = names::cluster(&Kind::Service, id);
        let cluster = Cluster {
            name: &name,
            kind: "Service",
            service: id.to_string(),
            ports: service_ports(snapshot, id, svc),
        };
        out.insert(ResourceType::Cluster, &name, &cluster);
    }

    for (id, import) in &snapshot.service_imports {
        let name = names::cluster(&Kind::ServiceImport, id);
        let cluster = Cluster {
            name: &name,
            kind: "ServiceImport",
            service: id.to_string(),
            ports: import_ports(import),
        };
        out.insert(ResourceType::Cluster, &name, &cluster);
    }
}

/// A Service's ports with the ready endpoints behind each. Slice ports are
/// matched to Service ports by name.
fn service_ports<'s>(
    snapshot: &'s ResourceSnapshot,
    id: &ObjectId,
    svc: &'s Service,
) -> Vec<ClusterPort<'s>> {
    let slices = snapshot
        .endpoint_slices
        .iter()
        .filter(|(sid, slice)| {
            sid.namespace == id.namespace
                && slice.labels().get(labels::SERVICE_NAME) == Some(&id.name)
        })
        .map(|(_, slice)| slice)
        .collect::<Vec<_>>();

    svc.spec
        .iter()
        .flat_map(|spec| spec.ports.iter().flatten())
        .map(|port| {
            let name = port.name.as_deref().unwrap_or_default();
            let endpoints = slices
                .iter()
                .flat_map(|slice| ready_endpoints(slice, name))
                .collect::<BTreeSet<_>>();
            ClusterPort {
                port: port.port,
                name: port.name.as_deref(),
                endpoints: endpoints.into_iter().collect(),
            }
        })
        .collect()
}

fn ready_endpoints<'s>(slice: &'s EndpointSlice, port_name: &str) -> Vec<Endpoint<'s>> {
    let port = slice
        .ports
        .iter()
        .flatten()
        .find(|p| p.name.as_deref().unwrap_or_default() == port_name)
        .and_then(|p| p.port);
    let Some(port) = port else {
        return Vec::new();
    };
    slice
        .endpoints
        .iter()
        // Endpoints with unknown readiness are treated as ready.
        .filter(|ep| ep.conditions.as_ref().and_then(|c| c.ready) != Some(false))
        .flat_map(|ep| &ep.addresses)
        .map(|address| Endpoint { address, port })
        .collect()
}

fn import_ports(import: &ServiceImport) -> Vec<ClusterPort<'_>> {
    let ips = import.spec.ips.as_deref().unwrap_or_default();
    import
        .spec
        .ports
        .iter()
        .map(|port| ClusterPort {
            port: port.port,
            name: port.name.as_deref(),
            endpoints: ips
                .iter()
                .map(|address| Endpoint {
                    address,
                    port: port.port,
                })
                .collect(),
        })
        .collect()
}
