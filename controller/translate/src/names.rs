//! Resource names. Every name is unique within its resource type in a
//! bundle.

use switchyard_controller_k8s_index::{Kind, ObjectId, ObjectRef};

pub fn listener(gateway: &ObjectId, listener: &str) -> String {
    format!("{}/{}/{listener}", gateway.namespace, gateway.name)
}

pub fn virtual_host(listener: &str, hostname: &str) -> String {
    format!("{listener}/{hostname}")
}

pub fn route(route: &ObjectRef) -> String {
    qualified(&route.kind, &route.id)
}

pub fn cluster(kind: &Kind, backend: &ObjectId) -> String {
    qualified(kind, backend)
}

/// Names the resource for a Secret or ConfigMap.
pub fn secret(kind: &Kind, id: &ObjectId) -> String {
    qualified(kind, id)
}

fn qualified(kind: &Kind, id: &ObjectId) -> String {
    format!(
        "{}/{}/{}",
        kind.group_kind().kind.to_ascii_lowercase(),
        id.namespace,
        id.name
    )
}
