use super::Outcome;
use crate::{
    index::Index,
    object::{Kind, ObjectId},
    snapshot::ResourceSnapshot,
    status::{condition, DerivedStatus, StatusKind},
};
use chrono::{DateTime, Utc};
use switchyard_controller_k8s_api::{
    gateway::GatewayClass,
    policy::{self, ProxyConfig},
    ResourceExt,
};

const OLDER_CLASS_EXISTS: &str =
    "Invalid GatewayClass: another older GatewayClass with the same Spec.Controller exists";

/// Selects the controller's accepted class, derives status for every class it
/// controls, and starts the group's snapshot.
///
/// Returns `None` when no class can be accepted or when the accepted class's
/// parameters are invalid.
pub(super) fn accept(
    index: &Index,
    controller: &str,
    out: &mut Outcome,
) -> Option<ResourceSnapshot> {
    let objects = index.objects();
    let mut candidates = objects
        .classes
        .iter()
        .filter(|(_, c)| c.spec.controller_name == controller)
        // A deleted class without finalizers is about to disappear.
        .filter(|(_, c)| c.metadata.deletion_timestamp.is_none() || !c.finalizers().is_empty())
        .collect::<Vec<_>>();
    candidates.sort_by_key(|(id, c)| (created_at(c), id.name.clone()));

    let mut candidates = candidates.into_iter();
    let (id, class) = candidates.next()?;

    for (id, other) in candidates {
        tracing::debug!(class = %id, %controller, "GatewayClass not accepted");
        out.touch(Kind::GatewayClass, id);
        out.derive(
            StatusKind::GatewayClass,
            id.clone(),
            DerivedStatus::GatewayClass(vec![condition(
                "Accepted",
                false,
                "OlderGatewayClassExists",
                OLDER_CLASS_EXISTS,
                other.metadata.generation,
            )]),
        );
    }

    out.touch(Kind::GatewayClass, id);
    let in_use = objects
        .gateways
        .values()
        .any(|gw| gw.spec.gateway_class_name == id.name);
    out.finalizer = Some((id.name.clone(), in_use));

    let generation = class.metadata.generation;
    let proxy_config = match parameters(index, class, out) {
        Ok(pc) => pc,
        Err(message) => {
            tracing::info!(class = %id, %message, "GatewayClass has invalid parameters");
            out.derive(
                StatusKind::GatewayClass,
                id.clone(),
                DerivedStatus::GatewayClass(vec![condition(
                    "Accepted",
                    false,
                    "InvalidParameters",
                    message,
                    generation,
                )]),
            );
            return None;
        }
    };

    out.derive(
        StatusKind::GatewayClass,
        id.clone(),
        DerivedStatus::GatewayClass(vec![condition(
            "Accepted",
            true,
            "Accepted",
            "Valid GatewayClass",
            generation,
        )]),
    );

    let mut snapshot = ResourceSnapshot::new(id.name.clone(), controller.to_string(), class.clone());
    snapshot.proxy_config = proxy_config;
    Some(snapshot)
}

fn created_at(class: &GatewayClass) -> DateTime<Utc> {
    class
        .metadata
        .creation_timestamp
        .as_ref()
        .map(|t| t.0)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Resolves the class's `parametersRef`, if it has one.
fn parameters(
    index: &Index,
    class: &GatewayClass,
    out: &mut Outcome,
) -> Result<Option<ProxyConfig>, String> {
    let Some(params) = class.spec.parameters_ref.as_ref() else {
        return Ok(None);
    };
    if params.group != policy::GROUP || params.kind != "ProxyConfig" {
        return Err(format!(
            "Unsupported parametersRef kind {}/{}",
            params.group, params.kind
        ));
    }
    let Some(ns) = params.namespace.as_deref() else {
        return Err("parametersRef must set a namespace".to_string());
    };

    let id = ObjectId::new(ns, params.name.clone());
    out.touch(Kind::ProxyConfig, &id);
    match index.objects().proxy_configs.get(&id) {
        Some(pc) => Ok(Some(pc.clone())),
        None => Err(format!("ProxyConfig {id} not found")),
    }
}
