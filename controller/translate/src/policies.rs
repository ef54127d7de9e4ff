//! Selects the policies that apply to listeners and routes.

use std::collections::BTreeMap;
use switchyard_controller_k8s_api::{
    gateway,
    policy::{BackendTrafficPolicy, ClientTrafficPolicy, LocalPolicyTargetReference, SecurityPolicy},
};
use switchyard_controller_k8s_index::{ListenerRef, ObjectId, ObjectRef};

pub(crate) trait Targets {
    fn target_refs(&self) -> &[LocalPolicyTargetReference];
}

impl Targets for BackendTrafficPolicy {
    fn target_refs(&self) -> &[LocalPolicyTargetReference] {
        &self.spec.target_refs
    }
}

impl Targets for ClientTrafficPolicy {
    fn target_refs(&self) -> &[LocalPolicyTargetReference] {
        &self.spec.target_refs
    }
}

impl Targets for SecurityPolicy {
    fn target_refs(&self) -> &[LocalPolicyTargetReference] {
        &self.spec.target_refs
    }
}

/// The policy for a listener. A policy naming the listener's section wins
/// over one targeting the whole Gateway; ties go to the first policy by
/// namespace and name.
pub(crate) fn for_listener<'p, P: Targets>(
    policies: &'p BTreeMap<ObjectId, P>,
    gw: &ObjectId,
    listener: &str,
) -> Option<(&'p ObjectId, &'p P)> {
    let mut whole = None;
    for (id, policy) in policies.iter().filter(|(id, _)| id.namespace == gw.namespace) {
        for target in policy.target_refs().iter().filter(|t| is_gateway(t, gw)) {
            match target.section_name.as_deref() {
                Some(section) if section == listener => return Some((id, policy)),
                Some(_) => {}
                None => {
                    whole.get_or_insert((id, policy));
                }
            }
        }
    }
    whole
}

/// The policy for a route. A policy targeting the route itself wins over one
/// targeting a Gateway listener it attached to.
pub(crate) fn for_route<'p, P: Targets>(
    policies: &'p BTreeMap<ObjectId, P>,
    route: &ObjectRef,
    attachments: &[ListenerRef],
) -> Option<(&'p ObjectId, &'p P)> {
    let kind = route.kind.group_kind().kind;
    let direct = policies
        .iter()
        .filter(|(id, _)| id.namespace == route.id.namespace)
        .find(|(_, policy)| {
            policy.target_refs().iter().any(|t| {
                t.group == gateway::GROUP && t.kind == kind && t.name == route.id.name
            })
        });
    if direct.is_some() {
        return direct;
    }
    attachments
        .iter()
        .find_map(|l| for_listener(policies, &l.gateway, &l.listener))
}

fn is_gateway(target: &LocalPolicyTargetReference, gw: &ObjectId) -> bool {
    target.group == gateway::GROUP && target.kind == "Gateway" && target.name == gw.name
}
