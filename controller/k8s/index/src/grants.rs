//! Cross-namespace reference authorization.

use crate::object::{GroupKind, ObjectId};
use std::collections::BTreeMap;
use switchyard_controller_k8s_api::{
    gateway::{ReferenceGrant, ReferenceGrantSpec},
    labels::Selector,
    Namespace,
};

/// Answers whether a reference may cross from one namespace into another.
///
/// Grants are looked up in the target namespace only. When the controller is
/// scoped by a namespace selector, grants in unselected namespaces are ignored.
#[derive(Copy, Clone, Debug)]
pub struct Grants<'a> {
    grants: &'a BTreeMap<ObjectId, ReferenceGrant>,
    namespaces: &'a BTreeMap<String, Namespace>,
    scope: Option<&'a Selector>,
}

// === impl Grants ===

impl<'a> Grants<'a> {
    pub fn new(
        grants: &'a BTreeMap<ObjectId, ReferenceGrant>,
        namespaces: &'a BTreeMap<String, Namespace>,
        scope: Option<&'a Selector>,
    ) -> Self {
        Self {
            grants,
            namespaces,
            scope,
        }
    }

    pub fn is_granted(
        &self,
        from: GroupKind<'_>,
        from_namespace: &str,
        to: GroupKind<'_>,
        to_namespace: &str,
        to_name: &str,
    ) -> bool {
        if from_namespace == to_namespace {
            return true;
        }
        if !self.in_scope(to_namespace) {
            return false;
        }

        self.grants
            .range(ObjectId::new(to_namespace, "")..)
            .take_while(|(id, _)| id.namespace == to_namespace)
            .any(|(_, grant)| permits(&grant.spec, from, from_namespace, to, to_name))
    }

    fn in_scope(&self, namespace: &str) -> bool {
        let Some(selector) = self.scope else {
            return true;
        };
        self.namespaces
            .get(namespace)
            .and_then(|ns| ns.metadata.labels.as_ref())
            .is_some_and(|labels| selector.matches(labels))
    }
}

fn permits(
    spec: &ReferenceGrantSpec,
    from: GroupKind<'_>,
    from_namespace: &str,
    to: GroupKind<'_>,
    to_name: &str,
) -> bool {
    let to_matches = spec.to.iter().any(|t| {
        t.group == to.group
            && t.kind == to.kind
            && t.name.as_deref().is_none_or(|name| name == to_name)
    });
    to_matches
        && spec.from.iter().any(|f| {
            f.group == from.group && f.kind == from.kind && f.namespace == from_namespace
        })
}
