use super::{routes::Unresolved, Pass};
use crate::{
    index::{extension_targets, Objects},
    object::{Kind, ObjectId, ObjectRef},
    snapshot::ResourceSnapshot,
    status::{condition, ParentStatus, StatusKind},
};
use std::collections::{BTreeMap, BTreeSet};
use switchyard_controller_core::extension::ExtensionObject;
use switchyard_controller_k8s_api::{
    gateway::{self, ParentReference, SecretObjectReference},
    policy::{
        BackendTrafficPolicy, ClientTrafficPolicy, LocalPolicyTargetReference, SecurityPolicy,
    },
    Resource,
};

/// Access to a policy kind's targets and maps.
trait Policy: Resource<DynamicType = ()> + Clone {
    const KIND: Kind;
    const STATUS: StatusKind;

    fn target_refs(&self) -> &[LocalPolicyTargetReference];
    fn cached(objects: &Objects) -> &BTreeMap<ObjectId, Self>;
    fn snapshot(snapshot: &mut ResourceSnapshot) -> &mut BTreeMap<ObjectId, Self>;

    /// Resolves the policy's references other than its targets, adding them
    /// to the snapshot.
    fn resolve(&self, _pass: &mut Pass<'_>, _namespace: &str) -> Result<(), String> {
        Ok(())
    }
}

impl Pass<'_> {
    pub(super) fn policies(&mut self) {
        self.policies_of::<BackendTrafficPolicy>();
        self.policies_of::<ClientTrafficPolicy>();
        self.policies_of::<SecurityPolicy>();
    }

    /// Includes extension policies that target objects in the group.
    pub(super) fn extension_policies(&mut self) {
        let index = self.index;
        for kind in &index.config().extension_policy_kinds {
            let objs = index.objects().extensions.get(kind).into_iter().flatten();
            for (id, obj) in objs {
                let ancestors = self.ancestors(&id.namespace, &extension_targets(obj));
                if ancestors.is_empty() {
                    continue;
                }
                let oref = ObjectRef {
                    kind: Kind::Extension(kind.clone()),
                    id: id.clone(),
                };
                self.out.members.insert(oref.clone());
                match serde_json::to_vec(obj) {
                    Ok(json) => {
                        self.snapshot.extension_policies.insert(
                            oref,
                            ExtensionObject {
                                kind: kind.clone(),
                                namespace: Some(id.namespace.clone()),
                                name: id.name.clone(),
                                json,
                            },
                        );
                    }
                    Err(error) => {
                        tracing::warn!(%error, object = %oref, "Failed to encode extension policy");
                    }
                }
            }
        }
    }

    fn policies_of<P: Policy>(&mut self) {
        let index = self.index;
        for (id, policy) in P::cached(index.objects()) {
            let ancestors = self.ancestors(&id.namespace, policy.target_refs());
            if ancestors.is_empty() {
                continue;
            }
            self.out.touch(P::KIND, id);

            let generation = policy.meta().generation;
            let accepted = match policy.resolve(self, &id.namespace) {
                Ok(()) => {
                    P::snapshot(&mut self.snapshot).insert(id.clone(), policy.clone());
                    condition(
                        "Accepted",
                        true,
                        "Accepted",
                        "Policy has been accepted",
                        generation,
                    )
                }
                Err(message) => {
                    tracing::info!(kind = %P::KIND, policy = %id, %message, "Policy is invalid");
                    condition("Accepted", false, "Invalid", message, generation)
                }
            };

            let parents = ancestors
                .into_iter()
                .map(|parent_ref| ParentStatus {
                    parent_ref,
                    conditions: vec![accepted.clone()],
                })
                .collect();
            self.out.derive_parents(P::STATUS, id.clone(), parents);
        }
    }

    /// The Gateways in the group that a policy's local targets resolve to.
    fn ancestors(
        &self,
        namespace: &str,
        targets: &[LocalPolicyTargetReference],
    ) -> BTreeSet<ParentReference> {
        let mut ancestors = BTreeSet::new();
        for target in targets {
            if target.group == gateway::GROUP && target.kind == "Gateway" {
                let id = ObjectId::new(namespace, target.name.clone());
                let Some(gw) = self.snapshot.gateways.get(&id) else {
                    continue;
                };
                if let Some(section) = &target.section_name {
                    if !gw.spec.listeners.iter().any(|l| l.name == *section) {
                        continue;
                    }
                }
                ancestors.insert(gateway_ref(
                    namespace,
                    &target.name,
                    target.section_name.clone(),
                ));
                continue;
            }

            let Some(kind) = Kind::route(&target.group, &target.kind) else {
                continue;
            };
            let route = ObjectRef::new(kind, namespace, target.name.clone());
            for parent in self.route_parents.get(&route).into_iter().flatten() {
                let ns = parent.namespace.as_deref().unwrap_or(namespace);
                ancestors.insert(gateway_ref(ns, &parent.name, parent.section_name.clone()));
            }
        }
        ancestors
    }

    /// Resolves a CA bundle held by a ConfigMap or Secret.
    fn ca_certificate(
        &mut self,
        from: Kind,
        namespace: &str,
        cert: &SecretObjectReference,
    ) -> Result<(), String> {
        let index = self.index;
        let kind = match (cert.group(), cert.kind()) {
            ("", "Secret") => Kind::Secret,
            ("", "ConfigMap") => Kind::ConfigMap,
            (group, kind) => return Err(format!("Unsupported CA certificate kind {group}/{kind}")),
        };
        let ns = cert.namespace.as_deref().unwrap_or(namespace);
        let granted = index.grants().is_granted(
            from.group_kind(),
            namespace,
            kind.group_kind(),
            ns,
            &cert.name,
        );
        if !granted {
            return Err(format!(
                "CA certificate ref to {kind} {ns}/{} is not permitted",
                cert.name
            ));
        }

        let id = ObjectId::new(ns, cert.name.clone());
        self.out.touch(kind.clone(), &id);
        let objects = index.objects();
        let found = match kind {
            Kind::Secret => {
                let secret = objects.secrets.get(&id);
                match secret.filter(|s| s.data.as_ref().is_some_and(|d| d.contains_key("ca.crt"))) {
                    Some(secret) => {
                        self.snapshot.secrets.insert(id.clone(), secret.clone());
                        true
                    }
                    None => false,
                }
            }
            _ => {
                let cm = objects.config_maps.get(&id);
                match cm.filter(|cm| cm.data.as_ref().is_some_and(|d| d.contains_key("ca.crt"))) {
                    Some(cm) => {
                        self.snapshot.config_maps.insert(id.clone(), cm.clone());
                        true
                    }
                    None => false,
                }
            }
        };
        if !found {
            return Err(format!("{kind} {id} does not exist or does not hold ca.crt"));
        }
        Ok(())
    }

    fn basic_auth_users(
        &mut self,
        namespace: &str,
        users: &SecretObjectReference,
    ) -> Result<(), String> {
        let index = self.index;
        if users.group() != "" || users.kind() != "Secret" {
            return Err(format!("Unsupported basic auth users kind {}", users.kind()));
        }
        if users.namespace.as_deref().is_some_and(|ns| ns != namespace) {
            return Err("Basic auth users must be in the policy's namespace".to_string());
        }

        let id = ObjectId::new(namespace, users.name.clone());
        self.out.touch(Kind::Secret, &id);
        let secret = index
            .objects()
            .secrets
            .get(&id)
            .filter(|s| s.data.as_ref().is_some_and(|d| d.contains_key(".htpasswd")));
        match secret {
            Some(secret) => {
                self.snapshot.secrets.insert(id, secret.clone());
                Ok(())
            }
            None => Err(format!("Secret {id} does not exist or does not hold .htpasswd")),
        }
    }
}

fn gateway_ref(namespace: &str, name: &str, section_name: Option<String>) -> ParentReference {
    ParentReference {
        group: Some(gateway::GROUP.to_string()),
        kind: Some("Gateway".to_string()),
        namespace: Some(namespace.to_string()),
        name: name.to_string(),
        section_name,
        port: None,
    }
}

// === impl Policy ===

impl Policy for BackendTrafficPolicy {
    const KIND: Kind = Kind::BackendTrafficPolicy;
    const STATUS: StatusKind = StatusKind::BackendTrafficPolicy;

    fn target_refs(&self) -> &[LocalPolicyTargetReference] {
        &self.spec.target_refs
    }

    fn cached(objects: &Objects) -> &BTreeMap<ObjectId, Self> {
        &objects.backend_traffic_policies
    }

    fn snapshot(snapshot: &mut ResourceSnapshot) -> &mut BTreeMap<ObjectId, Self> {
        &mut snapshot.backend_traffic_policies
    }
}

impl Policy for ClientTrafficPolicy {
    const KIND: Kind = Kind::ClientTrafficPolicy;
    const STATUS: StatusKind = StatusKind::ClientTrafficPolicy;

    fn target_refs(&self) -> &[LocalPolicyTargetReference] {
        &self.spec.target_refs
    }

    fn cached(objects: &Objects) -> &BTreeMap<ObjectId, Self> {
        &objects.client_traffic_policies
    }

    fn snapshot(snapshot: &mut ResourceSnapshot) -> &mut BTreeMap<ObjectId, Self> {
        &mut snapshot.client_traffic_policies
    }

    fn resolve(&self, pass: &mut Pass<'_>, namespace: &str) -> Result<(), String> {
        let refs = self
            .spec
            .tls
            .iter()
            .filter_map(|tls| tls.client_validation.as_ref())
            .flat_map(|v| &v.ca_certificate_refs);
        for cert in refs {
            pass.ca_certificate(Self::KIND, namespace, cert)?;
        }
        Ok(())
    }
}

impl Policy for SecurityPolicy {
    const KIND: Kind = Kind::SecurityPolicy;
    const STATUS: StatusKind = StatusKind::SecurityPolicy;

    fn target_refs(&self) -> &[LocalPolicyTargetReference] {
        &self.spec.target_refs
    }

    fn cached(objects: &Objects) -> &BTreeMap<ObjectId, Self> {
        &objects.security_policies
    }

    fn snapshot(snapshot: &mut ResourceSnapshot) -> &mut BTreeMap<ObjectId, Self> {
        &mut snapshot.security_policies
    }

    fn resolve(&self, pass: &mut Pass<'_>, namespace: &str) -> Result<(), String> {
        if let Some(auth) = &self.spec.basic_auth {
            pass.basic_auth_users(namespace, &auth.users)?;
        }
        for backend in self.spec.ext_auth.iter().flat_map(|a| &a.backend_refs) {
            let backend = pass
                .backend(Self::KIND, namespace, backend)
                .map_err(|Unresolved { message, .. }| message)?;
            pass.add_backend(&backend);
        }
        Ok(())
    }
}
