use crate::{config::Secret, names, Output};
use std::collections::BTreeMap;
use switchyard_controller_core::ResourceType;
use switchyard_controller_k8s_api::{gateway::SecretObjectReference, ByteString};
use switchyard_controller_k8s_index::{Kind, ObjectId, ResourceSnapshot};

/// What a referenced object is used for. Only the keys for its uses are
/// delivered.
#[derive(Debug, Default)]
struct Uses {
    certificate: bool,
    ca: bool,
    htpasswd: bool,
}

/// Adds a secret for every referenced Secret and CA ConfigMap.
pub(crate) fn translate(snapshot: &ResourceSnapshot, out: &mut Output) {
    for ((kind, id), uses) in references(snapshot) {
        let name = names::secret(&kind, &id);
        let secret = match kind {
            Kind::Secret => match snapshot.secrets.get(&id) {
                Some(secret) => from_secret(&name, secret.data.as_ref(), &uses),
                None => continue,
            },
            _ => match snapshot.config_maps.get(&id) {
                Some(cm) => cm
                    .data
                    .as_ref()
                    .and_then(|d| d.get("ca.crt"))
                    .map(|ca| Secret {
                        name: &name,
                        trusted_ca: Some(ca.as_str()),
                        ..Default::default()
                    })
                    .ok_or_else(|| "ca.crt is missing".to_string()),
                None => continue,
            },
        };
        match secret {
            Ok(secret) => out.insert(ResourceType::Secret, &name, &secret),
            Err(error) => out.fail(format!("{kind} {id}: {error}")),
        }
    }
}

fn from_secret<'s>(
    name: &'s str,
    data: Option<&'s BTreeMap<String, ByteString>>,
    uses: &Uses,
) -> Result<Secret<'s>, String> {
    let key = |key: &str| -> Result<&'s str, String> {
        let value = data
            .and_then(|d| d.get(key))
            .ok_or_else(|| format!("{key} is missing"))?;
        std::str::from_utf8(&value.0).map_err(|_| format!("{key} is not valid UTF-8"))
    };

    let mut secret = Secret {
        name,
        ..Default::default()
    };
    if uses.certificate {
        secret.certificate_chain = Some(key("tls.crt")?);
        secret.private_key = Some(key("tls.key")?);
    }
    if uses.ca {
        secret.trusted_ca = Some(key("ca.crt")?);
    }
    if uses.htpasswd {
        secret.htpasswd = Some(key(".htpasswd")?);
    }
    Ok(secret)
}

/// Collects the Secrets and ConfigMaps referenced by listeners and policies.
fn references(snapshot: &ResourceSnapshot) -> BTreeMap<(Kind, ObjectId), Uses> {
    let mut refs = BTreeMap::<(Kind, ObjectId), Uses>::new();

    for (gw_id, gw) in &snapshot.gateways {
        let certs = gw
            .spec
            .listeners
            .iter()
            .filter(|l| l.is_tls_terminated())
            .filter_map(|l| l.tls.as_ref())
            .flat_map(|tls| tls.certificate_refs.iter().flatten());
        for cert in certs {
            if let Some(key) = reference(cert, &gw_id.namespace) {
                refs.entry(key).or_default().certificate = true;
            }
        }
    }

    for (id, policy) in &snapshot.client_traffic_policies {
        let cas = policy
            .spec
            .tls
            .iter()
            .filter_map(|tls| tls.client_validation.as_ref())
            .flat_map(|v| &v.ca_certificate_refs);
        for ca in cas {
            if let Some(key) = reference(ca, &id.namespace) {
                refs.entry(key).or_default().ca = true;
            }
        }
    }

    for (id, policy) in &snapshot.security_policies {
        if let Some(auth) = &policy.spec.basic_auth {
            let users = ObjectId::new(&id.namespace, &auth.users.name);
            refs.entry((Kind::Secret, users)).or_default().htpasswd = true;
        }
    }

    refs
}

/// Resolves a reference to a Secret or ConfigMap.
pub(crate) fn reference(
    secret: &SecretObjectReference,
    namespace: &str,
) -> Option<(Kind, ObjectId)> {
    let kind = match (secret.group(), secret.kind()) {
        ("", "Secret") => Kind::Secret,
        ("", "ConfigMap") => Kind::ConfigMap,
        _ => return None,
    };
    let ns = secret.namespace.as_deref().unwrap_or(namespace);
    Some((kind, ObjectId::new(ns, secret.name.clone())))
}
