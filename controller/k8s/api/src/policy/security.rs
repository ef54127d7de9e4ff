use super::{LocalPolicyTargetReference, PolicyStatus};
use crate::gateway::{BackendRef, SecretObjectReference};

/// SecurityPolicy configures authentication and cross-origin rules for the
/// targeted Gateways or routes.
#[derive(
    Clone,
    Debug,
    Default,
    PartialEq,
    kube::CustomResource,
    serde::Deserialize,
    serde::Serialize,
    schemars::JsonSchema,
)]
#[kube(
    group = "gateway.switchyard.io",
    version = "v1alpha1",
    kind = "SecurityPolicy",
    status = "PolicyStatus",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct SecurityPolicySpec {
    #[serde(default)]
    pub target_refs: Vec<LocalPolicyTargetReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cors: Option<Cors>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_auth: Option<BasicAuth>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext_auth: Option<ExtAuth>,
}

#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct Cors {
    #[serde(default)]
    pub allow_origins: Vec<String>,

    #[serde(default)]
    pub allow_methods: Vec<String>,

    #[serde(default)]
    pub allow_headers: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<String>,
}

#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct BasicAuth {
    /// A Secret in the policy's namespace holding an `.htpasswd` key.
    pub users: SecretObjectReference,
}

#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct ExtAuth {
    #[serde(default)]
    pub backend_refs: Vec<BackendRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers_to_ext_auth: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_open: Option<bool>,
}
