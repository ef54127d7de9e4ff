//! Resource bodies delivered to proxies, encoded as JSON.

use serde::Serialize;
use switchyard_controller_k8s_api::{
    gateway::{GrpcRouteMatch, HttpRouteFilter, HttpRouteMatch, HttpRouteTimeouts},
    policy::{
        BackendTimeout, CircuitBreaker, ClientTimeout, Cors, Http2Settings, LoadBalancer, Retry,
    },
};

pub const VIRTUAL_HOST_TYPE_URL: &str = "type.switchyard.io/switchyard.config.v1.VirtualHost";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Listener<'a> {
    pub name: &'a str,
    pub gateway: String,
    pub port: i32,
    pub protocol: &'a str,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<&'a str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<ListenerTls>,

    /// Set on HTTP and HTTPS listeners.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub virtual_hosts: Vec<serde_json::Value>,

    /// Set on TLS and TCP listeners.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientSettings<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerTls {
    pub mode: &'static str,

    /// Secret resources holding the certificate chains.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub certificates: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSettings<'a> {
    pub policy: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<&'a ClientTimeout>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_tls_version: Option<&'a str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tls_version: Option<&'a str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_validation: Option<ClientValidation>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub http2: Option<&'a Http2Settings>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientValidation {
    pub optional: bool,

    /// Secret resources holding CA bundles.
    pub ca_certificates: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualHost<'a> {
    pub name: String,
    pub hostname: &'a str,
    pub routes: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Route<'a> {
    pub name: &'a str,
    pub kind: &'static str,

    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    pub hostnames: &'a [String],

    pub rules: Vec<Rule<'a>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_policy: Option<BackendPolicy<'a>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub security: Option<Security<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule<'a> {
    #[serde(skip_serializing_if = "Matches::is_empty")]
    pub matches: Matches<'a>,

    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    pub filters: &'a [HttpRouteFilter],

    pub backends: Vec<WeightedCluster>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeouts: Option<&'a HttpRouteTimeouts>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Matches<'a> {
    Http(&'a [HttpRouteMatch]),
    Grpc(&'a [GrpcRouteMatch]),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightedCluster {
    pub cluster: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,

    pub weight: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendPolicy<'a> {
    pub policy: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<&'a BackendTimeout>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<&'a Retry>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_balancer: Option<&'a LoadBalancer>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<&'a CircuitBreaker>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Security<'a> {
    pub policy: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cors: Option<&'a Cors>,

    /// The secret resource holding `.htpasswd`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub basic_auth: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext_auth: Option<ExtAuth<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtAuth<'a> {
    pub backends: Vec<WeightedCluster>,

    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    pub headers: &'a [String],

    pub fail_open: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster<'a> {
    pub name: &'a str,
    pub kind: &'static str,
    pub service: String,
    pub ports: Vec<ClusterPort<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPort<'a> {
    pub port: i32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<&'a str>,

    pub endpoints: Vec<Endpoint<'a>>,
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Endpoint<'a> {
    pub address: &'a str,
    pub port: i32,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Secret<'a> {
    pub name: &'a str,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_chain: Option<&'a str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key: Option<&'a str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub trusted_ca: Option<&'a str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub htpasswd: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Runtime<'a> {
    pub group: &'a str,
    pub controller: &'a str,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<&'a str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub drain_timeout: Option<&'a str>,

    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    pub extra_args: &'a [String],

    pub gateways: Vec<GatewayAddresses<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayAddresses<'a> {
    pub gateway: String,
    pub addresses: &'a [String],
}

// === impl Matches ===

impl Matches<'_> {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Http(m) => m.is_empty(),
            Self::Grpc(m) => m.is_empty(),
        }
    }
}
