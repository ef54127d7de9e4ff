use std::fmt;
use switchyard_controller_core::extension::ExtensionKind;
use switchyard_controller_k8s_api::{gateway, multicluster, policy, ResourceExt};

/// The kinds of objects held by the index.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    GatewayClass,
    Gateway,
    HttpRoute,
    GrpcRoute,
    TlsRoute,
    TcpRoute,
    ReferenceGrant,
    BackendTrafficPolicy,
    ClientTrafficPolicy,
    SecurityPolicy,
    ProxyConfig,
    Namespace,
    Node,
    Service,
    ServiceImport,
    EndpointSlice,
    Secret,
    ConfigMap,
    Deployment,
    Extension(ExtensionKind),
}

/// A group and kind, as they appear in object references.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GroupKind<'a> {
    pub group: &'a str,
    pub kind: &'a str,
}

/// Identifies an object by namespace and name. Cluster-scoped objects have an
/// empty namespace.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId {
    pub namespace: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    pub kind: Kind,
    pub id: ObjectId,
}

// === impl Kind ===

impl Kind {
    pub const ROUTES: [Self; 4] = [Self::HttpRoute, Self::GrpcRoute, Self::TlsRoute, Self::TcpRoute];

    /// Every kind watched regardless of configuration.
    pub const BUILTIN: [Self; 19] = [
        Self::GatewayClass,
        Self::Gateway,
        Self::HttpRoute,
        Self::GrpcRoute,
        Self::TlsRoute,
        Self::TcpRoute,
        Self::ReferenceGrant,
        Self::BackendTrafficPolicy,
        Self::ClientTrafficPolicy,
        Self::SecurityPolicy,
        Self::ProxyConfig,
        Self::Namespace,
        Self::Node,
        Self::Service,
        Self::ServiceImport,
        Self::EndpointSlice,
        Self::Secret,
        Self::ConfigMap,
        Self::Deployment,
    ];

    pub fn group_kind(&self) -> GroupKind<'_> {
        let (group, kind) = match self {
            Self::GatewayClass => (gateway::GROUP, "GatewayClass"),
            Self::Gateway => (gateway::GROUP, "Gateway"),
            Self::HttpRoute => (gateway::GROUP, "HTTPRoute"),
            Self::GrpcRoute => (gateway::GROUP, "GRPCRoute"),
            Self::TlsRoute => (gateway::GROUP, "TLSRoute"),
            Self::TcpRoute => (gateway::GROUP, "TCPRoute"),
            Self::ReferenceGrant => (gateway::GROUP, "ReferenceGrant"),
            Self::BackendTrafficPolicy => (policy::GROUP, "BackendTrafficPolicy"),
            Self::ClientTrafficPolicy => (policy::GROUP, "ClientTrafficPolicy"),
            Self::SecurityPolicy => (policy::GROUP, "SecurityPolicy"),
            Self::ProxyConfig => (policy::GROUP, "ProxyConfig"),
            Self::Namespace => ("", "Namespace"),
            Self::Node => ("", "Node"),
            Self::Service => ("", "Service"),
            Self::ServiceImport => (multicluster::GROUP, "ServiceImport"),
            Self::EndpointSlice => ("discovery.k8s.io", "EndpointSlice"),
            Self::Secret => ("", "Secret"),
            Self::ConfigMap => ("", "ConfigMap"),
            Self::Deployment => ("apps", "Deployment"),
            Self::Extension(ext) => (ext.group.as_str(), ext.kind.as_str()),
        };
        GroupKind { group, kind }
    }

    /// Resolves the route kind named by a group and kind.
    pub fn route(group: &str, kind: &str) -> Option<Self> {
        Self::ROUTES
            .into_iter()
            .find(|k| k.group_kind() == GroupKind { group, kind })
    }

    /// Resolves a supported backend kind.
    pub fn backend(group: &str, kind: &str) -> Option<Self> {
        match (group, kind) {
            ("", "Service") => Some(Self::Service),
            (multicluster::GROUP, "ServiceImport") => Some(Self::ServiceImport),
            _ => None,
        }
    }

    pub fn is_route(&self) -> bool {
        Self::ROUTES.contains(self)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.group_kind().kind.fmt(f)
    }
}

// === impl ObjectId ===

impl ObjectId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn cluster(name: impl Into<String>) -> Self {
        Self::new("", name)
    }

    pub(crate) fn of<T: ResourceExt>(obj: &T) -> Self {
        Self::new(obj.namespace().unwrap_or_default(), obj.name_unchecked())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            self.name.fmt(f)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

// === impl ObjectRef ===

impl ObjectRef {
    pub fn new(kind: Kind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            id: ObjectId::new(namespace, name),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}
