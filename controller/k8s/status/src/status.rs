use switchyard_controller_k8s_api::{gateway, policy, ApiResource, Condition};
use switchyard_controller_k8s_index::StatusKind;

/// An object's status, in the shape its kind stores it.
///
/// Every route kind shares [`gateway::RouteStatus`] and every policy kind
/// shares [`policy::PolicyStatus`], so four shapes cover all the kinds the
/// controller writes.
#[derive(Clone, Debug, PartialEq)]
pub enum Status {
    GatewayClass(gateway::GatewayClassStatus),
    Gateway(gateway::GatewayStatus),
    Route(gateway::RouteStatus),
    Policy(policy::PolicyStatus),
}

/// The parts of a live object that the writers read.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LiveObject {
    pub resource_version: Option<String>,
    pub finalizers: Vec<String>,
    pub status: Option<Status>,
}

/// Returns the API resource for a status kind.
pub fn api_resource(kind: StatusKind) -> ApiResource {
    match kind {
        StatusKind::GatewayClass => ApiResource::erase::<gateway::GatewayClass>(&()),
        StatusKind::Gateway => ApiResource::erase::<gateway::Gateway>(&()),
        StatusKind::HttpRoute => ApiResource::erase::<gateway::HttpRoute>(&()),
        StatusKind::GrpcRoute => ApiResource::erase::<gateway::GrpcRoute>(&()),
        StatusKind::TlsRoute => ApiResource::erase::<gateway::TlsRoute>(&()),
        StatusKind::TcpRoute => ApiResource::erase::<gateway::TcpRoute>(&()),
        StatusKind::BackendTrafficPolicy => ApiResource::erase::<policy::BackendTrafficPolicy>(&()),
        StatusKind::ClientTrafficPolicy => ApiResource::erase::<policy::ClientTrafficPolicy>(&()),
        StatusKind::SecurityPolicy => ApiResource::erase::<policy::SecurityPolicy>(&()),
    }
}

// === impl Status ===

impl Status {
    pub fn empty(kind: StatusKind) -> Self {
        match kind {
            StatusKind::GatewayClass => Self::GatewayClass(Default::default()),
            StatusKind::Gateway => Self::Gateway(Default::default()),
            StatusKind::HttpRoute
            | StatusKind::GrpcRoute
            | StatusKind::TlsRoute
            | StatusKind::TcpRoute => Self::Route(Default::default()),
            StatusKind::BackendTrafficPolicy
            | StatusKind::ClientTrafficPolicy
            | StatusKind::SecurityPolicy => Self::Policy(Default::default()),
        }
    }

    pub fn decode(kind: StatusKind, value: serde_json::Value) -> serde_json::Result<Self> {
        Ok(match Self::empty(kind) {
            Self::GatewayClass(_) => Self::GatewayClass(serde_json::from_value(value)?),
            Self::Gateway(_) => Self::Gateway(serde_json::from_value(value)?),
            Self::Route(_) => Self::Route(serde_json::from_value(value)?),
            Self::Policy(_) => Self::Policy(serde_json::from_value(value)?),
        })
    }

    pub fn encode(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            Self::GatewayClass(s) => serde_json::to_value(s),
            Self::Gateway(s) => serde_json::to_value(s),
            Self::Route(s) => serde_json::to_value(s),
            Self::Policy(s) => serde_json::to_value(s),
        }
    }

    /// Visits every condition in the status, including those of listeners and
    /// of every controller's parent entries.
    pub fn for_each_condition(&mut self, mut f: impl FnMut(&mut Condition)) {
        match self {
            Self::GatewayClass(s) => s.conditions.iter_mut().flatten().for_each(f),
            Self::Gateway(s) => {
                s.conditions.iter_mut().flatten().for_each(&mut f);
                for listener in s.listeners.iter_mut().flatten() {
                    listener.conditions.iter_mut().for_each(&mut f);
                }
            }
            Self::Route(s) => s
                .parents
                .iter_mut()
                .flat_map(|p| p.conditions.iter_mut())
                .for_each(f),
            Self::Policy(s) => s
                .ancestors
                .iter_mut()
                .flat_map(|a| a.conditions.iter_mut())
                .for_each(f),
        }
    }
}
