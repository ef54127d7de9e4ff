//! Status derived by reconciliation, published for the status writers.

use crate::object::ObjectId;
use chrono::{DateTime, Utc};
use switchyard_controller_core::Watchable;
use switchyard_controller_k8s_api::{
    gateway::{GatewayStatus, ParentReference},
    Condition, Time,
};

/// The kinds of objects whose status the controller writes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StatusKind {
    GatewayClass,
    Gateway,
    HttpRoute,
    GrpcRoute,
    TlsRoute,
    TcpRoute,
    BackendTrafficPolicy,
    ClientTrafficPolicy,
    SecurityPolicy,
}

/// Status is keyed by the deriving controller as well as the object, since an
/// object may be processed by several of this process's controller names.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatusKey {
    pub controller: String,
    pub id: ObjectId,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DerivedStatus {
    GatewayClass(Vec<Condition>),
    Gateway(GatewayStatus),

    /// Per-parent status for routes (parents) and policies (ancestors).
    Parents {
        parents: Vec<ParentStatus>,

        /// Parents this controller previously reported that no longer apply.
        /// Writers remove these entries from the live object.
        superseded: Vec<ParentReference>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParentStatus {
    pub parent_ref: ParentReference,
    pub conditions: Vec<Condition>,
}

/// One store of derived status per kind.
#[derive(Debug, Default)]
pub struct DerivedStatuses {
    stores: [Watchable<StatusKey, DerivedStatus>; StatusKind::ALL.len()],
}

// === impl StatusKind ===

impl StatusKind {
    pub const ALL: [Self; 9] = [
        Self::GatewayClass,
        Self::Gateway,
        Self::HttpRoute,
        Self::GrpcRoute,
        Self::TlsRoute,
        Self::TcpRoute,
        Self::BackendTrafficPolicy,
        Self::ClientTrafficPolicy,
        Self::SecurityPolicy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GatewayClass => "GatewayClass",
            Self::Gateway => "Gateway",
            Self::HttpRoute => "HTTPRoute",
            Self::GrpcRoute => "GRPCRoute",
            Self::TlsRoute => "TLSRoute",
            Self::TcpRoute => "TCPRoute",
            Self::BackendTrafficPolicy => "BackendTrafficPolicy",
            Self::ClientTrafficPolicy => "ClientTrafficPolicy",
            Self::SecurityPolicy => "SecurityPolicy",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl std::fmt::Display for StatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.as_str().fmt(f)
    }
}

// === impl DerivedStatus ===

impl DerivedStatus {
    pub fn parents(&self) -> &[ParentStatus] {
        match self {
            Self::Parents { parents, .. } => parents,
            _ => &[],
        }
    }

    pub fn superseded(&self) -> &[ParentReference] {
        match self {
            Self::Parents { superseded, .. } => superseded,
            _ => &[],
        }
    }
}

// === impl DerivedStatuses ===

impl DerivedStatuses {
    pub fn get(&self, kind: StatusKind) -> &Watchable<StatusKey, DerivedStatus> {
        &self.stores[kind.index()]
    }
}

/// Builds a condition. Derived conditions carry a fixed transition time so
/// that repeated derivations compare equal; writers stamp the real time.
pub(crate) fn condition(
    type_: &str,
    ok: bool,
    reason: &str,
    message: impl Into<String>,
    generation: Option<i64>,
) -> Condition {
    Condition {
        type_: type_.to_string(),
        status: if ok { "True" } else { "False" }.to_string(),
        reason: reason.to_string(),
        message: message.into(),
        observed_generation: generation,
        last_transition_time: Time(DateTime::<Utc>::UNIX_EPOCH),
    }
}
