#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Indexes orchestration-API objects and reconciles them into per-group
//! resource snapshots and derived status.

mod grants;
mod index;
mod mapping;
mod nodes;
mod object;
pub mod queue;
mod reconcile;
mod refs;
mod routes;
mod snapshot;
pub mod status;

#[cfg(test)]
mod tests;

pub use self::{
    grants::Grants,
    index::{Cached, Config, Error, Index, Objects, SharedIndex},
    mapping::RouteBackends,
    nodes::NodeAddresses,
    object::{GroupKind, Kind, ObjectId, ObjectRef},
    reconcile::{Finalizers, Metrics, Reconciler, Snapshots},
    routes::RouteObject,
    snapshot::{DroppedRef, ListenerRef, ResourceSnapshot},
    status::{DerivedStatus, DerivedStatuses, ParentStatus, StatusKey, StatusKind},
};
