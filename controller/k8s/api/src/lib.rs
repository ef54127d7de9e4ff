#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Orchestration-API object types consumed and produced by the controller.

pub mod duration;
pub mod gateway;
pub mod labels;
pub mod multicluster;
pub mod policy;

pub use k8s_openapi::{
    api::{
        self,
        apps::v1::Deployment,
        authentication::v1::{TokenReview, TokenReviewSpec, TokenReviewStatus},
        coordination::v1::Lease,
        core::v1::{ConfigMap, Namespace, Node, NodeAddress, Secret, Service, ServiceSpec},
        discovery::v1::EndpointSlice,
    },
    apimachinery::pkg::apis::meta::v1::{Condition, LabelSelector, Time},
    ByteString, NamespaceResourceScope,
};
pub use kube::{
    api::{Api, DynamicObject, ObjectMeta, Patch, PatchParams, PostParams, ResourceExt},
    core::{ApiResource, ErrorResponse, GroupVersionKind},
    runtime::watcher,
    Client, Error, Resource,
};

/// The HTTP status code returned when a write is based on a stale resource
/// version.
pub const CONFLICT: u16 = 409;

/// Returns true if the error indicates an optimistic-concurrency conflict.
pub fn is_conflict(error: &Error) -> bool {
    matches!(error, Error::Api(rsp) if rsp.code == CONFLICT)
}

/// Returns true if the error indicates that the object does not exist.
pub fn is_not_found(error: &Error) -> bool {
    matches!(error, Error::Api(rsp) if rsp.code == 404)
}
