#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Composes the controller process: watches feed the index, reconciliation
//! produces snapshots and status, and pipelines translate snapshots into the
//! bundles served to proxies.

pub use switchyard_controller_core as core;
pub use switchyard_controller_grpc as grpc;
pub use switchyard_controller_k8s_api as k8s;
pub use switchyard_controller_k8s_index as index;
pub use switchyard_controller_k8s_status as status;
pub use switchyard_controller_translate as translate;

mod args;
mod authz;
mod extensions;
mod health;
mod lease;
mod pipeline;

pub use self::args::Args;
