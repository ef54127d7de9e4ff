#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Writes derived status back to the orchestration API.
//!
//! One [`StatusWriter`] runs per kind so that a slow kind never delays
//! another. Writes happen only while this replica holds the write lease.

mod client;
mod finalizer;
pub mod merge;
mod metrics;
mod status;
mod writer;

#[cfg(test)]
mod tests;

pub use self::{
    client::{Error, KubeStatusClient, StatusClient},
    finalizer::FinalizerWriter,
    metrics::Metrics,
    status::{api_resource, LiveObject, Status},
    writer::{Lease, StatusWriter},
};

/// The Lease that status writers must hold.
pub const LEASE_NAME: &str = "switchyard-controller-write";
