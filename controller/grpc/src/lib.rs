#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! gRPC surfaces of the control plane: the configuration delivery server that
//! proxies subscribe to, and the client for out-of-process extension hooks.

pub mod auth;
pub mod connection;
pub mod delivery;
pub mod extension;
pub mod metrics;
pub mod probe;
pub mod tls;

pub use self::{
    delivery::{DeliveryServer, PROBE_GROUP},
    extension::{ExtensionConfig, ExtensionManager, GrpcTransport, ServiceGrants},
    metrics::{DeliveryMetrics, HookMetrics},
    probe::{Prober, Readiness},
    tls::{ClientCredentials, ServerCredentials},
};
