#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod bundle;
pub mod cache;
pub mod delivery;
pub mod extension;
pub mod translate;
pub mod watchable;

pub use self::{
    bundle::{Bundle, ResourceType, Resources, VersionedResource},
    cache::{SharedCache, SnapshotCache},
    delivery::{BundleStream, DiscoverBundle},
    translate::{Translate, TranslateError, Translation},
    watchable::{Event, Subscription, Watchable},
};

/// The default controller name, matched against `GatewayClass` objects'
/// `spec.controllerName`.
pub const DEFAULT_CONTROLLER_NAME: &str = "gateway.switchyard.io/gatewayclass-controller";
