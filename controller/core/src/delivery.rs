use crate::bundle::Bundle;
use futures::Stream;
use std::{pin::Pin, sync::Arc};

/// Emits a group's bundles. `None` indicates the group has been removed.
pub type BundleStream = Pin<Box<dyn Stream<Item = Option<Arc<Bundle>>> + Send + Sync>>;

/// Models bundle discovery for the delivery server.
pub trait DiscoverBundle: Clone + Send + Sync + 'static {
    /// Watches a group's bundles, starting with the current bundle if one has
    /// been published.
    fn watch_bundle(&self, group: &str) -> BundleStream;
}
