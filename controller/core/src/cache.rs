use crate::{
    bundle::{Bundle, Resources},
    delivery::{BundleStream, DiscoverBundle},
    watchable::{Event, Watchable},
};
use futures::prelude::*;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// Holds the latest configuration bundle for each group.
///
/// Each publish fully replaces the group's bundle. Subscribers see every
/// publish for their group in order; a late subscriber starts at the latest
/// bundle.
#[derive(Debug, Default)]
pub struct SnapshotCache {
    bundles: Watchable<String, Arc<Bundle>>,
    version: AtomicU64,
}

pub type SharedCache = Arc<SnapshotCache>;

// === impl SnapshotCache ===

impl SnapshotCache {
    pub fn shared() -> SharedCache {
        Arc::new(Self::default())
    }

    /// Replaces the group's bundle, or removes the group when `resources` is
    /// `None`. Returns the version of the published bundle.
    ///
    /// Each group must have a single publisher.
    pub fn publish(&self, group: &str, resources: Option<Resources>) -> Option<u64> {
        let group = group.to_string();
        let Some(resources) = resources else {
            if self.bundles.delete(&group) {
                tracing::debug!(%group, "Removed bundle");
            }
            return None;
        };

        let version = self.next_version();
        let prior = self.bundles.load(&group);
        let bundle = Bundle::new(version, resources, prior.as_deref());
        tracing::debug!(%group, version, resources = bundle.len(), "Published bundle");
        self.bundles.store(group, Arc::new(bundle));
        Some(version)
    }

    /// Returns the group's current bundle.
    pub fn resume(&self, group: &str) -> Option<Arc<Bundle>> {
        self.bundles.load(&group.to_string())
    }

    pub fn groups(&self) -> Vec<String> {
        self.bundles.keys()
    }

    // Versions increase monotonically across all groups; a wrapped counter
    // starts over at 1.
    fn next_version(&self) -> u64 {
        let prior = self
            .version
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                Some(v.checked_add(1).unwrap_or(1))
            })
            .unwrap_or_default();
        prior.checked_add(1).unwrap_or(1)
    }
}

impl DiscoverBundle for SharedCache {
    fn watch_bundle(&self, group: &str) -> BundleStream {
        Box::pin(
            self.bundles
                .subscribe(group.to_string())
                .map(Event::into_value),
        )
    }
}
