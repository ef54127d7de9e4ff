//! Translates reconciled snapshots and publishes the results to the
//! snapshot cache.
//!
//! Each live group has a single task, so that publishes for a group never
//! race. A task translates the latest snapshot it has seen; snapshots stored
//! while a translation is in flight are coalesced. Deleting a group retires
//! its task once the group is removed from the cache, and a recreated group's
//! task waits for the retired one to finish.

use crate::{
    core::{Event, SharedCache, Translate, TranslateError, Translation},
    index::{ResourceSnapshot, Snapshots},
};
use ahash::AHashMap as HashMap;
use futures::prelude::*;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use std::sync::Arc;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{info_span, Instrument};

pub struct Pipelines<T> {
    snapshots: Snapshots,
    cache: SharedCache,
    translator: Arc<T>,
    metrics: PipelineMetrics,
}

#[derive(Clone, Debug, Default)]
pub struct PipelineMetrics {
    publishes: Family<PublishLabels, Counter>,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct PublishLabels {
    result: &'static str,
}

type SnapshotTx = watch::Sender<Option<Arc<ResourceSnapshot>>>;
type SnapshotRx = watch::Receiver<Option<Arc<ResourceSnapshot>>>;

// === impl Pipelines ===

impl<T> Pipelines<T>
where
    T: Translate<ResourceSnapshot> + 'static,
{
    pub fn new(
        snapshots: Snapshots,
        cache: SharedCache,
        translator: Arc<T>,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            snapshots,
            cache,
            translator,
            metrics,
        }
    }

    /// Dispatches snapshot updates to their group's task until shutdown.
    pub async fn run(self, drain: drain::Watch) {
        let mut updates = self.snapshots.subscribe_all();
        let mut groups = HashMap::<String, (SnapshotTx, JoinHandle<()>)>::default();
        let mut retired = HashMap::<String, JoinHandle<()>>::default();
        tokio::pin! {
            let shutdown = drain.signaled();
        }
        loop {
            let event = tokio::select! {
                event = updates.next() => match event {
                    Some(event) => event,
                    None => return,
                },
                _ = &mut shutdown => return,
            };
            retired.retain(|_, task| !task.is_finished());
            match event {
                Event::Stored(group, snapshot) => {
                    if let Some((tx, _)) = groups.get(&group) {
                        tx.send_replace(Some(snapshot));
                        continue;
                    }
                    let (tx, rx) = watch::channel(Some(snapshot));
                    let prior = retired.remove(&group);
                    let task = tokio::spawn(
                        self.translate_group(group.clone(), rx, prior)
                            .instrument(info_span!("pipeline", %group)),
                    );
                    groups.insert(group, (tx, task));
                }
                Event::Deleted(group) => {
                    // The task removes the group from the cache and then
                    // stops, as the sender is dropped.
                    if let Some((tx, task)) = groups.remove(&group) {
                        tx.send_replace(None);
                        retired.insert(group, task);
                    }
                }
            }
        }
    }

    // Runs until the dispatcher drops the sender.
    fn translate_group(
        &self,
        group: String,
        mut rx: SnapshotRx,
        prior: Option<JoinHandle<()>>,
    ) -> impl Future<Output = ()> {
        let cache = self.cache.clone();
        let translator = self.translator.clone();
        let metrics = self.metrics.clone();
        async move {
            if let Some(prior) = prior {
                if let Err(error) = prior.await {
                    tracing::warn!(%error, "Retired pipeline failed");
                }
            }
            loop {
                let snapshot = rx.borrow_and_update().clone();
                match snapshot {
                    Some(snapshot) => {
                        let translation = translator.translate(&snapshot).await;
                        publish(&cache, &group, translation, &metrics);
                    }
                    None => {
                        cache.publish(&group, None);
                        metrics.record("removed");
                    }
                }
                if rx.changed().await.is_err() {
                    tracing::debug!("Pipeline stopped");
                    return;
                }
            }
        }
    }
}

/// Publishes a translation's resources. A translation without resources
/// leaves the prior bundle serving.
fn publish(cache: &SharedCache, group: &str, translation: Translation, metrics: &PipelineMetrics) {
    let Translation { resources, error } = translation;
    let Some(resources) = resources else {
        match error {
            Some(error) => tracing::warn!(%error, "Translation failed; keeping the prior bundle"),
            None => tracing::warn!("Translation produced nothing; keeping the prior bundle"),
        }
        metrics.record("failed");
        return;
    };

    let version = cache.publish(group, Some(resources));
    match error {
        None => {
            tracing::debug!(?version, "Published");
            metrics.record("ok");
        }
        Some(error @ TranslateError::Objects(_)) => {
            tracing::warn!(%error, ?version, "Published without some objects");
            metrics.record("partial");
        }
        Some(error @ TranslateError::Hook(_)) => {
            tracing::warn!(%error, ?version, "Published despite a hook failure");
            metrics.record("partial");
        }
    }
}

// === impl PipelineMetrics ===

impl PipelineMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let publishes = Family::default();
        reg.register(
            "publishes",
            "Count of snapshot translations by publish result",
            publishes.clone(),
        );
        Self { publishes }
    }

    fn record(&self, result: &'static str) {
        self.publishes
            .get_or_create(&PublishLabels { result })
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::{
            extension::{HookError, HookPoint},
            DiscoverBundle, ResourceType, Resources, SnapshotCache, Watchable,
        },
        k8s::gateway::{GatewayClass, GatewayClassSpec},
    };
    use std::time::Duration;
    use tokio::time;

    /// Translates by the snapshot's controller name: `ok`, `partial`, or
    /// `fail`. Bodies carry the class name.
    struct FakeTranslate;

    #[async_trait::async_trait]
    impl Translate<ResourceSnapshot> for FakeTranslate {
        async fn translate(&self, snapshot: &ResourceSnapshot) -> Translation {
            let mut resources = Resources::default();
            resources.insert(
                ResourceType::Runtime,
                "runtime",
                snapshot.class.metadata.name.clone().unwrap_or_default().into_bytes(),
            );
            match snapshot.controller.as_str() {
                "ok" => Translation::ok(resources),
                "partial" => Translation {
                    resources: Some(resources),
                    error: Some(TranslateError::Objects(vec!["apps/broken".to_string()])),
                },
                _ => Translation::failed(HookError::Timeout(HookPoint::Listener)),
            }
        }
    }

    fn snapshot(mode: &str, class: &str) -> Arc<ResourceSnapshot> {
        let class = GatewayClass::new(
            class,
            GatewayClassSpec {
                controller_name: mode.to_string(),
                parameters_ref: None,
                description: None,
            },
        );
        Arc::new(ResourceSnapshot::new(
            "group".to_string(),
            mode.to_string(),
            class,
        ))
    }

    fn spawn() -> (Snapshots, SharedCache, PipelineMetrics, drain::Signal) {
        let (snapshots, cache, metrics, signal, _) = spawn_pipelines();
        (snapshots, cache, metrics, signal)
    }

    fn spawn_pipelines() -> (
        Snapshots,
        SharedCache,
        PipelineMetrics,
        drain::Signal,
        Arc<FakeTranslate>,
    ) {
        let snapshots = Snapshots::new(Watchable::new());
        let cache = SnapshotCache::shared();
        let metrics = PipelineMetrics::default();
        let (signal, watch) = drain::channel();
        let translator = Arc::new(FakeTranslate);
        let pipelines = Pipelines::new(
            snapshots.clone(),
            cache.clone(),
            translator.clone(),
            metrics.clone(),
        );
        tokio::spawn(pipelines.run(watch));
        (snapshots, cache, metrics, signal, translator)
    }

    fn count(metrics: &PipelineMetrics, result: &'static str) -> u64 {
        metrics
            .publishes
            .get_or_create(&PublishLabels { result })
            .get()
    }

    async fn until(f: impl Fn() -> bool) {
        time::timeout(Duration::from_secs(5), async {
            while !f() {
                time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition must be reached");
    }

    fn runtime_body(cache: &SharedCache) -> Option<Vec<u8>> {
        let bundle = cache.resume("group")?;
        let body = bundle
            .resources(ResourceType::Runtime)
            .map(|(_, r)| r.body.to_vec())
            .next();
        body
    }

    #[tokio::test]
    async fn publishes_translated_snapshots() {
        let (snapshots, cache, metrics, _signal) = spawn();
        let mut bundles = cache.watch_bundle("group");

        snapshots.store("group".to_string(), snapshot("ok", "first"));
        let bundle = time::timeout(Duration::from_secs(5), bundles.next())
            .await
            .expect("bundle must be published")
            .flatten()
            .expect("bundle must be present");
        assert_eq!(runtime_body(&cache), Some(b"first".to_vec()));
        assert_eq!(count(&metrics, "ok"), 1);

        snapshots.store("group".to_string(), snapshot("partial", "second"));
        until(|| count(&metrics, "partial") == 1).await;
        assert_eq!(runtime_body(&cache), Some(b"second".to_vec()));
        let next = cache.resume("group").expect("bundle must be present");
        assert!(next.version() > bundle.version());
    }

    #[tokio::test]
    async fn failed_translations_keep_the_prior_bundle() {
        let (snapshots, cache, metrics, _signal) = spawn();

        snapshots.store("group".to_string(), snapshot("ok", "first"));
        until(|| count(&metrics, "ok") == 1).await;
        let version = cache.resume("group").map(|b| b.version());

        snapshots.store("group".to_string(), snapshot("fail", "second"));
        until(|| count(&metrics, "failed") == 1).await;
        assert_eq!(cache.resume("group").map(|b| b.version()), version);
        assert_eq!(runtime_body(&cache), Some(b"first".to_vec()));
    }

    #[tokio::test]
    async fn deleted_snapshots_remove_the_group() {
        let (snapshots, cache, metrics, _signal) = spawn();

        snapshots.store("group".to_string(), snapshot("ok", "first"));
        until(|| count(&metrics, "ok") == 1).await;

        snapshots.delete(&"group".to_string());
        until(|| count(&metrics, "removed") == 1).await;
        assert!(cache.resume("group").is_none());

        // A recreated group is served by a new task.
        snapshots.store("group".to_string(), snapshot("ok", "again"));
        until(|| count(&metrics, "ok") == 2).await;
        assert_eq!(runtime_body(&cache), Some(b"again".to_vec()));
    }

    #[tokio::test]
    async fn deleted_groups_release_their_tasks() {
        let (snapshots, cache, metrics, _signal, translator) = spawn_pipelines();

        for i in 0..50 {
            let group = format!("group-{i}");
            let mut snap = (*snapshot("ok", "first")).clone();
            snap.group = group.clone();
            snapshots.store(group.clone(), Arc::new(snap));
            until(|| cache.resume(&group).is_some()).await;
            snapshots.delete(&group);
        }
        until(|| count(&metrics, "removed") == 50).await;
        assert_eq!(count(&metrics, "ok"), 50);
        for i in 0..50 {
            assert!(cache.resume(&format!("group-{i}")).is_none());
        }
        // Only the dispatcher and this test still hold the translator.
        until(|| Arc::strong_count(&translator) == 2).await;
    }
}
