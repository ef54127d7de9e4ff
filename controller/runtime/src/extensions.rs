//! Watches extension-owned kinds, which are only known from configuration.

use crate::{
    core::extension::ExtensionKind,
    index::{ObjectId, SharedIndex},
    k8s::{watcher, Api, ApiResource, Client, DynamicObject, GroupVersionKind, ResourceExt},
};
use futures::prelude::*;
use kube::runtime::WatchStreamExt;

/// Watches every object of `kind` across the cluster and feeds the index.
pub async fn watch(index: SharedIndex, client: Client, kind: ExtensionKind) {
    let gvk = GroupVersionKind::gvk(&kind.group, &kind.version, &kind.kind);
    let api = Api::<DynamicObject>::all_with(client, &ApiResource::from_gvk(&gvk));
    let events = watcher(api, watcher::Config::default()).default_backoff();
    index_events(index, kind, events).await
}

/// Applies watch events to the index. The objects of a (re)list replace
/// everything cached for the kind once the list completes.
async fn index_events<S>(index: SharedIndex, kind: ExtensionKind, events: S)
where
    S: Stream<Item = Result<watcher::Event<DynamicObject>, watcher::Error>>,
{
    tokio::pin!(events);
    let mut listed = Vec::new();
    while let Some(event) = events.next().await {
        match event {
            Ok(watcher::Event::Apply(obj)) => index.write().apply_extension(&kind, obj),
            Ok(watcher::Event::Delete(obj)) => {
                let id = ObjectId::new(obj.namespace().unwrap_or_default(), obj.name_any());
                index.write().delete_extension(&kind, id);
            }
            Ok(watcher::Event::Init) => listed.clear(),
            Ok(watcher::Event::InitApply(obj)) => listed.push(obj),
            Ok(watcher::Event::InitDone) => {
                tracing::debug!(kind = %kind.kind, objects = listed.len(), "Listed extension objects");
                index
                    .write()
                    .reset_extensions(&kind, std::mem::take(&mut listed));
            }
            Err(error) => {
                tracing::info!(%error, kind = %kind.kind, "Extension watch failed");
            }
        }
    }
    tracing::debug!(kind = %kind.kind, "Extension watch ended");
}
