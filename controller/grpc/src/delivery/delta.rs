use super::{resource_type, to_resource, Acks, Node, Nonces, StreamState};
use crate::metrics::{DeliveryMetrics, Protocol};
use std::{collections::BTreeMap, sync::Arc};
use switchyard_controller_core::{Bundle, ResourceType};
use switchyard_proxy_api::delivery as api;
use tonic::Status;

/// Incremental discovery: only resources that changed since the last response
/// of a type are sent, along with the names of removed resources.
#[derive(Debug)]
pub(super) struct Delta {
    node: Node,
    bundle: Option<Arc<Bundle>>,
    subscriptions: BTreeMap<ResourceType, Subscription>,
    nonces: Nonces,
    metrics: DeliveryMetrics,
}

#[derive(Debug, Default)]
struct Subscription {
    acks: Acks,

    /// The version of each resource last sent. `None` until the first
    /// response.
    sent: Option<BTreeMap<String, u64>>,
}

impl Delta {
    pub(super) fn new(node: Node, metrics: DeliveryMetrics) -> Self {
        Self {
            node,
            bundle: None,
            subscriptions: BTreeMap::new(),
            nonces: Nonces::default(),
            metrics,
        }
    }

    fn respond(&mut self, type_: ResourceType) -> Option<api::DeltaDiscoveryResponse> {
        let bundle = self.bundle.as_ref()?;
        let sub = self.subscriptions.entry(type_).or_default();
        let initial = sub.sent.is_none();
        let sent = sub.sent.take().unwrap_or_default();

        let resources = bundle
            .resources(type_)
            .filter(|(name, r)| sent.get(*name) != Some(&r.version))
            .map(|(name, r)| to_resource(type_, name, r.version, &r.body))
            .collect::<Vec<_>>();
        let removed_resources = sent
            .keys()
            .filter(|name| bundle.resource(type_, name).is_none())
            .cloned()
            .collect::<Vec<_>>();
        sub.sent = Some(
            bundle
                .resources(type_)
                .map(|(name, r)| (name.to_string(), r.version))
                .collect(),
        );
        if !initial && resources.is_empty() && removed_resources.is_empty() {
            return None;
        }

        let nonce = self.nonces.next();
        sub.acks.nonce = Some(nonce.clone());
        self.metrics.response_sent(Protocol::Delta, type_);
        tracing::debug!(
            node = %self.node.id,
            group = %self.node.group,
            %type_,
            version = bundle.version(),
            updated = resources.len(),
            removed = removed_resources.len(),
            "Sending resource changes"
        );
        Some(api::DeltaDiscoveryResponse {
            system_version_info: bundle.version().to_string(),
            type_url: type_.type_url().to_string(),
            resources,
            removed_resources,
            nonce,
        })
    }
}

impl StreamState for Delta {
    type Request = api::DeltaDiscoveryRequest;
    type Response = api::DeltaDiscoveryResponse;

    fn node(&self) -> &Node {
        &self.node
    }

    fn on_request(
        &mut self,
        req: api::DeltaDiscoveryRequest,
    ) -> Result<Vec<api::DeltaDiscoveryResponse>, Status> {
        let type_ = resource_type(&req.type_url)?;
        if let Some(sub) = self.subscriptions.get(&type_) {
            sub.acks.observe(
                &self.node,
                &self.metrics,
                Protocol::Delta,
                type_,
                &req.response_nonce,
                &req.error_detail,
            );
            return Ok(vec![]);
        }

        tracing::debug!(node = %self.node.id, %type_, "Subscribed");
        self.subscriptions.insert(type_, Subscription::default());
        Ok(self.respond(type_).into_iter().collect())
    }

    fn on_bundle(&mut self, bundle: Arc<Bundle>) -> Vec<api::DeltaDiscoveryResponse> {
        self.bundle = Some(bundle);
        let types = self.subscriptions.keys().copied().collect::<Vec<_>>();
        types
            .into_iter()
            .filter_map(|type_| self.respond(type_))
            .collect()
    }
}
