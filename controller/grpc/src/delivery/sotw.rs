use super::{resource_type, to_resource, Acks, Node, Nonces, StreamState};
use crate::metrics::{DeliveryMetrics, Protocol};
use std::{collections::BTreeMap, sync::Arc};
use switchyard_controller_core::{Bundle, ResourceType};
use switchyard_proxy_api::delivery as api;
use tonic::Status;

/// Aggregated discovery: every bundle is sent in full for each subscribed
/// type.
#[derive(Debug)]
pub(super) struct Sotw {
    node: Node,
    bundle: Option<Arc<Bundle>>,
    subscriptions: BTreeMap<ResourceType, Acks>,
    nonces: Nonces,
    metrics: DeliveryMetrics,
}

impl Sotw {
    pub(super) fn new(node: Node, metrics: DeliveryMetrics) -> Self {
        Self {
            node,
            bundle: None,
            subscriptions: BTreeMap::new(),
            nonces: Nonces::default(),
            metrics,
        }
    }

    fn respond(&mut self, type_: ResourceType) -> Option<api::DiscoveryResponse> {
        let bundle = self.bundle.as_ref()?;
        let nonce = self.nonces.next();
        let rsp = api::DiscoveryResponse {
            version_info: bundle.version().to_string(),
            type_url: type_.type_url().to_string(),
            resources: bundle
                .resources(type_)
                .map(|(name, r)| to_resource(type_, name, r.version, &r.body))
                .collect(),
            nonce: nonce.clone(),
        };
        self.subscriptions.entry(type_).or_default().nonce = Some(nonce);
        self.metrics.response_sent(Protocol::Sotw, type_);
        tracing::debug!(
            node = %self.node.id,
            group = %self.node.group,
            %type_,
            version = %rsp.version_info,
            resources = rsp.resources.len(),
            "Sending resources"
        );
        Some(rsp)
    }
}

impl StreamState for Sotw {
    type Request = api::DiscoveryRequest;
    type Response = api::DiscoveryResponse;

    fn node(&self) -> &Node {
        &self.node
    }

    fn on_request(
        &mut self,
        req: api::DiscoveryRequest,
    ) -> Result<Vec<api::DiscoveryResponse>, Status> {
        let type_ = resource_type(&req.type_url)?;
        if let Some(acks) = self.subscriptions.get(&type_) {
            acks.observe(
                &self.node,
                &self.metrics,
                Protocol::Sotw,
                type_,
                &req.response_nonce,
                &req.error_detail,
            );
            return Ok(vec![]);
        }

        tracing::debug!(node = %self.node.id, %type_, "Subscribed");
        self.subscriptions.insert(type_, Acks::default());
        Ok(self.respond(type_).into_iter().collect())
    }

    fn on_bundle(&mut self, bundle: Arc<Bundle>) -> Vec<api::DiscoveryResponse> {
        self.bundle = Some(bundle);
        let types = self.subscriptions.keys().copied().collect::<Vec<_>>();
        types
            .into_iter()
            .filter_map(|type_| self.respond(type_))
            .collect()
    }
}
