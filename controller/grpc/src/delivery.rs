//! Streams configuration bundles to proxies.
//!
//! A proxy identifies its group on the first request of a stream. The stream
//! then follows the group's bundles: each bundle is delivered in full for every
//! subscribed type on aggregated streams, and as changes on incremental ones.

use crate::{
    auth::Authorize,
    connection::{self, Expiring, ServerIo},
    metrics::{DeliveryMetrics, Protocol, StreamGuard},
    tls::ServerCredentials,
};
use futures::prelude::*;
use std::{pin::Pin, sync::Arc, time::Duration};
use switchyard_controller_core::{delivery::DiscoverBundle, Bundle, ResourceType};
use switchyard_proxy_api::delivery::{
    self as api,
    resource_discovery_server::{ResourceDiscovery, ResourceDiscoveryServer},
};
use tokio::{net::TcpListener, sync::mpsc};
use tonic::{transport::Server, Status, Streaming};

mod delta;
mod sotw;


use self::{delta::Delta, sotw::Sotw};

/// A group that has no configuration. Streams for it receive a single empty
/// response, so that the serving path can be checked end to end.
pub const PROBE_GROUP: &str = "switchyard.io/health-probe";

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct DeliveryServer<D> {
    discover: D,
    auth: Arc<dyn Authorize>,
    metrics: DeliveryMetrics,
    drain: drain::Watch,
}

type BoxStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

/// The identity a stream's first request declares.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Node {
    id: String,
    group: String,
}

/// Tracks the acknowledgement state of a subscribed type.
#[derive(Clone, Debug, Default)]
struct Acks {
    nonce: Option<String>,
}

enum Input<Req> {
    Request(Option<Result<Req, Status>>),
    Bundle(Option<Option<Arc<Bundle>>>),
}

// === impl DeliveryServer ===

impl<D: DiscoverBundle> DeliveryServer<D> {
    pub fn new(
        discover: D,
        auth: Arc<dyn Authorize>,
        metrics: DeliveryMetrics,
        drain: drain::Watch,
    ) -> Self {
        Self {
            discover,
            auth,
            metrics,
            drain,
        }
    }

    pub fn svc(self) -> ResourceDiscoveryServer<Self> {
        ResourceDiscoveryServer::new(self)
    }

    /// Serves delivery on `listener` until shutdown.
    ///
    /// With credentials, each connection completes a mutual TLS handshake
    /// before it is served.
    pub async fn serve(
        self,
        listener: TcpListener,
        credentials: Option<ServerCredentials>,
    ) -> Result<(), tonic::transport::Error> {
        let drain = self.drain.clone();
        let (tx, mut rx) = mpsc::channel::<Expiring<ServerIo>>(128);
        tokio::spawn(connection::accept(listener, credentials, tx, drain.clone()));
        let incoming = Box::pin(async_stream::stream! {
            while let Some(io) = rx.recv().await {
                yield Ok::<_, std::io::Error>(io);
            }
        });

        Server::builder()
            .http2_keepalive_interval(Some(KEEPALIVE_INTERVAL))
            .add_service(self.svc())
            .serve_with_incoming_shutdown(incoming, drain.signaled().map(|_release| ()))
            .await
    }

    /// Validates the first request's node and authorizes the stream. Returns
    /// `None` for probe streams.
    async fn open(
        &self,
        metadata: &tonic::metadata::MetadataMap,
        node: Option<&api::Node>,
    ) -> Result<Option<Node>, Status> {
        let node = Node::from_request(node)?;
        if node.group == PROBE_GROUP {
            return Ok(None);
        }
        self.auth.authorize(metadata, &node.group).await?;
        tracing::debug!(node = %node.id, group = %node.group, "Opened stream");
        Ok(Some(node))
    }
}

#[async_trait::async_trait]
impl<D: DiscoverBundle> ResourceDiscovery for DeliveryServer<D> {
    type StreamResourcesStream = BoxStream<api::DiscoveryResponse>;

    async fn stream_resources(
        &self,
        req: tonic::Request<Streaming<api::DiscoveryRequest>>,
    ) -> Result<tonic::Response<Self::StreamResourcesStream>, Status> {
        let metadata = req.metadata().clone();
        let mut requests = req.into_inner();
        let first = first_request(&mut requests).await?;
        let Some(node) = self.open(&metadata, first.node.as_ref()).await? else {
            let probe = api::DiscoveryResponse {
                type_url: first.type_url,
                ..Default::default()
            };
            let rsp: Self::StreamResourcesStream =
                Box::pin(stream::once(future::ok::<_, Status>(probe)));
            return Ok(tonic::Response::new(rsp));
        };

        let mut state = Sotw::new(node, self.metrics.clone());
        let initial = state.on_request(first)?;
        let guard = self.metrics.open_stream(Protocol::Sotw);
        Ok(tonic::Response::new(self.response_stream(
            state, initial, requests, guard,
        )))
    }

    type DeltaResourcesStream = BoxStream<api::DeltaDiscoveryResponse>;

    async fn delta_resources(
        &self,
        req: tonic::Request<Streaming<api::DeltaDiscoveryRequest>>,
    ) -> Result<tonic::Response<Self::DeltaResourcesStream>, Status> {
        let metadata = req.metadata().clone();
        let mut requests = req.into_inner();
        let first = first_request(&mut requests).await?;
        let Some(node) = self.open(&metadata, first.node.as_ref()).await? else {
            let probe = api::DeltaDiscoveryResponse {
                type_url: first.type_url,
                ..Default::default()
            };
            let rsp: Self::DeltaResourcesStream =
                Box::pin(stream::once(future::ok::<_, Status>(probe)));
            return Ok(tonic::Response::new(rsp));
        };

        let mut state = Delta::new(node, self.metrics.clone());
        let initial = state.on_request(first)?;
        let guard = self.metrics.open_stream(Protocol::Delta);
        Ok(tonic::Response::new(self.response_stream(
            state, initial, requests, guard,
        )))
    }
}

impl<D: DiscoverBundle> DeliveryServer<D> {
    fn response_stream<S: StreamState>(
        &self,
        mut state: S,
        initial: Vec<S::Response>,
        requests: Streaming<S::Request>,
        guard: StreamGuard,
    ) -> BoxStream<S::Response> {
        let bundles = self.discover.watch_bundle(&state.node().group);
        let mut inputs = Inputs::new(requests, bundles, self.drain.clone());
        Box::pin(async_stream::try_stream! {
            let _guard = guard;
            for rsp in initial {
                yield rsp;
            }

            while let Some(input) = inputs.next().await {
                match input {
                    Input::Request(None) => break,
                    Input::Request(Some(req)) => {
                        for rsp in state.on_request(req?)? {
                            yield rsp;
                        }
                    }
                    Input::Bundle(Some(Some(bundle))) => {
                        for rsp in state.on_bundle(bundle) {
                            yield rsp;
                        }
                    }
                    Input::Bundle(Some(None)) => {
                        Err::<(), _>(removed(&state.node().group))?;
                    }
                    Input::Bundle(None) => break,
                }
            }
        })
    }
}

/// The per-stream state of a discovery protocol.
trait StreamState: Send + 'static {
    type Request: Send + 'static;
    type Response: Send + 'static;

    fn node(&self) -> &Node;

    /// Handles a request, returning the responses it triggers.
    fn on_request(&mut self, req: Self::Request) -> Result<Vec<Self::Response>, Status>;

    /// Handles a new bundle, returning the responses to send.
    fn on_bundle(&mut self, bundle: Arc<Bundle>) -> Vec<Self::Response>;
}

async fn first_request<T>(requests: &mut Streaming<T>) -> Result<T, Status> {
    requests
        .message()
        .await?
        .ok_or_else(|| Status::invalid_argument("stream closed before the first request"))
}

fn removed(group: &str) -> Status {
    tracing::debug!(%group, "Group removed; closing stream");
    Status::unavailable(format!("group {group} is no longer served"))
}

/// Merges a stream's requests with its group's bundles, ending at shutdown.
struct Inputs<Req> {
    requests: Streaming<Req>,
    bundles: switchyard_controller_core::BundleStream,
    shutdown: Pin<Box<dyn Future<Output = ()> + Send>>,
}

impl<Req: Send + 'static> Inputs<Req> {
    fn new(
        requests: Streaming<Req>,
        bundles: switchyard_controller_core::BundleStream,
        drain: drain::Watch,
    ) -> Self {
        Self {
            requests,
            bundles,
            shutdown: Box::pin(drain.signaled().map(|_release| ())),
        }
    }

    /// Returns `None` once the server begins shutting down.
    async fn next(&mut self) -> Option<Input<Req>> {
        tokio::select! {
            req = self.requests.next() => Some(Input::Request(req)),
            bundle = self.bundles.next() => Some(Input::Bundle(bundle)),
            _ = &mut self.shutdown => None,
        }
    }
}

// === impl Node ===

impl Node {
    fn from_request(node: Option<&api::Node>) -> Result<Self, Status> {
        let node =
            node.ok_or_else(|| Status::invalid_argument("the first request must set node"))?;
        if node.id.is_empty() {
            return Err(Status::invalid_argument("node.id is required"));
        }
        if node.group.is_empty() {
            return Err(Status::invalid_argument("node.group is required"));
        }
        Ok(Self {
            id: node.id.clone(),
            group: node.group.clone(),
        })
    }
}

// === impl Acks ===

impl Acks {
    /// Records a request for an already-subscribed type.
    fn observe(
        &self,
        node: &Node,
        metrics: &DeliveryMetrics,
        protocol: Protocol,
        type_: ResourceType,
        response_nonce: &str,
        error_detail: &str,
    ) {
        if self.nonce.as_deref() != Some(response_nonce) {
            tracing::trace!(node = %node.id, %type_, nonce = %response_nonce, "Ignoring stale nonce");
            return;
        }
        if error_detail.is_empty() {
            tracing::trace!(node = %node.id, %type_, nonce = %response_nonce, "Response acknowledged");
            return;
        }
        tracing::warn!(
            node = %node.id,
            group = %node.group,
            %type_,
            nonce = %response_nonce,
            error = %error_detail,
            "Proxy rejected configuration"
        );
        metrics.nack_received(protocol, type_);
    }
}

fn resource_type(type_url: &str) -> Result<ResourceType, Status> {
    ResourceType::from_type_url(type_url)
        .ok_or_else(|| Status::invalid_argument(format!("unsupported type_url: {type_url:?}")))
}

fn to_resource(type_: ResourceType, name: &str, version: u64, body: &[u8]) -> api::Resource {
    api::Resource {
        name: name.to_string(),
        version: version.to_string(),
        body: Some(prost_types::Any {
            type_url: type_.type_url().to_string(),
            value: body.to_vec(),
        }),
    }
}

/// Issues nonces unique within a stream.
#[derive(Debug, Default)]
struct Nonces(u64);

impl Nonces {
    fn next(&mut self) -> String {
        self.0 += 1;
        self.0.to_string()
    }
}
