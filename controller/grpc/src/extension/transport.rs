use super::{Error, ExtensionConfig};
use ahash::AHashMap;
use switchyard_controller_core::extension::HookPoint;
use switchyard_proxy_api::extension::{self as api, extension_hooks_client::ExtensionHooksClient};
use tonic::{
    transport::{Channel, Endpoint},
    Status,
};

/// A hook request, one variant per hook point.
#[derive(Clone, Debug, PartialEq)]
pub enum HookRequest {
    Route(api::PostRouteModifyRequest),
    VirtualHost(api::PostVirtualHostModifyRequest),
    Listener(api::PostListenerModifyRequest),
    Translation(api::PostTranslationInsertRequest),
}

#[derive(Clone, Debug, PartialEq)]
pub enum HookResponse {
    Route(api::PostRouteModifyResponse),
    VirtualHost(api::PostVirtualHostModifyResponse),
    Listener(api::PostListenerModifyResponse),
    Translation(api::PostTranslationInsertResponse),
}

/// Sends hook requests to an extension.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn call(&self, req: HookRequest) -> Result<HookResponse, Status>;
}

/// Calls the extension service over gRPC.
///
/// A client is only built for registered hook points. Each holds a lazily
/// connected channel that is reused by every call at that point.
#[derive(Clone, Debug)]
pub struct GrpcTransport {
    clients: AHashMap<HookPoint, ExtensionHooksClient<Channel>>,
}

// === impl HookRequest ===

impl HookRequest {
    pub fn point(&self) -> HookPoint {
        match self {
            Self::Route(_) => HookPoint::Route,
            Self::VirtualHost(_) => HookPoint::VirtualHost,
            Self::Listener(_) => HookPoint::Listener,
            Self::Translation(_) => HookPoint::Translation,
        }
    }
}

// === impl GrpcTransport ===

impl GrpcTransport {
    /// Builds clients for the configured hook points. TLS material is loaded
    /// once, here.
    pub fn new(config: &ExtensionConfig) -> Result<Self, Error> {
        let endpoint = Endpoint::from_shared(config.service.uri())?;
        let connector = config
            .service
            .client_credentials()
            .map(|creds| creds.connector(&config.service.host))
            .transpose()?;

        let mut clients = AHashMap::new();
        for point in HookPoint::ALL {
            if !config.is_registered(point) {
                continue;
            }
            let channel = match &connector {
                Some(connector) => endpoint.connect_with_connector_lazy(connector.clone()),
                None => endpoint.connect_lazy(),
            };
            clients.insert(point, ExtensionHooksClient::new(channel));
        }
        tracing::debug!(
            uri = %config.service.uri(),
            tls = connector.is_some(),
            hooks = clients.len(),
            "Built extension clients"
        );
        Ok(Self { clients })
    }

    fn client(&self, point: HookPoint) -> Result<ExtensionHooksClient<Channel>, Status> {
        self.clients
            .get(&point)
            .cloned()
            .ok_or_else(|| Status::failed_precondition(format!("{point} hook is not registered")))
    }
}

#[async_trait::async_trait]
impl Transport for GrpcTransport {
    async fn call(&self, req: HookRequest) -> Result<HookResponse, Status> {
        let mut client = self.client(req.point())?;
        let rsp = match req {
            HookRequest::Route(req) => {
                HookResponse::Route(client.post_route_modify(req).await?.into_inner())
            }
            HookRequest::VirtualHost(req) => HookResponse::VirtualHost(
                client.post_virtual_host_modify(req).await?.into_inner(),
            ),
            HookRequest::Listener(req) => {
                HookResponse::Listener(client.post_listener_modify(req).await?.into_inner())
            }
            HookRequest::Translation(req) => HookResponse::Translation(
                client.post_translation_insert(req).await?.into_inner(),
            ),
        };
        Ok(rsp)
    }
}
