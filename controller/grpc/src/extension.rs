//! The client side of the extension hook protocol.

use crate::{
    metrics::{HookMetrics, HookResult},
    tls,
};
use std::{path::PathBuf, sync::Arc, time::Duration};
use switchyard_controller_core::{
    extension::{
        ExtensionHooks, ExtensionObject, HookError, HookOutcome, HookPayload, HookPoint,
        ListenerContext, RouteContext, TranslationResources, VirtualHostContext,
    },
    ResourceType,
};
use switchyard_proxy_api::extension as api;
use tokio::time;
use tonic::{Code, Status};

mod config;
mod transport;

pub use self::{
    config::{ExtensionConfig, HooksConfig, ServiceConfig, TlsConfig},
    transport::{GrpcTransport, HookRequest, HookResponse, Transport},
};

const MAX_ATTEMPTS: usize = 4;
const MIN_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid extension config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid extension config: {0}")]
    Invalid(String),

    #[error("invalid extension endpoint: {0}")]
    Endpoint(#[from] tonic::transport::Error),

    #[error(transparent)]
    Tls(#[from] tls::Error),
}

/// Reports whether a ReferenceGrant in a namespace permits the control plane's
/// extension manager to reference a Service.
pub trait ServiceGrants: Send + Sync + 'static {
    fn permits(&self, from_namespace: &str, to_namespace: &str, service: &str) -> bool;
}

/// Calls out to an extension service at the configured hook points.
pub struct ExtensionManager<T> {
    config: ExtensionConfig,
    control_plane_namespace: String,
    transport: T,
    grants: Arc<dyn ServiceGrants>,
    metrics: HookMetrics,
}

// === impl ExtensionManager ===

impl<T: Transport> ExtensionManager<T> {
    pub fn new(
        config: ExtensionConfig,
        control_plane_namespace: impl Into<String>,
        transport: T,
        grants: Arc<dyn ServiceGrants>,
        metrics: HookMetrics,
    ) -> Self {
        Self {
            config,
            control_plane_namespace: control_plane_namespace.into(),
            transport,
            grants,
            metrics,
        }
    }

    /// A cross-namespace extension Service must be permitted by a grant when
    /// the config requires one. Grants are checked on every call.
    fn is_permitted(&self) -> bool {
        if !self.config.require_reference_grant {
            return true;
        }
        let Some(namespace) = self.config.service.namespace.as_deref() else {
            return true;
        };
        if namespace == self.control_plane_namespace {
            return true;
        }
        self.grants.permits(
            &self.control_plane_namespace,
            namespace,
            self.config.service.name(),
        )
    }

    async fn call<O>(
        &self,
        req: HookRequest,
        convert: impl FnOnce(HookResponse) -> Result<O, HookError>,
    ) -> Result<O, HookError> {
        let point = req.point();
        let res = self.try_call(req).await.and_then(convert);
        let result = match &res {
            Ok(_) => HookResult::Ok,
            Err(HookError::Timeout(_)) => HookResult::Timeout,
            Err(HookError::NotPermitted(_)) => HookResult::NotPermitted,
            Err(HookError::Failed { .. } | HookError::Malformed(_)) => HookResult::Error,
        };
        self.metrics.observe(point, result);
        res
    }

    async fn try_call(&self, req: HookRequest) -> Result<HookResponse, HookError> {
        let point = req.point();
        if !self.is_permitted() {
            return Err(HookError::NotPermitted(point));
        }
        match time::timeout(self.config.timeout(), self.call_with_retries(req)).await {
            Ok(Ok(rsp)) => Ok(rsp),
            Ok(Err(status)) => Err(HookError::Failed {
                point,
                message: format!("{}: {}", status.code(), status.message()),
            }),
            Err(_) => Err(HookError::Timeout(point)),
        }
    }

    async fn call_with_retries(&self, req: HookRequest) -> Result<HookResponse, Status> {
        let mut backoff = MIN_BACKOFF;
        let mut attempt = 1;
        loop {
            match self.transport.call(req.clone()).await {
                Err(status) if status.code() == Code::Unavailable && attempt < MAX_ATTEMPTS => {
                    tracing::debug!(
                        point = %req.point(),
                        attempt,
                        error = %status.message(),
                        "Extension unavailable; retrying"
                    );
                    time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    attempt += 1;
                }
                res => return res,
            }
        }
    }
}

#[async_trait::async_trait]
impl<T: Transport> ExtensionHooks for ExtensionManager<T> {
    fn is_registered(&self, point: HookPoint) -> bool {
        self.config.is_registered(point)
    }

    fn fail_open(&self) -> bool {
        self.config.fail_open
    }

    async fn post_route_modify(
        &self,
        route: &HookPayload,
        ctx: &RouteContext,
    ) -> Result<HookOutcome<Vec<u8>>, HookError> {
        use api::post_route_modify_response::Result as Rsp;

        let req = HookRequest::Route(api::PostRouteModifyRequest {
            route: Some(to_any(route)),
            context: Some(api::RouteContext {
                hostnames: ctx.hostnames.clone(),
                extension_resources: ctx.extension_resources.iter().map(to_resource).collect(),
            }),
        });
        self.call(req, |rsp| match rsp {
            HookResponse::Route(rsp) => match rsp.result {
                None => Ok(HookOutcome::Unchanged),
                Some(Rsp::Replacement(any)) => replacement(HookPoint::Route, route, any),
                Some(Rsp::Removed(_)) => Ok(HookOutcome::Removed),
            },
            _ => Err(HookError::Malformed(HookPoint::Route)),
        })
        .await
    }

    async fn post_virtual_host_modify(
        &self,
        virtual_host: &HookPayload,
        ctx: &VirtualHostContext,
    ) -> Result<HookOutcome<Vec<u8>>, HookError> {
        use api::post_virtual_host_modify_response::Result as Rsp;

        let req = HookRequest::VirtualHost(api::PostVirtualHostModifyRequest {
            virtual_host: Some(to_any(virtual_host)),
            context: Some(api::VirtualHostContext {
                listener: ctx.listener.clone(),
                hostname: ctx.hostname.clone(),
            }),
        });
        self.call(req, |rsp| match rsp {
            HookResponse::VirtualHost(rsp) => match rsp.result {
                None => Ok(HookOutcome::Unchanged),
                Some(Rsp::Replacement(any)) => {
                    replacement(HookPoint::VirtualHost, virtual_host, any)
                }
                Some(Rsp::Removed(_)) => Ok(HookOutcome::Removed),
            },
            _ => Err(HookError::Malformed(HookPoint::VirtualHost)),
        })
        .await
    }

    async fn post_listener_modify(
        &self,
        listener: &HookPayload,
        ctx: &ListenerContext,
    ) -> Result<HookOutcome<Vec<u8>>, HookError> {
        use api::post_listener_modify_response::Result as Rsp;

        let req = HookRequest::Listener(api::PostListenerModifyRequest {
            listener: Some(to_any(listener)),
            context: Some(api::ListenerContext {
                extension_resources: ctx.extension_resources.iter().map(to_resource).collect(),
            }),
        });
        self.call(req, |rsp| match rsp {
            HookResponse::Listener(rsp) => match rsp.result {
                None => Ok(HookOutcome::Unchanged),
                Some(Rsp::Replacement(any)) => replacement(HookPoint::Listener, listener, any),
                Some(Rsp::Removed(_)) => Ok(HookOutcome::Removed),
            },
            _ => Err(HookError::Malformed(HookPoint::Listener)),
        })
        .await
    }

    async fn post_translation_insert(
        &self,
        resources: &TranslationResources,
        policies: &[ExtensionObject],
    ) -> Result<Option<TranslationResources>, HookError> {
        let req = HookRequest::Translation(api::PostTranslationInsertRequest {
            resources: Some(api::TranslationResources {
                clusters: resources.clusters.iter().map(to_any).collect(),
                secrets: resources.secrets.iter().map(to_any).collect(),
            }),
            policies: policies.iter().map(to_resource).collect(),
        });
        self.call(req, |rsp| match rsp {
            HookResponse::Translation(rsp) => rsp
                .replacement
                .map(|r| -> Result<_, HookError> {
                    Ok(TranslationResources {
                        clusters: payloads(ResourceType::Cluster, r.clusters)?,
                        secrets: payloads(ResourceType::Secret, r.secrets)?,
                    })
                })
                .transpose(),
            _ => Err(HookError::Malformed(HookPoint::Translation)),
        })
        .await
    }
}

fn to_any(payload: &HookPayload) -> prost_types::Any {
    prost_types::Any {
        type_url: payload.type_url.to_string(),
        value: payload.body.clone(),
    }
}

fn to_resource(obj: &ExtensionObject) -> api::ExtensionResource {
    api::ExtensionResource {
        api_version: obj.kind.api_version(),
        kind: obj.kind.kind.clone(),
        namespace: obj.namespace.clone().unwrap_or_default(),
        name: obj.name.clone(),
        unstructured_json: obj.json.clone(),
    }
}

/// A replacement must keep the type of the object it replaces.
fn replacement(
    point: HookPoint,
    original: &HookPayload,
    any: prost_types::Any,
) -> Result<HookOutcome<Vec<u8>>, HookError> {
    if any.type_url != original.type_url {
        tracing::debug!(%point, expected = original.type_url, actual = %any.type_url, "Replacement has the wrong type");
        return Err(HookError::Malformed(point));
    }
    Ok(HookOutcome::Replaced(any.value))
}

/// Inserted resources are named by their body's `name` field.
fn payloads(
    type_: ResourceType,
    anys: Vec<prost_types::Any>,
) -> Result<Vec<HookPayload>, HookError> {
    #[derive(serde::Deserialize)]
    struct Named {
        name: String,
    }

    anys.into_iter()
        .map(|any| {
            if any.type_url != type_.type_url() {
                return Err(HookError::Malformed(HookPoint::Translation));
            }
            let Named { name } = serde_json::from_slice(&any.value)
                .map_err(|_| HookError::Malformed(HookPoint::Translation))?;
            if name.is_empty() {
                return Err(HookError::Malformed(HookPoint::Translation));
            }
            Ok(HookPayload {
                type_url: type_.type_url(),
                name,
                body: any.value,
            })
        })
        .collect()
}
