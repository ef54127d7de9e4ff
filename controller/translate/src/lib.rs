#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Translates resource snapshots into the resources delivered to proxies.
//!
//! Listeners, routes, clusters, secrets, and a runtime resource are rendered
//! as JSON. Extension hooks may modify or remove each route, virtual host,
//! and listener, and may replace the final clusters and secrets.

pub mod config;
mod clusters;
mod hooks;
mod listeners;
pub mod names;
mod policies;
mod routes;
mod secrets;


use self::{hooks::Hooks, routes::ConvertRoute};
use serde::Serialize;
use std::fmt;
use switchyard_controller_core::{
    extension::{
        ExtensionHooks, HookError, HookPayload, HookPoint, ListenerContext, NoHooks,
        RouteContext, TranslationResources, VirtualHostContext,
    },
    ResourceType, Resources, Translate, TranslateError, Translation,
};
use switchyard_controller_k8s_api::gateway::{
    GrpcRoute, HttpRoute, Listener, TcpRoute, TlsRoute,
};
use switchyard_controller_k8s_index::{ObjectId, ObjectRef, ResourceSnapshot};

/// The default translation stage.
#[derive(Clone, Debug, Default)]
pub struct Translator<H = NoHooks> {
    hooks: H,
}

/// Resources accumulated during a translation, with the objects that could
/// not be rendered.
#[derive(Debug, Default)]
pub(crate) struct Output {
    resources: Resources,
    failures: Vec<String>,
}

// === impl Translator ===

impl<H: ExtensionHooks> Translator<H> {
    pub fn new(hooks: H) -> Self {
        Self { hooks }
    }

    async fn build(&self, snapshot: &ResourceSnapshot) -> Result<Output, HookError> {
        let hooks = Hooks::new(&self.hooks);
        let mut out = Output::default();

        self.routes::<HttpRoute>(&hooks, snapshot, &mut out).await?;
        self.routes::<GrpcRoute>(&hooks, snapshot, &mut out).await?;
        self.routes::<TlsRoute>(&hooks, snapshot, &mut out).await?;
        self.routes::<TcpRoute>(&hooks, snapshot, &mut out).await?;

        for (id, gw) in &snapshot.gateways {
            for listener in &gw.spec.listeners {
                self.listener(&hooks, snapshot, id, listener, &mut out)
                    .await?;
            }
        }

        clusters::translate(snapshot, &mut out);
        secrets::translate(snapshot, &mut out);
        self.finish(&hooks, snapshot, &mut out).await?;

        runtime(snapshot, &mut out);
        Ok(out)
    }

    async fn routes<R: ConvertRoute>(
        &self,
        hooks: &Hooks<'_, H>,
        snapshot: &ResourceSnapshot,
        out: &mut Output,
    ) -> Result<(), HookError> {
        for (id, route) in R::routes(snapshot) {
            let route_ref = ObjectRef::new(R::KIND, id.namespace.clone(), id.name.clone());
            let name = names::route(&route_ref);
            let body = routes::convert(snapshot, &route_ref, &name, route);
            let Some(body) = out.encode(&route_ref, &body) else {
                continue;
            };

            let ctx = RouteContext {
                hostnames: route.hostnames().to_vec(),
                extension_resources: routes::extension_resources(snapshot, &id.namespace, route),
            };
            let payload = HookPayload {
                type_url: ResourceType::Route.type_url(),
                name: name.clone(),
                body,
            };
            if let Some(body) = hooks.route(payload, &ctx).await? {
                out.resources.insert(ResourceType::Route, name, body);
            }
        }
        Ok(())
    }

    async fn listener(
        &self,
        hooks: &Hooks<'_, H>,
        snapshot: &ResourceSnapshot,
        gateway: &ObjectId,
        listener: &Listener,
        out: &mut Output,
    ) -> Result<(), HookError> {
        let name = names::listener(gateway, &listener.name);
        let tls = listeners::tls(snapshot, gateway, listener);
        if tls.as_ref().is_some_and(|t| t.mode == "Terminate" && t.certificates.is_empty()) {
            tracing::debug!(listener = %name, "Skipping listener without certificates");
            return Ok(());
        }

        // Routes removed by an extension are not served.
        let routes = snapshot
            .routes_on(gateway, &listener.name)
            .map(|r| (r, names::route(r)))
            .filter(|(_, n)| out.resources.get(ResourceType::Route, n).is_some())
            .collect::<Vec<_>>();

        let mut virtual_hosts = Vec::new();
        let mut tcp_routes = Vec::new();
        match listener.protocol.as_str() {
            "HTTP" | "HTTPS" => {
                for (hostname, routes) in listeners::virtual_hosts(snapshot, listener, &routes) {
                    let vhost = config::VirtualHost {
                        name: names::virtual_host(&name, hostname),
                        hostname,
                        routes,
                    };
                    let Some(body) = out.encode(&vhost.name, &vhost) else {
                        continue;
                    };
                    let ctx = VirtualHostContext {
                        listener: name.clone(),
                        hostname: hostname.to_string(),
                    };
                    let payload = HookPayload {
                        type_url: config::VIRTUAL_HOST_TYPE_URL,
                        name: vhost.name.clone(),
                        body,
                    };
                    if let Some(body) = hooks.virtual_host(payload, &ctx).await? {
                        let value: serde_json::Value = serde_json::from_slice(&body)
                            .map_err(|_| HookError::Malformed(HookPoint::VirtualHost))?;
                        virtual_hosts.push(value);
                    }
                }
            }
            "TLS" | "TCP" => {
                tcp_routes = routes.into_iter().map(|(_, n)| n).collect();
            }
            protocol => {
                tracing::debug!(listener = %name, %protocol, "Skipping unsupported listener");
                return Ok(());
            }
        }

        let body = config::Listener {
            name: &name,
            gateway: gateway.to_string(),
            port: listener.port,
            protocol: &listener.protocol,
            hostname: listener.hostname.as_deref(),
            tls,
            virtual_hosts,
            routes: tcp_routes,
            client: listeners::client(snapshot, gateway, listener),
        };
        let Some(body) = out.encode(&name, &body) else {
            return Ok(());
        };

        let ctx = ListenerContext {
            extension_resources: listeners::extension_policies(snapshot, gateway, &listener.name),
        };
        let payload = HookPayload {
            type_url: ResourceType::Listener.type_url(),
            name: name.clone(),
            body,
        };
        if let Some(body) = hooks.listener(payload, &ctx).await? {
            out.resources.insert(ResourceType::Listener, name, body);
        }
        Ok(())
    }

    /// Offers the clusters and secrets to the final hook, replacing them with
    /// whatever it returns.
    async fn finish(
        &self,
        hooks: &Hooks<'_, H>,
        snapshot: &ResourceSnapshot,
        out: &mut Output,
    ) -> Result<(), HookError> {
        let translated = TranslationResources {
            clusters: payloads(&out.resources, ResourceType::Cluster),
            secrets: payloads(&out.resources, ResourceType::Secret),
        };
        let policies = snapshot.extension_objects().cloned().collect::<Vec<_>>();
        let resources = hooks.translation(translated.clone(), &policies).await?;
        if resources == translated {
            return Ok(());
        }

        for (type_, current) in [
            (ResourceType::Cluster, &translated.clusters),
            (ResourceType::Secret, &translated.secrets),
        ] {
            for payload in current {
                out.resources.remove(type_, &payload.name);
            }
        }
        for (type_, replaced) in [
            (ResourceType::Cluster, resources.clusters),
            (ResourceType::Secret, resources.secrets),
        ] {
            for payload in replaced {
                out.resources.insert(type_, payload.name, payload.body);
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl<H: ExtensionHooks> Translate<ResourceSnapshot> for Translator<H> {
    async fn translate(&self, snapshot: &ResourceSnapshot) -> Translation {
        match self.build(snapshot).await {
            Ok(Output {
                resources,
                failures,
            }) if failures.is_empty() => Translation::ok(resources),
            Ok(Output {
                resources,
                failures,
            }) => Translation {
                resources: Some(resources),
                error: Some(TranslateError::Objects(failures)),
            },
            Err(error) => {
                tracing::warn!(group = %snapshot.group, %error, "Translation aborted");
                Translation::failed(error)
            }
        }
    }
}

fn payloads(resources: &Resources, type_: ResourceType) -> Vec<HookPayload> {
    resources
        .iter(type_)
        .map(|(name, body)| HookPayload {
            type_url: type_.type_url(),
            name: name.to_string(),
            body: body.to_vec(),
        })
        .collect()
}

fn runtime(snapshot: &ResourceSnapshot, out: &mut Output) {
    let spec = snapshot.proxy_config.as_ref().map(|pc| &pc.spec);
    let body = config::Runtime {
        group: &snapshot.group,
        controller: &snapshot.controller,
        log_level: spec.and_then(|s| s.log_level.as_deref()),
        concurrency: spec.and_then(|s| s.concurrency),
        drain_timeout: spec.and_then(|s| s.drain_timeout.as_deref()),
        extra_args: spec.and_then(|s| s.extra_args.as_deref()).unwrap_or_default(),
        gateways: snapshot
            .addresses
            .iter()
            .map(|(id, addrs)| config::GatewayAddresses {
                gateway: id.to_string(),
                addresses: addrs.as_slice(),
            })
            .collect(),
    };
    out.insert(ResourceType::Runtime, &snapshot.group, &body);
}

// === impl Output ===

impl Output {
    /// Encodes a body, recording a failure if it cannot be encoded.
    fn encode<T: Serialize>(&mut self, object: &dyn fmt::Display, body: &T) -> Option<Vec<u8>> {
        match serde_json::to_vec(body) {
            Ok(body) => Some(body),
            Err(error) => {
                self.fail(format!("{object}: {error}"));
                None
            }
        }
    }

    fn insert<T: Serialize>(&mut self, type_: ResourceType, name: &str, body: &T) {
        if let Some(body) = self.encode(&name, body) {
            self.resources.insert(type_, name, body);
        }
    }

    fn fail(&mut self, failure: String) {
        tracing::warn!(%failure, "Failed to translate object");
        self.failures.push(failure);
    }
}
