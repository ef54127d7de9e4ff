use crate::{
    authz::{IndexGrants, SnapshotGateways},
    core::{
        extension::{ExtensionHooks, NoHooks},
        SnapshotCache, Watchable, DEFAULT_CONTROLLER_NAME,
    },
    extensions,
    grpc::{
        self,
        auth::{AllowAll, Authorize, TokenReviewAuth},
        DeliveryMetrics, DeliveryServer, ExtensionConfig, ExtensionManager, GrpcTransport,
        HookMetrics, Prober, Readiness, ServerCredentials,
    },
    health,
    index::{self, queue, DerivedStatuses, Index, NodeAddresses, Reconciler, StatusKind},
    k8s::{self, gateway, labels::Selector, multicluster, policy, watcher},
    lease,
    pipeline::{PipelineMetrics, Pipelines},
    status::{self, FinalizerWriter, KubeStatusClient, StatusWriter},
    translate::Translator,
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "switchyard", about = "A Gateway API controller")]
pub struct Args {
    #[clap(
        long,
        default_value = "switchyard=info,warn",
        env = "SWITCHYARD_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// GatewayClass controller names to reconcile. May be repeated.
    #[clap(long = "controller-name", default_value = DEFAULT_CONTROLLER_NAME)]
    controller_names: Vec<String>,

    #[clap(long, default_value = "switchyard-system", env = "SWITCHYARD_NAMESPACE")]
    control_plane_namespace: String,

    /// The controller's Deployment, which owns the status write Lease.
    #[clap(long, default_value = "switchyard")]
    controller_deployment_name: String,

    #[clap(long, default_value = "cluster.local")]
    cluster_domain: String,

    /// When set, ReferenceGrants are honored only in namespaces whose labels
    /// match (`key=value,...`).
    #[clap(long)]
    namespace_selector: Option<Selector>,

    #[clap(long, default_value = "0.0.0.0:18000")]
    delivery_addr: SocketAddr,

    /// A directory holding `tls.crt`, `tls.key`, and the client CA `ca.crt`.
    #[clap(long, default_value = "/certs")]
    delivery_tls_dir: PathBuf,

    /// Serves delivery without TLS. For development only.
    #[clap(long)]
    delivery_plaintext: bool,

    #[clap(long, value_enum, default_value = "none")]
    delivery_auth: DeliveryAuth,

    /// The Service that fronts the delivery server. Proxy tokens must be
    /// issued for its cluster-local name.
    #[clap(long, default_value = "switchyard")]
    delivery_service_name: String,

    /// Restricts each proxy to groups with a Gateway in its service account's
    /// namespace. Requires `--delivery-auth=token-review`.
    #[clap(long)]
    gateway_namespace_mode: bool,

    /// A YAML file configuring the extension manager.
    #[clap(long)]
    extension_config: Option<PathBuf>,

    #[clap(long, default_value = "5000")]
    status_patch_timeout_ms: u64,

    #[clap(long, default_value = "4")]
    reconcile_concurrency: usize,

    #[clap(long, default_value = "0.0.0.0:8081")]
    health_addr: SocketAddr,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
enum DeliveryAuth {
    /// Transport security is the only check.
    None,
    /// Proxies present a service account token, validated by TokenReview.
    TokenReview,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            controller_names,
            control_plane_namespace,
            controller_deployment_name,
            cluster_domain,
            namespace_selector,
            delivery_addr,
            delivery_tls_dir,
            delivery_plaintext,
            delivery_auth,
            delivery_service_name,
            gateway_namespace_mode,
            extension_config,
            status_patch_timeout_ms,
            reconcile_concurrency,
            health_addr,
        } = self;

        if gateway_namespace_mode && delivery_auth != DeliveryAuth::TokenReview {
            bail!("--gateway-namespace-mode requires --delivery-auth=token-review");
        }

        let extension_config = extension_config
            .map(ExtensionConfig::load)
            .transpose()
            .context("failed to load extension config")?;

        // TLS material is re-read for every connection, but it must be usable
        // at startup.
        let credentials = if delivery_plaintext {
            None
        } else {
            let credentials = ServerCredentials::in_dir(&delivery_tls_dir);
            credentials
                .load()
                .context("failed to load delivery TLS credentials")?;
            Some(credentials)
        };

        let mut prom = <Registry>::default();
        let status_metrics = status::Metrics::register(prom.sub_registry_with_prefix("status"));
        let reconcile_metrics =
            index::Metrics::register(prom.sub_registry_with_prefix("controller"));
        let delivery_metrics =
            DeliveryMetrics::register(prom.sub_registry_with_prefix("delivery"));
        let hook_metrics = HookMetrics::register(prom.sub_registry_with_prefix("extension"));
        let pipeline_metrics =
            PipelineMetrics::register(prom.sub_registry_with_prefix("pipeline"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let hostname =
            std::env::var("HOSTNAME").context("failed to read the HOSTNAME environment variable")?;
        let claims = lease::init(
            &runtime,
            &control_plane_namespace,
            &controller_deployment_name,
            &hostname,
        )
        .await?;

        let (queue, worker) = queue::channel(reconcile_concurrency);
        let index = Index::shared(
            index::Config {
                controllers: controller_names,
                extension_kinds: extension_config
                    .as_ref()
                    .map(|c| c.resources.clone())
                    .unwrap_or_default(),
                extension_policy_kinds: extension_config
                    .as_ref()
                    .map(|c| c.policy_resources.clone())
                    .unwrap_or_default(),
                namespace_scope: namespace_selector,
            },
            NodeAddresses::default(),
            queue,
        );

        // Spawn resource watches.

        let classes = runtime.watch_all::<gateway::GatewayClass>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(index.clone(), classes).instrument(info_span!("gatewayclasses")),
        );

        let gateways = runtime.watch_all::<gateway::Gateway>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), gateways).instrument(info_span!("gateways")),
        );

        let http_routes = runtime.watch_all::<gateway::HttpRoute>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), http_routes)
                .instrument(info_span!("httproutes")),
        );

        let grpc_routes = runtime.watch_all::<gateway::GrpcRoute>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), grpc_routes)
                .instrument(info_span!("grpcroutes")),
        );

        let tls_routes = runtime.watch_all::<gateway::TlsRoute>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), tls_routes)
                .instrument(info_span!("tlsroutes")),
        );

        let tcp_routes = runtime.watch_all::<gateway::TcpRoute>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), tcp_routes)
                .instrument(info_span!("tcproutes")),
        );

        let grants = runtime.watch_all::<gateway::ReferenceGrant>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), grants)
                .instrument(info_span!("referencegrants")),
        );

        let backend_policies =
            runtime.watch_all::<policy::BackendTrafficPolicy>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), backend_policies)
                .instrument(info_span!("backendtrafficpolicies")),
        );

        let client_policies =
            runtime.watch_all::<policy::ClientTrafficPolicy>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), client_policies)
                .instrument(info_span!("clienttrafficpolicies")),
        );

        let security_policies =
            runtime.watch_all::<policy::SecurityPolicy>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), security_policies)
                .instrument(info_span!("securitypolicies")),
        );

        let proxy_configs = runtime.watch_all::<policy::ProxyConfig>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), proxy_configs)
                .instrument(info_span!("proxyconfigs")),
        );

        let namespaces = runtime.watch_all::<k8s::Namespace>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(index.clone(), namespaces).instrument(info_span!("namespaces")),
        );

        let nodes = runtime.watch_all::<k8s::Node>(watcher::Config::default());
        tokio::spawn(kubert::index::cluster(index.clone(), nodes).instrument(info_span!("nodes")));

        let services = runtime.watch_all::<k8s::Service>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), services).instrument(info_span!("services")),
        );

        let service_imports =
            runtime.watch_all::<multicluster::ServiceImport>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), service_imports)
                .instrument(info_span!("serviceimports")),
        );

        let endpoint_slices = runtime.watch_all::<k8s::EndpointSlice>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), endpoint_slices)
                .instrument(info_span!("endpointslices")),
        );

        let secrets = runtime.watch_all::<k8s::Secret>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), secrets).instrument(info_span!("secrets")),
        );

        let config_maps = runtime.watch_all::<k8s::ConfigMap>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), config_maps)
                .instrument(info_span!("configmaps")),
        );

        // Only managed data-plane Deployments are read.
        let deployments = runtime.watch_all::<k8s::Deployment>(
            watcher::Config::default().labels(k8s::labels::OWNING_GATEWAY_NAME),
        );
        tokio::spawn(
            kubert::index::namespaced(index.clone(), deployments)
                .instrument(info_span!("deployments")),
        );

        if let Some(config) = &extension_config {
            for kind in config.resources.iter().chain(&config.policy_resources) {
                let span = info_span!("extension", group = %kind.group, kind = %kind.kind);
                tokio::spawn(
                    extensions::watch(index.clone(), runtime.client(), kind.clone())
                        .instrument(span),
                );
            }
        }

        // Spawn the reconciler and the status writers that follow it.

        let snapshots = Arc::new(Watchable::new());
        let statuses = Arc::new(DerivedStatuses::default());
        let finalizers = Arc::new(Watchable::new());
        let reconciler = Arc::new(Reconciler::new(
            index.clone(),
            snapshots.clone(),
            statuses.clone(),
            finalizers.clone(),
            reconcile_metrics,
        ));
        tokio::spawn(
            worker
                .run(
                    move |controller| {
                        let reconciler = reconciler.clone();
                        async move { reconciler.reconcile(&controller) }
                    },
                    runtime.shutdown_handle(),
                )
                .instrument(info_span!("reconcile")),
        );

        let status_lease = status::Lease::new(claims, hostname);
        let status_client = KubeStatusClient::new(runtime.client());
        let patch_timeout = Duration::from_millis(status_patch_timeout_ms);
        for kind in StatusKind::ALL {
            let writer = StatusWriter::new(
                kind,
                status_client.clone(),
                statuses.clone(),
                status_lease.clone(),
                patch_timeout,
                status_metrics.clone(),
            );
            tokio::spawn(
                writer
                    .run(runtime.shutdown_handle())
                    .instrument(info_span!("status", %kind)),
            );
        }
        let finalizer_writer = FinalizerWriter::new(
            status_client,
            finalizers,
            status_lease,
            patch_timeout,
            status_metrics,
        );
        tokio::spawn(
            finalizer_writer
                .run(runtime.shutdown_handle())
                .instrument(info_span!("finalizers")),
        );

        // Translate snapshots into the bundles served to proxies.

        let hooks: Arc<dyn ExtensionHooks> = match extension_config {
            Some(config) => {
                let transport =
                    GrpcTransport::new(&config).context("failed to configure extension client")?;
                Arc::new(ExtensionManager::new(
                    config,
                    control_plane_namespace.clone(),
                    transport,
                    Arc::new(IndexGrants(index.clone())),
                    hook_metrics,
                ))
            }
            None => Arc::new(NoHooks),
        };
        let cache = SnapshotCache::shared();
        let pipelines = Pipelines::new(
            snapshots.clone(),
            cache.clone(),
            Arc::new(Translator::new(hooks)),
            pipeline_metrics,
        );
        tokio::spawn(
            pipelines
                .run(runtime.shutdown_handle())
                .instrument(info_span!("pipelines")),
        );

        // Serve delivery and readiness.

        let auth: Arc<dyn Authorize> = match delivery_auth {
            DeliveryAuth::None => Arc::new(AllowAll),
            DeliveryAuth::TokenReview => {
                let audience = grpc::auth::audience(
                    &delivery_service_name,
                    &control_plane_namespace,
                    &cluster_domain,
                );
                let auth = TokenReviewAuth::new(runtime.client(), audience);
                if gateway_namespace_mode {
                    Arc::new(auth.with_gateway_namespaces(SnapshotGateways(snapshots)))
                } else {
                    Arc::new(auth)
                }
            }
        };
        let listener = TcpListener::bind(delivery_addr)
            .await
            .with_context(|| format!("failed to bind {delivery_addr}"))?;
        info!(addr = %delivery_addr, tls = credentials.is_some(), "Delivery server listening");
        let server = DeliveryServer::new(cache, auth, delivery_metrics, runtime.shutdown_handle());
        tokio::spawn(
            {
                let credentials = credentials.clone();
                async move {
                    if let Err(error) = server.serve(listener, credentials).await {
                        tracing::error!(%error, "Delivery server failed");
                    }
                }
            }
            .instrument(info_span!("delivery", port = %delivery_addr.port())),
        );

        let readiness = Readiness::default();
        // The prober presents the server's own certificate as its identity.
        let server_name = grpc::auth::audience(
            &delivery_service_name,
            &control_plane_namespace,
            &cluster_domain,
        );
        let prober = Prober::new(
            delivery_addr,
            credentials.map(|c| (c.as_client(), server_name)),
            readiness.clone(),
        );
        tokio::spawn(
            prober
                .run(runtime.shutdown_handle())
                .instrument(info_span!("prober")),
        );

        let health = TcpListener::bind(health_addr)
            .await
            .with_context(|| format!("failed to bind {health_addr}"))?;
        tokio::spawn(
            health::serve(health, readiness, runtime.shutdown_handle())
                .instrument(info_span!("health")),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait for
        // the background tasks to complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
