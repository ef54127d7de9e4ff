mod policies;
mod triggers;

use crate::{
    index::{Config, Index, SharedIndex},
    nodes::NodeAddresses,
    object::{Kind, ObjectId},
    queue::Queue,
    reconcile::{Finalizers, Metrics, Reconciler, Snapshots},
    snapshot::ResourceSnapshot,
    status::{DerivedStatus, DerivedStatuses, StatusKey, StatusKind},
};
use chrono::{DateTime, Utc};
use switchyard_controller_core::Event;
use std::{collections::BTreeSet, sync::Arc};
use switchyard_controller_k8s_api::{
    gateway::{
        self, BackendRef, Gateway, GatewayClass, GatewayClassSpec, GatewaySpec, HttpRoute,
        HttpRouteRule, HttpRouteSpec, Listener, ParentReference, ReferenceGrant,
        ReferenceGrantFrom, ReferenceGrantSpec, ReferenceGrantTo,
    },
    Condition, Namespace, ObjectMeta, Service, Time,
};
use tokio::sync::mpsc;

const CONTROLLER: &str = "gateway.switchyard.io/gatewayclass-controller";

struct TestConfig {
    index: SharedIndex,
    reconciler: Reconciler,
    snapshots: Snapshots,
    statuses: Arc<DerivedStatuses>,
    finalizers: Finalizers,
    queue: mpsc::UnboundedReceiver<String>,
    _tracing: tracing::subscriber::DefaultGuard,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self::new(Config {
            controllers: vec![CONTROLLER.to_string()],
            ..Default::default()
        })
    }
}

impl TestConfig {
    fn new(config: Config) -> Self {
        let _tracing = Self::init_tracing();
        let (queue, rx) = Queue::unbounded();
        let index = Index::shared(config, NodeAddresses::default(), queue);
        {
            let mut idx = index.write();
            for kind in Kind::BUILTIN {
                idx.mark_synced(kind);
            }
        }

        let snapshots = Snapshots::default();
        let statuses = Arc::new(DerivedStatuses::default());
        let finalizers = Finalizers::default();
        let reconciler = Reconciler::new(
            index.clone(),
            snapshots.clone(),
            statuses.clone(),
            finalizers.clone(),
            Metrics::default(),
        );

        let mut test = Self {
            index,
            reconciler,
            snapshots,
            statuses,
            finalizers,
            queue: rx,
            _tracing,
        };
        test.enqueued();
        test
    }

    fn init_tracing() -> tracing::subscriber::DefaultGuard {
        tracing::subscriber::set_default(
            tracing_subscriber::fmt()
                .with_test_writer()
                .with_max_level(tracing::Level::TRACE)
                .finish(),
        )
    }

    fn reconcile(&self) {
        self.reconciler
            .reconcile(CONTROLLER)
            .expect("reconciliation must succeed");
    }

    fn snapshot(&self, group: &str) -> Option<Arc<ResourceSnapshot>> {
        self.snapshots.load(&group.to_string())
    }

    fn status(&self, kind: StatusKind, ns: &str, name: &str) -> Option<DerivedStatus> {
        self.statuses.get(kind).load(&StatusKey {
            controller: CONTROLLER.to_string(),
            id: ObjectId::new(ns, name),
        })
    }

    /// Drains the keys enqueued since the last call.
    fn enqueued(&mut self) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();
        while let Ok(key) = self.queue.try_recv() {
            keys.insert(key);
        }
        keys
    }
}

fn mk_meta(ns: Option<&str>, name: &str) -> ObjectMeta {
    ObjectMeta {
        namespace: ns.map(ToString::to_string),
        name: Some(name.to_string()),
        generation: Some(1),
        resource_version: Some("1".to_string()),
        ..Default::default()
    }
}

fn mk_time(secs: i64) -> Time {
    Time(DateTime::<Utc>::from_timestamp(secs, 0).expect("timestamp must be valid"))
}

fn mk_class(name: &str, controller: &str, created: i64) -> GatewayClass {
    let mut class = GatewayClass::new(
        name,
        GatewayClassSpec {
            controller_name: controller.to_string(),
            parameters_ref: None,
            description: None,
        },
    );
    class.metadata = ObjectMeta {
        creation_timestamp: Some(mk_time(created)),
        ..mk_meta(None, name)
    };
    class
}

fn mk_listener(name: &str, protocol: &str, port: i32, hostname: Option<&str>) -> Listener {
    Listener {
        name: name.to_string(),
        hostname: hostname.map(ToString::to_string),
        port,
        protocol: protocol.to_string(),
        tls: None,
        allowed_routes: None,
    }
}

fn mk_gateway(
    ns: &str,
    name: &str,
    class: &str,
    listeners: impl IntoIterator<Item = Listener>,
) -> Gateway {
    let mut gw = Gateway::new(
        name,
        GatewaySpec {
            gateway_class_name: class.to_string(),
            listeners: listeners.into_iter().collect(),
            addresses: None,
        },
    );
    gw.metadata = mk_meta(Some(ns), name);
    gw
}

fn mk_parent(ns: Option<&str>, name: &str, section: Option<&str>) -> ParentReference {
    ParentReference {
        namespace: ns.map(ToString::to_string),
        name: name.to_string(),
        section_name: section.map(ToString::to_string),
        ..Default::default()
    }
}

fn mk_backend(ns: Option<&str>, name: &str, port: i32) -> BackendRef {
    BackendRef {
        namespace: ns.map(ToString::to_string),
        name: name.to_string(),
        port: Some(port),
        ..Default::default()
    }
}

fn mk_http_route(
    ns: &str,
    name: &str,
    parents: impl IntoIterator<Item = ParentReference>,
    backends: impl IntoIterator<Item = BackendRef>,
) -> HttpRoute {
    let mut route = HttpRoute::new(
        name,
        HttpRouteSpec {
            parent_refs: Some(parents.into_iter().collect()),
            hostnames: None,
            rules: Some(vec![HttpRouteRule {
                backend_refs: Some(backends.into_iter().collect()),
                ..Default::default()
            }]),
        },
    );
    route.metadata = mk_meta(Some(ns), name);
    route
}

fn mk_service(ns: &str, name: &str) -> Service {
    Service {
        metadata: mk_meta(Some(ns), name),
        ..Default::default()
    }
}

fn mk_namespace(name: &str, labels: impl IntoIterator<Item = (&'static str, &'static str)>) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            labels: Some(
                labels
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..mk_meta(None, name)
        },
        ..Default::default()
    }
}

/// A grant in `ns` allowing `from_kind` objects in `from_ns` to reference
/// core-group objects of `to_kind`.
fn mk_grant(ns: &str, name: &str, from_kind: &str, from_ns: &str, to_kind: &str) -> ReferenceGrant {
    let mut grant = ReferenceGrant::new(
        name,
        ReferenceGrantSpec {
            from: vec![ReferenceGrantFrom {
                group: gateway::GROUP.to_string(),
                kind: from_kind.to_string(),
                namespace: from_ns.to_string(),
            }],
            to: vec![ReferenceGrantTo {
                group: String::new(),
                kind: to_kind.to_string(),
                name: None,
            }],
        },
    );
    grant.metadata = mk_meta(Some(ns), name);
    grant
}

/// Bumps an object's generation and resource version.
fn bump(meta: &mut ObjectMeta) {
    meta.generation = meta.generation.map(|g| g + 1);
    let version = meta
        .resource_version
        .as_deref()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    meta.resource_version = Some((version + 1).to_string());
}

fn conditions(status: &DerivedStatus) -> Vec<&Condition> {
    match status {
        DerivedStatus::GatewayClass(conditions) => conditions.iter().collect(),
        DerivedStatus::Gateway(status) => status.conditions.iter().flatten().collect(),
        DerivedStatus::Parents { parents, .. } => {
            parents.iter().flat_map(|p| &p.conditions).collect()
        }
    }
}

fn find_condition<'s>(status: &'s DerivedStatus, type_: &str) -> Option<&'s Condition> {
    conditions(status).into_iter().find(|c| c.type_ == type_)
}

/// A class `edge` with a Gateway `gw` in `ns-0` that admits HTTP routes from
/// all namespaces.
fn mk_edge(test: &TestConfig) {
    let mut listener = mk_listener("http", "HTTP", 80, None);
    listener.allowed_routes = Some(gateway::AllowedRoutes {
        namespaces: Some(gateway::RouteNamespaces {
            from: Some("All".to_string()),
            selector: None,
        }),
        kinds: None,
    });
    let mut idx = test.index.write();
    idx.apply_object(mk_class("edge", CONTROLLER, 100));
    idx.apply_object(mk_gateway("ns-0", "gw", "edge", [listener]));
}
