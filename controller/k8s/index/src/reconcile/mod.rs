//! The resource-graph reconciler.
//!
//! A pass runs for one controller name. It selects the controller's accepted
//! GatewayClass, walks everything attached to it, and publishes:
//!
//! - the group's [`ResourceSnapshot`] (the group is named by the class);
//! - derived status for every object it evaluated;
//! - whether the class should carry the Gateway finalizer.
//!
//! Passes read only the index, so they never block on the API server. A pass
//! fails only when the index has not finished its initial sync.

mod classes;
mod gateways;
mod policies;
mod routes;

use crate::{
    index::{Error, Index, SharedIndex},
    mapping::RouteBackends,
    object::{Kind, ObjectId, ObjectRef},
    snapshot::ResourceSnapshot,
    status::{DerivedStatus, DerivedStatuses, ParentStatus, StatusKey, StatusKind},
};
use ahash::AHashMap as HashMap;
use parking_lot::Mutex;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};
use switchyard_controller_core::Watchable;
use switchyard_controller_k8s_api::gateway::ParentReference;

pub type Snapshots = Arc<Watchable<String, Arc<ResourceSnapshot>>>;

/// Whether each class should carry the Gateway finalizer.
pub type Finalizers = Arc<Watchable<String, bool>>;

pub struct Reconciler {
    index: SharedIndex,
    snapshots: Snapshots,
    statuses: Arc<DerivedStatuses>,
    finalizers: Finalizers,
    mapping: RouteBackends,

    /// The group each controller last published.
    groups: Mutex<HashMap<String, String>>,

    /// The class each controller last finalized.
    finalized: Mutex<HashMap<String, String>>,

    metrics: Metrics,
}

#[derive(Clone, Debug, Default)]
pub struct Metrics {
    passes: Family<ResultLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ResultLabels {
    result: &'static str,
}

/// What a pass derived, before it is published.
#[derive(Debug, Default)]
struct Outcome {
    snapshot: Option<ResourceSnapshot>,

    /// The accepted class and whether it should carry the finalizer.
    finalizer: Option<(String, bool)>,

    statuses: BTreeMap<(StatusKind, ObjectId), DerivedStatus>,

    /// Every object the pass read.
    members: BTreeSet<ObjectRef>,
}

/// Builds the snapshot for an accepted class.
struct Pass<'a> {
    index: &'a Index,
    controller: &'a str,
    mapping: &'a RouteBackends,
    out: &'a mut Outcome,
    snapshot: ResourceSnapshot,

    listeners: BTreeMap<ObjectId, Vec<gateways::ListenerState>>,
    /// Whether each Gateway has an available managed Deployment.
    available: BTreeMap<ObjectId, bool>,
    /// The parents that accepted each route in the snapshot.
    route_parents: BTreeMap<ObjectRef, Vec<ParentReference>>,
}

// === impl Reconciler ===

impl Reconciler {
    pub fn new(
        index: SharedIndex,
        snapshots: Snapshots,
        statuses: Arc<DerivedStatuses>,
        finalizers: Finalizers,
        metrics: Metrics,
    ) -> Self {
        Self {
            index,
            snapshots,
            statuses,
            finalizers,
            mapping: RouteBackends::default(),
            groups: Mutex::default(),
            finalized: Mutex::default(),
            metrics,
        }
    }

    pub fn reconcile(&self, controller: &str) -> Result<(), Error> {
        let res = self.try_reconcile(controller);
        let result = if res.is_ok() { "ok" } else { "error" };
        self.metrics
            .passes
            .get_or_create(&ResultLabels { result })
            .inc();
        res
    }

    fn try_reconcile(&self, controller: &str) -> Result<(), Error> {
        let members = {
            let index = self.index.read();
            index.check_synced()?;

            let mut out = Outcome::default();
            if let Some(snapshot) = classes::accept(&index, controller, &mut out) {
                let snapshot =
                    Pass::new(&index, controller, &self.mapping, &mut out, snapshot).run();
                out.snapshot = Some(snapshot);
            }

            self.publish_statuses(&index, controller, std::mem::take(&mut out.statuses));
            self.publish_finalizer(controller, out.finalizer.take());
            self.publish_snapshot(controller, out.snapshot.take());
            out.members
        };

        self.index.write().record_members(controller, members);
        Ok(())
    }

    fn publish_finalizer(&self, controller: &str, finalizer: Option<(String, bool)>) {
        let mut classes = self.finalized.lock();
        let next = finalizer.as_ref().map(|(class, _)| class);
        if let Some(prior) = classes.get(controller) {
            if Some(prior) != next {
                // The class is no longer accepted by this controller.
                self.finalizers.store_if_changed(prior.clone(), false);
            }
        }
        match finalizer {
            Some((class, wanted)) => {
                if self.finalizers.store_if_changed(class.clone(), wanted) {
                    tracing::debug!(%controller, %class, wanted, "Updated finalizer");
                }
                classes.insert(controller.to_string(), class);
            }
            None => {
                classes.remove(controller);
            }
        }
    }

    fn publish_snapshot(&self, controller: &str, snapshot: Option<ResourceSnapshot>) {
        let mut groups = self.groups.lock();
        let next = snapshot.as_ref().map(|s| s.group.clone());
        if let Some(prior) = groups.get(controller).cloned() {
            if Some(&prior) != next.as_ref() {
                tracing::info!(%controller, group = %prior, "Removing group");
                self.snapshots.delete(&prior);
                self.mapping.remove_group(&prior);
                groups.remove(controller);
            }
        }

        let Some(snapshot) = snapshot else {
            return;
        };
        let group = snapshot.group.clone();
        groups.insert(controller.to_string(), group.clone());
        if self
            .snapshots
            .store_if_changed(group.clone(), Arc::new(snapshot))
        {
            tracing::info!(%controller, %group, "Updated snapshot");
        } else {
            tracing::debug!(%controller, %group, "Snapshot unchanged");
        }
    }

    fn publish_statuses(
        &self,
        index: &Index,
        controller: &str,
        derived: BTreeMap<(StatusKind, ObjectId), DerivedStatus>,
    ) {
        for kind in StatusKind::ALL {
            let store = self.statuses.get(kind);

            // Objects this controller reported on before but not in this pass.
            for key in store.keys() {
                if key.controller != controller || derived.contains_key(&(kind, key.id.clone())) {
                    continue;
                }
                let prior = store.load(&key);
                match prior {
                    Some(prior @ DerivedStatus::Parents { .. }) if exists(index, kind, &key.id) => {
                        let next = supersede(
                            Some(&prior),
                            DerivedStatus::Parents {
                                parents: Vec::new(),
                                superseded: Vec::new(),
                            },
                        );
                        store.store_if_changed(key, next);
                    }
                    _ => {
                        store.delete(&key);
                    }
                }
            }
        }

        for ((kind, id), status) in derived {
            let store = self.statuses.get(kind);
            let key = StatusKey {
                controller: controller.to_string(),
                id,
            };
            let next = supersede(store.load(&key).as_ref(), status);
            if store.store_if_changed(key.clone(), next) {
                tracing::debug!(%kind, id = %key.id, "Derived status changed");
            }
        }
    }
}

/// Marks parents reported by the prior pass but absent now as superseded.
/// Writers carry these forward across statuses they skip.
fn supersede(prior: Option<&DerivedStatus>, next: DerivedStatus) -> DerivedStatus {
    let DerivedStatus::Parents { parents, .. } = next else {
        return next;
    };
    let current = parents
        .iter()
        .map(|p| &p.parent_ref)
        .collect::<BTreeSet<_>>();
    let superseded = prior
        .into_iter()
        .flat_map(|status| status.parents().iter().map(|p| &p.parent_ref))
        .filter(|p| !current.contains(p))
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    DerivedStatus::Parents {
        parents,
        superseded,
    }
}

fn exists(index: &Index, kind: StatusKind, id: &ObjectId) -> bool {
    let objs = index.objects();
    match kind {
        StatusKind::GatewayClass => objs.classes.contains_key(id),
        StatusKind::Gateway => objs.gateways.contains_key(id),
        StatusKind::HttpRoute => objs.http_routes.contains_key(id),
        StatusKind::GrpcRoute => objs.grpc_routes.contains_key(id),
        StatusKind::TlsRoute => objs.tls_routes.contains_key(id),
        StatusKind::TcpRoute => objs.tcp_routes.contains_key(id),
        StatusKind::BackendTrafficPolicy => objs.backend_traffic_policies.contains_key(id),
        StatusKind::ClientTrafficPolicy => objs.client_traffic_policies.contains_key(id),
        StatusKind::SecurityPolicy => objs.security_policies.contains_key(id),
    }
}

// === impl Metrics ===

impl Metrics {
    pub fn register(reg: &mut Registry) -> Self {
        let passes = Family::default();
        reg.register(
            "reconcile",
            "Count of reconciliation passes by result",
            passes.clone(),
        );
        Self { passes }
    }
}

// === impl Outcome ===

impl Outcome {
    fn derive(&mut self, kind: StatusKind, id: ObjectId, status: DerivedStatus) {
        self.statuses.insert((kind, id), status);
    }

    fn derive_parents(&mut self, kind: StatusKind, id: ObjectId, parents: Vec<ParentStatus>) {
        self.derive(
            kind,
            id,
            DerivedStatus::Parents {
                parents,
                superseded: Vec::new(),
            },
        );
    }

    fn touch(&mut self, kind: Kind, id: &ObjectId) {
        self.members.insert(ObjectRef {
            kind,
            id: id.clone(),
        });
    }
}

// === impl Pass ===

impl<'a> Pass<'a> {
    fn new(
        index: &'a Index,
        controller: &'a str,
        mapping: &'a RouteBackends,
        out: &'a mut Outcome,
        snapshot: ResourceSnapshot,
    ) -> Self {
        Self {
            index,
            controller,
            mapping,
            out,
            snapshot,
            listeners: BTreeMap::new(),
            available: BTreeMap::new(),
            route_parents: BTreeMap::new(),
        }
    }

    fn run(mut self) -> ResourceSnapshot {
        self.gateways();
        self.routes();
        self.backends();
        self.policies();
        self.extension_policies();
        self.gateway_statuses();
        tracing::debug!(
            controller = %self.controller,
            group = %self.snapshot.group,
            gateways = self.snapshot.gateways.len(),
            dropped = self.snapshot.dropped.len(),
            "Built snapshot",
        );
        self.snapshot
    }
}
