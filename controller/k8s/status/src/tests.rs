mod merge;
mod writer;

use crate::{
    client::{Error, StatusClient},
    status::{LiveObject, Status},
    writer::Lease,
    Metrics,
};
use chrono::{DateTime, Utc};
use kubert::lease::Claim;
use parking_lot::Mutex;
use std::{collections::BTreeMap, sync::Arc};
use switchyard_controller_k8s_api::{
    self as k8s,
    gateway::{ParentReference, RouteParentStatus, RouteStatus},
    Condition, ErrorResponse, Time,
};
use switchyard_controller_k8s_index::{DerivedStatus, ObjectId, ParentStatus, StatusKind};
use tokio::sync::watch;

const CONTROLLER: &str = "gateway.switchyard.io/gatewayclass-controller";
const OTHER: &str = "example.com/gateway-controller";
const CLAIMANT: &str = "switchyard-0";

/// An in-process stand-in for the orchestration API.
#[derive(Clone, Default)]
struct FakeClient(Arc<Mutex<FakeState>>);

#[derive(Default)]
struct FakeState {
    objects: BTreeMap<(StatusKind, ObjectId), LiveObject>,

    /// The number of upcoming writes that fail as though another writer got
    /// there first.
    conflicts: usize,

    /// When set, every write fails with this code.
    fail: Option<u16>,

    attempts: usize,
    writes: usize,
}

#[async_trait::async_trait]
impl StatusClient for FakeClient {
    async fn get(&self, kind: StatusKind, id: &ObjectId) -> Result<Option<LiveObject>, Error> {
        Ok(self.0.lock().objects.get(&(kind, id.clone())).cloned())
    }

    async fn write_status(
        &self,
        kind: StatusKind,
        id: &ObjectId,
        resource_version: Option<&str>,
        status: &Status,
    ) -> Result<(), Error> {
        self.write(kind, id, resource_version, |obj| {
            obj.status = Some(status.clone())
        })
    }

    async fn write_finalizers(
        &self,
        class: &str,
        resource_version: Option<&str>,
        finalizers: &[String],
    ) -> Result<(), Error> {
        let id = ObjectId::cluster(class);
        self.write(StatusKind::GatewayClass, &id, resource_version, |obj| {
            obj.finalizers = finalizers.to_vec()
        })
    }
}

impl FakeClient {
    fn insert(&self, kind: StatusKind, id: ObjectId, obj: LiveObject) {
        self.0.lock().objects.insert((kind, id), obj);
    }

    fn object(&self, kind: StatusKind, id: &ObjectId) -> Option<LiveObject> {
        self.0.lock().objects.get(&(kind, id.clone())).cloned()
    }

    fn write(
        &self,
        kind: StatusKind,
        id: &ObjectId,
        resource_version: Option<&str>,
        update: impl FnOnce(&mut LiveObject),
    ) -> Result<(), Error> {
        let state = &mut *self.0.lock();
        state.attempts += 1;
        if let Some(code) = state.fail {
            return Err(api_error(code));
        }
        let Some(obj) = state.objects.get_mut(&(kind, id.clone())) else {
            return Err(api_error(404));
        };
        if state.conflicts > 0 {
            state.conflicts -= 1;
            bump(obj);
            return Err(api_error(k8s::CONFLICT));
        }
        if obj.resource_version.as_deref() != resource_version {
            return Err(api_error(k8s::CONFLICT));
        }
        update(obj);
        bump(obj);
        state.writes += 1;
        Ok(())
    }

    fn set_conflicts(&self, n: usize) {
        self.0.lock().conflicts = n;
    }

    fn set_fail(&self, code: u16) {
        self.0.lock().fail = Some(code);
    }

    fn attempts(&self) -> usize {
        self.0.lock().attempts
    }

    fn writes(&self) -> usize {
        self.0.lock().writes
    }
}

fn bump(obj: &mut LiveObject) {
    let version = obj
        .resource_version
        .as_deref()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    obj.resource_version = Some((version + 1).to_string());
}

fn api_error(code: u16) -> Error {
    Error::Client(k8s::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("request failed with {code}"),
        reason: String::new(),
        code,
    }))
}

fn lease(holder: &str) -> (watch::Sender<Arc<Claim>>, Lease) {
    let (tx, rx) = watch::channel(mk_claim(holder));
    (tx, Lease::new(rx, CLAIMANT))
}

fn mk_claim(holder: &str) -> Arc<Claim> {
    Arc::new(Claim {
        holder: holder.to_string(),
        expiry: Utc::now() + chrono::Duration::seconds(30),
    })
}

fn mk_time(secs: i64) -> Time {
    Time(DateTime::<Utc>::from_timestamp(secs, 0).unwrap())
}

/// The time derivation leaves on conditions.
fn derived_time() -> Time {
    Time(DateTime::<Utc>::UNIX_EPOCH)
}

/// The time the writers stamp in tests.
fn written_time() -> Time {
    Time(DateTime::<Utc>::MIN_UTC)
}

fn mk_condition(type_: &str, ok: bool, reason: &str, time: Time) -> Condition {
    Condition {
        type_: type_.to_string(),
        status: if ok { "True" } else { "False" }.to_string(),
        reason: reason.to_string(),
        message: String::new(),
        observed_generation: Some(1),
        last_transition_time: time,
    }
}

fn accepted(ok: bool, time: Time) -> Condition {
    let reason = if ok { "Accepted" } else { "NotAllowedByListeners" };
    mk_condition("Accepted", ok, reason, time)
}

fn gateway_ref(name: &str) -> ParentReference {
    ParentReference {
        group: Some(k8s::gateway::GROUP.to_string()),
        kind: Some("Gateway".to_string()),
        namespace: Some("ns-0".to_string()),
        name: name.to_string(),
        section_name: None,
        port: None,
    }
}

fn parent_status(gateway: &str, ok: bool) -> ParentStatus {
    ParentStatus {
        parent_ref: gateway_ref(gateway),
        conditions: vec![accepted(ok, derived_time())],
    }
}

fn derived_parents(parents: Vec<ParentStatus>, superseded: Vec<ParentReference>) -> DerivedStatus {
    DerivedStatus::Parents {
        parents,
        superseded,
    }
}

fn route_entry(controller: &str, gateway: &str, conditions: Vec<Condition>) -> RouteParentStatus {
    RouteParentStatus {
        parent_ref: gateway_ref(gateway),
        controller_name: controller.to_string(),
        conditions,
    }
}

fn route_status(parents: Vec<RouteParentStatus>) -> Status {
    Status::Route(RouteStatus { parents })
}

fn live(resource_version: &str, status: Option<Status>) -> LiveObject {
    LiveObject {
        resource_version: Some(resource_version.to_string()),
        finalizers: Vec::new(),
        status,
    }
}

fn metrics() -> Metrics {
    Metrics::default()
}
