use crate::{
    client::{Error, StatusClient},
    merge,
    metrics::{Metrics, UpdateResult},
    status::Status,
};
use chrono::Utc;
use futures::prelude::*;
use kubert::lease::Claim;
use rand::Rng;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    time::Duration,
};
use switchyard_controller_core::{Event, Subscription};
use switchyard_controller_k8s_api::Time;
use switchyard_controller_k8s_index::{
    DerivedStatus, DerivedStatuses, ObjectId, StatusKey, StatusKind,
};
use tokio::{sync::watch, time};

/// Writes one kind's derived status to the orchestration API.
pub struct StatusWriter<C> {
    kind: StatusKind,
    client: C,
    statuses: Arc<DerivedStatuses>,
    lease: Lease,
    timeout: Duration,
    metrics: Metrics,
}

/// Tracks whether this replica holds the write lease.
#[derive(Clone, Debug)]
pub struct Lease {
    claims: watch::Receiver<Arc<Claim>>,
    claimant: Arc<str>,
}

/// A value queued for writing that can replace an unwritten predecessor.
pub(crate) trait Coalesce {
    /// Combines the value with the one it replaces before that one was
    /// written.
    fn coalesce(self, unwritten: Self) -> Self;
}

/// What a single write attempt did.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Written {
    Updated,
    Unchanged,
    NotFound,
}

const ATTEMPTS: u32 = 4;
const BACKOFF_BASE: Duration = Duration::from_millis(10);
const BACKOFF_FACTOR: u32 = 5;
const JITTER: f64 = 0.1;

// === impl StatusWriter ===

impl<C: StatusClient> StatusWriter<C> {
    pub fn new(
        kind: StatusKind,
        client: C,
        statuses: Arc<DerivedStatuses>,
        lease: Lease,
        timeout: Duration,
        metrics: Metrics,
    ) -> Self {
        Self {
            kind,
            client,
            statuses,
            lease,
            timeout,
            metrics,
        }
    }

    /// Writes status as it is derived. Runs until shutdown is signaled,
    /// abandoning any write in progress.
    pub async fn run(self, shutdown: drain::Watch) {
        let updates = self.statuses.get(self.kind).subscribe_all();
        drive(updates, self.lease.clone(), shutdown, |key, status| {
            self.write(key, status)
        })
        .await
    }

    pub(crate) async fn write(&self, key: StatusKey, derived: DerivedStatus) {
        let kind = self.kind.as_str();
        let StatusKey { controller, id } = &key;
        let res = retry_conflicts(kind, &self.metrics, || {
            self.try_write(controller, id, &derived)
        })
        .await;
        match res {
            Ok(Written::Updated) => {
                tracing::debug!(%kind, %id, %controller, "Updated status");
                self.metrics.record(kind, UpdateResult::Success);
            }
            Ok(Written::Unchanged) => {
                tracing::debug!(%kind, %id, %controller, "Status unchanged");
                self.metrics.record(kind, UpdateResult::NoAction);
            }
            Ok(Written::NotFound) => {
                tracing::debug!(%kind, %id, "Object not found; skipping status");
            }
            Err(error) => {
                tracing::warn!(%kind, namespace = %id.namespace, name = %id.name, %error, "Failed to update status");
                self.metrics.record(kind, UpdateResult::Error);
            }
        }
    }

    async fn try_write(
        &self,
        controller: &str,
        id: &ObjectId,
        derived: &DerivedStatus,
    ) -> Result<Written, Error> {
        let Some(live) = timeout(self.timeout, self.client.get(self.kind, id)).await? else {
            return Ok(Written::NotFound);
        };
        let current = live.status.unwrap_or_else(|| Status::empty(self.kind));
        let merged = merge::merge(controller, current.clone(), derived, &now())
            .ok_or(Error::Mismatch(self.kind))?;
        if merge::is_same(&current, &merged) {
            return Ok(Written::Unchanged);
        }

        let write = self.client.write_status(
            self.kind,
            id,
            live.resource_version.as_deref(),
            &merged,
        );
        match timeout(self.timeout, write).await {
            Ok(()) => Ok(Written::Updated),
            Err(error) if error.is_not_found() => Ok(Written::NotFound),
            Err(error) => Err(error),
        }
    }
}

// === impl Lease ===

impl Lease {
    pub fn new(claims: watch::Receiver<Arc<Claim>>, claimant: impl Into<Arc<str>>) -> Self {
        Self {
            claims,
            claimant: claimant.into(),
        }
    }

    pub fn is_held(&self) -> bool {
        self.claims.borrow().is_current_for(&self.claimant)
    }

    async fn changed(&mut self) -> Result<(), watch::error::RecvError> {
        self.claims.changed().await
    }
}

/// Feeds a store's updates to `write` while the lease is held.
///
/// Only the latest value of each key is kept. Values that arrive without the
/// lease are written once it is acquired.
pub(crate) async fn drive<K, V, F, Fut>(
    mut updates: Subscription<K, V>,
    mut lease: Lease,
    shutdown: drain::Watch,
    mut write: F,
) where
    K: Ord,
    V: Coalesce,
    F: FnMut(K, V) -> Fut,
    Fut: Future<Output = ()>,
{
    let shutdown = shutdown.signaled();
    tokio::pin!(shutdown);
    let mut pending = BTreeMap::new();

    loop {
        while let Some(event) = updates.try_recv() {
            record(&mut pending, event);
        }

        if lease.is_held() {
            if let Some((key, value)) = pending.pop_first() {
                tokio::select! {
                    biased;
                    release = &mut shutdown => {
                        drop(release);
                        return;
                    }
                    () = write(key, value) => {}
                }
                continue;
            }
        }

        tokio::select! {
            biased;
            release = &mut shutdown => {
                drop(release);
                return;
            }
            res = lease.changed() => {
                if res.is_err() {
                    tracing::warn!("Lease claims closed; no longer writing");
                    return;
                }
                tracing::debug!(held = lease.is_held(), "Lease changed");
            }
            event = updates.next() => match event {
                Some(event) => record(&mut pending, event),
                None => return,
            },
        }
    }
}

fn record<K: Ord, V: Coalesce>(pending: &mut BTreeMap<K, V>, event: Event<K, V>) {
    match event {
        Event::Stored(key, value) => {
            let value = match pending.remove(&key) {
                Some(unwritten) => value.coalesce(unwritten),
                None => value,
            };
            pending.insert(key, value);
        }
        Event::Deleted(key) => {
            pending.remove(&key);
        }
    }
}

// === impl Coalesce ===

impl Coalesce for bool {
    fn coalesce(self, _: Self) -> Self {
        self
    }
}

/// Parents that the unwritten status reported or superseded stay superseded,
/// so that their entries are still removed.
impl Coalesce for DerivedStatus {
    fn coalesce(self, unwritten: Self) -> Self {
        let DerivedStatus::Parents {
            parents,
            superseded,
        } = self
        else {
            return self;
        };
        let current = parents
            .iter()
            .map(|p| &p.parent_ref)
            .collect::<BTreeSet<_>>();
        let superseded = superseded
            .iter()
            .chain(unwritten.parents().iter().map(|p| &p.parent_ref))
            .chain(unwritten.superseded())
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
}

/// Runs `op` until it succeeds, fails with anything but a conflict, or
/// exhausts its attempts. Every conflict is counted.
pub(crate) async fn retry_conflicts<T, F, Fut>(
    kind: &'static str,
    metrics: &Metrics,
    mut op: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(error) if error.is_conflict() => {
                metrics.record(kind, UpdateResult::Conflict);
                attempt += 1;
                if attempt == ATTEMPTS {
                    return Err(error);
                }
                let delay = backoff(attempt - 1);
                tracing::debug!(%kind, attempt, ?delay, "Write conflicted; retrying");
                time::sleep(delay).await;
            }
            res => return res,
        }
    }
}

fn backoff(attempt: u32) -> Duration {
    let base = BACKOFF_BASE * BACKOFF_FACTOR.pow(attempt);
    let jitter = rand::thread_rng().gen_range(1.0 - JITTER..=1.0 + JITTER);
    base.mul_f64(jitter)
}

pub(crate) async fn timeout<T>(
    limit: Duration,
    fut: impl Future<Output = Result<T, Error>>,
) -> Result<T, Error> {
    time::timeout(limit, fut)
        .await
        .map_err(|_| Error::Timeout(limit))?
}

pub(crate) fn now() -> Time {
    #[cfg(not(test))]
    let timestamp = Utc::now();
    #[cfg(test)]
    let timestamp = chrono::DateTime::<Utc>::MIN_UTC;
    Time(timestamp)
}
