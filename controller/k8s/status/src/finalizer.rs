use crate::{
    client::{Error, StatusClient},
    metrics::{Metrics, UpdateResult},
    writer::{drive, retry_conflicts, timeout, Lease, Written},
};
use std::time::Duration;
use switchyard_controller_k8s_api::gateway::GATEWAY_CLASS_FINALIZER;
use switchyard_controller_k8s_index::{Finalizers, ObjectId, StatusKind};

const KIND: &str = "GatewayClassFinalizer";

/// Adds the Gateway finalizer to classes that have Gateways and removes it
/// from classes that no longer do.
pub struct FinalizerWriter<C> {
    client: C,
    finalizers: Finalizers,
    lease: Lease,
    timeout: Duration,
    metrics: Metrics,
}

impl<C: StatusClient> FinalizerWriter<C> {
    pub fn new(
        client: C,
        finalizers: Finalizers,
        lease: Lease,
        timeout: Duration,
        metrics: Metrics,
    ) -> Self {
        Self {
            client,
            finalizers,
            lease,
            timeout,
            metrics,
        }
    }

    pub async fn run(self, shutdown: drain::Watch) {
        let updates = self.finalizers.subscribe_all();
        drive(updates, self.lease.clone(), shutdown, |class, wanted| {
            self.write(class, wanted)
        })
        .await
    }

    pub(crate) async fn write(&self, class: String, wanted: bool) {
        let res = retry_conflicts(KIND, &self.metrics, || self.try_write(&class, wanted)).await;
        match res {
            Ok(Written::Updated) => {
                tracing::info!(%class, wanted, "Updated finalizer");
                self.metrics.record(KIND, UpdateResult::Success);
            }
            Ok(Written::Unchanged) => self.metrics.record(KIND, UpdateResult::NoAction),
            Ok(Written::NotFound) => tracing::debug!(%class, "GatewayClass not found"),
            Err(error) => {
                tracing::warn!(%class, %error, "Failed to update finalizer");
                self.metrics.record(KIND, UpdateResult::Error);
            }
        }
    }

    async fn try_write(&self, class: &str, wanted: bool) -> Result<Written, Error> {
        let id = ObjectId::cluster(class);
        let get = self.client.get(StatusKind::GatewayClass, &id);
        let Some(live) = timeout(self.timeout, get).await? else {
            return Ok(Written::NotFound);
        };

        let present = live.finalizers.iter().any(|f| f == GATEWAY_CLASS_FINALIZER);
        if present == wanted {
            return Ok(Written::Unchanged);
        }
        let mut finalizers = live.finalizers;
        if wanted {
            finalizers.push(GATEWAY_CLASS_FINALIZER.to_string());
        } else {
            finalizers.retain(|f| f != GATEWAY_CLASS_FINALIZER);
        }

        let write =
            self.client
                .write_finalizers(class, live.resource_version.as_deref(), &finalizers);
        match timeout(self.timeout, write).await {
            Ok(()) => Ok(Written::Updated),
            Err(error) if error.is_not_found() => Ok(Written::NotFound),
            Err(error) => Err(error),
        }
    }
}
