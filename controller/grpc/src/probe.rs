//! Readiness probing of the delivery server.
//!
//! The prober dials the local delivery port the way a proxy would and asks for
//! the probe group. The process is ready while the last probe succeeded.

use crate::{delivery::PROBE_GROUP, tls};
use futures::prelude::*;
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use switchyard_controller_core::ResourceType;
use switchyard_proxy_api::delivery::{self as api, resource_discovery_client::ResourceDiscoveryClient};
use tokio::time;
use tonic::transport::{Channel, Endpoint};

pub const PROBE_INTERVAL: Duration = Duration::from_secs(10);

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared readiness state.
#[derive(Clone, Debug, Default)]
pub struct Readiness(Arc<AtomicBool>);

#[derive(Clone, Debug)]
pub struct Prober {
    uri: String,
    tls: Option<(tls::ClientCredentials, String)>,
    readiness: Readiness,
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("failed to connect: {0}")]
    Connect(#[from] tonic::transport::Error),

    #[error(transparent)]
    Tls(#[from] tls::Error),

    #[error("probe failed: {0}")]
    Status(#[from] tonic::Status),

    #[error("stream ended without a response")]
    NoResponse,

    #[error("probe timed out")]
    Timeout,
}

// === impl Readiness ===

impl Readiness {
    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn set(&self, ready: bool) -> bool {
        self.0.swap(ready, Ordering::AcqRel)
    }
}

// === impl Prober ===

impl Prober {
    /// Probes the delivery server on `addr`. With TLS, the prober presents
    /// the client identity and expects the server to be named `server_name`.
    pub fn new(
        addr: SocketAddr,
        tls: Option<(tls::ClientCredentials, String)>,
        readiness: Readiness,
    ) -> Self {
        let ip = addr.ip();
        let host = if ip.is_unspecified() {
            if ip.is_ipv4() {
                "127.0.0.1".to_string()
            } else {
                "[::1]".to_string()
            }
        } else if ip.is_ipv6() {
            format!("[{ip}]")
        } else {
            ip.to_string()
        };
        Self {
            uri: format!("http://{host}:{}", addr.port()),
            tls,
            readiness,
        }
    }

    /// Probes every interval until shutdown.
    pub async fn run(self, drain: drain::Watch) {
        let mut interval = time::interval(PROBE_INTERVAL);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        tokio::pin! {
            let shutdown = drain.signaled();
        }
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = &mut shutdown => return,
            }
            self.probe_and_record().await;
        }
    }

    async fn probe_and_record(&self) {
        match self.probe().await {
            Ok(()) => {
                if !self.readiness.set(true) {
                    tracing::info!("Delivery server is ready");
                }
            }
            Err(error) => {
                if self.readiness.set(false) {
                    tracing::warn!(%error, "Delivery server is not ready");
                } else {
                    tracing::debug!(%error, "Delivery probe failed");
                }
            }
        }
    }

    pub async fn probe(&self) -> Result<(), ProbeError> {
        time::timeout(PROBE_TIMEOUT, self.try_probe())
            .await
            .map_err(|_| ProbeError::Timeout)?
    }

    async fn try_probe(&self) -> Result<(), ProbeError> {
        let channel = self.connect().await?;
        let req = api::DiscoveryRequest {
            node: Some(api::Node {
                id: "switchyard-prober".to_string(),
                group: PROBE_GROUP.to_string(),
                ..Default::default()
            }),
            type_url: ResourceType::Listener.type_url().to_string(),
            ..Default::default()
        };
        let mut rsps = ResourceDiscoveryClient::new(channel)
            .stream_resources(stream::iter([req]))
            .await?
            .into_inner();
        rsps.message().await?.ok_or(ProbeError::NoResponse)?;
        Ok(())
    }

    async fn connect(&self) -> Result<Channel, ProbeError> {
        let endpoint = Endpoint::from_shared(self.uri.clone())?.connect_timeout(PROBE_TIMEOUT);
        let channel = match &self.tls {
            None => endpoint.connect().await?,
            Some((creds, server_name)) => {
                // Material is reloaded for every probe.
                let connector = creds.connector(server_name)?;
                endpoint.connect_with_connector(connector).await?
            }
        };
        Ok(channel)
    }
}
