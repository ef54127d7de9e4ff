use crate::status::{api_resource, LiveObject, Status};
use std::time::Duration;
use switchyard_controller_k8s_api::{
    self as k8s, gateway::GatewayClass, Api, DynamicObject, Patch, PatchParams, Resource,
};
use switchyard_controller_k8s_index::{ObjectId, StatusKind};

const FIELD_MANAGER: &str = "switchyard-controller";

/// Reads and writes the objects whose status the controller maintains.
#[async_trait::async_trait]
pub trait StatusClient: Clone + Send + Sync + 'static {
    /// Fetches an object, returning `None` if it does not exist.
    async fn get(&self, kind: StatusKind, id: &ObjectId) -> Result<Option<LiveObject>, Error>;

    /// Writes an object's status. The write fails with a conflict if the
    /// object's resource version is no longer `resource_version`.
    async fn write_status(
        &self,
        kind: StatusKind,
        id: &ObjectId,
        resource_version: Option<&str>,
        status: &Status,
    ) -> Result<(), Error>;

    /// Replaces a GatewayClass's finalizers, with the same concurrency check as
    /// [`StatusClient::write_status`].
    async fn write_finalizers(
        &self,
        class: &str,
        resource_version: Option<&str>,
        finalizers: &[String],
    ) -> Result<(), Error>;
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Client(#[from] k8s::Error),

    #[error("failed to decode {kind} status: {source}")]
    Decode {
        kind: StatusKind,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode status: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("derived status does not apply to {0}")]
    Mismatch(StatusKind),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

/// Writes status through the orchestration API.
#[derive(Clone)]
pub struct KubeStatusClient {
    client: k8s::Client,
    params: PatchParams,
}

// === impl Error ===

impl Error {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Client(e) if k8s::is_conflict(e))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Client(e) if k8s::is_not_found(e))
    }
}

// === impl KubeStatusClient ===

impl KubeStatusClient {
    pub fn new(client: k8s::Client) -> Self {
        Self {
            client,
            params: PatchParams {
                field_manager: Some(FIELD_MANAGER.to_string()),
                ..Default::default()
            },
        }
    }

    fn api(&self, kind: StatusKind, namespace: &str) -> Api<DynamicObject> {
        let resource = api_resource(kind);
        if namespace.is_empty() {
            Api::all_with(self.client.clone(), &resource)
        } else {
            Api::namespaced_with(self.client.clone(), namespace, &resource)
        }
    }
}

#[async_trait::async_trait]
impl StatusClient for KubeStatusClient {
    async fn get(&self, kind: StatusKind, id: &ObjectId) -> Result<Option<LiveObject>, Error> {
        let Some(obj) = self.api(kind, &id.namespace).get_opt(&id.name).await? else {
            return Ok(None);
        };
        let status = match obj.data.get("status") {
            Some(value) if !value.is_null() => Some(
                Status::decode(kind, value.clone())
                    .map_err(|source| Error::Decode { kind, source })?,
            ),
            _ => None,
        };
        Ok(Some(LiveObject {
            resource_version: obj.metadata.resource_version,
            finalizers: obj.metadata.finalizers.unwrap_or_default(),
            status,
        }))
    }

    async fn write_status(
        &self,
        kind: StatusKind,
        id: &ObjectId,
        resource_version: Option<&str>,
        status: &Status,
    ) -> Result<(), Error> {
        let resource = api_resource(kind);
        let patch = serde_json::json!({
            "apiVersion": resource.api_version,
            "kind": resource.kind,
            "metadata": metadata(&id.name, resource_version),
            "status": status.encode().map_err(Error::Encode)?,
        });
        self.api(kind, &id.namespace)
            .patch_status(&id.name, &self.params, &Patch::Merge(patch))
            .await?;
        Ok(())
    }

    async fn write_finalizers(
        &self,
        class: &str,
        resource_version: Option<&str>,
        finalizers: &[String],
    ) -> Result<(), Error> {
        let mut metadata = metadata(class, resource_version);
        metadata["finalizers"] = serde_json::json!(finalizers);
        let patch = serde_json::json!({
            "apiVersion": GatewayClass::api_version(&()),
            "kind": GatewayClass::kind(&()),
            "metadata": metadata,
        });
        self.api(StatusKind::GatewayClass, "")
            .patch(class, &self.params, &Patch::Merge(patch))
            .await?;
        Ok(())
    }
}

/// Object metadata for a merge patch. Including the resource version makes the
/// API server reject the patch if the object has changed.
fn metadata(name: &str, resource_version: Option<&str>) -> serde_json::Value {
    let mut metadata = serde_json::json!({ "name": name });
    if let Some(rv) = resource_version {
        metadata["resourceVersion"] = rv.into();
    }
    metadata
}
