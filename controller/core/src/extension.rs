use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

/// Points during translation at which an extension may modify the output.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub enum HookPoint {
    Route,
    VirtualHost,
    Listener,
    Translation,
}

/// Describes an extension-owned resource kind that is not known at compile
/// time.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub struct ExtensionKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

/// An extension-owned object. The payload is carried through the pipeline
/// without interpretation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtensionObject {
    pub kind: ExtensionKind,
    pub namespace: Option<String>,
    pub name: String,
    pub json: Vec<u8>,
}

/// An encoded object passed to a hook.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HookPayload {
    pub type_url: &'static str,
    pub name: String,
    pub body: Vec<u8>,
}

/// The result of a hook call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HookOutcome<T> {
    Unchanged,
    Replaced(T),
    Removed,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteContext {
    pub hostnames: Vec<String>,
    pub extension_resources: Vec<ExtensionObject>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VirtualHostContext {
    pub listener: String,
    pub hostname: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListenerContext {
    pub extension_resources: Vec<ExtensionObject>,
}

/// The resources offered to the final translation hook.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TranslationResources {
    pub clusters: Vec<HookPayload>,
    pub secrets: Vec<HookPayload>,
}

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("{0} hook timed out")]
    Timeout(HookPoint),

    #[error("{point} hook failed: {message}")]
    Failed { point: HookPoint, message: String },

    #[error("{0} hook endpoint is not permitted by a ReferenceGrant")]
    NotPermitted(HookPoint),

    #[error("{0} hook returned a malformed response")]
    Malformed(HookPoint),
}

/// Calls out-of-process extensions at hook points.
#[async_trait::async_trait]
pub trait ExtensionHooks: Send + Sync {
    /// Returns true if a hook is configured for `point`.
    fn is_registered(&self, point: HookPoint) -> bool;

    /// When true, a failed hook leaves its input unchanged. When false, the
    /// failure aborts translation.
    fn fail_open(&self) -> bool;

    async fn post_route_modify(
        &self,
        route: &HookPayload,
        ctx: &RouteContext,
    ) -> Result<HookOutcome<Vec<u8>>, HookError>;

    async fn post_virtual_host_modify(
        &self,
        virtual_host: &HookPayload,
        ctx: &VirtualHostContext,
    ) -> Result<HookOutcome<Vec<u8>>, HookError>;

    async fn post_listener_modify(
        &self,
        listener: &HookPayload,
        ctx: &ListenerContext,
    ) -> Result<HookOutcome<Vec<u8>>, HookError>;

    /// Returns `None` when the extension makes no change.
    async fn post_translation_insert(
        &self,
        resources: &TranslationResources,
        policies: &[ExtensionObject],
    ) -> Result<Option<TranslationResources>, HookError>;
}

#[async_trait::async_trait]
impl<H: ExtensionHooks + ?Sized> ExtensionHooks for Arc<H> {
    fn is_registered(&self, point: HookPoint) -> bool {
        (**self).is_registered(point)
    }

    fn fail_open(&self) -> bool {
        (**self).fail_open()
    }

    async fn post_route_modify(
        &self,
        route: &HookPayload,
        ctx: &RouteContext,
    ) -> Result<HookOutcome<Vec<u8>>, HookError> {
        (**self).post_route_modify(route, ctx).await
    }

    async fn post_virtual_host_modify(
        &self,
        virtual_host: &HookPayload,
        ctx: &VirtualHostContext,
    ) -> Result<HookOutcome<Vec<u8>>, HookError> {
        (**self).post_virtual_host_modify(virtual_host, ctx).await
    }

    async fn post_listener_modify(
        &self,
        listener: &HookPayload,
        ctx: &ListenerContext,
    ) -> Result<HookOutcome<Vec<u8>>, HookError> {
        (**self).post_listener_modify(listener, ctx).await
    }

    async fn post_translation_insert(
        &self,
        resources: &TranslationResources,
        policies: &[ExtensionObject],
    ) -> Result<Option<TranslationResources>, HookError> {
        (**self).post_translation_insert(resources, policies).await
    }
}

// === impl HookPoint ===

impl HookPoint {
    pub const ALL: [Self; 4] = [
        Self::Route,
        Self::VirtualHost,
        Self::Listener,
        Self::Translation,
    ];
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Route => "PostRouteModify".fmt(f),
            Self::VirtualHost => "PostVirtualHostModify".fmt(f),
            Self::Listener => "PostListenerModify".fmt(f),
            Self::Translation => "PostTranslationInsert".fmt(f),
        }
    }
}

// === impl ExtensionKind ===

impl ExtensionKind {
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Matches a reference that names only a group and kind.
    pub fn matches(&self, group: &str, kind: &str) -> bool {
        self.group == group && self.kind == kind
    }
}

impl fmt::Display for ExtensionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}/{}", self.kind, self.group, self.version)
    }
}

/// Hooks used when no extension manager is configured.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoHooks;

#[async_trait::async_trait]
impl ExtensionHooks for NoHooks {
    fn is_registered(&self, _: HookPoint) -> bool {
        false
    }

    fn fail_open(&self) -> bool {
        true
    }

    async fn post_route_modify(
        &self,
        _: &HookPayload,
        _: &RouteContext,
    ) -> Result<HookOutcome<Vec<u8>>, HookError> {
        Ok(HookOutcome::Unchanged)
    }

    async fn post_virtual_host_modify(
        &self,
        _: &HookPayload,
        _: &VirtualHostContext,
    ) -> Result<HookOutcome<Vec<u8>>, HookError> {
        Ok(HookOutcome::Unchanged)
    }

    async fn post_listener_modify(
        &self,
        _: &HookPayload,
        _: &ListenerContext,
    ) -> Result<HookOutcome<Vec<u8>>, HookError> {
        Ok(HookOutcome::Unchanged)
    }

    async fn post_translation_insert(
        &self,
        _: &TranslationResources,
        _: &[ExtensionObject],
    ) -> Result<Option<TranslationResources>, HookError> {
        Ok(None)
    }
}
