use switchyard_controller_core::extension::{
    ExtensionHooks, ExtensionObject, HookError, HookOutcome, HookPayload, HookPoint,
    ListenerContext, RouteContext, TranslationResources, VirtualHostContext,
};

/// Applies the fail-open policy to hook calls.
///
/// Each call yields the body to keep: the original when the hook is absent,
/// makes no change, or fails open; the replacement when it returns one; and
/// `None` when the hook removes the object. A failure is returned only when
/// hooks fail closed.
pub(crate) struct Hooks<'h, H: ?Sized> {
    hooks: &'h H,
}

impl<'h, H: ExtensionHooks + ?Sized> Hooks<'h, H> {
    pub(crate) fn new(hooks: &'h H) -> Self {
        Self { hooks }
    }

    pub(crate) async fn route(
        &self,
        route: HookPayload,
        ctx: &RouteContext,
    ) -> Result<Option<Vec<u8>>, HookError> {
        if !self.hooks.is_registered(HookPoint::Route) {
            return Ok(Some(route.body));
        }
        let res = self.hooks.post_route_modify(&route, ctx).await;
        self.resolve(HookPoint::Route, &route.name, route.body, res)
    }

    pub(crate) async fn virtual_host(
        &self,
        virtual_host: HookPayload,
        ctx: &VirtualHostContext,
    ) -> Result<Option<Vec<u8>>, HookError> {
        if !self.hooks.is_registered(HookPoint::VirtualHost) {
            return Ok(Some(virtual_host.body));
        }
        let res = self
            .hooks
            .post_virtual_host_modify(&virtual_host, ctx)
            .await;
        self.resolve(
            HookPoint::VirtualHost,
            &virtual_host.name,
            virtual_host.body,
            res,
        )
    }

    pub(crate) async fn listener(
        &self,
        listener: HookPayload,
        ctx: &ListenerContext,
    ) -> Result<Option<Vec<u8>>, HookError> {
        if !self.hooks.is_registered(HookPoint::Listener) {
            return Ok(Some(listener.body));
        }
        let res = self.hooks.post_listener_modify(&listener, ctx).await;
        self.resolve(HookPoint::Listener, &listener.name, listener.body, res)
    }

    /// Returns the clusters and secrets to publish.
    pub(crate) async fn translation(
        &self,
        resources: TranslationResources,
        policies: &[ExtensionObject],
    ) -> Result<TranslationResources, HookError> {
        if !self.hooks.is_registered(HookPoint::Translation) {
            return Ok(resources);
        }
        let point = HookPoint::Translation;
        let res = self
            .hooks
            .post_translation_insert(&resources, policies)
            .await
            .and_then(|replaced| match replaced {
                Some(r) if r.clusters.iter().chain(&r.secrets).all(|p| is_json(&p.body)) => {
                    Ok(Some(r))
                }
                Some(_) => Err(HookError::Malformed(point)),
                None => Ok(None),
            });
        match res {
            Ok(Some(replaced)) => {
                tracing::debug!(
                    clusters = replaced.clusters.len(),
                    secrets = replaced.secrets.len(),
                    "Extension replaced translated resources"
                );
                Ok(replaced)
            }
            Ok(None) => Ok(resources),
            Err(error) if self.hooks.fail_open() => {
                tracing::warn!(%error, "Extension hook failed; keeping translated resources");
                Ok(resources)
            }
            Err(error) => Err(error),
        }
    }

    fn resolve(
        &self,
        point: HookPoint,
        name: &str,
        original: Vec<u8>,
        res: Result<HookOutcome<Vec<u8>>, HookError>,
    ) -> Result<Option<Vec<u8>>, HookError> {
        let res = res.and_then(|outcome| match outcome {
            HookOutcome::Replaced(body) if !is_json(&body) => Err(HookError::Malformed(point)),
            outcome => Ok(outcome),
        });
        match res {
            Ok(HookOutcome::Unchanged) => Ok(Some(original)),
            Ok(HookOutcome::Replaced(body)) => {
                tracing::debug!(%point, %name, "Extension replaced resource");
                Ok(Some(body))
            }
            Ok(HookOutcome::Removed) => {
                tracing::debug!(%point, %name, "Extension removed resource");
                Ok(None)
            }
            Err(error) if self.hooks.fail_open() => {
                tracing::warn!(%point, %name, %error, "Extension hook failed; keeping resource");
                Ok(Some(original))
            }
            Err(error) => Err(error),
        }
    }
}

fn is_json(body: &[u8]) -> bool {
    serde_json::from_slice::<serde::de::IgnoredAny>(body).is_ok()
}
