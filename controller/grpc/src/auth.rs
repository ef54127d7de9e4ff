//! Proxy authentication for the delivery server.

use switchyard_controller_k8s_api::{
    Api, Client, PostParams, TokenReview, TokenReviewSpec, TokenReviewStatus,
};
use tonic::{metadata::MetadataMap, Status};

/// Decides whether a stream may receive a group's configuration.
#[async_trait::async_trait]
pub trait Authorize: Send + Sync + 'static {
    async fn authorize(&self, metadata: &MetadataMap, group: &str) -> Result<(), Status>;
}

/// Permits every stream. Used when transport security is the only check.
#[derive(Copy, Clone, Debug, Default)]
pub struct AllowAll;

/// Validates a service account token from the `authorization` header.
#[derive(Clone, Debug)]
pub struct TokenReviewAuth<R, G> {
    reviewer: R,
    audience: String,
    gateways: Option<G>,
}

/// Submits bearer tokens for review.
#[async_trait::async_trait]
pub trait ReviewTokens: Send + Sync + 'static {
    /// Returns the authenticated user name, or `None` if the token was not
    /// authenticated for the audience.
    async fn review(&self, token: &str, audience: &str) -> Result<Option<String>, Status>;
}

/// Reports whether a namespace hosts a Gateway of a group.
pub trait GatewayNamespaces: Send + Sync + 'static {
    fn has_gateway(&self, group: &str, namespace: &str) -> bool;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceAccount {
    pub namespace: String,
    pub name: String,
}

/// The token audience of the delivery service.
pub fn audience(service: &str, namespace: &str, cluster_domain: &str) -> String {
    format!("{service}.{namespace}.svc.{cluster_domain}")
}

// === impl AllowAll ===

#[async_trait::async_trait]
impl Authorize for AllowAll {
    async fn authorize(&self, _: &MetadataMap, _: &str) -> Result<(), Status> {
        Ok(())
    }
}

// === impl TokenReviewAuth ===

impl<R> TokenReviewAuth<R, ()> {
    pub fn new(reviewer: R, audience: impl Into<String>) -> Self {
        Self {
            reviewer,
            audience: audience.into(),
            gateways: None,
        }
    }
}

impl<R, G> TokenReviewAuth<R, G> {
    /// Restricts each service account to groups with a Gateway in its own
    /// namespace.
    pub fn with_gateway_namespaces<H>(self, gateways: H) -> TokenReviewAuth<R, H> {
        TokenReviewAuth {
            reviewer: self.reviewer,
            audience: self.audience,
            gateways: Some(gateways),
        }
    }
}

#[async_trait::async_trait]
impl<R: ReviewTokens, G: GatewayNamespaces> Authorize for TokenReviewAuth<R, G> {
    async fn authorize(&self, metadata: &MetadataMap, group: &str) -> Result<(), Status> {
        let token = bearer_token(metadata)?;
        let username = self
            .reviewer
            .review(token, &self.audience)
            .await?
            .ok_or_else(|| Status::unauthenticated("token was not authenticated"))?;
        let sa = ServiceAccount::from_username(&username).ok_or_else(|| {
            Status::permission_denied(format!("{username} is not a service account"))
        })?;

        if let Some(gateways) = &self.gateways {
            if !gateways.has_gateway(group, &sa.namespace) {
                tracing::info!(
                    serviceaccount.ns = %sa.namespace,
                    serviceaccount.name = %sa.name,
                    %group,
                    "Service account namespace has no Gateway in group"
                );
                return Err(Status::permission_denied(format!(
                    "namespace {} has no Gateway in group {group}",
                    sa.namespace
                )));
            }
        }

        tracing::debug!(
            serviceaccount.ns = %sa.namespace,
            serviceaccount.name = %sa.name,
            %group,
            "Authorized proxy"
        );
        Ok(())
    }
}

impl GatewayNamespaces for () {
    fn has_gateway(&self, _: &str, _: &str) -> bool {
        true
    }
}

fn bearer_token(metadata: &MetadataMap) -> Result<&str, Status> {
    let value = metadata
        .get("authorization")
        .ok_or_else(|| Status::unauthenticated("missing authorization header"))?
        .to_str()
        .map_err(|_| Status::unauthenticated("invalid authorization header"))?;
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Status::unauthenticated("authorization must be a bearer token"))
}

// === impl ServiceAccount ===

impl ServiceAccount {
    /// Parses `system:serviceaccount:<namespace>:<name>`.
    pub fn from_username(username: &str) -> Option<Self> {
        let rest = username.strip_prefix("system:serviceaccount:")?;
        let (namespace, name) = rest.split_once(':')?;
        if namespace.is_empty() || name.is_empty() || name.contains(':') {
            return None;
        }
        Some(Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }
}

// === impl Client ===

#[async_trait::async_trait]
impl ReviewTokens for Client {
    async fn review(&self, token: &str, audience: &str) -> Result<Option<String>, Status> {
        let review = TokenReview {
            spec: TokenReviewSpec {
                token: Some(token.to_string()),
                audiences: Some(vec![audience.to_string()]),
            },
            ..Default::default()
        };
        let review = Api::<TokenReview>::all(self.clone())
            .create(&PostParams::default(), &review)
            .await
            .map_err(|error| {
                tracing::warn!(%error, "TokenReview failed");
                Status::unavailable("token review failed")
            })?;
        Ok(authenticated_user(review.status, audience))
    }
}

fn authenticated_user(status: Option<TokenReviewStatus>, audience: &str) -> Option<String> {
    let status = status?;
    if status.authenticated != Some(true) {
        if let Some(error) = status.error {
            tracing::debug!(%error, "Token was not authenticated");
        }
        return None;
    }
    // The API server reports the requested audiences the token is valid for.
    if !status.audiences?.iter().any(|a| a == audience) {
        return None;
    }
    status.user?.username
}
