use super::Error;
use crate::tls::ClientCredentials;
use serde::Deserialize;
use std::{path::PathBuf, time::Duration};
use switchyard_controller_core::extension::{ExtensionKind, HookPoint};
use switchyard_controller_k8s_api::duration::GoDuration;

/// Configures the extension manager.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExtensionConfig {
    /// Extension kinds that routes may reference in filters.
    #[serde(default)]
    pub resources: Vec<ExtensionKind>,

    /// Extension kinds that attach to Gateways and routes by `targetRefs`.
    #[serde(default)]
    pub policy_resources: Vec<ExtensionKind>,

    #[serde(default)]
    pub hooks: HooksConfig,

    pub service: ServiceConfig,

    #[serde(default)]
    pub fail_open: bool,

    #[serde(default = "default_timeout")]
    pub timeout: GoDuration,

    #[serde(default)]
    pub require_reference_grant: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HooksConfig {
    #[serde(default)]
    pub post: Vec<HookPoint>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,

    /// The namespace of the extension Service. Unset means the control plane's
    /// own namespace.
    #[serde(default)]
    pub namespace: Option<String>,

    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TlsConfig {
    pub ca_file: PathBuf,

    #[serde(default)]
    pub cert_file: Option<PathBuf>,

    #[serde(default)]
    pub key_file: Option<PathBuf>,
}

fn default_timeout() -> GoDuration {
    GoDuration::from_duration(Duration::from_secs(10))
}

// === impl ExtensionConfig ===

impl ExtensionConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        let config = serde_yaml::from_str::<Self>(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        let yaml = std::fs::read_to_string(&path).map_err(|source| Error::Read { path, source })?;
        Self::from_yaml(&yaml)
    }

    pub fn is_registered(&self, point: HookPoint) -> bool {
        self.hooks.post.contains(&point)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout.as_duration()
    }

    fn validate(&self) -> Result<(), Error> {
        if self.service.host.is_empty() {
            return Err(Error::Invalid("service.host must be set".into()));
        }
        if self.service.port == 0 {
            return Err(Error::Invalid("service.port must be set".into()));
        }
        if self.timeout.as_duration().is_zero() {
            return Err(Error::Invalid("timeout must be positive".into()));
        }
        if let Some(tls) = &self.service.tls {
            if tls.cert_file.is_some() != tls.key_file.is_some() {
                return Err(Error::Invalid(
                    "service.tls.certFile and service.tls.keyFile must be set together".into(),
                ));
            }
        }
        Ok(())
    }
}

// === impl ServiceConfig ===

impl ServiceConfig {
    /// The Service name: the first DNS label of the host.
    pub fn name(&self) -> &str {
        self.host.split('.').next().unwrap_or(&self.host)
    }

    pub fn uri(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn client_credentials(&self) -> Option<ClientCredentials> {
        let tls = self.tls.as_ref()?;
        Some(ClientCredentials {
            ca: tls.ca_file.clone(),
            identity: tls.cert_file.clone().zip(tls.key_file.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_a_complete_config() {
        let config = ExtensionConfig::from_yaml(
            r#"
resources:
- group: example.io
  version: v1
  kind: RateLimit
policyResources:
- group: example.io
  version: v1alpha1
  kind: WafPolicy
hooks:
  post: [Route, Translation]
service:
  host: extension.ext-system.svc.cluster.local
  port: 5005
  namespace: ext-system
  tls:
    caFile: /etc/ext/ca.crt
    certFile: /etc/ext/tls.crt
    keyFile: /etc/ext/tls.key
failOpen: true
timeout: 1m30s
requireReferenceGrant: true
"#,
        )
        .expect("config must parse");

        assert_eq!(
            config.resources,
            vec![ExtensionKind {
                group: "example.io".to_string(),
                version: "v1".to_string(),
                kind: "RateLimit".to_string(),
            }]
        );
        assert_eq!(config.policy_resources[0].kind, "WafPolicy");
        assert!(config.is_registered(HookPoint::Route));
        assert!(config.is_registered(HookPoint::Translation));
        assert!(!config.is_registered(HookPoint::Listener));
        assert_eq!(config.service.name(), "extension");
        assert_eq!(
            config.service.uri(),
            "http://extension.ext-system.svc.cluster.local:5005"
        );
        assert!(config.fail_open);
        assert!(config.require_reference_grant);
        assert_eq!(config.timeout(), Duration::from_secs(90));

        let creds = config
            .service
            .client_credentials()
            .expect("tls must be configured");
        assert_eq!(creds.ca, PathBuf::from("/etc/ext/ca.crt"));
        assert_eq!(
            creds.identity,
            Some((
                PathBuf::from("/etc/ext/tls.crt"),
                PathBuf::from("/etc/ext/tls.key")
            ))
        );
    }

    #[test]
    fn applies_defaults() {
        let config = ExtensionConfig::from_yaml("service: {host: ext, port: 80}")
            .expect("config must parse");
        assert!(config.resources.is_empty());
        assert!(config.hooks.post.is_empty());
        assert!(!config.fail_open);
        assert!(!config.require_reference_grant);
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert_eq!(config.service.namespace, None);
        assert!(config.service.client_credentials().is_none());
    }

    #[test]
    fn rejects_invalid_configs() {
        for yaml in [
            "service: {host: ext, port: 80}\nunknown: true",
            "service: {host: ext, port: 80}\nhooks: {post: [PreRoute]}",
            "service: {host: '', port: 80}",
            "service: {host: ext, port: 0}",
            "service: {host: ext, port: 80}\ntimeout: 0s",
            "service: {host: ext, port: 80}\ntimeout: 10",
            "service: {host: ext, port: 80, tls: {caFile: ca.crt, certFile: tls.crt}}",
            "hooks: {post: [Route]}",
        ] {
            assert!(ExtensionConfig::from_yaml(yaml).is_err(), "{yaml}");
        }
    }

    #[test]
    fn missing_file_is_reported_by_path() {
        let err = ExtensionConfig::load("/nonexistent/extension.yaml")
            .expect_err("missing file must fail");
        assert!(
            err.to_string().contains("/nonexistent/extension.yaml"),
            "{err}"
        );
    }
}
