//! Minimal cluster API surface used by the webhook TLS pipeline
//!
//! The pipeline only needs a handful of calls: get/create/update of the CA
//! secret and list/get/replace of webhook configurations. [`ClusterApi`]
//! captures exactly those so the pipeline can run against the real API server
//! ([`KubeClusterApi`]) or an in-memory fake in tests.

mod client;

pub use client::KubeClusterApi;

use async_trait::async_trait;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration, WebhookClientConfig,
};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;

#[cfg(test)]
use mockall::automock;

/// Whether an API error is a 409 (stale resourceVersion or already exists)
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409)
}

/// Trait abstracting the cluster calls made during webhook TLS setup
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Get a secret, `None` if it does not exist
    async fn get_secret(&self, namespace: &str, name: &str)
        -> Result<Option<Secret>, kube::Error>;

    /// Create a secret; fails with 409 if one with the same name exists
    async fn create_secret(&self, namespace: &str, secret: &Secret)
        -> Result<Secret, kube::Error>;

    /// Replace a secret; fails with 409 if its resourceVersion is stale
    async fn update_secret(&self, namespace: &str, secret: &Secret)
        -> Result<Secret, kube::Error>;

    /// List all webhook configurations of one kind
    async fn list_webhook_configurations(
        &self,
        kind: WebhookKind,
    ) -> Result<Vec<WebhookConfiguration>, kube::Error>;

    /// Get a webhook configuration by name, `None` if it does not exist
    async fn get_webhook_configuration(
        &self,
        kind: WebhookKind,
        name: &str,
    ) -> Result<Option<WebhookConfiguration>, kube::Error>;

    /// Replace a webhook configuration; fails with 409 if its resourceVersion is stale
    async fn replace_webhook_configuration(
        &self,
        config: &WebhookConfiguration,
    ) -> Result<WebhookConfiguration, kube::Error>;
}

/// The two admission webhook configuration kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WebhookKind {
    /// admissionregistration.k8s.io/v1 MutatingWebhookConfiguration
    Mutating,
    /// admissionregistration.k8s.io/v1 ValidatingWebhookConfiguration
    Validating,
}

impl std::fmt::Display for WebhookKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WebhookKind::Mutating => f.write_str("MutatingWebhookConfiguration"),
            WebhookKind::Validating => f.write_str("ValidatingWebhookConfiguration"),
        }
    }
}

/// A mutating or validating webhook configuration object
#[derive(Clone, Debug, PartialEq)]
pub enum WebhookConfiguration {
    /// Mutating webhook configuration
    Mutating(MutatingWebhookConfiguration),
    /// Validating webhook configuration
    Validating(ValidatingWebhookConfiguration),
}

impl From<MutatingWebhookConfiguration> for WebhookConfiguration {
    fn from(config: MutatingWebhookConfiguration) -> Self {
        Self::Mutating(config)
    }
}

impl From<ValidatingWebhookConfiguration> for WebhookConfiguration {
    fn from(config: ValidatingWebhookConfiguration) -> Self {
        Self::Validating(config)
    }
}

impl WebhookConfiguration {
    /// Which kind of configuration this is
    pub fn kind(&self) -> WebhookKind {
        match self {
            Self::Mutating(_) => WebhookKind::Mutating,
            Self::Validating(_) => WebhookKind::Validating,
        }
    }

    /// metadata.name
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Mutating(c) => c.metadata.name.as_deref(),
            Self::Validating(c) => c.metadata.name.as_deref(),
        }
    }

    /// metadata.resourceVersion
    pub fn resource_version(&self) -> Option<&str> {
        match self {
            Self::Mutating(c) => c.metadata.resource_version.as_deref(),
            Self::Validating(c) => c.metadata.resource_version.as_deref(),
        }
    }

    /// Client configs of every webhook entry, in order
    pub fn client_configs(&self) -> Vec<&WebhookClientConfig> {
        match self {
            Self::Mutating(c) => c
                .webhooks
                .iter()
                .flatten()
                .map(|w| &w.client_config)
                .collect(),
            Self::Validating(c) => c
                .webhooks
                .iter()
                .flatten()
                .map(|w| &w.client_config)
                .collect(),
        }
    }

    fn client_configs_mut(&mut self) -> Vec<&mut WebhookClientConfig> {
        match self {
            Self::Mutating(c) => c
                .webhooks
                .iter_mut()
                .flatten()
                .map(|w| &mut w.client_config)
                .collect(),
            Self::Validating(c) => c
                .webhooks
                .iter_mut()
                .flatten()
                .map(|w| &mut w.client_config)
                .collect(),
        }
    }

    /// CA bundle of every webhook entry, in order
    pub fn ca_bundles(&self) -> Vec<Option<&[u8]>> {
        self.client_configs()
            .into_iter()
            .map(|cc| cc.ca_bundle.as_ref().map(|b| b.0.as_slice()))
            .collect()
    }

    /// Set every entry's CA bundle to `bundle`, touching no other field
    ///
    /// Returns whether anything changed.
    pub fn set_ca_bundle(&mut self, bundle: &[u8]) -> bool {
        let mut changed = false;
        for cc in self.client_configs_mut() {
            if cc.ca_bundle.as_ref().map(|b| b.0.as_slice()) != Some(bundle) {
                cc.ca_bundle = Some(ByteString(bundle.to_vec()));
                changed = true;
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::admissionregistration::v1::{
        MutatingWebhook, ServiceReference, ValidatingWebhook,
    };
    use kube::api::ObjectMeta;

    fn client_config(bundle: Option<&[u8]>) -> WebhookClientConfig {
        WebhookClientConfig {
            ca_bundle: bundle.map(|b| ByteString(b.to_vec())),
            service: Some(ServiceReference {
                name: "crdb-operator-webhook-service".to_string(),
                namespace: "crdb".to_string(),
                path: Some("/mutate-crdbcluster".to_string()),
                port: Some(443),
            }),
            url: None,
        }
    }

    fn mutating(bundles: &[Option<&[u8]>]) -> WebhookConfiguration {
        MutatingWebhookConfiguration {
            metadata: ObjectMeta {
                name: Some("crdb-operator-mutating".to_string()),
                resource_version: Some("7".to_string()),
                ..Default::default()
            },
            webhooks: Some(
                bundles
                    .iter()
                    .enumerate()
                    .map(|(i, b)| MutatingWebhook {
                        name: format!("m{i}.crdb.cockroachlabs.com"),
                        admission_review_versions: vec!["v1".to_string()],
                        side_effects: "None".to_string(),
                        client_config: client_config(*b),
                        ..Default::default()
                    })
                    .collect(),
            ),
        }
        .into()
    }

    #[test]
    fn set_ca_bundle_overwrites_every_entry() {
        let mut config = mutating(&[None, Some(b"old"), Some(b"")]);

        assert!(config.set_ca_bundle(b"new-ca"));
        assert_eq!(
            config.ca_bundles(),
            vec![Some(&b"new-ca"[..]), Some(&b"new-ca"[..]), Some(&b"new-ca"[..])]
        );
    }

    #[test]
    fn set_ca_bundle_reports_no_change_when_current() {
        let mut config = mutating(&[Some(b"ca"), Some(b"ca")]);
        let before = config.clone();

        assert!(!config.set_ca_bundle(b"ca"));
        assert_eq!(config, before);
    }

    #[test]
    fn set_ca_bundle_leaves_other_fields_alone() {
        let mut config = mutating(&[Some(b"old")]);
        let before = config.clone();
        config.set_ca_bundle(b"new");

        let (WebhookConfiguration::Mutating(after), WebhookConfiguration::Mutating(before)) =
            (&config, &before)
        else {
            panic!("expected mutating configurations");
        };
        let (a, b) = (&after.webhooks.as_ref().unwrap()[0], &before.webhooks.as_ref().unwrap()[0]);
        assert_eq!(a.name, b.name);
        assert_eq!(a.client_config.service, b.client_config.service);
        assert_eq!(a.side_effects, b.side_effects);
        assert_eq!(after.metadata, before.metadata);
    }

    #[test]
    fn configuration_without_webhooks_is_unchanged() {
        let mut config: WebhookConfiguration = ValidatingWebhookConfiguration {
            metadata: ObjectMeta {
                name: Some("crdb-operator-validating".to_string()),
                ..Default::default()
            },
            webhooks: None,
        }
        .into();

        assert!(!config.set_ca_bundle(b"ca"));
        assert!(config.ca_bundles().is_empty());
        assert_eq!(config.kind(), WebhookKind::Validating);
        assert_eq!(config.name(), Some("crdb-operator-validating"));
    }

    #[test]
    fn validating_entries_are_patched() {
        let mut config: WebhookConfiguration = ValidatingWebhookConfiguration {
            metadata: ObjectMeta::default(),
            webhooks: Some(vec![ValidatingWebhook {
                name: "v.crdb.cockroachlabs.com".to_string(),
                client_config: client_config(None),
                ..Default::default()
            }]),
        }
        .into();

        assert!(config.set_ca_bundle(b"ca"));
        assert_eq!(config.ca_bundles(), vec![Some(&b"ca"[..])]);
    }

    #[test]
    fn api_error_classification() {
        let err = |code| {
            kube::Error::Api(kube::error::ErrorResponse {
                status: "Failure".to_string(),
                message: String::new(),
                reason: String::new(),
                code,
            })
        };
        assert!(is_conflict(&err(409)));
        assert!(!is_conflict(&err(404)));
        assert!(!is_conflict(&err(403)));
    }

    #[test]
    fn kind_display_names_the_resource() {
        assert_eq!(WebhookKind::Mutating.to_string(), "MutatingWebhookConfiguration");
        assert_eq!(WebhookKind::Validating.to_string(), "ValidatingWebhookConfiguration");
    }
}
