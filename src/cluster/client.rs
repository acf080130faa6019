//! [`ClusterApi`] backed by a real `kube::Client`

use async_trait::async_trait;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, ListParams, PostParams};
use kube::Client;
use tracing::debug;

use super::{ClusterApi, WebhookConfiguration, WebhookKind};

/// Real Kubernetes client implementation
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    /// Create a new KubeClusterApi wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn mutating(&self) -> Api<MutatingWebhookConfiguration> {
        Api::all(self.client.clone())
    }

    fn validating(&self) -> Api<ValidatingWebhookConfiguration> {
        Api::all(self.client.clone())
    }
}

/// Object submitted for replace without metadata.name
fn missing_name(kind: &str) -> kube::Error {
    kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{} is missing metadata.name", kind),
        reason: "Invalid".to_string(),
        code: 422,
    })
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Secret>, kube::Error> {
        self.secrets(namespace).get_opt(name).await
    }

    async fn create_secret(
        &self,
        namespace: &str,
        secret: &Secret,
    ) -> Result<Secret, kube::Error> {
        self.secrets(namespace)
            .create(&PostParams::default(), secret)
            .await
    }

    async fn update_secret(
        &self,
        namespace: &str,
        secret: &Secret,
    ) -> Result<Secret, kube::Error> {
        let name = secret
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| missing_name("Secret"))?;
        self.secrets(namespace)
            .replace(name, &PostParams::default(), secret)
            .await
    }

    async fn list_webhook_configurations(
        &self,
        kind: WebhookKind,
    ) -> Result<Vec<WebhookConfiguration>, kube::Error> {
        let lp = ListParams::default();
        let configs: Vec<WebhookConfiguration> = match kind {
            WebhookKind::Mutating => self
                .mutating()
                .list(&lp)
                .await?
                .items
                .into_iter()
                .map(Into::into)
                .collect(),
            WebhookKind::Validating => self
                .validating()
                .list(&lp)
                .await?
                .items
                .into_iter()
                .map(Into::into)
                .collect(),
        };
        debug!(%kind, count = configs.len(), "Listed webhook configurations");
        Ok(configs)
    }

    async fn get_webhook_configuration(
        &self,
        kind: WebhookKind,
        name: &str,
    ) -> Result<Option<WebhookConfiguration>, kube::Error> {
        Ok(match kind {
            WebhookKind::Mutating => self.mutating().get_opt(name).await?.map(Into::into),
            WebhookKind::Validating => self.validating().get_opt(name).await?.map(Into::into),
        })
    }

    async fn replace_webhook_configuration(
        &self,
        config: &WebhookConfiguration,
    ) -> Result<WebhookConfiguration, kube::Error> {
        let pp = PostParams::default();
        match config {
            WebhookConfiguration::Mutating(c) => {
                let name = c
                    .metadata
                    .name
                    .as_deref()
                    .ok_or_else(|| missing_name("MutatingWebhookConfiguration"))?;
                Ok(self.mutating().replace(name, &pp, c).await?.into())
            }
            WebhookConfiguration::Validating(c) => {
                let name = c
                    .metadata
                    .name
                    .as_deref()
                    .ok_or_else(|| missing_name("ValidatingWebhookConfiguration"))?;
                Ok(self.validating().replace(name, &pp, c).await?.into())
            }
        }
    }
}
