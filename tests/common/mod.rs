//! In-memory cluster for pipeline integration tests
//!
//! Tracks resourceVersion on every object so stale writes fail with 409 the
//! way the API server does, and supports injecting forbidden reads and
//! concurrent writers.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhook, MutatingWebhookConfiguration, ServiceReference, ValidatingWebhook,
    ValidatingWebhookConfiguration, WebhookClientConfig,
};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;

use crdb_operator::cluster::{ClusterApi, WebhookConfiguration, WebhookKind};

pub const NAMESPACE: &str = "crdb";

pub fn api_error(code: u16, reason: &str, message: &str) -> kube::Error {
    kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: message.to_string(),
        reason: reason.to_string(),
        code,
    })
}

fn meta_mut(config: &mut WebhookConfiguration) -> &mut ObjectMeta {
    match config {
        WebhookConfiguration::Mutating(c) => &mut c.metadata,
        WebhookConfiguration::Validating(c) => &mut c.metadata,
    }
}

fn client_config(bundle: Option<&[u8]>) -> WebhookClientConfig {
    WebhookClientConfig {
        ca_bundle: bundle.map(|b| ByteString(b.to_vec())),
        service: Some(ServiceReference {
            name: "crdb-operator-webhook-service".to_string(),
            namespace: NAMESPACE.to_string(),
            path: Some("/admit".to_string()),
            port: Some(443),
        }),
        url: None,
    }
}

/// A mutating configuration with one entry per bundle
pub fn mutating_config(name: &str, bundles: &[Option<&[u8]>]) -> WebhookConfiguration {
    MutatingWebhookConfiguration {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
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

/// A validating configuration with one entry per bundle
pub fn validating_config(name: &str, bundles: &[Option<&[u8]>]) -> WebhookConfiguration {
    ValidatingWebhookConfiguration {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        webhooks: Some(
            bundles
                .iter()
                .enumerate()
                .map(|(i, b)| ValidatingWebhook {
                    name: format!("v{i}.crdb.cockroachlabs.com"),
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

#[derive(Default)]
struct State {
    secrets: BTreeMap<(String, String), Secret>,
    webhooks: HashMap<(WebhookKind, String), WebhookConfiguration>,
    next_rv: u64,
    forbid_secret_reads: bool,
    concurrent_webhook_writes: u32,
    secret_writes: u32,
    webhook_writes: u32,
}

impl State {
    fn bump(&mut self) -> String {
        self.next_rv += 1;
        self.next_rv.to_string()
    }
}

/// Fake API server holding secrets and webhook configurations
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a webhook configuration, assigning it a resourceVersion
    pub fn with_webhook(self, mut config: WebhookConfiguration) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let rv = state.bump();
            meta_mut(&mut config).resource_version = Some(rv);
            let key = (config.kind(), config.name().unwrap_or_default().to_string());
            state.webhooks.insert(key, config);
        }
        self
    }

    /// Store a secret as if created by someone else
    pub fn with_secret(self, mut secret: Secret) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            secret.metadata.resource_version = Some(state.bump());
            let key = (
                NAMESPACE.to_string(),
                secret.metadata.name.clone().unwrap_or_default(),
            );
            state.secrets.insert(key, secret);
        }
        self
    }

    /// Make every secret read fail with 403
    pub fn forbid_secret_reads(&self) {
        self.state.lock().unwrap().forbid_secret_reads = true;
    }

    /// Simulate `n` writers that update a webhook configuration just before ours
    pub fn inject_concurrent_webhook_writes(&self, n: u32) {
        self.state.lock().unwrap().concurrent_webhook_writes = n;
    }

    pub fn secret(&self, name: &str) -> Option<Secret> {
        self.state
            .lock()
            .unwrap()
            .secrets
            .get(&(NAMESPACE.to_string(), name.to_string()))
            .cloned()
    }

    pub fn webhook(&self, kind: WebhookKind, name: &str) -> Option<WebhookConfiguration> {
        self.state
            .lock()
            .unwrap()
            .webhooks
            .get(&(kind, name.to_string()))
            .cloned()
    }

    /// Successful secret creates and updates
    pub fn secret_writes(&self) -> u32 {
        self.state.lock().unwrap().secret_writes
    }

    /// Successful webhook configuration replaces
    pub fn webhook_writes(&self) -> u32 {
        self.state.lock().unwrap().webhook_writes
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Secret>, kube::Error> {
        let state = self.state.lock().unwrap();
        if state.forbid_secret_reads {
            return Err(api_error(403, "Forbidden", "secrets is forbidden"));
        }
        Ok(state
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn create_secret(
        &self,
        namespace: &str,
        secret: &Secret,
    ) -> Result<Secret, kube::Error> {
        let mut state = self.state.lock().unwrap();
        let key = (
            namespace.to_string(),
            secret.metadata.name.clone().unwrap_or_default(),
        );
        if state.secrets.contains_key(&key) {
            return Err(api_error(409, "AlreadyExists", "secret already exists"));
        }
        let mut stored = secret.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.resource_version = Some(state.bump());
        state.secrets.insert(key, stored.clone());
        state.secret_writes += 1;
        Ok(stored)
    }

    async fn update_secret(
        &self,
        namespace: &str,
        secret: &Secret,
    ) -> Result<Secret, kube::Error> {
        let mut state = self.state.lock().unwrap();
        let key = (
            namespace.to_string(),
            secret.metadata.name.clone().unwrap_or_default(),
        );
        let current_rv = match state.secrets.get(&key) {
            Some(current) => current.metadata.resource_version.clone(),
            None => return Err(api_error(404, "NotFound", "secret not found")),
        };
        if secret.metadata.resource_version != current_rv {
            return Err(api_error(409, "Conflict", "the object has been modified"));
        }
        let mut stored = secret.clone();
        stored.metadata.resource_version = Some(state.bump());
        state.secrets.insert(key, stored.clone());
        state.secret_writes += 1;
        Ok(stored)
    }

    async fn list_webhook_configurations(
        &self,
        kind: WebhookKind,
    ) -> Result<Vec<WebhookConfiguration>, kube::Error> {
        let state = self.state.lock().unwrap();
        Ok(state
            .webhooks
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, c)| c.clone())
            .collect())
    }

    async fn get_webhook_configuration(
        &self,
        kind: WebhookKind,
        name: &str,
    ) -> Result<Option<WebhookConfiguration>, kube::Error> {
        let state = self.state.lock().unwrap();
        Ok(state.webhooks.get(&(kind, name.to_string())).cloned())
    }

    async fn replace_webhook_configuration(
        &self,
        config: &WebhookConfiguration,
    ) -> Result<WebhookConfiguration, kube::Error> {
        let mut state = self.state.lock().unwrap();
        let key = (config.kind(), config.name().unwrap_or_default().to_string());

        if state.concurrent_webhook_writes > 0 {
            state.concurrent_webhook_writes -= 1;
            let rv = state.bump();
            if let Some(current) = state.webhooks.get_mut(&key) {
                meta_mut(current).resource_version = Some(rv);
            }
        }

        let current_rv = match state.webhooks.get(&key) {
            Some(current) => current.resource_version().map(String::from),
            None => return Err(api_error(404, "NotFound", "webhook configuration not found")),
        };
        if config.resource_version().map(String::from) != current_rv {
            return Err(api_error(409, "Conflict", "the object has been modified"));
        }

        let mut stored = config.clone();
        let rv = state.bump();
        meta_mut(&mut stored).resource_version = Some(rv);
        state.webhooks.insert(key, stored.clone());
        state.webhook_writes += 1;
        Ok(stored)
    }
}
