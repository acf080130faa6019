//! Webhook TLS bootstrap
//!
//! Before the admission webhook server starts, the operator needs:
//! - a serving certificate and key on disk for the HTTPS listener
//! - the CA that signed it installed as `caBundle` on every webhook entry of
//!   the operator's webhook configurations
//!
//! [`WebhookTls::setup`] runs the stages in a fixed order and stops at the
//! first failure:
//!
//! 1. [`CertificateIssuer`] mints a fresh leaf certificate
//! 2. [`files::persist`] writes `tls.crt` and `tls.key`
//! 3. [`CaManager`] finds the CA secret
//! 4. [`WebhookPatcher`] patches MutatingWebhookConfigurations
//! 5. [`WebhookPatcher`] patches ValidatingWebhookConfigurations

pub mod ca;
pub mod files;
pub mod issuer;
pub mod patch;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, instrument};

pub use ca::CaManager;
pub use issuer::CertificateIssuer;
pub use patch::{PatchReport, WebhookPatcher};

use crate::cluster::ClusterApi;
use crate::context::SetupContext;
use crate::error::ResultExt;
use crate::retry::RetryConfig;
use crate::{Error, Result};

/// Default name of the CA secret
pub const DEFAULT_CA_SECRET_NAME: &str = "crdb-operator-webhook-ca";

/// Default name of the Service fronting the webhook server
pub const DEFAULT_WEBHOOK_SERVICE_NAME: &str = "crdb-operator-webhook-service";

/// Default MutatingWebhookConfiguration name
pub const DEFAULT_MUTATING_CONFIG_NAME: &str = "crdb-operator-mutating";

/// Default ValidatingWebhookConfiguration name
pub const DEFAULT_VALIDATING_CONFIG_NAME: &str = "crdb-operator-validating";

/// Inputs for webhook TLS setup
#[derive(Clone, Debug)]
pub struct WebhookTlsConfig {
    /// Namespace holding the CA secret and the webhook service
    pub namespace: String,
    /// Directory receiving `tls.crt` and `tls.key`
    pub cert_dir: PathBuf,
    /// Webhook service name, used for the certificate's DNS names
    pub service_name: String,
    /// Name of the CA secret
    pub ca_secret_name: String,
    /// MutatingWebhookConfigurations to patch
    pub mutating_configs: Vec<String>,
    /// ValidatingWebhookConfigurations to patch
    pub validating_configs: Vec<String>,
    /// Retry policy for conflicting webhook configuration updates
    pub retry: RetryConfig,
}

impl WebhookTlsConfig {
    /// Config for `namespace` with every other field at its default
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            cert_dir: PathBuf::from(crate::DEFAULT_CERT_DIR),
            service_name: DEFAULT_WEBHOOK_SERVICE_NAME.to_string(),
            ca_secret_name: DEFAULT_CA_SECRET_NAME.to_string(),
            mutating_configs: vec![DEFAULT_MUTATING_CONFIG_NAME.to_string()],
            validating_configs: vec![DEFAULT_VALIDATING_CONFIG_NAME.to_string()],
            retry: RetryConfig::default(),
        }
    }

    /// Set the certificate directory
    pub fn with_cert_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cert_dir = dir.into();
        self
    }

    /// Set the webhook service name
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Set the CA secret name
    pub fn with_ca_secret_name(mut self, name: impl Into<String>) -> Self {
        self.ca_secret_name = name.into();
        self
    }

    /// Set the MutatingWebhookConfiguration names
    pub fn with_mutating_configs(mut self, names: Vec<String>) -> Self {
        self.mutating_configs = names;
        self
    }

    /// Set the ValidatingWebhookConfiguration names
    pub fn with_validating_configs(mut self, names: Vec<String>) -> Self {
        self.validating_configs = names;
        self
    }

    /// Set the retry policy for webhook configuration updates
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Reject configs that cannot possibly work
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(Error::config("namespace must not be empty"));
        }
        if self.service_name.is_empty() {
            return Err(Error::config("webhook service name must not be empty"));
        }
        if self.ca_secret_name.is_empty() {
            return Err(Error::config("CA secret name must not be empty"));
        }
        if self.cert_dir.as_os_str().is_empty() {
            return Err(Error::config("certificate directory must not be empty"));
        }
        // 0 would retry conflicts forever
        if self.retry.max_attempts == 0 {
            return Err(Error::config("webhook patch retries must be at least 1"));
        }
        Ok(())
    }
}

/// Pipeline stages, in execution order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetupStage {
    /// Mint the serving certificate
    IssueCertificate,
    /// Write the certificate and key to disk
    WriteCertificate,
    /// Find the CA for the webhook CA bundles
    FindCa,
    /// Patch MutatingWebhookConfigurations
    PatchMutating,
    /// Patch ValidatingWebhookConfigurations
    PatchValidating,
}

impl SetupStage {
    /// Every stage, in execution order
    pub const ALL: [SetupStage; 5] = [
        SetupStage::IssueCertificate,
        SetupStage::WriteCertificate,
        SetupStage::FindCa,
        SetupStage::PatchMutating,
        SetupStage::PatchValidating,
    ];

    /// Description used to wrap this stage's errors
    pub fn failure_action(&self) -> &'static str {
        match self {
            SetupStage::IssueCertificate => "failed to find or create webhook certificate",
            SetupStage::WriteCertificate => "failed to write webhook certificate to disk",
            SetupStage::FindCa => "failed to find webhook CA certificate",
            SetupStage::PatchMutating => "failed to patch mutating webhook",
            SetupStage::PatchValidating => "failed to patch validating webhook",
        }
    }
}

impl std::fmt::Display for SetupStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SetupStage::IssueCertificate => "issue-certificate",
            SetupStage::WriteCertificate => "write-certificate",
            SetupStage::FindCa => "find-ca",
            SetupStage::PatchMutating => "patch-mutating",
            SetupStage::PatchValidating => "patch-validating",
        };
        f.write_str(s)
    }
}

/// Result of a successful setup
#[derive(Clone, Debug, Default)]
pub struct SetupReport {
    /// Serial number of the certificate written to disk
    pub serial: String,
    /// Mutating configuration outcome
    pub mutating: PatchReport,
    /// Validating configuration outcome
    pub validating: PatchReport,
}

/// Webhook TLS setup wired to a cluster
pub struct WebhookTls {
    config: WebhookTlsConfig,
    ca: CaManager,
    issuer: CertificateIssuer,
    patcher: WebhookPatcher,
}

impl WebhookTls {
    /// Wire the pipeline components for `config`
    pub fn new(api: Arc<dyn ClusterApi>, config: WebhookTlsConfig) -> Self {
        let ca = CaManager::new(api.clone(), config.ca_secret_name.clone());
        let issuer = CertificateIssuer::new(ca.clone(), config.service_name.clone());
        let patcher = WebhookPatcher::new(api, config.retry.clone());
        Self {
            config,
            ca,
            issuer,
            patcher,
        }
    }

    /// Run every stage once, stopping at the first failure
    ///
    /// Each stage's error is wrapped with [`SetupStage::failure_action`].
    /// Nothing is rolled back: files or CA bundles written by earlier stages
    /// stay in place.
    #[instrument(skip_all, fields(namespace = %self.config.namespace))]
    pub async fn setup(&self, ctx: &SetupContext) -> Result<SetupReport> {
        self.config.validate()?;
        let ns = self.config.namespace.as_str();

        let stage = SetupStage::IssueCertificate;
        check_live(ctx, stage)?;
        let cert = self
            .issuer
            .issue(ctx, ns)
            .await
            .context(stage.failure_action())?;
        let serial = cert
            .cert_info()
            .map(|info| info.serial)
            .context(stage.failure_action())?;

        let stage = SetupStage::WriteCertificate;
        check_live(ctx, stage)?;
        files::persist(&cert, &self.config.cert_dir)
            .await
            .context(stage.failure_action())?;

        let stage = SetupStage::FindCa;
        check_live(ctx, stage)?;
        let ca = self
            .ca
            .find_or_create(ctx, ns)
            .await
            .context(stage.failure_action())?;

        let stage = SetupStage::PatchMutating;
        check_live(ctx, stage)?;
        let mutating = self
            .patcher
            .patch_mutating(ctx, &ca, &self.config.mutating_configs)
            .await
            .context(stage.failure_action())?;

        let stage = SetupStage::PatchValidating;
        check_live(ctx, stage)?;
        let validating = self
            .patcher
            .patch_validating(ctx, &ca, &self.config.validating_configs)
            .await
            .context(stage.failure_action())?;

        info!(
            %serial,
            cert_dir = %self.config.cert_dir.display(),
            "Webhook TLS setup complete"
        );
        Ok(SetupReport {
            serial,
            mutating,
            validating,
        })
    }
}

fn check_live(ctx: &SetupContext, stage: SetupStage) -> Result<()> {
    if ctx.is_done() {
        return Err(Error::cancelled(format!("context ended before stage {stage}"))
            .context(stage.failure_action()));
    }
    info!(%stage, "Running webhook TLS stage");
    Ok(())
}

/// Run webhook TLS setup once against `api`
pub async fn setup_webhook_tls(
    ctx: &SetupContext,
    api: Arc<dyn ClusterApi>,
    config: WebhookTlsConfig,
) -> Result<SetupReport> {
    WebhookTls::new(api, config).setup(ctx).await
}
