//! CA bundle patching for admission webhook configurations
//!
//! Only `webhooks[*].clientConfig.caBundle` is written. Updates carry the
//! observed resourceVersion; a 409 means another writer got there first, so
//! the object is re-fetched and the bundle re-applied.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::cluster::{ClusterApi, WebhookConfiguration, WebhookKind};
use crate::context::SetupContext;
use crate::error::ResultExt;
use crate::pki::CertificateAuthority;
use crate::retry::{retry_with_backoff_if, RetryConfig, RetryError};
use crate::{Error, Result};

/// What happened to each configured webhook configuration name
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PatchReport {
    /// Configurations whose CA bundles were rewritten
    pub updated: Vec<String>,
    /// Configurations that already carried the current CA
    pub unchanged: Vec<String>,
    /// Configured names with no matching object
    pub missing: Vec<String>,
}

enum Outcome {
    Updated,
    Unchanged,
    Vanished,
}

/// Rewrites CA bundles on the operator's webhook configurations
#[derive(Clone)]
pub struct WebhookPatcher {
    api: Arc<dyn ClusterApi>,
    retry: RetryConfig,
}

impl WebhookPatcher {
    /// Create a patcher using `retry` for update conflicts
    pub fn new(api: Arc<dyn ClusterApi>, retry: RetryConfig) -> Self {
        Self { api, retry }
    }

    /// Patch the named MutatingWebhookConfigurations with `ca`
    pub async fn patch_mutating(
        &self,
        ctx: &SetupContext,
        ca: &CertificateAuthority,
        names: &[String],
    ) -> Result<PatchReport> {
        self.patch(ctx, WebhookKind::Mutating, ca, names).await
    }

    /// Patch the named ValidatingWebhookConfigurations with `ca`
    pub async fn patch_validating(
        &self,
        ctx: &SetupContext,
        ca: &CertificateAuthority,
        names: &[String],
    ) -> Result<PatchReport> {
        self.patch(ctx, WebhookKind::Validating, ca, names).await
    }

    #[instrument(skip_all, fields(%kind))]
    async fn patch(
        &self,
        ctx: &SetupContext,
        kind: WebhookKind,
        ca: &CertificateAuthority,
        names: &[String],
    ) -> Result<PatchReport> {
        let configs = ctx
            .run(
                "list webhook configurations",
                self.api.list_webhook_configurations(kind),
            )
            .await
            .context(format!("failed to list {}s", kind))?;

        let mut report = PatchReport::default();
        let mut seen = HashSet::new();
        for name in names {
            if !seen.insert(name.as_str()) {
                debug!(%name, "Duplicate webhook configuration name, already handled");
                continue;
            }
            let Some(config) = configs.iter().find(|c| c.name() == Some(name.as_str())) else {
                warn!(%name, "Webhook configuration not found, skipping");
                report.missing.push(name.clone());
                continue;
            };

            match self.patch_one(ctx, config.clone(), name, ca.certificate()).await? {
                Outcome::Updated => report.updated.push(name.clone()),
                Outcome::Unchanged => report.unchanged.push(name.clone()),
                Outcome::Vanished => {
                    warn!(%name, "Webhook configuration deleted while patching, skipping");
                    report.missing.push(name.clone());
                }
            }
        }

        info!(
            updated = report.updated.len(),
            unchanged = report.unchanged.len(),
            missing = report.missing.len(),
            "Webhook CA bundles patched"
        );
        Ok(report)
    }

    /// Apply `bundle` to one configuration, re-fetching on conflict
    async fn patch_one(
        &self,
        ctx: &SetupContext,
        listed: WebhookConfiguration,
        name: &str,
        bundle: &[u8],
    ) -> Result<Outcome> {
        let kind = listed.kind();
        let api = &self.api;
        let mut seed = Some(listed);

        let op_name = format!("patch {} {}", kind, name);
        let result = retry_with_backoff_if(ctx, &self.retry, &op_name, Error::is_conflict, || {
            let observed = seed.take();
            async move {
                let mut config = match observed {
                    Some(config) => config,
                    None => {
                        let fetched = ctx
                            .run(
                                "get webhook configuration",
                                api.get_webhook_configuration(kind, name),
                            )
                            .await
                            .context(format!("failed to get {} {}", kind, name))?;
                        match fetched {
                            Some(config) => config,
                            None => return Ok(Outcome::Vanished),
                        }
                    }
                };

                if !config.set_ca_bundle(bundle) {
                    debug!(%name, "CA bundle already current");
                    return Ok(Outcome::Unchanged);
                }

                ctx.run(
                    "replace webhook configuration",
                    api.replace_webhook_configuration(&config),
                )
                .await
                .context(format!("failed to update {} {}", kind, name))?;

                info!(%name, "Updated CA bundle");
                Ok::<_, Error>(Outcome::Updated)
            }
        })
        .await;

        match result {
            Ok(outcome) => Ok(outcome),
            Err(RetryError::Exhausted { attempts, last }) => {
                warn!(%name, error = %last, "Giving up on webhook configuration update");
                Err(Error::WebhookPatch {
                    name: name.to_string(),
                    attempts,
                })
            }
            Err(RetryError::Fatal(e)) => Err(e),
        }
    }
}
