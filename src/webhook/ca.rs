//! Webhook CA persistence
//!
//! The CA lives in a single secret per namespace so every operator replica,
//! and every restart, trusts the same authority. Creation races between
//! replicas are settled by the API server: the loser sees a 409 and adopts the
//! winner's CA.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use tracing::{info, instrument, warn};

use crate::cluster::ClusterApi;
use crate::context::SetupContext;
use crate::error::ResultExt;
use crate::pki::CertificateAuthority;
use crate::{Error, Result};

/// Secret key holding the CA certificate
pub const CA_CERT_KEY: &str = "ca.crt";

/// Secret key holding the CA private key
pub const CA_KEY_KEY: &str = "ca.key";

/// Common name of generated webhook CAs
const CA_COMMON_NAME: &str = "crdb-operator-webhook-ca";

/// Finds or creates the webhook CA secret
#[derive(Clone)]
pub struct CaManager {
    api: Arc<dyn ClusterApi>,
    secret_name: String,
}

impl CaManager {
    /// Create a manager for the CA secret with the given name
    pub fn new(api: Arc<dyn ClusterApi>, secret_name: impl Into<String>) -> Self {
        Self {
            api,
            secret_name: secret_name.into(),
        }
    }

    /// Load the CA from its secret in `namespace`, creating it if absent
    ///
    /// A lost creation race (409) is resolved by a single re-fetch. An existing
    /// secret with no data is filled in place; one with unusable data is an
    /// error, existing CA material is never overwritten.
    #[instrument(skip_all, fields(namespace = %namespace, secret = %self.secret_name))]
    pub async fn find_or_create(
        &self,
        ctx: &SetupContext,
        namespace: &str,
    ) -> Result<CertificateAuthority> {
        let existing = self.get(ctx, namespace).await?;

        match existing {
            Some(secret) if has_data(&secret) => {
                let ca = ca_from_secret(&secret).context(format!(
                    "failed to load CA from secret {}/{}",
                    namespace, self.secret_name
                ))?;
                info!("Loaded existing webhook CA");
                Ok(ca)
            }
            Some(placeholder) => {
                info!("CA secret exists without data, generating CA into it");
                let ca = CertificateAuthority::new(CA_COMMON_NAME)?;

                let mut secret = placeholder;
                secret.data = Some(ca_data(&ca));

                let res = ctx
                    .run("update CA secret", self.api.update_secret(namespace, &secret))
                    .await;
                self.settle_write(ctx, namespace, ca, res, "update").await
            }
            None => {
                info!("CA secret not found, creating new CA");
                let ca = CertificateAuthority::new(CA_COMMON_NAME)?;
                let secret = self.new_secret(namespace, &ca);

                let res = ctx
                    .run("create CA secret", self.api.create_secret(namespace, &secret))
                    .await;
                self.settle_write(ctx, namespace, ca, res, "create").await
            }
        }
    }

    /// Resolve the result of writing our freshly generated CA
    async fn settle_write(
        &self,
        ctx: &SetupContext,
        namespace: &str,
        ca: CertificateAuthority,
        res: Result<Secret>,
        verb: &str,
    ) -> Result<CertificateAuthority> {
        match res {
            Ok(_) => {
                info!("Persisted new webhook CA");
                Ok(ca)
            }
            Err(e) if e.is_conflict() => {
                warn!("CA secret written concurrently, adopting the other writer's CA");
                self.refetch(ctx, namespace).await
            }
            Err(e) => Err(e.context(format!(
                "failed to {} secret {}/{}",
                verb, namespace, self.secret_name
            ))),
        }
    }

    async fn refetch(&self, ctx: &SetupContext, namespace: &str) -> Result<CertificateAuthority> {
        match self.get(ctx, namespace).await? {
            Some(secret) if has_data(&secret) => ca_from_secret(&secret).context(format!(
                "failed to load CA from secret {}/{}",
                namespace, self.secret_name
            )),
            _ => Err(Error::ca_secret(format!(
                "secret {}/{} conflicted on write but has no CA after re-fetch",
                namespace, self.secret_name
            ))),
        }
    }

    async fn get(&self, ctx: &SetupContext, namespace: &str) -> Result<Option<Secret>> {
        ctx.run(
            "get CA secret",
            self.api.get_secret(namespace, &self.secret_name),
        )
        .await
        .context(format!(
            "failed to get secret {}/{}",
            namespace, self.secret_name
        ))
    }

    fn new_secret(&self, namespace: &str, ca: &CertificateAuthority) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(self.secret_name.clone()),
                namespace: Some(namespace.to_string()),
                labels: Some(BTreeMap::from([(
                    "app.kubernetes.io/managed-by".to_string(),
                    "crdb-operator".to_string(),
                )])),
                ..Default::default()
            },
            type_: Some("Opaque".to_string()),
            data: Some(ca_data(ca)),
            ..Default::default()
        }
    }
}

fn has_data(secret: &Secret) -> bool {
    secret.data.as_ref().is_some_and(|d| !d.is_empty())
}

fn ca_data(ca: &CertificateAuthority) -> BTreeMap<String, ByteString> {
    BTreeMap::from([
        (CA_CERT_KEY.to_string(), ByteString(ca.certificate().to_vec())),
        (CA_KEY_KEY.to_string(), ByteString(ca.private_key().to_vec())),
    ])
}

fn ca_from_secret(secret: &Secret) -> Result<CertificateAuthority> {
    let data = secret
        .data
        .as_ref()
        .ok_or_else(|| Error::ca_secret("CA secret has no data"))?;

    let field = |key: &str| -> Result<String> {
        let bytes = data
            .get(key)
            .ok_or_else(|| Error::ca_secret(format!("CA secret missing {}", key)))?;
        String::from_utf8(bytes.0.clone())
            .map_err(|e| Error::ca_secret(format!("invalid {} encoding: {}", key, e)))
    };

    let cert_pem = field(CA_CERT_KEY)?;
    let key_pem = field(CA_KEY_KEY)?;

    CertificateAuthority::from_pem(&cert_pem, &key_pem)
        .map_err(|e| Error::ca_secret(format!("failed to parse CA: {}", e)))
}
