//! Serving certificate issuance

use tracing::{info, instrument};

use super::ca::CaManager;
use crate::context::SetupContext;
use crate::pki::ServingCertificate;
use crate::Result;

/// DNS names under which the API server reaches the webhook service
pub fn service_dns_names(service: &str, namespace: &str) -> Vec<String> {
    vec![
        service.to_string(),
        format!("{}.{}", service, namespace),
        format!("{}.{}.svc", service, namespace),
        format!("{}.{}.svc.cluster.local", service, namespace),
    ]
}

/// Mints a fresh serving certificate, signed by the webhook CA, on every call
#[derive(Clone)]
pub struct CertificateIssuer {
    ca: CaManager,
    service_name: String,
}

impl CertificateIssuer {
    /// Create an issuer for the given webhook service
    pub fn new(ca: CaManager, service_name: impl Into<String>) -> Self {
        Self {
            ca,
            service_name: service_name.into(),
        }
    }

    /// Generate a new key pair and certificate for the webhook service in `namespace`
    ///
    /// The CA is obtained through [`CaManager::find_or_create`], so the leaf
    /// always chains to the CA that ends up in the webhook CA bundles.
    #[instrument(skip_all, fields(namespace = %namespace, service = %self.service_name))]
    pub async fn issue(&self, ctx: &SetupContext, namespace: &str) -> Result<ServingCertificate> {
        let ca = self.ca.find_or_create(ctx, namespace).await?;

        let dns_names = service_dns_names(&self.service_name, namespace);
        let cert = ca.issue_serving_cert(&self.service_name, &dns_names)?;

        let info = cert.cert_info()?;
        info!(
            serial = %info.serial,
            not_after = info.not_after,
            "Issued webhook serving certificate"
        );
        Ok(cert)
    }
}
