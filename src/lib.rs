//! crdb-operator - webhook TLS bootstrap for the CockroachDB operator
//!
//! At startup the operator must serve its admission webhooks over TLS with a
//! certificate the API server trusts. This crate makes that happen:
//!
//! - a namespace-scoped CA kept in a secret and shared by every replica
//! - a fresh serving certificate per process, written to disk for the webhook
//!   HTTPS server
//! - the CA installed as `caBundle` on the operator's mutating and validating
//!   webhook configurations
//!
//! # Modules
//!
//! - [`webhook`] - the setup pipeline and its stages
//! - [`pki`] - CA and serving certificate generation and parsing
//! - [`cluster`] - the cluster API surface the pipeline uses
//! - [`context`] - cancellation and deadline for cluster calls
//! - [`retry`] - exponential backoff for update conflicts
//! - [`error`] - error types and failure kinds

#![deny(missing_docs)]

pub mod cluster;
pub mod context;
pub mod error;
pub mod pki;
pub mod retry;
pub mod webhook;

pub use error::{Error, ErrorKind};
pub use webhook::{setup_webhook_tls, WebhookTls, WebhookTlsConfig};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Default directory the webhook server reads `tls.crt` and `tls.key` from
pub const DEFAULT_CERT_DIR: &str = "/tmp/k8s-webhook-server/serving-certs";

/// Environment variable naming the operator's namespace
pub const NAMESPACE_ENV: &str = "NAMESPACE";

/// Default overall deadline for webhook TLS setup, in seconds
pub const DEFAULT_SETUP_TIMEOUT_SECS: u64 = 60;
