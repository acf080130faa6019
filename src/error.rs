//! Error types for webhook TLS setup

use std::path::PathBuf;

use thiserror::Error;

use crate::pki::PkiError;

/// Main error type for webhook TLS operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error (unreachable, forbidden, rejected)
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// The CA secret exists but its contents cannot be used
    #[error("CA secret error: {0}")]
    CaSecret(String),

    /// Key or certificate synthesis failed
    #[error("certificate error: {0}")]
    Pki(#[from] PkiError),

    /// Directory or file I/O failed
    #[error("failed to write {}: {source}", path.display())]
    FileWrite {
        /// Path that could not be written
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A webhook configuration update kept conflicting until retries ran out
    #[error("update of {name} still conflicting after {attempts} attempts")]
    WebhookPatch {
        /// Name of the webhook configuration
        name: String,
        /// Number of update attempts made
        attempts: u32,
    },

    /// The execution context was cancelled or its deadline passed
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Invalid configuration input
    #[error("configuration error: {0}")]
    Config(String),

    /// An error wrapped with the action that was being attempted
    #[error("{action}: {source}")]
    Context {
        /// Description of the attempted action
        action: String,
        /// The underlying failure
        #[source]
        source: Box<Error>,
    },
}

/// Failure categories, independent of where in the pipeline they happened
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Cluster API unreachable, forbidden, or returned unusable data
    ConfigAccess,
    /// Key or certificate synthesis failure
    CertificateGeneration,
    /// Directory or file I/O failure
    FileWrite,
    /// Webhook update rejected after retries were exhausted
    WebhookPatch,
    /// Context expired or cancelled mid-call
    Cancellation,
    /// Bad configuration input
    Configuration,
}

impl Error {
    /// Create a CA secret error with the given message
    pub fn ca_secret(msg: impl Into<String>) -> Self {
        Self::CaSecret(msg.into())
    }

    /// Create a cancellation error with the given message
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Wrap this error with a description of the attempted action
    pub fn context(self, action: impl Into<String>) -> Self {
        Self::Context {
            action: action.into(),
            source: Box::new(self),
        }
    }

    /// The category of the innermost error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Kube(_) | Error::CaSecret(_) => ErrorKind::ConfigAccess,
            Error::Pki(_) => ErrorKind::CertificateGeneration,
            Error::FileWrite { .. } => ErrorKind::FileWrite,
            Error::WebhookPatch { .. } => ErrorKind::WebhookPatch,
            Error::Cancelled(_) => ErrorKind::Cancellation,
            Error::Config(_) => ErrorKind::Configuration,
            Error::Context { source, .. } => source.kind(),
        }
    }

    /// Whether the innermost error is an API 409 (stale write or already exists)
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Kube(e) => crate::cluster::is_conflict(e),
            Error::Context { source, .. } => source.is_conflict(),
            _ => false,
        }
    }
}

/// Attach an action description to the error of a `Result`
pub trait ResultExt<T> {
    /// Wrap the error, if any, with the attempted action
    fn context(self, action: impl Into<String>) -> crate::Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, action: impl Into<String>) -> crate::Result<T> {
        self.map_err(|e| e.into().context(action))
    }
}
