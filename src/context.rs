//! Execution context for the setup pipeline
//!
//! Every cluster call and backoff sleep goes through [`SetupContext::run`] so
//! a cancelled token or an expired deadline aborts the in-flight call with a
//! cancellation error instead of letting it hang.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Cancellation token plus optional deadline, passed down explicitly
#[derive(Clone, Debug, Default)]
pub struct SetupContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl SetupContext {
    /// Context that never expires on its own
    pub fn new() -> Self {
        Self::default()
    }

    /// Context that expires `timeout` from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Use an externally owned token (e.g. one cancelled by a signal handler)
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The cancellation token
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancel the context
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the context is cancelled or past its deadline
    pub fn is_done(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Run `fut`, failing with a cancellation error if the context ends first
    pub async fn run<T, E, F>(&self, action: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: Into<Error>,
    {
        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                Err(Error::cancelled(format!("{action}: context cancelled")))
            }
            _ = deadline => {
                Err(Error::cancelled(format!("{action}: deadline exceeded")))
            }
            res = fut => res.map_err(Into::into),
        }
    }

    /// Sleep for `duration` unless the context ends first
    pub async fn sleep(&self, action: &str, duration: Duration) -> Result<()> {
        self.run(action, async {
            tokio::time::sleep(duration).await;
            Ok::<_, Error>(())
        })
        .await
    }
}
