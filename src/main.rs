//! crdb-operator - prepares webhook TLS before the operator serves admission requests

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::Client;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crdb_operator::cluster::KubeClusterApi;
use crdb_operator::context::SetupContext;
use crdb_operator::retry::RetryConfig;
use crdb_operator::webhook::{
    DEFAULT_CA_SECRET_NAME, DEFAULT_MUTATING_CONFIG_NAME, DEFAULT_VALIDATING_CONFIG_NAME,
    DEFAULT_WEBHOOK_SERVICE_NAME,
};
use crdb_operator::{
    setup_webhook_tls, WebhookTlsConfig, DEFAULT_CERT_DIR, DEFAULT_SETUP_TIMEOUT_SECS,
    NAMESPACE_ENV,
};

/// crdb-operator - CockroachDB operator webhook TLS bootstrap
#[derive(Parser, Debug)]
#[command(name = "crdb-operator", version, about, long_about = None)]
struct Cli {
    /// Namespace the operator runs in; holds the CA secret and webhook service
    #[arg(long, env = NAMESPACE_ENV)]
    namespace: Option<String>,

    /// Directory the webhook server reads tls.crt and tls.key from
    #[arg(long, default_value = DEFAULT_CERT_DIR)]
    cert_dir: PathBuf,

    /// Service fronting the webhook server
    #[arg(long, default_value = DEFAULT_WEBHOOK_SERVICE_NAME)]
    webhook_service: String,

    /// Secret holding the webhook CA
    #[arg(long, default_value = DEFAULT_CA_SECRET_NAME)]
    ca_secret: String,

    /// MutatingWebhookConfiguration to patch (repeatable)
    #[arg(long = "mutating-webhook-config", default_values_t = [DEFAULT_MUTATING_CONFIG_NAME.to_string()])]
    mutating_configs: Vec<String>,

    /// ValidatingWebhookConfiguration to patch (repeatable)
    #[arg(long = "validating-webhook-config", default_values_t = [DEFAULT_VALIDATING_CONFIG_NAME.to_string()])]
    validating_configs: Vec<String>,

    /// Attempts per webhook configuration update before giving up on conflicts
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u32).range(1..))]
    patch_retries: u32,

    /// Deadline for the whole setup in seconds
    #[arg(long, default_value_t = DEFAULT_SETUP_TIMEOUT_SECS)]
    setup_timeout_secs: u64,

    /// Skip webhook TLS setup entirely
    #[arg(long)]
    skip_webhook_config: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn tls_config(&self) -> anyhow::Result<WebhookTlsConfig> {
        let namespace = self
            .namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .ok_or_else(|| anyhow::anyhow!("{} must be set", NAMESPACE_ENV))?;

        Ok(WebhookTlsConfig::new(namespace)
            .with_cert_dir(self.cert_dir.clone())
            .with_service_name(self.webhook_service.clone())
            .with_ca_secret_name(self.ca_secret.clone())
            .with_mutating_configs(self.mutating_configs.clone())
            .with_validating_configs(self.validating_configs.clone())
            .with_retry(RetryConfig::with_max_attempts(self.patch_retries)))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.log_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    if cli.skip_webhook_config {
        tracing::info!("Skipping webhook TLS setup");
        return Ok(());
    }

    if let Err(e) = run_setup(&cli).await {
        let chain: Vec<String> = e.chain().map(ToString::to_string).collect();
        tracing::error!(error = %e, chain = ?chain, "Webhook TLS setup failed");
        std::process::exit(1);
    }
    Ok(())
}

async fn run_setup(cli: &Cli) -> anyhow::Result<()> {
    let config = cli.tls_config()?;
    tracing::info!(namespace = %config.namespace, "crdb-operator webhook TLS setup starting...");

    let token = CancellationToken::new();
    let ctx = SetupContext::with_timeout(Duration::from_secs(cli.setup_timeout_secs))
        .with_token(token.clone());

    let signal_task = tokio::spawn(async move {
        shutdown_signal().await;
        tracing::warn!("Shutdown signal received, cancelling webhook TLS setup");
        token.cancel();
    });

    let result = async {
        let api = Arc::new(KubeClusterApi::new(connect(&ctx).await?));
        setup_webhook_tls(&ctx, api, config).await
    }
    .await;
    signal_task.abort();

    let report = result?;
    tracing::info!(
        serial = %report.serial,
        mutating_updated = report.mutating.updated.len(),
        validating_updated = report.validating.updated.len(),
        "Webhook TLS ready"
    );
    Ok(())
}

/// Build the Kubernetes client under the setup deadline and signal token
async fn connect(ctx: &SetupContext) -> crdb_operator::Result<Client> {
    ctx.run("failed to create Kubernetes client", Client::try_default())
        .await
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
