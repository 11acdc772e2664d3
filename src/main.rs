//! Backup Claim Kubernetes Operator
//!
//! Main entry point for the operator. Loads settings, sets up the Kubernetes
//! and object store clients, and runs the BackupClaim controller.

use std::future::Future;
use std::sync::Arc;

use clap::Parser;
use kube::Client;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use backup_claim_operator::{
    adapters::S3ObjectStore,
    config::Settings,
    controllers::{self, Context},
    metrics,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::parse();

    // Initialize tracing
    init_tracing();

    settings.validate()?;
    info!("Starting Backup Claim Operator");

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    let store = Arc::new(S3ObjectStore::from_env().await);
    let shutdown = CancellationToken::new();

    // Create shared context
    let metrics_port = settings.metrics_port;
    let context = Arc::new(Context::new(
        client.clone(),
        store,
        settings,
        shutdown.clone(),
    ));

    // Start metrics server
    let metrics_handle = tokio::spawn(metrics::serve(metrics_port));
    info!("Metrics server starting on port {}", metrics_port);

    let controller = controllers::run_backup_claim_controller(client, context);
    supervise(controller, metrics_handle, shutdown_signal(), &shutdown).await;

    info!("Backup Claim Operator stopped");
    Ok(())
}

/// Run the controller until it or the metrics server exits, or `signal` fires.
///
/// On a signal the root token is cancelled before the controller is awaited,
/// so reconciliations in flight stop and the controller can drain.
async fn supervise<C, M, S>(controller: C, metrics_server: M, signal: S, shutdown: &CancellationToken)
where
    C: Future<Output = ()>,
    M: Future,
    S: Future<Output = ()>,
{
    tokio::pin!(controller);

    let stopping = tokio::select! {
        _ = &mut controller => {
            error!("BackupClaim controller exited");
            false
        }
        _ = metrics_server => {
            error!("Metrics server exited unexpectedly");
            false
        }
        _ = signal => {
            info!("Received shutdown signal, stopping operator");
            true
        }
    };

    metrics::OPERATOR_HEALTH.set(0.0);
    shutdown.cancel();

    if stopping {
        controller.await;
    }
}

/// Initialize tracing subscriber
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kube=warn,hyper=warn,aws=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
