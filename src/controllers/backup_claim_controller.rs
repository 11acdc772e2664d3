//! BackupClaim controller
//!
//! Watches BackupClaim resources and the pods they own, and triggers
//! reconciliation.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::ListParams,
    runtime::{
        controller::{Action, Controller},
        watcher::Config as WatcherConfig,
    },
    Api, Client, ResourceExt,
};
use tracing::{error, info, instrument};

use crate::adapters::CLAIM_LABEL;
use crate::controllers::Context;
use crate::crd::BackupClaim;
use crate::error::{Error, Result};
use crate::metrics;
use crate::reconcilers::backup_claim as claim_reconciler;

const KIND: &str = "BackupClaim";

/// Run the BackupClaim controller
pub async fn run(client: Client, context: Arc<Context>) {
    let api: Api<BackupClaim> = Api::all(client.clone());

    // Verify CRD is installed
    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!("BackupClaim CRD not installed: {}", e);
        return;
    }

    info!("Starting BackupClaim controller");

    let pods: Api<Pod> = Api::all(client);

    Controller::new(api, WatcherConfig::default())
        .owns(pods, WatcherConfig::default().labels(CLAIM_LABEL))
        .shutdown_on_signal()
        .run(reconcile, error_policy, context)
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => {
                    info!(
                        name = %obj.name,
                        namespace = obj.namespace.as_deref().unwrap_or("default"),
                        action = ?action,
                        "Reconciled BackupClaim"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Reconciliation error");
                    metrics::RECONCILIATION_ERRORS.with_label_values(&[KIND]).inc();
                }
            }
        })
        .await;
}

/// Main reconciliation function
#[instrument(skip(ctx, obj), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile(obj: Arc<BackupClaim>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = metrics::RECONCILE_DURATION
        .with_label_values(&[KIND])
        .start_timer();
    metrics::RECONCILIATIONS.with_label_values(&[KIND]).inc();

    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let cancel = ctx.shutdown.child_token();

    claim_reconciler::reconcile(&ctx, &namespace, &obj.name_any(), &cancel).await
}

/// Error policy for the controller
pub fn error_policy(obj: Arc<BackupClaim>, error: &Error, _ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    error!(
        name = %name,
        error = %error,
        "Reconciliation failed, scheduling retry"
    );

    Action::requeue(requeue_after(error))
}

/// Retry delay for a failed reconciliation, by error kind
fn requeue_after(error: &Error) -> Duration {
    match error {
        Error::Kube(_) | Error::Exec(_) => Duration::from_secs(30),
        Error::Config(_) | Error::Validation(_) => Duration::from_secs(300),
        Error::Storage(_) | Error::Transfer(_) => Duration::from_secs(60),
        Error::SourceNotFound(_) | Error::DestinationNotFound(_) => Duration::from_secs(120),
        Error::Command { .. } => Duration::from_secs(300),
        Error::Cancelled => Duration::from_secs(5),
        _ => Duration::from_secs(30),
    }
}
