//! BackupClaim reconciler
//!
//! One pass walks the claim through, short-circuiting at the first stage
//! that fails or has to wait:
//! - destination resolution
//! - source resolution (including cold-tier thaw)
//! - transfer into the destination
//! - status update

use chrono::Utc;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::controllers::Context;
use crate::crd::{BackupClaim, BackupClaimStatus, ClaimPhase, DestinationDescriptor, SourceDescriptor};
use crate::error::{Error, Result};
use crate::metrics;
use crate::resolvers::{
    resolve_existing_pod, resolve_new_pod, resolve_source, DestinationTarget, ObjectReader,
    Readiness,
};
use crate::transfer::{naming, Transfer, TransferOutcome};

/// Reconcile the claim `namespace/name`.
#[instrument(skip(ctx, cancel))]
pub async fn reconcile(
    ctx: &Context,
    namespace: &str,
    name: &str,
    cancel: &CancellationToken,
) -> Result<Action> {
    let Some(claim) = ctx.claims.get(namespace, name).await? else {
        debug!("BackupClaim no longer exists");
        return Ok(Action::await_change());
    };

    // Both descriptors are checked before anything is created
    let destination = match claim.spec.destination.descriptor() {
        Ok(descriptor) => descriptor,
        Err(e) => return fail(ctx, &claim, ClaimPhase::FailedToResolveDestination, e).await,
    };
    let source = match claim.spec.source.descriptor() {
        Ok(descriptor) => descriptor,
        Err(e) => return fail(ctx, &claim, ClaimPhase::FailedToResolveSource, e).await,
    };
    if let (Some(DestinationDescriptor::NewPod(_)), Some(SourceDescriptor::S3 { key, .. })) =
        (&destination, &source)
    {
        if let Err(e) = naming::load_target_name(key) {
            return fail(ctx, &claim, ClaimPhase::FailedToResolveSource, e).await;
        }
    }

    // Destination
    let target = match &destination {
        Some(descriptor) => {
            let resolved = match descriptor {
                DestinationDescriptor::NewPod(spec) => {
                    resolve_new_pod(ctx.compute.as_ref(), &claim, spec, &ctx.settings, cancel).await
                }
                DestinationDescriptor::ExistingPod(spec) => {
                    resolve_existing_pod(ctx.compute.as_ref(), spec, cancel).await
                }
            };

            match resolved {
                Ok(Readiness::Ready(target)) => Some(target),
                Ok(Readiness::Pending) => {
                    info!("Destination pod is not running yet");
                    persist(ctx, &claim, ClaimPhase::Reconciling, String::new()).await;
                    return Ok(Action::requeue(ctx.settings.destination_requeue()));
                }
                Err(e) => return fail(ctx, &claim, ClaimPhase::FailedToResolveDestination, e).await,
            }
        }
        None => None,
    };

    // Source
    let reader = match source {
        Some(SourceDescriptor::S3 { bucket, key }) => {
            let resolved = resolve_source(
                ctx.store.clone(),
                &bucket,
                &key,
                ctx.settings.restore_request(),
                cancel,
            )
            .await;

            match resolved {
                Ok(Readiness::Ready(reader)) => Some(reader),
                Ok(Readiness::Pending) => {
                    info!(bucket = %bucket, key = %key, "Waiting for cold-tier restore");
                    return Ok(Action::requeue(ctx.settings.thaw_poll()));
                }
                Err(e) => return fail(ctx, &claim, ClaimPhase::FailedToResolveSource, e).await,
            }
        }
        None => None,
    };

    // Transfer
    if let (Some(descriptor), Some(target), Some(mut reader)) = (destination, target, reader) {
        if let Err(e) = transfer(ctx, &claim, &descriptor, &target, &mut reader, cancel).await {
            let message = format!("fail to send backup to destination: {}", e);
            return fail_with(ctx, &claim, ClaimPhase::FailedToResolveDestination, e, message).await;
        }
    }

    persist(ctx, &claim, ClaimPhase::Ready, String::new()).await;
    info!("BackupClaim is ready");
    Ok(Action::await_change())
}

async fn transfer(
    ctx: &Context,
    claim: &BackupClaim,
    descriptor: &DestinationDescriptor,
    target: &DestinationTarget,
    reader: &mut ObjectReader,
    cancel: &CancellationToken,
) -> Result<TransferOutcome> {
    let transfer = Transfer {
        executor: ctx.executor.as_ref(),
        destination: target,
        already_ready: claim.is_ready(),
        chunk_size: ctx.settings.chunk_size,
        cancel,
    };

    match descriptor {
        DestinationDescriptor::NewPod(_) => transfer.load_into_database(reader).await,
        DestinationDescriptor::ExistingPod(_) => transfer.copy_file(reader).await,
    }
}

/// Record `error` on the claim under `phase` and hand it back to the caller.
async fn fail(ctx: &Context, claim: &BackupClaim, phase: ClaimPhase, error: Error) -> Result<Action> {
    let message = error.to_string();
    fail_with(ctx, claim, phase, error, message).await
}

/// Like [`fail`], recording `message` instead of the bare error. The error
/// itself is returned unchanged so its kind drives the retry policy.
async fn fail_with(
    ctx: &Context,
    claim: &BackupClaim,
    phase: ClaimPhase,
    error: Error,
    message: String,
) -> Result<Action> {
    if matches!(error, Error::Cancelled) {
        return Err(error);
    }
    error!(error = %error, status = ?phase, "BackupClaim failed");
    persist(ctx, claim, phase, message).await;
    Err(error)
}

/// Status that moves `claim` to `phase` with `error`.
pub fn next_status(claim: &BackupClaim, phase: ClaimPhase, error: String) -> BackupClaimStatus {
    let previous = claim.status.clone().unwrap_or_default();
    let resolved_at = match phase {
        ClaimPhase::Ready if previous.status != Some(ClaimPhase::Ready) => Some(Utc::now()),
        _ => previous.resolved_at,
    };

    BackupClaimStatus {
        status: Some(phase),
        error,
        created_at: None,
        resolved_at,
    }
}

/// Persist the claim status. Failures are logged and otherwise ignored.
async fn persist(ctx: &Context, claim: &BackupClaim, phase: ClaimPhase, error: String) {
    let namespace = claim.namespace().unwrap_or_else(|| "default".to_string());
    let name = claim.name_any();
    let status = next_status(claim, phase, error);
    let label = phase_label(phase);

    match ctx.claims.update_status(&namespace, &name, &status).await {
        Ok(()) => {
            metrics::CLAIM_STATUS_UPDATES
                .with_label_values(&[label, "success"])
                .inc();
        }
        Err(e) => {
            warn!(error = %e, status = label, "Could not update BackupClaim status");
            metrics::CLAIM_STATUS_UPDATES
                .with_label_values(&[label, "failure"])
                .inc();
        }
    }
}

fn phase_label(phase: ClaimPhase) -> &'static str {
    match phase {
        ClaimPhase::Reconciling => "reconciling",
        ClaimPhase::FailedToResolveSource => "failed_source",
        ClaimPhase::FailedToResolveDestination => "failed_destination",
        ClaimPhase::Ready => "ready",
    }
}
