//! Destination pod resolution
//!
//! A `pod` destination is created on demand and owned by the claim; an
//! `existingPod` destination must already exist and is never modified.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, EnvVar, LocalObjectReference, Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::Readiness;
use crate::adapters::{ComputeApi, ExecTarget, CLAIM_LABEL};
use crate::cancellation::cancellable;
use crate::config::Settings;
use crate::crd::{BackupClaim, ExistingPodDestinationSpec, NewPodDestinationSpec};
use crate::error::{Error, Result};
use crate::metrics;

/// Pod phase considered ready for transfers
pub const RUNNING_PHASE: &str = "Running";

/// Suffix appended to the claim's name prefix
pub const POD_NAME_SUFFIX: &str = "-backupclaim";

/// Resolved destination pod
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DestinationTarget {
    pub namespace: String,
    pub name: String,
    /// First container of the pod, where commands run
    pub container: String,
    pub phase: String,
}

impl DestinationTarget {
    pub fn from_pod(pod: &Pod) -> Result<Self> {
        let name = pod.name_any();
        let container = pod
            .spec
            .as_ref()
            .and_then(|spec| spec.containers.first())
            .map(|c| c.name.clone())
            .ok_or_else(|| Error::validation(format!("Pod '{}' has no containers", name)))?;

        Ok(Self {
            namespace: pod.namespace().unwrap_or_else(|| "default".to_string()),
            name,
            container,
            phase: pod
                .status
                .as_ref()
                .and_then(|s| s.phase.clone())
                .unwrap_or_else(|| "Unknown".to_string()),
        })
    }

    pub fn is_running(&self) -> bool {
        self.phase == RUNNING_PHASE
    }

    pub fn exec_target(&self) -> ExecTarget {
        ExecTarget {
            namespace: self.namespace.clone(),
            pod: self.name.clone(),
            container: self.container.clone(),
        }
    }

    fn readiness(self) -> Readiness<Self> {
        if self.is_running() {
            Readiness::Ready(self)
        } else {
            Readiness::Pending
        }
    }
}

fn claim_uid(claim: &BackupClaim) -> Result<String> {
    claim.uid().ok_or_else(|| {
        Error::validation(format!(
            "BackupClaim '{}' has no uid, cannot own a pod",
            claim.name_any()
        ))
    })
}

/// Build the pod created for a `pod` destination
pub fn new_pod_manifest(
    claim: &BackupClaim,
    spec: &NewPodDestinationSpec,
    settings: &Settings,
) -> Result<Pod> {
    let uid = claim_uid(claim)?;
    let owner = claim
        .controller_owner_ref(&())
        .ok_or_else(|| Error::validation(format!("BackupClaim '{}' cannot own a pod", claim.name_any())))?;

    Ok(Pod {
        metadata: ObjectMeta {
            name: Some(format!("{}{}", spec.name_prefix, POD_NAME_SUFFIX)),
            namespace: claim.namespace(),
            labels: Some(BTreeMap::from([(CLAIM_LABEL.to_string(), uid)])),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: settings.destination_container.clone(),
                image: Some(settings.destination_image.clone()),
                env: Some(vec![EnvVar {
                    name: "MYSQL_ALLOW_EMPTY_PASSWORD".to_string(),
                    value: Some("true".to_string()),
                    ..Default::default()
                }]),
                resources: Some(spec.resources.clone()),
                ..Default::default()
            }],
            image_pull_secrets: Some(vec![LocalObjectReference {
                name: settings.image_pull_secret.clone(),
            }]),
            ..Default::default()
        }),
        status: None,
    })
}

/// Ensure the claim's own pod exists and report whether it is running.
///
/// Creation is asynchronous, so a freshly created pod is always pending.
pub async fn resolve_new_pod(
    compute: &dyn ComputeApi,
    claim: &BackupClaim,
    spec: &NewPodDestinationSpec,
    settings: &Settings,
    cancel: &CancellationToken,
) -> Result<Readiness<DestinationTarget>> {
    let namespace = claim.namespace().unwrap_or_else(|| "default".to_string());
    let uid = claim_uid(claim)?;

    let mut pods = cancellable(cancel, compute.list_owned(&namespace, &uid)).await?;

    if pods.is_empty() {
        let manifest = new_pod_manifest(claim, spec, settings)?;
        let created = cancellable(cancel, compute.create(&namespace, &manifest)).await?;
        info!(
            namespace = %namespace,
            pod = %created.name_any(),
            "Destination pod does not exist, created it"
        );
        metrics::DESTINATIONS_CREATED.with_label_values(&[&namespace]).inc();
        return Ok(Readiness::Pending);
    }

    if pods.len() > 1 {
        warn!(
            namespace = %namespace,
            count = pods.len(),
            "Claim owns several pods, using the oldest"
        );
        pods.sort_by(|a, b| {
            let a_created = a.metadata.creation_timestamp.as_ref().map(|t| t.0);
            let b_created = b.metadata.creation_timestamp.as_ref().map(|t| t.0);
            a_created
                .cmp(&b_created)
                .then_with(|| a.name_any().cmp(&b.name_any()))
        });
    }

    Ok(DestinationTarget::from_pod(&pods[0])?.readiness())
}

/// Look up an externally managed pod and report whether it is running.
pub async fn resolve_existing_pod(
    compute: &dyn ComputeApi,
    spec: &ExistingPodDestinationSpec,
    cancel: &CancellationToken,
) -> Result<Readiness<DestinationTarget>> {
    let pod = cancellable(cancel, compute.get(&spec.namespace, &spec.name))
        .await?
        .ok_or_else(|| {
            Error::DestinationNotFound(format!(
                "Could not find pod in namespace '{}' with name '{}'",
                spec.namespace, spec.name
            ))
        })?;

    Ok(DestinationTarget::from_pod(&pod)?.readiness())
}
