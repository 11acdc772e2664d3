//! BackupClaim Custom Resource Definition

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::ResourceRequirements;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// BackupClaim resource specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "backups.nvanheuverzwijn.io",
    version = "v1beta1",
    kind = "BackupClaim",
    plural = "backupclaims",
    singular = "backupclaim",
    shortname = "bc",
    namespaced,
    status = "BackupClaimStatus",
    printcolumn = r#"{"name": "Status", "type": "string", "jsonPath": ".status.status"}"#,
    printcolumn = r#"{"name": "Error", "type": "string", "jsonPath": ".status.error"}"#,
    printcolumn = r#"{"name": "Resolved", "type": "date", "jsonPath": ".status.resolvedAt"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BackupClaimSpec {
    /// Source of the backup
    #[serde(default)]
    pub source: BackupClaimSourceSpec,

    /// Destination for the backup
    #[serde(default)]
    pub destination: BackupClaimDestinationSpec,
}

/// Source specification. Only S3 is supported.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupClaimSourceSpec {
    /// S3 object holding the backup
    #[serde(default)]
    pub s3: S3SourceSpec,
}

/// S3 object reference
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct S3SourceSpec {
    /// Bucket name. Empty means no source is configured.
    #[serde(default)]
    pub bucket_name: String,

    /// Object key inside the bucket
    #[serde(default)]
    pub key: String,
}

/// Destination specification. At most one variant may be populated.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupClaimDestinationSpec {
    /// Pod created and owned by the claim
    #[serde(default)]
    pub pod: NewPodDestinationSpec,

    /// Pod that already exists and is managed elsewhere
    #[serde(default)]
    pub existing_pod: ExistingPodDestinationSpec,
}

/// New pod destination
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewPodDestinationSpec {
    /// Prefix given to the created pod. Empty means the variant is not selected.
    #[serde(default)]
    pub name_prefix: String,

    /// Resources requested for the database container
    #[serde(default)]
    pub resources: ResourceRequirements,
}

/// Existing pod destination
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExistingPodDestinationSpec {
    /// Namespace of the pod. Empty means the variant is not selected.
    #[serde(default)]
    pub namespace: String,

    /// Pod name
    #[serde(default)]
    pub name: String,
}

/// Typed view of a configured source
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceDescriptor {
    S3 { bucket: String, key: String },
}

/// Typed view of a configured destination
#[derive(Clone, Debug, PartialEq)]
pub enum DestinationDescriptor {
    NewPod(NewPodDestinationSpec),
    ExistingPod(ExistingPodDestinationSpec),
}

impl BackupClaimSourceSpec {
    /// Resolve the configured source, if any.
    pub fn descriptor(&self) -> Result<Option<SourceDescriptor>> {
        if self.s3.bucket_name.is_empty() {
            return Ok(None);
        }
        if self.s3.key.is_empty() {
            return Err(Error::validation(format!(
                "S3 source in bucket '{}' has no key",
                self.s3.bucket_name
            )));
        }
        Ok(Some(SourceDescriptor::S3 {
            bucket: self.s3.bucket_name.clone(),
            key: self.s3.key.clone(),
        }))
    }
}

impl BackupClaimDestinationSpec {
    /// Resolve the configured destination, rejecting ambiguous specs.
    pub fn descriptor(&self) -> Result<Option<DestinationDescriptor>> {
        let new_pod = !self.pod.name_prefix.is_empty();
        let existing_pod = !self.existing_pod.namespace.is_empty();

        match (new_pod, existing_pod) {
            (true, true) => Err(Error::validation(
                "Destination must set either pod or existingPod, not both",
            )),
            (true, false) => Ok(Some(DestinationDescriptor::NewPod(self.pod.clone()))),
            (false, true) => {
                if self.existing_pod.name.is_empty() {
                    return Err(Error::validation(format!(
                        "existingPod in namespace '{}' has no name",
                        self.existing_pod.namespace
                    )));
                }
                Ok(Some(DestinationDescriptor::ExistingPod(
                    self.existing_pod.clone(),
                )))
            }
            (false, false) => Ok(None),
        }
    }
}

/// Workflow progress of a claim
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ClaimPhase {
    #[serde(rename = "Reconciling")]
    Reconciling,
    #[serde(rename = "Failed to resolve source")]
    FailedToResolveSource,
    #[serde(rename = "Failed to resolve destination")]
    FailedToResolveDestination,
    #[serde(rename = "Ready")]
    Ready,
}

/// BackupClaim status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupClaimStatus {
    /// Current status of the claim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ClaimPhase>,

    /// Last error, empty when the claim is healthy
    #[serde(default)]
    pub error: String,

    /// When the claim was created
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    /// When the claim was resolved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl BackupClaim {
    /// Current phase, if any status has been recorded
    pub fn phase(&self) -> Option<ClaimPhase> {
        self.status.as_ref().and_then(|s| s.status)
    }

    /// Whether a previous pass already marked the claim Ready
    pub fn is_ready(&self) -> bool {
        self.phase() == Some(ClaimPhase::Ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_spec_has_no_descriptors() {
        let spec = BackupClaimSpec::default();
        assert_eq!(spec.source.descriptor().unwrap(), None);
        assert_eq!(spec.destination.descriptor().unwrap(), None);
    }

    #[test]
    fn test_both_destinations_rejected() {
        let destination = BackupClaimDestinationSpec {
            pod: NewPodDestinationSpec {
                name_prefix: "db1".to_string(),
                ..Default::default()
            },
            existing_pod: ExistingPodDestinationSpec {
                namespace: "n".to_string(),
                name: "p".to_string(),
            },
        };
        let err = destination.descriptor().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_source_without_key_rejected() {
        let source = BackupClaimSourceSpec {
            s3: S3SourceSpec {
                bucket_name: "b".to_string(),
                key: String::new(),
            },
        };
        assert!(source.descriptor().is_err());
    }

    #[test]
    fn test_spec_wire_format() {
        let spec: BackupClaimSpec = serde_json::from_value(json!({
            "source": { "s3": { "bucketName": "b", "key": "k.sql.xz" } },
            "destination": { "existingPod": { "namespace": "n", "name": "p" } }
        }))
        .unwrap();

        assert_eq!(
            spec.source.descriptor().unwrap(),
            Some(SourceDescriptor::S3 {
                bucket: "b".to_string(),
                key: "k.sql.xz".to_string()
            })
        );
        assert!(matches!(
            spec.destination.descriptor().unwrap(),
            Some(DestinationDescriptor::ExistingPod(_))
        ));
    }

    #[test]
    fn test_status_strings() {
        let status = BackupClaimStatus {
            status: Some(ClaimPhase::FailedToResolveDestination),
            error: "boom".to_string(),
            ..Default::default()
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["status"], "Failed to resolve destination");
        assert_eq!(value["error"], "boom");
        assert!(value.get("resolvedAt").is_none());
    }
}
