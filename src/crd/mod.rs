//! Custom Resource Definitions for the Backup Claim Operator

mod backup_claim;

pub use backup_claim::*;

use kube::CustomResourceExt;

/// Generate all CRD YAML manifests
pub fn generate_crds() -> Result<Vec<String>, serde_yaml::Error> {
    Ok(vec![serde_yaml::to_string(&BackupClaim::crd())?])
}
