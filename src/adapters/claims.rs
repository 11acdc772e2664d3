//! BackupClaim persistence

use async_trait::async_trait;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use serde_json::json;

use crate::crd::{BackupClaim, BackupClaimStatus};
use crate::error::Result;

/// Field manager used for status patches
pub const FIELD_MANAGER: &str = "backup-claim-operator";

/// Loads claims and persists their status sub-resource
#[async_trait]
pub trait ClaimStore: Send + Sync + 'static {
    /// Fetch the current claim, `None` if it was deleted.
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<BackupClaim>>;

    /// Replace the observed status of a claim.
    async fn update_status(
        &self,
        namespace: &str,
        name: &str,
        status: &BackupClaimStatus,
    ) -> Result<()>;
}

/// [`ClaimStore`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeClaimStore {
    client: Client,
}

impl KubeClaimStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClaimStore for KubeClaimStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<BackupClaim>> {
        let api: Api<BackupClaim> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn update_status(
        &self,
        namespace: &str,
        name: &str,
        status: &BackupClaimStatus,
    ) -> Result<()> {
        let api: Api<BackupClaim> = Api::namespaced(self.client.clone(), namespace);
        let patch = json!({ "status": status });
        api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
            .await?;
        Ok(())
    }
}
