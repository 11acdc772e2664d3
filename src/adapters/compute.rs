//! Pod lookup and creation for destinations

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{ListParams, PostParams};
use kube::{Api, Client};

use crate::error::Result;

/// Label put on pods created for a claim, valued with the claim UID.
///
/// Claim names may exceed the 63 characters allowed in a label value; UIDs
/// never do.
pub const CLAIM_LABEL: &str = "backups.nvanheuverzwijn.io/claim-uid";

/// Kind recorded in owner references of claim-owned pods
pub const CLAIM_KIND: &str = "BackupClaim";

/// Pod operations the destination resolver needs
#[async_trait]
pub trait ComputeApi: Send + Sync + 'static {
    /// Pods in `namespace` whose controller is the claim with UID `claim_uid`.
    async fn list_owned(&self, namespace: &str, claim_uid: &str) -> Result<Vec<Pod>>;

    /// Look up a pod by name regardless of ownership.
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Pod>>;

    /// Create a pod and return what the API server stored.
    async fn create(&self, namespace: &str, pod: &Pod) -> Result<Pod>;
}

/// Whether `pod` is controlled by the claim with UID `claim_uid`
pub fn is_owned_by_claim(pod: &Pod, claim_uid: &str) -> bool {
    pod.metadata
        .owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .any(|owner| owner.controller == Some(true) && owner.kind == CLAIM_KIND && owner.uid == claim_uid)
}

/// [`ComputeApi`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeCompute {
    client: Client,
}

impl KubeCompute {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ComputeApi for KubeCompute {
    async fn list_owned(&self, namespace: &str, claim_uid: &str) -> Result<Vec<Pod>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&format!("{}={}", CLAIM_LABEL, claim_uid));
        let list = pods.list(&params).await?;
        Ok(list
            .items
            .into_iter()
            .filter(|pod| is_owned_by_claim(pod, claim_uid))
            .collect())
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(pods.get_opt(name).await?)
    }

    async fn create(&self, namespace: &str, pod: &Pod) -> Result<Pod> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(pods.create(&PostParams::default(), pod).await?)
    }
}
