//! Kubernetes controller for BackupClaim resources
//!
//! Watches claims (and the pods they own) and triggers reconciliation.

mod backup_claim_controller;

pub use backup_claim_controller::{error_policy, run as run_backup_claim_controller};

use std::sync::Arc;

use kube::Client;
use tokio_util::sync::CancellationToken;

use crate::adapters::{
    ClaimStore, ComputeApi, KubeClaimStore, KubeCompute, KubeExecutor, ObjectStore,
    RemoteExecutor,
};
use crate::config::Settings;

/// Shared context for reconciliations.
///
/// Holds only capabilities and settings; everything about a particular claim
/// is passed per call.
pub struct Context {
    pub claims: Arc<dyn ClaimStore>,
    pub compute: Arc<dyn ComputeApi>,
    pub executor: Arc<dyn RemoteExecutor>,
    pub store: Arc<dyn ObjectStore>,
    pub settings: Settings,
    /// Cancelled when the operator shuts down
    pub shutdown: CancellationToken,
}

impl Context {
    /// Create a context backed by the cluster and the given object store
    pub fn new(
        client: Client,
        store: Arc<dyn ObjectStore>,
        settings: Settings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            claims: Arc::new(KubeClaimStore::new(client.clone())),
            compute: Arc::new(KubeCompute::new(client.clone())),
            executor: Arc::new(KubeExecutor::new(client)),
            store,
            settings,
            shutdown,
        }
    }
}
