//! In-memory backends for driving the reconciler without a cluster or S3
#![allow(dead_code)]

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::ops::Range;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::{Resource, ResourceExt};
use tokio_util::sync::CancellationToken;

use backup_claim_operator::adapters::{
    is_owned_by_claim, ClaimStore, ComputeApi, DeleteMarker, ExecOutput, ExecTarget, ObjectStore,
    ObjectVersion, RemoteExecutor, RestoreRequest, RestoreState, StorageTier, VersionListing,
};
use backup_claim_operator::config::Settings;
use backup_claim_operator::controllers::Context;
use backup_claim_operator::crd::{
    BackupClaim, BackupClaimDestinationSpec, BackupClaimSourceSpec, BackupClaimSpec,
    BackupClaimStatus, ExistingPodDestinationSpec, NewPodDestinationSpec, S3SourceSpec,
};
use backup_claim_operator::resolvers::Readiness;
use backup_claim_operator::{Error, Result};

// ============================================================================
// Claims
// ============================================================================

#[derive(Default)]
pub struct FakeClaimStore {
    claims: Mutex<HashMap<(String, String), BackupClaim>>,
    updates: Mutex<Vec<BackupClaimStatus>>,
    fail_updates: Mutex<bool>,
}

impl FakeClaimStore {
    pub fn insert(&self, claim: BackupClaim) {
        let key = (
            claim.namespace().unwrap_or_default(),
            claim.name_any(),
        );
        self.claims.lock().unwrap().insert(key, claim);
    }

    pub fn claim(&self, namespace: &str, name: &str) -> BackupClaim {
        self.claims.lock().unwrap()[&(namespace.to_string(), name.to_string())].clone()
    }

    pub fn status(&self, namespace: &str, name: &str) -> BackupClaimStatus {
        self.claim(namespace, name).status.unwrap_or_default()
    }

    /// Every status written, oldest first
    pub fn updates(&self) -> Vec<BackupClaimStatus> {
        self.updates.lock().unwrap().clone()
    }

    pub fn fail_updates(&self) {
        *self.fail_updates.lock().unwrap() = true;
    }
}

#[async_trait]
impl ClaimStore for FakeClaimStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<BackupClaim>> {
        Ok(self
            .claims
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn update_status(
        &self,
        namespace: &str,
        name: &str,
        status: &BackupClaimStatus,
    ) -> Result<()> {
        if *self.fail_updates.lock().unwrap() {
            return Err(Error::validation("status updates disabled"));
        }
        self.updates.lock().unwrap().push(status.clone());

        let mut claims = self.claims.lock().unwrap();
        if let Some(claim) = claims.get_mut(&(namespace.to_string(), name.to_string())) {
            // Merge patch: absent fields keep their stored value
            let previous = claim.status.take().unwrap_or_default();
            claim.status = Some(BackupClaimStatus {
                created_at: status.created_at.or(previous.created_at),
                resolved_at: status.resolved_at.or(previous.resolved_at),
                ..status.clone()
            });
        }
        Ok(())
    }
}

// ============================================================================
// Pods
// ============================================================================

#[derive(Default)]
pub struct FakeCompute {
    pods: Mutex<Vec<Pod>>,
    created: Mutex<usize>,
}

impl FakeCompute {
    pub fn add_pod(&self, pod: Pod) {
        self.pods.lock().unwrap().push(pod);
    }

    pub fn created(&self) -> usize {
        *self.created.lock().unwrap()
    }

    pub fn pods(&self) -> Vec<Pod> {
        self.pods.lock().unwrap().clone()
    }

    /// Move every pod to `phase`
    pub fn set_phase(&self, phase: &str) {
        for pod in self.pods.lock().unwrap().iter_mut() {
            pod.status = Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            });
        }
    }
}

#[async_trait]
impl ComputeApi for FakeCompute {
    async fn list_owned(&self, namespace: &str, claim_uid: &str) -> Result<Vec<Pod>> {
        Ok(self
            .pods
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.namespace().as_deref() == Some(namespace) && is_owned_by_claim(p, claim_uid))
            .cloned()
            .collect())
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        Ok(self
            .pods
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.namespace().as_deref() == Some(namespace) && p.name_any() == name)
            .cloned())
    }

    async fn create(&self, namespace: &str, pod: &Pod) -> Result<Pod> {
        // Same label value rules the API server enforces
        for (key, value) in pod.labels() {
            if !is_valid_label_value(value) {
                return Err(Error::validation(format!(
                    "Pod \"{}\" is invalid: metadata.labels[{}]: Invalid value",
                    pod.name_any(),
                    key
                )));
            }
        }

        let mut stored = pod.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.creation_timestamp = Some(Time(Utc::now()));
        stored.status = Some(PodStatus {
            phase: Some("Pending".to_string()),
            ..Default::default()
        });
        self.pods.lock().unwrap().push(stored.clone());
        *self.created.lock().unwrap() += 1;
        Ok(stored)
    }
}

fn is_valid_label_value(value: &str) -> bool {
    let bytes = value.as_bytes();
    value.len() <= 63
        && (bytes.is_empty()
            || (bytes[0].is_ascii_alphanumeric()
                && bytes[bytes.len() - 1].is_ascii_alphanumeric()
                && bytes
                    .iter()
                    .all(|&b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))))
}

/// Pod controlled by `claim`, created at `created` seconds past the epoch
pub fn owned_pod(claim: &BackupClaim, name: &str, phase: &str, created: i64) -> Pod {
    let mut pod = pod(&claim.namespace().unwrap_or_default(), name, phase);
    pod.metadata.owner_references = claim.controller_owner_ref(&()).map(|owner| vec![owner]);
    pod.metadata.creation_timestamp = Utc.timestamp_opt(created, 0).single().map(Time);
    pod
}

pub fn pod(namespace: &str, name: &str, phase: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "main".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some(phase.to_string()),
            ..Default::default()
        }),
    }
}

// ============================================================================
// Exec
// ============================================================================

/// Records commands and keeps a tiny file system per pod path.
#[derive(Default)]
pub struct RecordingExecutor {
    commands: Mutex<Vec<Vec<String>>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    dirs: Mutex<HashSet<String>>,
    failures: Mutex<Vec<(String, i32)>>,
}

impl RecordingExecutor {
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.commands.lock().unwrap().clone()
    }

    /// Commands other than `test` checks and chunk appends, joined by spaces
    pub fn steps(&self) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| !is_append(c) && c[0] != "test")
            .map(|c| c.join(" "))
            .collect()
    }

    pub fn appends(&self) -> usize {
        self.commands().iter().filter(|c| is_append(c)).count()
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn add_dir(&self, path: &str) {
        self.dirs.lock().unwrap().insert(path.to_string());
    }

    pub fn add_file(&self, path: &str, data: &[u8]) {
        self.files.lock().unwrap().insert(path.to_string(), data.to_vec());
    }

    /// Make commands whose joined argv starts with `prefix` exit with `code`
    pub fn fail_when(&self, prefix: &str, code: i32) {
        self.failures.lock().unwrap().push((prefix.to_string(), code));
    }
}

fn is_append(command: &[String]) -> bool {
    command.len() == 5 && command[0] == "sh" && command[2].starts_with("head -c")
}

fn exited(code: i32) -> ExecOutput {
    ExecOutput {
        exit_code: code,
        stderr: if code == 0 { String::new() } else { "failed".to_string() },
        ..Default::default()
    }
}

#[async_trait]
impl RemoteExecutor for RecordingExecutor {
    async fn exec(
        &self,
        _target: &ExecTarget,
        command: &[String],
        stdin: Option<Bytes>,
    ) -> Result<ExecOutput> {
        self.commands.lock().unwrap().push(command.to_vec());

        let joined = command.join(" ");
        let failure = self
            .failures
            .lock()
            .unwrap()
            .iter()
            .find(|(prefix, _)| joined.starts_with(prefix.as_str()))
            .map(|(_, code)| *code);
        if let Some(code) = failure {
            return Ok(exited(code));
        }

        let args: Vec<&str> = command.iter().map(String::as_str).collect();
        let code = match args.as_slice() {
            ["test", "-f", path] => i32::from(!self.files.lock().unwrap().contains_key(*path)),
            ["test", "-d", path] => i32::from(!self.dirs.lock().unwrap().contains(*path)),
            ["sh", "-c", script, path] if script.starts_with(':') => {
                self.files.lock().unwrap().insert(path.to_string(), Vec::new());
                0
            }
            ["sh", "-c", script, path, _] if script.starts_with("head -c") => {
                let data = stdin.unwrap_or_default();
                self.files
                    .lock()
                    .unwrap()
                    .entry(path.to_string())
                    .or_default()
                    .extend_from_slice(&data);
                0
            }
            _ => 0,
        };
        Ok(exited(code))
    }
}

// ============================================================================
// Object store
// ============================================================================

struct StoredVersion {
    bucket: String,
    version: ObjectVersion,
    data: Bytes,
}

#[derive(Default)]
struct StoreState {
    /// Newest first
    versions: Vec<StoredVersion>,
    markers: Vec<(String, DeleteMarker)>,
    restores: HashMap<String, RestoreState>,
    restore_requests: Vec<RestoreRequest>,
    deleted: Vec<String>,
    range_reads: usize,
    failing_reads: usize,
    next_id: usize,
}

#[derive(Default)]
pub struct MemoryObjectStore {
    state: Mutex<StoreState>,
}

impl MemoryObjectStore {
    /// Store a new latest version and return its id
    pub fn put(&self, bucket: &str, key: &str, data: &[u8], tier: StorageTier) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let version_id = format!("v{}", state.next_id);

        for stored in state.versions.iter_mut().filter(|v| v.version.key == key) {
            stored.version.is_latest = false;
        }
        state.versions.insert(
            0,
            StoredVersion {
                bucket: bucket.to_string(),
                version: ObjectVersion {
                    key: key.to_string(),
                    version_id: version_id.clone(),
                    is_latest: true,
                    size: data.len() as u64,
                    tier,
                },
                data: Bytes::copy_from_slice(data),
            },
        );
        version_id
    }

    /// Hide `key` behind a delete marker and return the marker id
    pub fn delete(&self, bucket: &str, key: &str) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let version_id = format!("m{}", state.next_id);

        for stored in state.versions.iter_mut().filter(|v| v.version.key == key) {
            stored.version.is_latest = false;
        }
        state.markers.push((
            bucket.to_string(),
            DeleteMarker {
                key: key.to_string(),
                version_id: version_id.clone(),
                is_latest: true,
            },
        ));
        version_id
    }

    /// Complete every running restore job
    pub fn finish_restores(&self) {
        for state in self.state.lock().unwrap().restores.values_mut() {
            if *state == RestoreState::InProgress {
                *state = RestoreState::Restored;
            }
        }
    }

    pub fn fail_reads(&self, count: usize) {
        self.state.lock().unwrap().failing_reads = count;
    }

    pub fn restore_requests(&self) -> Vec<RestoreRequest> {
        self.state.lock().unwrap().restore_requests.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn range_reads(&self) -> usize {
        self.state.lock().unwrap().range_reads
    }

    pub fn has_delete_marker(&self, key: &str) -> bool {
        self.state.lock().unwrap().markers.iter().any(|(_, m)| m.key == key)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list_versions(&self, bucket: &str, prefix: &str) -> Result<VersionListing> {
        let state = self.state.lock().unwrap();
        Ok(VersionListing {
            versions: state
                .versions
                .iter()
                .filter(|v| v.bucket == bucket && v.version.key.starts_with(prefix))
                .map(|v| v.version.clone())
                .collect(),
            delete_markers: state
                .markers
                .iter()
                .filter(|(b, m)| b == bucket && m.key.starts_with(prefix))
                .map(|(_, m)| m.clone())
                .collect(),
        })
    }

    async fn get_range(
        &self,
        bucket: &str,
        key: &str,
        version_id: &str,
        range: Range<u64>,
    ) -> Result<Bytes> {
        let mut state = self.state.lock().unwrap();
        state.range_reads += 1;
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(Error::storage("connection reset"));
        }
        let stored = state
            .versions
            .iter()
            .find(|v| v.bucket == bucket && v.version.key == key && v.version.version_id == version_id)
            .ok_or_else(|| Error::storage("NoSuchVersion"))?;
        let end = (range.end as usize).min(stored.data.len());
        let start = (range.start as usize).min(end);
        Ok(stored.data.slice(start..end))
    }

    async fn delete_version(&self, bucket: &str, key: &str, version_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .markers
            .retain(|(b, m)| !(b == bucket && m.key == key && m.version_id == version_id));
        state
            .versions
            .retain(|v| !(v.bucket == bucket && v.version.key == key && v.version.version_id == version_id));

        let head_is_marker = state.markers.iter().any(|(_, m)| m.key == key && m.is_latest);
        if !head_is_marker {
            if let Some(newest) = state.versions.iter_mut().find(|v| v.version.key == key) {
                newest.version.is_latest = true;
            }
        }
        state.deleted.push(version_id.to_string());
        Ok(())
    }

    async fn restore_from_cold_tier(
        &self,
        _bucket: &str,
        _key: &str,
        version_id: &str,
        request: RestoreRequest,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.restore_requests.push(request);
        state
            .restores
            .insert(version_id.to_string(), RestoreState::InProgress);
        Ok(())
    }

    async fn restore_state(
        &self,
        _bucket: &str,
        _key: &str,
        version_id: &str,
    ) -> Result<RestoreState> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .restores
            .get(version_id)
            .copied()
            .unwrap_or(RestoreState::NotRequested))
    }
}

pub fn expect_ready<T>(readiness: Readiness<T>) -> T {
    match readiness {
        Readiness::Ready(value) => value,
        Readiness::Pending => panic!("expected Ready, got Pending"),
    }
}

// ============================================================================
// Claims and context
// ============================================================================

pub const NAMESPACE: &str = "backups";

/// Stable, UUID-length uid for a claim name
pub fn uid_for(name: &str) -> String {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    format!("{:016x}-0000-0000-0000-000000000000", hasher.finish())
}

pub fn claim(name: &str, spec: BackupClaimSpec) -> BackupClaim {
    let mut claim = BackupClaim::new(name, spec);
    claim.metadata.namespace = Some(NAMESPACE.to_string());
    claim.metadata.uid = Some(uid_for(name));
    claim
}

pub fn s3_source(bucket: &str, key: &str) -> BackupClaimSourceSpec {
    BackupClaimSourceSpec {
        s3: S3SourceSpec {
            bucket_name: bucket.to_string(),
            key: key.to_string(),
        },
    }
}

pub fn new_pod_destination(prefix: &str) -> BackupClaimDestinationSpec {
    BackupClaimDestinationSpec {
        pod: NewPodDestinationSpec {
            name_prefix: prefix.to_string(),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn existing_pod_destination(namespace: &str, name: &str) -> BackupClaimDestinationSpec {
    BackupClaimDestinationSpec {
        existing_pod: ExistingPodDestinationSpec {
            namespace: namespace.to_string(),
            name: name.to_string(),
        },
        ..Default::default()
    }
}

pub struct Harness {
    pub claims: Arc<FakeClaimStore>,
    pub compute: Arc<FakeCompute>,
    pub executor: Arc<RecordingExecutor>,
    pub store: Arc<MemoryObjectStore>,
    pub ctx: Context,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(Settings {
            chunk_size: 4,
            ..Default::default()
        })
    }

    pub fn with_settings(settings: Settings) -> Self {
        let claims = Arc::new(FakeClaimStore::default());
        let compute = Arc::new(FakeCompute::default());
        let executor = Arc::new(RecordingExecutor::default());
        let store = Arc::new(MemoryObjectStore::default());

        let ctx = Context {
            claims: claims.clone(),
            compute: compute.clone(),
            executor: executor.clone(),
            store: store.clone(),
            settings,
            shutdown: CancellationToken::new(),
        };

        Self {
            claims,
            compute,
            executor,
            store,
            ctx,
        }
    }
}
