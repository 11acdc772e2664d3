//! Versioned object store capability
//!
//! The source resolver only needs versioned listing, ranged reads, version
//! deletion and cold-tier restoration. Backends (S3, in-memory fakes)
//! implement [`ObjectStore`].

use std::fmt;
use std::ops::Range;

use async_trait::async_trait;
use bytes::Bytes;
use clap::ValueEnum;

use crate::error::Result;

/// Storage class of an object version
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageTier {
    Standard,
    InfrequentAccess,
    GlacierInstantRetrieval,
    Glacier,
    DeepArchive,
    Other(String),
}

impl StorageTier {
    /// Parse a storage class as reported by the store. Missing means STANDARD.
    pub fn parse(value: Option<&str>) -> Self {
        match value.unwrap_or("STANDARD") {
            "STANDARD" => StorageTier::Standard,
            "STANDARD_IA" | "ONEZONE_IA" => StorageTier::InfrequentAccess,
            "GLACIER_IR" => StorageTier::GlacierInstantRetrieval,
            "GLACIER" => StorageTier::Glacier,
            "DEEP_ARCHIVE" => StorageTier::DeepArchive,
            other => StorageTier::Other(other.to_string()),
        }
    }

    /// Cold tiers need a restore job before bytes can be read
    pub fn is_cold(&self) -> bool {
        matches!(self, StorageTier::Glacier | StorageTier::DeepArchive)
    }
}

impl fmt::Display for StorageTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StorageTier::Standard => "STANDARD",
            StorageTier::InfrequentAccess => "STANDARD_IA",
            StorageTier::GlacierInstantRetrieval => "GLACIER_IR",
            StorageTier::Glacier => "GLACIER",
            StorageTier::DeepArchive => "DEEP_ARCHIVE",
            StorageTier::Other(name) => name,
        };
        f.write_str(name)
    }
}

/// A stored version of an object
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectVersion {
    pub key: String,
    pub version_id: String,
    pub is_latest: bool,
    pub size: u64,
    pub tier: StorageTier,
}

/// A delete marker hiding older versions of an object
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeleteMarker {
    pub key: String,
    pub version_id: String,
    pub is_latest: bool,
}

/// Versions and delete markers under a prefix, newest first per key
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VersionListing {
    pub versions: Vec<ObjectVersion>,
    pub delete_markers: Vec<DeleteMarker>,
}

/// Retrieval speed of a restore job
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "PascalCase")]
pub enum RetrievalTier {
    Expedited,
    Standard,
    Bulk,
}

/// Parameters of a cold-tier restore job
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RestoreRequest {
    /// Days the restored copy stays readable
    pub days: i32,
    pub tier: RetrievalTier,
}

impl Default for RestoreRequest {
    fn default() -> Self {
        Self {
            days: 1,
            tier: RetrievalTier::Expedited,
        }
    }
}

/// Progress of a cold-tier restore for one version
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestoreState {
    NotRequested,
    InProgress,
    Restored,
}

impl RestoreState {
    /// Parse the `x-amz-restore` header value, e.g. `ongoing-request="false", expiry-date="..."`
    pub fn from_restore_header(header: Option<&str>) -> Self {
        match header {
            None => RestoreState::NotRequested,
            Some(value) if value.contains("ongoing-request=\"true\"") => RestoreState::InProgress,
            Some(value) if value.contains("ongoing-request=\"false\"") => RestoreState::Restored,
            Some(_) => RestoreState::NotRequested,
        }
    }
}

/// Versioned object store
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// List every version and delete marker whose key starts with `prefix`.
    async fn list_versions(&self, bucket: &str, prefix: &str) -> Result<VersionListing>;

    /// Read `range` (end exclusive) of one version of an object.
    async fn get_range(
        &self,
        bucket: &str,
        key: &str,
        version_id: &str,
        range: Range<u64>,
    ) -> Result<Bytes>;

    /// Permanently delete one version or delete marker.
    async fn delete_version(&self, bucket: &str, key: &str, version_id: &str) -> Result<()>;

    /// Start a restore job for a cold-tier version.
    async fn restore_from_cold_tier(
        &self,
        bucket: &str,
        key: &str,
        version_id: &str,
        request: RestoreRequest,
    ) -> Result<()>;

    /// Report restore progress of a cold-tier version.
    async fn restore_state(&self, bucket: &str, key: &str, version_id: &str)
        -> Result<RestoreState>;
}
