//! Object store source resolution
//!
//! Finds the latest version of the claimed object, thaws it when it sits in
//! a cold tier, and hands out an [`ObjectReader`] once bytes are readable.

use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::Readiness;
use crate::adapters::{
    DeleteMarker, ObjectStore, RestoreRequest, RestoreState, RetrievalTier, StorageTier,
};
use crate::cancellation::cancellable;
use crate::error::{Error, Result};
use crate::metrics;

/// Metadata of the version a claim reads from
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteObject {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    pub tier: StorageTier,
    pub version_id: String,
    /// Delete markers of the key when one of them is the current head
    pub delete_markers: Vec<DeleteMarker>,
}

impl RemoteObject {
    /// A delete marker at the head hides the object until removed
    pub fn is_deleted(&self) -> bool {
        !self.delete_markers.is_empty()
    }

    pub fn url(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }
}

/// Locate the latest version of `bucket/key`.
pub async fn locate(store: &dyn ObjectStore, bucket: &str, key: &str) -> Result<RemoteObject> {
    let listing = store.list_versions(bucket, key).await?;

    let versions: Vec<_> = listing.versions.into_iter().filter(|v| v.key == key).collect();
    let markers: Vec<_> = listing
        .delete_markers
        .into_iter()
        .filter(|m| m.key == key)
        .collect();

    // When a delete marker is the head no version is flagged latest; versions
    // are listed newest first so the first one is what the marker hides.
    let latest = versions
        .iter()
        .find(|v| v.is_latest)
        .or_else(|| versions.first())
        .cloned()
        .ok_or_else(|| Error::SourceNotFound(format!("no version of 's3://{}/{}'", bucket, key)))?;

    let marker_on_top = !latest.is_latest && markers.iter().any(|m| m.is_latest);

    Ok(RemoteObject {
        bucket: bucket.to_string(),
        key: key.to_string(),
        size: latest.size,
        tier: latest.tier,
        version_id: latest.version_id,
        delete_markers: if marker_on_top { markers } else { Vec::new() },
    })
}

async fn remove_delete_markers(
    store: &dyn ObjectStore,
    object: &RemoteObject,
    cancel: &CancellationToken,
) -> Result<()> {
    for marker in &object.delete_markers {
        info!(
            bucket = %object.bucket,
            key = %object.key,
            version = %marker.version_id,
            "Removing delete marker"
        );
        cancellable(
            cancel,
            store.delete_version(&object.bucket, &object.key, &marker.version_id),
        )
        .await
        .map_err(|e| {
            Error::storage(format!(
                "could not remove delete marker on '{}': {}",
                object.url(),
                e
            ))
        })?;
    }
    Ok(())
}

/// Restore parameters for `tier`. Deep archive offers no expedited retrieval.
fn restore_request_for(tier: &StorageTier, requested: RestoreRequest) -> RestoreRequest {
    match (tier, requested.tier) {
        (StorageTier::DeepArchive, RetrievalTier::Expedited) => RestoreRequest {
            tier: RetrievalTier::Standard,
            ..requested
        },
        _ => requested,
    }
}

/// Make `bucket/key` readable.
///
/// Returns `Pending` while a cold-tier restore is running; the first call on
/// a cold object removes any delete marker and requests exactly one restore.
pub async fn resolve_source(
    store: Arc<dyn ObjectStore>,
    bucket: &str,
    key: &str,
    restore: RestoreRequest,
    cancel: &CancellationToken,
) -> Result<Readiness<ObjectReader>> {
    let object = cancellable(cancel, locate(store.as_ref(), bucket, key))
        .await
        .map_err(|e| match e {
            Error::Storage(msg) => Error::storage(format!(
                "could not initialize source 's3://{}/{}': {}",
                bucket, key, msg
            )),
            other => other,
        })?;

    debug!(
        bucket,
        key,
        version = %object.version_id,
        size = object.size,
        tier = %object.tier,
        deleted = object.is_deleted(),
        "Located source object"
    );

    if object.tier.is_cold() {
        let state = cancellable(
            cancel,
            store.restore_state(bucket, key, &object.version_id),
        )
        .await?;

        match state {
            RestoreState::InProgress => {
                info!(bucket, key, "Cold-tier restore still in progress");
                return Ok(Readiness::Pending);
            }
            RestoreState::NotRequested => {
                remove_delete_markers(store.as_ref(), &object, cancel).await?;
                let request = restore_request_for(&object.tier, restore);
                cancellable(
                    cancel,
                    store.restore_from_cold_tier(bucket, key, &object.version_id, request),
                )
                .await?;
                info!(
                    bucket,
                    key,
                    version = %object.version_id,
                    tier = %object.tier,
                    days = request.days,
                    "Requested cold-tier restore"
                );
                metrics::THAW_REQUESTS.with_label_values(&[bucket]).inc();
                return Ok(Readiness::Pending);
            }
            RestoreState::Restored => {
                debug!(bucket, key, "Cold-tier copy is restored");
            }
        }
    }

    remove_delete_markers(store.as_ref(), &object, cancel).await?;
    Ok(Readiness::Ready(ObjectReader::new(store, object)))
}

/// Lazy ranged reader over one object version.
///
/// Only metadata is cached; every read is a fresh ranged fetch at the
/// cursor. Reaching the end yields `None` and rewinds to zero, and a failed
/// fetch also rewinds, so the next read starts the object over.
pub struct ObjectReader {
    store: Arc<dyn ObjectStore>,
    object: RemoteObject,
    cursor: u64,
}

impl ObjectReader {
    pub fn new(store: Arc<dyn ObjectStore>, object: RemoteObject) -> Self {
        Self {
            store,
            object,
            cursor: 0,
        }
    }

    pub fn object(&self) -> &RemoteObject {
        &self.object
    }

    pub fn size(&self) -> u64 {
        self.object.size
    }

    /// Fetch up to `len` bytes at the cursor; `None` at end of object.
    pub async fn read(&mut self, len: usize) -> Result<Option<Bytes>> {
        if len == 0 {
            return Err(Error::validation("read length must be greater than zero"));
        }
        if self.cursor >= self.object.size {
            self.cursor = 0;
            return Ok(None);
        }

        let start = self.cursor;
        let end = start.saturating_add(len as u64).min(self.object.size);
        let fetched = self
            .store
            .get_range(
                &self.object.bucket,
                &self.object.key,
                &self.object.version_id,
                start..end,
            )
            .await;

        match fetched {
            Ok(data) if data.is_empty() => {
                self.cursor = 0;
                Err(Error::storage(format!(
                    "empty range {}-{} from '{}'",
                    start,
                    end,
                    self.object.url()
                )))
            }
            Ok(data) => {
                self.cursor += data.len() as u64;
                Ok(Some(data))
            }
            Err(e) => {
                self.cursor = 0;
                Err(Error::storage(format!(
                    "could not download file '{}': {}",
                    self.object.url(),
                    e
                )))
            }
        }
    }
}
