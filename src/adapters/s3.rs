//! S3 object store backend

use std::ops::Range;

use async_trait::async_trait;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_s3::types::{GlacierJobParameters, RestoreRequest as S3RestoreRequest, Tier};
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::debug;

use super::object_store::{
    DeleteMarker, ObjectStore, ObjectVersion, RestoreRequest, RestoreState, RetrievalTier,
    StorageTier, VersionListing,
};
use crate::error::{Error, Result};

/// S3 backed [`ObjectStore`]
#[derive(Clone, Debug)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the default AWS credential chain and region
    pub async fn from_env() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(Client::new(&config))
    }
}

fn url(bucket: &str, key: &str) -> String {
    format!("s3://{}/{}", bucket, key)
}

fn to_sdk_tier(tier: RetrievalTier) -> Tier {
    match tier {
        RetrievalTier::Expedited => Tier::Expedited,
        RetrievalTier::Standard => Tier::Standard,
        RetrievalTier::Bulk => Tier::Bulk,
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list_versions(&self, bucket: &str, prefix: &str) -> Result<VersionListing> {
        let mut listing = VersionListing::default();
        let mut key_marker: Option<String> = None;
        let mut version_id_marker: Option<String> = None;

        loop {
            let output = self
                .client
                .list_object_versions()
                .bucket(bucket)
                .prefix(prefix)
                .set_key_marker(key_marker.take())
                .set_version_id_marker(version_id_marker.take())
                .send()
                .await
                .map_err(|e| {
                    Error::storage(format!(
                        "could not list versions of '{}': {}",
                        url(bucket, prefix),
                        DisplayErrorContext(e)
                    ))
                })?;

            for version in output.versions() {
                listing.versions.push(ObjectVersion {
                    key: version.key().unwrap_or_default().to_string(),
                    version_id: version.version_id().unwrap_or("null").to_string(),
                    is_latest: version.is_latest().unwrap_or(false),
                    size: version.size().unwrap_or(0).max(0) as u64,
                    tier: StorageTier::parse(version.storage_class().map(|c| c.as_str())),
                });
            }
            for marker in output.delete_markers() {
                listing.delete_markers.push(DeleteMarker {
                    key: marker.key().unwrap_or_default().to_string(),
                    version_id: marker.version_id().unwrap_or("null").to_string(),
                    is_latest: marker.is_latest().unwrap_or(false),
                });
            }

            if !output.is_truncated().unwrap_or(false) {
                break;
            }
            key_marker = output.next_key_marker().map(str::to_string);
            version_id_marker = output.next_version_id_marker().map(str::to_string);
            if key_marker.is_none() {
                break;
            }
        }

        debug!(
            bucket,
            prefix,
            versions = listing.versions.len(),
            delete_markers = listing.delete_markers.len(),
            "Listed object versions"
        );
        Ok(listing)
    }

    async fn get_range(
        &self,
        bucket: &str,
        key: &str,
        version_id: &str,
        range: Range<u64>,
    ) -> Result<Bytes> {
        if range.is_empty() {
            return Ok(Bytes::new());
        }

        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .version_id(version_id)
            .range(format!("bytes={}-{}", range.start, range.end - 1))
            .send()
            .await
            .map_err(|e| {
                Error::storage(format!(
                    "could not download '{}': {}",
                    url(bucket, key),
                    DisplayErrorContext(e)
                ))
            })?;

        let data = output.body.collect().await.map_err(|e| {
            Error::storage(format!("could not read body of '{}': {}", url(bucket, key), e))
        })?;
        Ok(data.into_bytes())
    }

    async fn delete_version(&self, bucket: &str, key: &str, version_id: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .version_id(version_id)
            .send()
            .await
            .map_err(|e| {
                Error::storage(format!(
                    "could not delete version '{}' of '{}': {}",
                    version_id,
                    url(bucket, key),
                    DisplayErrorContext(e)
                ))
            })?;
        Ok(())
    }

    async fn restore_from_cold_tier(
        &self,
        bucket: &str,
        key: &str,
        version_id: &str,
        request: RestoreRequest,
    ) -> Result<()> {
        let job = GlacierJobParameters::builder()
            .tier(to_sdk_tier(request.tier))
            .build()
            .map_err(|e| Error::storage(format!("invalid restore job parameters: {}", e)))?;
        let restore = S3RestoreRequest::builder()
            .days(request.days)
            .glacier_job_parameters(job)
            .build();

        match self
            .client
            .restore_object()
            .bucket(bucket)
            .key(key)
            .version_id(version_id)
            .restore_request(restore)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some("RestoreAlreadyInProgress") => {
                debug!(bucket, key, version_id, "Restore already in progress");
                Ok(())
            }
            Err(e) => Err(Error::storage(format!(
                "could not restore '{}' from cold tier: {}",
                url(bucket, key),
                DisplayErrorContext(e)
            ))),
        }
    }

    async fn restore_state(
        &self,
        bucket: &str,
        key: &str,
        version_id: &str,
    ) -> Result<RestoreState> {
        let output = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .version_id(version_id)
            .send()
            .await
            .map_err(|e| {
                Error::storage(format!(
                    "could not get restore status of '{}': {}",
                    url(bucket, key),
                    DisplayErrorContext(e)
                ))
            })?;
        Ok(RestoreState::from_restore_header(output.restore()))
    }
}
