//! Operator settings
//!
//! Parsed once at start-up from flags or environment variables and carried
//! in the controller context.

use std::time::Duration;

use clap::Parser;

use crate::adapters::{RestoreRequest, RetrievalTier};
use crate::error::{Error, Result};

/// Default metrics port
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default bytes fetched from the store and written to the pod per call
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Backup Claim Operator settings
#[derive(Clone, Debug, Parser)]
#[command(name = "backup-claim-operator", version, about)]
pub struct Settings {
    /// Port serving /metrics and health endpoints
    #[arg(long, env = "METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Bytes per ranged read and per remote write
    #[arg(long, env = "TRANSFER_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Delay before checking a destination pod that is not running yet
    #[arg(long, env = "DESTINATION_REQUEUE_SECONDS", default_value_t = 5)]
    pub destination_requeue_seconds: u64,

    /// Delay before polling a cold-tier restore again
    #[arg(long, env = "THAW_POLL_SECONDS", default_value_t = 300)]
    pub thaw_poll_seconds: u64,

    /// Image of pods created for new destinations
    #[arg(long, env = "DESTINATION_IMAGE", default_value = "mysql:latest")]
    pub destination_image: String,

    /// Container name of pods created for new destinations
    #[arg(long, env = "DESTINATION_CONTAINER", default_value = "mysql")]
    pub destination_container: String,

    /// Image pull secret attached to created pods
    #[arg(long, env = "IMAGE_PULL_SECRET", default_value = "awsecr-cred")]
    pub image_pull_secret: String,

    /// Days a restored cold-tier copy stays readable
    #[arg(long, env = "RESTORE_DAYS", default_value_t = 1)]
    pub restore_days: i32,

    /// Retrieval tier for cold-tier restores
    #[arg(
        long,
        env = "RESTORE_TIER",
        value_enum,
        ignore_case = true,
        default_value_t = RetrievalTier::Expedited
    )]
    pub restore_tier: RetrievalTier,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            metrics_port: DEFAULT_METRICS_PORT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            destination_requeue_seconds: 5,
            thaw_poll_seconds: 300,
            destination_image: "mysql:latest".to_string(),
            destination_container: "mysql".to_string(),
            image_pull_secret: "awsecr-cred".to_string(),
            restore_days: 1,
            restore_tier: RetrievalTier::Expedited,
        }
    }
}

impl Settings {
    /// Reject settings the operator cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::config("Transfer chunk size must be greater than zero"));
        }
        if self.destination_requeue_seconds == 0 || self.thaw_poll_seconds == 0 {
            return Err(Error::config("Requeue delays must be greater than zero"));
        }
        if self.restore_days < 1 {
            return Err(Error::config("Restore days must be at least 1"));
        }
        if self.destination_image.is_empty() || self.destination_container.is_empty() {
            return Err(Error::config("Destination image and container must be set"));
        }
        Ok(())
    }

    pub fn destination_requeue(&self) -> Duration {
        Duration::from_secs(self.destination_requeue_seconds)
    }

    pub fn thaw_poll(&self) -> Duration {
        Duration::from_secs(self.thaw_poll_seconds)
    }

    /// Restore job parameters for cold-tier sources
    pub fn restore_request(&self) -> RestoreRequest {
        RestoreRequest {
            days: self.restore_days,
            tier: self.restore_tier,
        }
    }
}
