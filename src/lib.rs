//! Backup Claim Kubernetes Operator
//!
//! This operator fulfils BackupClaim resources: it fetches a database backup
//! from versioned object storage and materializes it inside a pod.

pub mod adapters;
pub mod cancellation;
pub mod config;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod metrics;
pub mod reconcilers;
pub mod resolvers;
pub mod transfer;

pub use error::{Error, Result};
