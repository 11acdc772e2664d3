//! Reconcilers for BackupClaim CRDs
//!
//! Business logic for driving a claim to Ready:
//! - Resolving the destination pod
//! - Resolving (and thawing) the source object
//! - Transferring the backup and updating the claim status

pub mod backup_claim;
