//! Adapters for the external systems a claim is reconciled against
//!
//! Each capability is a trait with a production backend (Kubernetes API,
//! pod exec, S3) so the reconciler can be driven by in-memory fakes.

mod claims;
mod compute;
mod exec;
mod object_store;
mod s3;

pub use claims::*;
pub use compute::*;
pub use exec::*;
pub use object_store::*;
pub use s3::*;
