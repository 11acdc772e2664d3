//! Resolvers that make a claim's destination and source usable
//!
//! Both report [`Readiness::Pending`] when the external system is still
//! converging (pod starting, cold-tier restore running). Waiting is never an
//! error; the reconciler turns it into a requeue.

pub mod destination;
pub mod source;

pub use destination::{resolve_existing_pod, resolve_new_pod, DestinationTarget};
pub use source::{resolve_source, ObjectReader, RemoteObject};

/// Outcome of a resolve call that did not fail
#[derive(Debug)]
pub enum Readiness<T> {
    Ready(T),
    Pending,
}
