//! Distributed reference-counted object pool worker.
//!
//! Each process of a cluster runs one pool worker. A worker owns the
//! payloads published through it, hands out counted distributed references
//! to them, serves dereferences from peers, spills payloads to disk under
//! memory pressure and restores them lazily on access. Reference counting
//! is two-level: local holders per worker, holding workers per owner, so
//! that a reference cloned freely inside a worker costs the owner nothing.

#![warn(missing_docs)]
#![warn(unused_crate_dependencies)]

mod controller_impl;
mod datastore;
mod deref;
mod locality;
mod notifier;
mod policy;
mod ref_counter;
mod spill;
mod worker;

pub use worker::start_pool_worker;

#[cfg(test)]
mod tests;
