//! Public interfaces of the distributed object pool: configuration, errors,
//! the scoped reference handle, the controller and manager traits, and the
//! transport trait a deployment must implement.

#![warn(missing_docs)]
#![warn(unused_crate_dependencies)]

mod config;
mod controller_traits;
mod error;
mod refs;
mod rpc;

pub use config::PoolConfig;
pub use controller_traits::{PoolController, PoolManager, PutOptions};
pub use error::PoolError;
pub use refs::{PoolRef, RefRegistrar};
pub use rpc::PoolRpc;

#[cfg(feature = "test-exports")]
pub use rpc::MockPoolRpc;

/// Test utilities for downstream crates
#[cfg(feature = "test-exports")]
pub mod test_exports;

#[cfg(test)]
use mockall as _;
