use std::net::Ipv4Addr;

use displaydoc::Display;
use thiserror::Error;

use mempool_models::reference::DRef;

/// Pool error
#[derive(Display, Error, Debug)]
pub enum PoolError {
    /// reference not found in pool: {0}
    MissingRef(DRef),
    /// transport failure: {0}
    Transport(String),
    /// disk failure: {0}
    Io(#[from] std::io::Error),
    /// serialization failure: {0}
    Serialization(String),
    /// caller precondition violated: {0}
    PreconditionViolation(String),
    /// pool state invariant violated: {0}
    InvariantViolation(String),
    /// no worker known at {0}
    NoWorkerAt(Ipv4Addr),
}
