//! This file defines utilities to mock the crate for testing purposes

use mempool_models::reference::DRef;

use crate::refs::RefRegistrar;

/// A registrar that counts nothing. Lets tests build `PoolRef` values
/// without a running pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct DummyRegistrar;

impl RefRegistrar for DummyRegistrar {
    fn on_materialize(&self, _dref: &DRef) {}
    fn on_drop(&self, _dref: &DRef) {}
}
