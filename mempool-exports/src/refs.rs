use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use mempool_models::reference::DRef;
use mempool_models::worker::{LocalId, WorkerId};

/// Hooks through which a materialized reference reports its lifecycle to
/// the local pool. Every `PoolRef` holds one registrar; construction and
/// cloning register a materialization, dropping unregisters it.
pub trait RefRegistrar: Send + Sync {
    /// A new materialization of `dref` exists on this worker.
    fn on_materialize(&self, dref: &DRef);
    /// A materialization of `dref` was finalized on this worker.
    fn on_drop(&self, dref: &DRef);
}

/// A scoped owner of a distributed reference.
///
/// `PoolRef` pairs a `DRef` value with the local pool's registrar so that
/// reference counting follows Rust ownership deterministically: cloning
/// counts a new local materialization, dropping releases one, and the last
/// drop on a worker notifies the owner. References received over the wire
/// must be wrapped through `PoolController::adopt`, never constructed
/// directly from the decoded `DRef`.
pub struct PoolRef {
    dref: DRef,
    registrar: Arc<dyn RefRegistrar>,
}

impl PoolRef {
    /// Wraps `dref`, registering a new materialization with `registrar`.
    pub fn new(dref: DRef, registrar: Arc<dyn RefRegistrar>) -> Self {
        registrar.on_materialize(&dref);
        Self { dref, registrar }
    }

    /// Wraps `dref` without registering: the registrar has already counted
    /// this materialization (pool-internal construction paths only).
    pub fn from_registered(dref: DRef, registrar: Arc<dyn RefRegistrar>) -> Self {
        Self { dref, registrar }
    }

    /// The underlying reference value.
    pub fn dref(&self) -> DRef {
        self.dref
    }

    /// The worker owning the referenced object.
    pub fn owner(&self) -> WorkerId {
        self.dref.owner
    }

    /// The owner-local identifier of the referenced object.
    pub fn id(&self) -> LocalId {
        self.dref.id
    }

    /// The advisory byte footprint of the referenced object.
    pub fn size(&self) -> u64 {
        self.dref.size
    }
}

impl Clone for PoolRef {
    fn clone(&self) -> Self {
        self.registrar.on_materialize(&self.dref);
        Self::from_registered(self.dref, self.registrar.clone())
    }
}

impl Drop for PoolRef {
    fn drop(&mut self) {
        self.registrar.on_drop(&self.dref);
    }
}

impl Debug for PoolRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PoolRef").field(&self.dref).finish()
    }
}
