//! Per-worker object store: one `RefState` per owned object, keyed by the
//! owner-local id. Mutation of payload and disk fields goes through the
//! entry points defined here so that residency accounting stays in sync.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mempool_models::worker::LocalId;

use crate::policy::EvictionPolicy;

/// Owner-side record for one live object.
pub(crate) struct RefState {
    size: u64,
    data: Option<Arc<Vec<u8>>>,
    file: Option<PathBuf>,
    destroy_on_evict: bool,
}

impl RefState {
    pub(crate) fn new(
        size: u64,
        data: Option<Arc<Vec<u8>>>,
        file: Option<PathBuf>,
        destroy_on_evict: bool,
    ) -> Self {
        Self {
            size,
            data,
            file,
            destroy_on_evict,
        }
    }

    pub(crate) fn size(&self) -> u64 {
        self.size
    }

    pub(crate) fn data(&self) -> Option<&Arc<Vec<u8>>> {
        self.data.as_ref()
    }

    pub(crate) fn file(&self) -> Option<&PathBuf> {
        self.file.as_ref()
    }

    pub(crate) fn destroy_on_evict(&self) -> bool {
        self.destroy_on_evict
    }

    /// Consumes the state, keeping only the on-disk path for cleanup.
    pub(crate) fn into_file(self) -> Option<PathBuf> {
        self.file
    }
}

/// Map from local id to `RefState` on the owning worker.
#[derive(Default)]
pub(crate) struct DataStore {
    refs: HashMap<LocalId, RefState>,
}

impl DataStore {
    /// Insert a freshly created state and account for its resident payload.
    pub(crate) fn insert(&mut self, id: LocalId, state: RefState, policy: &mut EvictionPolicy) {
        if state.data.is_some() {
            policy.note_resident(id, state.size);
        }
        self.refs.insert(id, state);
    }

    pub(crate) fn lookup(&self, id: &LocalId) -> Option<&RefState> {
        self.refs.get(id)
    }

    pub(crate) fn contains(&self, id: &LocalId) -> bool {
        self.refs.contains_key(id)
    }

    /// Remove a state, releasing its residency accounting.
    pub(crate) fn remove(&mut self, id: &LocalId, policy: &mut EvictionPolicy) -> Option<RefState> {
        let state = self.refs.remove(id)?;
        if state.data.is_some() {
            policy.note_evicted(id, state.size);
        }
        Some(state)
    }

    pub(crate) fn keys(&self) -> Vec<LocalId> {
        self.refs.keys().copied().collect()
    }

    /// Record the canonical on-disk copy of an object. The first recorded
    /// path wins; a later spill to a different path leaves it unchanged.
    /// Returns false if the id is gone.
    pub(crate) fn mark_spilled(&mut self, id: &LocalId, path: PathBuf) -> bool {
        match self.refs.get_mut(id) {
            Some(state) => {
                if state.file.is_none() {
                    state.file = Some(path);
                }
                true
            }
            None => false,
        }
    }

    /// Drop the in-memory payload of an object, if resident.
    pub(crate) fn evict_memory(&mut self, id: &LocalId, policy: &mut EvictionPolicy) {
        if let Some(state) = self.refs.get_mut(id) {
            if state.data.take().is_some() {
                policy.note_evicted(id, state.size);
            }
        }
    }

    /// Install a payload restored from disk. A concurrent restore may have
    /// installed one already; the last writer wins since the payload is
    /// logically immutable. Returns the installed payload, or `None` if the
    /// id is gone.
    pub(crate) fn restore_memory(
        &mut self,
        id: &LocalId,
        data: Vec<u8>,
        policy: &mut EvictionPolicy,
    ) -> Option<Arc<Vec<u8>>> {
        let state = self.refs.get_mut(id)?;
        let payload = Arc::new(data);
        if state.data.replace(payload.clone()).is_none() {
            policy.note_resident(*id, state.size);
        } else {
            policy.touch(*id);
        }
        Some(payload)
    }

    /// Update the eviction policy bit. Returns false if the id is gone.
    pub(crate) fn set_destroy_on_evict(&mut self, id: &LocalId, flag: bool) -> bool {
        match self.refs.get_mut(id) {
            Some(state) => {
                state.destroy_on_evict = flag;
                true
            }
            None => false,
        }
    }

    /// Forget the canonical on-disk copy if it is the given path.
    pub(crate) fn clear_file_if(&mut self, id: &LocalId, path: &Path) {
        if let Some(state) = self.refs.get_mut(id) {
            if state.file.as_deref() == Some(path) {
                state.file = None;
            }
        }
    }
}
