//! Disk spill and restore: moving payloads between memory and disk,
//! user-visible persistence, object destruction and worker cleanup.
//! Operations on a remotely-owned dref forward to the owner.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use mempool_exports::{PoolError, PoolRef};
use mempool_logging::pool_trace;
use mempool_models::payload::{PayloadDeserializer, PayloadSerializer};
use mempool_models::reference::{DRef, FRef};
use mempool_models::worker::LocalId;
use mempool_serialization::{DeserializeError, Deserializer, Serializer};

use crate::worker::{PoolInner, PoolState};

/// Write a payload to `path` wrapped in the payload envelope, creating
/// parent directories as needed. Nothing is recorded anywhere until the
/// write has fully succeeded.
pub(crate) fn write_payload_file(path: &Path, payload: &Vec<u8>) -> Result<(), PoolError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut buffer = Vec::with_capacity(payload.len() + 10);
    PayloadSerializer::new()
        .serialize(payload, &mut buffer)
        .map_err(|err| PoolError::Serialization(err.to_string()))?;
    fs::write(path, buffer)?;
    Ok(())
}

/// Read a payload file back through the envelope.
pub(crate) fn read_payload_file(path: &Path) -> Result<Vec<u8>, PoolError> {
    let raw = fs::read(path)?;
    let (_, payload) = PayloadDeserializer::new()
        .deserialize::<DeserializeError>(&raw)
        .map_err(|err| PoolError::Serialization(err.to_string()))?;
    Ok(payload)
}

impl PoolInner {
    /// Directory holding this worker's spilled payloads.
    pub(crate) fn session_dir(&self) -> PathBuf {
        self.cfg
            .base_dir
            .join(".mempool")
            .join(format!("{}-{}", self.session, self.cfg.self_id.0))
    }

    /// Default spill path of an owned object.
    pub(crate) fn default_path(&self, id: LocalId) -> PathBuf {
        self.session_dir().join(id.0.to_string())
    }

    /// Spill an owned object to disk. An object that already has a
    /// canonical on-disk copy is not rewritten. Unless `keep_in_memory`,
    /// the resident payload is dropped after a successful write.
    pub(crate) fn move_to_disk_local(
        &self,
        id: LocalId,
        path: Option<PathBuf>,
        keep_in_memory: bool,
    ) -> Result<FRef, PoolError> {
        let path = path.unwrap_or_else(|| self.default_path(id));
        let (payload, size) = {
            let state = self.state.lock();
            let st = state.store.lookup(&id).ok_or_else(|| self.missing_ref(id))?;
            if let Some(existing) = st.file() {
                return Ok(FRef::new(self.cfg.self_ip, existing.clone(), st.size()));
            }
            let payload = st.data().cloned().ok_or_else(|| {
                PoolError::InvariantViolation(format!(
                    "object {} has neither a memory nor a disk copy",
                    id
                ))
            })?;
            (payload, st.size())
        };
        write_payload_file(&path, &payload)?;
        {
            let mut state = self.state.lock();
            let PoolState { store, policy, .. } = &mut *state;
            if !store.mark_spilled(&id, path.clone()) {
                // destroyed while writing; session cleanup sweeps the file
                return Err(self.missing_ref(id));
            }
            if !keep_in_memory {
                store.evict_memory(&id, policy);
            }
        }
        pool_trace!("mempool.spill", {
            "id": id.0,
            "path": path.display().to_string(),
            "keep_in_memory": keep_in_memory
        });
        Ok(FRef::new(self.cfg.self_ip, path, size))
    }

    /// Write a serialized copy of an owned object to `path` and return a
    /// file reference to it. The ref state is left untouched: neither the
    /// canonical disk path nor the residency accounting changes.
    pub(crate) fn save_to_disk_local(&self, id: LocalId, path: PathBuf) -> Result<FRef, PoolError> {
        let (resident, spilled, size) = {
            let state = self.state.lock();
            let st = state.store.lookup(&id).ok_or_else(|| self.missing_ref(id))?;
            (st.data().cloned(), st.file().cloned(), st.size())
        };
        let payload = match resident {
            Some(payload) => payload,
            None => Arc::new(read_payload_file(&spilled.ok_or_else(|| {
                PoolError::InvariantViolation(format!(
                    "object {} has neither a memory nor a disk copy",
                    id
                ))
            })?)?),
        };
        write_payload_file(&path, &payload)?;
        Ok(FRef::new(self.cfg.self_ip, path, size))
    }

    /// Remove an on-disk copy of an owned object. Removing a file that is
    /// already gone is not an error. If the removed path was the canonical
    /// copy, it is forgotten.
    pub(crate) fn delete_from_disk_local(
        &self,
        id: LocalId,
        path: PathBuf,
    ) -> Result<(), PoolError> {
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        let mut state = self.state.lock();
        state.store.clear_file_if(&id, &path);
        Ok(())
    }

    /// Update the eviction policy bit of an owned object.
    pub(crate) fn set_destroy_on_evict_local(
        &self,
        id: LocalId,
        flag: bool,
    ) -> Result<(), PoolError> {
        let mut state = self.state.lock();
        if !state.store.set_destroy_on_evict(&id, flag) {
            return Err(self.missing_ref(id));
        }
        Ok(())
    }

    // ---- owner-forwarding wrappers ----

    pub(crate) fn move_to_disk(
        &self,
        dref: &DRef,
        path: Option<PathBuf>,
        keep_in_memory: bool,
    ) -> Result<FRef, PoolError> {
        if dref.owner == self.cfg.self_id {
            self.move_to_disk_local(dref.id, path, keep_in_memory)
        } else {
            self.rpc.move_to_disk(dref.owner, *dref, path, keep_in_memory)
        }
    }

    pub(crate) fn save_to_disk(&self, dref: &DRef, path: PathBuf) -> Result<FRef, PoolError> {
        if dref.owner == self.cfg.self_id {
            self.save_to_disk_local(dref.id, path)
        } else {
            self.rpc.save_to_disk(dref.owner, *dref, path)
        }
    }

    pub(crate) fn delete_from_disk(&self, dref: &DRef, path: PathBuf) -> Result<(), PoolError> {
        if dref.owner == self.cfg.self_id {
            self.delete_from_disk_local(dref.id, path)
        } else {
            self.rpc.delete_from_disk(dref.owner, *dref, path)
        }
    }

    pub(crate) fn set_destroy_on_evict(&self, dref: &DRef, flag: bool) -> Result<(), PoolError> {
        if dref.owner == self.cfg.self_id {
            self.set_destroy_on_evict_local(dref.id, flag)
        } else {
            self.rpc.set_destroy_on_evict(dref.owner, *dref, flag)
        }
    }

    /// Destroy an owned object regardless of its counters; forwarded to
    /// the owner for remote drefs.
    pub(crate) fn delete(&self, dref: &DRef) -> Result<(), PoolError> {
        if dref.owner == self.cfg.self_id {
            self.destroy(dref.id);
            Ok(())
        } else {
            self.rpc.delete(dref.owner, *dref)
        }
    }

    /// Remove a file-backed value: evict the local read cache entry and
    /// delete the file, routing the deletion to a worker on the file's
    /// host when it is not this one.
    pub(crate) fn delete_file(&self, fref: &FRef) -> Result<(), PoolError> {
        let cached = {
            let mut state = self.state.lock();
            state.file_to_dref.remove(&fref.file)
        };
        drop(cached);
        if fref.host == self.cfg.self_ip {
            self.remove_path(&fref.file)
        } else {
            let server = self.worker_at(fref.host)?;
            self.rpc.remove_path(server, fref.file.clone())
        }
    }

    /// Remove a file from this worker's disk; missing files are fine.
    pub(crate) fn remove_path(&self, path: &Path) -> Result<(), PoolError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Tear down an owned object: forget its counters, drop its payload,
    /// best-effort remove its spill file, and prune advisory read records
    /// pointing at it. Destroying an unknown id is a no-op.
    pub(crate) fn destroy(&self, id: LocalId) {
        let owner = self.cfg.self_id;
        let file = {
            let mut state = self.state.lock();
            let PoolState {
                store,
                policy,
                counters,
                who_has_read,
                ..
            } = &mut *state;
            let Some(st) = store.remove(&id, policy) else {
                debug!("destroy of unknown object {}, ignored", id);
                return;
            };
            counters.owner_populations.remove(&(owner, id));
            who_has_read.retain(|_, drefs| {
                drefs.retain(|d| !(d.owner == owner && d.id == id));
                !drefs.is_empty()
            });
            st.into_file()
        };
        if let Some(path) = file {
            if let Err(err) = fs::remove_file(&path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(
                        "could not remove spill file {}: {}",
                        path.display(),
                        err
                    );
                }
            }
        }
        pool_trace!("mempool.destroy", { "id": id.0 });
    }

    /// Destroy every object owned by this worker and remove the session
    /// directory.
    pub(crate) fn cleanup(&self) -> Result<(), PoolError> {
        let cached: Vec<PoolRef> = {
            let mut state = self.state.lock();
            state.file_to_dref.drain().map(|(_, r)| r).collect()
        };
        // dropping outside the lock runs the unref protocol normally
        drop(cached);
        let ids = {
            let state = self.state.lock();
            state.store.keys()
        };
        for id in ids {
            self.destroy(id);
        }
        let dir = self.session_dir();
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }
}
