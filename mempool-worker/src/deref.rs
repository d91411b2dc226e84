//! Publication and dereference paths: `put` variants, `get` over local
//! memory, local disk and remote peers, and the file-backed read path with
//! its locality routing and local read cache.

use std::sync::Arc;

use mempool_exports::{PoolError, PoolRef, PutOptions};
use mempool_logging::pool_trace;
use mempool_models::payload::FetchReply;
use mempool_models::reference::{DRef, FRef};
use mempool_models::worker::{LocalId, WorkerId};

use crate::datastore::RefState;
use crate::notifier::NotifierCommand;
use crate::spill::read_payload_file;
use crate::worker::{PoolInner, PoolState};

/// Outcome of a local lookup, before any wire framing.
pub(crate) enum LocalFetch {
    Payload(Arc<Vec<u8>>),
    Spilled(FRef),
}

enum Located {
    InMemory(Arc<Vec<u8>>),
    OnDisk(std::path::PathBuf, u64),
}

impl PoolInner {
    /// Store a payload owned by this worker and return the first handle.
    /// The initial materialization counts this worker in the owner
    /// population immediately.
    pub(crate) fn put_payload(
        &self,
        payload: Vec<u8>,
        opts: PutOptions,
    ) -> Result<PoolRef, PoolError> {
        let size = opts.size.unwrap_or(payload.len() as u64);
        self.reserve(size);
        let dref = {
            let mut state = self.state.lock();
            let id = state.allocate_id();
            let dref = DRef {
                owner: self.cfg.self_id,
                id,
                size,
            };
            let PoolState {
                store,
                policy,
                counters,
                ..
            } = &mut *state;
            store.insert(
                id,
                RefState::new(size, Some(Arc::new(payload)), opts.file, opts.destroy_on_evict),
                policy,
            );
            counters.local_holders.insert(dref.key(), 1);
            *counters.owner_populations.entry(dref.key()).or_insert(0) += 1;
            dref
        };
        pool_trace!("mempool.put", {
            "owner": dref.owner.0,
            "id": dref.id.0,
            "size": dref.size
        });
        Ok(PoolRef::from_registered(dref, self.registrar.clone()))
    }

    /// Store a payload on `owner` instead of this worker. The owner
    /// attributes the population entry to us, so the local registration
    /// must not notify again.
    pub(crate) fn put_on(
        &self,
        owner: WorkerId,
        payload: Vec<u8>,
        opts: PutOptions,
    ) -> Result<PoolRef, PoolError> {
        if owner == self.cfg.self_id {
            return self.put_payload(payload, opts);
        }
        let size = opts.size.unwrap_or(payload.len() as u64);
        let dref = self.rpc.put_at(
            owner,
            self.cfg.self_id,
            payload,
            size,
            opts.destroy_on_evict,
        )?;
        self.register_prereferenced(&dref);
        Ok(PoolRef::from_registered(dref, self.registrar.clone()))
    }

    /// Peer endpoint behind remote `put`: store the payload here with the
    /// population entry attributed to `requester`.
    pub(crate) fn handle_put(
        &self,
        requester: WorkerId,
        payload: Vec<u8>,
        size: u64,
        destroy_on_evict: bool,
    ) -> Result<DRef, PoolError> {
        self.reserve(size);
        let dref = {
            let mut state = self.state.lock();
            let id = state.allocate_id();
            let dref = DRef {
                owner: self.cfg.self_id,
                id,
                size,
            };
            let PoolState {
                store,
                policy,
                counters,
                ..
            } = &mut *state;
            store.insert(
                id,
                RefState::new(size, Some(Arc::new(payload)), None, destroy_on_evict),
                policy,
            );
            *counters.owner_populations.entry(dref.key()).or_insert(0) += 1;
            dref
        };
        pool_trace!("mempool.put_remote", {
            "requester": requester.0,
            "id": dref.id.0,
            "size": size
        });
        Ok(dref)
    }

    /// Dereference: local lookup when this worker owns the object, a
    /// blocking fetch from the owner otherwise. A spilled reply routes
    /// through the file-backed read path.
    pub(crate) fn get(&self, dref: &DRef) -> Result<Arc<Vec<u8>>, PoolError> {
        if dref.owner == self.cfg.self_id {
            match self.get_local(dref.id, false)? {
                LocalFetch::Payload(payload) => Ok(payload),
                LocalFetch::Spilled(_) => Err(PoolError::InvariantViolation(
                    "local dereference produced a spill reference".to_string(),
                )),
            }
        } else {
            match self.rpc.fetch_local(dref.owner, dref.id)? {
                FetchReply::Payload(bytes) => Ok(Arc::new(bytes)),
                FetchReply::Spilled(fref) => self.get_file(&fref),
            }
        }
    }

    /// Look up an owned object.
    ///
    /// For a remote caller the on-disk form wins: a spilled payload is
    /// answered with an `FRef` instead of being rematerialized just to be
    /// shipped. For a local caller the in-memory form wins and a disk-only
    /// payload is lazily restored, transparently to the caller.
    pub(crate) fn get_local(&self, id: LocalId, remote: bool) -> Result<LocalFetch, PoolError> {
        let located = {
            let mut state = self.state.lock();
            let found = {
                let st = state.store.lookup(&id).ok_or_else(|| self.missing_ref(id))?;
                let in_memory = st.data().cloned().map(Located::InMemory);
                let on_disk = st.file().map(|path| Located::OnDisk(path.clone(), st.size()));
                if remote {
                    on_disk.or(in_memory)
                } else {
                    in_memory.or(on_disk)
                }
            };
            match found {
                Some(Located::InMemory(payload)) => {
                    state.policy.touch(id);
                    Located::InMemory(payload)
                }
                Some(on_disk) => on_disk,
                None => {
                    return Err(PoolError::InvariantViolation(format!(
                        "object {} has neither a memory nor a disk copy",
                        id
                    )))
                }
            }
        };
        match located {
            Located::InMemory(payload) => Ok(LocalFetch::Payload(payload)),
            Located::OnDisk(path, size) => {
                if remote {
                    Ok(LocalFetch::Spilled(FRef::new(self.cfg.self_ip, path, size)))
                } else {
                    // lazy restore: read outside the lock, install after
                    let bytes = read_payload_file(&path)?;
                    self.reserve(size);
                    let mut state = self.state.lock();
                    let PoolState { store, policy, .. } = &mut *state;
                    let payload = store
                        .restore_memory(&id, bytes, policy)
                        .ok_or_else(|| self.missing_ref(id))?;
                    Ok(LocalFetch::Payload(payload))
                }
            }
        }
    }

    /// Dereference a file-backed reference.
    ///
    /// A previously-loaded file is served from the local read cache. A
    /// miss reads the file, locally when this worker sits on the file's
    /// host, otherwise through a worker picked by the locality resolver;
    /// the decoded payload is then published locally and cached.
    pub(crate) fn get_file(&self, fref: &FRef) -> Result<Arc<Vec<u8>>, PoolError> {
        let cached = {
            let state = self.state.lock();
            state.file_to_dref.get(&fref.file).map(|r| r.dref())
        };
        if let Some(dref) = cached {
            if dref.owner == self.cfg.self_id {
                match self.get_local(dref.id, false) {
                    Ok(LocalFetch::Payload(payload)) => return Ok(payload),
                    // the cached object was destroyed meanwhile: fall
                    // through to a fresh read
                    Err(PoolError::MissingRef(_)) => {
                        let stale = self.state.lock().file_to_dref.remove(&fref.file);
                        drop(stale);
                    }
                    Ok(LocalFetch::Spilled(_)) => {
                        return Err(PoolError::InvariantViolation(
                            "local dereference produced a spill reference".to_string(),
                        ))
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        let bytes = if fref.host == self.cfg.self_ip {
            read_payload_file(&fref.file)?
        } else {
            let server = self.worker_at(fref.host)?;
            self.rpc.read_file(server, fref.file.clone())?
        };
        let handle = self.put_payload(
            bytes,
            PutOptions {
                size: Some(fref.size),
                destroy_on_evict: false,
                file: Some(fref.file.clone()),
            },
        )?;
        let dref = handle.dref();
        let payload = match self.get_local(dref.id, false)? {
            LocalFetch::Payload(payload) => payload,
            LocalFetch::Spilled(_) => {
                return Err(PoolError::InvariantViolation(
                    "local dereference produced a spill reference".to_string(),
                ))
            }
        };
        {
            let mut state = self.state.lock();
            let previous = state.file_to_dref.insert(fref.file.clone(), handle);
            drop(state);
            drop(previous);
        }
        if self.cfg.enable_who_has_read {
            if self.cfg.self_id == self.cfg.coordinator {
                self.record_read(fref.file.clone(), dref);
            } else {
                let _ = self.notifier_tx.send(NotifierCommand::Read {
                    target: self.cfg.coordinator,
                    file: fref.file.clone(),
                    dref,
                });
            }
        }
        pool_trace!("mempool.get_file", {
            "host": fref.host.to_string(),
            "file": fref.file.display().to_string()
        });
        Ok(payload)
    }

    /// Coordinator handler: remember that `dref` was created from `file`.
    /// Advisory only; never consulted by the dereference path.
    pub(crate) fn record_read(&self, file: std::path::PathBuf, dref: DRef) {
        let mut state = self.state.lock();
        let entry = state.who_has_read.entry(file).or_default();
        if !entry.contains(&dref) {
            entry.push(dref);
        }
    }
}
