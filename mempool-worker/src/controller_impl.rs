//! Implementation of the `PoolController` trait over the shared inner
//! state. Clones are cheap and all refer to the same worker.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;

use mempool_exports::{PoolController, PoolError, PoolRef, PutOptions};
use mempool_models::payload::FetchReply;
use mempool_models::reference::{DRef, FRef};
use mempool_models::worker::{LocalId, WorkerId};

use crate::deref::LocalFetch;
use crate::spill::read_payload_file;
use crate::worker::PoolInner;

#[derive(Clone)]
pub(crate) struct PoolControllerImpl {
    pub(crate) inner: Arc<PoolInner>,
}

impl PoolControllerImpl {
    pub(crate) fn new(inner: Arc<PoolInner>) -> Self {
        Self { inner }
    }

    /// Owner endpoints require the dref to actually be owned here; a call
    /// that reaches the wrong worker is a caller bug, not a missing ref.
    fn check_owned(&self, dref: &DRef) -> Result<(), PoolError> {
        if dref.owner != self.inner.cfg.self_id {
            return Err(PoolError::PreconditionViolation(format!(
                "{} routed to non-owner {}",
                dref, self.inner.cfg.self_id
            )));
        }
        Ok(())
    }
}

impl PoolController for PoolControllerImpl {
    fn put(&self, payload: Vec<u8>, opts: PutOptions) -> Result<PoolRef, PoolError> {
        self.inner.put_payload(payload, opts)
    }

    fn put_on(
        &self,
        owner: WorkerId,
        payload: Vec<u8>,
        opts: PutOptions,
    ) -> Result<PoolRef, PoolError> {
        self.inner.put_on(owner, payload, opts)
    }

    fn get(&self, r: &PoolRef) -> Result<Arc<Vec<u8>>, PoolError> {
        self.inner.get(&r.dref())
    }

    fn get_file(&self, fref: &FRef) -> Result<Arc<Vec<u8>>, PoolError> {
        self.inner.get_file(fref)
    }

    fn delete(&self, r: &PoolRef) -> Result<(), PoolError> {
        self.inner.delete(&r.dref())
    }

    fn delete_file(&self, fref: &FRef) -> Result<(), PoolError> {
        self.inner.delete_file(fref)
    }

    fn move_to_disk(&self, r: &PoolRef, path: Option<PathBuf>) -> Result<FRef, PoolError> {
        self.inner.move_to_disk(&r.dref(), path, false)
    }

    fn copy_to_disk(&self, r: &PoolRef, path: PathBuf) -> Result<FRef, PoolError> {
        self.inner.move_to_disk(&r.dref(), Some(path), true)
    }

    fn save_to_disk(&self, r: &PoolRef, path: PathBuf) -> Result<FRef, PoolError> {
        self.inner.save_to_disk(&r.dref(), path)
    }

    fn delete_from_disk(&self, r: &PoolRef, path: PathBuf) -> Result<(), PoolError> {
        self.inner.delete_from_disk(&r.dref(), path)
    }

    fn set_destroy_on_evict(&self, r: &PoolRef, flag: bool) -> Result<(), PoolError> {
        self.inner.set_destroy_on_evict(&r.dref(), flag)
    }

    fn adopt(&self, dref: DRef) -> PoolRef {
        PoolRef::new(dref, self.inner.registrar.clone())
    }

    fn cleanup(&self) -> Result<(), PoolError> {
        self.inner.cleanup()
    }

    fn ref_at_owner(&self, dref: DRef) {
        self.inner.ref_at_owner(dref);
    }

    fn unref_at_owner(&self, dref: DRef) {
        self.inner.unref_at_owner(dref);
    }

    fn fetch_local(&self, id: LocalId) -> Result<FetchReply, PoolError> {
        match self.inner.get_local(id, true)? {
            LocalFetch::Payload(payload) => Ok(FetchReply::Payload((*payload).clone())),
            LocalFetch::Spilled(fref) => Ok(FetchReply::Spilled(fref)),
        }
    }

    fn read_file(&self, file: PathBuf) -> Result<Vec<u8>, PoolError> {
        read_payload_file(&file)
    }

    fn remove_path(&self, file: PathBuf) -> Result<(), PoolError> {
        self.inner.remove_path(&file)
    }

    fn handle_put(
        &self,
        requester: WorkerId,
        payload: Vec<u8>,
        size: u64,
        destroy_on_evict: bool,
    ) -> Result<DRef, PoolError> {
        self.inner
            .handle_put(requester, payload, size, destroy_on_evict)
    }

    fn handle_delete(&self, dref: DRef) -> Result<(), PoolError> {
        self.check_owned(&dref)?;
        self.inner.destroy(dref.id);
        Ok(())
    }

    fn handle_move_to_disk(
        &self,
        dref: DRef,
        path: Option<PathBuf>,
        keep_in_memory: bool,
    ) -> Result<FRef, PoolError> {
        self.check_owned(&dref)?;
        self.inner.move_to_disk_local(dref.id, path, keep_in_memory)
    }

    fn handle_save_to_disk(&self, dref: DRef, path: PathBuf) -> Result<FRef, PoolError> {
        self.check_owned(&dref)?;
        self.inner.save_to_disk_local(dref.id, path)
    }

    fn handle_delete_from_disk(&self, dref: DRef, path: PathBuf) -> Result<(), PoolError> {
        self.check_owned(&dref)?;
        self.inner.delete_from_disk_local(dref.id, path)
    }

    fn handle_set_destroy_on_evict(&self, dref: DRef, flag: bool) -> Result<(), PoolError> {
        self.check_owned(&dref)?;
        self.inner.set_destroy_on_evict_local(dref.id, flag)
    }

    fn get_wrkrips(&self) -> Result<HashMap<Ipv4Addr, Vec<WorkerId>>, PoolError> {
        self.inner.get_wrkrips()
    }

    fn external_ip(&self) -> Ipv4Addr {
        self.inner.cfg.self_ip
    }

    fn record_read(&self, file: PathBuf, dref: DRef) {
        self.inner.record_read(file, dref);
    }

    fn clone_box(&self) -> Box<dyn PoolController> {
        Box::new(self.clone())
    }
}
