//! Two-level distributed reference counting.
//!
//! Every worker counts its own live materializations of each dref in
//! `local_holders`; the owner additionally counts, in `owner_populations`,
//! how many distinct workers hold at least one materialization. Only the
//! first local appearance and the last local disappearance of a dref cross
//! the wire, so owner-side traffic is bounded by the number of holding
//! workers no matter how much a reference is cloned locally.

use std::collections::{hash_map, HashMap};

use tracing::debug;

use mempool_models::reference::DRef;
use mempool_models::worker::{LocalId, WorkerId};

use crate::notifier::NotifierCommand;
use crate::worker::PoolInner;

/// Counter key: the identity of a dref.
pub(crate) type RefKey = (WorkerId, LocalId);

#[derive(Default)]
pub(crate) struct RefCounters {
    /// live materializations of each dref on this worker
    pub(crate) local_holders: HashMap<RefKey, usize>,
    /// workers holding each dref owned here, self included
    pub(crate) owner_populations: HashMap<RefKey, usize>,
}

impl PoolInner {
    /// A materialization of `dref` was constructed on this worker.
    /// On first sight the owner is notified: directly when the owner is
    /// this worker, through the best-effort notifier otherwise.
    pub(crate) fn register_materialization(&self, dref: &DRef) {
        let first_sight = {
            let mut state = self.state.lock();
            let count = state.counters.local_holders.entry(dref.key()).or_insert(0);
            *count += 1;
            *count == 1
        };
        if first_sight {
            if dref.owner == self.cfg.self_id {
                self.ref_at_owner(*dref);
            } else {
                let _ = self.notifier_tx.send(NotifierCommand::Ref {
                    target: dref.owner,
                    dref: *dref,
                });
            }
        }
    }

    /// A materialization of `dref` was finalized on this worker. When the
    /// last one goes, the owner is notified the same way as on first sight.
    pub(crate) fn release_materialization(&self, dref: &DRef) {
        let last = {
            let mut state = self.state.lock();
            match state.counters.local_holders.entry(dref.key()) {
                hash_map::Entry::Occupied(mut occ) => {
                    let count = occ.get_mut();
                    *count = count
                        .checked_sub(1)
                        .expect("unref without a prior ref on pool reference drop");
                    if *count == 0 {
                        occ.remove();
                        true
                    } else {
                        false
                    }
                }
                hash_map::Entry::Vacant(_) => {
                    panic!("unref without a prior ref on pool reference drop");
                }
            }
        };
        if last {
            if dref.owner == self.cfg.self_id {
                self.unref_at_owner(*dref);
            } else {
                let _ = self.notifier_tx.send(NotifierCommand::Unref {
                    target: dref.owner,
                    dref: *dref,
                });
            }
        }
    }

    /// Record this worker as a holder of `dref` without notifying the
    /// owner: used when the owner already attributed the population entry
    /// to this worker (remote put).
    pub(crate) fn register_prereferenced(&self, dref: &DRef) {
        let mut state = self.state.lock();
        state.counters.local_holders.insert(dref.key(), 1);
    }

    /// Owner handler: some worker now holds at least one materialization.
    /// Counts workers, not copies; each holder sends this exactly once.
    pub(crate) fn ref_at_owner(&self, dref: DRef) {
        let mut state = self.state.lock();
        if !state.store.contains(&dref.id) {
            debug!("reference notification for unknown object {}", dref);
        }
        *state
            .counters
            .owner_populations
            .entry(dref.key())
            .or_insert(0) += 1;
    }

    /// Owner handler: some worker dropped its last materialization. At
    /// population zero the object is destroyed. A notification for an
    /// already-destroyed id is a no-op, so explicit deletes and late
    /// unrefs compose without double-free.
    pub(crate) fn unref_at_owner(&self, dref: DRef) {
        let destroy = {
            let mut state = self.state.lock();
            match state.counters.owner_populations.entry(dref.key()) {
                hash_map::Entry::Occupied(mut occ) => {
                    let count = occ.get_mut();
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        occ.remove();
                        true
                    } else {
                        false
                    }
                }
                hash_map::Entry::Vacant(_) => {
                    debug!("unref notification for already-destroyed object {}", dref);
                    false
                }
            }
        };
        if destroy {
            self.destroy(dref.id);
        }
    }
}
