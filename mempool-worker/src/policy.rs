//! Memory pressure policy: LRU bookkeeping over resident payloads and the
//! `lru_touch`/`lru_free` hooks called around every allocation. Victims are
//! destroyed when they carry the destroy-on-evict bit, spilled to their
//! default path when spilling is enabled, and skipped otherwise.

use schnellru::{ByLength, LruMap};
use tracing::warn;

use mempool_models::worker::LocalId;

use crate::worker::{PoolInner, PoolState};

/// LRU recency structure plus resident-byte accounting for one worker.
pub(crate) struct EvictionPolicy {
    lru: LruMap<LocalId, u64, ByLength>,
    mem_used: u64,
    max_memsize: Option<u64>,
}

impl EvictionPolicy {
    pub(crate) fn new(max_memsize: Option<u64>) -> Self {
        Self {
            lru: LruMap::new(ByLength::new(u32::MAX)),
            mem_used: 0,
            max_memsize,
        }
    }

    /// A payload of `size` bytes became resident under `id`.
    pub(crate) fn note_resident(&mut self, id: LocalId, size: u64) {
        self.mem_used = self.mem_used.saturating_add(size);
        self.lru.insert(id, size);
    }

    /// The resident payload of `id` (of `size` bytes) was dropped.
    pub(crate) fn note_evicted(&mut self, id: &LocalId, size: u64) {
        self.lru.remove(id);
        self.mem_used = self.mem_used.saturating_sub(size);
    }

    /// Bump the recency of `id`.
    pub(crate) fn touch(&mut self, id: LocalId) {
        self.lru.get(&id);
    }

    /// Whether admitting `incoming` more bytes would exceed the cap.
    pub(crate) fn over_budget(&self, incoming: u64) -> bool {
        match self.max_memsize {
            Some(max) => self.mem_used.saturating_add(incoming) > max,
            None => false,
        }
    }

    /// Pop the least recently used candidate, without touching accounting.
    pub(crate) fn pop_lru(&mut self) -> Option<(LocalId, u64)> {
        self.lru.pop_oldest()
    }

    /// Re-enter a candidate that turned out not to be evictable.
    pub(crate) fn reinsert(&mut self, id: LocalId, size: u64) {
        self.lru.insert(id, size);
    }

    pub(crate) fn mem_used(&self) -> u64 {
        self.mem_used
    }
}

enum Reclaim {
    Satisfied,
    Skip,
    Destroy(LocalId),
    Spill(LocalId),
}

impl PoolInner {
    /// `lru_free`: make room for `incoming` bytes before an allocation.
    /// Walks least-recent residents until the cap is satisfied or no
    /// evictable candidate remains. Victim actions run outside the lock.
    pub(crate) fn reserve(&self, incoming: u64) {
        let mut skipped: Vec<(LocalId, u64)> = Vec::new();
        loop {
            let step = {
                let mut state = self.state.lock();
                if !state.policy.over_budget(incoming) {
                    Reclaim::Satisfied
                } else {
                    match state.policy.pop_lru() {
                        None => Reclaim::Satisfied,
                        Some((id, size)) => {
                            let PoolState { store, .. } = &mut *state;
                            match store.lookup(&id) {
                                Some(st) if st.data().is_some() => {
                                    if st.destroy_on_evict() {
                                        Reclaim::Destroy(id)
                                    } else if self.cfg.spill_to_disk {
                                        Reclaim::Spill(id)
                                    } else {
                                        skipped.push((id, size));
                                        Reclaim::Skip
                                    }
                                }
                                // stale recency entry, nothing resident
                                _ => Reclaim::Skip,
                            }
                        }
                    }
                }
            };
            match step {
                Reclaim::Satisfied => break,
                Reclaim::Skip => continue,
                Reclaim::Destroy(id) => {
                    self.destroy(id);
                }
                Reclaim::Spill(id) => {
                    if let Err(err) = self.move_to_disk_local(id, None, false) {
                        warn!("failed to spill object {} under memory pressure: {}", id, err);
                    }
                }
            }
        }
        if !skipped.is_empty() {
            let mut state = self.state.lock();
            for (id, size) in skipped {
                state.policy.reinsert(id, size);
            }
        }
    }
}
