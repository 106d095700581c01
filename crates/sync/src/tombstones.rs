use std::collections::BTreeSet;
use std::sync::Arc;

use foundation::ids::Pnu;
use parking_lot::Mutex;
use storage::slots::ParcelSlots;

use crate::error::SyncError;

/// Durable set of explicitly deleted identifiers.
///
/// Loaded once; every mutation is written back before returning. Durability is
/// asymmetric: a delete that cannot be persisted is rolled back and reported,
/// while an undelete that cannot be persisted is only logged.
pub struct TombstoneSet {
    slots: Arc<ParcelSlots>,
    ids: Mutex<BTreeSet<Pnu>>,
}

impl std::fmt::Debug for TombstoneSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TombstoneSet")
            .field("len", &self.ids.lock().len())
            .finish()
    }
}

impl TombstoneSet {
    pub fn load(slots: Arc<ParcelSlots>) -> Self {
        let ids = slots.load_tombstones();
        tracing::debug!("loaded {} tombstones", ids.len());
        Self {
            slots,
            ids: Mutex::new(ids),
        }
    }

    /// Returns `Ok(true)` if the identifier was newly tombstoned.
    pub fn mark_deleted(&self, pnu: &Pnu) -> Result<bool, SyncError> {
        let mut ids = self.ids.lock();
        if !ids.insert(pnu.clone()) {
            return Ok(false);
        }
        if let Err(source) = self.slots.save_tombstones(&ids) {
            ids.remove(pnu);
            return Err(SyncError::Persist {
                what: "tombstones",
                source,
            });
        }
        Ok(true)
    }

    /// Returns whether the identifier was tombstoned.
    pub fn unmark_deleted(&self, pnu: &Pnu) -> bool {
        let mut ids = self.ids.lock();
        if !ids.remove(pnu) {
            return false;
        }
        if let Err(e) = self.slots.save_tombstones(&ids) {
            tracing::warn!("persisting undelete of {pnu} failed: {e}");
        }
        true
    }

    pub fn is_deleted(&self, pnu: &Pnu) -> bool {
        self.ids.lock().contains(pnu)
    }

    pub fn all(&self) -> BTreeSet<Pnu> {
        self.ids.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.ids.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
