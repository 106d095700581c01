use std::sync::atomic::{AtomicU64, Ordering};

use crate::record::ParcelRecord;

/// A color is assigned, including a legacy color outside the palette.
pub fn has_valid_color(record: &ParcelRecord) -> bool {
    record.is_colored()
}

/// At least one information field holds real, non-placeholder text.
pub fn has_valid_parcel_info(record: &ParcelRecord) -> bool {
    record.info.has_user_data()
}

/// The persistence rule: a record is kept if it is colored or carries info.
pub fn is_worth_saving(record: &ParcelRecord) -> bool {
    has_valid_color(record) || has_valid_parcel_info(record)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ValidationStats {
    pub total_checks: u64,
    pub valid_count: u64,
    pub rejected_count: u64,
}

/// [`is_worth_saving`] plus diagnostic counters.
#[derive(Debug, Default)]
pub struct ValidationGate {
    total_checks: AtomicU64,
    valid_count: AtomicU64,
    rejected_count: AtomicU64,
}

impl ValidationGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, record: &ParcelRecord) -> bool {
        let ok = is_worth_saving(record);
        self.total_checks.fetch_add(1, Ordering::Relaxed);
        if ok {
            self.valid_count.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected_count.fetch_add(1, Ordering::Relaxed);
        }
        ok
    }

    /// Keeps records worth saving, in order. Returns them with the number dropped.
    pub fn filter(&self, records: Vec<ParcelRecord>) -> (Vec<ParcelRecord>, usize) {
        let before = records.len();
        let kept: Vec<ParcelRecord> = records.into_iter().filter(|r| self.check(r)).collect();
        let dropped = before - kept.len();
        if dropped > 0 {
            tracing::debug!("validation gate dropped {dropped} of {before} parcel records");
        }
        (kept, dropped)
    }

    pub fn stats(&self) -> ValidationStats {
        ValidationStats {
            total_checks: self.total_checks.load(Ordering::Relaxed),
            valid_count: self.valid_count.load(Ordering::Relaxed),
            rejected_count: self.rejected_count.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.total_checks.store(0, Ordering::Relaxed);
        self.valid_count.store(0, Ordering::Relaxed);
        self.rejected_count.store(0, Ordering::Relaxed);
    }
}
