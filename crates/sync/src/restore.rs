use std::collections::BTreeMap;

use foundation::ids::Pnu;
use parcels::record::ParcelRecord;
use parcels::validation::ValidationGate;

/// Lifecycle of the restore cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RestoreState {
    #[default]
    Uninitialized,
    Loading,
    Ready,
}

impl RestoreState {
    /// Moves to `Loading` if a cycle may start now; otherwise reports why not.
    pub fn begin(&mut self, force: bool) -> Result<(), RestoreOutcome> {
        match *self {
            RestoreState::Loading => Err(RestoreOutcome::SkippedLoading),
            RestoreState::Ready if !force => Err(RestoreOutcome::SkippedReady),
            _ => {
                *self = RestoreState::Loading;
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub loaded: usize,
    pub tombstoned: usize,
    pub rejected: usize,
    pub duplicates: usize,
    pub restored: usize,
    /// Registry entries dropped because storage no longer holds them.
    pub evicted: usize,
    /// Stored records skipped because the registry already holds a newer edit.
    pub superseded: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    Restored(RestoreReport),
    /// A cycle is already running.
    SkippedLoading,
    /// Already restored and no refresh was forced.
    SkippedReady,
}

impl RestoreOutcome {
    pub fn report(&self) -> Option<&RestoreReport> {
        match self {
            RestoreOutcome::Restored(r) => Some(r),
            _ => None,
        }
    }
}

/// Selects the records a restore cycle inserts.
///
/// Tombstoned identifiers are dropped first, then records the gate rejects
/// (a colored record always passes), then older duplicates of the same
/// identifier. Output is ordered by identifier.
pub fn plan_restore(
    records: &[ParcelRecord],
    is_deleted: impl Fn(&Pnu) -> bool,
    gate: &ValidationGate,
) -> (Vec<ParcelRecord>, RestoreReport) {
    let mut report = RestoreReport {
        loaded: records.len(),
        ..RestoreReport::default()
    };
    let mut keep: BTreeMap<&Pnu, &ParcelRecord> = BTreeMap::new();
    for record in records {
        if is_deleted(&record.pnu) {
            report.tombstoned += 1;
            continue;
        }
        if !gate.check(record) {
            report.rejected += 1;
            continue;
        }
        match keep.get(&record.pnu) {
            Some(existing) => {
                report.duplicates += 1;
                if record.updated_at_ms >= existing.updated_at_ms {
                    keep.insert(&record.pnu, record);
                }
            }
            None => {
                keep.insert(&record.pnu, record);
            }
        }
    }
    let plan: Vec<ParcelRecord> = keep.into_values().cloned().collect();
    report.restored = plan.len();
    (plan, report)
}

#[cfg(test)]
mod tests {
    use super::{RestoreOutcome, RestoreState, plan_restore};
    use foundation::color::ColorIndex;
    use foundation::ids::Pnu;
    use parcels::record::{Mode, ParcelInfo, ParcelRecord};
    use parcels::validation::ValidationGate;
    use pretty_assertions::assert_eq;

    fn pnu(s: &str) -> Pnu {
        Pnu::new(s).unwrap()
    }

    fn rec(id: &str, color: Option<u8>, memo: &str, at: u64) -> ParcelRecord {
        let mut r = ParcelRecord::new(pnu(id), Mode::Click)
            .with_color(color.and_then(|c| ColorIndex::new(c).ok()))
            .with_info(ParcelInfo {
                memo: memo.into(),
                ..ParcelInfo::default()
            });
        r.updated_at_ms = at;
        r
    }

    #[test]
    fn state_machine_guards_reentry() {
        let mut s = RestoreState::default();
        assert_eq!(s.begin(false), Ok(()));
        assert_eq!(s.begin(true), Err(RestoreOutcome::SkippedLoading));
        s = RestoreState::Ready;
        assert_eq!(s.begin(false), Err(RestoreOutcome::SkippedReady));
        assert_eq!(s.begin(true), Ok(()));
        assert_eq!(s, RestoreState::Loading);
    }

    #[test]
    fn filters_tombstoned_minimal_and_duplicates() {
        let gate = ValidationGate::new();
        let records = vec![
            rec("B", Some(1), "", 1),
            rec("D", None, "", 1),
            rec("E", Some(3), "", 1),
            rec("F", None, "경계 분쟁", 1),
            rec("F", None, "경계 분쟁 해결", 9),
            rec("F", None, "old", 2),
        ];
        let (plan, report) = plan_restore(&records, |p| p.as_str() == "B", &gate);
        let ids: Vec<&str> = plan.iter().map(|r| r.pnu.as_str()).collect();
        assert_eq!(ids, vec!["E", "F"]);
        assert_eq!(plan[1].info.memo, "경계 분쟁 해결");
        assert_eq!(report.tombstoned, 1);
        assert_eq!(report.rejected, 1);
        assert_eq!(report.duplicates, 2);
        assert_eq!(report.restored, 2);
        assert_eq!(gate.stats().rejected_count, 1);
    }
}
