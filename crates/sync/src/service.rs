//! The public surface the UI layer calls into.

use std::collections::BTreeSet;
use std::sync::Arc;

use foundation::color::ColorIndex;
use foundation::ids::Pnu;
use parcels::marker::{MarkerState, evaluate_marker};
use parcels::normalize::normalize_batch;
use parcels::record::{Mode, ParcelInfo, ParcelRecord};
use parcels::validation::{ValidationGate, ValidationStats, is_worth_saving};
use parking_lot::Mutex;
use remote::{ConnectionStatus, ParcelLookup};
use runtime::event_bus::EventBus;
use scene::{AddOutcome, ModeRegistries, RegistryEntry, RenderSurface, SurfaceWorld};

use crate::colors::{ColorChange, ColorStore};
use crate::error::SyncError;
use crate::events::ParcelEvent;
use crate::gateway::PersistenceGateway;
use crate::restore::{RestoreOutcome, RestoreState, plan_restore};
use crate::tombstones::TombstoneSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorOutcome {
    Applied(ColorChange),
    /// The identifier is being deleted; the color was not applied.
    Suppressed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    AlreadyRemoving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
    /// Information removed; the colored polygon stays as a minimal record.
    Cleared,
    /// Nothing would remain, so the parcel was deleted and tombstoned.
    Deleted,
}

struct Scene<S> {
    registries: ModeRegistries,
    surface: S,
}

/// Removes the identifier from the removal set when the delete finishes,
/// however it finishes.
struct RemovalGuard<'a> {
    removing: &'a Mutex<BTreeSet<Pnu>>,
    pnu: Pnu,
}

impl Drop for RemovalGuard<'_> {
    fn drop(&mut self) {
        self.removing.lock().remove(&self.pnu);
    }
}

/// Restores the previous state if a restore cycle is dropped mid-load.
struct RestoreCycle<'a> {
    state: &'a Mutex<RestoreState>,
    previous: RestoreState,
    finished: bool,
}

impl RestoreCycle<'_> {
    fn finish(mut self) {
        *self.state.lock() = RestoreState::Ready;
        self.finished = true;
    }
}

impl Drop for RestoreCycle<'_> {
    fn drop(&mut self) {
        if !self.finished {
            *self.state.lock() = self.previous;
        }
    }
}

/// Parcel state for one session.
///
/// Constructed once and shared by reference. Locks are held only for short
/// synchronous sections and never across an await.
pub struct ParcelService<S = SurfaceWorld> {
    gateway: Arc<PersistenceGateway>,
    tombstones: TombstoneSet,
    colors: ColorStore,
    scene: Mutex<Scene<S>>,
    lookup: Option<Arc<dyn ParcelLookup>>,
    gate: ValidationGate,
    restore: Mutex<RestoreState>,
    removing: Mutex<BTreeSet<Pnu>>,
    events: Arc<EventBus<ParcelEvent>>,
}

impl<S> std::fmt::Debug for ParcelService<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParcelService")
            .field("gateway", &self.gateway)
            .field("restore", &*self.restore.lock())
            .finish_non_exhaustive()
    }
}

impl<S: RenderSurface> ParcelService<S> {
    pub fn new(gateway: Arc<PersistenceGateway>, surface: S) -> Self {
        let events = Arc::new(EventBus::new());
        Self {
            tombstones: TombstoneSet::load(gateway.slots().clone()),
            colors: ColorStore::load(gateway.clone(), events.clone()),
            scene: Mutex::new(Scene {
                registries: ModeRegistries::new(),
                surface,
            }),
            lookup: None,
            gate: ValidationGate::new(),
            restore: Mutex::new(RestoreState::Uninitialized),
            removing: Mutex::new(BTreeSet::new()),
            events,
            gateway,
        }
    }

    pub fn with_lookup(mut self, lookup: Arc<dyn ParcelLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    pub fn gateway(&self) -> &Arc<PersistenceGateway> {
        &self.gateway
    }

    pub fn events(&self) -> &Arc<EventBus<ParcelEvent>> {
        &self.events
    }

    pub fn restore_state(&self) -> RestoreState {
        *self.restore.lock()
    }

    pub fn validation_stats(&self) -> ValidationStats {
        self.gate.stats()
    }

    /// Read access to the registries and the render surface.
    pub fn with_scene<R>(&self, f: impl FnOnce(&ModeRegistries, &S) -> R) -> R {
        let scene = self.scene.lock();
        f(&scene.registries, &scene.surface)
    }

    pub async fn connect(&self) -> ConnectionStatus {
        self.gateway.connect().await
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.gateway.status()
    }

    /// Remote change notification: the next load re-queries the backend.
    pub fn on_remote_change(&self) {
        self.gateway.invalidate();
    }

    /// Loads persisted parcels and repopulates registries, colors and markers.
    ///
    /// No-op while a cycle is running, and once restored unless `force` is set.
    /// Re-restoring an identifier updates its entry in place.
    pub async fn load_and_restore(&self, force: bool) -> RestoreOutcome {
        let previous = {
            let mut state = self.restore.lock();
            let previous = *state;
            if let Err(skipped) = state.begin(force) {
                tracing::debug!("restore request ignored: {skipped:?}");
                return skipped;
            }
            previous
        };
        let cycle = RestoreCycle {
            state: &self.restore,
            previous,
            finished: false,
        };

        let started = self.gateway.clock().now().0;
        let records = self.gateway.load().await;
        let (plan, mut report) = plan_restore(&records, |p| self.tombstones.is_deleted(p), &self.gate);

        let (applied, evicted) = {
            let mut scene = self.scene.lock();
            let Scene {
                registries,
                surface,
            } = &mut *scene;
            // Entries edited since the load started are newer than its rows.
            let stale: Vec<Pnu> = {
                let planned: BTreeSet<&Pnu> = plan.iter().map(|r| &r.pnu).collect();
                registries
                    .registry(Mode::Click)
                    .iter()
                    .filter(|(id, e)| !planned.contains(id) && e.record.updated_at_ms < started)
                    .map(|(id, _)| id.clone())
                    .collect()
            };
            let mut evicted = Vec::with_capacity(stale.len());
            for id in &stale {
                if let Some(entry) = registries.remove(surface, Mode::Click, id) {
                    evicted.push(entry.record);
                }
            }

            let mut applied = Vec::with_capacity(plan.len());
            for record in plan {
                let newer = registries
                    .registry(record.mode)
                    .get(&record.pnu)
                    .is_some_and(|e| e.record.updated_at_ms > record.updated_at_ms);
                if newer {
                    report.superseded += 1;
                    continue;
                }
                registries.add(surface, record.clone());
                let display = evaluate_marker(&record.info).should_display;
                registries.set_marker(surface, &record.pnu, display);
                applied.push(record);
            }
            (applied, evicted)
        };
        report.evicted = evicted.len();
        let stale: Vec<Pnu> = evicted.iter().map(|r| r.pnu.clone()).collect();
        self.colors.purge(&stale);
        for record in &evicted {
            self.colors.remove_marker_state(&record.pnu);
            self.tombstone_if_vacant(record);
        }
        self.colors.register_restored(&applied);
        cycle.finish();

        tracing::info!(
            loaded = report.loaded,
            restored = report.restored,
            tombstoned = report.tombstoned,
            rejected = report.rejected,
            evicted = report.evicted,
            superseded = report.superseded,
            "restore finished"
        );
        self.events.emit(ParcelEvent::Restored {
            count: report.restored,
        });
        RestoreOutcome::Restored(report)
    }

    /// Toggles `index` on the parcel: the color already assigned is removed,
    /// any other color overwrites it.
    ///
    /// Unknown identifiers get a click record without geometry. A new color on
    /// a tombstoned identifier lifts the tombstone. A search result is colored
    /// in place and stored as a click record. Removing the last color of a
    /// parcel with no geometry or information removes it from the registries.
    pub async fn apply_color(&self, pnu: &str, index: i64) -> Result<ColorOutcome, SyncError> {
        let pnu = Pnu::new(pnu)?;
        let color = ColorIndex::from_i64(index)?;
        if self.removing.lock().contains(&pnu) {
            tracing::debug!("ignoring color for {pnu} while it is being removed");
            return Ok(ColorOutcome::Suppressed);
        }

        let change = self.colors.toggle_color(&pnu, color);
        if let ColorChange::Set { .. } = change
            && self.tombstones.unmark_deleted(&pnu)
        {
            tracing::info!("parcel {pnu} re-created after delete");
        }

        let now = self.gateway.clock().now().0;
        let color = change.color();
        let (record, removed) = {
            let mut scene = self.scene.lock();
            let Scene {
                registries,
                surface,
            } = &mut *scene;
            let mut record = registries
                .find(&pnu)
                .map(|e| e.record.clone())
                .unwrap_or_else(|| ParcelRecord::new(pnu.clone(), Mode::Click));
            record.set_color(color);
            record.updated_at_ms = now;
            record.mode = Mode::Click;
            if record.is_vacant() {
                let removed = !registries.remove_everywhere(surface, &pnu).is_empty();
                (record, removed)
            } else {
                let edited = registries.edit_record(surface, &pnu, |r| {
                    r.set_color(color);
                    r.updated_at_ms = now;
                });
                if !edited {
                    registries.add(surface, record.clone());
                }
                (record, false)
            }
        };
        if removed {
            self.tombstone_if_vacant(&record);
        }
        self.persist(&record).await;
        Ok(ColorOutcome::Applied(change))
    }

    /// Fully deletes the parcel from every registry and store and tombstones it.
    ///
    /// Fails only when the tombstone itself cannot be persisted, in which case
    /// nothing is changed.
    pub async fn delete_parcel(&self, pnu: &str) -> Result<DeleteOutcome, SyncError> {
        let pnu = Pnu::new(pnu)?;
        let Some(_guard) = self.begin_removal(&pnu) else {
            return Ok(DeleteOutcome::AlreadyRemoving);
        };
        self.tombstones.mark_deleted(&pnu)?;

        {
            let mut scene = self.scene.lock();
            let Scene {
                registries,
                surface,
            } = &mut *scene;
            registries.remove_everywhere(surface, &pnu);
        }
        self.colors.remove_color(&pnu);
        self.colors.remove_marker_state(&pnu);
        if let Err(e) = self.gateway.remove_record(&pnu).await {
            tracing::warn!("removing stored record of {pnu} failed: {e}");
        }

        tracing::info!("parcel {pnu} deleted");
        self.events.emit(ParcelEvent::Deleted { pnu });
        Ok(DeleteOutcome::Deleted)
    }

    /// Removes owner and memo fields but keeps the color.
    ///
    /// An uncolored parcel has nothing left afterwards and is deleted instead.
    pub async fn clear_parcel_info(&self, pnu: &str) -> Result<ClearOutcome, SyncError> {
        let id = Pnu::new(pnu)?;
        let Some(mut record) = self.record(&id) else {
            return Err(SyncError::UnknownParcel(id));
        };
        if !record.is_colored() {
            self.delete_parcel(pnu).await?;
            return Ok(ClearOutcome::Deleted);
        }

        record.info = ParcelInfo::default();
        record.updated_at_ms = self.gateway.clock().now().0;
        record.mode = Mode::Click;
        self.colors.set_marker_state(&id, &record);
        {
            let mut scene = self.scene.lock();
            let Scene {
                registries,
                surface,
            } = &mut *scene;
            let updated_at = record.updated_at_ms;
            registries.edit_record(surface, &id, |r| {
                r.info = ParcelInfo::default();
                r.updated_at_ms = updated_at;
            });
            registries.set_marker(surface, &id, false);
        }
        self.persist(&record).await;
        Ok(ClearOutcome::Cleared)
    }

    /// Replaces the parcel's information fields and re-evaluates its marker.
    ///
    /// A parcel left with no geometry, color or information is removed.
    pub async fn update_info(&self, pnu: &str, info: ParcelInfo) -> Result<MarkerState, SyncError> {
        let id = Pnu::new(pnu)?;
        let now = self.gateway.clock().now().0;
        let (record, removed) = {
            let mut scene = self.scene.lock();
            let Scene {
                registries,
                surface,
            } = &mut *scene;
            let mut record = registries
                .find(&id)
                .map(|e| e.record.clone())
                .unwrap_or_else(|| {
                    ParcelRecord::new(id.clone(), Mode::Click).with_color(self.colors.get_color(&id))
                });
            record.info = info.clone();
            record.updated_at_ms = now;
            record.mode = Mode::Click;
            if record.is_vacant() {
                let removed = !registries.remove_everywhere(surface, &id).is_empty();
                (record, removed)
            } else {
                let edited = registries.edit_record(surface, &id, |r| {
                    r.info = info.clone();
                    r.updated_at_ms = now;
                });
                if !edited || !registries.registry(Mode::Click).contains(&id) {
                    registries.add(surface, record.clone());
                }
                let display = evaluate_marker(&record.info).should_display;
                registries.set_marker(surface, &id, display);
                (record, false)
            }
        };
        if removed {
            self.tombstone_if_vacant(&record);
        }
        self.colors.set_marker_state(&id, &record);
        self.persist(&record).await;
        Ok(self.colors.get_marker_state(&id))
    }

    /// Registers a clicked or search-selected parcel.
    ///
    /// Color and information already known for the identifier are kept when
    /// the incoming record lacks them.
    pub async fn select_parcel(&self, mut record: ParcelRecord) -> AddOutcome {
        let outcome = {
            let mut scene = self.scene.lock();
            let Scene {
                registries,
                surface,
            } = &mut *scene;
            if let Some(existing) = registries.registry(record.mode).get(&record.pnu) {
                merge_known(&mut record, &existing.record);
            }
            if !record.is_colored() {
                record.color = self.colors.get_color(&record.pnu);
            }
            let outcome = registries.add(surface, record.clone());
            let display = evaluate_marker(&record.info).should_display;
            registries.set_marker(surface, &record.pnu, display);
            outcome
        };
        if record.mode == Mode::Click
            && is_worth_saving(&record)
            && !self.tombstones.is_deleted(&record.pnu)
        {
            self.gateway.upsert_record(&record).await;
        }
        outcome
    }

    /// Runs a cadastral lookup and shows the results as the search overlay.
    ///
    /// Lookup failures are logged and yield no results.
    pub async fn search(&self, query: &str) -> Vec<Pnu> {
        let query = query.trim();
        if query.is_empty() {
            return Vec::new();
        }
        let Some(lookup) = self.lookup.clone() else {
            tracing::warn!("search for {query:?} ignored: no lookup configured");
            return Vec::new();
        };
        let rows = match lookup.lookup(query).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!("lookup for {query:?} failed: {e}");
                return Vec::new();
            }
        };
        let (records, dropped) = normalize_batch(&rows);
        if dropped > 0 {
            tracing::debug!("lookup for {query:?} returned {dropped} rows without identifiers");
        }

        let (found, purged) = {
            let mut scene = self.scene.lock();
            let Scene {
                registries,
                surface,
            } = &mut *scene;
            registries.clear_search(surface);
            let purged = registries.set_active(surface, Mode::Search);
            let mut found = Vec::with_capacity(records.len());
            for mut record in records {
                record.mode = Mode::Search;
                if let Some(existing) = registries.registry(Mode::Click).get(&record.pnu) {
                    merge_known(&mut record, &existing.record);
                }
                if !record.is_colored() {
                    record.color = self.colors.get_color(&record.pnu);
                }
                let display = evaluate_marker(&record.info).should_display;
                let pnu = record.pnu.clone();
                registries.add(surface, record);
                registries.set_marker(surface, &pnu, display);
                found.push(pnu);
            }
            (found, purged)
        };
        self.colors.purge(&purged);
        tracing::debug!("search {query:?} matched {} parcels", found.len());
        found
    }

    /// Drops the search overlay; covered click parcels become visible again.
    pub fn clear_search(&self) -> Vec<Pnu> {
        let mut scene = self.scene.lock();
        let Scene {
            registries,
            surface,
        } = &mut *scene;
        registries.clear_search(surface)
    }

    /// Switches the shown registry. Leaving a mode sweeps every identifier
    /// held by both registries out of the click registry; the swept
    /// identifiers are returned and their color entries removed from storage.
    pub fn set_active_mode(&self, mode: Mode) -> Vec<Pnu> {
        let purged = {
            let mut scene = self.scene.lock();
            let Scene {
                registries,
                surface,
            } = &mut *scene;
            registries.set_active(surface, mode)
        };
        self.colors.purge(&purged);
        purged
    }

    pub fn active_mode(&self) -> Mode {
        self.scene.lock().registries.active()
    }

    /// Snapshot of one mode's registry.
    pub fn visible_registry(&self, mode: Mode) -> Vec<RegistryEntry> {
        self.scene
            .lock()
            .registries
            .registry(mode)
            .iter()
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn registry_contains(&self, mode: Mode, pnu: &Pnu) -> bool {
        self.scene.lock().registries.registry(mode).contains(pnu)
    }

    pub fn is_visible(&self, mode: Mode, pnu: &Pnu) -> bool {
        self.scene.lock().registries.is_visible(mode, pnu)
    }

    /// Current record for the identifier, search entry first.
    pub fn record(&self, pnu: &Pnu) -> Option<ParcelRecord> {
        self.scene
            .lock()
            .registries
            .find(pnu)
            .map(|e| e.record.clone())
    }

    pub fn get_color(&self, pnu: &Pnu) -> Option<ColorIndex> {
        self.colors.get_color(pnu)
    }

    pub fn get_marker_state(&self, pnu: &Pnu) -> MarkerState {
        self.colors.get_marker_state(pnu)
    }

    pub fn is_deleted(&self, pnu: &Pnu) -> bool {
        self.tombstones.is_deleted(pnu)
    }

    pub fn tombstones(&self) -> BTreeSet<Pnu> {
        self.tombstones.all()
    }

    /// Lifts a tombstone without re-creating the parcel.
    pub fn undelete(&self, pnu: &Pnu) -> bool {
        self.tombstones.unmark_deleted(pnu)
    }

    fn begin_removal(&self, pnu: &Pnu) -> Option<RemovalGuard<'_>> {
        if !self.removing.lock().insert(pnu.clone()) {
            return None;
        }
        Some(RemovalGuard {
            removing: &self.removing,
            pnu: pnu.clone(),
        })
    }

    /// Tombstones a parcel whose removed entry held nothing: no geometry, no
    /// color and no information.
    fn tombstone_if_vacant(&self, record: &ParcelRecord) {
        if !record.is_vacant() {
            return;
        }
        match self.tombstones.mark_deleted(&record.pnu) {
            Ok(_) => {
                tracing::debug!("vacant parcel {} removed and tombstoned", record.pnu);
                self.events.emit(ParcelEvent::Deleted {
                    pnu: record.pnu.clone(),
                });
            }
            Err(e) => tracing::warn!("tombstoning vacant parcel {} failed: {e}", record.pnu),
        }
    }

    /// Stores a record worth keeping; prunes one that is not.
    async fn persist(&self, record: &ParcelRecord) {
        if is_worth_saving(record) {
            self.gateway.upsert_record(record).await;
        } else if let Err(e) = self.gateway.remove_record(&record.pnu).await {
            tracing::warn!("pruning empty record {} failed: {e}", record.pnu);
        }
    }
}

/// Fills fields the incoming record lacks from what is already known.
fn merge_known(record: &mut ParcelRecord, known: &ParcelRecord) {
    if !record.is_colored() {
        record.color = known.color;
        record.legacy_color = known.legacy_color.clone();
    }
    if !record.info.has_user_data() {
        record.info = known.info.clone();
    }
    if !record.has_geometry() {
        record.geometry = known.geometry.clone();
    }
    if record.address.trim().is_empty() {
        record.address = known.address.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::{ClearOutcome, ColorOutcome, DeleteOutcome, ParcelService};
    use crate::colors::ColorChange;
    use crate::config::SyncConfig;
    use crate::error::SyncError;
    use crate::events::ParcelEvent;
    use crate::gateway::PersistenceGateway;
    use crate::restore::{RestoreOutcome, RestoreState};
    use foundation::color::ColorIndex;
    use foundation::ids::Pnu;
    use foundation::time::{ManualClock, Millis};
    use parcels::normalize::RawParcel;
    use parcels::record::{LegacyColor, Mode, ParcelGeometry, ParcelInfo, ParcelRecord};
    use pretty_assertions::assert_eq;
    use remote::{MemoryRemote, RemoteStore, StaticLookup};
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::time::Duration;
    use storage::{KeyValueStorage, MemoryStorage, ParcelSlots};

    fn pnu(s: &str) -> Pnu {
        Pnu::new(s).unwrap()
    }

    fn idx(i: u8) -> Option<ColorIndex> {
        ColorIndex::new(i).ok()
    }

    fn square() -> ParcelGeometry {
        ParcelGeometry::new(vec![vec![
            [126.97, 37.57],
            [126.98, 37.57],
            [126.98, 37.58],
            [126.97, 37.58],
        ]])
    }

    fn stored(id: &str, color: Option<u8>, memo: &str) -> ParcelRecord {
        ParcelRecord::new(pnu(id), Mode::Click)
            .with_geometry(square())
            .with_color(color.and_then(idx))
            .with_info(ParcelInfo {
                memo: memo.into(),
                ..ParcelInfo::default()
            })
    }

    struct Harness {
        storage: Arc<MemoryStorage>,
        remote: Arc<MemoryRemote>,
        clock: ManualClock,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                storage: Arc::new(MemoryStorage::new()),
                remote: Arc::new(MemoryRemote::new()),
                clock: ManualClock::new(Millis(10_000)),
            }
        }

        fn slots(&self) -> Arc<ParcelSlots> {
            Arc::new(ParcelSlots::new(self.storage.clone()))
        }

        fn seed(&self, records: &[ParcelRecord]) {
            self.slots().save_records(records).unwrap();
        }

        fn service(&self, with_remote: bool) -> ParcelService {
            let remote: Option<Arc<dyn RemoteStore>> = if with_remote {
                Some(self.remote.clone())
            } else {
                None
            };
            let gateway = PersistenceGateway::new(
                self.slots(),
                remote,
                Arc::new(self.clock.clone()),
                SyncConfig::default(),
            );
            ParcelService::new(Arc::new(gateway), Default::default())
        }
    }

    #[tokio::test]
    async fn same_color_twice_unsets() {
        let h = Harness::new();
        let svc = h.service(false);
        let a = pnu("PNU-A");

        svc.apply_color("PNU-A", 0).await.unwrap();
        assert_eq!(svc.get_color(&a), idx(0));
        let second = svc.apply_color("PNU-A", 0).await.unwrap();
        assert_eq!(second, ColorOutcome::Applied(ColorChange::Cleared { previous: ColorIndex::new(0).unwrap() }));
        assert_eq!(svc.get_color(&a), None);

        // No geometry and no information: nothing of the parcel is left.
        assert!(!svc.registry_contains(Mode::Click, &a));
        assert!(svc.with_scene(|_, s| s.live_count() == 0));
        assert!(svc.is_deleted(&a));

        svc.apply_color("PNU-A", 0).await.unwrap();
        svc.apply_color("PNU-A", 4).await.unwrap();
        assert_eq!(svc.get_color(&a), idx(4));
        assert!(!svc.is_deleted(&a));
    }

    #[tokio::test]
    async fn uncoloring_keeps_drawn_parcel() {
        let h = Harness::new();
        let svc = h.service(false);
        let g = pnu("PNU-G");
        svc.select_parcel(stored("PNU-G", None, "")).await;
        svc.apply_color("PNU-G", 3).await.unwrap();
        assert_eq!(svc.gateway().local_records().len(), 1);

        svc.apply_color("PNU-G", 3).await.unwrap();
        assert!(svc.is_visible(Mode::Click, &g));
        assert!(!svc.is_deleted(&g));
        assert_eq!(svc.record(&g).unwrap().color, None);
        assert!(svc.gateway().local_records().is_empty());
    }

    #[tokio::test]
    async fn invalid_input_is_rejected() {
        let h = Harness::new();
        let svc = h.service(false);
        assert!(matches!(svc.apply_color("PNU-A", 8).await, Err(SyncError::InvalidColor(_))));
        assert!(matches!(svc.apply_color("PNU-A", -1).await, Err(SyncError::InvalidColor(_))));
        assert!(matches!(svc.apply_color("  ", 1).await, Err(SyncError::InvalidPnu(_))));
        assert!(svc.visible_registry(Mode::Click).is_empty());
    }

    #[tokio::test]
    async fn deleted_parcel_stays_out_after_restore() {
        let h = Harness::new();
        h.seed(&[stored("PNU-B", Some(1), "소유자 확인")]);
        let svc = h.service(false);
        svc.load_and_restore(false).await;
        assert!(svc.registry_contains(Mode::Click, &pnu("PNU-B")));

        assert_eq!(svc.delete_parcel("PNU-B").await.unwrap(), DeleteOutcome::Deleted);
        assert!(svc.is_deleted(&pnu("PNU-B")));
        assert_eq!(svc.get_color(&pnu("PNU-B")), None);

        h.clock.advance(5_000);
        svc.load_and_restore(true).await;
        assert!(!svc.registry_contains(Mode::Click, &pnu("PNU-B")));
        assert!(svc.with_scene(|_, surface| surface.live_count() == 0));
    }

    #[tokio::test]
    async fn tombstone_beats_stored_record() {
        let h = Harness::new();
        h.seed(&[stored("X", Some(2), "메모"), stored("Y", Some(3), "")]);
        h.slots()
            .save_tombstones(&BTreeSet::from([pnu("X")]))
            .unwrap();
        let svc = h.service(false);
        let outcome = svc.load_and_restore(false).await;
        let report = *outcome.report().unwrap();
        assert_eq!(report.tombstoned, 1);
        assert!(!svc.registry_contains(Mode::Click, &pnu("X")));
        assert!(!svc.registry_contains(Mode::Search, &pnu("X")));
        assert!(svc.registry_contains(Mode::Click, &pnu("Y")));
    }

    #[tokio::test]
    async fn recoloring_lifts_tombstone() {
        let h = Harness::new();
        let svc = h.service(false);
        svc.apply_color("Z", 1).await.unwrap();
        svc.delete_parcel("Z").await.unwrap();
        assert!(svc.is_deleted(&pnu("Z")));
        svc.apply_color("Z", 2).await.unwrap();
        assert!(!svc.is_deleted(&pnu("Z")));
        assert_eq!(h.service(false).tombstones(), BTreeSet::new());
    }

    #[tokio::test]
    async fn search_overlay_wins_over_click_layer() {
        let h = Harness::new();
        h.seed(&[stored("PNU-C", Some(3), "")]);
        let mut hit = stored("PNU-C", None, "");
        hit.address = "세종로 1".into();
        let lookup = StaticLookup::new().with_result("세종로", vec![RawParcel::from(&hit)]);
        let svc = h.service(false).with_lookup(Arc::new(lookup));
        let c = pnu("PNU-C");

        svc.load_and_restore(false).await;
        assert!(svc.is_visible(Mode::Click, &c));

        assert_eq!(svc.search(" 세종로 ").await, vec![c.clone()]);
        assert_eq!(svc.active_mode(), Mode::Search);
        h.clock.advance(5_000);
        svc.load_and_restore(true).await;

        assert!(!svc.is_visible(Mode::Click, &c));
        assert!(svc.is_visible(Mode::Search, &c));
        assert_eq!(svc.record(&c).unwrap().color, idx(3));
        assert!(svc.with_scene(|_, s| s.attached_polygons_for(&c) == 1));

        // Leaving search mode sweeps the overlap out of the click registry.
        assert_eq!(svc.set_active_mode(Mode::Click), vec![c.clone()]);
        assert!(!svc.registry_contains(Mode::Click, &c));
        assert_eq!(svc.get_color(&c), None);
        assert_eq!(svc.gateway().get_color_state(&c), None);
        svc.clear_search();
        assert!(svc.with_scene(|_, s| s.attached_polygons_for(&c) == 0));

        // The stored record is untouched, so the next restore brings it back.
        h.clock.advance(5_000);
        svc.load_and_restore(true).await;
        assert!(svc.is_visible(Mode::Click, &c));
        assert_eq!(svc.get_color(&c), idx(3));
    }

    #[tokio::test]
    async fn legacy_colored_rows_are_restored() {
        let h = Harness::new();
        h.storage
            .set_item(
                "parcelData",
                r##"[{"pnu": "OLD-1", "is_colored": true}, {"pnu": "OLD-2", "color": "#123456"}, {"pnu": "OLD-3", "isColored": false}]"##,
            )
            .unwrap();
        let svc = h.service(false);
        let report = *svc.load_and_restore(false).await.report().unwrap();
        assert_eq!(report.restored, 2);
        assert_eq!(report.rejected, 1);
        assert!(svc.registry_contains(Mode::Click, &pnu("OLD-1")));
        assert_eq!(
            svc.record(&pnu("OLD-2")).unwrap().legacy_color,
            Some(LegacyColor::Hex("#123456".into()))
        );

        assert_eq!(svc.clear_parcel_info("OLD-1").await.unwrap(), ClearOutcome::Cleared);
        assert!(!svc.is_deleted(&pnu("OLD-1")));
        let kept: Vec<Pnu> = svc.gateway().local_records().into_iter().map(|r| r.pnu).collect();
        assert!(kept.contains(&pnu("OLD-1")));
    }

    #[tokio::test]
    async fn minimal_records_are_not_restored() {
        let h = Harness::new();
        let mut blank = stored("PNU-D", None, "");
        blank.info.owner_name = "홍길동".into();
        h.seed(&[blank, stored("kept", Some(0), "")]);

        let svc = h.service(false);
        let report = *svc.load_and_restore(false).await.report().unwrap();
        assert_eq!(report.rejected, 1);
        assert_eq!(report.restored, 1);
        assert!(!svc.registry_contains(Mode::Click, &pnu("PNU-D")));
        assert!(!svc.registry_contains(Mode::Search, &pnu("PNU-D")));
        assert_eq!(svc.validation_stats().rejected_count, 1);

        svc.update_info("PNU-D", ParcelInfo { memo: "".into(), ..ParcelInfo::default() })
            .await
            .unwrap();
        let stored_ids: Vec<Pnu> = svc.gateway().local_records().into_iter().map(|r| r.pnu).collect();
        assert_eq!(stored_ids, vec![pnu("kept")]);
    }

    #[tokio::test]
    async fn clearing_info_keeps_colored_polygon() {
        let h = Harness::new();
        let svc = h.service(false);
        let e = pnu("PNU-E");
        svc.select_parcel(stored("PNU-E", None, "")).await;
        svc.apply_color("PNU-E", 2).await.unwrap();
        let marker = svc
            .update_info(
                "PNU-E",
                ParcelInfo {
                    memo: "매입 검토".into(),
                    owner_name: "김민수".into(),
                    ..ParcelInfo::default()
                },
            )
            .await
            .unwrap();
        assert!(marker.should_display);

        assert_eq!(svc.clear_parcel_info("PNU-E").await.unwrap(), ClearOutcome::Cleared);
        assert!(!svc.is_deleted(&e));
        let record = svc.record(&e).unwrap();
        assert!(record.is_minimal());
        assert_eq!(record.color, idx(2));
        assert!(!svc.get_marker_state(&e).should_display);
        let entry = svc.visible_registry(Mode::Click).remove(0);
        assert!(entry.marker.is_none());
        svc.with_scene(|_, s| {
            assert!(s.is_attached(entry.polygon));
            assert_eq!(s.get(entry.polygon).unwrap().fill, idx(2));
        });

        let reloaded = h.service(false);
        reloaded.load_and_restore(false).await;
        assert!(reloaded.is_visible(Mode::Click, &e));
        assert!(!reloaded.get_marker_state(&e).should_display);
    }

    #[tokio::test]
    async fn clearing_info_without_color_deletes() {
        let h = Harness::new();
        let svc = h.service(false);
        svc.update_info("F", ParcelInfo { memo: "임시".into(), ..ParcelInfo::default() })
            .await
            .unwrap();
        assert_eq!(svc.clear_parcel_info("F").await.unwrap(), ClearOutcome::Deleted);
        assert!(svc.is_deleted(&pnu("F")));
        assert!(matches!(
            svc.clear_parcel_info("F").await,
            Err(SyncError::UnknownParcel(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_restores_insert_once() {
        let h = Harness::new();
        h.remote.seed([RawParcel::from(&stored("R", Some(1), "메모"))]);
        h.remote.set_latency(Some(Duration::from_millis(100)));
        let svc = h.service(true);
        svc.connect().await;

        let (first, second) = tokio::join!(svc.load_and_restore(false), svc.load_and_restore(false));
        assert!(matches!(first, RestoreOutcome::Restored(_)));
        assert_eq!(second, RestoreOutcome::SkippedLoading);
        assert_eq!(svc.load_and_restore(false).await, RestoreOutcome::SkippedReady);
        assert_eq!(svc.restore_state(), RestoreState::Ready);
        assert!(svc.with_scene(|_, s| s.attached_polygons_for(&pnu("R")) == 1));
        assert_eq!(h.remote.calls().selects, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn color_applied_during_restore_survives() {
        let h = Harness::new();
        h.remote.seed([RawParcel::from(&stored("R", Some(1), "메모"))]);
        let svc = h.service(true);
        svc.connect().await;
        h.remote.set_latency(Some(Duration::from_millis(100)));

        let (outcome, colored) = tokio::join!(svc.load_and_restore(false), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            svc.apply_color("X", 1).await
        });
        assert!(matches!(outcome, RestoreOutcome::Restored(_)));
        assert!(matches!(colored.unwrap(), ColorOutcome::Applied(_)));
        assert!(svc.registry_contains(Mode::Click, &pnu("X")));
        assert!(svc.registry_contains(Mode::Click, &pnu("R")));
        assert_eq!(svc.get_color(&pnu("X")), idx(1));
        let stored_ids: Vec<Pnu> = svc.gateway().local_records().into_iter().map(|r| r.pnu).collect();
        assert_eq!(stored_ids, vec![pnu("R"), pnu("X")]);
    }

    #[tokio::test]
    async fn restore_drops_state_of_parcels_gone_from_storage() {
        let h = Harness::new();
        let svc = h.service(true);
        svc.connect().await;
        let gone = pnu("GONE");
        svc.apply_color("K", 2).await.unwrap();
        svc.apply_color("GONE", 5).await.unwrap();
        svc.update_info("GONE", ParcelInfo { memo: "확인 필요".into(), ..ParcelInfo::default() })
            .await
            .unwrap();
        svc.load_and_restore(false).await;
        assert!(svc.get_marker_state(&gone).should_display);

        // Another session deletes the parcel from both tiers.
        let other = h.service(true);
        other.connect().await;
        other.delete_parcel("GONE").await.unwrap();

        h.clock.advance(5_000);
        svc.on_remote_change();
        let report = *svc.load_and_restore(true).await.report().unwrap();
        assert_eq!(report.evicted, 1);
        assert!(!svc.registry_contains(Mode::Click, &gone));
        assert_eq!(svc.get_color(&gone), None);
        assert!(!svc.get_marker_state(&gone).should_display);
        assert_eq!(svc.gateway().get_color_state(&gone), None);

        // Selecting it again does not bring the old color back.
        svc.select_parcel(ParcelRecord::new(gone.clone(), Mode::Click).with_geometry(square()))
            .await;
        assert_eq!(svc.record(&gone).unwrap().color, None);
        assert_eq!(svc.get_color(&pnu("K")), idx(2));
    }

    #[tokio::test(start_paused = true)]
    async fn color_is_suppressed_during_delete() {
        let h = Harness::new();
        let svc = h.service(true);
        svc.connect().await;
        svc.apply_color("G", 1).await.unwrap();
        h.remote.set_latency(Some(Duration::from_millis(100)));

        let (deleted, colored, again) = tokio::join!(
            svc.delete_parcel("G"),
            svc.apply_color("G", 5),
            svc.delete_parcel("G")
        );
        assert_eq!(deleted.unwrap(), DeleteOutcome::Deleted);
        assert_eq!(colored.unwrap(), ColorOutcome::Suppressed);
        assert_eq!(again.unwrap(), DeleteOutcome::AlreadyRemoving);
        assert_eq!(svc.get_color(&pnu("G")), None);
        assert!(svc.is_deleted(&pnu("G")));
        assert!(h.remote.is_empty());
    }

    #[tokio::test]
    async fn remote_outage_keeps_local_writes() {
        let h = Harness::new();
        let svc = h.service(true);
        svc.connect().await;
        h.remote.set_offline(true);
        svc.apply_color("H", 6).await.unwrap();
        assert_eq!(svc.gateway().get_color_state(&pnu("H")).unwrap().index, ColorIndex::new(6).unwrap());
        assert_eq!(svc.gateway().local_records().len(), 1);
    }

    #[tokio::test]
    async fn marker_events_reach_subscribers() {
        let h = Harness::new();
        let svc = h.service(false);
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        svc.events().subscribe(move |e| {
            if let ParcelEvent::MarkerChanged { pnu, state } = e {
                sink.lock().push((pnu.clone(), state.should_display));
            }
        });
        svc.update_info("M", ParcelInfo { owner_contact: "010-2222-3333".into(), ..ParcelInfo::default() })
            .await
            .unwrap();
        svc.update_info("M", ParcelInfo::default()).await.unwrap();
        assert_eq!(*seen.lock(), vec![(pnu("M"), true), (pnu("M"), false)]);
    }
}
