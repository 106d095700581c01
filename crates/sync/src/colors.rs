use std::collections::BTreeMap;
use std::sync::Arc;

use foundation::color::ColorIndex;
use foundation::ids::Pnu;
use parcels::marker::{MarkerState, evaluate_marker};
use parcels::record::ParcelRecord;
use parking_lot::Mutex;
use runtime::event_bus::EventBus;
use storage::ColorState;

use crate::events::ParcelEvent;
use crate::gateway::PersistenceGateway;

/// Result of [`ColorStore::toggle_color`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorChange {
    Set {
        color: ColorIndex,
        previous: Option<ColorIndex>,
    },
    /// The same color was applied again and has been removed.
    Cleared { previous: ColorIndex },
}

impl ColorChange {
    pub fn color(self) -> Option<ColorIndex> {
        match self {
            ColorChange::Set { color, .. } => Some(color),
            ColorChange::Cleared { .. } => None,
        }
    }
}

/// Per-parcel color assignment and derived marker state.
///
/// Colors are written to local storage through the gateway before each call
/// returns. Marker states persist under `markerStates`, and every change of
/// marker visibility is published on the event bus.
pub struct ColorStore {
    gateway: Arc<PersistenceGateway>,
    events: Arc<EventBus<ParcelEvent>>,
    colors: Mutex<BTreeMap<Pnu, ColorIndex>>,
    markers: Mutex<BTreeMap<Pnu, MarkerState>>,
}

impl std::fmt::Debug for ColorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColorStore")
            .field("colors", &self.colors.lock().len())
            .field("markers", &self.markers.lock().len())
            .finish()
    }
}

impl ColorStore {
    pub fn load(gateway: Arc<PersistenceGateway>, events: Arc<EventBus<ParcelEvent>>) -> Self {
        let colors = gateway
            .color_states()
            .into_iter()
            .map(|(pnu, state)| (pnu, state.index))
            .collect();
        let markers = gateway.slots().load_markers();
        Self {
            gateway,
            events,
            colors: Mutex::new(colors),
            markers: Mutex::new(markers),
        }
    }

    pub fn get_color(&self, pnu: &Pnu) -> Option<ColorIndex> {
        self.colors.lock().get(pnu).copied()
    }

    /// Overwrites the color. Returns whether the local write succeeded.
    pub fn set_color(&self, pnu: &Pnu, color: ColorIndex) -> bool {
        self.colors.lock().insert(pnu.clone(), color);
        let saved = self
            .gateway
            .save_color_state(pnu, ColorState::from_index(color));
        self.events.emit(ParcelEvent::ColorChanged {
            pnu: pnu.clone(),
            color: Some(color),
        });
        saved
    }

    pub fn remove_color(&self, pnu: &Pnu) -> bool {
        let removed = self.colors.lock().remove(pnu).is_some();
        let saved = self.gateway.remove_color_state(pnu);
        if removed {
            self.events.emit(ParcelEvent::ColorChanged {
                pnu: pnu.clone(),
                color: None,
            });
        }
        saved
    }

    /// Applies `color`; applying the color already assigned removes it.
    pub fn toggle_color(&self, pnu: &Pnu, color: ColorIndex) -> ColorChange {
        let previous = self.get_color(pnu);
        if previous == Some(color) {
            self.remove_color(pnu);
            ColorChange::Cleared { previous: color }
        } else {
            self.set_color(pnu, color);
            ColorChange::Set { color, previous }
        }
    }

    /// Drops color entries in bulk, e.g. after the registry overlap sweep.
    pub fn purge(&self, pnus: &[Pnu]) {
        if pnus.is_empty() {
            return;
        }
        {
            let mut colors = self.colors.lock();
            for pnu in pnus {
                colors.remove(pnu);
            }
        }
        self.gateway.remove_color_states(pnus);
    }

    pub fn get_marker_state(&self, pnu: &Pnu) -> MarkerState {
        self.markers.lock().get(pnu).cloned().unwrap_or_default()
    }

    /// Re-evaluates the marker for `record` and returns whether it displays.
    pub fn set_marker_state(&self, pnu: &Pnu, record: &ParcelRecord) -> bool {
        let state = evaluate_marker(&record.info);
        let display = state.should_display;
        let changed = {
            let mut markers = self.markers.lock();
            let was_displayed = markers.get(pnu).is_some_and(|m| m.should_display);
            if display {
                markers.insert(pnu.clone(), state.clone());
            } else {
                markers.remove(pnu);
            }
            if let Err(e) = self.gateway.slots().save_markers(&markers) {
                tracing::warn!("saving marker state of {pnu} failed: {e}");
            }
            was_displayed != display
        };
        if changed {
            self.events.emit(ParcelEvent::MarkerChanged {
                pnu: pnu.clone(),
                state,
            });
        }
        display
    }

    pub fn remove_marker_state(&self, pnu: &Pnu) {
        self.set_marker_state(pnu, &ParcelRecord::new(pnu.clone(), Default::default()));
    }

    /// Registers restored records in one pass and persists both maps once.
    pub fn register_restored(&self, records: &[ParcelRecord]) {
        let mut changed_markers = Vec::new();
        {
            let mut colors = self.colors.lock();
            let mut markers = self.markers.lock();
            for record in records {
                match record.color {
                    Some(c) => colors.insert(record.pnu.clone(), c),
                    None => colors.remove(&record.pnu),
                };
                let state = evaluate_marker(&record.info);
                let was_displayed = markers.get(&record.pnu).is_some_and(|m| m.should_display);
                if state.should_display != was_displayed {
                    changed_markers.push((record.pnu.clone(), state.clone()));
                }
                if state.should_display {
                    markers.insert(record.pnu.clone(), state);
                } else {
                    markers.remove(&record.pnu);
                }
            }
            let states: BTreeMap<Pnu, ColorState> = colors
                .iter()
                .map(|(pnu, c)| (pnu.clone(), ColorState::from_index(*c)))
                .collect();
            if let Err(e) = self.gateway.slots().save_colors(&states) {
                tracing::warn!("saving restored colors failed: {e}");
            }
            if let Err(e) = self.gateway.slots().save_markers(&markers) {
                tracing::warn!("saving restored marker states failed: {e}");
            }
        }
        for (pnu, state) in changed_markers {
            self.events.emit(ParcelEvent::MarkerChanged { pnu, state });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ColorChange, ColorStore};
    use crate::config::SyncConfig;
    use crate::events::ParcelEvent;
    use crate::gateway::PersistenceGateway;
    use foundation::color::ColorIndex;
    use foundation::ids::Pnu;
    use foundation::time::SystemClock;
    use parcels::record::{InfoField, Mode, ParcelInfo, ParcelRecord};
    use pretty_assertions::assert_eq;
    use runtime::event_bus::EventBus;
    use std::sync::Arc;
    use storage::{MemoryStorage, ParcelSlots};

    fn store() -> (Arc<MemoryStorage>, Arc<EventBus<ParcelEvent>>, ColorStore) {
        let storage = Arc::new(MemoryStorage::new());
        let gateway = Arc::new(PersistenceGateway::new(
            Arc::new(ParcelSlots::new(storage.clone())),
            None,
            Arc::new(SystemClock),
            SyncConfig::default(),
        ));
        let events = Arc::new(EventBus::new());
        let store = ColorStore::load(gateway, events.clone());
        (storage, events, store)
    }

    fn pnu(s: &str) -> Pnu {
        Pnu::new(s).unwrap()
    }

    fn idx(i: u8) -> ColorIndex {
        ColorIndex::new(i).unwrap()
    }

    #[test]
    fn same_color_twice_clears() {
        let (_, _, store) = store();
        let a = pnu("PNU-A");
        assert_eq!(store.toggle_color(&a, idx(0)).color(), Some(idx(0)));
        assert_eq!(store.get_color(&a), Some(idx(0)));
        assert_eq!(store.toggle_color(&a, idx(0)), ColorChange::Cleared { previous: idx(0) });
        assert_eq!(store.get_color(&a), None);
    }

    #[test]
    fn different_color_overwrites() {
        let (_, _, store) = store();
        let a = pnu("a");
        store.toggle_color(&a, idx(2));
        let change = store.toggle_color(&a, idx(5));
        assert_eq!(
            change,
            ColorChange::Set {
                color: idx(5),
                previous: Some(idx(2))
            }
        );
        assert_eq!(store.get_color(&a), Some(idx(5)));
    }

    #[test]
    fn colors_survive_reload() {
        let (storage, events, store) = store();
        store.set_color(&pnu("a"), idx(7));
        let gateway = Arc::new(PersistenceGateway::new(
            Arc::new(ParcelSlots::new(storage)),
            None,
            Arc::new(SystemClock),
            SyncConfig::default(),
        ));
        let reloaded = ColorStore::load(gateway, events);
        assert_eq!(reloaded.get_color(&pnu("a")), Some(idx(7)));
    }

    #[test]
    fn marker_changes_are_published_once() {
        let (_, events, store) = store();
        let a = pnu("a");
        let mut record = ParcelRecord::new(a.clone(), Mode::Click);
        record.info = ParcelInfo {
            memo: "측량 예정".into(),
            ..ParcelInfo::default()
        };
        assert!(store.set_marker_state(&a, &record));
        assert!(store.set_marker_state(&a, &record));
        assert_eq!(store.get_marker_state(&a).triggers, vec![InfoField::Memo]);

        record.info.memo = "(메모 없음)".into();
        assert!(!store.set_marker_state(&a, &record));
        assert!(!store.get_marker_state(&a).should_display);

        let marker_events = events
            .events()
            .into_iter()
            .filter(|e| matches!(e, ParcelEvent::MarkerChanged { .. }))
            .count();
        assert_eq!(marker_events, 2);
    }
}
