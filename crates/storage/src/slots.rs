//! Typed access to the well-known storage keys.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use foundation::color::{ColorIndex, is_transparent_color};
use foundation::ids::Pnu;
use parcels::marker::MarkerState;
use parcels::normalize::{ParcelRow, RawParcel};
use parcels::record::ParcelRecord;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{KeyValueStorage, StorageError};

pub const PARCEL_DATA_KEY: &str = "parcelData";
pub const PARCEL_COLORS_KEY: &str = "parcelColors";
pub const DELETED_PARCELS_KEY: &str = "deletedParcels";
pub const MARKER_STATES_KEY: &str = "markerStates";

/// Persisted color assignment for one parcel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorState {
    pub color: String,
    pub index: ColorIndex,
}

impl ColorState {
    pub fn from_index(index: ColorIndex) -> Self {
        Self {
            color: index.hex().to_string(),
            index,
        }
    }
}

/// The four parcel slots layered over a [`KeyValueStorage`].
///
/// Reads never fail: a missing key reads as empty, and an unparsable value
/// reads as empty and is reported once per key. Writes surface errors so the
/// caller can decide how much durability it needs.
pub struct ParcelSlots {
    storage: Arc<dyn KeyValueStorage>,
    prefix: String,
    corrupt_reported: Mutex<BTreeSet<String>>,
}

impl std::fmt::Debug for ParcelSlots {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParcelSlots")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl ParcelSlots {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self::with_prefix(storage, "")
    }

    /// Namespaces every key, e.g. per signed-in user.
    pub fn with_prefix(storage: Arc<dyn KeyValueStorage>, prefix: impl Into<String>) -> Self {
        Self {
            storage,
            prefix: prefix.into(),
            corrupt_reported: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn storage(&self) -> &Arc<dyn KeyValueStorage> {
        &self.storage
    }

    fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Raw stored rows. Non-object elements are skipped.
    pub fn load_records(&self) -> Vec<RawParcel> {
        let values: Vec<Value> = self.read_json(PARCEL_DATA_KEY);
        values.into_iter().filter_map(RawParcel::from_value).collect()
    }

    pub fn save_records(&self, records: &[ParcelRecord]) -> Result<(), StorageError> {
        let rows: Vec<ParcelRow> = records.iter().map(ParcelRow::from).collect();
        self.write_json(PARCEL_DATA_KEY, &rows)
    }

    /// Color map. Legacy entries stored as a bare index or hex string are accepted.
    pub fn load_colors(&self) -> BTreeMap<Pnu, ColorState> {
        let raw: BTreeMap<String, Value> = self.read_json(PARCEL_COLORS_KEY);
        raw.into_iter()
            .filter_map(|(id, v)| {
                let pnu = Pnu::new(&id).ok()?;
                let index = color_from_value(&v)?;
                Some((pnu, ColorState::from_index(index)))
            })
            .collect()
    }

    pub fn save_colors(&self, colors: &BTreeMap<Pnu, ColorState>) -> Result<(), StorageError> {
        self.write_json(PARCEL_COLORS_KEY, colors)
    }

    pub fn load_tombstones(&self) -> BTreeSet<Pnu> {
        let raw: Vec<String> = self.read_json(DELETED_PARCELS_KEY);
        raw.into_iter().filter_map(|s| Pnu::new(s).ok()).collect()
    }

    pub fn save_tombstones(&self, ids: &BTreeSet<Pnu>) -> Result<(), StorageError> {
        self.write_json(DELETED_PARCELS_KEY, ids)
    }

    pub fn load_markers(&self) -> BTreeMap<Pnu, MarkerState> {
        self.read_json(MARKER_STATES_KEY)
    }

    pub fn save_markers(&self, markers: &BTreeMap<Pnu, MarkerState>) -> Result<(), StorageError> {
        self.write_json(MARKER_STATES_KEY, markers)
    }

    fn read_json<T: DeserializeOwned + Default>(&self, name: &str) -> T {
        let key = self.key(name);
        let raw = match self.storage.get_item(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return T::default(),
            Err(e) => {
                tracing::warn!("reading {key} failed, using empty state: {e}");
                return T::default();
            }
        };
        if raw.trim().is_empty() {
            return T::default();
        }
        match serde_json::from_str::<T>(&raw) {
            Ok(v) => v,
            Err(e) => {
                if self.corrupt_reported.lock().insert(key.clone()) {
                    tracing::warn!("stored {key} is corrupt, using empty state: {e}");
                }
                T::default()
            }
        }
    }

    fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<(), StorageError> {
        let key = self.key(name);
        let raw = serde_json::to_string(value).map_err(|e| StorageError::Io(e.to_string()))?;
        self.storage.set_item(&key, &raw)?;
        self.corrupt_reported.lock().remove(&key);
        Ok(())
    }
}

fn color_from_value(v: &Value) -> Option<ColorIndex> {
    match v {
        Value::Number(n) => ColorIndex::from_i64(n.as_i64()?).ok(),
        Value::String(s) if is_transparent_color(s) => None,
        Value::String(s) => ColorIndex::from_hex(s),
        Value::Object(obj) => obj
            .get("index")
            .or_else(|| obj.get("colorIndex"))
            .and_then(color_from_value)
            .or_else(|| obj.get("color").and_then(color_from_value)),
        _ => None,
    }
}
