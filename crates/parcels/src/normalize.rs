//! Ingress adapter for stored and remote parcel rows.
//!
//! Rows written by older clients use several spellings for the same field
//! (`parcelNumber`, `parcel_number`, `parcel_name`, ...) and encode color as a
//! palette index, a hex string, an `is_colored` flag, or any mix of those.
//! [`normalize`] folds all of them into one [`ParcelRecord`].

use foundation::color::{ColorIndex, is_transparent_color};
use foundation::ids::Pnu;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::record::{LegacyColor, Mode, ParcelGeometry, ParcelInfo, ParcelRecord};

const PNU_KEYS: &[&str] = &["pnu", "id", "parcel_id"];
const ADDRESS_KEYS: &[&str] = &["address", "jibun_address", "jibunAddress", "addr"];
const PARCEL_NUMBER_KEYS: &[&str] = &["parcel_number", "parcelNumber", "parcel_name", "jibun"];
const OWNER_NAME_KEYS: &[&str] = &["owner_name", "ownerName"];
const OWNER_ADDRESS_KEYS: &[&str] = &["owner_address", "ownerAddress"];
const OWNER_CONTACT_KEYS: &[&str] = &["owner_contact", "ownerContact", "contact"];
const MEMO_KEYS: &[&str] = &["memo", "note"];
const COLOR_INDEX_KEYS: &[&str] = &["color_index", "colorIndex"];
const COLOR_KEYS: &[&str] = &["color", "fillColor", "fill_color"];
const IS_COLORED_KEYS: &[&str] = &["is_colored", "isColored"];
const MODE_KEYS: &[&str] = &["mode", "source", "type"];
const UPDATED_KEYS: &[&str] = &["updated_at_ms", "updatedAt", "updated_at", "timestamp"];
const GEOMETRY_KEYS: &[&str] = &["geometry", "coordinates", "polygon"];

/// Untyped parcel row as found in storage or returned by the remote store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawParcel(pub Map<String, Value>);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    #[error("parcel row has no identifier")]
    MissingPnu,
}

impl RawParcel {
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(RawParcel(map)),
            _ => None,
        }
    }

    /// First non-blank string among `keys`. Numbers are accepted as text.
    fn text(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|k| match self.0.get(*k)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    }

    fn integer(&self, keys: &[&str]) -> Option<i64> {
        keys.iter().find_map(|k| match self.0.get(*k)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        })
    }

    fn flag(&self, keys: &[&str]) -> Option<bool> {
        keys.iter().find_map(|k| match self.0.get(*k)? {
            Value::Bool(b) => Some(*b),
            _ => None,
        })
    }

    fn value(&self, keys: &[&str]) -> Option<&Value> {
        keys.iter()
            .find_map(|k| self.0.get(*k).filter(|v| !v.is_null()))
    }
}

/// Canonical wire/storage form of a [`ParcelRecord`].
///
/// Carries the color both as index and hex (plus `is_colored`) so that older
/// readers of the same table keep working.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParcelRow {
    pub pnu: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Value>,
    pub address: String,
    pub parcel_number: String,
    pub owner_name: String,
    pub owner_address: String,
    pub owner_contact: String,
    pub memo: String,
    pub color: Option<String>,
    pub color_index: Option<u8>,
    pub is_colored: bool,
    pub mode: Mode,
    pub updated_at_ms: u64,
}

impl From<&ParcelRecord> for ParcelRow {
    fn from(r: &ParcelRecord) -> Self {
        Self {
            pnu: r.pnu.as_str().to_string(),
            geometry: r.geometry.as_ref().map(geometry_to_geojson),
            address: r.address.clone(),
            parcel_number: r.info.parcel_number.clone(),
            owner_name: r.info.owner_name.clone(),
            owner_address: r.info.owner_address.clone(),
            owner_contact: r.info.owner_contact.clone(),
            memo: r.info.memo.clone(),
            color: r
                .color
                .map(|c| c.hex().to_string())
                .or_else(|| r.legacy_color.as_ref().and_then(LegacyColor::hex).map(str::to_string)),
            color_index: r.color.map(ColorIndex::get),
            is_colored: r.is_colored(),
            mode: r.mode,
            updated_at_ms: r.updated_at_ms,
        }
    }
}

impl From<&ParcelRecord> for RawParcel {
    fn from(r: &ParcelRecord) -> Self {
        match serde_json::to_value(ParcelRow::from(r)) {
            Ok(Value::Object(map)) => RawParcel(map),
            _ => RawParcel::default(),
        }
    }
}

/// Converts one raw row into the canonical record.
pub fn normalize(raw: &RawParcel) -> Result<ParcelRecord, NormalizeError> {
    let pnu = raw
        .text(PNU_KEYS)
        .and_then(|s| Pnu::new(s).ok())
        .ok_or(NormalizeError::MissingPnu)?;

    let info = ParcelInfo {
        parcel_number: raw.text(PARCEL_NUMBER_KEYS).unwrap_or_default(),
        owner_name: raw.text(OWNER_NAME_KEYS).unwrap_or_default(),
        owner_address: raw.text(OWNER_ADDRESS_KEYS).unwrap_or_default(),
        owner_contact: raw.text(OWNER_CONTACT_KEYS).unwrap_or_default(),
        memo: raw.text(MEMO_KEYS).unwrap_or_default(),
    };

    let mode = match raw.text(MODE_KEYS).as_deref() {
        Some(m) if m.eq_ignore_ascii_case("search") => Mode::Search,
        _ => Mode::Click,
    };

    let (color, legacy_color) = resolve_color(raw, &pnu);
    Ok(ParcelRecord {
        color,
        legacy_color,
        geometry: raw.value(GEOMETRY_KEYS).and_then(geometry_from_value),
        address: raw.text(ADDRESS_KEYS).unwrap_or_default(),
        updated_at_ms: raw
            .integer(UPDATED_KEYS)
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(0),
        pnu,
        info,
        mode,
    })
}

/// Normalizes a batch, preserving order and counting rows that were dropped.
pub fn normalize_batch<'a>(
    rows: impl IntoIterator<Item = &'a RawParcel>,
) -> (Vec<ParcelRecord>, usize) {
    let mut out = Vec::new();
    let mut dropped = 0usize;
    for row in rows {
        match normalize(row) {
            Ok(r) => out.push(r),
            Err(e) => {
                tracing::debug!("dropping parcel row: {e}");
                dropped += 1;
            }
        }
    }
    (out, dropped)
}

/// Palette color, or the legacy signal a row carries when no palette color
/// can be recovered from it.
fn resolve_color(raw: &RawParcel, pnu: &Pnu) -> (Option<ColorIndex>, Option<LegacyColor>) {
    let flagged = raw.flag(IS_COLORED_KEYS);
    if flagged == Some(false) {
        return (None, None);
    }

    if let Some(index) = raw.integer(COLOR_INDEX_KEYS) {
        match ColorIndex::from_i64(index) {
            Ok(c) => return (Some(c), None),
            Err(e) => tracing::warn!("parcel {pnu}: ignoring stored color index: {e}"),
        }
    }

    if let Some(hex) = raw.text(COLOR_KEYS)
        && !is_transparent_color(&hex)
    {
        if let Some(c) = ColorIndex::from_hex(&hex) {
            return (Some(c), None);
        }
        tracing::debug!("parcel {pnu}: color {hex} is not in the palette");
        return (None, Some(LegacyColor::Hex(hex)));
    }

    match flagged {
        Some(true) => (None, Some(LegacyColor::Flagged)),
        _ => (None, None),
    }
}

fn geometry_from_value(value: &Value) -> Option<ParcelGeometry> {
    // GeoJSON object: Polygon or the first polygon of a MultiPolygon.
    if let Value::Object(obj) = value {
        let coords = obj.get("coordinates")?;
        let rings = match obj.get("type").and_then(Value::as_str) {
            Some("MultiPolygon") => coords.as_array()?.first()?,
            _ => coords,
        };
        return rings_from_value(rings);
    }
    rings_from_value(value)
}

/// Accepts `[[[x, y], ...], ...]` (rings) or a bare ring `[[x, y], ...]`.
fn rings_from_value(value: &Value) -> Option<ParcelGeometry> {
    let arr = value.as_array()?;
    let first = arr.first()?;
    let is_bare_ring = first
        .as_array()
        .and_then(|p| p.first())
        .is_some_and(Value::is_number);

    let rings: Vec<Vec<[f64; 2]>> = if is_bare_ring {
        vec![ring_from_value(value)?]
    } else {
        arr.iter().filter_map(ring_from_value).collect()
    };

    let geometry = ParcelGeometry::new(rings);
    (!geometry.is_empty()).then_some(geometry)
}

fn ring_from_value(value: &Value) -> Option<Vec<[f64; 2]>> {
    let ring: Vec<[f64; 2]> = value
        .as_array()?
        .iter()
        .filter_map(|p| {
            let p = p.as_array()?;
            Some([p.first()?.as_f64()?, p.get(1)?.as_f64()?])
        })
        .collect();
    (!ring.is_empty()).then_some(ring)
}

fn geometry_to_geojson(g: &ParcelGeometry) -> Value {
    serde_json::json!({
        "type": "Polygon",
        "coordinates": g.rings,
    })
}

#[cfg(test)]
mod tests {
    use super::{NormalizeError, ParcelRow, RawParcel, normalize, normalize_batch};
    use crate::record::{LegacyColor, Mode, ParcelRecord};
    use crate::validation::is_worth_saving;
    use foundation::color::ColorIndex;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn raw(v: serde_json::Value) -> RawParcel {
        RawParcel::from_value(v).unwrap()
    }

    #[test]
    fn folds_field_name_variants() {
        let r = normalize(&raw(json!({
            "id": "1111010100100010000",
            "parcelNumber": "1-1",
            "ownerName": "김철수",
            "ownerAddress": "",
            "contact": "010-9999-0000",
            "source": "search",
        })))
        .unwrap();
        assert_eq!(r.pnu.as_str(), "1111010100100010000");
        assert_eq!(r.info.parcel_number, "1-1");
        assert_eq!(r.info.owner_name, "김철수");
        assert_eq!(r.info.owner_contact, "010-9999-0000");
        assert_eq!(r.mode, Mode::Search);
    }

    #[test]
    fn blank_variant_falls_through_to_next_spelling() {
        let r = normalize(&raw(json!({
            "pnu": "p",
            "parcel_number": "",
            "parcel_name": "산 12",
        })))
        .unwrap();
        assert_eq!(r.info.parcel_number, "산 12");
    }

    #[test]
    fn missing_identifier_is_rejected() {
        assert_eq!(
            normalize(&raw(json!({ "memo": "x" }))),
            Err(NormalizeError::MissingPnu)
        );
        assert_eq!(
            normalize(&raw(json!({ "pnu": "   " }))),
            Err(NormalizeError::MissingPnu)
        );
    }

    #[test]
    fn color_index_zero_survives() {
        let r = normalize(&raw(json!({ "pnu": "p", "colorIndex": 0 }))).unwrap();
        assert_eq!(r.color, ColorIndex::new(0).ok());
    }

    #[test]
    fn color_resolution_order() {
        // Hex only.
        let r = normalize(&raw(json!({ "pnu": "p", "color": "#ffff00" }))).unwrap();
        assert_eq!(r.color, ColorIndex::new(2).ok());
        // Transparent sentinel.
        let r = normalize(&raw(json!({ "pnu": "p", "color": "transparent" }))).unwrap();
        assert_eq!(r.color, None);
        // Out-of-range index falls back to hex.
        let r = normalize(&raw(json!({ "pnu": "p", "color_index": 12, "color": "#0000FF" })))
            .unwrap();
        assert_eq!(r.color, ColorIndex::new(4).ok());
        // Explicit uncolored flag wins.
        let r = normalize(&raw(json!({ "pnu": "p", "is_colored": false, "color_index": 3 })))
            .unwrap();
        assert_eq!(r.color, None);
    }

    #[test]
    fn legacy_color_signals_survive() {
        let flagged = normalize(&raw(json!({ "pnu": "X", "is_colored": true }))).unwrap();
        assert_eq!(flagged.color, None);
        assert_eq!(flagged.legacy_color, Some(LegacyColor::Flagged));
        assert!(is_worth_saving(&flagged));

        let off_palette = normalize(&raw(json!({ "pnu": "Y", "color": "#123456" }))).unwrap();
        assert_eq!(off_palette.legacy_color, Some(LegacyColor::Hex("#123456".into())));
        assert!(is_worth_saving(&off_palette));

        let row = ParcelRow::from(&off_palette);
        assert!(row.is_colored);
        assert_eq!(row.color.as_deref(), Some("#123456"));
        assert_eq!(row.color_index, None);
        assert_eq!(normalize(&RawParcel::from(&flagged)).unwrap(), flagged);

        // A transparent string with the flag set still counts as colored.
        let r = normalize(&raw(json!({ "pnu": "Z", "isColored": true, "color": "transparent" })))
            .unwrap();
        assert_eq!(r.legacy_color, Some(LegacyColor::Flagged));
    }

    #[test]
    fn geometry_accepts_geojson_and_bare_rings() {
        let a = normalize(&raw(json!({
            "pnu": "a",
            "geometry": { "type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]]] }
        })))
        .unwrap();
        let b = normalize(&raw(json!({
            "pnu": "b",
            "coordinates": [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]]
        })))
        .unwrap();
        assert_eq!(a.geometry, b.geometry);
        assert_eq!(a.geometry.unwrap().rings[0].len(), 3);
    }

    #[test]
    fn canonical_row_reads_back() {
        let original = ParcelRecord::new(foundation::ids::Pnu::new("PNU-A").unwrap(), Mode::Click)
            .with_color(ColorIndex::new(5).ok());
        let row = ParcelRow::from(&original);
        assert!(row.is_colored);
        assert_eq!(row.color.as_deref(), Some("#000000"));
        let back = normalize(&RawParcel::from(&original)).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn batch_counts_dropped_rows() {
        let rows = vec![
            raw(json!({ "pnu": "a" })),
            raw(json!({ "memo": "orphan" })),
            raw(json!({ "pnu": "b" })),
        ];
        let (records, dropped) = normalize_batch(&rows);
        assert_eq!(dropped, 1);
        let ids: Vec<&str> = records.iter().map(|r| r.pnu.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
