use foundation::bounds::Aabb2;
use foundation::color::ColorIndex;
use foundation::ids::Pnu;
use serde::{Deserialize, Serialize};

/// Which layer a parcel belongs to.
///
/// Click parcels are the user's permanent annotations; search parcels are
/// ephemeral query highlights drawn over them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Click,
    Search,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Click => "click",
            Mode::Search => "search",
        }
    }

    pub fn other(self) -> Mode {
        match self {
            Mode::Click => Mode::Search,
            Mode::Search => Mode::Click,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Polygon boundary as rings of `[lng, lat]`; the first ring is the outer one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParcelGeometry {
    pub rings: Vec<Vec<[f64; 2]>>,
}

impl ParcelGeometry {
    pub fn new(rings: Vec<Vec<[f64; 2]>>) -> Self {
        Self { rings }
    }

    pub fn is_empty(&self) -> bool {
        self.rings.iter().all(|r| r.is_empty())
    }

    pub fn bounds(&self) -> Option<Aabb2> {
        Aabb2::from_points(self.rings.iter().flatten())
    }

    /// Label position: center of the outer ring's bounds.
    pub fn label_anchor(&self) -> Option<[f64; 2]> {
        let outer = self.rings.first()?;
        Aabb2::from_points(outer.iter()).map(|b| b.center())
    }
}

/// User-editable text fields that count as parcel information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfoField {
    Memo,
    ParcelNumber,
    OwnerName,
    OwnerAddress,
    OwnerContact,
}

impl InfoField {
    pub const ALL: [InfoField; 5] = [
        InfoField::Memo,
        InfoField::ParcelNumber,
        InfoField::OwnerName,
        InfoField::OwnerAddress,
        InfoField::OwnerContact,
    ];

    /// Default text the input forms pre-fill; never counts as user data.
    pub fn placeholders(self) -> &'static [&'static str] {
        match self {
            InfoField::Memo => &["(메모 없음)", "추가 메모..."],
            InfoField::ParcelNumber => &["자동입력"],
            InfoField::OwnerName => &["홍길동"],
            InfoField::OwnerAddress => &["서울시 강남구..."],
            InfoField::OwnerContact => &["010-1234-5678"],
        }
    }

    /// True if `value` is non-blank and not one of this field's placeholders.
    pub fn is_user_value(self, value: &str) -> bool {
        let v = value.trim();
        !v.is_empty() && !self.placeholders().contains(&v)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParcelInfo {
    #[serde(default)]
    pub parcel_number: String,
    #[serde(default)]
    pub owner_name: String,
    #[serde(default)]
    pub owner_address: String,
    #[serde(default)]
    pub owner_contact: String,
    #[serde(default)]
    pub memo: String,
}

impl ParcelInfo {
    pub fn field(&self, field: InfoField) -> &str {
        match field {
            InfoField::Memo => &self.memo,
            InfoField::ParcelNumber => &self.parcel_number,
            InfoField::OwnerName => &self.owner_name,
            InfoField::OwnerAddress => &self.owner_address,
            InfoField::OwnerContact => &self.owner_contact,
        }
    }

    /// Fields holding real user data, in [`InfoField::ALL`] order.
    pub fn user_fields(&self) -> Vec<InfoField> {
        InfoField::ALL
            .into_iter()
            .filter(|f| f.is_user_value(self.field(*f)))
            .collect()
    }

    pub fn has_user_data(&self) -> bool {
        InfoField::ALL
            .into_iter()
            .any(|f| f.is_user_value(self.field(f)))
    }
}

/// Color signal from an older client that does not map onto the palette.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegacyColor {
    /// `is_colored` was set without a usable index or color string.
    Flagged,
    /// A non-transparent color string outside the palette.
    Hex(String),
}

impl LegacyColor {
    pub fn hex(&self) -> Option<&str> {
        match self {
            LegacyColor::Flagged => None,
            LegacyColor::Hex(hex) => Some(hex),
        }
    }
}

/// Canonical parcel record.
///
/// Every storage tier is normalized into this shape exactly once on ingress
/// (see [`crate::normalize`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParcelRecord {
    pub pnu: Pnu,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<ParcelGeometry>,
    /// Display address / jibun string. Not user information.
    #[serde(default)]
    pub address: String,
    #[serde(flatten)]
    pub info: ParcelInfo,
    #[serde(default)]
    pub color: Option<ColorIndex>,
    /// Only set while `color` is unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_color: Option<LegacyColor>,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub updated_at_ms: u64,
}

impl ParcelRecord {
    pub fn new(pnu: Pnu, mode: Mode) -> Self {
        Self {
            pnu,
            geometry: None,
            address: String::new(),
            info: ParcelInfo::default(),
            color: None,
            legacy_color: None,
            mode,
            updated_at_ms: 0,
        }
    }

    pub fn with_geometry(mut self, geometry: ParcelGeometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn with_info(mut self, info: ParcelInfo) -> Self {
        self.info = info;
        self
    }

    pub fn with_color(mut self, color: Option<ColorIndex>) -> Self {
        self.color = color;
        self.legacy_color = None;
        self
    }

    /// Assigns a palette color, or clears every color signal on `None`.
    pub fn set_color(&mut self, color: Option<ColorIndex>) {
        self.color = color;
        self.legacy_color = None;
    }

    /// Colored by the palette or by a legacy row's color signal.
    pub fn is_colored(&self) -> bool {
        self.color.is_some() || self.legacy_color.is_some()
    }

    pub fn has_geometry(&self) -> bool {
        self.geometry.as_ref().is_some_and(|g| !g.is_empty())
    }

    /// No user information left. A minimal record may still carry a color.
    pub fn is_minimal(&self) -> bool {
        !self.info.has_user_data()
    }

    /// Nothing worth keeping at all: no geometry, no color, no information.
    pub fn is_vacant(&self) -> bool {
        !self.has_geometry() && !self.is_colored() && self.is_minimal()
    }

    /// Label text: parcel number when set, else the display address.
    pub fn label_text(&self) -> Option<&str> {
        if InfoField::ParcelNumber.is_user_value(&self.info.parcel_number) {
            return Some(self.info.parcel_number.trim());
        }
        let address = self.address.trim();
        (!address.is_empty()).then_some(address)
    }
}

#[cfg(test)]
mod tests {
    use super::{InfoField, LegacyColor, Mode, ParcelGeometry, ParcelInfo, ParcelRecord};
    use foundation::color::ColorIndex;
    use foundation::ids::Pnu;

    fn pnu(s: &str) -> Pnu {
        Pnu::new(s).unwrap()
    }

    #[test]
    fn placeholders_are_not_user_values() {
        assert!(!InfoField::OwnerName.is_user_value("홍길동"));
        assert!(!InfoField::OwnerName.is_user_value("  홍길동 "));
        assert!(InfoField::OwnerName.is_user_value("김철수"));
        assert!(!InfoField::Memo.is_user_value("   "));
        assert!(!InfoField::OwnerContact.is_user_value("010-1234-5678"));
    }

    #[test]
    fn colored_record_without_info_is_minimal_not_vacant() {
        let r = ParcelRecord::new(pnu("PNU-E"), Mode::Click).with_color(ColorIndex::new(2).ok());
        assert!(r.is_minimal());
        assert!(!r.is_vacant());
    }

    #[test]
    fn legacy_color_keeps_record_from_being_vacant() {
        let mut r = ParcelRecord::new(pnu("old"), Mode::Click);
        assert!(r.is_vacant());
        r.legacy_color = Some(LegacyColor::Flagged);
        assert!(r.is_colored());
        assert!(!r.is_vacant());
        r.set_color(None);
        assert!(r.is_vacant());
    }

    #[test]
    fn label_prefers_parcel_number() {
        let mut r = ParcelRecord::new(pnu("p"), Mode::Click);
        assert_eq!(r.label_text(), None);
        r.address = "세종로 1".to_string();
        assert_eq!(r.label_text(), Some("세종로 1"));
        r.info = ParcelInfo {
            parcel_number: "1-23".to_string(),
            ..ParcelInfo::default()
        };
        assert_eq!(r.label_text(), Some("1-23"));
    }

    #[test]
    fn geometry_anchor_uses_outer_ring() {
        let g = ParcelGeometry::new(vec![vec![[0.0, 0.0], [2.0, 0.0], [2.0, 2.0], [0.0, 2.0]]]);
        assert_eq!(g.label_anchor(), Some([1.0, 1.0]));
        assert!(!g.is_empty());
        assert!(ParcelGeometry::default().is_empty());
    }

    #[test]
    fn mode_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Mode::Search).unwrap(), "\"search\"");
        assert_eq!(Mode::Click.other(), Mode::Search);
    }
}
