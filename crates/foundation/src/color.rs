use serde::{Deserialize, Serialize};

/// Number of entries in the fixed parcel palette.
pub const PALETTE_LEN: usize = 8;

/// Fixed fill palette, addressed by [`ColorIndex`].
pub const PALETTE: [&str; PALETTE_LEN] = [
    "#FF0000", "#FFA500", "#FFFF00", "#90EE90", "#0000FF", "#000000", "#FFFFFF", "#87CEEB",
];

/// Index into [`PALETTE`].
///
/// "No color" is modelled as `Option::<ColorIndex>::None`, so index 0 is an
/// ordinary color and never doubles as the unset state.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ColorIndex(u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("color index {0} is outside the palette (0..{PALETTE_LEN})")]
pub struct InvalidColorIndex(pub i64);

impl ColorIndex {
    pub fn new(index: u8) -> Result<Self, InvalidColorIndex> {
        if (index as usize) < PALETTE_LEN {
            Ok(ColorIndex(index))
        } else {
            Err(InvalidColorIndex(index as i64))
        }
    }

    /// Accepts any integer width; used at ingress where stored JSON may carry
    /// negative or oversized numbers.
    pub fn from_i64(index: i64) -> Result<Self, InvalidColorIndex> {
        u8::try_from(index)
            .map_err(|_| InvalidColorIndex(index))
            .and_then(|i| ColorIndex::new(i).map_err(|_| InvalidColorIndex(index)))
    }

    /// Resolves a palette hex value (case-insensitive, `#` optional).
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.trim();
        let hex = hex.strip_prefix('#').unwrap_or(hex);
        PALETTE
            .iter()
            .position(|p| p[1..].eq_ignore_ascii_case(hex))
            .map(|i| ColorIndex(i as u8))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn hex(self) -> &'static str {
        PALETTE[self.0 as usize]
    }
}

impl TryFrom<u8> for ColorIndex {
    type Error = InvalidColorIndex;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        ColorIndex::new(value)
    }
}

impl From<ColorIndex> for u8 {
    fn from(value: ColorIndex) -> Self {
        value.0
    }
}

impl std::fmt::Display for ColorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Returns true for color strings that mean "no fill".
pub fn is_transparent_color(value: &str) -> bool {
    let v = value.trim();
    v.is_empty() || v.eq_ignore_ascii_case("transparent") || v.eq_ignore_ascii_case("none")
}
