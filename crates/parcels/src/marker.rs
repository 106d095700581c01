use serde::{Deserialize, Serialize};

use crate::record::{InfoField, ParcelInfo};

/// Derived marker visibility for one parcel.
///
/// `triggers` lists the fields that made the marker visible, in
/// [`InfoField::ALL`] order, so the UI can explain why a marker is shown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerState {
    pub should_display: bool,
    #[serde(default)]
    pub triggers: Vec<InfoField>,
}

impl MarkerState {
    pub fn hidden() -> Self {
        Self::default()
    }
}

/// Pure evaluation of marker visibility from a record's information fields.
pub fn evaluate_marker(info: &ParcelInfo) -> MarkerState {
    let triggers = info.user_fields();
    MarkerState {
        should_display: !triggers.is_empty(),
        triggers,
    }
}
