use foundation::color::ColorIndex;
use foundation::ids::Pnu;
use parcels::marker::MarkerState;

/// Notifications published on the service event bus.
#[derive(Debug, Clone, PartialEq)]
pub enum ParcelEvent {
    ColorChanged {
        pnu: Pnu,
        color: Option<ColorIndex>,
    },
    /// Marker visibility flipped; `state` is the new evaluation.
    MarkerChanged {
        pnu: Pnu,
        state: MarkerState,
    },
    Deleted {
        pnu: Pnu,
    },
    Restored {
        count: usize,
    },
}
