use foundation::color::ColorIndex;
use foundation::handles::Handle;
use foundation::ids::Pnu;
use parcels::record::ParcelGeometry;

/// Drawing primitives the registries depend on.
///
/// Mirrors the map SDK contract: handles are created detached, and
/// `set_attached` is the `setMap(surface | null)` toggle. Destroyed handles
/// must be ignored by every later call.
pub trait RenderSurface: Send {
    fn create_polygon(
        &mut self,
        pnu: &Pnu,
        geometry: Option<&ParcelGeometry>,
        fill: Option<ColorIndex>,
    ) -> Handle;
    fn create_label(&mut self, pnu: &Pnu, text: &str, anchor: Option<[f64; 2]>) -> Handle;
    fn create_marker(&mut self, pnu: &Pnu, anchor: Option<[f64; 2]>) -> Handle;
    fn set_fill(&mut self, handle: Handle, fill: Option<ColorIndex>);
    fn set_attached(&mut self, handle: Handle, attached: bool);
    fn destroy(&mut self, handle: Handle);
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DrawableKind {
    Polygon,
    Label,
    Marker,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Drawable {
    pub kind: DrawableKind,
    pub pnu: Pnu,
    pub fill: Option<ColorIndex>,
    pub text: Option<String>,
    pub anchor: Option<[f64; 2]>,
    pub attached: bool,
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    drawable: Option<Drawable>,
}

/// Headless render surface.
///
/// Tracks every live drawable and whether it is attached, which is exactly
/// the state the registries are responsible for. Used by native tools and as
/// the observable surface in tests.
#[derive(Debug, Default)]
pub struct SurfaceWorld {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl SurfaceWorld {
    pub fn new() -> Self {
        Self::default()
    }

    fn spawn(&mut self, drawable: Drawable) -> Handle {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.generation += 1;
            slot.drawable = Some(drawable);
            return Handle::new(index, slot.generation);
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            drawable: Some(drawable),
        });
        Handle::new(index, 0)
    }

    pub fn get(&self, handle: Handle) -> Option<&Drawable> {
        let slot = self.slots.get(handle.index() as usize)?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.drawable.as_ref()
    }

    fn get_mut(&mut self, handle: Handle) -> Option<&mut Drawable> {
        let slot = self.slots.get_mut(handle.index() as usize)?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.drawable.as_mut()
    }

    pub fn is_attached(&self, handle: Handle) -> bool {
        self.get(handle).is_some_and(|d| d.attached)
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.drawable.is_some()).count()
    }

    /// Attached drawables, in slot order.
    pub fn attached(&self) -> Vec<&Drawable> {
        self.slots
            .iter()
            .filter_map(|s| s.drawable.as_ref())
            .filter(|d| d.attached)
            .collect()
    }

    pub fn attached_polygons_for(&self, pnu: &Pnu) -> usize {
        self.attached()
            .into_iter()
            .filter(|d| d.kind == DrawableKind::Polygon && &d.pnu == pnu)
            .count()
    }
}

impl RenderSurface for SurfaceWorld {
    fn create_polygon(
        &mut self,
        pnu: &Pnu,
        geometry: Option<&ParcelGeometry>,
        fill: Option<ColorIndex>,
    ) -> Handle {
        self.spawn(Drawable {
            kind: DrawableKind::Polygon,
            pnu: pnu.clone(),
            fill,
            text: None,
            anchor: geometry.and_then(ParcelGeometry::label_anchor),
            attached: false,
        })
    }

    fn create_label(&mut self, pnu: &Pnu, text: &str, anchor: Option<[f64; 2]>) -> Handle {
        self.spawn(Drawable {
            kind: DrawableKind::Label,
            pnu: pnu.clone(),
            fill: None,
            text: Some(text.to_string()),
            anchor,
            attached: false,
        })
    }

    fn create_marker(&mut self, pnu: &Pnu, anchor: Option<[f64; 2]>) -> Handle {
        self.spawn(Drawable {
            kind: DrawableKind::Marker,
            pnu: pnu.clone(),
            fill: None,
            text: None,
            anchor,
            attached: false,
        })
    }

    fn set_fill(&mut self, handle: Handle, fill: Option<ColorIndex>) {
        if let Some(d) = self.get_mut(handle) {
            d.fill = fill;
        }
    }

    fn set_attached(&mut self, handle: Handle, attached: bool) {
        match self.get_mut(handle) {
            Some(d) => d.attached = attached,
            None => tracing::debug!("ignoring attach on stale handle {handle:?}"),
        }
    }

    fn destroy(&mut self, handle: Handle) {
        let Some(slot) = self.slots.get_mut(handle.index() as usize) else {
            return;
        };
        if slot.generation != handle.generation() || slot.drawable.is_none() {
            return;
        }
        slot.drawable = None;
        self.free.push(handle.index());
    }
}

#[cfg(test)]
mod tests {
    use super::{DrawableKind, RenderSurface, SurfaceWorld};
    use foundation::color::ColorIndex;
    use foundation::ids::Pnu;

    #[test]
    fn handles_start_detached_and_toggle() {
        let mut s = SurfaceWorld::new();
        let id = Pnu::new("a").unwrap();
        let h = s.create_polygon(&id, None, ColorIndex::new(1).ok());
        assert!(!s.is_attached(h));
        s.set_attached(h, true);
        assert!(s.is_attached(h));
        assert_eq!(s.attached_polygons_for(&id), 1);
        assert_eq!(s.get(h).unwrap().kind, DrawableKind::Polygon);
    }

    #[test]
    fn destroyed_handles_go_stale_when_slot_is_reused() {
        let mut s = SurfaceWorld::new();
        let id = Pnu::new("a").unwrap();
        let old = s.create_marker(&id, None);
        s.destroy(old);
        let new = s.create_label(&id, "1-2", None);
        assert_eq!(old.index(), new.index());
        assert!(s.get(old).is_none());
        s.set_attached(old, true);
        assert!(!s.is_attached(new));
        s.destroy(old);
        assert_eq!(s.live_count(), 1);
    }
}
