use std::collections::BTreeMap;

use foundation::color::ColorIndex;
use foundation::handles::Handle;
use foundation::ids::Pnu;
use parcels::record::{Mode, ParcelRecord};

use crate::surface::RenderSurface;

/// One parcel's drawables plus the record they were built from.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryEntry {
    pub polygon: Handle,
    pub label: Option<Handle>,
    pub marker: Option<Handle>,
    pub color: Option<ColorIndex>,
    pub mode: Mode,
    pub record: ParcelRecord,
    attached: bool,
}

impl RegistryEntry {
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    fn handles(&self) -> impl Iterator<Item = Handle> + '_ {
        std::iter::once(self.polygon)
            .chain(self.label)
            .chain(self.marker)
    }

    fn set_attached(&mut self, surface: &mut dyn RenderSurface, attached: bool) {
        for handle in self.handles() {
            surface.set_attached(handle, attached);
        }
        self.attached = attached;
    }

    fn destroy(&self, surface: &mut dyn RenderSurface) {
        for handle in self.handles() {
            surface.set_attached(handle, false);
            surface.destroy(handle);
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Inserted,
    Updated,
}

/// Parcels of one mode keyed by identifier.
///
/// An identifier owns at most one polygon handle: re-adding an existing
/// identifier updates the entry in place instead of drawing a duplicate.
#[derive(Debug)]
pub struct ModeRegistry {
    mode: Mode,
    entries: BTreeMap<Pnu, RegistryEntry>,
    shown: bool,
}

impl ModeRegistry {
    pub fn new(mode: Mode, shown: bool) -> Self {
        Self {
            mode,
            entries: BTreeMap::new(),
            shown,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_shown(&self) -> bool {
        self.shown
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, pnu: &Pnu) -> bool {
        self.entries.contains_key(pnu)
    }

    pub fn get(&self, pnu: &Pnu) -> Option<&RegistryEntry> {
        self.entries.get(pnu)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Pnu, &RegistryEntry)> {
        self.entries.iter()
    }

    pub fn ids(&self) -> Vec<Pnu> {
        self.entries.keys().cloned().collect()
    }

    /// Whether the identifier's drawables are attached to the surface.
    pub fn is_visible(&self, pnu: &Pnu) -> bool {
        self.entries.get(pnu).is_some_and(|e| e.attached)
    }

    /// Inserts or updates `record`. The entry is attached only when the
    /// registry is shown and `attach` is true.
    pub fn add(
        &mut self,
        surface: &mut dyn RenderSurface,
        record: ParcelRecord,
        attach: bool,
    ) -> AddOutcome {
        let attach = attach && self.shown;
        let pnu = record.pnu.clone();

        if let Some(entry) = self.entries.get_mut(&pnu) {
            if entry.record.geometry != record.geometry {
                surface.destroy(entry.polygon);
                entry.polygon = surface.create_polygon(&pnu, record.geometry.as_ref(), record.color);
            } else {
                surface.set_fill(entry.polygon, record.color);
            }
            if entry.record.label_text() != record.label_text() {
                if let Some(label) = entry.label.take() {
                    surface.destroy(label);
                }
                entry.label = create_label(surface, &record);
            }
            entry.color = record.color;
            entry.mode = record.mode;
            entry.record = record;
            entry.set_attached(surface, attach);
            return AddOutcome::Updated;
        }

        let mut entry = RegistryEntry {
            polygon: surface.create_polygon(&pnu, record.geometry.as_ref(), record.color),
            label: create_label(surface, &record),
            marker: None,
            color: record.color,
            mode: record.mode,
            record,
            attached: false,
        };
        entry.set_attached(surface, attach);
        self.entries.insert(pnu, entry);
        AddOutcome::Inserted
    }

    /// Detaches and destroys the identifier's drawables and deletes the entry.
    pub fn remove(&mut self, surface: &mut dyn RenderSurface, pnu: &Pnu) -> Option<RegistryEntry> {
        let entry = self.entries.remove(pnu)?;
        entry.destroy(surface);
        Some(entry)
    }

    /// Destroys every entry.
    pub fn clear(&mut self, surface: &mut dyn RenderSurface) -> Vec<RegistryEntry> {
        let entries = std::mem::take(&mut self.entries);
        let mut removed = Vec::with_capacity(entries.len());
        for entry in entries.into_values() {
            entry.destroy(surface);
            removed.push(entry);
        }
        removed
    }

    /// Attaches every entry.
    pub fn show(&mut self, surface: &mut dyn RenderSurface) {
        self.show_where(surface, |_| true);
    }

    /// Attaches the entries for which `keep` returns true and detaches the rest.
    pub fn show_where(&mut self, surface: &mut dyn RenderSurface, keep: impl Fn(&Pnu) -> bool) {
        self.shown = true;
        for (pnu, entry) in self.entries.iter_mut() {
            let attach = keep(pnu);
            if entry.attached != attach {
                entry.set_attached(surface, attach);
            }
        }
    }

    /// Detaches every entry without deleting it.
    pub fn hide(&mut self, surface: &mut dyn RenderSurface) {
        self.shown = false;
        for entry in self.entries.values_mut() {
            if entry.attached {
                entry.set_attached(surface, false);
            }
        }
    }

    pub fn hide_entry(&mut self, surface: &mut dyn RenderSurface, pnu: &Pnu) {
        if let Some(entry) = self.entries.get_mut(pnu)
            && entry.attached
        {
            entry.set_attached(surface, false);
        }
    }

    /// Re-attaches one entry if the registry itself is shown.
    pub fn show_entry(&mut self, surface: &mut dyn RenderSurface, pnu: &Pnu) {
        if !self.shown {
            return;
        }
        if let Some(entry) = self.entries.get_mut(pnu)
            && !entry.attached
        {
            entry.set_attached(surface, true);
        }
    }

    pub fn set_color(
        &mut self,
        surface: &mut dyn RenderSurface,
        pnu: &Pnu,
        color: Option<ColorIndex>,
    ) -> bool {
        let Some(entry) = self.entries.get_mut(pnu) else {
            return false;
        };
        surface.set_fill(entry.polygon, color);
        entry.color = color;
        entry.record.set_color(color);
        true
    }

    /// Replaces the stored record, keeping handles and visibility.
    pub fn update_record(&mut self, surface: &mut dyn RenderSurface, record: ParcelRecord) -> bool {
        let Some(entry) = self.entries.get_mut(&record.pnu) else {
            return false;
        };
        if entry.record.label_text() != record.label_text() {
            if let Some(label) = entry.label.take() {
                surface.destroy(label);
            }
            entry.label = create_label(surface, &record);
            if let Some(label) = entry.label {
                surface.set_attached(label, entry.attached);
            }
        }
        surface.set_fill(entry.polygon, record.color);
        entry.color = record.color;
        entry.record = record;
        true
    }

    /// Creates or destroys the info marker so it matches `display`.
    pub fn set_marker(&mut self, surface: &mut dyn RenderSurface, pnu: &Pnu, display: bool) {
        let Some(entry) = self.entries.get_mut(pnu) else {
            return;
        };
        match (display, entry.marker) {
            (true, None) => {
                let anchor = entry.record.geometry.as_ref().and_then(|g| g.label_anchor());
                let marker = surface.create_marker(pnu, anchor);
                surface.set_attached(marker, entry.attached);
                entry.marker = Some(marker);
            }
            (false, Some(marker)) => {
                surface.set_attached(marker, false);
                surface.destroy(marker);
                entry.marker = None;
            }
            _ => {}
        }
    }
}

fn create_label(surface: &mut dyn RenderSurface, record: &ParcelRecord) -> Option<Handle> {
    let text = record.label_text()?;
    let anchor = record.geometry.as_ref().and_then(|g| g.label_anchor());
    Some(surface.create_label(&record.pnu, text, anchor))
}
