use foundation::color::ColorIndex;
use foundation::ids::Pnu;
use parcels::record::{Mode, ParcelRecord};

use crate::registry::{AddOutcome, ModeRegistry, RegistryEntry};
use crate::surface::RenderSurface;

/// Click and search registries with search-over-click arbitration.
///
/// Only the active mode's registry is shown. A click entry whose identifier
/// is also in the search registry stays detached while the search entry
/// exists, and is swept out of the click registry on the next mode exit.
#[derive(Debug)]
pub struct ModeRegistries {
    click: ModeRegistry,
    search: ModeRegistry,
    active: Mode,
}

impl Default for ModeRegistries {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeRegistries {
    pub fn new() -> Self {
        Self {
            click: ModeRegistry::new(Mode::Click, true),
            search: ModeRegistry::new(Mode::Search, false),
            active: Mode::Click,
        }
    }

    pub fn active(&self) -> Mode {
        self.active
    }

    pub fn registry(&self, mode: Mode) -> &ModeRegistry {
        match mode {
            Mode::Click => &self.click,
            Mode::Search => &self.search,
        }
    }

    fn registry_mut(&mut self, mode: Mode) -> &mut ModeRegistry {
        match mode {
            Mode::Click => &mut self.click,
            Mode::Search => &mut self.search,
        }
    }

    pub fn is_visible(&self, mode: Mode, pnu: &Pnu) -> bool {
        self.registry(mode).is_visible(pnu)
    }

    pub fn contains(&self, pnu: &Pnu) -> bool {
        self.click.contains(pnu) || self.search.contains(pnu)
    }

    /// Looks the identifier up, search entry first.
    pub fn find(&self, pnu: &Pnu) -> Option<&RegistryEntry> {
        self.search.get(pnu).or_else(|| self.click.get(pnu))
    }

    /// Mode of the entry [`ModeRegistries::find`] would return.
    pub fn owner(&self, pnu: &Pnu) -> Option<Mode> {
        if self.search.contains(pnu) {
            Some(Mode::Search)
        } else if self.click.contains(pnu) {
            Some(Mode::Click)
        } else {
            None
        }
    }

    /// Routes the record to the registry for its mode tag.
    pub fn add(&mut self, surface: &mut dyn RenderSurface, record: ParcelRecord) -> AddOutcome {
        let pnu = record.pnu.clone();
        match record.mode {
            Mode::Click => {
                let attach = !self.search.contains(&pnu);
                self.click.add(surface, record, attach)
            }
            Mode::Search => {
                let outcome = self.search.add(surface, record, true);
                self.click.hide_entry(surface, &pnu);
                outcome
            }
        }
    }

    pub fn remove(
        &mut self,
        surface: &mut dyn RenderSurface,
        mode: Mode,
        pnu: &Pnu,
    ) -> Option<RegistryEntry> {
        let removed = self.registry_mut(mode).remove(surface, pnu)?;
        if mode == Mode::Search {
            self.click.show_entry(surface, pnu);
        }
        Some(removed)
    }

    /// Removes the identifier from both registries.
    pub fn remove_everywhere(&mut self, surface: &mut dyn RenderSurface, pnu: &Pnu) -> Vec<RegistryEntry> {
        let mut removed = Vec::new();
        removed.extend(self.search.remove(surface, pnu));
        removed.extend(self.click.remove(surface, pnu));
        removed
    }

    pub fn set_color(
        &mut self,
        surface: &mut dyn RenderSurface,
        mode: Mode,
        pnu: &Pnu,
        color: Option<ColorIndex>,
    ) -> bool {
        self.registry_mut(mode).set_color(surface, pnu, color)
    }

    pub fn update_record(&mut self, surface: &mut dyn RenderSurface, record: ParcelRecord) -> bool {
        let mode = record.mode;
        self.registry_mut(mode).update_record(surface, record)
    }

    /// Applies marker visibility in every registry holding the identifier.
    pub fn set_marker(&mut self, surface: &mut dyn RenderSurface, pnu: &Pnu, display: bool) {
        self.click.set_marker(surface, pnu, display);
        self.search.set_marker(surface, pnu, display);
    }

    /// Applies `edit` to the stored record in every registry holding the
    /// identifier, keeping each entry's own mode tag.
    pub fn edit_record(
        &mut self,
        surface: &mut dyn RenderSurface,
        pnu: &Pnu,
        edit: impl Fn(&mut ParcelRecord),
    ) -> bool {
        let mut found = false;
        for mode in [Mode::Click, Mode::Search] {
            let registry = self.registry_mut(mode);
            let Some(mut record) = registry.get(pnu).map(|e| e.record.clone()) else {
                continue;
            };
            edit(&mut record);
            record.mode = mode;
            registry.update_record(surface, record);
            found = true;
        }
        found
    }

    /// Drops every search entry and restores the click entries they covered.
    pub fn clear_search(&mut self, surface: &mut dyn RenderSurface) -> Vec<Pnu> {
        let cleared: Vec<Pnu> = self
            .search
            .clear(surface)
            .into_iter()
            .map(|e| e.record.pnu)
            .collect();
        for pnu in &cleared {
            self.click.show_entry(surface, pnu);
        }
        cleared
    }

    /// Switches the shown registry. Returns the identifiers the overlap sweep
    /// removed from the click registry on leaving the previous mode.
    pub fn set_active(&mut self, surface: &mut dyn RenderSurface, mode: Mode) -> Vec<Pnu> {
        if mode == self.active {
            return Vec::new();
        }
        let purged = self.cleanup_search_parcels_from_click_map(surface);
        self.registry_mut(self.active).hide(surface);
        self.active = mode;
        match mode {
            Mode::Search => self.search.show(surface),
            Mode::Click => {
                let search = &self.search;
                self.click.show_where(surface, |pnu| !search.contains(pnu));
            }
        }
        tracing::debug!(mode = %mode, purged = purged.len(), "active mode changed");
        purged
    }

    /// Hides and deletes every click entry whose identifier is also in the
    /// search registry. Returns the swept identifiers so their durable color
    /// entries can be purged.
    pub fn cleanup_search_parcels_from_click_map(&mut self, surface: &mut dyn RenderSurface) -> Vec<Pnu> {
        let overlap: Vec<Pnu> = self
            .search
            .ids()
            .into_iter()
            .filter(|pnu| self.click.contains(pnu))
            .collect();
        for pnu in &overlap {
            self.click.hide_entry(surface, pnu);
            self.click.remove(surface, pnu);
        }
        if !overlap.is_empty() {
            tracing::warn!(count = overlap.len(), "swept search parcels out of click registry");
        }
        overlap
    }
}
