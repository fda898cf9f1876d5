use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::lens::Lens;

/// The user's ordered list of lens presets.
///
/// Insertion order is display order. Lenses are looked up and removed by
/// identifier, never edited in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LensCatalog {
    lenses: Vec<Lens>,
}

/// Which lens, if any, overrides the camera-recorded lens tags on export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum LensSelection {
    /// Keep whatever lens the camera recorded.
    #[default]
    None,
    Lens(Uuid),
}

impl LensCatalog {
    pub fn new(lenses: Vec<Lens>) -> Self {
        Self { lenses }
    }

    pub fn add(&mut self, lens: Lens) {
        log::info!("Added lens {} ({})", lens.display_string(), lens.id);
        self.lenses.push(lens);
    }

    /// Remove a lens by identifier, returning it if it was present.
    pub fn remove(&mut self, id: Uuid) -> Option<Lens> {
        let index = self.lenses.iter().position(|l| l.id == id)?;
        let lens = self.lenses.remove(index);
        log::info!("Removed lens {} ({})", lens.display_string(), lens.id);
        Some(lens)
    }

    pub fn get(&self, id: Uuid) -> Option<&Lens> {
        self.lenses.iter().find(|l| l.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Lens> {
        self.lenses.iter()
    }

    pub fn len(&self) -> usize {
        self.lenses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lenses.is_empty()
    }

    /// Reset `selection` to [`LensSelection::None`] if it points at a lens that
    /// is no longer in the catalog. Returns `true` if the selection changed.
    pub fn reconcile(&self, selection: &mut LensSelection) -> bool {
        match selection {
            LensSelection::Lens(id) if self.get(*id).is_none() => {
                log::warn!("Selected lens {id} no longer exists, falling back to none");
                *selection = LensSelection::None;
                true
            }
            _ => false,
        }
    }
}

impl LensSelection {
    /// The lens this selection refers to, or `None` for "no override" and for
    /// identifiers missing from `catalog`.
    pub fn resolve(self, catalog: &LensCatalog) -> Option<&Lens> {
        match self {
            LensSelection::None => None,
            LensSelection::Lens(id) => catalog.get(id),
        }
    }
}
