//! The host photo library: enumeration, resources, downloads, album import.
//!
//! [`PhotoLibrary`] is the seam the export pipeline talks to. Two
//! implementations ship with the crate:
//!
//! - [`FolderLibrary`]: a directory tree of image files
//! - [`MemoryLibrary`]: an in-memory library for tests and previews

mod folder;
pub mod memory;
mod resource;

pub use folder::FolderLibrary;
pub use memory::MemoryLibrary;
pub use resource::{ContentType, ResourceDescriptor, ResourceQuery, ResourceRole, select_resource};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One library-managed photo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// Stable identifier within the library.
    pub id: String,
    /// Original filename of the primary resource.
    pub filename: String,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub is_favorite: bool,
}

/// Ordering of [`PhotoLibrary::assets`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

/// Enumeration options.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub sort: SortOrder,
    pub favorites_only: bool,
}

impl FetchOptions {
    /// Sort and filter `assets` in place. Assets without a creation date sort last.
    pub fn apply(&self, assets: &mut Vec<Asset>) {
        if self.favorites_only {
            assets.retain(|a| a.is_favorite);
        }
        match self.sort {
            SortOrder::NewestFirst => {
                assets.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| a.id.cmp(&b.id)))
            }
            SortOrder::OldestFirst => assets.sort_by(|a, b| {
                match (a.created, b.created) {
                    (Some(x), Some(y)) => x.cmp(&y),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                }
                .then_with(|| a.id.cmp(&b.id))
            }),
        }
    }
}

/// A prepared file to import into a new album.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadItem {
    pub path: PathBuf,
    /// Favorite flag carried over from the source asset.
    pub is_favorite: bool,
}

/// An album created by [`PhotoLibrary::create_album`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Album {
    pub id: String,
    pub title: String,
    pub asset_count: usize,
}

/// Access to a photo library.
///
/// Implement this trait to export from a different host. Mutations go
/// through [`create_album`](PhotoLibrary::create_album) only, and the library
/// is expected to serialize concurrent mutation requests itself.
#[async_trait::async_trait]
pub trait PhotoLibrary: Send + Sync {
    /// A short name for log output.
    fn name(&self) -> &str;

    /// Enumerate image assets.
    async fn assets(&self, options: &FetchOptions) -> Result<Vec<Asset>>;

    /// Every resource belonging to `asset_id`.
    async fn resources(&self, asset_id: &str) -> Result<Vec<ResourceDescriptor>>;

    /// Download the bytes of `resource`. With `allow_network` the library may
    /// fetch resources that are not stored locally.
    async fn fetch_bytes(&self, resource: &ResourceDescriptor, allow_network: bool)
    -> Result<Vec<u8>>;

    /// A JPEG thumbnail fitting in `size`×`size`.
    async fn thumbnail(&self, asset_id: &str, size: u32) -> Result<Vec<u8>>;

    /// Create an album titled `title` holding every item, in one transaction:
    /// on error nothing is created.
    async fn create_album(&self, title: &str, items: &[UploadItem]) -> Result<Album>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn asset(id: &str, day: Option<u32>, favorite: bool) -> Asset {
        Asset {
            id: id.into(),
            filename: format!("{id}.dng"),
            created: day.map(|d| Utc.with_ymd_and_hms(2024, 5, d, 12, 0, 0).unwrap()),
            modified: None,
            is_favorite: favorite,
        }
    }

    fn ids(assets: &[Asset]) -> Vec<&str> {
        assets.iter().map(|a| a.id.as_str()).collect()
    }

    #[test]
    fn newest_first_by_default() {
        let mut assets = vec![
            asset("a", Some(1), false),
            asset("b", Some(3), false),
            asset("c", None, false),
            asset("d", Some(2), false),
        ];
        FetchOptions::default().apply(&mut assets);
        assert_eq!(ids(&assets), vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn oldest_first_keeps_undated_last() {
        let mut assets = vec![
            asset("c", None, false),
            asset("b", Some(3), false),
            asset("a", Some(1), false),
        ];
        let options = FetchOptions {
            sort: SortOrder::OldestFirst,
            ..Default::default()
        };
        options.apply(&mut assets);
        assert_eq!(ids(&assets), vec!["a", "b", "c"]);
    }

    #[test]
    fn favorites_only_filters() {
        let mut assets = vec![asset("a", Some(1), true), asset("b", Some(2), false)];
        let options = FetchOptions {
            favorites_only: true,
            ..Default::default()
        };
        options.apply(&mut assets);
        assert_eq!(ids(&assets), vec!["a"]);
    }
}
