//! In-memory [`PhotoLibrary`] with injectable failures.

use anyhow::{Context, Result, anyhow, bail};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use super::{
    Album, Asset, FetchOptions, PhotoLibrary, ResourceDescriptor, ResourceRole, UploadItem,
    ContentType,
};

/// An album as the memory library stored it, with the imported file contents.
#[derive(Debug, Clone)]
pub struct AlbumRecord {
    pub album: Album,
    pub items: Vec<UploadItem>,
    pub contents: Vec<Vec<u8>>,
}

#[derive(Default)]
struct State {
    assets: Vec<Asset>,
    resources: HashMap<String, Vec<ResourceDescriptor>>,
    bytes: HashMap<String, Vec<u8>>,
    failing_fetches: HashSet<String>,
    fail_albums: bool,
    fetch_log: Vec<String>,
    albums: Vec<AlbumRecord>,
}

/// A library held entirely in memory.
///
/// # Example
///
/// ```rust
/// use raw_exif::library::MemoryLibrary;
///
/// let library = MemoryLibrary::new();
/// let asset = library.add_raw_asset("a1", "IMG_0001.DNG", b"raw".to_vec(), None, false);
/// assert_eq!(asset.filename, "IMG_0001.DNG");
/// ```
#[derive(Default)]
pub struct MemoryLibrary {
    state: Mutex<State>,
}

impl MemoryLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Memory library mutex poisoned. Recovering inner state.");
                poisoned.into_inner()
            }
        }
    }

    /// Add an asset with the given resources and their contents.
    pub fn insert(&self, asset: Asset, resources: Vec<(ResourceDescriptor, Vec<u8>)>) {
        let mut state = self.state();
        let mut descriptors = Vec::with_capacity(resources.len());
        for (descriptor, bytes) in resources {
            state.bytes.insert(descriptor.id.clone(), bytes);
            descriptors.push(descriptor);
        }
        state.resources.insert(asset.id.clone(), descriptors);
        state.assets.push(asset);
    }

    /// Add an asset with a DNG original and, optionally, a full-size JPEG
    /// rendition. Resource ids are `<id>/raw` and `<id>/jpeg`.
    pub fn add_raw_asset(
        &self,
        id: &str,
        filename: &str,
        raw: Vec<u8>,
        full_size_jpeg: Option<Vec<u8>>,
        is_favorite: bool,
    ) -> Asset {
        let asset = Asset {
            id: id.to_string(),
            filename: filename.to_string(),
            created: None,
            modified: None,
            is_favorite,
        };

        let mut resources = vec![(
            ResourceDescriptor {
                id: format!("{id}/raw"),
                asset_id: id.to_string(),
                content_type: ContentType::new(ContentType::DNG),
                role: ResourceRole::Photo,
                filename: filename.to_string(),
            },
            raw,
        )];
        if let Some(jpeg) = full_size_jpeg {
            let stem = filename.rsplit_once('.').map_or(filename, |(s, _)| s);
            resources.push((
                ResourceDescriptor {
                    id: format!("{id}/jpeg"),
                    asset_id: id.to_string(),
                    content_type: ContentType::new(ContentType::JPEG),
                    role: ResourceRole::FullSizePhoto,
                    filename: format!("{stem}.JPG"),
                },
                jpeg,
            ));
        }

        self.insert(asset.clone(), resources);
        asset
    }

    /// Make every fetch of `resource_id` fail.
    pub fn fail_fetch(&self, resource_id: &str) {
        self.state().failing_fetches.insert(resource_id.to_string());
    }

    /// Make every album creation fail.
    pub fn fail_album_creation(&self) {
        self.state().fail_albums = true;
    }

    /// Resource ids fetched so far, in call order.
    pub fn fetch_log(&self) -> Vec<String> {
        self.state().fetch_log.clone()
    }

    pub fn albums(&self) -> Vec<AlbumRecord> {
        self.state().albums.clone()
    }
}

#[async_trait::async_trait]
impl PhotoLibrary for MemoryLibrary {
    fn name(&self) -> &str {
        "memory"
    }

    async fn assets(&self, options: &FetchOptions) -> Result<Vec<Asset>> {
        let mut assets = self.state().assets.clone();
        options.apply(&mut assets);
        Ok(assets)
    }

    async fn resources(&self, asset_id: &str) -> Result<Vec<ResourceDescriptor>> {
        self.state()
            .resources
            .get(asset_id)
            .cloned()
            .ok_or_else(|| anyhow!("Unknown asset {asset_id}"))
    }

    async fn fetch_bytes(
        &self,
        resource: &ResourceDescriptor,
        _allow_network: bool,
    ) -> Result<Vec<u8>> {
        let mut state = self.state();
        state.fetch_log.push(resource.id.clone());
        if state.failing_fetches.contains(&resource.id) {
            bail!("Simulated download failure for {}", resource.id);
        }
        state
            .bytes
            .get(&resource.id)
            .cloned()
            .ok_or_else(|| anyhow!("Unknown resource {}", resource.id))
    }

    async fn thumbnail(&self, asset_id: &str, size: u32) -> Result<Vec<u8>> {
        let bytes = {
            let state = self.state();
            let resources = state
                .resources
                .get(asset_id)
                .ok_or_else(|| anyhow!("Unknown asset {asset_id}"))?;
            let resource = resources
                .iter()
                .find(|r| r.content_type.is_jpeg())
                .or_else(|| resources.first())
                .ok_or_else(|| anyhow!("Asset {asset_id} has no resources"))?;
            state.bytes.get(&resource.id).cloned().unwrap_or_default()
        };
        crate::convert::thumbnail_jpeg(&bytes, size)
    }

    async fn create_album(&self, title: &str, items: &[UploadItem]) -> Result<Album> {
        if self.state().fail_albums {
            bail!("Simulated album creation failure");
        }

        let mut contents = Vec::with_capacity(items.len());
        for item in items {
            let bytes = tokio::fs::read(&item.path)
                .await
                .with_context(|| format!("Failed to read {}", item.path.display()))?;
            contents.push(bytes);
        }

        let mut state = self.state();
        let album = Album {
            id: format!("album-{}", state.albums.len() + 1),
            title: title.to_string(),
            asset_count: items.len(),
        };
        state.albums.push(AlbumRecord {
            album: album.clone(),
            items: items.to_vec(),
            contents,
        });
        Ok(album)
    }
}
