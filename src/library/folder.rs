use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::{
    Album, Asset, ContentType, FetchOptions, PhotoLibrary, ResourceDescriptor, ResourceRole,
    UploadItem,
};

/// Directory holding albums created by exports. Never enumerated as assets.
const ALBUMS_DIR: &str = "Albums";
/// JSON array of favorite asset ids (or, inside an album, filenames).
const FAVORITES_FILE: &str = "favorites.json";
/// Stem suffix marking a full-size rendition: `IMG_0001.full.jpg`.
const RENDITION_SUFFIX: &str = ".full";

/// A directory tree used as a photo library.
///
/// Image files sharing a stem in the same directory form one asset, so
/// `IMG_0001.CR3` + `IMG_0001.JPG` is a RAW+JPEG pair (JPEG primary, RAW
/// alternate) and `IMG_0001.full.jpg` is its full-size rendition. Asset ids
/// are the `/`-separated path of the stem relative to the root.
///
/// # Example
///
/// ```rust,no_run
/// use raw_exif::library::{FetchOptions, FolderLibrary, PhotoLibrary};
///
/// # async fn example() -> anyhow::Result<()> {
/// let library = FolderLibrary::open("/photos")?;
/// for asset in library.assets(&FetchOptions::default()).await? {
///     println!("{} {}", asset.id, asset.filename);
/// }
/// # Ok(())
/// # }
/// ```
pub struct FolderLibrary {
    root: PathBuf,
    album_lock: tokio::sync::Mutex<()>,
}

struct ScannedAsset {
    resources: Vec<ResourceDescriptor>,
    created: Option<DateTime<Utc>>,
    modified: Option<DateTime<Utc>>,
}

impl FolderLibrary {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            bail!("Library root {} is not a directory", root.display());
        }
        Ok(Self {
            root,
            album_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn favorites(&self) -> HashSet<String> {
        let path = self.root.join(FAVORITES_FILE);
        let Ok(contents) = std::fs::read_to_string(&path) else {
            return HashSet::new();
        };
        match serde_json::from_str::<Vec<String>>(&contents) {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) => {
                log::warn!("Ignoring malformed {}: {e}", path.display());
                HashSet::new()
            }
        }
    }

    fn scan(&self) -> BTreeMap<String, ScannedAsset> {
        let mut groups: BTreeMap<String, Vec<(PathBuf, String, bool)>> = BTreeMap::new();

        let walker = WalkDir::new(&self.root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                let name = e.file_name().to_string_lossy();
                e.depth() == 0
                    || !(name.starts_with('.') || (e.depth() == 1 && name == ALBUMS_DIR))
            });

        for entry in walker.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_file() || !ContentType::from_path(path).is_image() {
                continue;
            }
            let Ok(rel) = path.strip_prefix(&self.root) else {
                continue;
            };
            let rel_id = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let stem = rel_id.rsplit_once('.').map_or(rel_id.as_str(), |(s, _)| s);
            let (key, rendition) = match stem.strip_suffix(RENDITION_SUFFIX) {
                Some(base) => (base.to_string(), true),
                None => (stem.to_string(), false),
            };
            groups
                .entry(key)
                .or_default()
                .push((path.to_path_buf(), rel_id, rendition));
        }

        groups
            .into_iter()
            .map(|(asset_id, files)| {
                let scanned = assign_roles(&asset_id, files);
                (asset_id, scanned)
            })
            .collect()
    }

    fn resolve(&self, resource_id: &str) -> Result<PathBuf> {
        if resource_id.split('/').any(|part| part == "..") {
            bail!("Invalid resource id {resource_id}");
        }
        Ok(self.root.join(resource_id))
    }
}

fn assign_roles(asset_id: &str, files: Vec<(PathBuf, String, bool)>) -> ScannedAsset {
    let has_raw = files
        .iter()
        .any(|(p, _, r)| !r && ContentType::from_path(p).is_raw_image());
    let has_rendered = files
        .iter()
        .any(|(p, _, r)| !r && !ContentType::from_path(p).is_raw_image());

    let mut created = None;
    let mut modified = None;
    let mut resources = Vec::with_capacity(files.len());
    for (path, rel_id, rendition) in files {
        let content_type = ContentType::from_path(&path);
        let role = if rendition {
            ResourceRole::FullSizePhoto
        } else if content_type.is_raw_image() && has_rendered {
            ResourceRole::AlternatePhoto
        } else {
            ResourceRole::Photo
        };

        if role == ResourceRole::Photo && created.is_none() {
            if let Ok(meta) = std::fs::metadata(&path) {
                modified = meta.modified().ok().map(DateTime::<Utc>::from);
                created = meta
                    .created()
                    .ok()
                    .map(DateTime::<Utc>::from)
                    .or(modified);
            }
        }

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        resources.push(ResourceDescriptor {
            id: rel_id,
            asset_id: asset_id.to_string(),
            content_type,
            role,
            filename,
        });
    }

    // Primary first
    resources.sort_by_key(|r| match r.role {
        ResourceRole::Photo => 0,
        ResourceRole::AlternatePhoto => 1,
        ResourceRole::FullSizePhoto => 2,
        ResourceRole::Adjustment => 3,
    });
    if !has_raw {
        log::debug!("Asset {asset_id} has no RAW resource");
    }

    ScannedAsset {
        resources,
        created,
        modified,
    }
}

fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '-',
            c => c,
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}

#[async_trait::async_trait]
impl PhotoLibrary for FolderLibrary {
    fn name(&self) -> &str {
        "folder"
    }

    async fn assets(&self, options: &FetchOptions) -> Result<Vec<Asset>> {
        let favorites = self.favorites();
        let mut assets: Vec<Asset> = self
            .scan()
            .into_iter()
            .filter_map(|(id, scanned)| {
                let primary = scanned.resources.first()?;
                Some(Asset {
                    is_favorite: favorites.contains(&id),
                    filename: primary.filename.clone(),
                    created: scanned.created,
                    modified: scanned.modified,
                    id,
                })
            })
            .collect();
        options.apply(&mut assets);
        Ok(assets)
    }

    async fn resources(&self, asset_id: &str) -> Result<Vec<ResourceDescriptor>> {
        self.scan()
            .remove(asset_id)
            .map(|scanned| scanned.resources)
            .ok_or_else(|| anyhow!("Unknown asset {asset_id}"))
    }

    async fn fetch_bytes(
        &self,
        resource: &ResourceDescriptor,
        _allow_network: bool,
    ) -> Result<Vec<u8>> {
        let path = self.resolve(&resource.id)?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
    }

    async fn thumbnail(&self, asset_id: &str, size: u32) -> Result<Vec<u8>> {
        let resources = self.resources(asset_id).await?;
        let resource = resources
            .iter()
            .find(|r| r.content_type.is_jpeg())
            .or_else(|| resources.first())
            .ok_or_else(|| anyhow!("Asset {asset_id} has no resources"))?;
        let bytes = self.fetch_bytes(resource, false).await?;
        tokio::task::spawn_blocking(move || crate::convert::thumbnail_jpeg(&bytes, size))
            .await
            .context("Thumbnail task failed")?
    }

    async fn create_album(&self, title: &str, items: &[UploadItem]) -> Result<Album> {
        let _guard = self.album_lock.lock().await;

        let dir_name = sanitize_title(title);
        if dir_name.is_empty() {
            bail!("Album title {title:?} is not usable as a directory name");
        }
        let albums_dir = self.root.join(ALBUMS_DIR);
        let final_dir = albums_dir.join(&dir_name);
        if final_dir.exists() {
            bail!("Album {} already exists", final_dir.display());
        }
        let staging = albums_dir.join(format!(".{dir_name}.{}.partial", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&staging)
            .await
            .with_context(|| format!("Failed to create {}", staging.display()))?;

        let result = stage_album(&staging, items).await;
        let staged = match result {
            Ok(()) => tokio::fs::rename(&staging, &final_dir)
                .await
                .with_context(|| format!("Failed to publish album {}", final_dir.display())),
            Err(e) => Err(e),
        };
        if let Err(e) = staged {
            if let Err(cleanup) = tokio::fs::remove_dir_all(&staging).await {
                log::warn!("Failed to remove {}: {cleanup}", staging.display());
            }
            return Err(e);
        }

        log::info!(
            "Created album {} with {} item(s)",
            final_dir.display(),
            items.len()
        );
        Ok(Album {
            id: format!("{ALBUMS_DIR}/{dir_name}"),
            title: title.to_string(),
            asset_count: items.len(),
        })
    }
}

async fn stage_album(staging: &Path, items: &[UploadItem]) -> Result<()> {
    let mut used = HashSet::new();
    let mut favorites = Vec::new();
    for (i, item) in items.iter().enumerate() {
        let name = item
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| anyhow!("Upload path {} has no filename", item.path.display()))?;
        let name = if used.insert(name.clone()) {
            name
        } else {
            format!("{i}-{name}")
        };
        tokio::fs::copy(&item.path, staging.join(&name))
            .await
            .with_context(|| format!("Failed to import {}", item.path.display()))?;
        if item.is_favorite {
            favorites.push(name);
        }
    }

    let json = serde_json::to_string_pretty(&favorites)?;
    tokio::fs::write(staging.join(FAVORITES_FILE), json)
        .await
        .context("Failed to write album favorites")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::{ResourceQuery, select_resource};
    use std::fs;
    use tempfile::TempDir;

    fn library_with(files: &[&str]) -> (TempDir, FolderLibrary) {
        let dir = TempDir::new().unwrap();
        for file in files {
            let path = dir.path().join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, file.as_bytes()).unwrap();
        }
        let library = FolderLibrary::open(dir.path()).unwrap();
        (dir, library)
    }

    #[test]
    fn open_requires_directory() {
        assert!(FolderLibrary::open("/nonexistent/library").is_err());
    }

    #[tokio::test]
    async fn groups_files_by_stem() {
        let (_dir, library) = library_with(&[
            "2024/IMG_0001.CR3",
            "2024/IMG_0001.JPG",
            "2024/IMG_0002.DNG",
            "2024/IMG_0002.full.jpg",
            "notes.txt",
        ]);

        let assets = library.assets(&FetchOptions::default()).await.unwrap();
        let mut ids: Vec<&str> = assets.iter().map(|a| a.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["2024/IMG_0001", "2024/IMG_0002"]);
    }

    #[tokio::test]
    async fn raw_jpeg_pair_roles() {
        let (_dir, library) = library_with(&["IMG_0001.CR3", "IMG_0001.JPG"]);
        let resources = library.resources("IMG_0001").await.unwrap();

        assert_eq!(resources[0].filename, "IMG_0001.JPG");
        assert_eq!(resources[0].role, ResourceRole::Photo);
        assert_eq!(resources[1].role, ResourceRole::AlternatePhoto);

        let raw = select_resource(&resources, &ResourceQuery::RAW).unwrap();
        assert_eq!(raw.filename, "IMG_0001.CR3");
    }

    #[tokio::test]
    async fn lone_raw_with_rendition() {
        let (_dir, library) = library_with(&["IMG_0002.DNG", "IMG_0002.full.jpg"]);
        let resources = library.resources("IMG_0002").await.unwrap();

        let raw = select_resource(&resources, &ResourceQuery::RAW).unwrap();
        assert_eq!(raw.role, ResourceRole::Photo);
        let jpeg = select_resource(&resources, &ResourceQuery::FULL_SIZE_JPEG).unwrap();
        assert_eq!(jpeg.filename, "IMG_0002.full.jpg");

        let assets = library.assets(&FetchOptions::default()).await.unwrap();
        assert_eq!(assets[0].filename, "IMG_0002.DNG");
    }

    #[tokio::test]
    async fn favorites_and_filtering() {
        let (dir, library) = library_with(&["a.dng", "b.dng"]);
        fs::write(dir.path().join(FAVORITES_FILE), r#"["b"]"#).unwrap();

        let options = FetchOptions {
            favorites_only: true,
            ..Default::default()
        };
        let assets = library.assets(&options).await.unwrap();
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].id, "b");
        assert!(assets[0].is_favorite);
    }

    #[tokio::test]
    async fn fetch_bytes_reads_file() {
        let (_dir, library) = library_with(&["IMG_0003.NEF"]);
        let resources = library.resources("IMG_0003").await.unwrap();
        let bytes = library.fetch_bytes(&resources[0], true).await.unwrap();
        assert_eq!(bytes, b"IMG_0003.NEF");
    }

    #[tokio::test]
    async fn fetch_rejects_parent_traversal() {
        let (_dir, library) = library_with(&["a.dng"]);
        let mut resource = library.resources("a").await.unwrap().remove(0);
        resource.id = "../secret.dng".into();
        assert!(library.fetch_bytes(&resource, true).await.is_err());
    }

    #[tokio::test]
    async fn create_album_copies_and_hides_from_enumeration() {
        let (dir, library) = library_with(&["a.dng"]);
        let staged = TempDir::new().unwrap();
        let jpg = staged.path().join("a.jpg");
        fs::write(&jpg, b"jpeg").unwrap();

        let items = vec![UploadItem { path: jpg, is_favorite: true }];
        let album = library.create_album("Export 12:00", &items).await.unwrap();
        assert_eq!(album.asset_count, 1);
        assert_eq!(album.id, "Albums/Export 12-00");

        let album_dir = dir.path().join("Albums").join("Export 12-00");
        assert_eq!(fs::read(album_dir.join("a.jpg")).unwrap(), b"jpeg");
        let favorites: Vec<String> =
            serde_json::from_str(&fs::read_to_string(album_dir.join(FAVORITES_FILE)).unwrap())
                .unwrap();
        assert_eq!(favorites, vec!["a.jpg"]);

        let assets = library.assets(&FetchOptions::default()).await.unwrap();
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].id, "a");
    }

    #[tokio::test]
    async fn failed_album_leaves_nothing_behind() {
        let (dir, library) = library_with(&["a.dng"]);
        let items = vec![UploadItem {
            path: dir.path().join("missing.jpg"),
            is_favorite: false,
        }];
        assert!(library.create_album("Broken", &items).await.is_err());

        let leftovers: Vec<_> = fs::read_dir(dir.path().join("Albums")).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn sanitize_title_strips_separators() {
        assert_eq!(sanitize_title("a/b:c"), "a-b-c");
        assert_eq!(sanitize_title("..hidden"), "hidden");
    }
}
