use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// The part a resource plays within its asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceRole {
    /// The primary original.
    Photo,
    /// Secondary original, e.g. the RAW half of a RAW+JPEG pair.
    AlternatePhoto,
    /// Full-size rendition with edits applied.
    FullSizePhoto,
    /// Edit instructions or other sidecar data.
    Adjustment,
}

/// A uniform type identifier such as `public.jpeg` or `com.adobe.raw-image`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentType(String);

impl ContentType {
    pub const JPEG: &'static str = "public.jpeg";
    pub const DNG: &'static str = "com.adobe.raw-image";

    pub fn new(identifier: impl Into<String>) -> Self {
        Self(identifier.into())
    }

    /// Content type for a file extension. Unknown extensions map to `public.data`.
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        let identifier = match ext.as_str() {
            "jpg" | "jpeg" => Self::JPEG,
            "png" => "public.png",
            "tif" | "tiff" => "public.tiff",
            "heic" => "public.heic",
            "heif" => "public.heif",
            "dng" => Self::DNG,
            "cr2" => "com.canon.cr2-raw-image",
            "cr3" => "com.canon.cr3-raw-image",
            "nef" => "com.nikon.raw-image",
            "arw" => "com.sony.arw-raw-image",
            "raf" => "com.fuji.raw-image",
            "orf" => "com.olympus.raw-image",
            "rw2" => "com.panasonic.rw2-raw-image",
            "pef" => "com.pentax.raw-image",
            "srw" => "com.samsung.raw-image",
            _ => "public.data",
        };
        Self::new(identifier)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Conforms to `public.camera-raw-image`.
    pub fn is_raw_image(&self) -> bool {
        self.0.ends_with("raw-image")
    }

    pub fn is_jpeg(&self) -> bool {
        self.0 == Self::JPEG || self.0 == "image/jpeg"
    }

    /// Any image type the library can hold.
    pub fn is_image(&self) -> bool {
        self.is_raw_image()
            || self.is_jpeg()
            || matches!(
                self.0.as_str(),
                "public.png" | "public.tiff" | "public.heic" | "public.heif"
            )
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One underlying file of an asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Opaque handle the library uses to fetch the bytes.
    pub id: String,
    pub asset_id: String,
    pub content_type: ContentType,
    pub role: ResourceRole,
    /// Name the file had when it was imported.
    pub filename: String,
}

/// What [`select_resource`] looks for: a resource with `role`, or failing
/// that, one whose content type satisfies `matches`.
#[derive(Debug, Clone, Copy)]
pub struct ResourceQuery {
    pub role: ResourceRole,
    pub matches: fn(&ContentType) -> bool,
}

impl ResourceQuery {
    /// The RAW original.
    pub const RAW: Self = Self {
        role: ResourceRole::AlternatePhoto,
        matches: ContentType::is_raw_image,
    };

    /// A ready-made full-size JPEG rendition.
    pub const FULL_SIZE_JPEG: Self = Self {
        role: ResourceRole::FullSizePhoto,
        matches: ContentType::is_jpeg,
    };
}

/// Pick the resource an export should use.
///
/// A resource carrying the query's role wins over any content-type match,
/// wherever it sits in the list. Otherwise the first content-type match is
/// returned.
///
/// # Example
///
/// ```rust
/// use raw_exif::library::{ContentType, ResourceDescriptor, ResourceQuery, ResourceRole, select_resource};
///
/// let resources = vec![ResourceDescriptor {
///     id: "r1".into(),
///     asset_id: "a1".into(),
///     content_type: ContentType::new(ContentType::DNG),
///     role: ResourceRole::Photo,
///     filename: "IMG_0001.DNG".into(),
/// }];
/// let raw = select_resource(&resources, &ResourceQuery::RAW).unwrap();
/// assert_eq!(raw.filename, "IMG_0001.DNG");
/// ```
pub fn select_resource<'a>(
    resources: &'a [ResourceDescriptor],
    query: &ResourceQuery,
) -> Option<&'a ResourceDescriptor> {
    let mut by_type = None;
    for resource in resources {
        if resource.role == query.role {
            return Some(resource);
        }
        if by_type.is_none() && (query.matches)(&resource.content_type) {
            by_type = Some(resource);
        }
    }
    by_type
}
