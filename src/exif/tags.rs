use std::collections::BTreeMap;

use crate::lens::Lens;

/// Tag name → value pairs handed to the metadata tool. Ordered so identical
/// inputs always produce identical output.
pub type TagMap = BTreeMap<String, String>;

/// exiftool's derived 35mm crop factor of an image file.
pub const SCALE_FACTOR_TAG: &str = "ScaleFactor35efl";

/// Scale factor used when the file does not report one.
pub const DEFAULT_SCALE_FACTOR: &str = "1";

/// Map a lens override onto the EXIF tags it replaces.
///
/// Returns an empty map when there is no override; callers skip the rewrite
/// entirely in that case. `scale_factor` is the file's own 35mm crop factor
/// as read back from disk.
///
/// # Panics
///
/// Panics if `scale_factor` is not numeric (see
/// [`Lens::exif_focal_length_35_string`]).
///
/// # Example
///
/// ```rust
/// use raw_exif::exif::map_lens_to_tags;
///
/// assert!(map_lens_to_tags(None, "1.5").is_empty());
/// ```
pub fn map_lens_to_tags(lens: Option<&Lens>, scale_factor: &str) -> TagMap {
    let Some(lens) = lens else {
        return TagMap::new();
    };

    let mut tags = TagMap::new();
    tags.insert("LensInfo".into(), lens.exif_info_string());
    tags.insert("LensMake".into(), lens.make.clone());
    tags.insert("LensModel".into(), lens.model.clone());
    tags.insert("Lens".into(), lens.display_string());

    tags.insert("FocalLength".into(), lens.exif_focal_length_string());
    tags.insert("MinFocalLength".into(), lens.focal_length_min.to_string());
    tags.insert("MaxFocalLength".into(), lens.focal_length_max.to_string());
    tags.insert(
        "FocalLengthIn35mmFormat".into(),
        lens.exif_focal_length_35_string(scale_factor),
    );

    tags.insert("FNumber".into(), lens.f_stop_string());
    tags
}

/// Pull the scale factor out of a tag read, defaulting to `1` when absent.
pub fn scale_factor_of(tags: &std::collections::HashMap<String, String>) -> &str {
    tags.get(SCALE_FACTOR_TAG)
        .map(String::as_str)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(DEFAULT_SCALE_FACTOR)
}
