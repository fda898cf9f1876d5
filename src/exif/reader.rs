use anyhow::{Context, Result};
use nom_exif::*;
use std::path::Path;

// Exif sub-IFD tag IDs, looked up through IFD0 where nom-exif merges them
const TAG_F_NUMBER: u16 = 0x829D;
const TAG_FOCAL_LENGTH: u16 = 0x920A;
const TAG_FOCAL_LENGTH_35MM: u16 = 0xA405;
const TAG_LENS_MAKE: u16 = 0xA433;
const TAG_LENS_MODEL: u16 = 0xA434;

/// Camera and lens tags currently recorded in an image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LensTags {
    pub make: Option<String>,
    pub model: Option<String>,
    pub lens_make: Option<String>,
    pub lens_model: Option<String>,
    pub focal_length: Option<String>,
    pub focal_length_35mm: Option<String>,
    pub f_number: Option<String>,
}

impl LensTags {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Read the lens-related tags of an image file without going through exiftool.
///
/// Files with no parseable EXIF yield an empty [`LensTags`].
pub fn read_lens_tags(path: &Path) -> Result<LensTags> {
    let mut parser = MediaParser::new();
    let ms = MediaSource::file_path(path).context("Failed to open image file")?;

    let iter: ExifIter = match parser.parse(ms) {
        Ok(iter) => iter,
        Err(_) => {
            log::debug!("No EXIF data found in {}", path.display());
            return Ok(LensTags::default());
        }
    };
    let exif: Exif = iter.into();

    Ok(LensTags {
        make: exif.get(ExifTag::Make).and_then(entry_to_string),
        model: exif.get(ExifTag::Model).and_then(entry_to_string),
        lens_make: tag_string(&exif, TAG_LENS_MAKE),
        lens_model: tag_string(&exif, TAG_LENS_MODEL),
        focal_length: tag_string(&exif, TAG_FOCAL_LENGTH),
        focal_length_35mm: tag_string(&exif, TAG_FOCAL_LENGTH_35MM),
        f_number: tag_string(&exif, TAG_F_NUMBER),
    })
}

fn tag_string(exif: &Exif, code: u16) -> Option<String> {
    exif.get_by_ifd_tag_code(0, code).and_then(entry_to_string)
}

/// Convert an EntryValue to an Option<String>.
fn entry_to_string(val: &EntryValue) -> Option<String> {
    let s = val.to_string();
    let s = s.trim().trim_matches('"').to_string();
    if s.is_empty() { None } else { Some(s) }
}
