//! Lens tag mapping, reading, and rewriting.
//!
//! - [`map_lens_to_tags`]: the tags a lens override replaces, as a pure function
//! - [`MetadataTool`] / [`ExifTool`]: read and merge tags through the exiftool binary
//! - [`read_lens_tags`]: native read of the lens tags currently in a file

mod exiftool;
mod reader;
mod tags;

pub use exiftool::{ExifTool, MetadataError, MetadataTool};
pub use reader::{LensTags, read_lens_tags};
pub use tags::{DEFAULT_SCALE_FACTOR, SCALE_FACTOR_TAG, TagMap, map_lens_to_tags, scale_factor_of};
