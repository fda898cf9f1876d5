//! # raw-exif
//!
//! Export RAW originals from a photo library to a folder, overriding the lens
//! metadata with a user-defined lens preset. Optionally the retagged JPEG
//! renditions are imported back into the library as a new album.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use raw_exif::config::Config;
//! use raw_exif::library::{FetchOptions, FolderLibrary, PhotoLibrary};
//! use raw_exif::pipeline::{ExportJob, Exporter};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(Some("config.json".as_ref()))?;
//!     let library = Arc::new(FolderLibrary::open("./photos")?);
//!     let assets = library.assets(&FetchOptions::default()).await?;
//!
//!     let exporter = Exporter::from_config(library, &config);
//!     let report = exporter
//!         .export(ExportJob {
//!             assets,
//!             destination: "./exported".into(),
//!             lens: config.active_lens().cloned(),
//!             reupload_jpeg: config.export.reupload_jpeg,
//!         })
//!         .await?;
//!
//!     for (asset, failure) in report.failures() {
//!         eprintln!("{asset}: {} failed: {}", failure.stage, failure.message);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Lens Tags
//!
//! With a lens selected, both the exported RAW and the re-upload JPEG get:
//!
//! | Tag | Example |
//! |-----|---------|
//! | `LensInfo` | `24-70mm f/2.8-4.0` |
//! | `LensMake` / `LensModel` | `Sigma` / `Art` |
//! | `Lens` | `Sigma Art 24-70mm f/2.8-4.0` |
//! | `FocalLength` | `50.0 mm` |
//! | `MinFocalLength` / `MaxFocalLength` | `24` / `70` |
//! | `FocalLengthIn35mmFormat` | `75.0 mm` at a 1.5 crop factor |
//! | `FNumber` | `2.8` |
//!
//! ## Modules
//!
//! - [`lens`]: Lens presets and their derived tag strings
//! - [`catalog`]: The ordered lens catalog and the active selection
//! - [`config`]: Preferences loading/saving
//! - [`exif`]: Tag mapping, the exiftool rewriter, and a native tag reader
//! - [`library`]: The photo library seam and its folder/memory implementations
//! - [`convert`]: RAW → JPEG conversion
//! - [`pipeline`]: The concurrent export pipeline

pub mod catalog;
pub mod config;
pub mod convert;
pub mod exif;
pub mod lens;
pub mod library;
pub mod pipeline;
