use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use raw_exif::config::ExportSettings;
use raw_exif::exif::{MetadataError, MetadataTool, SCALE_FACTOR_TAG, TagMap, map_lens_to_tags};
use raw_exif::lens::{Lens, LensDraft};
use raw_exif::library::{Asset, MemoryLibrary};
use raw_exif::pipeline::{ExportJob, ExportProgress, ExportStage, Exporter, UploadOutcome};
use tempfile::TempDir;
use tokio::sync::watch;

// ── Fixtures ────────────────────────────────────────────────────────

/// Metadata tool that reports a fixed scale factor and records every update.
struct RecordingTool {
    scale_factor: String,
    /// Updates of files with this name fail.
    reject: Option<String>,
    updates: Mutex<Vec<(PathBuf, TagMap)>>,
}

impl RecordingTool {
    fn new(scale_factor: &str) -> Arc<Self> {
        Arc::new(Self {
            scale_factor: scale_factor.to_string(),
            reject: None,
            updates: Mutex::new(Vec::new()),
        })
    }

    fn rejecting(scale_factor: &str, filename: &str) -> Arc<Self> {
        Arc::new(Self {
            scale_factor: scale_factor.to_string(),
            reject: Some(filename.to_string()),
            updates: Mutex::new(Vec::new()),
        })
    }

    fn updates(&self) -> Vec<(PathBuf, TagMap)> {
        self.updates.lock().unwrap().clone()
    }
}

impl MetadataTool for RecordingTool {
    fn read(&self, path: &Path) -> Result<HashMap<String, String>, MetadataError> {
        if !path.exists() {
            return Err(MetadataError::FileNotFound(path.display().to_string()));
        }
        Ok(HashMap::from([(
            SCALE_FACTOR_TAG.to_string(),
            self.scale_factor.clone(),
        )]))
    }

    fn update(&self, path: &Path, tags: &TagMap) -> Result<(), MetadataError> {
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
        if name.is_some() && name == self.reject {
            return Err(MetadataError::ExifTool {
                message: "Error: Not a valid DNG".into(),
                command: path.display().to_string(),
            });
        }
        self.updates
            .lock()
            .unwrap()
            .push((path.to_path_buf(), tags.clone()));
        Ok(())
    }
}

/// A decodable stand-in for RAW sensor data.
fn raw_bytes(seed: u8) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(12, 8, Rgb([seed, 80, 160])));
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .unwrap();
    out
}

fn jpeg_bytes() -> Vec<u8> {
    sized_jpeg(12, 8)
}

fn sized_jpeg(w: u32, h: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([1, 2, 3])));
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), ImageFormat::Jpeg)
        .unwrap();
    out
}

/// TIFF-structured RAW: a small IFD0 image followed by a larger JPEG preview.
fn tiff_raw(preview_w: u32, preview_h: u32) -> Vec<u8> {
    let thumb = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 6, Rgb([50, 50, 50])));
    let mut out = Vec::new();
    thumb
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Tiff)
        .unwrap();
    out.extend_from_slice(&[0u8; 128]);
    out.extend_from_slice(&sized_jpeg(preview_w, preview_h));
    out.extend_from_slice(b"sensor data");
    out
}

fn sigma() -> Lens {
    LensDraft {
        make: "Sigma".into(),
        model: "Art".into(),
        focal_length: 35,
        focal_length_min: 18,
        focal_length_max: 35,
        f_stop: 1.8,
        f_stop_min: 1.8,
        f_stop_max: 1.8,
    }
    .build()
    .unwrap()
}

fn settings(temp: &TempDir) -> ExportSettings {
    ExportSettings {
        temp_dir: Some(temp.path().to_string_lossy().into_owned()),
        ..ExportSettings::default()
    }
}

struct Harness {
    library: Arc<MemoryLibrary>,
    dest: TempDir,
    temp: TempDir,
}

impl Harness {
    fn new() -> Self {
        Self {
            library: Arc::new(MemoryLibrary::new()),
            dest: TempDir::new().unwrap(),
            temp: TempDir::new().unwrap(),
        }
    }

    fn exporter(&self, tool: Option<Arc<RecordingTool>>) -> Exporter {
        Exporter::new(
            self.library.clone(),
            tool.map(|t| t as Arc<dyn MetadataTool>),
            settings(&self.temp),
        )
    }

    fn job(&self, assets: Vec<Asset>, lens: Option<Lens>, reupload_jpeg: bool) -> ExportJob {
        ExportJob {
            assets,
            destination: self.dest.path().to_path_buf(),
            lens,
            reupload_jpeg,
        }
    }
}

// ── Scenarios ───────────────────────────────────────────────────────

#[tokio::test]
async fn no_override_downloads_raws_untouched() {
    let h = Harness::new();
    let assets: Vec<Asset> = (1..=3)
        .map(|i| {
            h.library.add_raw_asset(
                &format!("a{i}"),
                &format!("IMG_000{i}.DNG"),
                raw_bytes(i),
                None,
                false,
            )
        })
        .collect();
    let tool = RecordingTool::new("1.5");

    let (tx, rx) = watch::channel(ExportProgress::default());
    let report = h
        .exporter(Some(tool.clone()))
        .export_with_progress(h.job(assets, None, false), tx)
        .await
        .unwrap();

    assert_eq!(report.succeeded(), 3);
    for i in 1..=3u8 {
        let written = std::fs::read(h.dest.path().join(format!("IMG_000{i}.DNG"))).unwrap();
        assert_eq!(written, raw_bytes(i));
    }
    assert!(tool.updates().is_empty());
    assert_eq!(report.upload, UploadOutcome::NotRequested);
    assert!(h.library.albums().is_empty());
    assert_eq!(*rx.borrow(), ExportProgress { completed: 3, total: 3 });
    assert_eq!(report.progress, ExportProgress { completed: 3, total: 3 });
}

#[tokio::test]
async fn reupload_with_lens_creates_one_tagged_album() {
    let h = Harness::new();
    let with_jpeg = h.library.add_raw_asset(
        "a1",
        "IMG_0001.DNG",
        raw_bytes(1),
        Some(jpeg_bytes()),
        true,
    );
    let without_jpeg = h
        .library
        .add_raw_asset("a2", "IMG_0002.DNG", raw_bytes(2), None, false);
    let tool = RecordingTool::new("1.5");
    let lens = sigma();

    let (tx, rx) = watch::channel(ExportProgress::default());
    let report = h
        .exporter(Some(tool.clone()))
        .export_with_progress(h.job(vec![with_jpeg, without_jpeg], Some(lens.clone()), true), tx)
        .await
        .unwrap();

    assert_eq!(report.succeeded(), 2);
    assert_eq!(*rx.borrow(), ExportProgress { completed: 3, total: 3 });
    assert!(!report.assets[0].converted);
    assert!(report.assets[1].converted);

    let albums = h.library.albums();
    assert_eq!(albums.len(), 1);
    let album = &albums[0];
    assert!(album.album.title.starts_with("RAW Export "));
    assert_eq!(album.items.len(), 2);
    assert_eq!(report.upload, UploadOutcome::Created { album: album.album.clone() });
    let favorites: Vec<bool> = album.items.iter().map(|i| i.is_favorite).collect();
    assert_eq!(favorites.iter().filter(|f| **f).count(), 1);

    // RAW and JPEG of both assets carry the lens mapping
    let expected = map_lens_to_tags(Some(&lens), "1.5");
    let updates = tool.updates();
    assert_eq!(updates.len(), 4);
    assert!(updates.iter().all(|(_, tags)| *tags == expected));
    assert_eq!(expected["FocalLengthIn35mmFormat"], "52.5 mm");

    let tagged: HashSet<PathBuf> = updates.into_iter().map(|(p, _)| p).collect();
    for item in &album.items {
        assert!(tagged.contains(&item.path), "{} untagged", item.path.display());
    }
    assert!(tagged.contains(&h.dest.path().join("IMG_0001.DNG")));
    assert!(tagged.contains(&h.dest.path().join("IMG_0002.DNG")));
}

#[tokio::test]
async fn partial_failure_aborts_upload_and_keeps_successes() {
    let h = Harness::new();
    let good = h
        .library
        .add_raw_asset("a1", "IMG_0001.DNG", raw_bytes(1), None, false);
    let bad = h
        .library
        .add_raw_asset("a2", "IMG_0002.DNG", raw_bytes(2), None, false);
    h.library.fail_fetch("a2/raw");

    let report = h
        .exporter(None)
        .export(h.job(vec![good, bad], None, true))
        .await
        .unwrap();

    assert_eq!(report.succeeded(), 1);
    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "a2");
    assert_eq!(failures[0].1.stage, ExportStage::Download);

    assert_eq!(
        report.upload,
        UploadOutcome::Aborted {
            prepared: 1,
            selected: 2
        }
    );
    assert!(h.library.albums().is_empty());
    assert!(h.dest.path().join("IMG_0001.DNG").exists());
    assert!(!h.dest.path().join("IMG_0002.DNG").exists());
    assert!(report.progress.is_done());
}

#[tokio::test]
async fn album_failure_is_reported_and_raws_stay() {
    let h = Harness::new();
    let asset = h
        .library
        .add_raw_asset("a1", "IMG_0001.DNG", raw_bytes(1), Some(jpeg_bytes()), false);
    h.library.fail_album_creation();

    let report = h
        .exporter(None)
        .export(h.job(vec![asset], None, true))
        .await
        .unwrap();

    assert!(matches!(report.upload, UploadOutcome::Failed { .. }));
    assert!(h.dest.path().join("IMG_0001.DNG").exists());
    assert_eq!(report.succeeded(), 1);
}

#[tokio::test]
async fn tiff_raw_converts_from_full_size_preview() {
    let h = Harness::new();
    let asset = h
        .library
        .add_raw_asset("a1", "DSC_0001.NEF", tiff_raw(96, 64), None, false);

    let report = h
        .exporter(None)
        .export(h.job(vec![asset], None, true))
        .await
        .unwrap();

    assert!(report.assets[0].converted);
    let albums = h.library.albums();
    let img = image::load_from_memory(&albums[0].contents[0]).unwrap();
    assert_eq!((img.width(), img.height()), (96, 64));
}

#[tokio::test]
async fn conversion_failure_aborts_upload() {
    let h = Harness::new();
    let good = h
        .library
        .add_raw_asset("a1", "IMG_0001.DNG", raw_bytes(1), None, false);
    let broken = h
        .library
        .add_raw_asset("a2", "IMG_0002.DNG", b"no pixels here".to_vec(), None, false);

    let (tx, rx) = watch::channel(ExportProgress::default());
    let report = h
        .exporter(None)
        .export_with_progress(h.job(vec![good, broken], None, true), tx)
        .await
        .unwrap();

    let failure = report.assets[1].failure.as_ref().unwrap();
    assert_eq!(failure.stage, ExportStage::Convert);
    assert!(report.assets[0].succeeded());
    assert_eq!(
        report.upload,
        UploadOutcome::Aborted {
            prepared: 1,
            selected: 2
        }
    );
    assert!(h.library.albums().is_empty());
    assert!(h.dest.path().join("IMG_0002.DNG").exists());
    assert_eq!(*rx.borrow(), ExportProgress { completed: 4, total: 4 });
}

#[tokio::test]
async fn tag_failure_is_isolated_to_its_asset() {
    let h = Harness::new();
    let good = h
        .library
        .add_raw_asset("a1", "IMG_0001.DNG", raw_bytes(1), None, false);
    let rejected = h
        .library
        .add_raw_asset("a2", "IMG_0002.DNG", raw_bytes(2), None, false);
    let tool = RecordingTool::rejecting("1.5", "IMG_0002.DNG");

    let report = h
        .exporter(Some(tool.clone()))
        .export(h.job(vec![good, rejected], Some(sigma()), true))
        .await
        .unwrap();

    assert!(report.assets[0].succeeded());
    assert_eq!(report.assets[0].tagged_files, 2);
    let failure = report.assets[1].failure.as_ref().unwrap();
    assert_eq!(failure.stage, ExportStage::Tag);
    assert!(failure.message.contains("Not a valid DNG"));
    assert_eq!(
        report.upload,
        UploadOutcome::Aborted {
            prepared: 1,
            selected: 2
        }
    );
    assert!(h.library.albums().is_empty());
    assert!(report.progress.is_done());
}

// ── Edge cases ──────────────────────────────────────────────────────

#[tokio::test]
async fn empty_selection_is_a_no_op() {
    let h = Harness::new();
    let report = h.exporter(None).export(h.job(Vec::new(), None, true)).await.unwrap();
    assert!(report.assets.is_empty());
    assert_eq!(report.upload, UploadOutcome::NotRequested);
    assert_eq!(h.library.fetch_log().len(), 0);
}

#[tokio::test]
async fn lens_without_metadata_tool_skips_tagging() {
    let h = Harness::new();
    let asset = h
        .library
        .add_raw_asset("a1", "IMG_0001.DNG", raw_bytes(1), None, false);

    let report = h
        .exporter(None)
        .export(h.job(vec![asset], Some(sigma()), false))
        .await
        .unwrap();

    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.assets[0].tagged_files, 0);
}

#[tokio::test]
async fn missing_raw_resource_fails_resolution() {
    let h = Harness::new();
    let asset = Asset {
        id: "jpeg-only".into(),
        filename: "IMG_0001.JPG".into(),
        created: None,
        modified: None,
        is_favorite: false,
    };
    h.library.insert(asset.clone(), Vec::new());

    let report = h.exporter(None).export(h.job(vec![asset], None, false)).await.unwrap();
    let failure = report.assets[0].failure.as_ref().unwrap();
    assert_eq!(failure.stage, ExportStage::Resolve);
}

#[tokio::test]
async fn reports_follow_selection_order_under_limited_concurrency() {
    let h = Harness::new();
    let assets: Vec<Asset> = (1..=5)
        .map(|i| {
            h.library
                .add_raw_asset(&format!("a{i}"), &format!("IMG_{i}.DNG"), raw_bytes(i), None, false)
        })
        .collect();
    let exporter = Exporter::new(
        h.library.clone(),
        None,
        ExportSettings {
            max_concurrent: 1,
            ..settings(&h.temp)
        },
    );

    let report = exporter.export(h.job(assets, None, false)).await.unwrap();
    let ids: Vec<&str> = report.assets.iter().map(|a| a.asset_id.as_str()).collect();
    assert_eq!(ids, vec!["a1", "a2", "a3", "a4", "a5"]);
    assert_eq!(h.library.fetch_log().len(), 5);
}

#[tokio::test]
#[should_panic(expected = "Unknown scale factor")]
async fn malformed_scale_factor_is_fatal() {
    let h = Harness::new();
    let asset = h
        .library
        .add_raw_asset("a1", "IMG_0001.DNG", raw_bytes(1), None, false);
    let tool = RecordingTool::new("not-a-number");

    let _ = h
        .exporter(Some(tool))
        .export(h.job(vec![asset], Some(sigma()), false))
        .await;
}

#[tokio::test]
async fn repeated_selection_exports_once() {
    let h = Harness::new();
    let asset = h
        .library
        .add_raw_asset("a1", "IMG_0001.DNG", raw_bytes(1), None, false);

    let (tx, rx) = watch::channel(ExportProgress::default());
    let report = h
        .exporter(None)
        .export_with_progress(h.job(vec![asset.clone(), asset], None, true), tx)
        .await
        .unwrap();

    assert_eq!(report.assets.len(), 1);
    assert_eq!(*rx.borrow(), ExportProgress { completed: 2, total: 2 });
    let albums = h.library.albums();
    assert_eq!(albums.len(), 1);
    assert_eq!(albums[0].items.len(), 1);
}
