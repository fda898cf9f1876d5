//! The export pipeline: RAW download, optional JPEG conversion, lens tag
//! rewrite, and optional re-upload of the results as a new album.

mod progress;

pub use progress::ExportProgress;

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinSet;

use crate::config::{Config, ExportSettings};
use crate::convert::convert_raw_to_jpeg;
use crate::exif::{ExifTool, MetadataTool, map_lens_to_tags, scale_factor_of};
use crate::lens::Lens;
use crate::library::{
    Album, Asset, PhotoLibrary, ResourceDescriptor, ResourceQuery, UploadItem, select_resource,
};
use progress::{AssetEvent, Coordinator, JpegPlan};

/// One export batch.
#[derive(Debug, Clone)]
pub struct ExportJob {
    /// Selected assets, in selection order.
    pub assets: Vec<Asset>,
    /// Folder receiving the RAW files under their original filenames.
    pub destination: PathBuf,
    /// Lens override. `None` leaves every tag untouched.
    pub lens: Option<Lens>,
    /// Import retagged JPEG renditions into a new album afterwards.
    pub reupload_jpeg: bool,
}

/// The step at which an asset dropped out of the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStage {
    Resolve,
    Download,
    Write,
    Convert,
    Tag,
    Prepare,
}

impl Display for ExportStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Resolve => "resource resolution",
            Self::Download => "download",
            Self::Write => "write",
            Self::Convert => "conversion",
            Self::Tag => "tag rewrite",
            Self::Prepare => "upload preparation",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetFailure {
    pub stage: ExportStage,
    pub message: String,
}

impl AssetFailure {
    fn new(stage: ExportStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

trait StageExt<T> {
    fn stage(self, stage: ExportStage) -> Result<T, AssetFailure>;
}

impl<T, E: Display> StageExt<T> for Result<T, E> {
    fn stage(self, stage: ExportStage) -> Result<T, AssetFailure> {
        self.map_err(|e| AssetFailure::new(stage, format!("{e:#}")))
    }
}

/// What happened to one asset.
#[derive(Debug, Clone, Serialize)]
pub struct AssetReport {
    pub asset_id: String,
    /// RAW file written to the destination, kept even if later steps fail.
    pub raw_path: Option<PathBuf>,
    /// JPEG fully prepared for upload.
    pub jpeg_path: Option<PathBuf>,
    /// The JPEG was produced on-device from the RAW.
    pub converted: bool,
    /// Number of files whose lens tags were rewritten.
    pub tagged_files: usize,
    pub failure: Option<AssetFailure>,
}

impl AssetReport {
    pub(crate) fn new(asset_id: &str) -> Self {
        Self {
            asset_id: asset_id.to_string(),
            raw_path: None,
            jpeg_path: None,
            converted: false,
            tagged_files: 0,
            failure: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Result of the re-upload phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum UploadOutcome {
    NotRequested,
    /// Fewer assets were prepared than selected, so no album was created.
    Aborted { prepared: usize, selected: usize },
    Created { album: Album },
    Failed { message: String },
}

/// Result of an export batch.
#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    /// One entry per selected asset, in selection order.
    pub assets: Vec<AssetReport>,
    pub upload: UploadOutcome,
    pub progress: ExportProgress,
}

impl ExportReport {
    pub fn succeeded(&self) -> usize {
        self.assets.iter().filter(|a| a.succeeded()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &AssetFailure)> {
        self.assets
            .iter()
            .filter_map(|a| a.failure.as_ref().map(|f| (a.asset_id.as_str(), f)))
    }
}

/// Everything a per-asset task needs, shared read-only across the batch.
struct AssetContext {
    library: Arc<dyn PhotoLibrary>,
    metadata: Option<Arc<dyn MetadataTool>>,
    lens: Option<Lens>,
    reupload_jpeg: bool,
    destination: PathBuf,
    temp_dir: PathBuf,
}

impl AssetContext {
    /// Per-asset temp path; the index prefix keeps equal filenames apart.
    fn temp_path(&self, index: usize, filename: &str) -> PathBuf {
        self.temp_dir.join(format!("{index:04}-{filename}"))
    }
}

/// Runs export batches against a photo library.
///
/// # Example
///
/// ```rust,no_run
/// use raw_exif::config::Config;
/// use raw_exif::library::{FetchOptions, FolderLibrary, PhotoLibrary};
/// use raw_exif::pipeline::{ExportJob, Exporter};
/// use std::sync::Arc;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::load(None)?;
/// let library = Arc::new(FolderLibrary::open("/photos")?);
/// let assets = library.assets(&FetchOptions::default()).await?;
///
/// let exporter = Exporter::from_config(library, &config);
/// let report = exporter
///     .export(ExportJob {
///         assets: assets.into_iter().take(3).collect(),
///         destination: "/exports".into(),
///         lens: config.active_lens().cloned(),
///         reupload_jpeg: false,
///     })
///     .await?;
/// println!("{} exported", report.succeeded());
/// # Ok(())
/// # }
/// ```
pub struct Exporter {
    library: Arc<dyn PhotoLibrary>,
    metadata: Option<Arc<dyn MetadataTool>>,
    settings: ExportSettings,
}

impl Exporter {
    /// `metadata` is `None` when no metadata tool is available; exports then
    /// run without rewriting tags.
    pub fn new(
        library: Arc<dyn PhotoLibrary>,
        metadata: Option<Arc<dyn MetadataTool>>,
        settings: ExportSettings,
    ) -> Self {
        Self {
            library,
            metadata,
            settings,
        }
    }

    /// Build an exporter from preferences, locating exiftool once.
    pub fn from_config(library: Arc<dyn PhotoLibrary>, config: &Config) -> Self {
        let metadata = ExifTool::locate(config.exiftool_path.as_deref())
            .map(|tool| Arc::new(tool) as Arc<dyn MetadataTool>);
        Self::new(library, metadata, config.export.clone())
    }

    pub fn can_rewrite_tags(&self) -> bool {
        self.metadata.is_some()
    }

    /// Run `job` to completion.
    pub async fn export(&self, job: ExportJob) -> Result<ExportReport> {
        let (tx, _rx) = watch::channel(ExportProgress::default());
        self.export_with_progress(job, tx).await
    }

    /// Run `job` to completion, publishing progress on `progress`.
    ///
    /// Per-asset failures are recorded in the report and never abort the
    /// batch. The only `Err` is failing to set up the destination or staging
    /// folders. There is no cancellation: once started, every asset runs to
    /// completion or failure.
    pub async fn export_with_progress(
        &self,
        job: ExportJob,
        progress: watch::Sender<ExportProgress>,
    ) -> Result<ExportReport> {
        let assets = unique_assets(job.assets);
        let selected = assets.len();
        if selected == 0 {
            return Ok(ExportReport {
                assets: Vec::new(),
                upload: UploadOutcome::NotRequested,
                progress: ExportProgress::default(),
            });
        }

        tokio::fs::create_dir_all(&job.destination)
            .await
            .with_context(|| format!("Failed to create {}", job.destination.display()))?;

        let temp_dir = self
            .settings
            .temp_root()
            .join(format!("raw-exif-{}", uuid::Uuid::new_v4()));
        if job.reupload_jpeg {
            tokio::fs::create_dir_all(&temp_dir)
                .await
                .with_context(|| format!("Failed to create {}", temp_dir.display()))?;
        }

        match (&job.lens, &self.metadata) {
            (Some(lens), Some(_)) => log::info!("Overriding lens with {}", lens.display_string()),
            (Some(_), None) => {
                log::warn!("Lens override selected but exiftool is unavailable; tags stay as-is")
            }
            (None, _) => {}
        }
        log::info!(
            "Exporting {selected} asset(s) from {} library to {}",
            self.library.name(),
            job.destination.display()
        );

        let ctx = Arc::new(AssetContext {
            library: Arc::clone(&self.library),
            metadata: self.metadata.clone(),
            lens: job.lens,
            reupload_jpeg: job.reupload_jpeg,
            destination: job.destination,
            temp_dir,
        });
        let semaphore = (self.settings.max_concurrent > 0)
            .then(|| Arc::new(Semaphore::new(self.settings.max_concurrent)));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut coordinator = Coordinator::new(selected, progress);
        let mut tasks = JoinSet::new();
        for (index, asset) in assets.into_iter().enumerate() {
            tasks.spawn(export_asset(
                Arc::clone(&ctx),
                semaphore.clone(),
                index,
                asset,
                tx.clone(),
            ));
        }
        drop(tx);

        while let Some(event) = rx.recv().await {
            coordinator.handle(event);
        }

        // Every task has dropped its sender; wait for all of them before any upload
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    std::panic::resume_unwind(e.into_panic());
                }
                log::error!("Export task did not complete: {e}");
            }
        }

        let final_progress = coordinator.progress();
        log::debug!(
            "{} asset(s) reused a ready-made JPEG",
            coordinator.skipped_conversions()
        );
        let (reports, prepared) = coordinator.finish();

        for report in &reports {
            if let Some(failure) = &report.failure {
                log::warn!(
                    "Asset {} failed at {}: {}",
                    report.asset_id,
                    failure.stage,
                    failure.message
                );
            }
        }

        let upload = if ctx.reupload_jpeg {
            self.upload(prepared, selected).await
        } else {
            UploadOutcome::NotRequested
        };

        let report = ExportReport {
            assets: reports,
            upload,
            progress: final_progress,
        };
        log::info!(
            "Completed export: {} succeeded, {} failed out of {selected}",
            report.succeeded(),
            selected - report.succeeded()
        );
        Ok(report)
    }

    /// All-or-nothing: an album is created only if every selected asset
    /// produced an upload-ready JPEG.
    async fn upload(&self, prepared: Vec<UploadItem>, selected: usize) -> UploadOutcome {
        if prepared.len() < selected {
            log::warn!(
                "Only {}/{selected} asset(s) prepared for upload, skipping album creation",
                prepared.len()
            );
            return UploadOutcome::Aborted {
                prepared: prepared.len(),
                selected,
            };
        }

        let title = album_title(chrono::Local::now());
        match self.library.create_album(&title, &prepared).await {
            Ok(album) => {
                log::info!("Uploaded {} image(s) to album {}", album.asset_count, album.title);
                UploadOutcome::Created { album }
            }
            Err(e) => {
                log::error!("Album creation failed: {e:#}");
                UploadOutcome::Failed {
                    message: format!("{e:#}"),
                }
            }
        }
    }
}

fn album_title<Tz: chrono::TimeZone>(now: chrono::DateTime<Tz>) -> String
where
    Tz::Offset: Display,
{
    format!("RAW Export {}", now.format("%Y-%m-%d %H.%M.%S"))
}

async fn export_asset(
    ctx: Arc<AssetContext>,
    semaphore: Option<Arc<Semaphore>>,
    index: usize,
    asset: Asset,
    events: mpsc::UnboundedSender<AssetEvent>,
) {
    let _permit = match semaphore {
        Some(s) => s.acquire_owned().await.ok(),
        None => None,
    };

    let mut report = AssetReport::new(&asset.id);
    match run_asset(&ctx, index, &asset, &events, &mut report).await {
        Ok(()) => {
            if let Some(path) = &report.jpeg_path {
                let _ = events.send(AssetEvent::Prepared {
                    path: path.clone(),
                    is_favorite: asset.is_favorite,
                });
            }
        }
        Err(failure) => {
            log::error!(
                "Asset {} failed at {}: {}",
                asset.id,
                failure.stage,
                failure.message
            );
            report.failure = Some(failure);
        }
    }
    let _ = events.send(AssetEvent::Finished { index, report });
}

async fn run_asset(
    ctx: &AssetContext,
    index: usize,
    asset: &Asset,
    events: &mpsc::UnboundedSender<AssetEvent>,
    report: &mut AssetReport,
) -> Result<(), AssetFailure> {
    // 1. Resource resolution
    let resources = ctx
        .library
        .resources(&asset.id)
        .await
        .stage(ExportStage::Resolve)?;
    let raw = select_resource(&resources, &ResourceQuery::RAW)
        .cloned()
        .ok_or_else(|| AssetFailure::new(ExportStage::Resolve, "no RAW resource"))?;
    let ready_jpeg = if ctx.reupload_jpeg {
        select_resource(&resources, &ResourceQuery::FULL_SIZE_JPEG).cloned()
    } else {
        None
    };
    let plan = match (ctx.reupload_jpeg, &ready_jpeg) {
        (false, _) => JpegPlan::NotRequested,
        (true, Some(_)) => JpegPlan::ReadyMade,
        (true, None) => JpegPlan::Convert,
    };
    let _ = events.send(AssetEvent::Resolved { index, plan });
    log::info!("Exporting asset {} using resource {}", asset.id, raw.filename);

    // 2-3. Download and write the RAW
    let raw_path = download_to(ctx, &raw, ctx.destination.join(&raw.filename)).await?;
    report.raw_path = Some(raw_path.clone());

    // 4. JPEG for re-upload
    let jpeg_path = match (plan, ready_jpeg) {
        (JpegPlan::ReadyMade, Some(jpeg)) => {
            let path = ctx.temp_path(index, &jpeg.filename);
            Some(
                download_to(ctx, &jpeg, path)
                    .await
                    .map_err(|f| AssetFailure::new(ExportStage::Prepare, f.message))?,
            )
        }
        (JpegPlan::Convert, _) => {
            let path = ctx.temp_path(index, &format!("{}.jpg", file_stem(&raw.filename)));
            let path = convert_raw_to_jpeg(raw_path.clone(), path)
                .await
                .stage(ExportStage::Convert)?;
            report.converted = true;
            let _ = events.send(AssetEvent::Converted { index });
            Some(path)
        }
        _ => None,
    };

    // 5. Tag rewrite
    if let Some(lens) = &ctx.lens {
        match &ctx.metadata {
            Some(tool) => {
                for path in std::iter::once(&raw_path).chain(jpeg_path.as_ref()) {
                    tag_file(Arc::clone(tool), lens.clone(), path.clone())
                        .await
                        .stage(ExportStage::Tag)?;
                    report.tagged_files += 1;
                }
            }
            None => log::debug!("Leaving {} untagged", raw_path.display()),
        }
    }

    report.jpeg_path = jpeg_path;
    Ok(())
}

/// Fetch `resource` (network allowed) and write it to `path`.
async fn download_to(
    ctx: &AssetContext,
    resource: &ResourceDescriptor,
    path: PathBuf,
) -> Result<PathBuf, AssetFailure> {
    let bytes = ctx
        .library
        .fetch_bytes(resource, true)
        .await
        .stage(ExportStage::Download)?;
    log::debug!("Downloaded {} ({} bytes)", resource.filename, bytes.len());
    tokio::fs::write(&path, &bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
        .stage(ExportStage::Write)?;
    log::info!("Wrote image to {}", path.display());
    Ok(path)
}

/// Read the file's scale factor, then merge the lens tags into it.
async fn tag_file(tool: Arc<dyn MetadataTool>, lens: Lens, path: PathBuf) -> Result<usize> {
    let joined = tokio::task::spawn_blocking(move || -> Result<usize> {
        let current = tool
            .read(&path)
            .with_context(|| format!("Failed to read tags of {}", path.display()))?;
        let tags = map_lens_to_tags(Some(&lens), scale_factor_of(&current));
        tool.update(&path, &tags)
            .with_context(|| format!("Failed to write tags to {}", path.display()))?;
        log::debug!("Rewrote {} lens tags in {}", tags.len(), path.display());
        Ok(tags.len())
    })
    .await;

    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => Err(anyhow::Error::new(e).context("Tagging task failed")),
    }
}

/// Drop repeated selections of the same asset, keeping the first. Two tasks
/// for one asset would write and retag the same destination file.
fn unique_assets(assets: Vec<Asset>) -> Vec<Asset> {
    let mut seen = HashSet::new();
    assets
        .into_iter()
        .filter(|asset| {
            let first = seen.insert(asset.id.clone());
            if !first {
                log::warn!("Asset {} selected more than once, exporting it once", asset.id);
            }
            first
        })
        .collect()
}

fn file_stem(filename: &str) -> &str {
    Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename)
}
