use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

use raw_exif::catalog::LensSelection;
use raw_exif::config::Config;
use raw_exif::exif::{LensTags, read_lens_tags};
use raw_exif::lens::{Lens, LensDraft};
use raw_exif::library::{FetchOptions, FolderLibrary, PhotoLibrary, SortOrder};
use raw_exif::pipeline::{ExportJob, ExportProgress, ExportReport, Exporter, UploadOutcome};

#[derive(Parser, Debug)]
#[command(
    name = "raw-exif",
    version,
    about = "Export RAW photos with corrected lens metadata"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to config file (default: config.json next to binary)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Output results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a default config.json and exit
    Init,

    /// List the assets of a library
    Assets {
        /// Library root (default: library_root from config)
        #[arg(long, value_name = "DIR")]
        library: Option<PathBuf>,

        /// Sort by creation date, oldest first
        #[arg(long)]
        oldest_first: bool,

        /// Only list favorites
        #[arg(long)]
        favorites: bool,
    },

    /// Manage lens presets
    #[command(subcommand)]
    Lens(LensCommand),

    /// Export assets as RAW files with the selected lens applied
    Export {
        /// Asset identifiers, as listed by `assets`
        #[arg(value_name = "ASSET_ID", required = true)]
        assets: Vec<String>,

        /// Destination folder
        #[arg(long, value_name = "DIR")]
        dest: PathBuf,

        /// Library root (default: library_root from config)
        #[arg(long, value_name = "DIR")]
        library: Option<PathBuf>,

        /// Lens id or `none` (default: the selected lens)
        #[arg(long, value_name = "ID|none")]
        lens: Option<String>,

        /// Import the retagged JPEGs into a new album
        #[arg(long)]
        reupload: bool,
    },

    /// Display the camera and lens tags of image files
    Show {
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum LensCommand {
    /// List lens presets
    List,
    /// Add a lens preset
    Add(AddLens),
    /// Remove a lens preset
    Remove {
        #[arg(value_name = "ID")]
        id: uuid::Uuid,
    },
    /// Select the lens applied on export
    Select {
        #[arg(value_name = "ID|none")]
        id: String,
    },
}

#[derive(Args, Debug)]
struct AddLens {
    #[arg(long)]
    make: String,
    #[arg(long)]
    model: String,
    /// Focal length written to the image, in mm
    #[arg(long)]
    focal_length: i64,
    #[arg(long)]
    focal_length_min: Option<i64>,
    #[arg(long)]
    focal_length_max: Option<i64>,
    /// Aperture written to the image
    #[arg(long)]
    f_stop: f64,
    #[arg(long)]
    f_stop_min: Option<f64>,
    #[arg(long)]
    f_stop_max: Option<f64>,
    /// Select the new lens right away
    #[arg(long)]
    select: bool,
}

impl AddLens {
    /// Missing range bounds default to the fixed value, giving a prime lens.
    fn into_draft(self) -> LensDraft {
        LensDraft {
            make: self.make,
            model: self.model,
            focal_length: self.focal_length,
            focal_length_min: self.focal_length_min.unwrap_or(self.focal_length),
            focal_length_max: self.focal_length_max.unwrap_or(self.focal_length),
            f_stop: self.f_stop,
            f_stop_min: self.f_stop_min.unwrap_or(self.f_stop),
            f_stop_max: self.f_stop_max.unwrap_or(self.f_stop),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    let config_file = cli.config.as_deref();
    match cli.command {
        Command::Init => {
            Config::default().save(config_file)?;
            let path = match config_file {
                Some(p) => p.to_path_buf(),
                None => Config::config_path()?,
            };
            println!("Default config written to {}", path.display());
        }
        Command::Assets {
            library,
            oldest_first,
            favorites,
        } => {
            let config = Config::load(config_file)?;
            let library = open_library(library, &config)?;
            let options = FetchOptions {
                sort: if oldest_first {
                    SortOrder::OldestFirst
                } else {
                    SortOrder::NewestFirst
                },
                favorites_only: favorites,
            };
            let assets = library.assets(&options).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&assets)?);
            } else {
                for asset in &assets {
                    let created = asset
                        .created
                        .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_else(|| "-".into());
                    let star = if asset.is_favorite { "*" } else { " " };
                    println!("{star} {:<24} {created:<16}  {}", asset.id, asset.filename);
                }
                log::info!("{} asset(s) in {}", assets.len(), library.root().display());
            }
        }
        Command::Lens(command) => run_lens(command, config_file, cli.json)?,
        Command::Export {
            assets,
            dest,
            library,
            lens,
            reupload,
        } => {
            let config = Config::load(config_file)?;
            let library = open_library(library, &config)?;
            let lens = match lens.as_deref() {
                None => config.active_lens().cloned(),
                Some(arg) => match parse_selection(arg)? {
                    LensSelection::None => None,
                    LensSelection::Lens(id) => Some(
                        config
                            .lenses
                            .get(id)
                            .cloned()
                            .with_context(|| format!("No lens with id {id}"))?,
                    ),
                },
            };
            let report = run_export(library, &config, assets, dest, lens, reupload).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            if report.failures().next().is_some()
                || matches!(
                    report.upload,
                    UploadOutcome::Aborted { .. } | UploadOutcome::Failed { .. }
                )
            {
                std::process::exit(1);
            }
        }
        Command::Show { files } => {
            let mut all = Vec::new();
            for file in &files {
                let tags = read_lens_tags(file)
                    .with_context(|| format!("Failed to read {}", file.display()))?;
                if cli.json {
                    all.push(serde_json::json!({
                        "path": file.display().to_string(),
                        "make": tags.make,
                        "model": tags.model,
                        "lens_make": tags.lens_make,
                        "lens_model": tags.lens_model,
                        "focal_length": tags.focal_length,
                        "focal_length_35mm": tags.focal_length_35mm,
                        "f_number": tags.f_number,
                    }));
                } else {
                    print_lens_tags(file, &tags);
                }
            }
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&all)?);
            }
        }
    }

    Ok(())
}

fn open_library(dir: Option<PathBuf>, config: &Config) -> Result<Arc<FolderLibrary>> {
    let root = match dir.or_else(|| config.library_root.as_ref().map(PathBuf::from)) {
        Some(root) => root,
        None => bail!("No library given. Pass --library or set library_root in the config file."),
    };
    Ok(Arc::new(FolderLibrary::open(root)?))
}

/// `none` or a lens id.
fn parse_selection(arg: &str) -> Result<LensSelection> {
    if arg.eq_ignore_ascii_case("none") {
        return Ok(LensSelection::None);
    }
    let id = uuid::Uuid::parse_str(arg).with_context(|| format!("Invalid lens id {arg:?}"))?;
    Ok(LensSelection::Lens(id))
}

fn run_lens(command: LensCommand, config_file: Option<&Path>, json: bool) -> Result<()> {
    let mut config = Config::load(config_file)?;
    match command {
        LensCommand::List => {
            if json {
                println!("{}", serde_json::to_string_pretty(&config.lenses)?);
                return Ok(());
            }
            if config.lenses.is_empty() {
                println!("{DIM}(no lenses){RESET}");
            }
            let active = config.active_lens().map(|l| l.id);
            for lens in config.lenses.iter() {
                let marker = if Some(lens.id) == active { "*" } else { " " };
                println!(
                    "{marker} {}  {BOLD}{} {}{RESET}  {} @ {}  ({} {})",
                    lens.id,
                    lens.make,
                    lens.model,
                    lens.image_focal_length_string(),
                    lens.f_stop_string(),
                    lens.full_focal_length_string(),
                    lens.f_stop_range_string(),
                );
            }
        }
        LensCommand::Add(args) => {
            let select = args.select;
            let lens = args.into_draft().build()?;
            if select {
                config.selected_lens = LensSelection::Lens(lens.id);
            }
            println!("{}", lens.id);
            config.lenses.add(lens);
            config.save(config_file)?;
        }
        LensCommand::Remove { id } => match config.remove_lens(id) {
            Some(lens) => {
                log::info!("Removed lens {}", lens.display_string());
                config.save(config_file)?;
            }
            None => bail!("No lens with id {id}"),
        },
        LensCommand::Select { id } => {
            let selection = parse_selection(&id)?;
            if let LensSelection::Lens(lens_id) = selection {
                if config.lenses.get(lens_id).is_none() {
                    bail!("No lens with id {lens_id}");
                }
            }
            config.selected_lens = selection;
            match config.active_lens() {
                Some(lens) => log::info!("Selected {}", lens.display_string()),
                None => log::info!("Cleared lens selection; tags will be left as recorded"),
            }
            config.save(config_file)?;
        }
    }
    Ok(())
}

async fn run_export(
    library: Arc<FolderLibrary>,
    config: &Config,
    ids: Vec<String>,
    destination: PathBuf,
    lens: Option<Lens>,
    reupload: bool,
) -> Result<ExportReport> {
    let available = library.assets(&FetchOptions::default()).await?;
    let mut assets = Vec::with_capacity(ids.len());
    for id in &ids {
        match available.iter().find(|a| &a.id == id) {
            Some(asset) => assets.push(asset.clone()),
            None => bail!("No asset with id {id} in {}", library.root().display()),
        }
    }

    let exporter = Exporter::from_config(library, config);
    if lens.is_some() && !exporter.can_rewrite_tags() {
        log::warn!("exiftool not found. Set exiftool_path in the config file to rewrite lens tags.");
    }

    let (tx, mut rx) = watch::channel(ExportProgress::default());
    let reporter = tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let p = *rx.borrow_and_update();
            if p.completed > 0 {
                log::info!("[{}/{}] {:.0}%", p.completed, p.total, p.fraction() * 100.0);
            }
        }
    });

    let job = ExportJob {
        assets,
        destination,
        lens,
        reupload_jpeg: reupload || config.export.reupload_jpeg,
    };
    let report = exporter.export_with_progress(job, tx).await?;
    let _ = reporter.await;

    match &report.upload {
        UploadOutcome::NotRequested => {}
        UploadOutcome::Created { album } => {
            println!(
                "{GREEN}Uploaded{RESET} {} image(s) to {BOLD}{}{RESET}",
                album.asset_count, album.title
            )
        }
        UploadOutcome::Aborted { prepared, selected } => {
            log::error!("Upload skipped: only {prepared} of {selected} JPEG(s) were prepared")
        }
        UploadOutcome::Failed { message } => log::error!("Upload failed: {message}"),
    }
    Ok(report)
}

// ANSI color codes
const GREEN: &str = "\x1b[32m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";

fn print_lens_tags(path: &Path, tags: &LensTags) {
    println!();
    println!("{BOLD}File:{RESET} {}", path.display());
    println!("{DIM}{}{RESET}", "═".repeat(72));

    if tags.is_empty() {
        println!("  {DIM}(no lens metadata found){RESET}");
        println!();
        return;
    }

    let rows: [(&str, Option<&str>); 7] = [
        ("Make", tags.make.as_deref()),
        ("Model", tags.model.as_deref()),
        ("LensMake", tags.lens_make.as_deref()),
        ("LensModel", tags.lens_model.as_deref()),
        ("FocalLength", tags.focal_length.as_deref()),
        ("FocalLengthIn35mmFormat", tags.focal_length_35mm.as_deref()),
        ("FNumber", tags.f_number.as_deref()),
    ];
    for (tag, val) in rows {
        if let Some(v) = val {
            println!("  {:<24} : {v}", tag);
        }
    }
    println!();
}
