use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::catalog::{LensCatalog, LensSelection};
use crate::lens::Lens;

/// Persisted preferences for raw-exif.
///
/// Holds the lens catalog, the active lens override, where to find exiftool
/// and the photo library, and export behavior. Stored as pretty-printed JSON;
/// missing fields fall back to their defaults.
///
/// # Loading
///
/// ```rust,no_run
/// use raw_exif::config::Config;
///
/// // From a JSON file
/// let mut config = Config::load(Some("config.json".as_ref())).unwrap();
///
/// // Or use defaults and customize
/// let mut config = Config::default();
/// config.export.reupload_jpeg = true;
/// config.exiftool_path = Some("/opt/exiftool/exiftool".into());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Lens presets, in display order.
    pub lenses: LensCatalog,
    /// Active lens override. Defaults to no override.
    pub selected_lens: LensSelection,
    /// Path to the exiftool binary. `None` searches `PATH`.
    pub exiftool_path: Option<String>,
    /// Root directory of the photo library.
    pub library_root: Option<String>,
    /// Export behavior.
    pub export: ExportSettings,
}

/// Controls how an export batch runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    /// Also import retagged JPEG renditions back into the library as a new album.
    pub reupload_jpeg: bool,
    /// Maximum number of assets processed at once. `0` means one task per asset
    /// with no limit.
    pub max_concurrent: usize,
    /// Where converted/downloaded JPEGs are staged. `None` uses the system temp dir.
    pub temp_dir: Option<String>,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            reupload_jpeg: false,
            max_concurrent: 8,
            temp_dir: None,
        }
    }
}

impl ExportSettings {
    pub fn temp_root(&self) -> PathBuf {
        match &self.temp_dir {
            Some(dir) => PathBuf::from(dir),
            None => std::env::temp_dir(),
        }
    }
}

impl Config {
    /// Resolve the config file path: `config.json` next to the executable.
    pub fn config_path() -> Result<PathBuf> {
        let exe_path = std::env::current_exe().context("Failed to get executable path")?;
        let exe_dir = exe_path
            .parent()
            .context("Failed to get executable directory")?;
        Ok(exe_dir.join("config.json"))
    }

    /// Load config from the given path, or from the default location.
    ///
    /// A selection pointing at a lens missing from the catalog is reset to none.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        if !config_path.exists() {
            log::warn!(
                "Config file not found at {}. Using defaults.",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let contents =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config file")?;
        config.lenses.reconcile(&mut config.selected_lens);
        Ok(config)
    }

    /// Save config to the given path, or to the default location.
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, contents).context("Failed to write config file")?;
        log::info!("Config saved to {}", config_path.display());
        Ok(())
    }

    /// The lens the current selection resolves to, if any.
    pub fn active_lens(&self) -> Option<&Lens> {
        self.selected_lens.resolve(&self.lenses)
    }

    /// Remove a lens and drop the selection if it pointed at it.
    pub fn remove_lens(&mut self, id: uuid::Uuid) -> Option<Lens> {
        let removed = self.lenses.remove(id);
        self.lenses.reconcile(&mut self.selected_lens);
        removed
    }
}
