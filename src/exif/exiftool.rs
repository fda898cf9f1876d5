use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use thiserror::Error;

use super::tags::TagMap;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("ExifTool error: {message}. command={command}")]
    ExifTool { message: String, command: String },

    #[error("Expected different format from exiftool. file={file}")]
    UnexpectedFormat { file: String },
}

/// Reads and writes tags on image files.
///
/// Both calls block until the underlying tool finishes. A failed call leaves
/// no partial state the caller has to recover.
pub trait MetadataTool: Send + Sync {
    /// All current tags of `path`, values rendered as strings.
    fn read(&self, path: &Path) -> Result<HashMap<String, String>, MetadataError>;

    /// Merge `tags` into `path`. Tags not named are left untouched.
    fn update(&self, path: &Path, tags: &TagMap) -> Result<(), MetadataError>;
}

/// [`MetadataTool`] backed by the exiftool binary, one process per call.
#[derive(Debug, Clone)]
pub struct ExifTool {
    binary: PathBuf,
}

impl ExifTool {
    /// Use the binary at `binary` without probing it.
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Find a working exiftool: the configured path if given, otherwise
    /// `exiftool` on `PATH`.
    ///
    /// Returns `None` (and logs why) when the binary cannot be run; tag
    /// rewriting is then unavailable for the session.
    pub fn locate(configured: Option<&str>) -> Option<Self> {
        let tool = Self::new(configured.unwrap_or("exiftool"));
        match tool.version() {
            Ok(version) => {
                log::info!(
                    "Using exiftool {version} at {}",
                    tool.binary.display()
                );
                Some(tool)
            }
            Err(e) => {
                log::warn!(
                    "exiftool binary was not found at {}: {e}. Lens tags will not be rewritten.",
                    tool.binary.display()
                );
                None
            }
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// `exiftool -ver`
    pub fn version(&self) -> Result<String, MetadataError> {
        let output = self.run(&["-ver".to_string()])?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn run(&self, args: &[String]) -> Result<Output, MetadataError> {
        log::debug!("{} {}", self.binary.display(), args.join(" "));
        let output = Command::new(&self.binary).args(args).output()?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut errors = Vec::new();
        for line in stderr.lines() {
            if let Some(filename) = line.strip_prefix("Error: File not found - ") {
                return Err(MetadataError::FileNotFound(filename.trim().to_string()));
            }
            if line.starts_with("Error: ") {
                errors.push(line.to_string());
            }
        }

        if !errors.is_empty() {
            return Err(MetadataError::ExifTool {
                message: errors.join("\n"),
                command: args.join(" "),
            });
        }

        if !output.status.success() {
            return Err(MetadataError::ExifTool {
                message: format!("exited with status {}", output.status),
                command: args.join(" "),
            });
        }

        Ok(output)
    }
}

impl MetadataTool for ExifTool {
    fn read(&self, path: &Path) -> Result<HashMap<String, String>, MetadataError> {
        let file = path_arg(path);
        let output = self.run(&["-json".to_string(), file.clone()])?;
        let value: Value = serde_json::from_slice(&output.stdout)?;
        parse_read_output(value, &file)
    }

    fn update(&self, path: &Path, tags: &TagMap) -> Result<(), MetadataError> {
        if tags.is_empty() {
            return Ok(());
        }

        let mut args = vec!["-overwrite_original".to_string(), "-m".to_string()];
        args.extend(tags.iter().map(|(tag, value)| format!("-{tag}={value}")));
        args.push(path_arg(path));

        self.run(&args)?;
        log::debug!("Updated {} tags in {}", tags.len(), path.display());
        Ok(())
    }
}

/// Relative paths get a `./` prefix so a leading `-` is never read as an option.
fn path_arg(path: &Path) -> String {
    if path.is_relative() {
        Path::new(".").join(path).display().to_string()
    } else {
        path.display().to_string()
    }
}

/// exiftool `-json` prints an array with one object per file.
fn parse_read_output(value: Value, file: &str) -> Result<HashMap<String, String>, MetadataError> {
    let object = value
        .as_array()
        .and_then(|files| files.first())
        .and_then(Value::as_object)
        .ok_or_else(|| MetadataError::UnexpectedFormat {
            file: file.to_string(),
        })?;

    Ok(object
        .iter()
        .map(|(tag, value)| (tag.clone(), value_to_string(value)))
        .collect())
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
