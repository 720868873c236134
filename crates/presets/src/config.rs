//! Configuration for the preset download system

use std::path::PathBuf;
use std::time::Duration;

use crate::core::{PresetError, PresetId, Result};

/// Configuration for preset downloads and the on-disk layout
#[derive(Debug, Clone)]
pub struct PresetConfig {
    /// Root under which each preset is installed as `<id>/`
    pub download_root: PathBuf,
    /// Directory holding the staging archive; emptied before every run
    pub temp_dir: PathBuf,
    /// File name of the staging archive inside `temp_dir`
    pub staging_file_name: String,
    /// Size of the slices written to disk between cancellation checks
    pub chunk_size: usize,
    /// Longest gap allowed between two reads of the response; a slow but
    /// steady body is never cut off
    pub read_timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl PresetConfig {
    pub fn new<D: Into<PathBuf>, T: Into<PathBuf>>(download_root: D, temp_dir: T) -> Self {
        Self {
            download_root: download_root.into(),
            temp_dir: temp_dir.into(),
            ..Self::default()
        }
    }

    /// Load configuration from the environment, reading `.env` if present
    ///
    /// Recognised variables: `PRESETS_DOWNLOAD_ROOT`, `PRESETS_TEMP_DIR`,
    /// `PRESETS_CHUNK_SIZE` and `PRESETS_READ_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok(); // Ignore error if .env not present
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(root) = lookup("PRESETS_DOWNLOAD_ROOT") {
            config.download_root = PathBuf::from(root);
        }
        if let Some(temp) = lookup("PRESETS_TEMP_DIR") {
            config.temp_dir = PathBuf::from(temp);
        }
        if let Some(chunk) = lookup("PRESETS_CHUNK_SIZE") {
            config.chunk_size = chunk.trim().parse().map_err(|_| PresetError::Configuration {
                message: format!("PRESETS_CHUNK_SIZE must be a positive integer, got '{}'", chunk),
                field: Some("chunk_size".to_string()),
            })?;
        }
        if let Some(secs) = lookup("PRESETS_READ_TIMEOUT_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|_| PresetError::Configuration {
                message: format!("PRESETS_READ_TIMEOUT_SECS must be a number of seconds, got '{}'", secs),
                field: Some("read_timeout".to_string()),
            })?;
            config.read_timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(PresetError::Configuration {
                message: "chunk size must be greater than zero".to_string(),
                field: Some("chunk_size".to_string()),
            });
        }
        if self.staging_file_name.is_empty() {
            return Err(PresetError::Configuration {
                message: "staging file name must not be empty".to_string(),
                field: Some("staging_file_name".to_string()),
            });
        }
        // Emptying the staging directory would wipe installed presets
        if self.temp_dir == self.download_root {
            return Err(PresetError::Configuration {
                message: format!(
                    "temp dir and download root must differ (both are '{}')",
                    self.temp_dir.display()
                ),
                field: Some("temp_dir".to_string()),
            });
        }
        Ok(())
    }

    /// Fixed location the archive is streamed to before extraction
    pub fn staging_path(&self) -> PathBuf {
        self.temp_dir.join(&self.staging_file_name)
    }

    /// Install directory of a preset, whether or not it exists yet
    pub fn preset_dir(&self, id: PresetId) -> PathBuf {
        self.download_root.join(id.to_string())
    }
}

impl Default for PresetConfig {
    fn default() -> Self {
        let base = std::env::temp_dir().join("presets");
        Self {
            download_root: base.join("download"),
            temp_dir: base.join("temp"),
            staging_file_name: "preset.zip".to_string(),
            chunk_size: 8192,
            read_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: "presets/0.1.0".to_string(),
        }
    }
}
