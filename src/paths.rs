use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "TOMORIN_DATA_DIR";

const APP_DIR_NAME: &str = "tomorin-player";

/// Global path configuration for the application
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PathConfig {
    /// Base directory
    pub data_dir: PathBuf,

    /// Audio storage: passive cache and explicit downloads
    pub audio_cache_dir: PathBuf,
    pub downloads_dir: PathBuf,

    /// Content-addressed theme images
    pub theme_images_dir: PathBuf,

    /// Small state files
    pub credential_file: PathBuf,
    pub play_history_file: PathBuf,
    pub library_file: PathBuf,
    pub settings_file: PathBuf,

    /// Log files
    pub logs: LogPaths,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LogPaths {
    pub log_dir: PathBuf,
    pub backend_logs: PathBuf,
    pub backend_errors: PathBuf,
}

/// The three directories holding media files.
#[derive(Clone, Debug)]
pub struct StorageDirs {
    pub audio_cache: PathBuf,
    pub downloads: PathBuf,
    pub theme_images: PathBuf,
}

impl PathConfig {
    /// Lay out every path below `data_dir`.
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref().to_path_buf();
        let log_dir = data_dir.join("logs");

        let logs = LogPaths {
            backend_logs: log_dir.join("backend_logs.txt"),
            backend_errors: log_dir.join("backend_errors.txt"),
            log_dir,
        };

        PathConfig {
            audio_cache_dir: data_dir.join("audio_cache"),
            downloads_dir: data_dir.join("downloads"),
            theme_images_dir: data_dir.join("theme_images"),
            credential_file: data_dir.join("sessdata.json"),
            play_history_file: data_dir.join("play_history.json"),
            library_file: data_dir.join("library.json"),
            settings_file: data_dir.join("settings.json"),
            logs,
            data_dir,
        }
    }

    /// Resolve the data directory from `TOMORIN_DATA_DIR`, falling back to the
    /// platform's user data directory.
    pub fn from_env() -> Self {
        if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
            return Self::new(PathBuf::from(dir));
        }
        let base = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(base.join(APP_DIR_NAME))
    }

    /// Ensure all necessary directories exist
    pub fn ensure_directories_exist(&self) -> Result<()> {
        let dirs_to_create = [
            &self.data_dir,
            &self.audio_cache_dir,
            &self.downloads_dir,
            &self.theme_images_dir,
            &self.logs.log_dir,
        ];

        for dir in dirs_to_create {
            if !dir.exists() {
                std::fs::create_dir_all(dir)?;
            }
        }

        Ok(())
    }

    pub fn storage_dirs(&self) -> StorageDirs {
        StorageDirs {
            audio_cache: self.audio_cache_dir.clone(),
            downloads: self.downloads_dir.clone(),
            theme_images: self.theme_images_dir.clone(),
        }
    }

    /// Get a JSON representation of the path configuration
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
