//! Settings for scanning, thumbnail generation and windowing, persisted as
//! JSON.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::scanner::ScanConfig;
use crate::thumbnails::{ThumbnailConfig, MAX_THUMBNAIL_SIZE};
use crate::viewport::WindowConfig;

const MIN_THUMBNAIL_SIZE: u32 = 32;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scan: ScanConfig,
    pub thumbnails: ThumbnailConfig,
    pub window: WindowConfig,
}

impl Config {
    /// `config.json` in the per-user config directory.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "mediagrid").map(|dirs| dirs.config_dir().join("config.json"))
    }

    /// Loads settings from `path`. A missing file yields the defaults; any
    /// out-of-range values are clamped.
    pub fn load(path: &Path) -> Result<Self> {
        let json = match fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(?path, "No config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read config: {:?}", path))
            }
        };

        let config: Self = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse config: {:?}", path))?;
        Ok(config.sanitized())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, json).with_context(|| format!("Failed to write config: {:?}", path))?;
        debug!(?path, "Saved config");
        Ok(())
    }

    /// Clamps values into their supported ranges and normalizes extensions.
    pub fn sanitized(mut self) -> Self {
        self.scan.formats = self.scan.formats.normalized();
        self.thumbnails.size = self
            .thumbnails
            .size
            .clamp(MIN_THUMBNAIL_SIZE, MAX_THUMBNAIL_SIZE);
        self.thumbnails.batch_size = self.thumbnails.batch_size.max(1);
        self.thumbnails.memory_entries = self.thumbnails.memory_entries.max(1);
        self.window.max_active_thumbnails = self.window.max_active_thumbnails.max(1);
        self
    }
}
