//! Settings management for splimport
//!
//! Stores user preferences in ~/.config/splimport/settings.json

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

use crate::archive::DOCUMENT_EXTENSION;
use crate::error::SettingsError;
use crate::render::{MissingChildPolicy, RenderOptions};
use crate::spl::context::FeatureFlags;

fn default_extension() -> String {
    DOCUMENT_EXTENSION.to_string()
}

/// User settings for splimport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Database file (empty = platform data directory)
    #[serde(default)]
    pub database_path: String,

    /// User recorded as the importer of stored content
    #[serde(default)]
    pub user_id: Option<Uuid>,

    /// Extension of importable archive entries
    #[serde(default = "default_extension")]
    pub document_extension: String,

    /// Import feature toggles
    #[serde(default)]
    pub flags: FeatureFlags,

    #[serde(default)]
    pub missing_child_policy: MissingChildPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: String::new(),
            user_id: None,
            document_extension: default_extension(),
            flags: FeatureFlags::default(),
            missing_child_policy: MissingChildPolicy::default(),
        }
    }
}

impl Settings {
    /// Get the config directory path (~/.config/splimport)
    fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("splimport");

        Ok(config_dir)
    }

    /// Get the settings file path
    fn settings_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("settings.json"))
    }

    /// Load settings from disk, or return defaults if not found
    pub fn load() -> Self {
        match Self::settings_path().and_then(|path| Self::load_from(&path)) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Could not load settings: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// Load from a specific file; a missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;

        let settings: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {:?}", path))?;

        Ok(settings)
    }

    /// Save settings to disk
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::settings_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, content).with_context(|| format!("Failed to write {:?}", path))?;

        Ok(())
    }

    /// Database path, falling back to ~/.local/share/splimport/spl.db
    pub fn database_path(&self) -> PathBuf {
        if !self.database_path.is_empty() {
            return PathBuf::from(&self.database_path);
        }
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("splimport")
            .join("spl.db")
    }

    /// Feature flags for the importer.
    pub fn flags(&self) -> FeatureFlags {
        self.flags
    }

    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            missing_child: self.missing_child_policy,
        }
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<(), SettingsError> {
        if !self.document_extension.starts_with('.') {
            return Err(SettingsError::InvalidExtension(self.document_extension.clone()));
        }

        if !self.database_path.is_empty() {
            let db = PathBuf::from(&self.database_path);
            if let Some(dir) = db.parent().filter(|d| !d.as_os_str().is_empty()) {
                if !dir.exists() {
                    return Err(SettingsError::DatabaseDirNotFound(dir.to_path_buf()));
                }
            }
        }

        Ok(())
    }
}
