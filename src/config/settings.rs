//! CLI settings file and platform directories

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::bridge::SilentFallback;

/// Defaults for the `msal-bridge` CLI, overridable by flags.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// MSAL-style JSON client configuration
    pub config_path: Option<PathBuf>,
    /// Bare client id, used when no config path is set
    pub client_id: Option<String>,
    pub authority: Option<String>,
    pub scopes: Vec<String>,
    pub silent_fallback: SilentFallback,
}

impl Settings {
    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("com", "msal-bridge", "msal-bridge")
            .context("Could not determine config directory")
    }

    /// Default settings file path
    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().join("config.toml"))
    }

    /// Directory holding per-client token caches
    pub fn cache_dir() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.cache_dir().to_path_buf())
    }

    /// Load settings; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).context("Failed to read settings file")?;
        toml::from_str(&content).context("Failed to parse settings file")
    }
}
