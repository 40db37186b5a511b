use crate::errors::{GraftError, Result};
use crate::utils::atomic_file;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const TOKEN_VARS: [&str; 2] = ["GITHUB_TOKEN", "GH_TOKEN"];

/// Settings shared by every repository of the current user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    pub github_token: Option<String>,
}

impl UserSettings {
    /// `<config-dir>/graft/user.json`
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .ok_or_else(|| GraftError::config("Could not find the user configuration directory"))?;
        Ok(dir.join("graft").join("user.json"))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| GraftError::config(format!("Failed to read user settings: {e}")))?;
        serde_json::from_str(&content)
            .map_err(|e| GraftError::config(format!("Failed to parse user settings: {e}")))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        atomic_file::write_json(path, self)
    }

    /// The GitHub token, preferring the environment over the saved one
    pub fn github_token(&self) -> Option<String> {
        TOKEN_VARS
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find(|token| !token.trim().is_empty())
            .or_else(|| self.github_token.clone())
    }
}
