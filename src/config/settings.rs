use super::graft_dir;
use crate::errors::{GraftError, Result};
use crate::utils::atomic_file;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "GRAFT";

/// Per-repository settings, kept in `<git-dir>/graft/config.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoSettings {
    pub trunk: String,
    pub remote: String,
    /// Skip git hooks on commit and push
    pub no_verify: bool,
    pub restack: RestackSettings,
    pub github: GitHubSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestackSettings {
    pub committer_date_is_author_date: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubSettings {
    pub enabled: bool,
    pub api_url: String,
    /// Derived from the remote URL when unset
    pub owner: Option<String>,
    pub repo: Option<String>,
}

impl Default for RepoSettings {
    fn default() -> Self {
        Self {
            trunk: "main".to_string(),
            remote: "origin".to_string(),
            no_verify: false,
            restack: RestackSettings::default(),
            github: GitHubSettings::default(),
        }
    }
}

impl Default for GitHubSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            api_url: "https://api.github.com".to_string(),
            owner: None,
            repo: None,
        }
    }
}

impl RepoSettings {
    pub const KEYS: [&'static str; 8] = [
        "trunk",
        "remote",
        "no_verify",
        "restack.committer_date_is_author_date",
        "github.enabled",
        "github.api_url",
        "github.owner",
        "github.repo",
    ];

    pub fn path(git_dir: &Path) -> PathBuf {
        graft_dir(git_dir).join("config.json")
    }

    pub fn is_initialized(git_dir: &Path) -> bool {
        Self::path(git_dir).exists()
    }

    pub fn for_trunk<S: Into<String>>(trunk: S) -> Self {
        Self {
            trunk: trunk.into(),
            ..Self::default()
        }
    }

    /// Load the saved settings with `GRAFT_*` environment overrides on top
    pub fn load(git_dir: &Path) -> Result<Self> {
        Self::load_layers(git_dir, true)
    }

    /// Load only what is saved on disk, for editing and saving back
    pub fn load_saved(git_dir: &Path) -> Result<Self> {
        Self::load_layers(git_dir, false)
    }

    fn load_layers(git_dir: &Path, with_env: bool) -> Result<Self> {
        let path = Self::path(git_dir);
        if !path.exists() {
            return Err(GraftError::not_initialized());
        }

        let mut builder = config::Config::builder().add_source(
            config::File::from(path.as_path())
                .format(config::FileFormat::Json)
                .required(false),
        );
        if with_env {
            builder = builder.add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );
        }
        let settings: RepoSettings = builder.build()?.try_deserialize()?;

        settings.validate()?;
        tracing::debug!("Loaded repo settings from {:?}", path);
        Ok(settings)
    }

    pub fn save(&self, git_dir: &Path) -> Result<()> {
        self.validate()?;
        std::fs::create_dir_all(graft_dir(git_dir))?;
        atomic_file::write_json(&Self::path(git_dir), self)
    }

    /// Update a configuration value by dotted key
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "trunk" => self.trunk = value.to_string(),
            "remote" => self.remote = value.to_string(),
            "no_verify" => self.no_verify = parse_bool(key, value)?,
            "restack.committer_date_is_author_date" => {
                self.restack.committer_date_is_author_date = parse_bool(key, value)?
            }
            "github.enabled" => self.github.enabled = parse_bool(key, value)?,
            "github.api_url" => self.github.api_url = value.to_string(),
            "github.owner" => self.github.owner = non_empty(value),
            "github.repo" => self.github.repo = non_empty(value),
            _ => return Err(GraftError::config(format!("Unknown config key: {key}"))),
        }
        self.validate()
    }

    /// Get a configuration value by dotted key
    pub fn get_value(&self, key: &str) -> Result<String> {
        let value = match key {
            "trunk" => self.trunk.clone(),
            "remote" => self.remote.clone(),
            "no_verify" => self.no_verify.to_string(),
            "restack.committer_date_is_author_date" => {
                self.restack.committer_date_is_author_date.to_string()
            }
            "github.enabled" => self.github.enabled.to_string(),
            "github.api_url" => self.github.api_url.clone(),
            "github.owner" => self.github.owner.clone().unwrap_or_default(),
            "github.repo" => self.github.repo.clone().unwrap_or_default(),
            _ => return Err(GraftError::config(format!("Unknown config key: {key}"))),
        };
        Ok(value)
    }

    pub fn validate(&self) -> Result<()> {
        if self.trunk.trim().is_empty() {
            return Err(GraftError::config("Trunk branch name cannot be empty"));
        }
        if self.remote.trim().is_empty() {
            return Err(GraftError::config("Remote name cannot be empty"));
        }
        if !self.github.api_url.starts_with("http://") && !self.github.api_url.starts_with("https://")
        {
            return Err(GraftError::config(
                "GitHub API URL must start with http:// or https://",
            ));
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    value
        .parse()
        .map_err(|_| GraftError::config(format!("Invalid boolean value for {key}: {value}")))
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    #[serial]
    fn test_save_and_load() {
        let tmp = TempDir::new().unwrap();
        assert!(!RepoSettings::is_initialized(tmp.path()));
        assert!(RepoSettings::load(tmp.path()).is_err());

        let mut settings = RepoSettings::for_trunk("develop");
        settings.github.owner = Some("octo".to_string());
        settings.save(tmp.path()).unwrap();

        assert!(RepoSettings::is_initialized(tmp.path()));
        assert_eq!(RepoSettings::load(tmp.path()).unwrap(), settings);
    }

    #[test]
    #[serial]
    fn test_environment_overrides_file() {
        let tmp = TempDir::new().unwrap();
        RepoSettings::for_trunk("main").save(tmp.path()).unwrap();

        std::env::set_var("GRAFT_TRUNK", "release");
        std::env::set_var("GRAFT_GITHUB__ENABLED", "false");
        let loaded = RepoSettings::load(tmp.path());
        std::env::remove_var("GRAFT_TRUNK");
        std::env::remove_var("GRAFT_GITHUB__ENABLED");

        let loaded = loaded.unwrap();
        assert_eq!(loaded.trunk, "release");
        assert!(!loaded.github.enabled);
        assert_eq!(loaded.remote, "origin");

        std::env::set_var("GRAFT_TRUNK", "release");
        let saved = RepoSettings::load_saved(tmp.path());
        std::env::remove_var("GRAFT_TRUNK");
        assert_eq!(saved.unwrap().trunk, "main");
    }

    #[test]
    fn test_set_and_get_values() {
        let mut settings = RepoSettings::default();
        settings.set_value("no_verify", "true").unwrap();
        settings.set_value("github.repo", "graft").unwrap();
        settings
            .set_value("restack.committer_date_is_author_date", "true")
            .unwrap();

        assert_eq!(settings.get_value("no_verify").unwrap(), "true");
        assert_eq!(settings.get_value("github.repo").unwrap(), "graft");
        assert!(settings.restack.committer_date_is_author_date);
        for key in RepoSettings::KEYS {
            assert!(settings.get_value(key).is_ok(), "{key}");
        }

        assert!(settings.set_value("no_verify", "maybe").is_err());
        assert!(settings.set_value("unknown.key", "x").is_err());
        assert!(settings.set_value("trunk", " ").is_err());
    }
}
