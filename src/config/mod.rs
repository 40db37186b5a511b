pub mod settings;
pub mod user;

pub use settings::{GitHubSettings, RepoSettings, RestackSettings};
pub use user::UserSettings;

use std::path::{Path, PathBuf};

/// Directory under the git dir holding graft's own files
pub fn graft_dir(git_dir: &Path) -> PathBuf {
    git_dir.join("graft")
}

/// Where the branch map snapshot is kept
pub fn cache_path(git_dir: &Path) -> PathBuf {
    graft_dir(git_dir).join("cache.json")
}
