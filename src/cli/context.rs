use crate::config::{cache_path, RepoSettings, UserSettings};
use crate::errors::{GraftError, Result};
use crate::git::{find_repository_root, GitRepository};
use crate::github::{parse_owner_repo, GitHubClient};
use crate::stack::{Continuation, Engine, EngineOptions, RefMetadataStore};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Everything a repository command works with: the loaded settings and an
/// engine over the current repository
pub struct RepoContext {
    pub git_dir: PathBuf,
    pub settings: RepoSettings,
    pub engine: Engine,
}

impl RepoContext {
    pub fn open() -> Result<Self> {
        Self::open_at(&current_repository_root()?, None)
    }

    /// Run a command body against the current repository and persist after
    pub fn with<T>(body: impl FnOnce(&mut RepoContext) -> Result<T>) -> Result<T> {
        let mut ctx = Self::open()?;
        let result = body(&mut ctx);
        ctx.finish(result)
    }

    /// Open with the saved continuation's branch treated as checked out
    pub fn open_resuming() -> Result<(Self, Continuation)> {
        let root = current_repository_root()?;
        let git_dir = GitRepository::open(&root)?.git_dir().to_path_buf();
        let continuation = Continuation::load(&git_dir)?;
        let context = Self::open_at(&root, continuation.current_branch_override.clone())?;
        Ok((context, continuation))
    }

    pub fn open_at(root: &Path, current_branch_override: Option<String>) -> Result<Self> {
        let repo = GitRepository::open(root)?;
        let git_dir = repo.git_dir().to_path_buf();
        let settings = RepoSettings::load(&git_dir)?;
        let store = RefMetadataStore::open(repo.path())?;

        let options = EngineOptions {
            trunk: settings.trunk.clone(),
            remote: settings.remote.clone(),
            no_verify: settings.no_verify,
            committer_date_is_author_date: settings.restack.committer_date_is_author_date,
            current_branch_override,
            snapshot_path: Some(cache_path(&git_dir)),
        };
        let engine = Engine::load(options, Box::new(repo), Box::new(store))?;
        Ok(Self {
            git_dir,
            settings,
            engine,
        })
    }

    /// Persist the engine after a command body ran.
    ///
    /// Expected stops (conflicts, user aborts) still persist; anything else
    /// drops the snapshot so the next run rebuilds from git.
    pub fn finish<T>(mut self, result: Result<T>) -> Result<T> {
        match &result {
            Err(e) if !e.is_expected_stop() => {
                debug!("Command failed, invalidating snapshot: {}", e);
                if let Err(invalidate_err) = self.engine.invalidate() {
                    warn!("Could not drop the branch snapshot: {}", invalidate_err);
                }
            }
            _ => {
                self.engine.persist()?;
            }
        }
        result
    }

    /// The configured GitHub client, or `None` when the integration is off
    pub fn review_service(&self) -> Result<Option<GitHubClient>> {
        let github = &self.settings.github;
        if !github.enabled {
            return Ok(None);
        }

        let (owner, repo) = match (&github.owner, &github.repo) {
            (Some(owner), Some(repo)) => (owner.clone(), repo.clone()),
            _ => {
                let url = self.engine.remote_url()?;
                let (owner, repo) = parse_owner_repo(&url).ok_or_else(|| {
                    GraftError::config(format!(
                        "Cannot derive owner/repo from remote URL {url}; set github.owner and github.repo"
                    ))
                })?;
                (
                    github.owner.clone().unwrap_or(owner),
                    github.repo.clone().unwrap_or(repo),
                )
            }
        };

        let token = UserSettings::load()?.github_token();
        if token.is_none() {
            warn!("No GitHub token found; set GITHUB_TOKEN for private repositories");
        }
        GitHubClient::new(&github.api_url, &owner, &repo, token.as_deref()).map(Some)
    }

    /// Like [`Self::review_service`] but fails when the integration is off
    pub fn require_review_service(&self) -> Result<GitHubClient> {
        self.review_service()?.ok_or_else(|| {
            GraftError::config("GitHub integration is disabled (github.enabled = false)")
        })
    }
}

pub fn current_repository_root() -> Result<PathBuf> {
    let current_dir = std::env::current_dir()
        .map_err(|e| GraftError::config(format!("Could not get current directory: {e}")))?;
    find_repository_root(&current_dir)
}
