pub mod repository;
pub mod runner;

pub use repository::GitRepository;
pub use runner::{GitOutput, GitRunner};

use crate::errors::{GraftError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Outcome of any rebase-family invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebaseOutcome {
    Done,
    Conflict,
}

/// Outcome of a fast-forward pull
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    Done,
    Conflict,
}

/// How a checkout should behave
#[derive(Debug, Clone, Copy, Default)]
pub struct SwitchOptions {
    /// Create the branch at HEAD
    pub new: bool,
    /// Discard local changes
    pub force: bool,
    /// Check out the commit without a branch
    pub detach: bool,
}

/// Replay `(from, branch]` onto `onto`
#[derive(Debug, Clone)]
pub struct RebaseRequest {
    pub branch: String,
    pub onto: String,
    pub from: String,
    /// Resolve textual conflicts with the replayed commits' side
    pub favor_source: bool,
    pub committer_date_is_author_date: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CommitOptions {
    pub message: Option<String>,
    pub amend: bool,
    /// Stage every change, including untracked files, first
    pub all: bool,
    pub no_edit: bool,
    pub no_verify: bool,
}

#[derive(Debug, Clone)]
pub struct PushRequest {
    pub remote: String,
    pub branch: String,
    /// Plain force instead of force-with-lease
    pub force: bool,
    pub no_verify: bool,
}

/// A file touched between two revisions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub path: String,
    pub status: String,
}

/// The version-control backend as the branch graph sees it.
///
/// Queries are authoritative: the graph never second-guesses a revision or
/// ancestry answer from here. Mutating calls are blocking and never overlap.
pub trait RevisionSource {
    fn current_branch_name(&self) -> Option<String>;
    fn branch_names(&self) -> Result<Vec<String>>;
    /// Commit SHA of any revision expression; fails if it does not resolve
    fn sha(&self, reference: &str) -> Result<String>;
    /// First line of a commit's message
    fn commit_subject(&self, sha: &str) -> Result<String>;
    fn merge_base(&self, left: &str, right: &str) -> Result<String>;
    /// False when either side does not resolve
    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool>;

    fn switch_branch(&self, target: &str, opts: SwitchOptions) -> Result<()>;
    fn force_checkout_new_branch(&self, branch: &str, sha: &str) -> Result<()>;
    fn force_create_branch(&self, branch: &str, sha: &str) -> Result<()>;
    /// Rename the checked-out branch
    fn move_branch(&self, new_name: &str) -> Result<()>;
    fn delete_branch(&self, branch: &str) -> Result<()>;

    fn rebase(&self, request: &RebaseRequest) -> Result<RebaseOutcome>;
    fn rebase_interactive(&self, branch: &str, from: &str) -> Result<RebaseOutcome>;
    fn rebase_continue(&self) -> Result<RebaseOutcome>;
    fn rebase_abort(&self) -> Result<()>;
    fn rebase_in_progress(&self) -> bool;
    fn unmerged_files(&self) -> Result<Vec<String>>;
    /// Whether a commit would record anything. `include_unstaged` also counts
    /// worktree edits and untracked files, as `CommitOptions::all` stages them.
    fn has_changes_to_commit(&self, include_unstaged: bool) -> Result<bool>;

    fn commit(&self, opts: &CommitOptions) -> Result<()>;
    fn soft_reset(&self, sha: &str) -> Result<()>;
    fn mixed_reset(&self, sha: &str) -> Result<()>;
    fn hard_reset(&self, sha: &str) -> Result<()>;

    /// Commits in `(from, to]`, newest first; just `to` when `from` is absent
    fn commit_range(&self, from: Option<&str>, to: &str) -> Result<Vec<String>>;
    fn changed_files(&self, from: &str, to: &str) -> Result<Vec<ChangedFile>>;
    fn diff(&self, from: &str, to: &str) -> Result<String>;
    fn is_diff_empty(&self, from: &str, to: &str) -> Result<bool>;
    fn is_merged(&self, branch: &str, trunk: &str) -> Result<bool>;

    fn push_branch(&self, request: &PushRequest) -> Result<()>;
    fn pull_branch(&self, remote: &str, branch: &str) -> Result<PullOutcome>;
    fn prune_remote(&self, remote: &str) -> Result<()>;
    fn fetch_branch(&self, remote: &str, branch: &str) -> Result<()>;
    fn read_fetch_head(&self) -> Result<String>;
    fn write_fetch_base(&self, sha: &str) -> Result<()>;
    fn read_fetch_base(&self) -> Result<String>;
    fn set_remote_tracking(&self, remote: &str, branch: &str, sha: &str) -> Result<()>;
    fn populate_remote_shas(&self, remote: &str) -> Result<()>;
    fn remote_sha(&self, branch: &str) -> Option<String>;
    fn remote_url(&self, remote: &str) -> Result<String>;
}

/// Find the root of the Git repository
pub fn find_repository_root(start_path: &Path) -> Result<PathBuf> {
    let repo = git2::Repository::discover(start_path)?;

    let workdir = repo
        .workdir()
        .ok_or_else(|| GraftError::config("Repository has no working directory (bare repo?)"))?;

    Ok(workdir.to_path_buf())
}
