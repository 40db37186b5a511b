use super::engine::Engine;
use super::rebase::{ContinueResult, RestackResult};
use super::sync::{get_branches_from_remote, SyncFlow, SyncPrompter, SyncRequest};
use crate::errors::{GraftError, Result};
use crate::utils::atomic_file;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// What is left to do after a rebase stopped on a conflict
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Continuation {
    /// Branches to restack once the interrupted rebase finishes
    pub branches_to_restack: Vec<String>,
    /// Remote branches still to sync, trunk-ward first
    pub branches_to_sync: Vec<String>,
    /// Stake for the branch being rebased when it completes
    pub rebased_branch_base: String,
    /// Branch the user was on, restored when the work completes
    pub current_branch_override: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One branch's outcome within a multi-branch restack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestackReport {
    pub branch: String,
    pub result: RestackResult,
}

impl Continuation {
    pub fn new(rebased_branch_base: String, current_branch_override: Option<String>) -> Self {
        Self {
            branches_to_restack: Vec::new(),
            branches_to_sync: Vec::new(),
            rebased_branch_base,
            current_branch_override,
            created_at: Utc::now(),
        }
    }

    fn path(git_dir: &Path) -> PathBuf {
        git_dir.join("graft").join("continuation.json")
    }

    /// Save continuation state to disk
    pub fn save(&self, git_dir: &Path) -> Result<()> {
        let path = Self::path(git_dir);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        atomic_file::write_json(&path, self)?;

        debug!("Saved continuation to {:?}", path);
        Ok(())
    }

    /// Load continuation state from disk
    pub fn load(git_dir: &Path) -> Result<Self> {
        let path = Self::path(git_dir);
        if !path.exists() {
            return Err(GraftError::config(
                "No interrupted operation found. Nothing to continue.",
            ));
        }

        let json = std::fs::read_to_string(&path)
            .map_err(|e| GraftError::config(format!("Failed to read continuation: {e}")))?;
        let continuation: Self = serde_json::from_str(&json)
            .map_err(|e| GraftError::config(format!("Failed to parse continuation: {e}")))?;

        debug!("Loaded continuation from {:?}", path);
        Ok(continuation)
    }

    pub fn delete(git_dir: &Path) -> Result<()> {
        let path = Self::path(git_dir);
        if path.exists() {
            std::fs::remove_file(&path)
                .map_err(|e| GraftError::config(format!("Failed to delete continuation: {e}")))?;
            debug!("Deleted continuation");
        }
        Ok(())
    }

    pub fn exists(git_dir: &Path) -> bool {
        Self::path(git_dir).exists()
    }
}

/// Restack `branches` in order, stopping at the first conflict
pub fn restack_branches(
    engine: &mut Engine,
    branches: &[String],
) -> Result<(Vec<RestackReport>, SyncFlow)> {
    let mut reports = Vec::new();
    for (index, branch) in branches.iter().enumerate() {
        if engine.is_trunk(branch) {
            continue;
        }
        let result = engine.restack_branch(branch)?;
        if let RestackResult::Conflict {
            rebased_branch_base,
        } = &result
        {
            let mut continuation = Continuation::new(
                rebased_branch_base.clone(),
                engine.current_branch().map(str::to_string),
            );
            continuation.branches_to_restack = branches[index + 1..].to_vec();
            reports.push(RestackReport {
                branch: branch.clone(),
                result,
            });
            return Ok((reports, SyncFlow::Conflict(continuation)));
        }
        reports.push(RestackReport {
            branch: branch.clone(),
            result,
        });
    }
    Ok((reports, SyncFlow::Continue))
}

/// Finish the interrupted rebase, then whatever work the continuation left
/// pending: remaining sync branches first, then remaining restacks.
pub fn continue_from(
    engine: &mut Engine,
    prompter: &mut dyn SyncPrompter,
    continuation: Continuation,
) -> Result<(Option<String>, Vec<RestackReport>, SyncFlow)> {
    let branch_name = match engine.continue_rebase(&continuation.rebased_branch_base)? {
        ContinueResult::Conflict => {
            return Ok((None, Vec::new(), SyncFlow::Conflict(continuation)));
        }
        ContinueResult::Done { branch_name } => branch_name,
    };

    if !continuation.branches_to_sync.is_empty() {
        let flow = get_branches_from_remote(
            engine,
            prompter,
            SyncRequest {
                downstack: continuation.branches_to_sync.clone(),
                base: branch_name.clone(),
                force: false,
            },
        )?;
        match flow {
            SyncFlow::Continue => {}
            SyncFlow::Conflict(mut next) => {
                next.branches_to_restack
                    .extend(continuation.branches_to_restack);
                return Ok((Some(branch_name), Vec::new(), SyncFlow::Conflict(next)));
            }
            abort @ SyncFlow::Abort(_) => return Ok((Some(branch_name), Vec::new(), abort)),
        }
    }

    let (reports, flow) = restack_branches(engine, &continuation.branches_to_restack)?;
    Ok((Some(branch_name), reports, flow))
}
