use super::{ReviewService, SubmitRequest, SubmitStatus};
use crate::errors::{GraftError, Result};
use crate::stack::Engine;
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    pub draft: bool,
    /// Report what would happen without pushing or calling the service
    pub dry_run: bool,
    /// Only touch branches that already have a PR
    pub update_only: bool,
    /// Push and update even when nothing changed; push with `--force`
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitAction {
    Created { number: u64, url: String },
    Updated { number: u64, url: String },
    Unchanged,
    /// `update_only` and the branch has no PR
    Skipped,
    /// Dry run; `existing` is the PR that would be updated
    WouldSubmit { existing: Option<u64> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub branch: String,
    pub base: String,
    pub action: SubmitAction,
}

fn validate(engine: &Engine, branches: &[String]) -> Result<()> {
    for branch in branches {
        if engine.is_trunk(branch) {
            return Err(GraftError::preconditions(format!(
                "Cannot submit the trunk branch {branch}"
            )));
        }
        engine.get_parent_precondition(branch)?;
        if !engine.is_branch_fixed(branch) {
            return Err(GraftError::preconditions(format!(
                "{branch} needs a restack before it can be submitted"
            )));
        }
        if engine.is_branch_empty(branch)? {
            return Err(GraftError::preconditions(format!(
                "{branch} has no changes to submit"
            )));
        }
    }
    Ok(())
}

/// Push `branches` (bottom first) and create or retarget their PRs so each
/// one's base is its parent
pub async fn submit_branches(
    engine: &mut Engine,
    service: &dyn ReviewService,
    branches: &[String],
    options: &SubmitOptions,
) -> Result<Vec<SubmitOutcome>> {
    validate(engine, branches)?;
    engine.populate_remote_shas()?;

    let mut outcomes = Vec::with_capacity(branches.len());
    for branch in branches {
        let base = engine.get_parent_precondition(branch)?;
        let pr_info = engine.get_pr_info(branch).cloned().unwrap_or_default();
        let existing = pr_info.number;

        let action = if existing.is_none() && options.update_only {
            SubmitAction::Skipped
        } else if existing.is_some()
            && !options.force
            && pr_info.base.as_deref() == Some(base.as_str())
            && engine.branch_matches_remote(branch)?
        {
            SubmitAction::Unchanged
        } else if options.dry_run {
            SubmitAction::WouldSubmit { existing }
        } else {
            engine.push_branch(branch, options.force)?;
            let title = match pr_info.title.clone() {
                Some(title) => title,
                None => engine
                    .get_commit_subject(branch)?
                    .unwrap_or_else(|| branch.clone()),
            };
            let response = service
                .submit_pull_request(SubmitRequest {
                    head: branch.clone(),
                    base: base.clone(),
                    title,
                    body: pr_info.body.clone(),
                    draft: options.draft,
                    number: existing,
                })
                .await?;
            engine.upsert_pr_info(branch, response.pr.to_pr_info())?;
            info!("{:?} PR #{} for {}", response.status, response.pr.number, branch);
            let (number, url) = (response.pr.number, response.pr.url);
            match response.status {
                SubmitStatus::Created => SubmitAction::Created { number, url },
                SubmitStatus::Updated => SubmitAction::Updated { number, url },
            }
        };

        debug!("{} -> {:?}", branch, action);
        outcomes.push(SubmitOutcome {
            branch: branch.clone(),
            base,
            action,
        });
    }
    Ok(outcomes)
}
