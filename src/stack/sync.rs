use super::continuation::Continuation;
use super::engine::Engine;
use super::rebase::RestackResult;
use crate::errors::Result;
use tracing::info;

/// How a multi-branch workflow ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncFlow {
    Continue,
    /// The user declined; nothing further was changed
    Abort(String),
    /// A rebase stopped; the continuation resumes the remaining work
    Conflict(Continuation),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncChoice {
    Rebase,
    Overwrite,
    Abort,
}

/// Why the local copy can only be overwritten
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwriteReason {
    /// A local branch of that name exists but is not tracked
    Untracked,
    /// The local branch is tracked on a different parent
    DifferentParent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    /// Checked out from the remote version
    Synced,
    UpToDate,
    /// Local commits were replayed onto the remote version
    Rebased,
}

/// User decisions during a sync
pub trait SyncPrompter {
    fn confirm_overwrite(&mut self, branch: &str, reason: OverwriteReason) -> Result<bool>;
    fn choose(&mut self, branch: &str) -> Result<SyncChoice>;
    fn report(&mut self, _branch: &str, _event: SyncEvent) {}
}

/// Declines every prompt
pub struct NonInteractive;

impl SyncPrompter for NonInteractive {
    fn confirm_overwrite(&mut self, _branch: &str, _reason: OverwriteReason) -> Result<bool> {
        Ok(false)
    }

    fn choose(&mut self, _branch: &str) -> Result<SyncChoice> {
        Ok(SyncChoice::Abort)
    }
}

#[derive(Debug, Clone)]
pub struct SyncRequest {
    /// Branches to fetch, trunk-ward first
    pub downstack: Vec<String>,
    /// Parent of the first branch
    pub base: String,
    /// Overwrite local copies without asking
    pub force: bool,
}

/// Fetch each branch of `downstack` in order and reconcile it with the local
/// copy. Each branch's parent is the branch handled just before it.
pub fn get_branches_from_remote(
    engine: &mut Engine,
    prompter: &mut dyn SyncPrompter,
    request: SyncRequest,
) -> Result<SyncFlow> {
    let mut parent = request.base;
    for (index, branch) in request.downstack.iter().enumerate() {
        engine.fetch_branch(branch, &parent)?;

        if request.force || !engine.branch_exists(branch) {
            engine.checkout_branch_from_fetched(branch, &parent)?;
            prompter.report(branch, SyncEvent::Synced);
        } else if !engine.is_branch_tracked(branch)? {
            if let Some(flow) =
                maybe_overwrite(engine, prompter, branch, &parent, OverwriteReason::Untracked)?
            {
                return Ok(flow);
            }
        } else if engine.get_parent_precondition(branch)? != parent {
            if let Some(flow) = maybe_overwrite(
                engine,
                prompter,
                branch,
                &parent,
                OverwriteReason::DifferentParent,
            )? {
                return Ok(flow);
            }
        } else if engine.branch_matches_fetched(branch)? {
            prompter.report(branch, SyncEvent::UpToDate);
        } else {
            match prompter.choose(branch)? {
                SyncChoice::Rebase => {
                    if let RestackResult::Conflict {
                        rebased_branch_base,
                    } = engine.rebase_branch_onto_fetched(branch)?
                    {
                        let mut continuation = Continuation::new(
                            rebased_branch_base,
                            engine.current_branch().map(str::to_string),
                        );
                        continuation.branches_to_sync = request.downstack[index + 1..].to_vec();
                        return Ok(SyncFlow::Conflict(continuation));
                    }
                    prompter.report(branch, SyncEvent::Rebased);
                }
                SyncChoice::Overwrite => {
                    engine.checkout_branch_from_fetched(branch, &parent)?;
                    prompter.report(branch, SyncEvent::Synced);
                }
                SyncChoice::Abort => {
                    return Ok(SyncFlow::Abort(format!("Kept local copy of {branch}")));
                }
            }
        }

        info!("Synced {} on {}", branch, parent);
        parent = branch.clone();
    }
    Ok(SyncFlow::Continue)
}

fn maybe_overwrite(
    engine: &mut Engine,
    prompter: &mut dyn SyncPrompter,
    branch: &str,
    parent: &str,
    reason: OverwriteReason,
) -> Result<Option<SyncFlow>> {
    if !prompter.confirm_overwrite(branch, reason)? {
        return Ok(Some(SyncFlow::Abort(format!(
            "Declined to overwrite local copy of {branch}"
        ))));
    }
    engine.checkout_branch_from_fetched(branch, parent)?;
    prompter.report(branch, SyncEvent::Synced);
    Ok(None)
}
