pub mod branch;
pub mod completions;
pub mod config;
pub mod init;
pub mod log;
pub mod remote;
pub mod restack;

use super::context::RepoContext;
use super::output::Output;
use crate::errors::{GraftError, Result};
use crate::stack::{
    restack_branches, Continuation, RestackReport, RestackResult, ScopeSpec, SyncFlow,
};

/// Report per-branch restack results
pub(crate) fn print_reports(reports: &[RestackReport]) {
    for report in reports {
        match &report.result {
            RestackResult::Done => Output::success(format!("Restacked {}", report.branch)),
            RestackResult::Unneeded => {
                Output::sub_item(format!("{} does not need a restack", report.branch))
            }
            RestackResult::Conflict { .. } => {}
        }
    }
}

/// Turn the end of a multi-branch workflow into the command's result. A
/// conflict saves the continuation and stops with `RebaseConflict`.
pub(crate) fn handle_flow(
    ctx: &RepoContext,
    flow: SyncFlow,
    conflicted: Option<String>,
) -> Result<()> {
    match flow {
        SyncFlow::Continue => Ok(()),
        SyncFlow::Abort(reason) => {
            Output::warning(reason);
            Err(GraftError::Killed)
        }
        SyncFlow::Conflict(continuation) => {
            continuation.save(&ctx.git_dir)?;
            let branch = conflicted
                .or_else(|| continuation.current_branch_override.clone())
                .or_else(|| ctx.engine.current_branch().map(str::to_string))
                .unwrap_or_default();
            let unmerged = ctx.engine.unmerged_files().unwrap_or_default();
            Output::rebase_conflict(&branch, &unmerged);
            Err(GraftError::RebaseConflict(branch))
        }
    }
}

/// Restack every tracked descendant of `branch`
pub(crate) fn restack_upstack(ctx: &mut RepoContext, branch: &str) -> Result<()> {
    let mut upstack = ctx.engine.get_relative_stack(branch, ScopeSpec::UPSTACK)?;
    upstack.retain(|name| name != branch);
    let (reports, flow) = restack_branches(&mut ctx.engine, &upstack)?;
    print_reports(&reports);
    handle_flow(ctx, flow, conflicted_branch(&reports))
}

/// The branch whose rebase stopped, if any
pub(crate) fn conflicted_branch(reports: &[RestackReport]) -> Option<String> {
    reports
        .iter()
        .find(|report| report.result.is_conflict())
        .map(|report| report.branch.clone())
}

/// The named branch, or the checked-out one
pub(crate) fn branch_or_current(ctx: &RepoContext, branch: Option<String>) -> Result<String> {
    match branch {
        Some(branch) => Ok(branch),
        None => ctx
            .engine
            .current_branch()
            .map(str::to_string)
            .ok_or(GraftError::Detached),
    }
}

/// Refuse to start new rebase work while an interrupted one is pending
pub(crate) fn ensure_nothing_pending(ctx: &RepoContext) -> Result<()> {
    if Continuation::exists(&ctx.git_dir) || ctx.engine.rebase_in_progress() {
        return Err(GraftError::preconditions(
            "A rebase is in progress; finish it with gf continue or gf abort",
        ));
    }
    Ok(())
}
