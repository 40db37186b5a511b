use super::{
    branch_or_current, conflicted_branch, ensure_nothing_pending, handle_flow, print_reports,
    restack_upstack,
};
use crate::cli::context::RepoContext;
use crate::cli::output::Output;
use crate::cli::prompt::sync_prompter;
use crate::cli::ScopeArg;
use crate::errors::{GraftError, Result};
use crate::stack::{
    continue_from, restack_branches, Continuation, MoveResult, RestackResult, ScopeSpec, SyncFlow,
};
use console::style;

pub fn restack(branch: Option<String>, scope: ScopeArg) -> Result<()> {
    RepoContext::with(|ctx| {
        ensure_nothing_pending(ctx)?;
        let branch = branch_or_current(ctx, branch)?;
        let branches = ctx.engine.get_relative_stack(&branch, scope.into())?;
        let (reports, flow) = restack_branches(&mut ctx.engine, &branches)?;
        print_reports(&reports);
        handle_flow(ctx, flow, conflicted_branch(&reports))
    })
}

/// Interactive rebase of the current branch's own commits. A stop for
/// editing or a conflict is resumed with `gf continue`.
pub fn edit() -> Result<()> {
    RepoContext::with(|ctx| {
        ensure_nothing_pending(ctx)?;
        let branch = ctx.engine.current_branch_precondition()?;
        if ctx.engine.is_trunk(&branch) {
            return Err(GraftError::preconditions(format!(
                "Cannot edit the trunk branch {branch}"
            )));
        }
        let mut upstack = ctx.engine.get_relative_stack(&branch, ScopeSpec::UPSTACK)?;
        upstack.retain(|name| *name != branch);

        match ctx.engine.rebase_interactive(&branch)? {
            RestackResult::Conflict {
                rebased_branch_base,
            } => {
                let mut continuation =
                    Continuation::new(rebased_branch_base, Some(branch.clone()));
                continuation.branches_to_restack = upstack;
                handle_flow(ctx, SyncFlow::Conflict(continuation), Some(branch))
            }
            RestackResult::Done | RestackResult::Unneeded => {
                Output::success(format!("Edited {}", style(&branch).cyan()));
                restack_upstack(ctx, &branch)
            }
        }
    })
}

pub fn move_branch(source: Option<String>, onto: &str) -> Result<()> {
    RepoContext::with(|ctx| {
        ensure_nothing_pending(ctx)?;
        let source = match source {
            Some(source) => source,
            None => ctx.engine.current_branch_precondition()?,
        };
        match ctx.engine.move_branch(&source, onto)? {
            MoveResult::Done => {
                Output::success(format!(
                    "Moved {} onto {}",
                    style(&source).cyan(),
                    style(onto).cyan()
                ));
                restack_upstack(ctx, &source)
            }
            MoveResult::Conflict => {
                if ctx.engine.rebase_in_progress() {
                    ctx.engine.abort_rebase()?;
                }
                Err(GraftError::preconditions(format!(
                    "Could not replay {source} onto {onto}; nothing was changed"
                )))
            }
        }
    })
}

pub fn continue_rebase(interactive: bool) -> Result<()> {
    let (mut ctx, continuation) = RepoContext::open_resuming()?;
    let result = resume(&mut ctx, continuation, interactive);
    ctx.finish(result)
}

fn resume(ctx: &mut RepoContext, continuation: Continuation, interactive: bool) -> Result<()> {
    if !ctx.engine.rebase_in_progress() {
        return Err(GraftError::preconditions(
            "No rebase is in progress; run gf abort to discard the pending work",
        ));
    }
    let unmerged = ctx.engine.unmerged_files()?;
    if !unmerged.is_empty() {
        let branch = continuation
            .current_branch_override
            .clone()
            .unwrap_or_default();
        Output::rebase_conflict(&branch, &unmerged);
        return Err(GraftError::RebaseConflict(branch));
    }

    let mut prompter = sync_prompter(interactive);
    let (finished, reports, flow) =
        continue_from(&mut ctx.engine, prompter.as_mut(), continuation)?;
    if let Some(branch) = &finished {
        Output::success(format!("Finished rebasing {}", style(branch).cyan()));
    }
    print_reports(&reports);
    if !matches!(flow, SyncFlow::Conflict(_)) {
        Continuation::delete(&ctx.git_dir)?;
    }
    handle_flow(ctx, flow, conflicted_branch(&reports))
}

pub fn abort() -> Result<()> {
    RepoContext::with(|ctx| {
        if !ctx.engine.rebase_in_progress() && !Continuation::exists(&ctx.git_dir) {
            return Err(GraftError::preconditions("Nothing to abort"));
        }
        if ctx.engine.rebase_in_progress() {
            ctx.engine.abort_rebase()?;
        }
        Continuation::delete(&ctx.git_dir)?;
        Output::success("Aborted the interrupted rebase");
        Ok(())
    })
}
