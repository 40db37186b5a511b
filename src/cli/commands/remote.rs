use super::{branch_or_current, ensure_nothing_pending, handle_flow};
use crate::cli::context::RepoContext;
use crate::cli::output::Output;
use crate::cli::prompt::sync_prompter;
use crate::cli::ScopeArg;
use crate::errors::{GraftError, Result};
use crate::github::{
    resolve_downstack, submit_branches, sync_pr_info, SubmitAction, SubmitOptions,
};
use crate::stack::{get_branches_from_remote, PullResult, ScopeSpec, SyncRequest};
use crate::utils::spinner::Spinner;
use console::style;

/// Fetch `branch` and everything below it from the remote
pub async fn get(branch: &str, force: bool, interactive: bool) -> Result<()> {
    let mut ctx = RepoContext::open()?;
    let result = fetch_stack(&mut ctx, branch, force, interactive).await;
    ctx.finish(result)
}

async fn fetch_stack(
    ctx: &mut RepoContext,
    branch: &str,
    force: bool,
    interactive: bool,
) -> Result<()> {
    ensure_nothing_pending(ctx)?;
    let trunk = ctx.engine.trunk().to_string();

    let spinner = Spinner::new(format!("Pulling {trunk}"));
    let pulled = ctx.engine.pull_trunk();
    spinner.stop();
    match pulled? {
        PullResult::Done => Output::success(format!("Pulled {}", style(&trunk).cyan())),
        PullResult::Unneeded => Output::info(format!("{trunk} is up to date")),
        PullResult::Conflict if force => {
            ctx.engine.reset_trunk_to_remote()?;
            Output::warning(format!("Reset {trunk} to its remote version"));
        }
        PullResult::Conflict => Output::warning(format!(
            "{trunk} has diverged from the remote; pass --force to reset it"
        )),
    }

    let service = ctx.review_service()?;
    let downstack = match &service {
        Some(service) => {
            let spinner = Spinner::new(format!("Resolving the stack below {branch}"));
            let downstack = resolve_downstack(service, branch, &trunk).await;
            spinner.stop();
            downstack?
        }
        None => vec![branch.to_string()],
    };

    let mut prompter = sync_prompter(interactive);
    let flow = get_branches_from_remote(
        &mut ctx.engine,
        prompter.as_mut(),
        SyncRequest {
            downstack: downstack.clone(),
            base: trunk,
            force,
        },
    )?;
    handle_flow(ctx, flow, None)?;

    if let Some(service) = &service {
        sync_pr_info(&mut ctx.engine, service, &downstack).await?;
    }
    ctx.engine.checkout_branch(branch)?;
    Output::success(format!("Checked out {}", style(branch).cyan()));
    Ok(())
}

pub async fn submit(branch: Option<String>, scope: ScopeArg, options: SubmitOptions) -> Result<()> {
    let mut ctx = RepoContext::open()?;
    let result = submit_stack(&mut ctx, branch, scope, &options).await;
    ctx.finish(result)
}

async fn submit_stack(
    ctx: &mut RepoContext,
    branch: Option<String>,
    scope: ScopeArg,
    options: &SubmitOptions,
) -> Result<()> {
    let branch = branch_or_current(ctx, branch)?;
    let branches: Vec<String> = ctx
        .engine
        .get_relative_stack(&branch, scope.into())?
        .into_iter()
        .filter(|name| !ctx.engine.is_trunk(name))
        .collect();
    if branches.is_empty() {
        return Err(GraftError::preconditions("No branches to submit"));
    }
    let service = ctx.require_review_service()?;

    let spinner = Spinner::new(format!("Submitting {} branches", branches.len()));
    let outcomes = submit_branches(&mut ctx.engine, &service, &branches, options).await;
    spinner.stop();

    for outcome in outcomes? {
        let name = style(&outcome.branch).cyan();
        match outcome.action {
            SubmitAction::Created { number, url } => {
                Output::success(format!("{name}: created #{number} on {}", outcome.base));
                Output::sub_item(url);
            }
            SubmitAction::Updated { number, url } => {
                Output::success(format!("{name}: updated #{number} on {}", outcome.base));
                Output::sub_item(url);
            }
            SubmitAction::Unchanged => Output::info(format!("{name}: unchanged")),
            SubmitAction::Skipped => Output::info(format!("{name}: skipped, no pull request")),
            SubmitAction::WouldSubmit { existing: Some(number) } => {
                Output::info(format!("{name}: would update #{number} on {}", outcome.base))
            }
            SubmitAction::WouldSubmit { existing: None } => {
                Output::info(format!("{name}: would create a pull request on {}", outcome.base))
            }
        }
    }
    Ok(())
}

pub async fn pr_sync(all: bool) -> Result<()> {
    let mut ctx = RepoContext::open()?;
    let result = refresh_pr_info(&mut ctx, all).await;
    ctx.finish(result)
}

async fn refresh_pr_info(ctx: &mut RepoContext, all: bool) -> Result<()> {
    let branches: Vec<String> = if all {
        ctx.engine
            .all_branch_names()
            .into_iter()
            .filter(|name| ctx.engine.is_branch_tracked(name).unwrap_or(false))
            .collect()
    } else {
        let current = ctx.engine.current_branch_precondition()?;
        ctx.engine.get_relative_stack(&current, ScopeSpec::STACK)?
    };
    let service = ctx.require_review_service()?;

    let spinner = Spinner::new("Fetching pull request info");
    let linked = sync_pr_info(&mut ctx.engine, &service, &branches).await;
    spinner.stop();

    let linked = linked?;
    Output::success(format!("Refreshed {} pull requests", linked.len()));
    for pr in linked {
        Output::bullet(format!("{} #{} {}", pr.head_ref_name, pr.number, pr.state));
    }
    Ok(())
}

pub fn pr_open(branch: Option<String>) -> Result<()> {
    RepoContext::with(|ctx| {
        let branch = branch_or_current(ctx, branch)?;
        let url = ctx
            .engine
            .get_pr_info(&branch)
            .and_then(|pr| pr.url.clone())
            .ok_or_else(|| {
                GraftError::preconditions(format!(
                    "{branch} has no pull request; create one with gf submit"
                ))
            })?;
        open::that(&url)?;
        Output::success(format!("Opened {url}"));
        Ok(())
    })
}
