use super::{branch_or_current, restack_upstack};
use crate::cli::context::RepoContext;
use crate::cli::output::Output;
use crate::cli::prompt;
use crate::errors::{GraftError, Result};
use crate::git::CommitOptions;
use console::style;

const MAX_DERIVED_NAME_LEN: usize = 50;

pub fn track(branch: Option<String>, parent: Option<String>, interactive: bool) -> Result<()> {
    RepoContext::with(|ctx| {
        let branch = branch_or_current(ctx, branch)?;
        let parent = match parent {
            Some(parent) => parent,
            None => choose_parent(ctx, &branch, interactive)?,
        };
        ctx.engine.track_branch(&branch, &parent)?;
        Output::success(format!(
            "Tracking {} on {}",
            style(&branch).cyan(),
            style(&parent).cyan()
        ));
        Ok(())
    })
}

fn choose_parent(ctx: &RepoContext, branch: &str, interactive: bool) -> Result<String> {
    if !interactive {
        return Err(GraftError::preconditions(format!(
            "Pass --parent to choose a parent for {branch}"
        )));
    }
    let candidates: Vec<String> = ctx
        .engine
        .all_branch_names()
        .into_iter()
        .filter(|name| name != branch)
        .filter(|name| {
            ctx.engine
                .get_state(name)
                .is_ok_and(|state| state.is_valid_or_trunk())
        })
        .collect();
    // Suggest the branch it was cut from, falling back to trunk
    let default = candidates
        .iter()
        .position(|name| {
            !ctx.engine.is_trunk(name) && ctx.engine.is_descendant_of(branch, name).unwrap_or(false)
        })
        .or_else(|| candidates.iter().position(|name| ctx.engine.is_trunk(name)))
        .unwrap_or(0);
    prompt::select(&format!("Choose a parent for {branch}"), &candidates, default)?
        .map(|index| candidates[index].clone())
        .ok_or(GraftError::Killed)
}

pub fn untrack(branch: Option<String>) -> Result<()> {
    RepoContext::with(|ctx| {
        let branch = branch_or_current(ctx, branch)?;
        let descendants = ctx
            .engine
            .get_relative_stack(&branch, crate::stack::ScopeSpec::UPSTACK)?;
        ctx.engine.untrack_branch(&branch)?;
        Output::success(format!("Stopped tracking {}", style(&branch).cyan()));
        for descendant in descendants.iter().filter(|name| **name != branch) {
            Output::sub_item(format!("{descendant} is no longer tracked"));
        }
        Ok(())
    })
}

pub fn create(name: Option<String>, message: Option<String>, all: bool) -> Result<()> {
    RepoContext::with(|ctx| {
        let name = match (name, message.as_deref()) {
            (Some(name), _) => name,
            (None, Some(message)) => branch_name_from_message(message).ok_or_else(|| {
                GraftError::preconditions("Could not derive a branch name from the message")
            })?,
            (None, None) => {
                return Err(GraftError::preconditions(
                    "Provide a branch name or a commit message",
                ))
            }
        };
        let parent = ctx.engine.current_branch_precondition()?;
        let wants_commit = all || message.is_some();
        let has_changes = wants_commit && ctx.engine.has_changes_to_commit(all)?;
        ctx.engine.checkout_new_branch(&name)?;
        Output::success(format!(
            "Created {} on {}",
            style(&name).cyan(),
            style(&parent).cyan()
        ));
        if has_changes {
            ctx.engine.commit(CommitOptions {
                message,
                all,
                ..Default::default()
            })?;
        } else if wants_commit {
            Output::warning("Nothing to commit; the branch has no commits yet");
            Output::tip("Stage changes, or pass -a to include unstaged ones");
        }
        Ok(())
    })
}

pub fn unbranch() -> Result<()> {
    RepoContext::with(|ctx| {
        let current = ctx.engine.current_branch_precondition()?;
        ctx.engine.unbranch_current_branch()?;
        let parent = ctx.engine.current_branch().unwrap_or_default().to_string();
        Output::success(format!(
            "Deleted {}; its changes are unstaged on {}",
            style(&current).cyan(),
            style(&parent).cyan()
        ));
        Ok(())
    })
}

/// `fix: Handle empty input!` becomes `fix-handle-empty-input`
pub fn branch_name_from_message(message: &str) -> Option<String> {
    let subject = message.lines().next()?;
    let mut name = String::new();
    for c in subject.chars() {
        if c.is_ascii_alphanumeric() {
            name.push(c.to_ascii_lowercase());
        } else if !name.is_empty() && !name.ends_with('-') {
            name.push('-');
        }
    }
    name.truncate(MAX_DERIVED_NAME_LEN);
    let name = name.trim_end_matches('-').to_string();
    (!name.is_empty()).then_some(name)
}

pub fn checkout(branch: Option<String>, force: bool, interactive: bool) -> Result<()> {
    RepoContext::with(|ctx| {
        let branch = match branch {
            Some(branch) => branch,
            None if interactive => {
                let names = ctx.engine.all_branch_names();
                let default = ctx
                    .engine
                    .current_branch()
                    .and_then(|current| names.iter().position(|name| name == current))
                    .unwrap_or(0);
                let index = prompt::select("Checkout a branch", &names, default)?
                    .ok_or(GraftError::Killed)?;
                names[index].clone()
            }
            None => return Err(GraftError::preconditions("Name a branch to check out")),
        };
        if force {
            ctx.engine.force_checkout_branch(&branch)?;
        } else {
            ctx.engine.checkout_branch(&branch)?;
        }
        Output::success(format!("Checked out {}", style(&branch).cyan()));
        if ctx.engine.is_branch_tracked(&branch)? && !ctx.engine.is_branch_fixed(&branch) {
            Output::tip(format!("{branch} needs a restack (gf restack)"));
        }
        Ok(())
    })
}

pub fn rename(new_name: &str) -> Result<()> {
    RepoContext::with(|ctx| {
        let current = ctx.engine.current_branch_precondition()?;
        let had_pr = ctx
            .engine
            .get_pr_info(&current)
            .is_some_and(|pr| pr.number.is_some());
        ctx.engine.rename_current_branch(new_name)?;
        Output::success(format!(
            "Renamed {} to {}",
            style(&current).cyan(),
            style(new_name).cyan()
        ));
        if had_pr {
            Output::warning("The pull request of the old name is no longer linked");
        }
        Ok(())
    })
}

pub fn fold(keep: bool) -> Result<()> {
    RepoContext::with(|ctx| {
        let current = ctx.engine.current_branch_precondition()?;
        let parent = ctx.engine.get_parent_precondition(&current)?;
        ctx.engine.fold_current_branch(keep)?;
        let survivor = if keep { current.clone() } else { parent.clone() };
        Output::success(format!(
            "Folded {} into {}",
            style(&current).cyan(),
            style(&parent).cyan()
        ));
        restack_upstack(ctx, &survivor)
    })
}

pub fn delete(branch: Option<String>, force: bool, interactive: bool) -> Result<()> {
    RepoContext::with(|ctx| {
        let branch = branch_or_current(ctx, branch)?;
        if !force && !ctx.engine.is_merged_into_trunk(&branch)? {
            let confirmed = interactive
                && prompt::confirm(
                    &format!("{branch} is not merged into trunk. Delete it anyway?"),
                    false,
                )?;
            if !confirmed {
                return Err(GraftError::preconditions(format!(
                    "{branch} is not merged into trunk; pass --force to delete it"
                )));
            }
        }
        let children = ctx.engine.get_children(&branch);
        ctx.engine.delete_branch(&branch)?;
        Output::success(format!("Deleted {}", style(&branch).cyan()));
        if !children.is_empty() {
            Output::tip(format!(
                "{} moved to the deleted branch's parent; run gf restack to rebase them",
                children.join(", ")
            ));
        }
        Ok(())
    })
}

pub fn split(names: Vec<String>, points: Vec<usize>) -> Result<()> {
    RepoContext::with(|ctx| {
        let current = ctx.engine.current_branch_precondition()?;
        ctx.engine.apply_split_to_commits(&current, &names, &points)?;
        Output::success(format!("Split {} into:", style(&current).cyan()));
        for name in &names {
            Output::bullet(name);
        }
        Ok(())
    })
}

pub fn squash(message: Option<String>, no_edit: bool) -> Result<()> {
    RepoContext::with(|ctx| {
        let current = ctx.engine.current_branch_precondition()?;
        ctx.engine.squash_current_branch(message, no_edit)?;
        Output::success(format!("Squashed {}", style(&current).cyan()));
        restack_upstack(ctx, &current)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_name_from_message() {
        assert_eq!(
            branch_name_from_message("fix: Handle empty input!").as_deref(),
            Some("fix-handle-empty-input")
        );
        assert_eq!(
            branch_name_from_message("Add parser\n\nLong body").as_deref(),
            Some("add-parser")
        );
        assert_eq!(branch_name_from_message("!!!"), None);
        assert_eq!(branch_name_from_message(&"a".repeat(80)).map(|n| n.len()), Some(50));
    }
}
