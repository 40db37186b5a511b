use super::branch_or_current;
use crate::cli::context::RepoContext;
use crate::cli::output::{pr_label, state_label, Output};
use crate::errors::Result;
use crate::stack::{BranchState, Engine};
use console::style;
use std::collections::BTreeSet;

const SHORT_SHA: usize = 8;

fn short(sha: &str) -> &str {
    &sha[..sha.len().min(SHORT_SHA)]
}

fn detail(engine: &Engine, name: &str) -> String {
    let mut parts = Vec::new();
    if let Ok(state) = engine.get_state(name) {
        let label = state_label(state, !engine.is_branch_fixed(name));
        if !label.is_empty() {
            parts.push(label);
        }
    }
    if let Some(label) = engine.get_pr_info(name).and_then(pr_label) {
        parts.push(label);
    }
    parts.join(" ")
}

fn print_tree(engine: &Engine, name: &str, depth: usize, seen: &mut BTreeSet<String>) {
    if !seen.insert(name.to_string()) {
        return;
    }
    let is_current = engine.current_branch() == Some(name);
    Output::tree_line(depth, name, is_current, &detail(engine, name));
    for child in engine.get_children(name) {
        print_tree(engine, &child, depth + 1, seen);
    }
}

/// Print the tracked tree rooted at trunk
pub fn log(all: bool) -> Result<()> {
    RepoContext::with(|ctx| {
        let engine = &ctx.engine;
        let mut seen = BTreeSet::new();
        print_tree(engine, engine.trunk(), 0, &mut seen);

        if all {
            let rest: Vec<String> = engine
                .all_branch_names()
                .into_iter()
                .filter(|name| !seen.contains(name))
                .collect();
            if !rest.is_empty() {
                Output::section("Not in the tree");
                for name in rest {
                    let is_current = engine.current_branch() == Some(name.as_str());
                    Output::tree_line(0, &name, is_current, &detail(engine, &name));
                }
            }
        }
        Ok(())
    })
}

/// Print what graft knows about one branch
pub fn info(branch: Option<String>, show_diff: bool) -> Result<()> {
    RepoContext::with(|ctx| {
        let name = branch_or_current(ctx, branch)?;
        let engine = &ctx.engine;
        let meta = engine.get_meta(&name)?;

        println!("{} {}", style(&name).cyan().bold(), style(detail(engine, &name)).dim());
        Output::sub_item(format!("revision {}", short(&meta.branch_revision)));
        match &meta.state {
            BranchState::Valid { parent } | BranchState::InvalidParent { parent } => {
                Output::sub_item(format!(
                    "parent {} (forked at {})",
                    style(&parent.parent_branch_name).cyan(),
                    short(&parent.parent_branch_revision)
                ));
            }
            BranchState::Trunk | BranchState::BadParentName => {}
        }
        let children = engine.get_children(&name);
        if !children.is_empty() {
            Output::sub_item(format!("children {}", children.join(", ")));
        }

        if let Some(pr) = engine.get_pr_info(&name) {
            Output::section("Pull request");
            if let Some(label) = pr_label(pr) {
                Output::bullet(label);
            }
            if let Some(title) = &pr.title {
                Output::bullet(title);
            }
            if let Some(url) = &pr.url {
                Output::bullet(style(url).underlined());
            }
        }

        if !meta.state.is_valid_or_trunk() {
            return Ok(());
        }

        Output::section("Commits");
        for sha in engine.get_all_commits(&name)? {
            Output::bullet(short(&sha));
        }

        if !meta.state.is_trunk() {
            let files = engine.get_changed_files(&name)?;
            if !files.is_empty() {
                Output::section("Changed files");
                for file in files {
                    Output::bullet(format!("{} {}", file.status, file.path));
                }
            }
        }

        if show_diff {
            println!();
            print!("{}", engine.get_diff(&name)?);
        }
        Ok(())
    })
}
