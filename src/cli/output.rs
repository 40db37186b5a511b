use crate::stack::{BranchState, PrInfo};
use console::style;
use std::fmt::Display;

/// Centralized output formatting for the CLI
pub struct Output;

impl Output {
    /// Print a success message with checkmark
    pub fn success<T: Display>(message: T) {
        println!("{} {}", style("✓").green(), message);
    }

    pub fn warning<T: Display>(message: T) {
        println!("{} {}", style("⚠").yellow(), message);
    }

    pub fn info<T: Display>(message: T) {
        println!("{} {}", style("ℹ").cyan(), message);
    }

    /// Print a sub-item with arrow prefix
    pub fn sub_item<T: Display>(message: T) {
        println!("  {} {}", style("→").dim(), message);
    }

    pub fn bullet<T: Display>(message: T) {
        println!("  {} {}", style("•").dim(), message);
    }

    pub fn section<T: Display>(title: T) {
        println!("\n{}", style(title).bold().underlined());
    }

    pub fn tip<T: Display>(message: T) {
        println!("{} {}", style("TIP:").cyan(), style(message).dim());
    }

    pub fn command_example<T: Display>(command: T) {
        println!("  {}", style(command).yellow());
    }

    /// One line of the branch tree
    pub fn tree_line(depth: usize, name: &str, is_current: bool, detail: &str) {
        let indent = "  ".repeat(depth);
        let marker = if is_current {
            style("◉").green().bold()
        } else {
            style("◯").dim()
        };
        let name = if is_current {
            style(name).green().bold()
        } else {
            style(name).cyan()
        };
        if detail.is_empty() {
            println!("{indent}{marker} {name}");
        } else {
            println!("{indent}{marker} {name} {}", style(detail).dim());
        }
    }

    /// Print how to get out of a stopped rebase
    pub fn rebase_conflict(branch: &str, unmerged: &[String]) {
        Self::warning(format!(
            "Hit a conflict while rebasing {}",
            style(branch).cyan()
        ));
        for file in unmerged {
            Self::bullet(file);
        }
        Self::tip("Resolve the conflicts, stage them, then run:");
        Self::command_example("gf continue");
        Self::tip("Or give up on the remaining work with:");
        Self::command_example("gf abort");
    }
}

/// Short annotation for a branch's state in listings
pub fn state_label(state: &BranchState, needs_restack: bool) -> String {
    match state {
        BranchState::Trunk => "(trunk)".to_string(),
        BranchState::Valid { .. } if needs_restack => "(needs restack)".to_string(),
        BranchState::Valid { .. } => String::new(),
        BranchState::InvalidParent { parent } => {
            format!("(diverged from {})", parent.parent_branch_name)
        }
        BranchState::BadParentName => "(untracked)".to_string(),
    }
}

pub fn pr_label(pr: &PrInfo) -> Option<String> {
    let number = pr.number?;
    let mut label = format!("#{number}");
    if let Some(state) = pr.state {
        label.push_str(&format!(" {state}"));
    }
    if pr.is_draft == Some(true) {
        label.push_str(" draft");
    }
    Some(label)
}
