use super::output::Output;
use crate::errors::{GraftError, Result};
use crate::stack::{NonInteractive, OverwriteReason, SyncChoice, SyncEvent, SyncPrompter};
use dialoguer::{theme::ColorfulTheme, Confirm, Select};

fn input_error(e: dialoguer::Error) -> GraftError {
    GraftError::config(format!("Input error: {e}"))
}

pub fn confirm(prompt: &str, default: bool) -> Result<bool> {
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(default)
        .interact()
        .map_err(input_error)
}

/// Pick one of `items`; `None` when the user escapes
pub fn select(prompt: &str, items: &[String], default: usize) -> Result<Option<usize>> {
    Select::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .items(items)
        .default(default.min(items.len().saturating_sub(1)))
        .interact_opt()
        .map_err(input_error)
}

/// Asks the user on the terminal how to reconcile each fetched branch
pub struct DialoguerPrompter;

impl SyncPrompter for DialoguerPrompter {
    fn confirm_overwrite(&mut self, branch: &str, reason: OverwriteReason) -> Result<bool> {
        let prompt = match reason {
            OverwriteReason::Untracked => {
                format!("{branch} exists locally but is not tracked. Overwrite it with the remote version?")
            }
            OverwriteReason::DifferentParent => {
                format!("{branch} is tracked on a different parent locally. Overwrite it with the remote version?")
            }
        };
        confirm(&prompt, false)
    }

    fn choose(&mut self, branch: &str) -> Result<SyncChoice> {
        let items = vec![
            "Rebase local commits onto the remote version".to_string(),
            "Overwrite with the remote version".to_string(),
            "Abort".to_string(),
        ];
        let choice = select(
            &format!("{branch} differs from the remote. What do you want to do?"),
            &items,
            0,
        )?;
        Ok(match choice {
            Some(0) => SyncChoice::Rebase,
            Some(1) => SyncChoice::Overwrite,
            _ => SyncChoice::Abort,
        })
    }

    fn report(&mut self, branch: &str, event: SyncEvent) {
        match event {
            SyncEvent::Synced => Output::success(format!("Synced {branch} from remote")),
            SyncEvent::UpToDate => Output::info(format!("{branch} is up to date")),
            SyncEvent::Rebased => {
                Output::success(format!("Rebased local commits of {branch} onto remote"))
            }
        }
    }
}

/// Prompter for the current session
pub fn sync_prompter(interactive: bool) -> Box<dyn SyncPrompter> {
    if interactive {
        Box::new(DialoguerPrompter)
    } else {
        Box::new(NonInteractive)
    }
}
