use crate::cli::context::current_repository_root;
use crate::cli::output::Output;
use crate::cli::ConfigAction;
use crate::config::{RepoSettings, UserSettings};
use crate::errors::{GraftError, Result};
use crate::git::GitRepository;
use console::style;

/// Handle configuration commands
pub fn run(action: ConfigAction) -> Result<()> {
    if let ConfigAction::Token { token } = action {
        return save_token(token);
    }
    let root = current_repository_root()?;
    let git_dir = GitRepository::open(&root)?.git_dir().to_path_buf();
    if !RepoSettings::is_initialized(&git_dir) {
        return Err(GraftError::not_initialized());
    }
    match action {
        ConfigAction::Set { key, value } => {
            let mut settings = RepoSettings::load_saved(&git_dir)?;
            settings.set_value(&key, &value)?;
            settings.save(&git_dir)?;
            Output::success(format!("Configuration updated: {key} = {value}"));
            if key == "trunk" {
                Output::tip("Rebuild the branch graph on the new trunk with:");
                Output::command_example("gf init");
            }
        }
        ConfigAction::Get { key } => {
            println!("{}", RepoSettings::load(&git_dir)?.get_value(&key)?);
        }
        ConfigAction::List => {
            let settings = RepoSettings::load(&git_dir)?;
            Output::section("Repository configuration");
            for key in RepoSettings::KEYS {
                let value = settings.get_value(key)?;
                let value = if value.is_empty() {
                    style("(unset)".to_string()).dim()
                } else {
                    style(value).cyan()
                };
                println!("  {key} = {value}");
            }
        }
        ConfigAction::Token { .. } => {}
    }
    Ok(())
}

/// Tokens are per user, so this works outside a repository
fn save_token(token: String) -> Result<()> {
    let path = UserSettings::default_path()?;
    let mut user = UserSettings::load_from(&path)?;
    user.github_token = Some(token);
    user.save_to(&path)?;
    Output::success(format!("Saved GitHub token to {}", path.display()));
    Ok(())
}
