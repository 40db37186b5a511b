use crate::cli::context::{current_repository_root, RepoContext};
use crate::cli::output::Output;
use crate::cli::prompt;
use crate::config::RepoSettings;
use crate::errors::{GraftError, Result};
use crate::git::{GitRepository, RevisionSource};
use tracing::debug;

const TRUNK_CANDIDATES: [&str; 4] = ["main", "master", "develop", "trunk"];

/// Write the repo settings and (re)build the branch graph
pub fn run(
    trunk: Option<String>,
    remote: Option<String>,
    reset: bool,
    interactive: bool,
) -> Result<()> {
    let root = current_repository_root()?;
    let repo = GitRepository::open(&root)?;
    let git_dir = repo.git_dir().to_path_buf();

    let already_initialized = RepoSettings::is_initialized(&git_dir);
    let mut settings = if already_initialized {
        RepoSettings::load_saved(&git_dir)?
    } else {
        RepoSettings::default()
    };

    let branches = repo.branch_names()?;
    let trunk = match trunk {
        Some(trunk) => trunk,
        None if already_initialized => settings.trunk.clone(),
        None => detect_trunk(&repo, &branches, interactive)?,
    };
    if !branches.contains(&trunk) {
        return Err(GraftError::no_branch(trunk));
    }

    settings.trunk = trunk;
    if let Some(remote) = remote {
        settings.remote = remote;
    }
    settings.save(&git_dir)?;
    debug!("Saved settings to {:?}", RepoSettings::path(&git_dir));

    let mut ctx = RepoContext::open_at(&root, None)?;
    let result = if reset {
        ctx.engine.reset(None)
    } else {
        ctx.engine.rebuild(None)
    };
    let result = ctx.finish(result);
    if result.is_ok() {
        Output::success(format!(
            "Initialized graft with trunk {}",
            console::style(&settings.trunk).cyan()
        ));
        if reset {
            Output::sub_item("All branches are untracked");
        }
        Output::tip("Track an existing branch with:");
        Output::command_example("gf track <branch> --parent <parent>");
    }
    result
}

fn detect_trunk(repo: &GitRepository, branches: &[String], interactive: bool) -> Result<String> {
    if let Some(found) = TRUNK_CANDIDATES
        .iter()
        .find(|candidate| branches.iter().any(|b| b == *candidate))
    {
        return Ok(found.to_string());
    }
    if interactive && !branches.is_empty() {
        let default = repo
            .current_branch_name()
            .and_then(|current| branches.iter().position(|b| *b == current))
            .unwrap_or(0);
        if let Some(index) = prompt::select("Select your trunk branch", branches, default)? {
            return Ok(branches[index].clone());
        }
    }
    repo.current_branch_name().ok_or_else(|| {
        GraftError::config("Could not detect the trunk branch; pass --trunk")
    })
}
