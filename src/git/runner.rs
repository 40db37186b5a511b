use crate::errors::{GraftError, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, trace};

/// Captured result of a git invocation that was allowed to fail
#[derive(Debug, Clone)]
pub struct GitOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Thin wrapper over the `git` executable for working-tree mutations and
/// network transport, which libgit2 either lacks or handles differently
/// from the user's own git (hooks, rebase state, credential helpers).
#[derive(Debug, Clone)]
pub struct GitRunner {
    workdir: PathBuf,
}

impl GitRunner {
    pub fn new(workdir: &Path) -> Self {
        Self {
            workdir: workdir.to_path_buf(),
        }
    }

    /// Run git and fail on a non-zero exit, returning trimmed stdout
    pub fn run(&self, args: &[&str]) -> Result<String> {
        let output = self.run_unchecked(args, &[])?;
        if !output.success {
            return Err(GraftError::git_command(
                args.join(" "),
                output.stderr.trim().to_string(),
            ));
        }
        Ok(output.stdout.trim().to_string())
    }

    /// Run git and hand back the outcome without judging it
    pub fn run_unchecked(&self, args: &[&str], envs: &[(&str, &str)]) -> Result<GitOutput> {
        debug!("git {}", args.join(" "));
        let mut command = Command::new("git");
        command
            .args(args)
            .current_dir(&self.workdir)
            .stdin(Stdio::null());
        for (key, value) in envs {
            command.env(key, value);
        }

        let output = command.output().map_err(|e| {
            GraftError::git_command(args.join(" "), format!("could not run git: {e}"))
        })?;

        let result = GitOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };
        trace!("git {} -> success={}", args.join(" "), result.success);
        Ok(result)
    }

    /// Run git attached to the terminal (editors, interactive rebase)
    pub fn run_interactive(&self, args: &[&str]) -> Result<bool> {
        debug!("git {} (interactive)", args.join(" "));
        let status = Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .status()
            .map_err(|e| {
                GraftError::git_command(args.join(" "), format!("could not run git: {e}"))
            })?;
        Ok(status.success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_run_reports_failures_with_command() {
        let tmp = TempDir::new().unwrap();
        let runner = GitRunner::new(tmp.path());

        let err = runner.run(&["rev-parse", "HEAD"]).unwrap_err();
        match err {
            GraftError::GitCommand { command, .. } => assert_eq!(command, "rev-parse HEAD"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_run_unchecked_passes_env() {
        let tmp = TempDir::new().unwrap();
        let runner = GitRunner::new(tmp.path());
        runner.run(&["init", "-q"]).unwrap();

        let output = runner
            .run_unchecked(&["var", "GIT_EDITOR"], &[("GIT_EDITOR", "true")])
            .unwrap();
        assert!(output.success);
        assert_eq!(output.stdout.trim(), "true");
    }
}
