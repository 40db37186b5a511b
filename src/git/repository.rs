use super::{
    ChangedFile, CommitOptions, GitRunner, PullOutcome, PushRequest, RebaseOutcome,
    RebaseRequest, RevisionSource, SwitchOptions,
};
use crate::errors::{GraftError, Result};
use git2::{
    BranchType, Delta, DiffFormat, Oid, Repository, RepositoryState, ResetType, Sort, Status,
    StatusOptions,
};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const FETCH_BASE_REF: &str = "refs/graft/fetch-base";

/// Wrapper around git2::Repository plus the git executable
pub struct GitRepository {
    repo: Repository,
    path: PathBuf,
    runner: GitRunner,
    remote_shas: RefCell<HashMap<String, String>>,
}

impl GitRepository {
    /// Open a Git repository at the given path
    pub fn open(path: &Path) -> Result<Self> {
        let repo = Repository::discover(path)
            .map_err(|e| GraftError::config(format!("Not a git repository: {e}")))?;

        let workdir = repo
            .workdir()
            .ok_or_else(|| GraftError::config("Repository has no working directory"))?
            .to_path_buf();

        Ok(Self {
            repo,
            runner: GitRunner::new(&workdir),
            path: workdir,
            remote_shas: RefCell::new(HashMap::new()),
        })
    }

    /// Get repository path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The git directory of this worktree
    pub fn git_dir(&self) -> &Path {
        self.repo.path()
    }

    fn resolve_oid(&self, reference: &str) -> Result<Oid> {
        if let Ok(branch_ref) = self.repo.find_reference(&format!("refs/heads/{reference}")) {
            return Ok(branch_ref.peel_to_commit()?.id());
        }
        let object = self.repo.revparse_single(reference).map_err(|e| {
            GraftError::Git(git2::Error::from_str(&format!(
                "Could not resolve '{reference}': {}",
                e.message()
            )))
        })?;
        Ok(object.peel_to_commit()?.id())
    }

    fn reset(&self, sha: &str, kind: ResetType) -> Result<()> {
        let oid = self.resolve_oid(sha)?;
        let object = self.repo.find_object(oid, None)?;
        self.repo.reset(&object, kind, None)?;
        debug!("{:?} reset to {}", kind, sha);
        Ok(())
    }

    fn diff_between(&self, from: &str, to: &str) -> Result<git2::Diff<'_>> {
        let from_tree = self.repo.find_commit(self.resolve_oid(from)?)?.tree()?;
        let to_tree = self.repo.find_commit(self.resolve_oid(to)?)?.tree()?;
        Ok(self
            .repo
            .diff_tree_to_tree(Some(&from_tree), Some(&to_tree), None)?)
    }

    fn rebase_result(&self, succeeded: bool, command: &str, stderr: &str) -> Result<RebaseOutcome> {
        if self.rebase_in_progress() {
            return Ok(RebaseOutcome::Conflict);
        }
        if !succeeded {
            return Err(GraftError::git_command(command, stderr.trim()));
        }
        Ok(RebaseOutcome::Done)
    }
}

impl RevisionSource for GitRepository {
    fn current_branch_name(&self) -> Option<String> {
        match self.repo.head() {
            Ok(head) if head.is_branch() => head.shorthand().map(str::to_string),
            _ => None,
        }
    }

    fn branch_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for branch in self.repo.branches(Some(BranchType::Local))? {
            let (branch, _) = branch?;
            if let Some(name) = branch.name()? {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn sha(&self, reference: &str) -> Result<String> {
        Ok(self.resolve_oid(reference)?.to_string())
    }

    fn commit_subject(&self, sha: &str) -> Result<String> {
        let commit = self.repo.find_commit(self.resolve_oid(sha)?)?;
        Ok(commit.summary().unwrap_or_default().to_string())
    }

    fn merge_base(&self, left: &str, right: &str) -> Result<String> {
        let base = self
            .repo
            .merge_base(self.resolve_oid(left)?, self.resolve_oid(right)?)?;
        Ok(base.to_string())
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        let (Ok(ancestor), Ok(descendant)) =
            (self.resolve_oid(ancestor), self.resolve_oid(descendant))
        else {
            return Ok(false);
        };
        if ancestor == descendant {
            return Ok(true);
        }
        Ok(self.repo.graph_descendant_of(descendant, ancestor)?)
    }

    fn switch_branch(&self, target: &str, opts: SwitchOptions) -> Result<()> {
        let mut args = vec!["switch"];
        if opts.force {
            args.push("--discard-changes");
        }
        if opts.new {
            args.push("-c");
        }
        if opts.detach {
            args.push("--detach");
        }
        args.push(target);
        self.runner.run(&args)?;
        debug!("Switched to '{}'", target);
        Ok(())
    }

    fn force_checkout_new_branch(&self, branch: &str, sha: &str) -> Result<()> {
        self.runner.run(&["switch", "-C", branch, sha])?;
        info!("Reset and checked out '{}' at {}", branch, sha);
        Ok(())
    }

    fn force_create_branch(&self, branch: &str, sha: &str) -> Result<()> {
        let commit = self.repo.find_commit(self.resolve_oid(sha)?)?;
        self.repo.branch(branch, &commit, true)?;
        info!("Pointed branch '{}' at {}", branch, sha);
        Ok(())
    }

    fn move_branch(&self, new_name: &str) -> Result<()> {
        self.runner.run(&["branch", "-m", new_name])?;
        info!("Renamed current branch to '{}'", new_name);
        Ok(())
    }

    fn delete_branch(&self, branch: &str) -> Result<()> {
        let mut found = self.repo.find_branch(branch, BranchType::Local)?;
        found.delete()?;
        info!("Deleted branch '{}'", branch);
        Ok(())
    }

    fn rebase(&self, request: &RebaseRequest) -> Result<RebaseOutcome> {
        let mut args = vec!["rebase"];
        if request.committer_date_is_author_date {
            args.push("--committer-date-is-author-date");
        }
        if request.favor_source {
            // During a rebase "theirs" is the commit being replayed
            args.extend(["-X", "theirs"]);
        }
        args.extend([
            "--onto",
            request.onto.as_str(),
            request.from.as_str(),
            request.branch.as_str(),
        ]);

        let output = self.runner.run_unchecked(&args, &[])?;
        let outcome = self.rebase_result(output.success, &args.join(" "), &output.stderr)?;
        info!(
            "Rebased '{}' onto {} from {}: {:?}",
            request.branch, request.onto, request.from, outcome
        );
        Ok(outcome)
    }

    fn rebase_interactive(&self, branch: &str, from: &str) -> Result<RebaseOutcome> {
        let succeeded = self.runner.run_interactive(&["rebase", "-i", from, branch])?;
        self.rebase_result(succeeded, "rebase -i", "interactive rebase failed")
    }

    fn rebase_continue(&self) -> Result<RebaseOutcome> {
        let output = self
            .runner
            .run_unchecked(&["rebase", "--continue"], &[("GIT_EDITOR", "true")])?;
        self.rebase_result(output.success, "rebase --continue", &output.stderr)
    }

    fn rebase_abort(&self) -> Result<()> {
        self.runner.run(&["rebase", "--abort"])?;
        info!("Aborted rebase");
        Ok(())
    }

    fn rebase_in_progress(&self) -> bool {
        matches!(
            self.repo.state(),
            RepositoryState::Rebase
                | RepositoryState::RebaseInteractive
                | RepositoryState::RebaseMerge
                | RepositoryState::ApplyMailboxOrRebase
        )
    }

    fn unmerged_files(&self) -> Result<Vec<String>> {
        let mut index = self.repo.index()?;
        index.read(true)?;

        let mut conflicts = Vec::new();
        for conflict in index.conflicts()? {
            let conflict = conflict?;
            let entry = conflict.our.or(conflict.their).or(conflict.ancestor);
            if let Some(entry) = entry {
                if let Ok(path) = std::str::from_utf8(&entry.path) {
                    conflicts.push(path.to_string());
                }
            }
        }
        Ok(conflicts)
    }

    fn has_changes_to_commit(&self, include_unstaged: bool) -> Result<bool> {
        self.repo.index()?.read(true)?;
        let mut opts = StatusOptions::new();
        opts.include_untracked(include_unstaged)
            .recurse_untracked_dirs(include_unstaged);

        let staged = Status::INDEX_NEW
            | Status::INDEX_MODIFIED
            | Status::INDEX_DELETED
            | Status::INDEX_RENAMED
            | Status::INDEX_TYPECHANGE;
        let statuses = self.repo.statuses(Some(&mut opts))?;
        Ok(statuses.iter().any(|entry| {
            let status = entry.status();
            status.intersects(staged) || (include_unstaged && !status.is_ignored())
        }))
    }

    fn commit(&self, opts: &CommitOptions) -> Result<()> {
        if opts.all {
            self.runner.run(&["add", "-A"])?;
        }

        let mut args = vec!["commit"];
        if opts.amend {
            args.push("--amend");
        }
        if opts.no_edit {
            args.push("--no-edit");
        }
        if opts.no_verify {
            args.push("--no-verify");
        }
        if let Some(message) = opts.message.as_deref() {
            args.extend(["-m", message]);
            self.runner.run(&args)?;
        } else if opts.no_edit {
            self.runner.run(&args)?;
        } else if !self.runner.run_interactive(&args)? {
            return Err(GraftError::git_command(args.join(" "), "commit was not created"));
        }
        info!("Created commit");
        Ok(())
    }

    fn soft_reset(&self, sha: &str) -> Result<()> {
        self.reset(sha, ResetType::Soft)
    }

    fn mixed_reset(&self, sha: &str) -> Result<()> {
        self.reset(sha, ResetType::Mixed)
    }

    fn hard_reset(&self, sha: &str) -> Result<()> {
        self.reset(sha, ResetType::Hard)
    }

    fn commit_range(&self, from: Option<&str>, to: &str) -> Result<Vec<String>> {
        let to_oid = self.resolve_oid(to)?;
        let Some(from) = from else {
            return Ok(vec![to_oid.to_string()]);
        };

        let mut revwalk = self.repo.revwalk()?;
        revwalk.set_sorting(Sort::TOPOLOGICAL)?;
        revwalk.push(to_oid)?;
        revwalk.hide(self.resolve_oid(from)?)?;

        let mut commits = Vec::new();
        for oid in revwalk {
            commits.push(oid?.to_string());
        }
        Ok(commits)
    }

    fn changed_files(&self, from: &str, to: &str) -> Result<Vec<ChangedFile>> {
        let diff = self.diff_between(from, to)?;
        let files = diff
            .deltas()
            .filter_map(|delta| {
                let status = match delta.status() {
                    Delta::Added => "A",
                    Delta::Deleted => "D",
                    Delta::Modified => "M",
                    Delta::Renamed => "R",
                    Delta::Copied => "C",
                    Delta::Typechange => "T",
                    _ => "?",
                };
                delta
                    .new_file()
                    .path()
                    .or_else(|| delta.old_file().path())
                    .map(|path| ChangedFile {
                        path: path.to_string_lossy().to_string(),
                        status: status.to_string(),
                    })
            })
            .collect();
        Ok(files)
    }

    fn diff(&self, from: &str, to: &str) -> Result<String> {
        let diff = self.diff_between(from, to)?;
        let mut patch = String::new();
        diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
            if matches!(line.origin(), '+' | '-' | ' ') {
                patch.push(line.origin());
            }
            patch.push_str(&String::from_utf8_lossy(line.content()));
            true
        })?;
        Ok(patch)
    }

    fn is_diff_empty(&self, from: &str, to: &str) -> Result<bool> {
        Ok(self.diff_between(from, to)?.deltas().len() == 0)
    }

    fn is_merged(&self, branch: &str, trunk: &str) -> Result<bool> {
        if self.is_ancestor(branch, trunk)? {
            return Ok(true);
        }
        // Patch-equivalent commits already upstream show up with a '-'
        let cherry = self.runner.run(&["cherry", trunk, branch])?;
        Ok(!cherry.lines().any(|line| line.starts_with('+')))
    }

    fn push_branch(&self, request: &PushRequest) -> Result<()> {
        let mut args = vec!["push"];
        args.push(if request.force {
            "--force"
        } else {
            "--force-with-lease"
        });
        if request.no_verify {
            args.push("--no-verify");
        }
        args.extend([request.remote.as_str(), request.branch.as_str()]);
        self.runner.run(&args)?;
        info!("Pushed '{}' to {}", request.branch, request.remote);
        Ok(())
    }

    fn pull_branch(&self, remote: &str, branch: &str) -> Result<PullOutcome> {
        let args = ["pull", "--ff-only", remote, branch];
        let output = self.runner.run_unchecked(&args, &[])?;
        if output.success {
            return Ok(PullOutcome::Done);
        }
        if output.stderr.contains("fast-forward") {
            return Ok(PullOutcome::Conflict);
        }
        Err(GraftError::git_command(args.join(" "), output.stderr.trim()))
    }

    fn prune_remote(&self, remote: &str) -> Result<()> {
        self.runner.run(&["remote", "prune", remote])?;
        Ok(())
    }

    fn fetch_branch(&self, remote: &str, branch: &str) -> Result<()> {
        self.runner.run(&["fetch", "--no-tags", remote, branch])?;
        debug!("Fetched '{}' from {}", branch, remote);
        Ok(())
    }

    fn read_fetch_head(&self) -> Result<String> {
        self.runner
            .run(&["rev-parse", "--verify", "FETCH_HEAD^{commit}"])
    }

    fn write_fetch_base(&self, sha: &str) -> Result<()> {
        let oid = self.resolve_oid(sha)?;
        self.repo
            .reference(FETCH_BASE_REF, oid, true, "graft: fetch base")?;
        Ok(())
    }

    fn read_fetch_base(&self) -> Result<String> {
        self.sha(FETCH_BASE_REF)
    }

    fn set_remote_tracking(&self, remote: &str, branch: &str, sha: &str) -> Result<()> {
        let oid = self.resolve_oid(sha)?;
        self.repo.reference(
            &format!("refs/remotes/{remote}/{branch}"),
            oid,
            true,
            "graft: remote tracking",
        )?;
        let mut config = self.repo.config()?;
        config.set_str(&format!("branch.{branch}.remote"), remote)?;
        config.set_str(
            &format!("branch.{branch}.merge"),
            &format!("refs/heads/{branch}"),
        )?;
        Ok(())
    }

    fn populate_remote_shas(&self, remote: &str) -> Result<()> {
        let listing = self.runner.run(&["ls-remote", "--heads", remote])?;
        let mut shas = self.remote_shas.borrow_mut();
        shas.clear();
        for line in listing.lines() {
            if let Some((sha, name)) = line.split_once('\t') {
                if let Some(branch) = name.strip_prefix("refs/heads/") {
                    shas.insert(branch.to_string(), sha.to_string());
                }
            }
        }
        debug!("Loaded {} remote heads from {}", shas.len(), remote);
        Ok(())
    }

    fn remote_sha(&self, branch: &str) -> Option<String> {
        self.remote_shas.borrow().get(branch).cloned()
    }

    fn remote_url(&self, remote: &str) -> Result<String> {
        let remote = self.repo.find_remote(remote)?;
        let url = remote
            .url()
            .ok_or_else(|| GraftError::Git(git2::Error::from_str("Remote URL is not valid UTF-8")))?;
        Ok(url.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::TempDir;

    fn git(repo_path: &Path, args: &[&str]) -> String {
        let output = Command::new("git")
            .args(args)
            .current_dir(repo_path)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    fn create_test_repo() -> (TempDir, PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let repo_path = temp_dir.path().to_path_buf();

        git(&repo_path, &["init", "-q"]);
        git(&repo_path, &["checkout", "-q", "-b", "main"]);
        git(&repo_path, &["config", "user.name", "Test"]);
        git(&repo_path, &["config", "user.email", "test@test.com"]);
        git(&repo_path, &["config", "commit.gpgsign", "false"]);

        std::fs::write(repo_path.join("README.md"), "# Test").unwrap();
        git(&repo_path, &["add", "."]);
        git(&repo_path, &["commit", "-q", "-m", "Initial commit"]);

        (temp_dir, repo_path)
    }

    fn create_commit(repo_path: &Path, message: &str, filename: &str, content: &str) {
        std::fs::write(repo_path.join(filename), content).unwrap();
        git(repo_path, &["add", filename]);
        git(repo_path, &["commit", "-q", "-m", message]);
    }

    #[test]
    fn test_branch_queries() {
        let (_temp_dir, repo_path) = create_test_repo();
        let repo = GitRepository::open(&repo_path).unwrap();

        assert_eq!(repo.current_branch_name().as_deref(), Some("main"));
        let root = repo.sha("main").unwrap();

        git(&repo_path, &["checkout", "-q", "-b", "feature"]);
        create_commit(&repo_path, "Feature", "feature.rs", "fn main() {}\n");
        let tip = repo.sha("feature").unwrap();

        assert_eq!(repo.branch_names().unwrap(), vec!["feature", "main"]);
        assert_eq!(repo.merge_base("feature", "main").unwrap(), root);
        assert!(repo.is_ancestor(&root, &tip).unwrap());
        assert!(!repo.is_ancestor(&tip, &root).unwrap());
        assert!(!repo.is_ancestor("no-such-ref", &tip).unwrap());
        assert_eq!(repo.commit_range(Some(&root), &tip).unwrap(), vec![tip.clone()]);
        assert_eq!(repo.commit_range(None, &tip).unwrap(), vec![tip.clone()]);

        let files = repo.changed_files(&root, &tip).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "feature.rs");
        assert_eq!(files[0].status, "A");
        assert!(repo.diff(&root, &tip).unwrap().contains("+fn main() {}"));
        assert!(repo.is_diff_empty(&tip, "feature").unwrap());
    }

    #[test]
    fn test_detached_head_has_no_branch() {
        let (_temp_dir, repo_path) = create_test_repo();
        let repo = GitRepository::open(&repo_path).unwrap();
        let sha = repo.sha("main").unwrap();

        repo.switch_branch(&sha, SwitchOptions { detach: true, ..Default::default() })
            .unwrap();
        assert_eq!(repo.current_branch_name(), None);
    }

    #[test]
    fn test_rebase_conflict_is_reported_and_abortable() {
        let (_temp_dir, repo_path) = create_test_repo();
        let repo = GitRepository::open(&repo_path).unwrap();
        let base = repo.sha("main").unwrap();

        git(&repo_path, &["checkout", "-q", "-b", "feature"]);
        create_commit(&repo_path, "Feature edit", "README.md", "feature side\n");
        git(&repo_path, &["checkout", "-q", "main"]);
        create_commit(&repo_path, "Main edit", "README.md", "main side\n");

        let outcome = repo
            .rebase(&RebaseRequest {
                branch: "feature".to_string(),
                onto: "main".to_string(),
                from: base,
                favor_source: false,
                committer_date_is_author_date: false,
            })
            .unwrap();
        assert_eq!(outcome, RebaseOutcome::Conflict);
        assert!(repo.rebase_in_progress());
        assert_eq!(repo.unmerged_files().unwrap(), vec!["README.md"]);

        repo.rebase_abort().unwrap();
        assert!(!repo.rebase_in_progress());
        assert_eq!(repo.current_branch_name().as_deref(), Some("feature"));
    }

    #[test]
    fn test_rebase_favoring_source_resolves_conflicts() {
        let (_temp_dir, repo_path) = create_test_repo();
        let repo = GitRepository::open(&repo_path).unwrap();
        let base = repo.sha("main").unwrap();

        git(&repo_path, &["checkout", "-q", "-b", "feature"]);
        create_commit(&repo_path, "Feature edit", "README.md", "feature side\n");
        git(&repo_path, &["checkout", "-q", "main"]);
        create_commit(&repo_path, "Main edit", "README.md", "main side\n");

        let outcome = repo
            .rebase(&RebaseRequest {
                branch: "feature".to_string(),
                onto: "main".to_string(),
                from: base,
                favor_source: true,
                committer_date_is_author_date: false,
            })
            .unwrap();
        assert_eq!(outcome, RebaseOutcome::Done);
        let content = std::fs::read_to_string(repo_path.join("README.md")).unwrap();
        assert_eq!(content, "feature side\n");
        assert!(repo.is_ancestor("main", "feature").unwrap());
    }

    #[test]
    fn test_fetch_base_roundtrip_and_remote_tracking() {
        let (_temp_dir, repo_path) = create_test_repo();
        let repo = GitRepository::open(&repo_path).unwrap();
        let sha = repo.sha("main").unwrap();

        repo.write_fetch_base(&sha).unwrap();
        assert_eq!(repo.read_fetch_base().unwrap(), sha);

        repo.set_remote_tracking("origin", "main", &sha).unwrap();
        assert_eq!(repo.sha("refs/remotes/origin/main").unwrap(), sha);
    }

    #[test]
    fn test_resets_move_head_and_index() {
        let (_temp_dir, repo_path) = create_test_repo();
        let repo = GitRepository::open(&repo_path).unwrap();
        let root = repo.sha("main").unwrap();
        create_commit(&repo_path, "Second", "second.txt", "two\n");

        repo.soft_reset(&root).unwrap();
        assert_eq!(repo.sha("HEAD").unwrap(), root);
        assert_eq!(git(&repo_path, &["diff", "--cached", "--name-only"]), "second.txt");

        repo.mixed_reset(&root).unwrap();
        assert!(git(&repo_path, &["diff", "--cached", "--name-only"]).is_empty());
        assert!(repo_path.join("second.txt").exists());

        repo.hard_reset(&root).unwrap();
        assert!(git(&repo_path, &["status", "--porcelain", "--untracked-files=no"]).is_empty());
    }
}
