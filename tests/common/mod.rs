#![allow(dead_code)]

use graft_cli::config::cache_path;
use graft_cli::git::GitRepository;
use graft_cli::stack::{Engine, EngineOptions, RefMetadataStore};
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// Throwaway repository with `main` holding one commit
pub struct TestRepo {
    pub dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let repo = TestRepo { dir };
        repo.git(&["init", "-q"]);
        repo.git(&["checkout", "-q", "-b", "main"]);
        configure(repo.path());
        repo.commit_file("README.md", "# Test Repository\n", "Initial commit");
        repo
    }

    /// A clone of `remote`'s bare repository, already initialized
    pub fn clone_of(remote: &BareRemote) -> Self {
        let dir = TempDir::new().unwrap();
        let output = Command::new("git")
            .args(["clone", "-q"])
            .arg(remote.path())
            .arg(dir.path())
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git clone failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        configure(dir.path());
        TestRepo { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn git_dir(&self) -> PathBuf {
        self.path().join(".git")
    }

    /// Run git and return trimmed stdout, panicking on failure
    pub fn git(&self, args: &[&str]) -> String {
        let output = self.git_unchecked(args);
        assert!(
            output.status.success(),
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    pub fn git_unchecked(&self, args: &[&str]) -> std::process::Output {
        Command::new("git")
            .args(args)
            .current_dir(self.path())
            .output()
            .unwrap()
    }

    pub fn write(&self, file: &str, content: &str) {
        std::fs::write(self.path().join(file), content).unwrap();
    }

    /// Commit `content` to `file` on the checked-out branch; returns the new SHA
    pub fn commit_file(&self, file: &str, content: &str, message: &str) -> String {
        self.write(file, content);
        self.git(&["add", file]);
        self.git(&["commit", "-q", "-m", message]);
        self.sha("HEAD")
    }

    pub fn sha(&self, rev: &str) -> String {
        self.git(&["rev-parse", rev])
    }

    pub fn checkout(&self, branch: &str) {
        self.git(&["checkout", "-q", branch]);
    }

    pub fn create_branch(&self, branch: &str) {
        self.git(&["checkout", "-q", "-b", branch]);
    }

    pub fn current_branch(&self) -> String {
        self.git(&["rev-parse", "--abbrev-ref", "HEAD"])
    }

    pub fn branch_exists(&self, branch: &str) -> bool {
        self.git_unchecked(&["rev-parse", "--verify", "-q", &format!("refs/heads/{branch}")])
            .status
            .success()
    }

    pub fn options(&self) -> EngineOptions {
        EngineOptions {
            snapshot_path: Some(cache_path(&self.git_dir())),
            ..EngineOptions::new("main")
        }
    }

    /// A fresh engine, as a new command invocation would load it
    pub fn engine(&self) -> Engine {
        self.engine_with(self.options())
    }

    pub fn engine_with(&self, options: EngineOptions) -> Engine {
        let repo = GitRepository::open(self.path()).unwrap();
        let store = RefMetadataStore::open(self.path()).unwrap();
        Engine::load(options, Box::new(repo), Box::new(store)).unwrap()
    }
}

/// Bare repository standing in for `origin`
pub struct BareRemote {
    pub dir: TempDir,
}

impl BareRemote {
    /// A bare remote seeded from `repo`'s `main`, added to `repo` as `origin`
    pub fn seeded_from(repo: &TestRepo) -> Self {
        let dir = TempDir::new().unwrap();
        let output = Command::new("git")
            .args(["init", "-q", "--bare", "-b", "main"])
            .arg(dir.path())
            .output()
            .unwrap();
        assert!(output.status.success());

        let remote = BareRemote { dir };
        repo.git(&["remote", "add", "origin", &remote.path().to_string_lossy()]);
        repo.git(&["push", "-q", "origin", "main"]);
        remote
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

fn configure(path: &Path) {
    for args in [
        ["config", "user.name", "Test User"],
        ["config", "user.email", "test@example.com"],
        ["config", "commit.gpgsign", "false"],
        ["config", "core.autocrlf", "false"],
    ] {
        let output = Command::new("git")
            .args(args)
            .current_dir(path)
            .output()
            .unwrap();
        assert!(output.status.success());
    }
}
