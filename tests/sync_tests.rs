mod common;

use common::{BareRemote, TestRepo};
use graft_cli::stack::{
    continue_from, get_branches_from_remote, BranchState, NonInteractive, OverwriteReason,
    SyncChoice, SyncEvent, SyncFlow, SyncPrompter, SyncRequest,
};
use graft_cli::errors::Result;

/// Answers every prompt the same way and records what happened
struct Scripted {
    overwrite: bool,
    choice: SyncChoice,
    asked: Vec<(String, OverwriteReason)>,
    events: Vec<(String, SyncEvent)>,
}

impl Scripted {
    fn new(overwrite: bool, choice: SyncChoice) -> Self {
        Self {
            overwrite,
            choice,
            asked: Vec::new(),
            events: Vec::new(),
        }
    }
}

impl SyncPrompter for Scripted {
    fn confirm_overwrite(&mut self, branch: &str, reason: OverwriteReason) -> Result<bool> {
        self.asked.push((branch.to_string(), reason));
        Ok(self.overwrite)
    }

    fn choose(&mut self, _branch: &str) -> Result<SyncChoice> {
        Ok(self.choice)
    }

    fn report(&mut self, branch: &str, event: SyncEvent) {
        self.events.push((branch.to_string(), event));
    }
}

/// An author repository with `feat` and `feat-top` published, plus a fresh clone
struct Setup {
    author: TestRepo,
    clone: TestRepo,
    _remote: BareRemote,
}

impl Setup {
    fn new() -> Self {
        let author = TestRepo::new();
        author.commit_file("shared.txt", "base\n", "Add shared");
        let remote = BareRemote::seeded_from(&author);

        author.create_branch("feat");
        author.commit_file("feat.txt", "feat\n", "Add feat");
        author.create_branch("feat-top");
        author.commit_file("top.txt", "top\n", "Add top");
        author.git(&["push", "-q", "origin", "feat", "feat-top"]);

        let clone = TestRepo::clone_of(&remote);
        Self {
            author,
            clone,
            _remote: remote,
        }
    }

    fn request(branches: &[&str]) -> SyncRequest {
        SyncRequest {
            downstack: branches.iter().map(|b| b.to_string()).collect(),
            base: "main".to_string(),
            force: false,
        }
    }

    fn sync(&self, branches: &[&str], prompter: &mut dyn SyncPrompter) -> SyncFlow {
        let mut engine = self.clone.engine();
        let flow = get_branches_from_remote(&mut engine, prompter, Self::request(branches)).unwrap();
        engine.persist().unwrap();
        flow
    }
}

#[test]
fn test_fetches_new_stack() {
    let setup = Setup::new();
    let mut prompter = Scripted::new(false, SyncChoice::Abort);

    let flow = setup.sync(&["feat", "feat-top"], &mut prompter);

    assert_eq!(flow, SyncFlow::Continue);
    assert_eq!(
        prompter.events,
        vec![
            ("feat".to_string(), SyncEvent::Synced),
            ("feat-top".to_string(), SyncEvent::Synced)
        ]
    );
    let clone = &setup.clone;
    assert_eq!(clone.sha("feat"), setup.author.sha("feat"));
    assert_eq!(clone.sha("feat-top"), setup.author.sha("feat-top"));
    assert_eq!(clone.current_branch(), "feat-top");

    let engine = clone.engine();
    assert_eq!(engine.get_parent("feat").as_deref(), Some("main"));
    assert_eq!(engine.get_parent("feat-top").as_deref(), Some("feat"));
    assert_eq!(engine.get_base_revision("feat").unwrap(), clone.sha("main"));
    assert_eq!(engine.get_base_revision("feat-top").unwrap(), clone.sha("feat"));
    assert!(engine.is_branch_fixed("feat-top"));
    assert_eq!(clone.sha("origin/feat"), clone.sha("feat"));
}

#[test]
fn test_second_sync_is_up_to_date() {
    let setup = Setup::new();
    setup.sync(&["feat"], &mut NonInteractive);

    let mut prompter = Scripted::new(false, SyncChoice::Abort);
    let flow = setup.sync(&["feat"], &mut prompter);

    assert_eq!(flow, SyncFlow::Continue);
    assert_eq!(
        prompter.events,
        vec![("feat".to_string(), SyncEvent::UpToDate)]
    );
}

#[test]
fn test_rebase_keeps_local_commits_on_remote_head() {
    let setup = Setup::new();
    setup.sync(&["feat"], &mut NonInteractive);

    setup.author.checkout("feat");
    let remote_head = setup.author.commit_file("feat.txt", "feat v2\n", "Update feat");
    setup.author.git(&["push", "-q", "origin", "feat"]);
    setup.clone.commit_file("local.txt", "local\n", "Local work");

    let mut prompter = Scripted::new(false, SyncChoice::Rebase);
    let flow = setup.sync(&["feat"], &mut prompter);

    assert_eq!(flow, SyncFlow::Continue);
    assert_eq!(prompter.events, vec![("feat".to_string(), SyncEvent::Rebased)]);
    let clone = &setup.clone;
    clone.git(&["merge-base", "--is-ancestor", &remote_head, "feat"]);
    assert_eq!(clone.git(&["show", "feat:local.txt"]), "local");
    assert_eq!(clone.git(&["show", "feat:feat.txt"]), "feat v2");
    assert!(clone.engine().is_branch_fixed("feat"));
}

#[test]
fn test_abort_keeps_local_copy() {
    let setup = Setup::new();
    setup.sync(&["feat"], &mut NonInteractive);

    setup.author.checkout("feat");
    setup.author.commit_file("feat.txt", "feat v2\n", "Update feat");
    setup.author.git(&["push", "-q", "origin", "feat"]);
    let local = setup.clone.commit_file("local.txt", "local\n", "Local work");

    let flow = setup.sync(&["feat"], &mut NonInteractive);

    assert!(matches!(flow, SyncFlow::Abort(_)));
    assert_eq!(setup.clone.sha("feat"), local);
}

#[test]
fn test_untracked_local_branch_needs_confirmation() {
    let setup = Setup::new();
    let clone = &setup.clone;
    clone.create_branch("feat");
    let local = clone.commit_file("other.txt", "other\n", "Unrelated");
    clone.checkout("main");

    let mut declined = Scripted::new(false, SyncChoice::Abort);
    let flow = setup.sync(&["feat"], &mut declined);
    assert!(matches!(flow, SyncFlow::Abort(_)));
    assert_eq!(
        declined.asked,
        vec![("feat".to_string(), OverwriteReason::Untracked)]
    );
    assert_eq!(clone.sha("feat"), local);

    let mut accepted = Scripted::new(true, SyncChoice::Abort);
    let flow = setup.sync(&["feat"], &mut accepted);
    assert_eq!(flow, SyncFlow::Continue);
    assert_eq!(clone.sha("feat"), setup.author.sha("feat"));
    assert!(matches!(
        clone.engine().get_state("feat").unwrap(),
        BranchState::Valid { .. }
    ));
}

#[test]
fn test_force_overwrites_without_asking() {
    let setup = Setup::new();
    let clone = &setup.clone;
    clone.create_branch("feat");
    clone.commit_file("other.txt", "other\n", "Unrelated");
    clone.checkout("main");

    let mut engine = clone.engine();
    let mut prompter = Scripted::new(false, SyncChoice::Abort);
    let flow = get_branches_from_remote(
        &mut engine,
        &mut prompter,
        SyncRequest {
            force: true,
            ..Setup::request(&["feat"])
        },
    )
    .unwrap();

    assert_eq!(flow, SyncFlow::Continue);
    assert!(prompter.asked.is_empty());
    assert_eq!(clone.sha("feat"), setup.author.sha("feat"));
}

#[test]
fn test_conflicting_rebase_resumes_remaining_branches() {
    let setup = Setup::new();
    setup.sync(&["feat"], &mut NonInteractive);

    setup.author.checkout("feat");
    setup.author.commit_file("shared.txt", "remote\n", "Remote edit");
    setup.author.git(&["push", "-q", "origin", "feat"]);
    setup.clone.commit_file("shared.txt", "local\n", "Local edit");

    let mut prompter = Scripted::new(false, SyncChoice::Rebase);
    let flow = setup.sync(&["feat", "feat-top"], &mut prompter);
    let SyncFlow::Conflict(continuation) = flow else {
        panic!("expected a conflict, got {flow:?}");
    };
    assert_eq!(continuation.branches_to_sync, vec!["feat-top"]);
    assert_eq!(continuation.current_branch_override.as_deref(), Some("feat"));

    let clone = &setup.clone;
    clone.write("shared.txt", "merged\n");
    clone.git(&["add", "shared.txt"]);
    let mut options = clone.options();
    options.current_branch_override = continuation.current_branch_override.clone();
    let mut engine = clone.engine_with(options);

    let (finished, reports, flow) =
        continue_from(&mut engine, &mut NonInteractive, continuation).unwrap();

    assert_eq!(finished.as_deref(), Some("feat"));
    assert!(reports.is_empty());
    assert_eq!(flow, SyncFlow::Continue);
    assert_eq!(clone.git(&["show", "feat:shared.txt"]), "merged");
    assert_eq!(engine.get_parent("feat-top").as_deref(), Some("feat"));
    assert_eq!(clone.sha("feat-top"), setup.author.sha("feat-top"));
}
