use super::cache::{validate_or_fix_parent_revision, CacheLoader};
use super::metadata::{BranchMetaMap, BranchState, CachedMeta, ParentLink, PrInfo};
use super::rebase::{ContinueResult, MoveResult, PullResult, RestackResult};
use super::scope::ScopeSpec;
use super::store::MetadataStore;
use crate::errors::{GraftError, Result};
use crate::git::{
    ChangedFile, CommitOptions, PullOutcome, PushRequest, RebaseOutcome, RebaseRequest,
    RevisionSource, SwitchOptions,
};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Settings an engine is opened with
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub trunk: String,
    pub remote: String,
    pub no_verify: bool,
    pub committer_date_is_author_date: bool,
    /// Branch to treat as checked out, e.g. when resuming mid-rebase
    pub current_branch_override: Option<String>,
    /// Where the branch map snapshot lives; `None` disables it
    pub snapshot_path: Option<PathBuf>,
}

impl EngineOptions {
    pub fn new<S: Into<String>>(trunk: S) -> Self {
        Self {
            trunk: trunk.into(),
            remote: "origin".to_string(),
            no_verify: false,
            committer_date_is_author_date: false,
            current_branch_override: None,
            snapshot_path: None,
        }
    }
}

/// The branch graph: owns the branch map for one command invocation and is
/// the only writer to the metadata store.
pub struct Engine {
    repo: Box<dyn RevisionSource>,
    store: Box<dyn MetadataStore>,
    loader: CacheLoader,
    branches: BranchMetaMap,
    current_branch: Option<String>,
    trunk: String,
    remote: String,
    no_verify: bool,
    committer_date_is_author_date: bool,
}

impl Engine {
    pub fn load(
        options: EngineOptions,
        repo: Box<dyn RevisionSource>,
        store: Box<dyn MetadataStore>,
    ) -> Result<Self> {
        let mut loader = CacheLoader::new(options.snapshot_path);
        let branches = loader.load(&options.trunk, repo.as_ref(), store.as_ref())?;
        let current_branch = options
            .current_branch_override
            .or_else(|| repo.current_branch_name());
        debug!(
            "Loaded {} branches (trunk {}, current {:?})",
            branches.len(),
            options.trunk,
            current_branch
        );

        Ok(Self {
            repo,
            store,
            loader,
            branches,
            current_branch,
            trunk: options.trunk,
            remote: options.remote,
            no_verify: options.no_verify,
            committer_date_is_author_date: options.committer_date_is_author_date,
        })
    }

    /// Write the branch map back if it changed since load
    pub fn persist(&mut self) -> Result<bool> {
        self.loader
            .persist(&self.trunk, &self.branches, self.store.as_ref())
    }

    /// Drop the snapshot after a failure left the map in an unknown state
    pub fn invalidate(&mut self) -> Result<()> {
        self.loader.invalidate()
    }

    /// Forget all parent records and reload, optionally with a new trunk
    pub fn reset(&mut self, new_trunk: Option<&str>) -> Result<()> {
        if let Some(trunk) = new_trunk {
            self.trunk = trunk.to_string();
        }
        self.loader.clear(self.store.as_ref())?;
        self.branches = self
            .loader
            .rebuild(&self.trunk, self.repo.as_ref(), self.store.as_ref())?;
        Ok(())
    }

    /// Reload from the store, optionally with a new trunk
    pub fn rebuild(&mut self, new_trunk: Option<&str>) -> Result<()> {
        if let Some(trunk) = new_trunk {
            self.trunk = trunk.to_string();
        }
        self.branches = self
            .loader
            .rebuild(&self.trunk, self.repo.as_ref(), self.store.as_ref())?;
        Ok(())
    }

    pub fn trunk(&self) -> &str {
        &self.trunk
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub fn remote_url(&self) -> Result<String> {
        self.repo.remote_url(&self.remote)
    }

    pub fn is_trunk(&self, name: &str) -> bool {
        name == self.trunk
    }

    pub fn branch_exists(&self, name: &str) -> bool {
        self.branches.contains_key(name)
    }

    pub fn all_branch_names(&self) -> Vec<String> {
        self.branches.keys().cloned().collect()
    }

    pub fn get_meta(&self, name: &str) -> Result<&CachedMeta> {
        self.branches
            .get(name)
            .ok_or_else(|| GraftError::no_branch(name))
    }

    pub fn get_state(&self, name: &str) -> Result<&BranchState> {
        Ok(&self.get_meta(name)?.state)
    }

    pub fn is_branch_tracked(&self, name: &str) -> Result<bool> {
        Ok(self.get_meta(name)?.state.is_valid())
    }

    /// Whether `parent`'s tip is where `name` forked from it
    pub fn is_descendant_of(&self, name: &str, parent: &str) -> Result<bool> {
        self.get_meta(name)?;
        let parent_revision = &self.get_meta(parent)?.branch_revision;
        Ok(name != parent && self.repo.merge_base(name, parent)? == *parent_revision)
    }

    pub fn current_branch(&self) -> Option<&str> {
        self.current_branch.as_deref()
    }

    /// The checked-out branch, which must be tracked or trunk
    pub fn current_branch_precondition(&self) -> Result<String> {
        let name = self.current_branch_or_detached()?;
        self.valid_or_trunk(&name)?;
        Ok(name)
    }

    pub fn rebase_in_progress(&self) -> bool {
        self.repo.rebase_in_progress()
    }

    pub fn unmerged_files(&self) -> Result<Vec<String>> {
        self.repo.unmerged_files()
    }

    pub fn has_changes_to_commit(&self, all: bool) -> Result<bool> {
        self.repo.has_changes_to_commit(all)
    }

    pub fn get_parent(&self, name: &str) -> Option<String> {
        self.branches
            .get(name)
            .and_then(|meta| meta.state.parent_name())
            .map(str::to_string)
    }

    pub fn get_parent_precondition(&self, name: &str) -> Result<String> {
        Ok(self.tracked(name)?.0.parent_branch_name)
    }

    /// Tracked children only
    pub fn get_children(&self, name: &str) -> Vec<String> {
        let Some(meta) = self.branches.get(name) else {
            return Vec::new();
        };
        meta.children
            .iter()
            .filter(|child| {
                self.branches
                    .get(child.as_str())
                    .is_some_and(|c| c.state.is_valid())
            })
            .cloned()
            .collect()
    }

    pub fn get_relative_stack(&self, name: &str, scope: ScopeSpec) -> Result<Vec<String>> {
        self.valid_or_trunk(name)?;
        let mut stack = Vec::new();
        if scope.recursive_parents {
            stack.extend(self.recursive_parents_excluding_trunk(name));
        }
        if scope.current_branch {
            stack.push(name.to_string());
        }
        if scope.recursive_children {
            stack.extend(self.recursive_children(name));
        }
        Ok(stack)
    }

    pub fn get_revision(&self, name: &str) -> Result<String> {
        Ok(self.get_meta(name)?.branch_revision.clone())
    }

    pub fn get_base_revision(&self, name: &str) -> Result<String> {
        Ok(self.tracked(name)?.0.parent_branch_revision)
    }

    /// The branch's own commits, newest first; just the tip for trunk
    pub fn get_all_commits(&self, name: &str) -> Result<Vec<String>> {
        let meta = self.valid_or_trunk(name)?;
        let base = meta
            .state
            .parent()
            .map(|parent| parent.parent_branch_revision.as_str());
        self.repo.commit_range(base, &meta.branch_revision)
    }

    /// Subject of the branch's oldest own commit
    pub fn get_commit_subject(&self, name: &str) -> Result<Option<String>> {
        match self.get_all_commits(name)?.last() {
            Some(oldest) => Ok(Some(self.repo.commit_subject(oldest)?)),
            None => Ok(None),
        }
    }

    pub fn get_changed_files(&self, name: &str) -> Result<Vec<ChangedFile>> {
        let meta = self.get_meta(name)?;
        let from = match &meta.state {
            BranchState::Valid { parent } => parent.parent_branch_revision.clone(),
            _ => format!("{name}~"),
        };
        self.repo.changed_files(&from, name)
    }

    pub fn get_diff(&self, name: &str) -> Result<String> {
        let meta = self.valid_or_trunk(name)?;
        let from = match meta.state.parent() {
            Some(parent) => parent.parent_branch_revision.clone(),
            None => format!("{name}~"),
        };
        self.repo.diff(&from, name)
    }

    pub fn get_pr_info(&self, name: &str) -> Option<&PrInfo> {
        self.branches
            .get(name)
            .filter(|meta| !meta.state.is_trunk())
            .and_then(|meta| meta.pr_info.as_ref())
    }

    /// Merge `update` into the branch's PR info; ignored for untracked branches
    pub fn upsert_pr_info(&mut self, name: &str, update: PrInfo) -> Result<()> {
        let Some(meta) = self.branches.get(name).filter(|m| m.state.is_valid()) else {
            return Ok(());
        };
        let mut pr_info = meta.pr_info.clone().unwrap_or_default();
        pr_info.merge(update);
        let (state, revision) = (meta.state.clone(), meta.branch_revision.clone());
        self.update_meta(name, state, revision, Some(pr_info))
    }

    pub fn clear_pr_info(&mut self, name: &str) -> Result<()> {
        let Some(meta) = self.branches.get(name).filter(|m| m.state.is_valid()) else {
            return Ok(());
        };
        let (state, revision) = (meta.state.clone(), meta.branch_revision.clone());
        self.update_meta(name, state, revision, None)
    }

    pub fn track_branch(&mut self, name: &str, parent: &str) -> Result<()> {
        self.validate_new_parent(name, parent)?;
        let meta = self.get_meta(name)?.clone();
        self.valid_or_trunk(parent)?;

        let stake = self.repo.merge_base(name, parent)?;
        info!("Tracking {} on {} at {}", name, parent, stake);
        self.update_meta(
            name,
            BranchState::Valid {
                parent: ParentLink::new(parent, stake),
            },
            meta.branch_revision,
            meta.pr_info,
        )
    }

    /// Drop the branch's parent record; tracked descendants become INVALID_PARENT
    pub fn untrack_branch(&mut self, name: &str) -> Result<()> {
        let (parent, meta) = self.tracked(name)?;
        self.store.delete(name)?;
        if let Some(parent_meta) = self.branches.get_mut(&parent.parent_branch_name) {
            parent_meta.remove_child(name);
        }
        if let Some(entry) = self.branches.get_mut(name) {
            entry.state = BranchState::BadParentName;
        }

        let mut pending = meta.children;
        while let Some(child) = pending.pop() {
            let Some(child_meta) = self.branches.get_mut(&child) else {
                continue;
            };
            if let BranchState::Valid { parent } = &child_meta.state {
                child_meta.state = BranchState::InvalidParent {
                    parent: parent.clone(),
                };
            }
            pending.extend(child_meta.children.iter().cloned());
        }
        info!("Untracked {}", name);
        Ok(())
    }

    pub fn set_parent(&mut self, name: &str, parent: &str) -> Result<()> {
        self.validate_new_parent(name, parent)?;
        let (old_parent, meta) = self.tracked(name)?;
        if old_parent.parent_branch_name == parent {
            return Ok(());
        }
        self.valid_or_trunk(parent)?;

        self.update_meta(
            name,
            BranchState::Valid {
                parent: ParentLink::new(parent, old_parent.parent_branch_revision),
            },
            meta.branch_revision,
            meta.pr_info,
        )
    }

    pub fn checkout_new_branch(&mut self, name: &str) -> Result<()> {
        let parent = self.current_branch_or_detached()?;
        let parent_revision = self.valid_or_trunk(&parent)?.branch_revision.clone();
        self.validate_new_parent(name, &parent)?;

        self.repo.switch_branch(
            name,
            SwitchOptions {
                new: true,
                ..Default::default()
            },
        )?;
        self.update_meta(
            name,
            BranchState::Valid {
                parent: ParentLink::new(&parent, &parent_revision),
            },
            parent_revision,
            None,
        )?;
        self.current_branch = Some(name.to_string());
        Ok(())
    }

    pub fn checkout_branch(&mut self, name: &str) -> Result<()> {
        if self.current_branch.as_deref() == Some(name) {
            return Ok(());
        }
        self.get_meta(name)?;
        self.repo.switch_branch(name, SwitchOptions::default())?;
        self.current_branch = Some(name.to_string());
        Ok(())
    }

    /// Check out a branch, discarding local changes
    pub fn force_checkout_branch(&mut self, name: &str) -> Result<()> {
        self.get_meta(name)?;
        self.repo.switch_branch(
            name,
            SwitchOptions {
                force: true,
                ..Default::default()
            },
        )?;
        self.current_branch = Some(name.to_string());
        Ok(())
    }

    pub fn rename_current_branch(&mut self, new_name: &str) -> Result<()> {
        let current = self.current_branch_or_detached()?;
        if new_name == current {
            return Ok(());
        }
        if self.branch_exists(new_name) {
            return Err(GraftError::preconditions(format!(
                "Cannot rename {current} to {new_name}: {new_name} already exists"
            )));
        }
        let (parent, meta) = self.tracked(&current)?;

        self.repo.move_branch(new_name)?;
        // PRs are bound to the old head name
        self.update_meta(
            new_name,
            BranchState::Valid {
                parent: parent.clone(),
            },
            meta.branch_revision,
            None,
        )?;
        for child in &meta.children {
            self.reparent(child, new_name)?;
        }

        if let Some(parent_meta) = self.branches.get_mut(&parent.parent_branch_name) {
            parent_meta.remove_child(&current);
        }
        self.branches.remove(&current);
        self.store.delete(&current)?;
        self.current_branch = Some(new_name.to_string());
        info!("Renamed {} to {}", current, new_name);
        Ok(())
    }

    /// Merge the current branch with its parent. With `keep` the current
    /// branch survives and takes over the parent's place; otherwise the
    /// parent absorbs the current branch's commits.
    pub fn fold_current_branch(&mut self, keep: bool) -> Result<()> {
        let current = self.current_branch_or_detached()?;
        let (parent_link, meta) = self.tracked(&current)?;
        let parent = parent_link.parent_branch_name;
        let (grandparent_link, parent_meta) = self.tracked(&parent)?;

        if keep {
            self.update_meta(
                &current,
                BranchState::Valid {
                    parent: grandparent_link,
                },
                meta.branch_revision,
                meta.pr_info,
            )?;
            for sibling in parent_meta.children.iter().filter(|c| **c != current) {
                self.reparent(sibling, &current)?;
            }
            self.delete_all_branch_data(&parent)?;
        } else {
            self.repo
                .force_checkout_new_branch(&parent, &meta.branch_revision)?;
            self.update_meta(
                &parent,
                BranchState::Valid {
                    parent: grandparent_link,
                },
                meta.branch_revision.clone(),
                parent_meta.pr_info,
            )?;
            for child in &meta.children {
                self.reparent(child, &parent)?;
            }
            self.checkout_branch(&parent)?;
            self.delete_all_branch_data(&current)?;
        }
        info!("Folded {} into {} (keep: {})", current, parent, keep);
        Ok(())
    }

    /// Delete a branch, handing its children to its parent
    pub fn delete_branch(&mut self, name: &str) -> Result<()> {
        let (parent, meta) = self.tracked(name)?;
        if self.current_branch.as_deref() == Some(name) {
            self.checkout_branch(&parent.parent_branch_name)?;
        }
        for child in &meta.children {
            self.reparent(child, &parent.parent_branch_name)?;
        }
        self.delete_all_branch_data(name)
    }

    pub fn commit(&mut self, opts: CommitOptions) -> Result<()> {
        let branch = self.current_branch_or_detached()?;
        self.tracked(&branch)?;
        self.repo.commit(&CommitOptions {
            no_verify: opts.no_verify || self.no_verify,
            ..opts
        })?;
        self.refresh_revision(&branch)
    }

    /// Collapse the current branch's commits into one
    pub fn squash_current_branch(&mut self, message: Option<String>, no_edit: bool) -> Result<()> {
        let branch = self.current_branch_or_detached()?;
        let (parent, meta) = self.tracked(&branch)?;
        let commits = self
            .repo
            .commit_range(Some(&parent.parent_branch_revision), &meta.branch_revision)?;
        let Some(oldest) = commits.last() else {
            return Err(GraftError::preconditions(format!(
                "{branch} has no commits to squash"
            )));
        };

        self.repo.soft_reset(oldest)?;
        let committed = self.repo.commit(&CommitOptions {
            message,
            amend: true,
            no_edit,
            no_verify: self.no_verify,
            ..Default::default()
        });
        if let Err(e) = committed {
            if let Err(reset_err) = self.repo.soft_reset(&meta.branch_revision) {
                warn!("Could not restore {} after failed squash: {}", branch, reset_err);
            }
            return Err(e);
        }
        self.refresh_revision(&branch)
    }

    /// Delete the current branch but keep its changes, unstaged, on top of
    /// its parent
    pub fn unbranch_current_branch(&mut self) -> Result<()> {
        let branch = self.current_branch_or_detached()?;
        let (parent, meta) = self.tracked(&branch)?;
        if !meta.children.is_empty() {
            return Err(GraftError::preconditions(format!(
                "{branch} has children ({}); move or delete them first",
                meta.children.join(", ")
            )));
        }
        let parent_revision = self.get_meta(&parent.parent_branch_name)?.branch_revision.clone();

        self.repo.switch_branch(
            &meta.branch_revision,
            SwitchOptions {
                detach: true,
                ..Default::default()
            },
        )?;
        self.current_branch = None;
        self.delete_all_branch_data(&branch)?;
        self.repo.mixed_reset(&parent_revision)?;
        self.repo
            .switch_branch(&parent.parent_branch_name, SwitchOptions::default())?;
        self.current_branch = Some(parent.parent_branch_name.clone());
        info!("Unbranched {} onto {}", branch, parent.parent_branch_name);
        Ok(())
    }

    /// Turn `branch_to_split` into a chain of branches.
    ///
    /// `branch_points` count commits back from the branch's recorded tip and
    /// must start at 0 and strictly increase; `branch_names[i]` is the name for
    /// the i-th piece counting from the parent side.
    pub fn apply_split_to_commits(
        &mut self,
        branch_to_split: &str,
        branch_names: &[String],
        branch_points: &[usize],
    ) -> Result<()> {
        if branch_names.is_empty() || branch_names.len() != branch_points.len() {
            return Err(GraftError::preconditions(format!(
                "Invalid number of branch names for splitting {branch_to_split}"
            )));
        }
        let (parent, meta) = self.tracked(branch_to_split)?;
        self.validate_split(branch_to_split, &parent, &meta, branch_names, branch_points)?;

        // Force-updating the checked-out branch is refused, so work detached
        self.repo.switch_branch(
            &meta.branch_revision,
            SwitchOptions {
                detach: true,
                ..Default::default()
            },
        )?;

        let mut last = parent;
        for (name, point) in branch_names.iter().zip(branch_points.iter().rev()) {
            let revision = self
                .repo
                .sha(&format!("{}~{}", meta.branch_revision, point))?;
            self.repo.force_create_branch(name, &revision)?;
            let pr_info = if name == branch_to_split {
                meta.pr_info.clone()
            } else {
                None
            };
            self.update_meta(
                name,
                BranchState::Valid {
                    parent: last.clone(),
                },
                revision.clone(),
                pr_info,
            )?;
            last = ParentLink::new(name, revision);
        }

        let tip = last.parent_branch_name;
        if tip != branch_to_split {
            for child in &meta.children {
                self.reparent(child, &tip)?;
            }
        }
        if !branch_names.iter().any(|name| name == branch_to_split) {
            self.delete_all_branch_data(branch_to_split)?;
        }
        self.repo.switch_branch(&tip, SwitchOptions::default())?;
        self.current_branch = Some(tip);
        info!("Split {} into {:?}", branch_to_split, branch_names);
        Ok(())
    }

    pub fn is_branch_fixed(&self, name: &str) -> bool {
        match self.branches.get(name).map(|meta| &meta.state) {
            Some(BranchState::Trunk) => true,
            Some(BranchState::Valid { parent }) => self
                .branches
                .get(&parent.parent_branch_name)
                .is_some_and(|p| p.branch_revision == parent.parent_branch_revision),
            _ => false,
        }
    }

    /// Replay the branch's own commits onto its parent's current revision
    pub fn restack_branch(&mut self, name: &str) -> Result<RestackResult> {
        self.valid_or_trunk(name)?;
        if self.is_branch_fixed(name) {
            return Ok(RestackResult::Unneeded);
        }
        let (parent, _) = self.tracked(name)?;
        let new_base = self.get_meta(&parent.parent_branch_name)?.branch_revision.clone();

        let outcome = self.repo.rebase(&RebaseRequest {
            branch: name.to_string(),
            onto: new_base.clone(),
            from: parent.parent_branch_revision,
            favor_source: false,
            committer_date_is_author_date: self.committer_date_is_author_date,
        })?;
        if outcome == RebaseOutcome::Conflict {
            return Ok(RestackResult::Conflict {
                rebased_branch_base: new_base,
            });
        }
        self.handle_successful_rebase(name, &new_base)?;
        Ok(RestackResult::Done)
    }

    /// Reparent `source` onto `target` and replay its commits there, resolving
    /// textual conflicts in favor of `source`'s own commits
    pub fn move_branch(&mut self, source: &str, target: &str) -> Result<MoveResult> {
        self.get_meta(source)?;
        self.get_meta(target)?;
        if source == target || self.all_descendants(source).contains(target) {
            return Err(GraftError::preconditions(format!(
                "Cannot move {source} onto {target} because it would create a cycle"
            )));
        }

        let (original, _) = self.tracked(source)?;
        let new_base = self.valid_or_trunk(target)?.branch_revision.clone();
        self.set_parent(source, target)?;

        let outcome = self.repo.rebase(&RebaseRequest {
            branch: source.to_string(),
            onto: new_base.clone(),
            from: original.parent_branch_revision.clone(),
            favor_source: true,
            committer_date_is_author_date: self.committer_date_is_author_date,
        });
        match outcome {
            Ok(RebaseOutcome::Done) => {
                self.handle_successful_rebase(source, &new_base)?;
                info!("Moved {} onto {}", source, target);
                Ok(MoveResult::Done)
            }
            failed => {
                if let Err(e) = failed {
                    warn!("Rebase of {} onto {} failed: {}", source, target, e);
                }
                self.set_parent(source, &original.parent_branch_name)?;
                Ok(MoveResult::Conflict)
            }
        }
    }

    pub fn rebase_interactive(&mut self, name: &str) -> Result<RestackResult> {
        let (parent, _) = self.tracked(name)?;
        let base = parent.parent_branch_revision;
        if self.repo.rebase_interactive(name, &base)? == RebaseOutcome::Conflict {
            return Ok(RestackResult::Conflict {
                rebased_branch_base: base,
            });
        }
        self.handle_successful_rebase(name, &base)?;
        Ok(RestackResult::Done)
    }

    /// Resume an interrupted rebase. The branch is whatever git has checked
    /// out once the rebase finishes.
    pub fn continue_rebase(&mut self, parent_revision: &str) -> Result<ContinueResult> {
        if self.repo.rebase_continue()? == RebaseOutcome::Conflict {
            return Ok(ContinueResult::Conflict);
        }
        let branch_name = self
            .repo
            .current_branch_name()
            .ok_or_else(|| GraftError::preconditions("Must be on a branch after a rebase"))?;
        self.handle_successful_rebase(&branch_name, parent_revision)?;
        Ok(ContinueResult::Done { branch_name })
    }

    pub fn abort_rebase(&self) -> Result<()> {
        self.repo.rebase_abort()
    }

    pub fn is_merged_into_trunk(&self, name: &str) -> Result<bool> {
        self.get_meta(name)?;
        self.repo.is_merged(name, &self.trunk)
    }

    /// Whether the branch introduces no changes over its stake
    pub fn is_branch_empty(&self, name: &str) -> Result<bool> {
        let (parent, _) = self.tracked(name)?;
        self.repo.is_diff_empty(name, &parent.parent_branch_revision)
    }

    pub fn populate_remote_shas(&self) -> Result<()> {
        self.repo.populate_remote_shas(&self.remote)
    }

    pub fn branch_matches_remote(&self, name: &str) -> Result<bool> {
        let meta = self.valid_or_trunk(name)?;
        Ok(self.repo.remote_sha(name).as_deref() == Some(meta.branch_revision.as_str()))
    }

    pub fn push_branch(&self, name: &str, force: bool) -> Result<()> {
        self.tracked(name)?;
        self.repo.push_branch(&PushRequest {
            remote: self.remote.clone(),
            branch: name.to_string(),
            force,
            no_verify: self.no_verify,
        })
    }

    /// Fast-forward trunk from the remote, returning to the current branch
    pub fn pull_trunk(&mut self) -> Result<PullResult> {
        self.repo.prune_remote(&self.remote)?;
        let current = self.current_branch_or_detached()?;
        let trunk = self.trunk.clone();
        let old_revision = self.get_meta(&trunk)?.branch_revision.clone();

        let pulled = self
            .repo
            .switch_branch(&trunk, SwitchOptions::default())
            .and_then(|_| self.repo.pull_branch(&self.remote, &trunk));
        self.repo.switch_branch(&current, SwitchOptions::default())?;
        if pulled? == PullOutcome::Conflict {
            return Ok(PullResult::Conflict);
        }

        let new_revision = self.repo.sha(&trunk)?;
        let unchanged = new_revision == old_revision;
        if let Some(meta) = self.branches.get_mut(&trunk) {
            meta.branch_revision = new_revision;
        }
        Ok(if unchanged {
            PullResult::Unneeded
        } else {
            PullResult::Done
        })
    }

    /// Hard-reset trunk to its remote-tracking branch
    pub fn reset_trunk_to_remote(&mut self) -> Result<()> {
        let current = self.current_branch_or_detached()?;
        let trunk = self.trunk.clone();
        let remote_ref = format!("{}/{}", self.remote, trunk);

        let reset = self
            .repo
            .switch_branch(&trunk, SwitchOptions::default())
            .and_then(|_| self.repo.sha(&remote_ref))
            .and_then(|revision| self.repo.hard_reset(&revision).map(|_| revision));
        self.repo.switch_branch(&current, SwitchOptions::default())?;

        let revision = reset?;
        if let Some(meta) = self.branches.get_mut(&trunk) {
            meta.branch_revision = revision;
        }
        Ok(())
    }

    /// Fetch `name` from the remote and record its fetch base. A trunk child's
    /// base is its merge-base with trunk; anything else is based on the head
    /// of the previous fetch.
    pub fn fetch_branch(&self, name: &str, parent: &str) -> Result<()> {
        let parent_meta = self.valid_or_trunk(parent)?;
        if parent_meta.state.is_trunk() {
            self.repo.fetch_branch(&self.remote, name)?;
            let head = self.repo.read_fetch_head()?;
            let base = self.repo.merge_base(&head, &parent_meta.branch_revision)?;
            self.repo.write_fetch_base(&base)?;
        } else {
            let previous_head = self.repo.read_fetch_head()?;
            self.repo.write_fetch_base(&previous_head)?;
            self.repo.fetch_branch(&self.remote, name)?;
        }
        debug!("Fetched {} on top of {}", name, parent);
        Ok(())
    }

    pub fn branch_matches_fetched(&self, name: &str) -> Result<bool> {
        let revision = &self.get_meta(name)?.branch_revision;
        Ok(*revision == self.repo.read_fetch_head()?)
    }

    /// Point `name` at the fetched head and track it on `parent`
    pub fn checkout_branch_from_fetched(&mut self, name: &str, parent: &str) -> Result<()> {
        self.validate_new_parent(name, parent)?;
        self.get_meta(parent)?;
        let head = self.repo.read_fetch_head()?;
        let base = self.repo.read_fetch_base()?;

        self.repo.force_checkout_new_branch(name, &head)?;
        self.repo.set_remote_tracking(&self.remote, name, &head)?;
        let pr_info = self.branches.get(name).and_then(|m| m.pr_info.clone());
        self.update_meta(
            name,
            BranchState::Valid {
                parent: ParentLink::new(parent, base),
            },
            head,
            pr_info,
        )?;
        self.current_branch = Some(name.to_string());
        Ok(())
    }

    /// Replay local commits of `name` onto the fetched head
    pub fn rebase_branch_onto_fetched(&mut self, name: &str) -> Result<RestackResult> {
        let (parent, _) = self.tracked(name)?;
        let head = self.repo.read_fetch_head()?;
        let base = self.repo.read_fetch_base()?;
        self.repo.set_remote_tracking(&self.remote, name, &head)?;

        // On conflict this is what a continuation resumes on
        self.current_branch = Some(name.to_string());
        let outcome = self.repo.rebase(&RebaseRequest {
            branch: name.to_string(),
            onto: head,
            from: parent.parent_branch_revision,
            favor_source: false,
            committer_date_is_author_date: self.committer_date_is_author_date,
        })?;
        if outcome == RebaseOutcome::Conflict {
            return Ok(RestackResult::Conflict {
                rebased_branch_base: base,
            });
        }
        self.handle_successful_rebase(name, &base)?;
        Ok(RestackResult::Done)
    }

    /// The sole writer of branch metadata. The store record is written before
    /// the map changes, so a failed write leaves the map untouched.
    fn update_meta(
        &mut self,
        name: &str,
        state: BranchState,
        branch_revision: String,
        pr_info: Option<PrInfo>,
    ) -> Result<()> {
        let old = match self.branches.get(name) {
            Some(meta) => meta.clone(),
            None => CachedMeta::new(BranchState::BadParentName, self.repo.sha(name)?),
        };
        if old.state.is_trunk() {
            return Err(GraftError::preconditions(format!(
                "Cannot give trunk {name} a parent"
            )));
        }
        let Some(new_parent) = state.parent_name().map(str::to_string) else {
            return Err(GraftError::preconditions(format!(
                "Metadata for {name} must name a parent"
            )));
        };
        self.get_meta(&new_parent)?;

        let new = CachedMeta {
            state,
            branch_revision,
            children: old.children.clone(),
            pr_info,
        };
        self.store.write(name, &new.to_record())?;

        if let Some(old_parent) = old.state.parent_name() {
            if old_parent != new_parent {
                if let Some(meta) = self.branches.get_mut(old_parent) {
                    meta.remove_child(name);
                }
            }
        }
        if let Some(meta) = self.branches.get_mut(&new_parent) {
            meta.add_child(name);
        }

        let revalidate = !old.state.is_valid() && new.state.is_valid();
        let children = new.children.clone();
        debug!("Updated {}: {:?}", name, new);
        self.branches.insert(name.to_string(), new);

        if revalidate {
            self.revalidate_children(children)?;
        }
        Ok(())
    }

    fn revalidate_children(&mut self, children: Vec<String>) -> Result<()> {
        let mut pending = children;
        while let Some(child) = pending.pop() {
            let Some(parent_name) = self
                .branches
                .get(&child)
                .filter(|meta| matches!(meta.state, BranchState::InvalidParent { .. }))
                .and_then(|meta| meta.state.parent_name())
                .map(str::to_string)
            else {
                continue;
            };
            let Some(parent_revision) = self
                .branches
                .get(&parent_name)
                .filter(|meta| meta.state.is_valid_or_trunk())
                .map(|meta| meta.branch_revision.clone())
            else {
                continue;
            };

            let Some(meta) = self.branches.get_mut(&child) else {
                continue;
            };
            validate_or_fix_parent_revision(
                self.repo.as_ref(),
                self.store.as_ref(),
                &child,
                meta,
                &parent_revision,
            )?;
            if meta.state.is_valid() {
                debug!("Revalidated {}", child);
                pending.extend(meta.children.iter().cloned());
            }
        }
        Ok(())
    }

    /// Move a child of a disappearing branch onto `new_parent`, keeping its stake.
    /// Untracked children keep their state and only follow the edge.
    fn reparent(&mut self, child: &str, new_parent: &str) -> Result<()> {
        let meta = self.get_meta(child)?.clone();
        match meta.state {
            BranchState::Valid { .. } => self.set_parent(child, new_parent),
            BranchState::InvalidParent { parent } => {
                self.validate_new_parent(child, new_parent)?;
                self.update_meta(
                    child,
                    BranchState::InvalidParent {
                        parent: ParentLink::new(new_parent, parent.parent_branch_revision),
                    },
                    meta.branch_revision,
                    meta.pr_info,
                )
            }
            BranchState::Trunk | BranchState::BadParentName => Ok(()),
        }
    }

    fn delete_all_branch_data(&mut self, name: &str) -> Result<()> {
        let (parent, _) = self.tracked(name)?;
        self.repo.delete_branch(name)?;
        self.store.delete(name)?;
        if let Some(parent_meta) = self.branches.get_mut(&parent.parent_branch_name) {
            parent_meta.remove_child(name);
        }
        self.branches.remove(name);
        Ok(())
    }

    fn handle_successful_rebase(&mut self, name: &str, stake: &str) -> Result<()> {
        let (parent, meta) = self.tracked(name)?;
        let revision = self.repo.sha(name)?;
        self.update_meta(
            name,
            BranchState::Valid {
                parent: ParentLink::new(parent.parent_branch_name, stake),
            },
            revision,
            meta.pr_info,
        )?;

        if let Some(current) = self.current_branch.clone() {
            if self.branches.contains_key(&current) {
                self.repo.switch_branch(&current, SwitchOptions::default())?;
            }
        }
        Ok(())
    }

    fn refresh_revision(&mut self, name: &str) -> Result<()> {
        let revision = self.repo.sha(name)?;
        if let Some(meta) = self.branches.get_mut(name) {
            meta.branch_revision = revision;
        }
        Ok(())
    }

    fn validate_new_parent(&self, name: &str, parent: &str) -> Result<()> {
        if name == parent {
            return Err(GraftError::preconditions(format!(
                "Cannot set parent of {name} to itself"
            )));
        }
        if self.branches.contains_key(name) && self.all_descendants(name).contains(parent) {
            return Err(GraftError::preconditions(format!(
                "Cannot set parent of {name} to its descendant {parent}"
            )));
        }
        Ok(())
    }

    /// Every branch reachable through `children` edges, tracked or not
    fn all_descendants(&self, name: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut pending = vec![name.to_string()];
        while let Some(branch) = pending.pop() {
            let Some(meta) = self.branches.get(&branch) else {
                continue;
            };
            for child in &meta.children {
                if seen.insert(child.clone()) {
                    pending.push(child.clone());
                }
            }
        }
        seen
    }

    fn recursive_children(&self, name: &str) -> Vec<String> {
        self.get_children(name)
            .into_iter()
            .flat_map(|child| {
                let mut chain = vec![child.clone()];
                chain.extend(self.recursive_children(&child));
                chain
            })
            .collect()
    }

    fn recursive_parents_excluding_trunk(&self, name: &str) -> Vec<String> {
        let mut parents = Vec::new();
        let mut seen = BTreeSet::from([name.to_string()]);
        let mut cursor = self.get_parent(name);
        while let Some(parent) = cursor {
            if self.is_trunk(&parent) || !seen.insert(parent.clone()) {
                break;
            }
            cursor = self.get_parent(&parent);
            parents.push(parent);
        }
        parents.reverse();
        parents
    }

    fn validate_split(
        &self,
        branch: &str,
        parent: &ParentLink,
        meta: &CachedMeta,
        names: &[String],
        points: &[usize],
    ) -> Result<()> {
        if points[0] != 0 || points.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(GraftError::preconditions(format!(
                "Split points for {branch} must start at 0 and strictly increase"
            )));
        }
        let commit_count = self
            .repo
            .commit_range(Some(&parent.parent_branch_revision), &meta.branch_revision)?
            .len();
        if points.iter().any(|point| *point >= commit_count) {
            return Err(GraftError::preconditions(format!(
                "Split points for {branch} must lie within its {commit_count} commits"
            )));
        }

        let mut unique = BTreeSet::new();
        for name in names {
            if !unique.insert(name.as_str()) {
                return Err(GraftError::preconditions(format!(
                    "Branch name {name} is used twice in the split of {branch}"
                )));
            }
            if name != branch && self.branch_exists(name) {
                return Err(GraftError::preconditions(format!(
                    "Cannot split {branch} into {name}: {name} already exists"
                )));
            }
        }
        Ok(())
    }

    fn current_branch_or_detached(&self) -> Result<String> {
        let name = self.current_branch.clone().ok_or(GraftError::Detached)?;
        self.get_meta(&name)?;
        Ok(name)
    }

    fn valid_or_trunk(&self, name: &str) -> Result<&CachedMeta> {
        let meta = self.get_meta(name)?;
        if !meta.state.is_valid_or_trunk() {
            return Err(GraftError::preconditions(format!(
                "{name} is not tracked ({})",
                meta.state
            )));
        }
        Ok(meta)
    }

    /// A tracked, non-trunk branch's parent edge and metadata
    fn tracked(&self, name: &str) -> Result<(ParentLink, CachedMeta)> {
        let meta = self.get_meta(name)?;
        match &meta.state {
            BranchState::Valid { parent } => Ok((parent.clone(), meta.clone())),
            BranchState::Trunk => Err(GraftError::preconditions(format!(
                "{name} is the trunk branch"
            ))),
            other => Err(GraftError::preconditions(format!(
                "{name} is not tracked ({other})"
            ))),
        }
    }
}
