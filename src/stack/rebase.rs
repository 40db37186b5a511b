//! Outcomes of the rebase-family engine operations.
//!
//! Conflicts are returned as data, never raised, so callers can decide
//! whether to persist a continuation before reporting.

/// Result of restacking, interactively rebasing, or rebasing onto a fetched head
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestackResult {
    Done,
    /// The branch already sits on its parent's current revision
    Unneeded,
    /// Stopped mid-rebase; `rebased_branch_base` becomes the stake on continue
    Conflict { rebased_branch_base: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveResult {
    Done,
    /// The parent pointer was rolled back; any in-progress rebase is left alone
    Conflict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContinueResult {
    Done { branch_name: String },
    Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullResult {
    Done,
    Unneeded,
    Conflict,
}

impl RestackResult {
    pub fn is_conflict(&self) -> bool {
        matches!(self, RestackResult::Conflict { .. })
    }
}
