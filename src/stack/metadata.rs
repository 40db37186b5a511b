use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Every branch the engine knows about, keyed by name
pub type BranchMetaMap = BTreeMap<String, CachedMeta>;

/// A recorded parent edge and the stake taken when it was last confirmed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentLink {
    pub parent_branch_name: String,
    /// Parent revision at the time the relationship was last confirmed
    pub parent_branch_revision: String,
}

impl ParentLink {
    pub fn new<N: Into<String>, R: Into<String>>(parent: N, revision: R) -> Self {
        Self {
            parent_branch_name: parent.into(),
            parent_branch_revision: revision.into(),
        }
    }
}

/// Validation state of a branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "validationResult", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BranchState {
    /// The designated root
    Trunk,
    /// Parent edge is consistent with the recorded stake
    Valid { parent: ParentLink },
    /// Parent was moved or is itself untracked since the stake was taken
    InvalidParent { parent: ParentLink },
    /// No parent record, or the recorded parent no longer exists
    BadParentName,
}

impl BranchState {
    pub fn parent(&self) -> Option<&ParentLink> {
        match self {
            BranchState::Valid { parent } | BranchState::InvalidParent { parent } => Some(parent),
            BranchState::Trunk | BranchState::BadParentName => None,
        }
    }

    pub fn parent_name(&self) -> Option<&str> {
        self.parent().map(|link| link.parent_branch_name.as_str())
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, BranchState::Valid { .. })
    }

    pub fn is_trunk(&self) -> bool {
        matches!(self, BranchState::Trunk)
    }

    pub fn is_valid_or_trunk(&self) -> bool {
        matches!(self, BranchState::Valid { .. } | BranchState::Trunk)
    }

    pub fn label(&self) -> &'static str {
        match self {
            BranchState::Trunk => "TRUNK",
            BranchState::Valid { .. } => "VALID",
            BranchState::InvalidParent { .. } => "INVALID_PARENT",
            BranchState::BadParentName => "BAD_PARENT_NAME",
        }
    }
}

impl fmt::Display for BranchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Lifecycle state of a pull request on the review service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrState {
    Open,
    Closed,
    Merged,
}

impl fmt::Display for PrState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PrState::Open => "OPEN",
            PrState::Closed => "CLOSED",
            PrState::Merged => "MERGED",
        };
        f.write_str(label)
    }
}

/// Code-review metadata linked to a branch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<PrState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_decision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_draft: Option<bool>,
    /// Base branch the PR targets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
}

impl PrInfo {
    /// Overlay every field that `update` sets
    pub fn merge(&mut self, update: PrInfo) {
        macro_rules! overlay {
            ($($field:ident),*) => {
                $(if update.$field.is_some() { self.$field = update.$field; })*
            };
        }
        overlay!(number, url, title, body, state, review_decision, is_draft, base);
    }

    pub fn is_empty(&self) -> bool {
        *self == PrInfo::default()
    }
}

/// In-memory metadata for one branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedMeta {
    #[serde(flatten)]
    pub state: BranchState,
    pub branch_revision: String,
    /// Branches whose recorded parent is this one, sorted by name
    pub children: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_info: Option<PrInfo>,
}

impl CachedMeta {
    pub fn new(state: BranchState, branch_revision: String) -> Self {
        Self {
            state,
            branch_revision,
            children: Vec::new(),
            pr_info: None,
        }
    }

    /// The durable part of this entry
    pub fn to_record(&self) -> MetaRecord {
        let parent = self.state.parent();
        MetaRecord {
            parent_branch_name: parent.map(|p| p.parent_branch_name.clone()),
            parent_branch_revision: parent.map(|p| p.parent_branch_revision.clone()),
            pr_info: self.pr_info.clone(),
        }
    }

    pub(crate) fn add_child(&mut self, child: &str) {
        if let Err(pos) = self.children.binary_search_by(|c| c.as_str().cmp(child)) {
            self.children.insert(pos, child.to_string());
        }
    }

    pub(crate) fn remove_child(&mut self, child: &str) {
        self.children.retain(|c| c != child);
    }
}

/// What the metadata store keeps per branch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_branch_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_branch_revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_info: Option<PrInfo>,
}

impl MetaRecord {
    /// Parent edge, when both halves were recorded
    pub fn parent_link(&self) -> Option<ParentLink> {
        match (&self.parent_branch_name, &self.parent_branch_revision) {
            (Some(name), Some(revision)) => Some(ParentLink::new(name, revision)),
            _ => None,
        }
    }
}
