//! The branch graph.
//!
//! Per-branch metadata (parent edge, stake, children, PR linkage) layered on
//! top of git, plus the operations that keep it consistent with the
//! repository's real ancestry.

pub mod cache;
pub mod continuation;
pub mod engine;
pub mod metadata;
pub mod rebase;
pub mod scope;
pub mod store;
pub mod sync;

pub use cache::CacheLoader;
pub use continuation::{continue_from, restack_branches, Continuation, RestackReport};
pub use engine::{Engine, EngineOptions};
pub use metadata::{BranchMetaMap, BranchState, CachedMeta, MetaRecord, ParentLink, PrInfo, PrState};
pub use rebase::{ContinueResult, MoveResult, PullResult, RestackResult};
pub use scope::ScopeSpec;
pub use store::{MetadataStore, RefMetadataStore};
pub use sync::{
    get_branches_from_remote, NonInteractive, OverwriteReason, SyncChoice, SyncEvent, SyncFlow,
    SyncPrompter, SyncRequest,
};
