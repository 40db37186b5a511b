//! Code-review service integration.
//!
//! The branch graph only ever sees pull requests through [`ReviewService`];
//! [`GitHubClient`] is the REST-backed implementation.

pub mod client;
pub mod pr_info;
pub mod submit;

pub use client::GitHubClient;
pub use pr_info::{parse_owner_repo, resolve_downstack, sync_pr_info};
pub use submit::{submit_branches, SubmitAction, SubmitOptions, SubmitOutcome};

use crate::errors::Result;
use crate::stack::{PrInfo, PrState};
use async_trait::async_trait;

/// How to find a pull request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrLookup {
    Number(u64),
    /// Most recent PR whose head is this branch
    Head(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub number: u64,
    pub url: String,
    pub title: String,
    pub body: Option<String>,
    pub state: PrState,
    pub review_decision: Option<String>,
    pub is_draft: bool,
    pub head_ref_name: String,
    pub base_ref_name: String,
}

impl PullRequest {
    pub fn to_pr_info(&self) -> PrInfo {
        PrInfo {
            number: Some(self.number),
            url: Some(self.url.clone()),
            title: Some(self.title.clone()),
            body: self.body.clone(),
            state: Some(self.state),
            review_decision: self.review_decision.clone(),
            is_draft: Some(self.is_draft),
            base: Some(self.base_ref_name.clone()),
        }
    }
}

/// Create a PR, or retarget an existing one when `number` is set
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub head: String,
    pub base: String,
    pub title: String,
    pub body: Option<String>,
    pub draft: bool,
    pub number: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitStatus {
    Created,
    Updated,
}

#[derive(Debug, Clone)]
pub struct SubmitResponse {
    pub status: SubmitStatus,
    pub pr: PullRequest,
}

#[async_trait]
pub trait ReviewService: Send + Sync {
    /// `None` when no such pull request exists
    async fn find_pull_request(&self, lookup: PrLookup) -> Result<Option<PullRequest>>;

    async fn submit_pull_request(&self, request: SubmitRequest) -> Result<SubmitResponse>;
}
