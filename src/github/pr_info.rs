use super::{PrLookup, PullRequest, ReviewService};
use crate::errors::Result;
use crate::stack::{Engine, PrState};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Hard stop for walking PR bases, in case the remote graph is malformed
const MAX_DOWNSTACK_DEPTH: usize = 50;

/// Look up PRs for `branches` and decide which ones belong to them.
///
/// A branch with a recorded number keeps that PR only while its head still
/// matches. A branch without one adopts the most recent open PR for its
/// head.
pub async fn fetch_pr_info_for_branches(
    service: &dyn ReviewService,
    branches: &[(String, Option<u64>)],
) -> Result<Vec<PullRequest>> {
    let by_number: HashMap<u64, &str> = branches
        .iter()
        .filter_map(|(name, number)| number.map(|n| (n, name.as_str())))
        .collect();
    let without_number: BTreeSet<&str> = branches
        .iter()
        .filter(|(_, number)| number.is_none())
        .map(|(name, _)| name.as_str())
        .collect();

    let mut found = Vec::new();
    for number in by_number.keys() {
        if let Some(pr) = service.find_pull_request(PrLookup::Number(*number)).await? {
            found.push(pr);
        }
    }
    for branch in &without_number {
        if let Some(pr) = service
            .find_pull_request(PrLookup::Head(branch.to_string()))
            .await?
        {
            found.push(pr);
        }
    }

    Ok(found
        .into_iter()
        .filter(|pr| match by_number.get(&pr.number) {
            Some(branch) => *branch == pr.head_ref_name,
            None => {
                pr.state == PrState::Open && without_number.contains(pr.head_ref_name.as_str())
            }
        })
        .collect())
}

/// Refresh the stored PR info of `branches` from the review service
pub async fn sync_pr_info(
    engine: &mut Engine,
    service: &dyn ReviewService,
    branches: &[String],
) -> Result<Vec<PullRequest>> {
    let lookups: Vec<(String, Option<u64>)> = branches
        .iter()
        .filter(|name| !engine.is_trunk(name))
        .map(|name| {
            let number = engine.get_pr_info(name).and_then(|pr| pr.number);
            (name.clone(), number)
        })
        .collect();

    let prs = fetch_pr_info_for_branches(service, &lookups).await?;
    for pr in &prs {
        debug!("Linking {} to PR #{}", pr.head_ref_name, pr.number);
        engine.upsert_pr_info(&pr.head_ref_name, pr.to_pr_info())?;
    }
    Ok(prs)
}

/// Follow PR bases from `branch` down to trunk. Returns the chain bottom
/// first, ending with `branch`.
pub async fn resolve_downstack(
    service: &dyn ReviewService,
    branch: &str,
    trunk: &str,
) -> Result<Vec<String>> {
    let mut chain = vec![branch.to_string()];
    while chain.len() < MAX_DOWNSTACK_DEPTH {
        let Some(current) = chain.last() else { break };
        let Some(pr) = service
            .find_pull_request(PrLookup::Head(current.clone()))
            .await?
        else {
            break;
        };
        let base = pr.base_ref_name;
        if base == trunk || chain.contains(&base) {
            break;
        }
        chain.push(base);
    }
    chain.reverse();
    Ok(chain)
}

/// `(owner, repo)` from a GitHub remote URL in scp or URL form
pub fn parse_owner_repo(remote_url: &str) -> Option<(String, String)> {
    let remote_url = remote_url.trim();
    let path = match url::Url::parse(remote_url) {
        Ok(parsed) => parsed.path().to_string(),
        // git@host:owner/repo.git
        Err(_) => remote_url.split_once(':')?.1.to_string(),
    };

    let mut segments = path
        .trim_matches('/')
        .trim_end_matches(".git")
        .rsplit('/')
        .filter(|segment| !segment.is_empty());
    let repo = segments.next()?.to_string();
    let owner = segments.next()?.to_string();
    Some((owner, repo))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::{SubmitRequest, SubmitResponse};
    use async_trait::async_trait;

    struct FakeService {
        prs: Vec<PullRequest>,
    }

    fn pr(number: u64, head: &str, base: &str, state: PrState) -> PullRequest {
        PullRequest {
            number,
            url: format!("https://github.com/octo/graft/pull/{number}"),
            title: head.to_string(),
            body: None,
            state,
            review_decision: None,
            is_draft: false,
            head_ref_name: head.to_string(),
            base_ref_name: base.to_string(),
        }
    }

    #[async_trait]
    impl ReviewService for FakeService {
        async fn find_pull_request(&self, lookup: PrLookup) -> Result<Option<PullRequest>> {
            Ok(self
                .prs
                .iter()
                .find(|pr| match &lookup {
                    PrLookup::Number(n) => pr.number == *n,
                    PrLookup::Head(head) => &pr.head_ref_name == head,
                })
                .cloned())
        }

        async fn submit_pull_request(&self, _request: SubmitRequest) -> Result<SubmitResponse> {
            unreachable!("not used")
        }
    }

    #[tokio::test]
    async fn test_association_filter() {
        let service = FakeService {
            prs: vec![
                pr(1, "a", "main", PrState::Open),
                pr(2, "renamed", "main", PrState::Open),
                pr(3, "c", "main", PrState::Closed),
                pr(4, "d", "main", PrState::Merged),
            ],
        };
        let branches = vec![
            ("a".to_string(), None),
            ("b".to_string(), Some(2)),
            ("c".to_string(), None),
            ("d".to_string(), Some(4)),
        ];

        let linked = fetch_pr_info_for_branches(&service, &branches).await.unwrap();
        let mut numbers: Vec<u64> = linked.iter().map(|pr| pr.number).collect();
        numbers.sort();
        // #2's head no longer matches b, #3 is closed and new
        assert_eq!(numbers, vec![1, 4]);
    }

    #[tokio::test]
    async fn test_resolve_downstack_stops_at_trunk_and_cycles() {
        let service = FakeService {
            prs: vec![
                pr(1, "a", "main", PrState::Open),
                pr(2, "b", "a", PrState::Open),
                pr(3, "c", "b", PrState::Open),
                pr(4, "x", "y", PrState::Open),
                pr(5, "y", "x", PrState::Open),
            ],
        };

        assert_eq!(
            resolve_downstack(&service, "c", "main").await.unwrap(),
            vec!["a", "b", "c"]
        );
        assert_eq!(
            resolve_downstack(&service, "x", "main").await.unwrap(),
            vec!["y", "x"]
        );
        assert_eq!(
            resolve_downstack(&service, "lonely", "main").await.unwrap(),
            vec!["lonely"]
        );
    }

    #[test]
    fn test_parse_owner_repo() {
        let expected = Some(("octo".to_string(), "graft".to_string()));
        assert_eq!(parse_owner_repo("git@github.com:octo/graft.git"), expected);
        assert_eq!(parse_owner_repo("https://github.com/octo/graft.git"), expected);
        assert_eq!(parse_owner_repo("https://github.com/octo/graft"), expected);
        assert_eq!(parse_owner_repo("ssh://git@github.com/octo/graft.git"), expected);
        assert_eq!(parse_owner_repo("not-a-remote"), None);
    }
}
