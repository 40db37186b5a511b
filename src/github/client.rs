use super::{PrLookup, PullRequest, ReviewService, SubmitRequest, SubmitResponse, SubmitStatus};
use crate::errors::{GraftError, Result};
use crate::stack::PrState;
use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT},
    Client, StatusCode,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, trace};

/// GitHub REST API client scoped to one repository
pub struct GitHubClient {
    client: Client,
    api_url: String,
    owner: String,
    repo: String,
}

#[derive(Debug, Deserialize)]
struct ApiRef {
    #[serde(rename = "ref")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiPullRequest {
    number: u64,
    html_url: String,
    title: String,
    body: Option<String>,
    state: String,
    #[serde(default)]
    merged_at: Option<String>,
    #[serde(default)]
    draft: bool,
    head: ApiRef,
    base: ApiRef,
}

#[derive(Debug, Serialize)]
struct CreatePullRequest<'a> {
    title: &'a str,
    head: &'a str,
    base: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<&'a str>,
    draft: bool,
}

impl From<ApiPullRequest> for PullRequest {
    fn from(pr: ApiPullRequest) -> Self {
        let state = match (pr.state.as_str(), pr.merged_at.is_some()) {
            (_, true) => PrState::Merged,
            ("open", _) => PrState::Open,
            _ => PrState::Closed,
        };
        PullRequest {
            number: pr.number,
            url: pr.html_url,
            title: pr.title,
            body: pr.body.filter(|body| !body.is_empty()),
            state,
            review_decision: None,
            is_draft: pr.draft,
            head_ref_name: pr.head.name,
            base_ref_name: pr.base.name,
        }
    }
}

impl GitHubClient {
    pub fn new(api_url: &str, owner: &str, repo: &str, token: Option<&str>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("graft-cli"));
        if let Some(token) = token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|e| GraftError::config(format!("Invalid auth header: {e}")))?,
            );
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers(headers)
            .build()
            .map_err(|e| GraftError::config(format!("Failed to create HTTP client: {e}")))?;

        // Validate the base before any request is built from it
        url::Url::parse(api_url)?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }

    fn pulls_url(&self, suffix: &str) -> String {
        format!(
            "{}/repos/{}/{}/pulls{}",
            self.api_url, self.owner, self.repo, suffix
        )
    }

    async fn get_pull(&self, number: u64) -> Result<Option<PullRequest>> {
        let url = self.pulls_url(&format!("/{number}"));
        debug!("GET {}", url);
        let response = self.client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let pr: ApiPullRequest = handle_response(response).await?;
        Ok(Some(pr.into()))
    }

    async fn find_by_head(&self, branch: &str) -> Result<Option<PullRequest>> {
        let url = self.pulls_url("");
        let head = format!("{}:{}", self.owner, branch);
        debug!("GET {} (head {})", url, head);
        let response = self
            .client
            .get(&url)
            .query(&[("head", head.as_str()), ("state", "all")])
            .send()
            .await?;
        let prs: Vec<ApiPullRequest> = handle_response(response).await?;
        Ok(prs.into_iter().next().map(PullRequest::from))
    }
}

#[async_trait]
impl ReviewService for GitHubClient {
    async fn find_pull_request(&self, lookup: PrLookup) -> Result<Option<PullRequest>> {
        match lookup {
            PrLookup::Number(number) => self.get_pull(number).await,
            PrLookup::Head(branch) => self.find_by_head(&branch).await,
        }
    }

    async fn submit_pull_request(&self, request: SubmitRequest) -> Result<SubmitResponse> {
        match request.number {
            Some(number) => {
                let url = self.pulls_url(&format!("/{number}"));
                debug!("PATCH {}", url);
                let response = self
                    .client
                    .patch(&url)
                    .json(&json!({ "base": request.base }))
                    .send()
                    .await?;
                let pr: ApiPullRequest = handle_response(response).await?;
                Ok(SubmitResponse {
                    status: SubmitStatus::Updated,
                    pr: pr.into(),
                })
            }
            None => {
                let url = self.pulls_url("");
                debug!("POST {}", url);
                let body = CreatePullRequest {
                    title: &request.title,
                    head: &request.head,
                    base: &request.base,
                    body: request.body.as_deref(),
                    draft: request.draft,
                };
                let response = self.client.post(&url).json(&body).send().await?;
                let pr: ApiPullRequest = handle_response(response).await?;
                Ok(SubmitResponse {
                    status: SubmitStatus::Created,
                    pr: pr.into(),
                })
            }
        }
    }
}

/// Handle HTTP response and deserialize JSON
async fn handle_response<T>(response: reqwest::Response) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let status = response.status();
    let text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());

    if !status.is_success() {
        return Err(GraftError::review_api(status.as_u16(), text));
    }

    trace!("Response body: {}", text);
    serde_json::from_str(&text)
        .map_err(|e| GraftError::review(format!("Failed to parse JSON response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pr_json(number: u64, head: &str, base: &str, state: &str) -> serde_json::Value {
        json!({
            "number": number,
            "html_url": format!("https://github.com/octo/graft/pull/{number}"),
            "title": "Add feature",
            "body": "",
            "state": state,
            "merged_at": null,
            "draft": false,
            "head": { "ref": head },
            "base": { "ref": base }
        })
    }

    #[tokio::test]
    async fn test_find_by_number_and_missing() {
        let mut server = mockito::Server::new_async().await;
        let _found = server
            .mock("GET", "/repos/octo/graft/pulls/7")
            .match_header("authorization", "Bearer secret")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(pr_json(7, "feature", "main", "open").to_string())
            .create_async()
            .await;
        let _missing = server
            .mock("GET", "/repos/octo/graft/pulls/8")
            .with_status(404)
            .with_body(r#"{"message":"Not Found"}"#)
            .create_async()
            .await;

        let client = GitHubClient::new(&server.url(), "octo", "graft", Some("secret")).unwrap();

        let pr = client
            .find_pull_request(PrLookup::Number(7))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pr.head_ref_name, "feature");
        assert_eq!(pr.state, PrState::Open);
        assert_eq!(pr.body, None);

        assert!(client
            .find_pull_request(PrLookup::Number(8))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_find_by_head_reads_merged_state() {
        let mut server = mockito::Server::new_async().await;
        let mut merged = pr_json(3, "feature", "main", "closed");
        merged["merged_at"] = json!("2024-01-01T00:00:00Z");
        let _list = server
            .mock("GET", "/repos/octo/graft/pulls")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("head".into(), "octo:feature".into()),
                mockito::Matcher::UrlEncoded("state".into(), "all".into()),
            ]))
            .with_status(200)
            .with_body(json!([merged]).to_string())
            .create_async()
            .await;

        let client = GitHubClient::new(&server.url(), "octo", "graft", None).unwrap();
        let pr = client
            .find_pull_request(PrLookup::Head("feature".to_string()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pr.number, 3);
        assert_eq!(pr.state, PrState::Merged);
    }

    #[tokio::test]
    async fn test_submit_creates_then_updates() {
        let mut server = mockito::Server::new_async().await;
        let _create = server
            .mock("POST", "/repos/octo/graft/pulls")
            .match_body(mockito::Matcher::PartialJson(json!({
                "head": "feature",
                "base": "main",
                "draft": true
            })))
            .with_status(201)
            .with_body(pr_json(11, "feature", "main", "open").to_string())
            .create_async()
            .await;
        let _update = server
            .mock("PATCH", "/repos/octo/graft/pulls/11")
            .match_body(mockito::Matcher::Json(json!({ "base": "other" })))
            .with_status(200)
            .with_body(pr_json(11, "feature", "other", "open").to_string())
            .create_async()
            .await;

        let client = GitHubClient::new(&server.url(), "octo", "graft", None).unwrap();
        let mut request = SubmitRequest {
            head: "feature".to_string(),
            base: "main".to_string(),
            title: "Add feature".to_string(),
            body: None,
            draft: true,
            number: None,
        };
        let created = client.submit_pull_request(request.clone()).await.unwrap();
        assert_eq!(created.status, SubmitStatus::Created);
        assert_eq!(created.pr.number, 11);

        request.number = Some(11);
        request.base = "other".to_string();
        let updated = client.submit_pull_request(request).await.unwrap();
        assert_eq!(updated.status, SubmitStatus::Updated);
        assert_eq!(updated.pr.base_ref_name, "other");
    }

    #[tokio::test]
    async fn test_api_errors_carry_status() {
        let mut server = mockito::Server::new_async().await;
        let _fail = server
            .mock("POST", "/repos/octo/graft/pulls")
            .with_status(422)
            .with_body(r#"{"message":"Validation Failed"}"#)
            .create_async()
            .await;

        let client = GitHubClient::new(&server.url(), "octo", "graft", None).unwrap();
        let err = client
            .submit_pull_request(SubmitRequest {
                head: "feature".to_string(),
                base: "main".to_string(),
                title: "t".to_string(),
                body: None,
                draft: false,
                number: None,
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("422"));
    }
}
