use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{HeaderMap, ACCEPT, LINK};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::types::{ActivityRecord, BranchCreation, Fork, GitRef, PullRequestDetails, RemoteSnapshot};
use super::{ActivityFeed, FeedError, GitHubError, GitRemote, PullRequestApi};
use crate::config::GitHubSettings;
use crate::pr::PullRequestRef;
use crate::scheduler::window::PollWindow;

const USER_AGENT: &str = "pr-watcher";
const PER_PAGE: &str = "50";
/// Upper bound on `Link: rel="next"` pages followed for one listing.
const MAX_PAGES: usize = 10;

/// GitHub REST client backing every remote collaborator of the pipeline.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    token: String,
}

#[derive(Deserialize)]
struct ApiMessage {
    message: String,
}

impl GitHubClient {
    pub fn new(settings: &GitHubSettings) -> Result<Self, GitHubError> {
        reqwest::Url::parse(&settings.api_url)
            .map_err(|_| GitHubError::InvalidUrl(settings.api_url.clone()))?;

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(settings.request_timeout)
            .build()?;

        Ok(Self {
            http,
            api_url: settings.api_url.trim_end_matches('/').to_string(),
            token: settings.token.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(&self.token)
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    async fn send(request: RequestBuilder) -> Result<Response, GitHubError> {
        let response = request.send().await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(api_error(response).await)
        }
    }

    /// Follow `Link: rel="next"` headers, concatenating every page.
    async fn get_paginated<T: DeserializeOwned>(
        &self,
        first: RequestBuilder,
    ) -> Result<Vec<T>, GitHubError> {
        let mut items = Vec::new();
        let mut response = Self::send(first).await?;
        let mut pages = 1;

        loop {
            let next = next_page(response.headers());
            let page: Vec<T> = response.json().await?;
            debug!(page = pages, items = page.len(), "received page");
            items.extend(page);

            let Some(next) = next else { break };
            if pages >= MAX_PAGES {
                warn!(pages, "pagination limit reached, remaining pages skipped");
                break;
            }
            response = Self::send(self.request(Method::GET, &next)).await?;
            pages += 1;
        }

        Ok(items)
    }

    async fn fetch_notifications(
        &self,
        window: &PollWindow,
    ) -> Result<Vec<ActivityRecord>, GitHubError> {
        let since = format_timestamp(window.since);
        let before = format_timestamp(window.before);
        let request = self
            .request(Method::GET, &self.endpoint("notifications"))
            .query(&[
                ("all", "true"),
                ("since", since.as_str()),
                ("before", before.as_str()),
                ("per_page", PER_PAGE),
            ]);
        self.get_paginated(request).await
    }
}

#[async_trait]
impl ActivityFeed for GitHubClient {
    #[instrument(skip(self, window), fields(since = %window.since, before = %window.before))]
    async fn list_activity(&self, window: &PollWindow) -> Result<Vec<ActivityRecord>, FeedError> {
        let records = self.fetch_notifications(window).await?;
        debug!(records = records.len(), "fetched notifications");
        Ok(records)
    }
}

#[async_trait]
impl PullRequestApi for GitHubClient {
    #[instrument(skip(self, pr), fields(pr = %pr))]
    async fn get_pull_request(
        &self,
        pr: &PullRequestRef,
    ) -> Result<PullRequestDetails, GitHubError> {
        let url = self.endpoint(&format!(
            "repos/{}/{}/pulls/{}",
            pr.owner, pr.repo, pr.number
        ));
        let details = Self::send(self.request(Method::GET, &url))
            .await?
            .json::<PullRequestDetails>()
            .await?;
        debug!(merged = details.merged, closed = details.closed_at.is_some(), "received pull request");
        Ok(details)
    }

    #[instrument(skip(self))]
    async fn create_fork(&self, owner: &str, repo: &str) -> Result<Fork, GitHubError> {
        let url = self.endpoint(&format!("repos/{owner}/{repo}/forks"));
        let fork = Self::send(
            self.request(Method::POST, &url)
                .json(&serde_json::json!({})),
        )
        .await?
        .json::<Fork>()
        .await?;
        debug!(fork = %fork.full_name, "fork requested");
        Ok(fork)
    }

    #[instrument(skip(self, fork), fields(fork = %fork.full_name))]
    async fn fork_ready(&self, fork: &Fork) -> Result<bool, GitHubError> {
        let url = self.endpoint(&format!(
            "repos/{}/branches/{}",
            fork.full_name, fork.default_branch
        ));
        match Self::send(self.request(Method::GET, &url)).await {
            Ok(_) => Ok(true),
            // Still being copied on the server side.
            Err(e) if e.is_not_found() || e.status() == Some(StatusCode::CONFLICT) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl GitRemote for GitHubClient {
    #[instrument(skip(self, fork), fields(fork = %fork.full_name))]
    async fn clone_remote(&self, fork: &Fork) -> Result<RemoteSnapshot, GitHubError> {
        let url = self.endpoint(&format!("repos/{}/git/matching-refs/heads/", fork.full_name));
        let request = self
            .request(Method::GET, &url)
            .query(&[("per_page", PER_PAGE)]);
        let refs: Vec<GitRef> = match self.get_paginated(request).await {
            Ok(refs) => refs,
            // An empty repository has no refs at all.
            Err(e) if e.status() == Some(StatusCode::CONFLICT) => Vec::new(),
            Err(e) => return Err(e),
        };
        let snapshot = RemoteSnapshot::from_refs(&fork.default_branch, refs);
        debug!(branches = snapshot.branches.len(), head = ?snapshot.head(), "snapshot taken");
        Ok(snapshot)
    }

    #[instrument(skip(self, fork), fields(fork = %fork.full_name))]
    async fn create_branch(
        &self,
        fork: &Fork,
        branch: &str,
        sha: &str,
    ) -> Result<BranchCreation, GitHubError> {
        let url = self.endpoint(&format!("repos/{}/git/refs", fork.full_name));
        let body = serde_json::json!({
            "ref": format!("refs/heads/{branch}"),
            "sha": sha,
        });
        match Self::send(self.request(Method::POST, &url).json(&body)).await {
            Ok(_) => Ok(BranchCreation::Created),
            Err(GitHubError::Api { status, message })
                if status == StatusCode::UNPROCESSABLE_ENTITY
                    && message.to_ascii_lowercase().contains("already exists") =>
            {
                Ok(BranchCreation::AlreadyExists)
            }
            Err(e) => Err(e),
        }
    }
}

async fn api_error(response: Response) -> GitHubError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiMessage>(&body)
        .map(|m| m.message)
        .unwrap_or(body);
    GitHubError::Api { status, message }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn next_page(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;
    link.split(',').find_map(|part| {
        let (url, params) = part.split_once(';')?;
        params.contains("rel=\"next\"").then(|| {
            url.trim()
                .trim_start_matches('<')
                .trim_end_matches('>')
                .to_string()
        })
    })
}
