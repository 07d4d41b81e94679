pub mod client;
pub mod types;

pub use client::GitHubClient;
pub use types::{ActivityRecord, BranchCreation, Fork, PullRequestDetails, RemoteSnapshot};

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use crate::pr::PullRequestRef;
use crate::scheduler::window::PollWindow;

#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("GitHub API request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("GitHub API returned {status}: {message}")]
    Api { status: StatusCode, message: String },

    #[error("Invalid GitHub API URL: {0}")]
    InvalidUrl(String),
}

impl GitHubError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            GitHubError::Request(e) => e.status(),
            GitHubError::Api { status, .. } => Some(*status),
            GitHubError::InvalidUrl(_) => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }

    pub fn is_rate_limited(&self) -> bool {
        match self {
            GitHubError::Api { status, message } => {
                *status == StatusCode::TOO_MANY_REQUESTS
                    || (*status == StatusCode::FORBIDDEN
                        && message.to_ascii_lowercase().contains("rate limit"))
            }
            _ => false,
        }
    }

    /// Credentials were rejected. Retrying will not help.
    pub fn is_auth_failure(&self) -> bool {
        match self.status() {
            Some(StatusCode::UNAUTHORIZED) => true,
            Some(StatusCode::FORBIDDEN) => !self.is_rate_limited(),
            _ => false,
        }
    }
}

/// Failure to read the activity feed, split by whether the next tick may
/// succeed.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Activity feed temporarily unavailable: {0}")]
    Transient(GitHubError),

    #[error("Activity feed unavailable: {0}")]
    Fatal(GitHubError),
}

impl From<GitHubError> for FeedError {
    fn from(err: GitHubError) -> Self {
        if err.is_auth_failure() || matches!(err, GitHubError::InvalidUrl(_)) {
            FeedError::Fatal(err)
        } else {
            FeedError::Transient(err)
        }
    }
}

/// Source of time-windowed activity records.
#[async_trait]
pub trait ActivityFeed: Send + Sync {
    async fn list_activity(&self, window: &PollWindow) -> Result<Vec<ActivityRecord>, FeedError>;
}

/// Pull request and fork endpoints of the hosting API.
#[async_trait]
pub trait PullRequestApi: Send + Sync {
    async fn get_pull_request(&self, pr: &PullRequestRef)
        -> Result<PullRequestDetails, GitHubError>;

    /// Request a fork owned by the authenticated actor. Asking again for a
    /// repository the actor already forked returns the existing fork.
    async fn create_fork(&self, owner: &str, repo: &str) -> Result<Fork, GitHubError>;

    /// Whether the server finished populating the fork.
    async fn fork_ready(&self, fork: &Fork) -> Result<bool, GitHubError>;
}

/// Reference-level operations against a remote repository.
#[async_trait]
pub trait GitRemote: Send + Sync {
    /// Fetch the remote's branch heads into an ephemeral snapshot.
    async fn clone_remote(&self, fork: &Fork) -> Result<RemoteSnapshot, GitHubError>;

    /// Create `refs/heads/{branch}` at `sha`. Never moves an existing branch.
    async fn create_branch(
        &self,
        fork: &Fork,
        branch: &str,
        sha: &str,
    ) -> Result<BranchCreation, GitHubError>;
}
