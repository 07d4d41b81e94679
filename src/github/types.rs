use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// `subject.type` of notifications about pull requests.
pub const PULL_REQUEST_KIND: &str = "PullRequest";

/// One entry of the authenticated user's notification feed.
///
/// Only the fields the pipeline reads are deserialized; everything else
/// GitHub sends is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct ActivityRecord {
    /// Notification thread id
    pub id: String,
    /// Last time the thread saw activity
    pub updated_at: DateTime<Utc>,
    /// What the activity is about (a comment, a review, the PR itself)
    pub subject: Subject,
    /// Repository the thread belongs to, when GitHub includes it
    #[serde(default)]
    pub repository: Option<RepositorySummary>,
}

impl ActivityRecord {
    /// Candidate reference URLs in the order they should be tried.
    pub fn reference_urls(&self) -> impl Iterator<Item = &str> {
        self.subject
            .latest_comment_url
            .as_deref()
            .into_iter()
            .chain(self.subject.url.as_deref())
    }

    /// Issues, discussions, releases and the like share the feed but have no
    /// pull request behind them.
    pub fn is_pull_request(&self) -> bool {
        self.subject.kind == PULL_REQUEST_KIND
    }

    pub fn repository_name(&self) -> Option<&str> {
        self.repository.as_ref().map(|r| r.full_name.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Subject {
    #[serde(default)]
    pub title: String,
    /// API URL of the subject (e.g. `/repos/{owner}/{repo}/pulls/{n}`)
    #[serde(default)]
    pub url: Option<String>,
    /// API URL of the latest comment or review on the subject
    #[serde(default)]
    pub latest_comment_url: Option<String>,
    /// "PullRequest", "Issue", ...
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositorySummary {
    pub full_name: String,
}

/// The parts of a pull request needed to classify it.
#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestDetails {
    #[serde(default)]
    pub merged: bool,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Owner {
    pub login: String,
}

/// Repository descriptor returned by the fork endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Fork {
    /// "{owner}/{name}"
    pub full_name: String,
    pub name: String,
    pub owner: Owner,
    pub clone_url: String,
    pub html_url: String,
    pub default_branch: String,
}

impl std::fmt::Display for Fork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_name)
    }
}

/// Wire shape of `GET /repos/{owner}/{repo}/git/matching-refs/...`.
#[derive(Debug, Clone, Deserialize)]
pub struct GitRef {
    #[serde(rename = "ref")]
    pub name: String,
    pub object: GitObject,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitObject {
    pub sha: String,
}

/// Ephemeral, in-memory view of a remote's branch heads.
///
/// Stands in for a full clone: nothing is written to disk and only the
/// references are fetched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteSnapshot {
    pub default_branch: String,
    /// Short branch name -> commit sha
    pub branches: BTreeMap<String, String>,
}

impl RemoteSnapshot {
    pub fn from_refs(default_branch: &str, refs: Vec<GitRef>) -> Self {
        let branches = refs
            .into_iter()
            .filter_map(|r| {
                r.name
                    .strip_prefix("refs/heads/")
                    .map(|name| (name.to_string(), r.object.sha))
            })
            .collect();
        Self {
            default_branch: default_branch.to_string(),
            branches,
        }
    }

    /// Commit the remote HEAD (its default branch) points at.
    pub fn head(&self) -> Option<&str> {
        self.branch(&self.default_branch)
    }

    pub fn branch(&self, name: &str) -> Option<&str> {
        self.branches.get(name).map(String::as_str)
    }
}

/// Result of asking the server to create a branch reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchCreation {
    Created,
    /// The server already had a reference with that name
    AlreadyExists,
}
