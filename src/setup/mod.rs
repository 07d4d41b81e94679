pub mod readiness;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::SetupSettings;
use crate::github::{BranchCreation, Fork, GitHubError, GitRemote, PullRequestApi, RemoteSnapshot};
use readiness::{wait_until_ready, ReadinessPolicy};

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Failed to fork {repo}: {source}")]
    Fork { repo: String, source: GitHubError },

    #[error("Failed to check readiness of fork {fork}: {source}")]
    Readiness { fork: String, source: GitHubError },

    #[error("Fork {fork} not ready after {attempts} checks over {waited:?}")]
    ForkNotReady {
        fork: String,
        attempts: u32,
        waited: Duration,
    },

    #[error("Failed to clone fork {fork}: {source}")]
    Clone { fork: String, source: GitHubError },

    #[error("Fork {fork} has no head: default branch {branch} not found")]
    MissingHead { fork: String, branch: String },

    #[error("Branch {branch} in {fork} already exists at {existing}, not moving it to {head}")]
    BranchConflict {
        fork: String,
        branch: String,
        existing: String,
        head: String,
    },

    #[error("Failed to create branch {branch} in {fork}: {source}")]
    CreateBranch {
        fork: String,
        branch: String,
        source: GitHubError,
    },

    #[error("Setup cancelled")]
    Cancelled,
}

/// What a successful setup run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupOutcome {
    Created { fork: String, branch: String, sha: String },
    /// The branch was already there at the fork's head; nothing changed.
    AlreadyPresent { fork: String, branch: String, sha: String },
    /// The merged repository belongs to the actor, which cannot fork itself.
    SkippedOwnRepository,
}

/// Fork a repository and mark its head with the setup branch.
pub struct AutoSetupWorkflow {
    api: Arc<dyn PullRequestApi>,
    git: Arc<dyn GitRemote>,
    settings: SetupSettings,
}

impl AutoSetupWorkflow {
    pub fn new(
        api: Arc<dyn PullRequestApi>,
        git: Arc<dyn GitRemote>,
        settings: SetupSettings,
    ) -> Self {
        Self { api, git, settings }
    }

    pub fn branch(&self) -> &str {
        &self.settings.branch
    }

    /// Whether merges into `owner`'s repositories get a fork and setup
    /// branch. The actor's own repositories cannot be forked by the actor.
    pub fn applies_to(&self, owner: &str) -> bool {
        !owner.eq_ignore_ascii_case(&self.settings.actor)
    }

    /// Where the setup branch will live once the workflow has run for `repo`.
    pub fn branch_url(&self, repo: &str) -> String {
        format!(
            "{}/{}/{}/tree/{}",
            self.settings.web_url, self.settings.actor, repo, self.settings.branch
        )
    }

    /// Request the actor's fork of `owner/repo`. Repeating the request
    /// yields the same fork.
    pub async fn fork(&self, owner: &str, repo: &str) -> Result<Fork, SetupError> {
        self.api
            .create_fork(owner, repo)
            .await
            .map_err(|source| SetupError::Fork {
                repo: format!("{owner}/{repo}"),
                source,
            })
    }

    #[instrument(skip(self, cancel), fields(branch = %self.settings.branch))]
    pub async fn run(
        &self,
        owner: &str,
        repo: &str,
        cancel: &CancellationToken,
    ) -> Result<SetupOutcome, SetupError> {
        if !self.applies_to(owner) {
            info!("repository owned by the automation actor, skipping fork");
            return Ok(SetupOutcome::SkippedOwnRepository);
        }

        let fork = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SetupError::Cancelled),
            fork = self.fork(owner, repo) => fork?,
        };
        info!(fork = %fork, "fork requested");
        if !fork.name.eq_ignore_ascii_case(repo) {
            warn!(
                fork = %fork.full_name,
                announced = %self.branch_url(repo),
                "fork was given a different name, the announced setup link will not resolve"
            );
        }

        let policy = ReadinessPolicy {
            timeout: self.settings.fork_ready_timeout,
            initial_backoff: self.settings.initial_backoff,
            max_backoff: self.settings.max_backoff,
        };
        wait_until_ready(self.api.as_ref(), &fork, &policy, cancel).await?;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SetupError::Cancelled),
            outcome = self.ensure_branch(&fork) => outcome?,
        };
        info!(outcome = ?outcome, "setup complete");
        Ok(outcome)
    }

    /// Check-then-create the setup branch at the fork's head. An existing
    /// branch is left where it is.
    async fn ensure_branch(&self, fork: &Fork) -> Result<SetupOutcome, SetupError> {
        let branch = &self.settings.branch;
        let snapshot = self.snapshot(fork).await?;
        let head = snapshot
            .head()
            .ok_or_else(|| SetupError::MissingHead {
                fork: fork.full_name.clone(),
                branch: snapshot.default_branch.clone(),
            })?
            .to_string();
        debug!(head = %head, "resolved fork head");

        if let Some(existing) = snapshot.branch(branch) {
            return self.existing_branch(fork, existing, &head);
        }

        let created = self
            .git
            .create_branch(fork, branch, &head)
            .await
            .map_err(|source| SetupError::CreateBranch {
                fork: fork.full_name.clone(),
                branch: branch.clone(),
                source,
            })?;

        match created {
            BranchCreation::Created => Ok(SetupOutcome::Created {
                fork: fork.full_name.clone(),
                branch: branch.clone(),
                sha: head,
            }),
            BranchCreation::AlreadyExists => {
                // Someone created it between the snapshot and our request.
                let snapshot = self.snapshot(fork).await?;
                match snapshot.branch(branch) {
                    Some(existing) => self.existing_branch(fork, existing, &head),
                    None => Err(SetupError::CreateBranch {
                        fork: fork.full_name.clone(),
                        branch: branch.clone(),
                        source: GitHubError::Api {
                            status: reqwest::StatusCode::UNPROCESSABLE_ENTITY,
                            message: "reference reported as existing but not listed".to_string(),
                        },
                    }),
                }
            }
        }
    }

    async fn snapshot(&self, fork: &Fork) -> Result<RemoteSnapshot, SetupError> {
        self.git
            .clone_remote(fork)
            .await
            .map_err(|source| SetupError::Clone {
                fork: fork.full_name.clone(),
                source,
            })
    }

    fn existing_branch(
        &self,
        fork: &Fork,
        existing: &str,
        head: &str,
    ) -> Result<SetupOutcome, SetupError> {
        let branch = self.settings.branch.clone();
        if existing == head {
            debug!(sha = existing, "setup branch already at head");
            Ok(SetupOutcome::AlreadyPresent {
                fork: fork.full_name.clone(),
                branch,
                sha: head.to_string(),
            })
        } else {
            warn!(existing, head, "setup branch has moved, leaving it alone");
            Err(SetupError::BranchConflict {
                fork: fork.full_name.clone(),
                branch,
                existing: existing.to_string(),
                head: head.to_string(),
            })
        }
    }
}
