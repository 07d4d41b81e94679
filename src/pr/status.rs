use thiserror::Error;
use tracing::{debug, instrument};

use super::types::{PullRequestRef, PullRequestState};
use crate::github::{GitHubError, PullRequestApi, PullRequestDetails};

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("Failed to fetch pull request {pr}: {source}")]
    Fetch {
        pr: PullRequestRef,
        source: GitHubError,
    },
}

impl From<&PullRequestDetails> for PullRequestState {
    /// Merged wins over Closed: a merged pull request also has `closed_at` set.
    fn from(details: &PullRequestDetails) -> Self {
        if details.merged {
            PullRequestState::Merged
        } else if details.closed_at.is_none() {
            PullRequestState::Open
        } else {
            PullRequestState::Closed
        }
    }
}

/// Fetch the pull request and report its current state.
///
/// An API failure is an error, never a guess: unclassifiable pull requests
/// must not be announced as Open.
#[instrument(skip(api, pr), fields(pr = %pr))]
pub async fn classify(
    api: &dyn PullRequestApi,
    pr: &PullRequestRef,
) -> Result<PullRequestState, ClassifyError> {
    let details = api
        .get_pull_request(pr)
        .await
        .map_err(|source| ClassifyError::Fetch {
            pr: pr.clone(),
            source,
        })?;
    let state = PullRequestState::from(&details);
    debug!(state = %state, "classified pull request");
    Ok(state)
}
