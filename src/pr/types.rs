use super::ResolveError;

/// Canonical identity of a pull request.
///
/// Owner and repo are never empty and the number is always positive;
/// [`PullRequestRef::new`] is the only way to build one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PullRequestRef {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

impl PullRequestRef {
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        number: u64,
    ) -> Result<Self, ResolveError> {
        let owner = owner.into();
        let repo = repo.into();
        if owner.is_empty() || repo.is_empty() {
            return Err(ResolveError::EmptyComponent(format!("{owner}/{repo}")));
        }
        if number == 0 {
            return Err(ResolveError::InvalidNumber {
                url: format!("{owner}/{repo}"),
                segment: "0".to_string(),
            });
        }
        Ok(Self { owner, repo, number })
    }

    /// "{owner}/{repo}"
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    /// Browser URL of the pull request under `web_base` (e.g. https://github.com).
    pub fn html_url(&self, web_base: &str) -> String {
        format!(
            "{}/{}/{}/pull/{}",
            web_base.trim_end_matches('/'),
            self.owner,
            self.repo,
            self.number
        )
    }
}

impl std::fmt::Display for PullRequestRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.number)
    }
}

/// Current state of a pull request. Recomputed on every classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullRequestState {
    Open,
    Closed,
    Merged,
}

impl std::fmt::Display for PullRequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PullRequestState::Open => write!(f, "Open"),
            PullRequestState::Closed => write!(f, "Closed"),
            PullRequestState::Merged => write!(f, "Merged"),
        }
    }
}
