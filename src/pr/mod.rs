pub mod status;
pub mod types;

pub use types::{PullRequestRef, PullRequestState};

use thiserror::Error;
use tracing::{debug, instrument};

use crate::github::ActivityRecord;

/// Raw reference URLs shorter than this cannot carry owner, repo, kind and number.
const MIN_PATH_SEGMENTS: usize = 5;

/// Path prefixes in front of `{owner}/{repo}` on REST API URLs.
const API_PREFIXES: &[&[&str]] = &[&["api", "v3", "repos"], &["repos"]];

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Notification {0} has no reference URL")]
    MissingUrl(String),

    #[error("Invalid reference URL: {0}")]
    InvalidUrl(String),

    #[error("Reference URL {url} has {found} path segments, expected at least 5")]
    TooFewSegments { url: String, found: usize },

    #[error("Reference URL {url} has no valid pull request number (found {segment:?})")]
    InvalidNumber { url: String, segment: String },

    #[error("Reference has an empty owner or repository: {0}")]
    EmptyComponent(String),
}

/// Derive the pull request an activity record refers to.
///
/// The latest comment URL is tried first; the subject URL is the fallback
/// when the comment URL is missing or does not resolve. The first failure
/// is returned when nothing resolves.
#[instrument(skip(record), fields(record = %record.id))]
pub fn resolve(record: &ActivityRecord) -> Result<PullRequestRef, ResolveError> {
    let mut first_error = None;
    for url in record.reference_urls() {
        match parse_reference_url(url) {
            Ok(pr) => {
                debug!(url, pr = %pr, "resolved pull request");
                return Ok(pr);
            }
            Err(e) => {
                debug!(url, error = %e, "reference URL did not resolve");
                first_error.get_or_insert(e);
            }
        }
    }
    Err(first_error.unwrap_or_else(|| ResolveError::MissingUrl(record.id.clone())))
}

/// Parse a reference URL of the shape `/{owner}/{repo}/{kind}/{number}/...`.
///
/// API URLs carry a `repos/` (or `api/v3/repos/`) prefix which is skipped.
/// The kind segment is whatever the feed reported (`issues`, `pulls`, ...)
/// and is normalised away: the result always names the pull request.
pub fn parse_reference_url(url: &str) -> Result<PullRequestRef, ResolveError> {
    let parsed = reqwest::Url::parse(url).map_err(|_| ResolveError::InvalidUrl(url.to_string()))?;

    let segments: Vec<&str> = parsed.path().trim_matches('/').split('/').collect();
    let found = segments.iter().filter(|s| !s.is_empty()).count();
    if segments.len() < MIN_PATH_SEGMENTS || found < MIN_PATH_SEGMENTS {
        return Err(ResolveError::TooFewSegments {
            url: url.to_string(),
            found,
        });
    }

    let rest = API_PREFIXES
        .iter()
        .find_map(|prefix| segments.strip_prefix(*prefix))
        .unwrap_or(segments.as_slice());

    let [owner, repo, _kind, number, ..] = rest else {
        return Err(ResolveError::TooFewSegments {
            url: url.to_string(),
            found,
        });
    };

    let number = number
        .parse::<u64>()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| ResolveError::InvalidNumber {
            url: url.to_string(),
            segment: number.to_string(),
        })?;

    PullRequestRef::new(*owner, *repo, number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::record;

    #[test]
    fn test_parse_comment_url_normalises_kind() {
        let pr = parse_reference_url("https://github.com/octo/repo/issues/42/comments/7").unwrap();
        assert_eq!(pr, PullRequestRef::new("octo", "repo", 42).unwrap());
    }

    #[test]
    fn test_parse_api_pull_url() {
        let pr = parse_reference_url("https://api.github.com/repos/octo/repo/pulls/42").unwrap();
        assert_eq!(pr.owner, "octo");
        assert_eq!(pr.repo, "repo");
        assert_eq!(pr.number, 42);
    }

    #[test]
    fn test_parse_enterprise_api_url() {
        let pr = parse_reference_url("https://ghe.example.com/api/v3/repos/octo/repo/pulls/9")
            .unwrap();
        assert_eq!(pr.to_string(), "octo/repo#9");
    }

    #[test]
    fn test_parse_review_url_keeps_trailing_segments() {
        let pr = parse_reference_url("https://github.com/octo/repo/pull/5/reviews/99").unwrap();
        assert_eq!(pr.number, 5);
    }

    #[test]
    fn test_parse_too_few_segments() {
        let err = parse_reference_url("https://github.com/octo/repo/issues").unwrap_err();
        assert!(matches!(err, ResolveError::TooFewSegments { found: 3, .. }));
        assert!(parse_reference_url("https://github.com/octo/repo/pull/42").is_err());
        assert!(parse_reference_url("https://github.com/").is_err());
    }

    #[test]
    fn test_parse_non_numeric_number() {
        let err =
            parse_reference_url("https://api.github.com/repos/octo/repo/issues/comments/7")
                .unwrap_err();
        assert!(matches!(err, ResolveError::InvalidNumber { ref segment, .. } if segment == "comments"));
        assert!(parse_reference_url("https://github.com/octo/repo/pull/-3/x").is_err());
        assert!(parse_reference_url("https://github.com/octo/repo/pull/0/x").is_err());
    }

    #[test]
    fn test_parse_empty_owner() {
        let err = parse_reference_url("https://github.com/repos//repo/pull/1/x").unwrap_err();
        assert!(matches!(err, ResolveError::EmptyComponent(_)));
    }

    #[test]
    fn test_parse_garbage_never_panics() {
        for input in ["", "not-a-url", "https://", "mailto:someone", "https://x/a/b/c/d/e/f/g"] {
            let _ = parse_reference_url(input);
        }
    }

    #[test]
    fn test_resolve_falls_back_to_subject_url() {
        let mut rec = record(
            "1",
            Some("https://api.github.com/repos/octo/repo/issues/comments/7"),
        );
        rec.subject.url = Some("https://api.github.com/repos/octo/repo/pulls/42".to_string());
        let pr = resolve(&rec).unwrap();
        assert_eq!(pr.number, 42);
    }

    #[test]
    fn test_resolve_reports_first_failure() {
        let rec = record("1", Some("https://github.com/octo/repo"));
        let err = resolve(&rec).unwrap_err();
        assert!(matches!(err, ResolveError::TooFewSegments { found: 2, .. }));
    }

    #[test]
    fn test_resolve_missing_url() {
        let rec = record("9", None);
        let err = resolve(&rec).unwrap_err();
        assert!(matches!(err, ResolveError::MissingUrl(ref id) if id == "9"));
    }
}
