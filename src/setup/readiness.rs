use std::time::Duration;

use tokio::time::{sleep, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::SetupError;
use crate::github::{Fork, PullRequestApi};

/// Doubling delay sequence capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            next: initial.min(max),
            max,
        }
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        self.next = current.saturating_mul(2).min(self.max);
        Some(current)
    }
}

#[derive(Debug, Clone)]
pub struct ReadinessPolicy {
    pub timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

/// Poll the fork until the server reports it ready, backing off between
/// checks. Gives up with [`SetupError::ForkNotReady`] once `policy.timeout`
/// has elapsed; an in-flight check is abandoned at the deadline.
#[instrument(skip(api, fork, policy, cancel), fields(fork = %fork.full_name))]
pub async fn wait_until_ready(
    api: &dyn PullRequestApi,
    fork: &Fork,
    policy: &ReadinessPolicy,
    cancel: &CancellationToken,
) -> Result<u32, SetupError> {
    let started = Instant::now();
    let deadline = started + policy.timeout;
    let mut delays = Backoff::new(policy.initial_backoff, policy.max_backoff);
    let mut attempts = 0;

    loop {
        attempts += 1;
        let check = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SetupError::Cancelled),
            check = timeout_at(deadline, api.fork_ready(fork)) => check,
        };

        match check {
            Ok(Ok(true)) => {
                debug!(attempts, waited = ?started.elapsed(), "fork ready");
                return Ok(attempts);
            }
            Ok(Ok(false)) => debug!(attempts, "fork not ready yet"),
            Ok(Err(source)) => {
                return Err(SetupError::Readiness {
                    fork: fork.full_name.clone(),
                    source,
                })
            }
            Err(_elapsed) => {}
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(SetupError::ForkNotReady {
                fork: fork.full_name.clone(),
                attempts,
                waited: now - started,
            });
        }

        let delay = delays.next().unwrap_or(policy.max_backoff).min(deadline - now);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SetupError::Cancelled),
            _ = sleep(delay) => {}
        }
    }
}
