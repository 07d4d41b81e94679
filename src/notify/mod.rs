pub mod types;
pub mod webhook;

pub use types::{ActionLink, AnnouncementPayload, WebhookPayload};
pub use webhook::{HttpWebhook, TerminalWebhook, WebhookSender};

use std::sync::Arc;

use reqwest::StatusCode;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::config::WebhookSettings;
use crate::pr::{PullRequestRef, PullRequestState};
use crate::setup::{AutoSetupWorkflow, SetupError, SetupOutcome};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Webhook request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Webhook rejected payload with {status}: {body}")]
    Rejected { status: StatusCode, body: String },
}

/// Independent results of handling one classified pull request.
///
/// Delivery failures are accepted as lost; nothing is retried.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub payload: AnnouncementPayload,
    pub delivery: Result<(), DispatchError>,
    /// Present only for merged pull requests with setup enabled
    pub setup: Option<Result<SetupOutcome, SetupError>>,
}

/// Announces pull request activity and kicks off setup for merges.
pub struct Dispatcher {
    sender: Arc<dyn WebhookSender>,
    webhook: WebhookSettings,
    web_url: String,
    setup: Option<AutoSetupWorkflow>,
}

impl Dispatcher {
    pub fn new(
        sender: Arc<dyn WebhookSender>,
        webhook: WebhookSettings,
        web_url: String,
        setup: Option<AutoSetupWorkflow>,
    ) -> Self {
        Self {
            sender,
            webhook,
            web_url,
            setup,
        }
    }

    pub fn build_payload(&self, pr: &PullRequestRef, state: PullRequestState) -> AnnouncementPayload {
        let mut action_links = vec![ActionLink {
            label: "View Pull Request".to_string(),
            url: pr.html_url(&self.web_url),
        }];
        if state == PullRequestState::Merged {
            if let Some(setup) = self.setup.as_ref().filter(|s| s.applies_to(&pr.owner)) {
                action_links.push(ActionLink {
                    label: "Open Setup Branch".to_string(),
                    url: setup.branch_url(&pr.repo),
                });
            }
        }

        AnnouncementPayload {
            repository_full_name: pr.full_name(),
            status: state,
            action_links,
        }
    }

    /// Send the announcement, then run setup for merged pull requests.
    ///
    /// The announcement goes out before setup starts, so a setup failure
    /// can neither block nor retract it.
    #[instrument(skip(self, pr, state, cancel), fields(pr = %pr, state = %state))]
    pub async fn dispatch(
        &self,
        pr: &PullRequestRef,
        state: PullRequestState,
        cancel: &CancellationToken,
    ) -> DispatchOutcome {
        let payload = self.build_payload(pr, state);
        let body = payload.to_webhook(&self.webhook.text, &self.webhook.username);

        let delivery = self.sender.send(&self.webhook.url, &body).await;
        match &delivery {
            Ok(()) => info!("announcement delivered"),
            Err(e) => warn!(error = %e, "announcement delivery failed, not retrying"),
        }

        let setup = match (&self.setup, state) {
            (Some(workflow), PullRequestState::Merged) => {
                let result = workflow.run(&pr.owner, &pr.repo, cancel).await;
                if let Err(e) = &result {
                    error!(error = %e, branch = workflow.branch(), "auto setup failed");
                }
                Some(result)
            }
            _ => None,
        };

        DispatchOutcome {
            payload,
            delivery,
            setup,
        }
    }
}
