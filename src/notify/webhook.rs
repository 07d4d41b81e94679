use std::time::Duration;

use async_trait::async_trait;
use colored::Colorize;
use tracing::{debug, instrument};

use super::{DispatchError, WebhookPayload};

/// Delivers rendered announcements to a chat channel.
#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn send(&self, url: &str, payload: &WebhookPayload) -> Result<(), DispatchError>;
}

/// Posts payloads as JSON to an incoming-webhook URL.
pub struct HttpWebhook {
    http: reqwest::Client,
}

impl HttpWebhook {
    pub fn new(timeout: Duration) -> Result<Self, DispatchError> {
        let http = reqwest::Client::builder()
            .user_agent("pr-watcher")
            .timeout(timeout)
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl WebhookSender for HttpWebhook {
    #[instrument(skip(self, url, payload))]
    async fn send(&self, url: &str, payload: &WebhookPayload) -> Result<(), DispatchError> {
        let response = self.http.post(url).json(payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::Rejected { status, body });
        }
        debug!(%status, "webhook accepted payload");
        Ok(())
    }
}

/// Prints announcements to stdout instead of posting them (`--dry-run`).
pub struct TerminalWebhook;

#[async_trait]
impl WebhookSender for TerminalWebhook {
    async fn send(&self, _url: &str, payload: &WebhookPayload) -> Result<(), DispatchError> {
        println!("{}", render_terminal(payload));
        Ok(())
    }
}

fn render_terminal(payload: &WebhookPayload) -> String {
    let mut out = format!("{} {}\n", "▶".bold(), payload.text.bold());
    for attachment in &payload.attachments {
        for field in &attachment.fields {
            let value = match field.value.as_str() {
                "Merged" => field.value.magenta().bold(),
                "Open" => field.value.green().bold(),
                "Closed" => field.value.red().bold(),
                _ => field.value.normal(),
            };
            out.push_str(&format!("  {}: {}\n", field.title, value));
        }
        for action in &attachment.actions {
            out.push_str(&format!("  [{}] {}\n", action.text.cyan(), action.url));
        }
    }
    out
}
