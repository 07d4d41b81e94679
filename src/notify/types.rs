use serde::Serialize;

use crate::pr::PullRequestState;

/// A labelled link rendered as a button under the announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionLink {
    pub label: String,
    pub url: String,
}

/// Announcement for one classified activity record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnouncementPayload {
    /// "{owner}/{repo}"
    pub repository_full_name: String,
    pub status: PullRequestState,
    /// Rendered in order
    pub action_links: Vec<ActionLink>,
}

impl AnnouncementPayload {
    /// Render into the Slack-compatible webhook body.
    pub fn to_webhook(&self, text: &str, username: &str) -> WebhookPayload {
        let attachment = Attachment {
            fields: vec![
                Field {
                    title: "Repository".to_string(),
                    value: self.repository_full_name.clone(),
                    short: true,
                },
                Field {
                    title: "Status".to_string(),
                    value: self.status.to_string(),
                    short: true,
                },
            ],
            actions: self
                .action_links
                .iter()
                .map(|link| Action {
                    kind: "button".to_string(),
                    text: link.label.clone(),
                    url: link.url.clone(),
                    style: "primary".to_string(),
                })
                .collect(),
        };

        WebhookPayload {
            text: text.to_string(),
            username: username.to_string(),
            attachments: vec![attachment],
        }
    }
}

/// Body posted to the chat webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookPayload {
    pub text: String,
    pub username: String,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub fields: Vec<Field>,
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
    pub title: String,
    pub value: String,
    pub short: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    pub url: String,
    pub style: String,
}
