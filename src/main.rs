mod config;
mod github;
mod notify;
mod pr;
mod scheduler;
mod setup;
#[cfg(test)]
mod test_support;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, Settings};
use crate::github::GitHubClient;
use crate::notify::{Dispatcher, HttpWebhook, TerminalWebhook, WebhookSender};
use crate::scheduler::Scheduler;
use crate::setup::AutoSetupWorkflow;

/// PR Watcher: polls GitHub notifications for pull request activity,
/// announces each event to a chat webhook and, when a pull request is
/// merged, forks the repository and marks its head with a setup branch.
#[derive(Parser, Debug)]
#[command(name = "pr-watcher", version, about)]
struct Cli {
    /// GitHub login of the automation actor (falls back to GITHUB_USER)
    username: Option<String>,

    /// GitHub API token (falls back to GITHUB_TOKEN)
    #[arg(long)]
    token: Option<String>,

    /// Chat webhook URL (falls back to PR_WATCHER_WEBHOOK_URL)
    #[arg(long)]
    webhook_url: Option<String>,

    /// Seconds between polls
    #[arg(long)]
    interval_secs: Option<u64>,

    /// Config file path (default: .pr-watcher.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Announce merges without forking or creating the setup branch
    #[arg(long)]
    no_setup: bool,

    /// Print announcements to the terminal instead of posting them
    #[arg(long)]
    dry_run: bool,
}

impl Cli {
    /// Layer CLI flags over the file and environment configuration.
    fn apply(&self, config: &mut Config) {
        if let Some(username) = &self.username {
            config.github.username = Some(username.clone());
        }
        if let Some(token) = &self.token {
            config.github.token = Some(token.clone());
        }
        if let Some(url) = &self.webhook_url {
            config.webhook.url = Some(url.clone());
        }
        if let Some(secs) = self.interval_secs {
            config.poll.interval_secs = Some(secs);
        }
        if self.no_setup {
            config.setup.enabled = Some(false);
        }
        if self.dry_run && config.webhook.url.is_none() {
            config.webhook.url = Some("https://dry-run.invalid/".to_string());
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    info!("loading configuration");
    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    let settings = config.into_settings()?;
    debug!(
        user = %settings.github.username,
        api = %settings.github.api_url,
        interval = ?settings.poll.interval,
        setup = settings.setup.enabled,
        "configuration loaded"
    );

    let scheduler = build_scheduler(&settings, cli.dry_run)?;

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_interrupt(tokio::signal::ctrl_c(), cancel.clone()));

    scheduler.run(cancel).await?;
    info!("done");
    Ok(())
}

/// Cancel `cancel` once `interrupt` fires. If the handler cannot be
/// installed the watcher keeps running and only a kill stops it.
async fn cancel_on_interrupt(
    interrupt: impl Future<Output = std::io::Result<()>>,
    cancel: CancellationToken,
) {
    match interrupt.await {
        Ok(()) => {
            info!("interrupt received, shutting down");
            cancel.cancel();
        }
        Err(e) => warn!(error = %e, "failed to listen for interrupt, Ctrl-C will not stop gracefully"),
    }
}

fn build_scheduler(
    settings: &Settings,
    dry_run: bool,
) -> Result<Scheduler, Box<dyn std::error::Error>> {
    let github = Arc::new(GitHubClient::new(&settings.github)?);

    let sender: Arc<dyn WebhookSender> = if dry_run {
        info!("dry run: announcements go to the terminal");
        Arc::new(TerminalWebhook)
    } else {
        Arc::new(HttpWebhook::new(settings.github.request_timeout)?)
    };

    let setup = settings.setup.enabled.then(|| {
        AutoSetupWorkflow::new(github.clone(), github.clone(), settings.setup.clone())
    });
    let dispatcher = Dispatcher::new(
        sender,
        settings.webhook.clone(),
        settings.github.web_url.clone(),
        setup,
    );

    Ok(Scheduler::new(
        github.clone(),
        github,
        dispatcher,
        settings.poll.clone(),
        Utc::now(),
    ))
}
