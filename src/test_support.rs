//! In-memory collaborators shared by the unit tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::StatusCode;

use crate::config::{PollSettings, SetupSettings, WebhookSettings};
use crate::github::types::{Owner, RepositorySummary, Subject};
use crate::github::{
    ActivityFeed, ActivityRecord, BranchCreation, FeedError, Fork, GitHubError, GitRemote,
    PullRequestApi, PullRequestDetails, RemoteSnapshot,
};
use crate::notify::{DispatchError, Dispatcher, WebhookPayload, WebhookSender};
use crate::pr::PullRequestRef;
use crate::scheduler::window::PollWindow;
use crate::setup::AutoSetupWorkflow;

type Journal = Arc<Mutex<Vec<String>>>;

pub fn record(id: &str, latest_comment_url: Option<&str>) -> ActivityRecord {
    let updated_at = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 1).unwrap();
    ActivityRecord {
        id: id.to_string(),
        updated_at,
        subject: Subject {
            title: format!("Notification {id}"),
            url: None,
            latest_comment_url: latest_comment_url.map(str::to_string),
            kind: "PullRequest".to_string(),
        },
        repository: Some(RepositorySummary {
            full_name: "octo/repo".to_string(),
        }),
    }
}

pub fn record_at(id: &str, updated_at: DateTime<Utc>) -> ActivityRecord {
    ActivityRecord {
        updated_at,
        ..record(id, Some("https://github.com/octo/repo/pull/1/comments/1"))
    }
}

pub fn fork() -> Fork {
    Fork {
        full_name: "robot/repo".to_string(),
        name: "repo".to_string(),
        owner: Owner {
            login: "robot".to_string(),
        },
        clone_url: "https://github.com/robot/repo.git".to_string(),
        html_url: "https://github.com/robot/repo".to_string(),
        default_branch: "main".to_string(),
    }
}

pub fn setup_settings() -> SetupSettings {
    SetupSettings {
        enabled: true,
        actor: "robot".to_string(),
        branch: "CodeLingo-Setup".to_string(),
        web_url: "https://github.com".to_string(),
        fork_ready_timeout: Duration::from_secs(30),
        initial_backoff: Duration::from_millis(500),
        max_backoff: Duration::from_secs(4),
    }
}

pub fn webhook_settings() -> WebhookSettings {
    WebhookSettings {
        url: "https://hooks.example.com/services/T000/B000/XXXX".to_string(),
        username: "robot".to_string(),
        text: "There was some activity on a Pull Request".to_string(),
    }
}

pub fn poll_settings() -> PollSettings {
    PollSettings {
        interval: Duration::from_secs(2),
        overlap: Duration::from_secs(1),
        max_concurrent_records: 4,
        max_consecutive_feed_failures: 30,
    }
}

/// Dispatcher wired to the fakes, with the webhook writing into the
/// GitHub fake's journal so call order can be asserted.
pub fn dispatcher(
    github: &Arc<FakeGitHub>,
    webhook: &Arc<RecordingWebhook>,
    setup_enabled: bool,
) -> Dispatcher {
    webhook.attach_journal(github.journal.clone());
    let setup = setup_enabled
        .then(|| AutoSetupWorkflow::new(github.clone(), github.clone(), setup_settings()));
    Dispatcher::new(
        webhook.clone(),
        webhook_settings(),
        "https://github.com".to_string(),
        setup,
    )
}

fn api_error(status: StatusCode, message: &str) -> GitHubError {
    GitHubError::Api {
        status,
        message: message.to_string(),
    }
}

/// Feed that replays queued responses and remembers the windows asked for.
#[derive(Default)]
pub struct FakeFeed {
    responses: Mutex<VecDeque<Result<Vec<ActivityRecord>, FeedError>>>,
    windows: Mutex<Vec<PollWindow>>,
}

impl FakeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: Result<Vec<ActivityRecord>, FeedError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn windows(&self) -> Vec<PollWindow> {
        self.windows.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActivityFeed for FakeFeed {
    async fn list_activity(&self, window: &PollWindow) -> Result<Vec<ActivityRecord>, FeedError> {
        self.windows.lock().unwrap().push(*window);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Readiness {
    Immediately,
    AfterChecks(u32),
    Never,
    Error,
}

struct GitHubState {
    pull_requests: HashMap<(String, String, u64), PullRequestDetails>,
    readiness: Readiness,
    readiness_checks: u32,
    fork_requests: u32,
    forks_created: u32,
    fork_sources: Vec<(String, String)>,
    fail_forks: bool,
    fork_name: Option<String>,
    branches: BTreeMap<String, String>,
    branch_create_requests: u32,
    race: Option<(String, String)>,
}

/// Pull request API, fork API and git remote in one in-memory fake.
pub struct FakeGitHub {
    state: Mutex<GitHubState>,
    journal: Journal,
}

impl FakeGitHub {
    pub const HEAD_SHA: &'static str = "0123456789abcdef0123456789abcdef01234567";

    pub fn new() -> Self {
        let mut branches = BTreeMap::new();
        branches.insert("main".to_string(), Self::HEAD_SHA.to_string());
        Self {
            state: Mutex::new(GitHubState {
                pull_requests: HashMap::new(),
                readiness: Readiness::Immediately,
                readiness_checks: 0,
                fork_requests: 0,
                forks_created: 0,
                fork_sources: Vec::new(),
                fail_forks: false,
                fork_name: None,
                branches,
                branch_create_requests: 0,
                race: None,
            }),
            journal: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn log(&self, event: &str) {
        self.journal.lock().unwrap().push(event.to_string());
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    pub fn set_pull_request(&self, pr: &PullRequestRef, details: PullRequestDetails) {
        self.state
            .lock()
            .unwrap()
            .pull_requests
            .insert((pr.owner.clone(), pr.repo.clone(), pr.number), details);
    }

    pub fn set_readiness(&self, readiness: Readiness) {
        self.state.lock().unwrap().readiness = readiness;
    }

    pub fn fail_forks(&self) {
        self.state.lock().unwrap().fail_forks = true;
    }

    /// Make the fork endpoint hand back a fork named differently from
    /// the upstream repository.
    pub fn rename_fork(&self, name: &str) {
        self.state.lock().unwrap().fork_name = Some(name.to_string());
    }

    pub fn fork_requests(&self) -> u32 {
        self.state.lock().unwrap().fork_requests
    }

    pub fn forks_created(&self) -> u32 {
        self.state.lock().unwrap().forks_created
    }

    pub fn fork_sources(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().fork_sources.clone()
    }

    pub fn branch_sha(&self, name: &str) -> Option<String> {
        self.state.lock().unwrap().branches.get(name).cloned()
    }

    /// Simulate a human moving a branch in the fork.
    pub fn set_branch(&self, name: &str, sha: &str) {
        self.state
            .lock()
            .unwrap()
            .branches
            .insert(name.to_string(), sha.to_string());
    }

    pub fn clear_branches(&self) {
        self.state.lock().unwrap().branches.clear();
    }

    /// Make the next branch creation lose a race against another writer
    /// that creates `name` at `sha` first.
    pub fn race_branch_creation(&self, name: &str, sha: &str) {
        self.state.lock().unwrap().race = Some((name.to_string(), sha.to_string()));
    }

    pub fn branch_create_requests(&self) -> u32 {
        self.state.lock().unwrap().branch_create_requests
    }
}

#[async_trait]
impl PullRequestApi for FakeGitHub {
    async fn get_pull_request(
        &self,
        pr: &PullRequestRef,
    ) -> Result<PullRequestDetails, GitHubError> {
        self.log("get_pull_request");
        self.state
            .lock()
            .unwrap()
            .pull_requests
            .get(&(pr.owner.clone(), pr.repo.clone(), pr.number))
            .cloned()
            .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Not Found"))
    }

    async fn create_fork(&self, owner: &str, repo: &str) -> Result<Fork, GitHubError> {
        self.log("fork");
        let mut state = self.state.lock().unwrap();
        state.fork_requests += 1;
        state.fork_sources.push((owner.to_string(), repo.to_string()));
        if state.fail_forks {
            return Err(api_error(StatusCode::FORBIDDEN, "Forking is disabled"));
        }
        if state.forks_created == 0 {
            state.forks_created = 1;
        }
        match &state.fork_name {
            Some(name) => Ok(Fork {
                full_name: format!("robot/{name}"),
                name: name.clone(),
                ..fork()
            }),
            None => Ok(fork()),
        }
    }

    async fn fork_ready(&self, _fork: &Fork) -> Result<bool, GitHubError> {
        let mut state = self.state.lock().unwrap();
        state.readiness_checks += 1;
        match state.readiness {
            Readiness::Immediately => Ok(true),
            Readiness::AfterChecks(n) => Ok(state.readiness_checks >= n),
            Readiness::Never => Ok(false),
            Readiness::Error => Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, "boom")),
        }
    }
}

#[async_trait]
impl GitRemote for FakeGitHub {
    async fn clone_remote(&self, fork: &Fork) -> Result<RemoteSnapshot, GitHubError> {
        self.log("clone");
        Ok(RemoteSnapshot {
            default_branch: fork.default_branch.clone(),
            branches: self.state.lock().unwrap().branches.clone(),
        })
    }

    async fn create_branch(
        &self,
        _fork: &Fork,
        branch: &str,
        sha: &str,
    ) -> Result<BranchCreation, GitHubError> {
        self.log("create_branch");
        let mut state = self.state.lock().unwrap();
        state.branch_create_requests += 1;
        if let Some((name, winner)) = state.race.take() {
            state.branches.insert(name, winner);
        }
        if state.branches.contains_key(branch) {
            return Ok(BranchCreation::AlreadyExists);
        }
        state.branches.insert(branch.to_string(), sha.to_string());
        Ok(BranchCreation::Created)
    }
}

/// Webhook that records every payload instead of sending it.
pub struct RecordingWebhook {
    sent: Mutex<Vec<(String, WebhookPayload)>>,
    fail: bool,
    journal: Mutex<Option<Journal>>,
}

impl RecordingWebhook {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: false,
            journal: Mutex::new(None),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    fn attach_journal(&self, journal: Journal) {
        *self.journal.lock().unwrap() = Some(journal);
    }

    pub fn sent(&self) -> Vec<(String, WebhookPayload)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl WebhookSender for RecordingWebhook {
    async fn send(&self, url: &str, payload: &WebhookPayload) -> Result<(), DispatchError> {
        if let Some(journal) = self.journal.lock().unwrap().as_ref() {
            journal.lock().unwrap().push("webhook".to_string());
        }
        if self.fail {
            return Err(DispatchError::Rejected {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: "channel_is_archived".to_string(),
            });
        }
        self.sent
            .lock()
            .unwrap()
            .push((url.to_string(), payload.clone()));
        Ok(())
    }
}
