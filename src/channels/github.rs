//! GitHub webhook normalizer: CI results and PR reviews.

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::NotifyMode;
use crate::pipeline::rules::Rule;
use crate::pipeline::types::{ActionSpec, Event, EventSource, facts};

pub const CHECK_RUN: &str = "check_run";
pub const WORKFLOW_RUN: &str = "workflow_run";
pub const PULL_REQUEST_REVIEW: &str = "pull_request_review";

/// Event types that produce events, with the action value that marks them final.
const TERMINAL_ACTIONS: &[(&str, &str)] = &[
    (CHECK_RUN, "completed"),
    (WORKFLOW_RUN, "completed"),
    (PULL_REQUEST_REVIEW, "submitted"),
];

#[derive(Debug, Default, Deserialize)]
struct GitHubPayload {
    #[serde(default)]
    action: String,
    #[serde(default)]
    repository: Repository,
    #[serde(default)]
    pull_request: PullRef,
    #[serde(default)]
    check_run: RunInfo,
    #[serde(default)]
    workflow_run: RunInfo,
}

#[derive(Debug, Default, Deserialize)]
struct Repository {
    #[serde(default)]
    full_name: String,
}

#[derive(Debug, Default, Deserialize)]
struct PullRef {
    #[serde(default)]
    number: u64,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Default, Deserialize)]
struct RunInfo {
    #[serde(default)]
    conclusion: Option<String>,
    #[serde(default)]
    pull_requests: Vec<PullRef>,
}

impl GitHubPayload {
    /// PR from `pull_request`, else the first PR of the check/workflow run.
    fn pr_number(&self) -> u64 {
        [
            Some(self.pull_request.number),
            self.check_run.pull_requests.first().map(|p| p.number),
            self.workflow_run.pull_requests.first().map(|p| p.number),
        ]
        .into_iter()
        .flatten()
        .find(|n| *n != 0)
        .unwrap_or(0)
    }

    fn conclusion(&self, event: &str) -> &str {
        let run = match event {
            CHECK_RUN => &self.check_run,
            WORKFLOW_RUN => &self.workflow_run,
            _ => return "",
        };
        run.conclusion.as_deref().unwrap_or("")
    }
}

/// Convert a GitHub webhook into an event, or `None` to ignore it.
///
/// `event_type` is the `X-GitHub-Event` header value.
pub fn normalize(event_type: &str, body: &[u8], mode: NotifyMode) -> Option<Event> {
    let Some((_, terminal)) = TERMINAL_ACTIONS.iter().find(|(e, _)| *e == event_type) else {
        debug!(event = %event_type, "Ignoring GitHub event");
        return None;
    };

    let payload: GitHubPayload = match serde_json::from_slice(body) {
        Ok(p) => p,
        Err(e) => {
            warn!(event = %event_type, error = %e, "Failed to parse GitHub payload");
            return None;
        }
    };

    if payload.action != *terminal {
        debug!(event = %event_type, action = %payload.action, "Ignoring non-terminal GitHub action");
        return None;
    }

    let conclusion = payload.conclusion(event_type);
    if mode == NotifyMode::Failures && conclusion == "success" {
        debug!(event = %event_type, "Ignoring successful CI result (failures mode)");
        return None;
    }

    let pr = payload.pr_number();
    let repo = payload.repository.full_name.as_str();

    Some(
        Event::new(EventSource::CiResult, event_type, pr.to_string(), event_type)
            .with_label(format!("github {event_type}/{} PR#{pr}", payload.action))
            .with_fact(facts::EVENT, event_type)
            .with_fact(facts::ACTION, payload.action.as_str())
            .with_fact(facts::CONCLUSION, conclusion)
            .with_fact(facts::REPOSITORY, repo)
            .with_field("Event", event_type)
            .with_field("Action", payload.action.as_str())
            .with_field("Repository", repo)
            .with_field("PR", pr.to_string())
            .with_field("Title", payload.pull_request.title.as_str())
            .with_field("Conclusion", conclusion),
    )
}

/// One catch-all rule per CI event kind, using the standard CI message.
pub fn default_rules() -> Vec<Rule> {
    TERMINAL_ACTIONS
        .iter()
        .map(|(event, _)| Rule::new(*event, "", ActionSpec::default()).with_name(format!("github-{event}")))
        .collect()
}
