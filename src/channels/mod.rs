//! Event sources: per-source normalizers and ingestion entry points.
//!
//! Push sources (Trello, GitHub) arrive as webhook bodies and go through
//! `PushIngest::handle_push_event`. Gmail is pulled by one `CursorPoller`
//! per account.

pub mod cursor;
pub mod github;
pub mod gmail;
pub mod gmail_poller;
pub mod trello;

use std::fmt;

use tracing::debug;

use crate::config::{NotifyMode, TrelloRules};
use crate::pipeline::{Event, Pipeline, Rule};

pub use cursor::{CursorStore, FileCursorStore};
pub use gmail::{GmailHistoryClient, HistorySource};
pub use gmail_poller::{CursorPoller, ShutdownSignal, spawn_gmail_poller};

/// Webhook-driven sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushSource {
    Trello,
    GitHub,
}

impl fmt::Display for PushSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trello => write!(f, "trello"),
            Self::GitHub => write!(f, "github"),
        }
    }
}

/// Push-path entry point: normalize, then run through the pipeline.
#[derive(Clone)]
pub struct PushIngest {
    pipeline: Pipeline,
    trello: TrelloRules,
    github_rules: Vec<Rule>,
    notify_mode: NotifyMode,
}

impl PushIngest {
    /// GitHub falls back to built-in rules when none are configured.
    pub fn new(
        pipeline: Pipeline,
        trello: TrelloRules,
        github_rules: Vec<Rule>,
        notify_mode: NotifyMode,
    ) -> Self {
        let github_rules = if github_rules.is_empty() {
            github::default_rules()
        } else {
            github_rules
        };
        Self {
            pipeline,
            trello,
            github_rules,
            notify_mode,
        }
    }

    /// Handle one verified webhook body. Returns whether an action was
    /// dispatched; every failure is absorbed here.
    ///
    /// `event_type` is the source's event header (GitHub's `X-GitHub-Event`).
    pub async fn handle_push_event(
        &self,
        source: PushSource,
        body: &[u8],
        event_type: Option<&str>,
    ) -> bool {
        let Some((event, rules)) = self.normalize(source, body, event_type) else {
            debug!(source = %source, "Push event ignored");
            return false;
        };
        self.pipeline.process(event, rules).await.dispatched()
    }

    fn normalize(
        &self,
        source: PushSource,
        body: &[u8],
        event_type: Option<&str>,
    ) -> Option<(Event, &[Rule])> {
        match source {
            PushSource::Trello => {
                trello::normalize(body, &self.trello).map(|e| (e, self.trello.rules.as_slice()))
            }
            PushSource::GitHub => {
                github::normalize(event_type.unwrap_or(""), body, self.notify_mode)
                    .map(|e| (e, self.github_rules.as_slice()))
            }
        }
    }
}
