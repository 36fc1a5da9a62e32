//! Shared types for the event dispatch pipeline.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Well-known fact names used by rule conditions.
pub mod facts {
    pub const LIST: &str = "list";
    pub const ACTION: &str = "action";
    pub const EVENT: &str = "event";
    pub const CONCLUSION: &str = "conclusion";
    pub const REPOSITORY: &str = "repository";
    pub const FROM: &str = "from";
    pub const LABELS: &str = "labels";
    pub const SUBJECT: &str = "subject";
}

/// Fact/field map. Ordered so logs and rendered output are stable.
pub type FieldMap = BTreeMap<String, String>;

// ── Event ───────────────────────────────────────────────────────────

/// Where an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    CardMove,
    Comment,
    CiResult,
    Mail,
}

impl EventSource {
    /// Short tag used in dedup keys and logs.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::CardMove => "card_move",
            Self::Comment => "comment",
            Self::CiResult => "ci_result",
            Self::Mail => "mail",
        }
    }

    /// Timing applied when a rule leaves timeout/delay unset.
    pub fn default_timing(&self) -> Timing {
        match self {
            Self::CardMove | Self::Comment | Self::CiResult => Timing {
                timeout_secs: 120,
                delay_secs: 2,
            },
            Self::Mail => Timing {
                timeout_secs: 30,
                delay_secs: 0,
            },
        }
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Canonical, source-agnostic event.
///
/// Built fresh per webhook call or polled history item, consumed once by
/// the pipeline and dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub source: EventSource,
    /// Logical kind rules are keyed on (e.g. "card_moved", "check_run").
    pub kind: String,
    /// Card id, PR number or message id.
    pub subject_id: String,
    /// Separates event kinds on the same subject in the dedup key.
    pub discriminator: String,
    /// Human label used as the dispatched job's name.
    pub label: String,
    pub facts: FieldMap,
    pub render_fields: FieldMap,
}

impl Event {
    pub fn new(
        source: EventSource,
        kind: impl Into<String>,
        subject_id: impl Into<String>,
        discriminator: impl Into<String>,
    ) -> Self {
        Self {
            source,
            kind: kind.into(),
            subject_id: subject_id.into(),
            discriminator: discriminator.into(),
            label: String::new(),
            facts: FieldMap::new(),
            render_fields: FieldMap::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_fact(mut self, name: &str, value: impl Into<String>) -> Self {
        self.facts.insert(name.to_string(), value.into());
        self
    }

    pub fn with_field(mut self, name: &str, value: impl Into<String>) -> Self {
        self.render_fields.insert(name.to_string(), value.into());
        self
    }

    /// `"<source>:<subjectId>:<discriminator>"`.
    pub fn dedup_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.source.tag(),
            self.subject_id,
            self.discriminator
        )
    }
}

// ── Actions ─────────────────────────────────────────────────────────

/// Timeout/delay pair handed to the execution gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub timeout_secs: u32,
    pub delay_secs: u32,
}

/// Where a mail notification should be delivered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyTarget {
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub channel: String,
}

/// What a matched rule asks the gateway to do.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawActionSpec")]
pub struct ActionSpec {
    /// Message template (`{{.Field}}` placeholders).
    pub template: String,
    /// Seconds; `None` or 0 falls back to the source default.
    pub timeout_secs: Option<u32>,
    pub delay_secs: Option<u32>,
    pub agent_id: Option<String>,
    /// Wraps the rendered text into a delivery instruction.
    pub notify: Option<NotifyTarget>,
}

/// Rule-file shape of an action. Mail rules may carry `template` and
/// `agent_id` inside `notify`; those fill the action-level fields when unset.
#[derive(Deserialize)]
struct RawActionSpec {
    #[serde(default, alias = "message_template")]
    template: String,
    #[serde(default, alias = "timeout")]
    timeout_secs: Option<u32>,
    #[serde(default, alias = "delay")]
    delay_secs: Option<u32>,
    #[serde(default)]
    agent_id: Option<String>,
    #[serde(default)]
    notify: Option<RawNotify>,
}

#[derive(Deserialize)]
struct RawNotify {
    #[serde(default)]
    target: String,
    #[serde(default)]
    channel: String,
    #[serde(default)]
    template: String,
    #[serde(default)]
    agent_id: Option<String>,
}

impl From<RawActionSpec> for ActionSpec {
    fn from(raw: RawActionSpec) -> Self {
        let mut spec = Self {
            template: raw.template,
            timeout_secs: raw.timeout_secs,
            delay_secs: raw.delay_secs,
            agent_id: raw.agent_id.filter(|a| !a.is_empty()),
            notify: None,
        };
        if let Some(notify) = raw.notify {
            if spec.template.is_empty() {
                spec.template = notify.template;
            }
            if spec.agent_id.is_none() {
                spec.agent_id = notify.agent_id.filter(|a| !a.is_empty());
            }
            spec.notify = Some(NotifyTarget {
                target: notify.target,
                channel: notify.channel,
            });
        }
        spec
    }
}

impl ActionSpec {
    /// Resolve timing against the source defaults. Zero counts as unset.
    pub fn timing(&self, source: EventSource) -> Timing {
        let defaults = source.default_timing();
        Timing {
            timeout_secs: self
                .timeout_secs
                .filter(|t| *t > 0)
                .unwrap_or(defaults.timeout_secs),
            delay_secs: self
                .delay_secs
                .filter(|d| *d > 0)
                .unwrap_or(defaults.delay_secs),
        }
    }
}

/// Fully resolved one-shot action for the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionDescriptor {
    pub name: String,
    pub message: String,
    pub target_agent: Option<String>,
    pub timeout_secs: u32,
    pub delay_secs: u32,
}
