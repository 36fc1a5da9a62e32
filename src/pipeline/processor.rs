//! Event processor: runs a canonical event through
//! dedup → rule match → render → dispatch.
//!
//! Nothing here returns an error: every outcome is a quiet success from the
//! event source's point of view.

use std::sync::Arc;

use tracing::{debug, info};

use crate::pipeline::dedup::Deduplicator;
use crate::pipeline::dispatch::Dispatcher;
use crate::pipeline::rules::{Rule, find_first_match};
use crate::pipeline::template;
use crate::pipeline::types::{ActionDescriptor, Event, EventSource};

/// What happened to one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Same dedup key seen within the TTL.
    Suppressed,
    /// No rule for this event; nothing to do.
    NoMatch,
    Dispatched,
    /// The gateway failed; logged and absorbed.
    DispatchFailed,
}

impl Outcome {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Suppressed => "suppressed",
            Self::NoMatch => "no_match",
            Self::Dispatched => "dispatched",
            Self::DispatchFailed => "dispatch_failed",
        }
    }

    pub fn dispatched(&self) -> bool {
        matches!(self, Self::Dispatched)
    }
}

/// Shared pipeline for push and pull sources.
#[derive(Clone)]
pub struct Pipeline {
    dedup: Arc<Deduplicator>,
    dispatcher: Dispatcher,
}

impl Pipeline {
    pub fn new(dedup: Arc<Deduplicator>, dispatcher: Dispatcher) -> Self {
        Self { dedup, dispatcher }
    }

    pub fn dedup(&self) -> &Arc<Deduplicator> {
        &self.dedup
    }

    /// Run one event against `rules`.
    pub async fn process(&self, event: Event, rules: &[Rule]) -> Outcome {
        let key = event.dedup_key();
        if !self.dedup.allow(&key) {
            info!(key = %key, "Duplicate event suppressed");
            return Outcome::Suppressed;
        }

        let Some(rule) = find_first_match(rules, &event.kind, &event.facts) else {
            debug!(
                kind = %event.kind,
                subject = %event.subject_id,
                "No matching rule"
            );
            return Outcome::NoMatch;
        };

        info!(
            kind = %event.kind,
            subject = %event.subject_id,
            rule = %rule.display_name(),
            "Processing event"
        );

        let action = build_action(&event, rule);
        match self.dispatcher.dispatch(&action).await {
            Ok(()) => Outcome::Dispatched,
            Err(_) => Outcome::DispatchFailed,
        }
    }
}

/// Resolve a matched rule into a concrete action for `event`.
pub fn build_action(event: &Event, rule: &Rule) -> ActionDescriptor {
    let spec = &rule.action;
    let template = if spec.template.is_empty() {
        default_template(event.source)
    } else {
        spec.template.as_str()
    };
    let rendered = template::render(template, &event.render_fields);

    let message = match &spec.notify {
        Some(notify) => format!(
            "Send this exact message (target={}, channel={}). Just send it, no extra text:\n\n{}",
            notify.target, notify.channel, rendered
        ),
        None => rendered,
    };

    let name = if event.label.is_empty() {
        format!("{}: {}", event.kind, event.subject_id)
    } else {
        event.label.clone()
    };

    let timing = spec.timing(event.source);
    ActionDescriptor {
        name,
        message,
        target_agent: spec.agent_id.clone().filter(|a| !a.is_empty()),
        timeout_secs: timing.timeout_secs,
        delay_secs: timing.delay_secs,
    }
}

/// Template used when a rule leaves its own empty.
pub fn default_template(source: EventSource) -> &'static str {
    match source {
        EventSource::CardMove => "Card {{.CardName}} moved to {{.ListAfterName}}",
        EventSource::Comment => "New comment on card {{.CardName}}",
        EventSource::CiResult => CI_RESULT_TEMPLATE,
        EventSource::Mail => "📧 {{.From}}: {{.Subject}}",
    }
}

const CI_RESULT_TEMPLATE: &str = "[Webhook Event] GitHub event detected.

Source: github
Event: {{.Event}}
Action: {{.Action}}
Repository: {{.Repository}}
PR: #{{.PR}}
Conclusion: {{.Conclusion}}

Check whether a tracked task has a PR matching this event.
If CI completed, act on the result. If a review was submitted, process its comments.
If nothing actionable, exit silently.";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::dispatch::testing::RecordingGateway;
    use crate::pipeline::types::{ActionSpec, NotifyTarget};

    fn pipeline(gateway: Arc<RecordingGateway>) -> Pipeline {
        Pipeline::new(
            Arc::new(Deduplicator::default()),
            Dispatcher::new(gateway),
        )
    }

    fn card_moved(card: &str, list: &str) -> Event {
        Event::new(EventSource::CardMove, "card_moved", card, "updateCard")
            .with_label(format!("card_moved: {card}"))
            .with_fact("list", list)
            .with_field("CardName", card)
            .with_field("ListAfterName", list)
    }

    fn ready_rule() -> Rule {
        Rule::new(
            "card_moved",
            "list == 'ready'",
            ActionSpec {
                template: "Card {{.CardName}} moved to {{.ListAfterName}}".into(),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn matched_event_dispatches_with_defaults() {
        let gateway = Arc::new(RecordingGateway::default());
        let outcome = pipeline(gateway.clone())
            .process(card_moved("c1", "ready"), &[ready_rule()])
            .await;

        assert_eq!(outcome, Outcome::Dispatched);
        let calls = gateway.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].message, "Card c1 moved to ready");
        assert_eq!(calls[0].name, "card_moved: c1");
        assert_eq!((calls[0].timeout_secs, calls[0].delay_secs), (120, 2));
        assert_eq!(calls[0].target_agent, None);
    }

    #[tokio::test]
    async fn duplicate_suppressed() {
        let gateway = Arc::new(RecordingGateway::default());
        let p = pipeline(gateway.clone());
        assert_eq!(p.process(card_moved("c1", "ready"), &[ready_rule()]).await, Outcome::Dispatched);
        assert_eq!(p.process(card_moved("c1", "ready"), &[ready_rule()]).await, Outcome::Suppressed);
        assert_eq!(gateway.calls().len(), 1);
    }

    #[tokio::test]
    async fn no_rule_is_quiet() {
        let gateway = Arc::new(RecordingGateway::default());
        let outcome = pipeline(gateway.clone())
            .process(card_moved("c1", "dev"), &[ready_rule()])
            .await;
        assert_eq!(outcome, Outcome::NoMatch);
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn gateway_failure_absorbed() {
        let gateway = Arc::new(RecordingGateway::failing());
        let outcome = pipeline(gateway.clone())
            .process(card_moved("c1", "ready"), &[ready_rule()])
            .await;
        assert_eq!(outcome, Outcome::DispatchFailed);
        assert!(!outcome.dispatched());
    }

    #[tokio::test]
    async fn configured_timing_and_agent_used() {
        let gateway = Arc::new(RecordingGateway::default());
        let rule = Rule::new(
            "card_moved",
            "",
            ActionSpec {
                template: "x".into(),
                timeout_secs: Some(300),
                delay_secs: Some(10),
                agent_id: Some("reviewer".into()),
                notify: None,
            },
        );
        pipeline(gateway.clone())
            .process(card_moved("c1", "ready"), &[rule])
            .await;
        let call = &gateway.calls()[0];
        assert_eq!((call.timeout_secs, call.delay_secs), (300, 10));
        assert_eq!(call.target_agent.as_deref(), Some("reviewer"));
    }

    #[test]
    fn broken_template_sent_raw() {
        let rule = Rule::new(
            "card_moved",
            "",
            ActionSpec {
                template: "Card {{.CardName".into(),
                ..Default::default()
            },
        );
        let action = build_action(&card_moved("c1", "ready"), &rule);
        assert_eq!(action.message, "Card {{.CardName");
    }

    #[test]
    fn mail_default_template_and_notify_wrap() {
        let event = Event::new(EventSource::Mail, "message_added", "m1", "me@x.com")
            .with_label("gmail-notify")
            .with_field("From", "alice@x.com")
            .with_field("Subject", "Lunch?");
        let rule = Rule::new(
            "message_added",
            "",
            ActionSpec {
                notify: Some(NotifyTarget {
                    target: "42".into(),
                    channel: "telegram".into(),
                }),
                ..Default::default()
            },
        );
        let action = build_action(&event, &rule);
        assert!(action.message.contains("target=42, channel=telegram"));
        assert!(action.message.ends_with("📧 alice@x.com: Lunch?"));
        assert_eq!(action.name, "gmail-notify");
        assert_eq!((action.timeout_secs, action.delay_secs), (30, 0));
    }

    #[test]
    fn unlabeled_event_named_by_kind_and_subject() {
        let event = Event::new(EventSource::CiResult, "check_run", "12", "check_run");
        let action = build_action(&event, &Rule::new("check_run", "", ActionSpec::default()));
        assert_eq!(action.name, "check_run: 12");
        assert!(action.message.starts_with("[Webhook Event] GitHub event detected."));
    }
}
