//! Rule matching engine.
//!
//! Rules are scanned in declared order; the first rule whose event kind and
//! condition both match wins. Conditions are a tiny language, parsed once
//! when the rule is loaded:
//!
//! ```text
//! condition := "" | clause ("||" clause)*
//! clause    := fact "==" "'" literal "'"
//! ```
//!
//! A clause that doesn't fit the grammar is kept as `Clause::Malformed` and
//! never matches; it is not an error.

use serde::Deserialize;
use tracing::debug;

use crate::pipeline::types::{ActionSpec, FieldMap, facts};

// ── Condition ───────────────────────────────────────────────────────

/// One `fact == 'literal'` comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clause {
    Equals { fact: String, literal: String },
    Malformed(String),
}

impl Clause {
    fn parse(raw: &str) -> Self {
        let part = raw.trim();
        let malformed = || Clause::Malformed(part.to_string());

        let Some((left, right)) = part.split_once("==") else {
            return malformed();
        };
        let fact = left.trim();
        if fact.is_empty() || !fact.chars().all(is_fact_char) {
            return malformed();
        }

        let right = right.trim();
        if right.len() < 2 || !right.starts_with('\'') || !right.ends_with('\'') {
            return malformed();
        }
        let literal = &right[1..right.len() - 1];
        if literal.contains('\'') {
            return malformed();
        }

        Clause::Equals {
            fact: fact.to_string(),
            literal: literal.to_string(),
        }
    }

    fn matches(&self, facts: &FieldMap) -> bool {
        match self {
            // A missing fact compares as the empty string.
            Clause::Equals { fact, literal } => {
                facts.get(fact).map(String::as_str).unwrap_or("") == literal
            }
            Clause::Malformed(_) => false,
        }
    }
}

fn is_fact_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
}

/// Parsed rule condition: a logical OR of equality clauses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub struct Condition {
    clauses: Vec<Clause>,
}

impl Condition {
    /// The empty condition, which always matches.
    pub fn always() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Self {
        if text.trim().is_empty() {
            return Self::always();
        }
        Self {
            clauses: text.split("||").map(Clause::parse).collect(),
        }
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn matches(&self, facts: &FieldMap) -> bool {
        self.clauses.is_empty() || self.clauses.iter().any(|c| c.matches(facts))
    }
}

impl From<String> for Condition {
    fn from(text: String) -> Self {
        Self::parse(&text)
    }
}

impl From<&str> for Condition {
    fn from(text: &str) -> Self {
        Self::parse(text)
    }
}

// ── Mail match ──────────────────────────────────────────────────────

/// Label/sender criteria for mail rules.
///
/// All `labels` must be present; any one `from` pattern suffices.
/// Empty lists don't constrain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MailMatch {
    #[serde(default)]
    pub from: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl MailMatch {
    pub fn is_empty(&self) -> bool {
        self.from.is_empty() && self.labels.is_empty()
    }

    pub fn matches(&self, facts: &FieldMap) -> bool {
        if !self.labels.is_empty() {
            let present = facts.get(facts::LABELS).map(String::as_str).unwrap_or("");
            let present: Vec<&str> = present.split(',').map(str::trim).collect();
            if !self.labels.iter().all(|l| present.contains(&l.as_str())) {
                return false;
            }
        }
        if !self.from.is_empty() {
            let sender = facts.get(facts::FROM).map(String::as_str).unwrap_or("");
            if !self.from.iter().any(|p| from_pattern_matches(p, sender)) {
                return false;
            }
        }
        true
    }
}

/// Case-insensitive sender pattern match.
///
/// `*suffix` matches senders ending with `suffix`; anything else is a
/// substring match.
pub fn from_pattern_matches(pattern: &str, sender: &str) -> bool {
    let pattern = pattern.to_lowercase();
    let sender = sender.to_lowercase();
    match pattern.strip_prefix('*') {
        Some(suffix) => sender.ends_with(suffix),
        None => sender.contains(&pattern),
    }
}

// ── Rule ────────────────────────────────────────────────────────────

/// Operator-authored rule: event kind + condition + action.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Rule {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "event")]
    pub event_kind: String,
    #[serde(default)]
    pub condition: Condition,
    #[serde(default, rename = "match")]
    pub mail_match: MailMatch,
    #[serde(default)]
    pub action: ActionSpec,
}

impl Rule {
    pub fn new(event_kind: impl Into<String>, condition: &str, action: ActionSpec) -> Self {
        Self {
            name: String::new(),
            event_kind: event_kind.into(),
            condition: Condition::parse(condition),
            mail_match: MailMatch::default(),
            action,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_mail_match(mut self, mail_match: MailMatch) -> Self {
        self.mail_match = mail_match;
        self
    }

    /// Name for logs: the configured name, else the event kind.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.event_kind
        } else {
            &self.name
        }
    }

    fn matches(&self, facts: &FieldMap) -> bool {
        self.condition.matches(facts) && self.mail_match.matches(facts)
    }
}

/// First rule, in declared order, whose kind and condition match.
pub fn find_first_match<'a>(
    rules: &'a [Rule],
    event_kind: &str,
    facts: &FieldMap,
) -> Option<&'a Rule> {
    let found = rules
        .iter()
        .filter(|r| r.event_kind == event_kind)
        .find(|r| r.matches(facts));

    if let Some(rule) = found {
        debug!(rule = %rule.display_name(), event_kind, "Rule matched");
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(pairs: &[(&str, &str)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn action(template: &str) -> ActionSpec {
        ActionSpec {
            template: template.into(),
            ..Default::default()
        }
    }

    #[test]
    fn parses_single_clause() {
        let cond = Condition::parse("list == 'ready'");
        assert_eq!(
            cond.clauses(),
            &[Clause::Equals {
                fact: "list".into(),
                literal: "ready".into()
            }]
        );
    }

    #[test]
    fn tolerates_whitespace() {
        let cond = Condition::parse("  list=='dev'||   list ==   'prod'  ");
        assert_eq!(cond.clauses().len(), 2);
        assert!(cond.matches(&facts(&[("list", "dev")])));
        assert!(cond.matches(&facts(&[("list", "prod")])));
    }

    #[test]
    fn or_condition() {
        let cond = Condition::parse("list == 'dev' || list == 'prod'");
        assert!(cond.matches(&facts(&[("list", "dev")])));
        assert!(cond.matches(&facts(&[("list", "prod")])));
        assert!(!cond.matches(&facts(&[("list", "qa")])));
    }

    #[test]
    fn three_way_or() {
        let cond = Condition::parse("list == 'in_progress' || list == 'dev' || list == 'prod'");
        assert!(cond.matches(&facts(&[("list", "dev")])));
        assert!(!cond.matches(&facts(&[("list", "ready")])));
    }

    #[test]
    fn empty_condition_always_matches() {
        assert!(Condition::parse("").matches(&facts(&[("list", "anything")])));
        assert!(Condition::parse("   ").matches(&FieldMap::new()));
    }

    #[test]
    fn missing_quotes_never_match() {
        let cond = Condition::parse("list == ready");
        assert!(matches!(cond.clauses()[0], Clause::Malformed(_)));
        assert!(!cond.matches(&facts(&[("list", "ready")])));
    }

    #[test]
    fn unknown_syntax_never_matches() {
        for text in ["list != 'ready'", "list ~ 'ready'", "'ready'", "== 'ready'", "list == 'a' == 'b'"] {
            let cond = Condition::parse(text);
            assert!(!cond.is_empty(), "{text}");
            assert!(!cond.matches(&facts(&[("list", "ready")])), "{text}");
        }
    }

    #[test]
    fn malformed_clause_does_not_poison_others() {
        let cond = Condition::parse("list == ready || list == 'dev'");
        assert!(cond.matches(&facts(&[("list", "dev")])));
        assert!(!cond.matches(&facts(&[("list", "ready")])));
    }

    #[test]
    fn other_facts_supported() {
        let cond = Condition::parse("conclusion == 'failure'");
        assert!(cond.matches(&facts(&[("conclusion", "failure")])));
        assert!(!cond.matches(&facts(&[("list", "failure")])));
    }

    #[test]
    fn first_match_wins() {
        let rules = vec![
            Rule::new("A", "x == '1'", action("r1")),
            Rule::new("A", "", action("r2")),
        ];
        let found = find_first_match(&rules, "A", &facts(&[("x", "2")])).unwrap();
        assert_eq!(found.action.template, "r2");

        let found = find_first_match(&rules, "A", &facts(&[("x", "1")])).unwrap();
        assert_eq!(found.action.template, "r1");
    }

    #[test]
    fn kind_mismatch_skipped() {
        let rules = vec![
            Rule::new("card_moved", "", action("moved")),
            Rule::new("comment_added", "list == 'questions'", action("comment")),
        ];
        let found =
            find_first_match(&rules, "comment_added", &facts(&[("list", "questions")])).unwrap();
        assert_eq!(found.action.template, "comment");
        assert!(find_first_match(&rules, "comment_added", &facts(&[("list", "other")])).is_none());
        assert!(find_first_match(&rules, "check_run", &FieldMap::new()).is_none());
    }

    #[test]
    fn from_pattern_suffix() {
        assert!(from_pattern_matches("*@github.com", "notifications@github.com"));
        assert!(!from_pattern_matches("*@github.com", "user@example.com"));
    }

    #[test]
    fn from_pattern_substring_case_insensitive() {
        assert!(from_pattern_matches("github", "noreply@github.com"));
        assert!(from_pattern_matches("GitHub", "Noreply@GITHUB.com"));
        assert!(from_pattern_matches("*@GitHub.com", "Bot <bot@github.COM"));
        assert!(!from_pattern_matches("gitlab", "noreply@github.com"));
    }

    #[test]
    fn mail_match_labels_all_required() {
        let m = MailMatch {
            labels: vec!["INBOX".into(), "IMPORTANT".into()],
            ..Default::default()
        };
        assert!(m.matches(&facts(&[("labels", "INBOX,IMPORTANT,UNREAD")])));
        assert!(!m.matches(&facts(&[("labels", "INBOX,UNREAD")])));
    }

    #[test]
    fn mail_match_from_any() {
        let m = MailMatch {
            from: vec!["*@bank.com".into(), "alerts".into()],
            ..Default::default()
        };
        assert!(m.matches(&facts(&[("from", "Alerts <x@service.io>")])));
        assert!(m.matches(&facts(&[("from", "statements@bank.com")])));
        assert!(!m.matches(&facts(&[("from", "friend@mail.com")])));
    }

    #[test]
    fn mail_match_empty_matches_everything() {
        assert!(MailMatch::default().matches(&FieldMap::new()));
    }

    #[test]
    fn rule_deserializes_with_parsed_condition() {
        let rule: Rule = serde_json::from_value(serde_json::json!({
            "event": "card_moved",
            "condition": "list == 'ready'",
            "action": { "template": "Card {{.CardName}}", "timeout": 120, "delay": 2 }
        }))
        .unwrap();
        assert_eq!(rule.event_kind, "card_moved");
        assert!(rule.condition.matches(&facts(&[("list", "ready")])));
        assert!(rule.mail_match.is_empty());
    }

    #[test]
    fn mail_rule_deserializes_match_block() {
        let rule: Rule = serde_json::from_value(serde_json::json!({
            "name": "github",
            "event": "message_added",
            "match": { "from": ["*@github.com"], "labels": ["INBOX"] },
            "action": { "notify": { "target": "123", "channel": "telegram" } }
        }))
        .unwrap();
        assert_eq!(rule.display_name(), "github");
        assert!(rule.condition.is_empty());
        assert!(rule.matches(&facts(&[("from", "ci@github.com"), ("labels", "INBOX")])));
        assert!(!rule.matches(&facts(&[("from", "ci@github.com"), ("labels", "SPAM")])));
    }
}
