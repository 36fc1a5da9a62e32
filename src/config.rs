//! Configuration types.
//!
//! Process settings come from environment variables; operator rules come
//! from a JSON rules file with `${VAR}` substitution.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::warn;

use crate::error::ConfigError;
use crate::pipeline::rules::Rule;

/// Default poll interval for pull sources.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

// ── Process settings ────────────────────────────────────────────────

/// Which CI results produce events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NotifyMode {
    #[default]
    All,
    /// Successful conclusions are ignored.
    Failures,
}

impl FromStr for NotifyMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "all" => Ok(Self::All),
            "failures" => Ok(Self::Failures),
            other => Err(ConfigError::InvalidValue {
                key: "GITHUB_NOTIFY_MODE".into(),
                message: format!("expected 'all' or 'failures', got '{other}'"),
            }),
        }
    }
}

/// Execution gateway connection settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub url: String,
    pub token: SecretString,
    /// Agent used when a rule doesn't name one.
    pub agent_id: String,
    pub model: String,
}

impl GatewayConfig {
    /// Both URL and token are required to talk to the gateway.
    pub fn is_configured(&self) -> bool {
        !self.url.is_empty() && !self.token.expose_secret().is_empty()
    }
}

/// Relay process configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub port: u16,
    /// Where cursor files live.
    pub state_dir: PathBuf,
    pub rules_path: PathBuf,
    /// Daily-rolling log files are written here when set.
    pub log_dir: Option<PathBuf>,
    pub poll_interval: Duration,
    pub gateway: GatewayConfig,
    pub trello_secret: SecretString,
    /// Overrides the `https://<Host><path>` URL used in Trello signatures.
    pub trello_callback_url: Option<String>,
    pub github_secret: SecretString,
    pub github_notify_mode: NotifyMode,
    /// Required in `X-Relay-Token` on `/api/*` when set.
    pub internal_token: SecretString,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup (tests pass a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match get("RELAY_PORT") {
            Some(raw) => raw.trim().parse::<u16>().map_err(|e| ConfigError::InvalidValue {
                key: "RELAY_PORT".into(),
                message: e.to_string(),
            })?,
            None => 8080,
        };

        let poll_interval_secs: u64 = get("RELAY_POLL_INTERVAL_SECS")
            .and_then(|s| s.trim().parse().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);

        let github_notify_mode = get("GITHUB_NOTIFY_MODE")
            .map(|s| s.parse::<NotifyMode>())
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            port,
            state_dir: get("RELAY_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data")),
            rules_path: get("RELAY_RULES_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("relay.json")),
            log_dir: get("RELAY_LOG_DIR").map(PathBuf::from),
            poll_interval: Duration::from_secs(poll_interval_secs),
            gateway: GatewayConfig {
                url: get("GATEWAY_URL")
                    .map(|u| u.trim_end_matches('/').to_string())
                    .unwrap_or_default(),
                token: SecretString::from(get("GATEWAY_TOKEN").unwrap_or_default()),
                agent_id: get("GATEWAY_AGENT_ID").unwrap_or_else(|| "main".to_string()),
                model: get("GATEWAY_MODEL")
                    .unwrap_or_else(|| "anthropic/claude-sonnet-4-6".to_string()),
            },
            trello_secret: SecretString::from(get("TRELLO_SECRET").unwrap_or_default()),
            trello_callback_url: get("TRELLO_CALLBACK_URL"),
            github_secret: SecretString::from(get("GITHUB_SECRET").unwrap_or_default()),
            github_notify_mode,
            internal_token: SecretString::from(get("RELAY_INTERNAL_TOKEN").unwrap_or_default()),
        })
    }
}

// ── Rules file ──────────────────────────────────────────────────────

/// Trello board settings and rules.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrelloRules {
    /// Watched lists, operator name → list id.
    #[serde(default)]
    pub lists: HashMap<String, String>,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl TrelloRules {
    /// Operator name of a watched list id, if watched.
    pub fn list_id_to_name(&self, id: &str) -> Option<&str> {
        self.lists
            .iter()
            .find(|(_, list_id)| list_id.as_str() == id)
            .map(|(name, _)| name.as_str())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitHubRules {
    /// Built-in defaults apply when empty.
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// One polled mailbox.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GmailAccount {
    #[serde(default)]
    pub email: String,
    /// Environment variable holding this account's access token.
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl GmailAccount {
    /// Env var for the access token: explicit `token_env`, else
    /// `GMAIL_TOKEN` for the unnamed account, else `GMAIL_TOKEN_<EMAIL>`.
    pub fn token_var(&self) -> String {
        if let Some(var) = self.token_env.as_ref().filter(|v| !v.is_empty()) {
            return var.clone();
        }
        if self.email.is_empty() {
            return "GMAIL_TOKEN".to_string();
        }
        let suffix: String = self
            .email
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("GMAIL_TOKEN_{suffix}")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GmailRules {
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    #[serde(default)]
    pub accounts: Vec<GmailAccount>,
    /// Single-account layout; becomes one unnamed account when `accounts` is empty.
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl GmailRules {
    /// Poll interval for `account`: its own, else the section's, else `fallback`.
    pub fn interval_for(&self, account: &GmailAccount, fallback: Duration) -> Duration {
        account
            .poll_interval_secs
            .or(self.poll_interval_secs)
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(fallback)
    }
}

/// Operator rules, loaded once at startup.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RulesFile {
    #[serde(default)]
    pub trello: TrelloRules,
    #[serde(default)]
    pub github: GitHubRules,
    #[serde(default)]
    pub gmail: GmailRules,
}

static ENV_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("static regex"));

/// Replace `${VAR}` with the variable's value; unset references stay as-is.
pub fn env_subst<F>(text: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    ENV_REF
        .replace_all(text, |caps: &regex::Captures<'_>| {
            lookup(&caps[1])
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

impl RulesFile {
    /// Load from disk. A missing file yields an empty rule set.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Rules file not found, no rules loaded");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::RulesFile {
                    path: path.display().to_string(),
                    source,
                });
            }
        };
        Self::parse(&text, |key| std::env::var(key).ok())
    }

    pub fn parse<F>(text: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let expanded = env_subst(text, lookup);
        let mut rules: Self = serde_json::from_str(&expanded)?;
        if rules.gmail.accounts.is_empty() && !rules.gmail.rules.is_empty() {
            rules.gmail.accounts.push(GmailAccount {
                rules: std::mem::take(&mut rules.gmail.rules),
                ..Default::default()
            });
        }
        Ok(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_env_empty() {
        let cfg = RelayConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.state_dir, PathBuf::from("data"));
        assert_eq!(cfg.poll_interval, Duration::from_secs(60));
        assert_eq!(cfg.gateway.agent_id, "main");
        assert_eq!(cfg.github_notify_mode, NotifyMode::All);
        assert!(!cfg.gateway.is_configured());
        assert!(cfg.trello_secret.expose_secret().is_empty());
        assert!(cfg.internal_token.expose_secret().is_empty());
    }

    #[test]
    fn reads_env_values() {
        let cfg = RelayConfig::from_lookup(lookup(&[
            ("RELAY_PORT", "9000"),
            ("GATEWAY_URL", "http://gw:18789/"),
            ("GATEWAY_TOKEN", "tok"),
            ("GITHUB_NOTIFY_MODE", "failures"),
            ("RELAY_POLL_INTERVAL_SECS", "15"),
            ("RELAY_INTERNAL_TOKEN", "relay-tok"),
        ]))
        .unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.gateway.url, "http://gw:18789");
        assert!(cfg.gateway.is_configured());
        assert_eq!(cfg.github_notify_mode, NotifyMode::Failures);
        assert_eq!(cfg.poll_interval, Duration::from_secs(15));
        assert_eq!(cfg.internal_token.expose_secret(), "relay-tok");
    }

    #[test]
    fn invalid_port_rejected() {
        let err = RelayConfig::from_lookup(lookup(&[("RELAY_PORT", "http")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn invalid_notify_mode_rejected() {
        assert!(RelayConfig::from_lookup(lookup(&[("GITHUB_NOTIFY_MODE", "some")])).is_err());
    }

    #[test]
    fn env_subst_replaces_known_vars() {
        let out = env_subst("a=${A} b=${B}", lookup(&[("A", "1")]));
        assert_eq!(out, "a=1 b=${B}");
    }

    #[test]
    fn parses_rules_file() {
        let text = r#"{
            "trello": {
                "lists": { "ready": "${READY_ID}", "questions": "list-q" },
                "rules": [
                    { "event": "card_moved", "condition": "list == 'ready'",
                      "action": { "message_template": "Card {{.CardName}}", "timeout": 120, "delay": 2 } }
                ]
            },
            "gmail": {
                "poll_interval_secs": 30,
                "accounts": [
                    { "email": "me@example.com", "rules": [
                        { "name": "gh", "event": "message_added", "match": { "from": ["*@github.com"] } }
                    ] }
                ]
            }
        }"#;
        let rules = RulesFile::parse(text, lookup(&[("READY_ID", "list-r")])).unwrap();
        assert_eq!(rules.trello.list_id_to_name("list-r"), Some("ready"));
        assert_eq!(rules.trello.list_id_to_name("nope"), None);
        assert_eq!(rules.trello.rules.len(), 1);
        assert!(rules.github.rules.is_empty());

        let account = &rules.gmail.accounts[0];
        assert_eq!(account.rules[0].mail_match.from, vec!["*@github.com"]);
        assert_eq!(
            rules.gmail.interval_for(account, Duration::from_secs(60)),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn legacy_gmail_rules_become_unnamed_account() {
        let text = r#"{
            "gmail": {
                "rules": [
                    { "name": "ci", "event": "message_added",
                      "match": { "labels": ["INBOX"] },
                      "action": { "notify": { "target": "1", "channel": "telegram", "template": "{{.Subject}}" } } }
                ]
            }
        }"#;
        let rules = RulesFile::parse(text, lookup(&[])).unwrap();
        assert!(rules.gmail.rules.is_empty());
        assert_eq!(rules.gmail.accounts.len(), 1);

        let account = &rules.gmail.accounts[0];
        assert!(account.email.is_empty());
        assert_eq!(account.token_var(), "GMAIL_TOKEN");
        assert_eq!(account.rules[0].action.template, "{{.Subject}}");
    }

    #[test]
    fn malformed_rules_file_is_error() {
        assert!(RulesFile::parse("{ not json", lookup(&[])).is_err());
    }

    #[test]
    fn missing_rules_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let rules = RulesFile::load(&dir.path().join("absent.json")).unwrap();
        assert!(rules.trello.rules.is_empty());
        assert!(rules.gmail.accounts.is_empty());
    }

    #[test]
    fn token_var_naming() {
        let explicit = GmailAccount {
            token_env: Some("WORK_TOKEN".into()),
            ..Default::default()
        };
        assert_eq!(explicit.token_var(), "WORK_TOKEN");
        assert_eq!(GmailAccount::default().token_var(), "GMAIL_TOKEN");
        let named = GmailAccount {
            email: "me@example.com".into(),
            ..Default::default()
        };
        assert_eq!(named.token_var(), "GMAIL_TOKEN_ME_EXAMPLE_COM");
    }
}
