//! Gmail history source: mailbox change feed over the REST API.
//!
//! The poller only needs two calls: the mailbox's current history position,
//! and every message added since a given position. Both live behind
//! `HistorySource` so the poller can run against an in-memory feed in tests.

use std::time::Duration;

use async_trait::async_trait;
use mail_parser::MessageParser;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::SourceError;
use crate::pipeline::types::{Event, EventSource, facts};

pub const MESSAGE_ADDED: &str = "message_added";

/// Action name used for every mail-triggered job.
pub const GMAIL_ACTION_LABEL: &str = "gmail-notify";

const DEFAULT_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

/// A message that appeared in the mailbox.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryMessage {
    pub id: String,
    pub thread_id: String,
    pub labels: Vec<String>,
    pub subject: String,
    pub from: String,
    pub snippet: String,
}

/// Result of one history fetch.
#[derive(Debug, Clone, Default)]
pub struct HistoryPage {
    pub entries: Vec<HistoryMessage>,
    /// Position the source reports after these entries.
    pub new_position: u64,
}

/// Monotonic mailbox change feed.
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Current head of the mailbox history.
    async fn fetch_high_water_position(&self) -> Result<u64, SourceError>;

    /// Entries added after `position`.
    ///
    /// Returns `SourceError::CursorExpired` when the source no longer
    /// retains `position`.
    async fn fetch_history_since(&self, position: u64) -> Result<HistoryPage, SourceError>;
}

/// Canonical event for a new message in `account`.
pub fn normalize(account: &str, msg: &HistoryMessage) -> Event {
    Event::new(EventSource::Mail, MESSAGE_ADDED, msg.id.as_str(), account)
        .with_label(GMAIL_ACTION_LABEL)
        .with_fact(facts::FROM, msg.from.as_str())
        .with_fact(facts::SUBJECT, msg.subject.as_str())
        .with_fact(facts::LABELS, msg.labels.join(","))
        .with_field("From", msg.from.as_str())
        .with_field("Subject", msg.subject.as_str())
        .with_field("Snippet", msg.snippet.as_str())
        .with_field("ID", msg.id.as_str())
        .with_field("Account", account)
}

// ── REST client ─────────────────────────────────────────────────────

/// Gmail accepts history ids as JSON strings; tolerate numbers as well.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HistoryId {
    Number(u64),
    Text(String),
}

impl HistoryId {
    fn value(&self) -> Option<u64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileResponse {
    history_id: Option<HistoryId>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryListResponse {
    #[serde(default)]
    history: Vec<HistoryRecord>,
    history_id: Option<HistoryId>,
    next_page_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryRecord {
    #[serde(default)]
    messages_added: Vec<MessageAdded>,
}

#[derive(Debug, Default, Deserialize)]
struct MessageAdded {
    #[serde(default)]
    message: MessageRef,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageRef {
    #[serde(default)]
    id: String,
    #[serde(default)]
    thread_id: String,
    #[serde(default)]
    label_ids: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageMetadata {
    #[serde(default)]
    id: String,
    #[serde(default)]
    thread_id: String,
    #[serde(default)]
    label_ids: Vec<String>,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    payload: MessagePayload,
}

#[derive(Debug, Default, Deserialize)]
struct MessagePayload {
    #[serde(default)]
    headers: Vec<Header>,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

impl MessageMetadata {
    fn header(&self, name: &str) -> String {
        self.payload
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| decode_header(&h.value))
            .unwrap_or_default()
    }
}

/// Decode RFC 2047 encoded-words (`=?UTF-8?B?...?=`) in a raw header value.
///
/// The value is parsed as unstructured text, so a `From` keeps its
/// `Name <addr>` shape. Anything mail-parser rejects is returned as is.
fn decode_header(raw: &str) -> String {
    if !raw.contains("=?") {
        return raw.to_string();
    }
    let block = format!("Subject: {}\r\n\r\n", raw.replace(['\r', '\n'], " "));
    MessageParser::default()
        .parse(block.as_bytes())
        .and_then(|msg| msg.subject().map(str::to_string))
        .unwrap_or_else(|| raw.to_string())
}

/// `HistorySource` backed by the Gmail REST API with a bearer token.
pub struct GmailHistoryClient {
    account: String,
    token: SecretString,
    base_url: String,
    client: reqwest::Client,
}

impl GmailHistoryClient {
    pub fn new(account: impl Into<String>, token: SecretString) -> Self {
        Self::with_base_url(account, token, DEFAULT_API_BASE)
    }

    /// Point the client at another API root (a local fake in tests).
    pub fn with_base_url(
        account: impl Into<String>,
        token: SecretString,
        base_url: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            account: account.into(),
            token,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    async fn send(&self, path: &str, query: &[(&str, String)]) -> Result<reqwest::Response, SourceError> {
        let endpoint = format!("{}/{path}", self.base_url);
        self.client
            .get(&endpoint)
            .bearer_auth(self.token.expose_secret())
            .query(query)
            .send()
            .await
            .map_err(|e| SourceError::Request {
                endpoint: path.to_string(),
                reason: e.to_string(),
            })
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        resp: reqwest::Response,
    ) -> Result<T, SourceError> {
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(SourceError::Auth {
                account: self.account.clone(),
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SourceError::Request {
                endpoint: path.to_string(),
                reason: format!("status {status}: {body}"),
            });
        }
        resp.json::<T>().await.map_err(|e| SourceError::InvalidResponse {
            endpoint: path.to_string(),
            reason: e.to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let resp = self.send(path, query).await?;
        self.decode(path, resp).await
    }

    /// Subject/sender/snippet for one message. Failures degrade to the
    /// id, thread and labels from the history record.
    async fn enrich(&self, msg: MessageRef) -> HistoryMessage {
        let query = [
            ("format", "metadata".to_string()),
            ("metadataHeaders", "From".to_string()),
            ("metadataHeaders", "Subject".to_string()),
        ];
        match self
            .get_json::<MessageMetadata>(&format!("messages/{}", msg.id), &query)
            .await
        {
            Ok(full) => HistoryMessage {
                subject: full.header("Subject"),
                from: full.header("From"),
                id: if full.id.is_empty() { msg.id } else { full.id },
                thread_id: if full.thread_id.is_empty() { msg.thread_id } else { full.thread_id },
                labels: full.label_ids,
                snippet: full.snippet,
            },
            Err(e) => {
                warn!(account = %self.account, id = %msg.id, error = %e, "Failed to fetch message metadata");
                HistoryMessage {
                    id: msg.id,
                    thread_id: msg.thread_id,
                    labels: msg.label_ids,
                    ..Default::default()
                }
            }
        }
    }
}

#[async_trait]
impl HistorySource for GmailHistoryClient {
    async fn fetch_high_water_position(&self) -> Result<u64, SourceError> {
        let profile: ProfileResponse = self.get_json("profile", &[]).await?;
        profile
            .history_id
            .as_ref()
            .and_then(HistoryId::value)
            .ok_or_else(|| SourceError::InvalidResponse {
                endpoint: "profile".into(),
                reason: "missing historyId".into(),
            })
    }

    async fn fetch_history_since(&self, position: u64) -> Result<HistoryPage, SourceError> {
        let mut page = HistoryPage::default();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("startHistoryId", position.to_string()),
                ("historyTypes", "messageAdded".to_string()),
            ];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }

            let raw = self.send("history", &query).await?;
            if raw.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(SourceError::CursorExpired { position });
            }
            let resp: HistoryListResponse = self.decode("history", raw).await?;

            if let Some(id) = resp.history_id.as_ref().and_then(HistoryId::value) {
                page.new_position = id;
            }

            for record in resp.history {
                for added in record.messages_added {
                    if added.message.id.is_empty() {
                        continue;
                    }
                    page.entries.push(self.enrich(added.message).await);
                }
            }

            match resp.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(
            account = %self.account,
            position,
            new_position = page.new_position,
            entries = page.entries.len(),
            "Fetched Gmail history"
        );
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::rules::from_pattern_matches;
    use axum::extract::{Path, Query};
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use std::collections::HashMap;

    fn message() -> HistoryMessage {
        HistoryMessage {
            id: "m1".into(),
            thread_id: "t1".into(),
            labels: vec!["INBOX".into(), "IMPORTANT".into()],
            subject: "Invoice".into(),
            from: "billing@example.com".into(),
            snippet: "Your invoice".into(),
        }
    }

    #[test]
    fn normalize_builds_mail_event() {
        let event = normalize("me@example.com", &message());
        assert_eq!(event.source, EventSource::Mail);
        assert_eq!(event.kind, MESSAGE_ADDED);
        assert_eq!(event.label, GMAIL_ACTION_LABEL);
        assert_eq!(event.facts["labels"], "INBOX,IMPORTANT");
        assert_eq!(event.facts["from"], "billing@example.com");
        assert_eq!(event.render_fields["Snippet"], "Your invoice");
        assert_eq!(event.render_fields["Account"], "me@example.com");
        assert_eq!(event.dedup_key(), "mail:m1:me@example.com");
    }

    async fn history(Query(q): Query<HashMap<String, String>>) -> impl IntoResponse {
        match q.get("startHistoryId").map(String::as_str) {
            Some("1") => (StatusCode::NOT_FOUND, Json(serde_json::json!({}))),
            _ if q.get("pageToken").is_some() => (
                StatusCode::OK,
                Json(serde_json::json!({
                    "historyId": "150",
                    "history": [{ "messagesAdded": [{ "message": { "id": "m2", "threadId": "t2", "labelIds": ["INBOX"] } }] }]
                })),
            ),
            _ => (
                StatusCode::OK,
                Json(serde_json::json!({
                    "historyId": "140",
                    "nextPageToken": "p2",
                    "history": [{ "messagesAdded": [{ "message": { "id": "m1", "threadId": "t1", "labelIds": ["INBOX"] } }] }]
                })),
            ),
        }
    }

    async fn message_meta(Path(id): Path<String>) -> impl IntoResponse {
        if id == "m2" {
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({})));
        }
        (
            StatusCode::OK,
            Json(serde_json::json!({
                "id": id,
                "threadId": "t1",
                "labelIds": ["INBOX", "UNREAD"],
                "snippet": "hello",
                "payload": { "headers": [
                    { "name": "From", "value": "=?UTF-8?B?QWxpY2UgU21pdGg=?= <alice@example.com>" },
                    { "name": "Subject", "value": "=?UTF-8?Q?Caf=C3=A9?= menu" }
                ]}
            })),
        )
    }

    async fn fake_gmail() -> String {
        let app = Router::new()
            .route("/profile", get(|| async { Json(serde_json::json!({ "historyId": "123" })) }))
            .route("/history", get(history))
            .route("/messages/{id}", get(message_meta));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(base: &str) -> GmailHistoryClient {
        GmailHistoryClient::with_base_url("me@example.com", SecretString::from("tok"), base)
    }

    #[test]
    fn decodes_encoded_word_headers() {
        assert_eq!(
            decode_header("=?UTF-8?B?QWxpY2UgU21pdGg=?= <a@x.com>"),
            "Alice Smith <a@x.com>"
        );
        assert_eq!(decode_header("=?UTF-8?Q?Caf=C3=A9?="), "Café");
        assert_eq!(decode_header("plain@example.com"), "plain@example.com");
    }

    #[tokio::test]
    async fn high_water_from_profile() {
        let base = fake_gmail().await;
        assert_eq!(client(&base).fetch_high_water_position().await.unwrap(), 123);
    }

    #[tokio::test]
    async fn history_follows_pages_and_enriches() {
        let base = fake_gmail().await;
        let page = client(&base).fetch_history_since(100).await.unwrap();

        assert_eq!(page.new_position, 150);
        assert_eq!(page.entries.len(), 2);
        assert_eq!(page.entries[0].from, "Alice Smith <alice@example.com>");
        assert_eq!(page.entries[0].subject, "Café menu");
        assert!(from_pattern_matches("smith", &page.entries[0].from));
        assert_eq!(page.entries[0].labels, vec!["INBOX", "UNREAD"]);
        // metadata failure keeps the history record's id and labels
        assert_eq!(page.entries[1].id, "m2");
        assert_eq!(page.entries[1].labels, vec!["INBOX"]);
        assert!(page.entries[1].from.is_empty());
    }

    #[tokio::test]
    async fn not_found_means_cursor_expired() {
        let base = fake_gmail().await;
        let err = client(&base).fetch_history_since(1).await.unwrap_err();
        assert!(err.is_cursor_expired());
    }

    #[tokio::test]
    async fn unauthorized_maps_to_auth_error() {
        let app = Router::new().route("/profile", get(|| async { StatusCode::UNAUTHORIZED }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let err = client(&format!("http://{addr}"))
            .fetch_high_water_position()
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Auth { .. }));
    }
}
