//! Trello webhook normalizer: card moves and comments.

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::TrelloRules;
use crate::pipeline::types::{Event, EventSource, facts};

/// Operator list name that only ever receives comments; moves into it are dropped.
pub const COMMENT_ONLY_LIST: &str = "questions";

pub const CARD_MOVED: &str = "card_moved";
pub const COMMENT_ADDED: &str = "comment_added";

#[derive(Debug, Default, Deserialize)]
struct TrelloPayload {
    #[serde(default)]
    action: TrelloAction,
}

#[derive(Debug, Default, Deserialize)]
struct TrelloAction {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    data: TrelloData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrelloData {
    #[serde(default)]
    card: TrelloRef,
    #[serde(default)]
    list_after: TrelloRef,
    #[serde(default)]
    list_before: TrelloRef,
}

#[derive(Debug, Default, Deserialize)]
struct TrelloRef {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
}

/// Convert a raw Trello webhook body into an event, or `None` to ignore it.
pub fn normalize(body: &[u8], board: &TrelloRules) -> Option<Event> {
    let payload: TrelloPayload = match serde_json::from_slice(body) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "Failed to parse Trello payload");
            return None;
        }
    };

    let action = payload.action;
    let data = &action.data;
    let card_name = data.card.name.as_str();

    let (source, kind, list_name) = match action.kind.as_str() {
        "updateCard" => {
            if data.list_after.id.is_empty() {
                debug!(card = %card_name, "Ignoring updateCard without list change");
                return None;
            }
            let Some(list_name) = board.list_id_to_name(&data.list_after.id) else {
                debug!(
                    card = %card_name,
                    list = %data.list_after.name,
                    "Ignoring move to unwatched list"
                );
                return None;
            };
            if list_name == COMMENT_ONLY_LIST {
                debug!(card = %card_name, "Ignoring move to comment-only column");
                return None;
            }
            (EventSource::CardMove, CARD_MOVED, list_name)
        }
        "commentCard" => {
            if data.card.id.is_empty() {
                debug!("Ignoring comment without card id");
                return None;
            }
            let list_name = board.list_id_to_name(&data.list_after.id).unwrap_or("");
            (EventSource::Comment, COMMENT_ADDED, list_name)
        }
        other => {
            debug!(action = %other, "Ignoring Trello action");
            return None;
        }
    };

    Some(
        Event::new(source, kind, data.card.id.as_str(), action.kind.as_str())
            .with_label(format!("{kind}: {card_name}"))
            .with_fact(facts::LIST, list_name)
            .with_fact(facts::ACTION, action.kind.as_str())
            .with_field("CardID", data.card.id.as_str())
            .with_field("CardName", card_name)
            .with_field("ListAfterID", data.list_after.id.as_str())
            .with_field("ListAfterName", data.list_after.name.as_str())
            .with_field("ListBeforeName", data.list_before.name.as_str())
            .with_field("ListName", data.list_after.name.as_str()),
    )
}
