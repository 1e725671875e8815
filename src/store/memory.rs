use std::path::Path;
use std::sync::RwLock;

use chrono::Utc;
use serde::Deserialize;

use super::{QueryParams, RecordStore, Row, Rows};
use crate::error::StoreError;

/// Table contents, loadable from a JSON fixture file of the form
/// `{"chats": [...], "contacts": [...], "messages": [...]}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Fixtures {
    #[serde(default)]
    pub chats: Vec<Row>,
    #[serde(default)]
    pub contacts: Vec<Row>,
    #[serde(default)]
    pub messages: Vec<Row>,
}

/// In-process stand-in for the host data provider.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Fixtures>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixtures(fixtures: Fixtures) -> Self {
        Self { tables: RwLock::new(fixtures) }
    }

    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|source| StoreError::Load { path: path.to_path_buf(), source })?;
        let fixtures: Fixtures = serde_json::from_str(&raw)
            .map_err(|source| StoreError::Fixtures { path: path.to_path_buf(), source })?;
        Ok(Self::from_fixtures(fixtures))
    }

    pub fn push_chat(&self, row: Row) {
        if let Ok(mut t) = self.tables.write() {
            t.chats.push(row);
        }
    }

    pub fn push_contact(&self, row: Row) {
        if let Ok(mut t) = self.tables.write() {
            t.contacts.push(row);
        }
    }

    pub fn push_message(&self, row: Row) {
        if let Ok(mut t) = self.tables.write() {
            t.messages.push(row);
        }
    }

    pub fn message_count(&self) -> usize {
        self.tables.read().map(|t| t.messages.len()).unwrap_or(0)
    }
}

impl RecordStore for MemoryStore {
    fn query(&self, path: &str, params: &QueryParams) -> Result<Rows, StoreError> {
        let (resource, counting) = match path.strip_suffix("/count") {
            Some(r) => (r, true),
            None => (path, false),
        };
        let tables = self
            .tables
            .read()
            .map_err(|_| StoreError::query(path, "store lock poisoned"))?;
        let matched: Vec<Row> = match resource {
            "chats" => filter_rows(&tables.chats, params, chat_matches),
            "contacts" => filter_rows(&tables.contacts, params, contact_matches),
            "messages" => filter_rows(&tables.messages, params, message_matches),
            other => return Err(StoreError::UnknownPath(other.to_string())),
        };
        if counting {
            let row = Row::new().with("count", matched.len() as i64);
            return Ok(Box::new(std::iter::once(row)));
        }
        let offset = param_usize(params, "offset").unwrap_or(0);
        let limit = param_usize(params, "limit").unwrap_or(usize::MAX);
        Ok(Box::new(matched.into_iter().skip(offset).take(limit)))
    }

    fn insert(&self, path: &str, params: &QueryParams) -> Result<bool, StoreError> {
        if path != "messages" {
            return Err(StoreError::UnknownPath(path.to_string()));
        }
        let (Some(room_id), Some(text)) = (params.get("roomId"), params.get("text")) else {
            return Ok(false);
        };
        let mut tables = self
            .tables
            .write()
            .map_err(|_| StoreError::insert(path, "store lock poisoned"))?;
        if !tables.chats.iter().any(|c| c.get_str("roomId") == Some(room_id)) {
            return Ok(false);
        }
        let id = format!("$local_{}", tables.messages.len() + 1);
        tables.messages.push(
            Row::new()
                .with("originalId", id)
                .with("roomId", room_id)
                .with("senderContactId", "me")
                .with("displayName", "Me")
                .with("timestamp", Utc::now().timestamp_millis())
                .with("isSentByMe", 1)
                .with("isDeleted", 0)
                .with("type", "TEXT")
                .with("text_content", text),
        );
        Ok(true)
    }
}

fn filter_rows(rows: &[Row], params: &QueryParams, pred: fn(&Row, &QueryParams) -> bool) -> Vec<Row> {
    rows.iter().filter(|r| pred(r, params)).cloned().collect()
}

fn param_usize(params: &QueryParams, key: &str) -> Option<usize> {
    params.get(key).and_then(|v| v.parse().ok())
}

fn csv(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn in_list(list: Option<&str>, value: Option<&str>) -> bool {
    match list {
        None => true,
        Some(list) => value.is_some_and(|v| csv(list).any(|item| item == v)),
    }
}

fn contains_ci(haystack: Option<&str>, needle: &str) -> bool {
    haystack.is_some_and(|h| h.to_lowercase().contains(&needle.to_lowercase()))
}

fn flag_matches(row: &Row, params: &QueryParams, key: &str) -> bool {
    match params.get(key).and_then(|v| v.parse::<i64>().ok()) {
        None => true,
        Some(want) => row.get_i64(key).unwrap_or(0) == want,
    }
}

fn chat_matches(row: &Row, params: &QueryParams) -> bool {
    let unread_ok = match params.get("isUnread").and_then(|v| v.parse::<i64>().ok()) {
        None => true,
        Some(want) => i64::from(row.get_i64("unreadCount").unwrap_or(0) > 0) == want,
    };
    in_list(params.get("roomIds"), row.get_str("roomId"))
        && flag_matches(row, params, "isLowPriority")
        && flag_matches(row, params, "isArchived")
        && flag_matches(row, params, "showInAllChats")
        && unread_ok
        && params.get("protocol").is_none_or(|p| row.get_str("protocol") == Some(p))
}

fn contact_matches(row: &Row, params: &QueryParams) -> bool {
    let query_ok = params.get("query").is_none_or(|q| {
        contains_ci(row.get_str("displayName"), q) || contains_ci(row.get_str("contactDisplayName"), q)
    });
    let rooms_ok = params.get("roomIds").is_none_or(|wanted| {
        let have = row.get_str("roomIds").unwrap_or("");
        csv(have).any(|room| csv(wanted).any(|w| w == room))
    });
    query_ok && rooms_ok && in_list(params.get("senderIds"), row.get_str("id"))
}

fn message_matches(row: &Row, params: &QueryParams) -> bool {
    in_list(params.get("roomIds"), row.get_str("roomId"))
        && params
            .get("senderId")
            .is_none_or(|s| row.get_str("senderContactId") == Some(s))
        && params
            .get("query")
            .is_none_or(|q| contains_ci(row.get_str("text_content"), q))
}
