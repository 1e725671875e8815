//! Read-only metadata objects exposed next to the tools: the chat-list
//! resource and the `summarize_chats` prompt.

use serde_json::{Value, json};
use tracing::{error, info};

use crate::error::StoreError;
use crate::records::Chat;
use crate::store::{QueryParams, RecordStore, Resource};
use crate::tools::ToolArguments;

pub const CHATS_URI: &str = "beeper://chats";
pub const SUMMARIZE_CHATS: &str = "summarize_chats";
const DEFAULT_TIME_RANGE: &str = "24h";

pub fn resource_descriptors() -> Vec<Value> {
    vec![json!({
        "uri": CHATS_URI,
        "name": "Chat List",
        "description": "List of all Beeper chats",
        "mimeType": "application/json",
    })]
}

pub fn prompt_descriptors() -> Vec<Value> {
    vec![json!({
        "name": SUMMARIZE_CHATS,
        "description": "Generate a summary of recent chat activity",
        "arguments": [{
            "name": "time_range",
            "description": "Time range for summary (e.g., '1h', '24h', '7d')",
            "required": false,
        }],
    })]
}

fn chat_snapshot(store: &dyn RecordStore) -> Result<Vec<Value>, StoreError> {
    Ok(store
        .query(Resource::Chats.path(), &QueryParams::new())?
        .map(|row| {
            let chat = Chat::from_row(&row);
            json!({
                "roomId": row.get_string("roomId").unwrap_or_default(),
                "title": row.get_string("title").unwrap_or_default(),
                "unreadCount": chat.unread_count,
                "timestamp": chat.timestamp,
            })
        })
        .collect())
}

/// JSON array of every chat. A store fault yields `[]`. Blocking.
pub fn chat_list(store: &dyn RecordStore) -> String {
    match chat_snapshot(store) {
        Ok(chats) => {
            info!(uri = CHATS_URI, chats = chats.len(), "resource read");
            Value::Array(chats).to_string()
        }
        Err(e) => {
            error!(uri = CHATS_URI, error = %e, "error getting chat list resource");
            "[]".to_string()
        }
    }
}

pub fn summarize_chats_text(args: &ToolArguments) -> String {
    let range = args.string("time_range").unwrap_or_else(|| DEFAULT_TIME_RANGE.to_string());
    format!(
        "Please summarize the chat activity for the last {range}.\n\
         Focus on:\n\
         - Number of active chats\n\
         - Unread message distribution\n\
         - Most active conversations\n\
         - Key topics discussed"
    )
}

/// `prompts/get` result for `summarize_chats`.
pub fn summarize_chats(args: &ToolArguments) -> Value {
    json!({
        "description": "Summary of recent chat activity",
        "messages": [{
            "role": "user",
            "content": {"type": "text", "text": summarize_chats_text(args)},
        }],
    })
}
