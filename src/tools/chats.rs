use serde_json::{Value, json};
use tracing::info;

use super::pagination::{Page, Window, fetch_page};
use super::{Tool, ToolArguments, ToolResult};
use crate::error::StoreError;
use crate::format::{Report, format_timestamp, rule, truncate};
use crate::records::Chat;
use crate::store::{QueryParams, RecordStore, Resource};

const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatFilters {
    pub room_ids: Option<String>,
    pub is_low_priority: Option<i64>,
    pub is_archived: Option<i64>,
    pub is_unread: Option<i64>,
    pub show_in_all_chats: Option<i64>,
    pub protocol: Option<String>,
}

impl ChatFilters {
    pub fn from_args(args: &ToolArguments) -> Self {
        Self {
            room_ids: args.string("roomIds"),
            is_low_priority: args.int("isLowPriority"),
            is_archived: args.int("isArchived"),
            is_unread: args.int("isUnread"),
            show_in_all_chats: args.int("showInAllChats"),
            protocol: args.string("protocol"),
        }
    }

    pub fn to_params(&self) -> QueryParams {
        let mut p = QueryParams::new();
        p.push_opt("roomIds", self.room_ids.as_deref());
        p.push_opt("isLowPriority", self.is_low_priority);
        p.push_opt("isArchived", self.is_archived);
        p.push_opt("isUnread", self.is_unread);
        p.push_opt("showInAllChats", self.show_in_all_chats);
        p.push_opt("protocol", self.protocol.as_deref());
        p
    }
}

pub fn render(page: &Page<Chat>) -> String {
    let mut out = Report::new();
    out.line("Beeper Chats:");
    out.line(rule(50));

    if page.is_empty() {
        out.line("\nNo chats found matching the specified criteria.");
        if let Some(hint) = page.empty_page_hint() {
            out.line(hint);
        }
        return out.finish();
    }

    for (i, chat) in page.items.iter().enumerate() {
        out.blank();
        out.line(format!("Chat #{}:", page.window.offset as usize + i + 1));
        out.line(format!("  Title: {}", chat.title));
        out.line(format!("  Room ID: {}", chat.room_id));
        let kind = if chat.is_one_to_one { "Direct Message" } else { "Group Chat" };
        out.line(format!("  Type: {kind}"));
        out.line(format!("  Network: {}", chat.network()));
        out.line(format!("  Unread: {} messages", chat.unread_count));
        out.line(format!("  Muted: {}", if chat.is_muted { "Yes" } else { "No" }));
        out.line(format!("  Last Activity: {}", format_timestamp(chat.timestamp)));
        if !chat.preview.is_empty() {
            out.line(format!("  Preview: {}", truncate(&chat.preview, PREVIEW_CHARS)));
            if !chat.preview_sender_id.is_empty() {
                out.line(format!("  Preview Sender: {}", chat.preview_sender_id));
            }
        }
    }

    out.blank();
    out.line(page.summary_line("chat"));
    if let Some(hint) = page.next_page_hint() {
        out.line(hint);
    }
    out.finish()
}

pub struct GetChatsTool;

impl Tool for GetChatsTool {
    fn name(&self) -> &'static str {
        "get_chats"
    }

    fn description(&self) -> &'static str {
        "Retrieves chats/conversations with optional filtering. Parameters: roomIds (optional, comma-separated), \
         isLowPriority (optional, 0/1), isArchived (optional, 0/1), isUnread (optional, 0/1), showInAllChats \
         (optional, 0/1), protocol (optional), limit (optional, default 100), offset (optional, default 0). Returns \
         formatted text with complete chat information and pagination details."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "roomIds": {"type": "string", "description": "Comma-separated room ids"},
                "isLowPriority": {"type": "integer", "enum": [0, 1]},
                "isArchived": {"type": "integer", "enum": [0, 1]},
                "isUnread": {"type": "integer", "enum": [0, 1]},
                "showInAllChats": {"type": "integer", "enum": [0, 1]},
                "protocol": {"type": "string", "description": "Network tag, e.g. whatsapp"},
                "limit": {"type": "integer", "minimum": 1, "default": 100},
                "offset": {"type": "integer", "minimum": 0, "default": 0}
            }
        })
    }

    fn failure_prefix(&self) -> &'static str {
        "Error retrieving chats"
    }

    fn run(&self, store: &dyn RecordStore, args: &ToolArguments) -> Result<ToolResult, StoreError> {
        let filters = ChatFilters::from_args(args);
        let window = Window::from_args(args);
        info!(tool = self.name(), ?filters, limit = window.limit, offset = window.offset, "tool request");

        let page = fetch_page(store, Resource::Chats, &filters.to_params(), window, Chat::from_row)?;
        let text = render(&page);
        info!(
            tool = self.name(),
            total = ?page.total,
            retrieved = page.len(),
            result_len = text.len(),
            "tool response"
        );
        Ok(ToolResult::ok(text))
    }
}
