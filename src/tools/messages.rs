use serde_json::{Value, json};
use tracing::info;

use super::pagination::{Page, Window, fetch_page};
use super::{Tool, ToolArguments, ToolResult};
use crate::error::StoreError;
use crate::format::{Report, format_timestamp, rule};
use crate::records::Message;
use crate::store::{QueryParams, RecordStore, Resource};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageFilters {
    pub room_ids: Option<String>,
    pub sender_id: Option<String>,
    pub query: Option<String>,
    pub context_before: i64,
    pub context_after: i64,
    pub open_at_unread: bool,
}

impl MessageFilters {
    pub fn from_args(args: &ToolArguments) -> Self {
        Self {
            room_ids: args.string("roomIds"),
            sender_id: args.string("senderId"),
            query: args
                .string("query")
                .map(|q| q.trim().to_string())
                .filter(|q| !q.is_empty()),
            context_before: args.int("contextBefore").unwrap_or(0),
            context_after: args.int("contextAfter").unwrap_or(0),
            open_at_unread: args.boolean("openAtUnread").unwrap_or(false),
        }
    }

    pub fn to_params(&self) -> QueryParams {
        let mut p = QueryParams::new();
        p.push_opt("roomIds", self.room_ids.as_deref());
        p.push_opt("senderId", self.sender_id.as_deref());
        p.push_opt("query", self.query.as_deref());
        if self.context_before > 0 {
            p.push("contextBefore", self.context_before);
        }
        if self.context_after > 0 {
            p.push("contextAfter", self.context_after);
        }
        if self.open_at_unread {
            p.push("openAtUnread", true);
        }
        p
    }

    /// Several rooms (or all rooms) are printed under per-room headers.
    pub fn groups_by_room(&self) -> bool {
        self.room_ids.as_deref().is_none_or(|r| r.contains(','))
    }

    fn wants_context(&self) -> bool {
        self.context_before > 0 || self.context_after > 0
    }

    fn header(&self) -> Vec<String> {
        let mut lines = vec![match (&self.query, &self.room_ids, &self.sender_id) {
            (Some(q), _, _) => format!("Message Search Results for: \"{q}\""),
            (None, Some(rooms), _) => format!("Messages in Rooms: {rooms}"),
            (None, None, Some(sender)) => format!("Messages from Sender: {sender}"),
            (None, None, None) => "Messages:".to_string(),
        }];
        if let (Some(rooms), None, None) = (&self.room_ids, &self.query, &self.sender_id) {
            lines.push(format!("Filtered to rooms: {rooms}"));
        }
        if let (Some(sender), None) = (&self.sender_id, &self.query) {
            lines.push(format!("Filtered to sender: {sender}"));
        }
        lines
    }

    fn no_results(&self) -> String {
        match (&self.query, &self.room_ids, &self.sender_id) {
            (Some(q), _, _) => format!("No messages found matching \"{q}\""),
            (None, Some(_), _) => "No messages found in the specified rooms".to_string(),
            (None, None, Some(_)) => "No messages found from the specified sender".to_string(),
            (None, None, None) => "No messages found".to_string(),
        }
    }
}

fn render_message(filters: &MessageFilters, m: &Message) -> String {
    let mut out = Report::new();
    if !m.is_search_match && filters.wants_context() {
        out.line("  [Context]");
    }
    let marker = if filters.query.is_some() && m.is_search_match { "🔍 " } else { "" };
    let me = if m.is_sent_by_me { " (You)" } else { "" };
    out.line(format!("  {marker}[{}] {}{me}: ", format_timestamp(m.timestamp), m.sender_name));

    if m.is_deleted {
        out.line("      [Message deleted]");
    } else if m.kind == "TEXT" && !m.text.is_empty() {
        for line in m.text.lines() {
            out.line(format!("      {line}"));
        }
    } else {
        out.line(format!("      [{} message]", m.kind));
    }

    let reactions = m.reactions();
    if !reactions.is_empty() {
        let joined: Vec<String> = reactions.iter().map(ToString::to_string).collect();
        out.line(format!("      Reactions: {}", joined.join(", ")));
    }
    out.finish()
}

pub fn render(filters: &MessageFilters, page: &Page<Message>) -> String {
    let mut out = Report::new();
    for line in filters.header() {
        out.line(line);
    }
    out.line(rule(60));

    if page.is_empty() {
        out.line(format!("\n{}", filters.no_results()));
        if let Some(hint) = page.empty_page_hint() {
            out.line(hint);
        }
        return out.finish();
    }

    let grouped = filters.groups_by_room();
    let mut current_room: Option<&str> = None;
    for m in &page.items {
        if grouped && current_room != Some(m.room_id.as_str()) {
            if current_room.is_some() {
                out.blank();
            }
            current_room = Some(&m.room_id);
            out.line(format!("\n📍 Room: {}", m.room_id));
            out.line(rule(50));
        }
        out.line(render_message(filters, m));
    }

    out.line(format!("\n{}", rule(60)));
    out.line(page.summary_line("message"));
    if let Some(hint) = page.next_page_hint() {
        out.line(hint);
    }

    if filters.open_at_unread {
        out.blank();
        if let Some(first) = page.items.first() {
            if let Some(offset) = first.paging_offset {
                out.line(format!("Paging offset: {offset}"));
            }
            if let Some(last_read) = &first.last_read {
                out.line(format!("Last read message: {last_read}"));
            }
        }
    }
    out.finish()
}

pub struct GetMessagesTool;

impl Tool for GetMessagesTool {
    fn name(&self) -> &'static str {
        "get_messages"
    }

    fn description(&self) -> &'static str {
        "Get messages from chats with optional filtering. Parameters: roomIds (optional, comma-separated to filter \
         specific rooms), senderId (optional, filter by sender), query (optional, full-text search), contextBefore \
         (optional, number), contextAfter (optional, number), openAtUnread (optional, boolean), limit (optional, \
         default 100), offset (optional, default 0). Returns formatted messages with sender info, timestamps, \
         content, reactions, and pagination details."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "roomIds": {"type": "string", "description": "Comma-separated room ids"},
                "senderId": {"type": "string"},
                "query": {"type": "string", "description": "Full-text search"},
                "contextBefore": {"type": "integer", "minimum": 0},
                "contextAfter": {"type": "integer", "minimum": 0},
                "openAtUnread": {"type": "boolean"},
                "limit": {"type": "integer", "minimum": 1, "default": 100},
                "offset": {"type": "integer", "minimum": 0, "default": 0}
            }
        })
    }

    fn failure_prefix(&self) -> &'static str {
        "Error getting room messages"
    }

    fn run(&self, store: &dyn RecordStore, args: &ToolArguments) -> Result<ToolResult, StoreError> {
        let filters = MessageFilters::from_args(args);
        let window = Window::from_args(args);
        info!(tool = self.name(), ?filters, limit = window.limit, offset = window.offset, "tool request");

        let page = fetch_page(store, Resource::Messages, &filters.to_params(), window, Message::from_row)?;
        let text = render(&filters, &page);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Row};

    fn msg(room: &str, sender: &str, text: &str) -> Row {
        Row::new()
            .with("originalId", format!("${room}{text}"))
            .with("roomId", room)
            .with("senderContactId", sender)
            .with("displayName", sender.trim_start_matches('@'))
            .with("timestamp", 1_700_000_000_000_i64)
            .with("isSentByMe", 0)
            .with("isDeleted", 0)
            .with("type", "TEXT")
            .with("text_content", text)
    }

    fn store() -> MemoryStore {
        let s = MemoryStore::new();
        s.push_message(msg("!a:x", "@ada", "hello there"));
        s.push_message(msg("!a:x", "@bob", "line one\nline two").with("isSentByMe", 1));
        s.push_message(msg("!b:x", "@ada", "").with("type", "IMAGE"));
        s.push_message(msg("!b:x", "@bob", "gone").with("isDeleted", 1).with("reactions", "👍|2|1,😂|1|0"));
        s
    }

    fn run(store: &MemoryStore, args: Value) -> ToolResult {
        GetMessagesTool.run(store, &args.into()).unwrap()
    }

    #[test]
    fn all_rooms_are_grouped_under_room_headers() {
        let r = run(&store(), json!({}));
        assert!(r.text.starts_with("Messages:\n"));
        assert_eq!(r.text.matches("📍 Room: ").count(), 2);
        let a = r.text.find("📍 Room: !a:x").unwrap();
        let b = r.text.find("📍 Room: !b:x").unwrap();
        let bob = r.text.find("bob (You): ").unwrap();
        assert!(a < bob && bob < b);
        assert!(r.text.contains("Showing 4 messages (page complete)"));
    }

    #[test]
    fn single_room_prints_flat_list() {
        let r = run(&store(), json!({"roomIds": "!a:x"}));
        assert!(!r.text.contains("📍"));
        assert!(r.text.starts_with("Messages in Rooms: !a:x\nFiltered to rooms: !a:x\n"));
        assert!(r.text.contains("      line one\n      line two\n"));
    }

    #[test]
    fn content_placeholders_and_reactions() {
        let r = run(&store(), json!({"roomIds": "!b:x,!c:x"}));
        assert!(r.text.contains("📍 Room: !b:x"));
        assert!(r.text.contains("      [IMAGE message]"));
        assert!(r.text.contains("      [Message deleted]"));
        assert!(r.text.contains("      Reactions: 👍 (You), 😂 (Someone)"));
    }

    #[test]
    fn blank_query_is_treated_as_absent() {
        let f = MessageFilters::from_args(&json!({"query": "   "}).into());
        assert_eq!(f.query, None);
        assert!(f.to_params().is_empty());
        let f = MessageFilters::from_args(&json!({"query": " hello ", "contextBefore": "2", "openAtUnread": "true"}).into());
        assert_eq!(f.to_params().to_query_string(), "query=hello&contextBefore=2&openAtUnread=true");
    }

    #[test]
    fn search_marks_matches() {
        let r = run(&store(), json!({"query": "hello"}));
        assert!(r.text.starts_with("Message Search Results for: \"hello\"\n"));
        assert!(r.text.contains("  🔍 ["));
        let r = run(&store(), json!({"query": "nothing-like-this", "offset": 3}));
        assert!(r.text.contains("No messages found matching \"nothing-like-this\""));
        assert!(r.text.contains("try a smaller offset"));
    }

    #[test]
    fn context_rows_are_flagged() {
        let s = MemoryStore::new();
        s.push_message(msg("!a:x", "@ada", "before").with("is_search_match", 0));
        s.push_message(msg("!a:x", "@ada", "hit").with("is_search_match", 1));
        let r = run(&s, json!({"roomIds": "!a:x", "contextBefore": 1}));
        assert_eq!(r.text.matches("  [Context]").count(), 1);
    }

    #[test]
    fn open_at_unread_appends_markers_from_first_row() {
        let s = MemoryStore::new();
        s.push_message(msg("!a:x", "@ada", "first").with("paging_offset", 40).with("last_read", "$evt9"));
        s.push_message(msg("!a:x", "@ada", "second"));
        let r = run(&s, json!({"roomIds": "!a:x", "openAtUnread": true}));
        assert!(r.text.contains("Paging offset: 40\nLast read message: $evt9"));
        let r = run(&s, json!({"roomIds": "!a:x"}));
        assert!(!r.text.contains("Paging offset"));
    }

    #[test]
    fn sender_filter_headers() {
        let r = run(&store(), json!({"senderId": "@bob"}));
        assert!(r.text.starts_with("Messages from Sender: @bob\nFiltered to sender: @bob\n"));
        assert!(r.text.contains("Showing 2 messages (page complete)"));
    }
}
