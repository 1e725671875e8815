use serde_json::{Value, json};
use tracing::info;

use super::pagination::{Page, Window, fetch_page};
use super::{Tool, ToolArguments, ToolResult};
use crate::error::StoreError;
use crate::format::{Report, plural, rule};
use crate::records::{Contact, group_contacts};
use crate::store::{QueryParams, RecordStore, Resource};

const ROOMS_SHOWN: usize = 3;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContactFilters {
    pub query: Option<String>,
    pub room_ids: Option<String>,
    pub sender_ids: Option<String>,
}

impl ContactFilters {
    pub fn from_args(args: &ToolArguments) -> Self {
        Self {
            query: args.string("query"),
            room_ids: args.string("roomIds"),
            sender_ids: args.string("senderIds"),
        }
    }

    pub fn to_params(&self) -> QueryParams {
        let mut p = QueryParams::new();
        p.push_opt("query", self.query.as_deref());
        p.push_opt("roomIds", self.room_ids.as_deref());
        p.push_opt("senderIds", self.sender_ids.as_deref());
        p
    }

    fn header(&self) -> String {
        match (&self.query, &self.room_ids, &self.sender_ids) {
            (Some(q), Some(rooms), _) => format!("Contact Search Results for: \"{q}\" in rooms: {rooms}"),
            (Some(q), None, _) => format!("Contact Search Results for: \"{q}\""),
            (None, Some(rooms), _) => format!("Contacts in Rooms: {rooms}"),
            (None, None, Some(senders)) => format!("Contact Details for Senders: {senders}"),
            (None, None, None) => "All Contacts".to_string(),
        }
    }

    fn no_results(&self) -> String {
        match (&self.query, &self.room_ids, &self.sender_ids) {
            (Some(q), Some(_), _) => format!("No contacts found matching \"{q}\" in the specified rooms"),
            (Some(q), None, _) => format!("No contacts found matching \"{q}\""),
            (None, Some(_), _) => "No contacts found in the specified rooms".to_string(),
            (None, None, Some(_)) => "No contacts found for the specified sender IDs".to_string(),
            (None, None, None) => "No contacts found".to_string(),
        }
    }
}

pub fn render(filters: &ContactFilters, page: &Page<Contact>) -> String {
    let mut out = Report::new();
    out.line(filters.header());
    out.line(rule(50));

    if page.is_empty() {
        out.line(format!("\n{}", filters.no_results()));
        if let Some(hint) = page.empty_page_hint() {
            out.line(hint);
        }
        return out.finish();
    }

    let groups = group_contacts(&page.items);
    for (i, contact) in groups.iter().enumerate() {
        out.blank();
        out.line(format!("Contact #{}:", i + 1));
        let me = if contact.its_me { " (You)" } else { "" };
        out.line(format!("  Name: {}{me}", contact.name()));
        out.line(format!("  ID: {}", contact.id));
        out.line(format!("  Protocol: {}", contact.protocol));
        if !contact.linked_contact_id.is_empty() {
            out.line(format!("  Linked Contact: {}", contact.linked_contact_id));
        }
        let rooms = contact.room_ids.len();
        out.line(format!("  Present in {rooms} room{}:", plural(rooms)));
        for room in contact.room_ids.iter().take(ROOMS_SHOWN) {
            out.line(format!("    - {room}"));
        }
        if rooms > ROOMS_SHOWN {
            out.line(format!("    ... and {} more rooms", rooms - ROOMS_SHOWN));
        }
    }

    out.blank();
    out.line(page.summary_line("contact instance"));
    out.line(format!("Unique contacts in this page: {}", groups.len()));
    if let Some(hint) = page.next_page_hint() {
        out.line(hint);
    }
    out.finish()
}

pub struct GetContactsTool;

impl Tool for GetContactsTool {
    fn name(&self) -> &'static str {
        "get_contacts"
    }

    fn description(&self) -> &'static str {
        "Retrieves contacts/senders with optional filtering. Parameters: senderIds (optional, comma-separated), \
         roomIds (optional, comma-separated), query (optional, full-text search), limit (optional, default 100), \
         offset (optional, default 0). Returns contact details including display names, protocols, room \
         memberships, and pagination details."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Full-text search over names"},
                "roomIds": {"type": "string", "description": "Comma-separated room ids"},
                "senderIds": {"type": "string", "description": "Comma-separated sender ids"},
                "limit": {"type": "integer", "minimum": 1, "default": 100},
                "offset": {"type": "integer", "minimum": 0, "default": 0}
            }
        })
    }

    fn failure_prefix(&self) -> &'static str {
        "Error searching contacts"
    }

    fn run(&self, store: &dyn RecordStore, args: &ToolArguments) -> Result<ToolResult, StoreError> {
        let filters = ContactFilters::from_args(args);
        let window = Window::from_args(args);
        info!(tool = self.name(), ?filters, limit = window.limit, offset = window.offset, "tool request");

        let page = fetch_page(store, Resource::Contacts, &filters.to_params(), window, Contact::from_row)?;
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
