//! Typed views over store rows.

use std::collections::HashMap;

use serde::Serialize;

use crate::store::Row;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chat {
    pub room_id: String,
    pub title: String,
    pub preview: String,
    pub preview_sender_id: String,
    pub protocol: String,
    pub unread_count: i64,
    pub timestamp: i64,
    pub is_one_to_one: bool,
    pub is_muted: bool,
}

impl Chat {
    pub fn from_row(row: &Row) -> Self {
        Self {
            room_id: row.get_string("roomId").unwrap_or_else(|| "unknown".into()),
            title: row.get_string("title").unwrap_or_else(|| "Untitled".into()),
            preview: row.get_string("messagePreview").unwrap_or_default(),
            preview_sender_id: row.get_string("senderEntityId").unwrap_or_default(),
            protocol: row.get_string("protocol").unwrap_or_default(),
            unread_count: row.get_i64("unreadCount").unwrap_or(0),
            timestamp: row.get_i64("timestamp").unwrap_or(0),
            is_one_to_one: row.get_flag("oneToOne").unwrap_or(false),
            is_muted: row.get_flag("isMuted").unwrap_or(false),
        }
    }

    pub fn network(&self) -> &str {
        if self.protocol.trim().is_empty() { "beeper" } else { &self.protocol }
    }
}

/// One raw contact row. The same person appears once per room membership.
#[derive(Debug, Clone, PartialEq)]
pub struct Contact {
    pub id: String,
    pub room_ids: String,
    pub display_name: String,
    pub contact_display_name: String,
    pub linked_contact_id: String,
    pub its_me: bool,
    pub protocol: String,
}

impl Contact {
    pub fn from_row(row: &Row) -> Self {
        Self {
            id: row.get_string("id").unwrap_or_else(|| "unknown".into()),
            room_ids: row.get_string("roomIds").unwrap_or_default(),
            display_name: row.get_string("displayName").unwrap_or_else(|| "Unknown".into()),
            contact_display_name: row.get_string("contactDisplayName").unwrap_or_default(),
            linked_contact_id: row.get_string("linkedContactId").unwrap_or_default(),
            its_me: row.get_flag("itsMe").unwrap_or(false),
            protocol: row.get_string("protocol").unwrap_or_else(|| "unknown".into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ContactIdentity {
    id: String,
    display_name: String,
    contact_display_name: String,
    linked_contact_id: String,
    its_me: bool,
    protocol: String,
}

/// A logical contact merged from raw rows sharing identity.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactGroup {
    pub id: String,
    pub display_name: String,
    pub contact_display_name: String,
    pub linked_contact_id: String,
    pub its_me: bool,
    pub protocol: String,
    pub room_ids: Vec<String>,
}

impl ContactGroup {
    pub fn name(&self) -> &str {
        if self.contact_display_name.is_empty() {
            &self.display_name
        } else {
            &self.contact_display_name
        }
    }
}

/// Merges rows by identity, keeping first-seen order; room lists are concatenated.
pub fn group_contacts(rows: &[Contact]) -> Vec<ContactGroup> {
    let mut index: HashMap<ContactIdentity, usize> = HashMap::new();
    let mut groups: Vec<ContactGroup> = Vec::new();
    for c in rows {
        let key = ContactIdentity {
            id: c.id.clone(),
            display_name: c.display_name.clone(),
            contact_display_name: c.contact_display_name.clone(),
            linked_contact_id: c.linked_contact_id.clone(),
            its_me: c.its_me,
            protocol: c.protocol.clone(),
        };
        let slot = *index.entry(key).or_insert_with(|| {
            groups.push(ContactGroup {
                id: c.id.clone(),
                display_name: c.display_name.clone(),
                contact_display_name: c.contact_display_name.clone(),
                linked_contact_id: c.linked_contact_id.clone(),
                its_me: c.its_me,
                protocol: c.protocol.clone(),
                room_ids: Vec::new(),
            });
            groups.len() - 1
        });
        groups[slot].room_ids.extend(
            c.room_ids
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(String::from),
        );
    }
    groups
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub message_id: String,
    pub room_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub timestamp: i64,
    pub is_sent_by_me: bool,
    pub is_deleted: bool,
    pub kind: String,
    pub text: String,
    pub is_search_match: bool,
    pub reactions: String,
    pub paging_offset: Option<i64>,
    pub last_read: Option<String>,
}

impl Message {
    pub fn from_row(row: &Row) -> Self {
        Self {
            message_id: row.get_string("originalId").unwrap_or_default(),
            room_id: row.get_string("roomId").unwrap_or_else(|| "unknown".into()),
            sender_id: row.get_string("senderContactId").unwrap_or_default(),
            sender_name: row.get_string("displayName").unwrap_or_else(|| "Unknown".into()),
            timestamp: row.get_i64("timestamp").unwrap_or(0),
            is_sent_by_me: row.get_flag("isSentByMe").unwrap_or(false),
            is_deleted: row.get_flag("isDeleted").unwrap_or(false),
            kind: row.get_string("type").unwrap_or_else(|| "TEXT".into()),
            text: row.get_string("text_content").unwrap_or_default(),
            // rows outside a search carry no match column
            is_search_match: row.get_flag("is_search_match").unwrap_or(true),
            reactions: row.get_string("reactions").unwrap_or_default(),
            paging_offset: row.get_i64("paging_offset"),
            last_read: row.get_string("last_read"),
        }
    }

    pub fn reactions(&self) -> Vec<Reaction> {
        parse_reactions(&self.reactions)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reaction {
    Parsed { emoji: String, count: String, by_me: bool },
    Raw(String),
}

impl std::fmt::Display for Reaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reaction::Parsed { emoji, by_me, .. } => {
                write!(f, "{emoji} ({})", if *by_me { "You" } else { "Someone" })
            }
            Reaction::Raw(s) => f.write_str(s),
        }
    }
}

/// Parses `emoji|count|self,emoji|count|self,...`. Entries with fewer than three
/// fields are kept verbatim.
pub fn parse_reactions(raw: &str) -> Vec<Reaction> {
    if raw.is_empty() {
        return Vec::new();
    }
    raw.split(',')
        .map(|entry| {
            let parts: Vec<&str> = entry.split('|').collect();
            if parts.len() >= 3 {
                Reaction::Parsed {
                    emoji: parts[0].to_string(),
                    count: parts[1].to_string(),
                    by_me: parts[2] == "1",
                }
            } else {
                Reaction::Raw(entry.to_string())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(id: &str, rooms: &str) -> Contact {
        Contact {
            id: id.into(),
            room_ids: rooms.into(),
            display_name: "Ada".into(),
            contact_display_name: String::new(),
            linked_contact_id: String::new(),
            its_me: false,
            protocol: "signal".into(),
        }
    }

    #[test]
    fn rows_sharing_identity_merge_rooms() {
        let rows = vec![contact("@ada:x", "!a:x"), contact("@bob:x", "!c:x"), contact("@ada:x", "!b:x, !d:x")];
        let groups = group_contacts(&rows);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].id, "@ada:x");
        assert_eq!(groups[0].room_ids, vec!["!a:x", "!b:x", "!d:x"]);
        assert_eq!(groups[1].room_ids, vec!["!c:x"]);
    }

    #[test]
    fn differing_identity_fields_stay_apart() {
        let mut other = contact("@ada:x", "!b:x");
        other.its_me = true;
        let groups = group_contacts(&[contact("@ada:x", "!a:x"), other]);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn reactions_render_owner() {
        let r = parse_reactions("👍|2|1,❤️|1|0,odd");
        let rendered: Vec<String> = r.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["👍 (You)", "❤️ (Someone)", "odd"]);
        assert!(parse_reactions("").is_empty());
    }

    #[test]
    fn message_defaults_search_match_when_column_absent() {
        let m = Message::from_row(&Row::new().with("roomId", "!a:x"));
        assert!(m.is_search_match);
        assert_eq!(m.kind, "TEXT");
        let m = Message::from_row(&Row::new().with("is_search_match", 0));
        assert!(!m.is_search_match);
    }

    #[test]
    fn blank_protocol_reports_beeper_network() {
        let c = Chat::from_row(&Row::new().with("protocol", " "));
        assert_eq!(c.network(), "beeper");
    }
}
