use serde_json::{Value, json};
use tracing::{info, warn};

use super::{Tool, ToolArguments, ToolResult};
use crate::error::StoreError;
use crate::store::{QueryParams, RecordStore, Resource, resource_uri};

pub const MISSING_PARAMETERS: &str = "Error: Both 'room_id' and 'text' parameters are required";

pub struct SendMessageTool;

impl Tool for SendMessageTool {
    fn name(&self) -> &'static str {
        "send_message"
    }

    fn description(&self) -> &'static str {
        "Send a text message to a specific chat room. Requires room_id (the Matrix room ID like !roomId:server.com) \
         and text (the message content). Returns success/failure status."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "room_id": {"type": "string", "description": "Target room id"},
                "text": {"type": "string", "description": "Message body"}
            },
            "required": ["room_id", "text"]
        })
    }

    fn failure_prefix(&self) -> &'static str {
        "Error sending message"
    }

    fn run(&self, store: &dyn RecordStore, args: &ToolArguments) -> Result<ToolResult, StoreError> {
        let (Some(room_id), Some(text)) = (args.string("room_id"), args.string("text")) else {
            warn!(tool = self.name(), "missing required parameters");
            return Ok(ToolResult::error(MISSING_PARAMETERS));
        };
        info!(tool = self.name(), room_id = %room_id, text_len = text.len(), "tool request");

        let mut params = QueryParams::new();
        params.push("roomId", &room_id);
        params.push("text", &text);
        let path = Resource::Messages.path();
        let sent = store.insert(path, &params)?;
        info!(tool = self.name(), uri = %resource_uri(path, &params), sent, "tool response");

        if sent {
            Ok(ToolResult::ok(format!(
                "Message sent successfully to room: {room_id}\n\nMessage content: {text}"
            )))
        } else {
            Ok(ToolResult::error(format!(
                "Failed to send message to room: {room_id}\n\n\
                 This could be due to:\n  \
                 - Invalid room ID\n  \
                 - Network connectivity issues\n  \
                 - Insufficient permissions\n  \
                 - Beeper app not running"
            )))
        }
    }
}
