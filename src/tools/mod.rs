use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{error, info};

use crate::error::StoreError;
use crate::store::RecordStore;

pub mod chats;
pub mod contacts;
pub mod messages;
pub mod pagination;
pub mod send_message;

/// Text payload plus error flag. Never closes the connection it travels on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult {
    pub text: String,
    #[serde(rename = "isError")]
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(text: impl Into<String>) -> Self {
        Self { text: text.into(), is_error: false }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self { text: text.into(), is_error: true }
    }

    /// MCP `CallToolResult` shape.
    pub fn to_json(&self) -> Value {
        json!({
            "content": [{ "type": "text", "text": self.text }],
            "isError": self.is_error,
        })
    }
}

/// Tool arguments as sent by the client. Every accessor coerces leniently:
/// unparsable values read as absent.
#[derive(Debug, Clone, Default)]
pub struct ToolArguments(Map<String, Value>);

impl ToolArguments {
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }

    /// Primitive content as a string; objects, arrays and null are absent.
    pub fn string(&self, name: &str) -> Option<String> {
        match self.0.get(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.string(name)?.trim().parse().ok()
    }

    /// `true` only for a case-insensitive "true"; any other present value is `false`.
    pub fn boolean(&self, name: &str) -> Option<bool> {
        self.string(name).map(|s| s.eq_ignore_ascii_case("true"))
    }
}

impl From<Value> for ToolArguments {
    fn from(value: Value) -> Self {
        Self::from_value(value)
    }
}

pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn input_schema(&self) -> Value;
    /// Prefix for the error text when the store faults, e.g. "Error retrieving chats".
    fn failure_prefix(&self) -> &'static str;
    /// Runs against the store. Blocking; called from a worker thread.
    fn run(&self, store: &dyn RecordStore, args: &ToolArguments) -> Result<ToolResult, StoreError>;
}

/// Empty by default; [`with_default_tools`](Self::with_default_tools) carries the four operations.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_tools() -> Self {
        let mut r = Self::new();
        r.register(Box::new(chats::GetChatsTool));
        r.register(Box::new(contacts::GetContactsTool));
        r.register(Box::new(send_message::SendMessageTool));
        r.register(Box::new(messages::GetMessagesTool));
        r
    }

    pub fn register(&mut self, t: Box<dyn Tool>) {
        self.tools.push(t);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.iter().map(|b| b.as_ref()).find(|t| t.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Tool> {
        self.tools.iter().map(|b| b.as_ref())
    }

    /// `tools/list` entries.
    pub fn descriptors(&self) -> Vec<Value> {
        self.iter()
            .map(|t| {
                json!({
                    "name": t.name(),
                    "description": t.description(),
                    "inputSchema": t.input_schema(),
                })
            })
            .collect()
    }
}

/// Runs one tool to completion on a blocking worker. Store faults, worker
/// failures and unknown names all come back as error results.
pub async fn dispatch(
    registry: Arc<ToolRegistry>,
    store: Arc<dyn RecordStore>,
    name: &str,
    args: ToolArguments,
) -> ToolResult {
    if registry.get(name).is_none() {
        metrics::counter!("mcp_tool_calls_total", "tool" => "unknown", "status" => "error").increment(1);
        return ToolResult::error(format!("Unknown tool: {name}"));
    }
    let tool_name = name.to_string();
    let prefix = registry.get(name).map(|t| t.failure_prefix()).unwrap_or("Error");
    let started = Instant::now();
    let worker = {
        let tool_name = tool_name.clone();
        tokio::task::spawn_blocking(move || {
            let Some(tool) = registry.get(&tool_name) else {
                return ToolResult::error(format!("Unknown tool: {tool_name}"));
            };
            match tool.run(store.as_ref(), &args) {
                Ok(result) => result,
                Err(e) => {
                    error!(
                        tool = %tool_name,
                        duration_ms = started.elapsed().as_millis() as u64,
                        error = %e,
                        "tool call failed"
                    );
                    ToolResult::error(format!("{}: {e}", tool.failure_prefix()))
                }
            }
        })
    };
    let result = match worker.await {
        Ok(result) => result,
        Err(join) => {
            error!(tool = %tool_name, error = %join, "tool worker aborted");
            ToolResult::error(format!("{prefix}: {}", StoreError::Worker(join.to_string())))
        }
    };
    let status = if result.is_error { "error" } else { "ok" };
    metrics::counter!("mcp_tool_calls_total", "tool" => tool_name.clone(), "status" => status).increment(1);
    metrics::histogram!("mcp_tool_call_duration_seconds", "tool" => tool_name.clone())
        .record(started.elapsed().as_secs_f64());
    info!(
        tool = %tool_name,
        duration_ms = started.elapsed().as_millis() as u64,
        result_len = result.text.len(),
        status,
        "tool call finished"
    );
    result
}
