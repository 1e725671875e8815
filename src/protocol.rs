//! JSON-RPC 2.0 types and the MCP method handler shared by `/mcp` and the
//! per-session `/messages` endpoint.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, error, info};

use crate::resources;
use crate::store::RecordStore;
use crate::tools::{self, ToolArguments, ToolRegistry};

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "beeper-mcp-server";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpRequest {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

impl McpRequest {
    pub fn new(method: impl Into<String>) -> Self {
        Self { jsonrpc: "2.0".to_string(), id: None, method: method.into(), params: None }
    }

    pub fn with_id(mut self, id: impl Into<Value>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    /// Requests without an id expect no response.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    fn param(&self, name: &str) -> Option<&Value> {
        self.params.as_ref().and_then(|p| p.get(name))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl McpResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self { jsonrpc: "2.0".to_string(), id, result: Some(result), error: None }
    }

    pub fn error(id: Option<Value>, error: JsonRpcError) -> Self {
        Self { jsonrpc: "2.0".to_string(), id, result: None, error: Some(error) }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), data: None }
    }

    pub fn parse_error(msg: impl Into<String>) -> Self {
        Self::new(-32700, msg)
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::new(-32600, msg)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(-32601, format!("Method not found: {method}"))
    }

    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::new(-32602, msg)
    }
}

/// Capability advertisement sent as the `initialize` result and as the first
/// event of every stream.
pub fn initialize_result() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {
            "tools": {"listChanged": true},
            "resources": {"subscribe": true, "listChanged": true},
            "prompts": {"listChanged": true},
            "logging": {},
        },
        "serverInfo": {"name": SERVER_NAME, "version": SERVER_VERSION},
    })
}

#[derive(Clone)]
pub struct McpHandler {
    tools: Arc<ToolRegistry>,
    store: Arc<dyn RecordStore>,
}

impl McpHandler {
    pub fn new(tools: Arc<ToolRegistry>, store: Arc<dyn RecordStore>) -> Self {
        Self { tools, store }
    }

    /// `None` for notifications.
    pub async fn handle_request(&self, request: McpRequest) -> Option<McpResponse> {
        debug!(method = %request.method, id = ?request.id, "handling MCP request");
        if request.jsonrpc != "2.0" {
            return Some(McpResponse::error(
                request.id,
                JsonRpcError::invalid_request("jsonrpc must be \"2.0\""),
            ));
        }
        if request.is_notification() || request.method.starts_with("notifications/") {
            debug!(method = %request.method, "notification received");
            return None;
        }

        let response = match request.method.as_str() {
            "initialize" => self.handle_initialize(request),
            "ping" => McpResponse::success(request.id, json!({})),
            "tools/list" => McpResponse::success(request.id, json!({ "tools": self.tools.descriptors() })),
            "tools/call" => self.handle_tools_call(request).await,
            "resources/list" => {
                McpResponse::success(request.id, json!({ "resources": resources::resource_descriptors() }))
            }
            "resources/read" => self.handle_resources_read(request).await,
            "prompts/list" => McpResponse::success(request.id, json!({ "prompts": resources::prompt_descriptors() })),
            "prompts/get" => self.handle_prompts_get(request),
            _ => McpResponse::error(request.id, JsonRpcError::method_not_found(&request.method)),
        };
        Some(response)
    }

    fn handle_initialize(&self, request: McpRequest) -> McpResponse {
        let client = request.param("clientInfo");
        let name = client.and_then(|c| c.get("name")).and_then(Value::as_str).unwrap_or("Unknown");
        let version = client.and_then(|c| c.get("version")).and_then(Value::as_str).unwrap_or("Unknown");
        info!(client = %name, version = %version, "client initialized");
        McpResponse::success(request.id, initialize_result())
    }

    async fn handle_tools_call(&self, request: McpRequest) -> McpResponse {
        let Some(name) = request.param("name").and_then(Value::as_str).map(str::to_string) else {
            return McpResponse::error(request.id, JsonRpcError::invalid_params("Missing tool name"));
        };
        let args = request
            .param("arguments")
            .cloned()
            .map(ToolArguments::from_value)
            .unwrap_or_default();
        let result = tools::dispatch(self.tools.clone(), self.store.clone(), &name, args).await;
        McpResponse::success(request.id, result.to_json())
    }

    async fn handle_resources_read(&self, request: McpRequest) -> McpResponse {
        let Some(uri) = request.param("uri").and_then(Value::as_str).map(str::to_string) else {
            return McpResponse::error(request.id, JsonRpcError::invalid_params("Missing resource uri"));
        };
        if uri != resources::CHATS_URI {
            return McpResponse::error(request.id, JsonRpcError::invalid_params(format!("Unknown resource: {uri}")));
        }
        let store = self.store.clone();
        let text = match tokio::task::spawn_blocking(move || resources::chat_list(store.as_ref())).await {
            Ok(text) => text,
            Err(e) => {
                error!(uri = %uri, error = %e, "resource worker aborted");
                "[]".to_string()
            }
        };
        McpResponse::success(
            request.id,
            json!({ "contents": [{ "uri": uri, "mimeType": "application/json", "text": text }] }),
        )
    }

    fn handle_prompts_get(&self, request: McpRequest) -> McpResponse {
        let name = request.param("name").and_then(Value::as_str).unwrap_or_default();
        if name != resources::SUMMARIZE_CHATS {
            let msg = format!("Unknown prompt: {name}");
            return McpResponse::error(request.id, JsonRpcError::invalid_params(msg));
        }
        let args = request
            .param("arguments")
            .cloned()
            .map(ToolArguments::from_value)
            .unwrap_or_default();
        McpResponse::success(request.id, resources::summarize_chats(&args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::five_chats;

    fn handler() -> McpHandler {
        McpHandler::new(Arc::new(ToolRegistry::with_default_tools()), Arc::new(five_chats()))
    }

    async fn call(method: &str, params: Value) -> McpResponse {
        let req = McpRequest::new(method).with_id(1).with_params(params);
        handler().handle_request(req).await.unwrap()
    }

    #[tokio::test]
    async fn initialize_advertises_capabilities() {
        let resp = call("initialize", json!({"clientInfo": {"name": "cli", "version": "1"}})).await;
        let result = resp.result.unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["capabilities"]["resources"]["subscribe"], true);
        assert_eq!(result["serverInfo"]["name"], SERVER_NAME);
    }

    #[tokio::test]
    async fn tools_list_has_schemas() {
        let result = call("tools/list", json!({})).await.result.unwrap();
        let tools = result["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 4);
        assert!(tools.iter().all(|t| t["inputSchema"]["type"] == "object"));
    }

    #[tokio::test]
    async fn tool_errors_stay_inside_the_result() {
        let resp = call("tools/call", json!({"name": "send_message", "arguments": {"room_id": "!a:x"}})).await;
        assert!(resp.is_success());
        let result = resp.result.unwrap();
        assert_eq!(result["isError"], true);
        assert_eq!(result["content"][0]["text"], crate::tools::send_message::MISSING_PARAMETERS);

        let resp = call("tools/call", json!({"name": "get_chats", "arguments": {"limit": 2}})).await;
        let text = resp.result.unwrap()["content"][0]["text"].as_str().unwrap().to_string();
        assert!(text.contains("Showing 1-2 of 5 total chats"));
    }

    #[tokio::test]
    async fn resources_and_prompts() {
        let result = call("resources/read", json!({"uri": resources::CHATS_URI})).await.result.unwrap();
        let list: Vec<Value> = serde_json::from_str(result["contents"][0]["text"].as_str().unwrap()).unwrap();
        assert_eq!(list.len(), 5);

        let resp = call("resources/read", json!({"uri": "beeper://nope"})).await;
        assert_eq!(resp.error.unwrap().code, -32602);

        let result = call("prompts/get", json!({"name": "summarize_chats", "arguments": {"time_range": "1h"}}))
            .await
            .result
            .unwrap();
        assert!(result["messages"][0]["content"]["text"].as_str().unwrap().contains("last 1h."));
    }

    #[tokio::test]
    async fn notifications_get_no_response_and_unknown_methods_fail() {
        let note = McpRequest::new("notifications/initialized");
        assert!(handler().handle_request(note).await.is_none());
        let resp = call("sampling/createMessage", json!({})).await;
        assert_eq!(resp.error.unwrap(), JsonRpcError::method_not_found("sampling/createMessage"));
    }
}
