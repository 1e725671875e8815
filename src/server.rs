use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderName, Method, StatusCode, header};
use axum::response::sse::Sse;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::protocol::{JsonRpcError, McpHandler, McpRequest, McpResponse, SERVER_NAME, SERVER_VERSION};
use crate::session::{SessionRegistry, SessionSummary};
use crate::sse::{StreamEvent, open_session};

#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionRegistry,
    pub handler: McpHandler,
    pub started_at: Instant,
    pub ip: String,
    pub ping_interval: Duration,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(handler: McpHandler, ip: String, ping_interval: Duration) -> Self {
        Self {
            sessions: SessionRegistry::new(),
            handler,
            started_at: Instant::now(),
            ip,
            ping_interval,
            shutdown: CancellationToken::new(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    /// Milliseconds since the server started.
    pub uptime: u64,
    pub sessions: usize,
    pub ip: String,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let resp = HealthResponse {
        status: "healthy",
        service: SERVER_NAME,
        version: SERVER_VERSION,
        uptime: state.started_at.elapsed().as_millis() as u64,
        sessions: state.sessions.count(),
        ip: state.ip.clone(),
    };
    debug!(sessions = resp.sessions, "health");
    Json(resp)
}

async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    let sessions = state.sessions.list();
    debug!(sessions = sessions.len(), "sessions listed");
    Json(sessions)
}

/// `{name}/{version}` from the client headers, each part defaulting to `Unknown`.
fn client_label(headers: &HeaderMap) -> Option<String> {
    let get = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);
    let (name, version) = (get("x-client-name"), get("x-client-version"));
    if name.is_none() && version.is_none() {
        return None;
    }
    Some(format!(
        "{}/{}",
        name.unwrap_or_else(|| "Unknown".into()),
        version.unwrap_or_else(|| "Unknown".into())
    ))
}

async fn sse(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");
    info!(user_agent = %user_agent, "SSE connection established");
    let (_, events) = open_session(
        &state.sessions,
        client_label(&headers),
        state.ping_interval,
        state.shutdown.clone(),
    );
    Sse::new(events.map(StreamEvent::into_sse))
}

fn parse_request(body: &str) -> Result<McpRequest, McpResponse> {
    serde_json::from_str(body).map_err(|e| {
        warn!(error = %e, "unparsable JSON-RPC body");
        McpResponse::error(None, JsonRpcError::parse_error(e.to_string()))
    })
}

#[derive(Debug, Deserialize)]
struct MessagesQuery {
    #[serde(rename = "sessionId")]
    session_id: String,
}

/// Requests posted for a stream; the response travels back on that stream.
async fn post_message(
    State(state): State<AppState>,
    Query(query): Query<MessagesQuery>,
    body: String,
) -> Response {
    let Some(outbox) = state.sessions.outbox(&query.session_id) else {
        return (StatusCode::NOT_FOUND, "Unknown session").into_response();
    };
    let request = match parse_request(&body) {
        Ok(r) => r,
        Err(resp) => return (StatusCode::BAD_REQUEST, Json(resp)).into_response(),
    };
    debug!(session_id = %query.session_id, method = %request.method, "message posted");
    if let Some(resp) = state.handler.handle_request(request).await {
        if outbox.send(resp).is_err() {
            return (StatusCode::NOT_FOUND, "Session closed").into_response();
        }
    }
    StatusCode::ACCEPTED.into_response()
}

async fn post_mcp(State(state): State<AppState>, body: String) -> Response {
    let request = match parse_request(&body) {
        Ok(r) => r,
        Err(resp) => return (StatusCode::BAD_REQUEST, Json(resp)).into_response(),
    };
    match state.handler.handle_request(request).await {
        Some(resp) => Json(resp).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

/// Any origin, with credentials, so the allowed origin is mirrored back.
fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_credentials(true)
        .allow_methods([Method::OPTIONS, Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            HeaderName::from_static("x-request-id"),
            HeaderName::from_static("x-client-name"),
            HeaderName::from_static("x-client-version"),
        ])
        .expose_headers([HeaderName::from_static("x-request-id")])
        .max_age(Duration::from_secs(3600))
        .vary([header::ORIGIN])
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sessions", get(list_sessions))
        .route("/sse", get(sse))
        .route("/messages", post(post_message))
        .route("/mcp", post(post_mcp))
        .with_state(state)
        .layer(cors())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerExit {
    /// Stopped on request.
    Graceful,
    /// The serve loop returned an error.
    Failed(String),
    /// Panicked, was aborted, or missed the shutdown deadline.
    Killed,
}

fn listen_failure(addr: SocketAddr) -> impl FnOnce(std::io::Error) -> ServerError {
    move |source| ServerError::Bind { addr, source }
}

/// A bound, serving listener.
pub struct RunningServer {
    addr: SocketAddr,
    sessions: SessionRegistry,
    shutdown: CancellationToken,
    task: Option<JoinHandle<Result<(), ServerError>>>,
}

impl RunningServer {
    pub async fn start(config: &ServerConfig, handler: McpHandler, ip: String) -> Result<Self, ServerError> {
        let addr = config.socket_addr()?;
        let listener = tokio::net::TcpListener::bind(addr).await.map_err(listen_failure(addr))?;
        let addr = listener.local_addr().map_err(listen_failure(addr))?;

        let state = AppState::new(handler, ip.clone(), config.ping_interval);
        let sessions = state.sessions.clone();
        let shutdown = state.shutdown.clone();
        let app = router(state);

        let signal = shutdown.clone().cancelled_owned();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(signal)
                .await
                .map_err(ServerError::Serve)
        });

        info!(
            server = SERVER_NAME,
            version = SERVER_VERSION,
            address = %format!("http://{ip}:{}", addr.port()),
            bound = %addr,
            "MCP server started (endpoints: /sse /health /sessions /mcp)"
        );
        Ok(Self { addr, sessions, shutdown, task: Some(task) })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn exit_from(joined: Result<Result<(), ServerError>, tokio::task::JoinError>) -> ServerExit {
        match joined {
            Ok(Ok(())) => ServerExit::Graceful,
            Ok(Err(e)) => ServerExit::Failed(e.to_string()),
            Err(_) => ServerExit::Killed,
        }
    }

    /// Resolves when the serve task ends on its own or is stopped.
    pub async fn wait(&mut self) -> ServerExit {
        match self.task.as_mut() {
            Some(task) => {
                let exit = Self::exit_from(task.await);
                self.task = None;
                exit
            }
            None => ServerExit::Graceful,
        }
    }

    /// Graceful shutdown bounded by `grace`, then abort. Safe to call repeatedly.
    pub async fn stop(&mut self, grace: Duration) -> ServerExit {
        self.shutdown.cancel();
        let cleared = self.sessions.clear();
        let Some(mut task) = self.task.take() else {
            return ServerExit::Graceful;
        };
        let exit = match tokio::time::timeout(grace, &mut task).await {
            Ok(joined) => Self::exit_from(joined),
            Err(_) => {
                warn!(grace_ms = grace.as_millis() as u64, "graceful shutdown timed out, aborting");
                task.abort();
                ServerExit::Killed
            }
        };
        info!(addr = %self.addr, sessions_cleared = cleared, ?exit, "MCP server stopped");
        exit
    }

    /// Handle that aborts the serve task from elsewhere, as a host kill would.
    pub fn abort_handle(&self) -> Option<AbortHandle> {
        self.task.as_ref().map(|t| t.abort_handle())
    }

    /// Kills the serve task without a graceful phase; [`wait`](Self::wait) then reports `Killed`.
    pub fn abort(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
            error!(addr = %self.addr, "MCP server aborted");
        }
        self.shutdown.cancel();
        self.sessions.clear();
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolRegistry;
    use crate::tools::testing::five_chats;
    use axum::body::Body;
    use axum::http::{HeaderValue, Request};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn state() -> AppState {
        let handler = McpHandler::new(Arc::new(ToolRegistry::with_default_tools()), Arc::new(five_chats()));
        AppState::new(handler, "127.0.0.1".into(), Duration::from_secs(30))
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn health_sessions(app: &Router) -> u64 {
        let resp = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let v = body_json(resp).await;
        assert_eq!(v["status"], "healthy");
        assert_eq!(v["service"], SERVER_NAME);
        v["sessions"].as_u64().unwrap()
    }

    async fn open_stream(app: &Router) -> Response {
        let resp = app
            .clone()
            .oneshot(Request::get("/sse").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        resp
    }

    #[tokio::test]
    async fn health_counts_open_streams() {
        let app = router(state());
        assert_eq!(health_sessions(&app).await, 0);

        let first = open_stream(&app).await;
        assert_eq!(health_sessions(&app).await, 1);

        let mut more = vec![open_stream(&app).await, open_stream(&app).await];
        assert_eq!(health_sessions(&app).await, 3);

        drop(first);
        more.pop();
        assert_eq!(health_sessions(&app).await, 1);
        drop(more);
        assert_eq!(health_sessions(&app).await, 0);
    }

    #[tokio::test]
    async fn sessions_endpoint_lists_client_label() {
        let app = router(state());
        let _stream = app
            .clone()
            .oneshot(
                Request::get("/sse")
                    .header("x-client-name", "inspector")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let resp = app
            .clone()
            .oneshot(Request::get("/sessions").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let v = body_json(resp).await;
        assert_eq!(v.as_array().unwrap().len(), 1);
        assert_eq!(v[0]["client"], "inspector/Unknown");
        assert!(v[0]["id"].as_str().unwrap().starts_with("session_"));
    }

    #[tokio::test]
    async fn posted_message_is_answered_on_the_stream() {
        let st = state();
        let app = router(st.clone());
        let stream = open_stream(&app).await;
        let id = st.sessions.list()[0].id.clone();

        let req = json!({"jsonrpc": "2.0", "id": 3, "method": "tools/list"}).to_string();
        let resp = app
            .clone()
            .oneshot(
                Request::post(format!("/messages?sessionId={id}"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(req))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let mut frames = stream.into_body().into_data_stream();
        let mut seen = String::new();
        while !seen.contains("event: message") {
            let chunk = frames.next().await.unwrap().unwrap();
            seen.push_str(&String::from_utf8_lossy(&chunk));
        }
        let init = seen.find("event: initialize").unwrap();
        let endpoint = seen.find("event: endpoint").unwrap();
        assert!(init < endpoint);
        assert!(seen.contains(&format!("data: /messages?sessionId={id}")));
        assert!(seen.contains("get_chats"));
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let app = router(state());
        let resp = app
            .oneshot(
                Request::post("/messages?sessionId=session_0_dead")
                    .body(Body::from(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn mcp_endpoint_answers_directly() {
        let app = router(state());
        let call = json!({
            "jsonrpc": "2.0", "id": 9, "method": "tools/call",
            "params": {"name": "get_chats", "arguments": {"limit": 2, "offset": 4}}
        });
        let resp = app
            .clone()
            .oneshot(Request::post("/mcp").body(Body::from(call.to_string())).unwrap())
            .await
            .unwrap();
        let v = body_json(resp).await;
        assert_eq!(v["id"], 9);
        let text = v["result"]["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("Showing 1 chat (page complete)"));

        let resp = app
            .oneshot(Request::post("/mcp").body(Body::from("{not json")).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"]["code"], -32700);
    }

    #[tokio::test]
    async fn cors_mirrors_origin_with_credentials() {
        let app = router(state());
        let resp = app
            .oneshot(
                Request::get("/health")
                    .header(header::ORIGIN, "http://example.test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let h = resp.headers();
        assert_eq!(
            h.get(header::ACCESS_CONTROL_ALLOW_ORIGIN),
            Some(&HeaderValue::from_static("http://example.test"))
        );
        assert_eq!(
            h.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS),
            Some(&HeaderValue::from_static("true"))
        );
    }

    #[tokio::test]
    async fn start_stop_is_idempotent_and_clears_sessions() {
        let cfg = ServerConfig { host: "127.0.0.1".into(), port: 0, ..ServerConfig::default() };
        let handler = state().handler;
        let mut server = RunningServer::start(&cfg, handler.clone(), "127.0.0.1".into()).await.unwrap();
        assert!(server.is_running());
        assert_ne!(server.local_addr().port(), 0);

        let busy = ServerConfig { port: server.local_addr().port(), ..cfg.clone() };
        let err = RunningServer::start(&busy, handler, "127.0.0.1".into()).await.err().unwrap();
        assert!(matches!(err, ServerError::Bind { .. }));

        assert_eq!(server.stop(Duration::from_secs(5)).await, ServerExit::Graceful);
        assert_eq!(server.sessions().count(), 0);
        assert!(!server.is_running());
        assert_eq!(server.stop(Duration::from_secs(5)).await, ServerExit::Graceful);
    }

    #[test]
    fn listener_io_failures_are_startup_errors() {
        let addr: SocketAddr = "127.0.0.1:8081".parse().unwrap();
        let err = listen_failure(addr)(std::io::Error::other("no local address"));
        assert!(matches!(err, ServerError::Bind { addr: a, .. } if a == addr));
        assert_eq!(err.to_string(), "failed to bind 127.0.0.1:8081: no local address");
    }

    #[tokio::test]
    async fn external_abort_reports_killed() {
        let cfg = ServerConfig { host: "127.0.0.1".into(), port: 0, ..ServerConfig::default() };
        let mut server = RunningServer::start(&cfg, state().handler, "127.0.0.1".into()).await.unwrap();
        server.abort_handle().unwrap().abort();
        assert_eq!(server.wait().await, ServerExit::Killed);
        assert!(server.abort_handle().is_none());
    }
}
