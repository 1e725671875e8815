//! Per-connection event stream.
//!
//! Each stream owns its session entry through a guard: however the stream
//! ends (client gone, server shutdown, task aborted) dropping it unregisters
//! the session exactly once. The ping timer lives inside the stream too, so
//! no ping can fire after the stream is gone.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::Event;
use chrono::Utc;
use futures::stream::{self, Stream, StreamExt};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::protocol::{McpResponse, initialize_result};
use crate::session::{Session, SessionRegistry};

#[derive(Debug, Clone)]
pub enum StreamEvent {
    Initialize(Value),
    Endpoint(String),
    Ping { timestamp: i64 },
    Message(McpResponse),
}

impl StreamEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Initialize(_) => "initialize",
            StreamEvent::Endpoint(_) => "endpoint",
            StreamEvent::Ping { .. } => "ping",
            StreamEvent::Message(_) => "message",
        }
    }

    pub fn data(&self) -> String {
        match self {
            StreamEvent::Initialize(v) => v.to_string(),
            StreamEvent::Endpoint(path) => path.clone(),
            StreamEvent::Ping { timestamp } => json!({"type": "ping", "timestamp": timestamp}).to_string(),
            StreamEvent::Message(resp) => serde_json::to_string(resp).unwrap_or_default(),
        }
    }

    pub fn into_sse(self) -> Result<Event, Infallible> {
        Ok(Event::default().event(self.name()).data(self.data()))
    }
}

/// Unregisters on drop.
struct SessionGuard {
    registry: SessionRegistry,
    id: String,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(session) = self.registry.unregister(&self.id) {
            info!(
                session_id = %self.id,
                client = %session.client,
                duration_ms = session.duration().as_millis() as u64,
                remaining = self.registry.count(),
                "MCP session ended"
            );
        }
    }
}

struct Pump {
    guard: SessionGuard,
    ticker: Interval,
    outbox: mpsc::UnboundedReceiver<McpResponse>,
}

/// Registers a new session and returns its id plus the event stream:
/// `initialize`, `endpoint`, then `ping` every `ping_interval` interleaved with
/// `message` events, until `shutdown` fires or the stream is dropped.
pub fn open_session(
    registry: &SessionRegistry,
    client: Option<String>,
    ping_interval: Duration,
    shutdown: CancellationToken,
) -> (String, impl Stream<Item = StreamEvent> + Send + use<>) {
    let session = Session::new(client);
    let id = session.id.clone();
    let (tx, rx) = mpsc::unbounded_channel();
    info!(session_id = %id, client = %session.client, "new MCP session");
    let active = registry.register(session, Some(tx));
    info!(session_id = %id, active_sessions = active, "session registered");

    let guard = SessionGuard { registry: registry.clone(), id: id.clone() };
    let mut ticker = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let pump = Pump { guard, ticker, outbox: rx };

    let handshake = stream::iter([
        StreamEvent::Initialize(initialize_result()),
        StreamEvent::Endpoint(format!("/messages?sessionId={id}")),
    ]);
    let live = stream::unfold(pump, |mut pump| async move {
        let event = tokio::select! {
            _ = pump.ticker.tick() => {
                debug!(session_id = %pump.guard.id, "ping");
                StreamEvent::Ping { timestamp: Utc::now().timestamp_millis() }
            }
            Some(resp) = pump.outbox.recv() => StreamEvent::Message(resp),
        };
        Some((event, pump))
    });

    let events = handshake.chain(live).take_until(shutdown.cancelled_owned());
    (id, events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn open(registry: &SessionRegistry, token: &CancellationToken) -> (String, impl Stream<Item = StreamEvent>) {
        open_session(registry, None, Duration::from_secs(30), token.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_then_ping_every_thirty_seconds() {
        let registry = SessionRegistry::new();
        let token = CancellationToken::new();
        let (id, events) = open(&registry, &token);
        let mut events = Box::pin(events);

        let first = events.next().await.unwrap();
        assert_eq!(first.name(), "initialize");
        assert!(first.data().contains("\"protocolVersion\":\"2024-11-05\""));
        let second = events.next().await.unwrap();
        assert_eq!(second.data(), format!("/messages?sessionId={id}"));

        let start = Instant::now();
        assert!(tokio::time::timeout(Duration::from_secs(29), events.next()).await.is_err());
        let ping = events.next().await.unwrap();
        assert_eq!(ping.name(), "ping");
        assert!(ping.data().contains("\"type\":\"ping\""));
        assert_eq!(start.elapsed().as_secs(), 30);

        let ping = events.next().await.unwrap();
        assert_eq!(ping.name(), "ping");
        assert_eq!(start.elapsed().as_secs(), 60);
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ping_log_names_its_session() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _default = tracing::subscriber::set_default(subscriber);

        let registry = SessionRegistry::new();
        let token = CancellationToken::new();
        let (id, events) = open(&registry, &token);
        let mut events = Box::pin(events);
        events.next().await;
        events.next().await;
        assert_eq!(events.next().await.unwrap().name(), "ping");

        let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        let ping_line = logs.lines().find(|l| l.contains(": ping")).unwrap();
        assert!(ping_line.contains(&format!("session_id={id}")));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_stream_unregisters_once() {
        let registry = SessionRegistry::new();
        let token = CancellationToken::new();
        let (id, events) = open(&registry, &token);
        assert!(registry.contains(&id));
        drop(events);
        assert_eq!(registry.count(), 0);
        assert!(registry.unregister(&id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_ends_the_stream_without_further_pings() {
        let registry = SessionRegistry::new();
        let token = CancellationToken::new();
        let (_, events) = open(&registry, &token);
        let mut events = Box::pin(events);
        events.next().await;
        events.next().await;

        token.cancel();
        assert!(events.next().await.is_none());
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(events.next().await.is_none());
        drop(events);
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn posted_responses_arrive_as_message_events() {
        let registry = SessionRegistry::new();
        let token = CancellationToken::new();
        let (id, events) = open(&registry, &token);
        let mut events = Box::pin(events);
        events.next().await;
        events.next().await;

        let outbox = registry.outbox(&id).unwrap();
        outbox.send(McpResponse::success(Some(json!(7)), json!({}))).unwrap();
        let msg = events.next().await.unwrap();
        assert_eq!(msg.name(), "message");
        assert!(msg.data().contains("\"id\":7"));
    }

    #[tokio::test(start_paused = true)]
    async fn sessions_track_open_streams() {
        let registry = SessionRegistry::new();
        let token = CancellationToken::new();
        let streams: Vec<_> = (0..3).map(|_| open(&registry, &token)).collect();
        assert_eq!(registry.count(), 3);
        drop(streams);
        assert_eq!(registry.count(), 0);
    }
}
