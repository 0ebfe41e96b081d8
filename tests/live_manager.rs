//! Integration tests for `LiveManager`.
//!
//! An in-memory connector stands in for the agent and a scripted provider for
//! the panel's JWT endpoint. Time is paused, so backoff and refresh delays are
//! exact.
//!
//! Run with:
//! ```bash
//! cargo test --test live_manager
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

use featherpanel_live::prelude::*;

// ============================================================================
// Test doubles
// ============================================================================

/// Mints tokens valid for `ttl_secs`; can be told to fail or to hold the
/// next fetch until released.
struct ScriptedProvider {
    ttl_secs: i64,
    failing: AtomicBool,
    held: AtomicBool,
    gate: Notify,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(ttl_secs: i64) -> Arc<Self> {
        Arc::new(Self {
            ttl_secs,
            failing: AtomicBool::new(false),
            held: AtomicBool::new(false),
            gate: Notify::new(),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.gate.notify_one();
    }
}

#[async_trait]
impl TokenProvider for ScriptedProvider {
    async fn fetch_token(&self, entity_id: &str) -> Result<ChannelToken, TokenError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.held.load(Ordering::SeqCst) {
            self.gate.notified().await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(TokenError::Rejected {
                code: Some("SERVER_NOT_FOUND".into()),
                message: "server not found".into(),
            });
        }
        Ok(ChannelToken::new(
            format!("jwt-{entity_id}-{n}"),
            Utc::now().timestamp() + self.ttl_secs,
            format!("ws://agent.test/api/servers/{entity_id}/ws"),
        ))
    }
}

/// The agent side of one opened socket.
struct Agent {
    endpoint: String,
    sent: mpsc::Receiver<String>,
    events: mpsc::Sender<ChannelEvent>,
}

impl Agent {
    async fn next_frame(&mut self) -> Value {
        let text = self.sent.recv().await.expect("socket closed");
        serde_json::from_str(&text).expect("frame is JSON")
    }

    /// Read the auth frame and approve it.
    async fn accept(&mut self) -> Value {
        let auth = self.next_frame().await;
        assert_eq!(auth["event"], "auth");
        self.emit("auth success", json!([])).await;
        auth
    }

    async fn emit(&self, event: &str, args: Value) {
        let frame = json!({ "event": event, "args": args });
        self.raw(frame.to_string()).await;
    }

    async fn raw(&self, text: impl Into<String>) {
        self.events
            .send(ChannelEvent::Frame(text.into()))
            .await
            .expect("reader gone");
    }

    async fn hang_up(&self) {
        self.events
            .send(ChannelEvent::Closed {
                code: Some(1006),
                reason: "agent restarted".into(),
            })
            .await
            .expect("reader gone");
    }

    /// Count queued `send stats` requests, consuming every queued frame.
    fn stats_requests(&mut self) -> usize {
        let mut count = 0;
        while let Ok(text) = self.sent.try_recv() {
            let frame: Value = serde_json::from_str(&text).expect("frame is JSON");
            if frame["event"] == "send stats" {
                count += 1;
            }
        }
        count
    }

    /// True once the manager dropped its end of the socket.
    async fn is_closed(&mut self) -> bool {
        while self.sent.recv().await.is_some() {}
        true
    }
}

struct MockConnector {
    agents: mpsc::UnboundedSender<Agent>,
    refusing: AtomicBool,
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, endpoint: &str) -> Result<Channel, WsError> {
        if self.refusing.load(Ordering::SeqCst) {
            return Err(WsError::ConnectionFailed("connection refused".into()));
        }
        let (out_tx, out_rx) = mpsc::channel(32);
        let (in_tx, in_rx) = mpsc::channel(32);
        self.agents
            .send(Agent {
                endpoint: endpoint.to_string(),
                sent: out_rx,
                events: in_tx,
            })
            .map_err(|_| WsError::ConnectionFailed("harness gone".into()))?;
        Ok(Channel {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

struct Harness {
    live: LiveManager,
    provider: Arc<ScriptedProvider>,
    connector: Arc<MockConnector>,
    agents: mpsc::UnboundedReceiver<Agent>,
}

fn harness(ttl_secs: i64) -> Harness {
    let provider = ScriptedProvider::new(ttl_secs);
    let (tx, agents) = mpsc::unbounded_channel();
    let connector = Arc::new(MockConnector {
        agents: tx,
        refusing: AtomicBool::new(false),
    });
    let live = LiveManager::new(provider.clone(), connector.clone());
    Harness {
        live,
        provider,
        connector,
        agents,
    }
}

impl Harness {
    fn spawn_connect(&self, id: &str) -> JoinHandle<LiveResult<()>> {
        let live = self.live.clone();
        let id = id.to_string();
        tokio::spawn(async move { live.connect(&id).await })
    }

    async fn next_agent(&mut self) -> Agent {
        self.agents.recv().await.expect("connector dropped")
    }

    async fn connected(&mut self, id: &str) -> Agent {
        let handle = self.spawn_connect(id);
        let mut agent = self.next_agent().await;
        agent.accept().await;
        handle
            .await
            .expect("connect task panicked")
            .expect("connect should succeed");
        agent
    }

    fn snapshot(&self, id: &str) -> ConnectionSnapshot {
        self.live.snapshot(id).expect("entity registered")
    }
}

/// Let every runnable task make progress without advancing time.
async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

fn stats_payload(value: Value) -> Value {
    json!([value.to_string()])
}

// ============================================================================
// Token lifecycle
// ============================================================================

mod token_lifecycle {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_refresh_armed_one_minute_before_expiry() {
        let mut h = harness(3_600);
        let start = Instant::now();
        let first = h.connected("srv-a").await;
        assert_eq!(first.endpoint, "ws://agent.test/api/servers/srv-a/ws");

        let snap = h.snapshot("srv-a");
        assert_eq!(snap.status, ConnectionStatus::Connected);
        assert!(snap.token_refresh_pending);
        let delay = snap
            .token_refresh_at
            .expect("refresh deadline")
            .duration_since(start);
        assert!(
            delay >= Duration::from_secs(3_538) && delay <= Duration::from_secs(3_541),
            "refresh in {delay:?}"
        );

        sleep(Duration::from_secs(3_530)).await;
        assert_eq!(h.provider.calls(), 1);

        sleep(Duration::from_secs(15)).await;
        assert_eq!(h.provider.calls(), 2);
        let mut second = h.next_agent().await;
        let auth = second.accept().await;
        assert_eq!(auth["args"][0], "jwt-srv-a-2");
        settle().await;

        let snap = h.snapshot("srv-a");
        assert_eq!(snap.status, ConnectionStatus::Connected);
        assert!(!snap.refreshing_token);
        assert!(!snap.reconnect_pending);
        assert_eq!(snap.reconnect_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_window_blocks_reconnect() {
        let mut h = harness(70);
        let start = Instant::now();
        let mut first = h.connected("srv-f").await;
        let delay = h
            .snapshot("srv-f")
            .token_refresh_at
            .expect("refresh deadline")
            .duration_since(start);
        assert!(delay >= Duration::from_secs(9) && delay <= Duration::from_secs(10));

        h.provider.hold();
        sleep(Duration::from_secs(11)).await;

        let snap = h.snapshot("srv-f");
        assert!(snap.refreshing_token);
        assert_eq!(snap.status, ConnectionStatus::Connecting);
        assert!(!snap.reconnect_pending);
        assert_eq!(snap.reconnect_attempts, 0);
        assert_eq!(h.provider.calls(), 2);
        assert!(first.is_closed().await);

        h.provider.release();
        let mut second = h.next_agent().await;
        let auth = second.accept().await;
        assert_eq!(auth["args"][0], "jwt-srv-f-2");
        settle().await;

        let snap = h.snapshot("srv-f");
        assert_eq!(snap.status, ConnectionStatus::Connected);
        assert!(!snap.refreshing_token);
        assert!(snap.token_refresh_pending);
        assert!(!snap.reconnect_pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_does_not_reconnect() {
        let mut h = harness(70);
        let _first = h.connected("srv-r").await;

        h.provider.fail(true);
        sleep(Duration::from_secs(11)).await;
        settle().await;

        let snap = h.snapshot("srv-r");
        assert_eq!(snap.status, ConnectionStatus::Disconnected);
        assert_eq!(snap.health, Health::Error);
        assert!(!snap.refreshing_token);
        assert!(!snap.reconnect_pending);
        assert!(!snap.token_refresh_pending);
        assert_eq!(h.provider.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_during_refresh() {
        let mut h = harness(70);
        let mut first = h.connected("srv-d").await;

        h.provider.hold();
        sleep(Duration::from_secs(11)).await;
        assert!(h.snapshot("srv-d").refreshing_token);
        assert!(first.is_closed().await);

        h.live.disconnect("srv-d");
        let snap = h.snapshot("srv-d");
        assert!(!snap.refreshing_token);
        assert_eq!(snap.status, ConnectionStatus::Disconnected);

        // The refresh resumes with a fresh token, but its attempt is gone.
        h.provider.release();
        settle().await;
        assert!(h.agents.try_recv().is_err());

        let snap = h.snapshot("srv-d");
        assert_eq!(snap.status, ConnectionStatus::Disconnected);
        assert_eq!(snap.health, Health::Unknown);
        assert!(!snap.refreshing_token);
        assert!(!snap.reconnect_pending);
        assert!(!snap.token_refresh_pending);
        assert!(!snap.socket_open);
        assert_eq!(snap.reconnect_attempts, 0);

        sleep(Duration::from_secs(600)).await;
        assert_eq!(h.provider.calls(), 2);
        assert!(h.agents.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_agent_token_expiry_triggers_refresh() {
        let mut h = harness(3_600);
        let mut first = h.connected("srv-x").await;

        first.emit("token expiring", json!([])).await;
        let mut second = h.next_agent().await;
        assert!(first.is_closed().await);
        second.accept().await;
        settle().await;

        assert_eq!(h.provider.calls(), 2);
        let snap = h.snapshot("srv-x");
        assert_eq!(snap.status, ConnectionStatus::Connected);
        assert!(!snap.refreshing_token);
        assert_eq!(snap.reconnect_attempts, 0);
    }
}

// ============================================================================
// Reconnect scheduling
// ============================================================================

mod reconnect {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_close_reconnects_after_base_delay() {
        let mut h = harness(3_600);
        let first = h.connected("srv-b").await;

        first.hang_up().await;
        settle().await;
        let snap = h.snapshot("srv-b");
        assert_eq!(snap.status, ConnectionStatus::Disconnected);
        assert_eq!(snap.reconnect_attempts, 1);
        assert!(snap.reconnect_pending);
        assert!(!snap.refreshing_token);
        assert!(!snap.socket_open);

        sleep(Duration::from_millis(4_900)).await;
        assert!(h.agents.try_recv().is_err());
        assert_eq!(h.provider.calls(), 1);

        sleep(Duration::from_millis(200)).await;
        let mut second = h.agents.try_recv().expect("reconnect opened a channel");
        second.accept().await;
        settle().await;

        let snap = h.snapshot("srv-b");
        assert_eq!(snap.status, ConnectionStatus::Connected);
        assert_eq!(snap.reconnect_attempts, 0);
        assert!(!snap.reconnect_pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_failures_stop_after_five_reconnects() {
        let h = harness(3_600);
        h.provider.fail(true);

        let err = h.live.connect("srv-c").await.unwrap_err();
        assert!(matches!(err, LiveError::Token(TokenError::Rejected { .. })));
        let snap = h.snapshot("srv-c");
        assert_eq!(snap.status, ConnectionStatus::Disconnected);
        assert_eq!(snap.health, Health::Error);
        assert_eq!(snap.reconnect_attempts, 1);
        assert!(snap.reconnect_pending);

        // 5 + 10 + 15 + 20 + 25 seconds of backoff.
        sleep(Duration::from_secs(200)).await;
        assert_eq!(h.provider.calls(), 6);
        let snap = h.snapshot("srv-c");
        assert_eq!(snap.reconnect_attempts, 5);
        assert!(!snap.reconnect_pending);
        assert_eq!(snap.status, ConnectionStatus::Disconnected);
        assert_eq!(snap.health, Health::Error);

        // An explicit connect still runs, but the budget stays spent.
        assert!(h.live.connect("srv-c").await.is_err());
        assert_eq!(h.provider.calls(), 7);
        let snap = h.snapshot("srv-c");
        assert_eq!(snap.reconnect_attempts, 5);
        assert!(!snap.reconnect_pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_grows_linearly() {
        let h = harness(3_600);
        h.provider.fail(true);
        let start = Instant::now();
        let _ = h.live.connect("srv-l").await;

        // Sample between whole seconds so the timers never tie with ours.
        sleep(Duration::from_millis(500)).await;
        let mut seen = Vec::new();
        for _ in 0..3 {
            let calls = h.provider.calls();
            while h.provider.calls() == calls {
                sleep(Duration::from_secs(1)).await;
            }
            seen.push(start.elapsed().as_secs());
        }
        assert_eq!(seen, vec![5, 15, 30]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connector_failure_is_retried() {
        let mut h = harness(3_600);
        h.connector.refusing.store(true, Ordering::SeqCst);

        let err = h.live.connect("srv-w").await.unwrap_err();
        assert!(matches!(err, LiveError::Ws(WsError::ConnectionFailed(_))));
        assert_eq!(h.snapshot("srv-w").reconnect_attempts, 1);

        h.connector.refusing.store(false, Ordering::SeqCst);
        sleep(Duration::from_secs(5)).await;
        let mut agent = h.next_agent().await;
        agent.accept().await;
        settle().await;
        assert!(h.live.is_connected("srv-w"));
        assert!(h.live.is_healthy("srv-w"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_socket_lost_before_auth() {
        let mut h = harness(3_600);
        let handle = h.spawn_connect("srv-s");
        let mut agent = h.next_agent().await;
        agent.next_frame().await;
        agent.hang_up().await;

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, LiveError::Ws(WsError::Closed { code: Some(1006), .. })));
        let snap = h.snapshot("srv-s");
        assert_eq!(snap.status, ConnectionStatus::Disconnected);
        assert_eq!(snap.reconnect_attempts, 1);
        assert!(snap.reconnect_pending);
    }
}

// ============================================================================
// Message routing
// ============================================================================

mod routing {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_auth_error_while_connected() {
        let mut h = harness(3_600);
        let mut agent = h.connected("srv-d").await;

        agent.emit("auth_error", json!(["token invalid"])).await;
        settle().await;

        let snap = h.snapshot("srv-d");
        assert_eq!(snap.status, ConnectionStatus::Disconnected);
        assert_eq!(snap.health, Health::Error);
        assert!(!snap.socket_open);
        assert!(agent.is_closed().await);
        // Counted once toward the reconnect budget.
        assert_eq!(snap.reconnect_attempts, 1);
        assert!(snap.reconnect_pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_error_rejects_connect() {
        let mut h = harness(3_600);
        let handle = h.spawn_connect("srv-j");
        let mut agent = h.next_agent().await;
        agent.next_frame().await;
        agent.emit("auth error", json!([])).await;

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, LiveError::AuthRejected));
        let snap = h.snapshot("srv-j");
        assert_eq!(snap.health, Health::Error);
        assert_eq!(snap.reconnect_attempts, 1);
        assert!(snap.reconnect_pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_verdict_with_null_args() {
        let mut h = harness(3_600);
        let handle = h.spawn_connect("srv-n");
        let mut agent = h.next_agent().await;
        agent.next_frame().await;
        agent.raw(r#"{"event":"auth success","args":null}"#).await;

        handle.await.unwrap().expect("null args still carry the verdict");
        let snap = h.snapshot("srv-n");
        assert_eq!(snap.status, ConnectionStatus::Connected);
        assert_eq!(snap.reconnect_attempts, 0);
        assert!(!snap.awaiting_auth);

        agent.raw(r#"{"event":"status","args":null}"#).await;
        settle().await;
        assert!(h.live.is_connected("srv-n"));
        let data = h.live.live_data("srv-n").expect("entry created");
        assert!(data.status.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_timeout() {
        let mut h = harness(3_600);
        let handle = h.spawn_connect("srv-t");
        let mut agent = h.next_agent().await;
        agent.next_frame().await;
        let start = Instant::now();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, LiveError::AuthTimeout(d) if d == Duration::from_secs(15)));
        assert_eq!(start.elapsed().as_secs(), 15);
        let snap = h.snapshot("srv-t");
        assert_eq!(snap.status, ConnectionStatus::Disconnected);
        assert_eq!(snap.health, Health::Error);
        assert!(!snap.awaiting_auth);
        assert_eq!(snap.reconnect_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_stats_keeps_connection() {
        let mut h = harness(3_600);
        let agent = h.connected("srv-e").await;

        agent.emit("status", json!(["running"])).await;
        agent.emit("daemon error", json!(["disk quota exceeded"])).await;
        settle().await;
        assert!(!h.live.is_healthy("srv-e"));

        agent.emit("stats", json!(["{not json"])).await;
        settle().await;
        let snap = h.snapshot("srv-e");
        assert_eq!(snap.status, ConnectionStatus::Connected);
        assert_eq!(snap.health, Health::Error);
        assert!(snap.stats_polling);

        agent
            .emit("stats", stats_payload(json!({"cpu_absolute": 1.0, "state": "running"})))
            .await;
        settle().await;
        assert!(h.live.is_healthy("srv-e"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_and_garbage_frames_ignored() {
        let mut h = harness(3_600);
        let agent = h.connected("srv-g").await;

        agent.raw("not a frame").await;
        agent.raw(r#"{"args":["no event"]}"#).await;
        agent.emit("console output", json!(["[Server] Done (3.1s)!"])).await;
        settle().await;

        assert!(h.live.is_connected("srv-g"));
        assert!(h.live.is_healthy("srv-g"));
        assert!(h.live.live_data("srv-g").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_update_live_data() {
        let mut h = harness(3_600);
        let agent = h.connected("srv-s").await;
        assert!(h.live.live_data("srv-s").is_none());

        agent
            .emit(
                "stats",
                stats_payload(json!({
                    "memory_bytes": 536_870_912u64,
                    "memory_limit_bytes": 1_073_741_824u64,
                    "cpu_absolute": 33.6,
                    "disk_bytes": 1024,
                    "network": {"rx_bytes": 10, "tx_bytes": 20},
                    "state": "running",
                    "uptime": 5000
                })),
            )
            .await;
        settle().await;

        let data = h.live.live_data("srv-s").expect("entry created");
        assert_eq!(data.status.as_deref(), Some("running"));
        let stats = data.stats.expect("stats stored");
        assert_eq!(stats.cpu_usage, 34);
        assert_eq!(stats.memory_bytes, 536_870_912);
        assert_eq!(stats.memory_limit_bytes, 1_073_741_824);
        assert_eq!(stats.disk_bytes, 1024);
        assert_eq!(stats.network_rx, 10);
        assert_eq!(stats.network_tx, 20);
        assert_eq!(stats.uptime, 5000);

        assert_eq!(h.live.server_status("srv-s").as_deref(), Some("running"));
        assert_eq!(h.live.server_stats("srv-s").map(|s| s.cpu_usage), Some(34));
        let snap = h.snapshot("srv-s");
        assert_eq!(snap.agent_status.as_deref(), Some("running"));
        assert!(snap.stats_polling);
    }
}

// ============================================================================
// Stats polling
// ============================================================================

mod polling {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_poller_follows_active_states() {
        let mut h = harness(3_600);
        let mut agent = h.connected("srv-p").await;
        settle().await;
        assert_eq!(agent.stats_requests(), 1, "one request right after auth");
        assert!(!h.snapshot("srv-p").stats_polling);

        agent.emit("status", json!(["starting"])).await;
        settle().await;
        assert!(h.snapshot("srv-p").stats_polling);
        assert_eq!(agent.stats_requests(), 0);

        sleep(Duration::from_millis(5_010)).await;
        assert_eq!(agent.stats_requests(), 1);

        agent.emit("status", json!(["running"])).await;
        settle().await;
        assert_eq!(agent.stats_requests(), 1, "immediate request on entering running");

        sleep(Duration::from_millis(5_010)).await;
        assert_eq!(agent.stats_requests(), 1);

        agent.emit("status", json!(["offline"])).await;
        settle().await;
        assert!(!h.snapshot("srv-p").stats_polling);
        sleep(Duration::from_secs(30)).await;
        assert_eq!(agent.stats_requests(), 0);
        assert_eq!(h.live.server_status("srv-p").as_deref(), Some("offline"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_stats_request() {
        let mut h = harness(3_600);
        assert!(matches!(
            h.live.request_stats("srv-m"),
            Err(WsError::NotConnected)
        ));

        let mut agent = h.connected("srv-m").await;
        settle().await;
        agent.stats_requests();

        h.live.request_stats("srv-m").unwrap();
        assert_eq!(agent.stats_requests(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_stops_when_socket_lost() {
        let mut h = harness(3_600);
        let agent = h.connected("srv-q").await;
        agent.emit("status", json!(["running"])).await;
        settle().await;
        assert!(h.snapshot("srv-q").stats_polling);

        agent.hang_up().await;
        settle().await;
        let snap = h.snapshot("srv-q");
        assert!(!snap.stats_polling);
        assert!(snap.reconnect_pending);
    }
}

// ============================================================================
// Public API
// ============================================================================

mod api {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_idempotent() {
        let mut h = harness(3_600);
        let handle = h.spawn_connect("srv-i");
        let mut agent = h.next_agent().await;
        assert!(h.live.is_connecting("srv-i"));

        h.live.connect("srv-i").await.unwrap();
        assert_eq!(h.provider.calls(), 1);

        agent.accept().await;
        handle.await.unwrap().unwrap();
        h.live.connect("srv-i").await.unwrap();
        assert_eq!(h.provider.calls(), 1);
        assert!(h.agents.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_releases_everything() {
        let mut h = harness(3_600);
        let mut agent = h.connected("srv-o").await;
        agent.emit("status", json!(["running"])).await;
        settle().await;
        let snap = h.snapshot("srv-o");
        assert!(snap.stats_polling && snap.token_refresh_pending);

        h.live.disconnect("srv-o");
        let snap = h.snapshot("srv-o");
        assert_eq!(snap.status, ConnectionStatus::Disconnected);
        assert_eq!(snap.health, Health::Unknown);
        assert_eq!(snap.reconnect_attempts, 0);
        assert!(!snap.refreshing_token);
        assert!(!snap.socket_open);
        assert!(!snap.reconnect_pending);
        assert!(!snap.token_refresh_pending);
        assert!(!snap.stats_polling);
        assert!(!snap.awaiting_auth);
        assert!(agent.is_closed().await);

        sleep(Duration::from_secs(4_000)).await;
        assert_eq!(h.provider.calls(), 1);
        assert!(h.agents.try_recv().is_err());

        h.live.disconnect("srv-o");
        assert_eq!(h.live.status("srv-o"), ConnectionStatus::Disconnected);
        // Last known data survives a disconnect.
        assert_eq!(h.live.server_status("srv-o").as_deref(), Some("running"));

        h.live.disconnect("never-seen");
        assert!(h.live.snapshot("never-seen").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_aborts_token_fetch() {
        let h = harness(3_600);
        h.provider.hold();
        let handle = h.spawn_connect("srv-k");
        settle().await;
        assert!(h.live.is_connecting("srv-k"));

        h.live.disconnect("srv-k");
        h.provider.release();
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(LiveError::Aborted)));
        settle().await;

        let snap = h.snapshot("srv-k");
        assert_eq!(snap.status, ConnectionStatus::Disconnected);
        assert_eq!(snap.health, Health::Unknown);
        assert!(!snap.reconnect_pending);
        assert!(!snap.token_refresh_pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_aborts_auth_wait() {
        let mut h = harness(3_600);
        let handle = h.spawn_connect("srv-z");
        let mut agent = h.next_agent().await;
        agent.next_frame().await;

        h.live.disconnect("srv-z");
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(LiveError::Aborted)));
        assert!(agent.is_closed().await);

        // A late verdict from the dead socket changes nothing.
        let _ = agent.events.try_send(ChannelEvent::Frame(
            json!({"event": "auth success"}).to_string(),
        ));
        settle().await;
        assert_eq!(h.live.status("srv-z"), ConnectionStatus::Disconnected);
        assert!(!h.snapshot("srv-z").reconnect_pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_many_and_disconnect_all() {
        let Harness {
            live, mut agents, ..
        } = harness(3_600);

        let acceptor = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Some(mut agent) = agents.recv().await {
                agent.accept().await;
                held.push(agent);
                if held.len() == 2 {
                    break;
                }
            }
            held
        });

        let results = live.connect_many(["srv-1", "srv-2"]).await;
        let ids: Vec<&str> = results.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["srv-1", "srv-2"]);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
        let _held = acceptor.await.unwrap();

        assert!(live.is_connected("srv-1") && live.is_connected("srv-2"));
        assert_eq!(live.entity_ids(), vec!["srv-1".to_string(), "srv-2".to_string()]);

        live.disconnect_all();
        assert!(!live.is_connected("srv-1"));
        assert!(!live.is_connected("srv-2"));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let provider = ScriptedProvider::new(60);
        let (tx, _rx) = mpsc::unbounded_channel();
        let connector = Arc::new(MockConnector {
            agents: tx,
            refusing: AtomicBool::new(false),
        });
        let config = LiveConfig {
            reconnect_base_delay: Duration::ZERO,
            ..Default::default()
        };
        assert!(LiveManager::with_config(config, provider, connector).is_err());
    }
}
