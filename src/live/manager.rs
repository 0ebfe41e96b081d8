//! Public entry point and connect-attempt machinery.

use std::sync::{Arc, Weak};

use futures_util::future::join_all;
use tokio::sync::oneshot;

use crate::auth::{ChannelToken, TokenProvider};
use crate::error::{LiveError, LiveResult, WsError};
use crate::live::config::LiveConfig;
use crate::live::poller::request_stats;
use crate::live::registry::{lock, ConnectionRegistry};
use crate::live::router::read_channel;
use crate::live::state::{ConnectionSnapshot, ConnectionState, ConnectionStatus, Health, Socket};
use crate::live::store::{LiveDataStore, ServerLiveData, ServerStats};
use crate::ws::{Channel, Connector, MessageOut};

/// State shared by the manager handles and every timer/reader task.
///
/// Tasks only hold a [`Weak`] to it, so dropping the last [`LiveManager`]
/// tears everything down.
pub(crate) struct Shared {
    pub(crate) config: LiveConfig,
    pub(crate) provider: Arc<dyn TokenProvider>,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) registry: ConnectionRegistry,
    pub(crate) store: LiveDataStore,
}

/// Manages live agent channels for any number of servers.
///
/// Cheap to clone; clones share the same connections.
///
/// ```rust,ignore
/// let provider = HttpTokenProvider::new("https://panel.example.com")?
///     .with_api_key(key)
///     .await;
/// let live = LiveManager::new(Arc::new(provider), Arc::new(NativeConnector::new()));
///
/// live.connect("8f1c...").await?;
/// if let Some(data) = live.live_data("8f1c...") {
///     println!("{:?} {:?}", data.status, data.stats);
/// }
/// ```
#[derive(Clone)]
pub struct LiveManager {
    shared: Arc<Shared>,
}

impl LiveManager {
    pub fn new(provider: Arc<dyn TokenProvider>, connector: Arc<dyn Connector>) -> Self {
        Self::build(LiveConfig::default(), provider, connector)
    }

    pub fn with_config(
        config: LiveConfig,
        provider: Arc<dyn TokenProvider>,
        connector: Arc<dyn Connector>,
    ) -> LiveResult<Self> {
        config.validate()?;
        Ok(Self::build(config, provider, connector))
    }

    fn build(
        config: LiveConfig,
        provider: Arc<dyn TokenProvider>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                provider,
                connector,
                registry: ConnectionRegistry::default(),
                store: LiveDataStore::new(),
            }),
        }
    }

    pub fn config(&self) -> &LiveConfig {
        &self.shared.config
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Connect one server and wait for the agent's auth verdict.
    ///
    /// Returns `Ok(())` immediately if the server is already connecting or
    /// connected. A failed attempt is also recorded in the server's status
    /// and health, and schedules a bounded reconnect.
    pub async fn connect(&self, id: &str) -> LiveResult<()> {
        self.shared.connect(id).await
    }

    /// Connect several servers concurrently.
    pub async fn connect_many<I, S>(&self, ids: I) -> Vec<(String, LiveResult<()>)>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let attempts = ids.into_iter().map(|id| {
            let id = id.into();
            async move {
                let result = self.connect(&id).await;
                (id, result)
            }
        });
        join_all(attempts).await
    }

    /// Release everything held for a server. Never waits on network I/O;
    /// an in-flight `connect()` for it resolves with [`LiveError::Aborted`].
    pub fn disconnect(&self, id: &str) {
        if self.shared.registry.reset(id) {
            tracing::info!(server = %id, "disconnected");
        }
    }

    pub fn disconnect_all(&self) {
        for id in self.shared.registry.ids() {
            self.disconnect(&id);
        }
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn is_connected(&self, id: &str) -> bool {
        self.status(id) == ConnectionStatus::Connected
    }

    pub fn is_connecting(&self, id: &str) -> bool {
        self.status(id) == ConnectionStatus::Connecting
    }

    pub fn is_healthy(&self, id: &str) -> bool {
        self.shared
            .registry
            .inspect(id, |state| state.health == Health::Healthy)
            .unwrap_or(false)
    }

    pub fn status(&self, id: &str) -> ConnectionStatus {
        self.shared
            .registry
            .inspect(id, |state| state.status)
            .unwrap_or_default()
    }

    pub fn snapshot(&self, id: &str) -> Option<ConnectionSnapshot> {
        self.shared.registry.inspect(id, ConnectionState::snapshot)
    }

    /// Every server the manager has seen, sorted.
    pub fn entity_ids(&self) -> Vec<String> {
        self.shared.registry.ids()
    }

    pub fn live_data(&self, id: &str) -> Option<ServerLiveData> {
        self.shared.store.get(id)
    }

    pub fn server_status(&self, id: &str) -> Option<String> {
        self.shared.store.get(id).and_then(|data| data.status)
    }

    pub fn server_stats(&self, id: &str) -> Option<ServerStats> {
        self.shared.store.get(id).and_then(|data| data.stats)
    }

    /// Ask the agent for a stats frame right now.
    pub fn request_stats(&self, id: &str) -> Result<(), WsError> {
        let entry = self.shared.registry.find(id).ok_or(WsError::NotConnected)?;
        let state = lock(&entry);
        if state.status != ConnectionStatus::Connected {
            return Err(WsError::NotConnected);
        }
        request_stats(&state)
    }
}

impl std::fmt::Debug for LiveManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveManager")
            .field("config", &self.shared.config)
            .field("entities", &self.shared.registry.ids())
            .finish()
    }
}

// ─── Connect attempts ────────────────────────────────────────────────────────

impl Shared {
    pub(crate) fn downgrade(self: &Arc<Self>) -> Weak<Self> {
        Arc::downgrade(self)
    }

    pub(crate) async fn connect(self: &Arc<Self>, id: &str) -> LiveResult<()> {
        let entry = self.registry.get(id);
        let attempt = {
            let mut state = lock(&entry);
            match state.begin_attempt() {
                Some(attempt) => attempt,
                None => {
                    tracing::debug!(server = %id, status = %state.status, "connect ignored");
                    return Ok(());
                }
            }
        };
        tracing::info!(server = %id, attempt, "connecting");

        // The attempt runs detached so a dropped caller cannot strand the
        // entity in `Connecting`.
        let shared = Arc::clone(self);
        let owned = id.to_string();
        let task = tokio::spawn(async move { shared.run_attempt(&owned, attempt).await });
        match task.await {
            Ok(result) => result,
            Err(e) => Err(LiveError::Other(format!("connect task failed: {}", e))),
        }
    }

    async fn run_attempt(self: &Arc<Self>, id: &str, attempt: u64) -> LiveResult<()> {
        let result = self.establish(id, attempt).await;
        match &result {
            Ok(()) => tracing::info!(server = %id, "connected"),
            Err(err) => self.fail_attempt(id, attempt, err),
        }
        result
    }

    /// Fetch a token and open an authenticated channel for `attempt`.
    pub(crate) async fn establish(self: &Arc<Self>, id: &str, attempt: u64) -> LiveResult<()> {
        let token = match self.provider.fetch_token(id).await {
            Ok(token) => token,
            Err(e) => {
                tracing::error!(server = %id, error = %e, "channel token fetch failed");
                return Err(e.into());
            }
        };
        self.open_channel(id, attempt, token).await
    }

    async fn open_channel(
        self: &Arc<Self>,
        id: &str,
        attempt: u64,
        token: ChannelToken,
    ) -> LiveResult<()> {
        let entry = self.registry.get(id);
        let endpoint = token.endpoint.clone();
        let auth = MessageOut::auth(token.token.clone()).to_frame()?;
        {
            let mut state = lock(&entry);
            if !state.is_attempt(attempt) {
                return Err(LiveError::Aborted);
            }
            let expires_at = token.expires_at;
            state.token = Some(token);
            self.arm_token_refresh(&mut state, expires_at);
        }

        let opened = tokio::time::timeout(
            self.config.connect_timeout,
            self.connector.open(&endpoint),
        )
        .await;
        let Channel { outbound, inbound } = match opened {
            Ok(Ok(channel)) => channel,
            Ok(Err(e)) => {
                tracing::warn!(server = %id, endpoint = %endpoint, error = %e, "channel open failed");
                return Err(e.into());
            }
            Err(_) => {
                tracing::warn!(server = %id, endpoint = %endpoint, "channel open timed out");
                return Err(WsError::Timeout.into());
            }
        };

        let (waiter, verdict) = oneshot::channel();
        {
            let mut state = lock(&entry);
            if !state.is_attempt(attempt) {
                return Err(LiveError::Aborted);
            }
            let reader = tokio::spawn(read_channel(
                self.downgrade(),
                id.to_string(),
                attempt,
                inbound,
            ));
            let socket = Socket::new(outbound, reader);
            socket.send(auth)?;
            state.socket = Some(socket);
            state.pending_auth = Some(waiter);
            self.arm_auth_timeout(&mut state, attempt);
        }
        tracing::debug!(server = %id, attempt, "auth sent");

        verdict.await.unwrap_or(Err(LiveError::Aborted))
    }

    /// Record a failed attempt and hand it to the reconnect scheduler, unless
    /// the attempt was superseded or already resolved.
    fn fail_attempt(self: &Arc<Self>, id: &str, attempt: u64, err: &LiveError) {
        if matches!(err, LiveError::Aborted) {
            tracing::debug!(server = %id, attempt, "attempt aborted");
            return;
        }
        let Some(entry) = self.registry.find(id) else {
            return;
        };
        let mut state = lock(&entry);
        if state.attempt != attempt || state.status == ConnectionStatus::Connected {
            return;
        }
        tracing::warn!(server = %id, attempt, error = %err, "connect attempt failed");
        state.mark_failed();
        self.schedule_reconnect(&mut state);
    }
}
