//! Client facade wiring the connection, router and stores together.
//!
//! [`PartyClient`] owns one [`ConnectionManager`], the two projections and
//! the [`MessageRouter`] installed as the connection's handler. Session
//! events are delivered on a bounded channel
//! ([`tokio::sync::mpsc::Receiver<SessionEvent>`]) returned from
//! [`PartyClient::new`].
//!
//! # Example
//!
//! ```rust,ignore
//! let (client, mut events) = PartyClient::websocket(SyncConfig::from_env());
//! client.lobby().create_lobby("Alice")?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         SessionEvent::Navigate(Phase::Lobby { code }) => println!("in lobby {code}"),
//!         SessionEvent::Navigate(Phase::Home) => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::connection::{ConnectionManager, Subscription, DEFAULT_SHUTDOWN_TIMEOUT};
use crate::event::{EventSink, Phase, SessionEvent};
use crate::game::GameSyncStore;
use crate::lobby::{LobbySyncStore, PlayerName};
use crate::router::MessageRouter;
use crate::transport::Connector;

/// Endpoint used when none is configured.
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:1337/ws";

/// Environment variable read by [`SyncConfig::from_env`].
pub const ENDPOINT_ENV_VAR: &str = "PARTY_SYNC_URL";

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`PartyClient`].
///
/// # Example
///
/// ```
/// use party_sync_client::client::SyncConfig;
/// use std::time::Duration;
///
/// let config = SyncConfig::new("ws://games.example.com:1337/ws")
///     .with_event_channel_capacity(64)
///     .with_connect_timeout(Duration::from_secs(5));
/// assert_eq!(config.endpoint, "ws://games.example.com:1337/ws");
/// assert_eq!(config.event_channel_capacity, 64);
/// ```
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Server endpoint, e.g. `ws://localhost:1337/ws`.
    pub endpoint: String,
    /// Capacity of the bounded event channel.
    ///
    /// When the consumer falls behind, events are dropped with a warning so
    /// that inbound dispatch never blocks.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Time [`PartyClient::shutdown`] waits for the transport to close
    /// before aborting it. Defaults to **1 second**.
    pub shutdown_timeout: Duration,
    /// Deadline for the connection handshake. `None` waits indefinitely.
    pub connect_timeout: Option<Duration>,
}

impl SyncConfig {
    /// Create a configuration for `endpoint` with default values.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            connect_timeout: None,
        }
    }

    /// Defaults, with the endpoint taken from `PARTY_SYNC_URL` when set.
    pub fn from_env() -> Self {
        match std::env::var(ENDPOINT_ENV_VAR) {
            Ok(url) if !url.trim().is_empty() => Self::new(url.trim()),
            _ => Self::default(),
        }
    }

    /// Set the capacity of the bounded event channel. Clamped to at least 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the graceful shutdown timeout.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Fail connection attempts that take longer than `timeout`.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT)
    }
}

// ── PartyClient ─────────────────────────────────────────────────────

/// Handle to one party-game session.
///
/// Dropping the client removes its handler and closes the connection.
pub struct PartyClient {
    conn: ConnectionManager,
    lobby: Arc<LobbySyncStore>,
    game: Arc<GameSyncStore>,
    events: EventSink,
    subscription: Option<Subscription>,
}

impl PartyClient {
    /// Build a client that opens connections through `connector`.
    ///
    /// No connection is opened until a lobby action asks for one.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn new(
        config: SyncConfig,
        connector: impl Connector,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        // tokio panics on a zero capacity.
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(capacity);
        let events = EventSink::new(event_tx);

        let conn = ConnectionManager::with_shutdown_timeout(connector, config.shutdown_timeout);
        let player = PlayerName::default();
        let lobby = Arc::new(LobbySyncStore::new(
            conn.clone(),
            config.endpoint.clone(),
            player.clone(),
            events.clone(),
        ));
        let game = Arc::new(GameSyncStore::new(conn.clone(), player, events.clone()));
        let router = Arc::new(MessageRouter::new(
            Arc::clone(&lobby),
            Arc::clone(&game),
            events.clone(),
        ));
        let subscription = router.install(&conn);
        debug!(endpoint = %config.endpoint, "party client ready");

        let client = Self {
            conn,
            lobby,
            game,
            events,
            subscription: Some(subscription),
        };
        (client, event_rx)
    }

    /// Build a client that talks WebSocket to `config.endpoint`.
    #[cfg(feature = "transport-websocket")]
    #[must_use = "the event receiver must be used to receive events"]
    pub fn websocket(config: SyncConfig) -> (Self, mpsc::Receiver<SessionEvent>) {
        let mut connector = crate::transports::WebSocketConnector::new();
        if let Some(timeout) = config.connect_timeout {
            connector = connector.with_connect_timeout(timeout);
        }
        Self::new(config, connector)
    }

    /// Lobby projection and actions.
    pub fn lobby(&self) -> &LobbySyncStore {
        &self.lobby
    }

    /// Game projection and actions.
    pub fn game(&self) -> &GameSyncStore {
        &self.game
    }

    /// The underlying connection.
    pub fn connection(&self) -> &ConnectionManager {
        &self.conn
    }

    /// Returns `true` while the connection is open.
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// Leave the session: disconnect, drop lobby, game and final scores,
    /// then tell the coordinator to show the home view.
    pub fn return_home(&self) {
        info!("returning home");
        self.conn.disconnect();
        self.lobby.reset();
        self.game.reset();
        self.events.emit(SessionEvent::Navigate(Phase::Home));
    }

    /// Close the connection and wait for the transport to shut down.
    ///
    /// The client stays usable; a later lobby action reconnects.
    pub async fn shutdown(&self) {
        self.conn.shutdown().await;
    }
}

impl std::fmt::Debug for PartyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartyClient")
            .field("connection", &self.conn)
            .field("in_lobby", &self.lobby.state().is_some())
            .field("in_game", &self.game.state().is_some())
            .finish()
    }
}

impl Drop for PartyClient {
    fn drop(&mut self) {
        // The installed handler keeps the stores, and through them the
        // connection, alive; removing it releases the whole graph.
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        self.conn.disconnect();
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::protocol::{LobbyMember, LobbyState, ScoreboardEntry, ServerGameSnapshot};
    use crate::transport::Transport;
    use async_trait::async_trait;

    struct Offline;

    #[async_trait]
    impl Connector for Offline {
        async fn connect(
            &self,
            _endpoint: &str,
        ) -> std::result::Result<Box<dyn Transport>, SyncError> {
            Err(SyncError::TransportClosed)
        }
    }

    #[test]
    fn config_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert!(config.connect_timeout.is_none());
    }

    #[test]
    fn config_builder_methods() {
        let config = SyncConfig::new("ws://example.test/ws")
            .with_event_channel_capacity(0)
            .with_shutdown_timeout(Duration::from_millis(250))
            .with_connect_timeout(Duration::from_secs(3));
        assert_eq!(config.event_channel_capacity, 1);
        assert_eq!(config.shutdown_timeout, Duration::from_millis(250));
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(3)));
    }

    #[test]
    fn from_env_reads_endpoint() {
        std::env::set_var(ENDPOINT_ENV_VAR, " ws://env.test:1337/ws ");
        let config = SyncConfig::from_env();
        std::env::remove_var(ENDPOINT_ENV_VAR);
        assert_eq!(config.endpoint, "ws://env.test:1337/ws");
    }

    #[tokio::test]
    async fn zero_capacity_set_directly_does_not_panic() {
        let config = SyncConfig {
            event_channel_capacity: 0,
            ..SyncConfig::default()
        };
        let (client, _events) = PartyClient::new(config, Offline);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn return_home_clears_everything() {
        let (client, mut events) = PartyClient::new(SyncConfig::default(), Offline);
        client.lobby.apply_lobby_info(Some(LobbyState {
            code: "AB12".into(),
            host: "A".into(),
            members: vec![LobbyMember {
                name: "A".into(),
                ready: false,
            }],
        }));
        client.game.apply_snapshot(ServerGameSnapshot::default());
        client.game.set_final_scores(vec![ScoreboardEntry {
            name: "A".into(),
            won: true,
        }]);
        while events.try_recv().is_ok() {}

        client.return_home();

        assert!(client.lobby().state().is_none());
        assert!(client.game().state().is_none());
        assert!(client.game().final_scores().is_none());
        assert!(matches!(
            events.try_recv().unwrap(),
            SessionEvent::Navigate(Phase::Home)
        ));
    }

    #[tokio::test]
    async fn drop_releases_the_event_channel() {
        let (client, mut events) = PartyClient::new(SyncConfig::default(), Offline);
        drop(client);
        // Every sender lived in the client graph.
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn debug_impl_for_client() {
        let (client, _events) = PartyClient::new(SyncConfig::default(), Offline);
        let debug = format!("{client:?}");
        assert!(debug.contains("PartyClient"));
        assert!(debug.contains("in_lobby"));
    }
}
