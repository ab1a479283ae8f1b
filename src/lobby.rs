//! Lobby projection and lobby actions.
//!
//! [`LobbySyncStore`] holds the latest [`LobbyState`] pushed by the server
//! together with the user-visible error string. The lobby snapshot is only
//! ever replaced by `lobby_info`; the one local mutation is the optimistic
//! clear on [`leave_lobby`](LobbySyncStore::leave_lobby).

use std::sync::{Arc, Mutex};

use tracing::{debug, error, info, warn};

use crate::connection::{lock, ConnectionManager};
use crate::error::{ensure_present, Result, SyncError};
use crate::event::{EventSink, Phase, SessionEvent};
use crate::protocol::{ClientMessage, LobbyMember, LobbyState, StatusCodePayload};

/// Error shown after the host removed us from the lobby.
pub const KICKED_MESSAGE: &str = "You have been kicked from the lobby";

/// Error shown when the server reports a failure without a message.
pub const FALLBACK_ERROR_MESSAGE: &str = "An error occurred";

/// The local player's display name, shared by the lobby and game stores.
#[derive(Debug, Clone, Default)]
pub struct PlayerName(Arc<Mutex<String>>);

impl PlayerName {
    /// The last recorded name; empty until a lobby action records one.
    pub fn get(&self) -> String {
        lock(&self.0).clone()
    }

    pub(crate) fn set(&self, name: &str) {
        *lock(&self.0) = name.to_string();
    }
}

#[derive(Debug, Default)]
struct LobbySlot {
    lobby: Option<Arc<LobbyState>>,
    error: Option<String>,
}

/// Lobby projection plus the outbound lobby actions.
#[derive(Debug)]
pub struct LobbySyncStore {
    conn: ConnectionManager,
    endpoint: String,
    player: PlayerName,
    slot: Mutex<LobbySlot>,
    events: EventSink,
}

impl LobbySyncStore {
    pub(crate) fn new(
        conn: ConnectionManager,
        endpoint: String,
        player: PlayerName,
        events: EventSink,
    ) -> Self {
        Self {
            conn,
            endpoint,
            player,
            slot: Mutex::new(LobbySlot::default()),
            events,
        }
    }

    // ── State accessors ─────────────────────────────────────────────

    /// The current lobby snapshot, if in a lobby.
    pub fn state(&self) -> Option<Arc<LobbyState>> {
        lock(&self.slot).lobby.clone()
    }

    /// The current user-visible error, if any.
    pub fn error(&self) -> Option<String> {
        lock(&self.slot).error.clone()
    }

    /// The name recorded by the last create/join/rejoin.
    pub fn player_name(&self) -> String {
        self.player.get()
    }

    /// Returns `true` if the recorded player hosts the current lobby.
    pub fn is_host(&self) -> bool {
        let name = self.player.get();
        self.state().is_some_and(|lobby| lobby.host == name)
    }

    // ── Actions ─────────────────────────────────────────────────────

    /// Open a connection and create a lobby hosted by `name`.
    ///
    /// The `lobby_create` frame is sent once the connection opens; the
    /// server's `lobby_created` reply triggers an automatic `lobby_join`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidInput`] if `name` is blank.
    pub fn create_lobby(&self, name: &str) -> Result<()> {
        ensure_present("player name", name)?;
        info!(player = %name, "creating lobby");
        self.player.set(name);
        self.clear_error();

        let conn = self.conn.clone();
        let message = ClientMessage::LobbyCreate {
            host: name.to_string(),
        };
        self.conn.connect(
            &self.endpoint,
            Some(Box::new(move || {
                if let Err(e) = conn.send(&message) {
                    error!("failed to send lobby_create: {e}");
                }
            })),
        );
        Ok(())
    }

    /// Open a connection and join the lobby `code` as `name`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidInput`] if `code` or `name` is blank.
    pub fn join_lobby(&self, code: &str, name: &str) -> Result<()> {
        ensure_present("lobby code", code)?;
        ensure_present("player name", name)?;
        info!(code = %code, player = %name, "joining lobby");
        self.player.set(name);
        self.clear_error();

        let conn = self.conn.clone();
        let message = ClientMessage::LobbyJoin {
            code: code.to_string(),
            name: name.to_string(),
        };
        self.conn.connect(
            &self.endpoint,
            Some(Box::new(move || {
                if let Err(e) = conn.send(&message) {
                    error!("failed to send lobby_join: {e}");
                }
            })),
        );
        Ok(())
    }

    /// Restore lobby membership over the already-open connection, e.g. after
    /// the view was reloaded with `code` and `name` in its address.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotConnected`] without side effects if no
    /// connection is open, or [`SyncError::InvalidInput`] for blank input.
    pub fn rejoin_lobby(&self, code: &str, name: &str) -> Result<()> {
        ensure_present("lobby code", code)?;
        ensure_present("player name", name)?;
        if !self.conn.is_connected() {
            debug!(code = %code, "rejoin skipped: not connected");
            return Err(SyncError::NotConnected);
        }
        info!(code = %code, player = %name, "rejoining lobby");
        self.player.set(name);
        self.clear_error();
        self.conn.send(&ClientMessage::LobbyJoin {
            code: code.to_string(),
            name: name.to_string(),
        })
    }

    /// Flip the local player's readiness.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotInLobby`] without a lobby, or
    /// [`SyncError::NotConnected`] if the connection is closed.
    pub fn toggle_ready(&self) -> Result<()> {
        let lobby = self.require_lobby()?;
        let name = self.player.get();
        let ready = !lobby.member(&name).is_some_and(|m| m.ready);
        debug!(player = %name, ready, "toggling readiness");
        self.conn.send(&ClientMessage::LobbyMemberUpdate {
            code: lobby.code.clone(),
            member: LobbyMember { name, ready },
        })
    }

    /// Ask the server to remove `name` from the lobby.
    ///
    /// Only the host may kick; the server enforces this.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotInLobby`] without a lobby, or
    /// [`SyncError::NotConnected`] if the connection is closed.
    pub fn kick_player(&self, name: &str) -> Result<()> {
        let lobby = self.require_lobby()?;
        self.conn.send(&ClientMessage::LobbyKick {
            code: lobby.code.clone(),
            name: name.to_string(),
        })
    }

    /// Ask the server to start the game. The phase changes when the first
    /// game snapshot arrives.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotInLobby`] without a lobby, or
    /// [`SyncError::NotConnected`] if the connection is closed.
    pub fn start_game(&self) -> Result<()> {
        let lobby = self.require_lobby()?;
        info!(code = %lobby.code, "starting game");
        self.conn.send(&ClientMessage::LobbyStartGame {
            code: lobby.code.clone(),
        })
    }

    /// Leave the lobby. Local lobby state is cleared immediately, even if
    /// the `lobby_leave` frame could not be sent.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotInLobby`] without a lobby, or the send error.
    pub fn leave_lobby(&self) -> Result<()> {
        let lobby = self.require_lobby()?;
        let sent = self.conn.send(&ClientMessage::LobbyLeave {
            code: lobby.code.clone(),
        });
        if self.take_lobby().is_some() {
            self.events.emit(SessionEvent::LobbyClosed);
        }
        sent
    }

    // ── Inbound ─────────────────────────────────────────────────────

    /// `lobby_created`: complete host creation by joining the new lobby.
    pub(crate) fn handle_lobby_created(&self, code: &str) {
        let name = self.player.get();
        if name.is_empty() {
            error!(code = %code, "lobby created but no player name is set");
            return;
        }
        debug!(code = %code, player = %name, "joining freshly created lobby");
        if let Err(e) = self.conn.send(&ClientMessage::LobbyJoin {
            code: code.to_string(),
            name,
        }) {
            error!(code = %code, "failed to join created lobby: {e}");
        }
    }

    /// `lobby_info`: replace the snapshot unless it is unchanged.
    pub(crate) fn apply_lobby_info(&self, state: Option<LobbyState>) {
        let Some(state) = state else {
            debug!("lobby_info without state, ignoring");
            return;
        };

        let (snapshot, entered) = {
            let mut slot = lock(&self.slot);
            if slot.lobby.as_deref() == Some(&state) {
                debug!(code = %state.code, "lobby state unchanged");
                return;
            }
            let entered = slot
                .lobby
                .as_ref()
                .is_none_or(|previous| previous.code != state.code);
            let snapshot = Arc::new(state);
            slot.lobby = Some(Arc::clone(&snapshot));
            slot.error = None;
            (snapshot, entered)
        };

        debug!(
            code = %snapshot.code,
            members = snapshot.members.len(),
            "lobby state updated"
        );
        let code = snapshot.code.clone();
        self.events.emit(SessionEvent::LobbyUpdated(snapshot));
        if entered {
            self.events.emit(SessionEvent::Navigate(Phase::Lobby { code }));
        }
    }

    /// `lobby_kicked`: fatal for the session.
    pub(crate) fn handle_kicked(&self) {
        info!("kicked from the lobby");
        {
            let mut slot = lock(&self.slot);
            slot.error = Some(KICKED_MESSAGE.to_string());
            slot.lobby = None;
        }
        self.conn.disconnect();
        self.events.emit(SessionEvent::Kicked {
            message: KICKED_MESSAGE.to_string(),
        });
        self.events.emit(SessionEvent::Navigate(Phase::Home));
    }

    /// `status_code`: surface the error; a fatal code ends the session.
    pub(crate) fn handle_status(&self, payload: StatusCodePayload) {
        let message = payload
            .message
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| {
                payload
                    .code
                    .map_or(FALLBACK_ERROR_MESSAGE, |code| code.description())
                    .to_string()
            });
        warn!(code = ?payload.code, message = %message, "server reported an error");
        lock(&self.slot).error = Some(message.clone());
        self.events.emit(SessionEvent::Error {
            message,
            code: payload.code,
        });

        if payload.code.is_some_and(|code| code.is_session_fatal()) {
            self.conn.disconnect();
            if self.take_lobby().is_some() {
                self.events.emit(SessionEvent::LobbyClosed);
            }
        }
    }

    /// The lobby hands over to the game: drop lobby state and return the
    /// code it was identified by, if a lobby was active.
    pub(crate) fn close_for_game(&self) -> Option<String> {
        let lobby = self.take_lobby()?;
        self.events.emit(SessionEvent::LobbyClosed);
        Some(lobby.code.clone())
    }

    /// Drop lobby state and error without touching the connection.
    pub(crate) fn reset(&self) {
        let mut slot = lock(&self.slot);
        slot.lobby = None;
        slot.error = None;
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn require_lobby(&self) -> Result<Arc<LobbyState>> {
        self.state().ok_or(SyncError::NotInLobby)
    }

    fn take_lobby(&self) -> Option<Arc<LobbyState>> {
        lock(&self.slot).lobby.take()
    }

    fn clear_error(&self) {
        lock(&self.slot).error = None;
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
    use crate::status::StatusCode;
    use crate::transport::{Connector, Transport};
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    /// Connector whose connection attempts always fail.
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

    fn store() -> (LobbySyncStore, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(32);
        let store = LobbySyncStore::new(
            ConnectionManager::new(Offline),
            "mock://server".into(),
            PlayerName::default(),
            EventSink::new(tx),
        );
        (store, rx)
    }

    fn lobby(members: &[(&str, bool)]) -> LobbyState {
        LobbyState {
            code: "AB12".into(),
            host: "Alice".into(),
            members: members
                .iter()
                .map(|(name, ready)| LobbyMember {
                    name: (*name).into(),
                    ready: *ready,
                })
                .collect(),
        }
    }

    #[test]
    fn first_lobby_info_enters_the_lobby() {
        let (store, mut events) = store();
        store.apply_lobby_info(Some(lobby(&[("Alice", false)])));

        assert_eq!(store.state().unwrap().code, "AB12");
        assert!(matches!(
            events.try_recv().unwrap(),
            SessionEvent::LobbyUpdated(state) if state.members.len() == 1
        ));
        assert!(matches!(
            events.try_recv().unwrap(),
            SessionEvent::Navigate(Phase::Lobby { code }) if code == "AB12"
        ));
    }

    #[test]
    fn repeated_lobby_info_is_deduplicated() {
        let (store, mut events) = store();
        store.apply_lobby_info(Some(lobby(&[("Alice", false)])));
        let first = store.state().unwrap();
        while events.try_recv().is_ok() {}

        lock(&store.slot).error = Some("stale".into());
        store.apply_lobby_info(Some(lobby(&[("Alice", false)])));

        assert!(Arc::ptr_eq(&first, &store.state().unwrap()));
        assert_eq!(store.error().as_deref(), Some("stale"));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn changed_lobby_info_replaces_snapshot_and_clears_error() {
        let (store, mut events) = store();
        store.apply_lobby_info(Some(lobby(&[("Alice", false)])));
        while events.try_recv().is_ok() {}

        lock(&store.slot).error = Some("old".into());
        store.apply_lobby_info(Some(lobby(&[("Alice", false), ("Bob", true)])));

        assert_eq!(store.state().unwrap().members.len(), 2);
        assert!(store.error().is_none());
        assert!(matches!(events.try_recv().unwrap(), SessionEvent::LobbyUpdated(_)));
        assert!(events.try_recv().is_err(), "same lobby code does not navigate");
    }

    #[test]
    fn lobby_info_without_state_is_ignored() {
        let (store, mut events) = store();
        store.apply_lobby_info(None);
        assert!(store.state().is_none());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn kick_clears_lobby_sets_error_and_navigates_home() {
        let (store, mut events) = store();
        store.apply_lobby_info(Some(lobby(&[("Alice", false)])));
        while events.try_recv().is_ok() {}

        store.handle_kicked();

        assert!(store.state().is_none());
        assert_eq!(store.error().as_deref(), Some(KICKED_MESSAGE));
        assert!(!store.conn.is_connected());
        assert!(matches!(events.try_recv().unwrap(), SessionEvent::Kicked { .. }));
        assert!(matches!(
            events.try_recv().unwrap(),
            SessionEvent::Navigate(Phase::Home)
        ));
    }

    #[test]
    fn not_found_status_is_fatal() {
        let (store, mut events) = store();
        store.apply_lobby_info(Some(lobby(&[("Alice", false)])));
        while events.try_recv().is_ok() {}

        store.handle_status(StatusCodePayload {
            code: Some(StatusCode::NOT_FOUND),
            message: Some("Lobby not found".into()),
        });

        assert!(store.state().is_none());
        assert_eq!(store.error().as_deref(), Some("Lobby not found"));
        assert!(matches!(
            events.try_recv().unwrap(),
            SessionEvent::Error { code: Some(StatusCode::NOT_FOUND), .. }
        ));
        assert!(matches!(events.try_recv().unwrap(), SessionEvent::LobbyClosed));
    }

    #[test]
    fn non_fatal_status_keeps_lobby() {
        let (store, _events) = store();
        store.apply_lobby_info(Some(lobby(&[("Alice", false)])));

        store.handle_status(StatusCodePayload {
            code: Some(StatusCode::CONFLICT),
            message: None,
        });

        assert!(store.state().is_some());
        assert_eq!(
            store.error().as_deref(),
            Some(StatusCode::CONFLICT.description())
        );
    }

    #[test]
    fn status_without_code_or_message_uses_fallback() {
        let (store, _events) = store();
        store.handle_status(StatusCodePayload {
            code: None,
            message: Some(String::new()),
        });
        assert_eq!(store.error().as_deref(), Some(FALLBACK_ERROR_MESSAGE));
    }

    #[test]
    fn lobby_actions_require_a_lobby() {
        let (store, _events) = store();
        assert!(matches!(store.toggle_ready(), Err(SyncError::NotInLobby)));
        assert!(matches!(store.kick_player("Bob"), Err(SyncError::NotInLobby)));
        assert!(matches!(store.start_game(), Err(SyncError::NotInLobby)));
        assert!(matches!(store.leave_lobby(), Err(SyncError::NotInLobby)));
    }

    #[test]
    fn leave_clears_lobby_even_when_send_fails() {
        let (store, mut events) = store();
        store.apply_lobby_info(Some(lobby(&[("Alice", false)])));
        while events.try_recv().is_ok() {}

        let result = store.leave_lobby();

        assert!(matches!(result, Err(SyncError::NotConnected)));
        assert!(store.state().is_none());
        assert!(matches!(events.try_recv().unwrap(), SessionEvent::LobbyClosed));
    }

    #[test]
    fn blank_input_is_rejected_before_any_network_call() {
        let (store, _events) = store();
        assert!(matches!(
            store.create_lobby("   "),
            Err(SyncError::InvalidInput(_))
        ));
        assert!(matches!(
            store.join_lobby("", "Bob"),
            Err(SyncError::InvalidInput(_))
        ));
        assert!(store.player_name().is_empty());
        assert!(store.conn.endpoint().is_none());
    }

    #[test]
    fn rejoin_requires_open_connection() {
        let (store, _events) = store();
        assert!(matches!(
            store.rejoin_lobby("AB12", "Bob"),
            Err(SyncError::NotConnected)
        ));
        assert!(store.player_name().is_empty());
    }

    #[test]
    fn close_for_game_hands_over_the_code_once() {
        let (store, _events) = store();
        store.apply_lobby_info(Some(lobby(&[("Alice", true)])));
        assert_eq!(store.close_for_game().as_deref(), Some("AB12"));
        assert!(store.close_for_game().is_none());
        assert!(store.state().is_none());
    }

    #[test]
    fn is_host_compares_recorded_name() {
        let (store, _events) = store();
        store.player.set("Alice");
        assert!(!store.is_host());
        store.apply_lobby_info(Some(lobby(&[("Alice", false)])));
        assert!(store.is_host());
        store.player.set("Bob");
        assert!(!store.is_host());
    }
}
