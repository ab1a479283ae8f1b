//! Dispatch of inbound envelopes to the lobby and game stores.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::connection::{ConnectionManager, Subscription};
use crate::event::{EventSink, Phase, SessionEvent};
use crate::game::GameSyncStore;
use crate::lobby::LobbySyncStore;
use crate::protocol::{Envelope, ServerMessage};

/// Decodes each inbound envelope and applies it to the matching store.
///
/// Each envelope is handled to completion before the next one is looked at,
/// so store updates happen in arrival order.
#[derive(Debug)]
pub struct MessageRouter {
    lobby: Arc<LobbySyncStore>,
    game: Arc<GameSyncStore>,
    events: EventSink,
}

impl MessageRouter {
    pub(crate) fn new(
        lobby: Arc<LobbySyncStore>,
        game: Arc<GameSyncStore>,
        events: EventSink,
    ) -> Self {
        Self {
            lobby,
            game,
            events,
        }
    }

    /// Install this router as the connection's inbound handler.
    pub fn install(self: Arc<Self>, conn: &ConnectionManager) -> Subscription {
        conn.set_handler(move |envelope| self.route(envelope))
    }

    /// Apply one inbound envelope.
    ///
    /// Unknown tags are ignored; a known tag with a malformed payload is
    /// logged and dropped.
    pub fn route(&self, envelope: &Envelope) {
        let message = match ServerMessage::from_envelope(envelope) {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!(kind = %envelope.kind, "ignoring unknown message type");
                return;
            }
            Err(e) => {
                warn!(kind = %envelope.kind, "malformed payload: {e}");
                return;
            }
        };
        debug!(kind = message.kind(), "routing message");

        match message {
            ServerMessage::LobbyCreated(payload) => {
                self.lobby.handle_lobby_created(&payload.code);
            }
            ServerMessage::LobbyInfo(payload) => {
                // No way back into the lobby until the game is reset.
                if self.game.state().is_some() {
                    debug!("ignoring lobby_info during a game");
                } else {
                    self.lobby.apply_lobby_info(payload.state);
                }
            }
            ServerMessage::LobbyKicked(_) => self.lobby.handle_kicked(),
            ServerMessage::LobbyGameStarted(_) => {
                info!("game starting");
                self.events.emit(SessionEvent::GameStarting);
            }
            ServerMessage::GameInfo(payload) => {
                self.game.apply_snapshot(payload.into_snapshot());
                // The first snapshot ends the lobby phase.
                if let Some(code) = self.lobby.close_for_game() {
                    info!(code = %code, "entering game");
                    self.events.emit(SessionEvent::Navigate(Phase::Game { code }));
                }
            }
            ServerMessage::GameFinalScores(payload) => self.game.set_final_scores(payload.scores),
            ServerMessage::StatusCode(payload) => self.lobby.handle_status(payload),
        }
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
    use crate::lobby::PlayerName;
    use crate::transport::{Connector, Transport};
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::mpsc;

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

    fn router() -> (MessageRouter, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let events = EventSink::new(tx);
        let conn = ConnectionManager::new(Offline);
        let player = PlayerName::default();
        let lobby = Arc::new(LobbySyncStore::new(
            conn.clone(),
            "mock://server".into(),
            player.clone(),
            events.clone(),
        ));
        let game = Arc::new(GameSyncStore::new(conn, player, events.clone()));
        (MessageRouter::new(lobby, game, events), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    fn lobby_info(code: &str) -> Envelope {
        Envelope::new(
            "lobby_info",
            json!({"state": {"code": code, "host": "A", "members": [{"name": "A", "ready": true}]}}),
        )
    }

    #[test]
    fn first_game_info_moves_lobby_into_game() {
        let (router, mut rx) = router();
        router.route(&lobby_info("AB12"));
        drain(&mut rx);

        router.route(&Envelope::new("lobby_game_started", json!({})));
        router.route(&Envelope::new("game_info", json!({"state": {"score_a": 0}})));

        assert!(router.lobby.state().is_none());
        assert!(router.game.state().is_some());
        let events = drain(&mut rx);
        assert!(matches!(events[0], SessionEvent::GameStarting));
        assert!(matches!(events[1], SessionEvent::GameUpdated(_)));
        assert!(matches!(events[2], SessionEvent::LobbyClosed));
        assert!(matches!(
            &events[3],
            SessionEvent::Navigate(Phase::Game { code }) if code == "AB12"
        ));

        // Later snapshots only update the game.
        router.route(&Envelope::new("game_info", json!({"score_a": 1})));
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], SessionEvent::GameUpdated(_)));
    }

    #[test]
    fn lobby_info_during_a_game_is_ignored() {
        let (router, mut rx) = router();
        router.route(&lobby_info("AB12"));
        router.route(&Envelope::new("game_info", json!({"state": {"score_a": 1}})));
        drain(&mut rx);

        router.route(&lobby_info("AB12"));
        assert!(router.lobby.state().is_none());
        assert!(router.game.state().is_some());
        assert!(drain(&mut rx).is_empty());

        // Leaving the game makes the lobby reachable again.
        router.game.reset();
        router.route(&lobby_info("CD34"));
        assert_eq!(router.lobby.state().unwrap().code, "CD34");
        let events = drain(&mut rx);
        assert!(matches!(events[0], SessionEvent::LobbyUpdated(_)));
        assert!(matches!(
            &events[1],
            SessionEvent::Navigate(Phase::Lobby { code }) if code == "CD34"
        ));
    }

    #[test]
    fn malformed_nested_game_info_keeps_the_previous_snapshot() {
        let (router, mut rx) = router();
        router.route(&Envelope::new(
            "game_info",
            json!({"state": {"score_a": 1, "stage": "reveal"}}),
        ));
        drain(&mut rx);

        router.route(&Envelope::new("game_info", json!({"state": "garbled"})));
        let state = router.game.state().unwrap();
        assert_eq!(state.score_a, 1);
        assert_eq!(state.stage.as_str(), "reveal");
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn drifted_snapshot_fields_still_update_the_game() {
        let (router, mut rx) = router();
        router.route(&Envelope::new("game_info", json!({"state": {"score_a": 1}})));
        router.route(&Envelope::new(
            "game_info",
            json!({"state": {"score_a": 2.0, "stage": "reveal"}}),
        ));
        router.route(&Envelope::new(
            "game_info",
            json!({"state": {"score_a": 3, "player": {"hand": ["3", null]}}}),
        ));

        let scores: Vec<u32> = drain(&mut rx)
            .into_iter()
            .filter_map(|event| match event {
                SessionEvent::GameUpdated(state) => Some(state.score_a),
                _ => None,
            })
            .collect();
        assert_eq!(scores, vec![1, 2, 3]);
        assert_eq!(router.game.state().unwrap().player.hand, vec!["3".to_string()]);
    }

    #[test]
    fn game_info_scores_are_observed_in_push_order() {
        let (router, mut rx) = router();
        for score in 0..=6 {
            router.route(&Envelope::new("game_info", json!({"state": {"score_a": score}})));
        }
        let scores: Vec<u32> = drain(&mut rx)
            .into_iter()
            .filter_map(|event| match event {
                SessionEvent::GameUpdated(state) => Some(state.score_a),
                _ => None,
            })
            .collect();
        assert_eq!(scores, vec![0, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn final_scores_are_routed_to_game_store() {
        let (router, _rx) = router();
        router.route(&Envelope::new(
            "game_final_scores",
            json!({"scores": [{"name": "A", "won": true}, {"name": "B", "won": false}]}),
        ));
        let scores = router.game.final_scores().unwrap();
        assert_eq!(scores.len(), 2);
        assert!(scores[0].won);
    }

    #[test]
    fn status_code_is_routed_to_lobby_store() {
        let (router, _rx) = router();
        router.route(&Envelope::new(
            "status_code",
            json!({"code": 409, "message": "Name taken"}),
        ));
        assert_eq!(router.lobby.error().as_deref(), Some("Name taken"));
    }

    #[test]
    fn unknown_and_malformed_envelopes_change_nothing() {
        let (router, mut rx) = router();
        router.route(&Envelope::new("chat_message", json!({"text": "hi"})));
        router.route(&Envelope::new("lobby_info", json!({"state": {"code": 7}})));
        router.route(&Envelope::new("game_final_scores", json!({"scores": "none"})));

        assert!(router.lobby.state().is_none());
        assert!(router.game.final_scores().is_none());
        assert!(drain(&mut rx).is_empty());
    }
}
