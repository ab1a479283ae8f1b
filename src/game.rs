//! Game projection and in-game actions.
//!
//! The server pushes complete snapshots in its own naming (`is_active`,
//! `is_deciding`, `score_a`, ...). [`GameState::from`] is the one place that
//! translates them into the view model, defaulting every absent field so a
//! consumer never has to deal with missing data.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Serialize, Serializer};
use tracing::{debug, info};

use crate::connection::{lock, ConnectionManager};
use crate::error::{ensure_present, Result, SyncError};
use crate::event::{EventSink, SessionEvent};
use crate::lobby::PlayerName;
use crate::protocol::{
    CardPlacementPayload, ClientMessage, PlacedCard, ScoreboardEntry, ServerCardPlacement,
    ServerGameSnapshot, ServerPlacedCard, ServerPlayer, ServerSelf,
};

// ── View model ──────────────────────────────────────────────────────

/// Public data about one player.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSummary {
    pub name: String,
    pub is_active: bool,
    pub is_decisive: bool,
}

/// The local player's side in the current round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Danny,
    #[default]
    Personality,
}

/// The local player's own record, including private data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnPlayer {
    pub name: String,
    pub is_active: bool,
    pub is_decisive: bool,
    pub role: Role,
    pub hand: Vec<String>,
}

/// Round stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Stage {
    #[default]
    Selection,
    Arrangement,
    Discussion,
    Decision,
    Reveal,
    CardPlacement,
    VotingWord,
    /// A stage this client does not know yet, kept verbatim.
    Other(String),
}

impl Stage {
    /// Parse the wire name of a stage. Unknown names are preserved.
    pub fn parse(name: &str) -> Self {
        match name {
            "selection" => Self::Selection,
            "arrangement" => Self::Arrangement,
            "discussion" => Self::Discussion,
            "decision" => Self::Decision,
            "reveal" => Self::Reveal,
            "card_placement" => Self::CardPlacement,
            "voting_word" => Self::VotingWord,
            other => Self::Other(other.to_string()),
        }
    }

    /// The wire name of this stage.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Selection => "selection",
            Self::Arrangement => "arrangement",
            Self::Discussion => "discussion",
            Self::Decision => "decision",
            Self::Reveal => "reveal",
            Self::CardPlacement => "card_placement",
            Self::VotingWord => "voting_word",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Stage {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A card laid out on the board, with the image it renders as.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ArrangedCard {
    pub id: String,
    pub position_x: f64,
    pub position_y: f64,
    pub rotation: f64,
    pub flipped: bool,
    pub image: String,
}

/// Cards chosen by the active player and their arrangement.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardPlacement {
    pub selected_cards: Vec<String>,
    pub arranged_cards: Vec<ArrangedCard>,
}

/// The game view model. Replaced wholesale on every snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub players: Vec<PlayerSummary>,
    pub player: OwnPlayer,
    pub stage: Stage,
    pub card_placement: CardPlacement,
    pub word_options: Vec<String>,
    pub word: String,
    /// Points won by the alternate personalities.
    pub score_a: u32,
    /// Points won by Danny.
    pub score_d: u32,
}

impl GameState {
    /// One-based number of the round in progress.
    pub fn round(&self) -> u32 {
        self.score_a.saturating_add(self.score_d).saturating_add(1)
    }

    /// The player whose turn it is, if the snapshot names one.
    pub fn active_player(&self) -> Option<&PlayerSummary> {
        self.players.iter().find(|p| p.is_active)
    }

    /// The player who makes the decision this round, if any.
    pub fn decisive_player(&self) -> Option<&PlayerSummary> {
        self.players.iter().find(|p| p.is_decisive)
    }
}

/// Image path rendered for a card id.
pub fn card_image_path(id: &str) -> String {
    format!("/cards/{id}.png")
}

// ── Snapshot translation ────────────────────────────────────────────

impl From<ServerPlayer> for PlayerSummary {
    fn from(p: ServerPlayer) -> Self {
        Self {
            name: p.name.unwrap_or_default(),
            is_active: p.is_active.unwrap_or(false),
            is_decisive: p.is_deciding.unwrap_or(false),
        }
    }
}

impl From<ServerSelf> for OwnPlayer {
    fn from(p: ServerSelf) -> Self {
        Self {
            name: p.name.unwrap_or_default(),
            is_active: p.is_active.unwrap_or(false),
            is_decisive: p.is_deciding.unwrap_or(false),
            role: if p.is_danny.unwrap_or(false) {
                Role::Danny
            } else {
                Role::Personality
            },
            hand: p
                .hand
                .unwrap_or_default()
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

impl From<ServerPlacedCard> for ArrangedCard {
    fn from(card: ServerPlacedCard) -> Self {
        let id = card.id.map(|id| id.to_string()).unwrap_or_default();
        Self {
            image: card_image_path(&id),
            id,
            position_x: card.position_x.unwrap_or(0.0),
            position_y: card.position_y.unwrap_or(0.0),
            rotation: card.rotation.unwrap_or(0.0),
            flipped: card.flipped.unwrap_or(false),
        }
    }
}

impl From<ServerCardPlacement> for CardPlacement {
    fn from(placement: ServerCardPlacement) -> Self {
        let arranged_cards: Vec<ArrangedCard> = placement
            .cards
            .unwrap_or_default()
            .into_iter()
            .map(ArrangedCard::from)
            .collect();
        Self {
            selected_cards: arranged_cards.iter().map(|c| c.id.clone()).collect(),
            arranged_cards,
        }
    }
}

impl From<ServerGameSnapshot> for GameState {
    fn from(s: ServerGameSnapshot) -> Self {
        Self {
            players: s
                .players
                .unwrap_or_default()
                .into_iter()
                .map(PlayerSummary::from)
                .collect(),
            player: s.player.map(OwnPlayer::from).unwrap_or_default(),
            stage: s.stage.as_deref().map(Stage::parse).unwrap_or_default(),
            card_placement: s.card_placement.map(CardPlacement::from).unwrap_or_default(),
            word_options: s.word_options.unwrap_or_default(),
            word: s.word.unwrap_or_default(),
            score_a: s.score_a.unwrap_or(0),
            score_d: s.score_d.unwrap_or(0),
        }
    }
}

// ── Card placement input ────────────────────────────────────────────

/// A card position as the board reports it, before submission.
#[derive(Debug, Clone, PartialEq)]
pub struct CardPosition {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub rotation: f64,
    pub flipped: bool,
}

/// Round half up to an integer; NaN and infinities become 0.
fn round_coordinate(value: f64) -> i64 {
    if !value.is_finite() {
        return 0;
    }
    // `as` saturates for values outside the i64 range.
    (value + 0.5).floor() as i64
}

impl CardPosition {
    fn to_wire(&self) -> Result<PlacedCard> {
        let id = self.id.trim().parse::<u32>().map_err(|_| {
            SyncError::InvalidInput(format!("card id {:?} is not a number", self.id))
        })?;
        Ok(PlacedCard {
            id,
            position_x: round_coordinate(self.x),
            position_y: round_coordinate(self.y),
            rotation: round_coordinate(self.rotation),
            flipped: self.flipped,
        })
    }
}

impl From<&ArrangedCard> for CardPosition {
    fn from(card: &ArrangedCard) -> Self {
        Self {
            id: card.id.clone(),
            x: card.position_x,
            y: card.position_y,
            rotation: card.rotation,
            flipped: card.flipped,
        }
    }
}

// ── Store ───────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct GameSlot {
    game: Option<Arc<GameState>>,
    final_scores: Option<Vec<ScoreboardEntry>>,
}

/// Game projection plus the outbound game actions.
///
/// Actions never touch local state; their effect shows up with the next
/// `game_info` push.
#[derive(Debug)]
pub struct GameSyncStore {
    conn: ConnectionManager,
    player: PlayerName,
    slot: Mutex<GameSlot>,
    events: EventSink,
}

impl GameSyncStore {
    pub(crate) fn new(conn: ConnectionManager, player: PlayerName, events: EventSink) -> Self {
        Self {
            conn,
            player,
            slot: Mutex::new(GameSlot::default()),
            events,
        }
    }

    /// The latest game snapshot, if a game is in progress.
    pub fn state(&self) -> Option<Arc<GameState>> {
        lock(&self.slot).game.clone()
    }

    /// Final scores, once the game has ended.
    pub fn final_scores(&self) -> Option<Vec<ScoreboardEntry>> {
        lock(&self.slot).final_scores.clone()
    }

    /// End the active player's turn.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotConnected`] if the connection is closed.
    pub fn end_turn(&self, code: &str) -> Result<()> {
        self.send_message(&ClientMessage::GameEndTurn {
            code: code.to_string(),
        })
    }

    /// Report whether the decisive player's guess was correct.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotConnected`] if the connection is closed.
    pub fn make_decision(&self, code: &str, correct: bool) -> Result<()> {
        self.send_message(&ClientMessage::GameMakeDecision {
            code: code.to_string(),
            correct,
        })
    }

    /// Advance to the next round.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotConnected`] if the connection is closed.
    pub fn next_round(&self, code: &str) -> Result<()> {
        self.send_message(&ClientMessage::GameNextRound {
            code: code.to_string(),
        })
    }

    /// Vote for `word` as the local player.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidInput`] if `word` is blank or no player
    /// name has been recorded, or [`SyncError::NotConnected`].
    pub fn vote_word(&self, code: &str, word: &str) -> Result<()> {
        ensure_present("word", word)?;
        let name = self.player_name()?;
        self.send_message(&ClientMessage::GameVoteWord {
            code: code.to_string(),
            name,
            word: word.to_string(),
        })
    }

    /// Submit the local player's card arrangement.
    ///
    /// Ids are sent as integers and coordinates are rounded half up.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidInput`] for a non-numeric card id or when
    /// no player name has been recorded, or [`SyncError::NotConnected`].
    pub fn submit_card_placement(&self, code: &str, cards: &[CardPosition]) -> Result<()> {
        let name = self.player_name()?;
        let cards = cards
            .iter()
            .map(CardPosition::to_wire)
            .collect::<Result<Vec<_>>>()?;
        self.send_message(&ClientMessage::GameCardPlacement {
            code: code.to_string(),
            name,
            placement: CardPlacementPayload { cards },
        })
    }

    /// Send any client message. Used for stage-specific actions that have
    /// no dedicated method.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotConnected`] if the connection is closed.
    pub fn send_message(&self, message: &ClientMessage) -> Result<()> {
        debug!(kind = message.kind(), "sending game action");
        self.conn.send(message)
    }

    // ── Inbound ─────────────────────────────────────────────────────

    /// `game_info`: translate and replace the snapshot.
    pub(crate) fn apply_snapshot(&self, snapshot: ServerGameSnapshot) -> Arc<GameState> {
        let state = Arc::new(GameState::from(snapshot));
        lock(&self.slot).game = Some(Arc::clone(&state));
        debug!(
            stage = %state.stage,
            score_a = state.score_a,
            score_d = state.score_d,
            "game state updated"
        );
        self.events.emit(SessionEvent::GameUpdated(Arc::clone(&state)));
        state
    }

    /// `game_final_scores`: record the scoreboard.
    pub(crate) fn set_final_scores(&self, scores: Vec<ScoreboardEntry>) {
        info!(entries = scores.len(), "game finished");
        lock(&self.slot).final_scores = Some(scores.clone());
        self.events.emit(SessionEvent::FinalScores(scores));
    }

    /// Drop game state and final scores.
    pub(crate) fn reset(&self) {
        let mut slot = lock(&self.slot);
        slot.game = None;
        slot.final_scores = None;
    }

    fn player_name(&self) -> Result<String> {
        let name = self.player.get();
        ensure_present("player name", &name)?;
        Ok(name)
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
    use crate::protocol::WireCardId;
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

    fn store() -> (GameSyncStore, PlayerName, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(32);
        let player = PlayerName::default();
        let store = GameSyncStore::new(
            ConnectionManager::new(Offline),
            player.clone(),
            EventSink::new(tx),
        );
        (store, player, rx)
    }

    fn snapshot(value: serde_json::Value) -> ServerGameSnapshot {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn translates_server_snapshot_into_view_model() {
        let state = GameState::from(snapshot(json!({
            "players": [{"name": "A", "is_active": true, "is_deciding": false}],
            "player": {
                "name": "A",
                "is_active": true,
                "is_deciding": false,
                "is_danny": false,
                "hand": ["3", "7"]
            },
            "stage": "selection",
            "score_a": 2,
            "score_d": 1
        })));

        let view = serde_json::to_value(&state).unwrap();
        assert_eq!(
            view["players"],
            json!([{"name": "A", "isActive": true, "isDecisive": false}])
        );
        assert_eq!(
            view["player"],
            json!({
                "name": "A",
                "isActive": true,
                "isDecisive": false,
                "role": "personality",
                "hand": ["3", "7"]
            })
        );
        assert_eq!(view["stage"], "selection");
        assert_eq!(view["scoreA"], 2);
        assert_eq!(view["scoreD"], 1);
        assert_eq!(view["wordOptions"], json!([]));
        assert_eq!(view["word"], "");
    }

    #[test]
    fn empty_snapshot_defaults_every_field() {
        let state = GameState::from(ServerGameSnapshot::default());
        assert_eq!(state, GameState::default());
        assert_eq!(state.stage, Stage::Selection);
        assert_eq!(state.player.role, Role::Personality);
        assert_eq!(state.round(), 1);
    }

    #[test]
    fn danny_role_and_numeric_hand() {
        let state = GameState::from(ServerGameSnapshot {
            player: Some(ServerSelf {
                is_danny: Some(true),
                hand: Some(vec![WireCardId::Number(12), WireCardId::Text("4".into())]),
                ..ServerSelf::default()
            }),
            ..ServerGameSnapshot::default()
        });
        assert_eq!(state.player.role, Role::Danny);
        assert_eq!(state.player.hand, vec!["12", "4"]);
    }

    #[test]
    fn card_placement_derives_selection_and_images() {
        let state = GameState::from(snapshot(json!({
            "stage": "card_placement",
            "card_placement": {"cards": [
                {"id": 5, "position_x": 10.5, "position_y": 3.0, "rotation": 90.0, "flipped": true},
                {"id": "9"}
            ]}
        })));

        assert_eq!(state.stage, Stage::CardPlacement);
        assert_eq!(state.card_placement.selected_cards, vec!["5", "9"]);
        let first = &state.card_placement.arranged_cards[0];
        assert_eq!(first.image, "/cards/5.png");
        assert!(first.flipped);
        let second = &state.card_placement.arranged_cards[1];
        assert_eq!(second.position_x, 0.0);
        assert!(!second.flipped);
    }

    #[test]
    fn unknown_stage_is_preserved() {
        let stage = Stage::parse("tiebreak");
        assert_eq!(stage, Stage::Other("tiebreak".into()));
        assert_eq!(serde_json::to_value(&stage).unwrap(), "tiebreak");
        for known in ["arrangement", "discussion", "decision", "reveal", "voting_word"] {
            assert_eq!(Stage::parse(known).as_str(), known);
        }
    }

    #[test]
    fn round_and_role_lookups() {
        let state = GameState {
            players: vec![
                PlayerSummary {
                    name: "A".into(),
                    is_active: true,
                    is_decisive: false,
                },
                PlayerSummary {
                    name: "B".into(),
                    is_active: false,
                    is_decisive: true,
                },
            ],
            score_a: 3,
            score_d: 2,
            ..GameState::default()
        };
        assert_eq!(state.round(), 6);
        assert_eq!(state.active_player().unwrap().name, "A");
        assert_eq!(state.decisive_player().unwrap().name, "B");
    }

    #[test]
    fn coordinates_round_half_up() {
        assert_eq!(round_coordinate(1.5), 2);
        assert_eq!(round_coordinate(1.49), 1);
        assert_eq!(round_coordinate(-1.5), -1);
        assert_eq!(round_coordinate(-1.51), -2);
        assert_eq!(round_coordinate(f64::NAN), 0);
        assert_eq!(round_coordinate(f64::INFINITY), 0);
    }

    #[test]
    fn card_position_to_wire() {
        let card = CardPosition {
            id: "17".into(),
            x: 12.6,
            y: -0.4,
            rotation: 44.5,
            flipped: true,
        };
        assert_eq!(
            card.to_wire().unwrap(),
            PlacedCard {
                id: 17,
                position_x: 13,
                position_y: 0,
                rotation: 45,
                flipped: true,
            }
        );

        let bad = CardPosition {
            id: "joker".into(),
            ..card
        };
        assert!(matches!(bad.to_wire(), Err(SyncError::InvalidInput(_))));
    }

    #[test]
    fn arranged_cards_convert_back_to_positions() {
        let state = GameState::from(snapshot(json!({
            "card_placement": {"cards": [
                {"id": "8", "position_x": 2.5, "position_y": -3.2, "rotation": 15.0, "flipped": true}
            ]}
        })));
        let position = CardPosition::from(&state.card_placement.arranged_cards[0]);
        assert_eq!(position.id, "8");
        assert_eq!(
            position.to_wire().unwrap(),
            PlacedCard {
                id: 8,
                position_x: 3,
                position_y: -3,
                rotation: 15,
                flipped: true,
            }
        );
    }

    #[test]
    fn apply_snapshot_replaces_state_and_emits() {
        let (store, _player, mut events) = store();
        let first = store.apply_snapshot(snapshot(json!({"score_a": 1})));
        let second = store.apply_snapshot(snapshot(json!({"score_a": 2})));

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(store.state().unwrap().score_a, 2);
        for expected in [1, 2] {
            match events.try_recv().unwrap() {
                SessionEvent::GameUpdated(state) => assert_eq!(state.score_a, expected),
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[test]
    fn final_scores_are_stored_until_reset() {
        let (store, _player, mut events) = store();
        store.apply_snapshot(ServerGameSnapshot::default());
        store.set_final_scores(vec![ScoreboardEntry {
            name: "A".into(),
            won: true,
        }]);

        assert_eq!(store.final_scores().unwrap().len(), 1);
        assert!(matches!(events.try_recv().unwrap(), SessionEvent::GameUpdated(_)));
        assert!(matches!(events.try_recv().unwrap(), SessionEvent::FinalScores(_)));

        store.reset();
        assert!(store.state().is_none());
        assert!(store.final_scores().is_none());
    }

    #[test]
    fn actions_while_disconnected_fail_without_state_change() {
        let (store, player, _events) = store();
        player.set("A");

        assert!(matches!(store.end_turn("AB12"), Err(SyncError::NotConnected)));
        assert!(matches!(
            store.make_decision("AB12", true),
            Err(SyncError::NotConnected)
        ));
        assert!(matches!(store.next_round("AB12"), Err(SyncError::NotConnected)));
        assert!(matches!(
            store.vote_word("AB12", "apple"),
            Err(SyncError::NotConnected)
        ));
        assert!(store.state().is_none());
    }

    #[test]
    fn named_actions_need_a_recorded_player() {
        let (store, _player, _events) = store();
        assert!(matches!(
            store.vote_word("AB12", "apple"),
            Err(SyncError::InvalidInput(_))
        ));
        assert!(matches!(
            store.submit_card_placement("AB12", &[]),
            Err(SyncError::InvalidInput(_))
        ));
    }
}
