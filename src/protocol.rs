//! Wire-compatible protocol types for the party game server.
//!
//! Every frame on the wire is one JSON [`Envelope`]:
//! `{ "type": "<tag>", "payload": { ... } }`. Outbound frames are built from
//! [`ClientMessage`]; inbound frames are decoded into [`ServerMessage`] by
//! [`ServerMessage::from_envelope`], which ignores tags it does not know.
//!
//! The server snapshot types ([`ServerGameSnapshot`] and friends) mirror the
//! server's own naming (`is_active`, `is_deciding`, `score_a`, ...). Every
//! field is optional here; the game store maps them onto a total view model.

use serde::{de, Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::status::StatusCode;

// ── Envelope ────────────────────────────────────────────────────────

/// A single undecoded wire frame.
///
/// The connection layer only understands envelopes; interpreting the
/// payload is left to whoever holds the inbound handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message tag, e.g. `"lobby_info"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Tag-specific payload. Missing payloads decode as `null`.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Create an envelope from a tag and an already-built payload.
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Parse a single text frame.
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] if the frame is not a JSON object with
    /// a string `type` field.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// The payload, with `null` replaced by an empty object so that
    /// payload-less frames such as `{"type":"lobby_kicked"}` still decode.
    fn payload_or_empty(&self) -> serde_json::Value {
        if self.payload.is_null() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            self.payload.clone()
        }
    }
}

// ── Lobby types ─────────────────────────────────────────────────────

/// A member of a lobby.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyMember {
    pub name: String,
    #[serde(default)]
    pub ready: bool,
}

/// Authoritative lobby snapshot as pushed by `lobby_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyState {
    /// Join code, unique per active lobby.
    pub code: String,
    /// Name of the hosting member.
    pub host: String,
    /// Members in server order. Names are unique within a lobby.
    #[serde(default)]
    pub members: Vec<LobbyMember>,
}

impl LobbyState {
    /// Look up a member by name.
    pub fn member(&self, name: &str) -> Option<&LobbyMember> {
        self.members.iter().find(|m| m.name == name)
    }

    /// Returns `true` if every member has flagged readiness.
    pub fn all_ready(&self) -> bool {
        self.members.iter().all(|m| m.ready)
    }
}

/// One row of the end-of-game scoreboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreboardEntry {
    pub name: String,
    pub won: bool,
}

// ── Card placement (outbound) ───────────────────────────────────────

/// A card as submitted in `game_card_placement`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedCard {
    pub id: u32,
    pub position_x: i64,
    pub position_y: i64,
    pub rotation: i64,
    pub flipped: bool,
}

/// The `placement` object of `game_card_placement`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardPlacementPayload {
    pub cards: Vec<PlacedCard>,
}

// ── Server game snapshot (inbound) ──────────────────────────────────

/// A card identifier as the server sends it: either a number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireCardId {
    Number(i64),
    Text(String),
}

impl fmt::Display for WireCardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Public per-player data in a server snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerPlayer {
    #[serde(default, deserialize_with = "lenient::value", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient::value", skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(default, deserialize_with = "lenient::value", skip_serializing_if = "Option::is_none")]
    pub is_deciding: Option<bool>,
}

/// The requesting client's own record in a server snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerSelf {
    #[serde(default, deserialize_with = "lenient::value", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient::value", skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(default, deserialize_with = "lenient::value", skip_serializing_if = "Option::is_none")]
    pub is_deciding: Option<bool>,
    #[serde(default, deserialize_with = "lenient::value", skip_serializing_if = "Option::is_none")]
    pub is_danny: Option<bool>,
    #[serde(default, deserialize_with = "lenient::list", skip_serializing_if = "Option::is_none")]
    pub hand: Option<Vec<WireCardId>>,
}

/// A placed card in a server snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerPlacedCard {
    #[serde(default, deserialize_with = "lenient::value", skip_serializing_if = "Option::is_none")]
    pub id: Option<WireCardId>,
    #[serde(default, deserialize_with = "lenient::number", skip_serializing_if = "Option::is_none")]
    pub position_x: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number", skip_serializing_if = "Option::is_none")]
    pub position_y: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number", skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
    #[serde(default, deserialize_with = "lenient::value", skip_serializing_if = "Option::is_none")]
    pub flipped: Option<bool>,
}

/// The `card_placement` object in a server snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerCardPlacement {
    #[serde(default, deserialize_with = "lenient::list", skip_serializing_if = "Option::is_none")]
    pub cards: Option<Vec<ServerPlacedCard>>,
}

/// A full game snapshot in the server's wire naming.
///
/// Decoding only fails when the snapshot is not an object. A field of the
/// wrong type decodes as absent, and list entries of the wrong type are
/// skipped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerGameSnapshot {
    #[serde(default, deserialize_with = "lenient::list", skip_serializing_if = "Option::is_none")]
    pub players: Option<Vec<ServerPlayer>>,
    #[serde(default, deserialize_with = "lenient::value", skip_serializing_if = "Option::is_none")]
    pub player: Option<ServerSelf>,
    #[serde(default, deserialize_with = "lenient::value", skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, deserialize_with = "lenient::value", skip_serializing_if = "Option::is_none")]
    pub card_placement: Option<ServerCardPlacement>,
    #[serde(default, deserialize_with = "lenient::list", skip_serializing_if = "Option::is_none")]
    pub word_options: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient::value", skip_serializing_if = "Option::is_none")]
    pub word: Option<String>,
    #[serde(default, deserialize_with = "lenient::count", skip_serializing_if = "Option::is_none")]
    pub score_a: Option<u32>,
    #[serde(default, deserialize_with = "lenient::count", skip_serializing_if = "Option::is_none")]
    pub score_d: Option<u32>,
}

/// Per-field decoders for the server snapshot types.
mod lenient {
    use serde::de::DeserializeOwned;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    /// Any `T`, or `None` when the value has another shape.
    pub(super) fn value<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        let raw = Value::deserialize(deserializer)?;
        Ok(serde_json::from_value(raw).ok())
    }

    /// An array of `T`, dropping entries that are not a `T`.
    pub(super) fn list<'de, D, T>(deserializer: D) -> Result<Option<Vec<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        let Value::Array(items) = Value::deserialize(deserializer)? else {
            return Ok(None);
        };
        Ok(Some(
            items
                .into_iter()
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect(),
        ))
    }

    /// A number, or a string holding one.
    pub(super) fn number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(as_number(&Value::deserialize(deserializer)?))
    }

    /// A non-negative count. Fractions truncate and out-of-range values
    /// saturate.
    pub(super) fn count<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Value::deserialize(deserializer)?;
        if let Some(n) = raw.as_u64() {
            return Ok(Some(u32::try_from(n).unwrap_or(u32::MAX)));
        }
        // `as` saturates and maps NaN to 0.
        Ok(as_number(&raw).map(|n| n as u32))
    }

    fn as_number(raw: &Value) -> Option<f64> {
        match raw {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

// ── Inbound payloads ────────────────────────────────────────────────

/// Payload of `lobby_created`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyCreatedPayload {
    pub code: String,
}

/// Payload of `lobby_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyInfoPayload {
    #[serde(default)]
    pub state: Option<LobbyState>,
}

/// Payload of tags that carry no data (`lobby_kicked`, `lobby_game_started`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyPayload {}

/// Payload of `game_info`.
///
/// The server nests the snapshot under `state`, but older builds sent the
/// snapshot as the payload itself. A payload with a `state` key is always
/// read as nested, so a malformed `state` is an error rather than an empty
/// flat snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GameInfoPayload {
    Nested { state: ServerGameSnapshot },
    Flat(ServerGameSnapshot),
}

impl<'de> Deserialize<'de> for GameInfoPayload {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut object = serde_json::Map::<String, serde_json::Value>::deserialize(deserializer)?;
        match object.remove("state") {
            Some(state) => serde_json::from_value(state)
                .map(|state| Self::Nested { state })
                .map_err(de::Error::custom),
            None => serde_json::from_value(serde_json::Value::Object(object))
                .map(Self::Flat)
                .map_err(de::Error::custom),
        }
    }
}

impl GameInfoPayload {
    /// The snapshot regardless of which shape carried it.
    pub fn into_snapshot(self) -> ServerGameSnapshot {
        match self {
            Self::Nested { state } => state,
            Self::Flat(snapshot) => snapshot,
        }
    }
}

/// Payload of `game_final_scores`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalScoresPayload {
    #[serde(default)]
    pub scores: Vec<ScoreboardEntry>,
}

/// Payload of `status_code`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCodePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<StatusCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// ── Messages ────────────────────────────────────────────────────────

/// Message types sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Create a lobby hosted by `host`.
    LobbyCreate { host: String },
    /// Join (or rejoin) the lobby identified by `code`.
    LobbyJoin { code: String, name: String },
    /// Leave the lobby.
    LobbyLeave { code: String },
    /// Remove a member from the lobby. Host-only by convention.
    LobbyKick { code: String, name: String },
    /// Update the sender's own member record (readiness).
    LobbyMemberUpdate { code: String, member: LobbyMember },
    /// Ask the server to start the game.
    LobbyStartGame { code: String },
    /// End the active player's turn.
    GameEndTurn { code: String },
    /// Report whether the decisive player guessed correctly.
    GameMakeDecision { code: String, correct: bool },
    /// Advance to the next round.
    GameNextRound { code: String },
    /// Vote for a candidate word.
    GameVoteWord {
        code: String,
        name: String,
        word: String,
    },
    /// Submit the active player's card arrangement.
    GameCardPlacement {
        code: String,
        name: String,
        placement: CardPlacementPayload,
    },
}

impl ClientMessage {
    /// The wire tag of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LobbyCreate { .. } => "lobby_create",
            Self::LobbyJoin { .. } => "lobby_join",
            Self::LobbyLeave { .. } => "lobby_leave",
            Self::LobbyKick { .. } => "lobby_kick",
            Self::LobbyMemberUpdate { .. } => "lobby_member_update",
            Self::LobbyStartGame { .. } => "lobby_start_game",
            Self::GameEndTurn { .. } => "game_end_turn",
            Self::GameMakeDecision { .. } => "game_make_decision",
            Self::GameNextRound { .. } => "game_next_round",
            Self::GameVoteWord { .. } => "game_vote_word",
            Self::GameCardPlacement { .. } => "game_card_placement",
        }
    }
}

/// Message types sent from server to client.
///
/// Decode with [`ServerMessage::from_envelope`]. The `Serialize` impl emits
/// the same wire shape and exists for fixtures and tooling.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A lobby was created on our behalf.
    LobbyCreated(LobbyCreatedPayload),
    /// Full lobby snapshot.
    LobbyInfo(LobbyInfoPayload),
    /// We were removed from the lobby.
    LobbyKicked(EmptyPayload),
    /// The host started the game; a `game_info` follows.
    LobbyGameStarted(EmptyPayload),
    /// Full game snapshot.
    GameInfo(GameInfoPayload),
    /// The game ended.
    GameFinalScores(FinalScoresPayload),
    /// Protocol-level error report.
    StatusCode(StatusCodePayload),
}

impl ServerMessage {
    /// Decode an inbound envelope.
    ///
    /// Returns `Ok(None)` for tags this client does not handle, so newer
    /// servers can add message types without breaking older clients.
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] if the tag is known but the payload
    /// does not match its shape.
    pub fn from_envelope(envelope: &Envelope) -> Result<Option<Self>, serde_json::Error> {
        let payload = envelope.payload_or_empty();
        let message = match envelope.kind.as_str() {
            "lobby_created" => Self::LobbyCreated(serde_json::from_value(payload)?),
            "lobby_info" => Self::LobbyInfo(serde_json::from_value(payload)?),
            "lobby_kicked" => Self::LobbyKicked(serde_json::from_value(payload)?),
            "lobby_game_started" => Self::LobbyGameStarted(serde_json::from_value(payload)?),
            "game_info" => Self::GameInfo(serde_json::from_value(payload)?),
            "game_final_scores" => Self::GameFinalScores(serde_json::from_value(payload)?),
            "status_code" => Self::StatusCode(serde_json::from_value(payload)?),
            _ => return Ok(None),
        };
        Ok(Some(message))
    }

    /// The wire tag of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LobbyCreated(_) => "lobby_created",
            Self::LobbyInfo(_) => "lobby_info",
            Self::LobbyKicked(_) => "lobby_kicked",
            Self::LobbyGameStarted(_) => "lobby_game_started",
            Self::GameInfo(_) => "game_info",
            Self::GameFinalScores(_) => "game_final_scores",
            Self::StatusCode(_) => "status_code",
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
    use serde_json::json;

    fn decode(text: &str) -> Option<ServerMessage> {
        ServerMessage::from_envelope(&Envelope::decode(text).unwrap()).unwrap()
    }

    #[test]
    fn serialized_tags_match_decoder_tags() {
        let messages = vec![
            ServerMessage::LobbyCreated(LobbyCreatedPayload { code: "AB12".into() }),
            ServerMessage::LobbyInfo(LobbyInfoPayload { state: None }),
            ServerMessage::LobbyKicked(EmptyPayload {}),
            ServerMessage::LobbyGameStarted(EmptyPayload {}),
            ServerMessage::GameInfo(GameInfoPayload::Nested {
                state: ServerGameSnapshot::default(),
            }),
            ServerMessage::GameFinalScores(FinalScoresPayload { scores: vec![] }),
            ServerMessage::StatusCode(StatusCodePayload {
                code: Some(StatusCode::NOT_FOUND),
                message: Some("gone".into()),
            }),
        ];
        for message in messages {
            let json = serde_json::to_string(&message).unwrap();
            let envelope = Envelope::decode(&json).unwrap();
            assert_eq!(envelope.kind, message.kind());
            let decoded = ServerMessage::from_envelope(&envelope).unwrap().unwrap();
            assert_eq!(decoded.kind(), message.kind());
        }
    }

    #[test]
    fn unknown_tag_is_ignored() {
        assert!(decode(r#"{"type":"chat_message","payload":{"text":"hi"}}"#).is_none());
    }

    #[test]
    fn payload_less_frames_decode() {
        let msg = decode(r#"{"type":"lobby_kicked"}"#).unwrap();
        assert_eq!(msg, ServerMessage::LobbyKicked(EmptyPayload {}));

        let msg = decode(r#"{"type":"lobby_game_started","payload":{}}"#).unwrap();
        assert_eq!(msg, ServerMessage::LobbyGameStarted(EmptyPayload {}));
    }

    #[test]
    fn known_tag_with_bad_payload_is_an_error() {
        let envelope = Envelope::decode(r#"{"type":"lobby_created","payload":{"code":7}}"#).unwrap();
        assert!(ServerMessage::from_envelope(&envelope).is_err());
    }

    #[test]
    fn envelope_requires_type() {
        assert!(Envelope::decode(r#"{"payload":{}}"#).is_err());
        assert!(Envelope::decode("not json").is_err());
    }

    #[test]
    fn game_info_accepts_nested_and_flat_snapshots() {
        let nested = decode(r#"{"type":"game_info","payload":{"state":{"score_a":3}}}"#).unwrap();
        let flat = decode(r#"{"type":"game_info","payload":{"score_a":3}}"#).unwrap();
        for msg in [nested, flat] {
            let ServerMessage::GameInfo(payload) = msg else {
                panic!("expected game_info");
            };
            assert_eq!(payload.into_snapshot().score_a, Some(3));
        }
    }

    #[test]
    fn malformed_nested_game_info_is_an_error() {
        for text in [
            r#"{"type":"game_info","payload":{"state":"reveal"}}"#,
            r#"{"type":"game_info","payload":{"state":null,"score_a":4}}"#,
        ] {
            let envelope = Envelope::decode(text).unwrap();
            assert!(
                ServerMessage::from_envelope(&envelope).is_err(),
                "{text} decoded as a snapshot"
            );
        }
    }

    #[test]
    fn snapshot_fields_of_the_wrong_type_decode_as_absent() {
        let snapshot: ServerGameSnapshot = serde_json::from_value(json!({
            "players": [{"name": "A", "is_active": "yes"}, null, 4],
            "player": {"name": 7, "is_danny": true, "hand": ["3", null, 5, {"id": 1}]},
            "stage": 3,
            "card_placement": {"cards": [
                {"id": 5, "position_x": "12.5", "position_y": null, "rotation": [], "flipped": 1},
                "bogus"
            ]},
            "word_options": ["apple", null, "pear"],
            "word": false,
            "score_a": 2.0,
            "score_d": "x"
        }))
        .unwrap();

        let players = snapshot.players.unwrap();
        assert_eq!(players.len(), 1);
        assert_eq!(players[0].name.as_deref(), Some("A"));
        assert_eq!(players[0].is_active, None);

        let me = snapshot.player.unwrap();
        assert_eq!(me.name, None);
        assert_eq!(me.is_danny, Some(true));
        assert_eq!(
            me.hand.unwrap(),
            vec![WireCardId::Text("3".into()), WireCardId::Number(5)]
        );

        assert_eq!(snapshot.stage, None);
        let cards = snapshot.card_placement.unwrap().cards.unwrap();
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].id, Some(WireCardId::Number(5)));
        assert_eq!(cards[0].position_x, Some(12.5));
        assert_eq!(cards[0].position_y, None);
        assert_eq!(cards[0].rotation, None);
        assert_eq!(cards[0].flipped, None);

        assert_eq!(
            snapshot.word_options.unwrap(),
            vec!["apple".to_string(), "pear".to_string()]
        );
        assert_eq!(snapshot.word, None);
        assert_eq!(snapshot.score_a, Some(2));
        assert_eq!(snapshot.score_d, None);
    }

    #[test]
    fn scores_truncate_and_saturate() {
        let snapshot: ServerGameSnapshot = serde_json::from_value(json!({
            "score_a": 3.9,
            "score_d": 1e12
        }))
        .unwrap();
        assert_eq!(snapshot.score_a, Some(3));
        assert_eq!(snapshot.score_d, Some(u32::MAX));

        let snapshot: ServerGameSnapshot =
            serde_json::from_value(json!({ "score_a": -2, "score_d": 5_000_000_000u64 })).unwrap();
        assert_eq!(snapshot.score_a, Some(0));
        assert_eq!(snapshot.score_d, Some(u32::MAX));
    }

    #[test]
    fn card_ids_accept_numbers_and_strings() {
        let snapshot: ServerGameSnapshot =
            serde_json::from_value(json!({ "player": { "hand": [3, "7"] } })).unwrap();
        let hand: Vec<String> = snapshot
            .player
            .unwrap()
            .hand
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(hand, vec!["3", "7"]);
    }

    #[test]
    fn status_code_without_message_decodes() {
        let msg = decode(r#"{"type":"status_code","payload":{"code":404}}"#).unwrap();
        assert_eq!(
            msg,
            ServerMessage::StatusCode(StatusCodePayload {
                code: Some(StatusCode::NOT_FOUND),
                message: None,
            })
        );
    }

    #[test]
    fn client_message_kind_matches_wire_tag() {
        let msg = ClientMessage::LobbyMemberUpdate {
            code: "AB12".into(),
            member: LobbyMember {
                name: "Alice".into(),
                ready: true,
            },
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], msg.kind());
        assert_eq!(
            value["payload"],
            json!({ "code": "AB12", "member": { "name": "Alice", "ready": true } })
        );
    }

    #[test]
    fn lobby_state_helpers() {
        let state = LobbyState {
            code: "AB12".into(),
            host: "Alice".into(),
            members: vec![
                LobbyMember {
                    name: "Alice".into(),
                    ready: true,
                },
                LobbyMember {
                    name: "Bob".into(),
                    ready: false,
                },
            ],
        };
        assert!(state.member("Bob").is_some());
        assert!(state.member("Carol").is_none());
        assert!(!state.all_ready());
    }
}
