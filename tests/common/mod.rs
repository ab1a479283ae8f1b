#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for party sync client integration tests.
//!
//! Provides a channel-based [`LoopbackConnector`] whose server half is handed
//! to the test, so the test plays the game server, plus helpers for building
//! server frames.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use party_sync_client::protocol::{
    EmptyPayload, FinalScoresPayload, GameInfoPayload, LobbyCreatedPayload, LobbyInfoPayload,
    LobbyMember, LobbyState, ScoreboardEntry, ServerGameSnapshot, ServerMessage,
    StatusCodePayload,
};
use party_sync_client::{Connector, SessionEvent, StatusCode, SyncError, Transport};
use tokio::sync::mpsc;

/// How long helpers wait before declaring a test hung.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(2);

// ── Loopback transport ──────────────────────────────────────────────

/// Client half of an in-process connection.
pub struct LoopbackTransport {
    to_server: mpsc::UnboundedSender<String>,
    from_server: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, message: String) -> Result<(), SyncError> {
        self.to_server
            .send(message)
            .map_err(|e| SyncError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, SyncError>> {
        self.from_server.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), SyncError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Server half of one accepted connection.
pub struct ServerConn {
    from_client: mpsc::UnboundedReceiver<String>,
    to_client: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
    pub endpoint: String,
}

impl ServerConn {
    /// Push a raw text frame to the client.
    pub fn push(&self, frame: impl Into<String>) {
        self.to_client.send(frame.into()).expect("client gone");
    }

    /// Push a server message to the client.
    pub fn push_message(&self, message: &ServerMessage) {
        self.push(serde_json::to_string(message).expect("serialize server message"));
    }

    /// Next frame the client sent, parsed as JSON.
    pub async fn recv_json(&mut self) -> serde_json::Value {
        let frame = tokio::time::timeout(STEP_TIMEOUT, self.from_client.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client closed the connection");
        serde_json::from_str(&frame).expect("client frame is JSON")
    }

    /// Returns `true` if the client has not sent anything further.
    pub fn is_quiet(&mut self) -> bool {
        self.from_client.try_recv().is_err()
    }

    /// Whether the client closed its transport.
    pub fn client_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// A [`Connector`] that hands each accepted connection's server half to the
/// test through a channel.
pub struct LoopbackConnector {
    accepted: mpsc::UnboundedSender<ServerConn>,
}

impl LoopbackConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerConn>) {
        let (accepted, rx) = mpsc::unbounded_channel();
        (Self { accepted }, rx)
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Transport>, SyncError> {
        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        self.accepted
            .send(ServerConn {
                from_client,
                to_client,
                closed: Arc::clone(&closed),
                endpoint: endpoint.to_string(),
            })
            .map_err(|_| SyncError::TransportClosed)?;
        Ok(Box::new(LoopbackTransport {
            to_server,
            from_server,
            closed,
        }))
    }
}

/// Wait for the next accepted connection.
pub async fn accept(accepted: &mut mpsc::UnboundedReceiver<ServerConn>) -> ServerConn {
    tokio::time::timeout(STEP_TIMEOUT, accepted.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("connector dropped")
}

/// Wait for the next session event.
pub async fn next_event(events: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(STEP_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for a session event")
        .expect("event channel closed")
}

/// Discard every event already queued.
pub fn drain(events: &mut mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    std::iter::from_fn(|| events.try_recv().ok()).collect()
}

// ── Server frame helpers ────────────────────────────────────────────

/// Lobby snapshot with the given `(name, ready)` members; the first member
/// hosts.
pub fn lobby(code: &str, members: &[(&str, bool)]) -> LobbyState {
    LobbyState {
        code: code.into(),
        host: members.first().map(|(n, _)| (*n).to_string()).unwrap_or_default(),
        members: members
            .iter()
            .map(|(name, ready)| LobbyMember {
                name: (*name).into(),
                ready: *ready,
            })
            .collect(),
    }
}

pub fn lobby_created(code: &str) -> ServerMessage {
    ServerMessage::LobbyCreated(LobbyCreatedPayload { code: code.into() })
}

pub fn lobby_info(state: LobbyState) -> ServerMessage {
    ServerMessage::LobbyInfo(LobbyInfoPayload { state: Some(state) })
}

pub fn lobby_kicked() -> ServerMessage {
    ServerMessage::LobbyKicked(EmptyPayload {})
}

pub fn lobby_game_started() -> ServerMessage {
    ServerMessage::LobbyGameStarted(EmptyPayload {})
}

/// `game_info` with the snapshot nested under `state`.
pub fn game_info(snapshot: serde_json::Value) -> ServerMessage {
    let state: ServerGameSnapshot = serde_json::from_value(snapshot).expect("snapshot shape");
    ServerMessage::GameInfo(GameInfoPayload::Nested { state })
}

pub fn final_scores(scores: &[(&str, bool)]) -> ServerMessage {
    ServerMessage::GameFinalScores(FinalScoresPayload {
        scores: scores
            .iter()
            .map(|(name, won)| ScoreboardEntry {
                name: (*name).into(),
                won: *won,
            })
            .collect(),
    })
}

pub fn status_code(code: u16, message: Option<&str>) -> ServerMessage {
    ServerMessage::StatusCode(StatusCodePayload {
        code: Some(StatusCode(code)),
        message: message.map(Into::into),
    })
}
