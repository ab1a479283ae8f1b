//! Notifications emitted to the session coordinator.
//!
//! The stores publish a [`SessionEvent`] for every state transition a view
//! layer may react to. Events arrive on the bounded channel returned by
//! [`PartyClient::new`](crate::client::PartyClient::new), in the same order
//! as the server frames that caused them.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::game::GameState;
use crate::protocol::{LobbyState, ScoreboardEntry};
use crate::status::StatusCode;

/// The view the user should be on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// No session: create/join screen.
    Home,
    /// Waiting in the lobby identified by `code`.
    Lobby { code: String },
    /// Playing the game that started from lobby `code`.
    Game { code: String },
}

/// A state transition of the lobby or game projection.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A new lobby snapshot was applied.
    LobbyUpdated(Arc<LobbyState>),
    /// Lobby state was cleared (leave, fatal status code, game start).
    LobbyClosed,
    /// We were removed from the lobby. The connection is already closed.
    Kicked { message: String },
    /// The host started the game; a game snapshot follows.
    GameStarting,
    /// A new game snapshot was applied.
    GameUpdated(Arc<GameState>),
    /// The game ended.
    FinalScores(Vec<ScoreboardEntry>),
    /// The server reported an error.
    Error {
        message: String,
        code: Option<StatusCode>,
    },
    /// The coordinator should move the user to another view.
    Navigate(Phase),
}

/// Non-blocking sender shared by the stores.
#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    tx: mpsc::Sender<SessionEvent>,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::Sender<SessionEvent>) -> Self {
        Self { tx }
    }

    /// Emit an event. If the channel is full, log a warning and drop the
    /// event so that dispatch never blocks.
    pub(crate) fn emit(&self, event: SessionEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(event = ?dropped, "event channel full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("event channel closed, receiver dropped");
            }
        }
    }
}
