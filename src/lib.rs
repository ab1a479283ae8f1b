//! # Party Sync Client
//!
//! Realtime synchronization layer for a party-game client whose server owns
//! all game logic.
//!
//! One persistent connection carries JSON envelopes of the form
//! `{ "type": "<tag>", "payload": { ... } }`. Inbound envelopes are routed
//! into two projections: [`LobbySyncStore`] before the game and
//! [`GameSyncStore`] during it. Both are replaced wholesale by each server
//! push, so they always mirror the server's latest snapshot.
//!
//! ## Features
//!
//! - **Transport-agnostic**: implement [`Transport`] and [`Connector`] for any
//!   text channel
//! - **WebSocket built-in**: the default `transport-websocket` feature provides
//!   [`WebSocketConnector`]
//! - **Event-driven**: phase changes and state updates arrive as
//!   [`SessionEvent`]s on a channel
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # #[cfg(feature = "transport-websocket")]
//! # async fn example() -> Result<(), party_sync_client::SyncError> {
//! use party_sync_client::{PartyClient, Phase, SessionEvent, SyncConfig};
//!
//! let (client, mut events) = PartyClient::websocket(SyncConfig::from_env());
//! client.lobby().create_lobby("Alice")?;
//!
//! while let Some(event) = events.recv().await {
//!     if let SessionEvent::Navigate(Phase::Lobby { code }) = event {
//!         println!("share this code: {code}");
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod connection;
pub mod error;
pub mod event;
pub mod game;
pub mod lobby;
pub mod protocol;
pub mod router;
pub mod status;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use client::{PartyClient, SyncConfig};
pub use connection::{ConnectionManager, Subscription};
pub use error::{Result, SyncError};
pub use event::{Phase, SessionEvent};
pub use game::{CardPosition, GameState, GameSyncStore, Stage};
pub use lobby::{LobbySyncStore, PlayerName};
pub use protocol::{ClientMessage, Envelope, LobbyState, ServerMessage};
pub use router::MessageRouter;
pub use status::StatusCode;
pub use transport::{Connector, Transport};
#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};
