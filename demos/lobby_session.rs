//! # Lobby Session Demo
//!
//! Walks through one party-game session against a running game server:
//!
//! 1. Create a lobby, or join one when `PARTY_LOBBY_CODE` is set
//! 2. Mark the local player ready once in the lobby
//! 3. As host, start the game when every member is ready
//! 4. Log game snapshots until the final scores arrive
//! 5. Leave and shut down on Ctrl+C, a kick, or game end
//!
//! ## Running
//!
//! ```sh
//! # Start the game server on localhost:1337, then:
//! cargo run --example lobby_session
//!
//! # Join an existing lobby on another server:
//! PARTY_SYNC_URL=ws://my-server:1337/ws PARTY_LOBBY_CODE=AB12 PARTY_PLAYER_NAME=Bob \
//!     cargo run --example lobby_session
//! ```

use party_sync_client::{PartyClient, Phase, SessionEvent, SyncConfig};

/// Player name used when `PARTY_PLAYER_NAME` is not set.
const DEFAULT_PLAYER: &str = "RustPlayer";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=debug` to see every frame.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let config = SyncConfig::from_env().with_connect_timeout(std::time::Duration::from_secs(5));
    let player = std::env::var("PARTY_PLAYER_NAME").unwrap_or_else(|_| DEFAULT_PLAYER.to_string());
    tracing::info!("Connecting to {} as {player}", config.endpoint);

    let (client, mut events) = PartyClient::websocket(config);

    match std::env::var("PARTY_LOBBY_CODE") {
        Ok(code) => client.lobby().join_lobby(&code, &player)?,
        Err(_) => client.lobby().create_lobby(&player)?,
    }

    // ── Event loop ──────────────────────────────────────────────────
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    tracing::info!("Event channel closed, exiting");
                    break;
                };

                match event {
                    SessionEvent::Navigate(Phase::Lobby { code }) => {
                        tracing::info!("In lobby {code}; share this code with friends");
                        if let Err(e) = client.lobby().toggle_ready() {
                            tracing::warn!("Could not mark ready: {e}");
                        }
                    }

                    SessionEvent::LobbyUpdated(lobby) => {
                        let names: Vec<String> = lobby
                            .members
                            .iter()
                            .map(|m| format!("{}{}", m.name, if m.ready { " (ready)" } else { "" }))
                            .collect();
                        tracing::info!("Lobby {}: {}", lobby.code, names.join(", "));

                        if client.lobby().is_host() && lobby.members.len() > 1 && lobby.all_ready() {
                            tracing::info!("Everyone is ready, starting the game");
                            if let Err(e) = client.lobby().start_game() {
                                tracing::warn!("Could not start the game: {e}");
                            }
                        }
                    }

                    SessionEvent::GameStarting => tracing::info!("Game starting..."),

                    SessionEvent::Navigate(Phase::Game { code }) => {
                        tracing::info!("Playing game {code}");
                    }

                    SessionEvent::GameUpdated(game) => {
                        tracing::info!(
                            "Round {} [{}]: personalities {} / Danny {}",
                            game.round(),
                            game.stage,
                            game.score_a,
                            game.score_d,
                        );
                        if game.player.is_active {
                            tracing::info!("It's your turn; hand: {:?}", game.player.hand);
                        }
                    }

                    SessionEvent::FinalScores(scores) => {
                        for entry in &scores {
                            let outcome = if entry.won { "won" } else { "lost" };
                            tracing::info!("{} {outcome}", entry.name);
                        }
                        client.return_home();
                    }

                    SessionEvent::Kicked { message } => tracing::warn!("{message}"),

                    SessionEvent::Error { message, code } => {
                        tracing::error!("Server error {code:?}: {message}");
                    }

                    SessionEvent::LobbyClosed => tracing::info!("Left the lobby"),

                    SessionEvent::Navigate(Phase::Home) => {
                        tracing::info!("Back home, exiting");
                        break;
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, leaving");
                if client.lobby().state().is_some() {
                    if let Err(e) = client.lobby().leave_lobby() {
                        tracing::debug!("leave failed: {e}");
                    }
                }
                break;
            }
        }
    }

    client.shutdown().await;
    tracing::info!("Client shut down");
    Ok(())
}
