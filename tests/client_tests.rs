//! Integration tests for `PartyClient`.
//!
//! Each test plays the game server through the loopback connector from
//! `tests/common`: it reads the frames the client sends and pushes server
//! frames back, then checks the resulting store state and session events.

mod common;

use std::sync::Arc;

use party_sync_client::protocol::Envelope;
use party_sync_client::{
    CardPosition, PartyClient, Phase, SessionEvent, Stage, StatusCode, SyncConfig, SyncError,
};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};

use common::{
    accept, drain, final_scores, game_info, lobby, lobby_created, lobby_game_started, lobby_info,
    lobby_kicked, next_event, status_code, LoopbackConnector, ServerConn,
};

// ════════════════════════════════════════════════════════════════════
// Helpers
// ════════════════════════════════════════════════════════════════════

struct Harness {
    client: PartyClient,
    events: mpsc::Receiver<SessionEvent>,
    accepted: mpsc::UnboundedReceiver<ServerConn>,
}

fn start() -> Harness {
    let (connector, accepted) = LoopbackConnector::new();
    let (client, events) = PartyClient::new(SyncConfig::new("loopback://party"), connector);
    Harness {
        client,
        events,
        accepted,
    }
}

/// Join lobby `code` as `name` and answer with a lobby snapshot built from
/// `members`. Returns once the client has entered the lobby.
async fn join(h: &mut Harness, code: &str, name: &str, members: &[(&str, bool)]) -> ServerConn {
    assert_ok!(h.client.lobby().join_lobby(code, name));
    let mut server = accept(&mut h.accepted).await;
    assert_eq!(
        server.recv_json().await,
        json!({"type": "lobby_join", "payload": {"code": code, "name": name}})
    );
    server.push_message(&lobby_info(lobby(code, members)));
    loop {
        if let SessionEvent::Navigate(Phase::Lobby { .. }) = next_event(&mut h.events).await {
            break;
        }
    }
    server
}

/// Join, then have the server start the game. Returns once the client has
/// entered the game.
async fn enter_game(h: &mut Harness, code: &str, name: &str) -> ServerConn {
    let server = join(h, code, name, &[(name, true), ("Zoe", true)]).await;
    server.push_message(&lobby_game_started());
    server.push_message(&game_info(json!({
        "players": [
            {"name": name, "is_active": true, "is_deciding": false},
            {"name": "Zoe", "is_active": false, "is_deciding": true}
        ],
        "player": {"name": name, "is_active": true, "is_deciding": false, "is_danny": false, "hand": [1, 2, 3]},
        "stage": "selection"
    })));
    loop {
        if let SessionEvent::Navigate(Phase::Game { .. }) = next_event(&mut h.events).await {
            break;
        }
    }
    server
}

// ════════════════════════════════════════════════════════════════════
// Lobby lifecycle
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn create_then_created_then_join_then_info() {
    let mut h = start();

    assert_ok!(h.client.lobby().create_lobby("Alice"));
    let mut server = accept(&mut h.accepted).await;
    assert_eq!(server.endpoint, "loopback://party");
    assert_eq!(
        server.recv_json().await,
        json!({"type": "lobby_create", "payload": {"host": "Alice"}})
    );

    server.push_message(&lobby_created("AB12"));
    assert_eq!(
        server.recv_json().await,
        json!({"type": "lobby_join", "payload": {"code": "AB12", "name": "Alice"}})
    );

    server.push_message(&lobby_info(lobby("AB12", &[("Alice", false)])));
    match next_event(&mut h.events).await {
        SessionEvent::LobbyUpdated(state) => {
            assert_eq!(state.code, "AB12");
            assert_eq!(state.host, "Alice");
            assert_eq!(state.members.len(), 1);
            assert!(!state.members[0].ready);
        }
        other => panic!("expected LobbyUpdated, got {other:?}"),
    }
    assert!(matches!(
        next_event(&mut h.events).await,
        SessionEvent::Navigate(Phase::Lobby { code }) if code == "AB12"
    ));

    assert!(h.client.is_connected());
    assert!(h.client.lobby().is_host());
    assert_eq!(h.client.lobby().player_name(), "Alice");
    assert!(h.client.lobby().error().is_none());
}

#[tokio::test]
async fn identical_lobby_info_is_applied_once() {
    let mut h = start();
    let server = join(&mut h, "AB12", "Bob", &[("Alice", false), ("Bob", false)]).await;
    let before = h.client.lobby().state().unwrap();

    server.push_message(&lobby_info(lobby("AB12", &[("Alice", false), ("Bob", false)])));
    // A changed snapshot afterwards proves the first one was processed.
    server.push_message(&lobby_info(lobby("AB12", &[("Alice", true), ("Bob", false)])));

    match next_event(&mut h.events).await {
        SessionEvent::LobbyUpdated(state) => assert!(state.members[0].ready),
        other => panic!("expected LobbyUpdated, got {other:?}"),
    }
    assert!(!Arc::ptr_eq(&before, &h.client.lobby().state().unwrap()));
    assert!(drain(&mut h.events).is_empty());
}

#[tokio::test]
async fn toggle_ready_sends_inverted_readiness() {
    let mut h = start();
    let mut server = join(&mut h, "AB12", "Bob", &[("Alice", false), ("Bob", false)]).await;

    assert_ok!(h.client.lobby().toggle_ready());
    assert_eq!(
        server.recv_json().await,
        json!({
            "type": "lobby_member_update",
            "payload": {"code": "AB12", "member": {"name": "Bob", "ready": true}}
        })
    );
    // Readiness is not changed locally.
    assert!(!h.client.lobby().state().unwrap().members[1].ready);

    server.push_message(&lobby_info(lobby("AB12", &[("Alice", false), ("Bob", true)])));
    next_event(&mut h.events).await;

    assert_ok!(h.client.lobby().toggle_ready());
    assert_eq!(
        server.recv_json().await["payload"]["member"]["ready"],
        json!(false)
    );
}

#[tokio::test]
async fn host_actions_send_expected_frames() {
    let mut h = start();
    let mut server = join(&mut h, "AB12", "Alice", &[("Alice", true), ("Bob", true)]).await;

    assert_ok!(h.client.lobby().kick_player("Bob"));
    assert_eq!(
        server.recv_json().await,
        json!({"type": "lobby_kick", "payload": {"code": "AB12", "name": "Bob"}})
    );

    assert_ok!(h.client.lobby().start_game());
    assert_eq!(
        server.recv_json().await,
        json!({"type": "lobby_start_game", "payload": {"code": "AB12"}})
    );
    // Starting does not leave the lobby until the first game snapshot.
    assert!(h.client.lobby().state().is_some());
}

#[tokio::test]
async fn leave_lobby_sends_leave_and_clears_immediately() {
    let mut h = start();
    let mut server = join(&mut h, "AB12", "Bob", &[("Alice", false), ("Bob", false)]).await;

    assert_ok!(h.client.lobby().leave_lobby());
    assert!(h.client.lobby().state().is_none());
    assert!(matches!(
        next_event(&mut h.events).await,
        SessionEvent::LobbyClosed
    ));
    assert_eq!(
        server.recv_json().await,
        json!({"type": "lobby_leave", "payload": {"code": "AB12"}})
    );

    assert!(matches!(
        assert_err!(h.client.lobby().toggle_ready()),
        SyncError::NotInLobby
    ));
}

#[tokio::test]
async fn rejoin_reuses_the_open_connection() {
    let mut h = start();
    let mut server = join(&mut h, "AB12", "Bob", &[("Alice", false), ("Bob", false)]).await;

    assert_ok!(h.client.lobby().rejoin_lobby("AB12", "Bob"));
    assert_eq!(
        server.recv_json().await,
        json!({"type": "lobby_join", "payload": {"code": "AB12", "name": "Bob"}})
    );
    assert!(h.accepted.try_recv().is_err(), "no second connection");
}

#[tokio::test]
async fn rejoin_without_connection_is_refused() {
    let mut h = start();
    assert!(matches!(
        assert_err!(h.client.lobby().rejoin_lobby("AB12", "Bob")),
        SyncError::NotConnected
    ));
    assert!(h.accepted.try_recv().is_err());
}

// ════════════════════════════════════════════════════════════════════
// Errors and kicks
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn kick_is_fatal() {
    let mut h = start();
    let server = join(&mut h, "AB12", "Bob", &[("Alice", false), ("Bob", false)]).await;
    let mut status = h.client.connection().subscribe_status();

    server.push_message(&lobby_kicked());

    match next_event(&mut h.events).await {
        SessionEvent::Kicked { message } => {
            assert_eq!(message, "You have been kicked from the lobby");
        }
        other => panic!("expected Kicked, got {other:?}"),
    }
    assert!(matches!(
        next_event(&mut h.events).await,
        SessionEvent::Navigate(Phase::Home)
    ));

    status.wait_for(|connected| !*connected).await.unwrap();
    assert!(h.client.lobby().state().is_none());
    assert_eq!(
        h.client.lobby().error().as_deref(),
        Some("You have been kicked from the lobby")
    );
    assert!(matches!(
        assert_err!(h.client.game().end_turn("AB12")),
        SyncError::NotConnected
    ));

    // A later action opens a fresh connection.
    let _server = join(&mut h, "CD34", "Bob", &[("Carol", false), ("Bob", false)]).await;
    assert!(h.client.lobby().error().is_none());
}

#[tokio::test]
async fn not_found_status_disconnects_and_clears_lobby() {
    let mut h = start();
    let server = join(&mut h, "AB12", "Bob", &[("Alice", false), ("Bob", false)]).await;

    server.push_message(&status_code(404, Some("Lobby not found")));

    match next_event(&mut h.events).await {
        SessionEvent::Error { message, code } => {
            assert_eq!(message, "Lobby not found");
            assert_eq!(code, Some(StatusCode::NOT_FOUND));
        }
        other => panic!("expected Error, got {other:?}"),
    }
    assert!(matches!(
        next_event(&mut h.events).await,
        SessionEvent::LobbyClosed
    ));
    assert!(!h.client.is_connected());
    assert!(h.client.lobby().state().is_none());
    assert_eq!(h.client.lobby().error().as_deref(), Some("Lobby not found"));
}

#[tokio::test]
async fn other_status_codes_keep_the_session() {
    let mut h = start();
    let server = join(&mut h, "AB12", "Bob", &[("Alice", false), ("Bob", false)]).await;

    server.push_message(&status_code(409, None));

    match next_event(&mut h.events).await {
        SessionEvent::Error { message, code } => {
            assert_eq!(message, StatusCode::CONFLICT.description());
            assert_eq!(code, Some(StatusCode::CONFLICT));
        }
        other => panic!("expected Error, got {other:?}"),
    }
    assert!(h.client.is_connected());
    assert!(h.client.lobby().state().is_some());

    // The next applied snapshot clears the error.
    server.push_message(&lobby_info(lobby("AB12", &[("Alice", true), ("Bob", false)])));
    next_event(&mut h.events).await;
    assert!(h.client.lobby().error().is_none());
}

#[tokio::test]
async fn server_close_reports_disconnected() {
    let mut h = start();
    let server = join(&mut h, "AB12", "Bob", &[("Alice", false), ("Bob", false)]).await;
    let mut status = h.client.connection().subscribe_status();

    drop(server);

    status.wait_for(|connected| !*connected).await.unwrap();
    // The projection is left as is; only the connection flag changes.
    assert!(h.client.lobby().state().is_some());
}

#[tokio::test]
async fn unknown_frames_are_ignored() {
    let mut h = start();
    let server = join(&mut h, "AB12", "Bob", &[("Alice", false), ("Bob", false)]).await;

    server.push(r#"{"type":"chat_message","payload":{"text":"hi"}}"#);
    server.push("not json at all");
    server.push_message(&lobby_info(lobby("AB12", &[("Alice", true), ("Bob", false)])));

    assert!(matches!(
        next_event(&mut h.events).await,
        SessionEvent::LobbyUpdated(_)
    ));
    assert!(h.client.is_connected());
}

// ════════════════════════════════════════════════════════════════════
// Local validation and disconnected sends
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn blank_names_and_codes_never_reach_the_network() {
    let mut h = start();

    assert!(matches!(
        assert_err!(h.client.lobby().create_lobby("  ")),
        SyncError::InvalidInput(_)
    ));
    assert!(matches!(
        assert_err!(h.client.lobby().join_lobby("AB12", "")),
        SyncError::InvalidInput(_)
    ));
    assert!(matches!(
        assert_err!(h.client.lobby().join_lobby("\t", "Bob")),
        SyncError::InvalidInput(_)
    ));

    tokio::task::yield_now().await;
    assert!(h.accepted.try_recv().is_err());
    assert!(h.client.connection().endpoint().is_none());
}

#[tokio::test]
async fn disconnected_send_is_refused_without_side_effects() {
    let mut h = start();

    assert!(matches!(
        assert_err!(h.client.game().next_round("AB12")),
        SyncError::NotConnected
    ));
    assert!(matches!(
        assert_err!(h.client.connection().send(&Envelope::new("ping", json!({})))),
        SyncError::NotConnected
    ));

    assert!(!h.client.is_connected());
    assert!(h.client.connection().endpoint().is_none());
    assert!(drain(&mut h.events).is_empty());
}

// ════════════════════════════════════════════════════════════════════
// Handler exclusivity
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn replacement_handler_takes_over_exclusively() {
    let mut h = start();
    let server = join(&mut h, "AB12", "Bob", &[("Alice", false), ("Bob", false)]).await;

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let subscription = h.client.connection().set_handler(move |envelope| {
        let _ = tx.send(envelope.kind.clone());
    });

    server.push_message(&lobby_info(lobby("AB12", &[("Alice", true), ("Bob", true)])));

    assert_eq!(rx.recv().await.unwrap(), "lobby_info");
    // The router no longer sees frames.
    assert!(!h.client.lobby().state().unwrap().members[0].ready);
    assert!(drain(&mut h.events).is_empty());

    assert!(subscription.unsubscribe());
}

// ════════════════════════════════════════════════════════════════════
// Game
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn first_game_info_ends_the_lobby_phase() {
    let mut h = start();
    let server = join(&mut h, "AB12", "Bob", &[("Bob", true), ("Zoe", true)]).await;

    server.push_message(&lobby_game_started());
    assert!(matches!(
        next_event(&mut h.events).await,
        SessionEvent::GameStarting
    ));
    assert!(h.client.lobby().state().is_some());

    server.push(
        json!({
            "type": "game_info",
            "payload": {"stage": "discussion", "word": "apple", "score_d": 1}
        })
        .to_string(),
    );
    match next_event(&mut h.events).await {
        SessionEvent::GameUpdated(state) => {
            assert_eq!(state.stage, Stage::Discussion);
            assert_eq!(state.word, "apple");
            assert_eq!(state.score_d, 1);
            assert!(state.players.is_empty());
        }
        other => panic!("expected GameUpdated, got {other:?}"),
    }
    assert!(matches!(
        next_event(&mut h.events).await,
        SessionEvent::LobbyClosed
    ));
    assert!(matches!(
        next_event(&mut h.events).await,
        SessionEvent::Navigate(Phase::Game { code }) if code == "AB12"
    ));
    assert!(h.client.lobby().state().is_none());
}

#[tokio::test]
async fn game_snapshots_are_translated() {
    let mut h = start();
    let _server = enter_game(&mut h, "AB12", "Bob").await;

    let state = h.client.game().state().unwrap();
    assert_eq!(state.players.len(), 2);
    assert_eq!(state.active_player().unwrap().name, "Bob");
    assert_eq!(state.decisive_player().unwrap().name, "Zoe");
    assert_eq!(state.player.hand, vec!["1", "2", "3"]);
    assert_eq!(state.stage, Stage::Selection);
    assert_eq!(state.round(), 1);
}

#[tokio::test]
async fn score_a_is_observed_in_push_order() {
    let mut h = start();
    let server = enter_game(&mut h, "AB12", "Bob").await;

    for score in 1..=6 {
        server.push_message(&game_info(json!({"score_a": score, "score_d": 0})));
    }

    let mut observed = Vec::new();
    while observed.len() < 6 {
        if let SessionEvent::GameUpdated(state) = next_event(&mut h.events).await {
            observed.push(state.score_a);
        }
    }
    assert_eq!(observed, vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(h.client.game().state().unwrap().round(), 7);
}

#[tokio::test]
async fn game_actions_send_expected_frames() {
    let mut h = start();
    let mut server = enter_game(&mut h, "AB12", "Bob").await;
    let game = h.client.game();

    assert_ok!(game.end_turn("AB12"));
    assert_eq!(
        server.recv_json().await,
        json!({"type": "game_end_turn", "payload": {"code": "AB12"}})
    );

    assert_ok!(game.make_decision("AB12", true));
    assert_eq!(
        server.recv_json().await,
        json!({"type": "game_make_decision", "payload": {"code": "AB12", "correct": true}})
    );

    assert_ok!(game.next_round("AB12"));
    assert_eq!(
        server.recv_json().await,
        json!({"type": "game_next_round", "payload": {"code": "AB12"}})
    );

    assert_ok!(game.vote_word("AB12", "apple"));
    assert_eq!(
        server.recv_json().await,
        json!({"type": "game_vote_word", "payload": {"code": "AB12", "name": "Bob", "word": "apple"}})
    );

    // No optimistic local change.
    assert_eq!(game.state().unwrap().word, "");
}

#[tokio::test]
async fn card_placement_is_rounded_to_integers() {
    let mut h = start();
    let mut server = enter_game(&mut h, "AB12", "Bob").await;

    let cards = [
        CardPosition {
            id: "12".into(),
            x: 10.5,
            y: 20.49,
            rotation: -45.5,
            flipped: true,
        },
        CardPosition {
            id: "3".into(),
            x: f64::NAN,
            y: 0.0,
            rotation: 359.7,
            flipped: false,
        },
    ];
    assert_ok!(h.client.game().submit_card_placement("AB12", &cards));

    assert_eq!(
        server.recv_json().await,
        json!({
            "type": "game_card_placement",
            "payload": {
                "code": "AB12",
                "name": "Bob",
                "placement": {"cards": [
                    {"id": 12, "position_x": 11, "position_y": 20, "rotation": -45, "flipped": true},
                    {"id": 3, "position_x": 0, "position_y": 0, "rotation": 360, "flipped": false}
                ]}
            }
        })
    );

    let bad = [CardPosition {
        id: "ace".into(),
        x: 0.0,
        y: 0.0,
        rotation: 0.0,
        flipped: false,
    }];
    assert!(matches!(
        assert_err!(h.client.game().submit_card_placement("AB12", &bad)),
        SyncError::InvalidInput(_)
    ));
    assert!(server.is_quiet());
}

#[tokio::test]
async fn arranged_layout_can_be_resubmitted() {
    let mut h = start();
    let mut server = enter_game(&mut h, "AB12", "Bob").await;

    server.push_message(&game_info(json!({
        "stage": "card_placement",
        "card_placement": {"cards": [
            {"id": 2, "position_x": 40.4, "position_y": 7.5, "rotation": 180, "flipped": true},
            {"id": "1", "position_x": 0, "position_y": 0, "rotation": 0, "flipped": false}
        ]}
    })));
    let state = loop {
        if let SessionEvent::GameUpdated(state) = next_event(&mut h.events).await {
            break state;
        }
    };

    let layout: Vec<CardPosition> = state
        .card_placement
        .arranged_cards
        .iter()
        .map(CardPosition::from)
        .collect();
    assert_ok!(h.client.game().submit_card_placement("AB12", &layout));
    assert_eq!(
        server.recv_json().await["payload"]["placement"],
        json!({"cards": [
            {"id": 2, "position_x": 40, "position_y": 8, "rotation": 180, "flipped": true},
            {"id": 1, "position_x": 0, "position_y": 0, "rotation": 0, "flipped": false}
        ]})
    );
}

#[tokio::test]
async fn snapshot_with_drifted_field_types_is_applied() {
    let mut h = start();
    let server = enter_game(&mut h, "AB12", "Bob").await;

    server.push(
        json!({
            "type": "game_info",
            "payload": {"state": {
                "score_a": 2.0,
                "stage": "reveal",
                "player": {"name": "Bob", "hand": ["3", null]}
            }}
        })
        .to_string(),
    );
    match next_event(&mut h.events).await {
        SessionEvent::GameUpdated(state) => {
            assert_eq!(state.score_a, 2);
            assert_eq!(state.stage, Stage::Reveal);
            assert_eq!(state.player.hand, vec!["3"]);
        }
        other => panic!("expected GameUpdated, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_snapshot_keeps_the_previous_state() {
    let mut h = start();
    let server = enter_game(&mut h, "AB12", "Bob").await;

    server.push(json!({"type": "game_info", "payload": {"state": 42}}).to_string());
    server.push_message(&game_info(json!({"score_a": 4})));

    // Only the well-formed snapshot produces an update.
    match next_event(&mut h.events).await {
        SessionEvent::GameUpdated(state) => assert_eq!(state.score_a, 4),
        other => panic!("expected GameUpdated, got {other:?}"),
    }
}

#[tokio::test]
async fn lobby_info_after_game_start_does_not_reopen_the_lobby() {
    let mut h = start();
    let server = enter_game(&mut h, "AB12", "Bob").await;

    server.push_message(&lobby_info(lobby("AB12", &[("Bob", true), ("Zoe", true)])));
    server.push_message(&game_info(json!({"score_a": 1})));

    match next_event(&mut h.events).await {
        SessionEvent::GameUpdated(state) => assert_eq!(state.score_a, 1),
        other => panic!("expected GameUpdated, got {other:?}"),
    }
    assert!(h.client.lobby().state().is_none());
}

#[tokio::test]
async fn generic_send_message_reaches_the_server() {
    let mut h = start();
    let mut server = enter_game(&mut h, "AB12", "Bob").await;

    let message = party_sync_client::ClientMessage::GameVoteWord {
        code: "AB12".into(),
        name: "Bob".into(),
        word: "pear".into(),
    };
    assert_ok!(h.client.game().send_message(&message));
    assert_eq!(server.recv_json().await["payload"]["word"], "pear");
}

#[tokio::test]
async fn final_scores_then_return_home() {
    let mut h = start();
    let server = enter_game(&mut h, "AB12", "Bob").await;

    server.push_message(&final_scores(&[("Bob", true), ("Zoe", false)]));
    match next_event(&mut h.events).await {
        SessionEvent::FinalScores(scores) => {
            assert_eq!(scores.len(), 2);
            assert_eq!(scores[0].name, "Bob");
            assert!(scores[0].won);
        }
        other => panic!("expected FinalScores, got {other:?}"),
    }
    assert_eq!(h.client.game().final_scores().unwrap().len(), 2);

    h.client.return_home();

    assert!(matches!(
        next_event(&mut h.events).await,
        SessionEvent::Navigate(Phase::Home)
    ));
    assert!(!h.client.is_connected());
    assert!(h.client.game().state().is_none());
    assert!(h.client.game().final_scores().is_none());
}

// ════════════════════════════════════════════════════════════════════
// Shutdown
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn shutdown_closes_the_transport() {
    let mut h = start();
    let server = join(&mut h, "AB12", "Bob", &[("Alice", false), ("Bob", false)]).await;

    h.client.shutdown().await;

    assert!(!h.client.is_connected());
    assert!(server.client_closed());
}

#[tokio::test]
async fn dropping_the_client_closes_the_connection() {
    let mut h = start();
    let mut server = join(&mut h, "AB12", "Bob", &[("Alice", false), ("Bob", false)]).await;

    drop(h.client);

    // The event channel closes once the router and stores are gone.
    while h.events.recv().await.is_some() {}
    tokio::time::timeout(common::STEP_TIMEOUT, async {
        while !server.client_closed() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert!(server.is_quiet());
}
