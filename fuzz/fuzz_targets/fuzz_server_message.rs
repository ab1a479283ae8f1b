#![no_main]

use libfuzzer_sys::fuzz_target;
use party_sync_client::game::GameState;
use party_sync_client::protocol::{Envelope, ServerMessage};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(envelope) = Envelope::decode(text) else {
        return;
    };
    // Known tags must either decode or fail cleanly; snapshots must translate.
    if let Ok(Some(ServerMessage::GameInfo(payload))) = ServerMessage::from_envelope(&envelope) {
        let state = GameState::from(payload.into_snapshot());
        let _ = state.round();
    }
});
