//! Status codes carried by the server's `status_code` envelope.
//!
//! The server reports protocol-level failures with an HTTP-like numeric code
//! and a human-readable message. The code travels as a bare JSON number, so
//! [`StatusCode`] is a transparent newtype rather than a closed enum: codes
//! this client does not know about still decode.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric status code reported by the game server.
///
/// Use [`description()`](StatusCode::description) for a human-readable
/// fallback when the server omits its own message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(pub u16);

impl StatusCode {
    /// The request was malformed (missing fields, bad card placement, ...).
    pub const BAD_REQUEST: Self = Self(400);
    /// The acting player may not perform this action (e.g. non-host kick).
    pub const FORBIDDEN: Self = Self(403);
    /// The lobby or game referenced by `code` does not exist.
    pub const NOT_FOUND: Self = Self(404);
    /// The action conflicts with current state (name taken, game running).
    pub const CONFLICT: Self = Self(409);
    /// The server failed while handling the request.
    pub const INTERNAL_ERROR: Self = Self(500);

    /// Returns the raw numeric value.
    pub fn as_u16(self) -> u16 {
        self.0
    }

    /// Returns `true` if this code ends the current session.
    ///
    /// A missing lobby cannot be recovered from on this connection; the
    /// client disconnects and drops its lobby state.
    pub fn is_session_fatal(self) -> bool {
        self == Self::NOT_FOUND
    }

    /// Returns a human-readable description of this status code.
    pub fn description(self) -> &'static str {
        match self {
            Self::BAD_REQUEST => "The server rejected the request as malformed.",
            Self::FORBIDDEN => "You are not allowed to perform this action.",
            Self::NOT_FOUND => {
                "The lobby could not be found. It may have been closed or the code is incorrect."
            }
            Self::CONFLICT => "The request conflicts with the current lobby or game state.",
            Self::INTERNAL_ERROR => {
                "An internal server error occurred. Please try again in a few moments."
            }
            _ => "An error occurred",
        }
    }
}

impl From<u16> for StatusCode {
    fn from(code: u16) -> Self {
        Self(code)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
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

    #[test]
    fn only_not_found_is_session_fatal() {
        assert!(StatusCode(404).is_session_fatal());
        assert!(!StatusCode::BAD_REQUEST.is_session_fatal());
        assert!(!StatusCode::CONFLICT.is_session_fatal());
        assert!(!StatusCode(418).is_session_fatal());
    }

    #[test]
    fn unknown_codes_fall_back_to_generic_description() {
        assert_eq!(StatusCode(418).description(), "An error occurred");
        assert!(StatusCode::NOT_FOUND.description().contains("lobby"));
    }

    #[test]
    fn decodes_from_bare_number() {
        let code: StatusCode = serde_json::from_str("404").unwrap();
        assert_eq!(code, StatusCode::NOT_FOUND);
        assert_eq!(serde_json::to_string(&code).unwrap(), "404");
        assert_eq!(code.to_string(), "404");
    }
}
