//! Error types for the party sync client.

use thiserror::Error;

/// Errors that can occur when using the party sync client.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Failed to send a frame through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a frame from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize an envelope.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Attempted an operation that requires an open connection.
    #[error("not connected to server")]
    NotConnected,

    /// Attempted a lobby operation while no lobby state is held.
    #[error("not in a lobby")]
    NotInLobby,

    /// Local input was rejected before reaching the network.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for party sync client operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Reject blank user input before it reaches the network.
pub(crate) fn ensure_present(field: &'static str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(SyncError::InvalidInput(format!("{field} must not be empty")));
    }
    Ok(())
}
