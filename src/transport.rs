//! Transport abstraction for the party game protocol.
//!
//! [`Transport`] is a bidirectional text message channel carrying one JSON
//! envelope per message. [`Connector`] opens a transport for an endpoint;
//! the [`ConnectionManager`](crate::connection::ConnectionManager) owns one
//! connector and asks it for a fresh transport on every `connect`.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use party_sync_client::error::SyncError;
//! use party_sync_client::transport::{Connector, Transport};
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), SyncError> {
//!         // Send the JSON text frame
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, SyncError>> {
//!         // Return None when the connection is closed cleanly
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), SyncError> {
//!         todo!()
//!     }
//! }
//!
//! struct MyConnector;
//!
//! #[async_trait]
//! impl Connector for MyConnector {
//!     async fn connect(&self, endpoint: &str) -> Result<Box<dyn Transport>, SyncError> {
//!         todo!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::SyncError;

/// A bidirectional text message transport.
///
/// Each call to [`send`](Transport::send) transmits one complete JSON
/// envelope. Each call to [`recv`](Transport::recv) returns one.
///
/// # Object Safety
///
/// This trait is object-safe; the connection manager drives transports as
/// `Box<dyn Transport>`.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe because it is raced
/// against outbound frames inside `tokio::select!`. Channel-based
/// implementations are naturally cancel-safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON text frame to the server.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::TransportSend`] if the frame could not be sent.
    async fn send(&mut self, message: String) -> Result<(), SyncError>;

    /// Receive the next JSON text frame from the server.
    ///
    /// Returns:
    /// - `Some(Ok(text))`: a complete frame was received
    /// - `Some(Err(e))`: a transport error occurred
    /// - `None`: the connection was closed cleanly
    async fn recv(&mut self) -> Option<Result<String, SyncError>>;

    /// Close the transport connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails. Implementations should
    /// still release resources in that case.
    async fn close(&mut self) -> Result<(), SyncError>;
}

/// Opens transports for an endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a new transport to `endpoint`. Completes once the handshake has
    /// finished and the transport is ready for [`Transport::send`].
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is invalid or unreachable.
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Transport>, SyncError>;
}
