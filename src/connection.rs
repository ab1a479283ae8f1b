//! The single persistent connection to the game server.
//!
//! [`ConnectionManager`] is a cheap, cloneable handle over one logical
//! connection. `connect` spawns a background task that opens a transport
//! through the configured [`Connector`] and then multiplexes outbound frames
//! and inbound frames with `tokio::select!`. Inbound frames are decoded into
//! [`Envelope`]s and handed, one at a time and in arrival order, to the one
//! installed handler.
//!
//! # Handler slot
//!
//! At most one inbound handler is installed at any time.
//! [`set_handler`](ConnectionManager::set_handler) replaces the previous one
//! and returns a [`Subscription`]; the slot is looked up per frame, so a swap
//! either fully precedes or fully follows any given dispatch. Installing a
//! handler before `connect` is fine: it is used by the next transport.
//!
//! # Example
//!
//! ```rust,ignore
//! let conn = ConnectionManager::new(WebSocketConnector::new());
//! let subscription = conn.set_handler(|envelope| println!("{}", envelope.kind));
//! conn.connect("ws://localhost:1337/ws", Some(Box::new(|| println!("open"))));
//! // ...
//! subscription.unsubscribe();
//! conn.disconnect();
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SyncError};
use crate::protocol::Envelope;
use crate::transport::{Connector, Transport};

/// Default timeout for [`ConnectionManager::shutdown`].
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Inbound frame callback.
pub type Handler = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Callback run once when a connection attempt succeeds.
pub type OnOpen = Box<dyn FnOnce() + Send>;

/// Lock a mutex, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Shared state ────────────────────────────────────────────────────

struct HandlerSlot {
    id: u64,
    handler: Handler,
}

/// A transport that is connecting or open.
struct Link {
    /// Distinguishes this transport from earlier ones, so a late close of a
    /// detached transport never clobbers its successor.
    generation: u64,
    endpoint: String,
    cmd_tx: mpsc::UnboundedSender<String>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

struct Inner {
    connector: Arc<dyn Connector>,
    status: watch::Sender<bool>,
    link: Mutex<Option<Link>>,
    handler: Mutex<Option<HandlerSlot>>,
    next_id: AtomicU64,
    shutdown_timeout: Duration,
}

impl Inner {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn is_current(&self, generation: u64) -> bool {
        lock(&self.link)
            .as_ref()
            .is_some_and(|link| link.generation == generation)
    }

    /// Flip to connected if `generation` is still the live transport.
    fn mark_open(&self, generation: u64) -> bool {
        let link = lock(&self.link);
        let current = link
            .as_ref()
            .is_some_and(|link| link.generation == generation);
        if current {
            self.status.send_replace(true);
        }
        current
    }

    /// Discard the handle and flip to disconnected if `generation` is still
    /// the live transport.
    fn mark_closed(&self, generation: u64) {
        let mut link = lock(&self.link);
        if link
            .as_ref()
            .is_some_and(|link| link.generation == generation)
        {
            *link = None;
            self.status.send_replace(false);
        }
    }

    fn dispatch(&self, generation: u64, text: &str) {
        let envelope = match Envelope::decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("failed to decode inbound frame: {e}; raw: {text}");
                return;
            }
        };
        if !self.is_current(generation) {
            debug!(kind = %envelope.kind, "dropping frame from detached transport");
            return;
        }
        // Clone out of the slot so the handler may swap the slot or call
        // back into the manager without deadlocking.
        let handler = lock(&self.handler)
            .as_ref()
            .map(|slot| Arc::clone(&slot.handler));
        match handler {
            Some(handler) => handler(&envelope),
            None => debug!(kind = %envelope.kind, "no handler installed, dropping frame"),
        }
    }
}

// ── Subscription ────────────────────────────────────────────────────

/// Handle for the handler installed by [`ConnectionManager::set_handler`].
///
/// Dropping the handle leaves the handler installed; call
/// [`unsubscribe`](Subscription::unsubscribe) to remove it.
#[must_use = "dropping a Subscription leaves the handler installed"]
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    inner: Weak<Inner>,
}

impl Subscription {
    /// Returns `true` while this subscription's handler is the installed one.
    pub fn is_active(&self) -> bool {
        let Some(inner) = self.inner.upgrade() else {
            return false;
        };
        let active = lock(&inner.handler)
            .as_ref()
            .is_some_and(|slot| slot.id == self.id);
        active
    }

    /// Remove the handler if it is still installed.
    ///
    /// Returns `false` if a newer handler had already replaced it, in which
    /// case the newer handler is left untouched.
    pub fn unsubscribe(self) -> bool {
        let Some(inner) = self.inner.upgrade() else {
            return false;
        };
        let removed = {
            let mut slot = lock(&inner.handler);
            if slot.as_ref().is_some_and(|s| s.id == self.id) {
                slot.take()
            } else {
                None
            }
        };
        debug!(id = self.id, removed = removed.is_some(), "handler unsubscribed");
        removed.is_some()
    }
}

// ── Connection manager ──────────────────────────────────────────────

/// Handle to the single logical connection.
///
/// Clones share the same connection, handler slot and status.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a disconnected manager that opens transports via `connector`.
    pub fn new(connector: impl Connector) -> Self {
        Self::with_shutdown_timeout(connector, DEFAULT_SHUTDOWN_TIMEOUT)
    }

    /// Like [`new`](Self::new) with an explicit [`shutdown`](Self::shutdown)
    /// timeout. A zero timeout aborts the transport task immediately.
    pub fn with_shutdown_timeout(connector: impl Connector, shutdown_timeout: Duration) -> Self {
        let (status, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                connector: Arc::new(connector),
                status,
                link: Mutex::new(None),
                handler: Mutex::new(None),
                next_id: AtomicU64::new(1),
                shutdown_timeout,
            }),
        }
    }

    /// Open a connection to `endpoint` unless one is already open.
    ///
    /// Returns immediately; the handshake completes on a background task,
    /// after which the manager reports connected and `on_open` runs exactly
    /// once. If the attempt fails, `on_open` never runs.
    ///
    /// If a connection is already open, `on_open` runs right away on the
    /// caller's thread. If an attempt is still in flight, this call is
    /// ignored.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(&self, endpoint: &str, on_open: Option<OnOpen>) {
        let mut link = lock(&self.inner.link);
        if let Some(existing) = link.as_ref() {
            if self.is_connected() {
                debug!(endpoint = %existing.endpoint, "connection already open");
                drop(link);
                if let Some(on_open) = on_open {
                    on_open();
                }
            } else {
                warn!(
                    endpoint = %existing.endpoint,
                    "connection attempt already in progress, ignoring connect"
                );
            }
            return;
        }

        let generation = self.inner.next_id();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<String>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        // The link lock is held until the link is stored, so the task
        // cannot observe itself as stale.
        let task = tokio::spawn(connection_loop(
            Arc::clone(&self.inner),
            generation,
            endpoint.to_string(),
            cmd_rx,
            shutdown_rx,
            on_open,
        ));

        *link = Some(Link {
            generation,
            endpoint: endpoint.to_string(),
            cmd_tx,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        });
    }

    /// Close the connection, if any. Idempotent.
    ///
    /// The handler stops receiving frames from the closed transport at once
    /// and the manager reports disconnected before this returns. Frames
    /// queued but not yet written are discarded.
    pub fn disconnect(&self) {
        if let Some(link) = self.detach() {
            info!(endpoint = %link.endpoint, "disconnected");
        }
    }

    /// Disconnect and wait for the transport task to finish closing.
    ///
    /// The task is given the configured shutdown timeout to close the
    /// transport; if it does not exit in time it is aborted.
    pub async fn shutdown(&self) {
        debug!("ConnectionManager: shutdown requested");
        let Some(mut link) = self.detach() else {
            return;
        };

        if let Some(mut task) = link.task.take() {
            match tokio::time::timeout(self.inner.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("connection task terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("connection task did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("connection task aborted: {join_err}");
                    }
                }
            }
        }
        info!(endpoint = %link.endpoint, "connection shut down");
    }

    /// Serialize `message` and queue it for transmission.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotConnected`] if no connection is open. Nothing
    /// is queued and the connection state is left unchanged.
    /// Returns [`SyncError::Serialization`] if `message` cannot be encoded.
    pub fn send<M: Serialize + ?Sized>(&self, message: &M) -> Result<()> {
        let link = lock(&self.inner.link);
        let Some(link) = link.as_ref().filter(|_| self.is_connected()) else {
            warn!("cannot send frame: not connected");
            return Err(SyncError::NotConnected);
        };
        let json = serde_json::to_string(message)?;
        debug!(frame = %json, "sending frame");
        link.cmd_tx
            .send(json)
            .map_err(|_| SyncError::NotConnected)
    }

    /// Install the inbound handler, replacing any previous one.
    pub fn set_handler<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let id = self.inner.next_id();
        let previous = lock(&self.inner.handler).replace(HandlerSlot {
            id,
            handler: Arc::new(handler),
        });
        match previous {
            Some(previous) => debug!(id, replaced = previous.id, "inbound handler replaced"),
            None => debug!(id, "inbound handler installed"),
        }
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Returns `true` once the handshake completed and until the
    /// connection closes or is disconnected.
    pub fn is_connected(&self) -> bool {
        *self.inner.status.borrow()
    }

    /// Watch connection status changes.
    pub fn subscribe_status(&self) -> watch::Receiver<bool> {
        self.inner.status.subscribe()
    }

    /// Endpoint of the connecting or open transport.
    pub fn endpoint(&self) -> Option<String> {
        lock(&self.inner.link)
            .as_ref()
            .map(|link| link.endpoint.clone())
    }

    /// Take the live link, report disconnected and signal its task to close.
    fn detach(&self) -> Option<Link> {
        let mut link = {
            let mut slot = lock(&self.inner.link);
            let link = slot.take()?;
            self.inner.status.send_replace(false);
            link
        };
        if let Some(tx) = link.shutdown_tx.take() {
            let _ = tx.send(());
        }
        Some(link)
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connected", &self.is_connected())
            .field("endpoint", &self.endpoint())
            .field("has_handler", &lock(&self.inner.handler).is_some())
            .finish()
    }
}

// ── Connection task ─────────────────────────────────────────────────

/// Background task owning one transport.
///
/// Exits when:
/// - the manager disconnects (shutdown signal)
/// - the connection attempt fails
/// - the transport returns `None` (server closed the connection)
/// - a transport error occurs
async fn connection_loop(
    inner: Arc<Inner>,
    generation: u64,
    endpoint: String,
    mut cmd_rx: mpsc::UnboundedReceiver<String>,
    mut shutdown_rx: oneshot::Receiver<()>,
    on_open: Option<OnOpen>,
) {
    debug!(endpoint = %endpoint, generation, "connection task started");

    let connector = Arc::clone(&inner.connector);
    let opened = tokio::select! {
        result = connector.connect(&endpoint) => result,
        _ = &mut shutdown_rx => {
            debug!(endpoint = %endpoint, "disconnected before handshake completed");
            return;
        }
    };

    let mut transport: Box<dyn Transport> = match opened {
        Ok(transport) => transport,
        Err(e) => {
            error!(endpoint = %endpoint, "failed to connect: {e}");
            inner.mark_closed(generation);
            return;
        }
    };

    if !inner.mark_open(generation) {
        debug!(endpoint = %endpoint, "connection superseded during handshake");
        let _ = transport.close().await;
        return;
    }
    info!(endpoint = %endpoint, "connected");

    if let Some(on_open) = on_open {
        on_open();
    }

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown_rx => {
                debug!("disconnect requested, closing transport");
                if let Err(e) = transport.close().await {
                    debug!("transport close failed: {e}");
                }
                break;
            }

            frame = cmd_rx.recv() => {
                match frame {
                    Some(json) => {
                        if let Err(e) = transport.send(json).await {
                            error!("transport send error: {e}");
                            inner.mark_closed(generation);
                            break;
                        }
                    }
                    // Every sender is gone, so the link was dropped.
                    None => {
                        let _ = transport.close().await;
                        break;
                    }
                }
            }

            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(text)) => inner.dispatch(generation, &text),
                    Some(Err(e)) => {
                        error!("transport receive error: {e}");
                        inner.mark_closed(generation);
                        break;
                    }
                    None => {
                        info!(endpoint = %endpoint, "connection closed by server");
                        inner.mark_closed(generation);
                        break;
                    }
                }
            }
        }
    }

    debug!(generation, "connection task exited");
}

// ── Tests ───────────────────────────────────────────────────────────

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
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    // ── Mock connector ──────────────────────────────────────────────

    /// Client half of an in-process connection.
    struct ChannelTransport {
        to_server: mpsc::UnboundedSender<String>,
        from_server: mpsc::UnboundedReceiver<String>,
        closed: Arc<AtomicBool>,
    }

    /// Server half handed to the test.
    struct ServerEnd {
        from_client: mpsc::UnboundedReceiver<String>,
        to_client: mpsc::UnboundedSender<String>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Transport for ChannelTransport {
        async fn send(&mut self, message: String) -> std::result::Result<(), SyncError> {
            self.to_server
                .send(message)
                .map_err(|e| SyncError::TransportSend(e.to_string()))
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, SyncError>> {
            self.from_server.recv().await.map(Ok)
        }

        async fn close(&mut self) -> std::result::Result<(), SyncError> {
            self.closed.store(true, Ordering::Release);
            Ok(())
        }
    }

    struct ChannelConnector {
        servers: mpsc::UnboundedSender<ServerEnd>,
        refuse: bool,
    }

    #[async_trait]
    impl Connector for ChannelConnector {
        async fn connect(
            &self,
            _endpoint: &str,
        ) -> std::result::Result<Box<dyn Transport>, SyncError> {
            if self.refuse {
                return Err(SyncError::Io(std::io::Error::from(
                    std::io::ErrorKind::ConnectionRefused,
                )));
            }
            let (to_server, from_client) = mpsc::unbounded_channel();
            let (to_client, from_server) = mpsc::unbounded_channel();
            let closed = Arc::new(AtomicBool::new(false));
            let _ = self.servers.send(ServerEnd {
                from_client,
                to_client,
                closed: Arc::clone(&closed),
            });
            Ok(Box::new(ChannelTransport {
                to_server,
                from_server,
                closed,
            }))
        }
    }

    fn manager() -> (ConnectionManager, mpsc::UnboundedReceiver<ServerEnd>) {
        let (servers, server_rx) = mpsc::unbounded_channel();
        let conn = ConnectionManager::new(ChannelConnector {
            servers,
            refuse: false,
        });
        (conn, server_rx)
    }

    async fn connect_and_wait(
        conn: &ConnectionManager,
        servers: &mut mpsc::UnboundedReceiver<ServerEnd>,
    ) -> ServerEnd {
        let (tx, rx) = oneshot::channel();
        conn.connect(
            "mock://server",
            Some(Box::new(move || {
                let _ = tx.send(());
            })),
        );
        rx.await.expect("on_open should run");
        servers.recv().await.expect("server end")
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn send_while_disconnected_is_refused_without_state_change() {
        let (conn, _servers) = manager();
        let status = conn.subscribe_status();

        let result = conn.send(&Envelope::new("lobby_leave", serde_json::json!({"code": "X"})));
        assert!(matches!(result, Err(SyncError::NotConnected)));

        assert!(!conn.is_connected());
        assert!(conn.endpoint().is_none());
        assert!(!status.has_changed().unwrap());
    }

    #[tokio::test]
    async fn connect_runs_on_open_once_and_reports_connected() {
        let (conn, mut servers) = manager();
        let calls = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&calls);
        let mut status = conn.subscribe_status();

        conn.connect(
            "mock://server",
            Some(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        );
        status.wait_for(|connected| *connected).await.unwrap();
        let _server = servers.recv().await.unwrap();

        assert!(conn.is_connected());
        assert_eq!(conn.endpoint().as_deref(), Some("mock://server"));
        tokio::task::yield_now().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn send_reaches_server_as_one_json_frame() {
        let (conn, mut servers) = manager();
        let mut server = connect_and_wait(&conn, &mut servers).await;

        conn.send(&Envelope::new("lobby_start_game", serde_json::json!({"code": "AB12"})))
            .unwrap();

        let frame = server.from_client.recv().await.unwrap();
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&frame).unwrap(),
            serde_json::json!({"type": "lobby_start_game", "payload": {"code": "AB12"}})
        );
    }

    #[tokio::test]
    async fn disconnect_closes_transport_and_is_idempotent() {
        let (conn, mut servers) = manager();
        let mut server = connect_and_wait(&conn, &mut servers).await;

        conn.disconnect();
        assert!(!conn.is_connected());
        assert!(conn.endpoint().is_none());

        // The task drops the transport once it has closed it.
        assert!(server.from_client.recv().await.is_none());
        assert!(server.closed.load(Ordering::Acquire));

        conn.disconnect();
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn server_close_flips_connected_and_discards_link() {
        let (conn, mut servers) = manager();
        let server = connect_and_wait(&conn, &mut servers).await;
        let mut status = conn.subscribe_status();

        drop(server);
        status.wait_for(|connected| !*connected).await.unwrap();
        assert!(conn.endpoint().is_none());
    }

    #[tokio::test]
    async fn refused_connection_never_runs_on_open() {
        let (servers, _server_rx) = mpsc::unbounded_channel();
        let conn = ConnectionManager::new(ChannelConnector {
            servers,
            refuse: true,
        });
        let opened = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&opened);

        conn.connect(
            "mock://server",
            Some(Box::new(move || flag.store(true, Ordering::SeqCst))),
        );
        // Wait until the failed attempt has released the link.
        while conn.endpoint().is_some() {
            tokio::task::yield_now().await;
        }
        assert!(!conn.is_connected());
        assert!(!opened.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn connect_while_open_runs_on_open_immediately() {
        let (conn, mut servers) = manager();
        let _server = connect_and_wait(&conn, &mut servers).await;

        let opened = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&opened);
        conn.connect(
            "mock://server",
            Some(Box::new(move || flag.store(true, Ordering::SeqCst))),
        );
        assert!(opened.load(Ordering::SeqCst));
        assert!(servers.try_recv().is_err(), "no second transport is opened");
    }

    #[tokio::test]
    async fn replaced_handler_never_sees_later_frames() {
        let (conn, mut servers) = manager();
        let server = connect_and_wait(&conn, &mut servers).await;

        let (a_tx, mut a_rx) = mpsc::unbounded_channel::<String>();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel::<String>();
        let first = conn.set_handler(move |env| {
            let _ = a_tx.send(env.kind.clone());
        });
        let second = conn.set_handler(move |env| {
            let _ = b_tx.send(env.kind.clone());
        });
        assert!(!first.is_active());
        assert!(second.is_active());

        server
            .to_client
            .send(r#"{"type":"lobby_kicked","payload":{}}"#.into())
            .unwrap();

        assert_eq!(b_rx.recv().await.unwrap(), "lobby_kicked");
        assert!(b_rx.try_recv().is_err());
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stale_unsubscribe_leaves_newer_handler_installed() {
        let (conn, _servers) = manager();
        let first = conn.set_handler(|_| {});
        let second = conn.set_handler(|_| {});

        assert!(!first.unsubscribe());
        assert!(second.is_active());
        assert!(second.unsubscribe());
    }

    #[tokio::test]
    async fn undecodable_frames_are_skipped() {
        let (conn, mut servers) = manager();
        let server = connect_and_wait(&conn, &mut servers).await;
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let _subscription = conn.set_handler(move |env| {
            let _ = tx.send(env.kind.clone());
        });

        server.to_client.send("{not json".into()).unwrap();
        server
            .to_client
            .send(r#"{"type":"lobby_game_started"}"#.into())
            .unwrap();

        assert_eq!(rx.recv().await.unwrap(), "lobby_game_started");
    }

    #[tokio::test]
    async fn shutdown_waits_for_transport_close() {
        let (conn, mut servers) = manager();
        let server = connect_and_wait(&conn, &mut servers).await;

        conn.shutdown().await;

        assert!(!conn.is_connected());
        assert!(server.closed.load(Ordering::Acquire));
        // Second shutdown has nothing to do.
        conn.shutdown().await;
    }
}
