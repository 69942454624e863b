//! Connection state and lifecycle tracking.
//!
//! A [`Connection`] owns the write side of one duplex stream through a
//! dedicated writer task; callers enqueue frames and optionally observe the
//! write outcome through a oneshot acknowledgement, mirroring a write-and-
//! flush listener. Per-connection state that the original design kept in
//! ambient keyed storage — the authenticated identity, activity for idle
//! tracking — lives here explicitly.

use crate::error::{constants, RemotingError, Result};
use crate::protocol::command::Command;
use crate::protocol::handshake::AuthContext;
use futures::{Sink, SinkExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, warn};

/// Outcome receiver for one enqueued write.
pub type WriteAck = oneshot::Receiver<Result<()>>;

enum Outbound {
    Frame {
        command: Command,
        ack: Option<oneshot::Sender<Result<()>>>,
    },
    Shutdown,
}

#[derive(Debug)]
struct Activity {
    last: Mutex<Instant>,
}

impl Activity {
    fn new() -> Self {
        Self {
            last: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }
}

/// One live peer connection.
pub struct Connection {
    remote_addr: SocketAddr,
    outbound: mpsc::UnboundedSender<Outbound>,
    active: Arc<AtomicBool>,
    activity: Arc<Activity>,
    auth: OnceLock<AuthContext>,
    close_notify: Arc<Notify>,
}

impl Connection {
    /// Start a connection over `sink`, the framed write half of a duplex
    /// stream. Spawns the writer task; the caller keeps the read half and
    /// pumps inbound commands itself.
    pub fn start<S>(remote_addr: SocketAddr, mut sink: S) -> Arc<Self>
    where
        S: Sink<Command, Error = RemotingError> + Send + Unpin + 'static,
    {
        let (outbound, mut rx) = mpsc::unbounded_channel();
        let active = Arc::new(AtomicBool::new(true));
        let activity = Arc::new(Activity::new());
        let close_notify = Arc::new(Notify::new());

        let writer_active = active.clone();
        let writer_activity = activity.clone();
        let writer_notify = close_notify.clone();
        tokio::spawn(async move {
            while let Some(outbound) = rx.recv().await {
                match outbound {
                    Outbound::Shutdown => break,
                    Outbound::Frame { command, ack } => {
                        match sink.send(command).await {
                            Ok(()) => {
                                writer_activity.touch();
                                if let Some(ack) = ack {
                                    let _ = ack.send(Ok(()));
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "write to transport failed");
                                writer_active.store(false, Ordering::SeqCst);
                                if let Some(ack) = ack {
                                    let _ = ack.send(Err(e));
                                }
                                break;
                            }
                        }
                    }
                }
            }

            // Fail any writes that were queued behind the terminal event.
            writer_active.store(false, Ordering::SeqCst);
            while let Ok(outbound) = rx.try_recv() {
                if let Outbound::Frame { ack: Some(ack), .. } = outbound {
                    let _ = ack.send(Err(RemotingError::Send(
                        constants::ERR_CONNECTION_CLOSED.to_string(),
                    )));
                }
            }
            let _ = sink.close().await;
            writer_notify.notify_one();
        });

        Arc::new(Self {
            remote_addr,
            outbound,
            active,
            activity,
            auth: OnceLock::new(),
            close_notify,
        })
    }

    /// A connection with no transport behind it; every write fails. Useful
    /// for exercising handlers and invocation paths in tests.
    pub fn start_detached(remote_addr: SocketAddr) -> Arc<Self> {
        let (outbound, _rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            remote_addr,
            outbound,
            active: Arc::new(AtomicBool::new(true)),
            activity: Arc::new(Activity::new()),
            auth: OnceLock::new(),
            close_notify: Arc::new(Notify::new()),
        })
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Enqueue a frame and return a receiver for its write outcome.
    pub fn write(&self, command: Command) -> WriteAck {
        let (ack_tx, ack_rx) = oneshot::channel();

        if !self.is_active() {
            let _ = ack_tx.send(Err(RemotingError::Send(
                constants::ERR_CONNECTION_INACTIVE.to_string(),
            )));
            return ack_rx;
        }

        if let Err(rejected) = self.outbound.send(Outbound::Frame {
            command,
            ack: Some(ack_tx),
        }) {
            if let Outbound::Frame { ack: Some(ack), .. } = rejected.0 {
                let _ = ack.send(Err(RemotingError::Send(
                    constants::ERR_WRITER_GONE.to_string(),
                )));
            }
        }
        ack_rx
    }

    /// Enqueue a frame without observing the outcome, used for responses.
    pub fn send(&self, command: Command) {
        if self
            .outbound
            .send(Outbound::Frame { command, ack: None })
            .is_err()
        {
            debug!(remote_addr = %self.remote_addr, "dropping frame for closed connection");
        }
    }

    /// Close the connection: no further writes are accepted and the read
    /// loop is told to stand down.
    pub fn close(&self) {
        self.active.store(false, Ordering::SeqCst);
        let _ = self.outbound.send(Outbound::Shutdown);
        self.close_notify.notify_one();
    }

    /// Mark the connection inactive without shutting down the writer, used
    /// by the read loop on its way out.
    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
        let _ = self.outbound.send(Outbound::Shutdown);
    }

    /// Resolves when [`close`](Self::close) is called or the writer dies.
    /// Intended for the single read loop of this connection.
    pub async fn closed(&self) {
        if !self.is_active() {
            return;
        }
        self.close_notify.notified().await;
    }

    /// Bind the authenticated identity. Succeeds at most once.
    pub fn bind_authentication(&self, context: AuthContext) -> Result<()> {
        self.auth.set(context).map_err(|_| {
            RemotingError::Authentication(constants::ERR_ALREADY_AUTHENTICATED.to_string())
        })
    }

    pub fn authentication(&self) -> Option<&AuthContext> {
        self.auth.get()
    }

    /// The authenticated principal, or empty before the handshake completes.
    pub fn login(&self) -> String {
        self.auth
            .get()
            .map(|context| context.principal.clone())
            .unwrap_or_default()
    }

    /// Record traffic in either direction, resetting the idle clock.
    pub fn touch(&self) {
        self.activity.touch();
    }

    pub fn idle_for(&self) -> Duration {
        self.activity.idle_for()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("remote_addr", &self.remote_addr)
            .field("active", &self.is_active())
            .field("login", &self.login())
            .finish()
    }
}

/// Lifecycle event callbacks, invoked with the peer's address.
pub trait ChannelEventListener: Send + Sync {
    fn on_connect(&self, remote_addr: SocketAddr);
    fn on_close(&self, remote_addr: SocketAddr);
    fn on_exception(&self, remote_addr: SocketAddr);
    fn on_idle(&self, remote_addr: SocketAddr);
}

/// Tracks identity bindings and fans out lifecycle events.
///
/// At most one live connection per login: a second handshake under the same
/// identity displaces (and closes) the first.
pub struct ConnectionManager {
    tag: &'static str,
    identities: Mutex<HashMap<String, Arc<Connection>>>,
    listener: Option<Arc<dyn ChannelEventListener>>,
}

impl ConnectionManager {
    pub fn new(tag: &'static str, listener: Option<Arc<dyn ChannelEventListener>>) -> Self {
        Self {
            tag,
            identities: Mutex::new(HashMap::new()),
            listener,
        }
    }

    fn identities(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Connection>>> {
        self.identities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind `login` to `conn`, returning any displaced connection.
    pub fn bind(&self, login: String, conn: Arc<Connection>) -> Option<Arc<Connection>> {
        let displaced = self.identities().insert(login, conn.clone());
        displaced.filter(|previous| !Arc::ptr_eq(previous, &conn))
    }

    /// Remove the binding for `conn`'s identity, but only if it still points
    /// at `conn` — a displaced connection must not tear down its successor.
    pub fn unbind(&self, conn: &Arc<Connection>) {
        let login = conn.login();
        if login.is_empty() {
            return;
        }
        let mut identities = self.identities();
        if identities
            .get(&login)
            .is_some_and(|bound| Arc::ptr_eq(bound, conn))
        {
            identities.remove(&login);
        }
    }

    pub fn lookup(&self, login: &str) -> Option<Arc<Connection>> {
        self.identities().get(login).cloned()
    }

    pub fn is_connected(&self, login: &str) -> bool {
        self.identities().contains_key(login)
    }

    /// All currently bound connections, for shutdown.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.identities().values().cloned().collect()
    }

    pub fn notify_connect(&self, remote_addr: SocketAddr) {
        debug!(tag = self.tag, %remote_addr, "connection active");
        if let Some(listener) = &self.listener {
            listener.on_connect(remote_addr);
        }
    }

    pub fn notify_close(&self, remote_addr: SocketAddr) {
        debug!(tag = self.tag, %remote_addr, "connection inactive");
        if let Some(listener) = &self.listener {
            listener.on_close(remote_addr);
        }
    }

    pub fn notify_exception(&self, remote_addr: SocketAddr) {
        warn!(tag = self.tag, %remote_addr, "connection exception");
        if let Some(listener) = &self.listener {
            listener.on_exception(remote_addr);
        }
    }

    pub fn notify_idle(&self, remote_addr: SocketAddr) {
        debug!(tag = self.tag, %remote_addr, "connection idle");
        if let Some(listener) = &self.listener {
            listener.on_idle(remote_addr);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn conn() -> Arc<Connection> {
        Connection::start_detached("127.0.0.1:0".parse().unwrap())
    }

    fn manager() -> ConnectionManager {
        ConnectionManager::new("TEST", None)
    }

    #[tokio::test]
    async fn authentication_binds_once() {
        let conn = conn();
        assert!(conn.authentication().is_none());
        assert_eq!(conn.login(), "");

        conn.bind_authentication(AuthContext::anonymous("alice"))
            .unwrap();
        assert_eq!(conn.login(), "alice");

        let again = conn.bind_authentication(AuthContext::anonymous("bob"));
        assert!(matches!(again, Err(RemotingError::Authentication(_))));
        assert_eq!(conn.login(), "alice");
    }

    #[tokio::test]
    async fn double_login_displaces_previous_connection() {
        let manager = manager();
        let first = conn();
        let second = conn();

        assert!(manager.bind("alice".to_string(), first.clone()).is_none());
        let displaced = manager.bind("alice".to_string(), second.clone()).unwrap();
        assert!(Arc::ptr_eq(&displaced, &first));
        assert!(Arc::ptr_eq(&manager.lookup("alice").unwrap(), &second));
    }

    #[tokio::test]
    async fn displaced_connection_cannot_unbind_successor() {
        let manager = manager();
        let first = conn();
        let second = conn();
        first
            .bind_authentication(AuthContext::anonymous("alice"))
            .unwrap();
        second
            .bind_authentication(AuthContext::anonymous("alice"))
            .unwrap();

        manager.bind("alice".to_string(), first.clone());
        manager.bind("alice".to_string(), second.clone());

        manager.unbind(&first);
        assert!(manager.is_connected("alice"));

        manager.unbind(&second);
        assert!(!manager.is_connected("alice"));
    }

    #[tokio::test]
    async fn closed_resolves_after_close() {
        let conn = conn();
        conn.close();
        assert!(!conn.is_active());
        conn.closed().await;
    }
}
