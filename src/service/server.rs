//! TCP remoting server.
//!
//! Accepts connections, walks each through the authentication handshake, and
//! from then on feeds its frames to the shared engine. After a peer
//! authenticates, the server can invoke it by identity in all three styles,
//! which is how server-initiated traffic reaches a named peer.

use crate::config::ServerConfig;
use crate::core::codec::CommandCodec;
use crate::core::executor::TaskExecutor;
use crate::core::remoting::RemotingEngine;
use crate::core::response_future::ErrorInfo;
use crate::error::{RemotingError, Result};
use crate::protocol::command::{system_code, Command};
use crate::protocol::dispatcher::RequestProcessor;
use crate::protocol::handshake::{AuthGate, Authenticator};
use crate::protocol::hooks::RpcHook;
use crate::service::pump_connection;
use crate::transport::connection::{ChannelEventListener, Connection, ConnectionManager};
use crate::utils::timeout::REAPER_PERIOD;
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, instrument};

/// Connection-oriented RPC server over TCP.
pub struct RemotingServer {
    config: ServerConfig,
    engine: Arc<RemotingEngine>,
    connections: Arc<ConnectionManager>,
    auth_gate: AuthGate,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    local_addr: OnceLock<SocketAddr>,
}

impl RemotingServer {
    pub fn new(
        config: ServerConfig,
        event_listener: Option<Arc<dyn ChannelEventListener>>,
        authenticator: Option<Arc<dyn Authenticator>>,
    ) -> Self {
        let engine = RemotingEngine::new(
            config.async_permits,
            config.oneway_permits,
            Some(TaskExecutor::new(config.callback_concurrency)),
        );
        Self {
            config,
            engine,
            connections: Arc::new(ConnectionManager::new("SERVER", event_listener)),
            auth_gate: AuthGate::new(authenticator),
            shutdown_tx: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            local_addr: OnceLock::new(),
        }
    }

    pub fn register_processor(
        &self,
        request_code: i32,
        executor: TaskExecutor,
        processor: Arc<dyn RequestProcessor>,
    ) {
        self.engine
            .register_processor(request_code, executor, processor);
    }

    pub fn register_default_processor(
        &self,
        executor: TaskExecutor,
        processor: Arc<dyn RequestProcessor>,
    ) {
        self.engine.register_default_processor(executor, processor);
    }

    pub fn register_hook(&self, hook: Arc<dyn RpcHook>) {
        self.engine.register_hook(hook);
    }

    /// Bind the listen socket and start the accept loop and timeout reaper.
    /// Returns once the server is listening.
    pub async fn start(&self) -> Result<()> {
        let addr: SocketAddr = self
            .config
            .address
            .parse()
            .map_err(|e| RemotingError::Config(format!("invalid listen address: {e}")))?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        if self.config.socket.send_buffer_size > 0 {
            socket.set_send_buffer_size(self.config.socket.send_buffer_size)?;
            info!(size = self.config.socket.send_buffer_size, "set SO_SNDBUF");
        }
        if self.config.socket.recv_buffer_size > 0 {
            socket.set_recv_buffer_size(self.config.socket.recv_buffer_size)?;
            info!(size = self.config.socket.recv_buffer_size, "set SO_RCVBUF");
        }
        socket.bind(addr)?;
        let listener = socket.listen(self.config.backlog)?;

        let local_addr = listener.local_addr()?;
        let _ = self.local_addr.set(local_addr);
        info!(address = %local_addr, "server listening");

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *self
            .shutdown_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(shutdown_tx);

        let engine = self.engine.clone();
        let connections = self.connections.clone();
        let auth_gate = self.auth_gate.clone();
        let max_idle = self.config.max_idle;
        let accept_loop = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("server accept loop shutting down");
                        break;
                    }
                    accepted = listener.accept() => match accepted {
                        Ok((stream, remote_addr)) => {
                            debug!(%remote_addr, "accepted connection");
                            let engine = engine.clone();
                            let connections = connections.clone();
                            let auth_gate = auth_gate.clone();
                            tokio::spawn(serve_connection(
                                engine,
                                connections,
                                auth_gate,
                                stream,
                                remote_addr,
                                max_idle,
                            ));
                        }
                        Err(e) => {
                            error!(error = %e, "error accepting connection");
                        }
                    }
                }
            }
        });

        let reaper = self.engine.spawn_reaper(REAPER_PERIOD);

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.push(accept_loop);
        tasks.push(reaper);
        Ok(())
    }

    /// The address the server is actually listening on, available after
    /// [`start`](Self::start).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Stop accepting, close every authenticated connection, and halt the
    /// reaper.
    pub async fn shutdown(&self) {
        let shutdown_tx = self
            .shutdown_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = shutdown_tx {
            let _ = tx.send(()).await;
        }

        for conn in self.connections.connections() {
            conn.close();
        }

        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }
    }

    /// Whether `login` currently has a live, authenticated connection.
    pub fn is_connected(&self, login: &str) -> bool {
        self.connections.is_connected(login)
    }

    fn connection_for(&self, login: &str) -> Result<Arc<Connection>> {
        self.connections.lookup(login).ok_or_else(|| {
            RemotingError::Connect(format!("no connection for identity '{login}'"))
        })
    }

    /// Synchronously invoke the peer authenticated as `login`.
    #[instrument(skip(self, request), fields(code = request.code))]
    pub async fn invoke_sync(
        &self,
        login: &str,
        request: Command,
        timeout: Duration,
    ) -> Result<Command> {
        let conn = self.connection_for(login)?;
        self.engine.invoke_sync(&conn, request, timeout).await
    }

    /// Asynchronously invoke the peer authenticated as `login`; every
    /// failure is routed into `callback`.
    pub async fn invoke_async<F>(&self, login: &str, request: Command, timeout: Duration, callback: F)
    where
        F: FnOnce(std::result::Result<Command, ErrorInfo>) + Send + 'static,
    {
        match self.connection_for(login) {
            Ok(conn) => {
                self.engine
                    .invoke_async(&conn, request, timeout, callback)
                    .await;
            }
            Err(e) => callback(Err(ErrorInfo::new(
                request.req_id,
                system_code::REQUEST_FAILED,
                e.to_string(),
            ))),
        }
    }

    /// Fire a oneway command at the peer authenticated as `login`.
    pub async fn invoke_oneway<F>(
        &self,
        login: &str,
        request: Command,
        timeout: Duration,
        callback: F,
    ) where
        F: FnOnce(std::result::Result<(), ErrorInfo>) + Send + 'static,
    {
        match self.connection_for(login) {
            Ok(conn) => {
                self.engine
                    .invoke_oneway(&conn, request, timeout, callback)
                    .await;
            }
            Err(e) => callback(Err(ErrorInfo::new(
                request.req_id,
                system_code::REQUEST_FAILED,
                e.to_string(),
            ))),
        }
    }
}

async fn serve_connection(
    engine: Arc<RemotingEngine>,
    connections: Arc<ConnectionManager>,
    auth_gate: AuthGate,
    stream: TcpStream,
    remote_addr: SocketAddr,
    max_idle: Duration,
) {
    stream.set_nodelay(true).ok();
    let framed = Framed::new(stream, CommandCodec);
    let (sink, inbound) = framed.split();
    let conn = Connection::start(remote_addr, sink);
    connections.notify_connect(remote_addr);

    pump_connection(
        engine,
        connections,
        Some(auth_gate),
        conn,
        inbound,
        max_idle,
    )
    .await;
}
