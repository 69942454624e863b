//! TCP remoting client.
//!
//! Connects lazily on [`login`](RemotingClient::login) and keeps a single
//! connection alive. The client carries the same engine as the server, so it
//! also processes server-initiated requests through its own registered
//! processors.

use crate::config::ClientConfig;
use crate::core::codec::CommandCodec;
use crate::core::executor::TaskExecutor;
use crate::core::remoting::RemotingEngine;
use crate::core::response_future::ErrorInfo;
use crate::error::{constants, RemotingError, Result};
use crate::protocol::command::{system_code, Command};
use crate::protocol::dispatcher::RequestProcessor;
use crate::protocol::handshake::AuthToken;
use crate::protocol::hooks::RpcHook;
use crate::service::pump_connection;
use crate::transport::connection::{ChannelEventListener, Connection, ConnectionManager};
use crate::utils::timeout::{self, REAPER_PERIOD};
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpSocket;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{info, instrument};

/// Connection-oriented RPC client over TCP.
pub struct RemotingClient {
    config: ClientConfig,
    engine: Arc<RemotingEngine>,
    connections: Arc<ConnectionManager>,
    connection: Mutex<Option<Arc<Connection>>>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl RemotingClient {
    pub fn new(config: ClientConfig, event_listener: Option<Arc<dyn ChannelEventListener>>) -> Self {
        let engine = RemotingEngine::new(
            config.async_permits,
            config.oneway_permits,
            Some(TaskExecutor::new(config.callback_concurrency)),
        );
        Self {
            config,
            engine,
            connections: Arc::new(ConnectionManager::new("CLIENT", event_listener)),
            connection: Mutex::new(None),
            reaper: Mutex::new(None),
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

    fn current_connection(&self) -> Option<Arc<Connection>> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .filter(|conn| conn.is_active())
    }

    async fn create_connection(&self) -> Result<Arc<Connection>> {
        if let Some(conn) = self.current_connection() {
            return Ok(conn);
        }

        let addr: SocketAddr = self
            .config
            .address
            .parse()
            .map_err(|e| RemotingError::Config(format!("invalid server address: {e}")))?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        if self.config.socket.send_buffer_size > 0 {
            socket.set_send_buffer_size(self.config.socket.send_buffer_size)?;
        }
        if self.config.socket.recv_buffer_size > 0 {
            socket.set_recv_buffer_size(self.config.socket.recv_buffer_size)?;
        }

        let stream = timeout::with_timeout(
            async { Ok(socket.connect(addr).await?) },
            self.config.connect_timeout,
        )
        .await
        .map_err(|e| match e {
            RemotingError::Timeout(_) => {
                RemotingError::Connect(format!("connect to {addr} timed out"))
            }
            other => RemotingError::Connect(format!("failed to connect to {addr}: {other}")),
        })?;
        stream.set_nodelay(true).ok();
        info!(address = %addr, "connected");

        let framed = Framed::new(stream, CommandCodec);
        let (sink, inbound) = framed.split();
        let conn = Connection::start(addr, sink);
        self.connections.notify_connect(addr);

        tokio::spawn(pump_connection(
            self.engine.clone(),
            self.connections.clone(),
            None,
            conn.clone(),
            inbound,
            self.config.max_idle,
        ));

        *self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(conn.clone());

        let mut reaper = self.reaper.lock().unwrap_or_else(PoisonError::into_inner);
        if reaper.is_none() {
            *reaper = Some(self.engine.spawn_reaper(REAPER_PERIOD));
        }

        Ok(conn)
    }

    /// Connect (if necessary) and perform the authentication handshake.
    ///
    /// Anything but a SUCCESS reply is an authentication failure; the server
    /// closes the connection after refusing.
    #[instrument(skip(self, token))]
    pub async fn login(&self, login: &str, token: &str, timeout: Duration) -> Result<Command> {
        let conn = self.create_connection().await?;

        let credential = AuthToken::new(login, token).to_body()?;
        let request = Command::request(system_code::AUTHENTICATION, Some(credential));
        let response = self.engine.invoke_sync(&conn, request, timeout).await?;

        if response.code == system_code::SUCCESS {
            Ok(response)
        } else {
            Err(RemotingError::Authentication(
                response
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("login rejected with code {}", response.code)),
            ))
        }
    }

    /// Close the current connection, if any.
    pub async fn logout(&self) {
        let conn = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(conn) = conn {
            conn.close();
        }
    }

    /// Close the connection and stop the timeout reaper.
    pub async fn shutdown(&self) {
        self.logout().await;
        let reaper = self
            .reaper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reaper) = reaper {
            reaper.abort();
        }
    }

    fn connected(&self) -> Result<Arc<Connection>> {
        self.current_connection().ok_or_else(|| {
            RemotingError::Connect(constants::ERR_CONNECTION_INACTIVE.to_string())
        })
    }

    /// Synchronous invocation; requires a prior [`login`](Self::login).
    pub async fn invoke_sync(&self, request: Command, timeout: Duration) -> Result<Command> {
        let conn = self.connected()?;
        self.engine.invoke_sync(&conn, request, timeout).await
    }

    /// Asynchronous invocation; every failure is routed into `callback`.
    pub async fn invoke_async<F>(&self, request: Command, timeout: Duration, callback: F)
    where
        F: FnOnce(std::result::Result<Command, ErrorInfo>) + Send + 'static,
    {
        match self.connected() {
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

    /// Fire-and-forget invocation; `callback` reports only send outcome.
    pub async fn invoke_oneway<F>(&self, request: Command, timeout: Duration, callback: F)
    where
        F: FnOnce(std::result::Result<(), ErrorInfo>) + Send + 'static,
    {
        match self.connected() {
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
