//! # Service Layer
//!
//! TCP instantiations of the remoting core: [`server::RemotingServer`]
//! accepts connections, gates them through the authentication handshake, and
//! routes requests to registered processors; [`client::RemotingClient`]
//! connects, logs in, and exposes the three invocation styles. Both share
//! one connection pump that feeds inbound frames to the engine and enforces
//! the idle timeout.

pub mod client;
pub mod server;

pub use client::RemotingClient;
pub use server::RemotingServer;

use crate::core::remoting::RemotingEngine;
use crate::error::RemotingError;
use crate::protocol::command::{system_code, Command};
use crate::protocol::handshake::AuthGate;
use crate::transport::connection::{Connection, ConnectionManager};
use futures::{Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

/// Pump inbound frames from one connection into the engine until the peer
/// disconnects, a protocol error occurs, the idle window lapses, or the
/// connection is closed locally.
///
/// With a `gate`, the first inbound command is intercepted for the
/// authentication handshake and nothing reaches the engine until it passes.
/// On exit the connection is deactivated, its identity binding removed, and
/// the close event emitted.
pub(crate) async fn pump_connection<S>(
    engine: Arc<RemotingEngine>,
    connections: Arc<ConnectionManager>,
    gate: Option<AuthGate>,
    conn: Arc<Connection>,
    mut inbound: S,
    max_idle: Duration,
) where
    S: Stream<Item = Result<Command, RemotingError>> + Unpin,
{
    let remote_addr = conn.remote_addr();

    loop {
        let idle_budget = max_idle.saturating_sub(conn.idle_for());
        tokio::select! {
            frame = inbound.next() => match frame {
                Some(Ok(command)) => {
                    conn.touch();
                    if let Some(gate) = gate.as_ref().filter(|_| conn.authentication().is_none()) {
                        if !handshake(gate, &connections, &conn, command).await {
                            break;
                        }
                    } else {
                        engine.process_message(&conn, command).await;
                    }
                }
                Some(Err(e)) => {
                    error!(error = %e, %remote_addr, "protocol error, closing connection");
                    connections.notify_exception(remote_addr);
                    break;
                }
                None => break,
            },
            _ = tokio::time::sleep(idle_budget) => {
                if conn.idle_for() >= max_idle {
                    connections.notify_idle(remote_addr);
                    break;
                }
            },
            _ = conn.closed() => break,
        }
    }

    conn.deactivate();
    connections.unbind(&conn);
    connections.notify_close(remote_addr);
}

/// Run the one-shot handshake for `command`, the connection's first inbound
/// command. Returns false when the connection must be closed.
async fn handshake(
    gate: &AuthGate,
    connections: &Arc<ConnectionManager>,
    conn: &Arc<Connection>,
    command: Command,
) -> bool {
    let req_id = command.req_id;
    match gate.admit(conn, &command).await {
        Ok(context) => {
            if conn.bind_authentication(context.clone()).is_err() {
                return false;
            }
            if let Some(displaced) = connections.bind(context.principal.clone(), conn.clone()) {
                warn!(principal = %context.principal, "displacing previous connection for identity");
                displaced.close();
            }
            conn.send(Command::success(req_id));
            true
        }
        Err(e) => {
            warn!(req_id, error = %e, "authentication failed");
            // Flush the refusal before tearing the connection down.
            let ack = conn.write(Command::failure(
                req_id,
                system_code::UNAUTHORIZED,
                e.to_string(),
            ));
            let _ = ack.await;
            false
        }
    }
}
