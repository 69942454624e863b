//! # Remoting Protocol
//!
//! Connection-oriented RPC transport core for Rust applications and services.
//!
//! Two peers exchange framed, typed commands over a persistent duplex stream,
//! with three invocation styles, admission control, per-connection
//! authentication, and automatic timeout reclamation.
//!
//! ## Features
//! - **Sync, async, and oneway invocation**: awaited request/response,
//!   callback-driven, and fire-and-forget styles over one connection
//! - **Correlation by request id**: responses complete out of order; a
//!   periodic reaper resolves requests the peer never answers
//! - **Admission control**: independent FIFO semaphore gates bound async and
//!   oneway calls in flight
//! - **One-shot handshake**: the first command on a connection authenticates
//!   it; everything else waits behind the gate
//! - **Bounded dispatch**: per-processor executors reject with SYSTEM_BUSY
//!   instead of queueing without limit
//!
//! ## Example
//! ```no_run
//! use remoting_protocol::config::{ClientConfig, ServerConfig};
//! use remoting_protocol::service::{RemotingClient, RemotingServer};
//! use remoting_protocol::protocol::command::Command;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> remoting_protocol::Result<()> {
//!     let server = RemotingServer::new(ServerConfig::default(), None, None);
//!     server.start().await?;
//!
//!     let client = RemotingClient::new(ClientConfig::default(), None);
//!     client.login("alice", "secret", Duration::from_secs(3)).await?;
//!
//!     let response = client
//!         .invoke_sync(Command::request(1024, None), Duration::from_secs(3))
//!         .await?;
//!     println!("response code: {}", response.code);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use error::{RemotingError, Result};
pub use protocol::command::Command;
pub use service::{RemotingClient, RemotingServer};
