//! # Error Types
//!
//! Comprehensive error handling for the remoting transport.
//!
//! This module defines all error variants that can occur during remoting
//! operations, from low-level I/O errors to invocation-level failures.
//!
//! ## Error Categories
//! - **I/O Errors**: Network and transport failures
//! - **Invocation Errors**: Inactive connections, send failures, timeouts,
//!   admission-gate exhaustion
//! - **Protocol Errors**: Malformed or oversized frames (connection-fatal)
//! - **Authentication Errors**: Rejected handshakes (connection-fatal)
//!
//! All errors implement `std::error::Error` for interoperability.
//!
//! ## Example Usage
//! ```rust
//! use remoting_protocol::error::{RemotingError, Result};
//!
//! fn check_deadline(elapsed_ms: u64, budget_ms: u64) -> Result<()> {
//!     if elapsed_ms > budget_ms {
//!         return Err(RemotingError::Timeout(std::time::Duration::from_millis(budget_ms)));
//!     }
//!     Ok(())
//! }
//! ```

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
/// Static strings are borrowed, avoiding heap allocations for common error cases.
pub mod constants {
    /// Connection errors
    pub const ERR_CONNECTION_INACTIVE: &str = "connection absent or inactive";
    pub const ERR_CONNECTION_CLOSED: &str = "connection closed";

    /// Send-path errors
    pub const ERR_WRITE_FAILED: &str = "failed to write request to transport";
    pub const ERR_WRITER_GONE: &str = "connection writer task has terminated";

    /// Protocol errors
    pub const ERR_OVERSIZED_FRAME: &str = "frame exceeds maximum size";
    pub const ERR_FOREIGN_TRAFFIC: &str = "buffered bytes never matched frame magic";

    /// Authentication errors
    pub const ERR_MISSING_CREDENTIAL: &str = "handshake command carries no credential body";
    pub const ERR_NOT_AUTHENTICATED: &str = "peer has not completed the handshake";
    pub const ERR_ALREADY_AUTHENTICATED: &str = "authentication context already bound";
}

/// RemotingError is the primary error type for all remoting operations.
#[derive(Error, Debug)]
pub enum RemotingError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Connection absent or inactive at call time.
    #[error("connection unavailable: {0}")]
    Connect(String),

    /// The write to the transport itself failed.
    #[error("failed to send request: {0}")]
    Send(String),

    /// The write succeeded but no response arrived within the deadline.
    #[error("timeout waiting for response, timeout is {0:?}")]
    Timeout(Duration),

    /// Admission gate exhausted within the acquire deadline.
    #[error("too many concurrent requests: {0}")]
    TooManyRequests(String),

    /// Handshake rejected; the connection is closed.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Malformed or oversized frame; the connection is closed.
    #[error("protocol decode error: {0}")]
    Decode(String),

    /// An error escaped a request processor.
    #[error("request processor error: {0}")]
    Handler(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("connection closed")]
    ConnectionClosed,
}

/// Type alias for Results using RemotingError
pub type Result<T> = std::result::Result<T, RemotingError>;
