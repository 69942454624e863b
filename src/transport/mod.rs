//! # Transport Layer
//!
//! The seam between the remoting core and the byte stream carrying it.
//!
//! A [`connection::Connection`] is built over any framed duplex stream sink;
//! the shipped server and client instantiate it over TCP, but nothing in the
//! core depends on TCP specifically. Lifecycle events (connect, close,
//! exception, idle) fan out to an optional [`connection::ChannelEventListener`],
//! and the server-side identity map lives in
//! [`connection::ConnectionManager`].

pub mod connection;

pub use connection::{ChannelEventListener, Connection, ConnectionManager};
