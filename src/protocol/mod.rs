//! # Protocol Layer
//!
//! The message model and the contracts wrapped around it: dispatch routing,
//! invocation hooks, and the per-connection authentication handshake.

pub mod command;
pub mod dispatcher;
pub mod handshake;
pub mod hooks;

pub use command::{system_code, Command};
pub use dispatcher::RequestProcessor;
pub use handshake::{AuthContext, AuthToken, Authenticator};
pub use hooks::RpcHook;
