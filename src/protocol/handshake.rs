//! Per-connection authentication handshake.
//!
//! On the server, the very first inbound command on a new connection is
//! intercepted here instead of reaching the dispatch router. Its body is the
//! login credential; an external [`Authenticator`] resolves it to an
//! [`AuthContext`] or rejects it. Success binds the context to the connection
//! and disarms the gate — every later command bypasses it. Failure answers
//! UNAUTHORIZED and the connection is closed. One attempt per connection;
//! there is no re-authentication path.

use crate::error::{constants, RemotingError, Result};
use crate::protocol::command::Command;
use crate::transport::connection::Connection;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// The credential carried in the body of the handshake command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    pub login: String,
    pub token: String,
}

impl AuthToken {
    pub fn new(login: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            token: token.into(),
        }
    }

    /// Serialize for use as a handshake command body.
    pub fn to_body(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_body(body: &[u8]) -> Result<Self> {
        bincode::deserialize(body)
            .map_err(|e| RemotingError::Authentication(format!("malformed credential: {e}")))
    }
}

/// Identity bound to a connection after a successful handshake.
///
/// Set at most once per connection, read-mostly afterward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub principal: String,
    pub credentials: String,
    pub authorities: Vec<String>,
}

impl AuthContext {
    pub fn new(
        principal: impl Into<String>,
        credentials: impl Into<String>,
        authorities: Vec<String>,
    ) -> Self {
        Self {
            principal: principal.into(),
            credentials: credentials.into(),
            authorities,
        }
    }

    /// Context granted when no [`Authenticator`] is configured.
    pub fn anonymous(login: impl Into<String>) -> Self {
        Self::new(login, "", vec!["ANONYMOUS_USER".to_string()])
    }
}

/// External credential resolver.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Resolve a credential to an identity, or fail the handshake with
    /// [`RemotingError::Authentication`].
    async fn authenticate(&self, conn: &Arc<Connection>, token: AuthToken) -> Result<AuthContext>;
}

/// Server-side handshake gate, shared across connections; all per-connection
/// state lives on the [`Connection`] itself.
#[derive(Clone, Default)]
pub struct AuthGate {
    authenticator: Option<Arc<dyn Authenticator>>,
}

impl AuthGate {
    pub fn new(authenticator: Option<Arc<dyn Authenticator>>) -> Self {
        Self { authenticator }
    }

    /// Run the one-shot handshake against `command`, the first inbound
    /// command of the connection.
    ///
    /// Returns the resolved context; binding it to the connection and
    /// answering the peer are the caller's responsibility so the reply can be
    /// sequenced with connection bookkeeping.
    pub async fn admit(&self, conn: &Arc<Connection>, command: &Command) -> Result<AuthContext> {
        let body = command.body.as_deref().ok_or_else(|| {
            RemotingError::Authentication(constants::ERR_MISSING_CREDENTIAL.to_string())
        })?;
        let token = AuthToken::from_body(body)?;

        let context = match &self.authenticator {
            Some(authenticator) => authenticator.authenticate(conn, token).await?,
            None => AuthContext::anonymous(token.login),
        };

        debug!(principal = %context.principal, "authentication success");
        Ok(context)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::protocol::command::system_code;
    use crate::transport::connection::Connection;

    fn loopback_conn() -> Arc<Connection> {
        Connection::start_detached("127.0.0.1:0".parse().unwrap())
    }

    struct DenyAll;

    #[async_trait]
    impl Authenticator for DenyAll {
        async fn authenticate(
            &self,
            _conn: &Arc<Connection>,
            _token: AuthToken,
        ) -> Result<AuthContext> {
            Err(RemotingError::Authentication("bad credentials".to_string()))
        }
    }

    fn login_command(login: &str) -> Command {
        Command::request(
            system_code::AUTHENTICATION,
            Some(AuthToken::new(login, "secret").to_body().unwrap()),
        )
    }

    #[test]
    fn token_roundtrips_through_body() {
        let token = AuthToken::new("alice", "secret");
        let body = token.to_body().unwrap();
        assert_eq!(AuthToken::from_body(&body).unwrap(), token);
    }

    #[tokio::test]
    async fn missing_body_is_rejected() {
        let gate = AuthGate::new(None);
        let command = Command::request(system_code::AUTHENTICATION, None);
        let denied = gate.admit(&loopback_conn(), &command).await;
        assert!(matches!(denied, Err(RemotingError::Authentication(_))));
    }

    #[tokio::test]
    async fn no_authenticator_grants_anonymous_context() {
        let gate = AuthGate::new(None);
        let context = gate
            .admit(&loopback_conn(), &login_command("alice"))
            .await
            .unwrap();
        assert_eq!(context.principal, "alice");
        assert_eq!(context.authorities, ["ANONYMOUS_USER"]);
    }

    #[tokio::test]
    async fn authenticator_rejection_propagates() {
        let gate = AuthGate::new(Some(Arc::new(DenyAll)));
        let denied = gate.admit(&loopback_conn(), &login_command("mallory")).await;
        assert!(matches!(denied, Err(RemotingError::Authentication(_))));
    }
}
