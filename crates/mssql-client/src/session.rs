//! Connection-side collaborators.
//!
//! Statements never own a socket. They receive complete responses from a
//! [`StatementExecutor`] and report session-level events (database changes,
//! protocol violations) to a [`ConnectionSession`].

use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;

use crate::error::{Error, Result};

/// Session state shared by the statements of one connection.
pub trait ConnectionSession: Send + Sync {
    /// Active database, `None` when there is no connection context.
    fn database(&self) -> Option<String>;

    /// Record a database change reported by the server.
    fn set_database(&self, database: &str);

    /// Whether responses carry Always Encrypted column metadata.
    fn column_encryption(&self) -> bool {
        false
    }

    /// Tear the connection down after a protocol violation.
    fn terminate(&self, detail: &str);
}

/// Runs SQL text and returns the complete, reassembled response.
#[async_trait::async_trait]
pub trait StatementExecutor: Send + Sync {
    /// Execute `sql` as a batch.
    async fn execute(&self, sql: &str) -> Result<Bytes>;
}

/// Terminate the session and build the error reported to the caller.
pub(crate) fn invalid_protocol_state(session: &dyn ConnectionSession, detail: String) -> Error {
    tracing::warn!(detail = %detail, "terminating connection on invalid protocol state");
    session.terminate(&detail);
    Error::InvalidProtocolState { detail }
}

/// In-process [`ConnectionSession`] holding the active database.
#[derive(Debug, Default)]
pub struct SessionState {
    database: RwLock<Option<String>>,
    column_encryption: bool,
    terminated: AtomicBool,
}

impl SessionState {
    /// Create a session connected to `database`.
    #[must_use]
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: RwLock::new(Some(database.into())),
            ..Self::default()
        }
    }

    /// Enable Always Encrypted metadata decoding.
    #[must_use]
    pub fn with_column_encryption(mut self, enabled: bool) -> Self {
        self.column_encryption = enabled;
        self
    }

    /// Check if the session was terminated.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }
}

impl ConnectionSession for SessionState {
    fn database(&self) -> Option<String> {
        if self.is_terminated() {
            return None;
        }
        self.database.read().clone()
    }

    fn set_database(&self, database: &str) {
        tracing::debug!(database = database, "active database changed");
        *self.database.write() = Some(database.to_string());
    }

    fn column_encryption(&self) -> bool {
        self.column_encryption
    }

    fn terminate(&self, _detail: &str) {
        self.terminated.store(true, Ordering::Release);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state_database_tracking() {
        let session = SessionState::new("master");
        assert_eq!(session.database().as_deref(), Some("master"));
        session.set_database("sales");
        assert_eq!(session.database().as_deref(), Some("sales"));
        assert!(!session.column_encryption());
    }

    #[test]
    fn test_terminated_session_has_no_context() {
        let session = SessionState::new("master").with_column_encryption(true);
        let err = invalid_protocol_state(&session, "bad ordinal".into());
        assert!(err.is_fatal());
        assert!(session.is_terminated());
        assert!(session.database().is_none());
        assert!(session.column_encryption());
    }

    #[test]
    fn test_default_session_has_no_database() {
        assert!(SessionState::default().database().is_none());
    }
}
