//! Server ERROR and INFO message handling.
//!
//! Every message the server sends passes through an optional
//! application-supplied [`MessageHandler`] before the statement records it.
//! The handler can keep a message, drop it, or move it between the error and
//! informational categories (for example to treat a known warning-level
//! error as benign).

use tds_protocol::{EnvChange, ServerMessage};

use crate::session::ConnectionSession;

/// A server message as seen by a [`MessageHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerNotice {
    /// An ERROR token.
    Error(ServerMessage),
    /// An INFO token.
    Info(ServerMessage),
}

impl ServerNotice {
    /// The underlying message.
    #[must_use]
    pub fn message(&self) -> &ServerMessage {
        match self {
            Self::Error(m) | Self::Info(m) => m,
        }
    }

    /// Check if this is an error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Treat the message as informational.
    #[must_use]
    pub fn into_info(self) -> Self {
        match self {
            Self::Error(m) | Self::Info(m) => Self::Info(m),
        }
    }

    /// Treat the message as an error.
    #[must_use]
    pub fn into_error(self) -> Self {
        match self {
            Self::Error(m) | Self::Info(m) => Self::Error(m),
        }
    }
}

/// Intercepts server messages.
///
/// Returning `None` discards the message.
pub trait MessageHandler: Send + Sync {
    /// Inspect and possibly rewrite one message.
    fn handle(&self, notice: ServerNotice) -> Option<ServerNotice>;
}

impl<F> MessageHandler for F
where
    F: Fn(ServerNotice) -> Option<ServerNotice> + Send + Sync,
{
    fn handle(&self, notice: ServerNotice) -> Option<ServerNotice> {
        self(notice)
    }
}

/// Errors and warnings collected while reading a response.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    errors: Vec<ServerMessage>,
    warnings: Vec<ServerMessage>,
}

impl Diagnostics {
    /// Record a message after passing it through `handler`.
    pub fn record(&mut self, notice: ServerNotice, handler: Option<&dyn MessageHandler>) {
        let was_error = notice.is_error();
        let number = notice.message().number;
        let notice = match handler {
            Some(handler) => match handler.handle(notice) {
                Some(notice) => notice,
                None => {
                    tracing::debug!(number = number, "server message discarded by handler");
                    return;
                }
            },
            None => notice,
        };
        if notice.is_error() != was_error {
            tracing::debug!(number = number, error = notice.is_error(), "server message reclassified");
        }
        match notice {
            ServerNotice::Error(message) => self.errors.push(message),
            ServerNotice::Info(message) => self.warnings.push(message),
        }
    }

    /// Errors in arrival order.
    #[must_use]
    pub fn errors(&self) -> &[ServerMessage] {
        &self.errors
    }

    /// Informational messages in arrival order.
    #[must_use]
    pub fn warnings(&self) -> &[ServerMessage] {
        &self.warnings
    }

    /// The first error, which is usually the most specific one.
    #[must_use]
    pub fn first_error(&self) -> Option<&ServerMessage> {
        self.errors.first()
    }

    /// Forget everything recorded.
    pub fn clear(&mut self) {
        self.errors.clear();
        self.warnings.clear();
    }
}

/// The side effects every response token handler shares: messages go to
/// the diagnostics, database changes go to the session.
pub(crate) struct ResponseObserver<'a> {
    pub(crate) session: &'a dyn ConnectionSession,
    pub(crate) handler: Option<&'a dyn MessageHandler>,
    pub(crate) diagnostics: &'a mut Diagnostics,
}

impl ResponseObserver<'_> {
    pub(crate) fn error(&mut self, message: &ServerMessage) {
        self.diagnostics
            .record(ServerNotice::Error(message.clone()), self.handler);
    }

    pub(crate) fn info(&mut self, message: &ServerMessage) {
        self.diagnostics
            .record(ServerNotice::Info(message.clone()), self.handler);
    }

    pub(crate) fn env_change(&mut self, change: &EnvChange) {
        if let Some(database) = change.new_database() {
            self.session.set_database(database);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn msg(number: i32, class: u8) -> ServerMessage {
        ServerMessage {
            number,
            state: 1,
            class,
            message: format!("message {number}"),
            server: String::new(),
            procedure: String::new(),
            line: 1,
        }
    }

    #[test]
    fn test_record_without_handler() {
        let mut diagnostics = Diagnostics::default();
        diagnostics.record(ServerNotice::Error(msg(547, 16)), None);
        diagnostics.record(ServerNotice::Info(msg(5701, 0)), None);
        assert_eq!(diagnostics.errors().len(), 1);
        assert_eq!(diagnostics.warnings().len(), 1);
        assert_eq!(diagnostics.first_error().unwrap().number, 547);
    }

    #[test]
    fn test_handler_downgrades_and_discards() {
        let handler = |notice: ServerNotice| match notice.message().number {
            2601 => Some(notice.into_info()),
            5701 => None,
            50000 => Some(notice.into_error()),
            _ => Some(notice),
        };
        let mut diagnostics = Diagnostics::default();
        diagnostics.record(ServerNotice::Error(msg(2601, 14)), Some(&handler));
        diagnostics.record(ServerNotice::Info(msg(5701, 0)), Some(&handler));
        diagnostics.record(ServerNotice::Info(msg(50000, 10)), Some(&handler));

        assert_eq!(diagnostics.warnings().len(), 1);
        assert_eq!(diagnostics.warnings()[0].number, 2601);
        assert_eq!(diagnostics.errors().len(), 1);
        assert_eq!(diagnostics.errors()[0].number, 50000);

        diagnostics.clear();
        assert!(diagnostics.first_error().is_none());
        assert!(diagnostics.warnings().is_empty());
    }
}
