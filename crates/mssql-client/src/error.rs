//! Client error types.

use mssql_sql::SqlError;
use tds_protocol::{ProtocolError, ServerMessage};
use thiserror::Error;

/// Errors that can occur during client operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The response could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Statement text could not be tokenized or rewritten.
    #[error("SQL error: {0}")]
    Sql(#[from] SqlError),

    /// The response contradicts the statement's state. The connection has
    /// been terminated.
    #[error("invalid protocol state: {detail}")]
    InvalidProtocolState {
        /// What was found.
        detail: String,
    },

    /// A 1-based parameter index outside the statement's parameters.
    #[error("parameter index {index} is out of range (1..={count})")]
    ParameterIndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of parameters.
        count: usize,
    },

    /// The parameter was not registered for output.
    #[error("parameter {0} was not registered for output")]
    ParameterNotRegistered(usize),

    /// The server did not return a value for the parameter.
    #[error("value not set for parameter {0}")]
    ValueNotSet(usize),

    /// No parameter with this name exists on the procedure.
    #[error("parameter {0} is not defined for the procedure")]
    ParameterNotDefined(String),

    /// Output values were requested before the statement executed.
    #[error("the statement must be executed before output values can be read")]
    NotExecuted,

    /// The SQL type is not supported for this use.
    #[error("unsupported type: {0}")]
    UnsupportedType(String),

    /// Server returned an error.
    #[error("server error {number}: {message}")]
    Server {
        /// Error number.
        number: i32,
        /// Error class/severity (0-25).
        class: u8,
        /// Error state.
        state: u8,
        /// Error message.
        message: String,
        /// Server name where error occurred.
        server: Option<String>,
        /// Stored procedure name (if applicable).
        procedure: Option<String>,
        /// Line number in the SQL batch or procedure.
        line: u32,
    },

    /// The parameter metadata cache could not be read or updated.
    #[error("parameter metadata cache inaccessible: {0}")]
    CacheInaccessible(String),

    /// A column encryption key could not be decrypted.
    #[error("column encryption key decryption failed: {0}")]
    KeyDecryption(String),

    /// The statement execution collaborator failed.
    #[error("execution failed: {0}")]
    Execution(String),
}

impl Error {
    /// Check if this error indicates a protocol/driver bug.
    ///
    /// Protocol errors typically indicate a bug in the driver implementation
    /// or a server/driver version mismatch rather than a user error.
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::InvalidProtocolState { .. })
    }

    /// Check if the connection can no longer be used.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::InvalidProtocolState { .. } => true,
            Self::Server { class, .. } => *class >= 20,
            _ => false,
        }
    }

    /// Check if this is a server error with a specific number.
    #[must_use]
    pub fn is_server_error(&self, number: i32) -> bool {
        matches!(self, Self::Server { number: n, .. } if *n == number)
    }

    /// Get the error class/severity if this is a server error.
    ///
    /// SQL Server error classes range from 0-25:
    /// - 0-10: Informational
    /// - 11-16: User errors
    /// - 17-19: Resource/hardware errors
    /// - 20-25: System errors (connection terminating)
    #[must_use]
    pub fn class(&self) -> Option<u8> {
        match self {
            Self::Server { class, .. } => Some(*class),
            _ => None,
        }
    }
}

impl From<&ServerMessage> for Error {
    fn from(message: &ServerMessage) -> Self {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Self::Server {
            number: message.number,
            class: message.class,
            state: message.state,
            message: message.message.clone(),
            server: non_empty(&message.server),
            procedure: non_empty(&message.procedure),
            line: u32::try_from(message.line).unwrap_or(0),
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn message(class: u8) -> ServerMessage {
        ServerMessage {
            number: 8152,
            state: 2,
            class,
            message: "String or binary data would be truncated.".into(),
            server: "sql01".into(),
            procedure: String::new(),
            line: 7,
        }
    }

    #[test]
    fn test_from_server_message() {
        let err = Error::from(&message(16));
        assert!(err.is_server_error(8152));
        assert_eq!(err.class(), Some(16));
        assert!(!err.is_fatal());
        match err {
            Error::Server {
                server, procedure, line, ..
            } => {
                assert_eq!(server.as_deref(), Some("sql01"));
                assert!(procedure.is_none());
                assert_eq!(line, 7);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::from(&message(20)).is_fatal());
        let invalid = Error::InvalidProtocolState {
            detail: "ordinal 9".into(),
        };
        assert!(invalid.is_fatal());
        assert!(invalid.is_protocol_error());
        assert!(!Error::NotExecuted.is_fatal());
        assert!(Error::from(ProtocolError::UnexpectedEof).is_protocol_error());
    }
}
