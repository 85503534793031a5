//! Errors raised while tokenizing or rewriting SQL text.

use thiserror::Error;

/// SQL text processing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum SqlError {
    /// A quoted construct or block comment runs to the end of the input.
    #[error("unterminated {construct} starting at offset {offset}")]
    Unterminated {
        /// What was left open.
        construct: &'static str,
        /// Byte offset where it started.
        offset: usize,
    },

    /// The statement does not start with a keyword the rewriter handles.
    #[error("unsupported statement starting with `{0}`")]
    UnsupportedStatement(String),

    /// A `WITH` clause does not have the shape `name [(cols)] AS (query)`.
    #[error("malformed common table expression at offset {offset}")]
    InvalidCte {
        /// Byte offset of the offending token.
        offset: usize,
    },

    /// An `OPEN*` rowset function is not followed by a parenthesized argument list.
    #[error("malformed rowset function call at offset {offset}")]
    InvalidOpenCall {
        /// Byte offset of the function keyword.
        offset: usize,
    },

    /// An opening parenthesis has no matching close.
    #[error("unbalanced parenthesis at offset {offset}")]
    UnbalancedParentheses {
        /// Byte offset of the opening parenthesis.
        offset: usize,
    },

    /// An INSERT VALUES tuple does not match the column list.
    #[error("INSERT VALUES tuple has {actual} values for {expected} columns")]
    InvalidInsertValues {
        /// Number of columns in the column list.
        expected: usize,
        /// Number of values in the tuple.
        actual: usize,
    },

    /// Nothing would be left to project in the discovery statement.
    #[error("statement has no projectable columns")]
    EmptyProjection,

    /// A procedure name could not be split into its parts.
    #[error("invalid procedure name: {0}")]
    InvalidProcedureName(String),
}

/// Result type for SQL text processing.
pub type Result<T> = std::result::Result<T, SqlError>;
