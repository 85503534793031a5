//! Scripted statement executor.
//!
//! [`MockExecutor`] answers SQL text with pre-built responses, so statement
//! logic can be driven without a server.
//!
//! ## Example
//!
//! ```rust,ignore
//! use mssql_testing::{MockExecutor, MockResponse, ResponseBuilder};
//!
//! let executor = MockExecutor::new()
//!     .with_response("exec sp_sproc_columns @procedure_name=usp_orders , @ODBCVer=3", response)
//!     .with_default_response(MockResponse::Error("unexpected statement".into()));
//! let index = stmt.find_parameter_index("@count", &executor).await?;
//! assert_eq!(executor.executed().len(), 1);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use mssql_client::{Error, StatementExecutor};
use parking_lot::Mutex;

/// Scripted answer to one statement.
#[derive(Clone)]
pub enum MockResponse {
    /// Return this encoded response.
    Raw(Bytes),
    /// Fail the execution.
    Error(String),
    /// Compute the answer from the SQL text.
    Custom(Arc<dyn Fn(&str) -> MockResponse + Send + Sync>),
}

impl fmt::Debug for MockResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw(data) => f.debug_tuple("Raw").field(&data.len()).finish(),
            Self::Error(message) => f.debug_tuple("Error").field(message).finish(),
            Self::Custom(_) => f.debug_tuple("Custom").field(&"<fn>").finish(),
        }
    }
}

impl MockResponse {
    fn resolve(&self, sql: &str) -> Result<Bytes, Error> {
        match self {
            Self::Raw(data) => Ok(data.clone()),
            Self::Error(message) => Err(Error::Execution(message.clone())),
            Self::Custom(f) => f(sql).resolve(sql),
        }
    }
}

/// A [`StatementExecutor`] that replays scripted responses and records
/// every statement it was asked to run.
#[derive(Debug, Default)]
pub struct MockExecutor {
    responses: HashMap<String, MockResponse>,
    default_response: Option<MockResponse>,
    executed: Mutex<Vec<String>>,
}

impl MockExecutor {
    /// Create an executor with no scripted responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `sql` with `response`.
    pub fn with_response(mut self, sql: impl Into<String>, response: Bytes) -> Self {
        self.responses.insert(sql.into(), MockResponse::Raw(response));
        self
    }

    /// Fail executions of `sql`.
    pub fn with_error(mut self, sql: impl Into<String>, message: impl Into<String>) -> Self {
        self.responses
            .insert(sql.into(), MockResponse::Error(message.into()));
        self
    }

    /// Answer any unscripted statement with `response`.
    pub fn with_default_response(mut self, response: MockResponse) -> Self {
        self.default_response = Some(response);
        self
    }

    /// Statements executed so far, in order.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }
}

#[async_trait::async_trait]
impl StatementExecutor for MockExecutor {
    async fn execute(&self, sql: &str) -> mssql_client::Result<Bytes> {
        self.executed.lock().push(sql.to_string());
        tracing::trace!(sql = sql, "mock execution");
        match self.responses.get(sql).or(self.default_response.as_ref()) {
            Some(response) => response.resolve(sql),
            None => Err(Error::Execution(format!("no scripted response for: {sql}"))),
        }
    }
}
