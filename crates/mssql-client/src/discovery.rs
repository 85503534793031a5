//! Parameter metadata discovery.
//!
//! A parameterized statement's parameter types are discovered by running an
//! FMTONLY rewrite of it: the server answers with the column metadata of the
//! rewritten projection, one column per parameter target, without executing
//! anything.

use bytes::Bytes;
use tds_protocol::{
    ColMetaData, ColumnData, EnvChange, Row, ServerMessage, TdsReader, TdsReaderMark, TokenFlow,
    TokenHandler, parse,
};

use crate::error::{Error, Result};
use crate::session::{ConnectionSession, StatementExecutor};

/// Describe the parameters of `sql`.
///
/// Returns the columns of the FMTONLY result, in the order the rewriter
/// rendered the parameter targets. Statements the rewriter refuses surface
/// as [`Error::Sql`] so the caller can fall back to another strategy.
pub async fn describe_parameters(
    executor: &dyn StatementExecutor,
    sql: &str,
) -> Result<Vec<ColumnData>> {
    let discovery = mssql_sql::rewrite(sql)?;
    let response = executor.execute(&discovery).await?;
    let result = FirstResult::read(response, None)?;
    tracing::debug!(columns = result.columns.len(), "described statement parameters");
    Ok(result.columns)
}

/// Columns and rows of the first result set in a response.
#[derive(Debug, Default)]
pub(crate) struct FirstResult {
    pub(crate) columns: Vec<ColumnData>,
    pub(crate) rows: Vec<Row>,
}

impl FirstResult {
    /// Read the first result set. The first server error, if any, fails
    /// the read. Database changes are reported to `session`.
    pub(crate) fn read(response: Bytes, session: Option<&dyn ConnectionSession>) -> Result<Self> {
        let mut collector = Collector {
            result: Self::default(),
            results_seen: 0,
            first_error: None,
            session,
        };
        parse(&mut TdsReader::new(response), &mut collector)?;
        match collector.first_error {
            Some(error) => Err(Error::from(&error)),
            None => Ok(collector.result),
        }
    }
}

struct Collector<'a> {
    result: FirstResult,
    results_seen: usize,
    first_error: Option<ServerMessage>,
    session: Option<&'a dyn ConnectionSession>,
}

impl TokenHandler for Collector<'_> {
    type Error = Error;

    fn on_col_metadata(&mut self, _mark: TdsReaderMark, metadata: &ColMetaData) -> Result<TokenFlow> {
        self.results_seen += 1;
        if self.results_seen == 1 {
            self.result.columns = metadata.columns.clone();
        }
        Ok(TokenFlow::Continue)
    }

    fn on_row(&mut self, _mark: TdsReaderMark, row: &Row) -> Result<TokenFlow> {
        if self.results_seen == 1 {
            self.result.rows.push(row.clone());
        }
        Ok(TokenFlow::Continue)
    }

    fn on_error(&mut self, _mark: TdsReaderMark, message: &ServerMessage) -> Result<TokenFlow> {
        if self.first_error.is_none() {
            self.first_error = Some(message.clone());
        }
        Ok(TokenFlow::Continue)
    }

    fn on_env_change(&mut self, _mark: TdsReaderMark, change: &EnvChange) -> Result<TokenFlow> {
        if let (Some(session), Some(database)) = (self.session, change.new_database()) {
            session.set_database(database);
        }
        Ok(TokenFlow::Continue)
    }
}
