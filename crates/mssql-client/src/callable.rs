//! Callable statements and OUTPUT parameter retrieval.
//!
//! A stored procedure's OUTPUT values arrive as RETURNVALUE tokens after all
//! of its result sets, in an order chosen by the server (small values first,
//! large values last). [`CallableStatement`] walks the response lazily:
//!
//! 1. Result sets and row counts are consumed up to the first RETURNVALUE.
//! 2. Asking for parameter *n* locates RETURNVALUE tokens one at a time,
//!    remembering where each one is, until the token for *n* is found.
//! 3. Closing the statement (or re-executing it) discards the values that
//!    were not read and drains the rest of the batch so that environment
//!    changes still reach the session.
//!
//! A RETURNVALUE whose ordinal does not map onto a registered OUTPUT
//! parameter means the response and the statement disagree. The session is
//! terminated and [`Error::InvalidProtocolState`] is returned.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use mssql_client::{CallableStatement, SessionState, SqlType};
//!
//! let session = Arc::new(SessionState::new("sales"));
//! let mut stmt = CallableStatement::new(session, "{? = call dbo.usp_place_order(?, ?)}")?;
//! stmt.register_out_parameter(1, SqlType::Int)?;
//! stmt.register_out_parameter(3, SqlType::BigInt)?;
//! stmt.execute(&executor).await?;
//!
//! let order_id = stmt.get_i64(3)?;
//! let status = stmt.get_i64(1)?;
//! stmt.close()?;
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use mssql_sql::{CallSyntax, ProcedureName};
use tds_protocol::{
    CekTableEntry, Done, EnvChange, ReturnValue, ServerMessage, TdsReader, TdsReaderMark,
    TokenFlow, TokenHandler, parse,
};

use crate::discovery::FirstResult;
use crate::encryption::{KeyDecryptor, ParamCryptoMetadata};
use crate::error::{Error, Result};
use crate::message::{Diagnostics, MessageHandler, ResponseObserver};
use crate::metadata_cache::MetadataCache;
use crate::params::{OutValue, OutputRegistration, Parameter, SqlType, return_status_value};
use crate::session::{ConnectionSession, StatementExecutor, invalid_protocol_state};

/// Column of the `sp_sproc_columns` result holding the parameter name.
const SPROC_COLUMN_NAME: usize = 3;

/// What a parse pass is looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Seek {
    /// Stop before the first OUTPUT value or batch boundary.
    Results,
    /// Stop after the next RETURNVALUE.
    OutParam,
    /// Stop after the DONE that ends the current RPC.
    BatchEnd,
}

struct StatementHandler<'a> {
    seek: Seek,
    observer: ResponseObserver<'a>,
    found: Option<(TdsReaderMark, u16)>,
    return_status: Option<i32>,
    batch_boundary: bool,
}

impl TokenHandler for StatementHandler<'_> {
    type Error = Error;

    fn on_return_status(&mut self, _mark: TdsReaderMark, status: i32) -> Result<TokenFlow> {
        self.return_status = Some(status);
        Ok(TokenFlow::Continue)
    }

    fn on_return_value(&mut self, mark: TdsReaderMark, value: &ReturnValue) -> Result<TokenFlow> {
        match self.seek {
            Seek::Results => Ok(TokenFlow::StopBefore),
            Seek::OutParam => {
                tracing::trace!(ordinal = value.param_ordinal, offset = mark.position(), "return value");
                self.found = Some((mark, value.param_ordinal));
                Ok(TokenFlow::Stop)
            }
            Seek::BatchEnd => Ok(TokenFlow::Continue),
        }
    }

    fn on_done(&mut self, _mark: TdsReaderMark, done: &Done) -> Result<TokenFlow> {
        if !done.was_rpc_in_batch() {
            return Ok(TokenFlow::Continue);
        }
        match self.seek {
            // The next RPC's values must not be mistaken for this one's.
            Seek::Results | Seek::OutParam => Ok(TokenFlow::StopBefore),
            Seek::BatchEnd => {
                self.batch_boundary = true;
                Ok(TokenFlow::Stop)
            }
        }
    }

    fn on_error(&mut self, _mark: TdsReaderMark, message: &ServerMessage) -> Result<TokenFlow> {
        self.observer.error(message);
        Ok(TokenFlow::Continue)
    }

    fn on_info(&mut self, _mark: TdsReaderMark, message: &ServerMessage) -> Result<TokenFlow> {
        self.observer.info(message);
        Ok(TokenFlow::Continue)
    }

    fn on_env_change(&mut self, _mark: TdsReaderMark, change: &EnvChange) -> Result<TokenFlow> {
        self.observer.env_change(change);
        Ok(TokenFlow::Continue)
    }
}

struct PassOutcome {
    found: Option<(TdsReaderMark, u16)>,
    return_status: Option<i32>,
    batch_boundary: bool,
}

/// A stored procedure call with OUTPUT parameters.
pub struct CallableStatement {
    sql: String,
    call: CallSyntax,
    params: Vec<Parameter>,
    n_out_params: usize,
    n_out_params_assigned: usize,
    out_param_index: Option<usize>,
    last_accessed: Option<usize>,
    index_adjustment: i64,
    reader: Option<TdsReader>,
    results_done: bool,
    return_status: Option<i32>,
    parameter_names: Option<Vec<String>>,
    session: Arc<dyn ConnectionSession>,
    message_handler: Option<Arc<dyn MessageHandler>>,
    diagnostics: Diagnostics,
}

impl fmt::Debug for CallableStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallableStatement")
            .field("procedure", &self.call.procedure)
            .field("params", &self.params.len())
            .field("out_params", &self.n_out_params)
            .field("executed", &self.reader.is_some())
            .finish_non_exhaustive()
    }
}

impl CallableStatement {
    /// Prepare a call such as `{? = call dbo.proc(?, ?)}` or
    /// `EXEC dbo.proc ?, ?`.
    pub fn new(session: Arc<dyn ConnectionSession>, sql: impl Into<String>) -> Result<Self> {
        let sql = sql.into();
        let call = CallSyntax::parse(&sql)?;
        let params = vec![Parameter::new(); call.parameter_count];
        // The return status is not sent as an RPC parameter, so RETURNVALUE
        // ordinals start one slot later.
        let index_adjustment = -i64::from(call.return_value_syntax);
        Ok(Self {
            sql,
            call,
            params,
            n_out_params: 0,
            n_out_params_assigned: 0,
            out_param_index: None,
            last_accessed: None,
            index_adjustment,
            reader: None,
            results_done: false,
            return_status: None,
            parameter_names: None,
            session,
            message_handler: None,
            diagnostics: Diagnostics::default(),
        })
    }

    /// Route server messages through `handler`.
    #[must_use]
    pub fn with_message_handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.message_handler = Some(handler);
        self
    }

    /// Declare how many parameters the driver injects ahead of the
    /// application's own when it wraps the call (for example in
    /// `sp_executesql`). Server ordinals are shifted back by this amount.
    pub fn set_injected_parameters(&mut self, count: u16) {
        self.index_adjustment = i64::from(count) - i64::from(self.call.return_value_syntax);
    }

    /// Statement text.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Parsed call.
    #[must_use]
    pub fn call(&self) -> &CallSyntax {
        &self.call
    }

    /// All parameters, in call order.
    #[must_use]
    pub fn parameters(&self) -> &[Parameter] {
        &self.params
    }

    /// Replace the Always Encrypted metadata of parameter `index` (1-based).
    pub fn set_parameter_crypto(
        &mut self,
        index: usize,
        crypto: Option<ParamCryptoMetadata>,
    ) -> Result<()> {
        let slot = self.slot(index)?;
        self.params[slot].set_crypto(crypto);
        Ok(())
    }

    /// Messages collected from the current response.
    #[must_use]
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// The procedure's return status, once results were processed.
    #[must_use]
    pub fn return_status(&self) -> Option<i32> {
        self.return_status
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register parameter `index` (1-based) for output.
    ///
    /// Registering discards the results of any previous execution.
    pub fn register_out_parameter(&mut self, index: usize, sql_type: SqlType) -> Result<()> {
        let slot = self.slot(index)?;
        let registration = OutputRegistration::new(sql_type)?;
        self.discard_last_execution_results()?;

        let param = &mut self.params[slot];
        if !param.is_output() {
            self.n_out_params += 1;
        }
        param.register_for_output(registration);
        tracing::trace!(index = index, sql_type = ?registration.sql_type, "registered output parameter");
        Ok(())
    }

    /// Register parameter `index` for output with an explicit scale.
    pub fn register_out_parameter_with_scale(
        &mut self,
        index: usize,
        sql_type: SqlType,
        scale: u8,
    ) -> Result<()> {
        self.register_out_parameter(index, sql_type)?;
        self.params[index - 1].set_out_scale(scale);
        Ok(())
    }

    /// Register parameter `index` for output with an explicit precision
    /// (or length) and scale.
    pub fn register_out_parameter_with_precision(
        &mut self,
        index: usize,
        sql_type: SqlType,
        precision: u32,
        scale: u8,
    ) -> Result<()> {
        self.register_out_parameter(index, sql_type)?;
        let param = &mut self.params[index - 1];
        param.set_out_precision(precision);
        param.set_out_scale(scale);
        Ok(())
    }

    fn slot(&self, index: usize) -> Result<usize> {
        if index == 0 || index > self.params.len() {
            return Err(Error::ParameterIndexOutOfRange {
                index,
                count: self.params.len(),
            });
        }
        Ok(index - 1)
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Execute the call through `executor`.
    pub async fn execute(&mut self, executor: &dyn StatementExecutor) -> Result<()> {
        self.discard_last_execution_results()?;
        let response = executor.execute(&self.sql).await?;
        self.set_response(response)
    }

    /// Install the response to a previous execution of this call.
    pub fn set_response(&mut self, response: Bytes) -> Result<()> {
        self.discard_last_execution_results()?;
        self.reader = Some(TdsReader::new(response).with_column_encryption(self.session.column_encryption()));
        self.diagnostics.clear();
        self.return_status = None;
        self.start_results();
        Ok(())
    }

    // The previous response is released even when draining it fails.
    fn discard_last_execution_results(&mut self) -> Result<()> {
        let drained = if self.reader.is_some() {
            self.process_batch()
        } else {
            Ok(())
        };
        self.release_response();
        drained
    }

    fn release_response(&mut self) {
        self.reader = None;
        for param in &mut self.params {
            param.reset_output_value();
        }
    }

    fn start_results(&mut self) {
        self.out_param_index = None;
        self.n_out_params_assigned = 0;
        self.last_accessed = None;
        self.results_done = false;
    }

    /// Run one parse pass over the response.
    fn pass(&mut self, seek: Seek) -> Result<PassOutcome> {
        let reader = self.reader.as_mut().ok_or(Error::NotExecuted)?;
        let mut handler = StatementHandler {
            seek,
            observer: ResponseObserver {
                session: self.session.as_ref(),
                handler: self.message_handler.as_deref(),
                diagnostics: &mut self.diagnostics,
            },
            found: None,
            return_status: None,
            batch_boundary: false,
        };
        parse(reader, &mut handler)?;
        Ok(PassOutcome {
            found: handler.found,
            return_status: handler.return_status,
            batch_boundary: handler.batch_boundary,
        })
    }

    fn apply_return_status(&mut self, status: Option<i32>) {
        let Some(status) = status else { return };
        self.return_status = Some(status);
        if !self.call.return_value_syntax {
            return;
        }
        if let Some(slot) = self.params.first_mut() {
            if slot.is_output() && !slot.is_value_gotten() {
                slot.set_read(return_status_value(status));
                self.n_out_params_assigned += 1;
            }
        }
    }

    /// Consume result sets and row counts up to the OUTPUT values.
    fn process_results(&mut self) -> Result<()> {
        if self.results_done {
            return Ok(());
        }
        let outcome = self.pass(Seek::Results)?;
        self.apply_return_status(outcome.return_status);
        self.results_done = true;
        Ok(())
    }

    /// Locate the next `count` RETURNVALUE tokens.
    ///
    /// With `discard`, each previously located value is dropped as the next
    /// one is found. Returns `false` if the response ran out of RETURNVALUE
    /// tokens first.
    fn skip_out_parameters(&mut self, count: usize, discard: bool) -> Result<bool> {
        for _ in 0..count {
            if discard {
                if let Some(previous) = self.out_param_index {
                    self.params[previous].reset_output_value();
                }
            }

            let outcome = self.pass(Seek::OutParam)?;
            self.apply_return_status(outcome.return_status);
            let Some((mark, ordinal)) = outcome.found else {
                return Ok(false);
            };

            let adjusted = i64::from(ordinal) - self.index_adjustment;
            let slot = usize::try_from(adjusted)
                .ok()
                .filter(|&slot| self.params.get(slot).is_some_and(Parameter::is_output));
            let Some(slot) = slot else {
                return Err(invalid_protocol_state(
                    self.session.as_ref(),
                    format!(
                        "output parameter ordinal {ordinal} (adjustment {}) does not match a registered output parameter",
                        self.index_adjustment
                    ),
                ));
            };

            tracing::debug!(ordinal = ordinal, index = slot + 1, "located output parameter");
            self.params[slot].set_marked(mark);
            self.out_param_index = Some(slot);
            self.n_out_params_assigned += 1;
        }
        Ok(true)
    }

    fn missing_value(&self, index: usize) -> Error {
        match self.diagnostics.first_error() {
            Some(error) => Error::from(error),
            None => Error::ValueNotSet(index),
        }
    }

    // =========================================================================
    // OUTPUT values
    // =========================================================================

    /// The value of OUTPUT parameter `index` (1-based).
    pub fn get_out_parameter(&mut self, index: usize) -> Result<&ReturnValue> {
        let slot = self.slot(index)?;
        if !self.params[slot].is_output() {
            return Err(Error::ParameterNotRegistered(index));
        }
        if self.reader.is_none() {
            return Err(Error::NotExecuted);
        }

        self.process_results()?;

        if self.last_accessed != Some(slot) && !self.params[slot].is_value_gotten() {
            while self.out_param_index != Some(slot) {
                if self.n_out_params_assigned >= self.n_out_params
                    || !self.skip_out_parameters(1, false)?
                {
                    return Err(self.missing_value(index));
                }
            }
        }
        self.last_accessed = Some(slot);

        if let OutValue::Marked(mark) = *self.params[slot].value() {
            let reader = self.reader.as_ref().ok_or(Error::NotExecuted)?;
            let value = reader.return_value_at(mark)?;
            self.params[slot].set_read(value);
        }
        match self.params[slot].value() {
            OutValue::Read(value) => Ok(value),
            _ => Err(self.missing_value(index)),
        }
    }

    /// OUTPUT parameter `index` as an integer. `None` is SQL NULL.
    pub fn get_i64(&mut self, index: usize) -> Result<Option<i64>> {
        let value = self.get_out_parameter(index)?;
        if value.value.is_none() {
            return Ok(None);
        }
        value
            .as_i64()
            .map(Some)
            .ok_or_else(|| Error::UnsupportedType(format!("{:?} read as an integer", value.type_id)))
    }

    /// OUTPUT parameter `index` as Unicode text. `None` is SQL NULL.
    pub fn get_string(&mut self, index: usize) -> Result<Option<String>> {
        Ok(self.get_out_parameter(index)?.as_nstring()?)
    }

    /// OUTPUT parameter `index` as raw bytes. `None` is SQL NULL.
    pub fn get_bytes(&mut self, index: usize) -> Result<Option<Bytes>> {
        Ok(self.get_out_parameter(index)?.value.clone())
    }

    /// Drop every OUTPUT value of the current RPC, read or not.
    fn process_out_parameters(&mut self) -> Result<()> {
        for (i, param) in self.params.iter_mut().enumerate() {
            if Some(i) != self.out_param_index && param.is_value_gotten() {
                param.reset_output_value();
            }
        }

        if self.n_out_params_assigned < self.n_out_params {
            let remaining = self.n_out_params - self.n_out_params_assigned;
            // Running out early means the server stopped before sending
            // them, which is of no concern when they are discarded anyway.
            self.skip_out_parameters(remaining, true)?;
        }

        if let Some(last) = self.out_param_index.take() {
            self.params[last].reset_output_value();
        }
        self.last_accessed = None;
        Ok(())
    }

    /// Consume the rest of the current RPC.
    ///
    /// Stops at the DONE that closes this RPC within a batch of RPCs, ready
    /// for the next one, or at the end of the response.
    pub fn process_batch_remainder(&mut self) -> Result<()> {
        let outcome = self.pass(Seek::BatchEnd)?;
        if outcome.batch_boundary {
            tracing::debug!("batch boundary reached");
            self.start_results();
        }
        Ok(())
    }

    /// Finish the current RPC: skip its results, discard its OUTPUT values
    /// and consume everything up to the next RPC.
    pub fn process_batch(&mut self) -> Result<()> {
        self.process_results()?;
        if self.n_out_params > 0 {
            self.process_out_parameters()?;
        }
        self.process_batch_remainder()
    }

    /// Check if the response holds tokens not yet consumed.
    #[must_use]
    pub fn has_pending_results(&self) -> bool {
        self.reader.as_ref().is_some_and(|r| !r.is_end_of_response())
    }

    /// Drain the response and release it.
    pub fn close(&mut self) -> Result<()> {
        while self.has_pending_results() {
            if let Err(e) = self.process_batch() {
                self.release_response();
                return Err(e);
            }
        }
        self.discard_last_execution_results()
    }

    // =========================================================================
    // Named parameters
    // =========================================================================

    /// Resolve a parameter name to its 1-based call index.
    ///
    /// The procedure's parameter names are fetched once with
    /// `sp_sproc_columns` and kept for the statement's lifetime.
    pub async fn find_parameter_index(
        &mut self,
        name: &str,
        executor: &dyn StatementExecutor,
    ) -> Result<usize> {
        if self.parameter_names.is_none() {
            let procedure = ProcedureName::parse(&self.call.procedure)?;
            let response = executor.execute(&procedure.sproc_columns_query()).await?;
            let result = FirstResult::read(response, Some(self.session.as_ref()))?;
            let names = result
                .rows
                .iter()
                .filter_map(|row| row.get_nstring(SPROC_COLUMN_NAME).transpose())
                .map(|name| name.map(|n| n.trim().to_string()))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            tracing::debug!(procedure = %self.call.procedure, parameters = names.len(), "loaded procedure parameter names");
            self.parameter_names = Some(names);
        }
        let names = self.parameter_names.as_deref().unwrap_or_default();
        find_parameter_position(names, name, self.call.return_value_syntax)
    }

    // =========================================================================
    // Encryption metadata
    // =========================================================================

    /// Apply cached encryption metadata to the parameters.
    ///
    /// `names[i]` names parameter `i + 1`. See
    /// [`MetadataCache::get_query_metadata`].
    pub async fn lookup_parameter_metadata(
        &mut self,
        cache: &MetadataCache,
        names: &[String],
        decryptor: &dyn KeyDecryptor,
    ) -> Result<bool> {
        let database = self.session.database();
        cache
            .get_query_metadata(database.as_deref(), &self.sql, names, &mut self.params, decryptor)
            .await
    }

    /// Store the parameters' encryption metadata in `cache`.
    pub fn cache_parameter_metadata(
        &self,
        cache: &MetadataCache,
        names: &[String],
        enclave_keys: &BTreeMap<u16, CekTableEntry>,
    ) -> Result<bool> {
        let database = self.session.database();
        cache.add_query_metadata(database.as_deref(), &self.sql, names, &self.params, enclave_keys)
    }
}

/// Position of `name` among a procedure's parameter names.
///
/// `names` is the `sp_sproc_columns` list, which starts with
/// `@RETURN_VALUE`. The leading `@` is optional in `name`. An exact match
/// wins over a case-insensitive one. With return-value call syntax the
/// return status occupies index 1, so the position is shifted by one.
/// An empty list resolves to 1.
pub fn find_parameter_position(
    names: &[String],
    name: &str,
    return_value_syntax: bool,
) -> Result<usize> {
    if names.is_empty() {
        return Ok(1);
    }
    let wanted = name.strip_prefix('@').unwrap_or(name);
    let bare = |candidate: &String| {
        let mut chars = candidate.chars();
        chars.next();
        chars.as_str().to_string()
    };

    let position = names
        .iter()
        .position(|candidate| bare(candidate) == wanted)
        .or_else(|| {
            let wanted = wanted.to_lowercase();
            names
                .iter()
                .position(|candidate| bare(candidate).to_lowercase() == wanted)
        })
        .ok_or_else(|| Error::ParameterNotDefined(name.to_string()))?;

    Ok(if return_value_syntax { position + 1 } else { position })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::message::ServerNotice;
    use crate::session::SessionState;
    use mssql_testing::{MockColumn, ResponseBuilder, ScalarValue};

    fn statement(sql: &str) -> (Arc<SessionState>, CallableStatement) {
        let session = Arc::new(SessionState::new("master"));
        let stmt = CallableStatement::new(session.clone(), sql).unwrap();
        (session, stmt)
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_out_of_order_values() {
        let (_, mut stmt) = statement("{call dbo.usp_totals(?, ?, ?)}");
        stmt.register_out_parameter(1, SqlType::Int).unwrap();
        stmt.register_out_parameter(2, SqlType::NVarChar).unwrap();
        stmt.register_out_parameter(3, SqlType::BigInt).unwrap();
        stmt.set_response(
            ResponseBuilder::new()
                .columns(&[MockColumn::int("n")])
                .row(&[ScalarValue::Int(1)])
                .done_in_proc(true)
                .return_status(0)
                .return_value(0, "@a", ScalarValue::Int(10))
                .return_value(2, "@c", ScalarValue::BigInt(30))
                .return_value(1, "@b", ScalarValue::String("twenty".into()))
                .done_proc(false)
                .build(),
        )
        .unwrap();

        assert_eq!(stmt.get_string(2).unwrap().as_deref(), Some("twenty"));
        // Located while searching for 2, read from its mark.
        assert_eq!(stmt.get_i64(3).unwrap(), Some(30));
        assert_eq!(stmt.get_i64(1).unwrap(), Some(10));
        assert_eq!(stmt.get_i64(1).unwrap(), Some(10));
        assert_eq!(stmt.return_status(), Some(0));
        stmt.close().unwrap();
        assert!(!stmt.has_pending_results());
    }

    #[test]
    fn test_return_value_syntax() {
        let (_, mut stmt) = statement("{? = call usp_count(?)}");
        stmt.register_out_parameter(1, SqlType::Int).unwrap();
        stmt.register_out_parameter(2, SqlType::Int).unwrap();
        stmt.set_response(
            ResponseBuilder::new()
                .return_status(-4)
                .return_value(0, "@count", ScalarValue::Int(12))
                .done_proc(false)
                .build(),
        )
        .unwrap();

        assert_eq!(stmt.get_i64(2).unwrap(), Some(12));
        assert_eq!(stmt.get_i64(1).unwrap(), Some(-4));
    }

    #[test]
    fn test_null_output_value() {
        let (_, mut stmt) = statement("{call usp(?)}");
        stmt.register_out_parameter(1, SqlType::Int).unwrap();
        stmt.set_response(
            ResponseBuilder::new()
                .return_value(0, "@v", ScalarValue::Null)
                .done_proc(false)
                .build(),
        )
        .unwrap();
        assert_eq!(stmt.get_i64(1).unwrap(), None);
        assert_eq!(stmt.get_bytes(1).unwrap(), None);
    }

    #[test]
    fn test_getter_validation() {
        let (_, mut stmt) = statement("{call usp(?, ?)}");
        assert!(matches!(
            stmt.get_out_parameter(3),
            Err(Error::ParameterIndexOutOfRange { index: 3, count: 2 })
        ));
        assert!(matches!(stmt.get_out_parameter(1), Err(Error::ParameterNotRegistered(1))));
        stmt.register_out_parameter(1, SqlType::Int).unwrap();
        assert!(matches!(stmt.get_out_parameter(1), Err(Error::NotExecuted)));
        assert!(matches!(
            stmt.register_out_parameter(0, SqlType::Int),
            Err(Error::ParameterIndexOutOfRange { index: 0, .. })
        ));
        assert!(matches!(
            stmt.register_out_parameter(2, SqlType::RefCursor),
            Err(Error::UnsupportedType(_))
        ));
    }

    #[test]
    fn test_registration_scale_variants() {
        let (_, mut stmt) = statement("{call usp(?, ?, ?)}");
        stmt.register_out_parameter(1, SqlType::DateTimeOffset).unwrap();
        stmt.register_out_parameter_with_scale(2, SqlType::Time, 3).unwrap();
        stmt.register_out_parameter_with_precision(3, SqlType::Decimal, 18, 4).unwrap();
        // Re-registering does not count twice.
        stmt.register_out_parameter(1, SqlType::Array).unwrap();

        let params = stmt.parameters();
        assert_eq!(params[0].output().unwrap().sql_type, SqlType::Binary);
        assert_eq!(params[1].output().unwrap().scale, Some(3));
        let decimal = params[2].output().unwrap();
        assert_eq!((decimal.precision, decimal.scale), (Some(18), Some(4)));
        assert_eq!(stmt.n_out_params, 3);
    }

    #[test]
    fn test_missing_value_reports_server_error() {
        let (_, mut stmt) = statement("{call usp(?)}");
        stmt.register_out_parameter(1, SqlType::Int).unwrap();
        stmt.set_response(
            ResponseBuilder::new()
                .error(547, 16, "The INSERT statement conflicted with the FOREIGN KEY constraint")
                .done_proc(false)
                .build(),
        )
        .unwrap();
        let err = stmt.get_out_parameter(1).unwrap_err();
        assert!(err.is_server_error(547));

        // Closing tolerates the missing value.
        stmt.close().unwrap();
    }

    #[test]
    fn test_missing_value_without_error() {
        let (_, mut stmt) = statement("{call usp(?)}");
        stmt.register_out_parameter(1, SqlType::Int).unwrap();
        stmt.set_response(ResponseBuilder::new().done_proc(false).build()).unwrap();
        assert!(matches!(stmt.get_out_parameter(1), Err(Error::ValueNotSet(1))));
    }

    #[test]
    fn test_truncated_response_released_after_error() {
        let (_, mut stmt) = statement("{call dbo.usp_one(?)}");
        stmt.register_out_parameter(1, SqlType::Int).unwrap();
        let good = ResponseBuilder::new()
            .return_value(0, "@a", ScalarValue::Int(5))
            .done_proc(false)
            .build();
        let truncated = good.slice(..good.len() - 3);

        stmt.set_response(truncated.clone()).unwrap();
        assert!(matches!(stmt.set_response(good.clone()), Err(Error::Protocol(_))));
        // The decode error is reported once; the broken response is gone.
        stmt.set_response(good.clone()).unwrap();
        assert_eq!(stmt.get_i64(1).unwrap(), Some(5));

        stmt.set_response(truncated).unwrap();
        assert!(matches!(stmt.close(), Err(Error::Protocol(_))));
        assert!(!stmt.has_pending_results());
        stmt.register_out_parameter(1, SqlType::Int).unwrap();
        stmt.set_response(good).unwrap();
        assert_eq!(stmt.get_i64(1).unwrap(), Some(5));
        stmt.close().unwrap();
    }

    #[test]
    fn test_parameter_crypto_keeps_output_registration() {
        let (_, mut stmt) = statement("{call usp(?, ?)}");
        stmt.set_parameter_crypto(2, Some(crate::encryption::tests::crypto(7))).unwrap();
        assert!(matches!(
            stmt.set_parameter_crypto(3, None),
            Err(Error::ParameterIndexOutOfRange { index: 3, count: 2 })
        ));
        assert!(stmt.parameters()[1].crypto().is_some());
        assert!(!stmt.parameters()[1].is_output());

        stmt.register_out_parameter(2, SqlType::Int).unwrap();
        stmt.set_parameter_crypto(2, None).unwrap();
        stmt.set_response(
            ResponseBuilder::new()
                .return_value(1, "@b", ScalarValue::Int(9))
                .done_proc(false)
                .build(),
        )
        .unwrap();
        assert_eq!(stmt.get_i64(2).unwrap(), Some(9));
        assert!(stmt.parameters()[1].crypto().is_none());
    }

    #[test]
    fn test_unexpected_ordinal_terminates_session() {
        let (session, mut stmt) = statement("{call usp(?, ?)}");
        stmt.register_out_parameter(1, SqlType::Int).unwrap();
        stmt.set_response(
            ResponseBuilder::new()
                .return_value(1, "@b", ScalarValue::Int(2))
                .done_proc(false)
                .build(),
        )
        .unwrap();
        let err = stmt.get_out_parameter(1).unwrap_err();
        assert!(matches!(err, Error::InvalidProtocolState { .. }));
        assert!(session.is_terminated());
    }

    #[test]
    fn test_injected_parameter_adjustment() {
        let (_, mut stmt) = statement("{call usp(?)}");
        stmt.set_injected_parameters(2);
        stmt.register_out_parameter(1, SqlType::Int).unwrap();
        stmt.set_response(
            ResponseBuilder::new()
                .return_value(2, "@v", ScalarValue::Int(99))
                .done_proc(false)
                .build(),
        )
        .unwrap();
        assert_eq!(stmt.get_i64(1).unwrap(), Some(99));
    }

    #[test]
    fn test_batched_rpcs() {
        let (session, mut stmt) = statement("{call usp(?)}");
        stmt.register_out_parameter(1, SqlType::Int).unwrap();
        stmt.set_response(
            ResponseBuilder::new()
                .return_value(0, "@v", ScalarValue::Int(1))
                .rpc_in_batch_end()
                .database_change("sales", "master")
                .return_value(0, "@v", ScalarValue::Int(2))
                .done_proc(false)
                .build(),
        )
        .unwrap();

        assert_eq!(stmt.get_i64(1).unwrap(), Some(1));
        stmt.process_batch().unwrap();
        assert!(stmt.has_pending_results());
        assert_eq!(stmt.get_i64(1).unwrap(), Some(2));
        assert_eq!(session.database().as_deref(), Some("sales"));
        stmt.process_batch().unwrap();
        assert!(!stmt.has_pending_results());
    }

    #[test]
    fn test_value_search_does_not_cross_batch_boundary() {
        let (_, mut stmt) = statement("{call usp(?, ?)}");
        stmt.register_out_parameter(1, SqlType::Int).unwrap();
        stmt.register_out_parameter(2, SqlType::Int).unwrap();
        stmt.set_response(
            ResponseBuilder::new()
                .return_value(0, "@a", ScalarValue::Int(1))
                .rpc_in_batch_end()
                .return_value(1, "@b", ScalarValue::Int(2))
                .return_value(0, "@a", ScalarValue::Int(3))
                .done_proc(false)
                .build(),
        )
        .unwrap();
        assert!(matches!(stmt.get_out_parameter(2), Err(Error::ValueNotSet(2))));
    }

    #[test]
    fn test_message_handler_and_warnings() {
        let session = Arc::new(SessionState::new("master"));
        let handler = |notice: ServerNotice| {
            if notice.message().number == 2627 {
                Some(notice.into_info())
            } else {
                Some(notice)
            }
        };
        let mut stmt = CallableStatement::new(session, "{call usp(?)}")
            .unwrap()
            .with_message_handler(Arc::new(handler));
        stmt.register_out_parameter(1, SqlType::Int).unwrap();
        stmt.set_response(
            ResponseBuilder::new()
                .error(2627, 14, "Violation of PRIMARY KEY constraint")
                .info(50001, "progress")
                .done_proc(false)
                .build(),
        )
        .unwrap();

        assert!(matches!(stmt.get_out_parameter(1), Err(Error::ValueNotSet(1))));
        assert!(stmt.diagnostics().errors().is_empty());
        assert_eq!(stmt.diagnostics().warnings().len(), 2);
    }

    #[test]
    fn test_reregistration_discards_previous_results() {
        let (_, mut stmt) = statement("{call usp(?)}");
        stmt.register_out_parameter(1, SqlType::Int).unwrap();
        stmt.set_response(
            ResponseBuilder::new()
                .return_value(0, "@v", ScalarValue::Int(5))
                .done_proc(false)
                .build(),
        )
        .unwrap();
        assert_eq!(stmt.get_i64(1).unwrap(), Some(5));

        stmt.register_out_parameter(1, SqlType::BigInt).unwrap();
        assert!(matches!(stmt.get_out_parameter(1), Err(Error::NotExecuted)));
    }

    #[test]
    fn test_find_parameter_position() {
        let list = names(&["@RETURN_VALUE", "@OrderId", "@status"]);
        assert_eq!(find_parameter_position(&list, "@OrderId", false).unwrap(), 1);
        assert_eq!(find_parameter_position(&list, "orderid", false).unwrap(), 1);
        assert_eq!(find_parameter_position(&list, "status", true).unwrap(), 3);
        assert_eq!(find_parameter_position(&[], "anything", false).unwrap(), 1);
        assert!(matches!(
            find_parameter_position(&list, "@missing", false),
            Err(Error::ParameterNotDefined(name)) if name == "@missing"
        ));
    }

    #[test]
    fn test_exact_match_preferred_over_case_insensitive() {
        let list = names(&["@RETURN_VALUE", "@ID", "@id"]);
        assert_eq!(find_parameter_position(&list, "id", false).unwrap(), 2);
        assert_eq!(find_parameter_position(&list, "Id", false).unwrap(), 1);
    }
}
