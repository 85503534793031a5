//! Builder for encoded TDS response token streams.
//!
//! Responses are assembled token by token, in the order a server would send
//! them, and returned as one buffer ready for a `TdsReader`.
//!
//! ## Example
//!
//! ```rust
//! use mssql_testing::{ResponseBuilder, ScalarValue};
//!
//! // `{? = call dbo.usp_total(?, ?)}` where both arguments are OUTPUT.
//! let response = ResponseBuilder::new()
//!     .return_status(0)
//!     .return_value(0, "@total", ScalarValue::Int(42))
//!     .return_value(1, "@label", ScalarValue::String("ok".into()))
//!     .done_proc(false)
//!     .build();
//! assert!(!response.is_empty());
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use tds_protocol::codec::{write_b_varchar, write_us_varchar};
use tds_protocol::token::RETURN_VALUE_OUTPUT;
use tds_protocol::types::column_flags;
use tds_protocol::{Done, DoneKind, DoneStatus, TokenType, TypeId};

// ENVCHANGE type byte for a database change.
const DATABASE_ENV_CHANGE: u8 = 1;

/// Scalar value carried by a ROW or RETURNVALUE token.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    /// NULL value, sent as a nullable INT.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    BigInt(i64),
    /// 64-bit float.
    Double(f64),
    /// String value.
    String(String),
    /// Binary data.
    Binary(Vec<u8>),
}

impl ScalarValue {
    fn column(&self, name: &str) -> MockColumn {
        match self {
            Self::Null | Self::Int(_) => MockColumn::int(name),
            Self::Bool(_) => MockColumn::new(name, TypeId::BitN).with_max_length(1),
            Self::BigInt(_) => MockColumn::bigint(name),
            Self::Double(_) => MockColumn::new(name, TypeId::FloatN).with_max_length(8),
            Self::String(_) => MockColumn::nvarchar(name, 4000),
            Self::Binary(_) => MockColumn::new(name, TypeId::BigVarBinary).with_max_length(8000),
        }
    }

    fn encode(&self, dst: &mut BytesMut) {
        match self {
            Self::Null => dst.put_u8(0),
            Self::Bool(v) => {
                dst.put_u8(1);
                dst.put_u8(u8::from(*v));
            }
            Self::Int(v) => {
                dst.put_u8(4);
                dst.put_i32_le(*v);
            }
            Self::BigInt(v) => {
                dst.put_u8(8);
                dst.put_i64_le(*v);
            }
            Self::Double(v) => {
                dst.put_u8(8);
                dst.put_f64_le(*v);
            }
            Self::String(s) => {
                let utf16: Vec<u16> = s.encode_utf16().collect();
                dst.put_u16_le(u16::try_from(utf16.len() * 2).unwrap_or(u16::MAX));
                for c in utf16 {
                    dst.put_u16_le(c);
                }
            }
            Self::Binary(data) => {
                dst.put_u16_le(u16::try_from(data.len()).unwrap_or(u16::MAX));
                dst.extend_from_slice(data);
            }
        }
    }
}

/// Column definition for a COLMETADATA token.
#[derive(Debug, Clone)]
pub struct MockColumn {
    /// Column name.
    pub name: String,
    /// Column type.
    pub type_id: TypeId,
    /// Maximum length (for variable-length types).
    pub max_length: Option<u32>,
    /// Whether the column is nullable.
    pub nullable: bool,
}

impl MockColumn {
    /// Create a new column definition.
    pub fn new(name: impl Into<String>, type_id: TypeId) -> Self {
        Self {
            name: name.into(),
            type_id,
            max_length: None,
            nullable: true,
        }
    }

    /// Create an INT column.
    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, TypeId::IntN).with_max_length(4)
    }

    /// Create a BIGINT column.
    pub fn bigint(name: impl Into<String>) -> Self {
        Self::new(name, TypeId::IntN).with_max_length(8)
    }

    /// Create an NVARCHAR column of `max_len` characters.
    pub fn nvarchar(name: impl Into<String>, max_len: u32) -> Self {
        Self::new(name, TypeId::NVarChar).with_max_length(max_len * 2)
    }

    /// Set the maximum length.
    pub fn with_max_length(mut self, len: u32) -> Self {
        self.max_length = Some(len);
        self
    }

    /// Set nullable flag.
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    fn encode_type_info(&self, dst: &mut BytesMut) {
        let max_length = self.max_length.unwrap_or(8000);
        match self.type_id {
            TypeId::IntN | TypeId::BitN | TypeId::FloatN | TypeId::MoneyN | TypeId::DateTimeN => {
                dst.put_u8(u8::try_from(max_length).unwrap_or(8));
            }
            TypeId::NVarChar | TypeId::NChar => {
                dst.put_u16_le(u16::try_from(max_length).unwrap_or(8000));
                dst.put_u32_le(0x0904_D000);
                dst.put_u8(0x34);
            }
            TypeId::BigVarBinary | TypeId::BigBinary => {
                dst.put_u16_le(u16::try_from(max_length).unwrap_or(8000));
            }
            _ => {}
        }
    }

    fn flags(&self) -> u16 {
        if self.nullable { column_flags::NULLABLE } else { 0 }
    }
}

/// Assembles a TDS response token by token.
#[derive(Debug, Default, Clone)]
pub struct ResponseBuilder {
    buf: BytesMut,
}

impl ResponseBuilder {
    /// Start an empty response.
    pub fn new() -> Self {
        Self::default()
    }

    /// COLMETADATA for `columns`.
    pub fn columns(mut self, columns: &[MockColumn]) -> Self {
        let dst = &mut self.buf;
        dst.put_u8(TokenType::ColMetaData as u8);
        dst.put_u16_le(u16::try_from(columns.len()).unwrap_or(u16::MAX));
        for col in columns {
            dst.put_u32_le(0);
            dst.put_u16_le(col.flags());
            dst.put_u8(col.type_id as u8);
            col.encode_type_info(dst);
            write_b_varchar(dst, &col.name);
        }
        self
    }

    /// ROW with `values` in column order.
    pub fn row(mut self, values: &[ScalarValue]) -> Self {
        self.buf.put_u8(TokenType::Row as u8);
        for value in values {
            value.encode(&mut self.buf);
        }
        self
    }

    /// An NVARCHAR result set: COLMETADATA, then one ROW per entry of
    /// `rows`. The closing DONE is left to the caller.
    pub fn nvarchar_result(self, names: &[&str], rows: &[&[&str]]) -> Self {
        let columns: Vec<MockColumn> = names.iter().map(|n| MockColumn::nvarchar(*n, 128)).collect();
        let mut builder = self.columns(&columns);
        for row in rows {
            let values: Vec<ScalarValue> = row.iter().map(|v| ScalarValue::String((*v).into())).collect();
            builder = builder.row(&values);
        }
        builder
    }

    /// RETURNSTATUS.
    pub fn return_status(mut self, status: i32) -> Self {
        self.buf.put_u8(TokenType::ReturnStatus as u8);
        self.buf.put_i32_le(status);
        self
    }

    /// RETURNVALUE for an OUTPUT parameter.
    pub fn return_value(mut self, ordinal: u16, name: &str, value: ScalarValue) -> Self {
        let column = value.column(name);
        let dst = &mut self.buf;
        dst.put_u8(TokenType::ReturnValue as u8);
        dst.put_u16_le(ordinal);
        write_b_varchar(dst, name);
        dst.put_u8(RETURN_VALUE_OUTPUT);
        dst.put_u32_le(0);
        dst.put_u16_le(column.flags());
        dst.put_u8(column.type_id as u8);
        column.encode_type_info(dst);
        value.encode(dst);
        self
    }

    fn done_token(mut self, kind: DoneKind, status: DoneStatus, row_count: u64) -> Self {
        Done {
            kind,
            status,
            cur_cmd: 0,
            row_count,
        }
        .encode(&mut self.buf);
        self
    }

    /// DONE.
    pub fn done(self, more: bool) -> Self {
        self.done_token(DoneKind::Done, DoneStatus { more, ..DoneStatus::default() }, 0)
    }

    /// DONE carrying a row count.
    pub fn done_count(self, rows: u64, more: bool) -> Self {
        let status = DoneStatus {
            more,
            count: true,
            ..DoneStatus::default()
        };
        self.done_token(DoneKind::Done, status, rows)
    }

    /// DONEINPROC.
    pub fn done_in_proc(self, more: bool) -> Self {
        self.done_token(DoneKind::DoneInProc, DoneStatus { more, ..DoneStatus::default() }, 0)
    }

    /// DONEPROC.
    pub fn done_proc(self, more: bool) -> Self {
        self.done_token(DoneKind::DoneProc, DoneStatus { more, ..DoneStatus::default() }, 0)
    }

    /// DONEPROC closing one RPC of a batch; the next RPC's tokens follow.
    pub fn rpc_in_batch_end(self) -> Self {
        let status = DoneStatus {
            more: true,
            rpc_in_batch: true,
            ..DoneStatus::default()
        };
        self.done_token(DoneKind::DoneProc, status, 0)
    }

    fn message(mut self, token: TokenType, number: i32, class: u8, message: &str) -> Self {
        let mut body = BytesMut::new();
        body.put_i32_le(number);
        body.put_u8(1);
        body.put_u8(class);
        write_us_varchar(&mut body, message);
        write_b_varchar(&mut body, "MockServer");
        write_b_varchar(&mut body, "");
        body.put_i32_le(1);

        self.buf.put_u8(token as u8);
        self.buf.put_u16_le(u16::try_from(body.len()).unwrap_or(u16::MAX));
        self.buf.extend_from_slice(&body);
        self
    }

    /// ERROR.
    pub fn error(self, number: i32, class: u8, message: &str) -> Self {
        self.message(TokenType::Error, number, class, message)
    }

    /// INFO.
    pub fn info(self, number: i32, message: &str) -> Self {
        self.message(TokenType::Info, number, 0, message)
    }

    /// ENVCHANGE switching the active database.
    pub fn database_change(mut self, new: &str, old: &str) -> Self {
        let mut body = BytesMut::new();
        body.put_u8(DATABASE_ENV_CHANGE);
        write_b_varchar(&mut body, new);
        write_b_varchar(&mut body, old);

        self.buf.put_u8(TokenType::EnvChange as u8);
        self.buf.put_u16_le(u16::try_from(body.len()).unwrap_or(u16::MAX));
        self.buf.extend_from_slice(&body);
        self
    }

    /// Append raw bytes.
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Finish the response.
    pub fn build(self) -> Bytes {
        self.buf.freeze()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use tds_protocol::{ParseStatus, TdsReader, Token, parse};

    fn tokens(response: Bytes) -> Vec<Token> {
        let mut reader = TdsReader::new(response);
        let mut out = Vec::new();
        while let Some(token) = reader.read_token().unwrap() {
            out.push(token);
        }
        out
    }

    #[test]
    fn test_result_set_decodes() {
        let response = ResponseBuilder::new()
            .nvarchar_result(&["COLUMN_NAME"], &[&["@RETURN_VALUE"], &["@id"]])
            .done_count(2, false)
            .build();
        let tokens = tokens(response);
        assert_eq!(tokens.len(), 4);
        match &tokens[2] {
            Token::Row(row) => assert_eq!(row.get_nstring(0).unwrap().as_deref(), Some("@id")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_return_values_decode() {
        let response = ResponseBuilder::new()
            .return_status(3)
            .return_value(0, "@a", ScalarValue::BigInt(-7))
            .return_value(1, "@b", ScalarValue::String("héllo".into()))
            .return_value(2, "@c", ScalarValue::Null)
            .rpc_in_batch_end()
            .build();
        let tokens = tokens(response);
        assert!(matches!(tokens[0], Token::ReturnStatus(3)));
        match (&tokens[1], &tokens[2], &tokens[3]) {
            (Token::ReturnValue(a), Token::ReturnValue(b), Token::ReturnValue(c)) => {
                assert_eq!(a.as_i64(), Some(-7));
                assert_eq!(b.as_nstring().unwrap().as_deref(), Some("héllo"));
                assert!(c.value.is_none());
                assert!(a.is_output());
            }
            other => panic!("unexpected {other:?}"),
        }
        match &tokens[4] {
            Token::Done(done) => assert!(done.was_rpc_in_batch()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_messages_and_env_change_decode() {
        let response = ResponseBuilder::new()
            .database_change("sales", "master")
            .info(5701, "Changed database context to 'sales'.")
            .error(547, 16, "constraint violation")
            .done(false)
            .build();
        let mut reader = TdsReader::new(response.clone());
        struct Nop;
        impl tds_protocol::TokenHandler for Nop {
            type Error = tds_protocol::ProtocolError;
        }
        assert_eq!(parse(&mut reader, &mut Nop).unwrap(), ParseStatus::EndOfResponse);

        let tokens = tokens(response);
        match (&tokens[0], &tokens[1], &tokens[2]) {
            (Token::EnvChange(env), Token::Info(info), Token::Error(err)) => {
                assert_eq!(env.new_database(), Some("sales"));
                assert_eq!(info.number, 5701);
                assert_eq!(err.class, 16);
                assert_eq!(err.server, "MockServer");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
