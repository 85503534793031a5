//! TDS token stream definitions.
//!
//! A server response is a sequence of tokens. Each token starts with a
//! one-byte type tag that determines the layout of what follows: some tokens
//! are fixed-size (DONE), some carry a length prefix (ERROR, ENVCHANGE), and
//! some can only be sized by walking their contents against column metadata
//! (ROW, NBCROW, RETURNVALUE).
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tds_protocol::reader::TdsReader;
//! use tds_protocol::token::Token;
//!
//! let mut reader = TdsReader::new(response);
//! while let Some(token) = reader.read_token()? {
//!     if let Token::Done(done) = token {
//!         println!("rows affected: {}", done.row_count);
//!     }
//! }
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::{ensure, read_b_varchar, read_us_varchar, utf16le_to_string};
use crate::crypto::{CekTable, CryptoMetadata};
use crate::error::ProtocolError;
use crate::types::{TypeId, ValueLength, column_flags};

/// Token type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TokenType {
    /// Offset of a statement keyword (OFFSET).
    Offset = 0x78,
    /// Return status of a stored procedure (RETURNSTATUS).
    ReturnStatus = 0x79,
    /// Column metadata (COLMETADATA).
    ColMetaData = 0x81,
    /// Table names for browse mode (TABNAME).
    TabName = 0xA4,
    /// Column info for browse mode (COLINFO).
    ColInfo = 0xA5,
    /// ORDER BY column list (ORDER).
    Order = 0xA9,
    /// Error message (ERROR).
    Error = 0xAA,
    /// Informational message (INFO).
    Info = 0xAB,
    /// OUT parameter or UDF return value (RETURNVALUE).
    ReturnValue = 0xAC,
    /// Row data (ROW).
    Row = 0xD1,
    /// Null bitmap compressed row (NBCROW).
    NbcRow = 0xD2,
    /// Environment change (ENVCHANGE).
    EnvChange = 0xE3,
    /// Session state (SESSIONSTATE).
    SessionState = 0xE4,
    /// Statement done (DONE).
    Done = 0xFD,
    /// Stored procedure done (DONEPROC).
    DoneProc = 0xFE,
    /// Statement inside a procedure done (DONEINPROC).
    DoneInProc = 0xFF,
}

impl TokenType {
    /// Create a token type from a raw byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        let token_type = match value {
            0x78 => Self::Offset,
            0x79 => Self::ReturnStatus,
            0x81 => Self::ColMetaData,
            0xA4 => Self::TabName,
            0xA5 => Self::ColInfo,
            0xA9 => Self::Order,
            0xAA => Self::Error,
            0xAB => Self::Info,
            0xAC => Self::ReturnValue,
            0xD1 => Self::Row,
            0xD2 => Self::NbcRow,
            0xE3 => Self::EnvChange,
            0xE4 => Self::SessionState,
            0xFD => Self::Done,
            0xFE => Self::DoneProc,
            0xFF => Self::DoneInProc,
            _ => return None,
        };
        Some(token_type)
    }

    /// Tokens the reader steps over without surfacing them.
    #[must_use]
    pub const fn is_skipped(&self) -> bool {
        matches!(
            self,
            Self::Offset | Self::TabName | Self::ColInfo | Self::SessionState
        )
    }
}

/// A decoded token.
#[derive(Debug, Clone)]
pub enum Token {
    /// Column metadata describing the next result set.
    ColMetaData(ColMetaData),
    /// One row of the current result set (ROW or NBCROW).
    Row(Row),
    /// Stored procedure return status.
    ReturnStatus(i32),
    /// OUT parameter value.
    ReturnValue(ReturnValue),
    /// DONE, DONEPROC or DONEINPROC.
    Done(Done),
    /// Server error message.
    Error(ServerMessage),
    /// Server informational message.
    Info(ServerMessage),
    /// Environment change notification.
    EnvChange(EnvChange),
    /// ORDER BY column ordinals.
    Order(Vec<u16>),
}

impl Token {
    /// The wire type of this token.
    #[must_use]
    pub fn token_type(&self) -> TokenType {
        match self {
            Self::ColMetaData(_) => TokenType::ColMetaData,
            Self::Row(_) => TokenType::Row,
            Self::ReturnStatus(_) => TokenType::ReturnStatus,
            Self::ReturnValue(_) => TokenType::ReturnValue,
            Self::Done(done) => done.kind.token_type(),
            Self::Error(_) => TokenType::Error,
            Self::Info(_) => TokenType::Info,
            Self::EnvChange(_) => TokenType::EnvChange,
            Self::Order(_) => TokenType::Order,
        }
    }
}

// =============================================================================
// Column metadata
// =============================================================================

/// Column metadata token.
#[derive(Debug, Clone, Default)]
pub struct ColMetaData {
    /// Column encryption keys referenced by encrypted columns.
    pub cek_table: Option<CekTable>,
    /// Column definitions.
    pub columns: Vec<ColumnData>,
}

/// Column definition within metadata.
#[derive(Debug, Clone)]
pub struct ColumnData {
    /// Column name.
    pub name: String,
    /// Column data type.
    pub type_id: TypeId,
    /// User type id.
    pub user_type: u32,
    /// Column flags.
    pub flags: u16,
    /// Type-specific metadata.
    pub type_info: TypeInfo,
    /// Always Encrypted metadata, present when the encrypted flag is set.
    pub crypto: Option<CryptoMetadata>,
}

/// Type-specific metadata (TYPE_INFO).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeInfo {
    /// Maximum length for variable-length types.
    pub max_length: Option<u32>,
    /// Precision for decimal types.
    pub precision: Option<u8>,
    /// Scale for decimal and time types.
    pub scale: Option<u8>,
    /// Collation for character types.
    pub collation: Option<Collation>,
}

/// SQL Server collation (LCID plus sort id).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Collation {
    /// Locale id and collation flags.
    pub lcid: u32,
    /// Sort id.
    pub sort_id: u8,
}

impl Collation {
    /// Wire size of a collation.
    pub const SIZE: usize = 5;

    fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        ensure(src, Self::SIZE)?;
        Ok(Self {
            lcid: src.get_u32_le(),
            sort_id: src.get_u8(),
        })
    }
}

impl TypeInfo {
    /// Decode TYPE_INFO for `type_id`.
    pub fn decode(src: &mut impl Buf, type_id: TypeId) -> Result<Self, ProtocolError> {
        let info = match type_id {
            TypeId::Null
            | TypeId::Int1
            | TypeId::Bit
            | TypeId::Int2
            | TypeId::Int4
            | TypeId::Int8
            | TypeId::Float4
            | TypeId::Float8
            | TypeId::Money
            | TypeId::Money4
            | TypeId::DateTime
            | TypeId::DateTime4
            | TypeId::Date => Self::default(),

            TypeId::IntN
            | TypeId::BitN
            | TypeId::FloatN
            | TypeId::MoneyN
            | TypeId::DateTimeN
            | TypeId::Guid
            | TypeId::Char
            | TypeId::VarChar
            | TypeId::Binary
            | TypeId::VarBinary => {
                ensure(src, 1)?;
                Self {
                    max_length: Some(u32::from(src.get_u8())),
                    ..Self::default()
                }
            }

            TypeId::Decimal | TypeId::Numeric | TypeId::DecimalN | TypeId::NumericN => {
                ensure(src, 3)?;
                Self {
                    max_length: Some(u32::from(src.get_u8())),
                    precision: Some(src.get_u8()),
                    scale: Some(src.get_u8()),
                    collation: None,
                }
            }

            TypeId::BigVarChar | TypeId::BigChar | TypeId::NVarChar | TypeId::NChar => {
                ensure(src, 2)?;
                let max_length = u32::from(src.get_u16_le());
                Self {
                    max_length: Some(max_length),
                    collation: Some(Collation::decode(src)?),
                    ..Self::default()
                }
            }

            TypeId::BigVarBinary | TypeId::BigBinary => {
                ensure(src, 2)?;
                Self {
                    max_length: Some(u32::from(src.get_u16_le())),
                    ..Self::default()
                }
            }

            TypeId::Time | TypeId::DateTime2 | TypeId::DateTimeOffset => {
                ensure(src, 1)?;
                Self {
                    scale: Some(src.get_u8()),
                    ..Self::default()
                }
            }

            TypeId::Text | TypeId::NText | TypeId::Image => {
                ensure(src, 4)?;
                let max_length = src.get_u32_le();
                let collation = if type_id.has_collation() {
                    Some(Collation::decode(src)?)
                } else {
                    None
                };
                Self {
                    max_length: Some(max_length),
                    collation,
                    ..Self::default()
                }
            }

            TypeId::Xml => {
                ensure(src, 1)?;
                if src.get_u8() != 0 {
                    read_b_varchar(src)?; // database
                    read_b_varchar(src)?; // owning schema
                    read_us_varchar(src)?; // schema collection
                }
                Self::default()
            }

            TypeId::Udt => {
                ensure(src, 2)?;
                let max_length = u32::from(src.get_u16_le());
                read_b_varchar(src)?; // database
                read_b_varchar(src)?; // schema
                read_b_varchar(src)?; // type name
                read_us_varchar(src)?; // assembly qualified name
                Self {
                    max_length: Some(max_length),
                    ..Self::default()
                }
            }

            TypeId::Variant => {
                ensure(src, 4)?;
                Self {
                    max_length: Some(src.get_u32_le()),
                    ..Self::default()
                }
            }

            TypeId::Tvp => return Err(ProtocolError::InvalidTokenType(TypeId::Tvp as u8)),
        };
        Ok(info)
    }
}

/// Read a type byte and resolve it.
pub(crate) fn decode_type_id(src: &mut impl Buf) -> Result<TypeId, ProtocolError> {
    ensure(src, 1)?;
    let raw = src.get_u8();
    TypeId::from_u8(raw).ok_or(ProtocolError::InvalidField {
        field: "type_id",
        value: u32::from(raw),
    })
}

impl ColMetaData {
    /// Column count announcing that no metadata follows.
    pub const NO_METADATA: u16 = 0xFFFF;

    /// Decode a COLMETADATA token body.
    ///
    /// `column_encryption` must match what the session negotiated: when it is
    /// on, a CEK table precedes the column definitions.
    pub fn decode(src: &mut impl Buf, column_encryption: bool) -> Result<Self, ProtocolError> {
        ensure(src, 2)?;
        let count = src.get_u16_le();
        if count == Self::NO_METADATA {
            return Ok(Self::default());
        }

        let cek_table = if column_encryption {
            Some(CekTable::decode(src)?)
        } else {
            None
        };

        let columns = (0..count)
            .map(|_| ColumnData::decode(src))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { cek_table, columns })
    }

    /// Number of columns.
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Check if this describes no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl ColumnData {
    fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        ensure(src, 6)?;
        let user_type = src.get_u32_le();
        let flags = src.get_u16_le();
        let type_id = decode_type_id(src)?;
        let type_info = TypeInfo::decode(src, type_id)?;

        if matches!(type_id, TypeId::Text | TypeId::NText | TypeId::Image) {
            ensure(src, 1)?;
            let parts = src.get_u8();
            for _ in 0..parts {
                read_us_varchar(src)?;
            }
        }

        let crypto = if flags & column_flags::ENCRYPTED != 0 {
            Some(CryptoMetadata::decode(src)?)
        } else {
            None
        };

        let name = read_b_varchar(src)?;

        Ok(Self {
            name,
            type_id,
            user_type,
            flags,
            type_info,
            crypto,
        })
    }

    /// Check if this column is nullable.
    #[must_use]
    pub fn is_nullable(&self) -> bool {
        self.flags & column_flags::NULLABLE != 0
    }

    /// Check if this column is encrypted.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.crypto.is_some()
    }
}

// =============================================================================
// Values and rows
// =============================================================================

const PLP_NULL: u64 = 0xFFFF_FFFF_FFFF_FFFF;

/// Decode one value of `type_id`. `None` is SQL NULL.
pub fn decode_value(
    src: &mut impl Buf,
    type_id: TypeId,
    type_info: &TypeInfo,
) -> Result<Option<Bytes>, ProtocolError> {
    let class = type_id
        .value_length(type_info.max_length)
        .ok_or(ProtocolError::InvalidTokenType(type_id as u8))?;

    match class {
        ValueLength::Fixed(0) => Ok(None),
        ValueLength::Fixed(n) => take(src, n).map(Some),
        ValueLength::Byte => {
            ensure(src, 1)?;
            let len = src.get_u8();
            let legacy_charbin = matches!(
                type_id,
                TypeId::Char | TypeId::VarChar | TypeId::Binary | TypeId::VarBinary
            );
            match (legacy_charbin, len) {
                (true, 0xFF) | (false, 0) => Ok(None),
                _ => take(src, usize::from(len)).map(Some),
            }
        }
        ValueLength::UShort => {
            ensure(src, 2)?;
            match src.get_u16_le() {
                0xFFFF => Ok(None),
                len => take(src, usize::from(len)).map(Some),
            }
        }
        ValueLength::Long => {
            ensure(src, 4)?;
            match src.get_u32_le() {
                0 | 0xFFFF_FFFF => Ok(None),
                len => take(src, len as usize).map(Some),
            }
        }
        ValueLength::TextPtr => {
            ensure(src, 1)?;
            let ptr_len = usize::from(src.get_u8());
            if ptr_len == 0 {
                return Ok(None);
            }
            // text pointer + 8-byte timestamp
            ensure(src, ptr_len + 8 + 4)?;
            src.advance(ptr_len + 8);
            let len = src.get_u32_le() as usize;
            take(src, len).map(Some)
        }
        ValueLength::Plp => decode_plp(src),
    }
}

fn decode_plp(src: &mut impl Buf) -> Result<Option<Bytes>, ProtocolError> {
    ensure(src, 8)?;
    let total = src.get_u64_le();
    if total == PLP_NULL {
        return Ok(None);
    }

    let mut out = BytesMut::new();
    loop {
        ensure(src, 4)?;
        let chunk = src.get_u32_le() as usize;
        if chunk == 0 {
            break;
        }
        ensure(src, chunk)?;
        out.extend_from_slice(&src.copy_to_bytes(chunk));
    }
    Ok(Some(out.freeze()))
}

fn take(src: &mut impl Buf, n: usize) -> Result<Bytes, ProtocolError> {
    if src.remaining() < n {
        return Err(ProtocolError::IncompletePacket {
            expected: n,
            actual: src.remaining(),
        });
    }
    Ok(src.copy_to_bytes(n))
}

/// One row of a result set. Each entry is the raw column value, `None` for NULL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    /// Column values in metadata order.
    pub values: Vec<Option<Bytes>>,
}

impl Row {
    /// Decode a ROW token body.
    pub fn decode(src: &mut impl Buf, metadata: &ColMetaData) -> Result<Self, ProtocolError> {
        let values = metadata
            .columns
            .iter()
            .map(|col| decode_value(src, col.type_id, &col.type_info))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { values })
    }

    /// Decode an NBCROW token body: a null bitmap, then only non-NULL values.
    pub fn decode_nbc(src: &mut impl Buf, metadata: &ColMetaData) -> Result<Self, ProtocolError> {
        let count = metadata.columns.len();
        let bitmap_len = count.div_ceil(8);
        ensure(src, bitmap_len)?;
        let bitmap = src.copy_to_bytes(bitmap_len);

        let mut values = Vec::with_capacity(count);
        for (i, col) in metadata.columns.iter().enumerate() {
            if bitmap[i / 8] & (1 << (i % 8)) != 0 {
                values.push(None);
            } else {
                values.push(decode_value(src, col.type_id, &col.type_info)?);
            }
        }
        Ok(Self { values })
    }

    /// Raw value of column `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Bytes> {
        self.values.get(index).and_then(Option::as_ref)
    }

    /// Column `index` decoded as UTF-16LE text (NCHAR/NVARCHAR/NTEXT).
    pub fn get_nstring(&self, index: usize) -> Result<Option<String>, ProtocolError> {
        self.get(index).map(|b| utf16le_to_string(b)).transpose()
    }

    /// Number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row has no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// =============================================================================
// RETURNVALUE
// =============================================================================

/// RETURNVALUE status: the value belongs to an OUTPUT parameter.
pub const RETURN_VALUE_OUTPUT: u8 = 0x01;
/// RETURNVALUE status: the value is a user-defined function's return value.
pub const RETURN_VALUE_UDF: u8 = 0x02;

/// OUT parameter value returned by a stored procedure call.
#[derive(Debug, Clone)]
pub struct ReturnValue {
    /// Server-reported parameter ordinal.
    pub param_ordinal: u16,
    /// Parameter name, including the leading `@`.
    pub param_name: String,
    /// Status flags.
    pub status: u8,
    /// User type id.
    pub user_type: u32,
    /// Type flags.
    pub flags: u16,
    /// Value type.
    pub type_id: TypeId,
    /// Type-specific metadata.
    pub type_info: TypeInfo,
    /// Always Encrypted metadata for encrypted parameters.
    pub crypto: Option<CryptoMetadata>,
    /// Raw value, `None` for NULL.
    pub value: Option<Bytes>,
}

impl ReturnValue {
    /// Decode a RETURNVALUE token body.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        ensure(src, 2)?;
        let param_ordinal = src.get_u16_le();
        let param_name = read_b_varchar(src)?;

        ensure(src, 7)?;
        let status = src.get_u8();
        let user_type = src.get_u32_le();
        let flags = src.get_u16_le();
        let type_id = decode_type_id(src)?;
        let type_info = TypeInfo::decode(src, type_id)?;

        let crypto = if flags & column_flags::ENCRYPTED != 0 {
            Some(CryptoMetadata::decode(src)?)
        } else {
            None
        };

        let value = decode_value(src, type_id, &type_info)?;

        Ok(Self {
            param_ordinal,
            param_name,
            status,
            user_type,
            flags,
            type_id,
            type_info,
            crypto,
            value,
        })
    }

    /// Check if this value belongs to an OUTPUT parameter.
    #[must_use]
    pub fn is_output(&self) -> bool {
        self.status & RETURN_VALUE_OUTPUT != 0
    }

    /// Value decoded as UTF-16LE text.
    pub fn as_nstring(&self) -> Result<Option<String>, ProtocolError> {
        self.value.as_ref().map(|b| utf16le_to_string(b)).transpose()
    }

    /// Value decoded as a little-endian integer of 1, 2, 4 or 8 bytes.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        let v = self.value.as_ref()?;
        match v.len() {
            1 => Some(i64::from(v[0])),
            2 => Some(i64::from(i16::from_le_bytes([v[0], v[1]]))),
            4 => Some(i64::from(i32::from_le_bytes([v[0], v[1], v[2], v[3]]))),
            8 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(v);
                Some(i64::from_le_bytes(raw))
            }
            _ => None,
        }
    }
}

// =============================================================================
// DONE family
// =============================================================================

/// Done token status flag bits.
pub mod done_status_bits {
    /// More results follow.
    pub const DONE_MORE: u16 = 0x0001;
    /// The statement raised an error.
    pub const DONE_ERROR: u16 = 0x0002;
    /// A transaction is in progress.
    pub const DONE_INXACT: u16 = 0x0004;
    /// The row count is valid.
    pub const DONE_COUNT: u16 = 0x0010;
    /// Attention acknowledgement.
    pub const DONE_ATTN: u16 = 0x0020;
    /// End of one RPC inside a batch of RPCs.
    pub const DONE_RPCINBATCH: u16 = 0x0080;
    /// Severe server error terminated the statement.
    pub const DONE_SRVERROR: u16 = 0x0100;
}

/// Done status flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DoneStatus {
    /// More results follow.
    pub more: bool,
    /// Error occurred.
    pub error: bool,
    /// Transaction in progress.
    pub in_xact: bool,
    /// Row count is valid.
    pub count: bool,
    /// Attention acknowledgement.
    pub attn: bool,
    /// End of one RPC in a batch.
    pub rpc_in_batch: bool,
    /// Server error caused statement termination.
    pub srverror: bool,
}

impl DoneStatus {
    /// Parse done status from raw bits.
    #[must_use]
    pub fn from_bits(bits: u16) -> Self {
        use done_status_bits::*;
        Self {
            more: bits & DONE_MORE != 0,
            error: bits & DONE_ERROR != 0,
            in_xact: bits & DONE_INXACT != 0,
            count: bits & DONE_COUNT != 0,
            attn: bits & DONE_ATTN != 0,
            rpc_in_batch: bits & DONE_RPCINBATCH != 0,
            srverror: bits & DONE_SRVERROR != 0,
        }
    }

    /// Convert to raw bits.
    #[must_use]
    pub fn to_bits(&self) -> u16 {
        use done_status_bits::*;
        [
            (self.more, DONE_MORE),
            (self.error, DONE_ERROR),
            (self.in_xact, DONE_INXACT),
            (self.count, DONE_COUNT),
            (self.attn, DONE_ATTN),
            (self.rpc_in_batch, DONE_RPCINBATCH),
            (self.srverror, DONE_SRVERROR),
        ]
        .iter()
        .filter(|(set, _)| *set)
        .fold(0, |bits, (_, bit)| bits | bit)
    }
}

/// Which of the three DONE tokens was received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneKind {
    /// DONE: end of a SQL statement.
    Done,
    /// DONEPROC: end of a stored procedure.
    DoneProc,
    /// DONEINPROC: end of a statement inside a stored procedure.
    DoneInProc,
}

impl DoneKind {
    /// Wire token type for this kind.
    #[must_use]
    pub const fn token_type(&self) -> TokenType {
        match self {
            Self::Done => TokenType::Done,
            Self::DoneProc => TokenType::DoneProc,
            Self::DoneInProc => TokenType::DoneInProc,
        }
    }
}

/// DONE, DONEPROC or DONEINPROC token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Done {
    /// Token kind.
    pub kind: DoneKind,
    /// Status flags.
    pub status: DoneStatus,
    /// Current command.
    pub cur_cmd: u16,
    /// Row count, valid when `status.count` is set.
    pub row_count: u64,
}

impl Done {
    /// Body size (excluding the type byte).
    pub const SIZE: usize = 12;

    /// Decode a DONE-family token body.
    pub fn decode(src: &mut impl Buf, kind: DoneKind) -> Result<Self, ProtocolError> {
        if src.remaining() < Self::SIZE {
            return Err(ProtocolError::IncompletePacket {
                expected: Self::SIZE,
                actual: src.remaining(),
            });
        }
        Ok(Self {
            kind,
            status: DoneStatus::from_bits(src.get_u16_le()),
            cur_cmd: src.get_u16_le(),
            row_count: src.get_u64_le(),
        })
    }

    /// Encode the token, including its type byte.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(self.kind.token_type() as u8);
        dst.put_u16_le(self.status.to_bits());
        dst.put_u16_le(self.cur_cmd);
        dst.put_u64_le(self.row_count);
    }

    /// Check if this is the final DONE of the response.
    #[must_use]
    pub const fn is_final(&self) -> bool {
        !self.status.more
    }

    /// Check if this token closes one RPC of a batched RPC request.
    #[must_use]
    pub fn was_rpc_in_batch(&self) -> bool {
        self.kind == DoneKind::DoneProc && self.status.rpc_in_batch
    }
}

// =============================================================================
// ERROR / INFO
// =============================================================================

/// Server error or informational message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerMessage {
    /// Message number.
    pub number: i32,
    /// Message state.
    pub state: u8,
    /// Severity class.
    pub class: u8,
    /// Message text.
    pub message: String,
    /// Server name.
    pub server: String,
    /// Procedure name.
    pub procedure: String,
    /// Line number.
    pub line: i32,
}

impl ServerMessage {
    /// Decode an ERROR or INFO token body.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        ensure(src, 2)?;
        let length = usize::from(src.get_u16_le());
        if src.remaining() < length {
            return Err(ProtocolError::IncompletePacket {
                expected: length,
                actual: src.remaining(),
            });
        }
        let mut body = src.copy_to_bytes(length);

        ensure(&body, 6)?;
        let number = body.get_i32_le();
        let state = body.get_u8();
        let class = body.get_u8();
        let message = read_us_varchar(&mut body)?;
        let server = read_b_varchar(&mut body)?;
        let procedure = read_b_varchar(&mut body)?;
        ensure(&body, 4)?;
        let line = body.get_i32_le();

        Ok(Self {
            number,
            state,
            class,
            message,
            server,
            procedure,
            line,
        })
    }

    /// Severity 20 and above closes the connection.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        self.class >= 20
    }

    /// Severity 11 and above is an error; 10 and below is informational.
    #[must_use]
    pub const fn is_error_severity(&self) -> bool {
        self.class > 10
    }
}

// =============================================================================
// ENVCHANGE
// =============================================================================

/// Environment change type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvChangeType {
    /// Current database changed.
    Database,
    /// Language changed.
    Language,
    /// Character set changed.
    CharacterSet,
    /// Packet size changed.
    PacketSize,
    /// Collation changed.
    SqlCollation,
    /// Transaction began.
    BeginTransaction,
    /// Transaction committed.
    CommitTransaction,
    /// Transaction rolled back.
    RollbackTransaction,
    /// Connection reset acknowledged.
    ResetConnection,
    /// Client must reconnect elsewhere.
    Routing,
    /// Any other type, kept as its raw byte.
    Other(u8),
}

impl EnvChangeType {
    /// Map a raw type byte.
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Database,
            2 => Self::Language,
            3 => Self::CharacterSet,
            4 => Self::PacketSize,
            7 => Self::SqlCollation,
            8 => Self::BeginTransaction,
            9 => Self::CommitTransaction,
            10 => Self::RollbackTransaction,
            18 => Self::ResetConnection,
            20 => Self::Routing,
            other => Self::Other(other),
        }
    }

    const fn carries_strings(&self) -> bool {
        matches!(
            self,
            Self::Database | Self::Language | Self::CharacterSet | Self::PacketSize
        )
    }
}

/// Environment change value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvChangeValue {
    /// Textual value.
    String(String),
    /// Binary value.
    Binary(Bytes),
}

/// Environment change token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvChange {
    /// What changed.
    pub env_type: EnvChangeType,
    /// New value.
    pub new_value: EnvChangeValue,
    /// Previous value.
    pub old_value: EnvChangeValue,
}

impl EnvChange {
    /// Decode an ENVCHANGE token body.
    ///
    /// The body is bounded by its length prefix, so unknown change types are
    /// kept as raw bytes rather than rejected.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        ensure(src, 2)?;
        let length = usize::from(src.get_u16_le());
        if src.remaining() < length {
            return Err(ProtocolError::IncompletePacket {
                expected: length,
                actual: src.remaining(),
            });
        }
        let mut body = src.copy_to_bytes(length);

        ensure(&body, 1)?;
        let env_type = EnvChangeType::from_u8(body.get_u8());

        let (new_value, old_value) = if env_type.carries_strings() {
            (
                EnvChangeValue::String(read_b_varchar(&mut body)?),
                EnvChangeValue::String(read_b_varchar(&mut body)?),
            )
        } else if env_type == EnvChangeType::Routing || matches!(env_type, EnvChangeType::Other(_)) {
            (
                EnvChangeValue::Binary(body.copy_to_bytes(body.remaining())),
                EnvChangeValue::Binary(Bytes::new()),
            )
        } else {
            let new_len = if body.has_remaining() { usize::from(body.get_u8()) } else { 0 };
            let new_value = take(&mut body, new_len)?;
            let old_len = if body.has_remaining() { usize::from(body.get_u8()) } else { 0 };
            let old_value = take(&mut body, old_len)?;
            (
                EnvChangeValue::Binary(new_value),
                EnvChangeValue::Binary(old_value),
            )
        };

        Ok(Self {
            env_type,
            new_value,
            old_value,
        })
    }

    /// The new database name if this is a database change.
    #[must_use]
    pub fn new_database(&self) -> Option<&str> {
        match (&self.env_type, &self.new_value) {
            (EnvChangeType::Database, EnvChangeValue::String(name)) => Some(name),
            _ => None,
        }
    }
}

/// Decode an ORDER token body.
pub fn decode_order(src: &mut impl Buf) -> Result<Vec<u16>, ProtocolError> {
    ensure(src, 2)?;
    let length = usize::from(src.get_u16_le());
    ensure(src, length)?;
    Ok((0..length / 2).map(|_| src.get_u16_le()).collect())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::codec::{write_b_varchar, write_us_varchar, write_utf16_string};

    fn int_column(buf: &mut BytesMut, name: &str) {
        buf.put_u32_le(0); // user type
        buf.put_u16_le(column_flags::NULLABLE);
        buf.put_u8(TypeId::IntN as u8);
        buf.put_u8(4);
        write_b_varchar(buf, name);
    }

    fn nvarchar_column(buf: &mut BytesMut, name: &str, max_length: u16) {
        buf.put_u32_le(0);
        buf.put_u16_le(column_flags::NULLABLE);
        buf.put_u8(TypeId::NVarChar as u8);
        buf.put_u16_le(max_length);
        buf.put_u32_le(0x0409); // collation lcid
        buf.put_u8(0x34);
        write_b_varchar(buf, name);
    }

    #[test]
    fn test_done_status_bits_roundtrip() {
        let status = DoneStatus {
            more: true,
            count: true,
            rpc_in_batch: true,
            ..DoneStatus::default()
        };
        assert_eq!(status.to_bits(), 0x0091);
        assert_eq!(DoneStatus::from_bits(0x0091), status);
    }

    #[test]
    fn test_done_encode_decode() {
        let done = Done {
            kind: DoneKind::DoneProc,
            status: DoneStatus::from_bits(done_status_bits::DONE_RPCINBATCH),
            cur_cmd: 0xE0,
            row_count: 0,
        };
        let mut buf = BytesMut::new();
        done.encode(&mut buf);
        assert_eq!(buf[0], 0xFE);

        let mut cursor = &buf[1..];
        let decoded = Done::decode(&mut cursor, DoneKind::DoneProc).unwrap();
        assert_eq!(decoded, done);
        assert!(decoded.was_rpc_in_batch());
        assert!(decoded.is_final());
    }

    #[test]
    fn test_done_truncated() {
        let mut cursor: &[u8] = &[0x10, 0x00, 0xC1];
        let err = Done::decode(&mut cursor, DoneKind::Done).unwrap_err();
        assert!(matches!(err, ProtocolError::IncompletePacket { expected: 12, .. }));
    }

    #[test]
    fn test_colmetadata_no_metadata_marker() {
        let mut cursor: &[u8] = &[0xFF, 0xFF];
        let meta = ColMetaData::decode(&mut cursor, false).unwrap();
        assert!(meta.is_empty());
    }

    #[test]
    fn test_colmetadata_and_row() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(2);
        int_column(&mut buf, "id");
        nvarchar_column(&mut buf, "name", 100);
        let mut cursor = buf.freeze();
        let meta = ColMetaData::decode(&mut cursor, false).unwrap();
        assert_eq!(meta.column_count(), 2);
        assert_eq!(meta.columns[0].name, "id");
        assert_eq!(meta.columns[1].type_info.max_length, Some(100));
        assert!(meta.columns[1].is_nullable());

        let mut row = BytesMut::new();
        row.put_u8(4);
        row.put_i32_le(42);
        row.put_u16_le(4);
        write_utf16_string(&mut row, "ab");
        let mut cursor = row.freeze();
        let decoded = Row::decode(&mut cursor, &meta).unwrap();
        assert_eq!(decoded.get(0).unwrap().as_ref(), &42i32.to_le_bytes());
        assert_eq!(decoded.get_nstring(1).unwrap().as_deref(), Some("ab"));
    }

    #[test]
    fn test_nbcrow_skips_null_columns() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(2);
        int_column(&mut buf, "a");
        int_column(&mut buf, "b");
        let meta = ColMetaData::decode(&mut buf.freeze(), false).unwrap();

        // column 0 NULL via bitmap, column 1 present
        let mut cursor: &[u8] = &[0b0000_0001, 4, 7, 0, 0, 0];
        let row = Row::decode_nbc(&mut cursor, &meta).unwrap();
        assert_eq!(row.len(), 2);
        assert!(row.get(0).is_none());
        assert_eq!(row.get(1).unwrap().as_ref(), &[7, 0, 0, 0]);
    }

    #[test]
    fn test_intn_zero_length_is_null() {
        let info = TypeInfo {
            max_length: Some(4),
            ..TypeInfo::default()
        };
        let mut cursor: &[u8] = &[0];
        assert_eq!(decode_value(&mut cursor, TypeId::IntN, &info).unwrap(), None);
    }

    #[test]
    fn test_plp_value_chunks() {
        let info = TypeInfo {
            max_length: Some(0xFFFF),
            ..TypeInfo::default()
        };
        let mut buf = BytesMut::new();
        buf.put_u64_le(4);
        buf.put_u32_le(2);
        buf.put_slice(b"ab");
        buf.put_u32_le(2);
        buf.put_slice(b"cd");
        buf.put_u32_le(0);
        let mut cursor = buf.freeze();
        let value = decode_value(&mut cursor, TypeId::BigVarBinary, &info).unwrap();
        assert_eq!(value.unwrap().as_ref(), b"abcd");
        assert!(!cursor.has_remaining());

        let mut null: &[u8] = &[0xFF; 8];
        assert_eq!(
            decode_value(&mut null, TypeId::BigVarBinary, &info).unwrap(),
            None
        );
    }

    #[test]
    fn test_return_value_decode() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(3);
        write_b_varchar(&mut buf, "@total");
        buf.put_u8(RETURN_VALUE_OUTPUT);
        buf.put_u32_le(0);
        buf.put_u16_le(column_flags::NULLABLE);
        buf.put_u8(TypeId::IntN as u8);
        buf.put_u8(8);
        buf.put_u8(8);
        buf.put_i64_le(-5);
        let mut cursor = buf.freeze();
        let rv = ReturnValue::decode(&mut cursor).unwrap();
        assert_eq!(rv.param_ordinal, 3);
        assert_eq!(rv.param_name, "@total");
        assert!(rv.is_output());
        assert_eq!(rv.as_i64(), Some(-5));
        assert!(!cursor.has_remaining());
    }

    #[test]
    fn test_server_message_decode() {
        let mut body = BytesMut::new();
        body.put_i32_le(2627);
        body.put_u8(1);
        body.put_u8(14);
        write_us_varchar(&mut body, "Violation of PRIMARY KEY");
        write_b_varchar(&mut body, "srv");
        write_b_varchar(&mut body, "");
        body.put_i32_le(7);

        let mut buf = BytesMut::new();
        buf.put_u16_le(body.len() as u16);
        buf.extend_from_slice(&body);
        let msg = ServerMessage::decode(&mut buf.freeze()).unwrap();
        assert_eq!(msg.number, 2627);
        assert_eq!(msg.class, 14);
        assert!(msg.is_error_severity());
        assert!(!msg.is_fatal());
        assert_eq!(msg.line, 7);
    }

    #[test]
    fn test_env_change_database() {
        let mut body = BytesMut::new();
        body.put_u8(1);
        write_b_varchar(&mut body, "sales");
        write_b_varchar(&mut body, "master");
        let mut buf = BytesMut::new();
        buf.put_u16_le(body.len() as u16);
        buf.extend_from_slice(&body);

        let env = EnvChange::decode(&mut buf.freeze()).unwrap();
        assert_eq!(env.new_database(), Some("sales"));
        assert_eq!(env.old_value, EnvChangeValue::String("master".into()));
    }

    #[test]
    fn test_env_change_unknown_type_kept_raw() {
        let mut cursor: &[u8] = &[0x03, 0x00, 0x63, 0xAA, 0xBB];
        let env = EnvChange::decode(&mut cursor).unwrap();
        assert_eq!(env.env_type, EnvChangeType::Other(0x63));
        assert_eq!(
            env.new_value,
            EnvChangeValue::Binary(Bytes::from_static(&[0xAA, 0xBB]))
        );
    }

    #[test]
    fn test_order_decode() {
        let mut cursor: &[u8] = &[0x04, 0x00, 0x01, 0x00, 0x03, 0x00];
        assert_eq!(decode_order(&mut cursor).unwrap(), vec![1, 3]);
    }
}
