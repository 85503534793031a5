//! Statement parameters and OUTPUT registration.

use tds_protocol::{ReturnValue, TdsReaderMark, TypeId, TypeInfo};

use crate::encryption::ParamCryptoMetadata;
use crate::error::{Error, Result};

/// SQL types an OUTPUT parameter can be registered as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum SqlType {
    /// BIT.
    Bit,
    /// TINYINT.
    TinyInt,
    /// SMALLINT.
    SmallInt,
    /// INT.
    Int,
    /// BIGINT.
    BigInt,
    /// REAL.
    Real,
    /// FLOAT.
    Float,
    /// DECIMAL.
    Decimal,
    /// NUMERIC.
    Numeric,
    /// MONEY.
    Money,
    /// SMALLMONEY.
    SmallMoney,
    /// CHAR.
    Char,
    /// VARCHAR.
    VarChar,
    /// NCHAR.
    NChar,
    /// NVARCHAR.
    NVarChar,
    /// BINARY.
    Binary,
    /// VARBINARY.
    VarBinary,
    /// DATE.
    Date,
    /// TIME.
    Time,
    /// DATETIME2.
    Timestamp,
    /// DATETIME.
    DateTime,
    /// SMALLDATETIME.
    SmallDateTime,
    /// DATETIMEOFFSET.
    DateTimeOffset,
    /// UNIQUEIDENTIFIER.
    Guid,
    /// XML.
    Xml,
    /// SQL_VARIANT.
    SqlVariant,
    /// Array, no server counterpart.
    Array,
    /// Structured type, no server counterpart.
    Struct,
    /// Reference type, no server counterpart.
    Ref,
    /// Row id, no server counterpart.
    RowId,
    /// Distinct type, no server counterpart.
    Distinct,
    /// Data link, no server counterpart.
    DataLink,
    /// Cursor returned by reference. Never valid for OUTPUT.
    RefCursor,
}

impl SqlType {
    /// Check if the type has no server counterpart.
    ///
    /// Such types are registered as [`SqlType::Binary`].
    #[must_use]
    pub fn is_unsupported(self) -> bool {
        matches!(
            self,
            Self::Array | Self::Struct | Self::Ref | Self::RowId | Self::Distinct | Self::DataLink
        )
    }

    /// Fractional-second scale applied when none is given.
    #[must_use]
    pub fn default_out_scale(self) -> Option<u8> {
        match self {
            Self::DateTime => Some(3),
            Self::Time | Self::Timestamp | Self::DateTimeOffset => Some(7),
            _ => None,
        }
    }
}

/// How a parameter was registered for output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputRegistration {
    /// Registered type.
    pub sql_type: SqlType,
    /// Output scale.
    pub scale: Option<u8>,
    /// Output precision or length.
    pub precision: Option<u32>,
}

impl OutputRegistration {
    /// Registration for `sql_type` with its default scale.
    ///
    /// REF_CURSOR cannot be registered and unsupported types fall back to
    /// BINARY.
    pub fn new(sql_type: SqlType) -> Result<Self> {
        if sql_type == SqlType::RefCursor {
            return Err(Error::UnsupportedType("REF_CURSOR".into()));
        }
        let registered = if sql_type.is_unsupported() {
            SqlType::Binary
        } else {
            sql_type
        };
        Ok(Self {
            sql_type: registered,
            scale: sql_type.default_out_scale(),
            precision: None,
        })
    }
}

/// Where an OUTPUT value stands in the response.
#[derive(Debug, Clone, Default)]
pub(crate) enum OutValue {
    /// Not located yet, or discarded.
    #[default]
    Unset,
    /// Located at a RETURNVALUE token, not decoded yet.
    Marked(TdsReaderMark),
    /// Decoded.
    Read(ReturnValue),
}

/// One statement parameter.
#[derive(Debug, Clone, Default)]
pub struct Parameter {
    output: Option<OutputRegistration>,
    crypto: Option<ParamCryptoMetadata>,
    value: OutValue,
}

impl Parameter {
    /// Create an input-only parameter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if the parameter is registered for output.
    #[must_use]
    pub fn is_output(&self) -> bool {
        self.output.is_some()
    }

    /// OUTPUT registration, if any.
    #[must_use]
    pub fn output(&self) -> Option<&OutputRegistration> {
        self.output.as_ref()
    }

    /// Register (or re-register) the parameter for output.
    pub(crate) fn register_for_output(&mut self, registration: OutputRegistration) {
        self.output = Some(registration);
    }

    pub(crate) fn set_out_scale(&mut self, scale: u8) {
        if let Some(output) = &mut self.output {
            output.scale = Some(scale);
        }
    }

    pub(crate) fn set_out_precision(&mut self, precision: u32) {
        if let Some(output) = &mut self.output {
            output.precision = Some(precision);
        }
    }

    /// Always Encrypted metadata.
    #[must_use]
    pub fn crypto(&self) -> Option<&ParamCryptoMetadata> {
        self.crypto.as_ref()
    }

    /// Mutable Always Encrypted metadata.
    pub fn crypto_mut(&mut self) -> Option<&mut ParamCryptoMetadata> {
        self.crypto.as_mut()
    }

    /// Replace the Always Encrypted metadata.
    pub fn set_crypto(&mut self, crypto: Option<ParamCryptoMetadata>) {
        self.crypto = crypto;
    }

    /// Check if the value was located in the current response.
    #[must_use]
    pub fn is_value_gotten(&self) -> bool {
        !matches!(self.value, OutValue::Unset)
    }

    pub(crate) fn value(&self) -> &OutValue {
        &self.value
    }

    pub(crate) fn set_marked(&mut self, mark: TdsReaderMark) {
        self.value = OutValue::Marked(mark);
    }

    pub(crate) fn set_read(&mut self, value: ReturnValue) {
        self.value = OutValue::Read(value);
    }

    pub(crate) fn reset_output_value(&mut self) {
        self.value = OutValue::Unset;
    }
}

/// RETURNVALUE standing in for a procedure's RETURNSTATUS.
pub(crate) fn return_status_value(status: i32) -> ReturnValue {
    ReturnValue {
        param_ordinal: 0,
        param_name: "@RETURN_VALUE".into(),
        status: tds_protocol::token::RETURN_VALUE_OUTPUT,
        user_type: 0,
        flags: 0,
        type_id: TypeId::IntN,
        type_info: TypeInfo {
            max_length: Some(4),
            ..TypeInfo::default()
        },
        crypto: None,
        value: Some(bytes::Bytes::copy_from_slice(&status.to_le_bytes())),
    }
}
