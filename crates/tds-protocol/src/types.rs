//! TDS data type identifiers.
//!
//! Every column and parameter in a response carries a one-byte type id. The
//! id determines how the type-specific metadata (TYPE_INFO) is laid out and
//! how the value itself is length-prefixed on the wire.

/// TDS data type identifiers as sent in COLMETADATA and RETURNVALUE tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeId {
    /// NULL type (no data).
    Null = 0x1F,
    /// TINYINT.
    Int1 = 0x30,
    /// BIT.
    Bit = 0x32,
    /// SMALLINT.
    Int2 = 0x34,
    /// INT.
    Int4 = 0x38,
    /// BIGINT.
    Int8 = 0x7F,
    /// REAL.
    Float4 = 0x3B,
    /// FLOAT.
    Float8 = 0x3E,
    /// MONEY.
    Money = 0x3C,
    /// SMALLMONEY.
    Money4 = 0x7A,
    /// DATETIME.
    DateTime = 0x3D,
    /// SMALLDATETIME.
    DateTime4 = 0x3A,
    /// UNIQUEIDENTIFIER.
    Guid = 0x24,
    /// Nullable integer family.
    IntN = 0x26,
    /// Legacy DECIMAL.
    Decimal = 0x37,
    /// Legacy NUMERIC.
    Numeric = 0x3F,
    /// Nullable BIT.
    BitN = 0x68,
    /// DECIMAL.
    DecimalN = 0x6A,
    /// NUMERIC.
    NumericN = 0x6C,
    /// Nullable float family.
    FloatN = 0x6D,
    /// Nullable money family.
    MoneyN = 0x6E,
    /// Nullable datetime family.
    DateTimeN = 0x6F,
    /// Legacy CHAR.
    Char = 0x2F,
    /// Legacy VARCHAR.
    VarChar = 0x27,
    /// Legacy BINARY.
    Binary = 0x2D,
    /// Legacy VARBINARY.
    VarBinary = 0x25,
    /// VARCHAR.
    BigVarChar = 0xA7,
    /// VARBINARY.
    BigVarBinary = 0xA5,
    /// CHAR.
    BigChar = 0xAF,
    /// BINARY.
    BigBinary = 0xAD,
    /// NCHAR.
    NChar = 0xEF,
    /// NVARCHAR.
    NVarChar = 0xE7,
    /// TEXT.
    Text = 0x23,
    /// IMAGE.
    Image = 0x22,
    /// NTEXT.
    NText = 0x63,
    /// DATE.
    Date = 0x28,
    /// TIME.
    Time = 0x29,
    /// DATETIME2.
    DateTime2 = 0x2A,
    /// DATETIMEOFFSET.
    DateTimeOffset = 0x2B,
    /// SQL_VARIANT.
    Variant = 0x62,
    /// CLR user-defined type.
    Udt = 0xF0,
    /// XML.
    Xml = 0xF1,
    /// Table-valued parameter.
    Tvp = 0xF3,
}

/// How a value of a given type is length-prefixed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueLength {
    /// Fixed number of bytes, never NULL.
    Fixed(usize),
    /// 1-byte length prefix, `0xFF` or `0` meaning NULL depending on type.
    Byte,
    /// 2-byte length prefix, `0xFFFF` meaning NULL.
    UShort,
    /// 4-byte length prefix, `0xFFFF_FFFF` meaning NULL.
    Long,
    /// Legacy LOB with text pointer and timestamp.
    TextPtr,
    /// Partially length-prefixed chunks (MAX types, XML, UDT).
    Plp,
}

impl TypeId {
    /// Create a type id from its wire byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        let type_id = match value {
            0x1F => Self::Null,
            0x30 => Self::Int1,
            0x32 => Self::Bit,
            0x34 => Self::Int2,
            0x38 => Self::Int4,
            0x7F => Self::Int8,
            0x3B => Self::Float4,
            0x3E => Self::Float8,
            0x3C => Self::Money,
            0x7A => Self::Money4,
            0x3D => Self::DateTime,
            0x3A => Self::DateTime4,
            0x24 => Self::Guid,
            0x26 => Self::IntN,
            0x37 => Self::Decimal,
            0x3F => Self::Numeric,
            0x68 => Self::BitN,
            0x6A => Self::DecimalN,
            0x6C => Self::NumericN,
            0x6D => Self::FloatN,
            0x6E => Self::MoneyN,
            0x6F => Self::DateTimeN,
            0x2F => Self::Char,
            0x27 => Self::VarChar,
            0x2D => Self::Binary,
            0x25 => Self::VarBinary,
            0xA7 => Self::BigVarChar,
            0xA5 => Self::BigVarBinary,
            0xAF => Self::BigChar,
            0xAD => Self::BigBinary,
            0xEF => Self::NChar,
            0xE7 => Self::NVarChar,
            0x23 => Self::Text,
            0x22 => Self::Image,
            0x63 => Self::NText,
            0x28 => Self::Date,
            0x29 => Self::Time,
            0x2A => Self::DateTime2,
            0x2B => Self::DateTimeOffset,
            0x62 => Self::Variant,
            0xF0 => Self::Udt,
            0xF1 => Self::Xml,
            0xF3 => Self::Tvp,
            _ => return None,
        };
        Some(type_id)
    }

    /// Length class of a value of this type.
    ///
    /// `max_length` is the declared maximum from TYPE_INFO; `0xFFFF` on the
    /// 2-byte types selects the PLP encoding used by the `(MAX)` variants.
    /// Returns `None` for types that cannot appear as a value (TVP).
    #[must_use]
    pub const fn value_length(&self, max_length: Option<u32>) -> Option<ValueLength> {
        let class = match self {
            Self::Null => ValueLength::Fixed(0),
            Self::Int1 | Self::Bit => ValueLength::Fixed(1),
            Self::Int2 => ValueLength::Fixed(2),
            Self::Int4 | Self::Float4 | Self::Money4 | Self::DateTime4 => ValueLength::Fixed(4),
            Self::Int8 | Self::Float8 | Self::Money | Self::DateTime => ValueLength::Fixed(8),
            Self::Guid
            | Self::IntN
            | Self::Decimal
            | Self::Numeric
            | Self::BitN
            | Self::DecimalN
            | Self::NumericN
            | Self::FloatN
            | Self::MoneyN
            | Self::DateTimeN
            | Self::Char
            | Self::VarChar
            | Self::Binary
            | Self::VarBinary
            | Self::Date
            | Self::Time
            | Self::DateTime2
            | Self::DateTimeOffset => ValueLength::Byte,
            Self::BigVarChar | Self::BigVarBinary | Self::NVarChar => match max_length {
                Some(0xFFFF) => ValueLength::Plp,
                _ => ValueLength::UShort,
            },
            Self::BigChar | Self::BigBinary | Self::NChar => ValueLength::UShort,
            Self::Text | Self::Image | Self::NText => ValueLength::TextPtr,
            Self::Variant => ValueLength::Long,
            Self::Xml | Self::Udt => ValueLength::Plp,
            Self::Tvp => return None,
        };
        Some(class)
    }

    /// Check if values of this type are UTF-16 encoded.
    #[must_use]
    pub const fn is_unicode(&self) -> bool {
        matches!(self, Self::NChar | Self::NVarChar | Self::NText)
    }

    /// Check if TYPE_INFO for this type carries a collation.
    #[must_use]
    pub const fn has_collation(&self) -> bool {
        matches!(
            self,
            Self::BigVarChar | Self::BigChar | Self::NChar | Self::NVarChar | Self::Text | Self::NText
        )
    }
}

/// Column flag bits from COLMETADATA and RETURNVALUE.
pub mod column_flags {
    /// Column accepts NULL.
    pub const NULLABLE: u16 = 0x0001;
    /// Identity column.
    pub const IDENTITY: u16 = 0x0010;
    /// Computed column.
    pub const COMPUTED: u16 = 0x0020;
    /// Column is encrypted with Always Encrypted.
    pub const ENCRYPTED: u16 = 0x0800;
}
