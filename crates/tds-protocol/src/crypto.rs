//! Always Encrypted metadata carried in COLMETADATA and RETURNVALUE.
//!
//! When column encryption is negotiated, COLMETADATA starts with a table of
//! column encryption keys (CEKs) and every encrypted column or parameter
//! carries a CryptoMetadata block pointing into that table.
//!
//! ```text
//! CEK_TABLE   = count:u16  CEK_ENTRY*
//! CEK_ENTRY   = database_id:u32 cek_id:u32 cek_version:u32 md_version:u64
//!               value_count:u8 CEK_VALUE*
//! CEK_VALUE   = len:u16 bytes  key_store:B_VARCHAR  cmk_path:US_VARCHAR
//!               algorithm:B_VARCHAR
//! CRYPTO_META = ordinal:u16 user_type:u32 type:u8 TYPE_INFO
//!               algorithm_id:u8 [algorithm_name:B_VARCHAR]
//!               encryption_type:u8 normalization_version:u8
//! ```

use bytes::{Buf, Bytes};

use crate::codec::{ensure, read_b_varchar, read_us_varchar};
use crate::error::ProtocolError;
use crate::token::{TypeInfo, decode_type_id};
use crate::types::TypeId;

/// Algorithm id reserved for custom algorithms; a name follows on the wire.
pub const ALGORITHM_CUSTOM: u8 = 0;

/// Algorithm id for AEAD_AES_256_CBC_HMAC_SHA256.
pub const ALGORITHM_AEAD_AES_256_CBC_HMAC_SHA256: u8 = 2;

/// Current normalization rule version.
pub const NORMALIZATION_RULE_VERSION: u8 = 1;

/// Column Encryption Key table entry.
///
/// Several columns may share one CEK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CekTableEntry {
    /// Database id where the CEK is defined.
    pub database_id: u32,
    /// CEK id within the database.
    pub cek_id: u32,
    /// CEK version, bumped on rotation.
    pub cek_version: u32,
    /// Metadata version.
    pub cek_md_version: u64,
    /// Encrypted copies of the CEK, one per column master key.
    pub values: Vec<CekValue>,
}

/// One encrypted copy of a CEK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CekValue {
    /// The encrypted CEK bytes.
    pub encrypted_value: Bytes,
    /// Key store provider name, e.g. `AZURE_KEY_VAULT`.
    pub key_store_provider_name: String,
    /// Column master key path within the key store.
    pub cmk_path: String,
    /// Asymmetric algorithm that encrypted the CEK, e.g. `RSA_OAEP`.
    pub encryption_algorithm: String,
}

/// Wire-level encryption type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncryptionTypeWire {
    /// Deterministic encryption (1).
    Deterministic,
    /// Randomized encryption (2).
    Randomized,
}

impl EncryptionTypeWire {
    /// Create from wire value.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Deterministic),
            2 => Some(Self::Randomized),
            _ => None,
        }
    }

    /// Convert to wire value.
    #[must_use]
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Deterministic => 1,
            Self::Randomized => 2,
        }
    }
}

/// Per-column (or per-parameter) encryption metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoMetadata {
    /// Index into the CEK table.
    pub cek_table_ordinal: u16,
    /// User type of the plaintext value.
    pub base_user_type: u32,
    /// Type of the plaintext value.
    pub base_type: TypeId,
    /// TYPE_INFO of the plaintext value.
    pub base_type_info: TypeInfo,
    /// Encryption algorithm id.
    pub algorithm_id: u8,
    /// Algorithm name, only present for custom algorithms.
    pub algorithm_name: Option<String>,
    /// Encryption type.
    pub encryption_type: EncryptionTypeWire,
    /// Normalization rule version.
    pub normalization_version: u8,
}

/// CEK table for one result set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CekTable {
    /// CEK entries.
    pub entries: Vec<CekTableEntry>,
}

impl CekTable {
    /// Get an entry by ordinal.
    #[must_use]
    pub fn get(&self, ordinal: u16) -> Option<&CekTableEntry> {
        self.entries.get(usize::from(ordinal))
    }

    /// Check if the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Decode a CEK table.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        ensure(src, 2)?;
        let count = src.get_u16_le();
        let entries = (0..count)
            .map(|_| CekTableEntry::decode(src))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { entries })
    }
}

impl CekTableEntry {
    /// Decode one CEK table entry.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        ensure(src, 21)?;
        let database_id = src.get_u32_le();
        let cek_id = src.get_u32_le();
        let cek_version = src.get_u32_le();
        let cek_md_version = src.get_u64_le();
        let value_count = src.get_u8();

        let values = (0..value_count)
            .map(|_| CekValue::decode(src))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            database_id,
            cek_id,
            cek_version,
            cek_md_version,
            values,
        })
    }

    /// First encrypted value.
    #[must_use]
    pub fn primary_value(&self) -> Option<&CekValue> {
        self.values.first()
    }
}

impl CekValue {
    /// Decode one encrypted CEK value.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        ensure(src, 2)?;
        let len = usize::from(src.get_u16_le());
        ensure(src, len)?;
        let encrypted_value = src.copy_to_bytes(len);

        Ok(Self {
            encrypted_value,
            key_store_provider_name: read_b_varchar(src)?,
            cmk_path: read_us_varchar(src)?,
            encryption_algorithm: read_b_varchar(src)?,
        })
    }
}

impl CryptoMetadata {
    /// Decode a CryptoMetadata block.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        ensure(src, 6)?;
        let cek_table_ordinal = src.get_u16_le();
        let base_user_type = src.get_u32_le();
        let base_type = decode_type_id(src)?;
        let base_type_info = TypeInfo::decode(src, base_type)?;

        ensure(src, 1)?;
        let algorithm_id = src.get_u8();
        let algorithm_name = if algorithm_id == ALGORITHM_CUSTOM {
            Some(read_b_varchar(src)?)
        } else {
            None
        };

        ensure(src, 2)?;
        let raw_type = src.get_u8();
        let encryption_type =
            EncryptionTypeWire::from_u8(raw_type).ok_or(ProtocolError::InvalidField {
                field: "encryption_type",
                value: u32::from(raw_type),
            })?;
        let normalization_version = src.get_u8();

        Ok(Self {
            cek_table_ordinal,
            base_user_type,
            base_type,
            base_type_info,
            algorithm_id,
            algorithm_name,
            encryption_type,
            normalization_version,
        })
    }

    /// Check if this uses the standard AEAD algorithm.
    #[must_use]
    pub fn is_aead_aes_256(&self) -> bool {
        self.algorithm_id == ALGORITHM_AEAD_AES_256_CBC_HMAC_SHA256
    }

    /// Check if this uses deterministic encryption.
    #[must_use]
    pub fn is_deterministic(&self) -> bool {
        self.encryption_type == EncryptionTypeWire::Deterministic
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::codec::{write_b_varchar, write_us_varchar};
    use bytes::{BufMut, BytesMut};

    fn put_cek_value(buf: &mut BytesMut, bytes: &[u8]) {
        buf.put_u16_le(bytes.len() as u16);
        buf.put_slice(bytes);
        write_b_varchar(buf, "MSSQL_CERTIFICATE_STORE");
        write_us_varchar(buf, "CurrentUser/My/AB12");
        write_b_varchar(buf, "RSA_OAEP");
    }

    #[test]
    fn test_encryption_type_wire_roundtrip() {
        assert_eq!(
            EncryptionTypeWire::from_u8(1),
            Some(EncryptionTypeWire::Deterministic)
        );
        assert_eq!(EncryptionTypeWire::from_u8(0), None);
        assert_eq!(EncryptionTypeWire::Randomized.to_u8(), 2);
    }

    #[test]
    fn test_crypto_metadata_decode() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(0); // ordinal
        buf.put_u32_le(0); // user type
        buf.put_u8(TypeId::IntN as u8);
        buf.put_u8(4);
        buf.put_u8(ALGORITHM_AEAD_AES_256_CBC_HMAC_SHA256);
        buf.put_u8(1);
        buf.put_u8(NORMALIZATION_RULE_VERSION);

        let metadata = CryptoMetadata::decode(&mut buf.freeze()).unwrap();
        assert_eq!(metadata.base_type, TypeId::IntN);
        assert_eq!(metadata.base_type_info.max_length, Some(4));
        assert!(metadata.is_aead_aes_256());
        assert!(metadata.is_deterministic());
        assert_eq!(metadata.algorithm_name, None);
    }

    #[test]
    fn test_crypto_metadata_custom_algorithm_name() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(1);
        buf.put_u32_le(0);
        buf.put_u8(TypeId::Int4 as u8);
        buf.put_u8(ALGORITHM_CUSTOM);
        write_b_varchar(&mut buf, "MY_ALGO");
        buf.put_u8(2);
        buf.put_u8(1);

        let metadata = CryptoMetadata::decode(&mut buf.freeze()).unwrap();
        assert_eq!(metadata.algorithm_name.as_deref(), Some("MY_ALGO"));
        assert_eq!(metadata.encryption_type, EncryptionTypeWire::Randomized);
    }

    #[test]
    fn test_crypto_metadata_bad_encryption_type() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(0);
        buf.put_u32_le(0);
        buf.put_u8(TypeId::Int4 as u8);
        buf.put_u8(2);
        buf.put_u8(9);
        buf.put_u8(1);
        let err = CryptoMetadata::decode(&mut buf.freeze()).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidField {
                field: "encryption_type",
                value: 9
            }
        ));
    }

    #[test]
    fn test_cek_table_decode() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(1);
        buf.put_u32_le(5);
        buf.put_u32_le(2);
        buf.put_u32_le(1);
        buf.put_u64_le(100);
        buf.put_u8(2);
        put_cek_value(&mut buf, &[0xDE, 0xAD]);
        put_cek_value(&mut buf, &[0xBE, 0xEF]);

        let table = CekTable::decode(&mut buf.freeze()).expect("should decode table");
        assert_eq!(table.len(), 1);
        let entry = table.get(0).expect("first entry");
        assert_eq!(entry.database_id, 5);
        assert_eq!(entry.cek_md_version, 100);
        assert_eq!(entry.values.len(), 2);
        let value = entry.primary_value().expect("primary value");
        assert_eq!(value.encrypted_value.as_ref(), &[0xDE, 0xAD]);
        assert_eq!(value.encryption_algorithm, "RSA_OAEP");
    }

    #[test]
    fn test_cek_value_truncated() {
        let mut cursor: &[u8] = &[0x04, 0x00, 0xDE];
        assert_eq!(
            CekValue::decode(&mut cursor),
            Err(ProtocolError::UnexpectedEof)
        );
    }
}
