//! Always Encrypted parameter metadata.
//!
//! A parameter's crypto metadata names the column encryption key (CEK) that
//! protects it. Before the parameter can be encrypted the CEK must be
//! decrypted with the column master key, which is the job of a
//! [`KeyDecryptor`]. The decrypted key lives only on the statement's own
//! copy of the metadata; [`ParamCryptoMetadata::stripped`] produces the
//! key-free copy that is safe to share and cache.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tds_protocol::{CekTableEntry, CryptoMetadata, EncryptionTypeWire, ProtocolError};

use crate::error::{Error, Result};

/// A decrypted column encryption key.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey(Arc<[u8]>);

impl SymmetricKey {
    /// Wrap raw key bytes.
    #[must_use]
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self(bytes.into())
    }

    /// Key length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the key is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("len", &self.0.len())
            .finish_non_exhaustive()
    }
}

/// Encryption metadata for one statement parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamCryptoMetadata {
    /// The CEK protecting the parameter.
    pub cek_entry: CekTableEntry,
    /// Ordinal of the CEK in the describe response's key table.
    pub cek_ordinal: u16,
    /// Encryption algorithm id.
    pub algorithm_id: u8,
    /// Custom algorithm name.
    pub algorithm_name: Option<String>,
    /// Deterministic or randomized.
    pub encryption_type: EncryptionTypeWire,
    /// Normalization rule version.
    pub normalization_version: u8,
    key: Option<SymmetricKey>,
}

impl ParamCryptoMetadata {
    /// Build parameter metadata from wire metadata and its key table.
    pub fn from_wire(meta: &CryptoMetadata, cek_table: &[CekTableEntry]) -> Result<Self> {
        let cek_entry = cek_table
            .get(usize::from(meta.cek_table_ordinal))
            .cloned()
            .ok_or(ProtocolError::InvalidField {
                field: "cek_table_ordinal",
                value: u32::from(meta.cek_table_ordinal),
            })?;
        Ok(Self {
            cek_entry,
            cek_ordinal: meta.cek_table_ordinal,
            algorithm_id: meta.algorithm_id,
            algorithm_name: meta.algorithm_name.clone(),
            encryption_type: meta.encryption_type,
            normalization_version: meta.normalization_version,
            key: None,
        })
    }

    /// Check if a decrypted key is attached.
    #[must_use]
    pub fn is_key_initialized(&self) -> bool {
        self.key.is_some()
    }

    /// The decrypted key, if any.
    #[must_use]
    pub fn key(&self) -> Option<&SymmetricKey> {
        self.key.as_ref()
    }

    /// Attach a decrypted key.
    pub fn set_key(&mut self, key: SymmetricKey) {
        self.key = Some(key);
    }

    /// Copy without the decrypted key.
    #[must_use]
    pub fn stripped(&self) -> Self {
        Self {
            key: None,
            ..self.clone()
        }
    }
}

/// Decrypts column encryption keys with the column master key.
#[async_trait::async_trait]
pub trait KeyDecryptor: Send + Sync {
    /// Decrypt the CEK referenced by `metadata`.
    ///
    /// Fails when the key was revoked, rotated or is otherwise not
    /// decryptable in the current session.
    async fn decrypt_symmetric_key(&self, metadata: &ParamCryptoMetadata) -> Result<SymmetricKey>;
}

/// Identity of one CEK version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CekId {
    /// Database id.
    pub database_id: u32,
    /// CEK id.
    pub cek_id: u32,
    /// CEK version.
    pub cek_version: u32,
}

impl From<&CekTableEntry> for CekId {
    fn from(entry: &CekTableEntry) -> Self {
        Self {
            database_id: entry.database_id,
            cek_id: entry.cek_id,
            cek_version: entry.cek_version,
        }
    }
}

/// A [`KeyDecryptor`] backed by already-decrypted keys.
///
/// Useful when the CEKs were unwrapped out of band, and for tests. Keys can
/// be revoked at runtime to model rotation.
#[derive(Debug, Default)]
pub struct InMemoryKeyDecryptor {
    keys: RwLock<HashMap<CekId, SymmetricKey>>,
}

impl InMemoryKeyDecryptor {
    /// Create an empty decryptor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the plaintext of a CEK.
    pub fn add_key(&self, id: CekId, key: SymmetricKey) {
        self.keys.write().insert(id, key);
    }

    /// Forget a CEK. Returns `true` if it was present.
    pub fn revoke(&self, id: &CekId) -> bool {
        self.keys.write().remove(id).is_some()
    }
}

#[async_trait::async_trait]
impl KeyDecryptor for InMemoryKeyDecryptor {
    async fn decrypt_symmetric_key(&self, metadata: &ParamCryptoMetadata) -> Result<SymmetricKey> {
        let id = CekId::from(&metadata.cek_entry);
        self.keys.read().get(&id).cloned().ok_or_else(|| {
            Error::KeyDecryption(format!(
                "no key for cek {} version {} in database {}",
                id.cek_id, id.cek_version, id.database_id
            ))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
pub(crate) mod tests {
    use super::*;
    use tds_protocol::{TypeId, TypeInfo};

    pub(crate) fn cek_entry(cek_id: u32) -> CekTableEntry {
        CekTableEntry {
            database_id: 5,
            cek_id,
            cek_version: 1,
            cek_md_version: 0x0102_0304,
            values: Vec::new(),
        }
    }

    pub(crate) fn crypto(cek_id: u32) -> ParamCryptoMetadata {
        ParamCryptoMetadata {
            cek_entry: cek_entry(cek_id),
            cek_ordinal: 0,
            algorithm_id: 2,
            algorithm_name: None,
            encryption_type: EncryptionTypeWire::Deterministic,
            normalization_version: 1,
            key: None,
        }
    }

    #[test]
    fn test_from_wire_resolves_cek() {
        let wire = CryptoMetadata {
            cek_table_ordinal: 1,
            base_user_type: 0,
            base_type: TypeId::IntN,
            base_type_info: TypeInfo::default(),
            algorithm_id: 2,
            algorithm_name: None,
            encryption_type: EncryptionTypeWire::Randomized,
            normalization_version: 1,
        };
        let table = [cek_entry(10), cek_entry(11)];
        let meta = ParamCryptoMetadata::from_wire(&wire, &table).unwrap();
        assert_eq!(meta.cek_entry.cek_id, 11);
        assert_eq!(meta.encryption_type, EncryptionTypeWire::Randomized);
        assert!(!meta.is_key_initialized());

        let err = ParamCryptoMetadata::from_wire(&wire, &table[..1]).unwrap_err();
        assert!(err.is_protocol_error());
    }

    #[test]
    fn test_stripped_drops_key() {
        let mut meta = crypto(1);
        meta.set_key(SymmetricKey::new(vec![7u8; 32]));
        assert!(meta.is_key_initialized());
        assert_eq!(meta.key().unwrap().len(), 32);

        let stripped = meta.stripped();
        assert!(!stripped.is_key_initialized());
        assert_eq!(stripped.cek_entry, meta.cek_entry);
    }

    #[test]
    fn test_symmetric_key_debug_is_redacted() {
        let key = SymmetricKey::new(vec![0xAB; 4]);
        let debug = format!("{key:?}");
        assert!(debug.contains("len: 4"));
        assert!(!debug.contains("171"));
    }

    #[tokio::test]
    async fn test_in_memory_decryptor_revocation() {
        let decryptor = InMemoryKeyDecryptor::new();
        let meta = crypto(3);
        let id = CekId::from(&meta.cek_entry);
        decryptor.add_key(id, SymmetricKey::new(vec![1u8; 32]));

        let key = decryptor.decrypt_symmetric_key(&meta).await.unwrap();
        assert_eq!(key.as_bytes(), &[1u8; 32]);

        assert!(decryptor.revoke(&id));
        assert!(matches!(
            decryptor.decrypt_symmetric_key(&meta).await,
            Err(Error::KeyDecryption(_))
        ));
    }
}
