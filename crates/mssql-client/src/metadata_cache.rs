//! Parameter encryption metadata cache.
//!
//! Describing the encryption of a statement's parameters costs a round trip
//! (`sp_describe_parameter_encryption`). The cache remembers the result per
//! database and statement text so that repeated executions skip it.
//!
//! ## Safety
//!
//! Entries hold stripped copies of [`ParamCryptoMetadata`] only. A hit hands
//! out fresh copies and decrypts their keys against the current session,
//! so a revoked or rotated key is detected on every use. A decryption
//! failure evicts the entry and reports a miss.
//!
//! ## Trimming
//!
//! The cache is allowed to grow `trim_threshold` entries past its capacity.
//! The insert that finds it over that mark first evicts the oldest entries
//! down to exactly `capacity`.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use tds_protocol::CekTableEntry;

use crate::config::MetadataCacheConfig;
use crate::encryption::{KeyDecryptor, ParamCryptoMetadata};
use crate::error::{Error, Result};
use crate::params::Parameter;

/// Longest SQL Server identifier, in UTF-16 code units.
const SQL_IDENTIFIER_LENGTH: usize = 128;

const ENCLAVE_KEY_SUFFIX: &str = ":::enclaveKeys";

/// Build the cache key and the enclave key for a statement.
///
/// The database name is padded so that no database/statement pair can
/// collide with another. Without a database there is no connection context
/// and nothing can be cached.
#[must_use]
pub fn cache_keys(database: Option<&str>, sql: &str) -> Option<(String, String)> {
    let database = database?;
    let padding = (SQL_IDENTIFIER_LENGTH + 1).saturating_sub(database.encode_utf16().count());

    let mut key = String::with_capacity(database.len() + padding + sql.len() + 6);
    key.push_str(":::");
    key.push_str(database);
    key.extend(std::iter::repeat_n(' ', padding));
    key.push_str(":::");
    key.push_str(sql);

    let enclave = format!("{key}{ENCLAVE_KEY_SUFFIX}");
    Some((key, enclave))
}

#[derive(Debug, Clone)]
struct CacheEntry {
    seq: u64,
    params: HashMap<String, ParamCryptoMetadata>,
}

/// Cache of parameter encryption metadata, shared by the statements of a
/// session.
#[derive(Debug)]
pub struct MetadataCache {
    config: MetadataCacheConfig,
    entries: DashMap<String, CacheEntry>,
    enclave: DashMap<String, BTreeMap<u16, CekTableEntry>>,
    seq: AtomicU64,
    // Serializes trim + insert so the post-trim size is exact.
    trim_lock: Mutex<()>,
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new(MetadataCacheConfig::default())
    }
}

impl MetadataCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new(config: MetadataCacheConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
            enclave: DashMap::new(),
            seq: AtomicU64::new(0),
            trim_lock: Mutex::new(()),
        }
    }

    /// Cache configuration.
    #[must_use]
    pub fn config(&self) -> &MetadataCacheConfig {
        &self.config
    }

    /// Apply cached metadata to `params`.
    ///
    /// `names[i]` is the name of `params[i]`. Returns `true` on a usable
    /// hit: every parameter has metadata with a freshly decrypted key and
    /// no enclave round trip is needed. On a miss every parameter's
    /// metadata is cleared, except when only the enclave keys forced it.
    pub async fn get_query_metadata(
        &self,
        database: Option<&str>,
        sql: &str,
        names: &[String],
        params: &mut [Parameter],
        decryptor: &dyn KeyDecryptor,
    ) -> Result<bool> {
        if !self.config.enabled {
            return Ok(false);
        }
        let Some((key, enclave_key)) = cache_keys(database, sql) else {
            return Ok(false);
        };
        // Copy out so no map guard is held across the decryption awaits.
        let Some(cached) = self.entries.get(&key).map(|entry| entry.params.clone()) else {
            tracing::trace!(key_len = key.len(), "metadata cache miss");
            return Ok(false);
        };

        let mut mismatch = None;
        for (i, param) in params.iter_mut().enumerate() {
            let found = names.get(i).and_then(|name| cached.get(name));
            match found {
                Some(meta) if !meta.is_key_initialized() => param.set_crypto(Some(meta.stripped())),
                _ => {
                    mismatch = Some(i);
                    break;
                }
            }
        }
        if let Some(index) = mismatch {
            tracing::trace!(index = index, "metadata cache entry does not match parameters");
            clear_crypto(params);
            return Ok(false);
        }

        let mut failure = None;
        for param in params.iter_mut() {
            if let Some(crypto) = param.crypto_mut() {
                match decryptor.decrypt_symmetric_key(crypto).await {
                    Ok(symmetric) => crypto.set_key(symmetric),
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
        }
        if let Some(e) = failure {
            tracing::debug!(error = %e, "evicting metadata cache entry after key decryption failure");
            self.remove_key(&key);
            clear_crypto(params);
            return Ok(false);
        }

        tracing::trace!(key_len = key.len(), params = params.len(), "metadata cache hit");
        Ok(!self.enclave.contains_key(&enclave_key))
    }

    /// Cache the metadata currently on `params`.
    ///
    /// Returns `false` without caching when there is no connection context
    /// or a parameter has no metadata. `enclave_keys`, when non-empty, is
    /// stored alongside and forces later lookups to miss.
    pub fn add_query_metadata(
        &self,
        database: Option<&str>,
        sql: &str,
        names: &[String],
        params: &[Parameter],
        enclave_keys: &BTreeMap<u16, CekTableEntry>,
    ) -> Result<bool> {
        if !self.config.enabled {
            return Ok(false);
        }
        let Some((key, enclave_key)) = cache_keys(database, sql) else {
            return Ok(false);
        };

        let mut metadata = HashMap::with_capacity(params.len());
        for (i, param) in params.iter().enumerate() {
            let Some(crypto) = param.crypto() else {
                return Ok(false);
            };
            let name = names.get(i).ok_or_else(|| {
                Error::CacheInaccessible(format!(
                    "{} parameter names for {} parameters",
                    names.len(),
                    params.len()
                ))
            })?;
            metadata.insert(name.clone(), crypto.stripped());
        }

        let _guard = self.trim_lock.lock();
        self.trim();
        let entry = CacheEntry {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            params: metadata,
        };
        self.entries.insert(key, entry);
        if enclave_keys.is_empty() {
            self.enclave.remove(&enclave_key);
        } else {
            self.enclave.insert(enclave_key, enclave_keys.clone());
        }
        Ok(true)
    }

    fn trim(&self) {
        let size = self.entries.len();
        if size <= self.config.trim_trigger() {
            return;
        }
        let excess = size - self.config.capacity;
        let mut by_age: Vec<(u64, String)> = self
            .entries
            .iter()
            .map(|entry| (entry.seq, entry.key().clone()))
            .collect();
        by_age.sort_unstable_by_key(|(seq, _)| *seq);
        for (_, key) in by_age.into_iter().take(excess) {
            self.remove_key(&key);
        }
        tracing::debug!(removed = excess, remaining = self.entries.len(), "metadata cache trimmed");
    }

    fn remove_key(&self, key: &str) {
        self.entries.remove(key);
        self.enclave.remove(&format!("{key}{ENCLAVE_KEY_SUFFIX}"));
    }

    /// Drop the entry for a statement.
    pub fn remove_cache_entry(&self, database: Option<&str>, sql: &str) {
        if let Some((key, _)) = cache_keys(database, sql) {
            self.remove_key(&key);
        }
    }

    /// Copy of the enclave keys stored for a statement.
    #[must_use]
    pub fn enclave_keys(&self, database: Option<&str>, sql: &str) -> Option<BTreeMap<u16, CekTableEntry>> {
        let (_, enclave_key) = cache_keys(database, sql)?;
        self.enclave.get(&enclave_key).map(|keys| keys.value().clone())
    }

    /// Purge everything.
    pub fn clear(&self) {
        let _guard = self.trim_lock.lock();
        self.entries.clear();
        self.enclave.clear();
    }

    /// Number of cached statements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn clear_crypto(params: &mut [Parameter]) {
    for param in params {
        param.set_crypto(None);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::encryption::tests::{cek_entry, crypto};
    use crate::encryption::{CekId, InMemoryKeyDecryptor, SymmetricKey};

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("@p{i}")).collect()
    }

    fn encrypted_params(n: usize) -> Vec<Parameter> {
        (0..n)
            .map(|i| {
                let mut param = Parameter::new();
                param.set_crypto(Some(crypto(u32::try_from(i).unwrap())));
                param
            })
            .collect()
    }

    fn decryptor_for(n: usize) -> InMemoryKeyDecryptor {
        let decryptor = InMemoryKeyDecryptor::new();
        for i in 0..n {
            let entry = cek_entry(u32::try_from(i).unwrap());
            decryptor.add_key(CekId::from(&entry), SymmetricKey::new(vec![9u8; 32]));
        }
        decryptor
    }

    #[test]
    fn test_cache_keys_padding() {
        let (key, enclave) = cache_keys(Some("db"), "SELECT 1").unwrap();
        assert_eq!(key, format!(":::db{}:::SELECT 1", " ".repeat(127)));
        assert_eq!(enclave, format!("{key}:::enclaveKeys"));

        let long = "d".repeat(200);
        let (key, _) = cache_keys(Some(&long), "x").unwrap();
        assert_eq!(key, format!(":::{long}:::x"));

        let (key, _) = cache_keys(Some(""), "x").unwrap();
        assert_eq!(key.len(), 3 + 129 + 3 + 1);

        assert!(cache_keys(None, "x").is_none());
    }

    #[tokio::test]
    async fn test_add_then_lookup_decrypts_fresh_copies() {
        let cache = MetadataCache::default();
        let mut params = encrypted_params(2);
        params[0].crypto_mut().unwrap().set_key(SymmetricKey::new(vec![1u8; 32]));
        assert!(cache
            .add_query_metadata(Some("db"), "q", &names(2), &params, &BTreeMap::new())
            .unwrap());

        let mut fresh = vec![Parameter::new(), Parameter::new()];
        let hit = cache
            .get_query_metadata(Some("db"), "q", &names(2), &mut fresh, &decryptor_for(2))
            .await
            .unwrap();
        assert!(hit);
        assert!(fresh.iter().all(|p| p.crypto().unwrap().is_key_initialized()));

        // The cache itself never holds key material.
        let stored = cache.entries.get(&cache_keys(Some("db"), "q").unwrap().0).unwrap();
        assert!(stored.params.values().all(|m| !m.is_key_initialized()));
    }

    #[tokio::test]
    async fn test_lookup_miss_on_unknown_name_clears_params() {
        let cache = MetadataCache::default();
        cache
            .add_query_metadata(Some("db"), "q", &names(1), &encrypted_params(1), &BTreeMap::new())
            .unwrap();

        let mut params = encrypted_params(2);
        let hit = cache
            .get_query_metadata(Some("db"), "q", &names(2), &mut params, &decryptor_for(2))
            .await
            .unwrap();
        assert!(!hit);
        assert!(params.iter().all(|p| p.crypto().is_none()));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_decryption_failure_evicts_entry() {
        let cache = MetadataCache::default();
        cache
            .add_query_metadata(Some("db"), "q", &names(2), &encrypted_params(2), &BTreeMap::new())
            .unwrap();
        cache
            .add_query_metadata(Some("db"), "other", &names(2), &encrypted_params(2), &BTreeMap::new())
            .unwrap();

        let decryptor = decryptor_for(2);
        decryptor.revoke(&CekId::from(&cek_entry(1)));

        let mut params = vec![Parameter::new(), Parameter::new()];
        let hit = cache
            .get_query_metadata(Some("db"), "q", &names(2), &mut params, &decryptor)
            .await
            .unwrap();
        assert!(!hit);
        assert!(params.iter().all(|p| p.crypto().is_none()));
        assert_eq!(cache.len(), 1);
        assert!(cache.entries.contains_key(&cache_keys(Some("db"), "other").unwrap().0));
    }

    #[tokio::test]
    async fn test_enclave_keys_force_miss() {
        let cache = MetadataCache::default();
        let mut enclave = BTreeMap::new();
        enclave.insert(0u16, cek_entry(0));
        cache
            .add_query_metadata(Some("db"), "q", &names(1), &encrypted_params(1), &enclave)
            .unwrap();
        assert_eq!(cache.enclave_keys(Some("db"), "q").unwrap(), enclave);

        let mut params = vec![Parameter::new()];
        let hit = cache
            .get_query_metadata(Some("db"), "q", &names(1), &mut params, &decryptor_for(1))
            .await
            .unwrap();
        assert!(!hit);
        assert!(params[0].crypto().unwrap().is_key_initialized());

        cache.remove_cache_entry(Some("db"), "q");
        assert!(cache.is_empty());
        assert!(cache.enclave_keys(Some("db"), "q").is_none());
    }

    #[tokio::test]
    async fn test_enclave_keys_follow_entry() {
        let cache = MetadataCache::default();
        let mut enclave = BTreeMap::new();
        enclave.insert(0u16, cek_entry(0));
        cache
            .add_query_metadata(Some("db"), "q", &names(1), &encrypted_params(1), &enclave)
            .unwrap();

        let revoked = decryptor_for(1);
        revoked.revoke(&CekId::from(&cek_entry(0)));
        let mut params = vec![Parameter::new()];
        let hit = cache
            .get_query_metadata(Some("db"), "q", &names(1), &mut params, &revoked)
            .await
            .unwrap();
        assert!(!hit);
        assert!(cache.is_empty());
        assert!(cache.enclave_keys(Some("db"), "q").is_none());

        // Rediscovered without enclave keys: later lookups hit.
        cache
            .add_query_metadata(Some("db"), "q", &names(1), &encrypted_params(1), &enclave)
            .unwrap();
        cache
            .add_query_metadata(Some("db"), "q", &names(1), &encrypted_params(1), &BTreeMap::new())
            .unwrap();
        assert!(cache.enclave_keys(Some("db"), "q").is_none());
        let mut params = vec![Parameter::new()];
        let hit = cache
            .get_query_metadata(Some("db"), "q", &names(1), &mut params, &decryptor_for(1))
            .await
            .unwrap();
        assert!(hit);
        assert!(params[0].crypto().unwrap().is_key_initialized());
    }

    #[test]
    fn test_add_rejections() {
        let cache = MetadataCache::default();
        let empty = BTreeMap::new();
        assert!(!cache
            .add_query_metadata(None, "q", &names(1), &encrypted_params(1), &empty)
            .unwrap());
        assert!(!cache
            .add_query_metadata(Some("db"), "q", &names(1), &[Parameter::new()], &empty)
            .unwrap());
        assert!(matches!(
            cache.add_query_metadata(Some("db"), "q", &names(1), &encrypted_params(2), &empty),
            Err(Error::CacheInaccessible(_))
        ));
        assert!(cache.is_empty());

        let disabled = MetadataCache::new(MetadataCacheConfig::disabled());
        assert!(!disabled
            .add_query_metadata(Some("db"), "q", &names(1), &encrypted_params(1), &empty)
            .unwrap());
    }

    #[test]
    fn test_trim_evicts_oldest_to_capacity() {
        let cache = MetadataCache::new(MetadataCacheConfig::new().capacity(3).trim_threshold(2));
        let params = encrypted_params(1);
        let empty = BTreeMap::new();
        for i in 0..6 {
            cache
                .add_query_metadata(Some("db"), &format!("q{i}"), &names(1), &params, &empty)
                .unwrap();
        }
        assert_eq!(cache.len(), 6);

        cache
            .add_query_metadata(Some("db"), "q6", &names(1), &params, &empty)
            .unwrap();
        assert_eq!(cache.len(), 4);
        for gone in ["q0", "q1", "q2"] {
            assert!(!cache.entries.contains_key(&cache_keys(Some("db"), gone).unwrap().0));
        }
        assert!(cache.entries.contains_key(&cache_keys(Some("db"), "q6").unwrap().0));

        cache.clear();
        assert!(cache.is_empty());
    }
}
