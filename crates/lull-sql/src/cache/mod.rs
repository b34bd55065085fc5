//! Result cache keyed by caller-supplied signatures.
//!
//! Every `database.table` has a generation token in the store. A cached
//! result carries the token that was current when it was stored and is only
//! served while that token is still current, so a write to the table drops
//! every result derived from it by retiring the token. Losing the token to
//! eviction retires it too. Result entries and tokens live under separate
//! key spaces. Stores are plain byte key/value services; see [`MemoryStore`]
//! and [`MemcacheStore`].

mod memcache;
mod memory;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::errors::CacheError;

pub use self::memcache::{MemcacheConfig, MemcacheStore};
pub use self::memory::MemoryStore;

const CACHE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::cache");

/// One result row, column name to value.
pub type Row = Map<String, Value>;

/// Byte-oriented key/value store backing the result cache.
pub trait CacheStore: Send + Sync {
    /// Reads `key`.
    ///
    /// # Errors
    ///
    /// Returns an error when the store cannot be reached or rejects the key.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Writes `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error when the store cannot be reached or rejects the key.
    fn set(&self, key: &str, value: &[u8]) -> Result<(), CacheError>;

    /// Removes `key`; missing keys are not an error.
    ///
    /// # Errors
    ///
    /// Returns an error when the store cannot be reached or rejects the key.
    fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// Signature-keyed cache of serialized result sets.
#[derive(Clone)]
pub struct ResultCache {
    store: Arc<dyn CacheStore>,
    prefix: String,
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ResultCache")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl ResultCache {
    /// Wraps `store`, prefixing every key with `prefix`.
    #[must_use]
    pub fn new(store: Arc<dyn CacheStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    fn entry_key(&self, signature: &str) -> String {
        format!("{}r/{signature}", self.prefix)
    }

    fn generation_key(&self, database: &str, table: &str) -> String {
        format!("{}g/{database}.{table}", self.prefix)
    }

    fn generation(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self
            .store
            .get(key)?
            .and_then(|bytes| String::from_utf8(bytes).ok()))
    }

    /// Cached rows for `signature`; an empty signature is never cached.
    ///
    /// # Errors
    ///
    /// Returns an error when the store fails or the payload is corrupt.
    pub fn get(&self, signature: &str) -> Result<Option<Vec<Row>>, CacheError> {
        if signature.is_empty() {
            return Ok(None);
        }
        let key = self.entry_key(signature);
        let Some(bytes) = self.store.get(&key)? else {
            return Ok(None);
        };
        let entry: Entry = serde_json::from_slice(&bytes)?;
        let current = self.generation(&self.generation_key(&entry.database, &entry.table))?;
        if current.as_deref() != Some(entry.generation.as_str()) {
            self.store.delete(&key)?;
            debug!(target: CACHE_TARGET, signature, "dropped stale cache entry");
            return Ok(None);
        }
        debug!(target: CACHE_TARGET, signature, "result cache hit");
        Ok(Some(entry.rows))
    }

    /// Stores `rows` under `signature`, stamped with the current generation
    /// of `database.table`.
    ///
    /// # Errors
    ///
    /// Returns an error when the store fails.
    pub fn store(
        &self,
        rows: &[Row],
        signature: &str,
        database: &str,
        table: &str,
    ) -> Result<(), CacheError> {
        if signature.is_empty() {
            return Ok(());
        }
        let generation_key = self.generation_key(database, table);
        let generation = match self.generation(&generation_key)? {
            Some(generation) => generation,
            None => {
                let fresh = format!("{:016x}", rand::random::<u64>());
                self.store.set(&generation_key, fresh.as_bytes())?;
                fresh
            }
        };
        let entry = Entry {
            database: database.to_owned(),
            table: table.to_owned(),
            generation,
            rows: rows.to_vec(),
        };
        self.store
            .set(&self.entry_key(signature), &serde_json::to_vec(&entry)?)?;
        Ok(())
    }

    /// Retires the generation of `database.table`; every result stored for
    /// it becomes a miss.
    ///
    /// # Errors
    ///
    /// Returns an error when the store fails.
    pub fn invalidate(&self, database: &str, table: &str) -> Result<(), CacheError> {
        self.store.delete(&self.generation_key(database, table))?;
        debug!(target: CACHE_TARGET, database, table, "result cache invalidated");
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct Entry {
    database: String,
    table: String,
    generation: String,
    rows: Vec<Row>,
}
