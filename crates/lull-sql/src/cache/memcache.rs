//! Store backed by a memcached server.

use std::sync::Mutex;
use std::time::Duration;

use memcache::Client;
use tracing::debug;

use super::{CACHE_TARGET, CacheStore};
use crate::errors::CacheError;

/// Connection settings for [`MemcacheStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemcacheConfig {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Read and write timeout.
    pub timeout: Duration,
}

impl Default for MemcacheConfig {
    fn default() -> Self {
        Self {
            host: String::from("127.0.0.1"),
            port: 11211,
            timeout: Duration::from_millis(500),
        }
    }
}

impl MemcacheConfig {
    /// Server URL understood by the memcache client.
    #[must_use]
    pub fn url(&self) -> String {
        format!("memcache://{}:{}", self.host, self.port)
    }
}

/// Store backed by a memcached server.
///
/// The client connects on first use; a failed connection is retried by the
/// next request.
pub struct MemcacheStore {
    config: MemcacheConfig,
    client: Mutex<Option<Client>>,
}

impl std::fmt::Debug for MemcacheStore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("MemcacheStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MemcacheStore {
    /// Creates a store; no connection is made until the first request.
    #[must_use]
    pub fn new(config: MemcacheConfig) -> Self {
        Self {
            config,
            client: Mutex::new(None),
        }
    }

    fn client(&self) -> Result<Client, CacheError> {
        let mut slot = self.client.lock().map_err(|_| CacheError::Poisoned)?;
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }
        let url = self.config.url();
        let client = Client::connect(url.as_str())?;
        client.set_read_timeout(Some(self.config.timeout))?;
        client.set_write_timeout(Some(self.config.timeout))?;
        debug!(target: CACHE_TARGET, %url, "connected to memcached");
        *slot = Some(client.clone());
        Ok(client)
    }
}

impl CacheStore for MemcacheStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.client()?.get::<Vec<u8>>(key)?)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), CacheError> {
        self.client()?.set(key, value, 0)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.client()?.delete(key)?;
        Ok(())
    }
}
