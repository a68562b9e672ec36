//! Cache-aside MX resolution
//!
//! Resolved exchanger sets are kept in a shared store keyed by domain, with
//! DNS as the source of truth on a miss. An empty set is a real entry: it
//! records that the domain has nowhere to deliver to, and a hit on it must
//! not go back to DNS. Errors are never cached.

use std::{
    fmt::Debug,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use dashmap::DashMap;
use mailroute_common::{Domain, internal, tracing::debug};
use redis::{AsyncCommands, aio::MultiplexedConnection};
use serde::Deserialize;
use thiserror::Error;

use crate::dns::{DnsError, MailExchanger, MxLookup};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache service error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Cached value is not a valid exchanger list: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Where resolved exchanger sets are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum CacheBackend {
    /// The shared Redis instance, visible to every node.
    #[default]
    Redis,
    /// A map inside this process.
    Memory,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MxCacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,

    /// Expiry applied to cache writes; entries never expire when absent.
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

/// Storage for domain -> exchanger sets.
#[async_trait]
pub trait MxStore: Send + Sync + Debug {
    /// `Ok(None)` is a miss; `Ok(Some(vec![]))` is a hit on an empty set.
    async fn get(&self, domain: &Domain) -> Result<Option<Vec<MailExchanger>>, CacheError>;

    async fn set(&self, domain: &Domain, exchangers: &[MailExchanger]) -> Result<(), CacheError>;
}

/// Exchanger sets stored as JSON strings under the bare domain key.
#[derive(Clone)]
pub struct RedisMxStore {
    connection: MultiplexedConnection,
    ttl_secs: Option<u64>,
}

impl RedisMxStore {
    #[must_use]
    pub const fn new(connection: MultiplexedConnection, ttl_secs: Option<u64>) -> Self {
        Self {
            connection,
            ttl_secs,
        }
    }
}

impl Debug for RedisMxStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisMxStore")
            .field("ttl_secs", &self.ttl_secs)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl MxStore for RedisMxStore {
    async fn get(&self, domain: &Domain) -> Result<Option<Vec<MailExchanger>>, CacheError> {
        let mut connection = self.connection.clone();
        let value: Option<String> = connection.get(domain.as_str()).await?;

        Ok(value
            .map(|value| serde_json::from_str(&value))
            .transpose()?)
    }

    async fn set(&self, domain: &Domain, exchangers: &[MailExchanger]) -> Result<(), CacheError> {
        let value = serde_json::to_string(exchangers)?;
        let mut connection = self.connection.clone();

        match self.ttl_secs {
            Some(ttl) => {
                connection
                    .set_ex::<_, _, ()>(domain.as_str(), value, ttl)
                    .await?;
            }
            None => connection.set::<_, _, ()>(domain.as_str(), value).await?,
        }

        Ok(())
    }
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    exchangers: Vec<MailExchanger>,
    expires_at: Option<Instant>,
}

/// Exchanger sets held in a concurrent map inside this process.
#[derive(Debug, Default)]
pub struct MemoryMxStore {
    entries: DashMap<Domain, MemoryEntry>,
    ttl: Option<Duration>,
}

impl MemoryMxStore {
    #[must_use]
    pub fn new(ttl_secs: Option<u64>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: ttl_secs.map(Duration::from_secs),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl MxStore for MemoryMxStore {
    async fn get(&self, domain: &Domain) -> Result<Option<Vec<MailExchanger>>, CacheError> {
        let now = Instant::now();
        let hit = self.entries.get(domain).and_then(|entry| {
            if entry.expires_at.is_some_and(|expires_at| now >= expires_at) {
                None
            } else {
                Some(entry.exchangers.clone())
            }
        });

        if hit.is_none() {
            self.entries
                .remove_if(domain, |_, entry| entry.expires_at.is_some_and(|e| now >= e));
        }

        Ok(hit)
    }

    async fn set(&self, domain: &Domain, exchangers: &[MailExchanger]) -> Result<(), CacheError> {
        self.entries.insert(
            domain.clone(),
            MemoryEntry {
                exchangers: exchangers.to_vec(),
                expires_at: self.ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }
}

/// Cache-aside resolution shared by every worker.
#[derive(Debug, Clone)]
pub struct MxCache {
    store: Arc<dyn MxStore>,
    dns: Arc<dyn MxLookup>,
}

impl MxCache {
    #[must_use]
    pub fn new(store: Arc<dyn MxStore>, dns: Arc<dyn MxLookup>) -> Self {
        Self { store, dns }
    }

    /// Returns the exchangers of `domain`, lowest priority value first.
    ///
    /// A store that cannot be read, or holds something unreadable, counts as
    /// a miss. A failed store write is logged and the resolved set is still
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns the [`DnsError`] of a failed lookup on a miss. Nothing is
    /// cached in that case.
    #[tracing::instrument(level = "debug", skip(self), fields(domain = %domain))]
    pub async fn resolve(&self, domain: &Domain) -> Result<Vec<MailExchanger>, DnsError> {
        match self.store.get(domain).await {
            Ok(Some(exchangers)) => {
                debug!("MX cache hit for {domain} ({} exchangers)", exchangers.len());
                return Ok(exchangers);
            }
            Ok(None) => debug!("MX cache miss for {domain}"),
            Err(e) => internal!(
                level = WARN,
                "Unable to read MX cache for {domain}, resolving instead: {e}"
            ),
        }

        let mut exchangers = self.dns.lookup_mx(domain).await?;
        // Stable: equal priorities keep the resolver's order
        exchangers.sort_by_key(|mx| mx.priority);

        if let Err(e) = self.store.set(domain, &exchangers).await {
            internal!(level = WARN, "Unable to cache MX records for {domain}: {e}");
        }

        Ok(exchangers)
    }
}
