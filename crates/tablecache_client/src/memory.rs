// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! In-process cache client backed by moka.
//!
//! Values expire according to the [`Clock`] supplied at construction, which makes expiry
//! fully controllable in tests. Named locks only exclude callers within the same process.

use std::time::{Duration, SystemTime};

use bytes::Bytes;
use moka::future::Cache;
use moka::ops::compute::Op;
use tick::{Clock, FutureExt};

use crate::named_lock::NamedLocks;
use crate::{CacheClient, Error, Result};

#[derive(Debug, Clone)]
struct StoredValue {
    value: Bytes,
    expires_at: SystemTime,
}

/// A [`CacheClient`] that keeps values in process memory.
///
/// Cloning is cheap and clones share the same storage and locks.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use bytes::Bytes;
/// use tablecache_client::{CacheClient, MemoryCacheClient};
/// use tick::Clock;
///
/// # futures::executor::block_on(async {
/// let client = MemoryCacheClient::builder(Clock::new_frozen())
///     .max_capacity(10_000)
///     .build();
///
/// client.set("shop:orders:id[1]", Bytes::from_static(b"{}"), Duration::from_secs(60)).await?;
/// assert!(client.get("shop:orders:id[1]").await?.is_some());
/// # Ok::<(), tablecache_client::Error>(())
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct MemoryCacheClient {
    values: Cache<String, StoredValue>,
    locks: NamedLocks,
    clock: Clock,
    lock_timeout: Option<Duration>,
}

impl MemoryCacheClient {
    /// Creates a client with default settings.
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        Self::builder(clock).build()
    }

    /// Creates a builder for a client driven by `clock`.
    #[must_use]
    pub fn builder(clock: Clock) -> MemoryCacheClientBuilder {
        MemoryCacheClientBuilder::new(clock)
    }

    /// Returns the number of stored entries, including ones that expired but were not yet read.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.values.entry_count()
    }

    fn from_builder(builder: MemoryCacheClientBuilder) -> Self {
        let mut moka_builder = Cache::builder();

        if let Some(capacity) = builder.max_capacity {
            moka_builder = moka_builder.max_capacity(capacity);
        }

        Self {
            values: moka_builder.build(),
            locks: NamedLocks::default(),
            clock: builder.clock,
            lock_timeout: builder.lock_timeout,
        }
    }
}

impl MemoryCacheClient {
    /// Removes the entry under `key` only if it is still expired, so a concurrent `set`
    /// landing after the expired read survives.
    async fn evict_expired(&self, key: &str) {
        let now = self.clock.system_time();
        self.values
            .entry_by_ref(key)
            .and_compute_with(|entry| async move {
                match entry {
                    Some(entry) if now >= entry.value().expires_at => Op::Remove,
                    _ => Op::Nop,
                }
            })
            .await;
    }
}

impl CacheClient for MemoryCacheClient {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let Some(stored) = self.values.get(key).await else {
            return Ok(None);
        };

        if self.clock.system_time() >= stored.expires_at {
            self.evict_expired(key).await;
            return Ok(None);
        }

        Ok(Some(stored.value))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        let expires_at = self
            .clock
            .system_time()
            .checked_add(ttl)
            .ok_or_else(|| Error::backend(format!("ttl of {ttl:?} overflows the clock")))?;

        self.values.insert(key.to_owned(), StoredValue { value, expires_at }).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.values.invalidate(key).await;
        Ok(())
    }

    async fn lock<Fut, T>(&self, name: &str, body: Fut) -> Result<T>
    where
        Fut: Future<Output = T> + Send,
        T: Send,
    {
        let slot = self.locks.slot(name);

        let _guard = match self.lock_timeout {
            Some(timeout) => slot
                .lock()
                .timeout(&self.clock, timeout)
                .await
                .map_err(|e| Error::lock_unavailable(format!("timed out waiting for lock '{name}': {e}")))?,
            None => slot.lock().await,
        };

        Ok(body.await)
    }
}

/// Builder for [`MemoryCacheClient`].
#[derive(Debug)]
pub struct MemoryCacheClientBuilder {
    clock: Clock,
    max_capacity: Option<u64>,
    lock_timeout: Option<Duration>,
}

impl MemoryCacheClientBuilder {
    fn new(clock: Clock) -> Self {
        Self {
            clock,
            max_capacity: None,
            lock_timeout: None,
        }
    }

    /// Sets the maximum number of entries. The least valuable entries are evicted beyond it.
    #[must_use]
    pub fn max_capacity(mut self, capacity: u64) -> Self {
        self.max_capacity = Some(capacity);
        self
    }

    /// Bounds how long [`CacheClient::lock`] waits before failing with
    /// [`ErrorKind::LockUnavailable`](crate::ErrorKind::LockUnavailable).
    ///
    /// Without a timeout, lock acquisition waits indefinitely.
    #[must_use]
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Builds the client.
    #[must_use]
    pub fn build(self) -> MemoryCacheClient {
        MemoryCacheClient::from_builder(self)
    }
}
